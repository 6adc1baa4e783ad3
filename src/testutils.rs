use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex,
    },
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;

use crate::config::Config;
use crate::db::models::{free_row, parse_label, Client, Column, COLUMN_COUNT};
use crate::db::repository::{SheetRow, SheetTable, SlotStore};
use crate::error::{AppError, AppResult};
use crate::services::booking::BookingService;
use crate::services::calendar::{CreatedMeeting, MeetingProvider, MeetingRequest};
use crate::services::notifications::{Keyboard, Messenger};
use crate::AppState;

/// Slot label parsed as UTC.
pub fn dt(label: &str) -> DateTime<Utc> {
    parse_label(label, Tz::UTC).expect("test label")
}

pub fn client(user_id: i64) -> Client {
    Client {
        full_name: format!("Client {}", user_id),
        handle: format!("@user{}", user_id),
        user_id,
        transfer_count: 0,
    }
}

// ============================================================================
// In-memory table
// ============================================================================

/// Table backend kept in memory. Row 2 is the first data row.
pub struct MemoryTable {
    rows: Mutex<Vec<Vec<String>>>,
    pub failing: AtomicBool,
    /// Writes to this row number fail.
    pub failing_row: Mutex<Option<usize>>,
    pub calls_to_write_cells: AtomicU64,
    pub calls_to_read_row: AtomicU64,
}

impl MemoryTable {
    pub fn with_free_slots(labels: &[&str]) -> Self {
        Self {
            rows: Mutex::new(labels.iter().map(|l| free_row(l)).collect()),
            failing: AtomicBool::new(false),
            failing_row: Mutex::new(None),
            calls_to_write_cells: AtomicU64::default(),
            calls_to_read_row: AtomicU64::default(),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_failing_row(&self, number: Option<usize>) {
        *self.failing_row.lock().unwrap() = number;
    }

    pub fn row(&self, number: usize) -> Option<Vec<String>> {
        self.rows.lock().unwrap().get(number.checked_sub(2)?).cloned()
    }

    pub fn writes(&self) -> u64 {
        self.calls_to_write_cells.load(Ordering::SeqCst)
    }

    pub fn row_reads(&self) -> u64 {
        self.calls_to_read_row.load(Ordering::SeqCst)
    }

    fn check(&self) -> AppResult<()> {
        match self.failing.load(Ordering::SeqCst) {
            false => Ok(()),
            true => Err(AppError::StoreUnavailable("Supposed to fail".into())),
        }
    }
}

#[async_trait]
impl SheetTable for MemoryTable {
    async fn read_rows(&self) -> AppResult<Vec<SheetRow>> {
        self.check()?;
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .enumerate()
            .map(|(i, cells)| SheetRow {
                number: i + 2,
                cells: cells.clone(),
            })
            .collect())
    }

    async fn read_row(&self, number: usize) -> AppResult<Option<SheetRow>> {
        self.check()?;
        self.calls_to_read_row.fetch_add(1, Ordering::SeqCst);
        Ok(self.row(number).map(|cells| SheetRow { number, cells }))
    }

    async fn write_cells(&self, number: usize, cells: &[(Column, String)]) -> AppResult<()> {
        self.check()?;
        self.calls_to_write_cells.fetch_add(1, Ordering::SeqCst);
        if *self.failing_row.lock().unwrap() == Some(number) {
            return Err(AppError::StoreUnavailable("Supposed to fail".into()));
        }

        let mut rows = self.rows.lock().unwrap();
        let row = number
            .checked_sub(2)
            .and_then(|i| rows.get_mut(i))
            .ok_or_else(|| AppError::StoreUnavailable(format!("row {} does not exist", number)))?;
        row.resize(COLUMN_COUNT, String::new());
        for (column, value) in cells {
            row[column.number() - 1] = value.clone();
        }
        Ok(())
    }

    async fn append_rows(&self, new_rows: Vec<Vec<String>>) -> AppResult<()> {
        self.check()?;
        self.rows.lock().unwrap().extend(new_rows);
        Ok(())
    }
}

// ============================================================================
// Recording messenger
// ============================================================================

#[derive(Debug, Clone)]
pub struct Sent {
    pub user_id: i64,
    pub text: String,
    pub keyboard: Keyboard,
}

#[derive(Default)]
pub struct RecordingMessenger {
    pub sent: Mutex<Vec<Sent>>,
    pub failing: AtomicBool,
}

impl RecordingMessenger {
    pub fn to(&self, user_id: i64) -> Vec<Sent> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect()
    }

    pub fn last_to(&self, user_id: i64) -> Option<Sent> {
        self.to(user_id).pop()
    }

    pub fn count_to(&self, user_id: i64) -> usize {
        self.to(user_id).len()
    }
}

#[async_trait]
impl Messenger for RecordingMessenger {
    async fn send_message(&self, user_id: i64, text: &str, keyboard: Keyboard) -> AppResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(AppError::Telegram("Supposed to fail".into()));
        }
        self.sent.lock().unwrap().push(Sent {
            user_id,
            text: text.to_string(),
            keyboard,
        });
        Ok(())
    }
}

// ============================================================================
// Fake meeting provider
// ============================================================================

/// Behaves like the calendar: one event per id, repeated creation returns the same link.
pub struct FakeMeetingProvider {
    pub success: AtomicBool,
    pub calls_to_create_meeting: AtomicU64,
    pub events: Mutex<HashMap<String, MeetingRequest>>,
    pub cancelled: Mutex<Vec<String>>,
}

impl Default for FakeMeetingProvider {
    fn default() -> Self {
        Self {
            success: AtomicBool::new(true),
            calls_to_create_meeting: AtomicU64::default(),
            events: Mutex::default(),
            cancelled: Mutex::default(),
        }
    }
}

impl FakeMeetingProvider {
    pub fn calls(&self) -> u64 {
        self.calls_to_create_meeting.load(Ordering::SeqCst)
    }

    pub fn event_count(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    pub fn cancelled(&self) -> Vec<String> {
        self.cancelled.lock().unwrap().clone()
    }

    pub fn link_for(event_id: &str) -> String {
        format!("https://meet.google.com/{}", event_id)
    }
}

#[async_trait]
impl MeetingProvider for FakeMeetingProvider {
    async fn create_meeting(&self, request: MeetingRequest) -> AppResult<CreatedMeeting> {
        self.calls_to_create_meeting.fetch_add(1, Ordering::SeqCst);
        if !self.success.load(Ordering::SeqCst) {
            return Err(AppError::Calendar("Supposed to fail".into()));
        }
        let event_id = request.event_id.clone();
        self.events
            .lock()
            .unwrap()
            .entry(event_id.clone())
            .or_insert(request);
        Ok(CreatedMeeting {
            link: Self::link_for(&event_id),
            event_id,
        })
    }

    async fn cancel_meeting(&self, event_id: &str) -> AppResult<()> {
        if !self.success.load(Ordering::SeqCst) {
            return Err(AppError::Calendar("Supposed to fail".into()));
        }
        self.events.lock().unwrap().remove(event_id);
        self.cancelled.lock().unwrap().push(event_id.to_string());
        Ok(())
    }
}

// ============================================================================
// Application state
// ============================================================================

/// Full state over an in-memory table, in UTC.
pub fn app_state(labels: &[&str]) -> (Arc<AppState>, Arc<MemoryTable>) {
    let mut config = Config::default();
    config.booking.timezone = Tz::UTC;
    config.telegram.admin_id = 1;

    let table = Arc::new(MemoryTable::with_free_slots(labels));
    let store = Arc::new(SlotStore::new(table.clone(), Tz::UTC));
    let booking = Arc::new(BookingService::new(
        store.clone(),
        Arc::new(RecordingMessenger::default()),
        Arc::new(FakeMeetingProvider::default()),
        config.telegram.admin_id,
        config.booking.default_language.clone(),
    ));

    let state = Arc::new(AppState {
        config,
        store,
        booking,
    });
    (state, table)
}
