use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use tokio::sync::Mutex;

use crate::db::models::*;
use crate::db::repository::sheet_table::SheetTable;
use crate::error::{AppError, AppResult};

/// The only component allowed to read or mutate the booking table.
///
/// Every mutation takes the store-wide write lock, re-reads the target row and
/// validates it immediately before writing. Within one process this makes
/// "first to successfully claim wins" a hard rule; across processes it is the
/// best the table allows, since it offers no transactions.
pub struct SlotStore {
    table: Arc<dyn SheetTable>,
    tz: Tz,
    write_lock: Mutex<()>,
}

impl SlotStore {
    pub fn new(table: Arc<dyn SheetTable>, tz: Tz) -> Self {
        Self {
            table,
            tz,
            write_lock: Mutex::new(()),
        }
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    /// Decode every row, skipping malformed ones.
    async fn records(&self) -> AppResult<Vec<SlotRecord>> {
        let rows = self.table.read_rows().await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            match SlotRecord::from_row(row.number, &row.cells, self.tz) {
                Ok(rec) => out.push(rec),
                // Blank trailing rows are common in hand-edited sheets.
                Err(RowError::MissingLabel(_)) => {}
                Err(e) => tracing::warn!("Skipping malformed slot row: {}", e),
            }
        }
        Ok(out)
    }

    /// Free future slots in table order. Callers must not assume chronological order.
    pub async fn scan_free_slots(&self, now: DateTime<Utc>) -> AppResult<Vec<String>> {
        Ok(self
            .records()
            .await?
            .into_iter()
            .filter(|r| r.is_free() && r.start > now)
            .map(|r| r.label)
            .collect())
    }

    /// Re-read the row `located` was decoded from. A row that no longer carries
    /// the same label counts as missing.
    async fn reread(&self, located: &SlotRecord) -> AppResult<SlotRecord> {
        let missing = || AppError::SlotNotFound(located.label.clone());
        let row = self.table.read_row(located.row).await?.ok_or_else(missing)?;
        let fresh = SlotRecord::from_row(row.number, &row.cells, self.tz).map_err(|e| {
            tracing::warn!("Row {} became unreadable: {}", located.row, e);
            missing()
        })?;
        if fresh.label != located.label {
            tracing::info!("Row {} was relabelled from {}", located.row, located.label);
            return Err(missing());
        }
        Ok(fresh)
    }

    /// `find_slot` followed by a re-read of just that row.
    async fn fresh_slot(&self, label: &str) -> AppResult<SlotRecord> {
        let located = self.find_slot(label).await?;
        self.reread(&located).await
    }

    pub async fn find_slot(&self, label: &str) -> AppResult<SlotRecord> {
        let label = label.trim();
        self.records()
            .await?
            .into_iter()
            .find(|r| r.label == label)
            .ok_or_else(|| AppError::SlotNotFound(label.to_string()))
    }

    /// First booking held by `user_id` that starts after `now`. Lapsed bookings are invisible.
    pub async fn find_booking_for_user(
        &self,
        user_id: i64,
        now: DateTime<Utc>,
    ) -> AppResult<Option<SlotRecord>> {
        Ok(self
            .records()
            .await?
            .into_iter()
            .find(|r| r.is_held_by(user_id) && r.start > now))
    }

    /// Every occupied row, past ones included.
    pub async fn list_bookings(&self) -> AppResult<Vec<SlotRecord>> {
        Ok(self
            .records()
            .await?
            .into_iter()
            .filter(|r| !r.is_free())
            .collect())
    }

    /// Occupy a free slot.
    ///
    /// Fails with `SlotAlreadyTaken` if the slot is not free at write time, and with
    /// `AlreadyBooked` if the client holds another slot starting after `now`. A replay
    /// by the same user into the same state returns the existing record, so the
    /// encompassing operation may be retried after a transient failure.
    pub async fn write_booking(
        &self,
        label: &str,
        client: Client,
        requested_state: SlotState,
        language: Option<&str>,
        now: DateTime<Utc>,
    ) -> AppResult<SlotRecord> {
        let _guard = self.write_lock.lock().await;
        let records = self.records().await?;
        let label = label.trim();
        let located = records
            .iter()
            .find(|r| r.label == label)
            .ok_or_else(|| AppError::SlotNotFound(label.to_string()))?;
        let current = self.reread(located).await?;

        if let Some(other) = records
            .iter()
            .find(|r| r.row != current.row && r.is_held_by(client.user_id) && r.start > now)
        {
            return Err(AppError::AlreadyBooked(other.label.clone()));
        }

        if requested_state == SlotState::Free {
            return Err(AppError::InvalidTransition {
                label: current.label,
                from: current.state,
                action: "occupy",
            });
        }

        if !current.is_free() {
            if current.is_held_by(client.user_id) && current.state == requested_state {
                tracing::debug!(
                    "Booking of {} by user {} already applied",
                    current.label,
                    client.user_id
                );
                return Ok(current);
            }
            tracing::info!(
                "Slot {} lost to a concurrent writer (state {:?})",
                current.label,
                current.state
            );
            return Err(AppError::SlotAlreadyTaken(current.label));
        }

        let meeting = Meeting::default();
        let cells = occupant_cells(requested_state, &client, &meeting, language);
        self.table.write_cells(current.row, &cells).await?;

        tracing::info!(
            "Slot {} -> {:?} for user {}",
            current.label,
            requested_state,
            client.user_id
        );

        Ok(SlotRecord {
            state: requested_state,
            client: Some(client),
            meeting,
            reminder_sent: false,
            language: language.map(str::to_string),
            ..current
        })
    }

    /// `PendingApproval -> Confirmed`.
    pub async fn confirm_booking(&self, label: &str) -> AppResult<SlotRecord> {
        let _guard = self.write_lock.lock().await;
        let current = self.fresh_slot(label).await?;

        if current.state != SlotState::PendingApproval {
            return Err(AppError::InvalidTransition {
                label: current.label,
                from: current.state,
                action: "approve",
            });
        }

        let confirmed = SlotState::Confirmed { rescheduled: false };
        self.table
            .write_cells(
                current.row,
                &[(Column::State, confirmed.as_label().to_string())],
            )
            .await?;

        tracing::info!("Slot {} confirmed", current.label);
        Ok(SlotRecord {
            state: confirmed,
            ..current
        })
    }

    /// Reset a slot to `Free` and erase every client and meeting field.
    ///
    /// `check` runs against the freshly read row under the write lock; the erased
    /// record is returned so callers can notify whoever held it.
    pub async fn clear_booking<F>(&self, label: &str, check: F) -> AppResult<SlotRecord>
    where
        F: FnOnce(&SlotRecord) -> AppResult<()> + Send,
    {
        let _guard = self.write_lock.lock().await;
        let current = self.fresh_slot(label).await?;
        check(&current)?;

        self.table.write_cells(current.row, &cleared_cells()).await?;

        tracing::info!("Slot {} cleared (was {:?})", current.label, current.state);
        Ok(current)
    }

    /// Move a confirmed booking held by `user_id` from `from` to the free slot `to`.
    ///
    /// The new slot is claimed first; the old one is cleared only once the claim
    /// landed. If clearing fails the claim is rolled back so the client never
    /// ends up holding both slots.
    pub async fn move_booking(&self, from: &str, to: &str, user_id: i64) -> AppResult<SlotRecord> {
        let _guard = self.write_lock.lock().await;
        let old = self.fresh_slot(from).await?;
        let target = self.fresh_slot(to).await?;

        if !old.is_held_by(user_id) || !old.state.is_confirmed() {
            return Err(AppError::InvalidTransition {
                label: old.label,
                from: old.state,
                action: "reschedule",
            });
        }
        if old.row == target.row {
            return Err(AppError::SlotAlreadyTaken(target.label));
        }
        if !target.is_free() {
            return Err(AppError::SlotAlreadyTaken(target.label));
        }

        let Some(old_client) = old.client.clone() else {
            return Err(AppError::InvalidTransition {
                label: old.label,
                from: old.state,
                action: "reschedule",
            });
        };

        let client = Client {
            transfer_count: old_client.transfer_count + 1,
            ..old_client
        };
        // The contact email survives; the link and reminder belong to the old time.
        let meeting = Meeting {
            contact_email: old.meeting.contact_email.clone(),
            ..Meeting::default()
        };
        let state = SlotState::Confirmed { rescheduled: true };

        let cells = occupant_cells(state, &client, &meeting, old.language.as_deref());
        self.table.write_cells(target.row, &cells).await?;

        if let Err(e) = self.table.write_cells(old.row, &cleared_cells()).await {
            tracing::error!(
                "Failed to free {} after moving user {} to {}: {}; rolling back",
                old.label,
                user_id,
                target.label,
                e
            );
            if let Err(rollback) = self.table.write_cells(target.row, &cleared_cells()).await {
                tracing::error!(
                    "Rollback of {} failed, user {} now holds two slots: {}",
                    target.label,
                    user_id,
                    rollback
                );
            }
            return Err(e);
        }

        tracing::info!(
            "User {} rescheduled {} -> {} (transfer #{})",
            user_id,
            old.label,
            target.label,
            client.transfer_count
        );

        Ok(SlotRecord {
            state,
            client: Some(client),
            meeting,
            reminder_sent: false,
            language: old.language,
            ..target
        })
    }

    /// Partial update of the meeting fields of a confirmed booking held by `user_id`.
    pub async fn update_meeting(
        &self,
        label: &str,
        user_id: i64,
        update: MeetingUpdate,
    ) -> AppResult<SlotRecord> {
        let _guard = self.write_lock.lock().await;
        let mut current = self.fresh_slot(label).await?;

        if !current.is_held_by(user_id) || !current.state.is_confirmed() {
            return Err(AppError::InvalidTransition {
                label: current.label,
                from: current.state,
                action: "arrange meeting for",
            });
        }
        if update.is_empty() {
            return Ok(current);
        }

        self.table.write_cells(current.row, &update.cells()).await?;

        if let Some(email) = update.contact_email {
            current.meeting.contact_email = Some(email);
        }
        if let Some(link) = update.link {
            current.meeting.link = link;
        }
        if let Some(id) = update.event_id {
            current.meeting.event_id = Some(id);
        }
        Ok(current)
    }

    /// Replace the `pending` marker of `user_id`'s booking with a created link.
    ///
    /// Returns `false` without writing when the marker is already gone or the
    /// slot changed hands since the caller read it.
    pub async fn complete_pending_meeting(
        &self,
        label: &str,
        user_id: i64,
        link: &str,
        event_id: &str,
    ) -> AppResult<bool> {
        let _guard = self.write_lock.lock().await;
        let current = self.fresh_slot(label).await?;

        if !current.is_held_by(user_id) || current.meeting.link != MeetingLink::Pending {
            return Ok(false);
        }

        self.table
            .write_cells(
                current.row,
                &[
                    (Column::MeetLink, link.to_string()),
                    (Column::EventId, event_id.to_string()),
                ],
            )
            .await?;
        Ok(true)
    }

    /// One-way flip of the reminder flag on `user_id`'s booking.
    ///
    /// Returns `false` when it was already set or someone else holds the slot now.
    pub async fn set_reminder_sent(&self, label: &str, user_id: i64) -> AppResult<bool> {
        let _guard = self.write_lock.lock().await;
        let current = self.fresh_slot(label).await?;

        if current.reminder_sent || !current.is_held_by(user_id) {
            return Ok(false);
        }

        self.table
            .write_cells(current.row, &[(Column::ReminderSent, "1".to_string())])
            .await?;
        Ok(true)
    }

    /// Append free slots, skipping labels already present. Returns how many were added.
    pub async fn append_slots(&self, labels: &[String]) -> AppResult<usize> {
        let _guard = self.write_lock.lock().await;
        let existing: HashSet<String> = self
            .table
            .read_rows()
            .await?
            .into_iter()
            .filter_map(|r| r.cells.get(Column::Label.number() - 1).cloned())
            .map(|s| s.trim().to_string())
            .collect();

        let mut seen = HashSet::new();
        let rows: Vec<Vec<String>> = labels
            .iter()
            .filter(|l| !existing.contains(l.as_str()) && seen.insert(l.as_str()))
            .map(|l| free_row(l))
            .collect();

        let added = rows.len();
        if added > 0 {
            self.table.append_rows(rows).await?;
            tracing::info!("Appended {} free slots", added);
        }
        Ok(added)
    }
}
