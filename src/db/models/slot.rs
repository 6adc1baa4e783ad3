use chrono::{DateTime, Duration, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::Serialize;

/// Label format used on the sheet, e.g. `10.10.2025, 10:00`.
pub const LABEL_FORMAT: &str = "%d.%m.%Y, %H:%M";

/// Every consultation lasts one hour; the end time is never stored.
pub const SLOT_DURATION_MINUTES: i64 = 60;

/// Link cell value meaning "create the meeting automatically shortly before the start".
pub const PENDING_LINK_MARKER: &str = "pending";

pub const COLUMN_COUNT: usize = 12;

/// Positional layout of a slot row (1-indexed, matches the sheet columns A..L).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Column {
    Index = 1,
    Label = 2,
    State = 3,
    FullName = 4,
    Handle = 5,
    UserId = 6,
    EventId = 7,
    TransferCount = 8,
    ReminderSent = 9,
    Email = 10,
    MeetLink = 11,
    Language = 12,
}

impl Column {
    pub const ALL: [Column; COLUMN_COUNT] = [
        Column::Index,
        Column::Label,
        Column::State,
        Column::FullName,
        Column::Handle,
        Column::UserId,
        Column::EventId,
        Column::TransferCount,
        Column::ReminderSent,
        Column::Email,
        Column::MeetLink,
        Column::Language,
    ];

    /// Columns owned by the occupant of a slot. Clearing a booking blanks all of them.
    pub const OCCUPANT: [Column; 10] = [
        Column::State,
        Column::FullName,
        Column::Handle,
        Column::UserId,
        Column::EventId,
        Column::TransferCount,
        Column::ReminderSent,
        Column::Email,
        Column::MeetLink,
        Column::Language,
    ];

    pub fn number(self) -> usize {
        self as usize
    }

    /// A1-notation column letter.
    pub fn letter(self) -> char {
        (b'A' + (self as u8) - 1) as char
    }

    pub fn sql_name(self) -> &'static str {
        match self {
            Column::Index => "idx",
            Column::Label => "label",
            Column::State => "state",
            Column::FullName => "full_name",
            Column::Handle => "handle",
            Column::UserId => "user_id",
            Column::EventId => "event_id",
            Column::TransferCount => "transfer_count",
            Column::ReminderSent => "reminder_sent",
            Column::Email => "email",
            Column::MeetLink => "meet_link",
            Column::Language => "language",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotState {
    Free,
    PendingApproval,
    Confirmed { rescheduled: bool },
}

impl SlotState {
    pub fn as_label(&self) -> &'static str {
        match self {
            SlotState::Free => "",
            SlotState::PendingApproval => "Pending Confirmation",
            SlotState::Confirmed { rescheduled: false } => "Confirmed",
            SlotState::Confirmed { rescheduled: true } => "Confirmed (reschedule)",
        }
    }

    pub fn from_label(s: &str) -> Option<Self> {
        match s.trim() {
            "" => Some(SlotState::Free),
            "Pending Confirmation" => Some(SlotState::PendingApproval),
            "Confirmed" => Some(SlotState::Confirmed { rescheduled: false }),
            "Confirmed (reschedule)" => Some(SlotState::Confirmed { rescheduled: true }),
            _ => None,
        }
    }

    pub fn is_confirmed(&self) -> bool {
        matches!(self, SlotState::Confirmed { .. })
    }

    /// i18n key for the status line shown to clients.
    pub fn display_key(&self) -> &'static str {
        match self {
            SlotState::Free => "status.free",
            SlotState::PendingApproval => "status.pending",
            SlotState::Confirmed { rescheduled: false } => "status.confirmed",
            SlotState::Confirmed { rescheduled: true } => "status.rescheduled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Client {
    pub full_name: String,
    pub handle: String,
    pub user_id: i64,
    pub transfer_count: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub enum MeetingLink {
    #[default]
    None,
    Pending,
    Ready(String),
}

impl MeetingLink {
    pub fn from_cell(s: &str) -> Self {
        match s.trim() {
            "" => MeetingLink::None,
            PENDING_LINK_MARKER => MeetingLink::Pending,
            url => MeetingLink::Ready(url.to_string()),
        }
    }

    pub fn as_cell(&self) -> String {
        match self {
            MeetingLink::None => String::new(),
            MeetingLink::Pending => PENDING_LINK_MARKER.to_string(),
            MeetingLink::Ready(url) => url.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeetTiming {
    Immediate,
    BeforeMeeting,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Meeting {
    pub contact_email: Option<String>,
    pub link: MeetingLink,
    pub event_id: Option<String>,
}

impl Meeting {
    pub fn ready_link(&self) -> Option<&str> {
        match &self.link {
            MeetingLink::Ready(url) => Some(url.as_str()),
            _ => None,
        }
    }
}

/// Partial update of the meeting sub-record. `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct MeetingUpdate {
    pub contact_email: Option<String>,
    pub link: Option<MeetingLink>,
    pub event_id: Option<String>,
}

impl MeetingUpdate {
    pub fn cells(&self) -> Vec<(Column, String)> {
        let mut cells = Vec::new();
        if let Some(ref email) = self.contact_email {
            cells.push((Column::Email, email.clone()));
        }
        if let Some(ref link) = self.link {
            cells.push((Column::MeetLink, link.as_cell()));
        }
        if let Some(ref id) = self.event_id {
            cells.push((Column::EventId, id.clone()));
        }
        cells
    }

    pub fn is_empty(&self) -> bool {
        self.contact_email.is_none() && self.link.is_none() && self.event_id.is_none()
    }
}

/// A decoded table row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SlotRecord {
    /// 1-indexed row number in the table (row 1 is the header).
    pub row: usize,
    pub label: String,
    pub start: DateTime<Utc>,
    pub state: SlotState,
    pub client: Option<Client>,
    pub meeting: Meeting,
    pub reminder_sent: bool,
    pub language: Option<String>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RowError {
    #[error("row {0} has no slot label")]
    MissingLabel(usize),

    #[error("row {row}: unparsable slot label '{label}'")]
    BadLabel { row: usize, label: String },

    #[error("row {row}: unknown state '{state}'")]
    BadState { row: usize, state: String },

    #[error("row {row}: occupied slot without a valid user id ('{user_id}')")]
    BadClient { row: usize, user_id: String },
}

impl SlotRecord {
    pub fn from_row(row: usize, cells: &[String], tz: Tz) -> Result<Self, RowError> {
        let cell = |c: Column| cell_at(cells, c);

        let label = cell(Column::Label);
        if label.is_empty() {
            return Err(RowError::MissingLabel(row));
        }
        let start = parse_label(label, tz).ok_or_else(|| RowError::BadLabel {
            row,
            label: label.to_string(),
        })?;

        let state = SlotState::from_label(cell(Column::State)).ok_or_else(|| RowError::BadState {
            row,
            state: cell(Column::State).to_string(),
        })?;

        if state == SlotState::Free {
            return Ok(SlotRecord {
                row,
                label: label.to_string(),
                start,
                state,
                client: None,
                meeting: Meeting::default(),
                reminder_sent: false,
                language: None,
            });
        }

        let user_id: i64 = cell(Column::UserId)
            .parse()
            .map_err(|_| RowError::BadClient {
                row,
                user_id: cell(Column::UserId).to_string(),
            })?;

        let non_empty = |s: &str| (!s.is_empty()).then(|| s.to_string());

        Ok(SlotRecord {
            row,
            label: label.to_string(),
            start,
            state,
            client: Some(Client {
                full_name: cell(Column::FullName).to_string(),
                handle: cell(Column::Handle).to_string(),
                user_id,
                transfer_count: cell(Column::TransferCount).parse().unwrap_or(0),
            }),
            meeting: Meeting {
                contact_email: non_empty(cell(Column::Email)),
                link: MeetingLink::from_cell(cell(Column::MeetLink)),
                event_id: non_empty(cell(Column::EventId)),
            },
            reminder_sent: matches!(
                cell(Column::ReminderSent).to_lowercase().as_str(),
                "1" | "true"
            ),
            language: non_empty(cell(Column::Language)),
        })
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.start + Duration::minutes(SLOT_DURATION_MINUTES)
    }

    /// Exact time left before the start; negative once it has begun.
    pub fn time_until(&self, now: DateTime<Utc>) -> Duration {
        self.start - now
    }

    pub fn is_free(&self) -> bool {
        self.state == SlotState::Free
    }

    pub fn is_held_by(&self, user_id: i64) -> bool {
        self.client.as_ref().map(|c| c.user_id) == Some(user_id)
    }
}

fn cell_at(cells: &[String], c: Column) -> &str {
    cells
        .get(c.number() - 1)
        .map(|s| s.trim())
        .unwrap_or("")
}

/// Cells written when a client occupies a slot. Meeting and reminder state start blank.
pub fn occupant_cells(
    state: SlotState,
    client: &Client,
    meeting: &Meeting,
    language: Option<&str>,
) -> Vec<(Column, String)> {
    vec![
        (Column::State, state.as_label().to_string()),
        (Column::FullName, client.full_name.clone()),
        (Column::Handle, client.handle.clone()),
        (Column::UserId, client.user_id.to_string()),
        (Column::EventId, meeting.event_id.clone().unwrap_or_default()),
        (Column::TransferCount, client.transfer_count.to_string()),
        (Column::ReminderSent, "0".to_string()),
        (Column::Email, meeting.contact_email.clone().unwrap_or_default()),
        (Column::MeetLink, meeting.link.as_cell()),
        (Column::Language, language.unwrap_or_default().to_string()),
    ]
}

pub fn cleared_cells() -> Vec<(Column, String)> {
    Column::OCCUPANT
        .iter()
        .map(|c| (*c, String::new()))
        .collect()
}

/// Build the cells of a brand-new free row.
pub fn free_row(label: &str) -> Vec<String> {
    let mut cells = vec![String::new(); COLUMN_COUNT];
    cells[Column::Label.number() - 1] = label.to_string();
    cells
}

/// Parse a slot label in the configured zone. Labels falling into a DST gap are rejected.
pub fn parse_label(label: &str, tz: Tz) -> Option<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(label.trim(), LABEL_FORMAT).ok()?;
    tz.from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
}

pub fn format_label(local: NaiveDateTime) -> String {
    local.format(LABEL_FORMAT).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(cells: &[&str]) -> Vec<String> {
        let mut out: Vec<String> = cells.iter().map(|s| s.to_string()).collect();
        out.resize(COLUMN_COUNT, String::new());
        out
    }

    #[test]
    fn column_letters_follow_sheet_layout() {
        assert_eq!(Column::Index.letter(), 'A');
        assert_eq!(Column::Label.letter(), 'B');
        assert_eq!(Column::Email.letter(), 'J');
        assert_eq!(Column::Language.letter(), 'L');
    }

    #[test]
    fn state_labels_roundtrip() {
        for state in [
            SlotState::Free,
            SlotState::PendingApproval,
            SlotState::Confirmed { rescheduled: false },
            SlotState::Confirmed { rescheduled: true },
        ] {
            assert_eq!(SlotState::from_label(state.as_label()), Some(state));
        }
        assert_eq!(SlotState::from_label("Booked?"), None);
    }

    #[test]
    fn decodes_free_row_without_client() {
        let rec = SlotRecord::from_row(2, &row(&["1", "10.10.2030, 10:00"]), Tz::UTC).unwrap();
        assert!(rec.is_free());
        assert!(rec.client.is_none());
        assert_eq!(rec.end() - rec.start, Duration::hours(1));
    }

    #[test]
    fn decodes_confirmed_row_with_meeting() {
        let rec = SlotRecord::from_row(
            3,
            &row(&[
                "2",
                "11.10.2030, 09:00",
                "Confirmed",
                "Ivan Petrov",
                "@ivan",
                "111",
                "evt1",
                "2",
                "1",
                "a@b.com",
                "pending",
                "en",
            ]),
            Tz::UTC,
        )
        .unwrap();

        assert_eq!(rec.state, SlotState::Confirmed { rescheduled: false });
        let client = rec.client.as_ref().unwrap();
        assert_eq!(client.user_id, 111);
        assert_eq!(client.transfer_count, 2);
        assert!(rec.reminder_sent);
        assert_eq!(rec.meeting.link, MeetingLink::Pending);
        assert_eq!(rec.meeting.event_id.as_deref(), Some("evt1"));
        assert_eq!(rec.language.as_deref(), Some("en"));
        assert!(rec.is_held_by(111));
    }

    #[test]
    fn rejects_malformed_rows() {
        assert_eq!(
            SlotRecord::from_row(4, &row(&["", ""]), Tz::UTC),
            Err(RowError::MissingLabel(4))
        );
        assert!(matches!(
            SlotRecord::from_row(5, &row(&["", "tomorrow"]), Tz::UTC),
            Err(RowError::BadLabel { .. })
        ));
        assert!(matches!(
            SlotRecord::from_row(6, &row(&["", "10.10.2030, 10:00", "Confirmed", "A", "", ""]), Tz::UTC),
            Err(RowError::BadClient { .. })
        ));
    }

    #[test]
    fn label_is_interpreted_in_configured_zone() {
        let lisbon: Tz = "Europe/Lisbon".parse().unwrap();
        // Lisbon is UTC+1 in summer.
        let start = parse_label("10.07.2030, 10:00", lisbon).unwrap();
        assert_eq!(start.format("%H:%M").to_string(), "09:00");
    }

    #[test]
    fn cleared_cells_blank_every_occupant_column() {
        let cells = cleared_cells();
        assert_eq!(cells.len(), Column::OCCUPANT.len());
        assert!(cells.iter().all(|(_, v)| v.is_empty()));
        assert!(!cells.iter().any(|(c, _)| *c == Column::Label));
    }
}
