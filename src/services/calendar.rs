use async_trait::async_trait;
use chrono::{DateTime, Utc};
use google_calendar3::api::{
    ConferenceData, ConferenceSolutionKey, CreateConferenceRequest, Event, EventAttendee,
    EventDateTime,
};
use google_calendar3::common::GetToken;
use google_calendar3::hyper_rustls::{self, HttpsConnectorBuilder};
use google_calendar3::hyper_util::client::legacy::{connect::HttpConnector, Client};
use google_calendar3::CalendarHub;

use crate::error::{AppError, AppResult};

type Connector = hyper_rustls::HttpsConnector<HttpConnector>;

pub type HubType = CalendarHub<Connector>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeetingRequest {
    /// Caller-chosen event id; creating twice with the same id yields one event.
    pub event_id: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub attendee_email: String,
    pub summary: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedMeeting {
    pub link: String,
    pub event_id: String,
}

#[async_trait]
pub trait MeetingProvider: Send + Sync + 'static {
    async fn create_meeting(&self, request: MeetingRequest) -> AppResult<CreatedMeeting>;

    /// Remove an event and notify its attendees. An event that is already gone is not an error.
    async fn cancel_meeting(&self, event_id: &str) -> AppResult<()>;
}

/// Allocate an event id valid for Google Calendar (lowercase base32hex subset, 32 chars).
pub fn new_event_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Calendar hub over rustls with the given token source.
pub fn create_calendar_hub(auth: impl GetToken + Clone + 'static) -> AppResult<HubType> {
    let https = HttpsConnectorBuilder::new()
        .with_native_roots()
        .map_err(|e| AppError::Config(format!("failed to load TLS root certificates: {}", e)))?
        .https_or_http()
        .enable_http1()
        .build();

    let client = Client::builder(hyper_util::rt::TokioExecutor::new()).build(https);

    Ok(CalendarHub::new(client, auth))
}

/// HTTP status carried by an API error, if any.
fn error_status(err: &google_calendar3::Error) -> Option<u16> {
    match err {
        google_calendar3::Error::BadRequest(body) => body["error"]["code"]
            .as_u64()
            .and_then(|code| u16::try_from(code).ok()),
        google_calendar3::Error::Failure(response) => Some(response.status().as_u16()),
        _ => None,
    }
}

/// Event with one attendee and a Meet conference request keyed by the event id.
fn meet_event(request: &MeetingRequest) -> Event {
    let at = |time: DateTime<Utc>| EventDateTime {
        date_time: Some(time),
        time_zone: Some("UTC".to_string()),
        ..Default::default()
    };

    Event {
        id: Some(request.event_id.clone()),
        summary: Some(request.summary.clone()),
        start: Some(at(request.start)),
        end: Some(at(request.end)),
        attendees: Some(vec![EventAttendee {
            email: Some(request.attendee_email.clone()),
            ..Default::default()
        }]),
        conference_data: Some(ConferenceData {
            create_request: Some(CreateConferenceRequest {
                request_id: Some(request.event_id.clone()),
                conference_solution_key: Some(ConferenceSolutionKey {
                    type_: Some("hangoutsMeet".to_string()),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// The join link: `hangoutLink`, else the first video entry point.
fn meet_link(event: &Event) -> Option<String> {
    event.hangout_link.clone().or_else(|| {
        event
            .conference_data
            .as_ref()?
            .entry_points
            .as_ref()?
            .iter()
            .find(|e| e.entry_point_type.as_deref() == Some("video"))
            .and_then(|e| e.uri.clone())
    })
}

// ============================================================================
// Google Meet provider
// ============================================================================

pub struct GoogleMeetService {
    hub: HubType,
    calendar_id: String,
}

impl GoogleMeetService {
    pub fn new(hub: HubType, calendar_id: String) -> Self {
        Self { hub, calendar_id }
    }

    async fn fetch_event(&self, event_id: &str) -> AppResult<Event> {
        let (_response, event) = self
            .hub
            .events()
            .get(&self.calendar_id, event_id)
            .doit()
            .await
            .map_err(|e| AppError::Calendar(format!("failed to fetch event {}: {}", event_id, e)))?;
        Ok(event)
    }
}

#[async_trait]
impl MeetingProvider for GoogleMeetService {
    async fn create_meeting(&self, request: MeetingRequest) -> AppResult<CreatedMeeting> {
        let result = self
            .hub
            .events()
            .insert(meet_event(&request), &self.calendar_id)
            .conference_data_version(1)
            .send_updates("all")
            .doit()
            .await;

        let event = match result {
            Ok((_response, event)) => event,
            Err(e) if error_status(&e) == Some(409) => {
                tracing::info!(
                    "Calendar event {} already exists; reusing it",
                    request.event_id
                );
                self.fetch_event(&request.event_id).await?
            }
            Err(e) => {
                return Err(AppError::Calendar(format!("failed to create event: {}", e)));
            }
        };

        let event_id = event.id.clone().unwrap_or(request.event_id);
        // Conference creation can lag the event; the next attempt picks the link up.
        let link = meet_link(&event).ok_or_else(|| {
            AppError::Calendar(format!("event {} has no Meet link yet", event_id))
        })?;

        tracing::info!("Meet link ready for event {}", event_id);
        Ok(CreatedMeeting { link, event_id })
    }

    async fn cancel_meeting(&self, event_id: &str) -> AppResult<()> {
        let result = self
            .hub
            .events()
            .delete(&self.calendar_id, event_id)
            .send_updates("all")
            .doit()
            .await;

        match result {
            Ok(_) => {
                tracing::info!("Deleted calendar event {}", event_id);
                Ok(())
            }
            Err(e) if matches!(error_status(&e), Some(404) | Some(410)) => {
                tracing::debug!("Calendar event {} was already gone", event_id);
                Ok(())
            }
            Err(e) => Err(AppError::Calendar(format!(
                "failed to delete event {}: {}",
                event_id, e
            ))),
        }
    }
}
