use std::future::Future;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;

use crate::db::models::*;
use crate::db::SlotStore;
use crate::error::{AppError, AppResult};
use crate::i18n;
use crate::services::calendar::{new_event_id, MeetingProvider, MeetingRequest};
use crate::services::notifications::{self, send_best_effort, Keyboard, Messenger};

lazy_static! {
    static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
}

const RETRY_DELAY: StdDuration = StdDuration::from_millis(250);

pub fn is_valid_email(email: &str) -> bool {
    EMAIL_RE.is_match(email)
}

/// Events that move a slot between states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookingEvent {
    Request,
    Approve,
    Decline,
    ClientCancel,
    /// Leaving a slot for another one; the slot being left becomes free.
    RescheduleOut,
}

impl BookingEvent {
    fn action(&self) -> &'static str {
        match self {
            BookingEvent::Request => "request",
            BookingEvent::Approve => "approve",
            BookingEvent::Decline => "decline",
            BookingEvent::ClientCancel => "cancel",
            BookingEvent::RescheduleOut => "reschedule",
        }
    }
}

/// The booking state machine. Returns the state `record` moves to on `event`.
pub fn transition(record: &SlotRecord, event: BookingEvent) -> AppResult<SlotState> {
    use BookingEvent::*;
    use SlotState::*;

    match (record.state, event) {
        (Free, Request) => Ok(PendingApproval),
        (PendingApproval, Approve) => Ok(Confirmed { rescheduled: false }),
        (PendingApproval, Decline) => Ok(Free),
        (Confirmed { .. }, ClientCancel) => Ok(Free),
        (Confirmed { .. }, RescheduleOut) => Ok(Free),
        (from, event) => Err(AppError::InvalidTransition {
            label: record.label.clone(),
            from,
            action: event.action(),
        }),
    }
}

/// Run `op`, repeating it once after a transient failure.
pub async fn retry_once<T, F, Fut>(what: &str, mut op: F) -> AppResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = AppResult<T>>,
{
    match op().await {
        Err(e) if e.is_transient() => {
            tracing::warn!("{} failed ({}); retrying once", what, e);
            tokio::time::sleep(RETRY_DELAY).await;
            op().await
        }
        other => other,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MeetingOutcome {
    /// The meeting exists; carries the join link.
    Ready(String),
    /// The link will be created shortly before the start.
    Scheduled,
}

/// Applies booking transitions through the store and performs their side effects.
pub struct BookingService {
    store: Arc<SlotStore>,
    messenger: Arc<dyn Messenger>,
    meetings: Arc<dyn MeetingProvider>,
    admin_id: i64,
    default_language: String,
}

impl BookingService {
    pub fn new(
        store: Arc<SlotStore>,
        messenger: Arc<dyn Messenger>,
        meetings: Arc<dyn MeetingProvider>,
        admin_id: i64,
        default_language: String,
    ) -> Self {
        Self {
            store,
            messenger,
            meetings,
            admin_id,
            default_language,
        }
    }

    pub fn store(&self) -> &Arc<SlotStore> {
        &self.store
    }

    pub fn messenger(&self) -> &Arc<dyn Messenger> {
        &self.messenger
    }

    pub fn admin_id(&self) -> i64 {
        self.admin_id
    }

    pub fn admin_language(&self) -> &str {
        &self.default_language
    }

    /// Language a booking's messages are rendered in.
    pub fn language_of<'a>(&'a self, record: &'a SlotRecord) -> &'a str {
        record.language.as_deref().unwrap_or(&self.default_language)
    }

    async fn notify_admin(&self, text: String, keyboard: Keyboard) {
        send_best_effort(self.messenger.as_ref(), self.admin_id, &text, keyboard).await;
    }

    /// Remove the calendar event of a booking that left its slot. Failures are only logged.
    async fn drop_meeting(&self, record: &SlotRecord) {
        let Some(ref event_id) = record.meeting.event_id else {
            return;
        };
        if let Err(e) = self.meetings.cancel_meeting(event_id).await {
            tracing::warn!(
                "Calendar event {} of {} was not removed: {}",
                event_id,
                record.label,
                e
            );
        }
    }

    /// `Free -> PendingApproval` and hand the request to the administrator.
    pub async fn request_booking(
        &self,
        label: &str,
        client: Client,
        language: &str,
        now: DateTime<Utc>,
    ) -> AppResult<SlotRecord> {
        let record = retry_once("write booking", || {
            self.store.write_booking(
                label,
                client.clone(),
                SlotState::PendingApproval,
                Some(language),
                now,
            )
        })
        .await?;

        let lang = self.admin_language();
        let user_id = client.user_id.to_string();
        let text = i18n::t_with(
            lang,
            "admin.new_request",
            &[
                ("slot", &record.label),
                ("name", &client.full_name),
                ("handle", display_handle(&client.handle)),
                ("user_id", &user_id),
            ],
        );
        self.notify_admin(text, notifications::admin_decision(&record.label, lang))
            .await;

        Ok(record)
    }

    /// `PendingApproval -> Confirmed`; the client is asked how to arrange the meeting.
    pub async fn approve(&self, label: &str) -> AppResult<SlotRecord> {
        let record = retry_once("confirm booking", || self.store.confirm_booking(label)).await?;

        if let Some(ref client) = record.client {
            let lang = self.language_of(&record);
            send_best_effort(
                self.messenger.as_ref(),
                client.user_id,
                &i18n::t_with(lang, "client.approved", &[("slot", &record.label)]),
                notifications::meet_timing(lang),
            )
            .await;
        }
        Ok(record)
    }

    /// `PendingApproval -> Free`; the client is told the request was declined.
    pub async fn decline(&self, label: &str) -> AppResult<SlotRecord> {
        let erased = retry_once("decline booking", || {
            self.store.clear_booking(label, |current| {
                transition(current, BookingEvent::Decline).map(|_| ())
            })
        })
        .await?;

        if let Some(ref client) = erased.client {
            let lang = self.language_of(&erased);
            send_best_effort(
                self.messenger.as_ref(),
                client.user_id,
                &i18n::t_with(lang, "client.declined", &[("slot", &erased.label)]),
                notifications::main_menu(lang),
            )
            .await;
        }
        Ok(erased)
    }

    /// `Confirmed -> Free` on the client's request; the administrator is told.
    pub async fn cancel(&self, user_id: i64, now: DateTime<Utc>) -> AppResult<SlotRecord> {
        let booking = self
            .store
            .find_booking_for_user(user_id, now)
            .await?
            .ok_or(AppError::NoFutureBooking)?;
        transition(&booking, BookingEvent::ClientCancel)?;

        let erased = retry_once("cancel booking", || {
            self.store.clear_booking(&booking.label, move |current| {
                if !current.is_held_by(user_id) {
                    return Err(AppError::NoFutureBooking);
                }
                transition(current, BookingEvent::ClientCancel).map(|_| ())
            })
        })
        .await?;
        self.drop_meeting(&erased).await;

        if let Some(ref client) = erased.client {
            let text = i18n::t_with(
                self.admin_language(),
                "admin.client_cancelled",
                &[
                    ("slot", &erased.label),
                    ("name", &client.full_name),
                    ("handle", display_handle(&client.handle)),
                ],
            );
            self.notify_admin(text, Keyboard::Keep).await;
        }
        Ok(erased)
    }

    /// Move the client's confirmed booking to `to`. Returns the new booking.
    pub async fn reschedule(&self, user_id: i64, to: &str, now: DateTime<Utc>) -> AppResult<SlotRecord> {
        let booking = self
            .store
            .find_booking_for_user(user_id, now)
            .await?
            .ok_or(AppError::NoFutureBooking)?;
        transition(&booking, BookingEvent::RescheduleOut)?;

        let target = self.store.find_slot(to).await?;
        if target.start <= now {
            return Err(AppError::SlotAlreadyTaken(target.label));
        }

        let moved = retry_once("move booking", || {
            self.store.move_booking(&booking.label, &target.label, user_id)
        })
        .await?;
        // The old event still invites the client to the old time.
        self.drop_meeting(&booking).await;

        if let Some(ref client) = moved.client {
            let count = client.transfer_count.to_string();
            let text = i18n::t_with(
                self.admin_language(),
                "admin.client_rescheduled",
                &[
                    ("name", &client.full_name),
                    ("handle", display_handle(&client.handle)),
                    ("from", &booking.label),
                    ("to", &moved.label),
                    ("count", &count),
                ],
            );
            self.notify_admin(text, Keyboard::Keep).await;
        }
        Ok(moved)
    }

    /// Record the client's meeting preferences for a confirmed booking.
    ///
    /// The event id is persisted before the calendar is called, so a retry after a
    /// lost response reuses the same event instead of creating a second one.
    pub async fn arrange_meeting(
        &self,
        label: &str,
        user_id: i64,
        timing: MeetTiming,
        email: &str,
    ) -> AppResult<MeetingOutcome> {
        let email = email.trim();
        if !is_valid_email(email) {
            return Err(AppError::InvalidEmail(email.to_string()));
        }

        let record = self.store.find_slot(label).await?;
        let event_id = record.meeting.event_id.clone().unwrap_or_else(new_event_id);

        match timing {
            MeetTiming::BeforeMeeting => {
                let update = MeetingUpdate {
                    contact_email: Some(email.to_string()),
                    link: Some(MeetingLink::Pending),
                    event_id: Some(event_id),
                };
                retry_once("mark meeting pending", || {
                    self.store.update_meeting(label, user_id, update.clone())
                })
                .await?;
                tracing::info!("Meeting for {} will be created before the start", label);
                Ok(MeetingOutcome::Scheduled)
            }
            MeetTiming::Immediate => {
                let update = MeetingUpdate {
                    contact_email: Some(email.to_string()),
                    event_id: Some(event_id.clone()),
                    ..Default::default()
                };
                let record = retry_once("store meeting email", || {
                    self.store.update_meeting(label, user_id, update.clone())
                })
                .await?;

                let link = self.create_meeting(&record, email, &event_id).await?;
                let update = MeetingUpdate {
                    link: Some(MeetingLink::Ready(link.clone())),
                    ..Default::default()
                };
                retry_once("store meeting link", || {
                    self.store.update_meeting(label, user_id, update.clone())
                })
                .await?;
                Ok(MeetingOutcome::Ready(link))
            }
        }
    }

    async fn create_meeting(&self, record: &SlotRecord, email: &str, event_id: &str) -> AppResult<String> {
        let name = record
            .client
            .as_ref()
            .map(|c| c.full_name.as_str())
            .unwrap_or_default();
        let request = MeetingRequest {
            event_id: event_id.to_string(),
            start: record.start,
            end: record.end(),
            attendee_email: email.to_string(),
            summary: format!("Consultation: {}", name),
        };
        let created = retry_once("create meeting", || self.meetings.create_meeting(request.clone())).await?;
        Ok(created.link)
    }

    /// Create the meeting of a booking still carrying the `pending` marker.
    ///
    /// Returns the link when this call replaced the marker, `None` when another
    /// writer got there first or the booking no longer qualifies.
    pub async fn complete_pending_meeting(&self, record: &SlotRecord) -> AppResult<Option<String>> {
        let (Some(client), Some(email)) = (record.client.as_ref(), record.meeting.contact_email.as_deref())
        else {
            return Ok(None);
        };
        if record.meeting.link != MeetingLink::Pending || !record.state.is_confirmed() {
            return Ok(None);
        }

        let event_id = match record.meeting.event_id {
            Some(ref id) => id.clone(),
            None => {
                let id = new_event_id();
                self.store
                    .update_meeting(
                        &record.label,
                        client.user_id,
                        MeetingUpdate {
                            event_id: Some(id.clone()),
                            ..Default::default()
                        },
                    )
                    .await?;
                id
            }
        };

        let link = self.create_meeting(record, email, &event_id).await?;
        if !self
            .store
            .complete_pending_meeting(&record.label, client.user_id, &link, &event_id)
            .await?
        {
            return Ok(None);
        }

        let lang = self.language_of(record);
        send_best_effort(
            self.messenger.as_ref(),
            client.user_id,
            &i18n::t_with(
                lang,
                "meeting.auto_created",
                &[("slot", &record.label), ("link", &link)],
            ),
            Keyboard::Keep,
        )
        .await;
        Ok(Some(link))
    }
}

/// Handles are optional; show a dash instead of an empty line.
pub fn display_handle(handle: &str) -> &str {
    if handle.is_empty() {
        "—"
    } else {
        handle
    }
}
