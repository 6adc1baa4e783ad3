use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;

use crate::config::SchedulerConfig;
use crate::db::models::{MeetingLink, SlotRecord};
use crate::error::AppResult;
use crate::i18n;
use crate::services::booking::BookingService;
use crate::services::notifications::{send_best_effort, Keyboard};

pub const REMINDER_WINDOW_SECONDS: i64 = 24 * 60 * 60;
pub const MEETING_LEAD_SECONDS: i64 = 15 * 60;

/// Strictly in the future and no further away than `window_seconds`.
fn is_due(until: ChronoDuration, window_seconds: i64) -> bool {
    until > ChronoDuration::zero() && until <= ChronoDuration::seconds(window_seconds)
}

/// What one pass did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PassReport {
    pub reminders_sent: usize,
    pub meetings_created: usize,
    pub failures: usize,
}

/// Periodic job for the 24-hour reminder and the pre-meeting link creation.
pub struct Scheduler {
    booking: Arc<BookingService>,
}

impl Scheduler {
    pub fn new(booking: Arc<BookingService>) -> Self {
        Self { booking }
    }

    /// One sweep over every booking. A failing row is logged and skipped.
    pub async fn run_pass(&self, now: DateTime<Utc>) -> AppResult<PassReport> {
        let bookings = self.booking.store().list_bookings().await?;
        let mut report = PassReport::default();

        for record in &bookings {
            match self.send_reminder(record, now).await {
                Ok(true) => report.reminders_sent += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!("Reminder for {} failed: {}", record.label, e);
                    report.failures += 1;
                }
            }

            match self.create_due_meeting(record, now).await {
                Ok(true) => report.meetings_created += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!("Pre-meeting link for {} failed: {}", record.label, e);
                    report.failures += 1;
                }
            }
        }

        Ok(report)
    }

    async fn send_reminder(&self, record: &SlotRecord, now: DateTime<Utc>) -> AppResult<bool> {
        let Some(ref client) = record.client else {
            return Ok(false);
        };
        if !record.state.is_confirmed()
            || record.reminder_sent
            || !is_due(record.time_until(now), REMINDER_WINDOW_SECONDS)
        {
            return Ok(false);
        }

        // Flag first: a lost reminder is acceptable, a duplicate is not.
        if !self
            .booking
            .store()
            .set_reminder_sent(&record.label, client.user_id)
            .await?
        {
            return Ok(false);
        }

        let lang = self.booking.language_of(record);
        let text = match record.meeting.ready_link() {
            Some(link) => i18n::t_with(
                lang,
                "reminder.with_link",
                &[("slot", &record.label), ("link", link)],
            ),
            None => i18n::t_with(lang, "reminder.text", &[("slot", &record.label)]),
        };
        send_best_effort(
            self.booking.messenger().as_ref(),
            client.user_id,
            &text,
            Keyboard::Keep,
        )
        .await;

        tracing::info!("Sent 24h reminder for {} to {}", record.label, client.user_id);
        Ok(true)
    }

    async fn create_due_meeting(&self, record: &SlotRecord, now: DateTime<Utc>) -> AppResult<bool> {
        if record.meeting.link != MeetingLink::Pending
            || record.meeting.contact_email.is_none()
            || !is_due(record.time_until(now), MEETING_LEAD_SECONDS)
        {
            return Ok(false);
        }

        let created = self.booking.complete_pending_meeting(record).await?;
        if created.is_some() {
            tracing::info!("Created pre-meeting link for {}", record.label);
        }
        Ok(created.is_some())
    }

    /// Run passes on a fixed interval until `shutdown` fires.
    ///
    /// Each pass is awaited before the next tick, so passes never overlap.
    pub async fn run(self: Arc<Self>, config: SchedulerConfig, mut shutdown: broadcast::Receiver<()>) {
        let mut interval = tokio::time::interval(Duration::from_secs(config.poll_interval_seconds.max(1)));
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let pass_timeout = Duration::from_secs(config.pass_timeout_seconds.max(1));

        tracing::info!(
            "Scheduler started (interval {}s, pass timeout {}s)",
            config.poll_interval_seconds,
            config.pass_timeout_seconds
        );

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("Scheduler shutting down");
                    break;
                }
                _ = interval.tick() => {}
            }

            match tokio::time::timeout(pass_timeout, self.run_pass(Utc::now())).await {
                Ok(Ok(report)) if report != PassReport::default() => {
                    tracing::info!("Scheduler pass: {:?}", report);
                }
                Ok(Ok(_)) => tracing::debug!("Scheduler pass: nothing due"),
                Ok(Err(e)) => tracing::error!("Scheduler pass failed: {}", e),
                Err(_) => tracing::warn!("Scheduler pass exceeded {}s", pass_timeout.as_secs()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;

    use chrono_tz::Tz;

    use crate::db::models::{MeetingUpdate, SlotState};
    use crate::db::SlotStore;
    use crate::testutils::{client, dt, FakeMeetingProvider, MemoryTable, RecordingMessenger};

    const ADMIN: i64 = 1;
    const A: &str = "10.10.2030, 10:00";
    const B: &str = "10.10.2030, 12:00";

    struct Fixture {
        table: Arc<MemoryTable>,
        messenger: Arc<RecordingMessenger>,
        meetings: Arc<FakeMeetingProvider>,
        store: Arc<SlotStore>,
        scheduler: Scheduler,
    }

    fn fixture() -> Fixture {
        let table = Arc::new(MemoryTable::with_free_slots(&[A, B]));
        let store = Arc::new(SlotStore::new(table.clone(), Tz::UTC));
        let messenger = Arc::new(RecordingMessenger::default());
        let meetings = Arc::new(FakeMeetingProvider::default());
        let booking = Arc::new(BookingService::new(
            store.clone(),
            messenger.clone(),
            meetings.clone(),
            ADMIN,
            "en".to_string(),
        ));
        Fixture {
            table,
            messenger,
            meetings,
            store,
            scheduler: Scheduler::new(booking),
        }
    }

    fn booked_at() -> DateTime<Utc> {
        dt("01.01.2030, 00:00")
    }

    impl Fixture {
        async fn confirm(&self, label: &str, user_id: i64) {
            self.store
                .write_booking(
                    label,
                    client(user_id),
                    SlotState::Confirmed { rescheduled: false },
                    Some("en"),
                    booked_at(),
                )
                .await
                .unwrap();
        }

        async fn mark_pending(&self, label: &str, user_id: i64) {
            self.store
                .update_meeting(
                    label,
                    user_id,
                    MeetingUpdate {
                        contact_email: Some("jane@example.com".to_string()),
                        link: Some(MeetingLink::Pending),
                        event_id: None,
                    },
                )
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn reminder_is_sent_once() {
        let f = fixture();
        f.confirm(A, 7).await;
        let now = dt(A) - ChronoDuration::hours(23);

        let first = f.scheduler.run_pass(now).await.unwrap();
        let second = f.scheduler.run_pass(now + ChronoDuration::minutes(1)).await.unwrap();

        assert_eq!(first.reminders_sent, 1);
        assert_eq!(second.reminders_sent, 0);
        assert_eq!(f.messenger.count_to(7), 1);
        assert!(f.messenger.last_to(7).unwrap().text.contains("Reminder"));
        assert!(f.store.find_slot(A).await.unwrap().reminder_sent);
    }

    #[tokio::test]
    async fn reminder_waits_for_window_and_confirmation() {
        let f = fixture();
        f.confirm(A, 7).await;
        f.store
            .write_booking(B, client(8), SlotState::PendingApproval, None, booked_at())
            .await
            .unwrap();

        let report = f.scheduler.run_pass(dt(A) - ChronoDuration::hours(25)).await.unwrap();
        assert_eq!(report.reminders_sent, 0);

        let report = f.scheduler.run_pass(dt(A) - ChronoDuration::hours(2)).await.unwrap();
        assert_eq!(report.reminders_sent, 1);
        assert_eq!(f.messenger.count_to(8), 0);
    }

    #[tokio::test]
    async fn reminder_window_opens_at_exactly_24_hours() {
        let f = fixture();
        f.confirm(A, 7).await;
        let start = dt(A);

        for early in [
            ChronoDuration::seconds(86_401),
            ChronoDuration::milliseconds(86_400_500),
        ] {
            let report = f.scheduler.run_pass(start - early).await.unwrap();
            assert_eq!(report.reminders_sent, 0, "{:?} before the start", early);
        }

        let at_window = start - ChronoDuration::seconds(86_400);
        assert_eq!(f.scheduler.run_pass(at_window).await.unwrap().reminders_sent, 1);
        assert_eq!(f.scheduler.run_pass(at_window).await.unwrap().reminders_sent, 0);
        assert_eq!(f.messenger.count_to(7), 1);
    }

    #[tokio::test]
    async fn nothing_fires_once_the_meeting_has_started() {
        let f = fixture();
        f.confirm(A, 7).await;
        f.mark_pending(A, 7).await;

        let report = f.scheduler.run_pass(dt(A)).await.unwrap();
        assert_eq!(report, PassReport::default());
        assert_eq!(f.meetings.calls(), 0);
        assert_eq!(f.messenger.count_to(7), 0);
    }

    #[tokio::test]
    async fn lost_reminder_is_not_retried() {
        let f = fixture();
        f.confirm(A, 7).await;
        f.messenger.failing.store(true, Ordering::SeqCst);
        let now = dt(A) - ChronoDuration::hours(1);

        f.scheduler.run_pass(now).await.unwrap();
        f.messenger.failing.store(false, Ordering::SeqCst);
        f.scheduler.run_pass(now).await.unwrap();

        assert_eq!(f.messenger.count_to(7), 0);
        assert!(f.store.find_slot(A).await.unwrap().reminder_sent);
    }

    #[tokio::test]
    async fn pending_meeting_is_created_once_inside_lead_time() {
        let f = fixture();
        f.confirm(A, 7).await;
        f.mark_pending(A, 7).await;

        let report = f.scheduler.run_pass(dt(A) - ChronoDuration::minutes(20)).await.unwrap();
        assert_eq!(report.meetings_created, 0);
        assert_eq!(f.meetings.calls(), 0);

        let now = dt(A) - ChronoDuration::minutes(14);
        let first = f.scheduler.run_pass(now).await.unwrap();
        let second = f.scheduler.run_pass(now).await.unwrap();

        assert_eq!(first.meetings_created, 1);
        assert_eq!(second.meetings_created, 0);
        assert_eq!(f.meetings.calls(), 1);

        let rec = f.store.find_slot(A).await.unwrap();
        let link = rec.meeting.ready_link().unwrap().to_string();
        assert_eq!(link, FakeMeetingProvider::link_for(rec.meeting.event_id.as_deref().unwrap()));
        assert!(f.messenger.to(7).iter().any(|m| m.text.contains(&link)));
    }

    #[tokio::test]
    async fn meeting_lead_opens_at_exactly_15_minutes() {
        let f = fixture();
        f.confirm(A, 7).await;
        f.mark_pending(A, 7).await;
        let start = dt(A);

        for early in [
            ChronoDuration::seconds(901),
            ChronoDuration::milliseconds(900_500),
        ] {
            let report = f.scheduler.run_pass(start - early).await.unwrap();
            assert_eq!(report.meetings_created, 0, "{:?} before the start", early);
        }
        assert_eq!(f.meetings.calls(), 0);

        let at_lead = start - ChronoDuration::seconds(900);
        assert_eq!(f.scheduler.run_pass(at_lead).await.unwrap().meetings_created, 1);
        assert_eq!(f.scheduler.run_pass(at_lead).await.unwrap().meetings_created, 0);
        assert_eq!(f.meetings.calls(), 1);
    }

    #[tokio::test]
    async fn failing_row_does_not_stop_the_pass() {
        let f = fixture();
        f.confirm(A, 7).await;
        f.mark_pending(A, 7).await;
        f.confirm(B, 8).await;
        f.meetings.success.store(false, Ordering::SeqCst);

        let report = f.scheduler.run_pass(dt(A) - ChronoDuration::minutes(10)).await.unwrap();

        assert_eq!(report.failures, 1);
        assert_eq!(report.reminders_sent, 2);
        assert_eq!(f.store.find_slot(A).await.unwrap().meeting.link, MeetingLink::Pending);

        // The marker survives, so the next pass tries again with the same event id.
        let event_id = f.store.find_slot(A).await.unwrap().meeting.event_id;
        f.meetings.success.store(true, Ordering::SeqCst);
        let report = f.scheduler.run_pass(dt(A) - ChronoDuration::minutes(5)).await.unwrap();
        assert_eq!(report.meetings_created, 1);
        assert_eq!(f.store.find_slot(A).await.unwrap().meeting.event_id, event_id);
    }

    #[tokio::test]
    async fn store_outage_fails_the_pass() {
        let f = fixture();
        f.table.set_failing(true);
        assert!(f.scheduler.run_pass(booked_at()).await.is_err());
    }
}
