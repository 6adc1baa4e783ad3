use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use tokio::sync::Mutex;

use crate::config::BookingConfig;
use crate::db::models::*;
use crate::error::AppError;
use crate::i18n;
use crate::services::booking::{display_handle, is_valid_email, BookingService, MeetingOutcome};
use crate::services::notifications::{self, send_best_effort, AdminAction, AdminDecision, Keyboard};
use crate::services::slot_seeding::business_day_labels;

const MAX_NAME_CHARS: usize = 100;

/// Where a client is inside a multi-message flow.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Step {
    #[default]
    Idle,
    AwaitingName,
    AwaitingSlotChoice {
        full_name: String,
    },
    AwaitingMeetTiming {
        label: String,
    },
    AwaitingEmail {
        label: String,
        timing: MeetTiming,
    },
    AwaitingNewSlotChoice {
        from_label: String,
    },
}

/// The sender of an inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatUser {
    pub id: i64,
    pub username: Option<String>,
    pub language_code: Option<String>,
}

impl ChatUser {
    fn handle(&self) -> String {
        self.username
            .as_deref()
            .map(|u| format!("@{}", u))
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MenuItem {
    Book,
    MyBooking,
    Reschedule,
    CancelBooking,
    GetLink,
    Info,
}

impl MenuItem {
    const ALL: [(MenuItem, &'static str); 6] = [
        (MenuItem::Book, "menu.book"),
        (MenuItem::MyBooking, "menu.my_booking"),
        (MenuItem::Reschedule, "menu.reschedule"),
        (MenuItem::CancelBooking, "menu.cancel_booking"),
        (MenuItem::GetLink, "menu.get_link"),
        (MenuItem::Info, "menu.info"),
    ];

    fn parse(text: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .find(|(_, key)| i18n::matches_any(key, text))
            .map(|(item, _)| *item)
    }
}

fn is_cancel(text: &str) -> bool {
    text.eq_ignore_ascii_case("/cancel")
        || i18n::matches_any("button.cancel", text)
        || ["отмена", "cancel"].contains(&text.to_lowercase().as_str())
}

fn validate_name(text: &str) -> Result<String, AppError> {
    let name = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if name.is_empty() || name.starts_with('/') || name.chars().count() > MAX_NAME_CHARS {
        return Err(AppError::InvalidName);
    }
    Ok(name)
}

/// Drives each client's flow and the administrator's actions.
pub struct ConversationController {
    booking: Arc<BookingService>,
    steps: Mutex<HashMap<i64, Step>>,
    default_language: String,
    tz: Tz,
    slot_hours: Vec<u32>,
    seed_days: u32,
}

impl ConversationController {
    pub fn new(booking: Arc<BookingService>, config: &BookingConfig) -> Self {
        Self {
            booking,
            steps: Mutex::new(HashMap::new()),
            default_language: config.default_language.clone(),
            tz: config.timezone,
            slot_hours: config.slot_hours.clone(),
            seed_days: config.seed_days,
        }
    }

    async fn take_step(&self, user_id: i64) -> Step {
        self.steps.lock().await.remove(&user_id).unwrap_or_default()
    }

    async fn set_step(&self, user_id: i64, step: Step) {
        let mut steps = self.steps.lock().await;
        if step == Step::Idle {
            steps.remove(&user_id);
        } else {
            steps.insert(user_id, step);
        }
    }

    #[cfg(test)]
    pub async fn step_of(&self, user_id: i64) -> Step {
        self.steps
            .lock()
            .await
            .get(&user_id)
            .cloned()
            .unwrap_or_default()
    }

    async fn reply(&self, user_id: i64, text: &str, keyboard: Keyboard) {
        send_best_effort(self.booking.messenger().as_ref(), user_id, text, keyboard).await;
    }

    async fn reply_key(&self, user_id: i64, lang: &str, key: &str, keyboard: Keyboard) {
        self.reply(user_id, &i18n::t(lang, key), keyboard).await;
    }

    /// Generic failure notice; the client always ends up at the main menu.
    async fn fail(&self, user_id: i64, lang: &str, e: &AppError) {
        tracing::error!("Operation for user {} failed: {}", user_id, e);
        self.set_step(user_id, Step::Idle).await;
        self.reply_key(user_id, lang, "common.error", notifications::main_menu(lang))
            .await;
    }

    pub async fn handle_text(&self, user: &ChatUser, text: &str) {
        self.handle_text_at(user, text, Utc::now()).await
    }

    pub async fn handle_text_at(&self, user: &ChatUser, text: &str, now: DateTime<Utc>) {
        let text = text.trim();
        let lang = i18n::resolve_language(user.language_code.as_deref(), &self.default_language);
        let lang = lang.as_str();
        tracing::debug!("Message from {}: '{}'", user.id, text);

        if text.is_empty() {
            self.reply_key(user.id, lang, "common.empty_message", notifications::main_menu(lang))
                .await;
            return;
        }

        if is_cancel(text) {
            self.set_step(user.id, Step::Idle).await;
            self.reply_key(user.id, lang, "common.cancelled", notifications::main_menu(lang))
                .await;
            return;
        }

        if user.id == self.booking.admin_id() && text.starts_with('/') {
            let mut parts = text.split_whitespace();
            let command = parts.next().unwrap_or_default();
            let arg = parts.next();
            match command {
                "/seed" => return self.seed_slots(arg, now).await,
                "/bookings" => return self.list_bookings(now).await,
                _ => {}
            }
        }

        if text == "/start" || text.eq_ignore_ascii_case("старт") {
            self.set_step(user.id, Step::Idle).await;
            self.reply_key(user.id, lang, "start.greeting", notifications::main_menu(lang))
                .await;
            return;
        }

        // Menu buttons win over any half-finished flow.
        if let Some(item) = MenuItem::parse(text) {
            self.set_step(user.id, Step::Idle).await;
            return self.handle_menu(user, item, lang, now).await;
        }

        match self.take_step(user.id).await {
            Step::Idle => {
                self.reply_key(user.id, lang, "common.unknown", notifications::main_menu(lang))
                    .await
            }
            Step::AwaitingName => self.on_name(user, text, lang, now).await,
            Step::AwaitingSlotChoice { full_name } => {
                self.on_slot_choice(user, full_name, text, lang, now).await
            }
            Step::AwaitingMeetTiming { label } => self.on_meet_timing(user, label, text, lang).await,
            Step::AwaitingEmail { label, timing } => {
                self.on_email(user, label, timing, text, lang).await
            }
            Step::AwaitingNewSlotChoice { from_label } => {
                self.on_new_slot_choice(user, from_label, text, lang, now).await
            }
        }
    }

    async fn handle_menu(&self, user: &ChatUser, item: MenuItem, lang: &str, now: DateTime<Utc>) {
        if item == MenuItem::Info {
            self.reply_key(user.id, lang, "info.text", notifications::main_menu(lang))
                .await;
            return;
        }
        if item == MenuItem::CancelBooking {
            return self.cancel_booking(user, lang, now).await;
        }

        let booking = match self.booking.store().find_booking_for_user(user.id, now).await {
            Ok(b) => b,
            Err(e) => return self.fail(user.id, lang, &e).await,
        };

        match item {
            MenuItem::Book => match booking {
                Some(existing) => {
                    let text = i18n::t_with(lang, "booking.already_booked", &[("slot", &existing.label)]);
                    self.reply(user.id, &text, notifications::main_menu(lang)).await;
                }
                None => {
                    self.set_step(user.id, Step::AwaitingName).await;
                    self.reply_key(user.id, lang, "booking.ask_name", notifications::cancel_only(lang))
                        .await;
                }
            },
            MenuItem::MyBooking => match booking {
                None => {
                    self.reply_key(user.id, lang, "my.none", notifications::main_menu(lang))
                        .await
                }
                Some(rec) => {
                    let status = i18n::t(lang, rec.state.display_key());
                    let mut text =
                        i18n::t_with(lang, "my.booking", &[("slot", &rec.label), ("status", &status)]);
                    if let Some(link) = rec.meeting.ready_link() {
                        text.push('\n');
                        text.push_str(&i18n::t_with(lang, "my.booking_link", &[("link", link)]));
                    }
                    self.reply(user.id, &text, notifications::main_menu(lang)).await;
                }
            },
            MenuItem::Reschedule => match booking {
                None => {
                    self.reply_key(user.id, lang, "reschedule.none", notifications::main_menu(lang))
                        .await
                }
                Some(rec) if !rec.state.is_confirmed() => {
                    self.reply_key(
                        user.id,
                        lang,
                        "reschedule.not_confirmed",
                        notifications::main_menu(lang),
                    )
                    .await
                }
                Some(rec) => {
                    let free = match self.booking.store().scan_free_slots(now).await {
                        Ok(free) => free,
                        Err(e) => return self.fail(user.id, lang, &e).await,
                    };
                    if free.is_empty() {
                        self.reply_key(user.id, lang, "reschedule.no_slots", notifications::main_menu(lang))
                            .await;
                        return;
                    }
                    let text = i18n::t_with(lang, "reschedule.choose", &[("slot", &rec.label)]);
                    self.set_step(
                        user.id,
                        Step::AwaitingNewSlotChoice {
                            from_label: rec.label,
                        },
                    )
                    .await;
                    self.reply(user.id, &text, notifications::slot_choice(&free, lang))
                        .await;
                }
            },
            MenuItem::GetLink => match booking {
                None => {
                    self.reply_key(user.id, lang, "link.none", notifications::main_menu(lang))
                        .await
                }
                Some(rec) if !rec.state.is_confirmed() => {
                    self.reply_key(
                        user.id,
                        lang,
                        "link.awaiting_approval",
                        notifications::main_menu(lang),
                    )
                    .await
                }
                Some(rec) => match rec.meeting.link {
                    MeetingLink::Ready(ref link) => {
                        let text = i18n::t_with(lang, "link.ready", &[("link", link)]);
                        self.reply(user.id, &text, notifications::main_menu(lang)).await;
                    }
                    MeetingLink::Pending => {
                        self.reply_key(user.id, lang, "link.pending", notifications::main_menu(lang))
                            .await
                    }
                    MeetingLink::None => self.ask_meet_timing(user.id, rec.label, lang).await,
                },
            },
            MenuItem::Info | MenuItem::CancelBooking => {}
        }
    }

    async fn ask_meet_timing(&self, user_id: i64, label: String, lang: &str) {
        let text = i18n::t_with(lang, "meeting.ask_timing", &[("slot", &label)]);
        self.set_step(user_id, Step::AwaitingMeetTiming { label }).await;
        self.reply(user_id, &text, notifications::meet_timing(lang)).await;
    }

    async fn cancel_booking(&self, user: &ChatUser, lang: &str, now: DateTime<Utc>) {
        match self.booking.cancel(user.id, now).await {
            Ok(erased) => {
                let text = i18n::t_with(lang, "cancel.done", &[("slot", &erased.label)]);
                self.reply(user.id, &text, notifications::main_menu(lang)).await;
            }
            Err(AppError::NoFutureBooking) => {
                self.reply_key(user.id, lang, "cancel.none", notifications::main_menu(lang))
                    .await
            }
            Err(AppError::InvalidTransition { label, .. }) => {
                let text = i18n::t_with(lang, "cancel.under_review", &[("slot", &label)]);
                self.reply(user.id, &text, notifications::main_menu(lang)).await;
            }
            Err(e) => self.fail(user.id, lang, &e).await,
        }
    }

    async fn on_name(&self, user: &ChatUser, text: &str, lang: &str, now: DateTime<Utc>) {
        let full_name = match validate_name(text) {
            Ok(name) => name,
            Err(_) => {
                self.set_step(user.id, Step::AwaitingName).await;
                self.reply_key(user.id, lang, "booking.invalid_name", notifications::cancel_only(lang))
                    .await;
                return;
            }
        };

        let free = match self.booking.store().scan_free_slots(now).await {
            Ok(free) => free,
            Err(e) => return self.fail(user.id, lang, &e).await,
        };
        if free.is_empty() {
            self.reply_key(user.id, lang, "booking.no_free_slots", notifications::main_menu(lang))
                .await;
            return;
        }

        let text = i18n::t_with(lang, "booking.choose_slot", &[("name", &full_name)]);
        self.set_step(user.id, Step::AwaitingSlotChoice { full_name }).await;
        self.reply(user.id, &text, notifications::slot_choice(&free, lang))
            .await;
    }

    /// Re-offer the current free slots, keeping the client at `step`.
    async fn reprompt_slots(&self, user_id: i64, step: Step, key: &str, lang: &str, now: DateTime<Utc>) {
        let free = match self.booking.store().scan_free_slots(now).await {
            Ok(free) => free,
            Err(e) => return self.fail(user_id, lang, &e).await,
        };
        if free.is_empty() {
            self.set_step(user_id, Step::Idle).await;
            self.reply_key(user_id, lang, "booking.no_free_slots", notifications::main_menu(lang))
                .await;
            return;
        }
        self.set_step(user_id, step).await;
        self.reply(user_id, &i18n::t(lang, key), notifications::slot_choice(&free, lang))
            .await;
    }

    async fn is_offered(&self, label: &str, now: DateTime<Utc>) -> Result<bool, AppError> {
        Ok(self
            .booking
            .store()
            .scan_free_slots(now)
            .await?
            .iter()
            .any(|l| l == label))
    }

    async fn on_slot_choice(
        &self,
        user: &ChatUser,
        full_name: String,
        text: &str,
        lang: &str,
        now: DateTime<Utc>,
    ) {
        let step = Step::AwaitingSlotChoice {
            full_name: full_name.clone(),
        };
        match self.is_offered(text, now).await {
            Ok(true) => {}
            Ok(false) => return self.reprompt_slots(user.id, step, "booking.slot_invalid", lang, now).await,
            Err(e) => return self.fail(user.id, lang, &e).await,
        }

        let client = Client {
            full_name,
            handle: user.handle(),
            user_id: user.id,
            transfer_count: 0,
        };
        match self.booking.request_booking(text, client, lang, now).await {
            Ok(record) => {
                let text = i18n::t_with(lang, "booking.requested", &[("slot", &record.label)]);
                self.reply(user.id, &text, notifications::main_menu(lang)).await;
            }
            Err(AppError::SlotAlreadyTaken(_)) => {
                self.reprompt_slots(user.id, step, "booking.slot_taken", lang, now)
                    .await
            }
            Err(AppError::AlreadyBooked(label)) => {
                let text = i18n::t_with(lang, "booking.already_booked", &[("slot", &label)]);
                self.reply(user.id, &text, notifications::main_menu(lang)).await;
            }
            Err(e) => self.fail(user.id, lang, &e).await,
        }
    }

    async fn on_meet_timing(&self, user: &ChatUser, label: String, text: &str, lang: &str) {
        let timing = if i18n::matches_any("button.timing_now", text) {
            MeetTiming::Immediate
        } else if i18n::matches_any("button.timing_before", text) {
            MeetTiming::BeforeMeeting
        } else {
            self.set_step(user.id, Step::AwaitingMeetTiming { label }).await;
            self.reply_key(user.id, lang, "meeting.timing_invalid", notifications::meet_timing(lang))
                .await;
            return;
        };

        self.set_step(user.id, Step::AwaitingEmail { label, timing }).await;
        self.reply_key(user.id, lang, "meeting.ask_email", notifications::cancel_only(lang))
            .await;
    }

    async fn on_email(&self, user: &ChatUser, label: String, timing: MeetTiming, text: &str, lang: &str) {
        if !is_valid_email(text) {
            self.set_step(user.id, Step::AwaitingEmail { label, timing }).await;
            self.reply_key(user.id, lang, "meeting.invalid_email", notifications::cancel_only(lang))
                .await;
            return;
        }

        match self.booking.arrange_meeting(&label, user.id, timing, text).await {
            Ok(MeetingOutcome::Ready(link)) => {
                let text = i18n::t_with(lang, "meeting.created", &[("slot", &label), ("link", &link)]);
                self.reply(user.id, &text, notifications::main_menu(lang)).await;
            }
            Ok(MeetingOutcome::Scheduled) => {
                let text = i18n::t_with(lang, "meeting.scheduled", &[("slot", &label)]);
                self.reply(user.id, &text, notifications::main_menu(lang)).await;
            }
            Err(AppError::InvalidTransition { .. }) | Err(AppError::SlotNotFound(_)) => {
                self.reply_key(user.id, lang, "link.none", notifications::main_menu(lang))
                    .await
            }
            Err(e) => {
                tracing::error!("Meeting arrangement for {} failed: {}", label, e);
                self.reply_key(user.id, lang, "meeting.failed", notifications::main_menu(lang))
                    .await;
                let admin_lang = self.booking.admin_language();
                let err = e.to_string();
                let notice = i18n::t_with(
                    admin_lang,
                    "admin.meeting_failed",
                    &[("slot", &label), ("error", &err)],
                );
                self.reply(self.booking.admin_id(), &notice, Keyboard::Keep).await;
            }
        }
    }

    async fn on_new_slot_choice(
        &self,
        user: &ChatUser,
        from_label: String,
        text: &str,
        lang: &str,
        now: DateTime<Utc>,
    ) {
        let step = Step::AwaitingNewSlotChoice {
            from_label: from_label.clone(),
        };
        match self.is_offered(text, now).await {
            Ok(true) => {}
            Ok(false) => return self.reprompt_slots(user.id, step, "booking.slot_invalid", lang, now).await,
            Err(e) => return self.fail(user.id, lang, &e).await,
        }

        match self.booking.reschedule(user.id, text, now).await {
            Ok(moved) => {
                tracing::info!("User {} moved from {} to {}", user.id, from_label, moved.label);
                let text = i18n::t_with(lang, "reschedule.done", &[("slot", &moved.label)]);
                self.reply(user.id, &text, Keyboard::Keep).await;
                self.ask_meet_timing(user.id, moved.label, lang).await;
            }
            Err(AppError::SlotAlreadyTaken(_)) => {
                self.reprompt_slots(user.id, step, "booking.slot_taken", lang, now)
                    .await
            }
            Err(AppError::NoFutureBooking) | Err(AppError::InvalidTransition { .. }) => {
                self.reply_key(user.id, lang, "reschedule.none", notifications::main_menu(lang))
                    .await
            }
            Err(e) => self.fail(user.id, lang, &e).await,
        }
    }

    // ========================================================================
    // Administrator surface
    // ========================================================================

    /// Apply an inline-button decision. Presses from anyone but the administrator are ignored.
    ///
    /// Returns `true` once the request is settled and its buttons may be dropped.
    /// After a store failure the decision buttons are sent again and `false` is returned.
    pub async fn handle_admin_action(&self, from_id: i64, data: &str) -> bool {
        if from_id != self.booking.admin_id() {
            tracing::warn!("Ignoring admin action from non-admin user {}", from_id);
            return false;
        }
        let Some(action) = AdminAction::parse(data) else {
            tracing::warn!("Unrecognized admin callback data '{}'", data);
            return true;
        };

        let lang = self.booking.admin_language().to_string();
        let lang = lang.as_str();
        let admin = self.booking.admin_id();

        let result = match action.decision {
            AdminDecision::Approve => self.booking.approve(&action.label).await,
            AdminDecision::Decline => self.booking.decline(&action.label).await,
        };

        match result {
            Ok(record) => {
                let key = match action.decision {
                    AdminDecision::Approve => "admin.approved",
                    AdminDecision::Decline => "admin.declined",
                };
                if action.decision == AdminDecision::Approve {
                    if let Some(ref client) = record.client {
                        self.set_step(
                            client.user_id,
                            Step::AwaitingMeetTiming {
                                label: record.label.clone(),
                            },
                        )
                        .await;
                    }
                }
                let text = i18n::t_with(lang, key, &[("slot", &record.label)]);
                self.reply(admin, &text, Keyboard::Keep).await;
                true
            }
            Err(AppError::InvalidTransition { label, .. }) => {
                let text = i18n::t_with(lang, "admin.already_handled", &[("slot", &label)]);
                self.reply(admin, &text, Keyboard::Keep).await;
                true
            }
            Err(AppError::SlotNotFound(label)) => {
                let text = i18n::t_with(lang, "admin.slot_missing", &[("slot", &label)]);
                self.reply(admin, &text, Keyboard::Keep).await;
                true
            }
            Err(e) => {
                tracing::error!("Admin action {:?} failed: {}", action, e);
                // The request is still pending; hand the decision back.
                self.reply_key(
                    admin,
                    lang,
                    "common.error",
                    notifications::admin_decision(&action.label, lang),
                )
                .await;
                false
            }
        }
    }

    async fn seed_slots(&self, arg: Option<&str>, now: DateTime<Utc>) {
        let admin = self.booking.admin_id();
        let lang = self.booking.admin_language();

        let days = match arg {
            None => self.seed_days,
            Some(a) => match a.parse::<u32>() {
                Ok(d) if d > 0 => d,
                _ => {
                    self.reply_key(admin, lang, "admin.seed_usage", Keyboard::Keep).await;
                    return;
                }
            },
        };

        let tomorrow = now.with_timezone(&self.tz).date_naive() + Duration::days(1);
        let labels = business_day_labels(tomorrow, days, &self.slot_hours);

        match self.booking.store().append_slots(&labels).await {
            Ok(added) => {
                let count = added.to_string();
                let text = i18n::t_with(lang, "admin.seeded", &[("count", &count)]);
                self.reply(admin, &text, Keyboard::Keep).await;
            }
            Err(e) => {
                tracing::error!("Seeding slots failed: {}", e);
                self.reply_key(admin, lang, "common.error", Keyboard::Keep).await;
            }
        }
    }

    async fn list_bookings(&self, now: DateTime<Utc>) {
        let admin = self.booking.admin_id();
        let lang = self.booking.admin_language();

        let mut upcoming: Vec<SlotRecord> = match self.booking.store().list_bookings().await {
            Ok(all) => all.into_iter().filter(|r| r.start > now).collect(),
            Err(e) => {
                tracing::error!("Listing bookings failed: {}", e);
                self.reply_key(admin, lang, "common.error", Keyboard::Keep).await;
                return;
            }
        };
        if upcoming.is_empty() {
            self.reply_key(admin, lang, "admin.no_bookings", Keyboard::Keep).await;
            return;
        }
        upcoming.sort_by_key(|r| r.start);

        let mut text = i18n::t(lang, "admin.bookings_header");
        for rec in &upcoming {
            let status = i18n::t(lang, rec.state.display_key());
            let (name, handle) = rec
                .client
                .as_ref()
                .map(|c| (c.full_name.as_str(), display_handle(&c.handle)))
                .unwrap_or_default();
            text.push('\n');
            text.push_str(&i18n::t_with(
                lang,
                "admin.bookings_line",
                &[
                    ("slot", &rec.label),
                    ("status", &status),
                    ("name", name),
                    ("handle", handle),
                ],
            ));
        }
        self.reply(admin, &text, Keyboard::Keep).await;
    }
}
