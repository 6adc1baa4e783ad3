use async_trait::async_trait;

use crate::error::AppResult;
use crate::i18n;

/// Keyboard attached to an outgoing message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Keyboard {
    /// Leave whatever keyboard the client currently sees.
    Keep,
    /// Reply keyboard; each inner vector is one row of button labels.
    Reply(Vec<Vec<String>>),
    /// Inline buttons carrying callback data.
    Inline(Vec<Vec<InlineButton>>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineButton {
    pub text: String,
    pub data: String,
}

/// Outbound chat transport.
#[async_trait]
pub trait Messenger: Send + Sync + 'static {
    async fn send_message(&self, user_id: i64, text: &str, keyboard: Keyboard) -> AppResult<()>;
}

/// Send a message whose delivery must not undo an already applied transition.
pub async fn send_best_effort(messenger: &dyn Messenger, user_id: i64, text: &str, keyboard: Keyboard) {
    if let Err(e) = messenger.send_message(user_id, text, keyboard).await {
        tracing::warn!("Failed to deliver message to {}: {}", user_id, e);
    }
}

// ============================================================================
// Administrator callback actions
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminDecision {
    Approve,
    Decline,
}

impl AdminDecision {
    fn as_str(&self) -> &'static str {
        match self {
            AdminDecision::Approve => "approve",
            AdminDecision::Decline => "decline",
        }
    }
}

/// Inline-button payload `approve|<label>` / `decline|<label>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminAction {
    pub decision: AdminDecision,
    pub label: String,
}

impl AdminAction {
    pub fn parse(data: &str) -> Option<Self> {
        let (kind, label) = data.split_once('|')?;
        let decision = match kind {
            "approve" => AdminDecision::Approve,
            "decline" => AdminDecision::Decline,
            _ => return None,
        };
        let label = label.trim();
        if label.is_empty() {
            return None;
        }
        Some(AdminAction {
            decision,
            label: label.to_string(),
        })
    }

    pub fn callback_data(&self) -> String {
        format!("{}|{}", self.decision.as_str(), self.label)
    }
}

// ============================================================================
// Keyboards
// ============================================================================

pub fn main_menu(lang: &str) -> Keyboard {
    let t = |key: &str| i18n::t(lang, key);
    Keyboard::Reply(vec![
        vec![t("menu.book"), t("menu.my_booking")],
        vec![t("menu.reschedule"), t("menu.cancel_booking")],
        vec![t("menu.get_link"), t("menu.info")],
    ])
}

pub fn cancel_only(lang: &str) -> Keyboard {
    Keyboard::Reply(vec![vec![i18n::t(lang, "button.cancel")]])
}

/// Slot labels two per row, followed by a cancel row.
pub fn slot_choice(labels: &[String], lang: &str) -> Keyboard {
    let mut rows: Vec<Vec<String>> = labels.chunks(2).map(|c| c.to_vec()).collect();
    rows.push(vec![i18n::t(lang, "button.cancel")]);
    Keyboard::Reply(rows)
}

pub fn meet_timing(lang: &str) -> Keyboard {
    Keyboard::Reply(vec![
        vec![i18n::t(lang, "button.timing_now")],
        vec![i18n::t(lang, "button.timing_before")],
        vec![i18n::t(lang, "button.cancel")],
    ])
}

pub fn admin_decision(label: &str, lang: &str) -> Keyboard {
    let button = |decision: AdminDecision, key: &str| InlineButton {
        text: i18n::t(lang, key),
        data: AdminAction {
            decision,
            label: label.to_string(),
        }
        .callback_data(),
    };
    Keyboard::Inline(vec![vec![
        button(AdminDecision::Approve, "button.approve"),
        button(AdminDecision::Decline, "button.decline"),
    ]])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_action_parses_both_decisions() {
        assert_eq!(
            AdminAction::parse("approve|10.10.2030, 10:00"),
            Some(AdminAction {
                decision: AdminDecision::Approve,
                label: "10.10.2030, 10:00".to_string()
            })
        );
        assert_eq!(
            AdminAction::parse("decline|10.10.2030, 10:00").map(|a| a.decision),
            Some(AdminDecision::Decline)
        );
    }

    #[test]
    fn admin_action_rejects_unknown_payloads() {
        assert_eq!(AdminAction::parse("approve"), None);
        assert_eq!(AdminAction::parse("approve|"), None);
        assert_eq!(AdminAction::parse("delete|10.10.2030, 10:00"), None);
    }

    #[test]
    fn callback_data_round_trips_through_parse() {
        let action = AdminAction {
            decision: AdminDecision::Decline,
            label: "01.02.2031, 15:00".to_string(),
        };
        assert_eq!(AdminAction::parse(&action.callback_data()), Some(action));
    }

    #[test]
    fn slot_keyboard_ends_with_cancel() {
        let labels = vec![
            "10.10.2030, 10:00".to_string(),
            "10.10.2030, 11:00".to_string(),
            "10.10.2030, 12:00".to_string(),
        ];
        let Keyboard::Reply(rows) = slot_choice(&labels, "en") else {
            panic!("expected reply keyboard");
        };
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].len(), 2);
        assert_eq!(rows[2], vec!["Cancel".to_string()]);
    }

    #[test]
    fn admin_keyboard_carries_label_in_callback() {
        let Keyboard::Inline(rows) = admin_decision("10.10.2030, 10:00", "ru") else {
            panic!("expected inline keyboard");
        };
        assert_eq!(rows[0][0].data, "approve|10.10.2030, 10:00");
        assert_eq!(rows[0][1].data, "decline|10.10.2030, 10:00");
    }
}
