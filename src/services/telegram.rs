use std::sync::Arc;

use async_trait::async_trait;
use teloxide::dispatching::DefaultKey;
use teloxide::prelude::*;
use teloxide::types::{
    ChatId, InlineKeyboardButton, InlineKeyboardMarkup, KeyboardButton, KeyboardMarkup, ReplyMarkup,
    User,
};
use teloxide::RequestError;

use crate::error::{AppError, AppResult};
use crate::services::conversation::{ChatUser, ConversationController};
use crate::services::notifications::{Keyboard, Messenger};

#[derive(Clone)]
pub struct TelegramService {
    bot: Bot,
}

impl TelegramService {
    pub async fn new(token: String) -> AppResult<Self> {
        let bot = Bot::new(token);

        // Verify the bot token by getting bot info
        match bot.get_me().await {
            Ok(me) => {
                tracing::info!("Telegram bot initialized: @{}", me.username());
                Ok(Self { bot })
            }
            Err(e) => {
                tracing::error!("Failed to initialize Telegram bot: {}", e);
                Err(AppError::Telegram(format!(
                    "Failed to initialize bot: {}",
                    e
                )))
            }
        }
    }

    pub fn get_bot(&self) -> &Bot {
        &self.bot
    }
}

fn reply_markup(keyboard: Keyboard) -> Option<ReplyMarkup> {
    match keyboard {
        Keyboard::Keep => None,
        Keyboard::Reply(rows) => Some(ReplyMarkup::Keyboard(
            KeyboardMarkup::new(
                rows.into_iter()
                    .map(|row| row.into_iter().map(KeyboardButton::new).collect::<Vec<_>>()),
            )
            .resize_keyboard(true),
        )),
        Keyboard::Inline(rows) => Some(ReplyMarkup::InlineKeyboard(InlineKeyboardMarkup::new(
            rows.into_iter().map(|row| {
                row.into_iter()
                    .map(|b| InlineKeyboardButton::callback(b.text, b.data))
                    .collect::<Vec<_>>()
            }),
        ))),
    }
}

#[async_trait]
impl Messenger for TelegramService {
    async fn send_message(&self, user_id: i64, text: &str, keyboard: Keyboard) -> AppResult<()> {
        let mut request = self
            .bot
            .send_message(ChatId(user_id), text)
            .disable_web_page_preview(true);
        if let Some(markup) = reply_markup(keyboard) {
            request = request.reply_markup(markup);
        }

        match request.await {
            Ok(sent_message) => {
                tracing::debug!(
                    "Telegram message sent to {}: message_id={}",
                    user_id,
                    sent_message.id
                );
                Ok(())
            }
            Err(e) => Err(AppError::Telegram(format!("Failed to send message: {}", e))),
        }
    }
}

// ============================================================================
// Inbound updates
// ============================================================================

fn chat_user(user: &User) -> ChatUser {
    ChatUser {
        id: user.id.0 as i64,
        username: user.username.clone(),
        language_code: user.language_code.clone(),
    }
}

async fn on_message(msg: Message, controller: Arc<ConversationController>) -> ResponseResult<()> {
    let Some(user) = msg.from() else {
        return Ok(());
    };
    // Non-text messages arrive as empty input.
    let text = msg.text().unwrap_or_default();
    controller.handle_text(&chat_user(user), text).await;
    Ok(())
}

async fn on_callback(
    bot: Bot,
    q: CallbackQuery,
    controller: Arc<ConversationController>,
) -> ResponseResult<()> {
    bot.answer_callback_query(q.id.clone()).await?;

    let Some(ref data) = q.data else {
        return Ok(());
    };
    if !controller.handle_admin_action(q.from.id.0 as i64, data).await {
        return Ok(());
    }

    // Drop the buttons so a settled request card cannot be pressed again.
    if let Some(ref message) = q.message {
        if let Err(e) = bot.edit_message_reply_markup(message.chat.id, message.id).await {
            tracing::debug!("Could not clear inline keyboard: {}", e);
        }
    }
    Ok(())
}

/// Long-polling dispatcher routing text to the controller and button presses to the admin handler.
pub fn build_dispatcher(
    bot: Bot,
    controller: Arc<ConversationController>,
) -> Dispatcher<Bot, RequestError, DefaultKey> {
    let handler = dptree::entry()
        .branch(Update::filter_message().endpoint(on_message))
        .branch(Update::filter_callback_query().endpoint(on_callback));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![controller])
        .default_handler(|upd| async move {
            tracing::debug!("Unhandled update: {:?}", upd.kind);
        })
        .error_handler(LoggingErrorHandler::with_custom_text(
            "An error has occurred in the dispatcher",
        ))
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::notifications::InlineButton;

    #[test]
    fn keep_sends_no_markup() {
        assert!(reply_markup(Keyboard::Keep).is_none());
    }

    #[test]
    fn reply_rows_are_preserved() {
        let markup = reply_markup(Keyboard::Reply(vec![
            vec!["a".to_string(), "b".to_string()],
            vec!["c".to_string()],
        ]));
        match markup {
            Some(ReplyMarkup::Keyboard(k)) => {
                assert_eq!(k.keyboard.len(), 2);
                assert_eq!(k.keyboard[0].len(), 2);
                assert_eq!(k.keyboard[1][0].text, "c");
            }
            other => panic!("unexpected markup: {:?}", other),
        }
    }

    #[test]
    fn inline_buttons_carry_callback_data() {
        let markup = reply_markup(Keyboard::Inline(vec![vec![InlineButton {
            text: "Approve".to_string(),
            data: "approve|10.10.2030, 10:00".to_string(),
        }]]));
        match markup {
            Some(ReplyMarkup::InlineKeyboard(k)) => {
                assert_eq!(k.inline_keyboard[0][0].text, "Approve");
            }
            other => panic!("unexpected markup: {:?}", other),
        }
    }
}
