/*
Display strings for the bot.

This module provides:
- An embedded translations store for RU/EN (compile-time embedded JSON).
- `tr` to look up a message by key with optional `{name}` parameters.
- `matches_any` to recognize a menu button in whichever language the client sees.

Usage:
    use crate::i18n;
    let msg = i18n::tr(Some("en"), "booking.requested", Some(&[("slot", "10.10.2030, 10:00")]));

Notes:
- Placeholders use single-brace format: `{name}`.
- A key missing for the requested language falls back to DEFAULT_LANG, then to the key itself.
*/

use std::collections::HashMap;
use std::sync::OnceLock;

pub const DEFAULT_LANG: &str = "ru";

static TRANSLATIONS: OnceLock<HashMap<String, HashMap<String, String>>> = OnceLock::new();

const RU_JSON: &str = r#"
{
  "menu.book": "📅 Записаться",
  "menu.my_booking": "📖 Моя запись",
  "menu.reschedule": "🔁 Перенос",
  "menu.cancel_booking": "❌ Отменить запись",
  "menu.get_link": "📎 Получить ссылку",
  "menu.info": "ℹ️ Инфо",
  "button.cancel": "Отмена",
  "button.approve": "✅ Подтвердить",
  "button.decline": "❌ Отклонить",
  "button.timing_now": "🔗 Создать ссылку сейчас",
  "button.timing_before": "⏰ За 15 минут до встречи",

  "start.greeting": "👋 Привет! Я бот для записи на консультацию.\nВыберите действие:",
  "info.text": "ℹ️ Консультация по легализации в Португалии 🇵🇹 и Испании 🇪🇸\n\nСтоимость: 120 € (возможен НДС 23%)\nДлительность: 1 час\n\nЧтобы записаться — выберите 📅 Записаться.",
  "common.empty_message": "⚠️ Сообщение пустое.",
  "common.unknown": "Не понял команду — попробуйте ещё раз.",
  "common.cancelled": "❌ Действие отменено.",
  "common.error": "⚠️ Не удалось выполнить действие. Попробуйте чуть позже.",

  "booking.ask_name": "✏️ Вы выбрали запись на консультацию. Введите ваше имя и фамилию:",
  "booking.invalid_name": "Пожалуйста, введите имя и фамилию текстом.",
  "booking.no_free_slots": "😔 Свободных слотов пока нет. Попробуйте позже.",
  "booking.choose_slot": "✅ Имя получено: {name}\nВыберите удобное время:",
  "booking.slot_invalid": "Пожалуйста, выберите время кнопкой из списка.",
  "booking.slot_taken": "⏳ Этот слот только что заняли. Выберите другое время:",
  "booking.already_booked": "ℹ️ У вас уже есть запись на {slot}. Сначала отмените её или перенесите.",
  "booking.requested": "📨 Заявка на {slot} отправлена. Мы сообщим, когда администратор её подтвердит.",

  "admin.new_request": "🆕 Новая заявка\n\n🗓 {slot}\n👤 {name}\n✉️ {handle}\n🆔 {user_id}",
  "admin.approved": "✅ Запись на {slot} подтверждена.",
  "admin.declined": "❌ Заявка на {slot} отклонена.",
  "admin.already_handled": "ℹ️ Заявка на {slot} уже обработана.",
  "admin.slot_missing": "⚠️ Слот {slot} не найден в таблице.",
  "admin.client_cancelled": "🚫 Клиент отменил запись\n\n🗓 {slot}\n👤 {name}\n✉️ {handle}",
  "admin.client_rescheduled": "🔁 Перенос записи\n\n👤 {name}\n✉️ {handle}\n🗓 {from} → {to}\nПереносов: {count}",
  "admin.meeting_failed": "⚠️ Не удалось создать встречу для {slot}: {error}",
  "admin.seeded": "🗓 Добавлено свободных слотов: {count}",
  "admin.seed_usage": "Использование: /seed [дней]",
  "admin.bookings_header": "📋 Предстоящие записи:",
  "admin.bookings_line": "🗓 {slot} — {status} — {name} {handle}",
  "admin.no_bookings": "Предстоящих записей нет.",

  "client.approved": "🎉 Ваша запись на {slot} подтверждена!\nКогда создать ссылку на Google Meet?",
  "client.declined": "😔 К сожалению, заявка на {slot} отклонена. Вы можете выбрать другое время.",

  "meeting.ask_timing": "Когда создать ссылку на Google Meet для {slot}?",
  "meeting.timing_invalid": "Пожалуйста, выберите вариант кнопкой.",
  "meeting.ask_email": "📧 Введите email для приглашения на встречу:",
  "meeting.invalid_email": "Похоже, это не email. Попробуйте ещё раз, например name@example.com",
  "meeting.created": "🔗 Ссылка на встречу {slot}: {link}",
  "meeting.scheduled": "👍 Ссылка будет создана автоматически за 15 минут до встречи {slot}.",
  "meeting.auto_created": "⏰ Встреча {slot} скоро начнётся!\n🔗 Ссылка: {link}",
  "meeting.failed": "⚠️ Не удалось создать ссылку на встречу. Попробуйте «Получить ссылку» чуть позже.",

  "my.booking": "📋 Ваша запись:\n\n🗓 {slot}\nСтатус: {status}",
  "my.booking_link": "🔗 Ссылка: {link}",
  "my.none": "ℹ️ У вас нет активных записей.",

  "link.ready": "🔗 Ваша ссылка: {link}",
  "link.pending": "⏰ Ссылка будет создана автоматически за 15 минут до встречи.",
  "link.awaiting_approval": "🔗 Ссылка пока не создана. Она появится после подтверждения.",
  "link.none": "❌ У вас нет активной записи.",

  "cancel.done": "✅ Запись на {slot} отменена.",
  "cancel.under_review": "⏳ Заявка на {slot} ещё на рассмотрении, отменить её пока нельзя.",
  "cancel.none": "ℹ️ У вас нет активной записи для отмены.",

  "reschedule.choose": "🔁 Текущая запись: {slot}\nВыберите новое время:",
  "reschedule.not_confirmed": "⏳ Перенести можно только подтверждённую запись.",
  "reschedule.none": "ℹ️ У вас нет записи для переноса.",
  "reschedule.no_slots": "😔 Свободных слотов для переноса нет.",
  "reschedule.done": "✅ Запись перенесена на {slot}.",

  "reminder.text": "🔔 Напоминание: консультация {slot} уже завтра.",
  "reminder.with_link": "🔔 Напоминание: консультация {slot} уже завтра.\n🔗 Ссылка: {link}",

  "status.free": "Свободно",
  "status.pending": "Ожидает подтверждения",
  "status.confirmed": "Подтверждено",
  "status.rescheduled": "Подтверждено (перенос)"
}
"#;

const EN_JSON: &str = r#"
{
  "menu.book": "📅 Book",
  "menu.my_booking": "📖 My booking",
  "menu.reschedule": "🔁 Reschedule",
  "menu.cancel_booking": "❌ Cancel booking",
  "menu.get_link": "📎 Get link",
  "menu.info": "ℹ️ Info",
  "button.cancel": "Cancel",
  "button.approve": "✅ Approve",
  "button.decline": "❌ Decline",
  "button.timing_now": "🔗 Create link now",
  "button.timing_before": "⏰ 15 minutes before",

  "start.greeting": "👋 Hi! I can book you a consultation.\nChoose an action:",
  "info.text": "ℹ️ Consultation on legalization in Portugal 🇵🇹 and Spain 🇪🇸\n\nPrice: 120 € (23% VAT may apply)\nDuration: 1 hour\n\nTo book, choose 📅 Book.",
  "common.empty_message": "⚠️ The message is empty.",
  "common.unknown": "I did not understand that, please try again.",
  "common.cancelled": "❌ Cancelled.",
  "common.error": "⚠️ Something went wrong. Please try again a bit later.",

  "booking.ask_name": "✏️ Booking a consultation. Please enter your first and last name:",
  "booking.invalid_name": "Please type your first and last name.",
  "booking.no_free_slots": "😔 There are no free slots right now. Please try later.",
  "booking.choose_slot": "✅ Thanks, {name}\nPick a time:",
  "booking.slot_invalid": "Please pick a time using the buttons.",
  "booking.slot_taken": "⏳ That slot was just taken. Please pick another time:",
  "booking.already_booked": "ℹ️ You already have a booking at {slot}. Cancel or reschedule it first.",
  "booking.requested": "📨 Your request for {slot} has been sent. We will let you know once it is approved.",

  "admin.new_request": "🆕 New request\n\n🗓 {slot}\n👤 {name}\n✉️ {handle}\n🆔 {user_id}",
  "admin.approved": "✅ Booking for {slot} approved.",
  "admin.declined": "❌ Request for {slot} declined.",
  "admin.already_handled": "ℹ️ The request for {slot} has already been handled.",
  "admin.slot_missing": "⚠️ Slot {slot} is not in the table.",
  "admin.client_cancelled": "🚫 Client cancelled\n\n🗓 {slot}\n👤 {name}\n✉️ {handle}",
  "admin.client_rescheduled": "🔁 Booking moved\n\n👤 {name}\n✉️ {handle}\n🗓 {from} → {to}\nTransfers: {count}",
  "admin.meeting_failed": "⚠️ Could not create the meeting for {slot}: {error}",
  "admin.seeded": "🗓 Free slots added: {count}",
  "admin.seed_usage": "Usage: /seed [days]",
  "admin.bookings_header": "📋 Upcoming bookings:",
  "admin.bookings_line": "🗓 {slot} — {status} — {name} {handle}",
  "admin.no_bookings": "No upcoming bookings.",

  "client.approved": "🎉 Your booking for {slot} is confirmed!\nWhen should the Google Meet link be created?",
  "client.declined": "😔 Unfortunately your request for {slot} was declined. You can pick another time.",

  "meeting.ask_timing": "When should the Google Meet link for {slot} be created?",
  "meeting.timing_invalid": "Please choose an option using the buttons.",
  "meeting.ask_email": "📧 Enter the email the meeting invitation should go to:",
  "meeting.invalid_email": "That does not look like an email. Try again, e.g. name@example.com",
  "meeting.created": "🔗 Meeting link for {slot}: {link}",
  "meeting.scheduled": "👍 The link will be created automatically 15 minutes before {slot}.",
  "meeting.auto_created": "⏰ Your meeting at {slot} starts soon!\n🔗 Link: {link}",
  "meeting.failed": "⚠️ Could not create the meeting link. Try «Get link» a bit later.",

  "my.booking": "📋 Your booking:\n\n🗓 {slot}\nStatus: {status}",
  "my.booking_link": "🔗 Link: {link}",
  "my.none": "ℹ️ You have no active bookings.",

  "link.ready": "🔗 Your link: {link}",
  "link.pending": "⏰ The link will be created automatically 15 minutes before the meeting.",
  "link.awaiting_approval": "🔗 No link yet. It will appear once the booking is approved.",
  "link.none": "❌ You have no active booking.",

  "cancel.done": "✅ Your booking for {slot} is cancelled.",
  "cancel.under_review": "⏳ Your request for {slot} is still under review and cannot be cancelled yet.",
  "cancel.none": "ℹ️ You have no active booking to cancel.",

  "reschedule.choose": "🔁 Current booking: {slot}\nPick a new time:",
  "reschedule.not_confirmed": "⏳ Only a confirmed booking can be rescheduled.",
  "reschedule.none": "ℹ️ You have no booking to reschedule.",
  "reschedule.no_slots": "😔 There are no free slots to move to.",
  "reschedule.done": "✅ Your booking was moved to {slot}.",

  "reminder.text": "🔔 Reminder: your consultation is tomorrow at {slot}.",
  "reminder.with_link": "🔔 Reminder: your consultation is tomorrow at {slot}.\n🔗 Link: {link}",

  "status.free": "Free",
  "status.pending": "Awaiting approval",
  "status.confirmed": "Confirmed",
  "status.rescheduled": "Confirmed (rescheduled)"
}
"#;

/// Initialize translations map (lazy).
fn build_translations() -> HashMap<String, HashMap<String, String>> {
    let mut out: HashMap<String, HashMap<String, String>> = HashMap::new();

    let ru_map: HashMap<String, String> = serde_json::from_str(RU_JSON).unwrap_or_else(|e| {
        panic!("failed to parse RU_JSON in i18n module: {}", e);
    });
    out.insert("ru".to_string(), ru_map);

    let en_map: HashMap<String, String> = serde_json::from_str(EN_JSON).unwrap_or_else(|e| {
        panic!("failed to parse EN_JSON in i18n module: {}", e);
    });
    out.insert("en".to_string(), en_map);

    out
}

fn translations() -> &'static HashMap<String, HashMap<String, String>> {
    TRANSLATIONS.get_or_init(build_translations)
}

/// Normalize a language tag into a short, lowercase code (e.g. "en-US" -> "en").
pub fn normalize_language(lang: &str) -> String {
    lang.split('-').next().unwrap_or(lang).to_lowercase()
}

pub fn is_supported_language(lang: &str) -> bool {
    translations().contains_key(lang)
}

/// Pick the display language for a Telegram `language_code`, falling back to `default`.
pub fn resolve_language(code: Option<&str>, default: &str) -> String {
    code.map(normalize_language)
        .filter(|l| is_supported_language(l))
        .unwrap_or_else(|| default.to_string())
}

/// Translate a key using an explicit language (or default if None).
///
/// Returns the translated and parameter-substituted string. If no translation is found,
/// returns the default language value or the key itself.
pub fn tr(lang: Option<&str>, key: &str, params: Option<&[(&str, &str)]>) -> String {
    let map = translations();

    let desired = lang.unwrap_or(DEFAULT_LANG);

    let val = map
        .get(desired)
        .and_then(|m| m.get(key))
        .cloned()
        .or_else(|| map.get(DEFAULT_LANG).and_then(|m| m.get(key)).cloned())
        .unwrap_or_else(|| key.to_string());

    if let Some(params) = params {
        let mut s = val;
        for (k, v) in params {
            s = s.replace(&format!("{{{}}}", k), v);
        }
        s
    } else {
        val
    }
}

/// Translate a key without parameters.
pub fn t(lang: &str, key: &str) -> String {
    tr(Some(lang), key, None)
}

/// Translate a key with parameters.
pub fn t_with(lang: &str, key: &str, params: &[(&str, &str)]) -> String {
    tr(Some(lang), key, Some(params))
}

/// True when `text` is the translation of `key` in any supported language.
///
/// Menu buttons must keep working when a client's Telegram language changes
/// between the keyboard being sent and the button being pressed.
pub fn matches_any(key: &str, text: &str) -> bool {
    let text = text.trim();
    translations()
        .values()
        .filter_map(|m| m.get(key))
        .any(|v| v == text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tr_basic() {
        let s = tr(Some("ru"), "menu.book", None);
        assert!(s.contains("Записаться"));
    }

    #[test]
    fn test_t_with_params() {
        let s = t_with("en", "booking.requested", &[("slot", "10.10.2030, 10:00")]);
        assert!(s.contains("10.10.2030, 10:00"));
        assert!(!s.contains("{slot}"));
    }

    #[test]
    fn test_fallback_to_default() {
        let s = tr(Some("fr"), "button.cancel", None);
        assert_eq!(s, "Отмена");
    }

    #[test]
    fn missing_key_returns_key() {
        let k = "non.existent.key";
        assert_eq!(t("en", k), k.to_string());
    }

    #[test]
    fn every_key_exists_in_both_languages() {
        let map = translations();
        let ru = &map["ru"];
        let en = &map["en"];
        for key in ru.keys() {
            assert!(en.contains_key(key), "missing en translation for {}", key);
        }
        for key in en.keys() {
            assert!(ru.contains_key(key), "missing ru translation for {}", key);
        }
    }

    #[test]
    fn menu_labels_are_recognized_in_every_language() {
        assert!(matches_any("menu.book", "📅 Записаться"));
        assert!(matches_any("menu.book", "📅 Book"));
        assert!(matches_any("button.cancel", " Cancel "));
        assert!(!matches_any("menu.book", "Book"));
    }

    #[test]
    fn resolve_language_normalizes_and_falls_back() {
        assert_eq!(resolve_language(Some("en-GB"), "ru"), "en");
        assert_eq!(resolve_language(Some("pt-PT"), "ru"), "ru");
        assert_eq!(resolve_language(None, "en"), "en");
    }

    #[test]
    fn test_normalize_language() {
        assert_eq!(normalize_language("en-US"), "en");
        assert_eq!(normalize_language("ru"), "ru");
        assert_eq!(normalize_language("EN-us"), "en");
    }
}
