pub mod booking;
pub mod calendar;
pub mod conversation;
pub mod google_auth;
pub mod init;
pub mod notifications;
pub mod scheduler;
pub mod sheets;
pub mod slot_seeding;
pub mod telegram;
