use std::env;

use chrono_tz::Tz;

use crate::i18n;

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub telegram: TelegramConfig,
    pub store: StoreConfig,
    pub google: GoogleConfig,
    pub booking: BookingConfig,
    pub scheduler: SchedulerConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub bot_token: String,
    /// Telegram user id of the administrator who approves requests.
    pub admin_id: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Sheets,
    Sqlite,
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub spreadsheet_id: Option<String>,
    pub worksheet: String,
    pub database_url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone)]
pub struct GoogleConfig {
    /// Base64-encoded service-account JSON used for the spreadsheet.
    pub sheets_credentials: Option<String>,
    /// Base64-encoded service-account JSON used for the calendar.
    pub calendar_credentials: String,
    pub calendar_id: String,
    /// Workspace user the calendar service account acts as (domain-wide delegation).
    pub impersonate_subject: Option<String>,
}

#[derive(Debug, Clone)]
pub struct BookingConfig {
    /// Zone every slot label is interpreted in.
    pub timezone: Tz,
    /// Local hours `/seed` creates slots at.
    pub slot_hours: Vec<u32>,
    pub seed_days: u32,
    pub default_language: String,
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub enabled: bool,
    pub poll_interval_seconds: u64,
    /// Upper bound for one pass; keeps a hung collaborator from stalling the loop.
    pub pass_timeout_seconds: u64,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let backend = match env::var("STORE_BACKEND")
            .unwrap_or_else(|_| "sheets".to_string())
            .to_lowercase()
            .as_str()
        {
            "sheets" => StoreBackend::Sheets,
            "sqlite" => StoreBackend::Sqlite,
            _ => return Err(ConfigError::InvalidValue("STORE_BACKEND".to_string())),
        };

        let sheets_credentials = env::var("GOOGLE_SHEETS_CREDS").ok();
        let spreadsheet_id = env::var("SPREADSHEET_ID").ok();
        if backend == StoreBackend::Sheets {
            if spreadsheet_id.is_none() {
                return Err(ConfigError::MissingEnv("SPREADSHEET_ID".to_string()));
            }
            if sheets_credentials.is_none() {
                return Err(ConfigError::MissingEnv("GOOGLE_SHEETS_CREDS".to_string()));
            }
        }

        // One service account may serve both APIs.
        let calendar_credentials = env::var("GOOGLE_CALENDAR_CREDS")
            .ok()
            .or_else(|| sheets_credentials.clone())
            .ok_or_else(|| ConfigError::MissingEnv("GOOGLE_CALENDAR_CREDS".to_string()))?;

        let default_language = env::var("DEFAULT_LANGUAGE")
            .map(|l| i18n::normalize_language(&l))
            .unwrap_or_else(|_| i18n::DEFAULT_LANG.to_string());
        if !i18n::is_supported_language(&default_language) {
            return Err(ConfigError::InvalidValue("DEFAULT_LANGUAGE".to_string()));
        }

        Ok(Config {
            server: ServerConfig {
                host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: env::var("PORT")
                    .unwrap_or_else(|_| "10000".to_string())
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue("PORT".to_string()))?,
            },
            telegram: TelegramConfig {
                bot_token: env::var("TELEGRAM_BOT_TOKEN")
                    .or_else(|_| env::var("TOKEN"))
                    .map_err(|_| ConfigError::MissingEnv("TELEGRAM_BOT_TOKEN".to_string()))?,
                admin_id: env::var("ADMIN_ID")
                    .map_err(|_| ConfigError::MissingEnv("ADMIN_ID".to_string()))?
                    .trim()
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue("ADMIN_ID".to_string()))?,
            },
            store: StoreConfig {
                backend,
                spreadsheet_id,
                worksheet: env::var("WORKSHEET_NAME").unwrap_or_else(|_| "График".to_string()),
                database_url: env::var("DATABASE_URL")
                    .unwrap_or_else(|_| "sqlite://data/slots.db".to_string()),
                max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                    .unwrap_or_else(|_| "5".to_string())
                    .parse()
                    .unwrap_or(5),
            },
            google: GoogleConfig {
                sheets_credentials,
                calendar_credentials,
                calendar_id: env::var("GOOGLE_CALENDAR_ID").unwrap_or_else(|_| "primary".to_string()),
                impersonate_subject: env::var("GOOGLE_IMPERSONATE_SUBJECT").ok(),
            },
            booking: BookingConfig {
                timezone: env::var("BOOKING_TIMEZONE")
                    .unwrap_or_else(|_| "Europe/Lisbon".to_string())
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue("BOOKING_TIMEZONE".to_string()))?,
                slot_hours: parse_slot_hours(
                    &env::var("SLOT_HOURS").unwrap_or_else(|_| "10,11,12,14,15,16".to_string()),
                )
                .ok_or_else(|| ConfigError::InvalidValue("SLOT_HOURS".to_string()))?,
                seed_days: env::var("SLOT_SEED_DAYS")
                    .unwrap_or_else(|_| "14".to_string())
                    .parse()
                    .unwrap_or(14),
                default_language,
            },
            scheduler: SchedulerConfig {
                enabled: env::var("SCHEDULER_ENABLED")
                    .ok()
                    .and_then(|v| parse_bool(&v))
                    .unwrap_or(true),
                poll_interval_seconds: env::var("SCHEDULER_POLL_INTERVAL_SECONDS")
                    .unwrap_or_else(|_| "60".to_string())
                    .parse()
                    .unwrap_or(60u64)
                    .max(1),
                pass_timeout_seconds: env::var("SCHEDULER_PASS_TIMEOUT_SECONDS")
                    .unwrap_or_else(|_| "50".to_string())
                    .parse()
                    .unwrap_or(50u64)
                    .max(1),
            },
        })
    }
}

fn parse_bool(v: &str) -> Option<bool> {
    match v.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" => Some(true),
        "0" | "false" | "no" => Some(false),
        _ => None,
    }
}

/// Parse a comma-separated list of hours (0-23). Returns `None` on any bad entry.
fn parse_slot_hours(v: &str) -> Option<Vec<u32>> {
    let mut hours = v
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<u32>().ok().filter(|h| *h < 24))
        .collect::<Option<Vec<u32>>>()?;
    hours.sort_unstable();
    hours.dedup();
    (!hours.is_empty()).then_some(hours)
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),

    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 10000,
            },
            telegram: TelegramConfig {
                bot_token: String::new(),
                admin_id: 0,
            },
            store: StoreConfig {
                backend: StoreBackend::Sqlite,
                spreadsheet_id: None,
                worksheet: "График".to_string(),
                database_url: "sqlite://data/slots.db".to_string(),
                max_connections: 5,
            },
            google: GoogleConfig {
                sheets_credentials: None,
                calendar_credentials: String::new(),
                calendar_id: "primary".to_string(),
                impersonate_subject: None,
            },
            booking: BookingConfig {
                timezone: chrono_tz::Europe::Lisbon,
                slot_hours: vec![10, 11, 12, 14, 15, 16],
                seed_days: 14,
                default_language: i18n::DEFAULT_LANG.to_string(),
            },
            scheduler: SchedulerConfig {
                enabled: true,
                poll_interval_seconds: 60,
                pass_timeout_seconds: 50,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_hours_are_sorted_and_deduplicated() {
        assert_eq!(parse_slot_hours("14, 10,10 ,11"), Some(vec![10, 11, 14]));
    }

    #[test]
    fn slot_hours_reject_garbage() {
        assert_eq!(parse_slot_hours("10,noon"), None);
        assert_eq!(parse_slot_hours("24"), None);
        assert_eq!(parse_slot_hours(""), None);
    }

    #[test]
    fn bool_flags_accept_common_spellings() {
        assert_eq!(parse_bool("YES"), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }
}
