//! Initialization helpers for the application:
//! - the booking table backend (Google Sheets or SQLite + migrations)
//! - the Google Meet provider
//! - background worker spawn helpers

use std::{path::Path, str::FromStr, sync::Arc};

use anyhow::{Context, Result};

use crate::config::{Config, StoreBackend, StoreConfig};
use crate::db::repository::{SheetTable, SlotStore, SqliteTable};
use crate::services::calendar::{create_calendar_hub, GoogleMeetService, MeetingProvider};
use crate::services::google_auth::{parse_service_account_key, service_account_authenticator, GoogleAuth};
use crate::services::scheduler::Scheduler;
use crate::services::sheets::GoogleSheetsTable;

/// Redact potentially sensitive information from a database URL before logging.
///
/// Attempts to parse the URL and remove userinfo (username:password) components.
/// Falls back to removing everything before '@' or returning "(redacted)".
pub fn redact_db_url(db_url: &str) -> String {
    if let Ok(url) = url::Url::parse(db_url) {
        let host = url.host_str().unwrap_or("");
        format!("{}://{}{}", url.scheme(), host, url.path())
    } else if let Some(at_pos) = db_url.find('@') {
        format!("(redacted){}", &db_url[at_pos + 1..])
    } else {
        "(redacted)".to_string()
    }
}

/// Open the SQLite table file (creating it and its directory) and run migrations.
pub async fn init_db(config: &StoreConfig) -> Result<sqlx::SqlitePool> {
    let db_url = &config.database_url;
    tracing::info!("Connecting to database: {}", redact_db_url(db_url));

    let db_path = db_url.strip_prefix("sqlite://").unwrap_or(db_url);
    let db_file_path = Path::new(db_path);

    if let Some(parent) = db_file_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create database directory {}", parent.display())
            })?;
        }
    }

    let connect_options =
        sqlx::sqlite::SqliteConnectOptions::from_str(db_url)?.create_if_missing(true);

    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .connect_with(connect_options)
        .await?;

    tracing::info!("Running database migrations");
    sqlx::migrate!("./migrations").run(&pool).await?;

    Ok(pool)
}

/// Build the slot store over the configured table backend.
pub async fn build_store(config: &Config, http: reqwest::Client) -> Result<Arc<SlotStore>> {
    let table: Arc<dyn SheetTable> = match config.store.backend {
        StoreBackend::Sheets => {
            let creds = config
                .google
                .sheets_credentials
                .as_deref()
                .context("GOOGLE_SHEETS_CREDS is required for the sheets backend")?;
            let spreadsheet_id = config
                .store
                .spreadsheet_id
                .clone()
                .context("SPREADSHEET_ID is required for the sheets backend")?;
            let key = parse_service_account_key(creds)?;
            tracing::info!(
                "Using Google Sheets table '{}' as {}",
                config.store.worksheet,
                key.client_email
            );
            let auth = service_account_authenticator(key, None).await?;
            Arc::new(GoogleSheetsTable::new(
                http,
                GoogleAuth::new(auth),
                spreadsheet_id,
                config.store.worksheet.clone(),
            ))
        }
        StoreBackend::Sqlite => {
            let pool = init_db(&config.store).await?;
            tracing::info!("Using local SQLite table");
            Arc::new(SqliteTable::new(pool))
        }
    };

    Ok(Arc::new(SlotStore::new(table, config.booking.timezone)))
}

/// Google Calendar client creating Meet conferences.
pub async fn build_meeting_provider(config: &Config) -> Result<Arc<dyn MeetingProvider>> {
    let key = parse_service_account_key(&config.google.calendar_credentials)?;
    let subject = config.google.impersonate_subject.as_deref();
    tracing::info!(
        "Meetings are created in calendar '{}' as {}",
        config.google.calendar_id,
        subject.unwrap_or(&key.client_email)
    );
    let auth = service_account_authenticator(key, subject).await?;
    let hub = create_calendar_hub(auth)?;
    Ok(Arc::new(GoogleMeetService::new(
        hub,
        config.google.calendar_id.clone(),
    )))
}

/// Spawn background workers:
/// - the reminder / pre-meeting scheduler
///
/// Each worker listens for a shutdown notification via a
/// `tokio::sync::broadcast::Sender<()>`; the returned handles let callers await exit.
pub fn spawn_background_workers(
    state: Arc<crate::AppState>,
    shutdown: tokio::sync::broadcast::Sender<()>,
) -> Vec<tokio::task::JoinHandle<()>> {
    let mut handles = Vec::new();

    if state.config.scheduler.enabled {
        let scheduler = Arc::new(Scheduler::new(state.booking.clone()));
        let config = state.config.scheduler.clone();
        handles.push(tokio::spawn(scheduler.run(config, shutdown.subscribe())));
    } else {
        tracing::warn!("Scheduler disabled: no reminders or pre-meeting links will be sent");
    }

    handles
}
