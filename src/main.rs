use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod db;
mod error;
mod i18n;
mod routes;
mod services;
#[cfg(test)]
mod testutils;

use config::Config;
use db::SlotStore;
use services::{
    booking::BookingService, conversation::ConversationController, init, telegram,
    telegram::TelegramService,
};

pub struct AppState {
    pub config: Config,
    pub store: Arc<SlotStore>,
    pub booking: Arc<BookingService>,
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "consultation_bot=debug,tower_http=info".into());
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = ctrl_c => {},
                    _ = term.recv() => {},
                }
            }
            Err(e) => {
                tracing::warn!("Failed to bind SIGTERM, only Ctrl+C will stop the bot: {}", e);
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration (and LOG_FORMAT) before the subscriber is installed
    dotenvy::dotenv().ok();
    init_tracing();
    let config = Config::from_env()?;

    tracing::info!("Starting consultation booking bot");

    // Collaborators
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()?;
    let store = init::build_store(&config, http).await?;
    let meetings = init::build_meeting_provider(&config).await?;
    let telegram_service = TelegramService::new(config.telegram.bot_token.clone()).await?;
    let bot = telegram_service.get_bot().clone();

    let booking = Arc::new(BookingService::new(
        store.clone(),
        Arc::new(telegram_service),
        meetings,
        config.telegram.admin_id,
        config.booking.default_language.clone(),
    ));
    let controller = Arc::new(ConversationController::new(booking.clone(), &config.booking));

    let app_state = Arc::new(AppState {
        config: config.clone(),
        store,
        booking,
    });

    // Create shutdown notifier for background workers
    let (shutdown_tx, _shutdown_rx) = tokio::sync::broadcast::channel::<()>(1);
    let bg_handles = init::spawn_background_workers(app_state.clone(), shutdown_tx.clone());

    // Telegram long polling
    let mut dispatcher = telegram::build_dispatcher(bot, controller);
    let dispatcher_shutdown = dispatcher.shutdown_token();
    let dispatcher_handle = tokio::spawn(async move { dispatcher.dispatch().await });

    let app = routes::router(app_state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    tracing::info!("Server listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let server_fut = axum::serve(listener, app);

    tokio::select! {
        res = server_fut => {
            if let Err(e) = res {
                tracing::error!("Server error: {}", e);
            }
        }
        _ = shutdown_signal() => {
            tracing::info!("Shutdown signal received, stopping the bot and background workers");
        }
    }

    let _ = shutdown_tx.send(());
    match dispatcher_shutdown.shutdown() {
        Ok(stopped) => stopped.await,
        Err(e) => tracing::warn!("Dispatcher was not running: {:?}", e),
    }

    // Give background workers some time to finish their current pass.
    let shutdown_wait = Duration::from_secs(15);
    tracing::info!(
        "Waiting up to {}s for background workers to exit",
        shutdown_wait.as_secs()
    );
    let bg_wait = async {
        for h in bg_handles {
            let _ = h.await;
        }
        let _ = dispatcher_handle.await;
    };
    let _ = tokio::time::timeout(shutdown_wait, bg_wait).await;

    tracing::info!("Shutdown complete");
    Ok(())
}
