use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::db::models::SlotState;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Slot not found: {0}")]
    SlotNotFound(String),

    #[error("Slot already taken: {0}")]
    SlotAlreadyTaken(String),

    #[error("Invalid email: {0}")]
    InvalidEmail(String),

    #[error("Invalid name")]
    InvalidName,

    #[error("User already holds a future booking at {0}")]
    AlreadyBooked(String),

    #[error("No future booking")]
    NoFutureBooking,

    #[error("Cannot {action} slot {label} in state {from:?}")]
    InvalidTransition {
        label: String,
        from: SlotState,
        action: &'static str,
    },

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Calendar error: {0}")]
    Calendar(String),

    #[error("Telegram error: {0}")]
    Telegram(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// Infrastructure failures that are worth one more attempt.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AppError::StoreUnavailable(_) | AppError::Calendar(_) | AppError::Telegram(_)
        )
    }
}

impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        AppError::StoreUnavailable(format!("database: {}", e))
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Serialize)]
struct ErrorBody {
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::SlotNotFound(msg) => (StatusCode::NOT_FOUND, "SLOT_NOT_FOUND", msg.clone()),
            AppError::SlotAlreadyTaken(msg) => {
                (StatusCode::CONFLICT, "SLOT_ALREADY_TAKEN", msg.clone())
            }
            AppError::AlreadyBooked(msg) => (StatusCode::CONFLICT, "ALREADY_BOOKED", msg.clone()),
            AppError::InvalidTransition { .. } => {
                (StatusCode::CONFLICT, "INVALID_TRANSITION", self.to_string())
            }
            AppError::InvalidEmail(_) | AppError::InvalidName => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "VALIDATION_ERROR",
                self.to_string(),
            ),
            AppError::NoFutureBooking => {
                (StatusCode::NOT_FOUND, "NO_FUTURE_BOOKING", self.to_string())
            }
            AppError::StoreUnavailable(msg) => {
                tracing::error!("Store error: {}", msg);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "STORE_UNAVAILABLE",
                    "The booking table is temporarily unavailable".to_string(),
                )
            }
            AppError::Calendar(msg) => {
                tracing::error!("Calendar error: {}", msg);
                (StatusCode::BAD_GATEWAY, "CALENDAR_ERROR", msg.clone())
            }
            AppError::Telegram(msg) => {
                tracing::error!("Telegram error: {}", msg);
                (StatusCode::BAD_GATEWAY, "TELEGRAM_ERROR", msg.clone())
            }
            AppError::Config(msg) => {
                tracing::error!("Configuration error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "CONFIG_ERROR",
                    "Server configuration error".to_string(),
                )
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                )
            }
        };

        let body = ErrorResponse {
            error: ErrorBody {
                code: code.to_string(),
                message,
            },
        };

        (status, Json(body)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
