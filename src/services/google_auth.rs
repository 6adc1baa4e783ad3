use std::sync::Arc;

use base64::Engine;
use google_calendar3::common::GetToken;
use google_calendar3::yup_oauth2::{self, ServiceAccountAuthenticator, ServiceAccountKey};

use crate::error::{AppError, AppResult};

/// Decode a service-account key given as base64 of the JSON file, or as the raw JSON itself.
pub fn parse_service_account_key(value: &str) -> AppResult<ServiceAccountKey> {
    let value = value.trim();
    let json = if value.starts_with('{') {
        value.as_bytes().to_vec()
    } else {
        base64::engine::general_purpose::STANDARD
            .decode(value)
            .map_err(|e| AppError::Config(format!("service account key is not base64: {}", e)))?
    };
    yup_oauth2::parse_service_account_key(json)
        .map_err(|e| AppError::Config(format!("invalid service account key: {}", e)))
}

/// Service-account authenticator, acting on behalf of `subject` when given.
pub async fn service_account_authenticator(
    key: ServiceAccountKey,
    subject: Option<&str>,
) -> AppResult<impl GetToken + Clone + 'static> {
    let mut builder = ServiceAccountAuthenticator::builder(key);
    if let Some(subject) = subject {
        builder = builder.subject(subject);
    }
    builder
        .build()
        .await
        .map_err(|e| AppError::Config(format!("failed to build service account authenticator: {}", e)))
}

/// Bearer tokens for REST calls made outside a generated API hub.
#[derive(Clone)]
pub struct GoogleAuth {
    tokens: Arc<dyn GetToken>,
}

impl GoogleAuth {
    pub fn new(tokens: impl GetToken + 'static) -> Self {
        Self {
            tokens: Arc::new(tokens),
        }
    }

    /// A valid access token for `scopes`; the authenticator caches and refreshes it.
    ///
    /// `wrap` picks the `AppError` variant failures are reported as.
    pub async fn access_token(&self, scopes: &[&str], wrap: fn(String) -> AppError) -> AppResult<String> {
        match self.tokens.get_token(scopes).await {
            Ok(Some(token)) => Ok(token),
            Ok(None) => Err(wrap("no access token issued".to_string())),
            Err(e) => Err(wrap(format!("failed to obtain access token: {}", e))),
        }
    }
}
