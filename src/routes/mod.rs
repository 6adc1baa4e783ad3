pub mod health;
pub mod slots;

use std::sync::Arc;

use axum::{routing::get, Router};
use tower_http::trace::TraceLayer;

use crate::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // Slot table (read-only)
        .nest("/api/slots", slots::router())
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use crate::testutils::app_state;

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn health_reports_store_state() {
        let (state, table) = app_state(&["10.10.2030, 10:00"]);

        let (status, body) = get_json(router(state.clone()), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));

        table.set_failing(true);
        let (status, body) = get_json(router(state), "/health").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["store"], "unavailable");
    }

    #[tokio::test]
    async fn free_slots_skips_past_and_taken() {
        let (state, _table) = app_state(&["01.01.2020, 10:00", "10.10.2030, 10:00", "11.10.2030, 10:00"]);
        state
            .store
            .write_booking(
                "11.10.2030, 10:00",
                crate::testutils::client(7),
                crate::db::models::SlotState::PendingApproval,
                None,
                chrono::Utc::now(),
            )
            .await
            .unwrap();

        let (status, body) = get_json(router(state), "/api/slots/free").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["timezone"], "UTC");
        assert_eq!(body["slots"], serde_json::json!(["10.10.2030, 10:00"]));
    }

    #[tokio::test]
    async fn free_slots_maps_store_errors() {
        let (state, table) = app_state(&[]);
        table.set_failing(true);

        let (status, body) = get_json(router(state), "/api/slots/free").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["error"]["code"], "STORE_UNAVAILABLE");
    }
}
