pub mod admin;
pub mod feedback;
pub mod forms;
pub mod session;

use crate::db;
use crate::state::SharedState;
use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde_json::{json, Value};

pub const SERVICE_NAME: &str = "feedback_intake";

async fn health(State(state): State<SharedState>) -> (StatusCode, Json<Value>) {
    let status = match db::ping(&state.pool).await {
        Ok(()) => "ok",
        Err(e) => {
            tracing::warn!("Health check: database unreachable: {}", e);
            "degraded"
        }
    };
    (StatusCode::OK, Json(json!({ "status": status, "service": SERVICE_NAME })))
}

pub fn routes(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health))
        .with_state(state.clone())
        .nest("/api/feedback", feedback::router(state.clone()))
        .nest("/api/forms", forms::router(state.clone()))
        .nest("/api/admin", admin::router(state))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_state;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    #[tokio::test]
    async fn health_reports_degraded_without_database() {
        let (state, _rx) = test_state();
        let resp = routes(state)
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body, json!({ "status": "degraded", "service": "feedback_intake" }));
    }

    #[tokio::test]
    async fn admin_api_is_mounted() {
        let (state, _rx) = test_state();
        let resp = routes(state)
            .oneshot(Request::builder().uri("/api/admin/dashboard").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }
}
