use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

/// `GET /health` — liveness check for the container orchestrator.
///
/// The service holds no local durable state; if the process answers, it is
/// healthy. Warehouse reachability is observed per delivery, not probed here.
pub async fn health() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION")
        })),
    )
}
