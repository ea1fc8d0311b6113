use std::sync::Arc;

use axum::{
    extract::State,
    http::{
        header::{
            ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS,
            ACCESS_CONTROL_ALLOW_ORIGIN, ACCESS_CONTROL_REQUEST_HEADERS,
        },
        HeaderMap, HeaderValue, StatusCode,
    },
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};

use tally_core::event::{validate_batch, AnalyticsEvent};

use crate::{error::AppError, state::AppState};

/// `OPTIONS /v1/track` — CORS preflight.
///
/// The tracking script runs in third-party browsers, so access is granted to
/// every origin. Requested headers are echoed back verbatim; browsers treat
/// a mismatch as a preflight failure and silently drop the event POST.
pub async fn preflight(headers: HeaderMap) -> Response {
    let allow_headers = headers
        .get(ACCESS_CONTROL_REQUEST_HEADERS)
        .cloned()
        .unwrap_or_else(|| HeaderValue::from_static("Content-Type"));

    (
        StatusCode::NO_CONTENT,
        [
            (ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*")),
            (
                ACCESS_CONTROL_ALLOW_METHODS,
                HeaderValue::from_static("POST, OPTIONS"),
            ),
            (ACCESS_CONTROL_ALLOW_HEADERS, allow_headers),
        ],
    )
        .into_response()
}

/// `POST /v1/track` — ingest a batch of 1–10 analytics events.
///
/// ## Auth
/// None. Admission is decided per event from the project's activity status,
/// cached in [`AppState::activity`].
///
/// ## Contract with the tracking script
/// Validation failures return 400. Past validation the response is always
/// `200 { "success": true, "received": n }` — inactive-project drops and
/// delivery failures must never surface in an end-user browser console, so
/// they are logged here and swallowed.
#[tracing::instrument(skip(state, body))]
pub async fn track(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Value>,
) -> Result<Response, AppError> {
    let events = validate_batch(&body).map_err(AppError::from)?;
    let received = events.len();

    // --- Admission: per-event activity check against the cache ---
    // Per event rather than per batch: a batch may in principle mix projects,
    // and each project's status is decided independently.
    let mut admitted: Vec<AnalyticsEvent> = Vec::with_capacity(received);
    for event in events {
        match state.activity.is_project_active(&event.project_id).await {
            Ok(true) => admitted.push(event),
            Ok(false) => {
                tracing::debug!(
                    project_id = %event.project_id,
                    "Event dropped: project inactive"
                );
            }
            Err(e) => {
                // Indeterminate admission — drop this event, keep the rest.
                tracing::warn!(
                    project_id = %event.project_id,
                    error = %e,
                    "Project status lookup failed; dropping event"
                );
            }
        }
    }

    // --- Delivery: one warehouse call for the admitted subset, in order ---
    if !admitted.is_empty() {
        if let Err(e) = state.warehouse.append_events(&admitted).await {
            tracing::error!(
                count = admitted.len(),
                error = %e,
                "Warehouse delivery failed — events lost"
            );
        }
    }

    // `received` reports the original batch length: drops are invisible to
    // the submitting page.
    Ok((
        StatusCode::OK,
        [(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"))],
        Json(json!({ "success": true, "received": received })),
    )
        .into_response())
}
