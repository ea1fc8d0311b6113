use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::{routes, state::AppState};

/// Construct the Axum [`Router`] with all routes and middleware attached.
///
/// CORS for `/v1/track` is implemented in the route handlers rather than a
/// layer: the preflight contract (204, echoed request headers) is part of
/// the endpoint's wire behavior and is tested as such.
pub fn build_app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(routes::health::health))
        .route(
            "/v1/track",
            post(routes::track::track).options(routes::track::preflight),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
