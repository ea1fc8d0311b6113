use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use tally_core::activity::{
    ProjectActivityCache, ProjectStatus, ProjectStatusSource, SystemClock,
};
use tally_core::config::Config;
use tally_server::app::build_app;
use tally_server::state::AppState;
use tally_warehouse::{EventsTransport, RetryPolicy, TinybirdClient, TransportResponse};

/// Status source scripted per project id.
///
/// Unlisted projects are active; `inactive` projects report inactive;
/// `failing` projects error out (indeterminate admission).
struct MockStatusSource {
    inactive: HashSet<String>,
    failing: HashSet<String>,
    calls: AtomicUsize,
}

impl MockStatusSource {
    fn new(inactive: &[&str], failing: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            inactive: inactive.iter().map(|s| s.to_string()).collect(),
            failing: failing.iter().map(|s| s.to_string()).collect(),
            calls: AtomicUsize::new(0),
        })
    }

    fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProjectStatusSource for MockStatusSource {
    async fn query_status(&self, project_id: &str) -> anyhow::Result<ProjectStatus> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.contains(project_id) {
            anyhow::bail!("status store unreachable");
        }
        if self.inactive.contains(project_id) {
            return Ok(ProjectStatus::Inactive);
        }
        Ok(ProjectStatus::Active)
    }
}

/// Transport scripted with one status per call (default 200), recording
/// every request body.
struct ScriptedTransport {
    responses: Mutex<VecDeque<u16>>,
    bodies: Mutex<Vec<String>>,
}

impl ScriptedTransport {
    fn new(statuses: &[u16]) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(statuses.iter().copied().collect()),
            bodies: Mutex::new(Vec::new()),
        })
    }

    fn call_count(&self) -> usize {
        self.bodies.lock().expect("lock bodies").len()
    }

    fn recorded_bodies(&self) -> Vec<String> {
        self.bodies.lock().expect("lock bodies").clone()
    }
}

#[async_trait]
impl EventsTransport for ScriptedTransport {
    async fn post_ndjson(
        &self,
        _url: &str,
        _token: &str,
        body: String,
    ) -> anyhow::Result<TransportResponse> {
        self.bodies.lock().expect("lock bodies").push(body);
        let status = self
            .responses
            .lock()
            .expect("lock responses")
            .pop_front()
            .unwrap_or(200);
        Ok(TransportResponse {
            status,
            body: if status >= 400 { "boom".into() } else { String::new() },
        })
    }
}

fn test_config() -> Config {
    Config {
        port: 0,
        project_cache_ttl_ms: 30_000,
        control_api_url: None,
        control_api_token: None,
    }
}

/// Fresh app wired with the given status source and transport scripts.
fn setup(
    source: Arc<MockStatusSource>,
    transport_statuses: &[u16],
) -> (axum::Router, Arc<ScriptedTransport>) {
    let transport = ScriptedTransport::new(transport_statuses);
    let warehouse = TinybirdClient::with_transport(
        "https://api.tinybird.co",
        "tb_test_token",
        "analytics_events",
        RetryPolicy {
            max_attempts: 2,
            base_delay: Duration::from_millis(5),
        },
        Arc::clone(&transport) as Arc<dyn EventsTransport>,
    )
    .expect("warehouse client");

    let config = test_config();
    let activity =
        ProjectActivityCache::new(source, Arc::new(SystemClock), config.project_cache_ttl());
    let state = Arc::new(AppState::new(config, activity, warehouse));
    (build_app(state), transport)
}

/// Helper: POST /v1/track with the given JSON body.
fn track_request(body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/v1/track")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("build request")
}

/// Helper: extract JSON body from response.
async fn json_body(response: axum::http::Response<Body>) -> Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("read body")
        .to_bytes();
    serde_json::from_slice(&bytes).expect("parse JSON")
}

fn event(project: &str, path: &str) -> Value {
    json!({
        "project_id": project,
        "session_id": "sess_1",
        "event_type": "pageview",
        "timestamp": "2025-06-01T12:00:00.000Z",
        "path": path
    })
}

// ============================================================
// BDD: Valid batch is delivered in order
// ============================================================
#[tokio::test]
async fn test_track_valid_batch_is_delivered() {
    let source = MockStatusSource::new(&[], &[]);
    let (app, transport) = setup(Arc::clone(&source), &[]);

    let body = json!({ "events": [event("proj_a", "/one"), event("proj_a", "/two")] });
    let response = app
        .oneshot(track_request(&body.to_string()))
        .await
        .expect("request");

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get("access-control-allow-origin")
            .and_then(|v| v.to_str().ok()),
        Some("*")
    );
    let json = json_body(response).await;
    assert_eq!(json, json!({ "success": true, "received": 2 }));

    // Exactly one warehouse call, events in submission order.
    assert_eq!(transport.call_count(), 1);
    let bodies = transport.recorded_bodies();
    let lines: Vec<Value> = bodies[0]
        .lines()
        .map(|l| serde_json::from_str(l).expect("NDJSON line"))
        .collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0]["path"], "/one");
    assert_eq!(lines[1]["path"], "/two");
    assert!(bodies[0].ends_with('\n'), "trailing newline after last record");
}

// ============================================================
// BDD: Oversized batch is rejected before any processing
// ============================================================
#[tokio::test]
async fn test_track_batch_too_large() {
    let source = MockStatusSource::new(&[], &[]);
    let (app, transport) = setup(Arc::clone(&source), &[]);

    let events: Vec<Value> = (0..11).map(|i| event("proj_a", &format!("/p{i}"))).collect();
    let response = app
        .oneshot(track_request(&json!({ "events": events }).to_string()))
        .await
        .expect("request");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = json_body(response).await;
    assert_eq!(json["error"]["code"], "batch_too_large");
    assert_eq!(source.call_count(), 0, "no admission check for invalid batches");
    assert_eq!(transport.call_count(), 0, "no delivery for invalid batches");
}

#[tokio::test]
async fn test_track_empty_batch_is_rejected() {
    let source = MockStatusSource::new(&[], &[]);
    let (app, transport) = setup(source, &[]);

    let response = app
        .oneshot(track_request(&json!({ "events": [] }).to_string()))
        .await
        .expect("request");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = json_body(response).await;
    assert_eq!(json["error"]["code"], "validation_error");
    assert_eq!(transport.call_count(), 0);
}

#[tokio::test]
async fn test_track_missing_events_field_is_rejected() {
    let source = MockStatusSource::new(&[], &[]);
    let (app, transport) = setup(source, &[]);

    let response = app
        .oneshot(track_request(&json!({ "event": [] }).to_string()))
        .await
        .expect("request");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(transport.call_count(), 0);
}

// ============================================================
// BDD: One mistyped event rejects the whole batch
// ============================================================
#[tokio::test]
async fn test_track_one_invalid_event_rejects_batch() {
    let source = MockStatusSource::new(&[], &[]);
    let (app, transport) = setup(Arc::clone(&source), &[]);

    let mut bad = event("proj_a", "/bad");
    bad["engagement_time_ms"] = json!("not a number");
    let body = json!({ "events": [event("proj_a", "/good"), bad] });

    let response = app
        .oneshot(track_request(&body.to_string()))
        .await
        .expect("request");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = json_body(response).await;
    assert_eq!(json["error"]["code"], "validation_error");
    assert!(
        json["error"]["message"]
            .as_str()
            .expect("message")
            .contains("engagement_time_ms"),
        "error names the offending field"
    );
    assert_eq!(transport.call_count(), 0);
}

#[tokio::test]
async fn test_track_malformed_json_is_rejected() {
    let source = MockStatusSource::new(&[], &[]);
    let (app, _transport) = setup(source, &[]);

    let response = app
        .oneshot(track_request("not json"))
        .await
        .expect("request");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

// ============================================================
// BDD: Inactive-project events are dropped silently
// ============================================================
#[tokio::test]
async fn test_track_inactive_project_dropped_silently() {
    let source = MockStatusSource::new(&["proj_gone"], &[]);
    let (app, transport) = setup(source, &[]);

    let body = json!({
        "events": [event("proj_a", "/kept"), event("proj_gone", "/dropped")]
    });
    let response = app
        .oneshot(track_request(&body.to_string()))
        .await
        .expect("request");

    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    // The submitting page sees the full count — drops are invisible.
    assert_eq!(json, json!({ "success": true, "received": 2 }));

    let bodies = transport.recorded_bodies();
    assert_eq!(bodies.len(), 1);
    let lines: Vec<Value> = bodies[0]
        .lines()
        .map(|l| serde_json::from_str(l).expect("NDJSON line"))
        .collect();
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0]["project_id"], "proj_a");
}

#[tokio::test]
async fn test_track_all_events_dropped_skips_delivery() {
    let source = MockStatusSource::new(&["proj_gone"], &[]);
    let (app, transport) = setup(source, &[]);

    let body = json!({ "events": [event("proj_gone", "/dropped")] });
    let response = app
        .oneshot(track_request(&body.to_string()))
        .await
        .expect("request");

    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json, json!({ "success": true, "received": 1 }));
    assert_eq!(transport.call_count(), 0, "nothing admitted, nothing sent");
}

// ============================================================
// BDD: Indeterminate admission drops that event, keeps the rest
// ============================================================
#[tokio::test]
async fn test_track_status_lookup_failure_drops_only_that_event() {
    let source = MockStatusSource::new(&[], &["proj_flaky"]);
    let (app, transport) = setup(source, &[]);

    let body = json!({
        "events": [event("proj_flaky", "/dropped"), event("proj_a", "/kept")]
    });
    let response = app
        .oneshot(track_request(&body.to_string()))
        .await
        .expect("request");

    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json, json!({ "success": true, "received": 2 }));

    let bodies = transport.recorded_bodies();
    assert_eq!(bodies.len(), 1);
    let lines: Vec<Value> = bodies[0]
        .lines()
        .map(|l| serde_json::from_str(l).expect("NDJSON line"))
        .collect();
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0]["project_id"], "proj_a");
}

// ============================================================
// BDD: Delivery failure is swallowed — the page never sees it
// ============================================================
#[tokio::test]
async fn test_track_delivery_failure_still_returns_success() {
    let source = MockStatusSource::new(&[], &[]);
    // Both attempts fail; retries exhaust.
    let (app, transport) = setup(source, &[500, 503]);

    let body = json!({ "events": [event("proj_a", "/lost")] });
    let response = app
        .oneshot(track_request(&body.to_string()))
        .await
        .expect("request");

    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json, json!({ "success": true, "received": 1 }));
    assert_eq!(transport.call_count(), 2, "retried then gave up");
}

// ============================================================
// BDD: Admission decisions are cached across requests
// ============================================================
#[tokio::test]
async fn test_track_admission_cached_across_requests() {
    let source = MockStatusSource::new(&[], &[]);
    let (app, _transport) = setup(Arc::clone(&source), &[]);

    for _ in 0..3 {
        let body = json!({ "events": [event("proj_a", "/page")] });
        let response = app
            .clone()
            .oneshot(track_request(&body.to_string()))
            .await
            .expect("request");
        assert_eq!(response.status(), StatusCode::OK);
    }

    assert_eq!(
        source.call_count(),
        1,
        "status queried once within the TTL window"
    );
}

// ============================================================
// BDD: CORS preflight
// ============================================================
#[tokio::test]
async fn test_track_preflight_echoes_requested_headers() {
    let source = MockStatusSource::new(&[], &[]);
    let (app, _transport) = setup(source, &[]);

    let request = Request::builder()
        .method("OPTIONS")
        .uri("/v1/track")
        .header("access-control-request-method", "POST")
        .header("access-control-request-headers", "content-type,x-tally-sdk")
        .body(Body::empty())
        .expect("build request");

    let response = app.oneshot(request).await.expect("request");

    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    let headers = response.headers();
    assert_eq!(
        headers
            .get("access-control-allow-origin")
            .and_then(|v| v.to_str().ok()),
        Some("*")
    );
    assert_eq!(
        headers
            .get("access-control-allow-methods")
            .and_then(|v| v.to_str().ok()),
        Some("POST, OPTIONS")
    );
    assert_eq!(
        headers
            .get("access-control-allow-headers")
            .and_then(|v| v.to_str().ok()),
        Some("content-type,x-tally-sdk"),
        "requested headers echoed verbatim"
    );

    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("read body")
        .to_bytes();
    assert!(bytes.is_empty(), "preflight has no body");
}

#[tokio::test]
async fn test_track_preflight_defaults_allow_headers() {
    let source = MockStatusSource::new(&[], &[]);
    let (app, _transport) = setup(source, &[]);

    let request = Request::builder()
        .method("OPTIONS")
        .uri("/v1/track")
        .body(Body::empty())
        .expect("build request");

    let response = app.oneshot(request).await.expect("request");
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(
        response
            .headers()
            .get("access-control-allow-headers")
            .and_then(|v| v.to_str().ok()),
        Some("Content-Type")
    );
}
