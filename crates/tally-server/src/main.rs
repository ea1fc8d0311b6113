use std::sync::Arc;

use anyhow::Result;
use tracing::{info, warn};

use tally_core::activity::{ProjectActivityCache, ProjectStatusSource, SystemClock};
use tally_core::config::Config;
use tally_server::state::AppState;
use tally_server::status_source::{AllowAllStatusSource, HttpStatusSource};
use tally_warehouse::TinybirdClient;

/// `tally health` — liveness probe for Docker HEALTHCHECK.
///
/// Calls `GET http://localhost:$TALLY_PORT/health`.
/// Exits 0 if the server responds with HTTP 200, exits 1 otherwise.
fn run_health_check() -> ! {
    let port = std::env::var("TALLY_PORT").unwrap_or_else(|_| "3000".to_string());
    let url = format!("http://localhost:{}/health", port);
    match ureq::get(&url).call() {
        Ok(resp) if resp.status() == 200 => std::process::exit(0),
        _ => std::process::exit(1),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Health-check subcommand — handled before anything else so the binary
    // stays fast when used as a Docker HEALTHCHECK probe.
    let args: Vec<String> = std::env::args().collect();
    if args.get(1).map(|s| s.as_str()) == Some("health") {
        run_health_check();
    }

    // Initialise structured JSON logging. Level controlled via RUST_LOG.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("tally=info".parse()?),
        )
        .json()
        .init();

    // Both of these fail fast, naming the missing variables, before any
    // request is served.
    let cfg = Config::from_env()?;
    let warehouse = TinybirdClient::from_env()?;

    let status_source: Arc<dyn ProjectStatusSource> =
        match (&cfg.control_api_url, &cfg.control_api_token) {
            (Some(url), Some(token)) => {
                info!(control_api_url = %url, "Project status via control API");
                Arc::new(HttpStatusSource::new(url, token))
            }
            _ => {
                warn!(
                    "CONTROL_API_URL not set — all projects treated as active. \
                     Do not run cloud ingest in this mode."
                );
                Arc::new(AllowAllStatusSource)
            }
        };

    let activity =
        ProjectActivityCache::new(status_source, Arc::new(SystemClock), cfg.project_cache_ttl());

    let addr = format!("0.0.0.0:{}", cfg.port);
    let state = Arc::new(AppState::new(cfg.clone(), activity, warehouse));
    let app = tally_server::app::build_app(Arc::clone(&state));

    info!(port = cfg.port, "Tally ingest listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::signal::ctrl_c().await.ok();
        })
        .await?;

    Ok(())
}
