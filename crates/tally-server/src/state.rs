use std::sync::Arc;

use tally_core::activity::ProjectActivityCache;
use tally_core::config::Config;
use tally_warehouse::TinybirdClient;

/// Shared application state injected into every Axum handler via
/// [`axum::extract::State`].
///
/// The activity cache is the only cross-request mutable state; everything
/// else is read-only after startup.
pub struct AppState {
    /// Parsed configuration, loaded once at startup from environment variables.
    pub config: Arc<Config>,

    /// Process-wide project admission cache. Shared by all requests so the
    /// backing status lookup is amortized across the whole ingest stream.
    pub activity: ProjectActivityCache,

    /// Warehouse append client.
    pub warehouse: Arc<TinybirdClient>,
}

impl AppState {
    pub fn new(config: Config, activity: ProjectActivityCache, warehouse: TinybirdClient) -> Self {
        Self {
            config: Arc::new(config),
            activity,
            warehouse: Arc::new(warehouse),
        }
    }
}
