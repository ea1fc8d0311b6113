use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tokio::sync::RwLock;

/// Ingestion status of a project, as reported by the status source.
///
/// Anything other than `Active` (cancelled subscription, deleted project,
/// abuse suspension) means events for the project are dropped at admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectStatus {
    Active,
    Inactive,
}

impl ProjectStatus {
    pub fn allows_ingest(self) -> bool {
        matches!(self, ProjectStatus::Active)
    }
}

/// Source of truth for project status.
///
/// Backed by the dashboard's project/subscription records in production
/// (see the server crate's HTTP source); tests inject stubs.
#[async_trait]
pub trait ProjectStatusSource: Send + Sync + 'static {
    async fn query_status(&self, project_id: &str) -> anyhow::Result<ProjectStatus>;
}

/// Millisecond clock, injectable so tests can pin time at TTL boundaries.
pub trait Clock: Send + Sync + 'static {
    fn now_millis(&self) -> u64;
}

/// Production clock reading Unix wall time.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

struct CacheEntry {
    active: bool,
    stored_at_ms: u64,
}

/// Time-bounded cache in front of [`ProjectStatusSource`].
///
/// Answers "may project P ingest right now?" without hitting the backing
/// store on every event. Entries expire lazily: a lookup whose entry has
/// age >= TTL refreshes synchronously before answering. There is no size
/// eviction and no background sweep.
///
/// Concurrent lookups for the same expired id may each trigger a refresh —
/// the read lock is dropped before querying so admission never serializes
/// behind a slow backing call. Last write wins; all writers store the same
/// boolean within one TTL window.
pub struct ProjectActivityCache {
    source: Arc<dyn ProjectStatusSource>,
    clock: Arc<dyn Clock>,
    ttl_ms: u64,
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl ProjectActivityCache {
    pub fn new(source: Arc<dyn ProjectStatusSource>, clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self {
            source,
            clock,
            ttl_ms: ttl.as_millis() as u64,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Whether events for `project_id` may be ingested.
    ///
    /// Cached answers are trusted for age < TTL; at age >= TTL the entry is
    /// stale and the source is queried again. A source failure propagates —
    /// there is no stale-on-error fallback, and the caller decides what an
    /// indeterminate admission means.
    pub async fn is_project_active(&self, project_id: &str) -> anyhow::Result<bool> {
        let now = self.clock.now_millis();

        // Fast path: fresh cache hit.
        {
            let entries = self.entries.read().await;
            if let Some(entry) = entries.get(project_id) {
                if now.saturating_sub(entry.stored_at_ms) < self.ttl_ms {
                    return Ok(entry.active);
                }
            }
        }

        // Slow path: first lookup or stale entry.
        let status = self.source.query_status(project_id).await?;
        let active = status.allows_ingest();

        let mut entries = self.entries.write().await;
        entries.insert(
            project_id.to_string(),
            CacheEntry {
                active,
                stored_at_ms: now,
            },
        );
        Ok(active)
    }
}
