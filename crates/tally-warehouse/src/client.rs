use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tracing::warn;

use tally_core::config::ConfigError;

use crate::transport::{EventsTransport, ReqwestTransport};

const DEFAULT_DATASOURCE: &str = "analytics_events";
const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_BASE_DELAY_MS: u64 = 200;

/// Retry policy for transient delivery failures.
///
/// `max_attempts` counts every attempt including the first; the delay before
/// attempt n+1 is `base_delay * 2^(n-1)`.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: Duration::from_millis(DEFAULT_BASE_DELAY_MS),
        }
    }
}

/// A batch that could not be delivered.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// Non-retryable response (4xx). The batch is malformed from the
    /// warehouse's perspective, or the token lacks append rights; retrying
    /// would not help.
    #[error("warehouse rejected batch with status {status}: {body}")]
    Rejected { status: u16, body: String },

    /// Server errors or transport failures on every attempt.
    #[error("warehouse unreachable after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },

    #[error("failed to serialize batch: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Serialize `records` as NDJSON: one compact JSON object per line, each
/// line terminated by `\n`, insertion order preserved.
pub fn to_ndjson<T: Serialize>(records: &[T]) -> Result<String, serde_json::Error> {
    let mut out = String::new();
    for record in records {
        out.push_str(&serde_json::to_string(record)?);
        out.push('\n');
    }
    Ok(out)
}

/// Client for `POST {api_url}/v0/events?name={datasource}&wait=true`.
///
/// `wait=true` makes Tinybird acknowledge only after the write is committed,
/// so a 2xx here means the batch is durable.
pub struct TinybirdClient {
    transport: Arc<dyn EventsTransport>,
    endpoint_url: String,
    token: String,
    retry: RetryPolicy,
}

impl std::fmt::Debug for TinybirdClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TinybirdClient")
            .field("endpoint_url", &self.endpoint_url)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl TinybirdClient {
    pub fn new(
        api_url: &str,
        token: &str,
        datasource: &str,
        retry: RetryPolicy,
    ) -> Result<Self, ConfigError> {
        Self::with_transport(api_url, token, datasource, retry, Arc::new(ReqwestTransport::new()))
    }

    pub fn with_transport(
        api_url: &str,
        token: &str,
        datasource: &str,
        retry: RetryPolicy,
        transport: Arc<dyn EventsTransport>,
    ) -> Result<Self, ConfigError> {
        let base = format!("{}/v0/events", api_url.trim_end_matches('/'));
        let mut url = reqwest::Url::parse(&base).map_err(|e| ConfigError::Invalid {
            var: "TINYBIRD_API_URL",
            reason: format!("{e}"),
        })?;
        url.query_pairs_mut()
            .append_pair("name", datasource)
            .append_pair("wait", "true");

        Ok(Self {
            transport,
            endpoint_url: url.to_string(),
            token: token.to_string(),
            retry,
        })
    }

    /// Construct from `TINYBIRD_*` environment variables.
    ///
    /// Fails immediately, naming every missing variable, rather than failing
    /// at first send.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable lookup; tests pass a map.
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let api_url = get("TINYBIRD_API_URL");
        let token = get("TINYBIRD_API_TOKEN");
        let mut missing = Vec::new();
        if api_url.is_none() {
            missing.push("TINYBIRD_API_URL");
        }
        if token.is_none() {
            missing.push("TINYBIRD_API_TOKEN");
        }
        if !missing.is_empty() {
            return Err(ConfigError::MissingVars(missing));
        }

        let datasource =
            get("TINYBIRD_DATASOURCE").unwrap_or_else(|| DEFAULT_DATASOURCE.to_string());

        let max_attempts = match get("TALLY_DELIVERY_MAX_ATTEMPTS") {
            Some(raw) => raw.parse().map_err(|e| ConfigError::Invalid {
                var: "TALLY_DELIVERY_MAX_ATTEMPTS",
                reason: format!("{e}"),
            })?,
            None => DEFAULT_MAX_ATTEMPTS,
        };
        let base_delay_ms = match get("TALLY_DELIVERY_BASE_DELAY_MS") {
            Some(raw) => raw.parse().map_err(|e| ConfigError::Invalid {
                var: "TALLY_DELIVERY_BASE_DELAY_MS",
                reason: format!("{e}"),
            })?,
            None => DEFAULT_BASE_DELAY_MS,
        };

        // Presence checked above.
        let api_url = api_url.unwrap_or_default();
        let token = token.unwrap_or_default();
        Self::new(
            &api_url,
            &token,
            &datasource,
            RetryPolicy {
                max_attempts,
                base_delay: Duration::from_millis(base_delay_ms),
            },
        )
    }

    /// Deliver `records` to the datasource, preserving order.
    ///
    /// 5xx responses and transport failures are transient: retried with
    /// exponential backoff up to `max_attempts` total attempts. 4xx responses
    /// fail without retry. A 2xx on any attempt resolves without reading the
    /// response body.
    pub async fn append_events<T: Serialize>(&self, records: &[T]) -> Result<(), DeliveryError> {
        let body = to_ndjson(records)?;

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let last_error = match self
                .transport
                .post_ndjson(&self.endpoint_url, &self.token, body.clone())
                .await
            {
                Ok(resp) if resp.is_success() => return Ok(()),
                Ok(resp) if resp.is_server_error() => {
                    format!("status {}: {}", resp.status, resp.body)
                }
                Ok(resp) => {
                    return Err(DeliveryError::Rejected {
                        status: resp.status,
                        body: resp.body,
                    })
                }
                Err(e) => format!("{e}"),
            };

            if attempt >= self.retry.max_attempts {
                return Err(DeliveryError::RetriesExhausted {
                    attempts: attempt,
                    last_error,
                });
            }

            let delay = self.retry.base_delay * 2u32.saturating_pow(attempt - 1);
            warn!(
                attempt,
                max_attempts = self.retry.max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %last_error,
                "Transient warehouse failure, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }
}
