use std::time::Duration;

use thiserror::Error;

/// Configuration failures surfaced at process start, before any request is
/// served. Missing required values are collected so one restart fixes all of
/// them, not just the first.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required environment variables: {}", .0.join(", "))]
    MissingVars(Vec<&'static str>),

    #[error("invalid value for {var}: {reason}")]
    Invalid { var: &'static str, reason: String },
}

/// Server configuration, loaded once at startup from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    /// TTL of the project activity cache.
    pub project_cache_ttl_ms: u64,
    /// Base URL of the dashboard's internal project-status API. When absent
    /// the server runs with the allow-all status source (development mode).
    pub control_api_url: Option<String>,
    pub control_api_token: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable lookup. Tests pass a map; production
    /// goes through [`Config::from_env`]. Empty values count as unset.
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let port = match get("TALLY_PORT") {
            Some(raw) => raw.parse().map_err(|e| ConfigError::Invalid {
                var: "TALLY_PORT",
                reason: format!("{e}"),
            })?,
            None => 3000,
        };

        let project_cache_ttl_ms = match get("TALLY_PROJECT_CACHE_TTL_MS") {
            Some(raw) => raw.parse().map_err(|e| ConfigError::Invalid {
                var: "TALLY_PROJECT_CACHE_TTL_MS",
                reason: format!("{e}"),
            })?,
            None => 30_000,
        };

        let control_api_url = get("CONTROL_API_URL");
        let control_api_token = get("CONTROL_API_TOKEN");
        if control_api_url.is_some() && control_api_token.is_none() {
            return Err(ConfigError::MissingVars(vec!["CONTROL_API_TOKEN"]));
        }

        Ok(Self {
            port,
            project_cache_ttl_ms,
            control_api_url,
            control_api_token,
        })
    }

    pub fn project_cache_ttl(&self) -> Duration {
        Duration::from_millis(self.project_cache_ttl_ms)
    }
}
