use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use tracing::warn;

use tally_core::activity::{ProjectStatus, ProjectStatusSource};

/// Reports every project as active.
///
/// Selected when `CONTROL_API_URL` is unset so the server is usable out of
/// the box in development. Startup logs a warning when this source is active.
pub struct AllowAllStatusSource;

#[async_trait]
impl ProjectStatusSource for AllowAllStatusSource {
    async fn query_status(&self, _project_id: &str) -> anyhow::Result<ProjectStatus> {
        Ok(ProjectStatus::Active)
    }
}

/// Queries the dashboard's internal project-status API.
///
/// `GET {base_url}/internal/projects/{id}/status` with a bearer token,
/// expecting `{ "status": "active" | ... }`. The dashboard owns the
/// project and subscription records; this service only asks yes/no.
pub struct HttpStatusSource {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl HttpStatusSource {
    pub fn new(base_url: &str, token: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct StatusBody {
    status: String,
}

#[async_trait]
impl ProjectStatusSource for HttpStatusSource {
    async fn query_status(&self, project_id: &str) -> anyhow::Result<ProjectStatus> {
        let url = format!("{}/internal/projects/{}/status", self.base_url, project_id);
        let resp = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await
            .context("project status request failed")?;

        // A non-2xx here is indeterminate, not "inactive": a drop decision
        // must not be cached off a control-plane outage.
        if !resp.status().is_success() {
            warn!(project_id, status = %resp.status(), "Project status endpoint returned an error");
            anyhow::bail!("project status endpoint returned {}", resp.status());
        }

        let body: StatusBody = resp
            .json()
            .await
            .context("project status response parse failed")?;

        Ok(match body.status.as_str() {
            "active" => ProjectStatus::Active,
            _ => ProjectStatus::Inactive,
        })
    }
}
