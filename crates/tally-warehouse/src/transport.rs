use async_trait::async_trait;

/// Status and (on failure) body of one warehouse POST.
///
/// The body is only read for non-2xx responses; success responses are
/// acknowledged without parsing.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_server_error(&self) -> bool {
        self.status >= 500
    }
}

/// One NDJSON POST to the warehouse.
///
/// A trait seam so tests script responses without a network; production
/// uses [`ReqwestTransport`]. An `Err` means the request never produced an
/// HTTP status (DNS failure, connect timeout, connection reset).
#[async_trait]
pub trait EventsTransport: Send + Sync + 'static {
    async fn post_ndjson(
        &self,
        url: &str,
        token: &str,
        body: String,
    ) -> anyhow::Result<TransportResponse>;
}

/// Production transport over a shared [`reqwest::Client`].
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventsTransport for ReqwestTransport {
    async fn post_ndjson(
        &self,
        url: &str,
        token: &str,
        body: String,
    ) -> anyhow::Result<TransportResponse> {
        let resp = self
            .client
            .post(url)
            .bearer_auth(token)
            .header(reqwest::header::CONTENT_TYPE, "application/x-ndjson")
            .body(body)
            .send()
            .await?;

        let status = resp.status().as_u16();
        let body = if resp.status().is_success() {
            String::new()
        } else {
            resp.text().await.unwrap_or_default()
        };
        Ok(TransportResponse { status, body })
    }
}
