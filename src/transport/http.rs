use crate::config::TransportConfig;
use crate::error_kind::ErrorKind;
use crate::{Error, Result};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

/// Thin HTTP boundary over `reqwest`.
///
/// This is the single place where wire-level failures become classified
/// errors: every non-2xx response is converted into [`Error::Remote`] with
/// an [`ErrorKind`] derived from the status code, and failures that never
/// produced a response become [`Error::Transport`]. Nothing above this
/// layer inspects raw status codes.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    bearer_token: Option<String>,
}

impl HttpTransport {
    pub fn new(cfg: &TransportConfig) -> Result<Self> {
        cfg.validate()?;
        let client = reqwest::Client::builder()
            .timeout(cfg.timeout)
            .pool_max_idle_per_host(cfg.pool_max_idle_per_host)
            .pool_idle_timeout(Some(Duration::from_secs(90)))
            .build()
            .map_err(|e| Error::Transport(TransportError::Other(e.to_string())))?;
        Ok(Self {
            client,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            bearer_token: cfg.bearer_token.clone(),
        })
    }

    pub async fn get_json(&self, path: &str) -> Result<Value> {
        self.request_json(reqwest::Method::GET, path, None).await
    }

    pub async fn post_json(&self, path: &str, body: &Value) -> Result<Value> {
        self.request_json(reqwest::Method::POST, path, Some(body))
            .await
    }

    async fn request_json(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Value> {
        let url = format!("{}{}", self.base_url, path);
        let request_id = Uuid::new_v4().to_string();
        debug!(%method, %url, request_id = %request_id, "issuing request");

        let mut req = self
            .client
            .request(method, &url)
            .header("accept", "application/json")
            // Correlation id; the upstream may ignore it, but applications
            // can use it to link client and server logs.
            .header("x-request-id", request_id);
        if let Some(token) = &self.bearer_token {
            req = req.bearer_auth(token);
        }
        if let Some(body) = body {
            req = req.json(body);
        }

        let response = req
            .send()
            .await
            .map_err(|e| Error::Transport(TransportError::Http(e)))?;
        Self::classify(response).await
    }

    /// Convert a response into a value or a classified error.
    async fn classify(response: reqwest::Response) -> Result<Value> {
        let status = response.status();
        if status.is_success() {
            return response
                .json()
                .await
                .map_err(|e| Error::Transport(TransportError::Http(e)));
        }

        let retry_after_ms = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse::<u64>().ok())
            .map(|secs| secs.saturating_mul(1000));

        let code = status.as_u16();
        let message = match response.text().await {
            Ok(body) if !body.is_empty() => body,
            _ => status
                .canonical_reason()
                .unwrap_or("request failed")
                .to_string(),
        };

        Err(Error::Remote {
            status: code,
            kind: ErrorKind::from_status(code),
            message,
            retry_after_ms,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("transport error: {0}")]
    Other(String),
}
