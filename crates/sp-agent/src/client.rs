//! HTTP forwarder from the agent to the central service.
//!
//! A thin typed wrapper over `reqwest`: bearer header when configured,
//! optional gzip-compressed bodies, a hard deadline on every request, and a
//! mapping from responses back onto the shared error taxonomy. Transport
//! failures (connect, timeout) come back as retryable kinds so the flush
//! cycle re-queues instead of dropping.

use std::io::Write;
use std::time::Duration;

use flate2::Compression;
use flate2::write::GzEncoder;
use reqwest::header;
use serde::Serialize;
use serde_json::{Map, Value};
use session_pulse_core::config::AgentConfig;
use session_pulse_core::wire::{
    CrashRequest, CreateSessionRequest, CreateSessionResponse, ErrorBody, EventBody, MetricBody,
};
use session_pulse_core::{ApiError, SessionRecord};

/// Client for the central service API.
pub struct ServiceClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    compress: bool,
}

impl ServiceClient {
    /// Build a client from the agent configuration.
    pub fn new(config: &AgentConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .danger_accept_invalid_certs(config.accept_invalid_certs())
            .build()?;
        Ok(Self {
            http,
            base_url: config.server_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            compress: config.enable_compression,
        })
    }

    pub async fn create_session(&self, req: &CreateSessionRequest) -> Result<String, ApiError> {
        let response = self.post("/api/sessions", req).await?;
        let created: CreateSessionResponse = Self::read_json(response).await?;
        Ok(created.id)
    }

    pub async fn update_state(&self, id: &str, diff: &Map<String, Value>) -> Result<(), ApiError> {
        let response = self.post(&format!("/api/sessions/{id}/state"), diff).await?;
        Self::read_ack(response).await
    }

    pub async fn log_event(&self, id: &str, event: &EventBody) -> Result<(), ApiError> {
        let response = self
            .post(&format!("/api/sessions/{id}/events"), event)
            .await?;
        Self::read_ack(response).await
    }

    pub async fn log_metric(&self, id: &str, metric: &MetricBody) -> Result<(), ApiError> {
        let response = self
            .post(&format!("/api/sessions/{id}/metrics"), metric)
            .await?;
        Self::read_ack(response).await
    }

    pub async fn heartbeat(&self, id: &str) -> Result<(), ApiError> {
        let response = self
            .post(&format!("/api/sessions/{id}/heartbeat"), &Value::Object(Map::new()))
            .await?;
        Self::read_ack(response).await
    }

    pub async fn end(&self, id: &str) -> Result<(), ApiError> {
        let response = self
            .post(&format!("/api/sessions/{id}/end"), &Value::Object(Map::new()))
            .await?;
        Self::read_ack(response).await
    }

    pub async fn mark_crashed(&self, id: &str, reason: &str) -> Result<(), ApiError> {
        let body = CrashRequest {
            reason: Some(reason.to_string()),
        };
        let response = self.post(&format!("/api/sessions/{id}/crash"), &body).await?;
        Self::read_ack(response).await
    }

    pub async fn get_session(&self, id: &str) -> Result<SessionRecord, ApiError> {
        let response = self.get(&format!("/api/sessions/{id}")).await?;
        Self::read_json(response).await
    }

    pub async fn list_sessions(&self) -> Result<Vec<SessionRecord>, ApiError> {
        let response = self.get("/api/data/sessions").await?;
        Self::read_json(response).await
    }

    // ── Internals ────────────────────────────────────────────────────────────

    async fn post<T: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<reqwest::Response, ApiError> {
        let json = serde_json::to_vec(body)
            .map_err(|e| ApiError::Internal(format!("failed to encode request body: {e}")))?;

        let mut builder = self
            .http
            .post(format!("{}{path}", self.base_url))
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        builder = if self.compress {
            builder
                .header(header::CONTENT_ENCODING, "gzip")
                .body(gzip(&json)?)
        } else {
            builder.body(json)
        };

        builder.send().await.map_err(transport_err)
    }

    async fn get(&self, path: &str) -> Result<reqwest::Response, ApiError> {
        let mut builder = self.http.get(format!("{}{path}", self.base_url));
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        builder.send().await.map_err(transport_err)
    }

    async fn read_ack(response: reqwest::Response) -> Result<(), ApiError> {
        Self::check_status(response).await?;
        Ok(())
    }

    async fn read_json<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ApiError> {
        let response = Self::check_status(response).await?;
        response
            .json()
            .await
            .map_err(|e| ApiError::Internal(format!("failed to decode response body: {e}")))
    }

    /// Pass 2xx through; map everything else back onto the taxonomy, using
    /// the wire error body when present and the status code otherwise.
    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let fallback = match status.as_u16() {
            400 => ApiError::InvalidInput(format!("service rejected request ({status})")),
            401 => ApiError::Unauthorized,
            404 => ApiError::NotFound("unknown session".to_string()),
            409 => ApiError::Terminal("session is terminal".to_string()),
            _ => ApiError::Internal(format!("service returned {status}")),
        };
        match response.json::<ErrorBody>().await {
            Ok(body) => Err(body.into_api_error()),
            Err(_) => Err(fallback),
        }
    }
}

/// Connection and timeout failures are transient: the flush cycle retries.
fn transport_err(e: reqwest::Error) -> ApiError {
    ApiError::Internal(format!("request failed: {e}"))
}

fn gzip(data: &[u8]) -> Result<Vec<u8>, ApiError> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .and_then(|_| encoder.finish())
        .map_err(|e| ApiError::Internal(format!("failed to gzip request body: {e}")))
}
