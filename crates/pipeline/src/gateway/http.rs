//! HTTP transport for the stage service

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, StatusCode};

use super::types::{AttemptError, StageEnvelope, StagePayload, StageTransport};
use crate::config::GatewayConfig;
use crate::workflow::Channel;

/// Stage service reached over HTTP with JSON bodies
pub struct HttpTransport {
    client: Client,
    chat_base_url: String,
    workflow_base_url: String,
    api_key: Option<String>,
}

impl HttpTransport {
    pub fn new(config: &GatewayConfig) -> Self {
        if config.api_key.is_none() {
            tracing::warn!("[GATEWAY] No stage service API key configured - STAGE_API_KEY not set");
        }

        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!("[GATEWAY] Falling back to default HTTP client: {}", e);
                Client::new()
            });

        Self {
            client,
            chat_base_url: config.chat_base_url.trim_end_matches('/').to_string(),
            workflow_base_url: config.workflow_base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        }
    }

    /// Target URL for a payload on a channel
    pub fn target(&self, channel: Channel, payload: &StagePayload) -> String {
        match channel {
            Channel::Chat => format!("{}/chat", self.chat_base_url),
            Channel::Workflow => format!(
                "{}/workflows/{}/run",
                self.workflow_base_url, payload.endpoint
            ),
        }
    }
}

/// Classify a non-success HTTP status.
///
/// 408, 429 and 5xx are worth another attempt; every other status is an
/// explicit rejection.
pub fn classify_status(status: StatusCode, body: &str) -> AttemptError {
    let message = if body.trim().is_empty() {
        status
            .canonical_reason()
            .unwrap_or("unknown status")
            .to_string()
    } else {
        extract_message(body)
    };

    if status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
    {
        AttemptError::Transport(format!("HTTP {}: {}", status.as_u16(), message))
    } else {
        AttemptError::Domain {
            code: status.as_u16().to_string(),
            message,
        }
    }
}

fn extract_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|json| {
            json.get("msg")
                .or_else(|| json.get("message"))
                .or_else(|| json.get("error"))
                .and_then(|m| m.as_str())
                .map(|m| m.to_string())
        })
        .unwrap_or_else(|| body.chars().take(500).collect())
}

fn classify_request_error(err: &reqwest::Error) -> AttemptError {
    if err.is_timeout() {
        AttemptError::Transport(format!("request timed out: {}", err))
    } else if err.is_connect() {
        AttemptError::Transport(format!("connection failed: {}", err))
    } else {
        AttemptError::Transport(format!("request failed: {}", err))
    }
}

#[async_trait]
impl StageTransport for HttpTransport {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn send(
        &self,
        channel: Channel,
        payload: &StagePayload,
    ) -> Result<serde_json::Value, AttemptError> {
        let target = self.target(channel, payload);
        let start = Instant::now();

        let mut request = self.client.post(&target).json(payload);
        if let Some(ref key) = self.api_key {
            request = request.bearer_auth(key);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(err) => {
                tracing::warn!(
                    method = "POST",
                    url = %target,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "[GATEWAY] Request failed: {}",
                    err
                );
                return Err(classify_request_error(&err));
            }
        };

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| classify_request_error(&e))?;

        tracing::info!(
            method = "POST",
            url = %target,
            status = status.as_u16(),
            duration_ms = start.elapsed().as_millis() as u64,
            "[GATEWAY] Stage service responded"
        );

        if !status.is_success() {
            return Err(classify_status(status, &body));
        }

        let envelope: StageEnvelope =
            serde_json::from_str(&body).map_err(|e| AttemptError::Domain {
                code: "MALFORMED_RESPONSE".to_string(),
                message: format!("Failed to parse stage response: {}", e),
            })?;

        envelope.into_result()
    }
}
