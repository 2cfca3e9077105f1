//! HTTP connector for OpenAI-compatible chat completion endpoints.

use std::time::Duration;

use futures::StreamExt as _;
use tracing::debug;

use crate::connector::{ByteStream, Connector};
use crate::errors::{AssistantError, ConnectError};
use crate::request::CompletionRequest;

/// Configuration for the HTTP completion endpoint.
#[derive(Clone, Debug)]
pub struct EndpointConfig {
    /// API key used for bearer auth.
    pub api_key: String,
    /// Base URL of the OpenAI-compatible endpoint.
    ///
    /// Useful for proxies or local test servers.
    pub base_url: String,
    /// Timeout for establishing the connection. Streams themselves are
    /// unbounded here; idle reads are cut off per session.
    pub connect_timeout: Duration,
}

impl EndpointConfig {
    /// Creates a config with sensible defaults and a provided API key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: "https://api.openai.com".to_string(),
            connect_timeout: Duration::from_secs(30),
        }
    }

    /// Builds a config from `ASSISTANT_API_KEY`, honoring `ASSISTANT_API_URL`
    /// when set.
    pub fn from_env() -> Result<Self, AssistantError> {
        let api_key = std::env::var("ASSISTANT_API_KEY").unwrap_or_default();
        if api_key.trim().is_empty() {
            return Err(AssistantError::Config(
                "missing ASSISTANT_API_KEY for the completion endpoint".into(),
            ));
        }
        let mut config = Self::new(api_key);
        if let Ok(url) = std::env::var("ASSISTANT_API_URL") {
            if !url.trim().is_empty() {
                config.base_url = url;
            }
        }
        Ok(config)
    }

    /// Overrides the endpoint base URL (for proxies or test servers).
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Overrides the connection timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub(crate) fn completions_url(&self) -> String {
        format!(
            "{}/v1/chat/completions",
            self.base_url.trim_end_matches('/')
        )
    }
}

/// Connector that speaks the OpenAI-compatible streaming chat API.
pub struct HttpConnector {
    client: reqwest::Client,
    config: EndpointConfig,
}

impl HttpConnector {
    /// Creates a connector from explicit endpoint configuration.
    pub fn new(config: EndpointConfig) -> Result<Self, AssistantError> {
        if config.api_key.trim().is_empty() {
            return Err(AssistantError::Config(
                "endpoint config api_key must not be empty".into(),
            ));
        }
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| AssistantError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    /// Creates a connector using `ASSISTANT_API_KEY`.
    pub fn from_env() -> Result<Self, AssistantError> {
        Self::new(EndpointConfig::from_env()?)
    }
}

#[async_trait::async_trait]
impl Connector for HttpConnector {
    async fn connect(&self, request: &CompletionRequest) -> Result<ByteStream, ConnectError> {
        let url = self.config.completions_url();
        let body = build_request_body(request);
        debug!(model = %request.model, %url, "starting completion stream");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(&body)
            .send()
            .await
            .map_err(|e| ConnectError::Endpoint(format!("completion request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ConnectError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| ConnectError::Io(format!("streaming read failed: {e}"))));
        Ok(Box::pin(stream))
    }
}

pub(crate) fn build_request_body(request: &CompletionRequest) -> serde_json::Value {
    let mut body = serde_json::json!({
        "model": request.model,
        "messages": request.messages,
        "stream": true,
    });
    if let Some(temperature) = request.temperature {
        body["temperature"] = serde_json::json!(temperature);
    }
    if let Some(max_tokens) = request.max_tokens {
        body["max_tokens"] = serde_json::json!(max_tokens);
    }
    body
}
