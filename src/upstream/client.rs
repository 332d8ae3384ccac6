//! HTTP client for the Hugging Face Inference API.
//!
//! [`InferenceBackend`] is the seam between the request handler and the
//! network: production uses [`HfClient`], tests substitute an in-memory
//! backend.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Response, StatusCode};
use tracing::{debug, warn};

use crate::config::UpstreamConfig;
use crate::server::error::ApiError;
use crate::upstream::payload::UpstreamPayload;

/// Raw upstream body chunks, in arrival order.
pub type ByteStream = BoxStream<'static, Result<Bytes, ApiError>>;

/// A text-generation service addressed by model id.
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    /// Run a generation and return the complete response body.
    async fn generate(&self, model: &str, payload: &UpstreamPayload) -> Result<Bytes, ApiError>;

    /// Run a generation and return the response body as it arrives.
    ///
    /// Resolves once the upstream status line has been checked; errors before
    /// that point are returned here, later ones are yielded by the stream.
    async fn generate_stream(
        &self,
        model: &str,
        payload: &UpstreamPayload,
    ) -> Result<ByteStream, ApiError>;
}

/// reqwest-backed [`InferenceBackend`].
#[derive(Clone)]
pub struct HfClient {
    http: Client,
    config: UpstreamConfig,
}

impl HfClient {
    pub fn new(config: UpstreamConfig) -> anyhow::Result<Self> {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .user_agent(concat!("hf-openai-bridge/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { http, config })
    }

    /// POST the payload and fail on a non-success status.
    async fn send(&self, model: &str, payload: &UpstreamPayload) -> Result<Response, ApiError> {
        let url = self.config.model_url(model);
        debug!(url = %url, stream = payload.stream, "Dispatching upstream request");

        let mut request = self
            .http
            .post(&url)
            .header(CONTENT_TYPE, "application/json")
            .json(payload);
        if let Some(token) = self.config.token.as_deref() {
            request = request.header(AUTHORIZATION, format!("Bearer {token}"));
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = match response.text().await {
                Ok(body) => body,
                Err(e) => {
                    debug!(error = %e, "Failed to read upstream error body");
                    String::new()
                }
            };
            warn!(status = status.as_u16(), model, "Upstream returned an error status");
            return Err(upstream_status_error(status, &body));
        }
        Ok(response)
    }

    async fn with_timeout<T>(
        &self,
        fut: impl std::future::Future<Output = Result<T, ApiError>>,
    ) -> Result<T, ApiError> {
        let limit = self.config.request_timeout();
        tokio::time::timeout(limit, fut).await.map_err(|_| {
            ApiError::Transport(format!("timed out after {}s", limit.as_secs()))
        })?
    }
}

#[async_trait]
impl InferenceBackend for HfClient {
    async fn generate(&self, model: &str, payload: &UpstreamPayload) -> Result<Bytes, ApiError> {
        self.with_timeout(async {
            let response = self.send(model, payload).await?;
            Ok::<_, ApiError>(response.bytes().await?)
        })
        .await
    }

    async fn generate_stream(
        &self,
        model: &str,
        payload: &UpstreamPayload,
    ) -> Result<ByteStream, ApiError> {
        let response = self.with_timeout(self.send(model, payload)).await?;
        Ok(response.bytes_stream().map_err(ApiError::from).boxed())
    }
}

/// Build an upstream error from a non-success status and its body.
///
/// The inference API reports failures as `{"error": "..."}`; that message is
/// preferred over the raw body when present.
pub fn upstream_status_error(status: StatusCode, body: &str) -> ApiError {
    let status_text = status.canonical_reason().unwrap_or("Unknown Status");
    let detail = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_owned))
        .unwrap_or_else(|| body.trim().to_string());

    let message = if detail.is_empty() {
        status_text.to_string()
    } else {
        format!("{status_text}: {detail}")
    };

    ApiError::Upstream { status, message }
}
