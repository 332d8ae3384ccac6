//! OpenAI-compatible HTTP API.
//!
//! Implements the subset of the OpenAI API this bridge serves:
//! - POST /v1/chat/completions
//! - GET /health
//! - OPTIONS on any path (CORS preflight)

use std::sync::Arc;
use std::time::Instant;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

use crate::config::Config;
use crate::server::error::{ApiError, ErrorResponse};
use crate::server::middleware;
use crate::server::streaming::stream_chat_completion;
use crate::server::transcoder::{to_completion, UpstreamGeneration};
use crate::upstream::client::InferenceBackend;
use crate::upstream::payload::UpstreamPayload;

/// Application state shared across handlers.
pub struct AppState {
    pub config: Arc<Config>,
    pub backend: Arc<dyn InferenceBackend>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(config: Arc<Config>, backend: Arc<dyn InferenceBackend>) -> Self {
        Self {
            config,
            backend,
            start_time: Instant::now(),
        }
    }
}

/// Build the axum router with all API routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    let router = Router::new()
        .route("/v1/chat/completions", post(chat_completions))
        .route("/health", get(health))
        .fallback(not_found)
        .with_state(state);

    middleware::apply(router).layer(TraceLayer::new_for_http())
}

// ─── Request/Response Types ────────────────────────────────────────────────

/// Chat completion request (OpenAI-compatible).
#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionRequest {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub top_p: Option<f64>,
    #[serde(default)]
    pub frequency_penalty: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// Health check response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
    pub token_configured: bool,
    pub default_model: String,
    pub uptime_secs: u64,
}

impl ChatCompletionRequest {
    fn validate(&self) -> Result<(), ApiError> {
        if self.messages.is_empty() {
            return Err(ApiError::InvalidRequest(
                "`messages` must be a non-empty array".to_string(),
            ));
        }
        if let Some(model) = &self.model {
            validate_model_id(model)?;
        }
        Ok(())
    }

    /// Requested model, or the configured default.
    fn resolved_model(&self, config: &Config) -> String {
        self.model
            .as_deref()
            .filter(|m| !m.is_empty())
            .unwrap_or(&config.upstream.default_model)
            .to_string()
    }
}

/// Model ids become a URL path segment; keep them to the hub's id alphabet.
fn validate_model_id(model: &str) -> Result<(), ApiError> {
    let allowed = |c: char| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/' | ':');
    if model.contains("..") || !model.chars().all(allowed) {
        return Err(ApiError::InvalidRequest(format!("invalid model id: {model:?}")));
    }
    Ok(())
}

// ─── Route Handlers ────────────────────────────────────────────────────────

async fn chat_completions(
    State(state): State<Arc<AppState>>,
    body: Result<Json<ChatCompletionRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(req) = body?;
    req.validate()?;

    let request_id = Uuid::new_v4().to_string();
    let model = req.resolved_model(&state.config);

    info!(
        request_id = request_id,
        model = model,
        messages = req.messages.len(),
        stream = req.stream,
        "Chat completion request"
    );

    let payload = UpstreamPayload::from_request(&req, state.config.upstream.prompt_strategy);

    if req.stream {
        let backend = state.backend.clone();
        let upstream_model = model.clone();
        let upstream =
            async move { backend.generate_stream(&upstream_model, &payload).await };
        Ok(stream_chat_completion(upstream, model, request_id))
    } else {
        let body = state.backend.generate(&model, &payload).await?;
        let generation = UpstreamGeneration::from_body(&body);
        Ok(Json(to_completion(&generation, &model)).into_response())
    }
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        token_configured: state.config.upstream.token_configured(),
        default_model: state.config.upstream.default_model.clone(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

async fn not_found() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse::new("Not found", "invalid_request_error")),
    )
}
