//! End-to-end tests of the HTTP surface against an in-memory backend.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use bytes::Bytes;
use futures::{stream, StreamExt};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use hf_openai_bridge::config::{Config, PromptStrategy};
use hf_openai_bridge::server::error::ApiError;
use hf_openai_bridge::server::openai_api::{build_router, AppState};
use hf_openai_bridge::upstream::client::{upstream_status_error, ByteStream, InferenceBackend};
use hf_openai_bridge::upstream::payload::{PromptInput, UpstreamPayload};

/// Canned backend that counts calls and remembers the last request.
struct MockBackend {
    body: &'static [u8],
    chunks: Vec<&'static [u8]>,
    fail_with: Option<StatusCode>,
    calls: AtomicUsize,
    last: Mutex<Option<(String, UpstreamPayload)>>,
}

impl MockBackend {
    fn new() -> Self {
        Self {
            body: br#"[{"generated_text":"Rust is a systems language."}]"#,
            chunks: Vec::new(),
            fail_with: None,
            calls: AtomicUsize::new(0),
            last: Mutex::new(None),
        }
    }

    fn with_chunks(chunks: Vec<&'static [u8]>) -> Self {
        Self {
            chunks,
            ..Self::new()
        }
    }

    fn failing(status: StatusCode) -> Self {
        Self {
            fail_with: Some(status),
            ..Self::new()
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn last_request(&self) -> (String, UpstreamPayload) {
        self.last.lock().unwrap().clone().expect("backend was not called")
    }

    fn record(&self, model: &str, payload: &UpstreamPayload) -> Result<(), ApiError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last.lock().unwrap() = Some((model.to_string(), payload.clone()));
        match self.fail_with {
            Some(status) => Err(upstream_status_error(status, r#"{"error":"model overloaded"}"#)),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl InferenceBackend for MockBackend {
    async fn generate(&self, model: &str, payload: &UpstreamPayload) -> Result<Bytes, ApiError> {
        self.record(model, payload)?;
        Ok(Bytes::from_static(self.body))
    }

    async fn generate_stream(
        &self,
        model: &str,
        payload: &UpstreamPayload,
    ) -> Result<ByteStream, ApiError> {
        self.record(model, payload)?;
        let items: Vec<Result<Bytes, ApiError>> = self
            .chunks
            .iter()
            .map(|c| Ok(Bytes::from_static(*c)))
            .collect();
        Ok(stream::iter(items).boxed())
    }
}

fn app_with(backend: Arc<MockBackend>, config: Config) -> Router {
    let state = Arc::new(AppState::new(Arc::new(config), backend));
    build_router(state)
}

fn app(backend: Arc<MockBackend>) -> Router {
    app_with(backend, Config::default())
}

fn chat_request(body: Value) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri("/v1/chat/completions")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_bytes(resp: axum::response::Response) -> Bytes {
    resp.into_body().collect().await.unwrap().to_bytes()
}

async fn body_json(resp: axum::response::Response) -> Value {
    serde_json::from_slice(&body_bytes(resp).await).unwrap()
}

/// `data:` payloads of an SSE body, in order.
async fn sse_data(resp: axum::response::Response) -> Vec<String> {
    let text = String::from_utf8(body_bytes(resp).await.to_vec()).unwrap();
    text.split("\n\n")
        .filter_map(|frame| frame.strip_prefix("data: "))
        .map(str::to_owned)
        .collect()
}

#[tokio::test]
async fn non_streaming_returns_transcoded_completion() {
    let backend = Arc::new(MockBackend::new());
    let resp = app(backend.clone())
        .oneshot(chat_request(json!({
            "messages": [{"role": "user", "content": "What is Rust?"}]
        })))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()[header::CONTENT_TYPE], "application/json");
    let json = body_json(resp).await;

    assert_eq!(json["object"], "chat.completion");
    assert_eq!(json["model"], "google/gemma-2-2b-it");
    assert_eq!(json["choices"][0]["message"]["role"], "assistant");
    assert_eq!(
        json["choices"][0]["message"]["content"],
        "Rust is a systems language."
    );
    assert_eq!(json["choices"][0]["finish_reason"], "stop");
    assert_eq!(json["usage"]["total_tokens"], -1);
    assert_eq!(backend.calls(), 1);

    let (model, payload) = backend.last_request();
    assert_eq!(model, "google/gemma-2-2b-it");
    assert_eq!(payload.inputs, PromptInput::Text("What is Rust?".to_string()));
    assert!(!payload.stream);
    assert_eq!(payload.parameters.max_new_tokens, 500);
}

#[tokio::test]
async fn empty_or_missing_messages_are_rejected_without_upstream_call() {
    for body in [json!({"messages": []}), json!({"model": "org/model"})] {
        let backend = Arc::new(MockBackend::new());
        let resp = app(backend.clone()).oneshot(chat_request(body)).await.unwrap();

        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let json = body_json(resp).await;
        assert_eq!(json["error"]["type"], "invalid_request_error");
        assert_eq!(backend.calls(), 0);
    }
}

#[tokio::test]
async fn malformed_json_is_an_invalid_request() {
    let backend = Arc::new(MockBackend::new());
    let req = Request::builder()
        .method(Method::POST)
        .uri("/v1/chat/completions")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let resp = app(backend.clone()).oneshot(req).await.unwrap();

    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(resp).await["error"]["type"], "invalid_request_error");
    assert_eq!(backend.calls(), 0);
}

#[tokio::test]
async fn upstream_error_is_surfaced_with_status_and_body() {
    let backend = Arc::new(MockBackend::failing(StatusCode::SERVICE_UNAVAILABLE));
    let resp = app(backend.clone())
        .oneshot(chat_request(json!({
            "messages": [{"role": "user", "content": "hi"}]
        })))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    let json = body_json(resp).await;
    assert_eq!(json["error"]["type"], "upstream_error");
    let message = json["error"]["message"].as_str().unwrap();
    assert!(message.contains("Service Unavailable"));
    assert!(message.contains("model overloaded"));
}

#[tokio::test]
async fn streaming_relays_each_chunk_then_done() {
    let backend = Arc::new(MockBackend::with_chunks(vec![
        b"Once".as_slice(),
        b" upon a".as_slice(),
        b" {\"time".as_slice(),
    ]));
    let resp = app(backend.clone())
        .oneshot(chat_request(json!({
            "model": "org/streamer",
            "stream": true,
            "messages": [{"role": "user", "content": "Tell me a story"}]
        })))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()[header::CONTENT_TYPE], "text/event-stream");
    assert_eq!(resp.headers()[header::CACHE_CONTROL], "no-cache");
    assert_eq!(resp.headers()[header::CONNECTION], "keep-alive");

    let events = sse_data(resp).await;
    assert_eq!(events.len(), 4);

    let contents: Vec<String> = events[..3]
        .iter()
        .map(|e| {
            let chunk: Value = serde_json::from_str(e).unwrap();
            assert_eq!(chunk["object"], "chat.completion.chunk");
            assert_eq!(chunk["model"], "org/streamer");
            assert!(chunk["choices"][0]["finish_reason"].is_null());
            chunk["choices"][0]["delta"]["content"]
                .as_str()
                .unwrap()
                .to_owned()
        })
        .collect();
    assert_eq!(contents, ["Once", " upon a", " {\"time"]);
    assert_eq!(events[3], "[DONE]");
    assert_eq!(events.iter().filter(|e| *e == "[DONE]").count(), 1);

    let (model, payload) = backend.last_request();
    assert_eq!(model, "org/streamer");
    assert!(payload.stream);
}

#[tokio::test]
async fn streaming_upstream_failure_is_reported_in_band() {
    let backend = Arc::new(MockBackend::failing(StatusCode::BAD_GATEWAY));
    let resp = app(backend.clone())
        .oneshot(chat_request(json!({
            "stream": true,
            "messages": [{"role": "user", "content": "hi"}]
        })))
        .await
        .unwrap();

    // Headers were committed before the upstream call failed.
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()[header::CONTENT_TYPE], "text/event-stream");

    let events = sse_data(resp).await;
    assert_eq!(events.len(), 1);
    let event: Value = serde_json::from_str(&events[0]).unwrap();
    assert!(event["error"].as_str().unwrap().contains("Bad Gateway"));
    assert_eq!(backend.calls(), 1);
}

#[tokio::test]
async fn role_concatenated_strategy_builds_transcript() {
    let backend = Arc::new(MockBackend::new());
    let mut config = Config::default();
    config.upstream.prompt_strategy = PromptStrategy::RoleConcatenated;

    let resp = app_with(backend.clone(), config)
        .oneshot(chat_request(json!({
            "messages": [
                {"role": "system", "content": "Be terse."},
                {"role": "user", "content": "Hi"}
            ]
        })))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let (_, payload) = backend.last_request();
    assert_eq!(
        payload.inputs,
        PromptInput::Text("System: Be terse.\nHuman: Hi\nAssistant:".to_string())
    );
}

#[tokio::test]
async fn options_preflight_returns_cors_headers() {
    let backend = Arc::new(MockBackend::new());
    let req = Request::builder()
        .method(Method::OPTIONS)
        .uri("/v1/chat/completions")
        .header(header::ORIGIN, "https://example.com")
        .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
        .body(Body::empty())
        .unwrap();
    let resp = app(backend.clone()).oneshot(req).await.unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let h = resp.headers();
    assert_eq!(h[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
    assert_eq!(h[header::ACCESS_CONTROL_ALLOW_METHODS], "POST, GET, OPTIONS");
    assert_eq!(
        h[header::ACCESS_CONTROL_ALLOW_HEADERS],
        "Content-Type, Authorization"
    );
    assert_eq!(backend.calls(), 0);
}

#[tokio::test]
async fn error_responses_carry_cors_headers() {
    let backend = Arc::new(MockBackend::new());
    let resp = app(backend)
        .oneshot(chat_request(json!({"messages": []})))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(resp.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
}

#[tokio::test]
async fn health_reports_ok_with_iso_timestamp() {
    let backend = Arc::new(MockBackend::failing(StatusCode::SERVICE_UNAVAILABLE));
    let req = Request::get("/health").body(Body::empty()).unwrap();
    let resp = app(backend.clone()).oneshot(req).await.unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
    let json = body_json(resp).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["token_configured"], false);
    assert_eq!(json["default_model"], "google/gemma-2-2b-it");

    let ts = json["timestamp"].as_str().unwrap();
    assert!(chrono::DateTime::parse_from_rfc3339(ts).is_ok());
    assert_eq!(backend.calls(), 0);
}

#[tokio::test]
async fn unknown_route_is_not_found() {
    let backend = Arc::new(MockBackend::new());
    let req = Request::get("/v1/nope").body(Body::empty()).unwrap();
    let resp = app(backend).oneshot(req).await.unwrap();

    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert_eq!(resp.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
}
