//! Conversion from inference API output to OpenAI chat-completion envelopes.
//!
//! Nothing here fails: an upstream body that carries no recognisable text
//! becomes an empty completion.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::server::openai_api::Role;

/// Token counts the inference API does not report.
pub const UNKNOWN_TOKEN_COUNT: i64 = -1;

/// Shape of a non-streaming upstream body.
#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamGeneration {
    /// `{"generated_text": "..."}`
    Object { generated_text: String },
    /// `[{"generated_text": "..."}, ...]`, first element only.
    Array { generated_text: String },
    /// A bare string, either a JSON string or a non-JSON body.
    Text(String),
    /// Anything else.
    Unrecognized,
}

impl UpstreamGeneration {
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(map) => match map.get("generated_text").and_then(Value::as_str) {
                Some(text) => Self::Object {
                    generated_text: text.to_owned(),
                },
                None => Self::Unrecognized,
            },
            Value::Array(items) => match items
                .first()
                .and_then(|first| first.get("generated_text"))
                .and_then(Value::as_str)
            {
                Some(text) => Self::Array {
                    generated_text: text.to_owned(),
                },
                None => Self::Unrecognized,
            },
            Value::String(text) => Self::Text(text),
            _ => Self::Unrecognized,
        }
    }

    /// Parse a complete response body. Bodies that are not JSON are kept as text.
    pub fn from_body(body: &[u8]) -> Self {
        match serde_json::from_slice::<Value>(body) {
            Ok(value) => Self::from_value(value),
            Err(_) => Self::Text(String::from_utf8_lossy(body).into_owned()),
        }
    }

    pub fn generated_text(&self) -> &str {
        match self {
            Self::Object { generated_text } | Self::Array { generated_text } => generated_text,
            Self::Text(text) => text,
            Self::Unrecognized => "",
        }
    }
}

/// Chat completion response (non-streaming).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionResponse {
    pub id: String,
    pub object: String,
    pub created: u64,
    pub model: String,
    pub choices: Vec<ChatChoice>,
    pub usage: Usage,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatChoice {
    pub index: usize,
    pub message: AssistantMessage,
    pub finish_reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssistantMessage {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub total_tokens: i64,
}

impl Usage {
    pub fn unknown() -> Self {
        Self {
            prompt_tokens: UNKNOWN_TOKEN_COUNT,
            completion_tokens: UNKNOWN_TOKEN_COUNT,
            total_tokens: UNKNOWN_TOKEN_COUNT,
        }
    }
}

/// Streaming chat completion chunk (OpenAI-compatible).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionChunk {
    pub id: String,
    pub object: String,
    pub created: u64,
    pub model: String,
    pub choices: Vec<ChunkChoice>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkChoice {
    pub index: usize,
    pub delta: ChunkDelta,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkDelta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

fn completion_id() -> String {
    format!("chatcmpl-{}", Uuid::new_v4())
}

fn unix_now() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}

/// Wrap a full upstream generation as a `chat.completion`.
pub fn to_completion(upstream: &UpstreamGeneration, model: &str) -> ChatCompletionResponse {
    ChatCompletionResponse {
        id: completion_id(),
        object: "chat.completion".to_string(),
        created: unix_now(),
        model: model.to_string(),
        choices: vec![ChatChoice {
            index: 0,
            message: AssistantMessage {
                role: Role::Assistant,
                content: upstream.generated_text().to_string(),
            },
            finish_reason: "stop".to_string(),
        }],
        usage: Usage::unknown(),
    }
}

/// Wrap one raw stream fragment as a `chat.completion.chunk`.
pub fn to_chunk(fragment: &str, model: &str) -> ChatCompletionChunk {
    ChatCompletionChunk {
        id: completion_id(),
        object: "chat.completion.chunk".to_string(),
        created: unix_now(),
        model: model.to_string(),
        choices: vec![ChunkChoice {
            index: 0,
            delta: ChunkDelta {
                role: Some(Role::Assistant),
                content: Some(fragment.to_string()),
            },
            finish_reason: None,
        }],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extracts_object_field() {
        let up = UpstreamGeneration::from_value(json!({"generated_text": "hello"}));
        assert_eq!(up.generated_text(), "hello");
        assert!(matches!(up, UpstreamGeneration::Object { .. }));
    }

    #[test]
    fn test_extracts_first_array_element() {
        let up = UpstreamGeneration::from_value(json!([
            {"generated_text": "first"},
            {"generated_text": "second"}
        ]));
        assert_eq!(up.generated_text(), "first");
    }

    #[test]
    fn test_malformed_payloads_degrade_to_empty() {
        for value in [
            json!({}),
            json!({"generated_text": 42}),
            json!([]),
            json!([{"text": "nope"}]),
            json!(null),
            json!(3.5),
        ] {
            let up = UpstreamGeneration::from_value(value);
            assert_eq!(up.generated_text(), "");
        }
    }

    #[test]
    fn test_raw_text_body() {
        let up = UpstreamGeneration::from_body(b"plain words");
        assert_eq!(up, UpstreamGeneration::Text("plain words".to_string()));

        let up = UpstreamGeneration::from_body(br#""quoted""#);
        assert_eq!(up.generated_text(), "quoted");
    }

    #[test]
    fn test_completion_envelope() {
        let up = UpstreamGeneration::from_body(br#"[{"generated_text":"Rust is a language."}]"#);
        let resp = to_completion(&up, "google/gemma-2-2b-it");
        let json = serde_json::to_value(&resp).unwrap();

        assert!(resp.id.starts_with("chatcmpl-"));
        assert_eq!(json["object"], "chat.completion");
        assert_eq!(json["model"], "google/gemma-2-2b-it");
        assert_eq!(json["choices"][0]["index"], 0);
        assert_eq!(json["choices"][0]["message"]["role"], "assistant");
        assert_eq!(json["choices"][0]["message"]["content"], "Rust is a language.");
        assert_eq!(json["choices"][0]["finish_reason"], "stop");
        assert_eq!(json["usage"]["prompt_tokens"], -1);
        assert_eq!(json["usage"]["completion_tokens"], -1);
        assert_eq!(json["usage"]["total_tokens"], -1);
    }

    #[test]
    fn test_completion_is_idempotent_modulo_id_and_time() {
        let up = UpstreamGeneration::from_value(json!({"generated_text": "same"}));
        let a = to_completion(&up, "m");
        let b = to_completion(&up, "m");
        assert_eq!(a.choices, b.choices);
        assert_eq!(a.usage, b.usage);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_chunk_envelope() {
        let chunk = to_chunk("{\"partial", "m");
        let json = serde_json::to_value(&chunk).unwrap();
        assert_eq!(json["object"], "chat.completion.chunk");
        assert_eq!(json["choices"][0]["delta"]["role"], "assistant");
        assert_eq!(json["choices"][0]["delta"]["content"], "{\"partial");
        assert!(json["choices"][0]["finish_reason"].is_null());
        assert!(json.get("usage").is_none());
    }
}
