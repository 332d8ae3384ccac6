//! Upstream request body construction.
//!
//! Maps an OpenAI chat request onto the text-generation payload the inference
//! API expects. How the message history becomes `inputs` is decided by the
//! configured [`PromptStrategy`].

use serde::Serialize;

use crate::config::PromptStrategy;
use crate::server::openai_api::{ChatCompletionRequest, ChatMessage, Role};

pub const DEFAULT_MAX_NEW_TOKENS: u32 = 500;
pub const DEFAULT_TEMPERATURE: f64 = 0.7;
pub const DEFAULT_TOP_P: f64 = 1.0;

/// Body of a text-generation call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpstreamPayload {
    pub inputs: PromptInput,
    pub stream: bool,
    pub parameters: GenerationParameters,
}

/// The `inputs` field: a prompt string, or the raw history for passthrough.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PromptInput {
    Text(String),
    Messages(Vec<ChatMessage>),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationParameters {
    pub max_new_tokens: u32,
    pub temperature: f64,
    pub top_p: f64,
    pub repetition_penalty: f64,
}

impl GenerationParameters {
    /// Sampling parameters with defaults for anything the client left out.
    pub fn from_request(req: &ChatCompletionRequest) -> Self {
        Self {
            max_new_tokens: req.max_tokens.unwrap_or(DEFAULT_MAX_NEW_TOKENS),
            temperature: req.temperature.unwrap_or(DEFAULT_TEMPERATURE),
            top_p: req.top_p.unwrap_or(DEFAULT_TOP_P),
            repetition_penalty: 1.0 + req.frequency_penalty.unwrap_or(0.0),
        }
    }
}

impl PromptStrategy {
    /// Turn the message history into upstream `inputs`.
    pub fn build_inputs(&self, messages: &[ChatMessage]) -> PromptInput {
        match self {
            PromptStrategy::LastMessage => PromptInput::Text(
                messages
                    .last()
                    .map(|m| m.content.clone())
                    .unwrap_or_default(),
            ),
            PromptStrategy::RoleConcatenated => PromptInput::Text(role_transcript(messages)),
            PromptStrategy::Passthrough => PromptInput::Messages(messages.to_vec()),
        }
    }
}

/// `System: ...\nHuman: ...\nAssistant: ...\nAssistant:`
fn role_transcript(messages: &[ChatMessage]) -> String {
    let mut prompt = String::new();
    for m in messages {
        let label = match m.role {
            Role::System => "System",
            Role::User => "Human",
            Role::Assistant => "Assistant",
        };
        prompt.push_str(label);
        prompt.push_str(": ");
        prompt.push_str(&m.content);
        prompt.push('\n');
    }
    prompt.push_str("Assistant:");
    prompt
}

impl UpstreamPayload {
    pub fn from_request(req: &ChatCompletionRequest, strategy: PromptStrategy) -> Self {
        Self {
            inputs: strategy.build_inputs(&req.messages),
            stream: req.stream,
            parameters: GenerationParameters::from_request(req),
        }
    }
}
