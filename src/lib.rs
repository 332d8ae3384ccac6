//! hf-openai-bridge: OpenAI-compatible chat completions over the Hugging Face
//! Inference API.
//!
//! Accepts OpenAI-style `/v1/chat/completions` requests, forwards them as
//! text-generation calls to the inference API, and translates the answers
//! back, either as one JSON response or relayed chunk by chunk as
//! Server-Sent Events.

pub mod config;
pub mod server;
pub mod shutdown;
pub mod upstream;
