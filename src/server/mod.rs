//! HTTP server providing an OpenAI-compatible API.
//!
//! - [`openai_api`]: Request/response types, route handlers and the router
//! - [`transcoder`]: Upstream payload to OpenAI envelope conversion
//! - [`streaming`]: SSE relay from the upstream byte stream to the client
//! - [`middleware`]: CORS and panic handling
//! - [`error`]: API error taxonomy

pub mod error;
pub mod middleware;
pub mod openai_api;
pub mod streaming;
pub mod transcoder;
