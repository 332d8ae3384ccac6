//! Upstream inference service.
//!
//! - [`payload`]: Request body construction and prompt strategies
//! - [`client`]: The backend trait and its Hugging Face HTTP implementation

pub mod client;
pub mod payload;
