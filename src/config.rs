//! Runtime configuration for hf-openai-bridge.
//!
//! Every knob can be given as a command-line flag or through the environment
//! (a `.env` file in the working directory is honoured). The resolved
//! [`Config`] is immutable and shared by reference for the life of the process.

use std::fmt;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};

/// Default Hugging Face Inference API base; the model id is appended as a path.
pub const DEFAULT_UPSTREAM_URL: &str = "https://api-inference.huggingface.co/models";

/// Model used when a request does not name one.
pub const DEFAULT_MODEL: &str = "google/gemma-2-2b-it";

/// Command-line arguments.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "hf-openai-bridge",
    about = "OpenAI-compatible chat completions server backed by the Hugging Face Inference API"
)]
pub struct Cli {
    /// Interface to bind.
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// HTTP listen port.
    #[arg(short, long, env = "PORT", default_value_t = 8000)]
    pub port: u16,

    /// Bearer token forwarded to the inference API.
    #[arg(long, env = "HF_TOKEN", hide_env_values = true)]
    pub hf_token: Option<String>,

    /// Model used when the request omits `model`.
    #[arg(long, env = "DEFAULT_MODEL", default_value = DEFAULT_MODEL)]
    pub default_model: String,

    /// Base URL of the inference API.
    #[arg(long, env = "HF_API_BASE", default_value = DEFAULT_UPSTREAM_URL)]
    pub upstream_url: String,

    /// How chat messages are turned into the upstream `inputs` field.
    #[arg(long, env = "PROMPT_STRATEGY", value_enum, default_value_t = PromptStrategy::LastMessage)]
    pub prompt_strategy: PromptStrategy,

    /// Upper bound in seconds for obtaining an upstream response.
    #[arg(long, env = "REQUEST_TIMEOUT_SECS", default_value_t = 300)]
    pub request_timeout_secs: u64,

    /// Enable verbose logging.
    #[arg(short, long)]
    pub verbose: bool,

    /// Emit log lines as JSON objects instead of human-readable text.
    #[arg(long, env = "LOG_JSON")]
    pub log_json: bool,
}

/// Prompt construction variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum PromptStrategy {
    /// Send only the content of the final message.
    #[default]
    #[value(name = "last-message")]
    LastMessage,

    /// Concatenate the whole history as a role-annotated transcript.
    #[value(name = "role-concatenated")]
    RoleConcatenated,

    /// Forward the messages array unmodified.
    #[value(name = "passthrough")]
    Passthrough,
}

/// Top-level configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration.
    pub server: ServerConfig,

    /// Upstream inference API configuration.
    pub upstream: UpstreamConfig,
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind host.
    pub host: String,

    /// Bind port.
    pub port: u16,
}

impl ServerConfig {
    /// `host:port` suitable for `TcpListener::bind`.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

/// Inference API settings.
#[derive(Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Base URL; requests go to `{base_url}/{model}`.
    pub base_url: String,

    /// Bearer token. Never logged.
    #[serde(skip_serializing)]
    pub token: Option<String>,

    /// Model used when the request leaves `model` unset.
    pub default_model: String,

    /// Prompt construction variant.
    pub prompt_strategy: PromptStrategy,

    /// Request timeout in seconds.
    pub request_timeout_secs: u64,
}

impl UpstreamConfig {
    pub fn token_configured(&self) -> bool {
        self.token.as_deref().is_some_and(|t| !t.is_empty())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Full endpoint for a model id.
    pub fn model_url(&self, model: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), model)
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_UPSTREAM_URL.to_string(),
            token: None,
            default_model: DEFAULT_MODEL.to_string(),
            prompt_strategy: PromptStrategy::default(),
            request_timeout_secs: 300,
        }
    }
}

impl fmt::Debug for UpstreamConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpstreamConfig")
            .field("base_url", &self.base_url)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("default_model", &self.default_model)
            .field("prompt_strategy", &self.prompt_strategy)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("server", &self.server)
            .field("upstream", &self.upstream)
            .finish()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            upstream: UpstreamConfig::default(),
        }
    }
}

impl From<Cli> for Config {
    fn from(cli: Cli) -> Self {
        Self {
            server: ServerConfig {
                host: cli.host,
                port: cli.port,
            },
            upstream: UpstreamConfig {
                base_url: cli.upstream_url,
                token: cli.hf_token.filter(|t| !t.is_empty()),
                default_model: cli.default_model,
                prompt_strategy: cli.prompt_strategy,
                request_timeout_secs: cli.request_timeout_secs,
            },
        }
    }
}

impl Config {
    /// Load `.env` (if any), then parse flags and environment.
    pub fn load() -> (Cli, Self) {
        if let Err(e) = dotenvy::dotenv() {
            if !e.not_found() {
                // Subscriber is not up yet.
                eprintln!("warning: failed to read .env: {e}");
            }
        }
        let cli = Cli::parse();
        let config = Self::from(cli.clone());
        (cli, config)
    }
}
