//! hf-openai-bridge server binary.

use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{info, warn};

use hf_openai_bridge::config::Config;
use hf_openai_bridge::server::openai_api::{build_router, AppState};
use hf_openai_bridge::shutdown::shutdown_signal;
use hf_openai_bridge::upstream::client::HfClient;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments and environment.
    let (cli, config) = Config::load();

    // Initialize tracing/logging.
    let filter = if cli.verbose {
        "hf_openai_bridge=debug,tower_http=debug"
    } else {
        "hf_openai_bridge=info,tower_http=info"
    };

    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());
    if cli.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }

    info!("hf-openai-bridge v{}", env!("CARGO_PKG_VERSION"));

    info!(
        upstream = config.upstream.base_url,
        default_model = config.upstream.default_model,
        prompt_strategy = ?config.upstream.prompt_strategy,
        request_timeout_secs = config.upstream.request_timeout_secs,
        "Configuration loaded"
    );

    if !config.upstream.token_configured() {
        warn!("HF_TOKEN is not set; upstream calls will be unauthenticated");
    }

    let config = Arc::new(config);

    // Build the upstream client and application state.
    let backend = HfClient::new(config.upstream.clone())?;
    let state = Arc::new(AppState::new(config.clone(), Arc::new(backend)));

    // Build the HTTP router.
    let app = build_router(state);

    // Start the server.
    let listen_addr = config.server.listen_addr();
    let listener = TcpListener::bind(&listen_addr).await?;
    info!("Server running on {listen_addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}
