//! MP3 Equalizer Server
//!
//! Accepts batches of MP3 uploads, normalizes their loudness with FFmpeg's
//! `loudnorm` filter and serves the results as a ZIP archive.

use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mp3_equalizer::config::ServerConfig;
use mp3_equalizer::config_file::ConfigFile;
use mp3_equalizer::error::{EqualizerError, Result};
use mp3_equalizer::http::create_router;
use mp3_equalizer::state::AppState;

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
const APP_NAME: &str = "mp3-equalizer";

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration before logging so the log settings apply
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.toml".to_string());
    let (config, config_error) = load_config(&config_path);

    if let Err(e) = init_logging(&config) {
        eprintln!("Failed to initialize logging: {}", e);
    }

    tracing::info!("{} v{} starting", APP_NAME, VERSION);
    if let Some(e) = config_error {
        tracing::warn!(
            "Failed to load config file {}: {}. Using defaults.",
            config_path,
            e
        );
    }
    tracing::info!("Configuration loaded: {:?}", config);

    // The codec engine loads lazily on the first upload
    let state = Arc::new(AppState::new(config.clone()));

    let app = create_router(state);

    let addr: SocketAddr = config
        .socket_addr()
        .parse()
        .map_err(|e| EqualizerError::Config(format!("invalid listen address: {}", e)))?;
    tracing::info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

fn load_config(path: &str) -> (ServerConfig, Option<String>) {
    if !std::path::Path::new(path).exists() {
        return (ServerConfig::default(), None);
    }
    match ConfigFile::from_file(path) {
        Ok(cf) => (cf.into_server_config(), None),
        Err(e) => (ServerConfig::default(), Some(e.to_string())),
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

/// Default `EnvFilter` directives when `RUST_LOG` is unset
fn log_directives(config: &ServerConfig) -> String {
    format!(
        "mp3_equalizer={level},ffmpeg={level},tower_http=debug",
        level = config.log_level
    )
}

/// Initialize logging with tracing
fn init_logging(
    config: &ServerConfig,
) -> std::result::Result<(), tracing_subscriber::util::TryInitError> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| log_directives(config).into());

    let json = config.log_format.eq_ignore_ascii_case("json");
    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(tracing_subscriber::fmt::layer))
        .try_init()
}
