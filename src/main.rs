//! Decoy-endpoint service binary.
//!
//! Profiles automated crawlers that follow hidden links.

use anyhow::{Context, Result};
use clap::Parser;
use decoy_endpoint::config::{resolve_signing_keys, DecoyConfig};
use decoy_endpoint::server::{router, AppState};
use decoy_endpoint::telemetry::SqliteTelemetry;
use decoy_endpoint::token::TokenCodec;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "decoy-endpoint")]
#[command(author, version, about = "Decoy endpoint that detects and profiles automated crawlers")]
struct Args {
    /// Address to listen on
    #[arg(short, long, default_value = "127.0.0.1:8080")]
    listen: SocketAddr,

    /// Path to configuration file (JSON or YAML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Telemetry database path (overrides config and DECOY_DB)
    #[arg(long)]
    db: Option<PathBuf>,

    /// Enable JSON logging format
    #[arg(long)]
    json_logs: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn init_logging(json: bool, level: &str) {
    let level = match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let env_filter = EnvFilter::from_default_env().add_directive(level.into());

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer())
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(args.json_logs, &args.log_level);

    // Load configuration: file first, then environment overrides.
    let mut config = if let Some(config_path) = &args.config {
        let content = std::fs::read_to_string(config_path)
            .with_context(|| format!("failed to read {}", config_path.display()))?;
        if config_path
            .extension()
            .is_some_and(|e| e == "yaml" || e == "yml")
        {
            serde_yaml::from_str(&content)?
        } else {
            serde_json::from_str(&content)?
        }
    } else {
        DecoyConfig::default()
    };
    config.apply_env();
    if let Some(db) = &args.db {
        config.telemetry.db_path = db.display().to_string();
    }

    // Resolve the signing key. A generated key works but invalidates all
    // outstanding tokens on restart.
    let keys = resolve_signing_keys();
    if keys.generated {
        warn!("no DECOY_SIGNING_KEY supplied; generated an ephemeral key for this process");
    }
    let mut codec = TokenCodec::new(keys.current);
    if let Some(previous) = keys.previous {
        info!("accepting a previous signing key during the rotation window");
        codec = codec.with_previous_key(previous);
    }

    let sink = Arc::new(
        SqliteTelemetry::open(&config.telemetry.db_path)
            .with_context(|| format!("failed to open {}", config.telemetry.db_path))?,
    );
    info!(db = %config.telemetry.db_path, "telemetry store ready");

    let state = Arc::new(AppState::new(&config, codec, sink));
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(args.listen)
        .await
        .with_context(|| format!("failed to bind {}", args.listen))?;
    info!(
        addr = %args.listen,
        max_depth = config.traversal.max_depth,
        links_per_page = config.traversal.links_per_page,
        "decoy endpoint listening"
    );

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .context("server error")?;

    Ok(())
}
