//! Keeper relay server
//!
//! Stores only opaque ciphertexts; it never sees a master password,
//! derived key or plaintext secret.

use clap::Parser;
use keeper_relay::{app_state, build_router, RelayConfig, RelayStorage};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "keeper-relay", about = "Keeper secret sync relay server")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "relay.toml")]
    config: PathBuf,

    /// Listen address override
    #[arg(short, long)]
    listen: Option<String>,

    /// Database path override
    #[arg(short, long)]
    database: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let cli = Cli::parse();

    let mut cfg = if cli.config.exists() {
        RelayConfig::load(&cli.config)?
    } else {
        tracing::info!("No config file found, using defaults");
        RelayConfig::default()
    };
    cfg.apply_env()?;

    if let Some(listen) = cli.listen {
        cfg.listen_addr = listen;
    }
    if let Some(database) = cli.database {
        cfg.storage_path = database;
    }

    tracing::info!("Starting keeper relay on {}", cfg.listen_addr);

    let storage = RelayStorage::open(&cfg.storage_path)?;
    let app = build_router(app_state(storage, &cfg), &cfg);

    let listener = tokio::net::TcpListener::bind(&cfg.listen_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
