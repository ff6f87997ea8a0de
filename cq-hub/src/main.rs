//! cq-hub - CivicQuest progression hub service
//!
//! Serves the multi-world training progression engine over HTTP for
//! browser clients. One process, one SQLite database, zero accounts.

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use cq_hub::content::StaticContentProvider;
use cq_hub::{build_router, retention, AppState};

#[derive(Parser, Debug)]
#[command(name = "cq-hub", version, about = "CivicQuest progression hub service")]
struct Args {
    /// Data directory override (default: platform data dir or CQ_DATA_DIR)
    #[arg(long)]
    data_dir: Option<String>,

    /// Listen port
    #[arg(long, default_value_t = 5780)]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    info!("Starting CivicQuest hub (cq-hub) v{}", env!("CARGO_PKG_VERSION"));

    let args = Args::parse();
    let data_dir = cq_common::config::resolve_data_dir(args.data_dir.as_deref());
    std::fs::create_dir_all(&data_dir)?;
    let db_path = cq_common::config::database_path(&data_dir);
    info!("Database path: {}", db_path.display());

    let pool = cq_common::db::init_database(&db_path).await?;
    info!("✓ Database initialized");

    // File defaults overlaid with per-deployment settings rows
    let base = cq_common::config::EngineConfig::default();
    let config = cq_common::db::settings::load_engine_config(&pool, base).await?;
    config.validate()?;

    let provider = Arc::new(StaticContentProvider::default());
    let state = AppState::new(pool, config, provider);
    retention::spawn_sweeper(state.hub.clone());

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", args.port)).await?;
    info!("cq-hub listening on http://0.0.0.0:{}", args.port);
    info!("Health check: http://127.0.0.1:{}/health", args.port);

    axum::serve(listener, app).await?;
    Ok(())
}
