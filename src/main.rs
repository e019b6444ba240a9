use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use school_portal::config;
use school_portal::database::DatabaseManager;
use school_portal::AppState;

#[derive(Debug, Parser)]
#[command(name = "school-portal-api", version, about = "Multi-tenant school portal API")]
struct Args {
    /// Port to listen on
    #[arg(long, env = "PORT", default_value_t = 3000)]
    port: u16,

    /// Address to bind
    #[arg(long, default_value = "0.0.0.0")]
    bind: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present so DATABASE_URL, API_KEY, etc. are picked up
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn")))
        .init();

    let args = Args::parse();
    let config = config::config();
    info!("Starting school portal API in {:?} mode", config.environment);

    if school_portal::is_production!() && config.security.api_key.is_empty() {
        warn!("API_KEY is not set; the x-api-key gate is disabled");
    }

    let manager = Arc::new(DatabaseManager::from_env()?);
    let state = AppState::with_postgres_directory(manager.clone(), config.security.clone());
    let app = school_portal::app(state);

    let bind_addr = format!("{}:{}", args.bind, args.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", bind_addr))?;

    info!("Listening on http://{}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    manager.close_all().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Shutting down");
}
