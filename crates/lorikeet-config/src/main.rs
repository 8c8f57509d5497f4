//! Guild configuration web service
//!
//! Serves the config dashboard's data endpoints by asking the shard fleet
//! over the Redis bus: whichever shard owns a guild answers with its
//! configuration, and config edits are broadcast back so every shard
//! refreshes its cached copy.

mod config;
mod routes;

use anyhow::Result;
use clap::Parser;
use lorikeet_redis::{PubSub, SystemEnv};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::ServiceConfig;
use crate::routes::{create_router, AppState};

/// Config service CLI
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Redis URL (overrides environment)
    #[arg(long, env = "REDIS_URL")]
    redis_url: Option<String>,

    /// HTTP listen port (overrides environment)
    #[arg(long, env = "CONFIG_PORT")]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lorikeet_config=debug,lorikeet_redis=debug,info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting guild config service");

    let args = Args::parse();
    let mut service_config = ServiceConfig::from_env(&SystemEnv);
    if let Some(url) = args.redis_url {
        service_config.redis.url = url;
    }
    if let Some(port) = args.port {
        service_config.port = port;
    }

    // Connect to the bus
    let (transport, inbound) = lorikeet_redis::redis::connect(&service_config.redis).await?;
    let pubsub =
        PubSub::new(transport, inbound).with_ask_timeout(service_config.redis.ask_timeout());

    let app = create_router(AppState::new(pubsub));
    let addr = format!("0.0.0.0:{}", service_config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Config service listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Config service stopped");
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.ok();
    }
    info!("Shutdown signal received, stopping config service...");
}
