use anyhow::{Context, Result};
use clap::Parser; // for cli
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info, Level};
use tracing_subscriber::EnvFilter;

mod auth;
mod blob;
mod config;
mod error;
mod handlers;
mod metrics;
mod pipeline;
mod rate_limit;
mod state;
mod usage;

use crate::config::Args;
use crate::state::AppState;

// this is main async function with tokio
#[tokio::main]
async fn main() -> Result<()> {
    // parse cli arguments
    let args = Args::parse();

    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(level.into())
                .from_env_lossy(),
        )
        .init();

    // limiter state lives as long as the process; a restart forgets it
    let state = Arc::new(AppState::from_args(&args));

    if let Some(port) = args.metrics_port {
        tokio::spawn(async move {
            if let Err(e) = serve_metrics(port).await {
                error!("metrics server stopped: {:#}", e);
            }
        });
    }

    let app = handlers::router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("Gateway running on http://{}{}", addr, args.subscribe_path);
    info!(
        "Rate limit: {} requests per {} seconds",
        args.rate_limit, args.rate_window
    );
    info!(
        "Auth failures: {} per {} seconds, ban for {} seconds",
        args.auth_fail_limit, args.auth_fail_window, args.ban_duration
    );
    // peer addresses key clients that arrive without the edge header
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .context("Gateway server error")?;

    Ok(())
}

async fn serve_metrics(port: u16) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind metrics server")?;

    info!("Metrics on http://{}/metrics", addr);
    axum::serve(listener, handlers::metrics_router())
        .await
        .context("Metrics server error")?;
    Ok(())
}
