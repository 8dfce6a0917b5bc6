use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;

use campus_api::app::{build_app, build_services};
use campus_infra::config::{AppConfig, DEFAULT_JWT_SECRET};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    campus_observability::init();

    let config = AppConfig::from_env();
    if config.jwt_secret == DEFAULT_JWT_SECRET {
        tracing::warn!("JWT_SECRET not set; using insecure dev default");
    }

    let (services, background) = build_services(&config)
        .await
        .context("failed to initialise services")?;
    let app = build_app(Arc::new(services), &config.jwt_secret);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    background.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}
