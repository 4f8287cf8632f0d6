use anyhow::Context;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use tenant_schema_router::config;
use tenant_schema_router::database::{
    redact_database_url, PgSchemaConnector, PoolRegistry, SchemaExecutor,
};
use tenant_schema_router::handlers::{app, AppState};
use tenant_schema_router::tenancy::SchemaResolver;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present so cargo run picks up DATABASE_URL and pool settings
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = config::config();
    tracing::info!("Starting Tenant Schema Router in {:?} mode", config.environment);

    let database_url = config
        .database
        .url
        .as_deref()
        .context("DATABASE_URL must be set")?;
    tracing::info!("Using database {}", redact_database_url(database_url));

    let connector = PgSchemaConnector::from_url(database_url, config.connect_timeout())?;
    let registry = Arc::new(PoolRegistry::new(connector, config.pool_config())?);
    registry.start_sweeper();

    let executor = SchemaExecutor::new(Arc::clone(&registry), config.retry_policy());
    let resolver = SchemaResolver::new(config.api.accept_legacy_schema_keys);
    let app = app(AppState::new(executor, resolver));

    let bind_addr = format!("0.0.0.0:{}", config.api.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", bind_addr))?;

    tracing::info!("Tenant Schema Router listening on http://{}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    registry.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received, draining connection pools");
}
