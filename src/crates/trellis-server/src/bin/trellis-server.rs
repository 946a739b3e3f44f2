//! Trellis server binary

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;
use tracing_subscriber::EnvFilter;

use trellis_mcp::McpSessionManager;
use trellis_server::api::tenant::TenantResolver;
use trellis_server::{create_router, ExecutionService, ServerConfig};
use trellis_store::SqliteStores;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config_path = std::env::var("TRELLIS_CONFIG").ok().map(PathBuf::from);
    let config = ServerConfig::load(config_path.as_deref())?;
    info!(listen = %config.listen, "starting trellis-server");

    let stores = SqliteStores::connect(&config.database_url)
        .await
        .map_err(|e| anyhow::anyhow!("database: {e}"))?;

    let mcp = Arc::new(McpSessionManager::with_timeout(Duration::from_secs(
        config.mcp_timeout_secs,
    )));
    let service = Arc::new(ExecutionService::new(
        Arc::new(stores.workflows()),
        Arc::new(stores.snapshots()),
        mcp.clone(),
    ));

    let tenants = TenantResolver::new(config.tenant_claim.clone(), config.fallback_tenant.clone());
    let router = create_router(service, mcp, tenants);

    let listener = tokio::net::TcpListener::bind(&config.listen).await?;
    info!(addr = %listener.local_addr()?, "listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        return;
    }
    info!("shutdown signal received");
}
