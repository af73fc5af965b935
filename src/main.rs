use std::sync::Arc;

use sales_lifecycle::config::EngineConfig;
use sales_lifecycle::http::router;
use sales_lifecycle::service::LifecycleService;
use sales_lifecycle::telemetry::init_tracing;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    EngineConfig::load_env_file()?;
    let config = EngineConfig::load()?;
    init_tracing(&config.observability)?;

    let bind = config.server.bind.clone();
    let service = Arc::new(LifecycleService::open(config)?);

    let listener = tokio::net::TcpListener::bind(&bind).await?;
    info!(%bind, "sales lifecycle engine listening");

    axum::serve(listener, router(service.clone()))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    let flushed = service.flush()?;
    info!(bytes = flushed, "database flushed, shutting down");
    Ok(())
}
