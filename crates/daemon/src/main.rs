use std::sync::Arc;

use anyhow::Context;
use orderflow_infra::{
    DatabaseConfig, InMemoryOrderStore, OrderProcessor, OrderStore, PipelineConfig,
    PostgresOrderStore, db,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    orderflow_observability::init();

    let config = PipelineConfig::from_env().context("invalid pipeline configuration")?;
    let db_config = DatabaseConfig::from_env().context("invalid database configuration")?;

    let store: Arc<dyn OrderStore> = match db_config.url.as_deref() {
        Some(url) => {
            let pool = db::connect(url, &db_config)
                .await
                .context("failed to connect to Postgres")?;
            let store = PostgresOrderStore::new(pool);
            store
                .ensure_schema()
                .await
                .context("failed to prepare order schema")?;
            Arc::new(store)
        }
        None => {
            tracing::warn!("DATABASE_URL not set; using in-memory order store");
            Arc::new(InMemoryOrderStore::new())
        }
    };

    let processor = Arc::new(
        OrderProcessor::new(store, config).context("failed to build order processor")?,
    );
    processor.start().await;

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("shutdown signal received");

    processor.stop().await;

    let stats = serde_json::to_string(&processor.stats())?;
    tracing::info!(%stats, "final pipeline stats");
    Ok(())
}
