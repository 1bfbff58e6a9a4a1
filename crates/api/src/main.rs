use std::sync::Arc;

use anyhow::Context;

use stockledger_api::app::{self, services::AppServices};
use stockledger_infra::{LedgerConfig, PostgresLedgerStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    stockledger_observability::init();

    let config = LedgerConfig::from_env();

    let services = match &config.database {
        Some(database) => {
            let store = PostgresLedgerStore::connect(database)
                .await
                .context("failed to open postgres ledger store")?;
            AppServices::new(Arc::new(store))
        }
        None => {
            tracing::warn!("DATABASE_URL not set; using in-memory ledger store");
            AppServices::in_memory()
        }
    };

    let app = app::build_app(services);

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;
    Ok(())
}
