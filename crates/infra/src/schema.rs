//! Schema migrations and the startup capability check.
//!
//! Migrations live in `crates/infra/migrations` and are embedded at compile
//! time. Version 1 is the aggregate-only ledger; version 2 adds per-batch
//! remaining quantities and sale consumption rows. Whatever the migration
//! outcome, the ledger runs in the mode the live schema actually supports.

use sqlx::migrate::Migrator;
use sqlx::{PgPool, Row};
use tracing::{info, warn};

use stockledger_inventory::LedgerMode;

use crate::store::postgres::map_sqlx_error;
use crate::store::StoreError;

pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Apply every pending migration.
pub async fn migrate(pool: &PgPool) -> Result<(), StoreError> {
    MIGRATOR
        .run(pool)
        .await
        .map_err(|e| StoreError::Database(format!("migration failed: {e}")))
}

/// Mode for a schema with (or without) the FIFO columns and tables.
pub fn mode_for(has_remaining: bool, has_consumptions: bool) -> LedgerMode {
    if has_remaining && has_consumptions {
        LedgerMode::Fifo
    } else {
        LedgerMode::AggregateOnly
    }
}

/// Probe the live schema for batch remainder tracking.
pub async fn detect_mode(pool: &PgPool) -> Result<LedgerMode, StoreError> {
    let row = sqlx::query(
        r#"
        SELECT
            EXISTS (
                SELECT 1
                FROM information_schema.columns
                WHERE table_schema = current_schema()
                  AND table_name = 'purchase_batches'
                  AND column_name = 'remaining_quantity'
            ) AS has_remaining,
            to_regclass('sale_consumptions') IS NOT NULL AS has_consumptions
        "#,
    )
    .fetch_one(pool)
    .await
    .map_err(|e| map_sqlx_error("detect_mode", e))?;

    let has_remaining: bool = row
        .try_get("has_remaining")
        .map_err(|e| StoreError::Corrupt(format!("has_remaining: {e}")))?;
    let has_consumptions: bool = row
        .try_get("has_consumptions")
        .map_err(|e| StoreError::Corrupt(format!("has_consumptions: {e}")))?;

    Ok(mode_for(has_remaining, has_consumptions))
}

/// Migrate (optionally) and settle on a ledger mode.
///
/// A failed migration is not fatal: the store keeps working in whatever mode
/// the existing schema allows.
pub async fn prepare(pool: &PgPool, run_migrations: bool) -> Result<LedgerMode, StoreError> {
    if run_migrations {
        match migrate(pool).await {
            Ok(()) => info!("schema migrations applied"),
            Err(e) => warn!(error = %e, "schema migration failed; continuing with existing schema"),
        }
    }

    let mode = detect_mode(pool).await?;
    match mode {
        LedgerMode::Fifo => info!(mode = %mode, "batch tracking available"),
        LedgerMode::AggregateOnly => warn!(
            mode = %mode,
            "purchase_batches has no remaining_quantity; running without FIFO batch tracking"
        ),
    }
    Ok(mode)
}
