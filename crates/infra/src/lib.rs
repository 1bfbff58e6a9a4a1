//! Infrastructure layer: batch stores, schema, ledger engine, reports, config.

pub mod config;
pub mod ledger;
pub mod projections;
pub mod schema;
pub mod store;


pub use config::{DatabaseConfig, LedgerConfig};
pub use ledger::{LedgerEngine, LedgerError, LedgerHistory, SaleReceipt, StockDivergence};
pub use store::{InMemoryLedgerStore, LedgerStore, PostgresLedgerStore, StoreError};
