//! Batch store boundary and its implementations.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryLedgerStore;
pub use postgres::PostgresLedgerStore;
pub use r#trait::{LedgerSnapshot, LedgerStore, LedgerTx, StoreError};
