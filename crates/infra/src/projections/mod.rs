//! Reporting projections (read model builders).
//!
//! Each projection is a pure fold over a [`LedgerSnapshot`](crate::store::LedgerSnapshot):
//! - **Read-only**: never writes back to the store
//! - **Idempotent**: the same snapshot always produces the same report
//! - **Mode-aware**: every report states the ledger mode it was computed under

pub mod inventory_valuation;
pub mod profit_loss;

pub use inventory_valuation::{
    value_inventory, InventoryValuation, ProductValuation, ReorderAlert,
};
pub use profit_loss::{profit_and_loss, ProfitAndLoss, ReportPeriod};
