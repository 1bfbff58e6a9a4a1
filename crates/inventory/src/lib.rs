//! Inventory ledger domain module.
//!
//! This crate contains business rules for FIFO stock keeping, implemented purely
//! as deterministic domain logic (no IO, no HTTP, no storage). Stores and the
//! ledger engine in `stockledger-infra` drive these types.

pub mod batch;
pub mod fifo;
pub mod mode;
pub mod product;
pub mod sale;

pub use batch::{sort_fifo, PurchaseBatch};
pub use fifo::{allocate, available, Allocation};
pub use mode::{LedgerMode, ValuationBasis};
pub use product::{NewProduct, Product, ProductCode, ProductPatch};
pub use sale::{SaleConsumption, SaleRecord};
