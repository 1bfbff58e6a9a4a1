//! Domain foundation building blocks for the ledger crates.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! identifiers, money and the domain error model shared by the ledger crates.

pub mod error;
pub mod id;
pub mod money;

pub use error::{DomainError, DomainResult};
pub use id::{BatchId, ProductId, SaleId};
pub use money::Money;
