//! Ledger operating mode.

use serde::{Deserialize, Serialize};

/// Which stock-keeping policy the ledger runs under.
///
/// Decided once at startup from the storage schema and never switched at
/// runtime. Every report carries it, because valuation semantics differ.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerMode {
    /// Batch-level tracking available: sales consume batches oldest first.
    Fifo,
    /// Degraded: no per-batch remaining quantities, only the product aggregate.
    AggregateOnly,
}

/// How an inventory valuation figure was derived.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValuationBasis {
    /// Σ remaining × unit cost over unexhausted batches.
    RemainingCost,
    /// Σ original × unit cost over every batch ever purchased.
    PurchasedCost,
}

impl LedgerMode {
    pub fn tracks_batches(self) -> bool {
        matches!(self, LedgerMode::Fifo)
    }

    pub fn valuation_basis(self) -> ValuationBasis {
        match self {
            LedgerMode::Fifo => ValuationBasis::RemainingCost,
            LedgerMode::AggregateOnly => ValuationBasis::PurchasedCost,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LedgerMode::Fifo => "fifo",
            LedgerMode::AggregateOnly => "aggregate_only",
        }
    }
}

impl core::fmt::Display for LedgerMode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}
