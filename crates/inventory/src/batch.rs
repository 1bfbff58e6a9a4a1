use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::error::ensure_positive_quantity;
use stockledger_core::{BatchId, DomainError, DomainResult, Money, ProductId};

/// A lot of stock received in one purchase.
///
/// `original_quantity`, `unit_cost` and `received_at` never change after
/// creation. `remaining_quantity` only goes down, and only through
/// [`PurchaseBatch::consume`]. Exhausted batches are kept as history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseBatch {
    pub id: BatchId,
    pub product_id: ProductId,
    /// Store-assigned creation order; breaks `received_at` ties.
    pub sequence: u64,
    pub original_quantity: i64,
    pub remaining_quantity: i64,
    pub unit_cost: Money,
    pub received_at: DateTime<Utc>,
}

impl PurchaseBatch {
    pub fn receive(
        id: BatchId,
        product_id: ProductId,
        sequence: u64,
        quantity: i64,
        unit_cost: Money,
        received_at: DateTime<Utc>,
    ) -> DomainResult<Self> {
        ensure_positive_quantity(quantity, "purchase quantity")?;
        unit_cost.ensure_non_negative("unit cost")?;
        unit_cost.times(quantity)?;
        Ok(Self {
            id,
            product_id,
            sequence,
            original_quantity: quantity,
            remaining_quantity: quantity,
            unit_cost,
            received_at,
        })
    }

    pub fn is_consumable(&self) -> bool {
        self.remaining_quantity > 0
    }

    /// FIFO ordering key: oldest receipt first, then creation order.
    pub fn fifo_key(&self) -> (DateTime<Utc>, u64) {
        (self.received_at, self.sequence)
    }

    /// Take `amount` units out of this batch.
    pub fn consume(&mut self, amount: i64) -> DomainResult<()> {
        ensure_positive_quantity(amount, "consumed amount")?;
        if amount > self.remaining_quantity {
            return Err(DomainError::invariant(format!(
                "batch {} over-consumed: requested {amount}, remaining {}",
                self.id, self.remaining_quantity
            )));
        }
        self.remaining_quantity -= amount;
        Ok(())
    }

    /// Cost of what is still on hand from this batch.
    pub fn remaining_value(&self) -> DomainResult<Money> {
        self.unit_cost.times(self.remaining_quantity)
    }

    /// What was paid for the whole batch.
    pub fn purchase_cost(&self) -> DomainResult<Money> {
        self.unit_cost.times(self.original_quantity)
    }
}

/// Order batches oldest first (stable on identical keys).
pub fn sort_fifo(batches: &mut [PurchaseBatch]) {
    batches.sort_by_key(PurchaseBatch::fifo_key);
}
