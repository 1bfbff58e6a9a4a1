//! FIFO allocation planning.
//!
//! Pure decision logic: given a product's consumable batches in FIFO order and
//! a requested quantity, decide how much to take from each batch. Stores apply
//! the plan inside their unit of work; nothing here mutates state.

use serde::{Deserialize, Serialize};

use stockledger_core::error::ensure_positive_quantity;
use stockledger_core::{BatchId, DomainError, DomainResult, Money, SaleId};

use crate::batch::PurchaseBatch;
use crate::sale::SaleConsumption;

/// Units to take from one batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    pub batch_id: BatchId,
    pub quantity: i64,
    pub unit_cost: Money,
}

impl Allocation {
    pub fn into_consumption(self, sale_id: SaleId) -> SaleConsumption {
        SaleConsumption {
            sale_id,
            batch_id: self.batch_id,
            quantity: self.quantity,
            unit_cost: self.unit_cost,
        }
    }
}

/// Σ remaining over the given batches.
pub fn available(batches: &[PurchaseBatch]) -> i64 {
    batches
        .iter()
        .filter(|b| b.is_consumable())
        .map(|b| b.remaining_quantity)
        .sum()
}

/// Plan the consumption of `quantity` units, oldest batch first.
///
/// `batches` must already be in FIFO order (see [`crate::sort_fifo`]).
/// Fails with `InsufficientStock` when the batches cannot cover the request; in
/// that case no plan exists and the caller must not touch any batch.
pub fn allocate(batches: &[PurchaseBatch], quantity: i64) -> DomainResult<Vec<Allocation>> {
    ensure_positive_quantity(quantity, "sale quantity")?;

    if let Some(pair) = batches.windows(2).find(|w| w[0].fifo_key() > w[1].fifo_key()) {
        return Err(DomainError::invariant(format!(
            "batches not in FIFO order: {} precedes {}",
            pair[0].id, pair[1].id
        )));
    }

    let on_hand = available(batches);
    if on_hand < quantity {
        return Err(DomainError::insufficient_stock(quantity, on_hand));
    }

    let mut still_needed = quantity;
    let mut plan = Vec::new();
    for batch in batches.iter().filter(|b| b.is_consumable()) {
        if still_needed == 0 {
            break;
        }
        let take = batch.remaining_quantity.min(still_needed);
        plan.push(Allocation {
            batch_id: batch.id,
            quantity: take,
            unit_cost: batch.unit_cost,
        });
        still_needed -= take;
    }

    if still_needed != 0 {
        return Err(DomainError::invariant(format!(
            "FIFO walk left {still_needed} of {quantity} units unallocated"
        )));
    }

    Ok(plan)
}
