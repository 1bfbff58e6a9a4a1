use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::error::ensure_positive_quantity;
use stockledger_core::{BatchId, DomainResult, Money, ProductId, SaleId};

/// A recorded sale. Immutable once created.
///
/// The unit price is whatever the operator charged; it is not derived from the
/// cost of the batches the sale consumed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleRecord {
    pub id: SaleId,
    pub product_id: ProductId,
    pub quantity: i64,
    pub unit_price: Money,
    pub sold_at: DateTime<Utc>,
}

impl SaleRecord {
    pub fn new(
        id: SaleId,
        product_id: ProductId,
        quantity: i64,
        unit_price: Money,
        sold_at: DateTime<Utc>,
    ) -> DomainResult<Self> {
        ensure_positive_quantity(quantity, "sale quantity")?;
        unit_price.ensure_non_negative("unit price")?;
        unit_price.times(quantity)?;
        Ok(Self {
            id,
            product_id,
            quantity,
            unit_price,
            sold_at,
        })
    }

    pub fn revenue(&self) -> DomainResult<Money> {
        self.unit_price.times(self.quantity)
    }
}

/// How much of one batch a sale used up, at that batch's cost.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleConsumption {
    pub sale_id: SaleId,
    pub batch_id: BatchId,
    pub quantity: i64,
    pub unit_cost: Money,
}

impl SaleConsumption {
    pub fn cost(&self) -> DomainResult<Money> {
        self.unit_cost.times(self.quantity)
    }
}
