//! Inventory valuation projection.
//!
//! Values on-hand stock at the cost of the batches it came from, never at the
//! product's asking price. With batch tracking that is Σ remaining × unit cost
//! over unexhausted batches. Without it the figure falls back to what was ever
//! purchased (Σ original × unit cost) and is flagged with its basis.

use serde::Serialize;

use stockledger_core::{DomainResult, Money, ProductId};
use stockledger_inventory::{LedgerMode, ProductCode, PurchaseBatch, ValuationBasis};

use crate::store::LedgerSnapshot;

/// Valuation of one product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProductValuation {
    pub product_id: ProductId,
    pub code: ProductCode,
    pub name: String,
    pub quantity: i64,
    pub unit: Option<String>,
    pub value: Money,
}

/// A product at or below its reorder level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReorderAlert {
    pub product_id: ProductId,
    pub code: ProductCode,
    pub name: String,
    pub quantity: i64,
    pub reorder_level: i64,
}

/// Read model: value of everything on hand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InventoryValuation {
    pub mode: LedgerMode,
    pub basis: ValuationBasis,
    pub total_value: Money,
    pub total_quantity: i64,
    pub products: Vec<ProductValuation>,
    pub reorder_alerts: Vec<ReorderAlert>,
}

fn batch_value(basis: ValuationBasis, batch: &PurchaseBatch) -> DomainResult<Money> {
    match basis {
        ValuationBasis::RemainingCost if batch.is_consumable() => batch.remaining_value(),
        ValuationBasis::RemainingCost => Ok(Money::ZERO),
        ValuationBasis::PurchasedCost => batch.purchase_cost(),
    }
}

/// Fold a snapshot into a valuation. Pure; the same snapshot always yields
/// the same report. Fails only when a value leaves the money range.
pub fn value_inventory(
    mode: LedgerMode,
    snapshot: &LedgerSnapshot,
) -> DomainResult<InventoryValuation> {
    let basis = mode.valuation_basis();

    let products = snapshot
        .products
        .iter()
        .map(|p| {
            Ok(ProductValuation {
                product_id: p.id,
                code: p.code.clone(),
                name: p.name.clone(),
                quantity: p.quantity,
                unit: p.unit.clone(),
                value: Money::try_total(snapshot.batches_of(p.id).map(|b| batch_value(basis, b)))?,
            })
        })
        .collect::<DomainResult<Vec<ProductValuation>>>()?;

    let reorder_alerts = snapshot
        .products
        .iter()
        .filter(|p| p.needs_reorder())
        .map(|p| ReorderAlert {
            product_id: p.id,
            code: p.code.clone(),
            name: p.name.clone(),
            quantity: p.quantity,
            reorder_level: p.reorder_level,
        })
        .collect();

    Ok(InventoryValuation {
        mode,
        basis,
        total_value: Money::total(products.iter().map(|p| p.value))?,
        total_quantity: products.iter().map(|p| p.quantity).sum(),
        products,
        reorder_alerts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use stockledger_core::BatchId;
    use stockledger_inventory::{NewProduct, Product};

    fn snapshot() -> LedgerSnapshot {
        let mut widget = Product::register(
            ProductId::new(),
            ProductCode::new("P01").unwrap(),
            NewProduct {
                reorder_level: 5,
                ..NewProduct::named("Widget")
            },
            Utc::now(),
        )
        .unwrap();
        widget.quantity = 3;

        let at = |s| Utc.timestamp_opt(s, 0).unwrap();
        let mut b1 = PurchaseBatch::receive(
            BatchId::new(),
            widget.id,
            1,
            10,
            Money::from_minor(200),
            at(1),
        )
        .unwrap();
        b1.consume(10).unwrap();
        let mut b2 = PurchaseBatch::receive(
            BatchId::new(),
            widget.id,
            2,
            5,
            Money::from_minor(300),
            at(2),
        )
        .unwrap();
        b2.consume(2).unwrap();

        LedgerSnapshot {
            products: vec![widget],
            batches: vec![b1, b2],
            ..LedgerSnapshot::default()
        }
    }

    #[test]
    fn fifo_values_only_what_remains() {
        let v = value_inventory(LedgerMode::Fifo, &snapshot()).unwrap();
        assert_eq!(v.basis, ValuationBasis::RemainingCost);
        assert_eq!(v.total_value, Money::from_minor(900));
        assert_eq!(v.total_quantity, 3);
        assert_eq!(v.products[0].value, Money::from_minor(900));
    }

    #[test]
    fn aggregate_only_values_everything_purchased() {
        let v = value_inventory(LedgerMode::AggregateOnly, &snapshot()).unwrap();
        assert_eq!(v.mode, LedgerMode::AggregateOnly);
        assert_eq!(v.basis, ValuationBasis::PurchasedCost);
        assert_eq!(v.total_value, Money::from_minor(3500));
    }

    #[test]
    fn low_stock_products_raise_reorder_alerts() {
        let v = value_inventory(LedgerMode::Fifo, &snapshot()).unwrap();
        assert_eq!(v.reorder_alerts.len(), 1);
        assert_eq!(v.reorder_alerts[0].reorder_level, 5);
    }

    #[test]
    fn valuation_is_idempotent() {
        let s = snapshot();
        assert_eq!(
            value_inventory(LedgerMode::Fifo, &s),
            value_inventory(LedgerMode::Fifo, &s)
        );
    }

    #[test]
    fn totals_beyond_the_money_range_are_an_error() {
        let mut s = snapshot();
        let product_id = s.products[0].id;
        for seq in 3..6 {
            s.batches.push(
                PurchaseBatch::receive(
                    BatchId::new(),
                    product_id,
                    seq,
                    1,
                    Money::from_minor(i64::MAX / 2),
                    Utc::now(),
                )
                .unwrap(),
            );
        }
        assert!(matches!(
            value_inventory(LedgerMode::Fifo, &s),
            Err(stockledger_core::DomainError::AmountOverflow(_))
        ));
    }

    #[test]
    fn empty_ledger_is_worth_nothing() {
        let v = value_inventory(LedgerMode::Fifo, &LedgerSnapshot::default()).unwrap();
        assert_eq!(v.total_value, Money::ZERO);
        assert!(v.products.is_empty());
    }
}
