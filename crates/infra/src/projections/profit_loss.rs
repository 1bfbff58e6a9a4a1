//! Profit and loss projection.
//!
//! `net` is sales revenue minus everything purchased in the period. That is a
//! cash-flow figure, not an accrual margin: stock bought and not yet sold
//! counts against it. With batch tracking the report also carries cost of
//! goods sold (from sale consumptions) and the gross margin it implies.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::{DomainError, DomainResult, Money, SaleId};
use stockledger_inventory::{LedgerMode, SaleConsumption};

use crate::store::LedgerSnapshot;

/// Half-open reporting window `[from, to)`. Open ends are unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportPeriod {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl ReportPeriod {
    pub fn new(from: Option<DateTime<Utc>>, to: Option<DateTime<Utc>>) -> DomainResult<Self> {
        if let (Some(from), Some(to)) = (from, to) {
            if from >= to {
                return Err(DomainError::validation(format!(
                    "report period must end after it starts ({from} >= {to})"
                )));
            }
        }
        Ok(Self { from, to })
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.from.is_none_or(|from| at >= from) && self.to.is_none_or(|to| at < to)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProfitAndLoss {
    pub mode: LedgerMode,
    pub period: ReportPeriod,
    pub sales_count: u64,
    pub sales_quantity: i64,
    pub sales_revenue: Money,
    pub purchase_count: u64,
    pub purchase_quantity: i64,
    pub purchase_cost: Money,
    pub net: Money,
    /// Only with batch tracking.
    pub cost_of_goods_sold: Option<Money>,
    /// `sales_revenue - cost_of_goods_sold`, only with batch tracking.
    pub gross_margin: Option<Money>,
}

/// Fails only when a total leaves the money range.
pub fn profit_and_loss(
    mode: LedgerMode,
    snapshot: &LedgerSnapshot,
    period: ReportPeriod,
) -> DomainResult<ProfitAndLoss> {
    let mut sales_count = 0u64;
    let mut sales_quantity = 0i64;
    let mut sales_revenue = Money::ZERO;
    let mut sold: HashSet<SaleId> = HashSet::new();
    for sale in snapshot.sales.iter().filter(|s| period.contains(s.sold_at)) {
        sales_count += 1;
        sales_quantity = sales_quantity.saturating_add(sale.quantity);
        sales_revenue = sales_revenue.checked_add(sale.revenue()?)?;
        sold.insert(sale.id);
    }

    let mut purchase_count = 0u64;
    let mut purchase_quantity = 0i64;
    let mut purchase_cost = Money::ZERO;
    for batch in snapshot
        .batches
        .iter()
        .filter(|b| period.contains(b.received_at))
    {
        purchase_count += 1;
        purchase_quantity = purchase_quantity.saturating_add(batch.original_quantity);
        purchase_cost = purchase_cost.checked_add(batch.purchase_cost()?)?;
    }

    let cost_of_goods_sold = if mode.tracks_batches() {
        Some(Money::try_total(
            snapshot
                .consumptions
                .iter()
                .filter(|c| sold.contains(&c.sale_id))
                .map(SaleConsumption::cost),
        )?)
    } else {
        None
    };
    let gross_margin = cost_of_goods_sold
        .map(|cogs| sales_revenue.checked_sub(cogs))
        .transpose()?;

    Ok(ProfitAndLoss {
        mode,
        period,
        sales_count,
        sales_quantity,
        sales_revenue,
        purchase_count,
        purchase_quantity,
        purchase_cost,
        net: sales_revenue.checked_sub(purchase_cost)?,
        cost_of_goods_sold,
        gross_margin,
    })
}
