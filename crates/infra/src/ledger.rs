//! Ledger engine (application-level orchestration).
//!
//! The engine is the only writer of stock state. Every purchase or sale runs
//! inside one product-scoped unit of work:
//!
//! ```text
//! validate input (no storage access)
//!   ↓
//! begin(product)          -- waits for any other unit of work on the product
//!   ↓
//! read consumable batches, check aggregate == Σ remaining
//!   ↓
//! plan (fifo::allocate)   -- pure; InsufficientStock aborts here
//!   ↓
//! apply consumptions, write aggregate, insert sale + consumptions
//!   ↓
//! commit                  -- or drop, which rolls everything back
//! ```
//!
//! ## Error Semantics
//!
//! - **Caller errors**: `InvalidQuantity`, `Validation`, `NotFound`,
//!   `InsufficientStock`, `AmountOverflow`. Nothing is written.
//! - **Internal inconsistency**: aggregate/batch divergence, over-consumption,
//!   a plan that does not cover the request. Logged at `error`; the unit of
//!   work is rolled back.
//! - **Store failures**: passed through as `LedgerError::Store`.
//!
//! In aggregate-only mode stock checks use the product aggregate, sales
//! consume no batches and write no consumption rows.

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, instrument, warn};

use stockledger_core::error::ensure_positive_quantity;
use stockledger_core::{DomainError, Money, ProductId, SaleId};
use stockledger_inventory::fifo;
use stockledger_inventory::{
    LedgerMode, NewProduct, Product, ProductCode, ProductPatch, PurchaseBatch, SaleConsumption,
    SaleRecord,
};

use crate::projections::{
    profit_and_loss, value_inventory, InventoryValuation, ProfitAndLoss, ReportPeriod,
};
use crate::store::{LedgerStore, LedgerTx, StoreError};

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("invalid quantity: {0}")]
    InvalidQuantity(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("product not found: {0}")]
    NotFound(ProductId),

    #[error("insufficient stock for product {product_id}: requested {requested}, available {available}")]
    InsufficientStock {
        product_id: ProductId,
        requested: i64,
        available: i64,
    },

    #[error("internal inconsistency: {0}")]
    InternalInconsistency(String),

    #[error("amount overflow: {0}")]
    AmountOverflow(String),

    #[error("store failure: {0}")]
    Store(StoreError),
}

impl From<DomainError> for LedgerError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::InvalidQuantity(msg) => LedgerError::InvalidQuantity(msg),
            DomainError::Validation(msg) | DomainError::InvalidId(msg) => {
                LedgerError::Validation(msg)
            }
            DomainError::AmountOverflow(msg) => LedgerError::AmountOverflow(msg),
            // Without a product in scope this can only come from an engine bug.
            DomainError::InsufficientStock { .. } | DomainError::InvariantViolation(_) => {
                LedgerError::InternalInconsistency(value.to_string())
            }
        }
    }
}

impl From<StoreError> for LedgerError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::ProductNotFound(id) => LedgerError::NotFound(id),
            StoreError::OverConsumption { .. } | StoreError::BatchNotFound(_) => {
                LedgerError::InternalInconsistency(value.to_string())
            }
            StoreError::Domain(e) => e.into(),
            other => LedgerError::Store(other),
        }
    }
}

/// Outcome of a recorded sale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SaleReceipt {
    pub sale: SaleRecord,
    /// Batches the sale drew from, oldest first. Empty in aggregate-only mode.
    pub consumptions: Vec<SaleConsumption>,
    pub mode: LedgerMode,
}

impl SaleReceipt {
    pub fn cost_of_goods(&self) -> Result<Money, LedgerError> {
        Ok(Money::try_total(self.consumptions.iter().map(SaleConsumption::cost))?)
    }
}

/// A product whose cached aggregate disagrees with its batches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StockDivergence {
    pub product_id: ProductId,
    pub code: ProductCode,
    pub aggregate: i64,
    pub batch_total: i64,
}

impl StockDivergence {
    pub fn is_consistent(&self) -> bool {
        self.aggregate == self.batch_total
    }
}

/// Purchases and sales, newest first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LedgerHistory {
    pub purchases: Vec<PurchaseBatch>,
    pub sales: Vec<SaleRecord>,
}

#[derive(Debug)]
pub struct LedgerEngine<S> {
    store: S,
}

impl<S: LedgerStore> LedgerEngine<S> {
    pub fn new(store: S) -> Self {
        let mode = store.mode();
        if mode.tracks_batches() {
            info!(mode = %mode, "ledger engine ready");
        } else {
            warn!(mode = %mode, "ledger engine running without batch tracking");
        }
        Self { store }
    }

    pub fn mode(&self) -> LedgerMode {
        self.store.mode()
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    #[instrument(skip(self, new), fields(name = %new.name))]
    pub async fn register_product(&self, new: NewProduct) -> Result<Product, LedgerError> {
        new.validate()?;
        let product = self.store.insert_product(new).await?;
        info!(product_id = %product.id, code = %product.code, "product registered");
        Ok(product)
    }

    pub async fn product(&self, id: ProductId) -> Result<Product, LedgerError> {
        self.store
            .get_product(id)
            .await?
            .ok_or(LedgerError::NotFound(id))
    }

    pub async fn products(&self) -> Result<Vec<Product>, LedgerError> {
        Ok(self.store.list_products().await?)
    }

    /// Edit a product's master data. The stock aggregate stays ledger-owned.
    #[instrument(skip(self, patch), fields(product_id = %id))]
    pub async fn update_product(
        &self,
        id: ProductId,
        patch: ProductPatch,
    ) -> Result<Product, LedgerError> {
        patch.validate()?;
        let product = self.store.update_product(id, patch).await?;
        info!(code = %product.code, "product updated");
        Ok(product)
    }

    /// Remove a product with all of its batches and sales.
    #[instrument(skip(self), fields(product_id = %id))]
    pub async fn remove_product(&self, id: ProductId) -> Result<(), LedgerError> {
        if !self.store.delete_product(id).await? {
            return Err(LedgerError::NotFound(id));
        }
        info!("product removed");
        Ok(())
    }

    /// Receive stock as a new batch and raise the aggregate.
    #[instrument(skip(self), fields(product_id = %product_id, unit_cost = %unit_cost))]
    pub async fn record_purchase(
        &self,
        product_id: ProductId,
        quantity: i64,
        unit_cost: Money,
    ) -> Result<PurchaseBatch, LedgerError> {
        ensure_positive_quantity(quantity, "purchase quantity")?;
        unit_cost.ensure_non_negative("unit cost")?;
        unit_cost.times(quantity)?;

        let result = self.purchase_in_tx(product_id, quantity, unit_cost).await;
        match &result {
            Ok(batch) => info!(
                batch_id = %batch.id,
                sequence = batch.sequence,
                "purchase recorded"
            ),
            Err(e) => report_failure(e),
        }
        result
    }

    async fn purchase_in_tx(
        &self,
        product_id: ProductId,
        quantity: i64,
        unit_cost: Money,
    ) -> Result<PurchaseBatch, LedgerError> {
        let mut tx = self.store.begin(product_id).await?;
        if self.mode().tracks_batches() {
            let batches = tx.list_consumable().await?;
            ensure_consistent(tx.product(), fifo::available(&batches))?;
        }

        let batch = tx.create_batch(quantity, unit_cost).await?;
        let mut product = tx.product().clone();
        product.receive(quantity)?;
        tx.set_quantity(product.quantity).await?;
        tx.commit().await?;
        Ok(batch)
    }

    /// Sell stock, consuming the oldest batches first.
    ///
    /// `unit_price` is whatever was charged; it is recorded as given and has
    /// no relation to batch cost.
    #[instrument(skip(self), fields(product_id = %product_id, unit_price = %unit_price))]
    pub async fn record_sale(
        &self,
        product_id: ProductId,
        quantity: i64,
        unit_price: Money,
    ) -> Result<SaleReceipt, LedgerError> {
        ensure_positive_quantity(quantity, "sale quantity")?;
        unit_price.ensure_non_negative("unit price")?;
        unit_price.times(quantity)?;

        let result = self.sale_in_tx(product_id, quantity, unit_price).await;
        match &result {
            Ok(receipt) => info!(
                sale_id = %receipt.sale.id,
                batches = receipt.consumptions.len(),
                mode = %receipt.mode,
                "sale recorded"
            ),
            Err(e) => report_failure(e),
        }
        result
    }

    async fn sale_in_tx(
        &self,
        product_id: ProductId,
        quantity: i64,
        unit_price: Money,
    ) -> Result<SaleReceipt, LedgerError> {
        let mode = self.mode();
        let mut tx = self.store.begin(product_id).await?;
        let sale = SaleRecord::new(SaleId::new(), product_id, quantity, unit_price, Utc::now())?;

        let consumptions = if mode.tracks_batches() {
            consume_fifo(tx.as_mut(), &sale).await?
        } else {
            Vec::new()
        };

        let mut product = tx.product().clone();
        product.release(quantity).map_err(|e| match e {
            DomainError::InsufficientStock {
                requested,
                available,
            } if !mode.tracks_batches() => LedgerError::InsufficientStock {
                product_id,
                requested,
                available,
            },
            other => other.into(),
        })?;

        tx.set_quantity(product.quantity).await?;
        tx.insert_sale(&sale, &consumptions).await?;
        tx.commit().await?;

        Ok(SaleReceipt {
            sale,
            consumptions,
            mode,
        })
    }

    /// Value everything on hand at batch cost.
    pub async fn current_valuation(&self) -> Result<InventoryValuation, LedgerError> {
        let snapshot = self.store.snapshot().await?;
        Ok(value_inventory(self.mode(), &snapshot)?)
    }

    pub async fn profit_and_loss(&self, period: ReportPeriod) -> Result<ProfitAndLoss, LedgerError> {
        let snapshot = self.store.snapshot().await?;
        Ok(profit_and_loss(self.mode(), &snapshot, period)?)
    }

    /// Products whose aggregate disagrees with Σ remaining of their batches.
    /// Always empty without batch tracking.
    pub async fn audit(&self) -> Result<Vec<StockDivergence>, LedgerError> {
        if !self.mode().tracks_batches() {
            return Ok(Vec::new());
        }
        let snapshot = self.store.snapshot().await?;
        let divergences: Vec<StockDivergence> = snapshot
            .products
            .iter()
            .map(|p| StockDivergence {
                product_id: p.id,
                code: p.code.clone(),
                aggregate: p.quantity,
                batch_total: snapshot
                    .batches_of(p.id)
                    .map(|b| b.remaining_quantity)
                    .sum(),
            })
            .filter(|d| !d.is_consistent())
            .collect();

        for d in &divergences {
            warn!(
                product_id = %d.product_id,
                aggregate = d.aggregate,
                batch_total = d.batch_total,
                "stock aggregate diverges from batches"
            );
        }
        Ok(divergences)
    }

    /// Reset a product's aggregate to the sum of its batches.
    ///
    /// Returns what was found; `is_consistent()` on the result tells whether
    /// anything had to change.
    #[instrument(skip(self), fields(product_id = %product_id))]
    pub async fn reconcile(&self, product_id: ProductId) -> Result<StockDivergence, LedgerError> {
        let mut tx = self.store.begin(product_id).await?;
        let batches = tx.list_consumable().await?;
        let found = StockDivergence {
            product_id,
            code: tx.product().code.clone(),
            aggregate: tx.product().quantity,
            batch_total: fifo::available(&batches),
        };

        if !found.is_consistent() {
            tx.set_quantity(found.batch_total).await?;
            tx.commit().await?;
            warn!(
                aggregate = found.aggregate,
                batch_total = found.batch_total,
                "stock aggregate reconciled to batch total"
            );
        }
        Ok(found)
    }

    /// Purchases and sales, newest first, optionally for a single product.
    pub async fn history(&self, product_id: Option<ProductId>) -> Result<LedgerHistory, LedgerError> {
        let snapshot = self.store.snapshot().await?;
        if let Some(id) = product_id {
            if !snapshot.products.iter().any(|p| p.id == id) {
                return Err(LedgerError::NotFound(id));
            }
        }
        let wanted = |id: ProductId| product_id.is_none_or(|p| p == id);

        let mut purchases: Vec<PurchaseBatch> = snapshot
            .batches
            .into_iter()
            .filter(|b| wanted(b.product_id))
            .collect();
        purchases.sort_by_key(|b| std::cmp::Reverse(b.fifo_key()));

        let mut sales: Vec<SaleRecord> = snapshot
            .sales
            .into_iter()
            .filter(|s| wanted(s.product_id))
            .collect();
        sales.sort_by_key(|s| std::cmp::Reverse(s.sold_at));

        Ok(LedgerHistory { purchases, sales })
    }
}

/// Walk the product's batches oldest first and apply the plan.
async fn consume_fifo(
    tx: &mut dyn LedgerTx,
    sale: &SaleRecord,
) -> Result<Vec<SaleConsumption>, LedgerError> {
    let batches = tx.list_consumable().await?;
    ensure_consistent(tx.product(), fifo::available(&batches))?;

    let plan = fifo::allocate(&batches, sale.quantity).map_err(|e| match e {
        DomainError::InsufficientStock {
            requested,
            available,
        } => LedgerError::InsufficientStock {
            product_id: sale.product_id,
            requested,
            available,
        },
        other => other.into(),
    })?;

    for allocation in &plan {
        tx.apply_consumption(allocation.batch_id, allocation.quantity)
            .await?;
    }

    Ok(plan
        .into_iter()
        .map(|a| a.into_consumption(sale.id))
        .collect())
}

/// Batches are authoritative; an aggregate that disagrees is never trusted.
fn ensure_consistent(product: &Product, batch_total: i64) -> Result<(), LedgerError> {
    if product.quantity != batch_total {
        return Err(LedgerError::InternalInconsistency(format!(
            "product {} aggregate {} does not match batch total {}",
            product.code, product.quantity, batch_total
        )));
    }
    Ok(())
}

fn report_failure(err: &LedgerError) {
    match err {
        LedgerError::InsufficientStock {
            requested,
            available,
            ..
        } => warn!(requested, available, "sale rejected: insufficient stock"),
        LedgerError::InternalInconsistency(msg) => {
            error!(reason = %msg, "ledger invariant violated; unit of work rolled back")
        }
        LedgerError::Store(e) => error!(error = %e, "ledger store failure"),
        _ => {}
    }
}
