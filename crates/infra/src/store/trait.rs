use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use stockledger_core::{BatchId, DomainError, Money, ProductId};
use stockledger_inventory::{
    LedgerMode, NewProduct, Product, ProductPatch, PurchaseBatch, SaleConsumption, SaleRecord,
};

/// Batch store operation error.
///
/// These are storage-side failures. Domain validation failures raised while a
/// store builds a record are carried unchanged in [`StoreError::Domain`].
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("product not found: {0}")]
    ProductNotFound(ProductId),

    #[error("batch not found: {0}")]
    BatchNotFound(BatchId),

    #[error("over-consumption of batch {batch_id}: requested {requested}, remaining {remaining}")]
    OverConsumption {
        batch_id: BatchId,
        requested: i64,
        remaining: i64,
    },

    #[error("batch tracking is not available in {0} mode")]
    Unsupported(LedgerMode),

    #[error("unit of work already finished")]
    Finished,

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("lock poisoned")]
    Poisoned,

    #[error("database error: {0}")]
    Database(String),

    #[error("corrupt row: {0}")]
    Corrupt(String),

    #[error(transparent)]
    Domain(#[from] DomainError),
}

/// Everything the reports need, read under one isolation scope.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LedgerSnapshot {
    pub products: Vec<Product>,
    /// All batches (exhausted ones included), oldest first.
    pub batches: Vec<PurchaseBatch>,
    /// All sales, oldest first.
    pub sales: Vec<SaleRecord>,
    /// Empty in aggregate-only mode.
    pub consumptions: Vec<SaleConsumption>,
}

impl LedgerSnapshot {
    pub fn batches_of(&self, product_id: ProductId) -> impl Iterator<Item = &PurchaseBatch> {
        self.batches.iter().filter(move |b| b.product_id == product_id)
    }

    pub fn sales_of(&self, product_id: ProductId) -> impl Iterator<Item = &SaleRecord> {
        self.sales.iter().filter(move |s| s.product_id == product_id)
    }
}

/// Durable storage for products, purchase batches and sale facts.
///
/// Reads and master-data writes go straight through the store. Every stock
/// mutation goes through a [`LedgerTx`] obtained from [`LedgerStore::begin`],
/// which holds the product exclusively until it is committed or dropped.
///
/// Implementations must:
/// - serialize units of work on the same product
/// - make a unit of work all-or-nothing (dropping it without `commit` discards
///   every write made through it)
/// - hand out snapshots that never contain half of a unit of work
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Capability the backing schema supports.
    fn mode(&self) -> LedgerMode;

    /// Register a product under the next free generated code.
    async fn insert_product(&self, new: NewProduct) -> Result<Product, StoreError>;

    async fn get_product(&self, id: ProductId) -> Result<Option<Product>, StoreError>;

    /// All products ordered by code.
    async fn list_products(&self) -> Result<Vec<Product>, StoreError>;

    /// Edit master data. Waits for any in-flight unit of work on the product
    /// and never writes the stock aggregate.
    async fn update_product(&self, id: ProductId, patch: ProductPatch)
    -> Result<Product, StoreError>;

    /// Remove a product with its batches, sales and consumptions.
    /// Returns `false` when the product did not exist.
    async fn delete_product(&self, id: ProductId) -> Result<bool, StoreError>;

    /// Open a unit of work on one product, waiting for any in-flight one.
    async fn begin(&self, product_id: ProductId) -> Result<Box<dyn LedgerTx>, StoreError>;

    async fn snapshot(&self) -> Result<LedgerSnapshot, StoreError>;
}

/// A product-scoped, all-or-nothing unit of work.
#[async_trait]
pub trait LedgerTx: Send {
    /// The locked product as seen by this unit of work (including its own
    /// uncommitted aggregate writes).
    fn product(&self) -> &Product;

    /// Record a new full batch. Assigns `sequence` and a non-decreasing
    /// `received_at`. Does not touch the aggregate.
    async fn create_batch(
        &mut self,
        quantity: i64,
        unit_cost: Money,
    ) -> Result<PurchaseBatch, StoreError>;

    /// Batches with stock left, oldest first, as of this call.
    async fn list_consumable(&mut self) -> Result<Vec<PurchaseBatch>, StoreError>;

    /// Take `amount` units out of one of this product's batches.
    async fn apply_consumption(&mut self, batch_id: BatchId, amount: i64)
    -> Result<(), StoreError>;

    /// Overwrite the cached aggregate.
    async fn set_quantity(&mut self, quantity: i64) -> Result<(), StoreError>;

    /// Persist a sale and the batch consumptions that paid for it.
    async fn insert_sale(
        &mut self,
        sale: &SaleRecord,
        consumptions: &[SaleConsumption],
    ) -> Result<(), StoreError>;

    /// Publish every write made through this unit of work.
    async fn commit(&mut self) -> Result<(), StoreError>;
}

#[async_trait]
impl<S> LedgerStore for Arc<S>
where
    S: LedgerStore + ?Sized,
{
    fn mode(&self) -> LedgerMode {
        (**self).mode()
    }

    async fn insert_product(&self, new: NewProduct) -> Result<Product, StoreError> {
        (**self).insert_product(new).await
    }

    async fn get_product(&self, id: ProductId) -> Result<Option<Product>, StoreError> {
        (**self).get_product(id).await
    }

    async fn list_products(&self) -> Result<Vec<Product>, StoreError> {
        (**self).list_products().await
    }

    async fn update_product(
        &self,
        id: ProductId,
        patch: ProductPatch,
    ) -> Result<Product, StoreError> {
        (**self).update_product(id, patch).await
    }

    async fn delete_product(&self, id: ProductId) -> Result<bool, StoreError> {
        (**self).delete_product(id).await
    }

    async fn begin(&self, product_id: ProductId) -> Result<Box<dyn LedgerTx>, StoreError> {
        (**self).begin(product_id).await
    }

    async fn snapshot(&self) -> Result<LedgerSnapshot, StoreError> {
        (**self).snapshot().await
    }
}
