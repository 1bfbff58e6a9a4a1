use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use stockledger_core::{BatchId, DomainError, Money, ProductId, SaleId};
use stockledger_inventory::{
    sort_fifo, LedgerMode, NewProduct, Product, ProductCode, ProductPatch, PurchaseBatch,
    SaleConsumption, SaleRecord,
};

use super::r#trait::{LedgerSnapshot, LedgerStore, LedgerTx, StoreError};

#[derive(Debug, Default)]
struct LedgerState {
    products: HashMap<ProductId, Product>,
    batches: HashMap<ProductId, Vec<PurchaseBatch>>,
    sales: Vec<SaleRecord>,
    consumptions: Vec<SaleConsumption>,
}

/// Hands out batch sequence numbers and receipt times that never go backwards.
#[derive(Debug, Default)]
struct BatchClock {
    sequence: u64,
    last: Option<DateTime<Utc>>,
}

impl BatchClock {
    fn tick(&mut self) -> (u64, DateTime<Utc>) {
        let now = Utc::now();
        let at = match self.last {
            Some(last) if last > now => last,
            _ => now,
        };
        self.sequence += 1;
        self.last = Some(at);
        (self.sequence, at)
    }
}

/// In-memory batch store.
///
/// Intended for tests/dev and for running without a database. Units of work on
/// the same product are serialized by a per-product async mutex; each one
/// edits a private copy of the product's rows and publishes it on commit.
#[derive(Debug)]
pub struct InMemoryLedgerStore {
    mode: LedgerMode,
    state: Arc<RwLock<LedgerState>>,
    locks: Mutex<HashMap<ProductId, Arc<AsyncMutex<()>>>>,
    clock: Arc<Mutex<BatchClock>>,
}

impl Default for InMemoryLedgerStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::with_mode(LedgerMode::Fifo)
    }

    /// A store that behaves like a schema without batch remainders.
    pub fn with_mode(mode: LedgerMode) -> Self {
        Self {
            mode,
            state: Arc::new(RwLock::new(LedgerState::default())),
            locks: Mutex::new(HashMap::new()),
            clock: Arc::new(Mutex::new(BatchClock::default())),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, LedgerState>, StoreError> {
        self.state.read().map_err(|_| StoreError::Poisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, LedgerState>, StoreError> {
        self.state.write().map_err(|_| StoreError::Poisoned)
    }

    fn product_lock(&self, id: ProductId) -> Result<Arc<AsyncMutex<()>>, StoreError> {
        let mut locks = self.locks.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(locks.entry(id).or_default().clone())
    }

    fn exists(&self, id: ProductId) -> Result<bool, StoreError> {
        Ok(self.read()?.products.contains_key(&id))
    }
}

fn ordered_products<'a>(products: impl Iterator<Item = &'a Product>) -> Vec<Product> {
    let mut products: Vec<Product> = products.cloned().collect();
    products.sort_by(|a, b| (a.created_at, &a.code).cmp(&(b.created_at, &b.code)));
    products
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    fn mode(&self) -> LedgerMode {
        self.mode
    }

    async fn insert_product(&self, new: NewProduct) -> Result<Product, StoreError> {
        new.validate()?;
        let mut state = self.write()?;
        let code = ProductCode::next_after(state.products.values().map(|p| &p.code));
        let product = Product::register(ProductId::new(), code, new, Utc::now())?;
        state.products.insert(product.id, product.clone());
        Ok(product)
    }

    async fn get_product(&self, id: ProductId) -> Result<Option<Product>, StoreError> {
        Ok(self.read()?.products.get(&id).cloned())
    }

    async fn list_products(&self) -> Result<Vec<Product>, StoreError> {
        Ok(ordered_products(self.read()?.products.values()))
    }

    async fn update_product(
        &self,
        id: ProductId,
        patch: ProductPatch,
    ) -> Result<Product, StoreError> {
        patch.validate()?;
        if !self.exists(id)? {
            return Err(StoreError::ProductNotFound(id));
        }
        // A unit of work publishes its own copy of the product on commit.
        let lock = self.product_lock(id)?;
        let _guard = lock.lock().await;

        let mut state = self.write()?;
        let product = state
            .products
            .get_mut(&id)
            .ok_or(StoreError::ProductNotFound(id))?;
        product.apply(patch)?;
        Ok(product.clone())
    }

    async fn delete_product(&self, id: ProductId) -> Result<bool, StoreError> {
        if !self.exists(id)? {
            return Ok(false);
        }
        let lock = self.product_lock(id)?;
        let _guard = lock.lock().await;

        let removed = {
            let mut state = self.write()?;
            if state.products.remove(&id).is_some() {
                state.batches.remove(&id);
                let sale_ids: HashSet<SaleId> = state
                    .sales
                    .iter()
                    .filter(|s| s.product_id == id)
                    .map(|s| s.id)
                    .collect();
                state.sales.retain(|s| s.product_id != id);
                state.consumptions.retain(|c| !sale_ids.contains(&c.sale_id));
                true
            } else {
                false
            }
        };

        self.locks
            .lock()
            .map_err(|_| StoreError::Poisoned)?
            .remove(&id);
        Ok(removed)
    }

    async fn begin(&self, product_id: ProductId) -> Result<Box<dyn LedgerTx>, StoreError> {
        if !self.exists(product_id)? {
            return Err(StoreError::ProductNotFound(product_id));
        }
        let guard = self.product_lock(product_id)?.lock_owned().await;

        // Re-read under the product lock: a delete may have won the race.
        let (product, batches) = {
            let state = self.read()?;
            let product = state
                .products
                .get(&product_id)
                .cloned()
                .ok_or(StoreError::ProductNotFound(product_id))?;
            let batches = state.batches.get(&product_id).cloned().unwrap_or_default();
            (product, batches)
        };

        Ok(Box::new(InMemoryLedgerTx {
            _guard: guard,
            mode: self.mode,
            state: Arc::clone(&self.state),
            clock: Arc::clone(&self.clock),
            product,
            batches,
            sales: Vec::new(),
            consumptions: Vec::new(),
            finished: false,
        }))
    }

    async fn snapshot(&self) -> Result<LedgerSnapshot, StoreError> {
        let state = self.read()?;

        let mut batches: Vec<PurchaseBatch> = state.batches.values().flatten().cloned().collect();
        sort_fifo(&mut batches);

        let mut sales = state.sales.clone();
        sales.sort_by_key(|s| s.sold_at);

        let consumptions = if self.mode.tracks_batches() {
            state.consumptions.clone()
        } else {
            Vec::new()
        };

        Ok(LedgerSnapshot {
            products: ordered_products(state.products.values()),
            batches,
            sales,
            consumptions,
        })
    }
}

struct InMemoryLedgerTx {
    _guard: OwnedMutexGuard<()>,
    mode: LedgerMode,
    state: Arc<RwLock<LedgerState>>,
    clock: Arc<Mutex<BatchClock>>,
    product: Product,
    batches: Vec<PurchaseBatch>,
    sales: Vec<SaleRecord>,
    consumptions: Vec<SaleConsumption>,
    finished: bool,
}

impl InMemoryLedgerTx {
    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.finished {
            return Err(StoreError::Finished);
        }
        Ok(())
    }

    fn ensure_batches(&self) -> Result<(), StoreError> {
        if !self.mode.tracks_batches() {
            return Err(StoreError::Unsupported(self.mode));
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerTx for InMemoryLedgerTx {
    fn product(&self) -> &Product {
        &self.product
    }

    async fn create_batch(
        &mut self,
        quantity: i64,
        unit_cost: Money,
    ) -> Result<PurchaseBatch, StoreError> {
        self.ensure_open()?;
        let (sequence, received_at) = self
            .clock
            .lock()
            .map_err(|_| StoreError::Poisoned)?
            .tick();
        let batch = PurchaseBatch::receive(
            BatchId::new(),
            self.product.id,
            sequence,
            quantity,
            unit_cost,
            received_at,
        )?;
        self.batches.push(batch.clone());
        Ok(batch)
    }

    async fn list_consumable(&mut self) -> Result<Vec<PurchaseBatch>, StoreError> {
        self.ensure_open()?;
        self.ensure_batches()?;
        let mut consumable: Vec<PurchaseBatch> = self
            .batches
            .iter()
            .filter(|b| b.is_consumable())
            .cloned()
            .collect();
        sort_fifo(&mut consumable);
        Ok(consumable)
    }

    async fn apply_consumption(
        &mut self,
        batch_id: BatchId,
        amount: i64,
    ) -> Result<(), StoreError> {
        self.ensure_open()?;
        self.ensure_batches()?;
        let batch = self
            .batches
            .iter_mut()
            .find(|b| b.id == batch_id)
            .ok_or(StoreError::BatchNotFound(batch_id))?;
        if amount > batch.remaining_quantity {
            return Err(StoreError::OverConsumption {
                batch_id,
                requested: amount,
                remaining: batch.remaining_quantity,
            });
        }
        batch.consume(amount)?;
        Ok(())
    }

    async fn set_quantity(&mut self, quantity: i64) -> Result<(), StoreError> {
        self.ensure_open()?;
        if quantity < 0 {
            return Err(DomainError::invalid_quantity(format!(
                "stock aggregate cannot be negative (got {quantity})"
            ))
            .into());
        }
        self.product.quantity = quantity;
        Ok(())
    }

    async fn insert_sale(
        &mut self,
        sale: &SaleRecord,
        consumptions: &[SaleConsumption],
    ) -> Result<(), StoreError> {
        self.ensure_open()?;
        if sale.product_id != self.product.id {
            return Err(DomainError::invariant(format!(
                "sale {} belongs to {}, unit of work holds {}",
                sale.id, sale.product_id, self.product.id
            ))
            .into());
        }
        if !consumptions.is_empty() {
            self.ensure_batches()?;
        }
        self.sales.push(sale.clone());
        self.consumptions.extend_from_slice(consumptions);
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        self.ensure_open()?;
        let mut state = self.state.write().map_err(|_| StoreError::Poisoned)?;
        state.products.insert(self.product.id, self.product.clone());
        state
            .batches
            .insert(self.product.id, std::mem::take(&mut self.batches));
        state.sales.append(&mut self.sales);
        state.consumptions.append(&mut self.consumptions);
        self.finished = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store_with_widget() -> (InMemoryLedgerStore, Product) {
        let store = InMemoryLedgerStore::new();
        let widget = store.insert_product(NewProduct::named("Widget")).await.unwrap();
        (store, widget)
    }

    #[tokio::test]
    async fn product_codes_are_generated_in_order() {
        let store = InMemoryLedgerStore::new();
        let a = store.insert_product(NewProduct::named("A")).await.unwrap();
        let b = store.insert_product(NewProduct::named("B")).await.unwrap();
        assert_eq!(a.code.as_str(), "P01");
        assert_eq!(b.code.as_str(), "P02");
        assert_eq!(store.list_products().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn invalid_product_is_rejected() {
        let store = InMemoryLedgerStore::new();
        let err = store.insert_product(NewProduct::named(" ")).await.unwrap_err();
        assert!(matches!(err, StoreError::Domain(DomainError::Validation(_))));
    }

    #[tokio::test]
    async fn batches_get_increasing_sequence_and_time() {
        let (store, widget) = store_with_widget().await;
        let mut tx = store.begin(widget.id).await.unwrap();
        let first = tx.create_batch(5, Money::from_minor(100)).await.unwrap();
        let second = tx.create_batch(5, Money::from_minor(200)).await.unwrap();
        assert!(second.sequence > first.sequence);
        assert!(second.received_at >= first.received_at);
        assert_eq!(first.remaining_quantity, 5);

        let listed = tx.list_consumable().await.unwrap();
        assert_eq!(listed[0].id, first.id);
        assert_eq!(listed[1].id, second.id);
    }

    #[tokio::test]
    async fn dropped_unit_of_work_leaves_no_trace() {
        let (store, widget) = store_with_widget().await;
        {
            let mut tx = store.begin(widget.id).await.unwrap();
            tx.create_batch(5, Money::from_minor(100)).await.unwrap();
            tx.set_quantity(5).await.unwrap();
        }
        let snapshot = store.snapshot().await.unwrap();
        assert!(snapshot.batches.is_empty());
        assert_eq!(snapshot.products[0].quantity, 0);
    }

    #[tokio::test]
    async fn commit_publishes_and_closes() {
        let (store, widget) = store_with_widget().await;
        let mut tx = store.begin(widget.id).await.unwrap();
        tx.create_batch(5, Money::from_minor(100)).await.unwrap();
        tx.set_quantity(5).await.unwrap();
        tx.commit().await.unwrap();
        assert!(matches!(tx.commit().await, Err(StoreError::Finished)));
        drop(tx);

        let product = store.get_product(widget.id).await.unwrap().unwrap();
        assert_eq!(product.quantity, 5);
        assert_eq!(store.snapshot().await.unwrap().batches.len(), 1);
    }

    #[tokio::test]
    async fn over_consumption_is_refused_without_change() {
        let (store, widget) = store_with_widget().await;
        let mut tx = store.begin(widget.id).await.unwrap();
        let batch = tx.create_batch(3, Money::from_minor(100)).await.unwrap();
        let err = tx.apply_consumption(batch.id, 4).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::OverConsumption {
                requested: 4,
                remaining: 3,
                ..
            }
        ));
        assert_eq!(tx.list_consumable().await.unwrap()[0].remaining_quantity, 3);

        let missing = tx.apply_consumption(BatchId::new(), 1).await.unwrap_err();
        assert!(matches!(missing, StoreError::BatchNotFound(_)));
    }

    #[tokio::test]
    async fn exhausted_batches_are_kept_but_not_listed() {
        let (store, widget) = store_with_widget().await;
        let mut tx = store.begin(widget.id).await.unwrap();
        let batch = tx.create_batch(2, Money::from_minor(100)).await.unwrap();
        tx.apply_consumption(batch.id, 2).await.unwrap();
        assert!(tx.list_consumable().await.unwrap().is_empty());
        tx.commit().await.unwrap();
        drop(tx);

        let snapshot = store.snapshot().await.unwrap();
        assert_eq!(snapshot.batches.len(), 1);
        assert_eq!(snapshot.batches[0].remaining_quantity, 0);
    }

    #[tokio::test]
    async fn unknown_product_cannot_be_locked() {
        let store = InMemoryLedgerStore::new();
        let id = ProductId::new();
        assert!(matches!(
            store.begin(id).await.err(),
            Some(StoreError::ProductNotFound(missing)) if missing == id
        ));
    }

    #[tokio::test]
    async fn aggregate_only_mode_refuses_batch_tracking() {
        let store = InMemoryLedgerStore::with_mode(LedgerMode::AggregateOnly);
        let widget = store.insert_product(NewProduct::named("Widget")).await.unwrap();
        let mut tx = store.begin(widget.id).await.unwrap();
        tx.create_batch(5, Money::from_minor(100)).await.unwrap();
        assert!(matches!(
            tx.list_consumable().await,
            Err(StoreError::Unsupported(LedgerMode::AggregateOnly))
        ));
    }

    #[tokio::test]
    async fn delete_cascades_to_batches_and_sales() {
        let (store, widget) = store_with_widget().await;
        let other = store.insert_product(NewProduct::named("Gadget")).await.unwrap();

        for id in [widget.id, other.id] {
            let mut tx = store.begin(id).await.unwrap();
            let batch = tx.create_batch(4, Money::from_minor(100)).await.unwrap();
            tx.apply_consumption(batch.id, 1).await.unwrap();
            tx.set_quantity(3).await.unwrap();
            let sale =
                SaleRecord::new(SaleId::new(), id, 1, Money::from_minor(300), Utc::now()).unwrap();
            let consumption = SaleConsumption {
                sale_id: sale.id,
                batch_id: batch.id,
                quantity: 1,
                unit_cost: batch.unit_cost,
            };
            tx.insert_sale(&sale, &[consumption]).await.unwrap();
            tx.commit().await.unwrap();
        }

        assert!(store.delete_product(widget.id).await.unwrap());
        assert!(!store.delete_product(widget.id).await.unwrap());

        let snapshot = store.snapshot().await.unwrap();
        assert_eq!(snapshot.products.len(), 1);
        assert!(snapshot.batches.iter().all(|b| b.product_id == other.id));
        assert!(snapshot.sales.iter().all(|s| s.product_id == other.id));
        assert_eq!(snapshot.consumptions.len(), 1);
    }

    #[tokio::test]
    async fn second_unit_of_work_waits_for_the_first() {
        let store = Arc::new(InMemoryLedgerStore::new());
        let widget = store.insert_product(NewProduct::named("Widget")).await.unwrap();

        let mut first = store.begin(widget.id).await.unwrap();
        first.set_quantity(1).await.unwrap();

        let waiting = {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                let mut tx = store.begin(widget.id).await.unwrap();
                let seen = tx.product().quantity;
                tx.commit().await.unwrap();
                seen
            })
        };

        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(!waiting.is_finished());

        first.commit().await.unwrap();
        drop(first);
        assert_eq!(waiting.await.unwrap(), 1);
    }

    #[tokio::test]
    async fn update_edits_master_data_only() {
        let (store, widget) = store_with_widget().await;
        let mut tx = store.begin(widget.id).await.unwrap();
        tx.set_quantity(4).await.unwrap();
        tx.commit().await.unwrap();
        drop(tx);

        let updated = store
            .update_product(
                widget.id,
                ProductPatch {
                    name: Some("Widget XL".to_string()),
                    price: Some(Money::from_minor(990)),
                    ..ProductPatch::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.name, "Widget XL");
        assert_eq!(updated.quantity, 4);
        assert_eq!(store.get_product(widget.id).await.unwrap(), Some(updated));
    }

    #[tokio::test]
    async fn update_of_unknown_or_with_bad_patch_fails() {
        let (store, widget) = store_with_widget().await;
        assert!(matches!(
            store
                .update_product(ProductId::new(), ProductPatch::default())
                .await,
            Err(StoreError::ProductNotFound(_))
        ));
        assert!(matches!(
            store
                .update_product(
                    widget.id,
                    ProductPatch {
                        price: Some(Money::from_minor(-1)),
                        ..ProductPatch::default()
                    },
                )
                .await,
            Err(StoreError::Domain(DomainError::InvalidQuantity(_)))
        ));
        assert_eq!(store.get_product(widget.id).await.unwrap(), Some(widget));
    }

    #[tokio::test]
    async fn update_waits_for_open_unit_of_work_and_survives_its_commit() {
        let store = Arc::new(InMemoryLedgerStore::new());
        let widget = store.insert_product(NewProduct::named("Widget")).await.unwrap();

        let mut tx = store.begin(widget.id).await.unwrap();
        tx.set_quantity(2).await.unwrap();

        let rename = {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                store
                    .update_product(
                        widget.id,
                        ProductPatch {
                            name: Some("Renamed".to_string()),
                            ..ProductPatch::default()
                        },
                    )
                    .await
            })
        };
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(!rename.is_finished());

        tx.commit().await.unwrap();
        drop(tx);
        rename.await.unwrap().unwrap();

        let product = store.get_product(widget.id).await.unwrap().unwrap();
        assert_eq!(product.name, "Renamed");
        assert_eq!(product.quantity, 2);
    }
}
