//! Postgres store against a live database.
//!
//! Needs `DATABASE_URL`; run with `cargo test -p stockledger-infra -- --ignored`.
//! Every test works in a schema of its own, dropped again on success.

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

use stockledger_core::{BatchId, Money, ProductId};
use stockledger_infra::projections::ReportPeriod;
use stockledger_infra::schema;
use stockledger_infra::store::{LedgerSnapshot, LedgerTx};
use stockledger_infra::{LedgerEngine, LedgerError, LedgerStore, PostgresLedgerStore, StoreError};
use stockledger_inventory::{
    LedgerMode, NewProduct, Product, ProductPatch, PurchaseBatch, SaleConsumption, SaleRecord,
};

struct TestSchema {
    name: String,
    pool: PgPool,
    url: String,
}

impl TestSchema {
    /// `None` when no database is configured.
    async fn create() -> Option<Self> {
        let Ok(url) = std::env::var("DATABASE_URL") else {
            eprintln!("DATABASE_URL not set; skipping");
            return None;
        };
        let name = format!("ledger_test_{}", Uuid::now_v7().simple());

        let admin = PgPool::connect(&url).await.unwrap();
        sqlx::query(&format!("CREATE SCHEMA {name}"))
            .execute(&admin)
            .await
            .unwrap();
        admin.close().await;

        let search_path = format!("SET search_path TO {name}");
        let pool = PgPoolOptions::new()
            .max_connections(8)
            .after_connect(move |conn, _meta| {
                let search_path = search_path.clone();
                Box::pin(async move {
                    sqlx::query(&search_path).execute(conn).await?;
                    Ok(())
                })
            })
            .connect(&url)
            .await
            .unwrap();

        Some(Self { name, pool, url })
    }

    async fn store(&self, run_migrations: bool) -> PostgresLedgerStore {
        PostgresLedgerStore::open(self.pool.clone(), run_migrations)
            .await
            .unwrap()
    }

    async fn drop_schema(self) {
        self.pool.close().await;
        let admin = PgPool::connect(&self.url).await.unwrap();
        sqlx::query(&format!("DROP SCHEMA {} CASCADE", self.name))
            .execute(&admin)
            .await
            .unwrap();
        admin.close().await;
    }
}

fn money(units: i64, cents: i64) -> Money {
    Money::from_minor(units * 100 + cents)
}

fn remaining_of(snapshot: &LedgerSnapshot, product: ProductId) -> Vec<i64> {
    snapshot
        .batches_of(product)
        .map(|b| b.remaining_quantity)
        .collect()
}

#[tokio::test]
#[ignore] // Requires database connection
async fn widget_scenario_on_postgres() {
    let Some(db) = TestSchema::create().await else {
        return;
    };
    let engine = LedgerEngine::new(db.store(true).await);
    assert_eq!(engine.mode(), LedgerMode::Fifo);

    let widget = engine
        .register_product(NewProduct::named("Widget"))
        .await
        .unwrap()
        .id;
    engine.record_purchase(widget, 10, money(2, 0)).await.unwrap();
    engine.record_purchase(widget, 5, money(3, 0)).await.unwrap();
    let receipt = engine.record_sale(widget, 12, money(5, 0)).await.unwrap();
    assert_eq!(receipt.cost_of_goods().unwrap(), money(26, 0));

    assert_eq!(engine.product(widget).await.unwrap().quantity, 3);
    let snapshot = engine.store().snapshot().await.unwrap();
    assert_eq!(remaining_of(&snapshot, widget), vec![0, 3]);

    let valuation = engine.current_valuation().await.unwrap();
    assert_eq!(valuation.total_value, money(9, 0));
    let pl = engine.profit_and_loss(ReportPeriod::default()).await.unwrap();
    assert_eq!(pl.net, money(25, 0));
    assert_eq!(pl.cost_of_goods_sold, Some(money(26, 0)));
    assert!(engine.audit().await.unwrap().is_empty());

    db.drop_schema().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore] // Requires database connection
async fn concurrent_oversell_has_exactly_one_winner() {
    let Some(db) = TestSchema::create().await else {
        return;
    };
    let engine = Arc::new(LedgerEngine::new(db.store(true).await));

    for round in 0..10 {
        let widget = engine
            .register_product(NewProduct::named(format!("Widget {round}")))
            .await
            .unwrap()
            .id;
        engine.record_purchase(widget, 5, money(1, 0)).await.unwrap();
        engine.record_purchase(widget, 5, money(2, 0)).await.unwrap();

        let a = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.record_sale(widget, 7, money(5, 0)).await })
        };
        let b = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.record_sale(widget, 6, money(5, 0)).await })
        };

        let results = [a.await.unwrap(), b.await.unwrap()];
        let wins = results.iter().filter(|r| r.is_ok()).count();
        let rejections = results
            .iter()
            .filter(|r| matches!(r, Err(LedgerError::InsufficientStock { .. })))
            .count();
        assert_eq!((wins, rejections), (1, 1));

        let left = engine.product(widget).await.unwrap().quantity;
        assert!(left == 3 || left == 4, "left {left}");
        let snapshot = engine.store().snapshot().await.unwrap();
        assert_eq!(remaining_of(&snapshot, widget).iter().sum::<i64>(), left);
    }
    assert!(engine.audit().await.unwrap().is_empty());

    db.drop_schema().await;
}

/// Postgres store whose units of work fail when the sale row is written.
struct FailOnSaleInsert(PostgresLedgerStore);

struct FailingTx(Box<dyn LedgerTx>);

#[async_trait]
impl LedgerTx for FailingTx {
    fn product(&self) -> &Product {
        self.0.product()
    }

    async fn create_batch(
        &mut self,
        quantity: i64,
        unit_cost: Money,
    ) -> Result<PurchaseBatch, StoreError> {
        self.0.create_batch(quantity, unit_cost).await
    }

    async fn list_consumable(&mut self) -> Result<Vec<PurchaseBatch>, StoreError> {
        self.0.list_consumable().await
    }

    async fn apply_consumption(&mut self, batch_id: BatchId, amount: i64) -> Result<(), StoreError> {
        self.0.apply_consumption(batch_id, amount).await
    }

    async fn set_quantity(&mut self, quantity: i64) -> Result<(), StoreError> {
        self.0.set_quantity(quantity).await
    }

    async fn insert_sale(
        &mut self,
        _sale: &SaleRecord,
        _consumptions: &[SaleConsumption],
    ) -> Result<(), StoreError> {
        Err(StoreError::Database("injected failure".to_string()))
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        self.0.commit().await
    }
}

#[async_trait]
impl LedgerStore for FailOnSaleInsert {
    fn mode(&self) -> LedgerMode {
        self.0.mode()
    }

    async fn insert_product(&self, new: NewProduct) -> Result<Product, StoreError> {
        self.0.insert_product(new).await
    }

    async fn get_product(&self, id: ProductId) -> Result<Option<Product>, StoreError> {
        self.0.get_product(id).await
    }

    async fn list_products(&self) -> Result<Vec<Product>, StoreError> {
        self.0.list_products().await
    }

    async fn update_product(&self, id: ProductId, patch: ProductPatch) -> Result<Product, StoreError> {
        self.0.update_product(id, patch).await
    }

    async fn delete_product(&self, id: ProductId) -> Result<bool, StoreError> {
        self.0.delete_product(id).await
    }

    async fn begin(&self, product_id: ProductId) -> Result<Box<dyn LedgerTx>, StoreError> {
        Ok(Box::new(FailingTx(self.0.begin(product_id).await?)))
    }

    async fn snapshot(&self) -> Result<LedgerSnapshot, StoreError> {
        self.0.snapshot().await
    }
}

#[tokio::test]
#[ignore] // Requires database connection
async fn failed_sale_rolls_back_batches_and_aggregate() {
    let Some(db) = TestSchema::create().await else {
        return;
    };
    let engine = LedgerEngine::new(FailOnSaleInsert(db.store(true).await));
    let widget = engine
        .register_product(NewProduct::named("Widget"))
        .await
        .unwrap()
        .id;
    engine.record_purchase(widget, 5, money(1, 0)).await.unwrap();
    engine.record_purchase(widget, 5, money(2, 0)).await.unwrap();
    let before = engine.store().snapshot().await.unwrap();

    let err = engine.record_sale(widget, 7, money(5, 0)).await.unwrap_err();
    assert!(matches!(err, LedgerError::Store(StoreError::Database(_))));

    let after = engine.store().snapshot().await.unwrap();
    assert_eq!(after, before);
    assert_eq!(engine.product(widget).await.unwrap().quantity, 10);
    assert_eq!(remaining_of(&after, widget), vec![5, 5]);
    assert!(after.sales.is_empty());

    db.drop_schema().await;
}

#[tokio::test]
#[ignore] // Requires database connection
async fn update_product_leaves_stock_alone() {
    let Some(db) = TestSchema::create().await else {
        return;
    };
    let engine = LedgerEngine::new(db.store(true).await);
    let widget = engine
        .register_product(NewProduct::named("Widget"))
        .await
        .unwrap()
        .id;
    engine.record_purchase(widget, 4, money(1, 0)).await.unwrap();

    let patch = ProductPatch {
        name: Some("Widget XL".to_string()),
        price: Some(money(7, 50)),
        ..ProductPatch::default()
    };
    let updated = engine.update_product(widget, patch).await.unwrap();
    assert_eq!(updated.name, "Widget XL");
    assert_eq!(updated.price, money(7, 50));
    assert_eq!(updated.quantity, 4);
    assert_eq!(engine.product(widget).await.unwrap(), updated);

    let missing = engine
        .update_product(ProductId::new(), ProductPatch::default())
        .await
        .unwrap_err();
    assert!(matches!(missing, LedgerError::NotFound(_)));

    db.drop_schema().await;
}

#[tokio::test]
#[ignore] // Requires database connection
async fn upgrade_charges_earlier_sales_to_oldest_batches() {
    let Some(db) = TestSchema::create().await else {
        return;
    };

    // Base schema only, as a deployment from before batch tracking would have.
    let base = schema::MIGRATOR
        .iter()
        .find(|m| m.version == 1)
        .unwrap();
    sqlx::raw_sql(&base.sql).execute(&db.pool).await.unwrap();

    let old = LedgerEngine::new(db.store(false).await);
    assert_eq!(old.mode(), LedgerMode::AggregateOnly);
    let widget = old
        .register_product(NewProduct::named("Widget"))
        .await
        .unwrap()
        .id;
    let gadget = old
        .register_product(NewProduct::named("Gadget"))
        .await
        .unwrap()
        .id;
    old.record_purchase(widget, 10, money(1, 0)).await.unwrap();
    old.record_purchase(widget, 5, money(2, 0)).await.unwrap();
    old.record_purchase(gadget, 3, money(4, 0)).await.unwrap();
    old.record_sale(widget, 6, money(5, 0)).await.unwrap();
    assert_eq!(old.product(widget).await.unwrap().quantity, 9);

    let upgraded = LedgerEngine::new(db.store(true).await);
    assert_eq!(upgraded.mode(), LedgerMode::Fifo);
    assert!(upgraded.audit().await.unwrap().is_empty());

    let snapshot = upgraded.store().snapshot().await.unwrap();
    assert_eq!(remaining_of(&snapshot, widget), vec![4, 5]);
    assert_eq!(remaining_of(&snapshot, gadget), vec![3]);

    // The next sale continues from where the old sales stopped.
    let receipt = upgraded.record_sale(widget, 5, money(5, 0)).await.unwrap();
    assert_eq!(receipt.cost_of_goods().unwrap(), money(6, 0));
    assert!(upgraded.audit().await.unwrap().is_empty());

    db.drop_schema().await;
}
