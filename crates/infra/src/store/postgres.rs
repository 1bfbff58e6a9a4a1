//! Postgres-backed batch store.
//!
//! One database transaction per unit of work. `begin` locks the product row
//! with `SELECT ... FOR UPDATE`; consumable batches are read `FOR UPDATE` in
//! FIFO index order, so concurrent sales of one product queue behind each
//! other while different products proceed in parallel.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError |
//! |------------|----------------------|------------|
//! | Database (unique violation) | `23505` | `Conflict` |
//! | Database (serialization failure / deadlock) | `40001` / `40P01` | `Conflict` |
//! | Database (other) | Any other | `Database` |
//! | PoolClosed / other | N/A | `Database` |

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgConnection, PgPool, Postgres, Row, Transaction};
use tracing::{field, instrument, Span};
use uuid::Uuid;

use stockledger_core::error::ensure_positive_quantity;
use stockledger_core::{BatchId, DomainError, Money, ProductId, SaleId};
use stockledger_inventory::{
    LedgerMode, NewProduct, Product, ProductCode, ProductPatch, PurchaseBatch, SaleConsumption,
    SaleRecord,
};

use super::r#trait::{LedgerSnapshot, LedgerStore, LedgerTx, StoreError};
use crate::config::DatabaseConfig;
use crate::schema;

const PRODUCT_COLUMNS: &str =
    "id, code, name, category, unit, quantity, price, reorder_level, created_at";

const SALE_COLUMNS: &str = "id, product_id, quantity, unit_price, sold_at";

/// Batch columns for the given mode. Without remainder tracking every batch
/// reads as untouched.
fn batch_columns(mode: LedgerMode) -> &'static str {
    match mode {
        LedgerMode::Fifo => {
            "id, product_id, sequence, original_quantity, remaining_quantity, unit_cost, received_at"
        }
        LedgerMode::AggregateOnly => {
            "id, product_id, sequence, original_quantity, original_quantity AS remaining_quantity, unit_cost, received_at"
        }
    }
}

/// Postgres-backed ledger store.
#[derive(Debug, Clone)]
pub struct PostgresLedgerStore {
    pool: PgPool,
    mode: LedgerMode,
}

impl PostgresLedgerStore {
    /// Connect, migrate when configured to, and detect the ledger mode.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Self::open(pool, config.run_migrations).await
    }

    /// Wrap an existing pool.
    pub async fn open(pool: PgPool, run_migrations: bool) -> Result<Self, StoreError> {
        let mode = schema::prepare(&pool, run_migrations).await?;
        Ok(Self { pool, mode })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn begin_tx(&self) -> Result<Transaction<'static, Postgres>, StoreError> {
        self.pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))
    }
}

#[async_trait]
impl LedgerStore for PostgresLedgerStore {
    fn mode(&self) -> LedgerMode {
        self.mode
    }

    #[instrument(skip(self, new), fields(name = %new.name, code = field::Empty), err)]
    async fn insert_product(&self, new: NewProduct) -> Result<Product, StoreError> {
        new.validate()?;
        let mut tx = self.begin_tx().await?;

        // Code generation reads every code; keep two registrations from
        // picking the same one.
        sqlx::query("LOCK TABLE products IN SHARE ROW EXCLUSIVE MODE")
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("lock_products", e))?;

        let codes: Vec<String> = sqlx::query_scalar("SELECT code FROM products")
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("list_codes", e))?;
        let codes = codes
            .into_iter()
            .map(ProductCode::new)
            .collect::<Result<Vec<_>, _>>()?;

        let product = Product::register(
            ProductId::new(),
            ProductCode::next_after(&codes),
            new,
            Utc::now(),
        )?;
        Span::current().record("code", product.code.as_str());

        sqlx::query(
            r#"
            INSERT INTO products (id, code, name, category, unit, quantity, price, reorder_level, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(product.id.as_uuid())
        .bind(product.code.as_str())
        .bind(&product.name)
        .bind(&product.category)
        .bind(&product.unit)
        .bind(product.quantity)
        .bind(product.price.minor())
        .bind(product.reorder_level)
        .bind(product.created_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("insert_product", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit", e))?;
        Ok(product)
    }

    async fn get_product(&self, id: ProductId) -> Result<Option<Product>, StoreError> {
        let row = sqlx::query(&format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_product", e))?;
        row.as_ref().map(product_from_row).transpose()
    }

    async fn list_products(&self) -> Result<Vec<Product>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products ORDER BY created_at, code"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_products", e))?;
        rows.iter().map(product_from_row).collect()
    }

    #[instrument(skip(self, patch), fields(product_id = %id), err)]
    async fn update_product(
        &self,
        id: ProductId,
        patch: ProductPatch,
    ) -> Result<Product, StoreError> {
        patch.validate()?;
        let mut tx = self.begin_tx().await?;
        let row = sqlx::query(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE id = $1 FOR UPDATE"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("lock_product", e))?;
        let Some(row) = row else {
            return Err(StoreError::ProductNotFound(id));
        };

        let mut product = product_from_row(&row)?;
        product.apply(patch)?;

        sqlx::query(
            r#"
            UPDATE products
            SET name = $2, category = $3, unit = $4, price = $5, reorder_level = $6
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .bind(&product.name)
        .bind(&product.category)
        .bind(&product.unit)
        .bind(product.price.minor())
        .bind(product.reorder_level)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("update_product", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit", e))?;
        Ok(product)
    }

    #[instrument(skip(self), fields(product_id = %id), err)]
    async fn delete_product(&self, id: ProductId) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM products WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_product", e))?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self), fields(product_id = %product_id), err)]
    async fn begin(&self, product_id: ProductId) -> Result<Box<dyn LedgerTx>, StoreError> {
        let mut tx = self.begin_tx().await?;
        let row = sqlx::query(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE id = $1 FOR UPDATE"
        ))
        .bind(product_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("lock_product", e))?;

        let Some(row) = row else {
            return Err(StoreError::ProductNotFound(product_id));
        };
        let product = product_from_row(&row)?;

        Ok(Box::new(PostgresLedgerTx {
            tx: Some(tx),
            mode: self.mode,
            product,
        }))
    }

    #[instrument(skip(self), fields(batches = field::Empty, sales = field::Empty), err)]
    async fn snapshot(&self) -> Result<LedgerSnapshot, StoreError> {
        let mut tx = self.begin_tx().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY")
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("set_isolation", e))?;

        let products = sqlx::query(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products ORDER BY created_at, code"
        ))
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("snapshot_products", e))?
        .iter()
        .map(product_from_row)
        .collect::<Result<Vec<_>, _>>()?;

        let batches = sqlx::query(&format!(
            "SELECT {} FROM purchase_batches ORDER BY received_at, sequence",
            batch_columns(self.mode)
        ))
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("snapshot_batches", e))?
        .iter()
        .map(batch_from_row)
        .collect::<Result<Vec<_>, _>>()?;

        let sales = sqlx::query(&format!("SELECT {SALE_COLUMNS} FROM sales ORDER BY sold_at"))
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("snapshot_sales", e))?
            .iter()
            .map(sale_from_row)
            .collect::<Result<Vec<_>, _>>()?;

        let consumptions = if self.mode.tracks_batches() {
            sqlx::query("SELECT sale_id, batch_id, quantity, unit_cost FROM sale_consumptions")
                .fetch_all(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("snapshot_consumptions", e))?
                .iter()
                .map(consumption_from_row)
                .collect::<Result<Vec<_>, _>>()?
        } else {
            Vec::new()
        };

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit", e))?;

        let span = Span::current();
        span.record("batches", batches.len());
        span.record("sales", sales.len());

        Ok(LedgerSnapshot {
            products,
            batches,
            sales,
            consumptions,
        })
    }
}

struct PostgresLedgerTx {
    /// `None` once committed.
    tx: Option<Transaction<'static, Postgres>>,
    mode: LedgerMode,
    product: Product,
}

impl PostgresLedgerTx {
    fn conn(&mut self) -> Result<&mut PgConnection, StoreError> {
        self.tx.as_deref_mut().ok_or(StoreError::Finished)
    }

    fn ensure_batches(&self) -> Result<(), StoreError> {
        if !self.mode.tracks_batches() {
            return Err(StoreError::Unsupported(self.mode));
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerTx for PostgresLedgerTx {
    fn product(&self) -> &Product {
        &self.product
    }

    #[instrument(skip(self), fields(product_id = %self.product.id), err)]
    async fn create_batch(
        &mut self,
        quantity: i64,
        unit_cost: Money,
    ) -> Result<PurchaseBatch, StoreError> {
        ensure_positive_quantity(quantity, "purchase quantity")?;
        unit_cost.ensure_non_negative("unit cost")?;

        let id = BatchId::new();
        let product_id = self.product.id;
        // received_at never precedes this product's latest batch, so clock
        // skew cannot reorder FIFO.
        let sql = match self.mode {
            LedgerMode::Fifo => {
                r#"
                INSERT INTO purchase_batches (id, product_id, original_quantity, remaining_quantity, unit_cost, received_at)
                VALUES ($1, $2, $3, $3, $4, GREATEST(
                    clock_timestamp(),
                    (SELECT max(received_at) FROM purchase_batches WHERE product_id = $2)
                ))
                RETURNING sequence, received_at
                "#
            }
            LedgerMode::AggregateOnly => {
                r#"
                INSERT INTO purchase_batches (id, product_id, original_quantity, unit_cost, received_at)
                VALUES ($1, $2, $3, $4, GREATEST(
                    clock_timestamp(),
                    (SELECT max(received_at) FROM purchase_batches WHERE product_id = $2)
                ))
                RETURNING sequence, received_at
                "#
            }
        };

        let row = sqlx::query(sql)
            .bind(id.as_uuid())
            .bind(product_id.as_uuid())
            .bind(quantity)
            .bind(unit_cost.minor())
            .fetch_one(self.conn()?)
            .await
            .map_err(|e| map_sqlx_error("create_batch", e))?;

        let sequence: i64 = column(&row, "sequence")?;
        let received_at: DateTime<Utc> = column(&row, "received_at")?;
        Ok(PurchaseBatch::receive(
            id,
            product_id,
            to_sequence(sequence)?,
            quantity,
            unit_cost,
            received_at,
        )?)
    }

    async fn list_consumable(&mut self) -> Result<Vec<PurchaseBatch>, StoreError> {
        self.ensure_batches()?;
        let product_id = self.product.id;
        let sql = format!(
            r#"
            SELECT {}
            FROM purchase_batches
            WHERE product_id = $1 AND remaining_quantity > 0
            ORDER BY received_at, sequence
            FOR UPDATE
            "#,
            batch_columns(self.mode)
        );
        let rows = sqlx::query(&sql)
            .bind(product_id.as_uuid())
            .fetch_all(self.conn()?)
            .await
            .map_err(|e| map_sqlx_error("list_consumable", e))?;
        rows.iter().map(batch_from_row).collect()
    }

    #[instrument(skip(self), fields(batch_id = %batch_id), err)]
    async fn apply_consumption(
        &mut self,
        batch_id: BatchId,
        amount: i64,
    ) -> Result<(), StoreError> {
        self.ensure_batches()?;
        ensure_positive_quantity(amount, "consumed amount")?;
        let product_id = self.product.id;
        let conn = self.conn()?;

        let remaining: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT remaining_quantity
            FROM purchase_batches
            WHERE id = $1 AND product_id = $2
            FOR UPDATE
            "#,
        )
        .bind(batch_id.as_uuid())
        .bind(product_id.as_uuid())
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error("lock_batch", e))?;

        let remaining = remaining.ok_or(StoreError::BatchNotFound(batch_id))?;
        if amount > remaining {
            return Err(StoreError::OverConsumption {
                batch_id,
                requested: amount,
                remaining,
            });
        }

        sqlx::query(
            "UPDATE purchase_batches SET remaining_quantity = remaining_quantity - $2 WHERE id = $1",
        )
        .bind(batch_id.as_uuid())
        .bind(amount)
        .execute(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error("apply_consumption", e))?;
        Ok(())
    }

    async fn set_quantity(&mut self, quantity: i64) -> Result<(), StoreError> {
        if quantity < 0 {
            return Err(DomainError::invalid_quantity(format!(
                "stock aggregate cannot be negative (got {quantity})"
            ))
            .into());
        }
        let product_id = self.product.id;
        sqlx::query("UPDATE products SET quantity = $2 WHERE id = $1")
            .bind(product_id.as_uuid())
            .bind(quantity)
            .execute(self.conn()?)
            .await
            .map_err(|e| map_sqlx_error("set_quantity", e))?;
        self.product.quantity = quantity;
        Ok(())
    }

    async fn insert_sale(
        &mut self,
        sale: &SaleRecord,
        consumptions: &[SaleConsumption],
    ) -> Result<(), StoreError> {
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
        let conn = self.conn()?;

        sqlx::query(
            "INSERT INTO sales (id, product_id, quantity, unit_price, sold_at) VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(sale.id.as_uuid())
        .bind(sale.product_id.as_uuid())
        .bind(sale.quantity)
        .bind(sale.unit_price.minor())
        .bind(sale.sold_at)
        .execute(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error("insert_sale", e))?;

        for c in consumptions {
            sqlx::query(
                "INSERT INTO sale_consumptions (sale_id, batch_id, quantity, unit_cost) VALUES ($1, $2, $3, $4)",
            )
            .bind(c.sale_id.as_uuid())
            .bind(c.batch_id.as_uuid())
            .bind(c.quantity)
            .bind(c.unit_cost.minor())
            .execute(&mut *conn)
            .await
            .map_err(|e| map_sqlx_error("insert_sale_consumption", e))?;
        }
        Ok(())
    }

    #[instrument(skip(self), fields(product_id = %self.product.id), err)]
    async fn commit(&mut self) -> Result<(), StoreError> {
        let tx = self.tx.take().ok_or(StoreError::Finished)?;
        tx.commit().await.map_err(|e| map_sqlx_error("commit", e))
    }
}

fn column<'r, T>(row: &'r PgRow, name: &str) -> Result<T, StoreError>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(name)
        .map_err(|e| StoreError::Corrupt(format!("column {name}: {e}")))
}

fn to_sequence(raw: i64) -> Result<u64, StoreError> {
    u64::try_from(raw).map_err(|_| StoreError::Corrupt(format!("negative batch sequence {raw}")))
}

fn product_from_row(row: &PgRow) -> Result<Product, StoreError> {
    let code: String = column(row, "code")?;
    Ok(Product {
        id: ProductId::from_uuid(column::<Uuid>(row, "id")?),
        code: ProductCode::new(code)?,
        name: column(row, "name")?,
        category: column(row, "category")?,
        unit: column(row, "unit")?,
        quantity: column(row, "quantity")?,
        price: Money::from_minor(column(row, "price")?),
        reorder_level: column(row, "reorder_level")?,
        created_at: column(row, "created_at")?,
    })
}

fn batch_from_row(row: &PgRow) -> Result<PurchaseBatch, StoreError> {
    Ok(PurchaseBatch {
        id: BatchId::from_uuid(column::<Uuid>(row, "id")?),
        product_id: ProductId::from_uuid(column::<Uuid>(row, "product_id")?),
        sequence: to_sequence(column(row, "sequence")?)?,
        original_quantity: column(row, "original_quantity")?,
        remaining_quantity: column(row, "remaining_quantity")?,
        unit_cost: Money::from_minor(column(row, "unit_cost")?),
        received_at: column(row, "received_at")?,
    })
}

fn sale_from_row(row: &PgRow) -> Result<SaleRecord, StoreError> {
    Ok(SaleRecord {
        id: SaleId::from_uuid(column::<Uuid>(row, "id")?),
        product_id: ProductId::from_uuid(column::<Uuid>(row, "product_id")?),
        quantity: column(row, "quantity")?,
        unit_price: Money::from_minor(column(row, "unit_price")?),
        sold_at: column(row, "sold_at")?,
    })
}

fn consumption_from_row(row: &PgRow) -> Result<SaleConsumption, StoreError> {
    Ok(SaleConsumption {
        sale_id: SaleId::from_uuid(column::<Uuid>(row, "sale_id")?),
        batch_id: BatchId::from_uuid(column::<Uuid>(row, "batch_id")?),
        quantity: column(row, "quantity")?,
        unit_cost: Money::from_minor(column(row, "unit_cost")?),
    })
}

/// Map SQLx errors to `StoreError`.
pub(crate) fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {operation}: {}", db_err.message());
            match db_err.code().as_deref() {
                Some("23505") | Some("40001") | Some("40P01") => StoreError::Conflict(msg),
                _ => StoreError::Database(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            StoreError::Database(format!("connection pool closed in {operation}"))
        }
        other => StoreError::Database(format!("sqlx error in {operation}: {other}")),
    }
}
