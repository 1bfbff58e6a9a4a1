use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::{Money, ProductId};
use stockledger_inventory::{LedgerMode, NewProduct, ProductPatch};

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct CreateProductRequest {
    pub name: String,
    pub category: Option<String>,
    pub unit: Option<String>,
    #[serde(default)]
    pub price: Money,
    #[serde(default)]
    pub reorder_level: i64,
}

impl From<CreateProductRequest> for NewProduct {
    fn from(value: CreateProductRequest) -> Self {
        NewProduct {
            name: value.name,
            category: value.category,
            unit: value.unit,
            price: value.price,
            reorder_level: value.reorder_level,
        }
    }
}

/// Partial master-data edit. Unknown fields (including `quantity`, which only
/// the ledger writes) are rejected.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateProductRequest {
    pub name: Option<String>,
    pub category: Option<String>,
    pub unit: Option<String>,
    pub price: Option<Money>,
    pub reorder_level: Option<i64>,
}

impl From<UpdateProductRequest> for ProductPatch {
    fn from(value: UpdateProductRequest) -> Self {
        ProductPatch {
            name: value.name,
            category: value.category,
            unit: value.unit,
            price: value.price,
            reorder_level: value.reorder_level,
        }
    }
}

/// Money fields are integer minor units (cents).
#[derive(Debug, Deserialize)]
pub struct RecordPurchaseRequest {
    pub product_id: ProductId,
    pub quantity: i64,
    pub unit_cost: Money,
}

#[derive(Debug, Deserialize)]
pub struct RecordSaleRequest {
    pub product_id: ProductId,
    pub quantity: i64,
    pub unit_price: Money,
}

#[derive(Debug, Default, Deserialize)]
pub struct HistoryFilter {
    pub product_id: Option<ProductId>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PeriodQuery {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub mode: LedgerMode,
}
