use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::error::ensure_positive_quantity;
use stockledger_core::{DomainError, DomainResult, Money, ProductId};

const CODE_PREFIX: char = 'P';
const MAX_CODE_LEN: usize = 20;

/// Human-facing product code (`P01`, `P02`, … `P100`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductCode(String);

impl ProductCode {
    pub fn new(code: impl Into<String>) -> DomainResult<Self> {
        let code = code.into();
        let trimmed = code.trim();
        if trimmed.is_empty() {
            return Err(DomainError::validation("product code cannot be empty"));
        }
        if trimmed.len() > MAX_CODE_LEN {
            return Err(DomainError::validation(format!(
                "product code cannot exceed {MAX_CODE_LEN} characters"
            )));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Numeric part of a generated code, if this code follows the `P<digits>` shape.
    fn number(&self) -> Option<u64> {
        let digits = self.0.strip_prefix(CODE_PREFIX)?;
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        digits.parse().ok()
    }

    fn from_number(n: u64) -> Self {
        Self(format!("{CODE_PREFIX}{n:02}"))
    }

    /// Next free generated code: one past the highest `P<digits>` code in use.
    ///
    /// Codes that do not follow the generated shape are ignored.
    pub fn next_after<'a>(existing: impl IntoIterator<Item = &'a ProductCode>) -> Self {
        let highest = existing
            .into_iter()
            .filter_map(ProductCode::number)
            .max()
            .unwrap_or(0);
        Self::from_number(highest.saturating_add(1))
    }
}

impl core::fmt::Display for ProductCode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Master data for registering a product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewProduct {
    pub name: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub price: Money,
    #[serde(default)]
    pub reorder_level: i64,
}

impl NewProduct {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            category: None,
            unit: None,
            price: Money::ZERO,
            reorder_level: 0,
        }
    }

    pub fn validate(&self) -> DomainResult<()> {
        if self.name.trim().is_empty() {
            return Err(DomainError::validation("product name is required"));
        }
        self.price.ensure_non_negative("price")?;
        if self.reorder_level < 0 {
            return Err(DomainError::invalid_quantity(format!(
                "reorder level must not be negative (got {})",
                self.reorder_level
            )));
        }
        Ok(())
    }
}

/// Master-data edit. Absent fields are left alone; a blank `category` or
/// `unit` clears it. Stock quantity is not editable here.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductPatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub price: Option<Money>,
    #[serde(default)]
    pub reorder_level: Option<i64>,
}

impl ProductPatch {
    pub fn validate(&self) -> DomainResult<()> {
        if let Some(name) = &self.name {
            if name.trim().is_empty() {
                return Err(DomainError::validation("product name is required"));
            }
        }
        if let Some(price) = self.price {
            price.ensure_non_negative("price")?;
        }
        if let Some(level) = self.reorder_level {
            if level < 0 {
                return Err(DomainError::invalid_quantity(format!(
                    "reorder level must not be negative (got {level})"
                )));
            }
        }
        Ok(())
    }
}

fn blank_to_none(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// A stocked product.
///
/// `quantity` is a cache of Σ remaining over the product's batches. It is kept
/// for cheap display and for aggregate-only operation; FIFO decisions never
/// read it as the source of truth.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub code: ProductCode,
    pub name: String,
    pub category: Option<String>,
    pub unit: Option<String>,
    pub quantity: i64,
    pub price: Money,
    pub reorder_level: i64,
    pub created_at: DateTime<Utc>,
}

impl Product {
    /// Build a fresh product with zero stock.
    pub fn register(
        id: ProductId,
        code: ProductCode,
        new: NewProduct,
        created_at: DateTime<Utc>,
    ) -> DomainResult<Self> {
        new.validate()?;
        Ok(Self {
            id,
            code,
            name: new.name.trim().to_string(),
            category: blank_to_none(new.category),
            unit: blank_to_none(new.unit),
            quantity: 0,
            price: new.price,
            reorder_level: new.reorder_level,
            created_at,
        })
    }

    /// Apply a master-data edit. Validates the whole patch before changing
    /// anything.
    pub fn apply(&mut self, patch: ProductPatch) -> DomainResult<()> {
        patch.validate()?;
        if let Some(name) = patch.name {
            self.name = name.trim().to_string();
        }
        if patch.category.is_some() {
            self.category = blank_to_none(patch.category);
        }
        if patch.unit.is_some() {
            self.unit = blank_to_none(patch.unit);
        }
        if let Some(price) = patch.price {
            self.price = price;
        }
        if let Some(level) = patch.reorder_level {
            self.reorder_level = level;
        }
        Ok(())
    }

    /// At or below the advisory reorder threshold.
    pub fn needs_reorder(&self) -> bool {
        self.quantity <= self.reorder_level
    }

    /// Increase the cached aggregate after a purchase.
    pub fn receive(&mut self, quantity: i64) -> DomainResult<()> {
        ensure_positive_quantity(quantity, "received quantity")?;
        self.quantity = self
            .quantity
            .checked_add(quantity)
            .ok_or_else(|| DomainError::invalid_quantity("stock quantity overflow"))?;
        Ok(())
    }

    /// Decrease the cached aggregate after a sale.
    pub fn release(&mut self, quantity: i64) -> DomainResult<()> {
        ensure_positive_quantity(quantity, "released quantity")?;
        if quantity > self.quantity {
            return Err(DomainError::insufficient_stock(quantity, self.quantity));
        }
        self.quantity -= quantity;
        Ok(())
    }
}
