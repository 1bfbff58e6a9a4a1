//! Money as an integer amount of minor currency units.
//!
//! Single-currency by construction: the ledger never mixes currencies, so the
//! amount is all there is. Arithmetic is checked; an amount that does not fit
//! in an `i64` is an [`DomainError::AmountOverflow`], never a clamped value.

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};

/// Amount in minor units (e.g. cents).
#[derive(
    Debug, Copy, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    pub const ZERO: Money = Money(0);

    pub const fn from_minor(minor: i64) -> Self {
        Self(minor)
    }

    pub const fn minor(self) -> i64 {
        self.0
    }

    pub const fn is_negative(self) -> bool {
        self.0 < 0
    }

    /// Price × quantity (line total).
    pub fn times(self, quantity: i64) -> DomainResult<Money> {
        self.0.checked_mul(quantity).map(Money).ok_or_else(|| {
            DomainError::amount_overflow(format!("{self} x {quantity}"))
        })
    }

    pub fn checked_add(self, rhs: Money) -> DomainResult<Money> {
        self.0
            .checked_add(rhs.0)
            .map(Money)
            .ok_or_else(|| DomainError::amount_overflow(format!("{self} + {rhs}")))
    }

    pub fn checked_sub(self, rhs: Money) -> DomainResult<Money> {
        self.0
            .checked_sub(rhs.0)
            .map(Money)
            .ok_or_else(|| DomainError::amount_overflow(format!("{self} - {rhs}")))
    }

    /// Sum of already-computed amounts.
    pub fn total(amounts: impl IntoIterator<Item = Money>) -> DomainResult<Money> {
        amounts
            .into_iter()
            .try_fold(Money::ZERO, |acc, m| acc.checked_add(m))
    }

    /// Sum of line totals that may themselves have overflowed.
    pub fn try_total(
        amounts: impl IntoIterator<Item = DomainResult<Money>>,
    ) -> DomainResult<Money> {
        amounts
            .into_iter()
            .try_fold(Money::ZERO, |acc, m| acc.checked_add(m?))
    }

    /// Reject negative amounts (unit costs and unit prices may be zero).
    pub fn ensure_non_negative(self, what: &str) -> DomainResult<Money> {
        if self.is_negative() {
            return Err(DomainError::invalid_quantity(format!(
                "{what} must not be negative (got {self})"
            )));
        }
        Ok(self)
    }
}

impl core::fmt::Display for Money {
    /// Renders with two decimal places (`-12.05`).
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{sign}{}.{:02}", abs / 100, abs % 100)
    }
}
