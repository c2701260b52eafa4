//! # Money
//!
//! Exact-arithmetic monetary amounts for escrow fund movements.
//!
//! ## Design Choice: Integer Minor Units
//!
//! Amounts are stored as `i64` minor units (cents for USD). Floats never
//! appear anywhere in a fund computation — settlement math must balance to
//! the smallest currency unit, and the only way to guarantee that is integer
//! arithmetic end to end. Percentage application goes through basis points
//! with round-half-even, and every operation is checked: overflow and
//! currency mixing are errors, never silent wraparound.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// An ISO 4217 currency code (three uppercase ASCII letters).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct CurrencyCode([u8; 3]);

impl CurrencyCode {
    /// United States dollar. The default currency for domestic closings.
    pub const USD: CurrencyCode = CurrencyCode(*b"USD");

    /// Create a currency code, validating the three-uppercase-letter form.
    pub fn new(raw: &str) -> Result<Self, ValidationError> {
        let bytes = raw.as_bytes();
        if bytes.len() != 3 || !bytes.iter().all(|b| b.is_ascii_uppercase()) {
            return Err(ValidationError::InvalidCurrencyCode(raw.to_string()));
        }
        Ok(Self([bytes[0], bytes[1], bytes[2]]))
    }

    /// The code as a string slice.
    pub fn as_str(&self) -> &str {
        // Valid ASCII by construction.
        std::str::from_utf8(&self.0).unwrap_or("???")
    }
}

impl std::fmt::Display for CurrencyCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl<'de> Deserialize<'de> for CurrencyCode {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Self::new(&raw).map_err(serde::de::Error::custom)
    }
}

/// A non-negative monetary amount in integer minor units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Money {
    /// Amount in minor units (cents for USD).
    minor_units: i64,
    /// Currency of the amount.
    currency: CurrencyCode,
}

impl Money {
    /// Create an amount from minor units.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::NegativeAmount`] for negative values —
    /// escrow balances and fees are never negative; subtraction that would
    /// go below zero is an error at the call site, not a signed amount.
    pub fn from_minor(minor_units: i64, currency: CurrencyCode) -> Result<Self, ValidationError> {
        if minor_units < 0 {
            return Err(ValidationError::NegativeAmount {
                minor_units,
                currency: currency.to_string(),
            });
        }
        Ok(Self {
            minor_units,
            currency,
        })
    }

    /// Create an amount from whole major units (e.g. dollars).
    pub fn from_major(major_units: i64, currency: CurrencyCode) -> Result<Self, ValidationError> {
        let minor = major_units
            .checked_mul(100)
            .ok_or(ValidationError::AmountOverflow {
                operation: "from_major",
            })?;
        Self::from_minor(minor, currency)
    }

    /// A zero amount in the given currency.
    pub fn zero(currency: CurrencyCode) -> Self {
        Self {
            minor_units: 0,
            currency,
        }
    }

    /// The amount in minor units.
    pub fn minor_units(&self) -> i64 {
        self.minor_units
    }

    /// The currency of the amount.
    pub fn currency(&self) -> CurrencyCode {
        self.currency
    }

    /// Whether the amount is exactly zero.
    pub fn is_zero(&self) -> bool {
        self.minor_units == 0
    }

    /// Add two amounts of the same currency.
    ///
    /// # Errors
    ///
    /// [`ValidationError::CurrencyMismatch`] for mixed currencies,
    /// [`ValidationError::AmountOverflow`] on `i64` overflow.
    pub fn checked_add(&self, other: Money) -> Result<Money, ValidationError> {
        self.require_same_currency(other, "add")?;
        let minor = self
            .minor_units
            .checked_add(other.minor_units)
            .ok_or(ValidationError::AmountOverflow { operation: "add" })?;
        Ok(Money {
            minor_units: minor,
            currency: self.currency,
        })
    }

    /// Subtract `other` from `self`, rejecting negative results.
    ///
    /// # Errors
    ///
    /// [`ValidationError::CurrencyMismatch`] for mixed currencies,
    /// [`ValidationError::NegativeAmount`] if `other > self`.
    pub fn checked_sub(&self, other: Money) -> Result<Money, ValidationError> {
        self.require_same_currency(other, "sub")?;
        let minor = self.minor_units - other.minor_units;
        if minor < 0 {
            return Err(ValidationError::NegativeAmount {
                minor_units: minor,
                currency: self.currency.to_string(),
            });
        }
        Ok(Money {
            minor_units: minor,
            currency: self.currency,
        })
    }

    /// Apply a basis-point rate, rounding half-even to the minor unit.
    ///
    /// `250` bps of `$400,000.00` is `$10,000.00`. Ties round to the even
    /// minor unit so that repeated percentage application introduces no
    /// directional bias into settlement totals.
    pub fn apply_bps(&self, bps: u32) -> Result<Money, ValidationError> {
        // i128 intermediate: i64::MAX * 10_000 overflows i64.
        let product = self.minor_units as i128 * bps as i128;
        let quotient = product / 10_000;
        let remainder = product % 10_000;
        let rounded = match remainder.cmp(&5_000) {
            std::cmp::Ordering::Less => quotient,
            std::cmp::Ordering::Greater => quotient + 1,
            std::cmp::Ordering::Equal => {
                if quotient % 2 == 0 {
                    quotient
                } else {
                    quotient + 1
                }
            }
        };
        let minor =
            i64::try_from(rounded).map_err(|_| ValidationError::AmountOverflow {
                operation: "apply_bps",
            })?;
        Ok(Money {
            minor_units: minor,
            currency: self.currency,
        })
    }

    /// Sum an iterator of amounts in the given currency.
    pub fn sum<I>(currency: CurrencyCode, amounts: I) -> Result<Money, ValidationError>
    where
        I: IntoIterator<Item = Money>,
    {
        let mut total = Money::zero(currency);
        for amount in amounts {
            total = total.checked_add(amount)?;
        }
        Ok(total)
    }

    fn require_same_currency(
        &self,
        other: Money,
        operation: &'static str,
    ) -> Result<(), ValidationError> {
        if self.currency != other.currency {
            return Err(ValidationError::CurrencyMismatch {
                left: self.currency.to_string(),
                right: other.currency.to_string(),
                operation,
            });
        }
        Ok(())
    }
}

impl std::fmt::Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}.{:02} {}",
            self.minor_units / 100,
            self.minor_units % 100,
            self.currency
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn usd(minor: i64) -> Money {
        Money::from_minor(minor, CurrencyCode::USD).expect("non-negative")
    }

    #[test]
    fn currency_code_rejects_malformed() {
        assert!(CurrencyCode::new("usd").is_err());
        assert!(CurrencyCode::new("USDX").is_err());
        assert!(CurrencyCode::new("U$").is_err());
        assert_eq!(CurrencyCode::new("PKR").expect("valid").as_str(), "PKR");
    }

    #[test]
    fn negative_amounts_rejected_at_construction() {
        assert!(Money::from_minor(-1, CurrencyCode::USD).is_err());
        assert!(Money::from_major(-5, CurrencyCode::USD).is_err());
    }

    #[test]
    fn from_major_scales_to_cents() {
        assert_eq!(Money::from_major(10_000, CurrencyCode::USD).expect("ok"), usd(1_000_000));
    }

    #[test]
    fn checked_sub_rejects_underflow() {
        let err = usd(100).checked_sub(usd(200));
        assert!(matches!(err, Err(ValidationError::NegativeAmount { .. })));
    }

    #[test]
    fn mixed_currency_arithmetic_rejected() {
        let eur = Money::from_minor(100, CurrencyCode::new("EUR").expect("valid")).expect("ok");
        assert!(matches!(
            usd(100).checked_add(eur),
            Err(ValidationError::CurrencyMismatch { .. })
        ));
    }

    #[test]
    fn apply_bps_exact_percentage() {
        // 250 bps of $400,000.00.
        assert_eq!(usd(40_000_000).apply_bps(250).expect("ok"), usd(1_000_000));
    }

    #[test]
    fn apply_bps_rounds_half_to_even() {
        // 50 bps of 2_900 minor units = 14.5 → rounds to 14 (even).
        assert_eq!(usd(2_900).apply_bps(50).expect("ok"), usd(14));
        // 50 bps of 2_700 minor units = 13.5 → rounds to 14 (even).
        assert_eq!(usd(2_700).apply_bps(50).expect("ok"), usd(14));
        // Plain nearest-rounding cases are unaffected.
        assert_eq!(usd(2_701).apply_bps(50).expect("ok"), usd(14));
        assert_eq!(usd(2_699).apply_bps(50).expect("ok"), usd(13));
    }

    #[test]
    fn sum_accumulates() {
        let total =
            Money::sum(CurrencyCode::USD, [usd(100), usd(250), usd(0)]).expect("sum");
        assert_eq!(total, usd(350));
    }

    #[test]
    fn display_shows_major_and_minor() {
        assert_eq!(usd(1_234_56 * 100 + 7).to_string(), "123456.07 USD");
    }

    proptest! {
        #[test]
        fn apply_bps_never_exceeds_simple_bound(minor in 0i64..1_000_000_000_000, bps in 0u32..10_000) {
            let amount = usd(minor);
            let part = amount.apply_bps(bps).expect("no overflow in range");
            // A sub-100% rate can exceed the exact product only by the
            // rounding half-unit, and never exceeds the whole.
            prop_assert!(part.minor_units() <= amount.minor_units());
        }

        #[test]
        fn bps_complement_splits_within_one_unit(minor in 0i64..1_000_000_000_000, bps in 0u32..10_000) {
            let amount = usd(minor);
            let a = amount.apply_bps(bps).expect("ok");
            let b = amount.apply_bps(10_000 - bps).expect("ok");
            let sum = a.checked_add(b).expect("ok");
            let diff = (sum.minor_units() - amount.minor_units()).abs();
            prop_assert!(diff <= 1);
        }
    }
}
