//! Fixed-point money and percentage rates.
//!
//! Amounts are held in minor units (cents). Rates are basis points, so
//! `18%` is `Rate::from_bps(1800)`. Every percentage application rounds
//! half-up on its own result, which keeps intermediate figures at two
//! decimals exactly like the prices they derive from.

use std::iter::Sum;
use std::ops::{Add, AddAssign, Sub, SubAssign};

use serde::{Deserialize, Serialize};

/// An amount of money in minor units of the deployment currency.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    /// Largest amount accepted from a request: ten billion major units.
    pub const LIMIT: Money = Money(1_000_000_000_000);

    pub const fn from_cents(cents: i64) -> Self {
        Self(cents)
    }

    /// Whole currency units, e.g. `from_major(12)` is 12.00.
    pub const fn from_major(units: i64) -> Self {
        Self(units * 100)
    }

    pub const fn zero() -> Self {
        Self(0)
    }

    pub fn cents(&self) -> i64 {
        self.0
    }

    pub fn is_positive(&self) -> bool {
        self.0 > 0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn is_negative(&self) -> bool {
        self.0 < 0
    }

    /// Saturates at the `i64` bounds. Requests are validated with
    /// [`checked_multiply`](Self::checked_multiply) first.
    pub fn multiply(&self, quantity: u32) -> Money {
        Money(self.0.saturating_mul(i64::from(quantity)))
    }

    pub fn checked_multiply(&self, quantity: u32) -> Option<Money> {
        self.0.checked_mul(i64::from(quantity)).map(Money)
    }

    pub fn checked_add(self, rhs: Money) -> Option<Money> {
        self.0.checked_add(rhs.0).map(Money)
    }

    /// Applies a rate and rounds half away from zero to whole cents.
    pub fn percent(&self, rate: Rate) -> Money {
        let scaled = i128::from(self.0) * i128::from(rate.bps());
        let half = if scaled < 0 { -5_000 } else { 5_000 };
        let rounded = (scaled + half) / 10_000;
        Money(i64::try_from(rounded).unwrap_or(if rounded < 0 { i64::MIN } else { i64::MAX }))
    }

    /// Clamps negative amounts to zero.
    pub fn non_negative(self) -> Money {
        self.max(Money::zero())
    }
}

impl std::fmt::Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{sign}{}.{:02}", abs / 100, abs % 100)
    }
}

impl Add for Money {
    type Output = Money;

    fn add(self, rhs: Self) -> Self::Output {
        Money(self.0.saturating_add(rhs.0))
    }
}

impl Sub for Money {
    type Output = Money;

    fn sub(self, rhs: Self) -> Self::Output {
        Money(self.0.saturating_sub(rhs.0))
    }
}

impl AddAssign for Money {
    fn add_assign(&mut self, rhs: Self) {
        self.0 = self.0.saturating_add(rhs.0);
    }
}

impl SubAssign for Money {
    fn sub_assign(&mut self, rhs: Self) {
        self.0 = self.0.saturating_sub(rhs.0);
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        iter.fold(Money::zero(), Add::add)
    }
}

/// A percentage expressed in basis points (1/100 of a percent).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Rate(u32);

impl Rate {
    pub const fn from_bps(bps: u32) -> Self {
        Self(bps)
    }

    pub const fn from_percent(percent: u32) -> Self {
        Self(percent * 100)
    }

    pub const fn zero() -> Self {
        Self(0)
    }

    pub fn bps(&self) -> u32 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Whole-percent part, used for range validation of admin input.
    pub fn as_percent(&self) -> u32 {
        self.0 / 100
    }
}

impl std::fmt::Display for Rate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.0 % 100 == 0 {
            write!(f, "{}%", self.0 / 100)
        } else {
            write!(f, "{}.{:02}%", self.0 / 100, self.0 % 100)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_uses_two_decimals() {
        assert_eq!(Money::from_cents(1234).to_string(), "12.34");
        assert_eq!(Money::from_cents(5).to_string(), "0.05");
        assert_eq!(Money::from_cents(-50).to_string(), "-0.50");
        assert_eq!(Money::from_major(499).to_string(), "499.00");
    }

    #[test]
    fn percent_rounds_half_up() {
        // 18% of 3.75 = 0.675 -> 0.68
        assert_eq!(Money::from_cents(375).percent(Rate::from_percent(18)), Money::from_cents(68));
        // 18% of 3.7 = 0.666 -> 0.67
        assert_eq!(Money::from_cents(370).percent(Rate::from_percent(18)), Money::from_cents(67));
        // 10% of 0.04 = 0.004 -> 0.00
        assert_eq!(Money::from_cents(4).percent(Rate::from_percent(10)), Money::zero());
        // 12.5% of 1.00 = 0.125 -> 0.13
        assert_eq!(Money::from_cents(100).percent(Rate::from_bps(1250)), Money::from_cents(13));
    }

    #[test]
    fn negative_percent_rounds_away_from_zero() {
        assert_eq!(Money::from_cents(-375).percent(Rate::from_percent(18)), Money::from_cents(-68));
    }

    #[test]
    fn oversized_products_are_detected_not_panicked() {
        let price = Money::from_cents(10_000_000_000_000);
        assert_eq!(price.checked_multiply(4_000_000_000), None);
        assert_eq!(price.multiply(4_000_000_000), Money::from_cents(i64::MAX));
        assert_eq!(Money::from_cents(i64::MAX).checked_add(Money::from_cents(1)), None);
        assert_eq!(Money::from_cents(i64::MAX) + Money::from_cents(1), Money::from_cents(i64::MAX));
        assert_eq!(Money::from_cents(3).checked_multiply(4), Some(Money::from_cents(12)));
    }

    #[test]
    fn arithmetic_and_sum() {
        let total: Money = [Money::from_cents(100), Money::from_cents(250)].into_iter().sum();
        assert_eq!(total, Money::from_cents(350));
        assert_eq!(Money::from_cents(100).multiply(3), Money::from_cents(300));
        assert_eq!((Money::from_cents(100) - Money::from_cents(300)).non_negative(), Money::zero());
    }

    #[test]
    fn rate_display() {
        assert_eq!(Rate::from_percent(18).to_string(), "18%");
        assert_eq!(Rate::from_bps(1250).to_string(), "12.50%");
        assert_eq!(Rate::from_bps(1250).as_percent(), 12);
    }
}
