//! Monetary value objects.
//!
//! All engine arithmetic happens in signed minor units (cents) to avoid
//! floating-point errors. Values are signed because price deltas, refunds,
//! and discount adjustments are negative amounts.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Mul, Neg, Sub, SubAssign};

/// A monetary amount in minor units of the order's currency.
///
/// Discounts and refund deltas are represented as negative values.
/// Arithmetic on `Money` panics on `i64` overflow; use the `checked_*`
/// methods at boundaries where untrusted magnitudes can appear.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    /// Zero in any currency.
    pub const ZERO: Self = Self(0);

    /// Creates a `Money` value from minor units.
    #[must_use]
    pub const fn from_minor(units: i64) -> Self {
        Self(units)
    }

    /// Returns the amount in minor units.
    #[must_use]
    pub const fn minor(self) -> i64 {
        self.0
    }

    /// Checks if the amount is zero.
    #[must_use]
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Checks if the amount is below zero.
    #[must_use]
    pub const fn is_negative(self) -> bool {
        self.0 < 0
    }

    /// Checks if the amount is above zero.
    #[must_use]
    pub const fn is_positive(self) -> bool {
        self.0 > 0
    }

    /// Returns the absolute value of the amount.
    ///
    /// # Panics
    ///
    /// Panics if the amount is `i64::MIN`.
    #[must_use]
    #[allow(clippy::panic)]
    pub const fn abs(self) -> Self {
        match self.0.checked_abs() {
            Some(units) => Self(units),
            None => panic!("Money::abs overflow"),
        }
    }

    /// Adds two amounts with overflow checking.
    #[must_use]
    pub const fn checked_add(self, other: Self) -> Option<Self> {
        match self.0.checked_add(other.0) {
            Some(units) => Some(Self(units)),
            None => None,
        }
    }

    /// Subtracts two amounts with overflow checking.
    #[must_use]
    pub const fn checked_sub(self, other: Self) -> Option<Self> {
        match self.0.checked_sub(other.0) {
            Some(units) => Some(Self(units)),
            None => None,
        }
    }

    /// Multiplies the amount by a unit count with overflow checking.
    #[must_use]
    pub const fn checked_times(self, quantity: u32) -> Option<Self> {
        match self.0.checked_mul(quantity as i64) {
            Some(units) => Some(Self(units)),
            None => None,
        }
    }

    /// Multiplies the amount by a unit count.
    ///
    /// # Panics
    ///
    /// Panics if the multiplication would overflow. Use `checked_times`
    /// for non-panicking multiplication.
    #[must_use]
    #[allow(clippy::panic)]
    pub const fn times(self, quantity: u32) -> Self {
        match self.checked_times(quantity) {
            Some(result) => result,
            None => panic!("Money::times overflow"),
        }
    }

    /// Clamps the amount at zero from below.
    #[must_use]
    pub const fn max_zero(self) -> Self {
        if self.0 < 0 { Self(0) } else { self }
    }

    /// Returns the largest share of `self` proportional to `part / whole`,
    /// rounded towards zero. Used when distributing an amount across
    /// weighted recipients; callers assign the remainder explicitly.
    ///
    /// Returns zero when `whole` is zero.
    #[must_use]
    pub fn prorate(self, part: i64, whole: i64) -> Self {
        if whole == 0 {
            return Self::ZERO;
        }
        let scaled = i128::from(self.0) * i128::from(part) / i128::from(whole);
        Self(clamp_to_i64(scaled))
    }
}

/// Narrows an i128 intermediate back to i64, saturating at the extremes.
const fn clamp_to_i64(value: i128) -> i64 {
    if value > i64::MAX as i128 {
        i64::MAX
    } else if value < i64::MIN as i128 {
        i64::MIN
    } else {
        #[allow(clippy::cast_possible_truncation)]
        {
            value as i64
        }
    }
}

impl Add for Money {
    type Output = Self;

    #[allow(clippy::panic)]
    fn add(self, rhs: Self) -> Self {
        match self.checked_add(rhs) {
            Some(result) => result,
            None => panic!("Money addition overflow"),
        }
    }
}

impl Sub for Money {
    type Output = Self;

    #[allow(clippy::panic)]
    fn sub(self, rhs: Self) -> Self {
        match self.checked_sub(rhs) {
            Some(result) => result,
            None => panic!("Money subtraction overflow"),
        }
    }
}

impl Neg for Money {
    type Output = Self;

    #[allow(clippy::panic)]
    fn neg(self) -> Self {
        match self.0.checked_neg() {
            Some(units) => Self(units),
            None => panic!("Money negation overflow"),
        }
    }
}

impl AddAssign for Money {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl SubAssign for Money {
    fn sub_assign(&mut self, rhs: Self) {
        *self = *self - rhs;
    }
}

impl Mul<u32> for Money {
    type Output = Self;

    fn mul(self, rhs: u32) -> Self {
        self.times(rhs)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::ZERO, Add::add)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{sign}{}.{:02}", abs / 100, abs % 100)
    }
}

/// A tax rate in basis points (hundredths of a percent).
///
/// `TaxRate::from_percent(20)` is a 20% rate. Basis points keep rate
/// arithmetic in integers alongside [`Money`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaxRate(u32);

impl TaxRate {
    /// A zero tax rate.
    pub const ZERO: Self = Self(0);

    /// Creates a rate from basis points.
    #[must_use]
    pub const fn from_basis_points(basis_points: u32) -> Self {
        Self(basis_points)
    }

    /// Creates a rate from whole percent.
    #[must_use]
    pub const fn from_percent(percent: u32) -> Self {
        Self(percent.saturating_mul(100))
    }

    /// Returns the rate in basis points.
    #[must_use]
    pub const fn basis_points(self) -> u32 {
        self.0
    }

    /// Tax owed on a net amount, rounded half away from zero.
    #[must_use]
    pub fn tax_on(self, net: Money) -> Money {
        let numerator = i128::from(net.minor()) * i128::from(self.0);
        let rounding = if numerator >= 0 { 5_000 } else { -5_000 };
        Money::from_minor(clamp_to_i64((numerator + rounding) / 10_000))
    }

    /// Gross amount: net plus tax.
    #[must_use]
    pub fn with_tax(self, net: Money) -> Money {
        net + self.tax_on(net)
    }
}

impl fmt::Display for TaxRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}%", self.0 / 100, self.0 % 100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn from_minor_round_trips() {
        assert_eq!(Money::from_minor(5374).minor(), 5374);
        assert_eq!(Money::from_minor(-626).minor(), -626);
    }

    #[test]
    fn signed_arithmetic() {
        let a = Money::from_minor(6000);
        let b = Money::from_minor(5374);
        assert_eq!((a - b).minor(), 626);
        assert_eq!((b - a).minor(), -626);
        assert_eq!((-a).minor(), -6000);
        assert!((b - a).is_negative());
    }

    #[test]
    fn times_scales_by_quantity() {
        assert_eq!(Money::from_minor(1500) * 3, Money::from_minor(4500));
        assert_eq!(Money::from_minor(-200).times(4), Money::from_minor(-800));
    }

    #[test]
    fn sum_folds_from_zero() {
        let total: Money = [100, 250, -50].into_iter().map(Money::from_minor).sum();
        assert_eq!(total, Money::from_minor(300));
    }

    #[test]
    fn max_zero_clamps_negatives_only() {
        assert_eq!(Money::from_minor(-10).max_zero(), Money::ZERO);
        assert_eq!(Money::from_minor(10).max_zero(), Money::from_minor(10));
    }

    #[test]
    fn tax_rounds_half_away_from_zero() {
        let rate = TaxRate::from_percent(20);
        assert_eq!(rate.tax_on(Money::from_minor(5000)), Money::from_minor(1000));
        // 20% of 33 is 6.6, rounds to 7
        assert_eq!(rate.tax_on(Money::from_minor(33)), Money::from_minor(7));
        assert_eq!(rate.tax_on(Money::from_minor(-33)), Money::from_minor(-7));
    }

    #[test]
    fn with_tax_adds_rounded_tax() {
        let rate = TaxRate::from_percent(20);
        assert_eq!(rate.with_tax(Money::from_minor(500)), Money::from_minor(600));
        assert_eq!(TaxRate::ZERO.with_tax(Money::from_minor(500)), Money::from_minor(500));
    }

    #[test]
    fn prorate_splits_proportionally() {
        let total = Money::from_minor(5000);
        // 12000 / (12000 + 3000) of 5000 = 4000
        assert_eq!(total.prorate(12_000, 15_000), Money::from_minor(4000));
        assert_eq!(total.prorate(3_000, 15_000), Money::from_minor(1000));
        assert_eq!(total.prorate(1, 0), Money::ZERO);
    }

    #[test]
    fn display_formats_minor_units() {
        assert_eq!(Money::from_minor(123_45).to_string(), "123.45");
        assert_eq!(Money::from_minor(-50).to_string(), "-0.50");
        assert_eq!(TaxRate::from_percent(20).to_string(), "20.00%");
    }

    proptest! {
        #[test]
        fn prorated_shares_never_exceed_total(
            total in 0i64..10_000_000,
            weights in proptest::collection::vec(1i64..1_000_000, 1..6),
        ) {
            let whole: i64 = weights.iter().sum();
            let amount = Money::from_minor(total);
            let shares: i64 = weights
                .iter()
                .map(|w| amount.prorate(*w, whole).minor())
                .sum();
            // Flooring each share loses at most one unit per recipient.
            prop_assert!(shares <= total);
            prop_assert!(total - shares < weights.len() as i64);
        }

        #[test]
        fn tax_is_monotonic_in_net(net in 0i64..1_000_000) {
            let rate = TaxRate::from_percent(20);
            let tax_here = rate.tax_on(Money::from_minor(net)).minor();
            let tax_next = rate.tax_on(Money::from_minor(net + 1)).minor();
            prop_assert!(tax_next >= tax_here);
        }
    }
}
