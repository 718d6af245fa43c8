// 1.0: all the primitives live here. nothing in the engine works without these types.
// addresses, tokens, prices, usd amounts, leverage, timestamps. each is a newtype so the
// compiler catches a token amount being passed where a usd value is expected.

use chrono::{DateTime, Utc};
use rust_decimal::prelude::RoundingStrategy;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;

/// Any caller: user accounts, routers, the timelock, the vault itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Address(pub u64);

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04x}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TokenId(pub u32);

impl fmt::Display for TokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "token#{}", self.0)
    }
}

// Long = profit when price goes up. Short = profit when price goes down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Long,
    Short,
}

impl Side {
    pub fn is_long(&self) -> bool {
        matches!(self, Side::Long)
    }

    pub fn opposite(&self) -> Self {
        match self {
            Side::Long => Side::Short,
            Side::Short => Side::Long,
        }
    }

    // longs open at the max price and close at the min price, shorts the other way round
    pub fn maximize_on_increase(&self) -> bool {
        self.is_long()
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Long => write!(f, "long"),
            Side::Short => write!(f, "short"),
        }
    }
}

// 1.1: usd price of one whole token. must be positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Price(Decimal);

impl Price {
    #[must_use]
    pub fn new(value: Decimal) -> Option<Self> {
        if value > Decimal::ZERO {
            Some(Self(value))
        } else {
            None
        }
    }

    pub fn new_unchecked(value: Decimal) -> Self {
        debug_assert!(value > Decimal::ZERO);
        Self(value)
    }

    pub fn value(&self) -> Decimal {
        self.0
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// 1.2: usd amount. size, collateral, fees and pnl all use this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Usd(Decimal);

impl Usd {
    pub const ZERO: Usd = Usd(Decimal::ZERO);

    pub fn new(value: Decimal) -> Self {
        Self(value)
    }

    pub fn zero() -> Self {
        Self(Decimal::ZERO)
    }

    pub fn value(&self) -> Decimal {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn is_negative(&self) -> bool {
        self.0 < Decimal::ZERO
    }

    pub fn abs(&self) -> Self {
        Self(self.0.abs())
    }

    pub fn add(&self, other: Usd) -> Self {
        Self(self.0 + other.0)
    }

    pub fn sub(&self, other: Usd) -> Self {
        Self(self.0 - other.0)
    }

    /// Subtraction floored at zero.
    pub fn saturating_sub(&self, other: Usd) -> Self {
        if other.0 >= self.0 {
            Self::zero()
        } else {
            Self(self.0 - other.0)
        }
    }

    pub fn mul(&self, factor: Decimal) -> Self {
        Self(self.0 * factor)
    }

    pub fn negate(&self) -> Self {
        Self(-self.0)
    }

    pub fn min(self, other: Usd) -> Self {
        if self.0 <= other.0 {
            self
        } else {
            other
        }
    }
}

impl fmt::Display for Usd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${}", self.0)
    }
}

impl PartialOrd for Usd {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Usd {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}

impl Sum for Usd {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::zero(), |acc, q| acc.add(q))
    }
}

// 1.3: leverage multiplier. must be >= 1x.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Leverage(Decimal);

impl Leverage {
    #[must_use]
    pub fn new(value: Decimal) -> Option<Self> {
        if value >= Decimal::ONE {
            Some(Self(value))
        } else {
            None
        }
    }

    pub fn new_unchecked(value: Decimal) -> Self {
        debug_assert!(value >= Decimal::ONE);
        Self(value)
    }

    pub fn value(&self) -> Decimal {
        self.0
    }

    /// size / collateral. None when there is no collateral to lever.
    pub fn of(size: Usd, collateral: Usd) -> Option<Decimal> {
        if collateral.value() <= Decimal::ZERO {
            None
        } else {
            Some(size.value() / collateral.value())
        }
    }

    // 50x leverage -> 500_000 bps
    pub fn as_bps(&self) -> Decimal {
        self.0 * BPS_DIVISOR
    }
}

impl fmt::Display for Leverage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x", self.0)
    }
}

pub const BPS_DIVISOR: Decimal = dec!(10000);

/// Largest usd amount a single request may carry. Leaves room for bps and
/// leverage products below `Decimal::MAX`.
pub const MAX_USD_AMOUNT: Decimal = dec!(1_000_000_000_000_000_000);

// 1.4: basis points. 100 bps = 1%.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Bps(u32);

impl Bps {
    pub fn new(bps: u32) -> Self {
        Self(bps)
    }

    pub fn value(&self) -> u32 {
        self.0
    }

    pub fn as_decimal(&self) -> Decimal {
        Decimal::from(self.0)
    }

    pub fn as_fraction(&self) -> Decimal {
        Decimal::new(self.0 as i64, 4)
    }

    /// amount * bps / 10000, exact.
    pub fn apply(&self, amount: Decimal) -> Decimal {
        amount * self.as_decimal() / BPS_DIVISOR
    }
}

// 1.5: millisecond timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Wall clock, for hosts that drive the engine in real time.
    pub fn now() -> Self {
        Self::from_millis(Utc::now().timestamp_millis())
    }

    /// Calendar view of the timestamp; `None` outside chrono's range.
    pub fn to_utc(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.0)
    }

    pub fn from_millis(ms: i64) -> Self {
        Self(ms)
    }

    pub fn from_secs(secs: i64) -> Self {
        Self(secs * 1000)
    }

    pub fn as_millis(&self) -> i64 {
        self.0
    }

    pub fn plus_millis(&self, ms: i64) -> Self {
        Self(self.0 + ms)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

/// Round a token amount down to the token's native precision.
pub fn round_token_down(amount: Decimal, decimals: u32) -> Decimal {
    amount.round_dp_with_strategy(decimals, RoundingStrategy::ToZero)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn usd_saturating_sub_floors_at_zero() {
        let a = Usd::new(dec!(10));
        assert_eq!(a.saturating_sub(Usd::new(dec!(4))).value(), dec!(6));
        assert!(a.saturating_sub(Usd::new(dec!(11))).is_zero());
    }

    #[test]
    fn leverage_of_size_and_collateral() {
        let lev = Leverage::of(Usd::new(dec!(20000)), Usd::new(dec!(2000))).unwrap();
        assert_eq!(lev, dec!(10));
        assert!(Leverage::of(Usd::new(dec!(1)), Usd::zero()).is_none());
        assert_eq!(Leverage::new(dec!(50)).unwrap().as_bps(), dec!(500000));
    }

    #[test]
    fn bps_conversion() {
        let ten = Bps::new(10);
        assert_eq!(ten.apply(dec!(20000)), dec!(20)); // 0.1% of 20k
        assert_eq!(Bps::new(50).as_fraction(), dec!(0.005)); // 0.5%
    }

    #[test]
    fn timestamp_calendar_view() {
        let eta = Timestamp::from_secs(5 * 24 * 3600);
        let utc = eta.to_utc().unwrap();
        assert_eq!(utc.to_rfc3339(), "1970-01-06T00:00:00+00:00");
        assert!(Timestamp::now() > eta);
    }

    #[test]
    fn token_rounding_truncates() {
        assert_eq!(round_token_down(dec!(0.123456789), 8), dec!(0.12345678));
        assert_eq!(round_token_down(dec!(1.999), 0), dec!(1));
    }
}
