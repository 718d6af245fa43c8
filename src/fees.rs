// 5.0: fee engine. three charges hit a position:
//   margin fee   - bps of every size change, both directions
//   funding fee  - size * (cumulative rate - rate at entry), accrues per interval
//   deposit fee  - taken by the router on collateral that lowers leverage
// all of them are usd except the deposit fee, which is taken in tokens before
// the collateral ever reaches the vault.

use crate::position::Position;
use crate::types::{round_token_down, Bps, Side, Timestamp, Usd, BPS_DIVISOR};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

// 5.1: fee on a size change. applies to the size delta, never to collateral.
pub fn margin_fee(size_delta: Usd, margin_fee_bps: Bps) -> Usd {
    Usd::new(margin_fee_bps.apply(size_delta.value()))
}

// 5.2: funding owed since the position last snapshotted the cumulative rate
pub fn funding_fee(size: Usd, entry_funding_rate: Decimal, cumulative_funding_rate: Decimal) -> Usd {
    if size.is_zero() {
        return Usd::zero();
    }
    let rate_delta = cumulative_funding_rate - entry_funding_rate;
    if rate_delta <= Decimal::ZERO {
        return Usd::zero();
    }
    Usd::new(size.value() * rate_delta)
}

pub fn position_funding_fee(position: &Position, cumulative_funding_rate: Decimal) -> Usd {
    funding_fee(position.size, position.entry_funding_rate, cumulative_funding_rate)
}

/// Margin fee on the size change plus funding on the size held so far.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionFees {
    pub margin: Usd,
    pub funding: Usd,
}

impl PositionFees {
    pub fn compute(
        position: &Position,
        size_delta: Usd,
        margin_fee_bps: Bps,
        cumulative_funding_rate: Decimal,
    ) -> Self {
        Self {
            margin: margin_fee(size_delta, margin_fee_bps),
            funding: position_funding_fee(position, cumulative_funding_rate),
        }
    }

    pub fn total(&self) -> Usd {
        self.margin.add(self.funding)
    }
}

/// Funding clock for one collateral token.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FundingState {
    pub cumulative_rate: Decimal,
    /// Start of the last settled interval. None until the token is first touched.
    pub last_funding_time: Option<Timestamp>,
}

impl FundingState {
    pub fn new() -> Self {
        Self::default()
    }

    // 5.3: rate the next settlement would add. utilisation weighted:
    // factor * reserved / pooled per elapsed interval.
    pub fn pending_rate(
        &self,
        now: Timestamp,
        interval_ms: i64,
        rate_factor: Decimal,
        pool_amount: Decimal,
        reserved_amount: Decimal,
    ) -> Decimal {
        let Some(last) = self.last_funding_time else {
            return Decimal::ZERO;
        };
        if interval_ms <= 0 || last.as_millis() + interval_ms > now.as_millis() {
            return Decimal::ZERO;
        }
        if pool_amount <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        let intervals = (now.as_millis() - last.as_millis()) / interval_ms;
        rate_factor * reserved_amount * Decimal::from(intervals) / pool_amount
    }

    /// Settle every whole interval elapsed since the last update.
    pub fn update(
        &mut self,
        now: Timestamp,
        interval_ms: i64,
        rate_factor: Decimal,
        pool_amount: Decimal,
        reserved_amount: Decimal,
    ) -> Decimal {
        let aligned = if interval_ms > 0 {
            Timestamp::from_millis(now.as_millis() / interval_ms * interval_ms)
        } else {
            now
        };

        let Some(last) = self.last_funding_time else {
            self.last_funding_time = Some(aligned);
            return Decimal::ZERO;
        };
        if interval_ms <= 0 || last.as_millis() + interval_ms > now.as_millis() {
            return Decimal::ZERO;
        }

        let rate = self.pending_rate(now, interval_ms, rate_factor, pool_amount, reserved_amount);
        self.cumulative_rate += rate;
        self.last_funding_time = Some(aligned);
        debug!(%rate, cumulative = %self.cumulative_rate, "funding rate settled");
        rate
    }
}

// 5.4: leverage in whole basis points, truncated like integer division.
// saturates at Decimal::MAX instead of overflowing.
fn leverage_bps(size: Decimal, collateral: Decimal, scale: Decimal) -> Decimal {
    size.checked_mul(scale)
        .and_then(|scaled| scaled.checked_div(collateral))
        .map(|bps| bps.trunc())
        .unwrap_or(Decimal::MAX)
}

/// Whether collateral added through the router should pay the deposit fee.
///
/// Shorts never pay it and neither does the first increase of a key. A long
/// that adds no size always pays. Otherwise the fee applies when the new
/// leverage, padded by `buffer_bps` to absorb swap slippage, drops below the
/// current leverage.
pub fn should_charge_deposit_fee(
    existing: &Position,
    side: Side,
    size_delta: Usd,
    deposit_usd: Usd,
    buffer_bps: Bps,
) -> bool {
    if !side.is_long() {
        return false;
    }
    if size_delta.is_zero() {
        return true;
    }
    if existing.size.is_zero() || existing.collateral.value() <= Decimal::ZERO {
        return false;
    }

    let (Some(next_size), Some(next_collateral)) = (
        existing.size.value().checked_add(size_delta.value()),
        existing.collateral.value().checked_add(deposit_usd.value()),
    ) else {
        return false;
    };

    let prev = leverage_bps(existing.size.value(), existing.collateral.value(), BPS_DIVISOR);
    let next = leverage_bps(next_size, next_collateral, BPS_DIVISOR + buffer_bps.as_decimal());

    next < prev
}

/// Splits a token deposit into (amount kept for the position, fee).
pub fn split_deposit_fee(amount_in: Decimal, deposit_fee_bps: Bps, decimals: u32) -> (Decimal, Decimal) {
    let kept = amount_in * (BPS_DIVISOR - deposit_fee_bps.as_decimal()) / BPS_DIVISOR;
    let kept = round_token_down(kept, decimals);
    (kept, amount_in - kept)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn position(size: Decimal, collateral: Decimal) -> Position {
        Position {
            size: Usd::new(size),
            collateral: Usd::new(collateral),
            average_price: dec!(3000),
            ..Position::default()
        }
    }

    #[test]
    fn margin_fee_is_on_size_only() {
        assert_eq!(margin_fee(Usd::new(dec!(20000)), Bps::new(10)).value(), dec!(20));
        assert!(margin_fee(Usd::zero(), Bps::new(10)).is_zero());
    }

    #[test]
    fn funding_accrues_per_interval() {
        let mut state = FundingState::new();
        let hour = 3_600_000;
        state.update(Timestamp::from_millis(0), 8 * hour, dec!(0.0001), dec!(100), dec!(50));
        assert_eq!(state.cumulative_rate, Decimal::ZERO);

        // under one interval: nothing
        state.update(Timestamp::from_millis(7 * hour), 8 * hour, dec!(0.0001), dec!(100), dec!(50));
        assert_eq!(state.cumulative_rate, Decimal::ZERO);

        // two intervals at 50% utilisation
        state.update(Timestamp::from_millis(16 * hour), 8 * hour, dec!(0.0001), dec!(100), dec!(50));
        assert_eq!(state.cumulative_rate, dec!(0.0001));

        let pos = Position {
            entry_funding_rate: Decimal::ZERO,
            ..position(dec!(20000), dec!(2000))
        };
        assert_eq!(position_funding_fee(&pos, state.cumulative_rate).value(), dec!(2));
    }

    #[test]
    fn empty_pool_accrues_nothing() {
        let mut state = FundingState::new();
        state.update(Timestamp::from_millis(0), 1000, dec!(0.0001), Decimal::ZERO, Decimal::ZERO);
        state.update(Timestamp::from_millis(5000), 1000, dec!(0.0001), Decimal::ZERO, Decimal::ZERO);
        assert_eq!(state.cumulative_rate, Decimal::ZERO);
    }

    #[test]
    fn pure_deposit_on_long_pays_fee() {
        let pos = position(dec!(20000), dec!(2980));
        assert!(should_charge_deposit_fee(&pos, Side::Long, Usd::zero(), Usd::new(dec!(3000)), Bps::new(100)));
    }

    #[test]
    fn first_increase_and_shorts_are_free() {
        let empty = Position::default();
        assert!(!should_charge_deposit_fee(&empty, Side::Long, Usd::new(dec!(20000)), Usd::new(dec!(3000)), Bps::new(100)));

        let pos = position(dec!(20000), dec!(2980));
        assert!(!should_charge_deposit_fee(&pos, Side::Short, Usd::zero(), Usd::new(dec!(3000)), Bps::new(100)));
    }

    #[test]
    fn leverage_drop_pays_fee_proportional_increase_does_not() {
        // 20000 / 5965 => 33528 bps, next 23000 * 10100 / 8965 => 25911 bps
        let pos = position(dec!(20000), dec!(5965));
        assert!(should_charge_deposit_fee(&pos, Side::Long, Usd::new(dec!(3000)), Usd::new(dec!(3000)), Bps::new(100)));

        // 23000 / 8947 => 25706 bps, next 33000 * 10100 / 11947 => 27898 bps
        let pos = position(dec!(23000), dec!(8947));
        assert!(!should_charge_deposit_fee(&pos, Side::Long, Usd::new(dec!(10000)), Usd::new(dec!(3000)), Bps::new(100)));
    }

    #[test]
    fn huge_size_saturates_instead_of_overflowing() {
        let pos = position(dec!(20000), dec!(2980));
        let huge = Usd::new(dec!(10_000_000_000_000_000_000_000_000));
        assert!(!should_charge_deposit_fee(&pos, Side::Long, huge, Usd::new(dec!(3000)), Bps::new(100)));
        assert_eq!(leverage_bps(huge.value(), dec!(1), dec!(10100)), Decimal::MAX);
    }

    #[test]
    fn deposit_fee_split() {
        let (kept, fee) = split_deposit_fee(dec!(1), Bps::new(50), 18);
        assert_eq!(kept, dec!(0.995));
        assert_eq!(fee, dec!(0.005));
    }
}
