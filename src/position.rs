// 4.0: open position tracking. one record per (account, collateral, index, side).
// pnl = size * (price - average) / average, signed by side.
// 4.1 has the delta and average price math at the bottom.

use crate::types::{Address, Bps, Price, Side, Timestamp, TokenId, Usd, BPS_DIVISOR};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PositionKey {
    pub account: Address,
    pub collateral_token: TokenId,
    pub index_token: TokenId,
    pub side: Side,
}

impl PositionKey {
    pub fn new(account: Address, collateral_token: TokenId, index_token: TokenId, side: Side) -> Self {
        Self {
            account,
            collateral_token,
            index_token,
            side,
        }
    }

    pub fn long(account: Address, token: TokenId) -> Self {
        Self::new(account, token, token, Side::Long)
    }
}

impl fmt::Display for PositionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.account, self.collateral_token, self.index_token, self.side
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// Notional in usd.
    pub size: Usd,
    /// Collateral in usd, net of every fee charged so far.
    pub collateral: Usd,
    pub average_price: Decimal,
    pub entry_funding_rate: Decimal,
    /// Collateral-token units reserved in the pool against this position.
    pub reserve_amount: Decimal,
    pub realised_pnl: Usd,
    pub last_increased_time: Timestamp,
}

impl Default for Position {
    fn default() -> Self {
        Self {
            size: Usd::zero(),
            collateral: Usd::zero(),
            average_price: Decimal::ZERO,
            entry_funding_rate: Decimal::ZERO,
            reserve_amount: Decimal::ZERO,
            realised_pnl: Usd::zero(),
            last_increased_time: Timestamp::default(),
        }
    }
}

impl Position {
    pub fn is_empty(&self) -> bool {
        self.size.is_zero()
    }

    pub fn leverage(&self) -> Option<Decimal> {
        crate::types::Leverage::of(self.size, self.collateral)
    }
}

/// Inputs for the min-profit rule. Profits that are both too recent and too
/// small are treated as zero so a position can't be opened and closed on a
/// favourable oracle tick.
#[derive(Debug, Clone, Copy)]
pub struct ProfitWindow {
    pub last_increased_time: Timestamp,
    pub now: Timestamp,
    pub min_profit_time_ms: i64,
    pub min_profit_bps: Bps,
}

impl ProfitWindow {
    pub fn none() -> Self {
        Self {
            last_increased_time: Timestamp::default(),
            now: Timestamp::default(),
            min_profit_time_ms: 0,
            min_profit_bps: Bps::new(0),
        }
    }
}

// 4.1: signed pnl of `size` opened at `average_price` and marked at `price`.
// positive = profit.
pub fn position_delta(
    size: Usd,
    average_price: Decimal,
    price: Price,
    side: Side,
    window: ProfitWindow,
) -> Usd {
    if average_price <= Decimal::ZERO || size.is_zero() {
        return Usd::zero();
    }

    let price_delta = (average_price - price.value()).abs();
    let delta = size.value() * price_delta / average_price;

    let has_profit = match side {
        Side::Long => price.value() > average_price,
        Side::Short => average_price > price.value(),
    };

    if !has_profit {
        return Usd::new(-delta);
    }

    let inside_window = window.now.as_millis()
        <= window.last_increased_time.as_millis() + window.min_profit_time_ms;
    let below_threshold = delta * BPS_DIVISOR <= size.value() * window.min_profit_bps.as_decimal();
    if inside_window && below_threshold {
        return Usd::zero();
    }

    Usd::new(delta)
}

// 4.2: average price after adding `size_delta` at `next_price`. keeps the
// unrealised pnl of the existing size unchanged.
pub fn next_average_price(
    size: Usd,
    average_price: Decimal,
    next_price: Price,
    size_delta: Usd,
    side: Side,
    window: ProfitWindow,
) -> Decimal {
    let delta = position_delta(size, average_price, next_price, side, window);
    let next_size = size.add(size_delta).value();

    // a long in profit (or a short in loss) sits above its average price
    let divisor = match side {
        Side::Long => next_size + delta.value(),
        Side::Short => next_size - delta.value(),
    };

    if divisor <= Decimal::ZERO {
        return next_price.value();
    }
    next_price.value() * next_size / divisor
}

/// Result of shaving fees and losses off the collateral during a decrease.
#[derive(Debug, Clone, PartialEq)]
pub struct CollateralReduction {
    /// Usd owed to the receiver before fees.
    pub usd_out: Usd,
    /// Usd owed to the receiver after fees.
    pub usd_out_after_fee: Usd,
    /// Pnl realised on the closed slice, signed.
    pub realised: Usd,
    /// Fee that had to come out of remaining collateral because the payout could not cover it.
    pub fee_from_collateral: bool,
}

// 4.3: pays realised pnl, withdraws collateral_delta, releases everything on a
// full close, then takes the fee from the payout if it can.
pub fn reduce_collateral(
    position: &mut Position,
    delta: Usd,
    size_delta: Usd,
    collateral_delta: Usd,
    fee: Usd,
) -> CollateralReduction {
    let adjusted = if position.size.is_zero() {
        Usd::zero()
    } else {
        Usd::new(size_delta.value() * delta.value() / position.size.value())
    };

    let mut usd_out = Usd::zero();

    if adjusted.value() > Decimal::ZERO {
        usd_out = adjusted;
        position.realised_pnl = position.realised_pnl.add(adjusted);
    } else if adjusted.is_negative() {
        let loss = adjusted.abs();
        position.collateral = position.collateral.sub(loss);
        position.realised_pnl = position.realised_pnl.sub(loss);
    }

    if collateral_delta.value() > Decimal::ZERO {
        usd_out = usd_out.add(collateral_delta);
        position.collateral = position.collateral.sub(collateral_delta);
    }

    // full close: nothing may stay behind in the record
    if position.size == size_delta {
        usd_out = usd_out.add(position.collateral);
        position.collateral = Usd::zero();
    }

    let (usd_out_after_fee, fee_from_collateral) = if usd_out > fee {
        (usd_out.sub(fee), false)
    } else {
        position.collateral = position.collateral.sub(fee);
        (usd_out, true)
    };

    CollateralReduction {
        usd_out,
        usd_out_after_fee,
        realised: adjusted,
        fee_from_collateral,
    }
}
