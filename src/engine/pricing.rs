//! Oracle reads, usd/token conversion and the funding clock.

use super::core::Engine;
use super::results::{EngineError, PriceSlippageError};
use crate::events::{EventPayload, FundingRateUpdatedEvent};
use crate::oracle::PriceOracle;
use crate::types::{round_token_down, Price, Side, TokenId, Usd};
use rust_decimal::Decimal;

impl<O: PriceOracle> Engine<O> {
    pub fn min_price(&self, token: TokenId) -> Result<Price, EngineError> {
        Ok(self.oracle.min_price(token)?)
    }

    pub fn max_price(&self, token: TokenId) -> Result<Price, EngineError> {
        Ok(self.oracle.max_price(token)?)
    }

    /// Usd value of `amount` tokens at the min price.
    pub fn token_to_usd_min(&self, token: TokenId, amount: Decimal) -> Result<Usd, EngineError> {
        if amount.is_zero() {
            return Ok(Usd::zero());
        }
        let price = self.min_price(token)?;
        Ok(Usd::new(amount * price.value()))
    }

    /// Fewest tokens worth `usd`: divides by the max price.
    pub fn usd_to_token_min(&self, token: TokenId, usd: Usd) -> Result<Decimal, EngineError> {
        if usd.is_zero() {
            return Ok(Decimal::ZERO);
        }
        let price = self.max_price(token)?;
        self.usd_to_token(token, usd, price)
    }

    /// Most tokens worth `usd`: divides by the min price.
    pub fn usd_to_token_max(&self, token: TokenId, usd: Usd) -> Result<Decimal, EngineError> {
        if usd.is_zero() {
            return Ok(Decimal::ZERO);
        }
        let price = self.min_price(token)?;
        self.usd_to_token(token, usd, price)
    }

    fn usd_to_token(&self, token: TokenId, usd: Usd, price: Price) -> Result<Decimal, EngineError> {
        let decimals = self.state.tokens.decimals(token)?;
        Ok(round_token_down(usd.value() / price.value(), decimals))
    }

    // 8.5: opening reads the side's worse price. longs must not open above the
    // limit, shorts must not open below it.
    pub(super) fn check_increase_price(
        &self,
        index_token: TokenId,
        side: Side,
        limit: Price,
    ) -> Result<Price, EngineError> {
        let mark = self.oracle.get_price(index_token, side.maximize_on_increase())?;
        match side {
            Side::Long if mark > limit => {
                Err(PriceSlippageError::MarkPriceHigherThanLimit { mark, limit }.into())
            }
            Side::Short if mark < limit => {
                Err(PriceSlippageError::MarkPriceLowerThanLimit { mark, limit }.into())
            }
            _ => Ok(mark),
        }
    }

    // closing is the mirror image. `None` skips the limit (liquidations).
    pub(super) fn check_decrease_price(
        &self,
        index_token: TokenId,
        side: Side,
        limit: Option<Price>,
    ) -> Result<Price, EngineError> {
        let mark = self.oracle.get_price(index_token, !side.maximize_on_increase())?;
        match (side, limit) {
            (Side::Long, Some(limit)) if mark < limit => {
                Err(PriceSlippageError::MarkPriceLowerThanLimit { mark, limit }.into())
            }
            (Side::Short, Some(limit)) if mark > limit => {
                Err(PriceSlippageError::MarkPriceHigherThanLimit { mark, limit }.into())
            }
            _ => Ok(mark),
        }
    }

    /// Settle any whole funding intervals that elapsed for `token`.
    pub fn update_funding(&mut self, token: TokenId) -> Decimal {
        let factor = match self.state.tokens.get(token) {
            Ok(config) if config.is_stable => self.state.vault.stable_funding_rate_factor,
            _ => self.state.vault.funding_rate_factor,
        };
        let pool = self.state.ledger.pool(token);
        let now = self.current_time;
        let interval = self.state.vault.funding_interval_ms;

        let funding = self.state.funding.entry(token).or_default();
        let rate = funding.update(now, interval, factor, pool.pool_amount, pool.reserved_amount);
        let cumulative_rate = funding.cumulative_rate;

        if rate > Decimal::ZERO {
            self.emit_event(EventPayload::FundingRateUpdated(FundingRateUpdatedEvent {
                token,
                rate,
                cumulative_rate,
            }));
        }
        rate
    }
}
