//! Position increase and decrease.

use super::core::Engine;
use super::results::{
    DecreaseResult, EngineError, IncreaseResult, InsufficientCollateralError, LeverageError,
    ValidationError,
};
use crate::access::Operation;
use crate::events::{
    EventPayload, MarginFeesCollectedEvent, PositionClosedEvent, PositionDecreasedEvent,
    PositionIncreasedEvent,
};
use crate::fees::{margin_fee, position_funding_fee, PositionFees};
use crate::oracle::PriceOracle;
use crate::position::{next_average_price, position_delta, reduce_collateral, Position, PositionKey, ProfitWindow};
use crate::types::{round_token_down, Address, Bps, Price, Side, TokenId, Usd, MAX_USD_AMOUNT};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Open or add to a position. `collateral_amount` tokens are pulled from the caller.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct IncreaseRequest {
    pub account: Address,
    pub collateral_token: TokenId,
    pub index_token: TokenId,
    pub size_delta: Usd,
    pub side: Side,
    pub collateral_amount: Decimal,
    pub acceptable_price: Price,
}

impl IncreaseRequest {
    pub fn key(&self) -> PositionKey {
        PositionKey::new(self.account, self.collateral_token, self.index_token, self.side)
    }
}

/// Reduce or close a position, paying collateral tokens to `receiver`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DecreaseRequest {
    pub account: Address,
    pub collateral_token: TokenId,
    pub index_token: TokenId,
    pub collateral_delta: Usd,
    pub size_delta: Usd,
    pub side: Side,
    pub receiver: Address,
    pub acceptable_price: Price,
}

impl DecreaseRequest {
    pub fn key(&self) -> PositionKey {
        PositionKey::new(self.account, self.collateral_token, self.index_token, self.side)
    }
}

impl<O: PriceOracle> Engine<O> {
    pub fn increase_position(
        &mut self,
        caller: Address,
        request: &IncreaseRequest,
    ) -> Result<IncreaseResult, EngineError> {
        self.atomic(|engine| engine.increase_unchecked(caller, request))
    }

    pub fn decrease_position(
        &mut self,
        caller: Address,
        request: &DecreaseRequest,
    ) -> Result<DecreaseResult, EngineError> {
        self.atomic(|engine| {
            engine
                .state
                .gate
                .authorize(caller, Operation::PositionChange, request.account, engine.current_time)
                .into_result()?;
            engine.decrease_unchecked(
                request.key(),
                request.collateral_delta,
                request.size_delta,
                request.receiver,
                Some(request.acceptable_price),
            )
        })
    }

    pub(super) fn profit_window(&self, position: &Position, index_token: TokenId) -> ProfitWindow {
        let min_profit_bps = self
            .state
            .tokens
            .get(index_token)
            .map(|c| c.min_profit_bps)
            .unwrap_or(Bps::new(0));
        ProfitWindow {
            last_increased_time: position.last_increased_time,
            now: self.current_time,
            min_profit_time_ms: self.state.vault.min_profit_time_ms,
            min_profit_bps,
        }
    }

    // 4.0: size > 0 and never less than the collateral backing it
    pub(super) fn validate_position(size: Usd, collateral: Usd) -> Result<(), EngineError> {
        if size.is_zero() {
            if !collateral.is_zero() {
                return Err(ValidationError::InvalidPositionSize.into());
            }
            return Ok(());
        }
        if size < collateral {
            return Err(ValidationError::SizeBelowCollateral { size, collateral }.into());
        }
        Ok(())
    }

    fn increase_unchecked(
        &mut self,
        caller: Address,
        request: &IncreaseRequest,
    ) -> Result<IncreaseResult, EngineError> {
        let now = self.current_time;
        let IncreaseRequest {
            account,
            collateral_token,
            index_token,
            size_delta,
            side,
            collateral_amount,
            acceptable_price,
        } = *request;

        self.state
            .gate
            .authorize(caller, Operation::PositionChange, account, now)
            .into_result()?;

        // pure top-ups stay open while leverage is switched off
        if !self.state.gate.flags.leverage_enabled && !size_delta.is_zero() {
            return Err(LeverageError::Disabled.into());
        }
        if size_delta.is_negative() {
            return Err(ValidationError::NonPositiveAmount(size_delta.value()).into());
        }
        if size_delta.value() > MAX_USD_AMOUNT {
            return Err(ValidationError::AmountTooLarge(size_delta.value()).into());
        }
        if collateral_amount < Decimal::ZERO {
            return Err(ValidationError::NonPositiveAmount(collateral_amount).into());
        }
        self.state.tokens.validate_pair(collateral_token, index_token, side)?;

        self.update_funding(collateral_token);
        let price = self.check_increase_price(index_token, side, acceptable_price)?;

        let key = request.key();
        let mut position = self.state.ledger.position_or_default(&key);

        // 4.1: average price keeps the existing pnl intact
        if position.size.is_zero() {
            position.average_price = price.value();
        } else if !size_delta.is_zero() {
            let window = self.profit_window(&position, index_token);
            position.average_price =
                next_average_price(position.size, position.average_price, price, size_delta, side, window);
        }

        let cumulative = self.cumulative_funding_rate(collateral_token);
        let fees = PositionFees::compute(&position, size_delta, self.state.vault.margin_fee_bps, cumulative);
        let fee = fees.total();

        let vault = self.address;
        self.state
            .custody
            .transfer(collateral_token, caller, vault, collateral_amount)?;
        let collateral_usd = self.token_to_usd_min(collateral_token, collateral_amount)?;

        position.collateral = position.collateral.add(collateral_usd);
        if position.collateral < fee {
            return Err(InsufficientCollateralError::InsufficientForFees {
                collateral: position.collateral,
                fee,
            }
            .into());
        }
        position.collateral = position.collateral.sub(fee);
        position.entry_funding_rate = cumulative;
        position.size = position.size.add(size_delta);
        position.last_increased_time = now;

        if position.size.is_zero() {
            return Err(ValidationError::InvalidPositionSize.into());
        }
        Self::validate_position(position.size, position.collateral)?;
        self.validate_liquidation(&key, &position, true)?;

        // 4.2: reserve enough collateral tokens to pay out the full size
        let reserve_delta = self.usd_to_token_max(collateral_token, size_delta)?;
        position.reserve_amount += reserve_delta;
        self.state.ledger.reserve(collateral_token, reserve_delta)?;

        let fee_tokens = self.usd_to_token_min(collateral_token, fee)?;
        match side {
            Side::Long => {
                // the pool now owes size - collateral on this position
                self.state.ledger.adjust_guaranteed_usd(
                    collateral_token,
                    size_delta.add(fee),
                    collateral_usd,
                );
                self.state.ledger.increase_pool(collateral_token, collateral_amount);
                self.state.ledger.decrease_pool(collateral_token, fee_tokens)?;
            }
            Side::Short => {
                self.state
                    .ledger
                    .adjust_short_size(index_token, size_delta, Usd::zero());
            }
        }
        self.collect_margin_fees(collateral_token, fee, fee_tokens);

        debug!(
            %key,
            margin = %fees.margin,
            funding = %fees.funding,
            "position fees charged"
        );
        info!(
            %key,
            size = %position.size,
            collateral = %position.collateral,
            %price,
            "position increased"
        );

        let result = IncreaseResult {
            key,
            size: position.size,
            collateral: position.collateral,
            average_price: position.average_price,
            collateral_usd,
            margin_fee: fees.margin,
            funding_fee: fees.funding,
        };

        self.emit_event(EventPayload::PositionIncreased(PositionIncreasedEvent {
            key,
            collateral_delta: collateral_usd,
            size_delta,
            price: price.value(),
            fee,
            size: position.size,
            collateral: position.collateral,
            average_price: position.average_price,
        }));
        self.state.ledger.set_position(key, position);

        Ok(result)
    }

    pub(super) fn collect_margin_fees(&mut self, token: TokenId, fee: Usd, fee_tokens: Decimal) {
        if fee.is_zero() {
            return;
        }
        self.state.ledger.add_fee_reserve(token, fee_tokens);
        self.emit_event(EventPayload::MarginFeesCollected(MarginFeesCollectedEvent {
            token,
            fee_usd: fee,
            fee_tokens,
        }));
    }

    // 4.3: the caller has been authorised already. liquidation reuses this to
    // close max-leverage positions without a price limit.
    pub(super) fn decrease_unchecked(
        &mut self,
        key: PositionKey,
        collateral_delta: Usd,
        size_delta: Usd,
        receiver: Address,
        acceptable_price: Option<Price>,
    ) -> Result<DecreaseResult, EngineError> {
        let collateral_token = key.collateral_token;
        self.update_funding(collateral_token);
        let price = self.check_decrease_price(key.index_token, key.side, acceptable_price)?;

        let mut position = match self.state.ledger.position(&key) {
            Some(p) if !p.size.is_zero() => p.clone(),
            _ => return Err(InsufficientCollateralError::EmptyPosition(key).into()),
        };
        if size_delta.is_negative() || collateral_delta.is_negative() {
            return Err(ValidationError::NonPositiveAmount(size_delta.value().min(collateral_delta.value())).into());
        }
        if size_delta > position.size {
            return Err(InsufficientCollateralError::SizeDeltaExceedsSize {
                size_delta,
                size: position.size,
            }
            .into());
        }
        if collateral_delta > position.collateral {
            return Err(InsufficientCollateralError::CollateralDeltaExceedsCollateral {
                collateral_delta,
                collateral: position.collateral,
            }
            .into());
        }

        let collateral_before = position.collateral;
        let full_close = size_delta == position.size;

        // release reservations in proportion to the size closed
        let reserve_delta = if full_close {
            position.reserve_amount
        } else {
            round_token_down(
                position.reserve_amount * size_delta.value() / position.size.value(),
                self.state.tokens.decimals(collateral_token)?,
            )
        };
        position.reserve_amount -= reserve_delta;
        self.state.ledger.release(collateral_token, reserve_delta)?;

        let cumulative = self.cumulative_funding_rate(collateral_token);
        let fee = margin_fee(size_delta, self.state.vault.margin_fee_bps)
            .add(position_funding_fee(&position, cumulative));
        let fee_tokens = self.usd_to_token_min(collateral_token, fee)?;
        self.collect_margin_fees(collateral_token, fee, fee_tokens);

        let window = self.profit_window(&position, key.index_token);
        let delta = position_delta(position.size, position.average_price, price, key.side, window);
        let reduction = reduce_collateral(&mut position, delta, size_delta, collateral_delta, fee);

        if position.collateral.is_negative() {
            return Err(if reduction.realised.is_negative() {
                InsufficientCollateralError::LossesExceedCollateral
            } else {
                InsufficientCollateralError::FeesExceedCollateral
            }
            .into());
        }

        // shorts settle pnl against the pool; longs already pooled their collateral
        if key.side == Side::Short {
            if reduction.realised.value() > Decimal::ZERO {
                let paid = self.usd_to_token_min(collateral_token, reduction.realised)?;
                self.state.ledger.decrease_pool(collateral_token, paid)?;
            } else if reduction.realised.is_negative() {
                let kept = self.usd_to_token_min(collateral_token, reduction.realised.abs())?;
                self.state.ledger.increase_pool(collateral_token, kept);
            }
        } else if reduction.fee_from_collateral {
            self.state.ledger.decrease_pool(collateral_token, fee_tokens)?;
        }

        if full_close {
            if key.side.is_long() {
                self.state
                    .ledger
                    .adjust_guaranteed_usd(collateral_token, collateral_before, size_delta);
            }
        } else {
            position.entry_funding_rate = cumulative;
            position.size = position.size.sub(size_delta);
            Self::validate_position(position.size, position.collateral)?;
            self.validate_liquidation(&key, &position, true)?;
            if key.side.is_long() {
                self.state.ledger.adjust_guaranteed_usd(
                    collateral_token,
                    collateral_before.sub(position.collateral),
                    size_delta,
                );
            }
        }
        if key.side == Side::Short {
            self.state
                .ledger
                .adjust_short_size(key.index_token, Usd::zero(), size_delta);
        }

        let mut amount_out = Decimal::ZERO;
        if reduction.usd_out.value() > Decimal::ZERO {
            if key.side.is_long() {
                let released = self.usd_to_token_min(collateral_token, reduction.usd_out)?;
                self.state.ledger.decrease_pool(collateral_token, released)?;
            }
            amount_out = self.usd_to_token_min(collateral_token, reduction.usd_out_after_fee)?;
            let vault = self.address;
            self.state
                .custody
                .transfer(collateral_token, vault, receiver, amount_out)?;
        }

        info!(
            %key,
            %size_delta,
            usd_out = %reduction.usd_out_after_fee,
            %amount_out,
            closed = full_close,
            "position decreased"
        );

        if full_close {
            self.state.ledger.remove_position(&key);
            self.emit_event(EventPayload::PositionClosed(PositionClosedEvent {
                key,
                size: size_delta,
                realised_pnl: position.realised_pnl,
                receiver,
                amount_out,
            }));
        } else {
            self.emit_event(EventPayload::PositionDecreased(PositionDecreasedEvent {
                key,
                collateral_delta,
                size_delta,
                price: price.value(),
                fee,
                realised_pnl: reduction.realised,
                size: position.size,
                collateral: position.collateral,
            }));
            self.state.ledger.set_position(key, position.clone());
        }

        Ok(DecreaseResult {
            key,
            usd_out: reduction.usd_out,
            usd_out_after_fee: reduction.usd_out_after_fee,
            amount_out,
            realised_pnl: reduction.realised,
            fee,
            closed: full_close,
        })
    }
}
