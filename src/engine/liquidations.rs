//! Liquidation checks and execution.

use super::core::Engine;
use super::results::{
    EngineError, InsufficientCollateralError, LeverageError, LiquidationResult, LiquidationState,
};
use crate::access::Operation;
use crate::events::{EventPayload, PositionLiquidatedEvent};
use crate::fees::{margin_fee, position_funding_fee};
use crate::oracle::PriceOracle;
use crate::position::{position_delta, Position, PositionKey};
use crate::types::{Address, Usd, BPS_DIVISOR};
use rust_decimal::Decimal;
use tracing::{info, warn};

impl<O: PriceOracle> Engine<O> {
    /// Classify a position against its collateral. With `raise` set, anything
    /// but healthy comes back as the error naming the broken rule.
    ///
    /// Returns the state and the margin fees a full close would charge, capped
    /// at the remaining collateral when fees alone exceed it.
    pub(super) fn validate_liquidation(
        &self,
        key: &PositionKey,
        position: &Position,
        raise: bool,
    ) -> Result<(LiquidationState, Usd), EngineError> {
        let price = self
            .oracle
            .get_price(key.index_token, !key.side.maximize_on_increase())?;
        let window = self.profit_window(position, key.index_token);
        let delta = position_delta(position.size, position.average_price, price, key.side, window);

        let cumulative = self.cumulative_funding_rate(key.collateral_token);
        let margin_fees = position_funding_fee(position, cumulative)
            .add(margin_fee(position.size, self.state.vault.margin_fee_bps));

        let loss = if delta.is_negative() { delta.abs() } else { Usd::zero() };
        if position.collateral < loss {
            if raise {
                return Err(InsufficientCollateralError::LossesExceedCollateral.into());
            }
            return Ok((LiquidationState::Insolvent, margin_fees));
        }

        let remaining = position.collateral.sub(loss);
        if remaining < margin_fees {
            if raise {
                return Err(InsufficientCollateralError::FeesExceedCollateral.into());
            }
            return Ok((LiquidationState::Insolvent, remaining));
        }

        if remaining < margin_fees.add(self.state.vault.liquidation_fee_usd) {
            if raise {
                return Err(InsufficientCollateralError::LiquidationFeesExceedCollateral.into());
            }
            return Ok((LiquidationState::Insolvent, margin_fees));
        }

        let max_leverage = self.state.vault.max_leverage;
        let over_max = match (
            remaining.value().checked_mul(max_leverage.as_bps()),
            position.size.value().checked_mul(BPS_DIVISOR),
        ) {
            (Some(covered), Some(needed)) => covered < needed,
            (None, _) => false,
            (Some(_), None) => true,
        };
        if over_max {
            if raise {
                return Err(LeverageError::Exceeded {
                    size: position.size,
                    collateral: remaining,
                    max: max_leverage.value(),
                }
                .into());
            }
            return Ok((LiquidationState::MaxLeverageExceeded, margin_fees));
        }

        Ok((LiquidationState::Healthy, margin_fees))
    }

    /// Read-only check used by keepers before submitting a liquidation.
    pub fn liquidation_state(&self, key: &PositionKey) -> Result<LiquidationState, EngineError> {
        let position = match self.state.ledger.position(key) {
            Some(p) if !p.is_empty() => p,
            _ => return Err(InsufficientCollateralError::EmptyPosition(*key).into()),
        };
        Ok(self.validate_liquidation(key, position, false)?.0)
    }

    // 10.0: seize an insolvent position, or close an over-levered one back to its owner.
    pub fn liquidate_position(
        &mut self,
        caller: Address,
        key: PositionKey,
        fee_receiver: Address,
    ) -> Result<LiquidationResult, EngineError> {
        self.atomic(|engine| {
            engine
                .state
                .gate
                .authorize(caller, Operation::Liquidate, key.account, engine.current_time)
                .into_result()?;

            let token = key.collateral_token;
            engine.update_funding(token);

            let position = match engine.state.ledger.position(&key) {
                Some(p) if !p.is_empty() => p.clone(),
                _ => return Err(InsufficientCollateralError::EmptyPosition(key).into()),
            };

            let (state, margin_fees) = engine.validate_liquidation(&key, &position, false)?;
            let mark_price = engine
                .oracle
                .get_price(key.index_token, !key.side.maximize_on_increase())?;

            match state {
                LiquidationState::Healthy => {
                    return Err(InsufficientCollateralError::NotLiquidatable(key).into());
                }
                LiquidationState::MaxLeverageExceeded => {
                    warn!(%key, size = %position.size, "closing position above max leverage");
                    let closed = engine.decrease_unchecked(key, Usd::zero(), position.size, key.account, None)?;
                    return Ok(LiquidationResult {
                        key,
                        state,
                        size: position.size,
                        collateral: position.collateral,
                        margin_fees: closed.fee,
                        liquidation_fee_tokens: Decimal::ZERO,
                        amount_out: closed.amount_out,
                    });
                }
                LiquidationState::Insolvent => {}
            }

            let fee_tokens = engine.usd_to_token_min(token, margin_fees)?;
            engine.collect_margin_fees(token, margin_fees, fee_tokens);
            engine.state.ledger.release(token, position.reserve_amount)?;

            if key.side.is_long() {
                engine
                    .state
                    .ledger
                    .adjust_guaranteed_usd(token, Usd::zero(), position.size.sub(position.collateral));
                engine.state.ledger.decrease_pool(token, fee_tokens)?;
            } else {
                // whatever the fees leave of a short's collateral goes to the pool
                if margin_fees < position.collateral {
                    let remaining = position.collateral.sub(margin_fees);
                    let remaining_tokens = engine.usd_to_token_min(token, remaining)?;
                    engine.state.ledger.increase_pool(token, remaining_tokens);
                }
                engine
                    .state
                    .ledger
                    .adjust_short_size(key.index_token, Usd::zero(), position.size);
            }
            engine.state.ledger.remove_position(&key);

            // liquidator is paid out of the pool
            let liquidation_fee = engine.state.vault.liquidation_fee_usd;
            let liquidation_fee_tokens = engine.usd_to_token_min(token, liquidation_fee)?;
            engine.state.ledger.decrease_pool(token, liquidation_fee_tokens)?;
            let vault = engine.address;
            engine
                .state
                .custody
                .transfer(token, vault, fee_receiver, liquidation_fee_tokens)?;

            info!(
                %key,
                size = %position.size,
                collateral = %position.collateral,
                %mark_price,
                "position liquidated"
            );
            engine.emit_event(EventPayload::PositionLiquidated(PositionLiquidatedEvent {
                key,
                size: position.size,
                collateral: position.collateral,
                mark_price: mark_price.value(),
                margin_fees,
                liquidator: caller,
                fee_receiver,
            }));

            Ok(LiquidationResult {
                key,
                state,
                size: position.size,
                collateral: position.collateral,
                margin_fees,
                liquidation_fee_tokens,
                amount_out: Decimal::ZERO,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProtocolConfig;
    use crate::engine::{EngineConfig, IncreaseRequest};
    use crate::oracle::StaticOracle;
    use crate::token::TokenConfig;
    use crate::types::{Price, Side, TokenId};
    use rust_decimal_macros::dec;

    const WETH: TokenId = TokenId(1);
    const GOV: Address = Address(1);
    const VAULT: Address = Address(2);
    const ALICE: Address = Address(10);

    fn setup_engine() -> Engine<StaticOracle> {
        let mut oracle = StaticOracle::new();
        oracle.set_price(WETH, Price::new_unchecked(dec!(3000)));
        let mut engine = Engine::new(
            EngineConfig::default(),
            ProtocolConfig::default(),
            oracle,
            VAULT,
            GOV,
            WETH,
        );
        engine.set_token_config(GOV, WETH, TokenConfig::volatile("WETH", 18)).unwrap();
        engine.custody_mut().mint(WETH, GOV, dec!(100));
        engine.deposit_liquidity(GOV, WETH, dec!(100)).unwrap();
        engine.custody_mut().mint(WETH, ALICE, dec!(1));
        engine
    }

    fn open(engine: &mut Engine<StaticOracle>, size: Decimal) -> PositionKey {
        let request = IncreaseRequest {
            account: ALICE,
            collateral_token: WETH,
            index_token: WETH,
            size_delta: Usd::new(size),
            side: Side::Long,
            collateral_amount: dec!(1),
            acceptable_price: Price::new_unchecked(dec!(3000)),
        };
        engine.increase_position(ALICE, &request).unwrap();
        request.key()
    }

    #[test]
    fn fresh_position_is_healthy() {
        let mut engine = setup_engine();
        let key = open(&mut engine, dec!(20000));
        assert_eq!(engine.liquidation_state(&key).unwrap(), LiquidationState::Healthy);
    }

    #[test]
    fn raise_names_the_broken_rule() {
        let mut engine = setup_engine();
        let key = open(&mut engine, dec!(30000));
        let position = engine.position(&key).cloned().unwrap();

        engine.oracle_mut().set_price(WETH, Price::new_unchecked(dec!(2700)));
        assert_eq!(
            engine.validate_liquidation(&key, &position, true).unwrap_err(),
            EngineError::Collateral(InsufficientCollateralError::LossesExceedCollateral)
        );

        engine.oracle_mut().set_price(WETH, Price::new_unchecked(dec!(2750)));
        assert!(matches!(
            engine.validate_liquidation(&key, &position, true).unwrap_err(),
            EngineError::Leverage(LeverageError::Exceeded { .. })
        ));
    }

    #[test]
    fn fees_cap_at_remaining_collateral() {
        let mut engine = setup_engine();
        let key = open(&mut engine, dec!(30000));
        let position = engine.position(&key).cloned().unwrap();

        // 2970 collateral, 2950 loss leaves 20 against 30 of margin fees
        engine.oracle_mut().set_price(WETH, Price::new_unchecked(dec!(2705)));
        let (state, fees) = engine.validate_liquidation(&key, &position, false).unwrap();
        assert_eq!(state, LiquidationState::Insolvent);
        assert_eq!(fees.value(), dec!(20));
    }

    #[test]
    fn empty_key_cannot_be_liquidated() {
        let mut engine = setup_engine();
        let key = PositionKey::long(ALICE, WETH);
        assert!(matches!(
            engine.liquidate_position(GOV, key, GOV),
            Err(EngineError::Collateral(InsufficientCollateralError::EmptyPosition(_)))
        ));
    }
}
