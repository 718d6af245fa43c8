//! Collateral ledger: position records plus per-token pool accounting.
//!
//! Every pool write re-checks `reserved <= pooled`, so no sequence of ledger
//! calls can leave a token's reservations uncovered.

use crate::position::{Position, PositionKey};
use crate::types::{TokenId, Usd};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LiquidityError {
    #[error("insufficient liquidity for {token}: reserved {reserved} exceeds pooled {pooled}")]
    ReserveExceedsPool {
        token: TokenId,
        reserved: Decimal,
        pooled: Decimal,
    },

    #[error("insufficient pool amount for {token}: requested {requested}, pooled {pooled}")]
    InsufficientPool {
        token: TokenId,
        requested: Decimal,
        pooled: Decimal,
    },

    #[error("cannot release {requested} of {token}: only {reserved} reserved")]
    InsufficientReserve {
        token: TokenId,
        requested: Decimal,
        reserved: Decimal,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PoolState {
    /// Tokens backing trader payouts.
    pub pool_amount: Decimal,
    /// Portion of pool_amount set aside for open positions.
    pub reserved_amount: Decimal,
    /// Margin and liquidation fees collected, in tokens.
    pub fee_reserves: Decimal,
    /// size - collateral over longs on this token. the pool owes at most this much.
    pub guaranteed_usd: Usd,
    /// Open short notional with this token as the index.
    pub global_short_size: Usd,
}

impl PoolState {
    pub fn available(&self) -> Decimal {
        self.pool_amount - self.reserved_amount
    }

    pub fn utilisation(&self) -> Decimal {
        if self.pool_amount.is_zero() {
            Decimal::ZERO
        } else {
            self.reserved_amount / self.pool_amount
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CollateralLedger {
    positions: HashMap<PositionKey, Position>,
    pools: HashMap<TokenId, PoolState>,
}

impl CollateralLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn position(&self, key: &PositionKey) -> Option<&Position> {
        self.positions.get(key)
    }

    /// Copy of the record, or an empty one for an unopened key.
    pub fn position_or_default(&self, key: &PositionKey) -> Position {
        self.positions.get(key).cloned().unwrap_or_default()
    }

    pub fn set_position(&mut self, key: PositionKey, position: Position) {
        self.positions.insert(key, position);
    }

    pub fn remove_position(&mut self, key: &PositionKey) -> Option<Position> {
        self.positions.remove(key)
    }

    pub fn positions(&self) -> impl Iterator<Item = (&PositionKey, &Position)> {
        self.positions.iter()
    }

    pub fn pool(&self, token: TokenId) -> PoolState {
        self.pools.get(&token).cloned().unwrap_or_default()
    }

    pub fn pools(&self) -> impl Iterator<Item = (&TokenId, &PoolState)> {
        self.pools.iter()
    }

    fn pool_mut(&mut self, token: TokenId) -> &mut PoolState {
        self.pools.entry(token).or_default()
    }

    pub fn increase_pool(&mut self, token: TokenId, amount: Decimal) {
        self.pool_mut(token).pool_amount += amount;
    }

    pub fn decrease_pool(&mut self, token: TokenId, amount: Decimal) -> Result<(), LiquidityError> {
        let pool = self.pool_mut(token);
        if amount > pool.pool_amount {
            return Err(LiquidityError::InsufficientPool {
                token,
                requested: amount,
                pooled: pool.pool_amount,
            });
        }
        let next = pool.pool_amount - amount;
        if pool.reserved_amount > next {
            return Err(LiquidityError::ReserveExceedsPool {
                token,
                reserved: pool.reserved_amount,
                pooled: next,
            });
        }
        pool.pool_amount = next;
        Ok(())
    }

    pub fn reserve(&mut self, token: TokenId, amount: Decimal) -> Result<(), LiquidityError> {
        let pool = self.pool_mut(token);
        let next = pool.reserved_amount + amount;
        if next > pool.pool_amount {
            return Err(LiquidityError::ReserveExceedsPool {
                token,
                reserved: next,
                pooled: pool.pool_amount,
            });
        }
        pool.reserved_amount = next;
        Ok(())
    }

    pub fn release(&mut self, token: TokenId, amount: Decimal) -> Result<(), LiquidityError> {
        let pool = self.pool_mut(token);
        if amount > pool.reserved_amount {
            return Err(LiquidityError::InsufficientReserve {
                token,
                requested: amount,
                reserved: pool.reserved_amount,
            });
        }
        pool.reserved_amount -= amount;
        Ok(())
    }

    pub fn add_fee_reserve(&mut self, token: TokenId, amount: Decimal) {
        self.pool_mut(token).fee_reserves += amount;
    }

    pub fn take_fee_reserves(&mut self, token: TokenId) -> Decimal {
        std::mem::take(&mut self.pool_mut(token).fee_reserves)
    }

    pub fn adjust_guaranteed_usd(&mut self, token: TokenId, increase: Usd, decrease: Usd) {
        let pool = self.pool_mut(token);
        pool.guaranteed_usd = pool.guaranteed_usd.add(increase).saturating_sub(decrease);
    }

    pub fn adjust_short_size(&mut self, token: TokenId, increase: Usd, decrease: Usd) {
        let pool = self.pool_mut(token);
        pool.global_short_size = pool.global_short_size.add(increase).saturating_sub(decrease);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Address;
    use rust_decimal_macros::dec;

    const WETH: TokenId = TokenId(1);

    #[test]
    fn reserve_cannot_exceed_pool() {
        let mut ledger = CollateralLedger::new();
        ledger.increase_pool(WETH, dec!(10));
        ledger.reserve(WETH, dec!(6)).unwrap();

        let err = ledger.reserve(WETH, dec!(5)).unwrap_err();
        assert!(matches!(err, LiquidityError::ReserveExceedsPool { .. }));
        assert_eq!(ledger.pool(WETH).reserved_amount, dec!(6));
    }

    #[test]
    fn pool_cannot_drop_under_reserved() {
        let mut ledger = CollateralLedger::new();
        ledger.increase_pool(WETH, dec!(10));
        ledger.reserve(WETH, dec!(6)).unwrap();

        assert!(ledger.decrease_pool(WETH, dec!(5)).is_err());
        ledger.decrease_pool(WETH, dec!(4)).unwrap();
        assert_eq!(ledger.pool(WETH).available(), Decimal::ZERO);
    }

    #[test]
    fn release_is_bounded() {
        let mut ledger = CollateralLedger::new();
        ledger.increase_pool(WETH, dec!(10));
        ledger.reserve(WETH, dec!(2)).unwrap();
        assert!(ledger.release(WETH, dec!(3)).is_err());
        ledger.release(WETH, dec!(2)).unwrap();
        assert_eq!(ledger.pool(WETH).utilisation(), Decimal::ZERO);
    }

    #[test]
    fn unopened_key_reads_as_empty() {
        let ledger = CollateralLedger::new();
        let key = PositionKey::long(Address(1), WETH);
        assert!(ledger.position(&key).is_none());
        assert!(ledger.position_or_default(&key).is_empty());
    }
}
