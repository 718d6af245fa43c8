// Price Oracle Integration
//
// The engine does not aggregate prices itself. It reads a min and a max price
// per token from whatever sits behind the PriceOracle trait (an aggregator, a
// keeper-pushed feed, a test fixture). Staleness and source handling are the
// oracle's problem; the engine only needs the two bounds.

use crate::types::{Price, TokenId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OracleError {
    #[error("no price available for {0}")]
    NoPrice(TokenId),

    #[error("oracle unavailable: {0}")]
    Unavailable(String),
}

/// Synchronous price source. `maximize` picks the upper bound of the spread.
pub trait PriceOracle {
    fn get_price(&self, token: TokenId, maximize: bool) -> Result<Price, OracleError>;

    fn max_price(&self, token: TokenId) -> Result<Price, OracleError> {
        self.get_price(token, true)
    }

    fn min_price(&self, token: TokenId) -> Result<Price, OracleError> {
        self.get_price(token, false)
    }
}

/// A quoted (min, max) pair for one token.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PriceBand {
    pub min: Price,
    pub max: Price,
}

impl PriceBand {
    pub fn flat(price: Price) -> Self {
        Self { min: price, max: price }
    }

    /// Symmetric spread around a reference price, in basis points each side.
    pub fn with_spread(reference: Price, spread_bps: u32) -> Self {
        let offset = reference.value() * Decimal::from(spread_bps) / Decimal::from(10_000);
        let min = Price::new(reference.value() - offset).unwrap_or(reference);
        Self {
            min,
            max: Price::new_unchecked(reference.value() + offset),
        }
    }
}

/// In-memory oracle. Prices are pushed by whoever owns it (keepers, tests, the sim).
#[derive(Debug, Clone, Default)]
pub struct StaticOracle {
    prices: HashMap<TokenId, PriceBand>,
}

impl StaticOracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_price(&mut self, token: TokenId, price: Price) {
        self.prices.insert(token, PriceBand::flat(price));
    }

    pub fn set_band(&mut self, token: TokenId, band: PriceBand) {
        self.prices.insert(token, band);
    }

    pub fn clear(&mut self, token: TokenId) {
        self.prices.remove(&token);
    }
}

impl PriceOracle for StaticOracle {
    fn get_price(&self, token: TokenId, maximize: bool) -> Result<Price, OracleError> {
        let band = self.prices.get(&token).ok_or(OracleError::NoPrice(token))?;
        Ok(if maximize { band.max } else { band.min })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn flat_price_has_equal_bounds() {
        let mut oracle = StaticOracle::new();
        oracle.set_price(TokenId(1), Price::new_unchecked(dec!(3000)));
        assert_eq!(oracle.max_price(TokenId(1)).unwrap().value(), dec!(3000));
        assert_eq!(oracle.min_price(TokenId(1)).unwrap().value(), dec!(3000));
    }

    #[test]
    fn spread_band_brackets_reference() {
        let band = PriceBand::with_spread(Price::new_unchecked(dec!(1000)), 10);
        assert_eq!(band.min.value(), dec!(999));
        assert_eq!(band.max.value(), dec!(1001));
    }

    #[test]
    fn missing_price_is_an_error() {
        let oracle = StaticOracle::new();
        assert_eq!(oracle.min_price(TokenId(7)), Err(OracleError::NoPrice(TokenId(7))));
    }
}
