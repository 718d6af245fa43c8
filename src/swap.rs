// 9.3 swap.rs: converts the router's input asset into the position's collateral token.
// the venue itself is external. the engine only needs a quote for a path and a
// guarantee that the output clears min_out; custody settles the balances.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::oracle::{OracleError, PriceOracle};
use crate::token::TokenRegistry;
use crate::types::{round_token_down, Bps, TokenId};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SwapError {
    #[error("swap: insufficient amount out ({amount_out} < {min_out})")]
    InsufficientAmountOut { amount_out: Decimal, min_out: Decimal },

    #[error("swap: path must hold 2 tokens, got {0}")]
    InvalidPath(usize),

    #[error("swap: cannot swap {0} into itself")]
    SameToken(TokenId),

    #[error("swap: token {0} is not whitelisted")]
    UnknownToken(TokenId),

    #[error("swap: {0}")]
    Oracle(#[from] OracleError),
}

/// What a swap venue needs to quote: prices and token precision.
pub struct SwapContext<'a> {
    pub oracle: &'a dyn PriceOracle,
    pub tokens: &'a TokenRegistry,
}

// Different implementations can model:
// - the vault's own pool (oracle priced, fee in bps)
// - an external AMM
// - a fixed-rate test venue
pub trait Swap {
    /// Quote `amount_in` of `path[0]` into `path[1]`. Fails if the output is below `min_out`.
    fn swap(
        &self,
        ctx: &SwapContext<'_>,
        path: &[TokenId],
        amount_in: Decimal,
        min_out: Decimal,
    ) -> Result<Decimal, SwapError>;
}

/// Oracle-priced venue: sells at the input's min price, buys at the output's max
/// price, minus a flat fee.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleSwap {
    pub fee_bps: Bps,
}

impl Default for OracleSwap {
    fn default() -> Self {
        Self { fee_bps: Bps::new(30) } // 0.3%
    }
}

impl OracleSwap {
    pub fn new(fee_bps: Bps) -> Self {
        Self { fee_bps }
    }
}

impl Swap for OracleSwap {
    fn swap(
        &self,
        ctx: &SwapContext<'_>,
        path: &[TokenId],
        amount_in: Decimal,
        min_out: Decimal,
    ) -> Result<Decimal, SwapError> {
        let [token_in, token_out] = path else {
            return Err(SwapError::InvalidPath(path.len()));
        };
        if token_in == token_out {
            return Err(SwapError::SameToken(*token_in));
        }
        let decimals_out = ctx
            .tokens
            .decimals(*token_out)
            .map_err(|_| SwapError::UnknownToken(*token_out))?;
        if !ctx.tokens.is_whitelisted(*token_in) {
            return Err(SwapError::UnknownToken(*token_in));
        }

        let price_in = ctx.oracle.min_price(*token_in)?;
        let price_out = ctx.oracle.max_price(*token_out)?;

        let gross = amount_in * price_in.value() / price_out.value();
        let net = gross - self.fee_bps.apply(gross);
        let amount_out = round_token_down(net, decimals_out);

        if amount_out < min_out {
            return Err(SwapError::InsufficientAmountOut { amount_out, min_out });
        }
        Ok(amount_out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::StaticOracle;
    use crate::token::TokenConfig;
    use crate::types::Price;
    use rust_decimal_macros::dec;

    const WETH: TokenId = TokenId(1);
    const DAI: TokenId = TokenId(3);

    fn fixtures() -> (StaticOracle, TokenRegistry) {
        let mut oracle = StaticOracle::new();
        oracle.set_price(WETH, Price::new_unchecked(dec!(3000)));
        oracle.set_price(DAI, Price::new_unchecked(dec!(1)));
        let mut tokens = TokenRegistry::new();
        tokens.register(WETH, TokenConfig::volatile("WETH", 18));
        tokens.register(DAI, TokenConfig::stable("DAI", 18));
        (oracle, tokens)
    }

    #[test]
    fn quotes_through_oracle_prices() {
        let (oracle, tokens) = fixtures();
        let ctx = SwapContext { oracle: &oracle, tokens: &tokens };
        let out = OracleSwap::new(Bps::new(30)).swap(&ctx, &[WETH, DAI], dec!(1), dec!(0)).unwrap();
        assert_eq!(out, dec!(2991)); // 3000 less 0.3%
    }

    #[test]
    fn min_out_enforced() {
        let (oracle, tokens) = fixtures();
        let ctx = SwapContext { oracle: &oracle, tokens: &tokens };
        let err = OracleSwap::default().swap(&ctx, &[WETH, DAI], dec!(1), dec!(3000)).unwrap_err();
        assert!(matches!(err, SwapError::InsufficientAmountOut { .. }));
    }

    #[test]
    fn path_shape_checked() {
        let (oracle, tokens) = fixtures();
        let ctx = SwapContext { oracle: &oracle, tokens: &tokens };
        assert_eq!(
            OracleSwap::default().swap(&ctx, &[WETH], dec!(1), dec!(0)),
            Err(SwapError::InvalidPath(1))
        );
        assert_eq!(
            OracleSwap::default().swap(&ctx, &[WETH, WETH], dec!(1), dec!(0)),
            Err(SwapError::SameToken(WETH))
        );
    }
}
