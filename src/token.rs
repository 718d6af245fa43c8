//! Token whitelist and per-token settings.
//!
//! A token must be registered before it can back a position or sit in a
//! pool. Stable tokens only collateralise shorts; volatile tokens collateralise
//! longs on themselves.

use crate::types::{Bps, Side, TokenId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenConfig {
    pub symbol: String,
    /// Native decimal precision of the token's smallest unit.
    pub decimals: u32,
    pub is_stable: bool,
    pub is_shortable: bool,
    /// Profits below this threshold are ignored inside the min profit window.
    pub min_profit_bps: Bps,
}

impl TokenConfig {
    pub fn volatile(symbol: &str, decimals: u32) -> Self {
        Self {
            symbol: symbol.to_string(),
            decimals,
            is_stable: false,
            is_shortable: true,
            min_profit_bps: Bps::new(0),
        }
    }

    pub fn stable(symbol: &str, decimals: u32) -> Self {
        Self {
            symbol: symbol.to_string(),
            decimals,
            is_stable: true,
            is_shortable: false,
            min_profit_bps: Bps::new(0),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    #[error("token {0} is not whitelisted")]
    NotWhitelisted(TokenId),

    #[error("long collateral must match the index token")]
    LongCollateralMismatch,

    #[error("long collateral must not be a stable token")]
    LongCollateralStable,

    #[error("short collateral must be a stable token")]
    ShortCollateralNotStable,

    #[error("short index token must not be a stable token")]
    ShortIndexStable,

    #[error("index token {0} is not shortable")]
    NotShortable(TokenId),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenRegistry {
    tokens: HashMap<TokenId, TokenConfig>,
}

impl TokenRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, token: TokenId, config: TokenConfig) {
        self.tokens.insert(token, config);
    }

    pub fn remove(&mut self, token: TokenId) -> Option<TokenConfig> {
        self.tokens.remove(&token)
    }

    pub fn get(&self, token: TokenId) -> Result<&TokenConfig, TokenError> {
        self.tokens.get(&token).ok_or(TokenError::NotWhitelisted(token))
    }

    pub fn is_whitelisted(&self, token: TokenId) -> bool {
        self.tokens.contains_key(&token)
    }

    pub fn decimals(&self, token: TokenId) -> Result<u32, TokenError> {
        self.get(token).map(|c| c.decimals)
    }

    /// Collateral/index pairing rules for a position key.
    pub fn validate_pair(
        &self,
        collateral_token: TokenId,
        index_token: TokenId,
        side: Side,
    ) -> Result<(), TokenError> {
        let collateral = self.get(collateral_token)?;
        let index = self.get(index_token)?;

        match side {
            Side::Long => {
                if collateral_token != index_token {
                    return Err(TokenError::LongCollateralMismatch);
                }
                if collateral.is_stable {
                    return Err(TokenError::LongCollateralStable);
                }
            }
            Side::Short => {
                if !collateral.is_stable {
                    return Err(TokenError::ShortCollateralNotStable);
                }
                if index.is_stable {
                    return Err(TokenError::ShortIndexStable);
                }
                if !index.is_shortable {
                    return Err(TokenError::NotShortable(index_token));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WETH: TokenId = TokenId(1);
    const DAI: TokenId = TokenId(3);

    fn registry() -> TokenRegistry {
        let mut reg = TokenRegistry::new();
        reg.register(WETH, TokenConfig::volatile("WETH", 18));
        reg.register(DAI, TokenConfig::stable("DAI", 18));
        reg
    }

    #[test]
    fn long_needs_matching_volatile_collateral() {
        let reg = registry();
        assert!(reg.validate_pair(WETH, WETH, Side::Long).is_ok());
        assert_eq!(
            reg.validate_pair(DAI, WETH, Side::Long),
            Err(TokenError::LongCollateralMismatch)
        );
        assert_eq!(
            reg.validate_pair(DAI, DAI, Side::Long),
            Err(TokenError::LongCollateralStable)
        );
    }

    #[test]
    fn short_needs_stable_collateral() {
        let reg = registry();
        assert!(reg.validate_pair(DAI, WETH, Side::Short).is_ok());
        assert_eq!(
            reg.validate_pair(WETH, WETH, Side::Short),
            Err(TokenError::ShortCollateralNotStable)
        );
        assert_eq!(
            reg.validate_pair(DAI, DAI, Side::Short),
            Err(TokenError::ShortIndexStable)
        );
    }

    #[test]
    fn unknown_token_rejected() {
        let reg = registry();
        assert_eq!(
            reg.validate_pair(TokenId(9), WETH, Side::Long),
            Err(TokenError::NotWhitelisted(TokenId(9)))
        );
    }
}
