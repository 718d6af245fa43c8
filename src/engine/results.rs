// 8.0.2: result types and errors for engine operations.
// each failure family has its own enum; EngineError wraps them so callers can
// match on the family and still print the exact invariant that broke.

use crate::access::PermissionError;
use crate::config::ConfigError;
use crate::custody::CustodyError;
use crate::ledger::LiquidityError;
use crate::oracle::OracleError;
use crate::position::PositionKey;
use crate::swap::SwapError;
use crate::token::TokenError;
use crate::types::{Price, TokenId, Usd};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("invalid path.length: {0}")]
    InvalidPathLength(usize),

    #[error("invalid path: expected {expected} first, got {got}")]
    InvalidPath { expected: TokenId, got: TokenId },

    #[error("invalid collateral token: expected {expected}, got {got}")]
    InvalidCollateralToken { expected: TokenId, got: TokenId },

    #[error("invalid position.size")]
    InvalidPositionSize,

    #[error("position size {size} below collateral {collateral}")]
    SizeBelowCollateral { size: Usd, collateral: Usd },

    #[error("amount must be positive, got {0}")]
    NonPositiveAmount(Decimal),

    #[error("amount {0} above the per-request cap")]
    AmountTooLarge(Decimal),

    #[error("{0}")]
    Token(#[from] TokenError),
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PriceSlippageError {
    #[error("mark price higher than limit ({mark} > {limit})")]
    MarkPriceHigherThanLimit { mark: Price, limit: Price },

    #[error("mark price lower than limit ({mark} < {limit})")]
    MarkPriceLowerThanLimit { mark: Price, limit: Price },
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LeverageError {
    #[error("leverage not enabled")]
    Disabled,

    #[error("leverage exceeded: {size} on {collateral} collateral, max {max}x")]
    Exceeded { size: Usd, collateral: Usd, max: Decimal },

    #[error("invalid max leverage {0}")]
    InvalidMaxLeverage(Decimal),
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InsufficientCollateralError {
    #[error("empty position {0}")]
    EmptyPosition(PositionKey),

    #[error("size delta {size_delta} exceeds position size {size}")]
    SizeDeltaExceedsSize { size_delta: Usd, size: Usd },

    #[error("collateral delta {collateral_delta} exceeds collateral {collateral}")]
    CollateralDeltaExceedsCollateral { collateral_delta: Usd, collateral: Usd },

    #[error("insufficient collateral for fees: {collateral} < {fee}")]
    InsufficientForFees { collateral: Usd, fee: Usd },

    #[error("losses exceed collateral")]
    LossesExceedCollateral,

    #[error("fees exceed collateral")]
    FeesExceedCollateral,

    #[error("liquidation fees exceed collateral")]
    LiquidationFeesExceedCollateral,

    #[error("position {0} cannot be liquidated")]
    NotLiquidatable(PositionKey),
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    #[error("{0}")]
    Validation(#[from] ValidationError),

    #[error("{0}")]
    Permission(#[from] PermissionError),

    #[error("{0}")]
    Slippage(#[from] PriceSlippageError),

    #[error("{0}")]
    Leverage(#[from] LeverageError),

    #[error("{0}")]
    Liquidity(#[from] LiquidityError),

    #[error("{0}")]
    Collateral(#[from] InsufficientCollateralError),

    #[error("oracle error: {0}")]
    Oracle(#[from] OracleError),

    #[error("{0}")]
    Swap(#[from] SwapError),

    #[error("custody error: {0}")]
    Custody(#[from] CustodyError),

    #[error("{0}")]
    Config(#[from] ConfigError),
}

impl From<TokenError> for EngineError {
    fn from(e: TokenError) -> Self {
        EngineError::Validation(ValidationError::Token(e))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncreaseResult {
    pub key: PositionKey,
    pub size: Usd,
    pub collateral: Usd,
    pub average_price: Decimal,
    /// Usd value credited from the collateral tokens, before fees.
    pub collateral_usd: Usd,
    pub margin_fee: Usd,
    pub funding_fee: Usd,
}

impl IncreaseResult {
    pub fn total_fee(&self) -> Usd {
        self.margin_fee.add(self.funding_fee)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecreaseResult {
    pub key: PositionKey,
    /// Usd released before fees.
    pub usd_out: Usd,
    pub usd_out_after_fee: Usd,
    /// Collateral tokens sent to the receiver.
    pub amount_out: Decimal,
    pub realised_pnl: Usd,
    pub fee: Usd,
    /// True when the key was deleted.
    pub closed: bool,
}

/// Where a position stands against its maintenance rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LiquidationState {
    Healthy,
    /// Losses or fees have eaten the collateral.
    Insolvent,
    /// Still solvent but above max leverage. closed in full back to the owner.
    MaxLeverageExceeded,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiquidationResult {
    pub key: PositionKey,
    pub state: LiquidationState,
    pub size: Usd,
    pub collateral: Usd,
    pub margin_fees: Usd,
    /// Collateral tokens paid to the fee receiver.
    pub liquidation_fee_tokens: Decimal,
    /// Payout to the owner when a max-leverage position was closed instead of seized.
    pub amount_out: Decimal,
}
