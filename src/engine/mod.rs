// 8.0: position engine. validates and applies increases, decreases and liquidations,
// owns the collateral ledger and funding clocks, and routes every write through the
// access gate. deterministic, no external I/O beyond the injected oracle.

mod config;
mod core;
mod governance;
mod liquidations;
mod positions;
mod pricing;
mod results;
mod shared;

pub use config::EngineConfig;
pub use core::{Checkpoint, Engine, EngineState};
pub use positions::{DecreaseRequest, IncreaseRequest};
pub use results::{
    DecreaseResult, EngineError, IncreaseResult, InsufficientCollateralError, LeverageError,
    LiquidationResult, LiquidationState, PriceSlippageError, ValidationError,
};
pub use shared::SharedEngine;
