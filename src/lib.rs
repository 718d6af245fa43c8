// perps-positions: leveraged position engine for a pooled-liquidity perpetuals venue.
// collateral-first: every increase, decrease and liquidation re-checks solvency and
// keeps reserved <= pooled for the collateral token before anything commits.
// all computation is deterministic; prices and swaps come from injected collaborators.
//
// file map (search X.0 for structs, X.1+ for logic):
//   1.x  types.rs: primitives: Address, TokenId, Side, Price, Usd, Leverage, Bps
//   2.x  token.rs: token whitelist and collateral/index pairing rules
//   3.x  oracle.rs: min/max price source
//   4.x  position.rs: position record, pnl delta, average price, collateral reduction
//   5.x  fees.rs: margin fee, funding clock, extra deposit fee
//   6.x  ledger.rs: positions plus per-token pool / reserve / fee accounting
//   7.x  config.rs: vault, router, timelock params, env presets
//   8.x  engine/: position engine: increase, decrease, liquidation, governance
//   9.x  router.rs: entry router: paths, native wrapping, deposit fee
//   9.2  custody.rs: native and token balances
//   9.3  swap.rs: swap collaborator
//   10.x engine/liquidations.rs: liquidation states and execution
//   11.x events.rs: state transition events for audit
//   12.x access.rs: access gate, router modes, plugins, timelock

// core modules
pub mod engine;
pub mod events;
pub mod fees;
pub mod ledger;
pub mod position;
pub mod token;
pub mod types;

// access and entry points
pub mod access;
pub mod router;

// integration modules
pub mod config;
pub mod custody;
pub mod oracle;
pub mod swap;

// re exports for convenience
pub use access::{
    AccessFlags, AccessGate, Decision, GovernanceAction, Operation, PermissionError,
    PluginRegistry, RouterMode, RouterPolicy, Timelock,
};
pub use config::{ConfigError, Environment, ProtocolConfig, RouterParams, TimelockParams, VaultParams};
pub use custody::{Custody, CustodyError};
pub use engine::*;
pub use events::{Event, EventId, EventPayload};
pub use fees::{margin_fee, should_charge_deposit_fee, split_deposit_fee, FundingState, PositionFees};
pub use ledger::{CollateralLedger, LiquidityError, PoolState};
pub use oracle::{OracleError, PriceBand, PriceOracle, StaticOracle};
pub use position::{Position, PositionKey};
pub use router::{EntryRouter, RouterDecrease, RouterIncrease};
pub use swap::{OracleSwap, Swap, SwapContext, SwapError};
pub use token::{TokenConfig, TokenError, TokenRegistry};
pub use types::*;
