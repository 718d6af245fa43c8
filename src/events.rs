// 11.0: every committed state change produces an event. used for audit trails and for
// notifying keepers and indexers. rolled back operations leave nothing behind.

use crate::access::{GovernanceAction, RouterMode};
use crate::position::PositionKey;
use crate::types::{Address, Bps, Timestamp, TokenId, Usd};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventId(pub u64);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub timestamp: Timestamp,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(id: EventId, timestamp: Timestamp, payload: EventPayload) -> Self {
        Self {
            id,
            timestamp,
            payload,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    // Position events
    PositionIncreased(PositionIncreasedEvent),
    PositionDecreased(PositionDecreasedEvent),
    PositionClosed(PositionClosedEvent),
    PositionLiquidated(PositionLiquidatedEvent),

    // Fee events
    MarginFeesCollected(MarginFeesCollectedEvent),
    DepositFeeCollected(DepositFeeCollectedEvent),
    FeesWithdrawn(FeesWithdrawnEvent),
    FundingRateUpdated(FundingRateUpdatedEvent),

    // Pool events
    LiquidityDeposited(LiquidityEvent),
    LiquidityWithdrawn(LiquidityEvent),

    // Access events
    LeverageToggled(LeverageToggledEvent),
    RouterModeSet(RouterModeSetEvent),
    PartnerSet(PartnerSetEvent),
    RouterAccessSet(RouterAccessSetEvent),
    PluginApproved(PluginApprovalEvent),
    PluginDenied(PluginApprovalEvent),
    ConfigChanged(ConfigChangedEvent),

    // Governance events
    GovernanceSignalled(GovernanceSignalledEvent),
    GovernanceExecuted(GovernanceExecutedEvent),
    GovernorChanged(GovernorChangedEvent),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionIncreasedEvent {
    pub key: PositionKey,
    pub collateral_delta: Usd,
    pub size_delta: Usd,
    pub price: Decimal,
    pub fee: Usd,
    pub size: Usd,
    pub collateral: Usd,
    pub average_price: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionDecreasedEvent {
    pub key: PositionKey,
    pub collateral_delta: Usd,
    pub size_delta: Usd,
    pub price: Decimal,
    pub fee: Usd,
    pub realised_pnl: Usd,
    pub size: Usd,
    pub collateral: Usd,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionClosedEvent {
    pub key: PositionKey,
    pub size: Usd,
    pub realised_pnl: Usd,
    pub receiver: Address,
    pub amount_out: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionLiquidatedEvent {
    pub key: PositionKey,
    pub size: Usd,
    pub collateral: Usd,
    pub mark_price: Decimal,
    pub margin_fees: Usd,
    pub liquidator: Address,
    pub fee_receiver: Address,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarginFeesCollectedEvent {
    pub token: TokenId,
    pub fee_usd: Usd,
    pub fee_tokens: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepositFeeCollectedEvent {
    pub router: Address,
    pub account: Address,
    pub token: TokenId,
    pub amount: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeesWithdrawnEvent {
    pub holder: Address,
    pub token: TokenId,
    pub amount: Decimal,
    pub receiver: Address,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FundingRateUpdatedEvent {
    pub token: TokenId,
    pub rate: Decimal,
    pub cumulative_rate: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiquidityEvent {
    pub provider: Address,
    pub token: TokenId,
    pub amount: Decimal,
    pub pool_amount: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeverageToggledEvent {
    pub caller: Address,
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterModeSetEvent {
    pub router: Address,
    pub mode: RouterMode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartnerSetEvent {
    pub router: Address,
    pub account: Address,
    pub is_partner: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterAccessSetEvent {
    pub account: Address,
    pub router: Address,
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginApprovalEvent {
    pub account: Address,
    pub plugin: Address,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ConfigChange {
    MarginFee(Bps),
    MaxLeverage(Decimal),
    LiquidationFee(Usd),
    Funding { interval_ms: i64, rate_factor: Decimal, stable_rate_factor: Decimal },
    MinProfitTime(i64),
    TokenConfig { token: TokenId, whitelisted: bool },
    ManagerMode(bool),
    Manager { account: Address, enabled: bool },
    PrivateLiquidationMode(bool),
    Liquidator { account: Address, enabled: bool },
    Plugin { plugin: Address, registered: bool },
    TimelockHandler { handler: Address, enabled: bool },
    ShouldToggleLeverage(bool),
    TimelockBuffer(i64),
    DepositFee(Bps),
    IncreasePositionBuffer(Bps),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigChangedEvent {
    pub caller: Address,
    pub change: ConfigChange,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GovernanceSignalledEvent {
    pub action: GovernanceAction,
    pub eta: Timestamp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GovernanceExecutedEvent {
    pub action: GovernanceAction,
    pub caller: Address,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GovernorChangedEvent {
    pub previous: Address,
    pub governor: Address,
}
