// 12.0 engine/governance.rs: configuration writes. every one goes through the access gate
// first; the timelock, once installed as governor, adds its delays and caps on top.

use super::core::Engine;
use super::results::{EngineError, LeverageError};
use crate::access::{GovernanceAction, Operation, PermissionError, Timelock};
use crate::events::{
    ConfigChange, ConfigChangedEvent, EventPayload, FeesWithdrawnEvent, GovernanceExecutedEvent,
    GovernanceSignalledEvent, GovernorChangedEvent, LeverageToggledEvent, PluginApprovalEvent,
    RouterAccessSetEvent,
};
use crate::config::ConfigError;
use crate::oracle::PriceOracle;
use crate::token::TokenConfig;
use crate::types::{Address, Bps, Leverage, Timestamp, TokenId, Usd};
use rust_decimal::Decimal;
use tracing::info;

impl<O: PriceOracle> Engine<O> {
    fn require(&self, caller: Address, operation: Operation<'_>) -> Result<(), EngineError> {
        self.state
            .gate
            .authorize(caller, operation, caller, self.current_time)
            .into_result()?;
        Ok(())
    }

    fn config_changed(&mut self, caller: Address, change: ConfigChange) {
        info!(%caller, ?change, "config changed");
        self.emit_event(EventPayload::ConfigChanged(ConfigChangedEvent { caller, change }));
    }

    pub fn set_leverage_enabled(&mut self, caller: Address, enabled: bool) -> Result<(), EngineError> {
        self.require(caller, Operation::Configure)?;
        self.state.gate.flags.leverage_enabled = enabled;
        info!(%caller, enabled, "leverage toggled");
        self.emit_event(EventPayload::LeverageToggled(LeverageToggledEvent { caller, enabled }));
        Ok(())
    }

    /// Router-side toggle. A no-op unless a governing timelock asks for it.
    pub fn enable_leverage(&mut self, caller: Address) -> Result<bool, EngineError> {
        self.toggle_leverage(caller, true)
    }

    pub fn disable_leverage(&mut self, caller: Address) -> Result<bool, EngineError> {
        self.toggle_leverage(caller, false)
    }

    fn toggle_leverage(&mut self, caller: Address, enabled: bool) -> Result<bool, EngineError> {
        let now = self.current_time;
        let flipped = self.state.gate.toggle_leverage(caller, enabled, now)?;
        if flipped {
            self.emit_event(EventPayload::LeverageToggled(LeverageToggledEvent { caller, enabled }));
        }
        Ok(flipped)
    }

    pub fn set_margin_fee_bps(&mut self, caller: Address, bps: Bps) -> Result<(), EngineError> {
        self.require(caller, Operation::Configure)?;
        if let Some(timelock) = self.state.gate.governing_timelock() {
            if bps > timelock.max_margin_fee_bps {
                return Err(PermissionError::MarginFeeTooHigh {
                    requested: bps.value(),
                    max: timelock.max_margin_fee_bps.value(),
                }
                .into());
            }
        }
        self.state.vault.margin_fee_bps = bps;
        self.config_changed(caller, ConfigChange::MarginFee(bps));
        Ok(())
    }

    pub fn set_max_leverage(&mut self, caller: Address, max_leverage: Decimal) -> Result<(), EngineError> {
        self.require(caller, Operation::Configure)?;
        let leverage = match Leverage::new(max_leverage) {
            Some(l) if max_leverage > Decimal::ONE => l,
            _ => return Err(LeverageError::InvalidMaxLeverage(max_leverage).into()),
        };
        self.state.vault.max_leverage = leverage;
        self.config_changed(caller, ConfigChange::MaxLeverage(max_leverage));
        Ok(())
    }

    pub fn set_liquidation_fee(&mut self, caller: Address, fee: Usd) -> Result<(), EngineError> {
        self.require(caller, Operation::Configure)?;
        self.state.vault.liquidation_fee_usd = fee;
        self.config_changed(caller, ConfigChange::LiquidationFee(fee));
        Ok(())
    }

    pub fn set_funding_params(
        &mut self,
        caller: Address,
        interval_ms: i64,
        rate_factor: Decimal,
        stable_rate_factor: Decimal,
    ) -> Result<(), EngineError> {
        self.require(caller, Operation::Configure)?;
        if interval_ms <= 0 || rate_factor < Decimal::ZERO || stable_rate_factor < Decimal::ZERO {
            return Err(ConfigError::InvalidVault {
                reason: format!("bad funding params: {interval_ms}ms, {rate_factor}, {stable_rate_factor}"),
            }
            .into());
        }
        self.state.vault.funding_interval_ms = interval_ms;
        self.state.vault.funding_rate_factor = rate_factor;
        self.state.vault.stable_funding_rate_factor = stable_rate_factor;
        self.config_changed(
            caller,
            ConfigChange::Funding {
                interval_ms,
                rate_factor,
                stable_rate_factor,
            },
        );
        Ok(())
    }

    pub fn set_min_profit_time(&mut self, caller: Address, min_profit_time_ms: i64) -> Result<(), EngineError> {
        self.require(caller, Operation::Configure)?;
        self.state.vault.min_profit_time_ms = min_profit_time_ms.max(0);
        self.config_changed(caller, ConfigChange::MinProfitTime(min_profit_time_ms));
        Ok(())
    }

    pub fn set_token_config(&mut self, caller: Address, token: TokenId, config: TokenConfig) -> Result<(), EngineError> {
        self.require(caller, Operation::Configure)?;
        self.state.tokens.register(token, config);
        self.config_changed(caller, ConfigChange::TokenConfig { token, whitelisted: true });
        Ok(())
    }

    pub fn clear_token_config(&mut self, caller: Address, token: TokenId) -> Result<(), EngineError> {
        self.require(caller, Operation::Configure)?;
        self.state.tokens.remove(token);
        self.config_changed(caller, ConfigChange::TokenConfig { token, whitelisted: false });
        Ok(())
    }

    pub fn set_manager_mode(&mut self, caller: Address, enabled: bool) -> Result<(), EngineError> {
        self.require(caller, Operation::Configure)?;
        self.state.gate.flags.manager_mode = enabled;
        self.config_changed(caller, ConfigChange::ManagerMode(enabled));
        Ok(())
    }

    pub fn set_manager(&mut self, caller: Address, account: Address, enabled: bool) -> Result<(), EngineError> {
        self.require(caller, Operation::Configure)?;
        self.state.gate.flags.set_manager(account, enabled);
        self.config_changed(caller, ConfigChange::Manager { account, enabled });
        Ok(())
    }

    pub fn set_private_liquidation_mode(&mut self, caller: Address, enabled: bool) -> Result<(), EngineError> {
        self.require(caller, Operation::Configure)?;
        self.state.gate.flags.private_liquidation_mode = enabled;
        self.config_changed(caller, ConfigChange::PrivateLiquidationMode(enabled));
        Ok(())
    }

    pub fn set_liquidator(&mut self, caller: Address, account: Address, enabled: bool) -> Result<(), EngineError> {
        self.require(caller, Operation::Configure)?;
        self.state.gate.flags.set_liquidator(account, enabled);
        self.config_changed(caller, ConfigChange::Liquidator { account, enabled });
        Ok(())
    }

    /// Governor grant letting `account` through `router` while it is gated.
    pub fn set_router_access(
        &mut self,
        caller: Address,
        account: Address,
        router: Address,
        enabled: bool,
    ) -> Result<(), EngineError> {
        self.require(caller, Operation::Configure)?;
        self.state.gate.flags.set_router_access(account, router, enabled);
        info!(%account, %router, enabled, "router access set");
        self.emit_event(EventPayload::RouterAccessSet(RouterAccessSetEvent {
            account,
            router,
            enabled,
        }));
        Ok(())
    }

    pub fn add_plugin(&mut self, caller: Address, plugin: Address) -> Result<(), EngineError> {
        self.require(caller, Operation::Configure)?;
        self.state.gate.plugins.add_plugin(plugin);
        self.config_changed(caller, ConfigChange::Plugin { plugin, registered: true });
        Ok(())
    }

    pub fn remove_plugin(&mut self, caller: Address, plugin: Address) -> Result<(), EngineError> {
        self.require(caller, Operation::Configure)?;
        self.state.gate.plugins.remove_plugin(plugin);
        self.config_changed(caller, ConfigChange::Plugin { plugin, registered: false });
        Ok(())
    }

    // the account's own consent. no authority needed beyond being the account.
    pub fn approve_plugin(&mut self, account: Address, plugin: Address) {
        self.state.gate.plugins.approve(account, plugin);
        self.emit_event(EventPayload::PluginApproved(PluginApprovalEvent { account, plugin }));
    }

    pub fn deny_plugin(&mut self, account: Address, plugin: Address) {
        self.state.gate.plugins.deny(account, plugin);
        self.emit_event(EventPayload::PluginDenied(PluginApprovalEvent { account, plugin }));
    }

    /// Margin fees held by the engine go to `receiver`.
    pub fn withdraw_fees(&mut self, caller: Address, token: TokenId, receiver: Address) -> Result<Decimal, EngineError> {
        self.atomic(|engine| {
            engine.require(caller, Operation::Configure)?;
            let amount = engine.state.ledger.take_fee_reserves(token);
            let vault = engine.address;
            engine.state.custody.transfer(token, vault, receiver, amount)?;
            info!(%token, %amount, %receiver, "margin fees withdrawn");
            engine.emit_event(EventPayload::FeesWithdrawn(FeesWithdrawnEvent {
                holder: vault,
                token,
                amount,
                receiver,
            }));
            Ok(amount)
        })
    }

    // 12.1: timelock. installing one hands it the governor seat. once a timelock
    // governs, the seat only moves through a signalled SetGovernor.
    pub fn install_timelock(&mut self, caller: Address, address: Address, admin: Address) -> Result<(), EngineError> {
        self.require(caller, Operation::Configure)?;
        if let Some(current) = self.state.gate.governing_timelock() {
            return Err(PermissionError::TimelockGoverning(current.address).into());
        }
        let params = &self.timelock_params;
        let timelock = Timelock::new(
            address,
            admin,
            params.buffer_ms,
            params.max_buffer_ms,
            params.grace_period_ms,
            params.max_margin_fee_bps,
        );
        self.state.gate.timelock = Some(timelock);
        self.change_governor(address);
        Ok(())
    }

    fn change_governor(&mut self, governor: Address) {
        let previous = self.state.gate.flags.governor;
        self.state.gate.flags.governor = governor;
        info!(%previous, %governor, "governor changed");
        self.emit_event(EventPayload::GovernorChanged(GovernorChangedEvent { previous, governor }));
    }

    fn timelock_mut(&mut self) -> Result<&mut Timelock, EngineError> {
        self.state
            .gate
            .timelock
            .as_mut()
            .ok_or(EngineError::Permission(PermissionError::Forbidden("timelock")))
    }

    pub fn set_timelock_handler(&mut self, caller: Address, handler: Address, enabled: bool) -> Result<(), EngineError> {
        self.require(caller, Operation::TimelockAdmin)?;
        self.timelock_mut()?.set_handler(handler, enabled);
        self.config_changed(caller, ConfigChange::TimelockHandler { handler, enabled });
        Ok(())
    }

    pub fn set_should_toggle_leverage(&mut self, caller: Address, enabled: bool) -> Result<(), EngineError> {
        self.require(caller, Operation::TimelockAdmin)?;
        self.timelock_mut()?.should_toggle_leverage = enabled;
        self.config_changed(caller, ConfigChange::ShouldToggleLeverage(enabled));
        Ok(())
    }

    pub fn set_timelock_buffer(&mut self, caller: Address, buffer_ms: i64) -> Result<(), EngineError> {
        self.require(caller, Operation::TimelockAdmin)?;
        self.timelock_mut()?.set_buffer(buffer_ms)?;
        self.config_changed(caller, ConfigChange::TimelockBuffer(buffer_ms));
        Ok(())
    }

    pub fn signal_governance(&mut self, caller: Address, action: GovernanceAction) -> Result<Timestamp, EngineError> {
        self.require(caller, Operation::TimelockAdmin)?;
        let now = self.current_time;
        let eta = self.timelock_mut()?.signal(action.clone(), now);
        info!(?action, %eta, "governance action signalled");
        self.emit_event(EventPayload::GovernanceSignalled(GovernanceSignalledEvent { action, eta }));
        Ok(eta)
    }

    pub fn cancel_governance(&mut self, caller: Address, action: &GovernanceAction) -> Result<bool, EngineError> {
        self.require(caller, Operation::TimelockAdmin)?;
        Ok(self.timelock_mut()?.cancel(action))
    }

    /// Apply a delayed action. Immediate when no timelock governs; otherwise it
    /// must have been signalled and be inside its execution window.
    pub fn execute_governance(&mut self, caller: Address, action: GovernanceAction) -> Result<(), EngineError> {
        self.atomic(|engine| {
            engine.require(caller, Operation::ExecuteGovernance(&action))?;
            let now = engine.current_time;
            if let Some(timelock) = engine.state.gate.governing_timelock_mut() {
                timelock.execute(&action, now)?;
            }
            match &action {
                GovernanceAction::SetGovernor(governor) => engine.change_governor(*governor),
                GovernanceAction::SetTimelockAdmin(admin) => {
                    engine.timelock_mut()?.admin = *admin;
                }
            }
            engine.emit_event(EventPayload::GovernanceExecuted(GovernanceExecutedEvent {
                action: action.clone(),
                caller,
            }));
            Ok(())
        })
    }

    pub fn set_governor(&mut self, caller: Address, governor: Address) -> Result<(), EngineError> {
        self.execute_governance(caller, GovernanceAction::SetGovernor(governor))
    }
}
