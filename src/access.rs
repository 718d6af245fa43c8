//! Access gate: who may call what, given the current mode flags.
//!
//! Three grants are kept apart:
//! - the governor (optionally a [`Timelock`]) owns every configuration write;
//! - routers carry a [`RouterPolicy`] whose [`RouterMode`] decides whether
//!   partner / router-access grants are required;
//! - the [`PluginRegistry`] records each user's own consent for a router to
//!   move their funds. It is checked regardless of router mode.
//!
//! [`AccessGate::authorize`] evaluates one [`Operation`] and returns a
//! [`Decision`]; the first matching rule wins.

use crate::types::{Address, Bps, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PermissionError {
    #[error("{0}: forbidden")]
    Forbidden(&'static str),

    #[error("router: plugin {plugin} not approved by {account}")]
    PluginNotApproved { account: Address, plugin: Address },

    #[error("timelock: action not signalled")]
    ActionNotSignalled,

    #[error("timelock: action time not yet passed (eta {eta})")]
    ActionNotReady { eta: Timestamp },

    #[error("timelock: action expired at {expired_at}")]
    ActionExpired { expired_at: Timestamp },

    #[error("timelock: invalid buffer {requested}ms (current {current}ms, max {max}ms)")]
    InvalidBuffer { requested: i64, current: i64, max: i64 },

    #[error("timelock: margin fee {requested} bps above max {max} bps")]
    MarginFeeTooHigh { requested: u32, max: u32 },

    #[error("timelock: {0} already governs, signal a governor change instead")]
    TimelockGoverning(Address),
}

/// Allow or deny, with the reason attached to the denial.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny(PermissionError),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }

    pub fn into_result(self) -> Result<(), PermissionError> {
        match self {
            Decision::Allow => Ok(()),
            Decision::Deny(reason) => Err(reason),
        }
    }
}

/// Legacy routers let anyone through. Gated routers require a partner flag or
/// a governor-issued router grant for the account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RouterMode {
    Legacy,
    Gated,
}

impl fmt::Display for RouterMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouterMode::Legacy => write!(f, "legacy"),
            RouterMode::Gated => write!(f, "gated"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterPolicy {
    pub router: Address,
    pub admin: Address,
    pub mode: RouterMode,
    partners: HashMap<Address, bool>,
}

impl RouterPolicy {
    pub fn new(router: Address, admin: Address) -> Self {
        Self {
            router,
            admin,
            mode: RouterMode::Gated,
            partners: HashMap::new(),
        }
    }

    pub fn is_partner(&self, account: Address) -> bool {
        self.partners.get(&account).copied().unwrap_or(false)
    }

    pub fn set_partner(&mut self, account: Address, is_partner: bool) {
        self.partners.insert(account, is_partner);
    }

    pub fn set_mode(&mut self, mode: RouterMode) {
        self.mode = mode;
    }
}

/// Delayed governance actions. Signalled first, executable inside
/// `[eta, eta + grace_period]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GovernanceAction {
    SetGovernor(Address),
    SetTimelockAdmin(Address),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Timelock {
    pub address: Address,
    pub admin: Address,
    pub buffer_ms: i64,
    pub max_buffer_ms: i64,
    pub grace_period_ms: i64,
    pub should_toggle_leverage: bool,
    pub max_margin_fee_bps: Bps,
    handlers: HashSet<Address>,
    pending: HashMap<GovernanceAction, Timestamp>,
}

impl Timelock {
    pub fn new(
        address: Address,
        admin: Address,
        buffer_ms: i64,
        max_buffer_ms: i64,
        grace_period_ms: i64,
        max_margin_fee_bps: Bps,
    ) -> Self {
        Self {
            address,
            admin,
            buffer_ms,
            max_buffer_ms,
            grace_period_ms,
            should_toggle_leverage: false,
            max_margin_fee_bps,
            handlers: HashSet::new(),
            pending: HashMap::new(),
        }
    }

    pub fn is_handler(&self, account: Address) -> bool {
        self.handlers.contains(&account)
    }

    pub fn set_handler(&mut self, handler: Address, enabled: bool) {
        if enabled {
            self.handlers.insert(handler);
        } else {
            self.handlers.remove(&handler);
        }
    }

    // buffer can only grow. shrinking it would let already-signalled actions skip the wait.
    pub fn set_buffer(&mut self, buffer_ms: i64) -> Result<(), PermissionError> {
        if buffer_ms > self.max_buffer_ms || buffer_ms <= self.buffer_ms {
            return Err(PermissionError::InvalidBuffer {
                requested: buffer_ms,
                current: self.buffer_ms,
                max: self.max_buffer_ms,
            });
        }
        self.buffer_ms = buffer_ms;
        Ok(())
    }

    pub fn signal(&mut self, action: GovernanceAction, now: Timestamp) -> Timestamp {
        let eta = now.plus_millis(self.buffer_ms);
        self.pending.insert(action, eta);
        eta
    }

    pub fn cancel(&mut self, action: &GovernanceAction) -> bool {
        self.pending.remove(action).is_some()
    }

    pub fn eta(&self, action: &GovernanceAction) -> Option<Timestamp> {
        self.pending.get(action).copied()
    }

    pub fn check_ready(&self, action: &GovernanceAction, now: Timestamp) -> Result<(), PermissionError> {
        let eta = self.eta(action).ok_or(PermissionError::ActionNotSignalled)?;
        if now < eta {
            return Err(PermissionError::ActionNotReady { eta });
        }
        let expired_at = eta.plus_millis(self.grace_period_ms);
        if now > expired_at {
            return Err(PermissionError::ActionExpired { expired_at });
        }
        Ok(())
    }

    /// Consume a ready action.
    pub fn execute(&mut self, action: &GovernanceAction, now: Timestamp) -> Result<(), PermissionError> {
        self.check_ready(action, now)?;
        self.pending.remove(action);
        Ok(())
    }
}

/// Users' consent for routers ("plugins") to act on their positions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PluginRegistry {
    registered: HashSet<Address>,
    consents: HashSet<(Address, Address)>,
}

impl PluginRegistry {
    pub fn add_plugin(&mut self, plugin: Address) {
        self.registered.insert(plugin);
    }

    pub fn remove_plugin(&mut self, plugin: Address) {
        self.registered.remove(&plugin);
    }

    pub fn is_registered(&self, plugin: Address) -> bool {
        self.registered.contains(&plugin)
    }

    pub fn approve(&mut self, account: Address, plugin: Address) {
        self.consents.insert((account, plugin));
    }

    pub fn deny(&mut self, account: Address, plugin: Address) {
        self.consents.remove(&(account, plugin));
    }

    pub fn is_approved(&self, account: Address, plugin: Address) -> bool {
        self.registered.contains(&plugin) && self.consents.contains(&(account, plugin))
    }
}

/// Engine-wide switches. Written only through governor-authorised calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessFlags {
    pub governor: Address,
    pub leverage_enabled: bool,
    pub manager_mode: bool,
    pub private_liquidation_mode: bool,
    managers: HashSet<Address>,
    liquidators: HashSet<Address>,
    router_grants: HashSet<(Address, Address)>,
}

impl AccessFlags {
    pub fn new(governor: Address) -> Self {
        Self {
            governor,
            leverage_enabled: true,
            manager_mode: false,
            private_liquidation_mode: false,
            managers: HashSet::new(),
            liquidators: HashSet::new(),
            router_grants: HashSet::new(),
        }
    }

    pub fn is_manager(&self, account: Address) -> bool {
        self.managers.contains(&account)
    }

    pub fn set_manager(&mut self, account: Address, enabled: bool) {
        toggle(&mut self.managers, account, enabled);
    }

    pub fn is_liquidator(&self, account: Address) -> bool {
        self.liquidators.contains(&account)
    }

    pub fn set_liquidator(&mut self, account: Address, enabled: bool) {
        toggle(&mut self.liquidators, account, enabled);
    }

    pub fn has_router_access(&self, account: Address, router: Address) -> bool {
        self.router_grants.contains(&(account, router))
    }

    pub fn set_router_access(&mut self, account: Address, router: Address, enabled: bool) {
        toggle(&mut self.router_grants, (account, router), enabled);
    }
}

fn toggle<T: std::hash::Hash + Eq>(set: &mut HashSet<T>, item: T, enabled: bool) {
    if enabled {
        set.insert(item);
    } else {
        set.remove(&item);
    }
}

/// What the caller is trying to do.
#[derive(Debug, Clone, Copy)]
pub enum Operation<'a> {
    /// Engine configuration write.
    Configure,
    /// Timelock's own settings (handlers, toggles, buffer, signals).
    TimelockAdmin,
    /// Flip leverage on/off around a router call.
    ToggleLeverage,
    /// Delayed governance action.
    ExecuteGovernance(&'a GovernanceAction),
    /// Direct increase/decrease on the engine for `account`.
    PositionChange,
    Liquidate,
    RouterConfigure(&'a RouterPolicy),
    RouterIncrease(&'a RouterPolicy),
    RouterDecrease(&'a RouterPolicy),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessGate {
    pub flags: AccessFlags,
    pub timelock: Option<Timelock>,
    pub plugins: PluginRegistry,
}

impl AccessGate {
    pub fn new(governor: Address) -> Self {
        Self {
            flags: AccessFlags::new(governor),
            timelock: None,
            plugins: PluginRegistry::default(),
        }
    }

    /// The timelock, if it currently holds the governor seat.
    pub fn governing_timelock(&self) -> Option<&Timelock> {
        self.timelock
            .as_ref()
            .filter(|t| t.address == self.flags.governor)
    }

    pub fn governing_timelock_mut(&mut self) -> Option<&mut Timelock> {
        let governor = self.flags.governor;
        self.timelock.as_mut().filter(|t| t.address == governor)
    }

    fn is_governor(&self, caller: Address) -> bool {
        caller == self.flags.governor
            || self
                .governing_timelock()
                .map(|t| t.admin == caller)
                .unwrap_or(false)
    }

    pub fn authorize(
        &self,
        caller: Address,
        operation: Operation<'_>,
        account: Address,
        now: Timestamp,
    ) -> Decision {
        match operation {
            Operation::Configure => {
                if self.is_governor(caller) {
                    Decision::Allow
                } else {
                    Decision::Deny(PermissionError::Forbidden("governor"))
                }
            }
            Operation::TimelockAdmin => match &self.timelock {
                Some(t) if t.admin == caller => Decision::Allow,
                _ => Decision::Deny(PermissionError::Forbidden("timelock")),
            },
            Operation::ToggleLeverage => match self.governing_timelock() {
                Some(t) if t.admin == caller || t.is_handler(caller) => Decision::Allow,
                Some(_) => Decision::Deny(PermissionError::Forbidden("timelock")),
                None if caller == self.flags.governor => Decision::Allow,
                None => Decision::Deny(PermissionError::Forbidden("governor")),
            },
            Operation::ExecuteGovernance(action) => match self.governing_timelock() {
                Some(t) if t.admin != caller => Decision::Deny(PermissionError::Forbidden("timelock")),
                Some(t) => match t.check_ready(action, now) {
                    Ok(()) => Decision::Allow,
                    Err(e) => Decision::Deny(e),
                },
                None if caller == self.flags.governor => Decision::Allow,
                None => Decision::Deny(PermissionError::Forbidden("governor")),
            },
            Operation::PositionChange => {
                if self.flags.manager_mode && !self.flags.is_manager(caller) {
                    return Decision::Deny(PermissionError::Forbidden("engine"));
                }
                if caller != account && !self.plugins.is_approved(account, caller) {
                    return Decision::Deny(PermissionError::PluginNotApproved {
                        account,
                        plugin: caller,
                    });
                }
                Decision::Allow
            }
            Operation::Liquidate => {
                if self.flags.private_liquidation_mode && !self.flags.is_liquidator(caller) {
                    Decision::Deny(PermissionError::Forbidden("liquidation"))
                } else {
                    Decision::Allow
                }
            }
            Operation::RouterConfigure(policy) => {
                if caller == policy.admin || self.is_governor(caller) {
                    Decision::Allow
                } else {
                    Decision::Deny(PermissionError::Forbidden("router"))
                }
            }
            Operation::RouterIncrease(policy) | Operation::RouterDecrease(policy) => match policy.mode {
                RouterMode::Legacy => Decision::Allow,
                RouterMode::Gated => {
                    if policy.is_partner(account) || self.flags.has_router_access(account, policy.router) {
                        Decision::Allow
                    } else {
                        Decision::Deny(PermissionError::Forbidden("router"))
                    }
                }
            },
        }
    }

    pub fn is_allowed(&self, caller: Address, operation: Operation<'_>, account: Address, now: Timestamp) -> bool {
        self.authorize(caller, operation, account, now).is_allowed()
    }

    /// Leverage toggle used by routers around a position change. Only flips the
    /// flag when a governing timelock asks for it; otherwise leverage is left to
    /// the governor's explicit setting.
    pub fn toggle_leverage(&mut self, caller: Address, enabled: bool, now: Timestamp) -> Result<bool, PermissionError> {
        let Some(timelock) = self.governing_timelock() else {
            return Ok(false);
        };
        let should_toggle = timelock.should_toggle_leverage;
        self.authorize(caller, Operation::ToggleLeverage, caller, now).into_result()?;
        if should_toggle && self.flags.leverage_enabled != enabled {
            self.flags.leverage_enabled = enabled;
            return Ok(true);
        }
        Ok(false)
    }
}
