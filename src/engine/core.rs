// 8.0 engine/core.rs: main engine. holds the ledger, funding clocks, custody, access gate
// and token registry. every mutating call runs inside `atomic` so a failure anywhere
// leaves the state exactly as it was.

use super::config::EngineConfig;
use super::results::{EngineError, ValidationError};
use crate::access::AccessGate;
use crate::config::{ProtocolConfig, TimelockParams, VaultParams};
use crate::custody::Custody;
use crate::events::{Event, EventId, EventPayload, LiquidityEvent};
use crate::fees::FundingState;
use crate::ledger::{CollateralLedger, PoolState};
use crate::oracle::PriceOracle;
use crate::position::{Position, PositionKey};
use crate::token::TokenRegistry;
use crate::types::{Address, Timestamp, TokenId};
use rust_decimal::Decimal;
use std::collections::HashMap;
use tracing::{debug, info, warn};

/** 8.1: everything an operation may write. cloned whole for rollback */
#[derive(Debug, Clone)]
pub struct EngineState {
    pub(super) ledger: CollateralLedger,
    pub(super) funding: HashMap<TokenId, FundingState>,
    pub(super) custody: Custody,
    pub(super) gate: AccessGate,
    pub(super) tokens: TokenRegistry,
    pub(super) vault: VaultParams,
}

/// Saved state plus the event cursor at the time of the save.
#[derive(Debug, Clone)]
pub struct Checkpoint {
    state: EngineState,
    next_event_id: u64,
}

/** 8.2: main engine struct */
#[derive(Debug)]
pub struct Engine<O: PriceOracle> {
    pub(super) config: EngineConfig,
    pub(super) timelock_params: TimelockParams,
    pub(super) oracle: O,
    pub(super) state: EngineState,
    pub(super) address: Address,
    pub(super) events: Vec<Event>,
    pub(super) next_event_id: u64,
    pub(super) current_time: Timestamp,
}

impl<O: PriceOracle> Engine<O> {
    /// `address` is where the engine keeps pooled tokens in custody.
    pub fn new(
        config: EngineConfig,
        protocol: ProtocolConfig,
        oracle: O,
        address: Address,
        governor: Address,
        wrapped_native: TokenId,
    ) -> Self {
        Self {
            config,
            timelock_params: protocol.timelock,
            oracle,
            state: EngineState {
                ledger: CollateralLedger::new(),
                funding: HashMap::new(),
                custody: Custody::new(wrapped_native),
                gate: AccessGate::new(governor),
                tokens: TokenRegistry::new(),
                vault: protocol.vault,
            },
            address,
            events: Vec::new(),
            next_event_id: 1,
            current_time: Timestamp::from_millis(0),
        }
    }

    pub fn set_time(&mut self, timestamp: Timestamp) {
        self.current_time = timestamp;
    }

    pub fn time(&self) -> Timestamp {
        self.current_time
    }

    pub fn advance_time(&mut self, millis: i64) {
        self.current_time = self.current_time.plus_millis(millis);
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn oracle(&self) -> &O {
        &self.oracle
    }

    pub fn oracle_mut(&mut self) -> &mut O {
        &mut self.oracle
    }

    pub fn params(&self) -> &VaultParams {
        &self.state.vault
    }

    pub fn gate(&self) -> &AccessGate {
        &self.state.gate
    }

    pub fn tokens(&self) -> &TokenRegistry {
        &self.state.tokens
    }

    pub fn custody(&self) -> &Custody {
        &self.state.custody
    }

    /// Direct custody access for funding accounts (faucets, bridges, tests).
    pub fn custody_mut(&mut self) -> &mut Custody {
        &mut self.state.custody
    }

    pub fn ledger(&self) -> &CollateralLedger {
        &self.state.ledger
    }

    pub fn position(&self, key: &PositionKey) -> Option<&Position> {
        self.state.ledger.position(key)
    }

    pub fn pool(&self, token: TokenId) -> PoolState {
        self.state.ledger.pool(token)
    }

    pub fn cumulative_funding_rate(&self, token: TokenId) -> Decimal {
        self.state
            .funding
            .get(&token)
            .map(|f| f.cumulative_rate)
            .unwrap_or(Decimal::ZERO)
    }

    pub fn wrapped_native(&self) -> TokenId {
        self.state.custody.wrapped_native()
    }

    // 8.3: rollback. the state is cloned whole; events are cut back by id so
    // trimming the log inside a nested operation can't confuse the restore.
    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            state: self.state.clone(),
            next_event_id: self.next_event_id,
        }
    }

    pub fn restore(&mut self, checkpoint: Checkpoint) {
        self.state = checkpoint.state;
        self.events.retain(|e| e.id.0 < checkpoint.next_event_id);
        self.next_event_id = checkpoint.next_event_id;
    }

    /// Run `op` against a checkpoint. Any error restores the checkpoint.
    pub fn atomic<T>(
        &mut self,
        op: impl FnOnce(&mut Self) -> Result<T, EngineError>,
    ) -> Result<T, EngineError> {
        let checkpoint = self.checkpoint();
        match op(self) {
            Ok(value) => Ok(value),
            Err(e) => {
                if self.config.log_rollbacks {
                    warn!(error = %e, "operation rolled back");
                }
                self.restore(checkpoint);
                Err(e)
            }
        }
    }

    // 8.4: pool liquidity. anyone may add; withdrawals can't leave reservations uncovered.
    pub fn deposit_liquidity(
        &mut self,
        provider: Address,
        token: TokenId,
        amount: Decimal,
    ) -> Result<PoolState, EngineError> {
        self.atomic(|engine| {
            if amount <= Decimal::ZERO {
                return Err(ValidationError::NonPositiveAmount(amount).into());
            }
            engine.state.tokens.get(token)?;
            engine.update_funding(token);

            let vault = engine.address;
            engine.state.custody.transfer(token, provider, vault, amount)?;
            engine.state.ledger.increase_pool(token, amount);

            let pool = engine.state.ledger.pool(token);
            info!(%provider, %token, %amount, pool = %pool.pool_amount, "liquidity deposited");
            engine.emit_event(EventPayload::LiquidityDeposited(LiquidityEvent {
                provider,
                token,
                amount,
                pool_amount: pool.pool_amount,
            }));
            Ok(pool)
        })
    }

    pub fn withdraw_liquidity(
        &mut self,
        provider: Address,
        token: TokenId,
        amount: Decimal,
    ) -> Result<PoolState, EngineError> {
        self.atomic(|engine| {
            if amount <= Decimal::ZERO {
                return Err(ValidationError::NonPositiveAmount(amount).into());
            }
            engine.state.tokens.get(token)?;
            engine.update_funding(token);

            engine.state.ledger.decrease_pool(token, amount)?;
            let vault = engine.address;
            engine.state.custody.transfer(token, vault, provider, amount)?;

            let pool = engine.state.ledger.pool(token);
            info!(%provider, %token, %amount, pool = %pool.pool_amount, "liquidity withdrawn");
            engine.emit_event(EventPayload::LiquidityWithdrawn(LiquidityEvent {
                provider,
                token,
                amount,
                pool_amount: pool.pool_amount,
            }));
            Ok(pool)
        })
    }

    pub fn recent_events(&self, count: usize) -> &[Event] {
        let start = self.events.len().saturating_sub(count);
        &self.events[start..]
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub(crate) fn emit_event(&mut self, payload: EventPayload) {
        let event = Event::new(EventId(self.next_event_id), self.current_time, payload);
        self.next_event_id += 1;

        if self.config.verbose {
            info!(id = event.id.0, payload = ?event.payload, "event");
        } else {
            debug!(id = event.id.0, payload = ?event.payload, "event");
        }

        self.events.push(event);

        if self.events.len() > self.config.max_events {
            let drain_count = self.events.len() - self.config.max_events;
            self.events.drain(0..drain_count);
        }
    }
}
