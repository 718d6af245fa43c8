// 9.0 router.rs: the public entry point for traders. takes a swap path and either
// tokens or the native coin, converts into the position's collateral token, skims
// the deposit fee when collateral is added without matching size, and forwards to
// the engine under the router's own address.
//
// 9.1 order of checks on increase:
//   router mode (legacy / gated) -> path shape -> size cap -> user consent -> funds in ->
//   swap -> deposit fee -> timelock leverage toggle -> engine increase

use crate::access::{Operation, PermissionError, RouterMode, RouterPolicy};
use crate::config::{ConfigError, RouterParams};
use crate::engine::{
    DecreaseRequest, DecreaseResult, Engine, EngineError, IncreaseRequest, IncreaseResult,
    ValidationError,
};
use crate::events::{
    ConfigChange, ConfigChangedEvent, DepositFeeCollectedEvent, EventPayload, FeesWithdrawnEvent,
    PartnerSetEvent, RouterModeSetEvent,
};
use crate::fees::{should_charge_deposit_fee, split_deposit_fee};
use crate::oracle::PriceOracle;
use crate::position::PositionKey;
use crate::swap::{Swap, SwapContext};
use crate::types::{Address, Bps, Price, Side, TokenId, Usd, MAX_USD_AMOUNT};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info};

/// Increase through the router. `path[0]` is what the trader pays with,
/// `path[last]` becomes the collateral token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterIncrease {
    pub path: Vec<TokenId>,
    pub index_token: TokenId,
    pub amount_in: Decimal,
    pub min_out: Decimal,
    pub size_delta: Usd,
    pub side: Side,
    pub acceptable_price: Price,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RouterDecrease {
    pub collateral_token: TokenId,
    pub index_token: TokenId,
    pub collateral_delta: Usd,
    pub size_delta: Usd,
    pub side: Side,
    pub receiver: Address,
    pub acceptable_price: Price,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Payment {
    Token,
    Native,
}

#[derive(Debug, Clone)]
struct RouterSnapshot {
    policy: RouterPolicy,
    params: RouterParams,
    fee_reserves: HashMap<TokenId, Decimal>,
}

#[derive(Debug)]
pub struct EntryRouter<S: Swap> {
    policy: RouterPolicy,
    params: RouterParams,
    swap: S,
    // deposit fees are held in custody at the router's address
    fee_reserves: HashMap<TokenId, Decimal>,
}

impl<S: Swap> EntryRouter<S> {
    /// A new router starts gated.
    pub fn new(address: Address, admin: Address, params: RouterParams, swap: S) -> Self {
        Self {
            policy: RouterPolicy::new(address, admin),
            params,
            swap,
            fee_reserves: HashMap::new(),
        }
    }

    pub fn address(&self) -> Address {
        self.policy.router
    }

    pub fn policy(&self) -> &RouterPolicy {
        &self.policy
    }

    pub fn params(&self) -> &RouterParams {
        &self.params
    }

    pub fn mode(&self) -> RouterMode {
        self.policy.mode
    }

    pub fn is_partner(&self, account: Address) -> bool {
        self.policy.is_partner(account)
    }

    pub fn fee_reserve(&self, token: TokenId) -> Decimal {
        self.fee_reserves.get(&token).copied().unwrap_or(Decimal::ZERO)
    }

    fn snapshot(&self) -> RouterSnapshot {
        RouterSnapshot {
            policy: self.policy.clone(),
            params: self.params.clone(),
            fee_reserves: self.fee_reserves.clone(),
        }
    }

    fn restore(&mut self, snapshot: RouterSnapshot) {
        self.policy = snapshot.policy;
        self.params = snapshot.params;
        self.fee_reserves = snapshot.fee_reserves;
    }

    // engine and router roll back together
    fn run<O: PriceOracle, T>(
        &mut self,
        engine: &mut Engine<O>,
        op: impl FnOnce(&mut Self, &mut Engine<O>) -> Result<T, EngineError>,
    ) -> Result<T, EngineError> {
        let saved = self.snapshot();
        let result = engine.atomic(|engine| op(self, engine));
        if result.is_err() {
            self.restore(saved);
        }
        result
    }

    fn authorize<O: PriceOracle>(
        &self,
        engine: &Engine<O>,
        caller: Address,
        operation: Operation<'_>,
    ) -> Result<(), EngineError> {
        engine
            .gate()
            .authorize(caller, operation, caller, engine.time())
            .into_result()?;
        Ok(())
    }

    fn require_consent<O: PriceOracle>(&self, engine: &Engine<O>, account: Address) -> Result<(), EngineError> {
        if !engine.gate().plugins.is_approved(account, self.address()) {
            return Err(PermissionError::PluginNotApproved {
                account,
                plugin: self.address(),
            }
            .into());
        }
        Ok(())
    }

    pub fn increase_position<O: PriceOracle>(
        &mut self,
        engine: &mut Engine<O>,
        caller: Address,
        request: &RouterIncrease,
    ) -> Result<IncreaseResult, EngineError> {
        self.run(engine, |router, engine| {
            router.increase(engine, caller, request, Payment::Token)
        })
    }

    /// `request.amount_in` is the native value attached to the call.
    pub fn increase_position_native<O: PriceOracle>(
        &mut self,
        engine: &mut Engine<O>,
        caller: Address,
        request: &RouterIncrease,
    ) -> Result<IncreaseResult, EngineError> {
        self.run(engine, |router, engine| {
            router.increase(engine, caller, request, Payment::Native)
        })
    }

    fn increase<O: PriceOracle>(
        &mut self,
        engine: &mut Engine<O>,
        account: Address,
        request: &RouterIncrease,
        payment: Payment,
    ) -> Result<IncreaseResult, EngineError> {
        self.authorize(engine, account, Operation::RouterIncrease(&self.policy))?;

        let path = &request.path;
        let (first, collateral_token) = match path.as_slice() {
            [only] => (*only, *only),
            [first, last] => (*first, *last),
            _ => return Err(ValidationError::InvalidPathLength(path.len()).into()),
        };
        if payment == Payment::Native && first != engine.wrapped_native() {
            return Err(ValidationError::InvalidPath {
                expected: engine.wrapped_native(),
                got: first,
            }
            .into());
        }
        if request.size_delta.value() > MAX_USD_AMOUNT {
            return Err(ValidationError::AmountTooLarge(request.size_delta.value()).into());
        }
        self.require_consent(engine, account)?;

        let router = self.address();
        match payment {
            Payment::Native => {
                let custody = engine.custody_mut();
                custody.transfer_native(account, router, request.amount_in)?;
                custody.wrap(router, request.amount_in)?;
            }
            Payment::Token => {
                engine
                    .custody_mut()
                    .transfer(first, account, router, request.amount_in)?;
            }
        }

        let mut amount = request.amount_in;
        if path.len() == 2 {
            amount = self.swap_at_router(engine, path, amount, request.min_out)?;
        }

        // 9.2: deposit fee, judged against the position as it stands now
        let key = PositionKey::new(account, collateral_token, request.index_token, request.side);
        let existing = engine.ledger().position_or_default(&key);
        let deposit_usd = engine.token_to_usd_min(collateral_token, amount)?;
        if should_charge_deposit_fee(
            &existing,
            request.side,
            request.size_delta,
            deposit_usd,
            self.params.increase_position_buffer_bps,
        ) {
            let decimals = engine.tokens().decimals(collateral_token)?;
            let (kept, fee) = split_deposit_fee(amount, self.params.deposit_fee_bps, decimals);
            *self.fee_reserves.entry(collateral_token).or_insert(Decimal::ZERO) += fee;
            amount = kept;
            debug!(%key, %fee, "deposit fee taken");
            engine.emit_event(EventPayload::DepositFeeCollected(DepositFeeCollectedEvent {
                router,
                account,
                token: collateral_token,
                amount: fee,
            }));
        }

        engine.enable_leverage(router)?;
        let result = engine.increase_position(
            router,
            &IncreaseRequest {
                account,
                collateral_token,
                index_token: request.index_token,
                size_delta: request.size_delta,
                side: request.side,
                collateral_amount: amount,
                acceptable_price: request.acceptable_price,
            },
        )?;
        engine.disable_leverage(router)?;

        info!(%key, size = %result.size, collateral = %result.collateral, "router increase");
        Ok(result)
    }

    fn swap_at_router<O: PriceOracle>(
        &self,
        engine: &mut Engine<O>,
        path: &[TokenId],
        amount_in: Decimal,
        min_out: Decimal,
    ) -> Result<Decimal, EngineError> {
        let amount_out = {
            let ctx = SwapContext {
                oracle: engine.oracle(),
                tokens: engine.tokens(),
            };
            self.swap.swap(&ctx, path, amount_in, min_out)?
        };
        engine
            .custody_mut()
            .convert(self.address(), path[0], amount_in, path[1], amount_out)?;
        debug!(from = %path[0], to = %path[1], %amount_in, %amount_out, "swapped");
        Ok(amount_out)
    }

    pub fn decrease_position<O: PriceOracle>(
        &mut self,
        engine: &mut Engine<O>,
        caller: Address,
        request: &RouterDecrease,
    ) -> Result<DecreaseResult, EngineError> {
        self.run(engine, |router, engine| {
            router.decrease(engine, caller, request, request.receiver)
        })
    }

    /// Collateral must be the wrapped native token; the payout is unwrapped.
    pub fn decrease_position_native<O: PriceOracle>(
        &mut self,
        engine: &mut Engine<O>,
        caller: Address,
        request: &RouterDecrease,
    ) -> Result<DecreaseResult, EngineError> {
        self.run(engine, |router, engine| {
            let native = engine.wrapped_native();
            if request.collateral_token != native {
                return Err(ValidationError::InvalidCollateralToken {
                    expected: native,
                    got: request.collateral_token,
                }
                .into());
            }
            let here = router.address();
            let result = router.decrease(engine, caller, request, here)?;
            engine
                .custody_mut()
                .unwrap(here, request.receiver, result.amount_out)?;
            Ok(result)
        })
    }

    /// Close into another token: the payout is swapped along `path`, which must
    /// start at the collateral token. Returns the decrease and the swapped amount.
    pub fn decrease_position_and_swap<O: PriceOracle>(
        &mut self,
        engine: &mut Engine<O>,
        caller: Address,
        request: &RouterDecrease,
        path: &[TokenId],
        min_out: Decimal,
    ) -> Result<(DecreaseResult, Decimal), EngineError> {
        self.run(engine, |router, engine| {
            if path.len() != 2 {
                return Err(ValidationError::InvalidPathLength(path.len()).into());
            }
            if path[0] != request.collateral_token {
                return Err(ValidationError::InvalidPath {
                    expected: request.collateral_token,
                    got: path[0],
                }
                .into());
            }
            let here = router.address();
            let result = router.decrease(engine, caller, request, here)?;
            let amount_out = router.swap_at_router(engine, path, result.amount_out, min_out)?;
            engine
                .custody_mut()
                .transfer(path[1], here, request.receiver, amount_out)?;
            Ok((result, amount_out))
        })
    }

    fn decrease<O: PriceOracle>(
        &mut self,
        engine: &mut Engine<O>,
        account: Address,
        request: &RouterDecrease,
        receiver: Address,
    ) -> Result<DecreaseResult, EngineError> {
        self.authorize(engine, account, Operation::RouterDecrease(&self.policy))?;
        self.require_consent(engine, account)?;

        let router = self.address();
        engine.enable_leverage(router)?;
        let result = engine.decrease_position(
            router,
            &DecreaseRequest {
                account,
                collateral_token: request.collateral_token,
                index_token: request.index_token,
                collateral_delta: request.collateral_delta,
                size_delta: request.size_delta,
                side: request.side,
                receiver,
                acceptable_price: request.acceptable_price,
            },
        )?;
        engine.disable_leverage(router)?;
        Ok(result)
    }

    // 9.3: admin writes. the router admin or the engine governor.
    pub fn set_mode<O: PriceOracle>(
        &mut self,
        engine: &mut Engine<O>,
        caller: Address,
        mode: RouterMode,
    ) -> Result<(), EngineError> {
        self.authorize(engine, caller, Operation::RouterConfigure(&self.policy))?;
        self.policy.set_mode(mode);
        info!(router = %self.address(), %mode, "router mode set");
        engine.emit_event(EventPayload::RouterModeSet(RouterModeSetEvent {
            router: self.address(),
            mode,
        }));
        Ok(())
    }

    pub fn set_partner<O: PriceOracle>(
        &mut self,
        engine: &mut Engine<O>,
        caller: Address,
        account: Address,
        is_partner: bool,
    ) -> Result<(), EngineError> {
        self.authorize(engine, caller, Operation::RouterConfigure(&self.policy))?;
        self.policy.set_partner(account, is_partner);
        engine.emit_event(EventPayload::PartnerSet(PartnerSetEvent {
            router: self.address(),
            account,
            is_partner,
        }));
        Ok(())
    }

    pub fn set_deposit_fee<O: PriceOracle>(
        &mut self,
        engine: &mut Engine<O>,
        caller: Address,
        bps: Bps,
    ) -> Result<(), EngineError> {
        self.authorize(engine, caller, Operation::RouterConfigure(&self.policy))?;
        if bps.value() >= 10_000 {
            return Err(ConfigError::InvalidFees {
                reason: format!("deposit fee {} bps must be below 100%", bps.value()),
            }
            .into());
        }
        self.params.deposit_fee_bps = bps;
        engine.emit_event(EventPayload::ConfigChanged(ConfigChangedEvent {
            caller,
            change: ConfigChange::DepositFee(bps),
        }));
        Ok(())
    }

    pub fn set_increase_position_buffer<O: PriceOracle>(
        &mut self,
        engine: &mut Engine<O>,
        caller: Address,
        bps: Bps,
    ) -> Result<(), EngineError> {
        self.authorize(engine, caller, Operation::RouterConfigure(&self.policy))?;
        self.params.increase_position_buffer_bps = bps;
        engine.emit_event(EventPayload::ConfigChanged(ConfigChangedEvent {
            caller,
            change: ConfigChange::IncreasePositionBuffer(bps),
        }));
        Ok(())
    }

    /// Send the accumulated deposit fees for `token` to `receiver`.
    pub fn withdraw_fees<O: PriceOracle>(
        &mut self,
        engine: &mut Engine<O>,
        caller: Address,
        token: TokenId,
        receiver: Address,
    ) -> Result<Decimal, EngineError> {
        self.run(engine, |router, engine| {
            router.authorize(engine, caller, Operation::RouterConfigure(&router.policy))?;
            let amount = router.fee_reserves.remove(&token).unwrap_or(Decimal::ZERO);
            let here = router.address();
            engine.custody_mut().transfer(token, here, receiver, amount)?;
            info!(router = %here, %token, %amount, %receiver, "deposit fees withdrawn");
            engine.emit_event(EventPayload::FeesWithdrawn(FeesWithdrawnEvent {
                holder: here,
                token,
                amount,
                receiver,
            }));
            Ok(amount)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProtocolConfig;
    use crate::engine::EngineConfig;
    use crate::oracle::StaticOracle;
    use crate::swap::OracleSwap;
    use crate::token::TokenConfig;
    use rust_decimal_macros::dec;

    const WETH: TokenId = TokenId(1);
    const DAI: TokenId = TokenId(2);
    const GOV: Address = Address(1);
    const VAULT: Address = Address(2);
    const ROUTER: Address = Address(3);
    const ALICE: Address = Address(10);
    const BOB: Address = Address(11);

    fn setup() -> (Engine<StaticOracle>, EntryRouter<OracleSwap>) {
        let mut oracle = StaticOracle::new();
        oracle.set_price(WETH, Price::new_unchecked(dec!(3000)));
        oracle.set_price(DAI, Price::new_unchecked(dec!(1)));
        let mut engine = Engine::new(
            EngineConfig::default(),
            ProtocolConfig::default(),
            oracle,
            VAULT,
            GOV,
            WETH,
        );
        engine.set_token_config(GOV, WETH, TokenConfig::volatile("WETH", 18)).unwrap();
        engine.set_token_config(GOV, DAI, TokenConfig::stable("DAI", 18)).unwrap();
        engine.add_plugin(GOV, ROUTER).unwrap();
        engine.approve_plugin(ALICE, ROUTER);

        engine.custody_mut().mint(WETH, GOV, dec!(100));
        engine.deposit_liquidity(GOV, WETH, dec!(100)).unwrap();
        engine.custody_mut().mint_native(ALICE, dec!(10));
        engine.custody_mut().mint(DAI, ALICE, dec!(10000));

        let mut router = EntryRouter::new(ROUTER, GOV, RouterParams::default(), OracleSwap::default());
        router.set_mode(&mut engine, GOV, RouterMode::Legacy).unwrap();
        (engine, router)
    }

    fn native_long(size: Decimal) -> RouterIncrease {
        RouterIncrease {
            path: vec![WETH],
            index_token: WETH,
            amount_in: dec!(1),
            min_out: Decimal::ZERO,
            size_delta: Usd::new(size),
            side: Side::Long,
            acceptable_price: Price::new_unchecked(dec!(100000)),
        }
    }

    #[test]
    fn bad_paths_rejected_before_funds_move() {
        let (mut engine, mut router) = setup();

        let mut request = native_long(dec!(20000));
        request.path = vec![WETH, DAI, WETH];
        let err = router.increase_position_native(&mut engine, ALICE, &request).unwrap_err();
        assert_eq!(err, EngineError::Validation(ValidationError::InvalidPathLength(3)));

        request.path = vec![];
        let err = router.increase_position_native(&mut engine, ALICE, &request).unwrap_err();
        assert_eq!(err, EngineError::Validation(ValidationError::InvalidPathLength(0)));

        request.path = vec![DAI];
        let err = router.increase_position_native(&mut engine, ALICE, &request).unwrap_err();
        assert!(err.to_string().starts_with("invalid path"));
        assert_eq!(engine.custody().native_balance(ALICE), dec!(10));
    }

    #[test]
    fn consent_checked_even_in_legacy_mode() {
        let (mut engine, mut router) = setup();
        engine.custody_mut().mint_native(BOB, dec!(1));
        let err = router
            .increase_position_native(&mut engine, BOB, &native_long(dec!(20000)))
            .unwrap_err();
        assert!(matches!(err, EngineError::Permission(PermissionError::PluginNotApproved { .. })));
        assert_eq!(engine.custody().native_balance(BOB), dec!(1));
    }

    #[test]
    fn token_path_swaps_into_collateral() {
        let (mut engine, mut router) = setup();
        let request = RouterIncrease {
            path: vec![DAI, WETH],
            index_token: WETH,
            amount_in: dec!(3000),
            min_out: dec!(0.99),
            size_delta: Usd::new(dec!(10000)),
            side: Side::Long,
            acceptable_price: Price::new_unchecked(dec!(3100)),
        };
        let result = router.increase_position(&mut engine, ALICE, &request).unwrap();
        // 3000 DAI -> 0.997 WETH after the 0.3% swap fee -> 2991 usd, less 10 margin fee
        assert_eq!(result.collateral.value(), dec!(2981));
        assert_eq!(engine.custody().balance(DAI, ALICE), dec!(7000));
    }

    #[test]
    fn only_admin_configures_router() {
        let (mut engine, mut router) = setup();
        let err = router.set_partner(&mut engine, ALICE, ALICE, true).unwrap_err();
        assert_eq!(err, EngineError::Permission(PermissionError::Forbidden("router")));
        assert!(!router.is_partner(ALICE));
        router.set_partner(&mut engine, GOV, ALICE, true).unwrap();
        assert!(router.is_partner(ALICE));
    }

    #[test]
    fn deposit_fees_withdrawn_by_admin() {
        let (mut engine, mut router) = setup();
        router.increase_position_native(&mut engine, ALICE, &native_long(dec!(20000))).unwrap();
        router.increase_position_native(&mut engine, ALICE, &native_long(Decimal::ZERO)).unwrap();
        assert_eq!(router.fee_reserve(WETH), dec!(0.005));

        let amount = router.withdraw_fees(&mut engine, GOV, WETH, BOB).unwrap();
        assert_eq!(amount, dec!(0.005));
        assert_eq!(engine.custody().balance(WETH, BOB), dec!(0.005));
        assert_eq!(router.fee_reserve(WETH), Decimal::ZERO);
    }

    fn close_long(size: Decimal) -> RouterDecrease {
        RouterDecrease {
            collateral_token: WETH,
            index_token: WETH,
            collateral_delta: Usd::zero(),
            size_delta: Usd::new(size),
            side: Side::Long,
            receiver: ALICE,
            acceptable_price: Price::new_unchecked(dec!(1)),
        }
    }

    #[test]
    fn close_and_swap_pays_out_in_path_token() {
        let (mut engine, mut router) = setup();
        router.increase_position_native(&mut engine, ALICE, &native_long(dec!(20000))).unwrap();
        let key = PositionKey::long(ALICE, WETH);

        let err = router
            .decrease_position_and_swap(&mut engine, ALICE, &close_long(dec!(20000)), &[DAI], Decimal::ZERO)
            .unwrap_err();
        assert_eq!(err, EngineError::Validation(ValidationError::InvalidPathLength(1)));

        let err = router
            .decrease_position_and_swap(&mut engine, ALICE, &close_long(dec!(20000)), &[DAI, WETH], Decimal::ZERO)
            .unwrap_err();
        assert_eq!(
            err,
            EngineError::Validation(ValidationError::InvalidPath { expected: WETH, got: DAI })
        );
        assert!(engine.position(&key).is_some());

        // min_out above what the swap can give rolls the close back
        let err = router
            .decrease_position_and_swap(&mut engine, ALICE, &close_long(dec!(20000)), &[WETH, DAI], dec!(3000))
            .unwrap_err();
        assert!(matches!(err, EngineError::Swap(_)));
        assert!(engine.position(&key).is_some());

        let (closed, dai_out) = router
            .decrease_position_and_swap(&mut engine, ALICE, &close_long(dec!(20000)), &[WETH, DAI], dec!(2900))
            .unwrap();
        assert!(closed.closed);
        // 2980 collateral less the 20 usd closing fee, then 0.3% swap fee
        assert_eq!(closed.usd_out_after_fee.value(), dec!(2960));
        assert!(dai_out > dec!(2950) && dai_out < dec!(2960));
        assert_eq!(engine.custody().balance(DAI, ALICE), dec!(10000) + dai_out);
        assert_eq!(engine.custody().balance(WETH, ROUTER), Decimal::ZERO);
        assert!(engine.position(&key).is_none());
    }

    #[test]
    fn native_close_requires_wrapped_collateral() {
        let (mut engine, mut router) = setup();
        router.increase_position_native(&mut engine, ALICE, &native_long(dec!(20000))).unwrap();

        let request = RouterDecrease {
            collateral_token: DAI,
            ..close_long(dec!(20000))
        };
        let err = router
            .decrease_position_native(&mut engine, ALICE, &request)
            .unwrap_err();
        assert_eq!(
            err,
            EngineError::Validation(ValidationError::InvalidCollateralToken { expected: WETH, got: DAI })
        );
        assert!(engine.position(&PositionKey::long(ALICE, WETH)).is_some());
        assert_eq!(engine.custody().native_balance(ALICE), dec!(9));
    }

    #[test]
    fn deposit_fee_must_stay_below_full_amount() {
        let (mut engine, mut router) = setup();

        let err = router.set_deposit_fee(&mut engine, GOV, Bps::new(10_000)).unwrap_err();
        assert!(matches!(err, EngineError::Config(ConfigError::InvalidFees { .. })));
        assert_eq!(router.params().deposit_fee_bps, Bps::new(50));

        let err = router.set_deposit_fee(&mut engine, ALICE, Bps::new(100)).unwrap_err();
        assert_eq!(err, EngineError::Permission(PermissionError::Forbidden("router")));

        router.set_deposit_fee(&mut engine, GOV, Bps::new(9_999)).unwrap();
        assert_eq!(router.params().deposit_fee_bps, Bps::new(9_999));
    }
}
