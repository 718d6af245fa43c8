//! Router lifecycle with native collateral.
//!
//! Walks one account through the gated and legacy router modes against an
//! engine governed by a timelock: path checks, the leverage toggle, the
//! deposit fee on collateral-only increases, and a native payout on close.

use perps_positions::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

const WETH: TokenId = TokenId(1);
const DAI: TokenId = TokenId(2);

const GOV: Address = Address(0x01);
const VAULT: Address = Address(0x02);
const ROUTER: Address = Address(0x03);
const TIMELOCK: Address = Address(0x04);
const LP: Address = Address(0x06);
const ALICE: Address = Address(0x10);

fn price(value: Decimal) -> Price {
    Price::new_unchecked(value)
}

fn setup() -> (Engine<StaticOracle>, EntryRouter<OracleSwap>) {
    let mut oracle = StaticOracle::new();
    oracle.set_price(WETH, price(dec!(3000)));
    oracle.set_price(DAI, price(dec!(1)));

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

    engine.custody_mut().mint(WETH, LP, dec!(100));
    engine.deposit_liquidity(LP, WETH, dec!(100)).unwrap();

    // leverage is only switched on around router calls
    engine.set_leverage_enabled(GOV, false).unwrap();
    engine.set_manager_mode(GOV, true).unwrap();
    engine.set_manager(GOV, ROUTER, true).unwrap();
    engine.add_plugin(GOV, ROUTER).unwrap();
    engine.install_timelock(GOV, TIMELOCK, GOV).unwrap();

    engine.custody_mut().mint_native(ALICE, dec!(10));
    engine.approve_plugin(ALICE, ROUTER);

    let router = EntryRouter::new(ROUTER, GOV, RouterParams::default(), OracleSwap::default());
    (engine, router)
}

fn long_native(size: Decimal, limit: Decimal) -> RouterIncrease {
    RouterIncrease {
        path: vec![WETH],
        index_token: WETH,
        amount_in: dec!(1),
        min_out: dec!(0),
        size_delta: Usd::new(size),
        side: Side::Long,
        acceptable_price: price(limit),
    }
}

fn position(engine: &Engine<StaticOracle>) -> Option<Position> {
    engine.position(&PositionKey::long(ALICE, WETH)).cloned()
}

#[test]
fn native_router_lifecycle() {
    let (mut engine, mut router) = setup();
    router.set_mode(&mut engine, GOV, RouterMode::Legacy).unwrap();

    // router is not yet a timelock handler, so it cannot toggle leverage
    let err = router
        .increase_position_native(&mut engine, ALICE, &long_native(dec!(0), dec!(3000)))
        .unwrap_err();
    assert_eq!(err.to_string(), "timelock: forbidden");
    assert_eq!(engine.custody().native_balance(ALICE), dec!(10));

    let wrong_token = RouterIncrease {
        path: vec![DAI],
        ..long_native(dec!(0), dec!(3000))
    };
    let err = router
        .increase_position_native(&mut engine, ALICE, &wrong_token)
        .unwrap_err();
    assert!(err.to_string().starts_with("invalid path"));

    let too_long = RouterIncrease {
        path: vec![WETH, DAI, DAI],
        ..long_native(dec!(0), dec!(3000))
    };
    let err = router
        .increase_position_native(&mut engine, ALICE, &too_long)
        .unwrap_err();
    assert_eq!(err, EngineError::Validation(ValidationError::InvalidPathLength(3)));

    engine.set_timelock_handler(GOV, ROUTER, true).unwrap();
    engine.set_should_toggle_leverage(GOV, true).unwrap();

    let err = router
        .increase_position_native(&mut engine, ALICE, &long_native(dec!(20000), dec!(200)))
        .unwrap_err();
    assert!(err.to_string().starts_with("mark price higher than limit"));
    assert!(!engine.gate().flags.leverage_enabled);

    // open: 3000 usd of collateral less a 20 usd margin fee
    let opened = router
        .increase_position_native(&mut engine, ALICE, &long_native(dec!(20000), dec!(3000)))
        .unwrap();
    assert_eq!(opened.size.value(), dec!(20000));
    assert_eq!(opened.collateral.value(), dec!(2980));
    assert_eq!(opened.total_fee().value(), dec!(20));
    assert!(!engine.gate().flags.leverage_enabled);

    // collateral-only deposit pays the 0.5% deposit fee to the router
    let topped = router
        .increase_position_native(&mut engine, ALICE, &long_native(dec!(0), dec!(3000)))
        .unwrap();
    assert_eq!(topped.size.value(), dec!(20000));
    assert_eq!(topped.collateral.value(), dec!(5965));
    assert_eq!(engine.custody().balance(WETH, ROUTER), dec!(0.005));
    assert_eq!(router.fee_reserve(WETH), dec!(0.005));

    // leverage falls from 3.35x to 2.57x: still charged
    let added = router
        .increase_position_native(&mut engine, ALICE, &long_native(dec!(3000), dec!(3000)))
        .unwrap();
    assert_eq!(added.size.value(), dec!(23000));
    assert_eq!(added.collateral.value(), dec!(8947));
    assert_eq!(router.fee_reserve(WETH), dec!(0.01));

    // leverage stays inside the buffer: no fee
    let added = router
        .increase_position_native(&mut engine, ALICE, &long_native(dec!(10000), dec!(3000)))
        .unwrap();
    assert_eq!(added.size.value(), dec!(33000));
    assert_eq!(added.collateral.value(), dec!(11937));
    assert_eq!(router.fee_reserve(WETH), dec!(0.01));

    let close = RouterDecrease {
        collateral_token: WETH,
        index_token: WETH,
        collateral_delta: Usd::new(dec!(11937)),
        size_delta: Usd::new(dec!(33000)),
        side: Side::Long,
        receiver: ALICE,
        acceptable_price: price(dec!(1)),
    };

    router.set_mode(&mut engine, GOV, RouterMode::Gated).unwrap();
    let err = router
        .decrease_position_native(&mut engine, ALICE, &close)
        .unwrap_err();
    assert_eq!(err.to_string(), "router: forbidden");

    router.set_mode(&mut engine, GOV, RouterMode::Legacy).unwrap();
    let native_before = engine.custody().native_balance(ALICE);
    let closed = router
        .decrease_position_native(&mut engine, ALICE, &close)
        .unwrap();
    assert!(closed.closed);
    assert_eq!(closed.usd_out.value(), dec!(11937));
    assert_eq!(closed.usd_out_after_fee.value(), dec!(11904));
    assert_eq!(closed.amount_out, dec!(3.968));
    assert_eq!(engine.custody().native_balance(ALICE) - native_before, dec!(3.968));
    assert!(position(&engine).is_none());

    let pool = engine.pool(WETH);
    assert_eq!(pool.reserved_amount, Decimal::ZERO);
    assert!(engine.custody().balance(WETH, VAULT) >= pool.pool_amount + pool.fee_reserves);

    router.set_mode(&mut engine, GOV, RouterMode::Gated).unwrap();
    let err = router
        .increase_position_native(&mut engine, ALICE, &long_native(dec!(1000), dec!(3000)))
        .unwrap_err();
    assert_eq!(err.to_string(), "router: forbidden");

    router.set_partner(&mut engine, GOV, ALICE, true).unwrap();
    let reopened = router
        .increase_position_native(&mut engine, ALICE, &long_native(dec!(1000), dec!(3000)))
        .unwrap();
    assert_eq!(reopened.size.value(), dec!(1000));
    assert_eq!(reopened.collateral.value(), dec!(2999));
}

#[test]
fn failed_router_call_leaves_no_trace() {
    let (mut engine, mut router) = setup();
    router.set_mode(&mut engine, GOV, RouterMode::Legacy).unwrap();
    engine.set_timelock_handler(GOV, ROUTER, true).unwrap();
    engine.set_should_toggle_leverage(GOV, true).unwrap();

    let events_before = engine.events().len();
    let pool_before = engine.pool(WETH);

    let err = router.increase_position_native(&mut engine, ALICE, &long_native(dec!(20000), dec!(200)));
    assert!(err.is_err());

    assert_eq!(engine.events().len(), events_before);
    assert_eq!(engine.pool(WETH), pool_before);
    assert_eq!(engine.custody().native_balance(ALICE), dec!(10));
    assert_eq!(engine.custody().balance(WETH, ROUTER), Decimal::ZERO);
    assert!(position(&engine).is_none());
}

#[test]
fn revoked_consent_blocks_router() {
    let (mut engine, mut router) = setup();
    router.set_mode(&mut engine, GOV, RouterMode::Legacy).unwrap();
    engine.set_timelock_handler(GOV, ROUTER, true).unwrap();

    engine.deny_plugin(ALICE, ROUTER);
    let err = router
        .increase_position_native(&mut engine, ALICE, &long_native(dec!(1000), dec!(3000)))
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Permission(PermissionError::PluginNotApproved { .. })
    ));
}

#[test]
fn router_grant_opens_gated_mode() {
    let (mut engine, mut router) = setup();
    engine.set_timelock_handler(GOV, ROUTER, true).unwrap();
    engine.set_should_toggle_leverage(GOV, true).unwrap();

    assert!(router
        .increase_position_native(&mut engine, ALICE, &long_native(dec!(1000), dec!(3000)))
        .is_err());

    engine.set_router_access(GOV, ALICE, ROUTER, true).unwrap();
    let opened = router
        .increase_position_native(&mut engine, ALICE, &long_native(dec!(1000), dec!(3000)))
        .unwrap();
    assert_eq!(opened.size.value(), dec!(1000));
}

#[test]
fn oversized_increase_is_rejected() {
    let (mut engine, mut router) = setup();
    router.set_mode(&mut engine, GOV, RouterMode::Legacy).unwrap();
    engine.set_timelock_handler(GOV, ROUTER, true).unwrap();
    engine.set_should_toggle_leverage(GOV, true).unwrap();
    router
        .increase_position_native(&mut engine, ALICE, &long_native(dec!(20000), dec!(3000)))
        .unwrap();

    let huge = dec!(10_000_000_000_000_000_000_000_000);
    let err = router
        .increase_position_native(&mut engine, ALICE, &long_native(huge, dec!(3000)))
        .unwrap_err();
    assert_eq!(err, EngineError::Validation(ValidationError::AmountTooLarge(huge)));
    assert_eq!(engine.custody().native_balance(ALICE), dec!(9));
    assert_eq!(position(&engine).map(|p| p.size.value()), Some(dec!(20000)));
}
