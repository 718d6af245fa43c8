//! Position engine simulation.
//!
//! Walks the router lifecycle with native collateral, a liquidation after a
//! price drop, and a delayed governor handover through the timelock.
//! Set `RUST_LOG=perps_positions=debug` to see fee and funding detail.

use perps_positions::*;
use rust_decimal_macros::dec;
use tracing_subscriber::EnvFilter;

const WETH: TokenId = TokenId(1);
const DAI: TokenId = TokenId(2);

const GOV: Address = Address(0x01);
const VAULT: Address = Address(0x02);
const ROUTER: Address = Address(0x03);
const TIMELOCK: Address = Address(0x04);
const KEEPER: Address = Address(0x05);
const LP: Address = Address(0x06);
const ALICE: Address = Address(0x10);
const BOB: Address = Address(0x11);

fn main() -> Result<(), EngineError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    println!("Position Engine Simulation");
    println!("Pooled liquidity, native collateral, gated router\n");

    scenario_1_router_lifecycle()?;
    scenario_2_liquidation()?;
    scenario_3_timelock_handover()?;

    println!("\nAll simulations completed successfully.");
    Ok(())
}

fn price(value: rust_decimal::Decimal) -> Price {
    Price::new_unchecked(value)
}

fn setup() -> Result<(Engine<StaticOracle>, EntryRouter<OracleSwap>), EngineError> {
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
    engine.set_time(Timestamp::now());
    engine.set_token_config(GOV, WETH, TokenConfig::volatile("WETH", 18))?;
    engine.set_token_config(GOV, DAI, TokenConfig::stable("DAI", 18))?;

    engine.custody_mut().mint(WETH, LP, dec!(500));
    engine.custody_mut().mint(DAI, LP, dec!(1_000_000));
    engine.deposit_liquidity(LP, WETH, dec!(500))?;
    engine.deposit_liquidity(LP, DAI, dec!(1_000_000))?;

    engine.set_manager_mode(GOV, true)?;
    engine.set_manager(GOV, ROUTER, true)?;
    engine.add_plugin(GOV, ROUTER)?;

    let router = EntryRouter::new(ROUTER, GOV, RouterParams::default(), OracleSwap::default());
    Ok((engine, router))
}

/// Native collateral through the router: open, top up, add size, close.
fn scenario_1_router_lifecycle() -> Result<(), EngineError> {
    println!("Scenario 1: Router Lifecycle With Native Collateral\n");

    let (mut engine, mut router) = setup()?;
    engine.custody_mut().mint_native(ALICE, dec!(10));
    engine.approve_plugin(ALICE, ROUTER);

    let open = RouterIncrease {
        path: vec![WETH],
        index_token: WETH,
        amount_in: dec!(1),
        min_out: dec!(0),
        size_delta: Usd::new(dec!(20000)),
        side: Side::Long,
        acceptable_price: price(dec!(100000)),
    };

    match router.increase_position_native(&mut engine, ALICE, &open) {
        Err(e) => println!("  Gated router, Alice not a partner: {}", e),
        Ok(_) => println!("  Unexpected: gated router let Alice in"),
    }

    router.set_mode(&mut engine, GOV, RouterMode::Legacy)?;
    let opened = router.increase_position_native(&mut engine, ALICE, &open)?;
    println!("  Legacy mode. Alice opens 20000 long with 1 ETH");
    println!(
        "  Size: {}, collateral: {}, fees paid: {}\n",
        opened.size,
        opened.collateral,
        opened.total_fee()
    );

    let top_up = RouterIncrease {
        size_delta: Usd::zero(),
        ..open.clone()
    };
    let topped = router.increase_position_native(&mut engine, ALICE, &top_up)?;
    println!("  Pure deposit of 1 ETH pays the deposit fee");
    println!("  Collateral: {}, router fee reserve: {} WETH\n", topped.collateral, router.fee_reserve(WETH));

    let key = PositionKey::long(ALICE, WETH);
    let position = engine
        .position(&key)
        .cloned()
        .ok_or(InsufficientCollateralError::EmptyPosition(key))?;
    let close = RouterDecrease {
        collateral_token: WETH,
        index_token: WETH,
        collateral_delta: position.collateral,
        size_delta: position.size,
        side: Side::Long,
        receiver: ALICE,
        acceptable_price: price(dec!(1)),
    };
    let before = engine.custody().native_balance(ALICE);
    let closed = router.decrease_position_native(&mut engine, ALICE, &close)?;
    let after = engine.custody().native_balance(ALICE);
    println!("  Full close pays {} ETH back as native", closed.amount_out);
    println!("  Native balance {} -> {}", before, after);
    println!("  Position left behind: {}\n", engine.position(&key).is_some());

    let pool = engine.pool(WETH);
    println!("  WETH pool: {} pooled, {} reserved, {} fees", pool.pool_amount, pool.reserved_amount, pool.fee_reserves);
    Ok(())
}

/// Price falls until Bob's long is insolvent and a keeper liquidates it.
fn scenario_2_liquidation() -> Result<(), EngineError> {
    println!("\nScenario 2: Liquidation After A Price Drop\n");

    let (mut engine, mut router) = setup()?;
    router.set_mode(&mut engine, GOV, RouterMode::Legacy)?;
    engine.custody_mut().mint(WETH, BOB, dec!(1));
    engine.approve_plugin(BOB, ROUTER);

    let request = RouterIncrease {
        path: vec![WETH],
        index_token: WETH,
        amount_in: dec!(1),
        min_out: dec!(0),
        size_delta: Usd::new(dec!(30000)),
        side: Side::Long,
        acceptable_price: price(dec!(3000)),
    };
    let opened = router.increase_position(&mut engine, BOB, &request)?;
    println!("  Bob opens 30000 long on 1 WETH: collateral {}", opened.collateral);

    let key = PositionKey::long(BOB, WETH);
    for p in [dec!(2900), dec!(2750), dec!(2700)] {
        engine.oracle_mut().set_price(WETH, price(p));
        let state = engine.liquidation_state(&key)?;
        println!("  ETH at ${}: {:?}", p, state);
    }

    let result = engine.liquidate_position(KEEPER, key, KEEPER)?;
    println!("  Keeper liquidates: {:?}, margin fees {}", result.state, result.margin_fees);
    println!("  Keeper receives {} WETH", result.liquidation_fee_tokens);
    println!("  Position left behind: {}", engine.position(&key).is_some());
    Ok(())
}

/// Installs a timelock, then hands the governor seat back after the buffer.
fn scenario_3_timelock_handover() -> Result<(), EngineError> {
    println!("\nScenario 3: Timelock Governor\n");

    let (mut engine, _router) = setup()?;
    engine.install_timelock(GOV, TIMELOCK, GOV)?;
    println!("  Timelock installed as governor, admin {}", GOV);

    match engine.set_leverage_enabled(BOB, false) {
        Err(e) => println!("  Bob tries to disable leverage: {}", e),
        Ok(_) => println!("  Unexpected: Bob changed leverage"),
    }

    let action = GovernanceAction::SetGovernor(GOV);
    let eta = engine.signal_governance(GOV, action.clone())?;
    match eta.to_utc() {
        Some(at) => println!("  Governor handover signalled, executable at {}", at.to_rfc3339()),
        None => println!("  Governor handover signalled, executable at {}", eta),
    }

    if let Err(e) = engine.execute_governance(GOV, action.clone()) {
        println!("  Immediate execution refused: {}", e);
    }

    engine.set_time(eta);
    engine.execute_governance(GOV, action)?;
    println!("  Executed at eta. Governor is now {}", engine.gate().flags.governor);
    println!("  Events recorded: {}, latest:", engine.events().len());
    for event in engine.recent_events(3) {
        println!("    #{} {:?}", event.id.0, event.payload);
    }
    Ok(())
}
