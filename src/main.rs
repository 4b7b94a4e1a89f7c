use std::sync::Arc;

use alloy_primitives::{Address, U256};
use anyhow::Context;
use futures::future::join_all;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use degenopoly::actor::{EngineActor, EngineHandle};
use degenopoly::clock::{Clock, ManualClock, SystemClock};
use degenopoly::config::{EngineConfig, SimConfig};
use degenopoly::genesis::Genesis;
use degenopoly::random::SeededRandom;
use degenopoly::venue::ConstantProductPool;
use degenopoly::{labeled_address, CaseOutcome, Degenopoly, Event, SECONDS_PER_DAY};

// ─────────────────────────────────────────────────────────
// Event tally
// ─────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct Tally {
    transfers: u64,
    rolls: u64,
    nodes_bought: u64,
    families_bought: u64,
    offers_taken: u64,
    distributions: u64,
    burned: U256,
    claimed: U256,
}

impl Tally {
    fn record(&mut self, event: &Event) {
        match event {
            Event::Transfer { .. } => self.transfers += 1,
            Event::DiceRolled { .. } => self.rolls += 1,
            Event::NodePurchased { .. } => self.nodes_bought += 1,
            Event::FamilyPurchased { .. } => self.families_bought += 1,
            Event::OfferAccepted { .. } => self.offers_taken += 1,
            Event::TaxDistributed { burned, .. } => {
                self.distributions += 1;
                self.burned += *burned;
            }
            Event::RewardClaimed { amount, .. } => self.claimed += *amount,
            Event::Approval { .. } => {}
        }
    }
}

// ─────────────────────────────────────────────────────────
// Player strategy
// ─────────────────────────────────────────────────────────

/// Rolls, takes affordable offers, claims, and upgrades when a family is complete.
async fn play_day(handle: EngineHandle, genesis: Arc<Genesis>, player: Address, rolls: u64, fee: U256) {
    for _ in 0..rolls {
        match handle.roll_dice(player).await {
            Ok(receipt) => {
                if let CaseOutcome::OfferMade { price, .. } = receipt.outcome {
                    // Keep enough for the next roll.
                    if handle.balance_of(player) >= price + fee {
                        if let Err(e) = handle.accept_offer(player).await {
                            debug!("{} skipped offer: {}", player, e);
                        }
                    }
                }
            }
            Err(e) => {
                debug!("{} cannot roll: {}", player, e);
                break;
            }
        }
    }

    if let Err(e) = handle.claim_reward(player).await {
        warn!("⚠️ {} claim failed: {}", player, e);
    }

    let held = handle.snapshot().account(player).nodes;
    for family in &genesis.families {
        let required: Vec<Address> = genesis
            .nodes
            .iter()
            .filter(|n| family.requires(n))
            .map(|n| n.id)
            .collect();
        if required.is_empty() || !required.iter().all(|id| held.contains_key(id)) {
            continue;
        }
        let indices = vec![0; required.len()];
        match handle.purchase_family(player, family.id, indices).await {
            Ok(badge) => info!("👪 {} completed {} (badge #{})", player, family.name, badge),
            Err(e) => debug!("{} upgrade to {} failed: {}", player, family.name, e),
        }
    }
}

// ─────────────────────────────────────────────────────────
// Main
// ─────────────────────────────────────────────────────────

fn init_tracing(sim: &SimConfig) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match &sim.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "degenopoly-sim.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
            None
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let sim = SimConfig::from_env();
    let _log_guard = init_tracing(&sim);

    info!("═══════════════════════════════════════════════════");
    info!("  Degenopoly economy simulation");
    info!("═══════════════════════════════════════════════════");

    let config = EngineConfig::from_env();
    let genesis = Arc::new(config.load_genesis()?);
    let book = config.address_book();
    let owner = book.owner;
    info!(
        "📊 Config: buy_tax={} sell_tax={} swap_tax={} threshold={} fee={} players={} days={} rolls/day={}",
        config.tax.buy_tax_bps,
        config.tax.sell_tax_bps,
        config.swap_tax_enabled,
        config.swap_tax_threshold,
        config.roll_fee,
        sim.players,
        sim.days,
        sim.rolls_per_day
    );

    let clock = ManualClock::new(SystemClock.now());
    let random = match config.rng_seed {
        Some(seed) => SeededRandom::new(seed),
        None => SeededRandom::from_entropy(),
    };
    let engine = Degenopoly::deploy(
        &config,
        &genesis,
        ConstantProductPool::new(book.pair),
        random,
        Arc::new(clock.clone()),
    )
    .context("deploying game")?;

    let (event_tx, mut event_rx) = mpsc::channel(4096);
    let (handle, actor) = EngineActor::spawn(engine, Some(event_tx));
    let tally = tokio::spawn(async move {
        let mut tally = Tally::default();
        while let Some(event) = event_rx.recv().await {
            tally.record(&event);
        }
        tally
    });

    // Launch: seed the pool, fund the players.
    handle.mint(owner, owner, sim.pool_tokens).await?;
    handle.deposit_base(owner, sim.pool_base).await?;
    handle
        .add_liquidity(owner, sim.pool_tokens, sim.pool_base)
        .await
        .context("seeding pool")?;

    let players: Vec<Address> = (0..sim.players)
        .map(|i| labeled_address(&format!("degenopoly:player:{i}")))
        .collect();
    for &player in &players {
        handle.mint(owner, player, sim.starting_tokens).await?;
        handle.approve(player, book.node_manager, U256::MAX).await?;
        handle.approve(player, book.play_board, U256::MAX).await?;
    }
    info!("🚀 {} players funded with {} each", players.len(), sim.starting_tokens);

    for day in 1..=sim.days {
        join_all(players.iter().map(|&player| {
            play_day(
                handle.clone(),
                genesis.clone(),
                player,
                sim.rolls_per_day,
                config.roll_fee,
            )
        }))
        .await;

        // Every player sells a tenth of their bag at day end.
        for &player in &players {
            let amount = handle.balance_of(player) / U256::from(10u64);
            if amount.is_zero() {
                continue;
            }
            if let Err(e) = handle.sell(player, amount).await {
                debug!("{} sell failed: {}", player, e);
            }
        }

        clock.advance(SECONDS_PER_DAY);
        let snap = handle.snapshot();
        info!(
            "📅 Day {} | supply={} pending_tax={} pool={}/{}",
            day, snap.total_supply, snap.pending_tax, snap.reserve_token, snap.reserve_base
        );
        for &player in &players {
            let view = snap.account(player);
            info!(
                "   {} bal={} nodes={} x{} daily={} pos={} laps={}",
                player,
                view.balance,
                view.nodes.values().sum::<usize>(),
                view.multiplier,
                view.daily_reward,
                view.position,
                view.laps
            );
        }
    }

    drop(handle);
    actor.await.context("engine actor panicked")?;
    let tally = tally.await.context("event tally panicked")?;
    info!(
        "🏁 Done | transfers={} rolls={} nodes={} families={} offers={} distributions={} burned={} claimed={}",
        tally.transfers,
        tally.rolls,
        tally.nodes_bought,
        tally.families_bought,
        tally.offers_taken,
        tally.distributions,
        tally.burned,
        tally.claimed
    );
    Ok(())
}
