//! EngineActor: owns the `Degenopoly` engine on a tokio task.
//!
//! Writes arrive as `EngineCmd` over an mpsc channel and are applied one at a
//! time; each carries a oneshot for its result. After every committed
//! command the actor refreshes the accounts it touched in the `LedgerSnapshot`
//! on a `watch` channel, so reward and balance queries never wait behind
//! writers.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use alloy_primitives::{Address, U256};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::board::RollReceipt;
use crate::clock::Clock;
use crate::engine::Degenopoly;
use crate::error::{EngineError, EngineResult};
use crate::events::Event;
use crate::nodes::AccrualState;
use crate::random::RandomSource;
use crate::token::TransferReceipt;
use crate::venue::LiquidityVenue;
use crate::SECONDS_PER_DAY;

const CMD_CHANNEL_SIZE: usize = 256;

// ─────────────────────────────────────────────────────────
// Commands
// ─────────────────────────────────────────────────────────

type Reply<T> = oneshot::Sender<EngineResult<T>>;

#[derive(Debug)]
pub enum EngineCmd {
    Transfer { from: Address, to: Address, amount: U256, reply: Reply<TransferReceipt> },
    Approve { owner: Address, spender: Address, amount: U256, reply: Reply<()> },
    Mint { caller: Address, to: Address, amount: U256, reply: Reply<()> },
    SetSwapTaxSettings { caller: Address, enabled: bool, threshold: U256, reply: Reply<()> },
    DepositBase { account: Address, amount: U256, reply: Reply<()> },
    AddLiquidity { provider: Address, token_amount: U256, base_amount: U256, reply: Reply<U256> },
    Sell { trader: Address, amount: U256, reply: Reply<U256> },
    Buy { trader: Address, base_in: U256, reply: Reply<U256> },
    PurchaseNode { account: Address, node: Address, reply: Reply<u64> },
    PurchaseFamily { account: Address, family: Address, node_indices: Vec<usize>, reply: Reply<u64> },
    ClaimReward { account: Address, reply: Reply<U256> },
    RollDice { account: Address, reply: Reply<RollReceipt> },
    #[cfg(any(test, feature = "manual-roll"))]
    RollDiceManually { account: Address, roll: u8, reply: Reply<RollReceipt> },
    AcceptOffer { account: Address, reply: Reply<u64> },
}

// ─────────────────────────────────────────────────────────
// Snapshot
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AccountView {
    pub balance: U256,
    pub base_balance: U256,
    /// Held instances per node type.
    pub nodes: BTreeMap<Address, usize>,
    pub multiplier: u32,
    pub daily_reward: U256,
    pub accrual: AccrualState,
    pub position: usize,
    pub laps: u64,
}

/// Read-side copy of the ledger, published after every write.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LedgerSnapshot {
    /// Commands committed so far.
    pub version: u64,
    pub total_supply: U256,
    pub pending_tax: U256,
    pub reserve_token: U256,
    pub reserve_base: U256,
    pub accounts: HashMap<Address, AccountView>,
}

impl AccountView {
    pub fn read<V: LiquidityVenue + Clone, R: RandomSource>(
        engine: &Degenopoly<V, R>,
        account: Address,
    ) -> Self {
        let nodes = engine.nodes();
        let player = engine.board().player(account);
        Self {
            balance: engine.token().balance_of(account),
            base_balance: engine.market().base.balance_of(account),
            nodes: nodes
                .all_nodes()
                .iter()
                .map(|node| (node.id, nodes.balance_of(node.id, account)))
                .filter(|(_, held)| *held > 0)
                .collect(),
            multiplier: nodes.get_multiplier_for(account),
            daily_reward: nodes.daily_reward_of(account),
            accrual: nodes.accrual_of(account),
            position: player.position,
            laps: player.laps,
        }
    }
}

impl LedgerSnapshot {
    /// Full read of every account the engine knows about.
    pub fn capture<V: LiquidityVenue + Clone, R: RandomSource>(
        engine: &Degenopoly<V, R>,
        version: u64,
    ) -> Self {
        let known: HashSet<Address> = engine
            .token()
            .holders()
            .map(|(account, _)| account)
            .chain(engine.nodes().accounts())
            .chain(engine.board().players().map(|(account, _)| account))
            .collect();
        let mut snapshot = Self::default();
        snapshot.refresh(engine, known, version);
        snapshot
    }

    /// Re-reads the totals and the views of `touched`; other views are kept.
    pub fn refresh<V: LiquidityVenue + Clone, R: RandomSource>(
        &mut self,
        engine: &Degenopoly<V, R>,
        touched: impl IntoIterator<Item = Address>,
        version: u64,
    ) {
        let (reserve_token, reserve_base) = engine.market().venue.reserves();
        self.version = version;
        self.total_supply = engine.token().total_supply();
        self.pending_tax = engine.token().pending_tax();
        self.reserve_token = reserve_token;
        self.reserve_base = reserve_base;
        for account in touched {
            if account.is_zero() {
                continue;
            }
            self.accounts.insert(account, AccountView::read(engine, account));
        }
    }

    pub fn account(&self, account: Address) -> AccountView {
        self.accounts.get(&account).cloned().unwrap_or_else(|| AccountView {
            multiplier: crate::BPS,
            ..AccountView::default()
        })
    }

    pub fn balance_of(&self, account: Address) -> U256 {
        self.account(account).balance
    }

    pub fn daily_reward_of(&self, account: Address) -> U256 {
        self.account(account).daily_reward
    }

    pub fn get_multiplier_for(&self, account: Address) -> u32 {
        self.account(account).multiplier
    }

    pub fn position_of(&self, account: Address) -> usize {
        self.account(account).position
    }

    /// Same formula as the registry, evaluated on the snapshot.
    pub fn claimable_reward(&self, account: Address, now: u64) -> U256 {
        let view = self.account(account);
        let elapsed = now.saturating_sub(view.accrual.last_settled_at);
        view.accrual.accrued_unclaimed
            + view.daily_reward * U256::from(elapsed) / U256::from(SECONDS_PER_DAY)
    }
}

// ─────────────────────────────────────────────────────────
// Actor
// ─────────────────────────────────────────────────────────

pub struct EngineActor<V, R> {
    engine: Degenopoly<V, R>,
    cmd_rx: mpsc::Receiver<EngineCmd>,
    snapshot_tx: watch::Sender<Arc<LedgerSnapshot>>,
    event_tx: Option<mpsc::Sender<Event>>,
    version: u64,
}

impl<V, R> EngineActor<V, R>
where
    V: LiquidityVenue + Clone + Send + 'static,
    R: RandomSource + Send + 'static,
{
    /// Spawns the actor and returns a handle to it.
    ///
    /// `event_tx` receives every committed event, in order. Handle reads use
    /// the engine's own clock.
    pub fn spawn(
        engine: Degenopoly<V, R>,
        event_tx: Option<mpsc::Sender<Event>>,
    ) -> (EngineHandle, JoinHandle<()>) {
        let (actor, handle) = Self::new(engine, event_tx);
        let task = tokio::spawn(actor.run());
        (handle, task)
    }

    fn new(engine: Degenopoly<V, R>, event_tx: Option<mpsc::Sender<Event>>) -> (Self, EngineHandle) {
        let clock = engine.clock();
        let (cmd_tx, cmd_rx) = mpsc::channel(CMD_CHANNEL_SIZE);
        let (snapshot_tx, snapshot_rx) =
            watch::channel(Arc::new(LedgerSnapshot::capture(&engine, 0)));
        let actor = Self {
            engine,
            cmd_rx,
            snapshot_tx,
            event_tx,
            version: 0,
        };
        let handle = EngineHandle {
            cmd_tx,
            snapshot_rx,
            clock,
        };
        (actor, handle)
    }

    /// Actor main loop. Runs until every handle is dropped.
    pub async fn run(mut self) {
        info!("🎮 EngineActor started");

        while let Some(cmd) = self.cmd_rx.recv().await {
            self.apply(cmd).await;
        }

        info!("🎮 EngineActor shutting down (channel closed)");
    }

    async fn apply(&mut self, cmd: EngineCmd) {
        let e = &mut self.engine;
        match cmd {
            EngineCmd::Transfer { from, to, amount, reply } => {
                let r = e.transfer(from, to, amount);
                self.respond(reply, r, &[from, to]).await;
            }
            EngineCmd::Approve { owner, spender, amount, reply } => {
                e.approve(owner, spender, amount);
                self.respond(reply, Ok(()), &[]).await;
            }
            EngineCmd::Mint { caller, to, amount, reply } => {
                let r = e.mint(caller, to, amount);
                self.respond(reply, r, &[to]).await;
            }
            EngineCmd::SetSwapTaxSettings { caller, enabled, threshold, reply } => {
                let r = e.set_swap_tax_settings(caller, enabled, threshold);
                self.respond(reply, r, &[]).await;
            }
            EngineCmd::DepositBase { account, amount, reply } => {
                e.deposit_base(account, amount);
                self.respond(reply, Ok(()), &[account]).await;
            }
            EngineCmd::AddLiquidity { provider, token_amount, base_amount, reply } => {
                let r = e.add_liquidity(provider, token_amount, base_amount);
                self.respond(reply, r, &[provider]).await;
            }
            EngineCmd::Sell { trader, amount, reply } => {
                let r = e.sell(trader, amount, trader);
                self.respond(reply, r, &[trader]).await;
            }
            EngineCmd::Buy { trader, base_in, reply } => {
                let r = e.buy(trader, base_in, trader);
                self.respond(reply, r, &[trader]).await;
            }
            EngineCmd::PurchaseNode { account, node, reply } => {
                let r = e.purchase_node(account, node);
                self.respond(reply, r, &[account]).await;
            }
            EngineCmd::PurchaseFamily { account, family, node_indices, reply } => {
                let r = e.purchase_family(account, family, &node_indices);
                self.respond(reply, r, &[account]).await;
            }
            EngineCmd::ClaimReward { account, reply } => {
                let r = e.claim_reward(account);
                self.respond(reply, r, &[account]).await;
            }
            EngineCmd::RollDice { account, reply } => {
                let r = e.roll_dice(account);
                self.respond(reply, r, &[account]).await;
            }
            #[cfg(any(test, feature = "manual-roll"))]
            EngineCmd::RollDiceManually { account, roll, reply } => {
                let r = e.roll_dice_manually(account, roll);
                self.respond(reply, r, &[account]).await;
            }
            EngineCmd::AcceptOffer { account, reply } => {
                let r = e.accept_offer(account);
                self.respond(reply, r, &[account]).await;
            }
        }
    }

    /// Publishes the snapshot and events of a committed command, then
    /// answers. A caller that got its reply always reads a snapshot that
    /// includes its write. Rejected commands leave the snapshot alone.
    async fn respond<T>(&mut self, reply: Reply<T>, result: EngineResult<T>, accounts: &[Address]) {
        if result.is_ok() {
            self.publish(accounts);
            self.forward_events().await;
        }
        // A dropped receiver only means the caller stopped waiting.
        let _ = reply.send(result);
    }

    fn publish(&mut self, accounts: &[Address]) {
        self.version += 1;
        let version = self.version;
        let treasury = self.engine.book().treasury;
        let mut touched: HashSet<Address> = accounts.iter().copied().collect();
        for event in self.engine.events() {
            match event {
                Event::Transfer { from, to, .. } => {
                    touched.insert(*from);
                    touched.insert(*to);
                }
                Event::Approval { .. } => {}
                // Base proceeds and LP land at the treasury.
                Event::TaxDistributed { .. } => {
                    touched.insert(treasury);
                }
                Event::NodePurchased { account, .. }
                | Event::FamilyPurchased { account, .. }
                | Event::RewardClaimed { account, .. }
                | Event::DiceRolled { account, .. }
                | Event::OfferAccepted { account, .. } => {
                    touched.insert(*account);
                }
            }
        }
        let engine = &self.engine;
        // Copies the map only while a reader still holds the previous snapshot.
        self.snapshot_tx.send_modify(|snapshot| {
            Arc::make_mut(snapshot).refresh(engine, touched, version);
        });
    }

    async fn forward_events(&mut self) {
        let events = self.engine.drain_events();
        let Some(tx) = &self.event_tx else {
            return;
        };
        for event in events {
            if tx.send(event).await.is_err() {
                warn!("⚠️ event subscriber gone, dropping further events");
                self.event_tx = None;
                return;
            }
        }
    }
}

// ─────────────────────────────────────────────────────────
// Handle
// ─────────────────────────────────────────────────────────

/// Cheap, cloneable front door to the actor.
#[derive(Clone)]
pub struct EngineHandle {
    cmd_tx: mpsc::Sender<EngineCmd>,
    snapshot_rx: watch::Receiver<Arc<LedgerSnapshot>>,
    clock: Arc<dyn Clock>,
}

impl EngineHandle {
    async fn request<T>(&self, make: impl FnOnce(Reply<T>) -> EngineCmd) -> EngineResult<T> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(make(reply))
            .await
            .map_err(|_| EngineError::EngineStopped)?;
        rx.await.map_err(|_| EngineError::EngineStopped)?
    }

    // ── Reads (snapshot, never block on the actor) ──

    pub fn snapshot(&self) -> Arc<LedgerSnapshot> {
        self.snapshot_rx.borrow().clone()
    }

    pub fn claimable_reward(&self, account: Address) -> U256 {
        self.snapshot().claimable_reward(account, self.clock.now())
    }

    pub fn daily_reward_of(&self, account: Address) -> U256 {
        self.snapshot().daily_reward_of(account)
    }

    pub fn get_multiplier_for(&self, account: Address) -> u32 {
        self.snapshot().get_multiplier_for(account)
    }

    pub fn balance_of(&self, account: Address) -> U256 {
        self.snapshot().balance_of(account)
    }

    pub fn position_of(&self, account: Address) -> usize {
        self.snapshot().position_of(account)
    }

    // ── Writes ──

    pub async fn transfer(&self, from: Address, to: Address, amount: U256) -> EngineResult<TransferReceipt> {
        self.request(|reply| EngineCmd::Transfer { from, to, amount, reply }).await
    }

    pub async fn approve(&self, owner: Address, spender: Address, amount: U256) -> EngineResult<()> {
        self.request(|reply| EngineCmd::Approve { owner, spender, amount, reply }).await
    }

    pub async fn mint(&self, caller: Address, to: Address, amount: U256) -> EngineResult<()> {
        self.request(|reply| EngineCmd::Mint { caller, to, amount, reply }).await
    }

    pub async fn set_swap_tax_settings(&self, caller: Address, enabled: bool, threshold: U256) -> EngineResult<()> {
        self.request(|reply| EngineCmd::SetSwapTaxSettings { caller, enabled, threshold, reply }).await
    }

    pub async fn deposit_base(&self, account: Address, amount: U256) -> EngineResult<()> {
        self.request(|reply| EngineCmd::DepositBase { account, amount, reply }).await
    }

    pub async fn add_liquidity(&self, provider: Address, token_amount: U256, base_amount: U256) -> EngineResult<U256> {
        self.request(|reply| EngineCmd::AddLiquidity { provider, token_amount, base_amount, reply }).await
    }

    pub async fn sell(&self, trader: Address, amount: U256) -> EngineResult<U256> {
        self.request(|reply| EngineCmd::Sell { trader, amount, reply }).await
    }

    pub async fn buy(&self, trader: Address, base_in: U256) -> EngineResult<U256> {
        self.request(|reply| EngineCmd::Buy { trader, base_in, reply }).await
    }

    pub async fn purchase_node(&self, account: Address, node: Address) -> EngineResult<u64> {
        self.request(|reply| EngineCmd::PurchaseNode { account, node, reply }).await
    }

    pub async fn purchase_family(&self, account: Address, family: Address, node_indices: Vec<usize>) -> EngineResult<u64> {
        self.request(|reply| EngineCmd::PurchaseFamily { account, family, node_indices, reply }).await
    }

    pub async fn claim_reward(&self, account: Address) -> EngineResult<U256> {
        self.request(|reply| EngineCmd::ClaimReward { account, reply }).await
    }

    pub async fn roll_dice(&self, account: Address) -> EngineResult<RollReceipt> {
        self.request(|reply| EngineCmd::RollDice { account, reply }).await
    }

    #[cfg(any(test, feature = "manual-roll"))]
    pub async fn roll_dice_manually(&self, account: Address, roll: u8) -> EngineResult<RollReceipt> {
        self.request(|reply| EngineCmd::RollDiceManually { account, roll, reply }).await
    }

    pub async fn accept_offer(&self, account: Address) -> EngineResult<u64> {
        self.request(|reply| EngineCmd::AcceptOffer { account, reply }).await
    }
}
