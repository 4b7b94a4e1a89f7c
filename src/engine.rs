//! Degenopoly: the sequencer that owns every component.
//!
//! Each public mutation is one atomic step: it validates, runs collaborator
//! calls against staged copies, and commits. On error the ledger is
//! untouched and the events it produced are dropped.

use std::sync::Arc;

use alloy_primitives::{Address, U256};
use tracing::{info, warn};

use crate::board::{BoardEngine, RawCase, RollReceipt};
use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::events::Event;
use crate::genesis::Genesis;
use crate::nodes::{FamilyType, NodeRegistry, NodeType};
use crate::random::RandomSource;
use crate::token::{TaxPolicy, TaxableToken, TransferReceipt};
use crate::venue::{LiquidityVenue, Market};
use crate::AddressBook;

pub struct Degenopoly<V, R> {
    book: AddressBook,
    token: TaxableToken,
    market: Market<V>,
    nodes: NodeRegistry,
    board: BoardEngine,
    random: R,
    clock: Arc<dyn Clock>,
    events: Vec<Event>,
}

impl<V: LiquidityVenue + Clone, R: RandomSource> Degenopoly<V, R> {
    /// Empty game: no catalog, no board, reward minting delegated.
    pub fn new(
        book: AddressBook,
        policy: TaxPolicy,
        roll_fee: U256,
        venue: V,
        random: R,
        clock: Arc<dyn Clock>,
    ) -> EngineResult<Self> {
        if venue.pair() != book.pair {
            return Err(EngineError::ExternalCollaboratorFailure(format!(
                "venue pair {} does not match address book pair {}",
                venue.pair(),
                book.pair
            )));
        }
        let mut token = TaxableToken::new(book.token, book.owner, book.treasury, book.pair, policy);
        token.set_minter(book.owner, book.node_manager, true)?;
        token.set_minter(book.owner, book.play_board, true)?;

        Ok(Self {
            book,
            token,
            market: Market::new(venue),
            nodes: NodeRegistry::new(book.node_manager, book.owner, book.treasury),
            board: BoardEngine::new(book.play_board, book.owner, book.treasury, roll_fee),
            random,
            clock,
            events: Vec::new(),
        })
    }

    /// Deploys the game and seeds the catalogs and the board from `genesis`.
    pub fn deploy(
        config: &EngineConfig,
        genesis: &Genesis,
        venue: V,
        random: R,
        clock: Arc<dyn Clock>,
    ) -> EngineResult<Self> {
        let book = config.address_book();
        let owner = book.owner;
        let mut engine = Self::new(book, config.tax, config.roll_fee, venue, random, clock)?;
        engine.set_swap_tax_settings(owner, config.swap_tax_enabled, config.swap_tax_threshold)?;
        for node in &genesis.nodes {
            engine.register_node_type(owner, node.clone())?;
        }
        for family in &genesis.families {
            engine.register_family_type(owner, family.clone())?;
        }
        engine.set_cases(owner, &genesis.cases)?;
        engine.events.clear();

        info!(
            "🚀 Degenopoly deployed | token={} pair={} nodes={} families={} cases={}",
            book.token,
            book.pair,
            engine.nodes.all_nodes().len(),
            engine.nodes.all_families().len(),
            engine.board.number_of_cases()
        );
        Ok(engine)
    }

    /// Runs `op`; on error drops whatever events it pushed.
    fn atomic<T>(&mut self, op: impl FnOnce(&mut Self) -> EngineResult<T>) -> EngineResult<T> {
        let mark = self.events.len();
        let result = op(self);
        if let Err(e) = &result {
            self.events.truncate(mark);
            warn!("⚠️ operation rejected: {}", e);
        }
        result
    }

    // ─────────────────────────────────────────────────
    // Reads
    // ─────────────────────────────────────────────────

    pub fn book(&self) -> &AddressBook {
        &self.book
    }

    pub fn token(&self) -> &TaxableToken {
        &self.token
    }

    pub fn market(&self) -> &Market<V> {
        &self.market
    }

    pub fn nodes(&self) -> &NodeRegistry {
        &self.nodes
    }

    pub fn board(&self) -> &BoardEngine {
        &self.board
    }

    pub fn now(&self) -> u64 {
        self.clock.now()
    }

    /// The clock rewards accrue against; shared with read-side callers.
    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn drain_events(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.events)
    }

    pub fn balance_of(&self, account: Address) -> U256 {
        self.token.balance_of(account)
    }

    pub fn claimable_reward(&self, account: Address) -> U256 {
        self.nodes.claimable_reward(account, self.clock.now())
    }

    pub fn daily_reward_of(&self, account: Address) -> U256 {
        self.nodes.daily_reward_of(account)
    }

    pub fn get_multiplier_for(&self, account: Address) -> u32 {
        self.nodes.get_multiplier_for(account)
    }

    // ─────────────────────────────────────────────────
    // Token
    // ─────────────────────────────────────────────────

    pub fn transfer(&mut self, from: Address, to: Address, amount: U256) -> EngineResult<TransferReceipt> {
        self.atomic(|e| e.token.transfer(&mut e.market, from, to, amount, &mut e.events))
    }

    pub fn approve(&mut self, owner: Address, spender: Address, amount: U256) {
        self.token.approve(owner, spender, amount, &mut self.events);
    }

    pub fn transfer_from(
        &mut self,
        spender: Address,
        from: Address,
        to: Address,
        amount: U256,
    ) -> EngineResult<TransferReceipt> {
        self.atomic(|e| {
            e.token
                .transfer_from(&mut e.market, spender, from, to, amount, &mut e.events)
        })
    }

    pub fn mint(&mut self, caller: Address, to: Address, amount: U256) -> EngineResult<()> {
        self.atomic(|e| e.token.mint(caller, to, amount, &mut e.events))
    }

    pub fn burn(&mut self, caller: Address, from: Address, amount: U256) -> EngineResult<()> {
        self.atomic(|e| e.token.burn(caller, from, amount, &mut e.events))
    }

    pub fn set_swap_tax_settings(&mut self, caller: Address, enabled: bool, threshold: U256) -> EngineResult<()> {
        self.token.set_swap_tax_settings(caller, enabled, threshold)
    }

    pub fn set_tax_exempt(&mut self, caller: Address, account: Address, exempt: bool) -> EngineResult<()> {
        self.token.set_tax_exempt(caller, account, exempt)
    }

    // ─────────────────────────────────────────────────
    // Market
    // ─────────────────────────────────────────────────

    /// Faucet for the base asset.
    pub fn deposit_base(&mut self, account: Address, amount: U256) {
        self.market.base.credit(account, amount);
    }

    /// Seeds the pool from a tax-exempt provider. Returns LP minted.
    pub fn add_liquidity(
        &mut self,
        provider: Address,
        token_amount: U256,
        base_amount: U256,
    ) -> EngineResult<U256> {
        self.atomic(|e| {
            let pair = e.book.pair;
            if !e.token.tax_for(provider, pair, token_amount).is_zero() {
                return Err(EngineError::Unauthorized {
                    caller: provider,
                    action: "add liquidity without tax exemption",
                });
            }
            e.token.ensure_balance(provider, token_amount)?;
            let mut staged = e.market.clone();
            staged.base.debit(provider, base_amount)?;
            let lp = staged.venue.add_liquidity(token_amount, base_amount, provider)?;
            e.token
                .transfer(&mut staged, provider, pair, token_amount, &mut e.events)?;
            e.market = staged;
            info!(
                "💧 Liquidity added by {} | token={} base={} → lp={}",
                provider, token_amount, base_amount, lp
            );
            Ok(lp)
        })
    }

    /// Sells `amount` tokens into the pair; base proceeds go to `recipient`.
    pub fn sell(&mut self, trader: Address, amount: U256, recipient: Address) -> EngineResult<U256> {
        self.atomic(|e| {
            let pair = e.book.pair;
            e.token.ensure_balance(trader, amount)?;
            let delivered = amount - e.token.tax_for(trader, pair, amount);

            let mut staged = e.market.clone();
            let base_out = staged.venue.swap_to_base(delivered)?;
            staged.base.credit(recipient, base_out);
            e.token
                .transfer(&mut staged, trader, pair, amount, &mut e.events)?;
            e.market = staged;
            info!("📉 {} sold {} → {} base", trader, amount, base_out);
            Ok(base_out)
        })
    }

    /// Buys with `base_in`; the taxed token output lands at `recipient`.
    pub fn buy(&mut self, trader: Address, base_in: U256, recipient: Address) -> EngineResult<U256> {
        self.atomic(|e| {
            let pair = e.book.pair;
            let mut staged = e.market.clone();
            staged.base.debit(trader, base_in)?;
            let out = staged.venue.swap_from_base(base_in)?;
            let receipt = e
                .token
                .transfer(&mut staged, pair, recipient, out, &mut e.events)?;
            e.market = staged;
            info!(
                "📈 {} bought {} tokens for {} base (tax {})",
                trader, receipt.delivered, base_in, receipt.tax
            );
            Ok(receipt.delivered)
        })
    }

    // ─────────────────────────────────────────────────
    // Catalog
    // ─────────────────────────────────────────────────

    pub fn register_node_type(&mut self, caller: Address, def: NodeType) -> EngineResult<()> {
        self.nodes.register_node_type(caller, def)
    }

    pub fn register_family_type(&mut self, caller: Address, def: FamilyType) -> EngineResult<()> {
        self.nodes.register_family_type(caller, def)
    }

    pub fn set_cases(&mut self, caller: Address, raw: &[RawCase]) -> EngineResult<()> {
        self.board.set_cases(caller, raw, &self.nodes)
    }

    // ─────────────────────────────────────────────────
    // Nodes
    // ─────────────────────────────────────────────────

    pub fn purchase_node(&mut self, account: Address, node: Address) -> EngineResult<u64> {
        let now = self.clock.now();
        self.atomic(|e| {
            e.nodes
                .purchase_node(&mut e.token, &mut e.market, account, node, now, &mut e.events)
        })
    }

    pub fn purchase_family(
        &mut self,
        account: Address,
        family: Address,
        node_indices: &[usize],
    ) -> EngineResult<u64> {
        let now = self.clock.now();
        self.atomic(|e| {
            e.nodes.purchase_family(
                &mut e.token,
                &mut e.market,
                account,
                family,
                node_indices,
                now,
                &mut e.events,
            )
        })
    }

    pub fn claim_reward(&mut self, account: Address) -> EngineResult<U256> {
        let now = self.clock.now();
        self.atomic(|e| e.nodes.claim_reward(&mut e.token, account, now, &mut e.events))
    }

    // ─────────────────────────────────────────────────
    // Board
    // ─────────────────────────────────────────────────

    pub fn roll_dice(&mut self, account: Address) -> EngineResult<RollReceipt> {
        self.atomic(|e| {
            e.board.roll_dice(
                &mut e.token,
                &mut e.market,
                &e.nodes,
                &mut e.random,
                account,
                &mut e.events,
            )
        })
    }

    #[cfg(any(test, feature = "manual-roll"))]
    pub fn roll_dice_manually(&mut self, account: Address, roll: u8) -> EngineResult<RollReceipt> {
        self.atomic(|e| {
            e.board.roll_dice_manually(
                &mut e.token,
                &mut e.market,
                &e.nodes,
                account,
                roll,
                &mut e.events,
            )
        })
    }

    pub fn accept_offer(&mut self, account: Address) -> EngineResult<u64> {
        let now = self.clock.now();
        self.atomic(|e| {
            e.board.accept_offer(
                &mut e.token,
                &mut e.market,
                &mut e.nodes,
                account,
                now,
                &mut e.events,
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::VenueError;
    use crate::events::CaseOutcome;
    use crate::genesis::{family_id, node_id};
    use crate::random::{ScriptedRandom, SeededRandom};
    use crate::venue::ConstantProductPool;
    use alloy_primitives::utils::parse_ether;

    const TRADER: Address = Address::repeat_byte(0x21);
    const START: u64 = 1_700_000_000;

    fn ether(s: &str) -> U256 {
        parse_ether(s).unwrap()
    }

    fn deploy_with<R: RandomSource>(
        random: R,
        config: EngineConfig,
    ) -> (Degenopoly<ConstantProductPool, R>, ManualClock) {
        let clock = ManualClock::new(START);
        let book = config.address_book();
        let mut game = Degenopoly::deploy(
            &config,
            &Genesis::degenopoly(),
            ConstantProductPool::new(book.pair),
            random,
            Arc::new(clock.clone()),
        )
        .unwrap();

        let owner = book.owner;
        game.mint(owner, owner, ether("101000")).unwrap();
        game.deposit_base(owner, ether("100"));
        game.add_liquidity(owner, ether("100000"), ether("100")).unwrap();
        game.transfer(owner, TRADER, ether("1000")).unwrap();
        game.approve(TRADER, book.node_manager, U256::MAX);
        game.approve(TRADER, book.play_board, U256::MAX);
        game.drain_events();
        (game, clock)
    }

    fn deploy() -> (Degenopoly<ConstantProductPool, SeededRandom>, ManualClock) {
        deploy_with(SeededRandom::new(42), EngineConfig::default())
    }

    fn rps(index: usize) -> U256 {
        Genesis::degenopoly().nodes[index].reward_per_sec
    }

    #[test]
    fn test_deploy_wires_catalogs() {
        let (game, _) = deploy();
        assert_eq!(game.nodes().all_nodes().len(), 17);
        assert_eq!(game.nodes().all_families().len(), 7);
        assert_eq!(game.board().number_of_cases(), 24);
        assert!(game.token().is_minter(game.book().node_manager));
        assert!(game.token().is_minter(game.book().play_board));
    }

    #[test]
    fn test_sell_is_taxed_twenty_percent() {
        let (mut game, _) = deploy();
        let token = game.book().token;
        let pair = game.book().pair;
        let base_out = game.sell(TRADER, ether("50"), TRADER).unwrap();

        let events = game.drain_events();
        assert!(events.contains(&Event::transfer(TRADER, token, ether("10"))));
        assert!(events.contains(&Event::transfer(TRADER, pair, ether("40"))));
        assert_eq!(game.balance_of(token), ether("10"));
        assert_eq!(game.token().pending_tax(), ether("10"));
        assert_eq!(game.market().base.balance_of(TRADER), base_out);
        assert_eq!(game.market().venue.reserve_token, ether("100040"));
    }

    #[test]
    fn test_buy_is_taxed_five_percent() {
        let (mut game, _) = deploy();
        let token = game.book().token;
        let base_in = ether("0.1");
        let out = game.market().venue.token_out_for(base_in).unwrap();
        game.deposit_base(TRADER, base_in);

        let delivered = game.buy(TRADER, base_in, TRADER).unwrap();
        let tax = out / U256::from(20u64);
        assert_eq!(delivered, out - tax);
        assert_eq!(game.balance_of(TRADER), ether("1000") + out - tax);
        assert_eq!(game.token().pending_tax(), tax);
        assert!(game.events().contains(&Event::transfer(game.book().pair, token, tax)));
    }

    #[test]
    fn test_swap_tax_threshold_distributes() {
        let (mut game, _) = deploy();
        let owner = game.book().owner;
        let token = game.book().token;
        let pair = game.book().pair;
        game.set_swap_tax_settings(owner, true, ether("10")).unwrap();
        let treasury = game.book().treasury;
        let lp_before = game.market().venue.lp_balance_of(treasury);

        game.sell(TRADER, ether("50"), TRADER).unwrap();

        let events = game.drain_events();
        assert!(events.contains(&Event::transfer(token, Address::ZERO, ether("2"))));
        assert!(events.contains(&Event::transfer(token, pair, ether("6"))));
        assert_eq!(game.balance_of(token), U256::ZERO);
        assert_eq!(game.token().pending_tax(), U256::ZERO);
        assert!(game.market().base.balance_of(treasury) > U256::ZERO);

        let Some(Event::TaxDistributed { liquidity_added, .. }) = events.last().cloned() else {
            panic!("no distribution in {events:?}");
        };
        assert!(liquidity_added > U256::ZERO);
        assert_eq!(
            game.market().venue.lp_balance_of(treasury),
            lp_before + liquidity_added
        );
    }

    #[test]
    fn test_dust_sell_with_zero_threshold_succeeds() {
        let (mut game, _) = deploy();
        let owner = game.book().owner;
        game.set_swap_tax_settings(owner, true, U256::ZERO).unwrap();

        let base_out = game.sell(TRADER, U256::from(5000u64), TRADER).unwrap();
        assert!(base_out > U256::ZERO);
        assert_eq!(game.token().pending_tax(), U256::ZERO);
        assert_eq!(game.balance_of(game.book().token), U256::ZERO);
    }

    #[test]
    fn test_node_reward_after_one_day() {
        let (mut game, clock) = deploy();
        let owner = game.book().owner;
        game.purchase_node(TRADER, node_id(0)).unwrap();
        assert!(game
            .events()
            .contains(&Event::transfer(TRADER, owner, ether("150"))));
        assert_eq!(game.nodes().balance_of(node_id(0), TRADER), 1);
        assert_eq!(game.get_multiplier_for(TRADER), 10_000);

        clock.advance(86_400);
        let daily = rps(0) * U256::from(86_400u64);
        assert_eq!(game.daily_reward_of(TRADER), daily);
        assert_eq!(game.claimable_reward(TRADER), daily);
        // Floors to 5.25 less sub-wei dust.
        assert!(ether("5.25") - daily < U256::from(86_400u64));

        clock.advance(1);
        let claimed = game.claim_reward(TRADER).unwrap();
        assert_eq!(claimed, rps(0) * U256::from(86_401u64));
        assert_eq!(game.balance_of(TRADER), ether("850") + claimed);
    }

    #[test]
    fn test_brown_family_upgrade() {
        let (mut game, _) = deploy();
        game.purchase_node(TRADER, node_id(0)).unwrap();
        game.purchase_node(TRADER, node_id(1)).unwrap();
        game.purchase_family(TRADER, family_id(0), &[0, 0]).unwrap();

        assert_eq!(game.nodes().balance_of(node_id(0), TRADER), 0);
        assert_eq!(game.nodes().balance_of(node_id(1), TRADER), 0);
        assert_eq!(game.nodes().family_balance_of(family_id(0), TRADER), 1);
        assert_eq!(game.get_multiplier_for(TRADER), 12_500);
        assert_eq!(game.daily_reward_of(TRADER), U256::ZERO);

        game.purchase_node(TRADER, node_id(0)).unwrap();
        assert_eq!(
            game.daily_reward_of(TRADER),
            rps(0) * U256::from(86_400u64) * U256::from(12_500u64) / U256::from(10_000u64)
        );
    }

    #[test]
    fn test_mismatched_colour_family_cannot_be_bought() {
        let (mut game, _) = deploy();
        for i in 2..5 {
            game.purchase_node(TRADER, node_id(i)).unwrap();
        }
        let err = game.purchase_family(TRADER, family_id(1), &[0, 0, 0]).unwrap_err();
        assert_eq!(
            err,
            EngineError::MissingRequiredNodes {
                family: family_id(1),
                node: Address::ZERO
            }
        );
        assert_eq!(game.get_multiplier_for(TRADER), 10_000);
    }

    #[test]
    fn test_roll_dice_pays_fee_split() {
        let (mut game, _) = deploy();
        let owner = game.book().owner;
        let board = game.book().play_board;
        let receipt = game.roll_dice(TRADER).unwrap();

        assert!((1..=6).contains(&receipt.roll));
        assert_eq!(game.board().position_of(TRADER), receipt.roll as usize);
        let events = game.drain_events();
        assert!(events.contains(&Event::transfer(TRADER, owner, ether("25"))));
        assert!(events.contains(&Event::transfer(TRADER, board, ether("25"))));
        assert!(matches!(events.last(), Some(Event::DiceRolled { .. })));
    }

    #[test]
    fn test_manual_rolls_land_on_table() {
        for roll in 1..=6u8 {
            let (mut game, _) = deploy();
            let receipt = game.roll_dice_manually(TRADER, roll).unwrap();
            assert_eq!(receipt.position, roll as usize);
            let expected = match roll {
                1 => CaseOutcome::OfferMade { node: node_id(0), price: ether("150") },
                2 => CaseOutcome::Nothing,
                _ => {
                    let i = roll as usize - 2;
                    CaseOutcome::OfferMade {
                        node: node_id(i),
                        price: Genesis::degenopoly().nodes[i].purchase_price,
                    }
                }
            };
            assert_eq!(receipt.outcome, expected);
        }
    }

    #[test]
    fn test_offer_accepted_through_board() {
        let (mut game, _) = deploy();
        game.roll_dice_manually(TRADER, 1).unwrap();
        game.accept_offer(TRADER).unwrap();
        assert_eq!(game.nodes().balance_of(node_id(0), TRADER), 1);
        assert_eq!(game.balance_of(TRADER), ether("800"));
        assert_eq!(
            game.accept_offer(TRADER),
            Err(EngineError::NoPendingOffer(TRADER))
        );
    }

    #[test]
    fn test_failed_random_draw_changes_nothing() {
        let (mut game, _) = deploy_with(ScriptedRandom::default(), EngineConfig::default());
        let err = game.roll_dice(TRADER).unwrap_err();
        assert!(matches!(err, EngineError::ExternalCollaboratorFailure(_)));
        assert_eq!(game.balance_of(TRADER), ether("1000"));
        assert_eq!(game.board().position_of(TRADER), 0);
        assert!(game.events().is_empty());
    }

    #[test]
    fn test_rejected_operation_leaves_no_events() {
        let (mut game, _) = deploy();
        let err = game.purchase_node(TRADER, node_id(16)).unwrap_err();
        assert!(matches!(err, EngineError::InsufficientFunds { .. }));
        assert!(game.events().is_empty());
        assert_eq!(game.balance_of(TRADER), ether("1000"));
    }

    #[derive(Clone)]
    struct DownVenue {
        pair: Address,
    }

    impl LiquidityVenue for DownVenue {
        fn pair(&self) -> Address {
            self.pair
        }
        fn quote_swap_to_base(&self, _: U256) -> Result<U256, VenueError> {
            Err(VenueError::Unavailable("down".into()))
        }
        fn donate(&mut self, _: U256) -> Result<(), VenueError> {
            Err(VenueError::Unavailable("down".into()))
        }
        fn swap_to_base(&mut self, _: U256) -> Result<U256, VenueError> {
            Err(VenueError::Unavailable("down".into()))
        }
        fn swap_from_base(&mut self, _: U256) -> Result<U256, VenueError> {
            Err(VenueError::Unavailable("down".into()))
        }
        fn add_liquidity(&mut self, _: U256, _: U256, _: Address) -> Result<U256, VenueError> {
            Err(VenueError::Unavailable("down".into()))
        }
        fn lp_balance_of(&self, _: Address) -> U256 {
            U256::ZERO
        }
        fn reserves(&self) -> (U256, U256) {
            (U256::ZERO, U256::ZERO)
        }
    }

    #[test]
    fn test_venue_failure_aborts_taxed_transfer() {
        let config = EngineConfig {
            swap_tax_enabled: true,
            swap_tax_threshold: ether("1"),
            ..EngineConfig::default()
        };
        let book = config.address_book();
        let mut game = Degenopoly::deploy(
            &config,
            &Genesis::degenopoly(),
            DownVenue { pair: book.pair },
            SeededRandom::new(1),
            Arc::new(ManualClock::new(START)),
        )
        .unwrap();
        game.mint(book.owner, TRADER, ether("100")).unwrap();
        game.drain_events();
        let supply = game.token().total_supply();

        let err = game.transfer(TRADER, book.pair, ether("50")).unwrap_err();
        assert!(matches!(err, EngineError::ExternalCollaboratorFailure(_)));
        assert_eq!(game.balance_of(TRADER), ether("100"));
        assert_eq!(game.balance_of(book.pair), U256::ZERO);
        assert_eq!(game.token().pending_tax(), U256::ZERO);
        assert_eq!(game.token().total_supply(), supply);
        assert!(game.events().is_empty());

        assert!(game.sell(TRADER, ether("10"), TRADER).is_err());
        assert_eq!(game.balance_of(TRADER), ether("100"));
    }

    #[test]
    fn test_venue_must_match_pair() {
        let config = EngineConfig::default();
        let result = Degenopoly::deploy(
            &config,
            &Genesis::degenopoly(),
            ConstantProductPool::new(Address::repeat_byte(0x77)),
            SeededRandom::new(1),
            Arc::new(ManualClock::new(START)),
        );
        assert!(matches!(result, Err(EngineError::ExternalCollaboratorFailure(_))));
    }
}
