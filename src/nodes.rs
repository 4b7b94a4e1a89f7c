//! NodeRegistry: node catalog, ownership, reward accrual and family upgrades.
//!
//! Rewards accrue continuously but are only written down at settlement points
//! (purchase, upgrade, claim). Reads compute the outstanding part on the fly:
//!
//! ```text
//! daily_rate = Σ(reward_per_sec_i * 86400 * count_i) * multiplier / 10000
//! claimable  = accrued_unclaimed + daily_rate * (now - last_settled_at) / 86400
//! ```

use std::collections::HashMap;

use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{EngineError, EngineResult};
use crate::events::Event;
use crate::token::TaxableToken;
use crate::venue::{LiquidityVenue, Market};
use crate::{BPS, SECONDS_PER_DAY};

// ─────────────────────────────────────────────────────────
// Catalog types
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeType {
    pub id: Address,
    pub name: String,
    pub color: String,
    /// Token units earned per second per held instance.
    pub reward_per_sec: U256,
    pub purchase_price: U256,
}

impl NodeType {
    pub fn daily_reward(&self) -> U256 {
        self.reward_per_sec * U256::from(SECONDS_PER_DAY)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FamilyType {
    pub id: Address,
    pub name: String,
    pub color: String,
    /// Multiplier in basis points (12500 = 1.25x).
    pub reward_boost: u32,
    #[serde(default)]
    pub purchase_price: U256,
}

impl FamilyType {
    pub fn requires(&self, node: &NodeType) -> bool {
        node.color.eq_ignore_ascii_case(&self.color)
    }
}

// ─────────────────────────────────────────────────────────
// Per-account state
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AccrualState {
    pub last_settled_at: u64,
    pub accrued_unclaimed: U256,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FamilyBadge {
    pub family: Address,
    pub badge_id: u64,
}

#[derive(Debug, Clone, Default)]
struct NodeAccount {
    /// Instance ids held, per node type, in acquisition order.
    holdings: HashMap<Address, Vec<u64>>,
    badges: Vec<FamilyBadge>,
    /// Boost of the most recent family; `None` means 1.0x.
    multiplier: Option<u32>,
    accrual: AccrualState,
}

// ─────────────────────────────────────────────────────────
// Registry
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct NodeRegistry {
    address: Address,
    owner: Address,
    treasury: Address,
    nodes: Vec<NodeType>,
    node_index: HashMap<Address, usize>,
    next_token_id: Vec<u64>,
    families: Vec<FamilyType>,
    family_index: HashMap<Address, usize>,
    next_badge_id: Vec<u64>,
    accounts: HashMap<Address, NodeAccount>,
}

impl NodeRegistry {
    pub fn new(address: Address, owner: Address, treasury: Address) -> Self {
        Self {
            address,
            owner,
            treasury,
            nodes: Vec::new(),
            node_index: HashMap::new(),
            next_token_id: Vec::new(),
            families: Vec::new(),
            family_index: HashMap::new(),
            next_badge_id: Vec::new(),
            accounts: HashMap::new(),
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    // ─────────────────────────────────────────────────
    // Catalog
    // ─────────────────────────────────────────────────

    pub fn register_node_type(&mut self, caller: Address, def: NodeType) -> EngineResult<()> {
        if caller != self.owner {
            return Err(EngineError::Unauthorized { caller, action: "register node type" });
        }
        if self.node_index.contains_key(&def.id) {
            return Err(EngineError::DuplicateType(def.id));
        }
        info!(
            "🏠 Node registered: {} [{}] price={} reward/s={}",
            def.name, def.color, def.purchase_price, def.reward_per_sec
        );
        self.node_index.insert(def.id, self.nodes.len());
        self.nodes.push(def);
        self.next_token_id.push(0);
        Ok(())
    }

    pub fn register_family_type(&mut self, caller: Address, def: FamilyType) -> EngineResult<()> {
        if caller != self.owner {
            return Err(EngineError::Unauthorized { caller, action: "register family type" });
        }
        if self.family_index.contains_key(&def.id) {
            return Err(EngineError::DuplicateType(def.id));
        }
        info!("👪 Family registered: {} [{}] boost={}", def.name, def.color, def.reward_boost);
        self.family_index.insert(def.id, self.families.len());
        self.families.push(def);
        self.next_badge_id.push(0);
        Ok(())
    }

    pub fn node(&self, id: Address) -> Option<&NodeType> {
        self.node_index.get(&id).map(|&i| &self.nodes[i])
    }

    pub fn family(&self, id: Address) -> Option<&FamilyType> {
        self.family_index.get(&id).map(|&i| &self.families[i])
    }

    pub fn all_nodes(&self) -> &[NodeType] {
        &self.nodes
    }

    pub fn all_families(&self) -> &[FamilyType] {
        &self.families
    }

    /// Node types a family consumes, in catalog order.
    pub fn required_nodes(&self, family: &FamilyType) -> Vec<Address> {
        self.nodes
            .iter()
            .filter(|n| family.requires(n))
            .map(|n| n.id)
            .collect()
    }

    // ─────────────────────────────────────────────────
    // Reads
    // ─────────────────────────────────────────────────

    pub fn balance_of(&self, node: Address, account: Address) -> usize {
        self.accounts
            .get(&account)
            .and_then(|a| a.holdings.get(&node))
            .map_or(0, Vec::len)
    }

    pub fn tokens_of(&self, node: Address, account: Address) -> Vec<u64> {
        self.accounts
            .get(&account)
            .and_then(|a| a.holdings.get(&node))
            .cloned()
            .unwrap_or_default()
    }

    pub fn family_balance_of(&self, family: Address, account: Address) -> usize {
        self.accounts
            .get(&account)
            .map_or(0, |a| a.badges.iter().filter(|b| b.family == family).count())
    }

    pub fn badges_of(&self, account: Address) -> Vec<FamilyBadge> {
        self.accounts
            .get(&account)
            .map(|a| a.badges.clone())
            .unwrap_or_default()
    }

    pub fn get_multiplier_for(&self, account: Address) -> u32 {
        self.accounts
            .get(&account)
            .and_then(|a| a.multiplier)
            .unwrap_or(BPS)
    }

    pub fn daily_reward_of(&self, account: Address) -> U256 {
        let Some(acct) = self.accounts.get(&account) else {
            return U256::ZERO;
        };
        let base: U256 = acct
            .holdings
            .iter()
            .filter_map(|(node, ids)| {
                self.node(*node)
                    .map(|n| n.daily_reward() * U256::from(ids.len()))
            })
            .fold(U256::ZERO, |acc, x| acc + x);
        base * U256::from(self.get_multiplier_for(account)) / U256::from(BPS)
    }

    pub fn accrual_of(&self, account: Address) -> AccrualState {
        self.accounts
            .get(&account)
            .map(|a| a.accrual)
            .unwrap_or_default()
    }

    pub fn claimable_reward(&self, account: Address, now: u64) -> U256 {
        let accrual = self.accrual_of(account);
        accrual.accrued_unclaimed + self.pending_since(account, accrual.last_settled_at, now)
    }

    /// Accounts that ever interacted with the registry.
    pub fn accounts(&self) -> impl Iterator<Item = Address> + '_ {
        self.accounts.keys().copied()
    }

    fn pending_since(&self, account: Address, since: u64, now: u64) -> U256 {
        let elapsed = now.saturating_sub(since);
        self.daily_reward_of(account) * U256::from(elapsed) / U256::from(SECONDS_PER_DAY)
    }

    /// Writes the outstanding accrual down under the current node set.
    fn settle(&mut self, account: Address, now: u64) {
        let accrual = self.accrual_of(account);
        let pending = self.pending_since(account, accrual.last_settled_at, now);
        let acct = self.accounts.entry(account).or_default();
        acct.accrual.accrued_unclaimed += pending;
        acct.accrual.last_settled_at = now.max(accrual.last_settled_at);
    }

    /// Balance and the allowance granted to the registry must both cover `price`.
    fn ensure_funds(&self, token: &TaxableToken, account: Address, price: U256) -> EngineResult<()> {
        let available = token
            .balance_of(account)
            .min(token.allowance(account, self.address));
        if available < price {
            return Err(EngineError::InsufficientFunds {
                account,
                needed: price,
                available,
            });
        }
        Ok(())
    }

    // ─────────────────────────────────────────────────
    // Mutations
    // ─────────────────────────────────────────────────

    pub fn purchase_node<V: LiquidityVenue + Clone>(
        &mut self,
        token: &mut TaxableToken,
        market: &mut Market<V>,
        account: Address,
        node: Address,
        now: u64,
        events: &mut Vec<Event>,
    ) -> EngineResult<u64> {
        let price = self
            .node(node)
            .ok_or(EngineError::UnknownType(node))?
            .purchase_price;
        self.purchase_node_at(token, market, account, node, price, now, events)
    }

    /// Purchase with an explicit price (board offers apply their discount here).
    #[allow(clippy::too_many_arguments)]
    pub fn purchase_node_at<V: LiquidityVenue + Clone>(
        &mut self,
        token: &mut TaxableToken,
        market: &mut Market<V>,
        account: Address,
        node: Address,
        price: U256,
        now: u64,
        events: &mut Vec<Event>,
    ) -> EngineResult<u64> {
        let idx = *self
            .node_index
            .get(&node)
            .ok_or(EngineError::UnknownType(node))?;
        self.ensure_funds(token, account, price)?;
        if !price.is_zero() {
            token.transfer_from(market, self.address, account, self.treasury, price, events)?;
        }

        self.settle(account, now);
        let token_id = self.next_token_id[idx];
        self.next_token_id[idx] += 1;
        self.accounts
            .entry(account)
            .or_default()
            .holdings
            .entry(node)
            .or_default()
            .push(token_id);

        events.push(Event::NodePurchased {
            account,
            node,
            token_id,
            price,
        });
        info!(
            "🏠 {} bought {} #{} for {} | daily={}",
            account,
            self.nodes[idx].name,
            token_id,
            price,
            self.daily_reward_of(account)
        );
        Ok(token_id)
    }

    /// Consumes one held instance of every node type of the family's colour.
    ///
    /// `node_indices[i]` picks which held instance of the i-th required type
    /// (catalog order) is burned.
    #[allow(clippy::too_many_arguments)]
    pub fn purchase_family<V: LiquidityVenue + Clone>(
        &mut self,
        token: &mut TaxableToken,
        market: &mut Market<V>,
        account: Address,
        family: Address,
        node_indices: &[usize],
        now: u64,
        events: &mut Vec<Event>,
    ) -> EngineResult<u64> {
        let fidx = *self
            .family_index
            .get(&family)
            .ok_or(EngineError::UnknownType(family))?;
        let def = self.families[fidx].clone();
        let required = self.required_nodes(&def);
        // An empty required set, or picks past its end, name no node.
        if required.is_empty() || node_indices.len() > required.len() {
            return Err(EngineError::MissingRequiredNodes {
                family,
                node: Address::ZERO,
            });
        }

        let mut picks = Vec::with_capacity(required.len());
        for (i, node) in required.iter().enumerate() {
            let held = self.balance_of(*node, account);
            match node_indices.get(i) {
                Some(&pos) if pos < held => picks.push((*node, pos)),
                _ => {
                    return Err(EngineError::MissingRequiredNodes {
                        family,
                        node: *node,
                    })
                }
            }
        }

        self.ensure_funds(token, account, def.purchase_price)?;
        if !def.purchase_price.is_zero() {
            token.transfer_from(
                market,
                self.address,
                account,
                self.treasury,
                def.purchase_price,
                events,
            )?;
        }

        self.settle(account, now);
        let badge_id = self.next_badge_id[fidx];
        self.next_badge_id[fidx] += 1;

        let acct = self.accounts.entry(account).or_default();
        for (node, pos) in picks {
            if let Some(ids) = acct.holdings.get_mut(&node) {
                ids.remove(pos);
                if ids.is_empty() {
                    acct.holdings.remove(&node);
                }
            }
        }
        acct.badges.push(FamilyBadge { family, badge_id });
        acct.multiplier = Some(def.reward_boost);

        events.push(Event::FamilyPurchased {
            account,
            family,
            badge_id,
        });
        info!(
            "👪 {} upgraded to {} #{} | multiplier={} consumed={}",
            account,
            def.name,
            badge_id,
            def.reward_boost,
            required.len()
        );
        Ok(badge_id)
    }

    /// Mints everything accrued so far. Claiming nothing is not an error.
    pub fn claim_reward(
        &mut self,
        token: &mut TaxableToken,
        account: Address,
        now: u64,
        events: &mut Vec<Event>,
    ) -> EngineResult<U256> {
        let amount = self.claimable_reward(account, now);
        if !amount.is_zero() {
            token.mint(self.address, account, amount, events)?;
        }

        let acct = self.accounts.entry(account).or_default();
        acct.accrual = AccrualState {
            last_settled_at: now.max(acct.accrual.last_settled_at),
            accrued_unclaimed: U256::ZERO,
        };

        events.push(Event::RewardClaimed { account, amount });
        info!("💰 {} claimed {}", account, amount);
        Ok(amount)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::TaxPolicy;
    use crate::venue::ConstantProductPool;
    use alloy_primitives::utils::parse_ether;

    const OWNER: Address = Address::repeat_byte(0x01);
    const TOKEN: Address = Address::repeat_byte(0x10);
    const MANAGER: Address = Address::repeat_byte(0x11);
    const PAIR: Address = Address::repeat_byte(0xAA);
    const TRADER: Address = Address::repeat_byte(0x21);

    const JEET: Address = Address::repeat_byte(0x50);
    const HONEYPOT: Address = Address::repeat_byte(0x51);
    const EXITSCAM: Address = Address::repeat_byte(0x52);
    const BROWN: Address = Address::repeat_byte(0x60);

    fn ether(s: &str) -> U256 {
        parse_ether(s).unwrap()
    }

    fn per_sec(daily: &str) -> U256 {
        ether(daily) / U256::from(SECONDS_PER_DAY)
    }

    struct Fixture {
        registry: NodeRegistry,
        token: TaxableToken,
        market: Market<ConstantProductPool>,
        events: Vec<Event>,
    }

    fn setup() -> Fixture {
        let mut registry = NodeRegistry::new(MANAGER, OWNER, OWNER);
        for (id, name, color, daily, price) in [
            (JEET, "Indian Jeet City", "Brown", "5.25", "150"),
            (HONEYPOT, "Honeypot Land", "Brown", "7", "200"),
            (EXITSCAM, "St Exitscam", "Gray", "8.75", "250"),
        ] {
            registry
                .register_node_type(
                    OWNER,
                    NodeType {
                        id,
                        name: name.into(),
                        color: color.into(),
                        reward_per_sec: per_sec(daily),
                        purchase_price: ether(price),
                    },
                )
                .unwrap();
        }
        registry
            .register_family_type(
                OWNER,
                FamilyType {
                    id: BROWN,
                    name: "Brown Family".into(),
                    color: "Brown".into(),
                    reward_boost: 12_500,
                    purchase_price: U256::ZERO,
                },
            )
            .unwrap();

        let mut token = TaxableToken::new(TOKEN, OWNER, OWNER, PAIR, TaxPolicy::default());
        let mut events = Vec::new();
        token.set_minter(OWNER, MANAGER, true).unwrap();
        token.mint(OWNER, TRADER, ether("1000"), &mut events).unwrap();
        token.approve(TRADER, MANAGER, U256::MAX, &mut events);
        events.clear();

        Fixture {
            registry,
            token,
            market: Market::new(ConstantProductPool::new(PAIR)),
            events,
        }
    }

    impl Fixture {
        fn buy(&mut self, node: Address, now: u64) -> EngineResult<u64> {
            self.registry.purchase_node(
                &mut self.token,
                &mut self.market,
                TRADER,
                node,
                now,
                &mut self.events,
            )
        }

        fn upgrade(&mut self, indices: &[usize], now: u64) -> EngineResult<u64> {
            self.registry.purchase_family(
                &mut self.token,
                &mut self.market,
                TRADER,
                BROWN,
                indices,
                now,
                &mut self.events,
            )
        }
    }

    #[test]
    fn test_purchase_node_pays_treasury() {
        let mut f = setup();
        f.buy(JEET, 1_000).unwrap();

        assert!(f.events.contains(&Event::transfer(TRADER, OWNER, ether("150"))));
        assert_eq!(f.registry.balance_of(JEET, TRADER), 1);
        assert_eq!(f.registry.get_multiplier_for(TRADER), BPS);
        assert_eq!(f.registry.daily_reward_of(TRADER), per_sec("5.25") * U256::from(86_400u64));
    }

    #[test]
    fn test_claimable_after_one_day() {
        let mut f = setup();
        f.buy(JEET, 1_000).unwrap();
        let pending = f.registry.claimable_reward(TRADER, 1_000 + 86_400);
        assert_eq!(pending, per_sec("5.25") * U256::from(86_400u64));
    }

    #[test]
    fn test_claimable_is_monotonic_between_settlements() {
        let mut f = setup();
        f.buy(JEET, 0).unwrap();
        let mut last = U256::ZERO;
        for t in (0..200_000u64).step_by(7_919) {
            let now = f.registry.claimable_reward(TRADER, t);
            assert!(now >= last);
            last = now;
        }
    }

    #[test]
    fn test_claim_mints_elapsed_reward_and_resets() {
        let mut f = setup();
        f.buy(JEET, 1_000).unwrap();
        let supply = f.token.total_supply();

        let claimed = f
            .registry
            .claim_reward(&mut f.token, TRADER, 1_000 + 86_401, &mut f.events)
            .unwrap();

        assert_eq!(claimed, per_sec("5.25") * U256::from(86_401u64));
        assert!(f.events.contains(&Event::transfer(Address::ZERO, TRADER, claimed)));
        assert_eq!(f.token.total_supply(), supply + claimed);
        assert_eq!(f.registry.claimable_reward(TRADER, 1_000 + 86_401), U256::ZERO);
    }

    #[test]
    fn test_claim_with_nothing_accrued_is_noop() {
        let mut f = setup();
        let claimed = f
            .registry
            .claim_reward(&mut f.token, TRADER, 5_000, &mut f.events)
            .unwrap();
        assert_eq!(claimed, U256::ZERO);
        assert!(!f.events.iter().any(|e| matches!(e, Event::Transfer { .. })));
    }

    #[test]
    fn test_purchase_settles_under_previous_set() {
        let mut f = setup();
        f.buy(JEET, 0).unwrap();
        f.buy(HONEYPOT, 43_200).unwrap();
        // Half a day of Jeet only, then half a day of both.
        let expected = per_sec("5.25") * U256::from(86_400u64) / U256::from(2u64)
            + (per_sec("5.25") + per_sec("7")) * U256::from(86_400u64) / U256::from(2u64);
        assert_eq!(f.registry.claimable_reward(TRADER, 86_400), expected);
    }

    #[test]
    fn test_purchase_family_consumes_nodes_and_boosts() {
        let mut f = setup();
        f.buy(JEET, 0).unwrap();
        f.buy(HONEYPOT, 0).unwrap();
        f.upgrade(&[0, 0], 10).unwrap();

        assert_eq!(f.registry.balance_of(JEET, TRADER), 0);
        assert_eq!(f.registry.balance_of(HONEYPOT, TRADER), 0);
        assert_eq!(f.registry.family_balance_of(BROWN, TRADER), 1);
        assert_eq!(f.registry.get_multiplier_for(TRADER), 12_500);
        assert_eq!(f.registry.daily_reward_of(TRADER), U256::ZERO);

        f.buy(JEET, 20).unwrap();
        assert_eq!(
            f.registry.daily_reward_of(TRADER),
            per_sec("5.25") * U256::from(86_400u64) * U256::from(12_500u64) / U256::from(10_000u64)
        );
    }

    #[test]
    fn test_upgrade_keeps_accrual_earned_before_it() {
        let mut f = setup();
        f.buy(JEET, 0).unwrap();
        f.buy(HONEYPOT, 0).unwrap();
        f.upgrade(&[0, 0], 86_400).unwrap();
        let earned = (per_sec("5.25") + per_sec("7")) * U256::from(86_400u64);
        assert_eq!(f.registry.claimable_reward(TRADER, 200_000), earned);
    }

    #[test]
    fn test_second_upgrade_without_nodes_fails() {
        let mut f = setup();
        f.buy(JEET, 0).unwrap();
        f.buy(HONEYPOT, 0).unwrap();
        f.upgrade(&[0, 0], 0).unwrap();
        let err = f.upgrade(&[0, 0], 0).unwrap_err();
        assert_eq!(
            err,
            EngineError::MissingRequiredNodes {
                family: BROWN,
                node: JEET
            }
        );
        assert_eq!(f.registry.family_balance_of(BROWN, TRADER), 1);
    }

    #[test]
    fn test_upgrade_picks_requested_instance() {
        let mut f = setup();
        f.buy(JEET, 0).unwrap();
        f.buy(JEET, 0).unwrap();
        f.buy(HONEYPOT, 0).unwrap();
        f.upgrade(&[1, 0], 0).unwrap();
        assert_eq!(f.registry.tokens_of(JEET, TRADER), vec![0]);

        let err = f.upgrade(&[5, 0], 0).unwrap_err();
        assert!(matches!(err, EngineError::MissingRequiredNodes { .. }));
    }

    #[test]
    fn test_upgrade_rejects_extra_indices() {
        let mut f = setup();
        f.buy(JEET, 0).unwrap();
        f.buy(HONEYPOT, 0).unwrap();
        f.events.clear();

        let err = f.upgrade(&[0, 0, 0], 0).unwrap_err();
        assert_eq!(
            err,
            EngineError::MissingRequiredNodes {
                family: BROWN,
                node: Address::ZERO
            }
        );
        assert_eq!(f.registry.balance_of(JEET, TRADER), 1);
        assert_eq!(f.registry.family_balance_of(BROWN, TRADER), 0);
        assert!(f.events.is_empty());
    }

    #[test]
    fn test_purchase_errors() {
        let mut f = setup();
        assert_eq!(
            f.buy(Address::repeat_byte(0x99), 0),
            Err(EngineError::UnknownType(Address::repeat_byte(0x99)))
        );

        for _ in 0..6 {
            f.buy(JEET, 0).unwrap();
        }
        // 1000 - 6 * 150 = 100 left
        let err = f.buy(HONEYPOT, 0).unwrap_err();
        assert!(matches!(err, EngineError::InsufficientFunds { .. }));
        assert_eq!(f.registry.balance_of(HONEYPOT, TRADER), 0);
    }

    #[test]
    fn test_catalog_is_append_only() {
        let mut f = setup();
        let dup = f.registry.node(JEET).unwrap().clone();
        assert_eq!(
            f.registry.register_node_type(OWNER, dup.clone()),
            Err(EngineError::DuplicateType(JEET))
        );
        assert!(matches!(
            f.registry.register_node_type(TRADER, dup),
            Err(EngineError::Unauthorized { .. })
        ));
        assert_eq!(f.registry.all_nodes().len(), 3);
    }
}
