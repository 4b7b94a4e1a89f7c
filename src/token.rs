//! TaxableToken: fungible ledger with market-facing transfer tax.
//!
//! Wallet-to-wallet transfers are free. Transfers touching the pair are taxed
//! (5% buys, 20% sells); the tax is parked on the token's own address as
//! `pending_tax`. Once the owner enables swap-tax and the pending amount
//! crosses the threshold, the whole pending tax is burned / swapped / added as
//! liquidity in the same step as the transfer that tipped it over.

use std::collections::{HashMap, HashSet};

use alloy_primitives::{Address, U256};
use tracing::{debug, info};

use crate::error::{EngineError, EngineResult};
use crate::events::Event;
use crate::venue::{LiquidityVenue, Market};
use crate::apply_bps;

// ─────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────

/// Tax rates and the split of distributed tax, in basis points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaxPolicy {
    /// Applied when the pair is the sender. Default: 500 (5%).
    pub buy_tax_bps: u32,
    /// Applied when the pair is the recipient. Default: 2000 (20%).
    pub sell_tax_bps: u32,
    /// Share of distributed tax that is burned. Default: 2000.
    pub burn_bps: u32,
    /// Share swapped to base for the treasury. Default: 2000.
    /// The remainder (6000 by default) goes to liquidity.
    pub swap_bps: u32,
}

impl Default for TaxPolicy {
    fn default() -> Self {
        Self {
            buy_tax_bps: 500,
            sell_tax_bps: 2000,
            burn_bps: 2000,
            swap_bps: 2000,
        }
    }
}

/// Owner-controlled auto-distribution switch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaxSettings {
    pub swap_tax_enabled: bool,
    pub swap_tax_threshold: U256,
}

// ─────────────────────────────────────────────────────────
// Receipts
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaxDistribution {
    pub burned: U256,
    pub swapped: U256,
    pub swapped_base: U256,
    pub liquidity_tokens: U256,
    pub liquidity_added: U256,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferReceipt {
    pub delivered: U256,
    pub tax: U256,
    pub distribution: Option<TaxDistribution>,
}

/// Distribution computed against a staged copy of the market.
struct StagedDistribution<V> {
    outcome: TaxDistribution,
    market: Market<V>,
}

// ─────────────────────────────────────────────────────────
// Ledger
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct TaxableToken {
    address: Address,
    owner: Address,
    treasury: Address,
    pair: Address,
    balances: HashMap<Address, U256>,
    allowances: HashMap<(Address, Address), U256>,
    total_supply: U256,
    pending_tax: U256,
    policy: TaxPolicy,
    settings: TaxSettings,
    minters: HashSet<Address>,
    tax_exempt: HashSet<Address>,
}

impl TaxableToken {
    pub fn new(
        address: Address,
        owner: Address,
        treasury: Address,
        pair: Address,
        policy: TaxPolicy,
    ) -> Self {
        let mut minters = HashSet::new();
        minters.insert(owner);
        let mut tax_exempt = HashSet::new();
        tax_exempt.insert(address);
        tax_exempt.insert(owner);
        Self {
            address,
            owner,
            treasury,
            pair,
            balances: HashMap::new(),
            allowances: HashMap::new(),
            total_supply: U256::ZERO,
            pending_tax: U256::ZERO,
            policy,
            settings: TaxSettings::default(),
            minters,
            tax_exempt,
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn pair(&self) -> Address {
        self.pair
    }

    pub fn balance_of(&self, account: Address) -> U256 {
        self.balances.get(&account).copied().unwrap_or_default()
    }

    pub fn allowance(&self, owner: Address, spender: Address) -> U256 {
        self.allowances
            .get(&(owner, spender))
            .copied()
            .unwrap_or_default()
    }

    pub fn total_supply(&self) -> U256 {
        self.total_supply
    }

    pub fn pending_tax(&self) -> U256 {
        self.pending_tax
    }

    pub fn settings(&self) -> TaxSettings {
        self.settings
    }

    pub fn policy(&self) -> TaxPolicy {
        self.policy
    }

    pub fn is_minter(&self, account: Address) -> bool {
        self.minters.contains(&account)
    }

    /// Accounts holding a non-zero balance.
    pub fn holders(&self) -> impl Iterator<Item = (Address, U256)> + '_ {
        self.balances
            .iter()
            .filter(|(_, v)| !v.is_zero())
            .map(|(a, v)| (*a, *v))
    }

    /// Tax owed on a transfer of `amount` from `from` to `to`.
    pub fn tax_for(&self, from: Address, to: Address, amount: U256) -> U256 {
        if self.tax_exempt.contains(&from) {
            return U256::ZERO;
        }
        if to == self.pair {
            apply_bps(amount, self.policy.sell_tax_bps)
        } else if from == self.pair {
            apply_bps(amount, self.policy.buy_tax_bps)
        } else {
            U256::ZERO
        }
    }

    // ─────────────────────────────────────────────────
    // Owner controls
    // ─────────────────────────────────────────────────

    fn only_owner(&self, caller: Address, action: &'static str) -> EngineResult<()> {
        if caller != self.owner {
            return Err(EngineError::Unauthorized { caller, action });
        }
        Ok(())
    }

    pub fn set_swap_tax_settings(
        &mut self,
        caller: Address,
        enabled: bool,
        threshold: U256,
    ) -> EngineResult<()> {
        self.only_owner(caller, "set swap tax settings")?;
        self.settings = TaxSettings {
            swap_tax_enabled: enabled,
            swap_tax_threshold: threshold,
        };
        info!("🧾 Swap tax settings: enabled={} threshold={}", enabled, threshold);
        Ok(())
    }

    pub fn set_minter(&mut self, caller: Address, account: Address, allowed: bool) -> EngineResult<()> {
        self.only_owner(caller, "grant minter")?;
        if allowed {
            self.minters.insert(account);
        } else {
            self.minters.remove(&account);
        }
        Ok(())
    }

    pub fn set_tax_exempt(&mut self, caller: Address, account: Address, exempt: bool) -> EngineResult<()> {
        self.only_owner(caller, "set tax exemption")?;
        if exempt {
            self.tax_exempt.insert(account);
        } else if account != self.address {
            self.tax_exempt.remove(&account);
        }
        Ok(())
    }

    // ─────────────────────────────────────────────────
    // Supply
    // ─────────────────────────────────────────────────

    pub fn mint(
        &mut self,
        caller: Address,
        to: Address,
        amount: U256,
        events: &mut Vec<Event>,
    ) -> EngineResult<()> {
        if !self.minters.contains(&caller) {
            return Err(EngineError::Unauthorized { caller, action: "mint" });
        }
        let supply = self
            .total_supply
            .checked_add(amount)
            .ok_or(EngineError::ArithmeticOverflow)?;
        self.total_supply = supply;
        *self.balances.entry(to).or_default() += amount;
        events.push(Event::transfer(Address::ZERO, to, amount));
        Ok(())
    }

    pub fn burn(
        &mut self,
        caller: Address,
        from: Address,
        amount: U256,
        events: &mut Vec<Event>,
    ) -> EngineResult<()> {
        if !self.minters.contains(&caller) {
            return Err(EngineError::Unauthorized { caller, action: "burn" });
        }
        self.ensure_balance(from, amount)?;
        self.debit(from, amount);
        self.total_supply -= amount;
        events.push(Event::transfer(from, Address::ZERO, amount));
        Ok(())
    }

    // ─────────────────────────────────────────────────
    // Transfers
    // ─────────────────────────────────────────────────

    pub fn approve(&mut self, owner: Address, spender: Address, amount: U256, events: &mut Vec<Event>) {
        self.allowances.insert((owner, spender), amount);
        events.push(Event::Approval {
            owner,
            spender,
            amount,
        });
    }

    /// Checks that `spender` may move `amount` of `owner`'s tokens.
    pub fn ensure_allowance(&self, owner: Address, spender: Address, amount: U256) -> EngineResult<()> {
        let allowed = self.allowance(owner, spender);
        if allowed < amount {
            return Err(EngineError::InsufficientAllowance {
                owner,
                spender,
                needed: amount,
                allowed,
            });
        }
        Ok(())
    }

    pub fn ensure_balance(&self, account: Address, amount: U256) -> EngineResult<()> {
        let available = self.balance_of(account);
        if available < amount {
            return Err(EngineError::InsufficientBalance {
                account,
                needed: amount,
                available,
            });
        }
        Ok(())
    }

    pub fn transfer_from<V: LiquidityVenue + Clone>(
        &mut self,
        market: &mut Market<V>,
        spender: Address,
        from: Address,
        to: Address,
        amount: U256,
        events: &mut Vec<Event>,
    ) -> EngineResult<TransferReceipt> {
        self.ensure_allowance(from, spender, amount)?;
        let receipt = self.transfer(market, from, to, amount, events)?;
        let allowed = self.allowance(from, spender);
        if allowed != U256::MAX {
            self.allowances.insert((from, spender), allowed - amount);
        }
        Ok(receipt)
    }

    /// Moves `amount` from `from` to `to`, taxing market-facing legs.
    ///
    /// If the tax tips `pending_tax` over the threshold, the distribution is
    /// staged against a copy of `market` first; the transfer and distribution
    /// commit together or not at all.
    pub fn transfer<V: LiquidityVenue + Clone>(
        &mut self,
        market: &mut Market<V>,
        from: Address,
        to: Address,
        amount: U256,
        events: &mut Vec<Event>,
    ) -> EngineResult<TransferReceipt> {
        self.ensure_balance(from, amount)?;

        let tax = self.tax_for(from, to, amount);
        if tax.is_zero() {
            self.move_balance(from, to, amount, events);
            return Ok(TransferReceipt {
                delivered: amount,
                tax,
                distribution: None,
            });
        }

        let delivered = amount - tax;
        let pending_after = self.pending_tax + tax;
        let staged = if self.settings.swap_tax_enabled
            && pending_after >= self.settings.swap_tax_threshold
        {
            Some(self.stage_distribution(market, pending_after)?)
        } else {
            None
        };

        self.move_balance(from, self.address, tax, events);
        self.move_balance(from, to, delivered, events);
        self.pending_tax = pending_after;
        debug!(
            "taxed transfer {} → {}: amount={} tax={} pending={}",
            from, to, amount, tax, self.pending_tax
        );

        let distribution = staged.map(|staged| self.commit_distribution(staged, market, events));

        Ok(TransferReceipt {
            delivered,
            tax,
            distribution,
        })
    }

    fn stage_distribution<V: LiquidityVenue + Clone>(
        &self,
        market: &Market<V>,
        pending: U256,
    ) -> EngineResult<StagedDistribution<V>> {
        let burned = apply_bps(pending, self.policy.burn_bps);
        let swapped = apply_bps(pending, self.policy.swap_bps);
        let liquidity_tokens = pending - burned - swapped;

        let mut staged = market.clone();

        let swapped_base = swap_or_donate(&mut staged.venue, swapped)?;
        staged.base.credit(self.treasury, swapped_base);

        // Half of the liquidity share buys the base leg for the other half.
        let sold_for_base = liquidity_tokens / U256::from(2u64);
        let paired = liquidity_tokens - sold_for_base;
        let base_leg = swap_or_donate(&mut staged.venue, sold_for_base)?;
        let liquidity_added = if base_leg.is_zero() {
            staged.venue.donate(paired)?;
            U256::ZERO
        } else {
            staged.venue.add_liquidity(paired, base_leg, self.treasury)?
        };

        Ok(StagedDistribution {
            outcome: TaxDistribution {
                burned,
                swapped,
                swapped_base,
                liquidity_tokens,
                liquidity_added,
            },
            market: staged,
        })
    }

    fn commit_distribution<V>(
        &mut self,
        staged: StagedDistribution<V>,
        market: &mut Market<V>,
        events: &mut Vec<Event>,
    ) -> TaxDistribution {
        let outcome = staged.outcome;

        self.debit(self.address, outcome.burned);
        self.total_supply -= outcome.burned;
        events.push(Event::transfer(self.address, Address::ZERO, outcome.burned));

        self.move_balance(self.address, self.pair, outcome.swapped, events);
        self.move_balance(self.address, self.pair, outcome.liquidity_tokens, events);

        self.pending_tax = U256::ZERO;
        *market = staged.market;

        events.push(Event::TaxDistributed {
            burned: outcome.burned,
            swapped_base: outcome.swapped_base,
            liquidity_added: outcome.liquidity_added,
        });
        info!(
            "🔥 Tax distributed | burned={} swapped={}→{} base | liquidity={} tokens → {} LP",
            outcome.burned,
            outcome.swapped,
            outcome.swapped_base,
            outcome.liquidity_tokens,
            outcome.liquidity_added,
        );
        outcome
    }

    // Callers check balances first; these never fail.

    fn move_balance(&mut self, from: Address, to: Address, amount: U256, events: &mut Vec<Event>) {
        self.debit(from, amount);
        *self.balances.entry(to).or_default() += amount;
        events.push(Event::transfer(from, to, amount));
    }

    fn debit(&mut self, from: Address, amount: U256) {
        let balance = self.balances.entry(from).or_default();
        *balance -= amount;
    }
}

/// Swaps tokens already sent to the pair; dust worth no base is absorbed.
fn swap_or_donate<V: LiquidityVenue>(venue: &mut V, tokens: U256) -> EngineResult<U256> {
    if tokens.is_zero() {
        return Ok(U256::ZERO);
    }
    if venue.quote_swap_to_base(tokens)?.is_zero() {
        venue.donate(tokens)?;
        return Ok(U256::ZERO);
    }
    Ok(venue.swap_to_base(tokens)?)
}
