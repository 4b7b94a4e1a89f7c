//! Liquidity venue: the AMM pair the token trades against.
//!
//! The engine only needs a narrow surface from the venue (quote, swap both
//! ways, add liquidity, absorb donated tokens). `ConstantProductPool` is the UniswapV2-style
//! implementation used by the simulation and the tests; anything else that
//! honours the trait can be plugged in.

use std::collections::HashMap;

use alloy_primitives::{Address, U256};
use serde::Serialize;
use tracing::debug;

use crate::error::{EngineError, EngineResult, VenueError};

/// LP units permanently locked on the first deposit (UniswapV2 `MINIMUM_LIQUIDITY`).
pub const MINIMUM_LIQUIDITY: u64 = 1000;

// ─────────────────────────────────────────────────────────
// Venue interface
// ─────────────────────────────────────────────────────────

pub trait LiquidityVenue {
    /// Address of the pair inside the token ledger.
    fn pair(&self) -> Address;

    /// Base a swap of `token_in` would return now; zero when it rounds away.
    fn quote_swap_to_base(&self, token_in: U256) -> Result<U256, VenueError>;

    /// Tokens already delivered to the pair are swapped out for base.
    fn swap_to_base(&mut self, token_in: U256) -> Result<U256, VenueError>;

    /// Base is swapped in; returns the tokens the pair must release.
    fn swap_from_base(&mut self, base_in: U256) -> Result<U256, VenueError>;

    /// Deposits both legs and mints LP units to `to`.
    fn add_liquidity(
        &mut self,
        token_amount: U256,
        base_amount: U256,
        to: Address,
    ) -> Result<U256, VenueError>;

    /// Tokens delivered to the pair without a swap are folded into the
    /// reserves, as `sync()` does on the pair contract.
    fn donate(&mut self, token_amount: U256) -> Result<(), VenueError>;

    fn lp_balance_of(&self, account: Address) -> U256;

    /// `(token, base)` reserves.
    fn reserves(&self) -> (U256, U256);
}

// ─────────────────────────────────────────────────────────
// Constant product pool
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct ConstantProductPool {
    pub address: Address,
    pub reserve_token: U256,
    pub reserve_base: U256,
    pub total_lp: U256,
    lp_balances: HashMap<Address, U256>,
}

/// Standard xy=k output with the 0.3% fee.
pub fn get_amount_out(amount_in: U256, reserve_in: U256, reserve_out: U256) -> Option<U256> {
    if amount_in.is_zero() || reserve_in.is_zero() || reserve_out.is_zero() {
        return None;
    }
    let amount_in_with_fee = amount_in * U256::from(997u64);
    let numerator = amount_in_with_fee * reserve_out;
    let denominator = reserve_in * U256::from(1000u64) + amount_in_with_fee;
    Some(numerator / denominator)
}

impl ConstantProductPool {
    pub fn new(address: Address) -> Self {
        Self {
            address,
            reserve_token: U256::ZERO,
            reserve_base: U256::ZERO,
            total_lp: U256::ZERO,
            lp_balances: HashMap::new(),
        }
    }

    /// Tokens out for `base_in` at current reserves (router `getAmountOut`).
    pub fn token_out_for(&self, base_in: U256) -> Option<U256> {
        get_amount_out(base_in, self.reserve_base, self.reserve_token)
    }

    /// Base out for `token_in` at current reserves.
    pub fn base_out_for(&self, token_in: U256) -> Option<U256> {
        get_amount_out(token_in, self.reserve_token, self.reserve_base)
    }
}

impl LiquidityVenue for ConstantProductPool {
    fn pair(&self) -> Address {
        self.address
    }

    fn quote_swap_to_base(&self, token_in: U256) -> Result<U256, VenueError> {
        if self.reserve_token.is_zero() || self.reserve_base.is_zero() {
            return Err(VenueError::EmptyReserves);
        }
        Ok(self.base_out_for(token_in).unwrap_or_default())
    }

    fn swap_to_base(&mut self, token_in: U256) -> Result<U256, VenueError> {
        if self.reserve_token.is_zero() || self.reserve_base.is_zero() {
            return Err(VenueError::EmptyReserves);
        }
        let amount_out = self.base_out_for(token_in).ok_or(VenueError::InsufficientOutput)?;
        if amount_out.is_zero() || amount_out >= self.reserve_base {
            return Err(VenueError::InsufficientOutput);
        }
        self.reserve_token += token_in;
        self.reserve_base -= amount_out;
        debug!("pool swap token→base: {} → {}", token_in, amount_out);
        Ok(amount_out)
    }

    fn swap_from_base(&mut self, base_in: U256) -> Result<U256, VenueError> {
        if self.reserve_token.is_zero() || self.reserve_base.is_zero() {
            return Err(VenueError::EmptyReserves);
        }
        let amount_out = self.token_out_for(base_in).ok_or(VenueError::InsufficientOutput)?;
        if amount_out.is_zero() || amount_out >= self.reserve_token {
            return Err(VenueError::InsufficientOutput);
        }
        self.reserve_base += base_in;
        self.reserve_token -= amount_out;
        debug!("pool swap base→token: {} → {}", base_in, amount_out);
        Ok(amount_out)
    }

    fn add_liquidity(
        &mut self,
        token_amount: U256,
        base_amount: U256,
        to: Address,
    ) -> Result<U256, VenueError> {
        let minted = if self.total_lp.is_zero() {
            if token_amount.is_zero() || base_amount.is_zero() {
                return Err(VenueError::EmptyReserves);
            }
            let root = (token_amount * base_amount).root(2);
            let locked = U256::from(MINIMUM_LIQUIDITY);
            if root <= locked {
                return Err(VenueError::InsufficientOutput);
            }
            *self.lp_balances.entry(Address::ZERO).or_default() += locked;
            self.total_lp += locked;
            root - locked
        } else {
            // Uneven deposits donate the excess leg, as the pair contract does.
            let by_token = token_amount * self.total_lp / self.reserve_token;
            let by_base = base_amount * self.total_lp / self.reserve_base;
            by_token.min(by_base)
        };

        self.reserve_token += token_amount;
        self.reserve_base += base_amount;
        self.total_lp += minted;
        *self.lp_balances.entry(to).or_default() += minted;
        debug!(
            "pool add liquidity: token={} base={} → lp={} to {}",
            token_amount, base_amount, minted, to
        );
        Ok(minted)
    }

    fn donate(&mut self, token_amount: U256) -> Result<(), VenueError> {
        self.reserve_token += token_amount;
        debug!("pool absorbed {} donated tokens", token_amount);
        Ok(())
    }

    fn lp_balance_of(&self, account: Address) -> U256 {
        self.lp_balances.get(&account).copied().unwrap_or_default()
    }

    fn reserves(&self) -> (U256, U256) {
        (self.reserve_token, self.reserve_base)
    }
}

// ─────────────────────────────────────────────────────────
// Base asset ledger
// ─────────────────────────────────────────────────────────

/// Balances of the paired base asset (WETH in the deployed game).
#[derive(Debug, Clone, Default, Serialize)]
pub struct BaseLedger {
    balances: HashMap<Address, U256>,
}

impl BaseLedger {
    pub fn balance_of(&self, account: Address) -> U256 {
        self.balances.get(&account).copied().unwrap_or_default()
    }

    pub fn credit(&mut self, account: Address, amount: U256) {
        if amount.is_zero() {
            return;
        }
        *self.balances.entry(account).or_default() += amount;
    }

    pub fn debit(&mut self, account: Address, amount: U256) -> EngineResult<()> {
        let available = self.balance_of(account);
        if available < amount {
            return Err(EngineError::InsufficientBalance {
                account,
                needed: amount,
                available,
            });
        }
        self.balances.insert(account, available - amount);
        Ok(())
    }
}

/// The venue together with the base ledger it settles into.
///
/// Cloned to stage collaborator calls; committed only when every call succeeds.
#[derive(Debug, Clone)]
pub struct Market<V> {
    pub venue: V,
    pub base: BaseLedger,
}

impl<V: LiquidityVenue> Market<V> {
    pub fn new(venue: V) -> Self {
        Self {
            venue,
            base: BaseLedger::default(),
        }
    }

    pub fn pair(&self) -> Address {
        self.venue.pair()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::utils::parse_ether;

    fn seeded_pool() -> ConstantProductPool {
        let mut pool = ConstantProductPool::new(Address::repeat_byte(0xAA));
        pool.add_liquidity(
            parse_ether("100000").unwrap(),
            parse_ether("100").unwrap(),
            Address::repeat_byte(0x01),
        )
        .unwrap();
        pool
    }

    #[test]
    fn test_first_deposit_locks_minimum_liquidity() {
        let pool = seeded_pool();
        let provider_lp = pool.lp_balance_of(Address::repeat_byte(0x01));
        assert_eq!(pool.lp_balance_of(Address::ZERO), U256::from(MINIMUM_LIQUIDITY));
        assert_eq!(provider_lp + U256::from(MINIMUM_LIQUIDITY), pool.total_lp);
    }

    #[test]
    fn test_swap_moves_reserves_along_curve() {
        let mut pool = seeded_pool();
        let k_before = pool.reserve_token * pool.reserve_base;
        let out = pool.swap_to_base(parse_ether("50").unwrap()).unwrap();
        assert!(out > U256::ZERO);
        assert_eq!(pool.reserve_token, parse_ether("100050").unwrap());
        // Fee keeps k non-decreasing.
        assert!(pool.reserve_token * pool.reserve_base >= k_before);
    }

    #[test]
    fn test_swap_from_base_matches_router_quote() {
        let mut pool = seeded_pool();
        let expected = pool.token_out_for(parse_ether("0.1").unwrap()).unwrap();
        let out = pool.swap_from_base(parse_ether("0.1").unwrap()).unwrap();
        assert_eq!(out, expected);
    }

    #[test]
    fn test_empty_pool_rejects_swaps() {
        let mut pool = ConstantProductPool::new(Address::repeat_byte(0xAA));
        assert_eq!(pool.swap_to_base(U256::from(1u64)), Err(VenueError::EmptyReserves));
        assert_eq!(
            pool.quote_swap_to_base(U256::from(1u64)),
            Err(VenueError::EmptyReserves)
        );
    }

    #[test]
    fn test_dust_quote_rounds_to_zero() {
        let mut pool = seeded_pool();
        // 1000 wei at a 1000:1 reserve ratio is worth under one base wei.
        assert_eq!(pool.quote_swap_to_base(U256::from(1000u64)), Ok(U256::ZERO));
        assert_eq!(pool.swap_to_base(U256::from(1000u64)), Err(VenueError::InsufficientOutput));

        let before = pool.reserve_token;
        pool.donate(U256::from(1000u64)).unwrap();
        assert_eq!(pool.reserve_token, before + U256::from(1000u64));
    }

    #[test]
    fn test_one_sided_deposit_mints_nothing() {
        let mut pool = seeded_pool();
        let lp = pool
            .add_liquidity(parse_ether("6").unwrap(), U256::ZERO, Address::repeat_byte(0x02))
            .unwrap();
        assert_eq!(lp, U256::ZERO);
        assert_eq!(pool.reserve_token, parse_ether("100006").unwrap());
    }

    #[test]
    fn test_base_ledger_debit_checks_balance() {
        let mut ledger = BaseLedger::default();
        let who = Address::repeat_byte(0x03);
        ledger.credit(who, U256::from(5u64));
        assert!(ledger.debit(who, U256::from(6u64)).is_err());
        ledger.debit(who, U256::from(5u64)).unwrap();
        assert_eq!(ledger.balance_of(who), U256::ZERO);
    }
}
