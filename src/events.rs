//! Observable events emitted by the engine.
//!
//! Events are appended only when the operation that produced them commits.
//! External indexers (and the tests) read them to follow state transitions.

use alloy_primitives::{Address, U256};
use serde::Serialize;

// ─────────────────────────────────────────────────────────
// Case outcomes (BoardEngine → DiceRolled)
// ─────────────────────────────────────────────────────────

/// What the landed case did to the player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CaseOutcome {
    /// Landed on the start slot.
    Start,
    /// Case had no effect.
    Nothing,
    /// Board paid the player from its retained balance.
    Credited(U256),
    /// Player paid the board.
    Debited(U256),
    /// Player won a share of the board's retained balance.
    Jackpot(U256),
    /// Fresh tokens minted to the player.
    Airdropped(U256),
    /// Player may buy `node` for `price` until the next roll.
    OfferMade { node: Address, price: U256 },
}

// ─────────────────────────────────────────────────────────
// Engine events
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Event {
    /// Token movement. Mints come from and burns go to `Address::ZERO`.
    Transfer {
        from: Address,
        to: Address,
        amount: U256,
    },
    Approval {
        owner: Address,
        spender: Address,
        amount: U256,
    },
    /// Pending tax was burned, swapped and added as liquidity.
    TaxDistributed {
        burned: U256,
        swapped_base: U256,
        liquidity_added: U256,
    },
    NodePurchased {
        account: Address,
        node: Address,
        token_id: u64,
        price: U256,
    },
    FamilyPurchased {
        account: Address,
        family: Address,
        badge_id: u64,
    },
    RewardClaimed {
        account: Address,
        amount: U256,
    },
    DiceRolled {
        account: Address,
        roll: u8,
        new_position: usize,
        outcome: CaseOutcome,
    },
    OfferAccepted {
        account: Address,
        node: Address,
        price: U256,
    },
}

impl Event {
    pub fn transfer(from: Address, to: Address, amount: U256) -> Self {
        Event::Transfer { from, to, amount }
    }
}
