pub mod actor;
pub mod board;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod genesis;
pub mod nodes;
pub mod random;
pub mod token;
pub mod venue;

use alloy_primitives::{keccak256, Address, U256};
use serde::{Deserialize, Serialize};

pub use engine::Degenopoly;
pub use error::{EngineError, EngineResult};
pub use events::{CaseOutcome, Event};

// --- Fixed-point constants ---

/// Basis-point base: 10000 = 1.0x / 100%.
pub const BPS: u32 = 10_000;

pub const SECONDS_PER_DAY: u64 = 86_400;

/// `amount * bps / 10000`, floored.
pub fn apply_bps(amount: U256, bps: u32) -> U256 {
    amount * U256::from(bps) / U256::from(BPS)
}

// --- Address book ---

/// Where every participant of the game lives in the token ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressBook {
    /// Deployer / operator; owns every privileged setter.
    pub owner: Address,
    /// Receives purchase payments, fee shares and tax proceeds.
    pub treasury: Address,
    pub token: Address,
    /// The AMM pair the token trades against.
    pub pair: Address,
    pub node_manager: Address,
    pub play_board: Address,
}

impl AddressBook {
    /// Deterministic addresses derived from labels, treasury = owner as deployed.
    pub fn deterministic(owner: Address) -> Self {
        Self {
            owner,
            treasury: owner,
            token: labeled_address("degenopoly:token"),
            pair: labeled_address("degenopoly:pair"),
            node_manager: labeled_address("degenopoly:node-manager"),
            play_board: labeled_address("degenopoly:play-board"),
        }
    }
}

/// Address taken from the low 20 bytes of `keccak256(label)`.
pub fn labeled_address(label: &str) -> Address {
    let hash = keccak256(label.as_bytes());
    Address::from_slice(&hash[12..])
}
