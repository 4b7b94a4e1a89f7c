//! Error taxonomy shared by every engine component.
//!
//! Errors are synchronous and local to the call that raised them. Nothing in
//! the engine retries; a failed operation leaves no state behind.

use alloy_primitives::{Address, U256};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("insufficient balance for {account}: needed {needed}, available {available}")]
    InsufficientBalance {
        account: Address,
        needed: U256,
        available: U256,
    },

    #[error("insufficient allowance from {owner} to {spender}: needed {needed}, allowed {allowed}")]
    InsufficientAllowance {
        owner: Address,
        spender: Address,
        needed: U256,
        allowed: U256,
    },

    /// Purchase or fee payment the account cannot cover.
    #[error("insufficient funds for {account}: needed {needed}, available {available}")]
    InsufficientFunds {
        account: Address,
        needed: U256,
        available: U256,
    },

    #[error("{caller} is not allowed to {action}")]
    Unauthorized { caller: Address, action: &'static str },

    #[error("type {0} is already registered")]
    DuplicateType(Address),

    #[error("type {0} is not registered")]
    UnknownType(Address),

    #[error("family {family} requires node {node} which is not held")]
    MissingRequiredNodes { family: Address, node: Address },

    #[error("external collaborator failed: {0}")]
    ExternalCollaboratorFailure(String),

    #[error("dice roll {0} is outside 1..=6")]
    InvalidRoll(u8),

    #[error("case {index} is invalid: {reason}")]
    InvalidCase { index: usize, reason: String },

    #[error("{0} is already configured")]
    AlreadyConfigured(&'static str),

    #[error("play board has no cases")]
    BoardNotConfigured,

    #[error("{0} has no pending node offer")]
    NoPendingOffer(Address),

    #[error("arithmetic overflow")]
    ArithmeticOverflow,

    #[error("engine actor has stopped")]
    EngineStopped,
}

/// Failures reported by a liquidity venue.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VenueError {
    #[error("pool has no liquidity")]
    EmptyReserves,

    #[error("insufficient output amount")]
    InsufficientOutput,

    #[error("venue unavailable: {0}")]
    Unavailable(String),
}

impl From<VenueError> for EngineError {
    fn from(err: VenueError) -> Self {
        EngineError::ExternalCollaboratorFailure(err.to_string())
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
