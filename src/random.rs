//! Randomness for dice rolls.
//!
//! The board only ever asks for one word of entropy per roll. A source may
//! fail (an oracle that is down); the roll is then rejected with no effect.

use alloy_primitives::U256;
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};

use crate::error::EngineResult;

pub trait RandomSource {
    fn next_random(&mut self) -> EngineResult<U256>;
}

/// Reproducible source backed by `StdRng`.
#[derive(Debug, Clone)]
pub struct SeededRandom {
    rng: StdRng,
}

impl SeededRandom {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Seeded from OS entropy.
    pub fn from_entropy() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }
}

impl RandomSource for SeededRandom {
    fn next_random(&mut self) -> EngineResult<U256> {
        let mut word = [0u8; 32];
        self.rng.fill_bytes(&mut word);
        Ok(U256::from_be_bytes(word))
    }
}

/// Replays a fixed script of words, then fails. Useful to pin rolls.
#[derive(Debug, Clone, Default)]
pub struct ScriptedRandom {
    words: std::collections::VecDeque<U256>,
}

impl ScriptedRandom {
    pub fn new(words: impl IntoIterator<Item = U256>) -> Self {
        Self {
            words: words.into_iter().collect(),
        }
    }

    /// Words producing the given dice faces (`word % 6 + 1`).
    pub fn rolls(faces: &[u8]) -> Self {
        Self::new(faces.iter().map(|f| U256::from(f.saturating_sub(1))))
    }
}

impl RandomSource for ScriptedRandom {
    fn next_random(&mut self) -> EngineResult<U256> {
        self.words.pop_front().ok_or_else(|| {
            crate::error::EngineError::ExternalCollaboratorFailure("random source exhausted".into())
        })
    }
}
