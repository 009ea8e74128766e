//! Reproducible, user-specific shuffling.
//!
//! A seed depends on the owning user, the caller's disambiguator and a
//! per-user sequence token. `bust` replaces the token, which invalidates every
//! seed previously handed out for that user.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;
use xxhash_rust::xxh3::xxh3_64;

/// Serializable copy of every user's sequence token.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RngSnapshot {
    /// User id to sequence token.
    pub tokens: HashMap<String, u64>,
}

/// Tracks per-user sequence tokens and derives shuffle seeds from them.
#[derive(Debug, Default)]
pub struct RngDeterminismManager {
    tokens: Mutex<HashMap<String, u64>>,
}

impl RngDeterminismManager {
    /// Manager where every user starts on token zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed for the user's current sequence and the given disambiguator.
    #[must_use]
    pub fn seed_for(&self, user_id: &str, disambiguator: &str) -> u64 {
        let token = self
            .tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(user_id)
            .copied()
            .unwrap_or(0);
        let mut material =
            Vec::with_capacity(user_id.len() + disambiguator.len() + 2 + size_of::<u64>());
        material.extend_from_slice(user_id.as_bytes());
        material.push(0);
        material.extend_from_slice(disambiguator.as_bytes());
        material.push(0);
        material.extend_from_slice(&token.to_le_bytes());
        xxh3_64(&material)
    }

    /// Start a new sequence for the user; previous seeds are never produced again.
    pub fn bust(&self, user_id: &str) {
        let mut tokens = self.tokens.lock().unwrap_or_else(PoisonError::into_inner);
        let previous = tokens.get(user_id).copied().unwrap_or(0);
        let mut rng = rand::rng();
        let mut next: u64 = rng.random();
        while next == previous {
            next = rng.random();
        }
        tokens.insert(user_id.to_owned(), next);
        debug!(user_id, "random sequence reset");
    }

    /// Deterministic permutation of `items` for `seed`.
    #[must_use]
    pub fn permute<T: Clone>(seed: u64, items: &[T]) -> Vec<T> {
        let mut shuffled = items.to_vec();
        let mut rng = StdRng::seed_from_u64(seed);
        shuffled.shuffle(&mut rng);
        shuffled
    }

    /// Copy of the current tokens for persistence.
    #[must_use]
    pub fn snapshot(&self) -> RngSnapshot {
        RngSnapshot {
            tokens: self
                .tokens
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
        }
    }

    /// Replace the current tokens with a persisted snapshot.
    pub fn restore(&self, snapshot: RngSnapshot) {
        *self.tokens.lock().unwrap_or_else(PoisonError::into_inner) = snapshot.tokens;
    }
}
