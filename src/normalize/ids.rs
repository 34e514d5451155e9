//! Synthetic row identifiers
//!
//! `IdGenerator` hands out ids that never repeat within a session: each id embeds
//! a counter passed through a bijective scramble, prefixed with a per-session
//! salt. Allocation is a single atomic increment, so workers can share one
//! generator without locking. Seeding the generator makes the sequence
//! reproducible.

use crate::normalize::types::RowId;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU64, Ordering};

// odd, so multiplication is a bijection on u64
const SCRAMBLE: u64 = 0x9E37_79B9_7F4A_7C15;

const DERIVED_ID_BYTES: usize = 15;

#[derive(Debug)]
pub struct IdGenerator {
    salt: [u8; 4],
    key: u64,
    issued: AtomicU64,
}

impl IdGenerator {
    /// Generator with a random session salt
    pub fn new() -> Self {
        Self::from_rng(&mut rand::thread_rng())
    }

    /// Generator whose id sequence is fully determined by `seed`
    pub fn seeded(seed: u64) -> Self {
        Self::from_rng(&mut ChaCha8Rng::seed_from_u64(seed))
    }

    fn from_rng<R: RngCore>(rng: &mut R) -> Self {
        let mut salt = [0u8; 4];
        rng.fill_bytes(&mut salt);
        IdGenerator {
            salt,
            key: rng.next_u64(),
            issued: AtomicU64::new(0),
        }
    }

    pub fn new_id(&self) -> RowId {
        let n = self.issued.fetch_add(1, Ordering::Relaxed);
        let mixed = n.wrapping_mul(SCRAMBLE) ^ self.key;

        let mut bytes = [0u8; 12];
        bytes[..4].copy_from_slice(&self.salt);
        bytes[4..].copy_from_slice(&mixed.to_be_bytes());
        RowId(URL_SAFE_NO_PAD.encode(bytes))
    }

    /// Number of ids handed out so far
    pub fn issued(&self) -> u64 {
        self.issued.load(Ordering::Relaxed)
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        IdGenerator::new()
    }
}

/// Deterministic id of a nested row, so reloading a parent reproduces its children's ids
pub fn child_row_id(parent: &RowId, table: &str, list_idx: usize) -> RowId {
    let digest = Sha256::digest(format!("{}_{}_{}", parent.0, table, list_idx).as_bytes());
    RowId(STANDARD.encode(&digest[..DERIVED_ID_BYTES]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;

    #[test]
    fn test_seeded_is_reproducible() {
        let a = IdGenerator::seeded(42);
        let b = IdGenerator::seeded(42);
        for _ in 0..10 {
            assert_eq!(a.new_id(), b.new_id());
        }
        assert_ne!(IdGenerator::seeded(1).new_id(), IdGenerator::seeded(2).new_id());
        assert_eq!(a.issued(), 10);
    }

    #[test]
    fn test_id_shape() {
        let id = IdGenerator::new().new_id();
        assert_eq!(id.as_str().len(), 16);
        assert!(id
            .as_str()
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn test_unique_across_threads() {
        let ids = IdGenerator::seeded(7);
        let all: Vec<RowId> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..4)
                .map(|_| s.spawn(|| (0..1000).map(|_| ids.new_id()).collect::<Vec<_>>()))
                .collect();
            handles.into_iter().flat_map(|h| h.join().unwrap()).collect()
        });
        let unique: HashSet<_> = all.iter().collect();
        assert_eq!(unique.len(), 4000);
    }

    #[test]
    fn test_child_row_id() {
        let parent = RowId::new("parent");
        let a = child_row_id(&parent, "blocks__transactions", 0);
        assert_eq!(a, child_row_id(&parent, "blocks__transactions", 0));
        assert_ne!(a, child_row_id(&parent, "blocks__transactions", 1));
        assert_ne!(a, child_row_id(&parent, "blocks__uncles", 0));
        assert_eq!(a.as_str().len(), 20);
    }

    proptest! {
        #[test]
        fn ids_never_repeat(seed in any::<u64>(), count in 1usize..2000) {
            let ids = IdGenerator::seeded(seed);
            let issued: HashSet<_> = (0..count).map(|_| ids.new_id()).collect();
            prop_assert_eq!(issued.len(), count);
        }
    }
}
