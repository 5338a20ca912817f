use std::collections::{HashMap, HashSet};

use crate::hash::{stable_hash_str, stable_hash_with};
use crate::source::Corpus;
use crate::types::ConversationId;

/// Deterministic global proposal order over conversation ids.
///
/// Ids are deduplicated and stable-sorted first, then ordered by a seeded
/// shuffle key. The result depends only on the id set and the seed, so every
/// run against the same corpus proposes conversations in the same order. The
/// shuffle key uses a fixed hash algorithm, so the order also survives
/// toolchain upgrades.
#[derive(Clone, Debug)]
pub struct GlobalOrder {
    seed: u64,
    ids: Vec<ConversationId>,
    positions: HashMap<ConversationId, usize>,
}

impl GlobalOrder {
    /// Build the order for `ids` under `seed`.
    pub fn new<I, S>(ids: I, seed: u64) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<ConversationId>,
    {
        let mut ids: Vec<ConversationId> = ids.into_iter().map(Into::into).collect();
        ids.sort();
        ids.dedup();
        ids.sort_by_cached_key(|id| (shuffle_key(id, seed), id.clone()));
        let positions = ids
            .iter()
            .enumerate()
            .map(|(idx, id)| (id.clone(), idx))
            .collect();
        Self {
            seed,
            ids,
            positions,
        }
    }

    /// Build the order for every conversation of `corpus`.
    pub fn from_corpus(corpus: &Corpus, seed: u64) -> Self {
        Self::new(corpus.conversation_ids().cloned(), seed)
    }

    /// Seed used for the shuffle.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Ordered conversation ids.
    pub fn ids(&self) -> &[ConversationId] {
        &self.ids
    }

    /// Number of ordered conversations.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// True when no conversation is ordered.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Position of `id` in the order.
    pub fn position(&self, id: &str) -> Option<usize> {
        self.positions.get(id).copied()
    }

    /// First `n` ids not contained in `excluded`, in global order.
    pub fn next_unallocated(&self, excluded: &HashSet<&str>, n: usize) -> Vec<ConversationId> {
        self.ids
            .iter()
            .filter(|id| !excluded.contains(id.as_str()))
            .take(n)
            .cloned()
            .collect()
    }

    /// Order-independent fingerprint of the id population.
    pub fn population_checksum(&self) -> u64 {
        let mut fingerprints: Vec<u64> = self.ids.iter().map(|id| fingerprint(id)).collect();
        fingerprints.sort_unstable();
        stable_hash_with(|hasher| {
            for fp in fingerprints {
                hasher.write_u64(fp);
            }
        })
    }
}

fn shuffle_key(id: &str, seed: u64) -> u64 {
    stable_hash_str(seed, id)
}

fn fingerprint(id: &str) -> u64 {
    stable_hash_with(|hasher| hasher.write_str(id))
}
