//! Deterministic seeded ordering of item ids.
//!
//! Every call builds its own `StdRng` from the seed, so concurrent resolutions
//! never share generator state.

use std::collections::BTreeSet;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Seeds are kept below 2^53 so JavaScript clients compare them exactly.
const SEED_MASK: u64 = (1 << 53) - 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShuffleSeed(pub u64);

impl ShuffleSeed {
    pub fn random() -> Self {
        Self(rand::random::<u64>() & SEED_MASK)
    }

    /// A fresh seed guaranteed to differ from `self`.
    pub fn regenerate(self) -> Self {
        loop {
            let next = Self::random();
            if next != self {
                return next;
            }
        }
    }
}

impl Default for ShuffleSeed {
    fn default() -> Self {
        Self::random()
    }
}

impl std::fmt::Display for ShuffleSeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Fisher–Yates over a slice, driven by a generator seeded from `seed`.
pub fn shuffle<T>(items: &mut [T], seed: ShuffleSeed) {
    let mut rng = StdRng::seed_from_u64(seed.0);
    for i in (1..items.len()).rev() {
        let j = rng.gen_range(0..=i);
        items.swap(i, j);
    }
}

/// Order a set of ids. Input order and duplicates do not affect the result.
pub fn shuffled_ids<I, S>(ids: I, seed: ShuffleSeed) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let unique: BTreeSet<String> = ids.into_iter().map(Into::into).collect();
    let mut ordered: Vec<String> = unique.into_iter().collect();
    shuffle(&mut ordered, seed);
    ordered
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("item-{:02}", i)).collect()
    }

    #[test]
    fn same_seed_same_order() {
        let seed = ShuffleSeed(42);
        assert_eq!(shuffled_ids(ids(20), seed), shuffled_ids(ids(20), seed));
    }

    #[test]
    fn input_order_is_irrelevant() {
        let seed = ShuffleSeed(7);
        let mut reversed = ids(12);
        reversed.reverse();
        assert_eq!(shuffled_ids(ids(12), seed), shuffled_ids(reversed, seed));
    }

    #[test]
    fn output_is_a_permutation() {
        for n in [0, 1, 2, 5, 33] {
            for k in 0..25u64 {
                let out = shuffled_ids(ids(n), ShuffleSeed(k));
                let mut sorted = out.clone();
                sorted.sort();
                assert_eq!(sorted, ids(n), "n={} seed={}", n, k);
            }
        }
    }

    #[test]
    fn duplicates_collapse() {
        let out = shuffled_ids(["b", "a", "b", "c", "a"], ShuffleSeed(3));
        assert_eq!(out.len(), 3);
    }

    #[test]
    fn different_seeds_reorder() {
        let baseline = shuffled_ids(ids(10), ShuffleSeed(0));
        let differs = (1..20u64).any(|k| shuffled_ids(ids(10), ShuffleSeed(k)) != baseline);
        assert!(differs);
    }

    #[test]
    fn regenerate_always_changes() {
        let seed = ShuffleSeed::random();
        for _ in 0..100 {
            let next = seed.regenerate();
            assert_ne!(next, seed);
            assert!(next.0 <= SEED_MASK);
        }
    }
}
