use std::collections::BTreeMap;

use alloy_primitives::U256;
use serde::{Deserialize, Serialize};

use crate::ValidatorId;

/// Largest total weight of a validator set. Larger stakes are scaled down to fit.
pub const MAX_TOTAL_WEIGHT: u64 = (u32::MAX / 2) as u64;

/// A validator set: ids with weights, ordered by weight descending, then id ascending.
///
/// The position of a validator in this order is its index, used by every per-validator vector
/// of the block and epoch states.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Validators {
    ids: Vec<ValidatorId>,
    weights: Vec<u64>,
}

impl Validators {
    /// Builds a set from `(id, weight)` pairs. Zero weights are dropped; a repeated id keeps
    /// its last weight.
    pub fn from_weights(weights: impl IntoIterator<Item = (ValidatorId, u64)>) -> Self {
        let unique: BTreeMap<_, _> = weights.into_iter().collect();
        let mut pairs: Vec<_> = unique.into_iter().filter(|(_, w)| *w != 0).collect();
        pairs.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        let (ids, weights) = pairs.into_iter().unzip();
        Self { ids, weights }
    }

    /// Builds a set from stake-sized weights, scaling them down so that the total fits into
    /// [`MAX_TOTAL_WEIGHT`]. A non-zero stake never scales to zero.
    pub fn from_stakes(stakes: impl IntoIterator<Item = (ValidatorId, U256)>) -> Self {
        let stakes: Vec<_> = stakes.into_iter().filter(|(_, s)| !s.is_zero()).collect();
        let total = stakes.iter().fold(U256::ZERO, |acc, (_, s)| acc.saturating_add(*s));
        let limit = U256::from(MAX_TOTAL_WEIGHT);
        let mut shift: usize = 0;
        while (total >> shift) > limit {
            shift += 1;
        }
        Self::from_weights(stakes.into_iter().map(|(id, stake)| {
            let weight: u64 = (stake >> shift).saturating_to();
            (id, weight.max(1))
        }))
    }

    /// Number of validators.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Returns `true` if the set is empty.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Returns `true` if `id` is in the set.
    pub fn exists(&self, id: ValidatorId) -> bool {
        self.index_of(id).is_some()
    }

    /// Index of `id`.
    pub fn index_of(&self, id: ValidatorId) -> Option<usize> {
        self.ids.iter().position(|v| *v == id)
    }

    /// Id at `index`.
    pub fn id_at(&self, index: usize) -> Option<ValidatorId> {
        self.ids.get(index).copied()
    }

    /// Weight of `id`, zero for non-validators.
    pub fn weight(&self, id: ValidatorId) -> u64 {
        self.index_of(id).map_or(0, |i| self.weights[i])
    }

    /// Ids in index order.
    pub fn ids(&self) -> &[ValidatorId] {
        &self.ids
    }

    /// Ids in ascending order.
    pub fn sorted_ids(&self) -> Vec<ValidatorId> {
        let mut ids = self.ids.clone();
        ids.sort_unstable();
        ids
    }

    /// Sum of all weights.
    pub fn total_weight(&self) -> u64 {
        self.weights.iter().sum()
    }

    /// Smallest weight strictly greater than two thirds of the total.
    pub fn quorum(&self) -> u64 {
        self.total_weight() * 2 / 3 + 1
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn test_order_and_lookup() {
        let validators = Validators::from_weights([(3, 10), (1, 20), (2, 10), (4, 0)]);
        assert_eq!(validators.ids(), &[1, 2, 3]);
        assert_eq!(validators.index_of(3), Some(2));
        assert!(!validators.exists(4));
        assert_eq!(validators.weight(2), 10);
        assert_eq!(validators.total_weight(), 40);
        assert_eq!(validators.quorum(), 27);
        assert_eq!(validators.sorted_ids(), vec![1, 2, 3]);
    }

    #[test]
    fn test_stakes_are_scaled() {
        let ether = U256::from(10u64).pow(U256::from(18));
        let validators = Validators::from_stakes([
            (1, ether * U256::from(3_000_000u64)),
            (2, ether * U256::from(1_000_000u64)),
            (3, U256::from(1)),
        ]);
        assert!(validators.total_weight() <= MAX_TOTAL_WEIGHT);
        assert_eq!(validators.ids(), &[1, 2, 3]);
        assert_eq!(validators.weight(3), 1);
        let ratio = validators.weight(1) as f64 / validators.weight(2) as f64;
        assert!((ratio - 3.0).abs() < 0.001);
    }

    proptest! {
        #[test]
        fn proptest_stakes_fit_and_keep_order(
            stakes in prop::collection::btree_map(1u32..1_000, 1u128.., 1..32),
        ) {
            let validators =
                Validators::from_stakes(stakes.iter().map(|(id, stake)| (*id, U256::from(*stake))));
            prop_assert_eq!(validators.len(), stakes.len());
            prop_assert!(validators.total_weight() <= MAX_TOTAL_WEIGHT + stakes.len() as u64);
            for pair in validators.ids().windows(2) {
                prop_assert!(validators.weight(pair[0]) >= validators.weight(pair[1]));
            }
        }
    }
}
