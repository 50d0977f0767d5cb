//! Reduction of parallel correspondence arrays to a subset of their entries.

use crate::global_types::ObjectPointId;

/// Moves the entries at `sorted_indices` to the front and drops the rest.
///
/// The indices must be strictly increasing.
pub fn compact_in_place<T: Copy>(values: &mut Vec<T>, sorted_indices: &[usize]) {
    for (target, &source) in sorted_indices.iter().enumerate() {
        debug_assert!(source >= target && source < values.len());
        values[target] = values[source];
    }
    values.truncate(sorted_indices.len());
}

/// Parallel arrays, one entry per correspondence, keyed by object point id.
pub trait CorrespondenceSubset {
    fn object_point_ids(&self) -> &[ObjectPointId];

    /// Keeps the entries at `sorted_indices` in every array.
    fn compact(&mut self, sorted_indices: &[usize]);

    /// Reduces all arrays to the entries at `sorted_indices` (strictly increasing) and
    /// returns the ids of the removed entries, in their original order.
    fn apply_subset(&mut self, sorted_indices: &[usize]) -> Vec<ObjectPointId> {
        debug_assert!(sorted_indices.windows(2).all(|w| w[0] < w[1]));

        let ids = self.object_point_ids();
        debug_assert!(sorted_indices.len() <= ids.len());

        let mut complement = Vec::with_capacity(ids.len() - sorted_indices.len());
        let mut kept = sorted_indices.iter().peekable();
        for (index, id) in ids.iter().enumerate() {
            if kept.peek() == Some(&&index) {
                kept.next();
            } else {
                complement.push(*id);
            }
        }

        self.compact(sorted_indices);
        complement
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[derive(Debug, Default)]
    struct Arrays {
        ids: Vec<ObjectPointId>,
        values: Vec<f64>,
    }

    impl CorrespondenceSubset for Arrays {
        fn object_point_ids(&self) -> &[ObjectPointId] {
            &self.ids
        }

        fn compact(&mut self, sorted_indices: &[usize]) {
            compact_in_place(&mut self.ids, sorted_indices);
            compact_in_place(&mut self.values, sorted_indices);
        }
    }

    #[test]
    fn test_partition_law() {
        let ids: Vec<ObjectPointId> = vec![40, 7, 13, 99, 2, 58, 61];
        for kept in [vec![], vec![0], vec![1, 3, 4], vec![0, 2, 6], vec![6]] {
            let mut arrays = Arrays {
                ids: ids.clone(),
                values: ids.iter().map(|id| *id as f64 * 0.5).collect(),
            };
            let complement = arrays.apply_subset(&kept);

            let kept_ids: HashSet<ObjectPointId> = arrays.ids.iter().copied().collect();
            let complement_ids: HashSet<ObjectPointId> = complement.iter().copied().collect();
            let all: HashSet<ObjectPointId> = ids.iter().copied().collect();

            assert!(kept_ids.is_disjoint(&complement_ids));
            assert_eq!(&kept_ids | &complement_ids, all);
            assert_eq!(arrays.ids, kept.iter().map(|i| ids[*i]).collect::<Vec<_>>());
            assert!(arrays
                .ids
                .iter()
                .zip(arrays.values.iter())
                .all(|(id, value)| *value == *id as f64 * 0.5));
        }
    }

    #[test]
    fn test_full_subset_is_noop() {
        let mut arrays = Arrays {
            ids: vec![5, 6, 7],
            values: vec![0.5, 0.6, 0.7],
        };
        let complement = arrays.apply_subset(&[0, 1, 2]);
        assert!(complement.is_empty());
        assert_eq!(arrays.ids, vec![5, 6, 7]);
        assert_eq!(arrays.values, vec![0.5, 0.6, 0.7]);
    }
}
