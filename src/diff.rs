//! Map diffing
//!
//! This module computes the difference between two keyed snapshots as three
//! disjoint sets: entries only in the current map, entries only in the
//! previous map, and entries present in both whose values compare unequal.
//!
//! The reconciler feeds it connection snapshots, but it is deliberately
//! generic: any hashable key and any `PartialEq` value works, and the
//! computation never touches the outside world.

use std::collections::HashMap;
use std::hash::Hash;

/// Result of diffing two snapshots
#[derive(Debug, Clone)]
pub struct Diff<K, V> {
    /// Entries present only in the current snapshot
    pub added: HashMap<K, V>,

    /// Entries present only in the previous snapshot
    pub removed: HashMap<K, V>,

    /// Entries present in both with unequal values, as (previous, current)
    pub changed: HashMap<K, (V, V)>,
}

impl<K, V> Diff<K, V> {
    /// Check whether the snapshots were identical
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }
}

impl<K, V> Default for Diff<K, V> {
    fn default() -> Self {
        Self {
            added: HashMap::new(),
            removed: HashMap::new(),
            changed: HashMap::new(),
        }
    }
}

/// Diff two snapshots keyed by `K`
///
/// A key landing in `added` or `removed` never also lands in `changed`;
/// `changed` is restricted to keys present in both maps.
pub fn diff<K, V>(current: &HashMap<K, V>, previous: &HashMap<K, V>) -> Diff<K, V>
where
    K: Eq + Hash + Clone,
    V: PartialEq + Clone,
{
    let mut result = Diff::default();

    for (key, value) in current {
        match previous.get(key) {
            None => {
                result.added.insert(key.clone(), value.clone());
            }
            Some(prev) if prev != value => {
                result
                    .changed
                    .insert(key.clone(), (prev.clone(), value.clone()));
            }
            Some(_) => {}
        }
    }

    for (key, value) in previous {
        if !current.contains_key(key) {
            result.removed.insert(key.clone(), value.clone());
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(entries: &[(&str, i32)]) -> HashMap<String, i32> {
        entries.iter().map(|(k, v)| ((*k).to_string(), *v)).collect()
    }

    #[test]
    fn test_identical_maps_produce_empty_diff() {
        let a = map(&[("r1", 1), ("r2", 2)]);
        let b = map(&[("r1", 1), ("r2", 2)]);
        let d = diff(&a, &b);
        assert!(d.is_empty());
    }

    #[test]
    fn test_added_and_removed_are_disjoint() {
        let current = map(&[("r1", 1), ("r3", 3)]);
        let previous = map(&[("r1", 1), ("r2", 2)]);
        let d = diff(&current, &previous);

        assert_eq!(d.added.len(), 1);
        assert_eq!(d.added["r3"], 3);
        assert_eq!(d.removed.len(), 1);
        assert_eq!(d.removed["r2"], 2);
        assert!(d.changed.is_empty());

        for key in d.added.keys() {
            assert!(!d.removed.contains_key(key));
            assert!(!d.changed.contains_key(key));
        }
    }

    #[test]
    fn test_changed_restricted_to_intersection() {
        let current = map(&[("r1", 10), ("r3", 3)]);
        let previous = map(&[("r1", 1), ("r2", 2)]);
        let d = diff(&current, &previous);

        assert_eq!(d.changed.len(), 1);
        assert_eq!(d.changed["r1"], (1, 10));
        assert!(!d.added.contains_key("r1"));
        assert!(!d.removed.contains_key("r1"));
    }

    #[test]
    fn test_symmetry_of_added_and_removed() {
        let a = map(&[("r1", 1), ("r2", 2)]);
        let b = map(&[("r2", 2), ("r3", 3)]);

        let forward = diff(&a, &b);
        let backward = diff(&b, &a);

        assert_eq!(forward.added.len(), backward.removed.len());
        assert_eq!(forward.removed.len(), backward.added.len());
        for key in forward.added.keys() {
            assert!(backward.removed.contains_key(key));
        }
        for key in forward.removed.keys() {
            assert!(backward.added.contains_key(key));
        }
    }

    #[test]
    fn test_empty_previous_marks_everything_added() {
        let current = map(&[("r1", 1), ("r2", 2)]);
        let previous = HashMap::new();
        let d = diff(&current, &previous);
        assert_eq!(d.added.len(), 2);
        assert!(d.removed.is_empty());
        assert!(d.changed.is_empty());
    }

    #[test]
    fn test_empty_current_marks_everything_removed() {
        let current = HashMap::new();
        let previous = map(&[("r1", 1)]);
        let d = diff(&current, &previous);
        assert!(d.added.is_empty());
        assert_eq!(d.removed.len(), 1);
    }
}
