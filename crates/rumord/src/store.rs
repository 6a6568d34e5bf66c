//! Grow-only set of known values

use parking_lot::RwLock;
use rumor_core::Value;
use std::collections::HashSet;

/// Deduplicated value set; the single source of truth for reads.
///
/// Values are never removed. Every operation takes the lock once and holds
/// it only for the in-memory work, so callers can build a payload here and
/// send it afterwards without blocking other handlers.
#[derive(Debug, Default)]
pub struct ValueStore {
    values: RwLock<HashSet<Value>>,
}

impl ValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a value; returns whether it was new
    pub fn insert(&self, value: Value) -> bool {
        self.values.write().insert(value)
    }

    /// Merge a batch of values; returns how many were new
    pub fn union<I>(&self, values: I) -> usize
    where
        I: IntoIterator<Item = Value>,
    {
        let mut set = self.values.write();
        values.into_iter().filter(|v| set.insert(*v)).count()
    }

    /// Every known value, in no particular order
    pub fn snapshot(&self) -> Vec<Value> {
        self.values.read().iter().copied().collect()
    }

    /// Values held here that `other` does not contain
    pub fn missing_from(&self, other: &[Value]) -> Vec<Value> {
        let other: HashSet<Value> = other.iter().copied().collect();
        self.values
            .read()
            .iter()
            .filter(|v| !other.contains(v))
            .copied()
            .collect()
    }

    pub fn contains(&self, value: Value) -> bool {
        self.values.read().contains(&value)
    }

    pub fn len(&self) -> usize {
        self.values.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn sorted(mut values: Vec<Value>) -> Vec<Value> {
        values.sort_unstable();
        values
    }

    #[test]
    fn test_insert_is_idempotent() {
        let once = ValueStore::new();
        assert!(once.insert(7));

        let twice = ValueStore::new();
        assert!(twice.insert(7));
        assert!(!twice.insert(7));

        assert_eq!(once.snapshot(), twice.snapshot());
        assert_eq!(twice.len(), 1);
    }

    #[test]
    fn test_union_is_commutative() {
        let a = vec![1, 2, 3, 3];
        let b = vec![3, 4, -5];

        let ab = ValueStore::new();
        ab.union(a.clone());
        ab.union(b.clone());

        let ba = ValueStore::new();
        ba.union(b);
        ba.union(a);

        assert_eq!(sorted(ab.snapshot()), sorted(ba.snapshot()));
        assert_eq!(sorted(ab.snapshot()), vec![-5, 1, 2, 3, 4]);
    }

    #[test]
    fn test_union_counts_new_values() {
        let store = ValueStore::new();
        store.insert(1);
        store.insert(3);

        assert_eq!(store.union(vec![0, 1]), 1);
        assert_eq!(sorted(store.snapshot()), vec![0, 1, 3]);

        // Merging the same set again changes nothing
        assert_eq!(store.union(vec![0, 1]), 0);
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn test_missing_from() {
        let store = ValueStore::new();
        store.union(vec![1, 2, 3]);

        assert_eq!(sorted(store.missing_from(&[2, 9])), vec![1, 3]);
        assert!(store.missing_from(&[1, 2, 3, 4]).is_empty());
    }

    #[test]
    fn test_concurrent_inserts_are_not_lost() {
        let store = Arc::new(ValueStore::new());
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for v in 0..250 {
                        store.insert(t * 1000 + v);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.len(), 1000);
        assert!(store.contains(3249));
    }
}
