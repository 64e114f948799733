// Keyed entity storage

//! Arena with tombstones
//!
//! Entities are stored under their natural key (interface name, BSSID,
//! station address). Unsetting an entity only marks it removed; the work
//! pass drops it once nothing refers to it anymore. Getting a removed
//! entity again revives it in place.

use std::borrow::Borrow;
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

struct Slot<V> {
    value: V,
    removed: bool,
}

pub struct Arena<K, V> {
    slots: BTreeMap<K, Slot<V>>,
}

impl<K: Ord + Clone, V> Arena<K, V> {
    pub fn new() -> Self {
        Self {
            slots: BTreeMap::new(),
        }
    }

    /// Entry for `key`, created with `f` if missing. A tombstoned entry is
    /// revived. The flag tells whether the entry was created.
    pub fn get_or_insert_with(&mut self, key: K, f: impl FnOnce() -> V) -> (&mut V, bool) {
        match self.slots.entry(key) {
            Entry::Occupied(e) => {
                let slot = e.into_mut();
                slot.removed = false;
                (&mut slot.value, false)
            }
            Entry::Vacant(e) => {
                let slot = e.insert(Slot {
                    value: f(),
                    removed: false,
                });
                (&mut slot.value, true)
            }
        }
    }

    /// Entry for `key`, removed or not
    pub fn get<Q: Ord + ?Sized>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
    {
        self.slots.get(key).map(|s| &s.value)
    }

    pub fn get_mut<Q: Ord + ?Sized>(&mut self, key: &Q) -> Option<&mut V>
    where
        K: Borrow<Q>,
    {
        self.slots.get_mut(key).map(|s| &mut s.value)
    }

    /// Entry for `key` unless it is tombstoned
    pub fn get_live<Q: Ord + ?Sized>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
    {
        self.slots.get(key).filter(|s| !s.removed).map(|s| &s.value)
    }

    pub fn contains<Q: Ord + ?Sized>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
    {
        self.slots.contains_key(key)
    }

    pub fn is_removed<Q: Ord + ?Sized>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
    {
        self.slots.get(key).is_some_and(|s| s.removed)
    }

    /// Tombstone an entry. Returns true if it was live.
    pub fn remove<Q: Ord + ?Sized>(&mut self, key: &Q) -> bool
    where
        K: Borrow<Q>,
    {
        match self.slots.get_mut(key) {
            Some(slot) if !slot.removed => {
                slot.removed = true;
                true
            }
            _ => false,
        }
    }

    /// Drop an entry for good
    pub fn reap<Q: Ord + ?Sized>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
    {
        self.slots.remove(key).map(|s| s.value)
    }

    /// Snapshot of all keys, so callers can mutate while walking
    pub fn keys(&self) -> Vec<K> {
        self.slots.keys().cloned().collect()
    }

    /// Every entry, tombstones included
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.slots.iter().map(|(k, s)| (k, &s.value))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&K, &mut V)> {
        self.slots.iter_mut().map(|(k, s)| (k, &mut s.value))
    }

    /// Entries that are not tombstoned
    pub fn live(&self) -> impl Iterator<Item = (&K, &V)> {
        self.slots
            .iter()
            .filter(|(_, s)| !s.removed)
            .map(|(k, s)| (k, &s.value))
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl<K: Ord + Clone, V> Default for Arena<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remove_tombstones_until_reaped() {
        let mut arena: Arena<String, u32> = Arena::new();
        let (v, created) = arena.get_or_insert_with("home-ap-24".to_string(), || 1);
        assert!(created);
        *v = 2;

        assert!(arena.remove("home-ap-24"));
        // Second remove is a no-op
        assert!(!arena.remove("home-ap-24"));
        assert!(arena.is_removed("home-ap-24"));
        assert_eq!(arena.get("home-ap-24"), Some(&2));
        assert_eq!(arena.get_live("home-ap-24"), None);
        assert_eq!(arena.live().count(), 0);
        assert_eq!(arena.len(), 1);

        assert_eq!(arena.reap("home-ap-24"), Some(2));
        assert!(arena.is_empty());
    }

    #[test]
    fn test_get_revives_tombstone() {
        let mut arena: Arena<u8, &str> = Arena::new();
        arena.get_or_insert_with(1, || "first");
        arena.remove(&1);

        // Existing value is kept, not rebuilt
        let (v, created) = arena.get_or_insert_with(1, || "second");
        assert!(!created);
        assert_eq!(*v, "first");
        assert!(!arena.is_removed(&1));
    }
}
