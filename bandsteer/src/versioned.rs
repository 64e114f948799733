// Double-buffered attribute values

//! Double-buffered attributes
//!
//! Inbound setters only stage a value; the work pass commits it and learns
//! whether the committed value changed. This keeps every mutation burst
//! coalesced into a single recomputation.

use std::fmt::Debug;

/// Result of committing a staged value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Commit {
    /// The committed value differs from the previous one
    pub changed: bool,
    /// A value is present after the commit
    pub present: bool,
}

/// A staged (`next`) and committed (`cur`) copy of an optional value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versioned<T> {
    next: Option<T>,
    cur: Option<T>,
    valid: bool,
}

impl<T> Default for Versioned<T> {
    fn default() -> Self {
        Self {
            next: None,
            cur: None,
            valid: true,
        }
    }
}

impl<T: Clone + PartialEq + Debug> Versioned<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage a value (or its absence) for the next commit
    pub fn set(&mut self, value: Option<T>) {
        self.next = value;
        self.valid = false;
    }

    /// Promote the staged value. Committing twice without a `set` in
    /// between reports no change.
    pub fn commit(&mut self, name: &str) -> Commit {
        if self.valid {
            return Commit {
                changed: false,
                present: self.cur.is_some(),
            };
        }

        self.valid = true;
        let changed = self.cur != self.next;
        if changed {
            log::debug!("Attribute {}: {:?} -> {:?}", name, self.cur, self.next);
        }
        self.cur = self.next.clone();
        Commit {
            changed,
            present: self.cur.is_some(),
        }
    }

    /// Committed value
    pub fn cur(&self) -> Option<&T> {
        self.cur.as_ref()
    }

    /// Staged value
    pub fn next(&self) -> Option<&T> {
        self.next.as_ref()
    }

    /// True when a `set` has not been committed yet
    pub fn is_dirty(&self) -> bool {
        !self.valid
    }
}

impl<T: Copy + PartialEq + Debug> Versioned<T> {
    /// Committed value by copy
    pub fn get(&self) -> Option<T> {
        self.cur
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commit_reports_change_once() {
        let mut v: Versioned<u32> = Versioned::new();

        // Nothing staged yet
        assert_eq!(v.commit("hwm"), Commit::default());

        v.set(Some(30));
        assert!(v.is_dirty());
        assert_eq!(
            v.commit("hwm"),
            Commit {
                changed: true,
                present: true
            }
        );
        assert_eq!(v.get(), Some(30));

        // Second commit without a set is a no-op
        let c = v.commit("hwm");
        assert!(!c.changed);
        assert!(c.present);
    }

    #[test]
    fn test_same_value_twice_is_not_a_change() {
        let mut v = Versioned::new();
        v.set(Some(5u8));
        assert!(v.commit("lwm").changed);

        v.set(Some(5u8));
        assert!(!v.commit("lwm").changed);
    }

    #[test]
    fn test_unset_commits_absence() {
        let mut v = Versioned::new();
        v.set(Some("wl0".to_string()));
        v.commit("vif_name");

        v.set(None);
        assert_eq!(v.next(), None);
        assert_eq!(v.cur().map(String::as_str), Some("wl0"));

        let c = v.commit("vif_name");
        assert!(c.changed);
        assert!(!c.present);
        assert_eq!(v.cur(), None);
    }

    #[test]
    fn test_staged_value_is_invisible_until_commit() {
        let mut v = Versioned::new();
        v.set(Some(1u32));
        v.commit("priority");
        v.set(Some(2u32));

        assert_eq!(v.get(), Some(1));
        assert_eq!(v.next(), Some(&2));
    }
}
