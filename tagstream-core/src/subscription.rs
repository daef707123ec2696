//! Tag subscription bookkeeping.
//!
//! Tracks two sets: `desired` (what the consumer asked for) and `confirmed`
//! (what the server was last told). Mutations return the wire delta; the
//! caller sends the frames and then calls [`SubscriptionRegistry::commit`].
//! On disconnect the server forgets everything, so `reset_confirmed` makes
//! the next flush send the full desired set.
//!
//! Ordered sets keep delta output deterministic, which in turn keeps the
//! frames byte-stable for a given history of calls.

use std::collections::BTreeSet;

/// Wire-facing difference between the desired and confirmed sets.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SubscriptionDelta {
    /// Tags to subscribe, sorted.
    pub to_add: Vec<String>,
    /// Tags to unsubscribe, sorted.
    pub to_remove: Vec<String>,
}

impl SubscriptionDelta {
    /// True when no frames need to be sent.
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }
}

/// Desired/confirmed tag sets with delta computation.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    desired: BTreeSet<String>,
    confirmed: BTreeSet<String>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the desired set. Returns the delta against `confirmed`;
    /// nothing is committed until [`commit`](Self::commit).
    pub fn set_desired(&mut self, tag_ids: impl IntoIterator<Item = String>) -> SubscriptionDelta {
        self.desired = tag_ids.into_iter().collect();
        self.pending_delta()
    }

    /// Add tags to the desired set.
    pub fn add(&mut self, tag_ids: &[String]) -> SubscriptionDelta {
        self.desired.extend(tag_ids.iter().cloned());
        self.pending_delta()
    }

    /// Remove tags from the desired set.
    ///
    /// Returns the wire delta plus the ids actually dropped from `desired`;
    /// the latter is what the position cache evicts, and it covers tags
    /// that were never confirmed on the wire.
    pub fn remove(&mut self, tag_ids: &[String]) -> (SubscriptionDelta, Vec<String>) {
        let mut dropped = Vec::new();
        for id in tag_ids {
            if self.desired.remove(id) {
                dropped.push(id.clone());
            }
        }
        (self.pending_delta(), dropped)
    }

    /// The outstanding delta between `desired` and `confirmed`.
    pub fn pending_delta(&self) -> SubscriptionDelta {
        SubscriptionDelta {
            to_add: self.desired.difference(&self.confirmed).cloned().collect(),
            to_remove: self.confirmed.difference(&self.desired).cloned().collect(),
        }
    }

    /// Record that the current desired set has been written to the wire.
    pub fn commit(&mut self) {
        self.confirmed = self.desired.clone();
    }

    /// Forget what the server knows. Called when the session drops.
    pub fn reset_confirmed(&mut self) {
        self.confirmed.clear();
    }

    /// Number of tags in the desired set.
    pub fn len(&self) -> usize {
        self.desired.len()
    }

    /// True when no tags are desired.
    pub fn is_empty(&self) -> bool {
        self.desired.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn first_subscribe_is_all_additions() {
        let mut reg = SubscriptionRegistry::new();
        let delta = reg.add(&ids(&["b", "a"]));
        assert_eq!(delta.to_add, ids(&["a", "b"]));
        assert!(delta.to_remove.is_empty());
    }

    #[test]
    fn identical_desired_set_is_idempotent() {
        let mut reg = SubscriptionRegistry::new();
        reg.add(&ids(&["a", "b"]));
        reg.commit();

        let delta = reg.set_desired(ids(&["a", "b"]));
        assert!(delta.is_empty());
        let delta = reg.add(&ids(&["a"]));
        assert!(delta.is_empty());
    }

    #[test]
    fn net_delta_over_three_rounds() {
        // subscribe [a, b]; unsubscribe [a]; subscribe [a, b] again:
        // beyond the first round the wire only ever needs "a" toggled.
        let mut reg = SubscriptionRegistry::new();

        let delta = reg.add(&ids(&["a", "b"]));
        assert_eq!(delta.to_add, ids(&["a", "b"]));
        reg.commit();

        let (delta, dropped) = reg.remove(&ids(&["a"]));
        assert_eq!(delta.to_remove, ids(&["a"]));
        assert!(delta.to_add.is_empty());
        assert_eq!(dropped, ids(&["a"]));
        reg.commit();

        let delta = reg.add(&ids(&["a", "b"]));
        assert_eq!(delta.to_add, ids(&["a"]));
        assert!(delta.to_remove.is_empty());
    }

    #[test]
    fn uncommitted_delta_stays_pending() {
        let mut reg = SubscriptionRegistry::new();
        reg.add(&ids(&["a"]));
        // Not committed: the send never happened.
        assert_eq!(reg.pending_delta().to_add, ids(&["a"]));
        reg.commit();
        assert!(reg.pending_delta().is_empty());
    }

    #[test]
    fn reset_confirmed_replays_everything() {
        let mut reg = SubscriptionRegistry::new();
        reg.add(&ids(&["a", "b"]));
        reg.commit();
        assert!(reg.pending_delta().is_empty());

        reg.reset_confirmed();
        let delta = reg.pending_delta();
        assert_eq!(delta.to_add, ids(&["a", "b"]));
        assert!(delta.to_remove.is_empty());
    }

    #[test]
    fn removing_an_unconfirmed_tag_sends_nothing() {
        let mut reg = SubscriptionRegistry::new();
        reg.add(&ids(&["a"]));
        // "a" was never committed; dropping it needs no wire traffic.
        let (delta, dropped) = reg.remove(&ids(&["a"]));
        assert!(delta.is_empty());
        assert_eq!(dropped, ids(&["a"]));
    }

    #[test]
    fn removing_an_unknown_tag_is_a_noop() {
        let mut reg = SubscriptionRegistry::new();
        reg.add(&ids(&["a"]));
        reg.commit();
        let (delta, dropped) = reg.remove(&ids(&["zz"]));
        assert!(delta.is_empty());
        assert!(dropped.is_empty());
        assert_eq!(reg.len(), 1);
    }
}
