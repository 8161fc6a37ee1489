//! Update diffs exchanged between neighbors
//!
//! A diff carries additions (parameter → announced distance and origin) and
//! deletions (parameter → origin whose entry must go). Receivers apply the
//! deletion of a parameter before its addition.

use super::distance::DistanceEntry;
use crate::parameter::Parameter;
use crate::peer::PeerId;
use crate::taxonomy::Taxonomy;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateDiff {
    additions: BTreeMap<Parameter, DistanceEntry>,
    deletions: BTreeMap<Parameter, DistanceEntry>,
}

impl UpdateDiff {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.additions.is_empty() && self.deletions.is_empty()
    }

    pub fn set_addition(&mut self, p: Parameter, distance: u32, origin: PeerId) {
        self.additions.insert(p, DistanceEntry::new(distance, origin));
    }

    pub fn set_deletion(&mut self, p: Parameter, origin: PeerId) {
        self.deletions.insert(p, DistanceEntry::new(0, origin));
    }

    /// Drop anything pending for `p`
    pub fn remove_parameter(&mut self, p: &Parameter) {
        self.additions.remove(p);
        self.deletions.remove(p);
    }

    pub fn addition(&self, p: &Parameter) -> Option<&DistanceEntry> {
        self.additions.get(p)
    }

    pub fn deletion(&self, p: &Parameter) -> Option<&DistanceEntry> {
        self.deletions.get(p)
    }

    pub fn additions(&self) -> impl Iterator<Item = (&Parameter, &DistanceEntry)> {
        self.additions.iter()
    }

    pub fn deletions(&self) -> impl Iterator<Item = (&Parameter, &DistanceEntry)> {
        self.deletions.iter()
    }

    /// Every parameter mentioned by the diff
    pub fn parameters(&self) -> BTreeSet<Parameter> {
        self.additions
            .keys()
            .chain(self.deletions.keys())
            .cloned()
            .collect()
    }

    /// Plain per-key overwrite with the entries of `other`
    pub(crate) fn absorb(&mut self, other: UpdateDiff) {
        self.additions.extend(other.additions);
        self.deletions.extend(other.deletions);
    }

    /// Fold a later diff into this one.
    ///
    /// Deletions in `later` cancel additions pending here for the same key.
    /// An addition in `later` for a key already present keeps the larger
    /// distance. An addition related (same polarity, taxonomically related) to
    /// pending additions is absorbed into them: the more general key survives
    /// and carries the larger distance of the pair.
    pub fn merge(&mut self, later: UpdateDiff, taxonomy: &dyn Taxonomy) {
        for p in later.deletions.keys() {
            self.additions.remove(p);
        }
        self.deletions.extend(later.deletions);

        for (incoming, entry) in later.additions {
            if let Some(current) = self.additions.get_mut(&incoming) {
                if entry.distance > current.distance {
                    *current = entry;
                }
                continue;
            }

            let related: Vec<Parameter> = self
                .additions
                .keys()
                .filter(|k| taxonomy.related_parameters(&incoming, k))
                .cloned()
                .collect();

            if related.is_empty() {
                self.additions.insert(incoming, entry);
                continue;
            }

            for key in related {
                let Some(current) = self.additions.get(&key).copied() else {
                    continue;
                };
                let best = larger(current, entry);
                if taxonomy.subsumes(incoming.concept(), key.concept()) {
                    self.additions.remove(&key);
                    let slot = self.additions.entry(incoming.clone()).or_insert(best);
                    *slot = larger(*slot, best);
                } else {
                    self.additions.insert(key, best);
                }
            }
        }
    }
}

/// The entry with the larger distance, preferring `current` on ties
fn larger(current: DistanceEntry, candidate: DistanceEntry) -> DistanceEntry {
    if candidate.distance > current.distance {
        candidate
    } else {
        current
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::taxonomy::BasicTaxonomy;

    fn peer(n: u32) -> PeerId {
        PeerId(n)
    }

    fn param(s: &str) -> Parameter {
        s.parse().unwrap()
    }

    /// Z → {A, C}, A → B
    fn taxonomy() -> BasicTaxonomy {
        let mut t = BasicTaxonomy::with_root("Z");
        t.add_child("Z", "A").unwrap();
        t.add_child("Z", "C").unwrap();
        t.add_child("A", "B").unwrap();
        t
    }

    fn base() -> UpdateDiff {
        let mut diff = UpdateDiff::new();
        diff.set_addition(param("I-A"), 5, peer(0));
        diff
    }

    fn single(p: &str, distance: u32) -> UpdateDiff {
        let mut diff = UpdateDiff::new();
        diff.set_addition(param(p), distance, peer(1));
        diff
    }

    #[test]
    fn test_empty_and_remove_parameter() {
        let mut diff = UpdateDiff::new();
        assert!(diff.is_empty());

        diff.set_addition(param("I-A"), 3, peer(1));
        diff.set_deletion(param("I-A"), peer(1));
        assert_eq!(diff.parameters().len(), 1);
        assert_eq!(diff.deletion(&param("I-A")).unwrap().distance, 0);

        diff.remove_parameter(&param("I-A"));
        assert!(diff.is_empty());
    }

    #[test]
    fn test_merge_same_key_keeps_larger() {
        let t = taxonomy();

        let mut diff = base();
        diff.merge(single("I-A", 3), &t);
        assert_eq!(diff.addition(&param("I-A")).unwrap().distance, 5);

        let mut diff = base();
        diff.merge(single("I-A", 7), &t);
        assert_eq!(diff.addition(&param("I-A")).unwrap().distance, 7);
    }

    #[test]
    fn test_merge_unrelated_keeps_both() {
        let t = taxonomy();
        for distance in [3, 7] {
            let mut diff = base();
            diff.merge(single("I-C", distance), &t);
            assert_eq!(diff.addition(&param("I-A")).unwrap().distance, 5);
            assert_eq!(diff.addition(&param("I-C")).unwrap().distance, distance);
        }
    }

    #[test]
    fn test_merge_more_specific_is_absorbed() {
        let t = taxonomy();

        let mut diff = base();
        diff.merge(single("I-B", 3), &t);
        assert_eq!(diff.addition(&param("I-A")).unwrap().distance, 5);
        assert!(diff.addition(&param("I-B")).is_none());

        let mut diff = base();
        diff.merge(single("I-B", 7), &t);
        assert_eq!(diff.addition(&param("I-A")).unwrap().distance, 7);
        assert!(diff.addition(&param("I-B")).is_none());
    }

    #[test]
    fn test_merge_more_general_replaces_key() {
        let t = taxonomy();

        let mut diff = base();
        diff.merge(single("I-Z", 3), &t);
        assert_eq!(diff.addition(&param("I-Z")).unwrap().distance, 5);
        assert!(diff.addition(&param("I-A")).is_none());

        let mut diff = base();
        diff.merge(single("I-Z", 7), &t);
        assert_eq!(diff.addition(&param("I-Z")).unwrap().distance, 7);
        assert!(diff.addition(&param("I-A")).is_none());
    }

    #[test]
    fn test_merge_polarity_keeps_keys_apart() {
        let t = taxonomy();
        let mut diff = base();
        diff.merge(single("O-B", 7), &t);
        assert_eq!(diff.addition(&param("I-A")).unwrap().distance, 5);
        assert_eq!(diff.addition(&param("O-B")).unwrap().distance, 7);
    }

    #[test]
    fn test_merge_deletion_cancels_pending_addition() {
        let t = taxonomy();
        let mut diff = base();

        let mut later = UpdateDiff::new();
        later.set_deletion(param("I-A"), peer(0));
        diff.merge(later, &t);

        assert!(diff.addition(&param("I-A")).is_none());
        assert!(diff.deletion(&param("I-A")).is_some());
    }

    #[test]
    fn test_merge_addition_after_deletion_keeps_both() {
        let t = taxonomy();
        let mut diff = UpdateDiff::new();
        diff.set_deletion(param("I-A"), peer(0));

        diff.merge(single("I-A", 2), &t);
        assert!(diff.deletion(&param("I-A")).is_some());
        assert_eq!(diff.addition(&param("I-A")).unwrap().distance, 2);
    }
}
