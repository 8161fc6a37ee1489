//! Capability table
//!
//! Per-node distance-vector store. Every row is a taxonomy group with the
//! distances reported for it. Local additions and removals, and diffs merged
//! from neighbors, produce the diff that has to travel further.
//!
//! Announcements follow two rules:
//! - nothing is announced at an effective distance of 1 or less, since it
//!   would be useless one hop later
//! - a parameter whose row did not change is never re-announced

use super::diff::UpdateDiff;
use super::distance::{DistanceEntry, DistanceList};
use super::group::CapabilityGroup;
use crate::parameter::Parameter;
use crate::peer::PeerId;
use crate::taxonomy::Taxonomy;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace};

/// Default maximum dissemination distance
pub const DEFAULT_MAX_DISTANCE: u32 = 5;

#[derive(Debug, Clone)]
struct GroupRow {
    group: CapabilityGroup,
    distances: DistanceList,
}

/// Result of merging a neighbor's diff
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    /// What has to be forwarded to the other neighbors
    pub outgoing: UpdateDiff,
    /// Representatives whose rows changed without shrinking
    pub changed: BTreeSet<Parameter>,
}

pub struct CapabilityTable {
    host: PeerId,
    max_distance: u32,
    taxonomy: Arc<dyn Taxonomy>,
    rows: Vec<GroupRow>,
    local: BTreeSet<Parameter>,
}

impl CapabilityTable {
    pub fn new(host: PeerId, max_distance: u32, taxonomy: Arc<dyn Taxonomy>) -> Self {
        Self {
            host,
            max_distance,
            taxonomy,
            rows: Vec::new(),
            local: BTreeSet::new(),
        }
    }

    pub fn host(&self) -> PeerId {
        self.host
    }

    pub fn max_distance(&self) -> u32 {
        self.max_distance
    }

    pub fn taxonomy(&self) -> &Arc<dyn Taxonomy> {
        &self.taxonomy
    }

    /// Register local parameters at the maximum distance
    pub fn add_local<I>(&mut self, parameters: I) -> UpdateDiff
    where
        I: IntoIterator<Item = Parameter>,
    {
        let mut diff = UpdateDiff::new();
        for p in parameters {
            let entry = DistanceEntry::new(self.max_distance, self.host);
            self.insert(&p, entry, &mut diff);
            self.local.insert(p);
        }

        debug!(peer = %self.host, diff = ?diff, "added local parameters");
        diff
    }

    /// Withdraw local parameters. The local entry of a group goes away with
    /// its last local member; a remaining remote entry is announced as fallback.
    pub fn remove_local<I>(&mut self, parameters: I) -> UpdateDiff
    where
        I: IntoIterator<Item = Parameter>,
    {
        let mut diff = UpdateDiff::new();
        for p in parameters {
            if !self.local.remove(&p) {
                continue;
            }
            if self.local_group_count(&p) > 0 {
                continue;
            }
            let Some(index) = self.find(&p) else {
                continue;
            };

            let distances = &mut self.rows[index].distances;
            if distances.remove_from(self.host).is_some() {
                diff.set_deletion(p.clone(), self.host);
            }
            if let Some(fallback) = distances.effective().copied() {
                if fallback.distance > 1 {
                    diff.set_addition(p.clone(), fallback.distance, fallback.neighbor);
                }
            }
        }
        self.prune_empty();

        debug!(peer = %self.host, diff = ?diff, "removed local parameters");
        diff
    }

    /// Merge a diff received from `from`.
    ///
    /// Per parameter, the deletion (which names the neighbor whose entry must
    /// go) is applied before the addition (stored one hop further away,
    /// attributed to `from`).
    pub fn merge(&mut self, incoming: &UpdateDiff, from: PeerId) -> MergeOutcome {
        let mut outcome = MergeOutcome::default();

        for p in incoming.parameters() {
            let snapshot = self.find(&p).map(|i| self.rows[i].distances.clone());
            let mut step = UpdateDiff::new();
            let mut representative_changed = false;

            if let Some(deletion) = incoming.deletion(&p) {
                self.apply_deletion(&p, deletion.neighbor, &mut step);
            }

            if let Some(addition) = incoming.addition(&p) {
                if addition.neighbor != self.host {
                    let distance = addition.distance.saturating_sub(1).min(self.max_distance);
                    representative_changed =
                        self.insert(&p, DistanceEntry::new(distance, from), &mut step);
                }
            }

            let Some(index) = self.find(&p) else {
                outcome.outgoing.absorb(step);
                continue;
            };
            let row = &self.rows[index];
            let unchanged = snapshot.as_ref() == Some(&row.distances);

            if unchanged && !representative_changed {
                trace!(peer = %self.host, parameter = %p, "merge left row untouched");
                continue;
            }
            if row.distances.len() >= snapshot.as_ref().map_or(0, DistanceList::len) {
                outcome.changed.insert(row.group.representative().clone());
            }
            outcome.outgoing.absorb(step);
        }

        debug!(
            peer = %self.host,
            from = %from,
            outgoing = ?outcome.outgoing,
            "merged update"
        );
        outcome
    }

    /// Full snapshot for a neighbor that just appeared
    pub fn new_neighbor_bootstrap(&self) -> UpdateDiff {
        let mut diff = UpdateDiff::new();
        for row in &self.rows {
            if let Some(effective) = row.distances.effective() {
                if effective.distance > 1 {
                    diff.set_addition(
                        row.group.representative().clone(),
                        effective.distance,
                        effective.neighbor,
                    );
                }
            }
        }
        diff
    }

    pub fn effective_distance(&self, p: &Parameter) -> u32 {
        self.effective_entry(p).map(|e| e.distance).unwrap_or(0)
    }

    pub fn effective_entry(&self, p: &Parameter) -> Option<DistanceEntry> {
        self.find(p)
            .and_then(|i| self.rows[i].distances.effective().copied())
    }

    pub fn distance_from(&self, p: &Parameter, neighbor: PeerId) -> u32 {
        self.find(p)
            .map(|i| self.rows[i].distances.distance_from(neighbor))
            .unwrap_or(0)
    }

    /// Age every row by one
    pub fn dec_all(&mut self) {
        for row in &mut self.rows {
            row.distances.decrement_all();
        }
    }

    pub fn is_local(&self, p: &Parameter) -> bool {
        self.local.contains(p)
    }

    pub fn local_parameters(&self) -> &BTreeSet<Parameter> {
        &self.local
    }

    /// Local parameters that `p` subsumes
    pub fn subsumes_local(&self, p: &Parameter) -> BTreeSet<Parameter> {
        self.local
            .iter()
            .filter(|local| self.taxonomy.subsumes_parameter(p, local))
            .cloned()
            .collect()
    }

    /// Representatives of every group
    pub fn parameters(&self) -> BTreeSet<Parameter> {
        self.rows
            .iter()
            .map(|row| row.group.representative().clone())
            .collect()
    }

    /// Representatives of the groups `neighbor` has reported
    pub fn parameters_from(&self, neighbor: PeerId) -> BTreeSet<Parameter> {
        self.rows
            .iter()
            .filter(|row| row.distances.entry_from(neighbor).is_some())
            .map(|row| row.group.representative().clone())
            .collect()
    }

    /// Representative with its distance list, one per group
    pub fn rows(&self) -> impl Iterator<Item = (&Parameter, &DistanceList)> {
        self.rows
            .iter()
            .map(|row| (row.group.representative(), &row.distances))
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Store an entry without producing a diff (table restore)
    pub(crate) fn restore_entry(&mut self, p: &Parameter, entry: DistanceEntry) {
        let (index, _) = self.find_or_create(p);
        self.rows[index].distances.update(entry);
    }

    pub(crate) fn restore_local(&mut self, p: Parameter) {
        self.local.insert(p);
    }

    fn apply_deletion(&mut self, p: &Parameter, origin: PeerId, step: &mut UpdateDiff) {
        if origin == self.host {
            return;
        }
        let Some(index) = self.find(p) else {
            return;
        };

        let representative = self.rows[index].group.representative().clone();
        let Some(removed) = self.rows[index].distances.remove_from(origin) else {
            return;
        };

        let fallback = self.rows[index].distances.effective().copied();
        if self.rows[index].distances.is_empty() {
            self.rows.remove(index);
        }

        if removed.distance > 1 {
            step.set_deletion(representative.clone(), self.host);
        }
        if let Some(fallback) = fallback {
            if fallback.distance > 1 {
                step.set_addition(representative, fallback.distance, fallback.neighbor);
            }
        }
    }

    /// Insert `entry` into the group of `p`. Emits the group representative
    /// when the effective value or the representative changed, above
    /// distance 1. Returns whether the representative changed.
    fn insert(&mut self, p: &Parameter, entry: DistanceEntry, diff: &mut UpdateDiff) -> bool {
        let before = self.effective_distance(p);
        let (index, prior) = self.find_or_create(p);

        let row = &mut self.rows[index];
        row.distances.update(entry);

        let representative = row.group.representative();
        let representative_changed = prior.is_some_and(|prior| &prior != representative);

        if let Some(effective) = row.distances.effective() {
            let after = effective.distance;
            if after > 1 && (after != before || representative_changed) {
                diff.set_addition(representative.clone(), after, effective.neighbor);
            }
        }
        representative_changed
    }

    fn find(&self, p: &Parameter) -> Option<usize> {
        self.rows
            .iter()
            .position(|row| row.group.belongs(p, self.taxonomy.as_ref()))
    }

    /// Index of the group `p` joins, and its representative before joining
    /// (`None` for a new group). Groups that `p` relates to each other are
    /// folded into one.
    fn find_or_create(&mut self, p: &Parameter) -> (usize, Option<Parameter>) {
        let taxonomy = Arc::clone(&self.taxonomy);
        let matching: Vec<usize> = self
            .rows
            .iter()
            .enumerate()
            .filter(|(_, row)| row.group.belongs(p, taxonomy.as_ref()))
            .map(|(i, _)| i)
            .collect();

        let Some(&first) = matching.first() else {
            self.rows.push(GroupRow {
                group: CapabilityGroup::new(p.clone()),
                distances: DistanceList::new(),
            });
            return (self.rows.len() - 1, None);
        };

        let prior = self.rows[first].group.representative().clone();

        // later indices first so earlier ones stay valid
        for &index in matching[1..].iter().rev() {
            let absorbed = self.rows.remove(index);
            let target = &mut self.rows[first];
            target.group.add(absorbed.group.representative(), taxonomy.as_ref());
            for entry in absorbed.distances.iter() {
                if entry.distance > target.distances.distance_from(entry.neighbor) {
                    target.distances.update(*entry);
                }
            }
            trace!(
                peer = %self.host,
                absorbed = %absorbed.group.representative(),
                into = %target.group.representative(),
                "folded related groups"
            );
        }

        self.rows[first].group.add(p, taxonomy.as_ref());
        (first, Some(prior))
    }

    fn local_group_count(&self, p: &Parameter) -> usize {
        self.local
            .iter()
            .filter(|local| self.taxonomy.related_parameters(local, p))
            .count()
    }

    fn prune_empty(&mut self) {
        self.rows.retain(|row| !row.distances.is_empty());
    }
}

impl PartialEq for CapabilityTable {
    fn eq(&self, other: &Self) -> bool {
        self.rows.len() == other.rows.len()
            && self.local == other.local
            && self.rows.iter().all(|row| {
                other.rows.iter().any(|o| {
                    o.group.representative() == row.group.representative()
                        && o.distances == row.distances
                })
            })
    }
}

impl fmt::Debug for CapabilityTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapabilityTable")
            .field("host", &self.host)
            .field("max_distance", &self.max_distance)
            .field("rows", &self.rows)
            .field("local", &self.local)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::taxonomy::BasicTaxonomy;

    const MAX: u32 = DEFAULT_MAX_DISTANCE;

    fn peer(n: u32) -> PeerId {
        PeerId(n)
    }

    fn param(s: &str) -> Parameter {
        s.parse().unwrap()
    }

    fn table(host: u32) -> CapabilityTable {
        CapabilityTable::new(peer(host), MAX, Arc::new(BasicTaxonomy::new()))
    }

    fn taxonomy() -> Arc<dyn Taxonomy> {
        let mut t = BasicTaxonomy::with_root("Z");
        t.add_child("Z", "A").unwrap();
        t.add_child("A", "B").unwrap();
        t.add_child("Z", "C").unwrap();
        Arc::new(t)
    }

    #[test]
    fn test_add_local_announces_max_distance() {
        let mut t = table(0);
        let diff = t.add_local([param("I-1"), param("I-2")]);

        assert_eq!(diff.addition(&param("I-1")), Some(&DistanceEntry::new(MAX, peer(0))));
        assert_eq!(diff.addition(&param("I-2")), Some(&DistanceEntry::new(MAX, peer(0))));
        assert_eq!(t.effective_distance(&param("I-1")), MAX);
        assert!(t.is_local(&param("I-1")));

        // re-adding changes nothing
        assert!(t.add_local([param("I-1"), param("I-2")]).is_empty());
    }

    #[test]
    fn test_remove_local_emits_deletions() {
        let mut t = table(0);
        t.add_local([param("I-1"), param("I-2")]);

        let diff = t.remove_local([param("I-1"), param("I-2")]);
        assert_eq!(diff.deletion(&param("I-1")), Some(&DistanceEntry::new(0, peer(0))));
        assert_eq!(diff.deletion(&param("I-2")), Some(&DistanceEntry::new(0, peer(0))));
        assert!(diff.addition(&param("I-1")).is_none());
        assert!(t.is_empty());

        assert!(t.remove_local([param("I-1")]).is_empty());
    }

    #[test]
    fn test_remove_local_announces_fallback() {
        let mut h = table(0);
        h.add_local([param("I-A")]);

        let mut remote = UpdateDiff::new();
        remote.set_addition(param("I-A"), 3, peer(9));
        h.merge(&remote, peer(1));
        assert_eq!(h.distance_from(&param("I-A"), peer(1)), 2);

        let diff = h.remove_local([param("I-A")]);
        assert_eq!(diff.deletion(&param("I-A")), Some(&DistanceEntry::new(0, peer(0))));
        assert_eq!(diff.addition(&param("I-A")), Some(&DistanceEntry::new(2, peer(1))));
        assert_eq!(h.effective_distance(&param("I-A")), 2);
    }

    #[test]
    fn test_withdrawal_fallback_carries_stored_distance() {
        // R's entry is held at 2 (announced at 3); the fallback repeats it
        let r = peer(7);
        let mut h = table(0);
        h.add_local([param("I-A")]);
        let mut remote = UpdateDiff::new();
        remote.set_addition(param("I-A"), 3, r);
        h.merge(&remote, r);

        let diff = h.remove_local([param("I-A")]);
        assert_eq!(diff.deletion(&param("I-A")), Some(&DistanceEntry::new(0, peer(0))));
        assert_eq!(diff.addition(&param("I-A")), Some(&DistanceEntry::new(2, r)));

        // an entry held at 1 stays quiet
        let mut h = table(0);
        h.add_local([param("I-A")]);
        let mut remote = UpdateDiff::new();
        remote.set_addition(param("I-A"), 2, r);
        h.merge(&remote, r);
        assert_eq!(h.distance_from(&param("I-A"), r), 1);

        let diff = h.remove_local([param("I-A")]);
        assert!(diff.deletion(&param("I-A")).is_some());
        assert!(diff.addition(&param("I-A")).is_none());
        assert_eq!(h.effective_distance(&param("I-A")), 1);
    }

    #[test]
    fn test_remove_local_keeps_group_with_other_local_member() {
        let mut t = CapabilityTable::new(peer(0), MAX, taxonomy());
        t.add_local([param("I-A"), param("I-B")]);
        assert_eq!(t.len(), 1);

        let diff = t.remove_local([param("I-B")]);
        assert!(diff.is_empty());
        assert_eq!(t.effective_distance(&param("I-A")), MAX);
    }

    #[test]
    fn test_merge_stores_one_hop_further() {
        let mut h = table(0);
        let bootstrap = h.add_local([param("I-1")]);

        let mut n = table(1);
        let outcome = n.merge(&bootstrap, peer(0));
        assert_eq!(n.effective_distance(&param("I-1")), MAX - 1);
        assert_eq!(
            outcome.outgoing.addition(&param("I-1")),
            Some(&DistanceEntry::new(MAX - 1, peer(0)))
        );
        assert!(outcome.changed.contains(&param("I-1")));

        let again = n.merge(&bootstrap, peer(0));
        assert!(again.outgoing.is_empty());
        assert!(again.changed.is_empty());
    }

    #[test]
    fn test_merge_suppresses_distance_one() {
        let mut n = table(1);
        let mut diff = UpdateDiff::new();
        diff.set_addition(param("I-1"), 2, peer(7));

        let outcome = n.merge(&diff, peer(7));
        assert_eq!(n.effective_distance(&param("I-1")), 1);
        assert!(outcome.outgoing.is_empty());

        // not offered to new neighbors either
        assert!(n.new_neighbor_bootstrap().is_empty());
    }

    #[test]
    fn test_merge_better_route_is_announced() {
        let mut t = table(0);
        let mut first = UpdateDiff::new();
        first.set_addition(param("I-1"), 3, peer(5));
        first.set_addition(param("I-2"), 3, peer(5));
        t.merge(&first, peer(1));

        let mut second = UpdateDiff::new();
        second.set_addition(param("I-1"), 6, peer(6));
        second.set_addition(param("I-2"), 3, peer(6));
        let outcome = t.merge(&second, peer(2));

        assert_eq!(
            outcome.outgoing.addition(&param("I-1")),
            Some(&DistanceEntry::new(5, peer(2)))
        );
        // equal effective distance is not re-announced
        assert!(outcome.outgoing.addition(&param("I-2")).is_none());
        assert_eq!(t.effective_distance(&param("I-2")), 2);
    }

    #[test]
    fn test_merge_ignores_own_announcements() {
        let mut h = table(0);
        let bootstrap = h.add_local([param("I-1")]);

        let mut echo = UpdateDiff::new();
        echo.set_addition(param("I-1"), MAX - 1, peer(0));
        let outcome = h.merge(&echo, peer(1));

        assert!(outcome.outgoing.is_empty());
        assert_eq!(h.distance_from(&param("I-1"), peer(1)), 0);
        assert!(!bootstrap.is_empty());
    }

    #[test]
    fn test_merge_deletion_never_touches_local_entry() {
        let mut h = table(0);
        h.add_local([param("I-1")]);

        let mut diff = UpdateDiff::new();
        diff.set_deletion(param("I-1"), peer(0));
        let outcome = h.merge(&diff, peer(1));

        assert!(outcome.outgoing.is_empty());
        assert_eq!(h.effective_distance(&param("I-1")), MAX);
    }

    #[test]
    fn test_merge_deletion_of_unknown_is_noop() {
        let mut t = table(0);
        let mut diff = UpdateDiff::new();
        diff.set_deletion(param("I-9"), peer(3));
        let outcome = t.merge(&diff, peer(3));
        assert!(outcome.outgoing.is_empty());
        assert!(t.is_empty());
    }

    #[test]
    fn test_merge_deletion_propagates_and_falls_back() {
        let mut t = table(0);
        let mut a = UpdateDiff::new();
        a.set_addition(param("I-1"), 5, peer(9));
        t.merge(&a, peer(1));
        let mut b = UpdateDiff::new();
        b.set_addition(param("I-1"), 4, peer(8));
        t.merge(&b, peer(2));

        let mut deletion = UpdateDiff::new();
        deletion.set_deletion(param("I-1"), peer(1));
        let outcome = t.merge(&deletion, peer(1));

        assert_eq!(
            outcome.outgoing.deletion(&param("I-1")),
            Some(&DistanceEntry::new(0, peer(0)))
        );
        assert_eq!(
            outcome.outgoing.addition(&param("I-1")),
            Some(&DistanceEntry::new(3, peer(2)))
        );
        // shrinking rows are not reported as changed
        assert!(outcome.changed.is_empty());
    }

    #[test]
    fn test_merge_last_entry_drops_group() {
        let mut t = table(0);
        let mut a = UpdateDiff::new();
        a.set_addition(param("I-1"), 5, peer(9));
        t.merge(&a, peer(1));

        let mut deletion = UpdateDiff::new();
        deletion.set_deletion(param("I-1"), peer(1));
        let outcome = t.merge(&deletion, peer(1));

        assert!(t.is_empty());
        assert!(outcome.outgoing.deletion(&param("I-1")).is_some());
        assert!(outcome.outgoing.addition(&param("I-1")).is_none());
    }

    #[test]
    fn test_new_neighbor_bootstrap() {
        let mut t = table(0);
        t.add_local([param("I-1")]);
        let mut diff = UpdateDiff::new();
        diff.set_addition(param("I-2"), 2, peer(3));
        t.merge(&diff, peer(3));

        let bootstrap = t.new_neighbor_bootstrap();
        assert_eq!(
            bootstrap.addition(&param("I-1")),
            Some(&DistanceEntry::new(MAX, peer(0)))
        );
        assert!(bootstrap.addition(&param("I-2")).is_none());
        assert_eq!(bootstrap.deletions().count(), 0);
    }

    #[test]
    fn test_grouping_and_representative_change() {
        let mut t = CapabilityTable::new(peer(0), MAX, taxonomy());
        let first = t.add_local([param("I-B")]);
        assert!(first.addition(&param("I-B")).is_some());

        let second = t.add_local([param("I-A")]);
        assert_eq!(t.len(), 1);
        assert_eq!(t.parameters(), BTreeSet::from([param("I-A")]));
        assert_eq!(
            second.addition(&param("I-A")),
            Some(&DistanceEntry::new(MAX, peer(0)))
        );
        assert_eq!(t.effective_distance(&param("I-B")), MAX);
    }

    #[test]
    fn test_related_groups_are_folded() {
        let mut t = CapabilityTable::new(peer(0), MAX, taxonomy());
        t.add_local([param("I-B"), param("I-C")]);
        assert_eq!(t.len(), 2);

        t.add_local([param("I-Z")]);
        assert_eq!(t.len(), 1);
        assert_eq!(t.parameters(), BTreeSet::from([param("I-Z")]));
    }

    #[test]
    fn test_lookups_default_to_zero() {
        let t = table(0);
        assert_eq!(t.effective_distance(&param("I-1")), 0);
        assert_eq!(t.distance_from(&param("I-1"), peer(4)), 0);
        assert!(t.parameters_from(peer(4)).is_empty());
    }

    #[test]
    fn test_subsumes_local() {
        let mut t = CapabilityTable::new(peer(0), MAX, taxonomy());
        t.add_local([param("I-B"), param("I-C")]);

        assert_eq!(
            t.subsumes_local(&param("I-A")),
            BTreeSet::from([param("I-B")])
        );
        assert_eq!(t.subsumes_local(&param("I-Z")).len(), 2);
        assert!(t.subsumes_local(&param("O-Z")).is_empty());
    }

    #[test]
    fn test_dec_all() {
        let mut t = table(0);
        t.add_local([param("I-1")]);
        t.dec_all();
        assert_eq!(t.effective_distance(&param("I-1")), MAX - 1);
    }

    #[test]
    fn test_parameters_from_neighbor() {
        let mut t = table(0);
        let mut diff = UpdateDiff::new();
        diff.set_addition(param("I-1"), 4, peer(9));
        t.merge(&diff, peer(2));

        assert_eq!(t.parameters_from(peer(2)), BTreeSet::from([param("I-1")]));
        assert!(t.parameters_from(peer(3)).is_empty());
    }
}
