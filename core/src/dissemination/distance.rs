//! Distance records
//!
//! A distance is a remaining-validity counter: sources announce the configured
//! maximum and every hop takes one away, so a higher value means closer to a
//! real provider. Each parameter group keeps one [`DistanceList`] with at most
//! one entry per reporting neighbor.

use crate::peer::PeerId;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

/// A (distance, neighbor) pair. The `optional` flag only affects list equality.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DistanceEntry {
    pub distance: u32,
    /// Neighbor the information came from (the node itself for local entries)
    pub neighbor: PeerId,
    pub optional: bool,
}

impl DistanceEntry {
    pub fn new(distance: u32, neighbor: PeerId) -> Self {
        Self {
            distance,
            neighbor,
            optional: false,
        }
    }

    pub fn optional(distance: u32, neighbor: PeerId) -> Self {
        Self {
            distance,
            neighbor,
            optional: true,
        }
    }
}

impl PartialEq for DistanceEntry {
    fn eq(&self, other: &Self) -> bool {
        self.distance == other.distance && self.neighbor == other.neighbor
    }
}

impl Eq for DistanceEntry {}

impl Hash for DistanceEntry {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.distance.hash(state);
        self.neighbor.hash(state);
    }
}

impl Ord for DistanceEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.distance, self.neighbor).cmp(&(other.distance, other.neighbor))
    }
}

impl PartialOrd for DistanceEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Entries for one parameter group, kept sorted by (distance, neighbor)
#[derive(Debug, Clone, Default)]
pub struct DistanceList {
    entries: Vec<DistanceEntry>,
}

impl DistanceList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `entry`, replacing whatever the same neighbor reported before.
    /// Returns the replaced entry. An identical entry is left untouched.
    pub fn update(&mut self, entry: DistanceEntry) -> Option<DistanceEntry> {
        if let Some(existing) = self.entries.iter().find(|e| **e == entry) {
            return Some(*existing);
        }

        let previous = self.remove_from(entry.neighbor);
        self.entries.push(entry);
        self.entries.sort();
        previous
    }

    pub fn remove_from(&mut self, neighbor: PeerId) -> Option<DistanceEntry> {
        let index = self.entries.iter().position(|e| e.neighbor == neighbor)?;
        Some(self.entries.remove(index))
    }

    /// The maximal entry
    pub fn effective(&self) -> Option<&DistanceEntry> {
        self.entries.last()
    }

    /// Effective distance, 0 when empty
    pub fn effective_distance(&self) -> u32 {
        self.effective().map(|e| e.distance).unwrap_or(0)
    }

    /// Distance reported by `neighbor`, 0 when it reported nothing
    pub fn distance_from(&self, neighbor: PeerId) -> u32 {
        self.entry_from(neighbor).map(|e| e.distance).unwrap_or(0)
    }

    pub fn entry_from(&self, neighbor: PeerId) -> Option<&DistanceEntry> {
        self.entries.iter().find(|e| e.neighbor == neighbor)
    }

    /// Age every entry by one. Distances saturate at 0.
    pub fn decrement_all(&mut self) {
        for entry in &mut self.entries {
            entry.distance = entry.distance.saturating_sub(1);
        }
        self.entries.sort();
    }

    pub fn iter(&self) -> impl Iterator<Item = &DistanceEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn contains_required_of(&self, other: &DistanceList) -> bool {
        other
            .entries
            .iter()
            .filter(|e| !e.optional)
            .all(|e| self.entries.contains(e))
    }
}

/// Equality ignores entries flagged optional
impl PartialEq for DistanceList {
    fn eq(&self, other: &Self) -> bool {
        self.contains_required_of(other) && other.contains_required_of(self)
    }
}

impl Eq for DistanceList {}
