// Receivers and dedup — who already got what
//
// SearchReceivers remembers which neighbors were handed each active search so
// re-propagation only reaches newcomers. SeenMessages drops duplicate
// (message, sender) deliveries with bounded FIFO memory.

use crate::peer::{MessageId, PeerId};
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use tracing::debug;

/// Default number of (message, sender) pairs remembered
pub const DEFAULT_SEEN_CAPACITY: usize = 10_000;

#[derive(Debug, Default)]
pub struct SearchReceivers {
    receivers: HashMap<MessageId, BTreeSet<PeerId>>,
}

impl SearchReceivers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn receivers(&self, search: &MessageId) -> BTreeSet<PeerId> {
        self.receivers.get(search).cloned().unwrap_or_default()
    }

    /// Neighbors in `neighbors` that have not been handed `search` yet
    pub fn missing(&self, search: &MessageId, neighbors: &BTreeSet<PeerId>) -> BTreeSet<PeerId> {
        match self.receivers.get(search) {
            Some(done) => neighbors.difference(done).copied().collect(),
            None => neighbors.clone(),
        }
    }

    pub fn add(&mut self, search: MessageId, neighbors: &BTreeSet<PeerId>) {
        self.receivers
            .entry(search)
            .or_default()
            .extend(neighbors.iter().copied());
    }

    /// Forget searches that are no longer active
    pub fn retain_searches(&mut self, active: &BTreeSet<MessageId>) {
        self.receivers.retain(|id, _| active.contains(id));
    }

    pub fn remove_neighbors(&mut self, lost: &BTreeSet<PeerId>) {
        for neighbors in self.receivers.values_mut() {
            neighbors.retain(|n| !lost.contains(n));
        }
    }

    pub fn len(&self) -> usize {
        self.receivers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receivers.is_empty()
    }
}

/// Bounded register of delivered (message, sender) pairs
pub struct SeenMessages {
    seen: HashSet<(MessageId, PeerId)>,
    /// Insertion order, for FIFO eviction
    order: VecDeque<(MessageId, PeerId)>,
    capacity: usize,
}

impl SeenMessages {
    pub fn new(capacity: usize) -> Self {
        Self {
            seen: HashSet::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// Record a delivery. Returns false for a duplicate.
    pub fn insert(&mut self, id: MessageId, sender: PeerId) -> bool {
        if !self.seen.insert((id, sender)) {
            return false;
        }
        self.order.push_back((id, sender));

        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        true
    }

    pub fn contains(&self, id: &MessageId, sender: PeerId) -> bool {
        self.seen.contains(&(*id, sender))
    }

    /// Forget everything delivered by `lost` neighbors
    pub fn purge_senders(&mut self, lost: &BTreeSet<PeerId>) {
        let before = self.order.len();
        self.order.retain(|(_, sender)| !lost.contains(sender));
        self.seen.retain(|(_, sender)| !lost.contains(sender));
        if self.order.len() != before {
            debug!(purged = before - self.order.len(), "purged seen messages of lost neighbors");
        }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

impl Default for SeenMessages {
    fn default() -> Self {
        Self::new(DEFAULT_SEEN_CAPACITY)
    }
}
