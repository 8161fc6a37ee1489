//! Disseminator
//!
//! Drives a [`CapabilityTable`] from the outside world: staged local changes,
//! neighbor arrivals and departures, and diffs received from neighbors. Every
//! change that has to travel is broadcast through the [`Transport`], and
//! listeners are told which representatives appeared, vanished or moved.

use super::diff::UpdateDiff;
use super::table::CapabilityTable;
use crate::message::{Message, MessageBody};
use crate::parameter::Parameter;
use crate::peer::PeerId;
use crate::transport::{MessageHandler, NeighborListener, Transport};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info, trace};

/// Table shared between the disseminator and the search engine
pub type SharedTable = Arc<RwLock<CapabilityTable>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DistanceChange {
    pub previous: u32,
    pub current: u32,
}

/// What a table mutation did, as seen by upper layers
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableChange {
    /// Neighbor whose message caused the change (the host for local changes)
    pub neighbor: PeerId,
    /// Representatives that did not exist before
    pub new_parameters: BTreeSet<Parameter>,
    /// Representatives that are gone
    pub removed_parameters: BTreeSet<Parameter>,
    /// Local parameters committed by this change
    pub local_added: BTreeSet<Parameter>,
    /// Representatives whose effective distance moved
    pub changed: BTreeMap<Parameter, DistanceChange>,
}

impl TableChange {
    pub fn is_empty(&self) -> bool {
        self.new_parameters.is_empty()
            && self.removed_parameters.is_empty()
            && self.local_added.is_empty()
            && self.changed.is_empty()
    }
}

/// Outcome of [`Disseminator::commit`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitResult {
    /// Staged additions that were applied
    pub added: BTreeSet<Parameter>,
    /// Staged removals that were applied
    pub removed: BTreeSet<Parameter>,
}

pub trait TableChangeListener: Send + Sync {
    fn table_changed(&self, change: &TableChange);
}

#[derive(Debug, Default)]
struct PendingChanges {
    add: BTreeSet<Parameter>,
    remove: BTreeSet<Parameter>,
}

pub struct Disseminator {
    table: SharedTable,
    transport: Arc<dyn Transport>,
    pending: Mutex<PendingChanges>,
    listeners: RwLock<Vec<Arc<dyn TableChangeListener>>>,
}

impl Disseminator {
    pub fn new(table: SharedTable, transport: Arc<dyn Transport>) -> Self {
        Self {
            table,
            transport,
            pending: Mutex::new(PendingChanges::default()),
            listeners: RwLock::new(Vec::new()),
        }
    }

    pub fn table(&self) -> &SharedTable {
        &self.table
    }

    pub fn add_listener(&self, listener: Arc<dyn TableChangeListener>) {
        self.listeners.write().push(listener);
    }

    /// Stage a local parameter. Cancels a staged removal of the same
    /// parameter. Returns whether anything changed.
    pub fn add_local_parameter(&self, p: Parameter) -> bool {
        let mut pending = self.pending.lock();
        pending.remove.remove(&p) || pending.add.insert(p)
    }

    /// Stage a local removal. Cancels a staged addition of the same
    /// parameter. Returns whether anything changed.
    pub fn remove_local_parameter(&self, p: Parameter) -> bool {
        let mut pending = self.pending.lock();
        pending.add.remove(&p) || pending.remove.insert(p)
    }

    /// Apply staged changes and announce them to every current neighbor
    pub fn commit(&self) -> CommitResult {
        let staged = std::mem::take(&mut *self.pending.lock());
        let result = CommitResult {
            added: staged.add,
            removed: staged.remove,
        };
        if result.added.is_empty() && result.removed.is_empty() {
            return result;
        }

        let (diff, change) = {
            let mut table = self.table.write();
            let before = snapshot(&table);

            // Additions first: a removed parameter whose group gains a new
            // local member must not be withdrawn.
            let mut diff = table.add_local(result.added.iter().cloned());
            let removal = table.remove_local(result.removed.iter().cloned());
            diff.merge(removal, table.taxonomy().as_ref());

            let mut change = compare(&before, &snapshot(&table), table.host());
            change.local_added = result.added.clone();
            (diff, change)
        };

        info!(
            added = result.added.len(),
            removed = result.removed.len(),
            "committed local parameters"
        );
        self.broadcast(diff, self.transport.neighbors());
        self.notify(&change);
        result
    }

    /// Merge a diff received from `sender` and pass on what changed
    pub fn handle_update(&self, sender: PeerId, diff: &UpdateDiff) {
        if diff.is_empty() {
            return;
        }

        let (outgoing, change) = {
            let mut table = self.table.write();
            let before = snapshot(&table);
            let outcome = table.merge(diff, sender);
            (outcome.outgoing, compare(&before, &snapshot(&table), sender))
        };

        trace!(peer = %sender, outgoing = ?outgoing, "merged table update");
        let mut destinations = self.transport.neighbors();
        destinations.remove(&sender);
        self.broadcast(outgoing, destinations);
        self.notify(&change);
    }

    /// Age every distance by one hop
    pub fn age(&self) {
        self.table.write().dec_all();
    }

    pub fn effective_distance(&self, p: &Parameter) -> u32 {
        self.table.read().effective_distance(p)
    }

    pub fn distance_from(&self, p: &Parameter, neighbor: PeerId) -> u32 {
        self.table.read().distance_from(p, neighbor)
    }

    pub fn is_local(&self, p: &Parameter) -> bool {
        self.table.read().is_local(p)
    }

    pub fn subsumes_local(&self, p: &Parameter) -> BTreeSet<Parameter> {
        self.table.read().subsumes_local(p)
    }

    pub fn local_parameters(&self) -> BTreeSet<Parameter> {
        self.table.read().local_parameters().clone()
    }

    pub fn parameters_from(&self, neighbor: PeerId) -> BTreeSet<Parameter> {
        self.table.read().parameters_from(neighbor)
    }

    fn broadcast(&self, diff: UpdateDiff, destinations: BTreeSet<PeerId>) {
        if diff.is_empty() || destinations.is_empty() {
            return;
        }
        let host = self.transport.local_id();
        self.transport.enqueue_broadcast(Message::new(
            host,
            destinations,
            MessageBody::TableUpdate(diff),
        ));
    }

    fn notify(&self, change: &TableChange) {
        if change.is_empty() {
            return;
        }
        let listeners = self.listeners.read().clone();
        for listener in listeners {
            listener.table_changed(change);
        }
    }
}

impl MessageHandler for Disseminator {
    fn handle_message(&self, message: &Message) {
        if let MessageBody::TableUpdate(diff) = &message.body {
            self.handle_update(message.sender, diff);
        }
    }
}

impl NeighborListener for Disseminator {
    fn neighbors_changed(&self, appeared: &BTreeSet<PeerId>, disappeared: &BTreeSet<PeerId>) {
        if !appeared.is_empty() {
            let bootstrap = self.table.read().new_neighbor_bootstrap();
            debug!(neighbors = ?appeared, "bootstrapping new neighbors");
            self.broadcast(bootstrap, appeared.clone());
        }

        if disappeared.is_empty() {
            return;
        }

        let (outgoing, change) = {
            let mut table = self.table.write();
            let before = snapshot(&table);
            let mut outgoing = UpdateDiff::new();
            for lost in disappeared {
                for p in table.parameters_from(*lost) {
                    let mut deletion = UpdateDiff::new();
                    deletion.set_deletion(p, *lost);
                    let outcome = table.merge(&deletion, *lost);
                    outgoing.merge(outcome.outgoing, table.taxonomy().as_ref());
                }
            }
            let host = table.host();
            (outgoing, compare(&before, &snapshot(&table), host))
        };

        debug!(neighbors = ?disappeared, "purged lost neighbors");
        let destinations: BTreeSet<PeerId> = self
            .transport
            .neighbors()
            .difference(disappeared)
            .copied()
            .collect();
        self.broadcast(outgoing, destinations);
        self.notify(&change);
    }
}

/// Representative → effective distance
fn snapshot(table: &CapabilityTable) -> BTreeMap<Parameter, u32> {
    table
        .rows()
        .map(|(p, distances)| (p.clone(), distances.effective_distance()))
        .collect()
}

fn compare(
    before: &BTreeMap<Parameter, u32>,
    after: &BTreeMap<Parameter, u32>,
    neighbor: PeerId,
) -> TableChange {
    let mut change = TableChange {
        neighbor,
        ..TableChange::default()
    };

    for (p, &previous) in before {
        match after.get(p) {
            None => {
                change.removed_parameters.insert(p.clone());
            }
            Some(&current) if current != previous => {
                change
                    .changed
                    .insert(p.clone(), DistanceChange { previous, current });
            }
            Some(_) => {}
        }
    }
    for (p, &current) in after {
        if !before.contains_key(p) {
            change.new_parameters.insert(p.clone());
            change
                .changed
                .insert(p.clone(), DistanceChange { previous: 0, current });
        }
    }
    change
}
