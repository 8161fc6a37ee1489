// DiscoveryNode — one peer: capability table, disseminator and search engine
// wired to a transport
//
// The node is the handler the transport feeds. It drops frames not addressed
// to it, dispatches the rest by kind, and fans neighbor events out to the
// disseminator first so searches re-propagate over an up-to-date table.

use crate::config::NodeConfig;
use crate::dissemination::{CapabilityTable, CommitResult, Disseminator, SharedTable};
use crate::message::{Message, MessageKind, Payload, SearchKind};
use crate::parameter::Parameter;
use crate::peer::{MessageId, PeerId};
use crate::search::{ActiveSearch, NextHop, ParameterSearch, SearchListener};
use crate::store::{self, PersistError};
use crate::taxonomy::Taxonomy;
use crate::transport::{HandlerRegistry, MessageHandler, NeighborListener, Transport};
use crate::CoreError;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, trace};

pub struct DiscoveryNode {
    id: PeerId,
    table: SharedTable,
    disseminator: Arc<Disseminator>,
    search: Arc<ParameterSearch>,
    registry: RwLock<HandlerRegistry>,
}

impl DiscoveryNode {
    pub fn new(
        config: &NodeConfig,
        taxonomy: Arc<dyn Taxonomy>,
        transport: Arc<dyn Transport>,
        listener: Arc<dyn SearchListener>,
    ) -> Result<Self, CoreError> {
        let id = transport.local_id();
        let table: SharedTable = Arc::new(RwLock::new(CapabilityTable::new(
            id,
            config.max_distance(),
            taxonomy,
        )));

        let disseminator = Arc::new(Disseminator::new(table.clone(), transport.clone()));
        let search = Arc::new(ParameterSearch::new(
            table.clone(),
            transport,
            listener,
            config.max_ttl(),
            config.seen_capacity,
        ));
        disseminator.add_listener(search.clone());

        let mut registry = HandlerRegistry::new();
        for kind in MessageKind::ALL {
            let handler: Arc<dyn MessageHandler> = match kind {
                MessageKind::TableUpdate => disseminator.clone(),
                _ => search.clone(),
            };
            registry.register(kind, handler)?;
        }

        debug!(peer = %id, "discovery node ready");
        Ok(Self {
            id,
            table,
            disseminator,
            search,
            registry: RwLock::new(registry),
        })
    }

    pub fn id(&self) -> PeerId {
        self.id
    }

    pub fn table(&self) -> &SharedTable {
        &self.table
    }

    pub fn disseminator(&self) -> &Arc<Disseminator> {
        &self.disseminator
    }

    pub fn search(&self) -> &Arc<ParameterSearch> {
        &self.search
    }

    /// Claim a message kind for another handler. Every kind is taken at
    /// construction, so this only succeeds after `unregister_handler`.
    pub fn register_handler(
        &self,
        kind: MessageKind,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<(), CoreError> {
        self.registry.write().register(kind, handler)?;
        Ok(())
    }

    pub fn unregister_handler(&self, kind: MessageKind) -> Option<Arc<dyn MessageHandler>> {
        self.registry.write().unregister(kind)
    }

    // ========================================================================
    // CAPABILITIES
    // ========================================================================

    pub fn add_local_parameter(&self, p: Parameter) -> bool {
        self.disseminator.add_local_parameter(p)
    }

    pub fn remove_local_parameter(&self, p: Parameter) -> bool {
        self.disseminator.remove_local_parameter(p)
    }

    pub fn commit(&self) -> CommitResult {
        self.disseminator.commit()
    }

    pub fn age(&self) {
        self.disseminator.age()
    }

    pub fn effective_distance(&self, p: &Parameter) -> u32 {
        self.disseminator.effective_distance(p)
    }

    pub fn distance_from(&self, p: &Parameter, neighbor: PeerId) -> u32 {
        self.disseminator.distance_from(p, neighbor)
    }

    pub fn is_local(&self, p: &Parameter) -> bool {
        self.disseminator.is_local(p)
    }

    pub fn subsumes_local(&self, p: &Parameter) -> BTreeSet<Parameter> {
        self.disseminator.subsumes_local(p)
    }

    pub fn local_parameters(&self) -> BTreeSet<Parameter> {
        self.disseminator.local_parameters()
    }

    // ========================================================================
    // SEARCH
    // ========================================================================

    pub fn start_search(
        &self,
        parameters: BTreeSet<Parameter>,
        payload: Option<Payload>,
        kind: SearchKind,
    ) -> MessageId {
        self.search.start_search(parameters, payload, kind)
    }

    pub fn send_multicast(&self, destinations: BTreeSet<PeerId>, payload: Payload) -> MessageId {
        self.search.send_multicast(destinations, payload)
    }

    pub fn send_unicast(&self, destination: PeerId, payload: Payload) -> MessageId {
        self.search.send_unicast(destination, payload)
    }

    pub fn cancel_search(&self, parameters: &BTreeSet<Parameter>) {
        self.search.cancel_search(parameters)
    }

    pub fn generalize_search(&self, parameters: &BTreeSet<Parameter>) {
        self.search.generalize_search(parameters)
    }

    pub fn knows_route_to(&self, dest: PeerId) -> bool {
        self.search.knows_route_to(dest)
    }

    pub fn route_to(&self, dest: PeerId) -> Option<NextHop> {
        self.search.route_to(dest)
    }

    pub fn searched_parameters(&self) -> BTreeSet<Parameter> {
        self.search.searched_parameters()
    }

    pub fn found_parameters(&self) -> BTreeMap<PeerId, BTreeSet<Parameter>> {
        self.search.found_parameters()
    }

    pub fn active_searches(&self) -> Vec<ActiveSearch> {
        self.search.active_searches()
    }

    // ========================================================================
    // PERSISTENCE
    // ========================================================================

    pub fn save_table(&self, path: &Path) -> Result<(), PersistError> {
        store::save_capability_table(&self.table.read(), path)
    }

    pub fn save_routes(&self, path: &Path) -> Result<(), PersistError> {
        store::save_route_table(&self.search.route_table(), path)
    }

    /// Replace the capability table with a saved one. Nothing is announced;
    /// neighbors learn the restored state on their next bootstrap.
    pub fn restore_table(&self, path: &Path) -> Result<(), PersistError> {
        let (max_distance, taxonomy) = {
            let table = self.table.read();
            (table.max_distance(), table.taxonomy().clone())
        };
        let restored = store::load_capability_table(path, self.id, max_distance, taxonomy)?;
        *self.table.write() = restored;
        Ok(())
    }
}

impl MessageHandler for DiscoveryNode {
    fn handle_message(&self, message: &Message) {
        if !message.is_addressed_to(self.id) {
            trace!(peer = %self.id, message = %message, "not addressed to us");
            return;
        }
        // registry lock is released before the handler runs
        let handler = self.registry.read().handler(message.kind());
        match handler {
            Some(handler) => handler.handle_message(message),
            None => trace!(peer = %self.id, kind = %message.kind(), "no handler registered"),
        }
    }
}

impl NeighborListener for DiscoveryNode {
    fn neighbors_changed(&self, appeared: &BTreeSet<PeerId>, disappeared: &BTreeSet<PeerId>) {
        debug!(
            peer = %self.id,
            appeared = ?appeared,
            disappeared = ?disappeared,
            "neighborhood changed"
        );
        self.disseminator.neighbors_changed(appeared, disappeared);
        self.search.neighbors_changed(appeared, disappeared);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{MessageBody, MulticastMessage, SearchMessage, SearchedParameter};
    use crate::search::NoopListener;
    use crate::taxonomy::BasicTaxonomy;
    use crate::transport::MockTransport;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    fn peer(n: u32) -> PeerId {
        PeerId(n)
    }

    fn param(s: &str) -> Parameter {
        s.parse().unwrap()
    }

    fn node(id: u32, sent: Arc<Mutex<Vec<Message>>>) -> DiscoveryNode {
        let mut transport = MockTransport::new();
        transport.expect_local_id().return_const(peer(id));
        transport
            .expect_neighbors()
            .returning(|| BTreeSet::from([peer(1)]));
        transport
            .expect_enqueue_broadcast()
            .returning(move |m| sent.lock().push(m));
        DiscoveryNode::new(
            &NodeConfig::default(),
            Arc::new(BasicTaxonomy::new()),
            Arc::new(transport),
            Arc::new(NoopListener),
        )
        .unwrap()
    }

    fn search_from(origin: u32, p: &str) -> SearchMessage {
        SearchMessage {
            id: MessageId::new(peer(origin), 0),
            distance: 0,
            kind: SearchKind::Exact,
            parameters: BTreeMap::from([(param(p), SearchedParameter::new(5))]),
            payload: None,
        }
    }

    #[derive(Default)]
    struct Counter(AtomicUsize);

    impl MessageHandler for Counter {
        fn handle_message(&self, _message: &Message) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_commit_broadcasts_table_update() {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let n = node(0, sent.clone());

        assert!(n.add_local_parameter(param("I-A")));
        let result = n.commit();

        assert_eq!(result.added, BTreeSet::from([param("I-A")]));
        assert_eq!(n.effective_distance(&param("I-A")), 5);
        let sent = sent.lock();
        assert_eq!(sent.len(), 1);
        assert!(matches!(sent[0].body, MessageBody::TableUpdate(_)));
    }

    #[test]
    fn test_frames_for_other_nodes_are_ignored() {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let n = node(0, sent);

        let elsewhere = Message::new(
            peer(1),
            BTreeSet::from([peer(7)]),
            MessageBody::Search(search_from(1, "I-A")),
        );
        n.handle_message(&elsewhere);
        assert!(n.active_searches().is_empty());

        let ours = Message::new(
            peer(1),
            BTreeSet::from([peer(0)]),
            MessageBody::Search(search_from(1, "I-A")),
        );
        n.handle_message(&ours);
        assert_eq!(n.active_searches().len(), 1);
    }

    #[test]
    fn test_every_kind_is_claimed() {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let n = node(0, sent);

        let counter = Arc::new(Counter::default());
        assert!(n
            .register_handler(MessageKind::Multicast, counter.clone())
            .is_err());

        assert!(n.unregister_handler(MessageKind::Multicast).is_some());
        n.register_handler(MessageKind::Multicast, counter.clone())
            .unwrap();

        n.send_unicast(peer(0), b"x".to_vec());
        let frame = Message::new(
            peer(1),
            BTreeSet::from([peer(0)]),
            MessageBody::Multicast(MulticastMessage {
                id: MessageId::new(peer(1), 4),
                distance: 0,
                destinations: BTreeSet::from([peer(0)]),
                payload: b"y".to_vec(),
            }),
        );
        n.handle_message(&frame);
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_save_and_restore_table() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("table.xml");

        let sent = Arc::new(Mutex::new(Vec::new()));
        let n = node(0, sent.clone());
        n.add_local_parameter(param("I-A"));
        n.add_local_parameter(param("O-B"));
        n.commit();
        n.save_table(&path).unwrap();

        let fresh = node(0, sent);
        fresh.restore_table(&path).unwrap();
        assert_eq!(*fresh.table().read(), *n.table().read());
        assert!(fresh.is_local(&param("O-B")));

        n.save_routes(&dir.path().join("routes.xml")).unwrap();
    }
}
