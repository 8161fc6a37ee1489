// ParameterSearch — flood searches along the capability gradient, route the
// answers back and keep routes consistent as neighbors come and go.
//
// Locally originated messages run through the same processing path as
// received ones, with the host as sender. Lock order: routes, table,
// receivers, seen. Listener and transport calls happen with no lock held.

use super::gradient;
use super::receivers::{SearchReceivers, SeenMessages};
use super::route_table::{ActiveSearch, NextHop, RouteTable};
use super::SearchListener;
use crate::dissemination::{SharedTable, TableChange, TableChangeListener};
use crate::message::{
    GeneralizeSearchMessage, Message, MessageBody, MulticastMessage, Payload,
    RemoveParametersMessage, RemoveRouteMessage, SearchKind, SearchMessage, SearchResponse,
    SearchedParameter,
};
use crate::parameter::Parameter;
use crate::peer::{MessageId, MessageIdGenerator, PeerId};
use crate::transport::{MessageHandler, NeighborListener, Transport};
use parking_lot::{Mutex, RwLock, RwLockReadGuard};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info, trace};

/// Default per-parameter search ttl
pub const DEFAULT_MAX_TTL: u32 = 5;

pub struct ParameterSearch {
    host: PeerId,
    max_ttl: u32,
    table: SharedTable,
    routes: RwLock<RouteTable>,
    receivers: Mutex<SearchReceivers>,
    seen: Mutex<SeenMessages>,
    transport: Arc<dyn Transport>,
    listener: Arc<dyn SearchListener>,
    ids: MessageIdGenerator,
}

impl ParameterSearch {
    pub fn new(
        table: SharedTable,
        transport: Arc<dyn Transport>,
        listener: Arc<dyn SearchListener>,
        max_ttl: u32,
        seen_capacity: usize,
    ) -> Self {
        let host = transport.local_id();
        let taxonomy = table.read().taxonomy().clone();
        Self {
            host,
            max_ttl,
            table,
            routes: RwLock::new(RouteTable::new(host, taxonomy)),
            receivers: Mutex::new(SearchReceivers::new()),
            seen: Mutex::new(SeenMessages::new(seen_capacity)),
            transport,
            listener,
            ids: MessageIdGenerator::new(host),
        }
    }

    pub fn host(&self) -> PeerId {
        self.host
    }

    pub fn max_ttl(&self) -> u32 {
        self.max_ttl
    }

    // ========================================================================
    // CALLER API
    // ========================================================================

    /// Flood a search for `parameters`. Returns the id of the search, which
    /// is also the id of the routes it creates.
    pub fn start_search(
        &self,
        parameters: BTreeSet<Parameter>,
        payload: Option<Payload>,
        kind: SearchKind,
    ) -> MessageId {
        let id = self.ids.next_id();
        if parameters.is_empty() {
            debug!(peer = %self.host, "ignoring search without parameters");
            return id;
        }

        info!(peer = %self.host, search = %id, kind = %kind, "starting search");
        let search = SearchMessage {
            id,
            distance: 0,
            kind,
            parameters: parameters
                .into_iter()
                .map(|p| (p, SearchedParameter::new(self.max_ttl)))
                .collect(),
            payload,
        };
        self.process_search(&search, self.host);
        id
    }

    /// Deliver `payload` to every destination along known routes
    pub fn send_multicast(&self, destinations: BTreeSet<PeerId>, payload: Payload) -> MessageId {
        let message = MulticastMessage {
            id: self.ids.next_id(),
            distance: 0,
            destinations,
            payload,
        };
        self.process_multicast(&message, self.host);
        message.id
    }

    pub fn send_unicast(&self, destination: PeerId, payload: Payload) -> MessageId {
        self.send_multicast(BTreeSet::from([destination]), payload)
    }

    /// Stop searching `parameters` in every own search
    pub fn cancel_search(&self, parameters: &BTreeSet<Parameter>) {
        let mut removed: BTreeMap<MessageId, BTreeSet<Parameter>> = BTreeMap::new();
        {
            let routes = self.routes.read();
            for p in parameters {
                for id in routes.own_searches_with(p) {
                    removed.entry(id).or_default().insert(p.clone());
                }
            }
        }
        if removed.is_empty() {
            return;
        }

        debug!(peer = %self.host, searches = removed.len(), "canceling searches");
        let message = RemoveParametersMessage {
            id: self.ids.next_id(),
            distance: 0,
            removed,
        };
        self.process_remove_parameters(&message, self.host);
    }

    /// Widen own generic searches to the more general `parameters`
    pub fn generalize_search(&self, parameters: &BTreeSet<Parameter>) {
        let route_ids: BTreeSet<MessageId> = {
            let routes = self.routes.read();
            parameters
                .iter()
                .flat_map(|p| routes.own_generalizable_by(p))
                .collect()
        };
        if route_ids.is_empty() {
            return;
        }

        debug!(peer = %self.host, searches = route_ids.len(), "generalizing searches");
        let message = GeneralizeSearchMessage {
            id: self.ids.next_id(),
            distance: 0,
            parameters: parameters.clone(),
            route_ids,
        };
        self.process_generalize(&message, self.host);
    }

    pub fn knows_route_to(&self, dest: PeerId) -> bool {
        self.transport.neighbors().contains(&dest) || self.routes.read().knows_route_to(dest)
    }

    pub fn route_to(&self, dest: PeerId) -> Option<NextHop> {
        let neighbors = self.transport.neighbors();
        self.routes.read().route_to(dest, &neighbors)
    }

    /// Parameters searched by this node's active searches
    pub fn searched_parameters(&self) -> BTreeSet<Parameter> {
        self.routes.read().searched_parameters()
    }

    pub fn found_parameters(&self) -> BTreeMap<PeerId, BTreeSet<Parameter>> {
        self.routes.read().found_parameters().clone()
    }

    pub fn active_searches(&self) -> Vec<ActiveSearch> {
        self.routes.read().active_searches().cloned().collect()
    }

    pub fn route_table(&self) -> RwLockReadGuard<'_, RouteTable> {
        self.routes.read()
    }

    // ========================================================================
    // MESSAGE PROCESSING
    // ========================================================================

    fn process_search(&self, search: &SearchMessage, sender: PeerId) {
        if !self.routes.write().admit_search(search, sender) {
            return;
        }
        if sender != self.host {
            self.receivers
                .lock()
                .add(search.id, &BTreeSet::from([sender]));
        }

        let found = self.local_matches(search);
        if !found.is_empty() {
            self.accept_search(search.id, &found);
        }
        self.propagate(search);
    }

    fn process_response(&self, response: &SearchResponse, sender: PeerId) {
        self.routes.write().admit_response(response, sender);

        if response.destination == self.host {
            debug!(peer = %self.host, from = %response.source(), "search answered");
            self.listener.parameters_found(response);
            return;
        }

        match self.route_to(response.destination) {
            Some(hop) => {
                let mut forwarded = response.clone();
                forwarded.distance += 1;
                self.send(
                    BTreeSet::from([hop.through]),
                    MessageBody::SearchResponse(forwarded),
                );
            }
            None => {
                debug!(peer = %self.host, dest = %response.destination, "no route for response, discarding");
            }
        }
    }

    fn process_multicast(&self, message: &MulticastMessage, sender: PeerId) {
        // accepted once per id, whatever the path
        let accepted = message.destinations.contains(&self.host)
            && (sender == self.host || self.seen.lock().insert(message.id, self.host));

        let neighbors = self.transport.neighbors();
        let mut through = BTreeSet::new();
        let mut remaining = BTreeSet::new();
        {
            let routes = self.routes.read();
            for dest in message.destinations.iter().filter(|d| **d != self.host) {
                match routes.route_to(*dest, &neighbors) {
                    Some(hop) => {
                        through.insert(hop.through);
                        remaining.insert(*dest);
                    }
                    None => debug!(peer = %self.host, dest = %dest, "no route for multicast destination"),
                }
            }
        }

        if !through.is_empty() {
            let forwarded = MulticastMessage {
                id: message.id,
                distance: message.distance + 1,
                destinations: remaining,
                payload: message.payload.clone(),
            };
            self.send(through, MessageBody::Multicast(forwarded));
        }

        if accepted {
            self.listener
                .multicast_accepted(message.id.origin, &message.payload, message.distance);
        }
    }

    fn process_remove_route(&self, message: &RemoveRouteMessage, sender: PeerId) {
        let mut removed = BTreeSet::new();
        let mut canceled = BTreeSet::new();
        let mut lost = BTreeSet::new();
        let active = {
            let mut routes = self.routes.write();
            for id in &message.lost_routes {
                if routes.is_search_route(id) && routes.cancel_search(id, sender) {
                    canceled.insert(*id);
                    removed.insert(*id);
                }

                let through_sender = routes
                    .route(id)
                    .map(|r| r.through == sender || sender == self.host)
                    .unwrap_or(false);
                if through_sender {
                    if let Some(dest) = routes.remove_route(id) {
                        removed.insert(*id);
                        if !routes.knows_route_to(dest) {
                            lost.insert(dest);
                        }
                    }
                }
            }
            routes.active_search_ids()
        };
        self.receivers.lock().retain_searches(&active);

        if !canceled.is_empty() {
            self.listener.search_canceled(&canceled);
        }
        if !lost.is_empty() {
            debug!(peer = %self.host, destinations = ?lost, "lost destinations");
            self.listener.lost_destinations(&lost);
        }
        if !removed.is_empty() {
            let forwarded = RemoveRouteMessage {
                id: message.id,
                distance: message.distance + 1,
                lost_routes: removed,
            };
            self.send(self.others(sender), MessageBody::RemoveRoute(forwarded));
        }
    }

    fn process_remove_parameters(&self, message: &RemoveParametersMessage, sender: PeerId) {
        let mut changed: BTreeMap<MessageId, BTreeSet<Parameter>> = BTreeMap::new();
        let active = {
            let mut routes = self.routes.write();
            for (id, parameters) in &message.removed {
                let removed = routes.remove_parameters(parameters, id);
                if !removed.is_empty() {
                    changed.insert(*id, removed);
                }
            }
            routes.active_search_ids()
        };
        self.receivers.lock().retain_searches(&active);

        if changed.is_empty() {
            return;
        }
        let forwarded = RemoveParametersMessage {
            id: message.id,
            distance: message.distance + 1,
            removed: changed,
        };
        self.send(self.others(sender), MessageBody::RemoveParameters(forwarded));
    }

    fn process_generalize(&self, message: &GeneralizeSearchMessage, sender: PeerId) {
        let mut updated = BTreeSet::new();
        let mut answers = Vec::new();
        {
            let mut routes = self.routes.write();
            let table = self.table.read();
            for id in &message.route_ids {
                let replaced = routes.generalize(&message.parameters, id);
                if replaced.is_empty() {
                    continue;
                }
                updated.insert(*id);

                let before: BTreeSet<Parameter> = replaced
                    .keys()
                    .flat_map(|p| table.subsumes_local(p))
                    .collect();
                let found: BTreeSet<Parameter> = replaced
                    .values()
                    .flat_map(|p| table.subsumes_local(p))
                    .filter(|p| !before.contains(p))
                    .collect();
                if !found.is_empty() {
                    answers.push((*id, found));
                }
            }
        }

        for (id, found) in answers {
            self.accept_search(id, &found);
        }

        if updated.is_empty() {
            return;
        }
        let forwarded = GeneralizeSearchMessage {
            id: message.id,
            distance: message.distance + 1,
            parameters: message.parameters.clone(),
            route_ids: updated,
        };
        self.send(self.others(sender), MessageBody::GeneralizeSearch(forwarded));
    }

    // ========================================================================
    // HELPERS
    // ========================================================================

    /// Local parameters answering `search`
    fn local_matches(&self, search: &SearchMessage) -> BTreeSet<Parameter> {
        let table = self.table.read();
        let mut found = BTreeSet::new();
        for p in search.parameters.keys() {
            match search.kind {
                SearchKind::Exact => {
                    if table.is_local(p) {
                        found.insert(p.clone());
                    }
                }
                SearchKind::Generic => found.extend(table.subsumes_local(p)),
            }
        }
        found
    }

    /// Tell the listener and answer the search origin
    fn accept_search(&self, search: MessageId, found: &BTreeSet<Parameter>) {
        let payload = self.listener.search_received(found, search);
        let response = SearchResponse {
            id: self.ids.next_id(),
            distance: 0,
            destination: search.origin,
            parameters: found.clone(),
            responded_route: search,
            payload,
        };
        debug!(peer = %self.host, search = %search, found = ?found, "answering search");
        self.process_response(&response, self.host);
    }

    /// Forward `search` to the neighbors that have not been handed it yet
    fn propagate(&self, search: &SearchMessage) {
        let neighbors = self.transport.neighbors();
        let targets = self.receivers.lock().missing(&search.id, &neighbors);
        if targets.is_empty() {
            return;
        }

        let mut copy = search.clone();
        copy.distance += 1;
        let is_origin = search.source() == self.host;
        let exhausted = {
            let table = self.table.read();
            gradient::advance(&mut copy.parameters, self.max_ttl, is_origin, |p| {
                table.effective_distance(p)
            })
        };
        if !exhausted.is_empty() {
            trace!(peer = %self.host, search = %search.id, parameters = ?exhausted, "ttl exhausted");
        }
        if copy.parameters.is_empty() {
            trace!(peer = %self.host, search = %search.id, "search discarded");
            return;
        }

        self.receivers.lock().add(search.id, &targets);
        self.send(targets, MessageBody::Search(copy));
    }

    /// Current neighbors except `sender`
    fn others(&self, sender: PeerId) -> BTreeSet<PeerId> {
        let mut neighbors = self.transport.neighbors();
        neighbors.remove(&sender);
        neighbors
    }

    fn send(&self, destinations: BTreeSet<PeerId>, body: MessageBody) {
        if destinations.is_empty() {
            return;
        }
        let message = Message::new(self.host, destinations, body);
        trace!(peer = %self.host, message = %message, "enqueue");
        self.transport.enqueue_broadcast(message);
    }
}

impl MessageHandler for ParameterSearch {
    fn handle_message(&self, message: &Message) {
        let sender = message.sender;
        if let Some(id) = message.body.remote_id() {
            if !self.seen.lock().insert(id, sender) {
                trace!(peer = %self.host, message = %message, "duplicate delivery");
                return;
            }
        }

        match &message.body {
            MessageBody::Search(m) => self.process_search(m, sender),
            MessageBody::SearchResponse(m) => self.process_response(m, sender),
            MessageBody::Multicast(m) => self.process_multicast(m, sender),
            MessageBody::RemoveRoute(m) => self.process_remove_route(m, sender),
            MessageBody::RemoveParameters(m) => self.process_remove_parameters(m, sender),
            MessageBody::GeneralizeSearch(m) => self.process_generalize(m, sender),
            MessageBody::TableUpdate(_) => {}
        }
    }
}

impl NeighborListener for ParameterSearch {
    fn neighbors_changed(&self, appeared: &BTreeSet<PeerId>, disappeared: &BTreeSet<PeerId>) {
        if !appeared.is_empty() {
            let searches: Vec<SearchMessage> = self
                .routes
                .read()
                .active_searches()
                .map(|s| s.to_message())
                .collect();
            for search in &searches {
                self.propagate(search);
            }
        }

        if disappeared.is_empty() {
            return;
        }
        self.seen.lock().purge_senders(disappeared);
        self.receivers.lock().remove_neighbors(disappeared);

        let lost_routes: BTreeSet<MessageId> = {
            let routes = self.routes.read();
            disappeared
                .iter()
                .flat_map(|n| routes.routes_through(*n))
                .collect()
        };
        if lost_routes.is_empty() {
            return;
        }

        debug!(peer = %self.host, routes = lost_routes.len(), "routes lost with neighbors");
        let message = RemoveRouteMessage {
            id: self.ids.next_id(),
            distance: 0,
            lost_routes,
        };
        self.process_remove_route(&message, self.host);
    }
}

impl TableChangeListener for ParameterSearch {
    fn table_changed(&self, change: &TableChange) {
        let mut answers: BTreeMap<MessageId, BTreeSet<Parameter>> = BTreeMap::new();
        let mut repropagate = Vec::new();
        {
            let routes = self.routes.read();
            for p in &change.local_added {
                for search in routes.searches_matching(p) {
                    answers.entry(search.id).or_default().insert(p.clone());
                }
            }

            let table = self.table.read();
            let remote: Vec<&Parameter> = change
                .new_parameters
                .iter()
                .filter(|p| !table.is_local(p))
                .collect();
            if !remote.is_empty() {
                let taxonomy = routes.taxonomy().clone();
                for search in routes.active_searches() {
                    if remote.iter().any(|p| search.matches(p, taxonomy.as_ref())) {
                        repropagate.push(search.to_message());
                    }
                }
            }
        }

        for (id, found) in answers {
            self.accept_search(id, &found);
        }
        for search in &repropagate {
            self.propagate(search);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dissemination::{CapabilityTable, DEFAULT_MAX_DISTANCE};
    use crate::search::{SearchEvent, SearchLog};
    use crate::taxonomy::{BasicTaxonomy, Taxonomy};
    use crate::transport::MockTransport;

    fn peer(n: u32) -> PeerId {
        PeerId(n)
    }

    fn param(s: &str) -> Parameter {
        s.parse().unwrap()
    }

    fn taxonomy() -> Arc<dyn Taxonomy> {
        let mut t = BasicTaxonomy::with_root("Z");
        t.add_child("Z", "A").unwrap();
        t.add_child("A", "B").unwrap();
        t.add_child("Z", "C").unwrap();
        Arc::new(t)
    }

    struct Harness {
        search: ParameterSearch,
        table: SharedTable,
        log: Arc<SearchLog>,
        sent: Arc<Mutex<Vec<Message>>>,
    }

    fn harness(host: u32, neighbors: &[u32]) -> Harness {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let neighbors: BTreeSet<PeerId> = neighbors.iter().map(|n| peer(*n)).collect();

        let mut transport = MockTransport::new();
        transport.expect_local_id().return_const(peer(host));
        transport.expect_neighbors().returning(move || neighbors.clone());
        let sink = sent.clone();
        transport
            .expect_enqueue_broadcast()
            .returning(move |msg| sink.lock().push(msg));

        let table: SharedTable = Arc::new(RwLock::new(CapabilityTable::new(
            peer(host),
            DEFAULT_MAX_DISTANCE,
            taxonomy(),
        )));
        let log = Arc::new(SearchLog::new());
        let search = ParameterSearch::new(
            table.clone(),
            Arc::new(transport),
            log.clone(),
            DEFAULT_MAX_TTL,
            100,
        );
        Harness {
            search,
            table,
            log,
            sent,
        }
    }

    fn remote_search(origin: u32, params: &[&str], kind: SearchKind) -> SearchMessage {
        SearchMessage {
            id: MessageId::new(peer(origin), 0),
            distance: 1,
            kind,
            parameters: params
                .iter()
                .map(|p| (param(p), SearchedParameter::new(DEFAULT_MAX_TTL)))
                .collect(),
            payload: None,
        }
    }

    fn deliver(h: &Harness, sender: u32, body: MessageBody) {
        let msg = Message::new(peer(sender), BTreeSet::from([h.search.host()]), body);
        h.search.handle_message(&msg);
    }

    fn take_sent(h: &Harness) -> Vec<Message> {
        std::mem::take(&mut *h.sent.lock())
    }

    #[test]
    fn test_own_search_is_flooded_to_neighbors() {
        let h = harness(0, &[1, 2]);
        let id = h
            .search
            .start_search(BTreeSet::from([param("I-A")]), None, SearchKind::Exact);

        let sent = take_sent(&h);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].expected_destinations, BTreeSet::from([peer(1), peer(2)]));
        match &sent[0].body {
            MessageBody::Search(s) => {
                assert_eq!(s.id, id);
                assert_eq!(s.distance, 1);
                // origin pays nothing for its first hop
                assert_eq!(s.parameters[&param("I-A")].ttl, DEFAULT_MAX_TTL);
            }
            other => panic!("unexpected body {:?}", other),
        }
        assert_eq!(h.search.searched_parameters(), BTreeSet::from([param("I-A")]));
    }

    #[test]
    fn test_own_search_answered_locally() {
        let h = harness(0, &[]);
        h.table.write().add_local([param("I-A")]);

        let id = h
            .search
            .start_search(BTreeSet::from([param("I-A")]), None, SearchKind::Exact);

        let found = h.log.found();
        assert_eq!(found, vec![(peer(0), BTreeSet::from([param("I-A")]))]);
        assert!(h.log.events().contains(&SearchEvent::SearchReceived {
            found: BTreeSet::from([param("I-A")]),
            search: id,
        }));
    }

    #[test]
    fn test_remote_search_answered_through_sender() {
        let h = harness(1, &[0, 2]);
        h.table.write().add_local([param("I-B")]);

        deliver(
            &h,
            0,
            MessageBody::Search(remote_search(9, &["I-A"], SearchKind::Generic)),
        );

        let sent = take_sent(&h);
        let response = sent
            .iter()
            .find_map(|m| match &m.body {
                MessageBody::SearchResponse(r) => Some((m.expected_destinations.clone(), r.clone())),
                _ => None,
            })
            .unwrap();
        assert_eq!(response.0, BTreeSet::from([peer(0)]));
        assert_eq!(response.1.destination, peer(9));
        assert_eq!(response.1.parameters, BTreeSet::from([param("I-B")]));
        assert_eq!(response.1.distance, 1);

        // search goes on to the neighbor that did not send it
        let search = sent
            .iter()
            .find(|m| matches!(m.body, MessageBody::Search(_)))
            .unwrap();
        assert_eq!(search.expected_destinations, BTreeSet::from([peer(2)]));
    }

    #[test]
    fn test_exact_search_ignores_subsumed_local() {
        let h = harness(1, &[0]);
        h.table.write().add_local([param("I-B")]);

        deliver(
            &h,
            0,
            MessageBody::Search(remote_search(9, &["I-A"], SearchKind::Exact)),
        );
        assert!(h.log.events().is_empty());
    }

    #[test]
    fn test_duplicate_delivery_is_dropped() {
        let h = harness(1, &[0, 2]);
        h.table.write().add_local([param("I-A")]);
        let body = MessageBody::Search(remote_search(9, &["I-A"], SearchKind::Exact));

        deliver(&h, 0, body.clone());
        let first = take_sent(&h).len();
        deliver(&h, 0, body.clone());
        assert!(take_sent(&h).is_empty());
        // a second path is admitted by the route table only once
        deliver(&h, 2, body);
        assert!(take_sent(&h).is_empty());
        assert!(first > 0);
        assert_eq!(h.log.events().len(), 1);
    }

    #[test]
    fn test_response_is_forwarded_along_route() {
        let h = harness(1, &[0, 2]);
        deliver(
            &h,
            0,
            MessageBody::Search(remote_search(9, &["I-A"], SearchKind::Exact)),
        );
        take_sent(&h);

        let response = SearchResponse {
            id: MessageId::new(peer(5), 0),
            distance: 1,
            destination: peer(9),
            parameters: BTreeSet::from([param("I-A")]),
            responded_route: MessageId::new(peer(9), 0),
            payload: None,
        };
        deliver(&h, 2, MessageBody::SearchResponse(response));

        let sent = take_sent(&h);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].expected_destinations, BTreeSet::from([peer(0)]));
        assert!(h.search.knows_route_to(peer(5)));
        assert_eq!(h.search.route_to(peer(5)).unwrap().through, peer(2));
        assert_eq!(
            h.search.found_parameters().get(&peer(5)),
            Some(&BTreeSet::from([param("I-A")]))
        );
    }

    #[test]
    fn test_multicast_accepted_and_forwarded() {
        let h = harness(1, &[0, 2]);
        deliver(
            &h,
            2,
            MessageBody::Search(remote_search(7, &["I-A"], SearchKind::Exact)),
        );
        take_sent(&h);

        let multicast = MulticastMessage {
            id: MessageId::new(peer(3), 0),
            distance: 1,
            destinations: BTreeSet::from([peer(1), peer(7), peer(8)]),
            payload: b"hello".to_vec(),
        };
        deliver(&h, 0, MessageBody::Multicast(multicast.clone()));

        assert_eq!(h.log.delivered(), vec![(peer(3), b"hello".to_vec())]);
        let sent = take_sent(&h);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].expected_destinations, BTreeSet::from([peer(2)]));
        match &sent[0].body {
            MessageBody::Multicast(m) => {
                assert_eq!(m.destinations, BTreeSet::from([peer(7)]));
                assert_eq!(m.distance, 2);
            }
            other => panic!("unexpected body {:?}", other),
        }

        // same multicast through another neighbor is not accepted twice
        deliver(&h, 2, MessageBody::Multicast(multicast));
        assert_eq!(h.log.delivered().len(), 1);
    }

    #[test]
    fn test_unicast_to_neighbor() {
        let h = harness(0, &[1]);
        h.search.send_unicast(peer(1), b"x".to_vec());

        let sent = take_sent(&h);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].expected_destinations, BTreeSet::from([peer(1)]));
    }

    #[test]
    fn test_lost_neighbor_removes_routes() {
        let h = harness(1, &[2]);
        deliver(
            &h,
            0,
            MessageBody::Search(remote_search(9, &["I-A"], SearchKind::Exact)),
        );
        take_sent(&h);
        assert!(h.search.knows_route_to(peer(9)));

        h.search
            .neighbors_changed(&BTreeSet::new(), &BTreeSet::from([peer(0)]));

        assert!(!h.search.knows_route_to(peer(9)));
        assert!(h.search.active_searches().is_empty());
        let events = h.log.events();
        assert!(events.contains(&SearchEvent::SearchCanceled(BTreeSet::from([
            MessageId::new(peer(9), 0)
        ]))));
        assert!(events.contains(&SearchEvent::LostDestinations(BTreeSet::from([peer(9)]))));

        let sent = take_sent(&h);
        assert_eq!(sent.len(), 1);
        assert!(matches!(sent[0].body, MessageBody::RemoveRoute(_)));
    }

    #[test]
    fn test_remove_route_from_other_neighbor_is_ignored() {
        let h = harness(1, &[0, 2]);
        deliver(
            &h,
            0,
            MessageBody::Search(remote_search(9, &["I-A"], SearchKind::Exact)),
        );
        take_sent(&h);

        let remove = RemoveRouteMessage {
            id: MessageId::new(peer(2), 0),
            distance: 1,
            lost_routes: BTreeSet::from([MessageId::new(peer(9), 0)]),
        };
        deliver(&h, 2, MessageBody::RemoveRoute(remove));

        assert!(h.search.knows_route_to(peer(9)));
        assert!(take_sent(&h).is_empty());
    }

    #[test]
    fn test_new_neighbor_receives_active_searches() {
        let h = harness(0, &[1]);
        h.search
            .start_search(BTreeSet::from([param("I-A")]), None, SearchKind::Exact);
        take_sent(&h);

        // already handed to 1, nothing new to send
        h.search
            .neighbors_changed(&BTreeSet::from([peer(1)]), &BTreeSet::new());
        assert!(take_sent(&h).is_empty());
    }

    #[test]
    fn test_cancel_search_sends_remove_parameters() {
        let h = harness(0, &[1]);
        h.search.start_search(
            BTreeSet::from([param("I-A"), param("I-C")]),
            None,
            SearchKind::Exact,
        );
        take_sent(&h);

        h.search.cancel_search(&BTreeSet::from([param("I-A")]));
        assert_eq!(h.search.searched_parameters(), BTreeSet::from([param("I-C")]));

        let sent = take_sent(&h);
        assert_eq!(sent.len(), 1);
        assert!(matches!(sent[0].body, MessageBody::RemoveParameters(_)));

        h.search.cancel_search(&BTreeSet::from([param("I-W")]));
        assert!(take_sent(&h).is_empty());
    }

    #[test]
    fn test_generalize_answers_newly_covered_locals() {
        let h = harness(1, &[0]);
        h.table.write().add_local([param("I-C")]);
        deliver(
            &h,
            0,
            MessageBody::Search(remote_search(9, &["I-B"], SearchKind::Generic)),
        );
        take_sent(&h);
        assert!(h.log.events().is_empty());

        let generalize = GeneralizeSearchMessage {
            id: MessageId::new(peer(9), 1),
            distance: 1,
            parameters: BTreeSet::from([param("I-Z")]),
            route_ids: BTreeSet::from([MessageId::new(peer(9), 0)]),
        };
        deliver(&h, 0, MessageBody::GeneralizeSearch(generalize));

        assert!(h.log.events().contains(&SearchEvent::SearchReceived {
            found: BTreeSet::from([param("I-C")]),
            search: MessageId::new(peer(9), 0),
        }));
    }

    #[test]
    fn test_local_addition_answers_active_search() {
        let h = harness(1, &[0]);
        deliver(
            &h,
            0,
            MessageBody::Search(remote_search(9, &["I-A"], SearchKind::Exact)),
        );
        take_sent(&h);

        h.table.write().add_local([param("I-A")]);
        let change = TableChange {
            neighbor: peer(1),
            new_parameters: BTreeSet::from([param("I-A")]),
            local_added: BTreeSet::from([param("I-A")]),
            ..TableChange::default()
        };
        h.search.table_changed(&change);

        let sent = take_sent(&h);
        assert!(sent
            .iter()
            .any(|m| matches!(m.body, MessageBody::SearchResponse(_))));
    }
}
