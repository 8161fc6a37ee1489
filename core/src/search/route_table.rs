// Route table — reverse routes learnt from searches and responses
//
// Every search or response that reaches this node leaves a route back to its
// origin through the neighbor that delivered it. Routes are identified by the
// id of the message that created them. Active searches are kept alongside so
// later responses, cancellations and generalizations can find them.

use crate::message::{Payload, SearchKind, SearchMessage, SearchResponse, SearchedParameter};
use crate::parameter::Parameter;
use crate::peer::{MessageId, PeerId};
use crate::taxonomy::Taxonomy;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace};

/// Reverse route towards `dest`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub dest: PeerId,
    /// Neighbor that delivered the creating message
    pub through: PeerId,
    pub route_id: MessageId,
    /// Hops between here and `dest`
    pub distance: u32,
    /// Insertion order, used to prefer recent routes on ties
    order: u64,
}

/// Where to send something addressed to a destination
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NextHop {
    pub through: PeerId,
    pub distance: u32,
}

/// A search this node has accepted and keeps answering
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveSearch {
    pub id: MessageId,
    /// Neighbor the search came from (the host for own searches)
    pub sender: PeerId,
    pub distance: u32,
    pub kind: SearchKind,
    pub parameters: BTreeMap<Parameter, SearchedParameter>,
    pub payload: Option<Payload>,
}

impl ActiveSearch {
    fn from_message(search: &SearchMessage, sender: PeerId) -> Self {
        Self {
            id: search.id,
            sender,
            distance: search.distance,
            kind: search.kind,
            parameters: search.parameters.clone(),
            payload: search.payload.clone(),
        }
    }

    pub fn source(&self) -> PeerId {
        self.id.origin
    }

    pub fn searched(&self) -> BTreeSet<Parameter> {
        self.parameters.keys().cloned().collect()
    }

    /// Whether `p` answers this search
    pub fn matches(&self, p: &Parameter, taxonomy: &dyn Taxonomy) -> bool {
        match self.kind {
            SearchKind::Exact => self.parameters.contains_key(p),
            SearchKind::Generic => self
                .parameters
                .keys()
                .any(|searched| taxonomy.subsumes_parameter(searched, p)),
        }
    }

    /// Message form, as it was admitted here
    pub fn to_message(&self) -> SearchMessage {
        SearchMessage {
            id: self.id,
            distance: self.distance,
            kind: self.kind,
            parameters: self.parameters.clone(),
            payload: self.payload.clone(),
        }
    }
}

pub struct RouteTable {
    host: PeerId,
    taxonomy: Arc<dyn Taxonomy>,
    routes: BTreeMap<MessageId, Route>,
    searches: BTreeMap<MessageId, ActiveSearch>,
    found: BTreeMap<PeerId, BTreeSet<Parameter>>,
    next_order: u64,
}

impl RouteTable {
    pub fn new(host: PeerId, taxonomy: Arc<dyn Taxonomy>) -> Self {
        Self {
            host,
            taxonomy,
            routes: BTreeMap::new(),
            searches: BTreeMap::new(),
            found: BTreeMap::new(),
            next_order: 0,
        }
    }

    pub fn host(&self) -> PeerId {
        self.host
    }

    pub fn taxonomy(&self) -> &Arc<dyn Taxonomy> {
        &self.taxonomy
    }

    /// Record a search delivered by `sender`. Returns false when its id is
    /// already known here.
    pub fn admit_search(&mut self, search: &SearchMessage, sender: PeerId) -> bool {
        if self.searches.contains_key(&search.id) || self.routes.contains_key(&search.id) {
            trace!(peer = %self.host, search = %search.id, "search already known");
            return false;
        }

        self.searches
            .insert(search.id, ActiveSearch::from_message(search, sender));
        if search.source() != self.host {
            self.add_route(search.id, search.source(), sender, search.distance);
        }
        true
    }

    /// Record the route left by a response delivered by `sender`
    pub fn admit_response(&mut self, response: &SearchResponse, sender: PeerId) {
        if response.source() == self.host {
            return;
        }
        self.add_route(response.id, response.source(), sender, response.distance);
        self.found
            .entry(response.source())
            .or_default()
            .extend(response.parameters.iter().cloned());
    }

    pub fn knows_route_to(&self, dest: PeerId) -> bool {
        dest == self.host || self.routes.values().any(|r| r.dest == dest)
    }

    /// Next hop towards `dest`. The host itself is at distance 0, a direct
    /// neighbor at 1; otherwise the shortest known route wins and the most
    /// recent one breaks ties.
    pub fn route_to(&self, dest: PeerId, neighbors: &BTreeSet<PeerId>) -> Option<NextHop> {
        if dest == self.host {
            return Some(NextHop {
                through: self.host,
                distance: 0,
            });
        }
        if neighbors.contains(&dest) {
            return Some(NextHop {
                through: dest,
                distance: 1,
            });
        }

        self.routes
            .values()
            .filter(|r| r.dest == dest)
            .min_by(|a, b| a.distance.cmp(&b.distance).then(b.order.cmp(&a.order)))
            .map(|r| NextHop {
                through: r.through,
                distance: r.distance,
            })
    }

    pub fn route_ids(&self, dest: PeerId) -> BTreeSet<MessageId> {
        self.routes
            .values()
            .filter(|r| r.dest == dest)
            .map(|r| r.route_id)
            .collect()
    }

    pub fn routes_through(&self, neighbor: PeerId) -> BTreeSet<MessageId> {
        self.routes
            .values()
            .filter(|r| r.through == neighbor)
            .map(|r| r.route_id)
            .collect()
    }

    pub fn route(&self, id: &MessageId) -> Option<&Route> {
        self.routes.get(id)
    }

    pub fn is_route(&self, id: &MessageId) -> bool {
        self.routes.contains_key(id)
    }

    pub fn is_search_route(&self, id: &MessageId) -> bool {
        self.searches.contains_key(id)
    }

    /// Drop a route. Returns its destination if it existed. Parameters found
    /// at a destination are forgotten once no route to it is left.
    pub fn remove_route(&mut self, id: &MessageId) -> Option<PeerId> {
        let route = self.routes.remove(id)?;
        debug!(peer = %self.host, dest = %route.dest, "removed route");
        if !self.knows_route_to(route.dest) {
            self.found.remove(&route.dest);
        }
        Some(route.dest)
    }

    /// Drop the search `id` when `neighbor` is the one that sent it, or when
    /// the host itself asks. Its route is left in place.
    pub fn cancel_search(&mut self, id: &MessageId, neighbor: PeerId) -> bool {
        let allowed = match self.searches.get(id) {
            Some(search) => search.sender == neighbor || neighbor == self.host,
            None => false,
        };
        if allowed {
            self.searches.remove(id);
            debug!(peer = %self.host, search = %id, "canceled search");
        }
        allowed
    }

    /// Stop searching `parameters` in search `id`. A search left without
    /// parameters is removed, its route stays. Returns what was removed.
    pub fn remove_parameters(
        &mut self,
        parameters: &BTreeSet<Parameter>,
        id: &MessageId,
    ) -> BTreeSet<Parameter> {
        let Some(search) = self.searches.get_mut(id) else {
            return BTreeSet::new();
        };

        let removed: BTreeSet<Parameter> = parameters
            .iter()
            .filter(|p| search.parameters.remove(*p).is_some())
            .cloned()
            .collect();

        if search.parameters.is_empty() {
            self.searches.remove(id);
            debug!(peer = %self.host, search = %id, "search emptied");
        }
        removed
    }

    /// Replace searched parameters of a generic search by the more general
    /// ones in `generalizations`. Returns old → new for every replacement.
    pub fn generalize(
        &mut self,
        generalizations: &BTreeSet<Parameter>,
        id: &MessageId,
    ) -> BTreeMap<Parameter, Parameter> {
        let taxonomy = self.taxonomy.clone();
        let Some(search) = self.searches.get_mut(id) else {
            return BTreeMap::new();
        };
        if search.kind != SearchKind::Generic {
            return BTreeMap::new();
        }

        let mut replaced = BTreeMap::new();
        for general in generalizations {
            for searched in search.parameters.keys() {
                if general != searched && taxonomy.subsumes_parameter(general, searched) {
                    replaced.insert(searched.clone(), general.clone());
                }
            }
        }

        for (old, new) in &replaced {
            if let Some(state) = search.parameters.remove(old) {
                search.parameters.entry(new.clone()).or_insert(state);
            }
        }
        replaced
    }

    pub fn search(&self, id: &MessageId) -> Option<&ActiveSearch> {
        self.searches.get(id)
    }

    pub fn active_searches(&self) -> impl Iterator<Item = &ActiveSearch> {
        self.searches.values()
    }

    pub fn active_search_ids(&self) -> BTreeSet<MessageId> {
        self.searches.keys().copied().collect()
    }

    /// Active searches that `p` answers
    pub fn searches_matching(&self, p: &Parameter) -> Vec<&ActiveSearch> {
        self.searches
            .values()
            .filter(|s| s.matches(p, self.taxonomy.as_ref()))
            .collect()
    }

    /// Own searches looking for exactly `p`
    pub fn own_searches_with(&self, p: &Parameter) -> Vec<MessageId> {
        self.searches
            .values()
            .filter(|s| s.source() == self.host && s.parameters.contains_key(p))
            .map(|s| s.id)
            .collect()
    }

    /// Own generic searches with a parameter strictly subsumed by `p`
    pub fn own_generalizable_by(&self, p: &Parameter) -> Vec<MessageId> {
        self.searches
            .values()
            .filter(|s| s.source() == self.host && s.kind == SearchKind::Generic)
            .filter(|s| {
                s.parameters
                    .keys()
                    .any(|searched| searched != p && self.taxonomy.subsumes_parameter(p, searched))
            })
            .map(|s| s.id)
            .collect()
    }

    /// Parameters searched by this node's own searches
    pub fn searched_parameters(&self) -> BTreeSet<Parameter> {
        self.searches
            .values()
            .filter(|s| s.source() == self.host)
            .flat_map(|s| s.parameters.keys().cloned())
            .collect()
    }

    /// Parameters learnt from responses, per responding node
    pub fn found_parameters(&self) -> &BTreeMap<PeerId, BTreeSet<Parameter>> {
        &self.found
    }

    pub fn routes(&self) -> impl Iterator<Item = &Route> {
        self.routes.values()
    }

    pub(crate) fn restore_route(
        &mut self,
        route_id: MessageId,
        dest: PeerId,
        through: PeerId,
        distance: u32,
    ) {
        self.add_route(route_id, dest, through, distance);
    }

    pub(crate) fn restore_search(&mut self, search: ActiveSearch) {
        self.searches.insert(search.id, search);
    }

    fn add_route(&mut self, route_id: MessageId, dest: PeerId, through: PeerId, distance: u32) {
        if self.routes.contains_key(&route_id) {
            return;
        }
        debug!(peer = %self.host, dest = %dest, through = %through, "added route");
        self.routes.insert(
            route_id,
            Route {
                dest,
                through,
                route_id,
                distance,
                order: self.next_order,
            },
        );
        self.next_order += 1;
    }

    fn searches_by_origin(&self) -> BTreeMap<PeerId, BTreeSet<Parameter>> {
        let mut by_origin: BTreeMap<PeerId, BTreeSet<Parameter>> = BTreeMap::new();
        for search in self.searches.values() {
            by_origin
                .entry(search.source())
                .or_default()
                .extend(search.parameters.keys().cloned());
        }
        by_origin
    }
}

impl PartialEq for RouteTable {
    fn eq(&self, other: &Self) -> bool {
        let same_routes = self.routes.len() == other.routes.len()
            && self.routes.iter().all(|(id, r)| {
                other
                    .routes
                    .get(id)
                    .map(|o| o.dest == r.dest && o.through == r.through)
                    .unwrap_or(false)
            });
        same_routes && self.searches_by_origin() == other.searches_by_origin()
    }
}

impl fmt::Debug for RouteTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteTable")
            .field("host", &self.host)
            .field("routes", &self.routes.values().collect::<Vec<_>>())
            .field("searches", &self.searches.keys().collect::<Vec<_>>())
            .finish()
    }
}
