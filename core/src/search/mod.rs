// Search module — gradient-guided capability search and reverse-route delivery

pub mod gradient;
pub mod protocol;
pub mod receivers;
pub mod route_table;

pub use protocol::{ParameterSearch, DEFAULT_MAX_TTL};
pub use receivers::{SearchReceivers, SeenMessages, DEFAULT_SEEN_CAPACITY};
pub use route_table::{ActiveSearch, NextHop, Route, RouteTable};

use crate::message::{Payload, SearchResponse};
use crate::parameter::Parameter;
use crate::peer::{MessageId, PeerId};
use parking_lot::Mutex;
use std::collections::BTreeSet;

/// Upper-layer callbacks of the search engine. Every method has a no-op
/// default so users implement only what they care about.
pub trait SearchListener: Send + Sync {
    /// A search matched local parameters. The returned payload travels back
    /// with the response.
    fn search_received(&self, _found: &BTreeSet<Parameter>, _search: MessageId) -> Option<Payload> {
        None
    }

    /// A response to one of this node's searches arrived
    fn parameters_found(&self, _response: &SearchResponse) {}

    fn multicast_accepted(&self, _source: PeerId, _payload: &Payload, _distance: u32) {}

    /// Destinations no longer reachable after route removals
    fn lost_destinations(&self, _destinations: &BTreeSet<PeerId>) {}

    fn search_canceled(&self, _searches: &BTreeSet<MessageId>) {}
}

/// Listener that ignores everything
#[derive(Debug, Default)]
pub struct NoopListener;

impl SearchListener for NoopListener {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchEvent {
    SearchReceived {
        found: BTreeSet<Parameter>,
        search: MessageId,
    },
    ParametersFound {
        source: PeerId,
        parameters: BTreeSet<Parameter>,
        search: MessageId,
        distance: u32,
    },
    MulticastAccepted {
        source: PeerId,
        payload: Payload,
        distance: u32,
    },
    LostDestinations(BTreeSet<PeerId>),
    SearchCanceled(BTreeSet<MessageId>),
}

/// Listener recording every callback, optionally answering searches with a
/// fixed payload
#[derive(Debug, Default)]
pub struct SearchLog {
    events: Mutex<Vec<SearchEvent>>,
    reply: Option<Payload>,
}

impl SearchLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_reply(reply: Payload) -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            reply: Some(reply),
        }
    }

    pub fn events(&self) -> Vec<SearchEvent> {
        self.events.lock().clone()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }

    /// Parameters found per responding node, in arrival order
    pub fn found(&self) -> Vec<(PeerId, BTreeSet<Parameter>)> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                SearchEvent::ParametersFound {
                    source, parameters, ..
                } => Some((*source, parameters.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn delivered(&self) -> Vec<(PeerId, Payload)> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                SearchEvent::MulticastAccepted {
                    source, payload, ..
                } => Some((*source, payload.clone())),
                _ => None,
            })
            .collect()
    }

    fn push(&self, event: SearchEvent) {
        self.events.lock().push(event);
    }
}

impl SearchListener for SearchLog {
    fn search_received(&self, found: &BTreeSet<Parameter>, search: MessageId) -> Option<Payload> {
        self.push(SearchEvent::SearchReceived {
            found: found.clone(),
            search,
        });
        self.reply.clone()
    }

    fn parameters_found(&self, response: &SearchResponse) {
        self.push(SearchEvent::ParametersFound {
            source: response.source(),
            parameters: response.parameters.clone(),
            search: response.responded_route,
            distance: response.distance,
        });
    }

    fn multicast_accepted(&self, source: PeerId, payload: &Payload, distance: u32) {
        self.push(SearchEvent::MulticastAccepted {
            source,
            payload: payload.clone(),
            distance,
        });
    }

    fn lost_destinations(&self, destinations: &BTreeSet<PeerId>) {
        self.push(SearchEvent::LostDestinations(destinations.clone()));
    }

    fn search_canceled(&self, searches: &BTreeSet<MessageId>) {
        self.push(SearchEvent::SearchCanceled(searches.clone()));
    }
}
