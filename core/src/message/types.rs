// Message types — everything a node puts on the air

use crate::dissemination::UpdateDiff;
use crate::parameter::Parameter;
use crate::peer::{MessageId, PeerId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Opaque upper-layer payload
pub type Payload = Vec<u8>;

/// Message kinds, one per body variant. Handlers register per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MessageKind {
    TableUpdate,
    Search,
    SearchResponse,
    Multicast,
    RemoveRoute,
    RemoveParameters,
    GeneralizeSearch,
}

impl MessageKind {
    pub const ALL: [MessageKind; 7] = [
        MessageKind::TableUpdate,
        MessageKind::Search,
        MessageKind::SearchResponse,
        MessageKind::Multicast,
        MessageKind::RemoveRoute,
        MessageKind::RemoveParameters,
        MessageKind::GeneralizeSearch,
    ];
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageKind::TableUpdate => write!(f, "table-update"),
            MessageKind::Search => write!(f, "search"),
            MessageKind::SearchResponse => write!(f, "search-response"),
            MessageKind::Multicast => write!(f, "multicast"),
            MessageKind::RemoveRoute => write!(f, "remove-route"),
            MessageKind::RemoveParameters => write!(f, "remove-parameters"),
            MessageKind::GeneralizeSearch => write!(f, "generalize-search"),
        }
    }
}

/// How search targets match provided parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SearchKind {
    /// Only identical parameters match
    Exact,
    /// Any provided parameter subsumed by the target matches
    Generic,
}

impl fmt::Display for SearchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchKind::Exact => write!(f, "Exact"),
            SearchKind::Generic => write!(f, "Generic"),
        }
    }
}

/// Per-parameter flood state carried by a search
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchedParameter {
    pub ttl: u32,
    /// Effective distance seen by the previous hop
    pub previous_distance: u32,
}

impl SearchedParameter {
    pub fn new(ttl: u32) -> Self {
        Self {
            ttl,
            previous_distance: 0,
        }
    }
}

/// Flooded capability search. Its id identifies the routes it creates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchMessage {
    pub id: MessageId,
    /// Hops travelled
    pub distance: u32,
    pub kind: SearchKind,
    pub parameters: BTreeMap<Parameter, SearchedParameter>,
    pub payload: Option<Payload>,
}

impl SearchMessage {
    pub fn source(&self) -> PeerId {
        self.id.origin
    }

    pub fn searched(&self) -> BTreeSet<Parameter> {
        self.parameters.keys().cloned().collect()
    }
}

/// Answer routed back to the origin of a search
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResponse {
    pub id: MessageId,
    pub distance: u32,
    pub destination: PeerId,
    pub parameters: BTreeSet<Parameter>,
    /// Search being answered
    pub responded_route: MessageId,
    pub payload: Option<Payload>,
}

impl SearchResponse {
    pub fn source(&self) -> PeerId {
        self.id.origin
    }
}

/// Payload routed to a set of remote destinations along known routes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MulticastMessage {
    pub id: MessageId,
    pub distance: u32,
    pub destinations: BTreeSet<PeerId>,
    pub payload: Payload,
}

impl MulticastMessage {
    pub fn source(&self) -> PeerId {
        self.id.origin
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveRouteMessage {
    pub id: MessageId,
    pub distance: u32,
    pub lost_routes: BTreeSet<MessageId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveParametersMessage {
    pub id: MessageId,
    pub distance: u32,
    /// Route (search) id → parameters no longer searched
    pub removed: BTreeMap<MessageId, BTreeSet<Parameter>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneralizeSearchMessage {
    pub id: MessageId,
    pub distance: u32,
    pub parameters: BTreeSet<Parameter>,
    pub route_ids: BTreeSet<MessageId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageBody {
    TableUpdate(UpdateDiff),
    Search(SearchMessage),
    SearchResponse(SearchResponse),
    Multicast(MulticastMessage),
    RemoveRoute(RemoveRouteMessage),
    RemoveParameters(RemoveParametersMessage),
    GeneralizeSearch(GeneralizeSearchMessage),
}

impl MessageBody {
    pub fn kind(&self) -> MessageKind {
        match self {
            MessageBody::TableUpdate(_) => MessageKind::TableUpdate,
            MessageBody::Search(_) => MessageKind::Search,
            MessageBody::SearchResponse(_) => MessageKind::SearchResponse,
            MessageBody::Multicast(_) => MessageKind::Multicast,
            MessageBody::RemoveRoute(_) => MessageKind::RemoveRoute,
            MessageBody::RemoveParameters(_) => MessageKind::RemoveParameters,
            MessageBody::GeneralizeSearch(_) => MessageKind::GeneralizeSearch,
        }
    }

    /// Network-wide id, for everything except table updates
    pub fn remote_id(&self) -> Option<MessageId> {
        match self {
            MessageBody::TableUpdate(_) => None,
            MessageBody::Search(m) => Some(m.id),
            MessageBody::SearchResponse(m) => Some(m.id),
            MessageBody::Multicast(m) => Some(m.id),
            MessageBody::RemoveRoute(m) => Some(m.id),
            MessageBody::RemoveParameters(m) => Some(m.id),
            MessageBody::GeneralizeSearch(m) => Some(m.id),
        }
    }

    /// Upper-layer payload carried, if any
    pub fn payload(&self) -> Option<&Payload> {
        match self {
            MessageBody::Search(m) => m.payload.as_ref(),
            MessageBody::SearchResponse(m) => m.payload.as_ref(),
            MessageBody::Multicast(m) => Some(&m.payload),
            _ => None,
        }
    }
}

/// One-hop broadcast frame. Receivers outside `expected_destinations` ignore it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Node that put this frame on the air
    pub sender: PeerId,
    pub expected_destinations: BTreeSet<PeerId>,
    pub body: MessageBody,
}

impl Message {
    pub fn new(sender: PeerId, expected_destinations: BTreeSet<PeerId>, body: MessageBody) -> Self {
        Self {
            sender,
            expected_destinations,
            body,
        }
    }

    pub fn kind(&self) -> MessageKind {
        self.body.kind()
    }

    pub fn is_addressed_to(&self, peer: PeerId) -> bool {
        self.expected_destinations.contains(&peer)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} from {}", self.kind(), self.sender)?;
        if let Some(id) = self.body.remote_id() {
            write!(f, " ({})", id)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_matches_body() {
        let body = MessageBody::RemoveRoute(RemoveRouteMessage {
            id: MessageId::new(PeerId(1), 0),
            distance: 0,
            lost_routes: BTreeSet::new(),
        });
        assert_eq!(body.kind(), MessageKind::RemoveRoute);
        assert_eq!(body.remote_id(), Some(MessageId::new(PeerId(1), 0)));

        let table = MessageBody::TableUpdate(UpdateDiff::new());
        assert_eq!(table.kind(), MessageKind::TableUpdate);
        assert_eq!(table.remote_id(), None);
    }

    #[test]
    fn test_addressing_and_display() {
        let msg = Message::new(
            PeerId(2),
            BTreeSet::from([PeerId(3)]),
            MessageBody::Multicast(MulticastMessage {
                id: MessageId::new(PeerId(2), 5),
                distance: 0,
                destinations: BTreeSet::from([PeerId(9)]),
                payload: b"hi".to_vec(),
            }),
        );
        assert!(msg.is_addressed_to(PeerId(3)));
        assert!(!msg.is_addressed_to(PeerId(9)));
        assert_eq!(msg.to_string(), "multicast from 2 (2:5)");
        assert_eq!(msg.body.payload(), Some(&b"hi".to_vec()));
    }
}
