// Transport module — the seam between the protocol engines and the radio
//
// Engines never talk to sockets. They see a `Transport` that knows the local
// id and the current one-hop neighborhood and queues broadcast frames, and
// they are fed back through `MessageHandler` and `NeighborListener`.

pub mod dispatch;
pub mod loopback;

pub use dispatch::{DispatchError, HandlerRegistry};
pub use loopback::LoopbackNetwork;

use crate::message::Message;
use crate::peer::PeerId;
use std::collections::BTreeSet;

/// One-hop broadcast medium
#[cfg_attr(test, mockall::automock)]
pub trait Transport: Send + Sync {
    /// Id of the node this transport belongs to
    fn local_id(&self) -> PeerId;

    /// Current one-hop neighbors
    fn neighbors(&self) -> BTreeSet<PeerId>;

    /// Queue a frame for broadcast. Neighbors outside
    /// `message.expected_destinations` drop it on receipt.
    fn enqueue_broadcast(&self, message: Message);
}

/// Receives inbound frames of the kinds it was registered for
pub trait MessageHandler: Send + Sync {
    fn handle_message(&self, message: &Message);
}

/// Told when the one-hop neighborhood changes
pub trait NeighborListener: Send + Sync {
    fn neighbors_changed(&self, appeared: &BTreeSet<PeerId>, disappeared: &BTreeSet<PeerId>);
}
