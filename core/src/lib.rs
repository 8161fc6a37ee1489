// capmesh core — capability dissemination and gradient search
//
// Every node advertises the parameters it provides through a distance-vector
// table grouped by taxonomy, and finds providers with searches whose ttl is
// restored while they climb towards a source and decays elsewhere.

pub mod config;
pub mod dissemination;
pub mod message;
pub mod node;
pub mod parameter;
pub mod peer;
pub mod search;
pub mod store;
pub mod taxonomy;
pub mod transport;

use thiserror::Error;

pub use config::{ConfigError, NodeConfig};
pub use dissemination::{
    CapabilityTable, CommitResult, Disseminator, SharedTable, TableChange, TableChangeListener,
    UpdateDiff,
};
pub use message::{Message, MessageBody, MessageKind, Payload, SearchKind};
pub use node::DiscoveryNode;
pub use parameter::{Parameter, ParameterError, Polarity};
pub use peer::{MessageId, PeerId};
pub use search::{NoopListener, ParameterSearch, RouteTable, SearchEvent, SearchListener, SearchLog};
pub use store::PersistError;
pub use taxonomy::{BasicTaxonomy, Taxonomy, TaxonomyError};
pub use transport::{
    DispatchError, HandlerRegistry, LoopbackNetwork, MessageHandler, NeighborListener, Transport,
};

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Parameter(#[from] ParameterError),
    #[error(transparent)]
    Taxonomy(#[from] TaxonomyError),
    #[error(transparent)]
    Persist(#[from] PersistError),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}
