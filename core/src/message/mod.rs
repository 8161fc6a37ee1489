// Message module — wire types and serialization for both protocols

pub mod codec;
pub mod types;

pub use codec::{decode_message, encode_message, MAX_MESSAGE_SIZE, MAX_PAYLOAD_SIZE};
pub use types::{
    GeneralizeSearchMessage, Message, MessageBody, MessageKind, MulticastMessage, Payload,
    RemoveParametersMessage, RemoveRouteMessage, SearchKind, SearchMessage, SearchResponse,
    SearchedParameter,
};
