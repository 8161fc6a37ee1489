// Message codec — bincode frames with size limits

use super::types::Message;
use anyhow::{bail, Result};

/// Maximum encoded frame size: 256 KB
pub const MAX_MESSAGE_SIZE: usize = 256 * 1024;

/// Maximum upper-layer payload: 64 KB
pub const MAX_PAYLOAD_SIZE: usize = 64 * 1024;

/// Serialize a Message to bytes (bincode)
pub fn encode_message(msg: &Message) -> Result<Vec<u8>> {
    if let Some(payload) = msg.body.payload() {
        if payload.len() > MAX_PAYLOAD_SIZE {
            bail!(
                "Payload too large: {} bytes (max {})",
                payload.len(),
                MAX_PAYLOAD_SIZE
            );
        }
    }

    let bytes = bincode::serialize(msg)?;

    if bytes.len() > MAX_MESSAGE_SIZE {
        bail!(
            "Encoded message too large: {} bytes (max {})",
            bytes.len(),
            MAX_MESSAGE_SIZE
        );
    }

    Ok(bytes)
}

/// Deserialize bytes to a Message
pub fn decode_message(bytes: &[u8]) -> Result<Message> {
    if bytes.len() > MAX_MESSAGE_SIZE {
        bail!(
            "Message too large: {} bytes (max {})",
            bytes.len(),
            MAX_MESSAGE_SIZE
        );
    }

    let msg: Message = bincode::deserialize(bytes)?;
    Ok(msg)
}
