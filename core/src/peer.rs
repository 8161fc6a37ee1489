//! Peer and message identifiers

use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;
use std::sync::atomic::{AtomicU32, Ordering};
use thiserror::Error;

/// Node identifier on the ad hoc network
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct PeerId(pub u32);

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for PeerId {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(PeerId)
    }
}

impl From<u32> for PeerId {
    fn from(id: u32) -> Self {
        PeerId(id)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Invalid message id {0:?}: expected <peer>:<sequence>")]
pub struct MessageIdError(pub String);

/// Network-wide message identifier: originating peer plus a per-peer sequence.
/// Forwarded copies keep the id of the message they copy, so the id of a
/// search doubles as the identifier of the routes it creates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageId {
    pub origin: PeerId,
    pub seq: u32,
}

impl MessageId {
    pub fn new(origin: PeerId, seq: u32) -> Self {
        Self { origin, seq }
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.origin, self.seq)
    }
}

impl FromStr for MessageId {
    type Err = MessageIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || MessageIdError(s.to_string());
        let (origin, seq) = s.split_once(':').ok_or_else(invalid)?;
        Ok(MessageId {
            origin: origin.parse().map_err(|_| invalid())?,
            seq: seq.trim().parse().map_err(|_| invalid())?,
        })
    }
}

/// Per-node generator of fresh message ids
#[derive(Debug)]
pub struct MessageIdGenerator {
    origin: PeerId,
    next: AtomicU32,
}

impl MessageIdGenerator {
    pub fn new(origin: PeerId) -> Self {
        Self {
            origin,
            next: AtomicU32::new(0),
        }
    }

    pub fn next_id(&self) -> MessageId {
        MessageId::new(self.origin, self.next.fetch_add(1, Ordering::Relaxed))
    }
}
