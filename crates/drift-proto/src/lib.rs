//! Shared wire protocol for the drift signaling channel.
//! Both the pier (server) and the client core speak these messages, so the
//! definitions live in a dedicated crate instead of being duplicated on each
//! side of the socket.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Role assigned to each member of a pairing. The caller initiates the media
/// handshake, the receiver waits for the inbound offer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PairRole {
    Caller,
    Receiver,
}

impl PairRole {
    /// The role the partner was assigned.
    pub fn opposite(self) -> Self {
        match self {
            PairRole::Caller => PairRole::Receiver,
            PairRole::Receiver => PairRole::Caller,
        }
    }
}

impl std::fmt::Display for PairRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PairRole::Caller => write!(f, "caller"),
            PairRole::Receiver => write!(f, "receiver"),
        }
    }
}

/// Search preferences snapshotted from the client's profile store at the
/// moment the search starts. All of these are advisory for pairing; the
/// engine records them but matches on availability.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SearchAttributes {
    #[serde(default)]
    pub interests: Vec<String>,
    #[serde(default)]
    pub gender: Option<String>,
    #[serde(default)]
    pub age: Option<u32>,
    #[serde(default)]
    pub country: Option<String>,
}

/// Messages sent from client to the pier
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    /// Enter the search queue with the given identity and preferences
    #[serde(rename_all = "camelCase")]
    StartSearch {
        peer_id: String,
        #[serde(flatten)]
        attributes: SearchAttributes,
    },
    /// Leave the search queue; idempotent
    StopSearch,
    /// Heartbeat to keep the channel alive
    Ping,
}

/// Messages sent from the pier to a client
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    /// A pairing was formed; at most one of these per client per pairing
    #[serde(rename_all = "camelCase")]
    MatchFound {
        partner_peer_id: String,
        role: PairRole,
    },
    /// Response to ping
    Pong,
    /// The pier could not process the last message
    Error { message: String },
}

/// Generate a unique peer identity
pub fn generate_peer_id() -> String {
    Uuid::new_v4().to_string()
}
