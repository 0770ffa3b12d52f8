//! Rendezvous control records exchanged between a peer and the relay.
//!
//! Control traffic is textual and tagged so that the relay can evolve
//! independently of the binary peer protocol it forwards. Once a room
//! is paired the control channel falls silent, except for the `Leave`
//! the relay emits toward a partner whose peer disconnected.
use crate::errors::CaesarError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which side of the transfer a peer is joining as.
#[derive(Serialize, Deserialize, PartialEq, Eq, Debug, Copy, Clone, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Sender,
    Receiver,
}

impl Role {
    /// The role this one pairs with.
    pub fn partner(self) -> Role {
        match self {
            Role::Sender => Role::Receiver,
            Role::Receiver => Role::Sender,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Sender => write!(f, "sender"),
            Role::Receiver => write!(f, "receiver"),
        }
    }
}

/// Outcome of a join request, as reported by the relay.
#[derive(Serialize, Deserialize, PartialEq, Eq, Debug, Copy, Clone)]
#[serde(rename_all = "kebab-case")]
pub enum JoinStatus {
    Ok,
    NameInUse,
    NoSuchTransfer,
    AlreadyPaired,
}

impl JoinStatus {
    /// Map a refusal onto the session error it means for the peer.
    pub fn into_result(self) -> Result<(), CaesarError> {
        match self {
            JoinStatus::Ok => Ok(()),
            JoinStatus::NameInUse => Err(CaesarError::NameInUse),
            JoinStatus::NoSuchTransfer => Err(CaesarError::NoSuchTransfer),
            JoinStatus::AlreadyPaired => Err(CaesarError::AlreadyPaired),
        }
    }
}

/// The tagged union carried by control frames.
#[derive(Serialize, Deserialize, PartialEq, Debug, Clone)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ControlMessage {
    /// Request to create (sender) or enter (receiver) a room.
    Join { role: Role, name: String },
    /// Relay verdict on a join.
    JoinAck { status: JoinStatus },
    /// Emitted to the sender once the receiver has arrived.
    Paired,
    /// Orderly departure; the relay forwards it to the partner.
    Leave,
}

impl ControlMessage {
    /// Serialize to the textual wire form.
    pub fn encode(&self) -> Result<Vec<u8>, CaesarError> {
        serde_json::to_vec(self).map_err(|_| CaesarError::MalformedFrame)
    }

    /// Parse a control frame body. Unknown kinds or missing fields are
    /// malformed; the relay treats that as a bad request.
    pub fn decode(body: &[u8]) -> Result<Self, CaesarError> {
        serde_json::from_slice(body).map_err(|_| CaesarError::MalformedFrame)
    }
}
