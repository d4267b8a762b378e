//! Error types for the transport substrate.

use capystream_protocol::{ProtocolError, ProtocolId};

use crate::PeerId;

/// Errors produced while dialing, accepting or negotiating streams.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unknown peer: {0}")]
    UnknownPeer(PeerId),

    #[error("peer unreachable: {0}")]
    Unreachable(String),

    #[error("peer {peer} does not support protocol {protocol}")]
    UnsupportedProtocol { peer: PeerId, protocol: ProtocolId },

    #[error("handler already registered for {0}")]
    AlreadyRegistered(ProtocolId),

    #[error("negotiation error: {0}")]
    Negotiation(String),

    #[error("connection timed out")]
    Timeout,
}

impl From<ProtocolError> for TransportError {
    fn from(e: ProtocolError) -> Self {
        match e {
            ProtocolError::Io(io) => TransportError::Io(io),
            other => TransportError::Negotiation(other.to_string()),
        }
    }
}
