//! Stream negotiation for the TCP substrate.
//!
//! # Wire format
//!
//! ```text
//! REQUEST (dialer -> listener):
//!   [2 bytes BE: protocol_len]
//!   [protocol_len bytes: protocol id UTF-8]
//!   [2 bytes BE: peer_len]
//!   [peer_len bytes: dialer peer id UTF-8]
//!
//! RESPONSE (listener -> dialer): [1 byte: 0x01=accepted, 0x00=unsupported]
//! ```
//!
//! After an accepted response the connection carries transfer frames only.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use capystream_protocol::ProtocolId;

use crate::error::TransportError;
use crate::PeerId;

/// Negotiation response: protocol accepted.
pub const PROTOCOL_ACCEPTED: u8 = 0x01;

/// Negotiation response: no handler for the protocol.
pub const PROTOCOL_UNSUPPORTED: u8 = 0x00;

/// Longest peer id carried in a request.
pub const MAX_PEER_ID_LEN: usize = 1024;

/// What the dialer asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiationRequest {
    pub protocol: ProtocolId,
    pub peer: PeerId,
}

/// Writes the negotiation request and flushes it.
pub async fn write_request<W: AsyncWrite + Unpin>(
    writer: &mut W,
    request: &NegotiationRequest,
) -> Result<(), TransportError> {
    write_str(writer, request.protocol.as_str()).await?;
    let peer = request.peer.as_str();
    if peer.is_empty() || peer.len() > MAX_PEER_ID_LEN {
        return Err(TransportError::Negotiation(format!(
            "peer id must be 1..={MAX_PEER_ID_LEN} bytes, got {}",
            peer.len()
        )));
    }
    write_str(writer, peer).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads a negotiation request.
pub async fn read_request<R: AsyncRead + Unpin>(
    reader: &mut R,
) -> Result<NegotiationRequest, TransportError> {
    let protocol = read_str(reader, capystream_protocol::constants::MAX_PROTOCOL_ID_LEN).await?;
    let protocol = ProtocolId::new(protocol)?;
    let peer = read_str(reader, MAX_PEER_ID_LEN).await?;
    if peer.is_empty() {
        return Err(TransportError::Negotiation("empty peer id".into()));
    }
    Ok(NegotiationRequest {
        protocol,
        peer: PeerId::new(peer),
    })
}

/// Writes the negotiation response byte.
pub async fn write_response<W: AsyncWrite + Unpin>(
    writer: &mut W,
    accepted: bool,
) -> Result<(), TransportError> {
    writer
        .write_u8(if accepted {
            PROTOCOL_ACCEPTED
        } else {
            PROTOCOL_UNSUPPORTED
        })
        .await?;
    writer.flush().await?;
    Ok(())
}

/// Reads the negotiation response byte.
pub async fn read_response<R: AsyncRead + Unpin>(reader: &mut R) -> Result<bool, TransportError> {
    match reader.read_u8().await? {
        PROTOCOL_ACCEPTED => Ok(true),
        PROTOCOL_UNSUPPORTED => Ok(false),
        other => Err(TransportError::Negotiation(format!(
            "unexpected response byte 0x{other:02x}"
        ))),
    }
}

async fn write_str<W: AsyncWrite + Unpin>(writer: &mut W, s: &str) -> Result<(), TransportError> {
    let len = s.len();
    if len > u16::MAX as usize {
        return Err(TransportError::Negotiation(format!(
            "field too long: {len} bytes"
        )));
    }
    writer.write_u16(len as u16).await?;
    writer.write_all(s.as_bytes()).await?;
    Ok(())
}

async fn read_str<R: AsyncRead + Unpin>(
    reader: &mut R,
    max: usize,
) -> Result<String, TransportError> {
    let len = reader.read_u16().await? as usize;
    if len > max {
        return Err(TransportError::Negotiation(format!(
            "field too long: {len} bytes (max {max})"
        )));
    }
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    String::from_utf8(buf).map_err(|e| TransportError::Negotiation(format!("invalid UTF-8: {e}")))
}
