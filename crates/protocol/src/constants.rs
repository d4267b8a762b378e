use std::fmt;
use std::time::Duration;

use crate::error::ProtocolError;

/// Protocol identifier negotiated for audio stream transfers.
pub const AUDIO_STREAM_PROTOCOL: &str = "/capystream/audio-stream/1.0.0";

/// Default maximum payload chunk size (256 KiB).
pub const DEFAULT_CHUNK_SIZE: usize = 256 * 1024;

/// Default delay between two payload frame writes.
pub const DEFAULT_PACING: Duration = Duration::from_millis(20);

/// Largest frame accepted on a transfer stream (8 MiB).
pub const MAX_FRAME_SIZE: usize = 8 * 1024 * 1024;

/// Largest metadata handshake frame accepted (16 KiB).
pub const MAX_METADATA_SIZE: usize = 16 * 1024;

/// Longest protocol identifier accepted (fits the u16 negotiation prefix).
pub const MAX_PROTOCOL_ID_LEN: usize = 256;

/// Identifier used to negotiate a stream with the transport.
///
/// Peers whose identifiers differ never get a stream; versions therefore
/// live side by side as distinct identifiers (`.../1.0.0`, `.../2.0.0`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProtocolId(String);

impl ProtocolId {
    /// Validates and wraps a protocol identifier.
    ///
    /// Identifiers are non-empty, start with `/`, contain no whitespace and
    /// are at most [`MAX_PROTOCOL_ID_LEN`] bytes long.
    pub fn new(id: impl Into<String>) -> Result<Self, ProtocolError> {
        let id = id.into();
        if !id.starts_with('/') {
            return Err(ProtocolError::InvalidProtocolId(format!(
                "must start with '/': {id:?}"
            )));
        }
        if id.len() > MAX_PROTOCOL_ID_LEN {
            return Err(ProtocolError::InvalidProtocolId(format!(
                "too long: {} bytes (max {MAX_PROTOCOL_ID_LEN})",
                id.len()
            )));
        }
        if id.chars().any(char::is_whitespace) {
            return Err(ProtocolError::InvalidProtocolId(format!(
                "contains whitespace: {id:?}"
            )));
        }
        Ok(Self(id))
    }

    /// The default audio stream protocol, [`AUDIO_STREAM_PROTOCOL`].
    pub fn audio_stream() -> Self {
        Self(AUDIO_STREAM_PROTOCOL.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ProtocolId {
    fn default() -> Self {
        Self::audio_stream()
    }
}

impl fmt::Display for ProtocolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for ProtocolId {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}
