//! Metadata handshake frame.
//!
//! Frame 0 of every transfer. Encoded as compact JSON:
//!
//! ```text
//! {"mimeType":"audio/mpeg","displayName":"track.mp3","totalBytes":614400}
//! ```
//!
//! `mimeType` is required and non-empty. `displayName` and `totalBytes` are
//! optional and omitted when absent. Unknown fields are ignored so newer
//! senders stay readable by older receivers.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::constants::MAX_METADATA_SIZE;
use crate::error::ProtocolError;

/// Describes the payload that follows the handshake frame.
///
/// Built once per transfer and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferMetadata {
    mime_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    total_bytes: Option<u64>,
}

impl TransferMetadata {
    /// Creates metadata for a payload of the given mime type.
    pub fn new(mime_type: impl Into<String>) -> Result<Self, ProtocolError> {
        let metadata = Self {
            mime_type: mime_type.into(),
            display_name: None,
            total_bytes: None,
        };
        metadata.validate()?;
        Ok(metadata)
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    /// Declares the exact payload size so the receiver can tell a finished
    /// transfer from a truncated one.
    pub fn with_total_bytes(mut self, total: u64) -> Self {
        self.total_bytes = Some(total);
        self
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn display_name(&self) -> Option<&str> {
        self.display_name.as_deref()
    }

    pub fn total_bytes(&self) -> Option<u64> {
        self.total_bytes
    }

    /// Mime type without parameters, lowercased (`audio/ogg; codecs=opus`
    /// becomes `audio/ogg`).
    pub fn essence(&self) -> String {
        mime_essence(&self.mime_type)
    }

    /// Serializes the handshake frame.
    ///
    /// Fails when the result would exceed [`MAX_METADATA_SIZE`], which
    /// [`decode`](Self::decode) refuses.
    pub fn encode(&self) -> Result<Bytes, ProtocolError> {
        self.validate()?;
        let json = serde_json::to_vec(self)
            .map_err(|e| ProtocolError::InvalidMetadata(e.to_string()))?;
        if json.len() > MAX_METADATA_SIZE {
            return Err(ProtocolError::InvalidMetadata(format!(
                "handshake is {} bytes (max {MAX_METADATA_SIZE})",
                json.len()
            )));
        }
        Ok(Bytes::from(json))
    }

    /// Parses a handshake frame.
    pub fn decode(frame: &[u8]) -> Result<Self, ProtocolError> {
        if frame.len() > MAX_METADATA_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size: frame.len(),
                max: MAX_METADATA_SIZE,
            });
        }
        let metadata: Self = serde_json::from_slice(frame)
            .map_err(|e| ProtocolError::MalformedMetadata(e.to_string()))?;
        metadata
            .validate()
            .map_err(|e| ProtocolError::MalformedMetadata(e.to_string()))?;
        Ok(metadata)
    }

    fn validate(&self) -> Result<(), ProtocolError> {
        if self.mime_type.trim().is_empty() {
            return Err(ProtocolError::InvalidMetadata(
                "mimeType must not be empty".into(),
            ));
        }
        Ok(())
    }
}

/// Strips parameters and lowercases a mime type.
pub fn mime_essence(mime: &str) -> String {
    mime.split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}
