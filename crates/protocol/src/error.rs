//! Error types for the wire protocol.

/// Errors produced while encoding or decoding protocol frames.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid protocol id: {0}")]
    InvalidProtocolId(String),

    #[error("invalid metadata: {0}")]
    InvalidMetadata(String),

    #[error("malformed metadata frame: {0}")]
    MalformedMetadata(String),

    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },
}
