use capystream_playback::PlaybackError;
use capystream_protocol::ProtocolError;
use capystream_transport::TransportError;

/// Why a transfer session ended in `Failed`.
///
/// Every variant is terminal for its session; nothing is retried.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("dial failed: {0}")]
    Dial(#[source] TransportError),

    #[error("invalid metadata: {0}")]
    InvalidMetadata(String),

    #[error("invalid sender config: {0}")]
    InvalidConfig(String),

    #[error("handshake decode failed: {0}")]
    HandshakeDecode(String),

    #[error("stream closed before handshake")]
    ClosedBeforeHandshake,

    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("sink unavailable: {0}")]
    SinkUnavailable(#[source] PlaybackError),

    #[error("write failed mid-stream: {0}")]
    MidStreamWrite(#[source] ProtocolError),

    #[error("read failed mid-stream: {0}")]
    MidStreamRead(#[source] ProtocolError),

    #[error("append rejected: {0}")]
    AppendRejected(#[source] PlaybackError),

    #[error("transfer truncated: expected {expected} bytes, received {received}")]
    Truncated { expected: u64, received: u64 },

    #[error("timed out waiting for data")]
    Timeout,

    #[error("cancelled")]
    Cancelled,
}

/// Flat tag for a [`TransferError`], for callers that only branch on the
/// failure class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    DialFailure,
    InvalidMetadata,
    InvalidConfig,
    HandshakeDecodeFailure,
    UnsupportedFormat,
    SinkUnavailable,
    MidStreamWriteFailure,
    MidStreamReadFailure,
    AppendRejected,
    Truncated,
    Timeout,
    Cancelled,
}

impl TransferError {
    pub fn kind(&self) -> FailureKind {
        match self {
            TransferError::Dial(_) => FailureKind::DialFailure,
            TransferError::InvalidMetadata(_) => FailureKind::InvalidMetadata,
            TransferError::InvalidConfig(_) => FailureKind::InvalidConfig,
            TransferError::HandshakeDecode(_) | TransferError::ClosedBeforeHandshake => {
                FailureKind::HandshakeDecodeFailure
            }
            TransferError::UnsupportedFormat(_) => FailureKind::UnsupportedFormat,
            TransferError::SinkUnavailable(_) => FailureKind::SinkUnavailable,
            TransferError::MidStreamWrite(_) => FailureKind::MidStreamWriteFailure,
            TransferError::MidStreamRead(_) => FailureKind::MidStreamReadFailure,
            TransferError::AppendRejected(_) => FailureKind::AppendRejected,
            TransferError::Truncated { .. } => FailureKind::Truncated,
            TransferError::Timeout => FailureKind::Timeout,
            TransferError::Cancelled => FailureKind::Cancelled,
        }
    }
}

impl From<PlaybackError> for TransferError {
    fn from(e: PlaybackError) -> Self {
        match e {
            PlaybackError::Unsupported(mime) => TransferError::UnsupportedFormat(mime),
            e @ PlaybackError::SinkUnavailable(_) => TransferError::SinkUnavailable(e),
            e => TransferError::AppendRejected(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use capystream_playback::SinkError;

    #[test]
    fn unsupported_playback_keeps_offending_mime() {
        let err = TransferError::from(PlaybackError::Unsupported("audio/x-foo".into()));
        assert_eq!(err.kind(), FailureKind::UnsupportedFormat);
        assert_eq!(err.to_string(), "unsupported format: audio/x-foo");
    }

    #[test]
    fn rejected_append_maps_to_append_rejected() {
        let err = TransferError::from(PlaybackError::AppendRejected(SinkError::Closed));
        assert_eq!(err.kind(), FailureKind::AppendRejected);
    }

    #[test]
    fn closed_before_handshake_is_a_handshake_failure() {
        assert_eq!(
            TransferError::ClosedBeforeHandshake.kind(),
            FailureKind::HandshakeDecodeFailure
        );
    }
}
