//! Error types for playback sinks and the buffer adapter.

/// Errors reported by a [`MediaSink`](crate::MediaSink).
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("sink is busy")]
    Busy,

    #[error("sink rejected data: {0}")]
    Rejected(String),

    #[error("sink closed")]
    Closed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors produced by the [`PlaybackBuffer`](crate::PlaybackBuffer).
#[derive(Debug, thiserror::Error)]
pub enum PlaybackError {
    #[error("unsupported format: {0}")]
    Unsupported(String),

    #[error("failed to create sink: {0}")]
    SinkUnavailable(#[source] SinkError),

    #[error("append rejected: {0}")]
    AppendRejected(#[source] SinkError),

    #[error("sink dropped its ready callback")]
    SinkClosed,

    #[error("playback buffer already finished")]
    Finished,

    #[error("flusher task failed: {0}")]
    Flusher(String),
}
