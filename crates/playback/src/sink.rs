use std::path::PathBuf;

use bytes::Bytes;

use capystream_protocol::TransferMetadata;

use crate::error::SinkError;

/// Called once when a busy sink becomes ready for the next append.
pub type ReadyCallback = Box<dyn FnOnce() + Send>;

/// Capability interface of a progressive media sink.
///
/// A sink consumes one append at a time. While it is still digesting the
/// previous append, [`is_busy`](Self::is_busy) returns `true` and another
/// [`append`](Self::append) must not be issued; a sink may answer such a
/// call with [`SinkError::Busy`].
pub trait MediaSink: Send {
    /// Whether the previous append is still being consumed.
    fn is_busy(&self) -> bool;

    /// Hands bytes to the sink. Only valid while not busy.
    fn append(&mut self, bytes: Bytes) -> Result<(), SinkError>;

    /// Registers `callback` to run once the sink is no longer busy.
    ///
    /// Runs `callback` immediately if the sink is idle. Dropping the
    /// callback without running it means the sink shut down.
    fn on_ready(&mut self, callback: ReadyCallback);

    /// No more appends will follow.
    fn end_of_stream(&mut self) -> Result<(), SinkError> {
        Ok(())
    }

    /// Handle an external player can attach to.
    fn resource(&self) -> PlayableResource;
}

/// Creates one fresh sink per transfer.
pub trait SinkFactory: Send + Sync {
    fn create(&self, metadata: &TransferMetadata) -> Result<Box<dyn MediaSink>, SinkError>;
}

/// A resource that becomes playable while bytes are still arriving.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayableResource {
    /// Unique per transfer.
    pub id: String,
    pub mime_type: String,
    pub display_name: Option<String>,
    /// Backing file, for file-backed sinks.
    pub path: Option<PathBuf>,
}

impl PlayableResource {
    pub fn new(metadata: &TransferMetadata) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            mime_type: metadata.mime_type().to_string(),
            display_name: metadata.display_name().map(str::to_string),
            path: None,
        }
    }

    pub fn with_path(mut self, path: PathBuf) -> Self {
        self.path = Some(path);
        self
    }
}
