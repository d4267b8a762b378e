//! Progressive playback buffer for CapyStream receivers.
//!
//! [`PlaybackBuffer`] bridges discrete append calls coming off the network
//! to a continuously playing [`MediaSink`]. The sink accepts one append at
//! a time and reports when it has consumed it; the buffer keeps a bounded
//! queue of frames that arrived in the meantime and flushes them in order
//! as soon as the sink is ready again.
//!
//! Backends plug in through three seams:
//!
//! - [`MediaSink`]: the busy/append/ready capability of one sink.
//! - [`SinkFactory`]: creates a fresh sink per transfer.
//! - [`FormatProbe`]: tells whether the host can decode a mime type.

pub mod buffer;
pub mod error;
pub mod file_sink;
pub mod memory_sink;
pub mod probe;
pub mod sink;

pub use buffer::{DEFAULT_PENDING_FRAMES, FlushReport, PlaybackBuffer};
pub use error::{PlaybackError, SinkError};
pub use file_sink::{FileSink, FileSinkFactory};
pub use memory_sink::{MemorySink, MemorySinkFactory, MemorySinkHandle};
pub use probe::{FormatProbe, MimeAllowList};
pub use sink::{MediaSink, PlayableResource, ReadyCallback, SinkFactory};
