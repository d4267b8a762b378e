//! Peer-to-peer chunked transfer with progressive playback.
//!
//! A [`SenderSession`] dials one peer, writes the metadata handshake and
//! then the payload split into bounded chunks. A [`ReceiverSession`] reads
//! the handshake, opens a [`PlaybackBuffer`](capystream_playback::PlaybackBuffer)
//! for the declared mime type and feeds it every following frame in
//! arrival order. [`ReceiverService`] wires receiver sessions to a
//! transport's inbound handler.

mod chunked;
mod error;
mod progress;
mod receiver;
mod sender;
mod service;
mod session;
#[cfg(test)]
mod testing;

pub use chunked::{Chunks, chunk_count, split, split_slices};
pub use error::{FailureKind, TransferError};
pub use progress::{SpeedCalculator, TransferProgress};
pub use receiver::{ReceiverConfig, ReceiverEvent, ReceiverSession};
pub use sender::{SenderConfig, SenderSession, send_payload};
pub use service::ReceiverService;
pub use session::{SessionRole, TransferSession, TransferState, TransferSummary};

pub use capystream_protocol::DEFAULT_CHUNK_SIZE;
