//! Wire protocol types for CapyStream peer-to-peer audio streaming.
//!
//! A transfer is one message-framed stream:
//!
//! ```text
//! FRAME 0        metadata handshake (compact JSON, see [`metadata`])
//! FRAME 1..N     raw payload chunks, in order
//! EOF            sender closed its write side
//! ```
//!
//! The handshake is positional: the receiver recognises it only by being
//! first. There is no tag byte and no sequence number.

pub mod constants;
pub mod error;
pub mod frame;
pub mod metadata;

pub use constants::{
    AUDIO_STREAM_PROTOCOL, DEFAULT_CHUNK_SIZE, DEFAULT_PACING, MAX_FRAME_SIZE, ProtocolId,
};
pub use error::ProtocolError;
pub use frame::{FrameStream, StreamIo, TransferStream};
pub use metadata::TransferMetadata;
