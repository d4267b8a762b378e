//! Message framing for transfer streams.
//!
//! # Wire format
//!
//! ```text
//! [4 bytes BE: frame_len]
//! [frame_len bytes: frame body]
//! ```
//!
//! Each `send_frame` call is one discrete unit on the receiving side.
//! Closing the write half is the end-of-transfer signal; a peer that
//! disappears mid-frame surfaces as an I/O error, never as a short frame.

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use crate::constants::MAX_FRAME_SIZE;
use crate::error::ProtocolError;

/// Byte stream a transport hands out: readable, writable, movable across tasks.
pub trait StreamIo: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin + ?Sized> StreamIo for T {}

/// Framed stream over a type-erased transport stream.
pub type TransferStream = FrameStream<Box<dyn StreamIo>>;

/// Length-delimited frame reader/writer over a raw byte stream.
pub struct FrameStream<T> {
    inner: Framed<T, LengthDelimitedCodec>,
}

impl<T: AsyncRead + AsyncWrite + Unpin> FrameStream<T> {
    pub fn new(io: T) -> Self {
        let codec = LengthDelimitedCodec::builder()
            .length_field_type::<u32>()
            .max_frame_length(MAX_FRAME_SIZE)
            .new_codec();
        Self {
            inner: Framed::new(io, codec),
        }
    }

    /// Writes one frame and flushes it.
    ///
    /// May suspend while the transport applies backpressure.
    pub async fn send_frame(&mut self, frame: Bytes) -> Result<(), ProtocolError> {
        if frame.len() > MAX_FRAME_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size: frame.len(),
                max: MAX_FRAME_SIZE,
            });
        }
        self.inner.send(frame).await?;
        Ok(())
    }

    /// Reads the next frame. Returns `None` once the peer closed its write
    /// side cleanly.
    pub async fn next_frame(&mut self) -> Result<Option<Bytes>, ProtocolError> {
        match self.inner.next().await {
            Some(Ok(frame)) => Ok(Some(frame.freeze())),
            Some(Err(e)) => Err(e.into()),
            None => Ok(None),
        }
    }

    /// Flushes pending frames and shuts down the write side.
    pub async fn close(&mut self) -> Result<(), ProtocolError> {
        SinkExt::<Bytes>::close(&mut self.inner).await?;
        Ok(())
    }
}

impl FrameStream<Box<dyn StreamIo>> {
    /// Type-erases a transport stream.
    pub fn boxed<T: StreamIo + 'static>(io: T) -> Self {
        FrameStream::new(Box::new(io) as Box<dyn StreamIo>)
    }
}
