//! In-memory sink.
//!
//! Consumes appends synchronously and is never busy. Used for loopback
//! playback of short clips and as the reference sink in tests.

use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;

use capystream_protocol::TransferMetadata;

use crate::error::SinkError;
use crate::sink::{MediaSink, PlayableResource, ReadyCallback, SinkFactory};

#[derive(Default)]
struct MemoryState {
    frames: Vec<Bytes>,
    finished: bool,
}

/// Sink that keeps every appended frame in memory.
pub struct MemorySink {
    state: Arc<Mutex<MemoryState>>,
    resource: PlayableResource,
}

/// Read side of a [`MemorySink`], usable after the sink moved into a buffer.
#[derive(Clone)]
pub struct MemorySinkHandle {
    state: Arc<Mutex<MemoryState>>,
    resource: PlayableResource,
}

impl MemorySink {
    pub fn new(metadata: &TransferMetadata) -> (Self, MemorySinkHandle) {
        let state = Arc::new(Mutex::new(MemoryState::default()));
        let resource = PlayableResource::new(metadata);
        let handle = MemorySinkHandle {
            state: state.clone(),
            resource: resource.clone(),
        };
        (Self { state, resource }, handle)
    }
}

impl MediaSink for MemorySink {
    fn is_busy(&self) -> bool {
        false
    }

    fn append(&mut self, bytes: Bytes) -> Result<(), SinkError> {
        let mut s = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if s.finished {
            return Err(SinkError::Closed);
        }
        s.frames.push(bytes);
        Ok(())
    }

    fn on_ready(&mut self, callback: ReadyCallback) {
        callback();
    }

    fn end_of_stream(&mut self) -> Result<(), SinkError> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .finished = true;
        Ok(())
    }

    fn resource(&self) -> PlayableResource {
        self.resource.clone()
    }
}

impl MemorySinkHandle {
    /// Frames in append order.
    pub fn frames(&self) -> Vec<Bytes> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .frames
            .clone()
    }

    /// All appended bytes, concatenated.
    pub fn data(&self) -> Vec<u8> {
        let s = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        s.frames.iter().flat_map(|f| f.iter().copied()).collect()
    }

    /// Whether end-of-stream was signalled.
    pub fn is_finished(&self) -> bool {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .finished
    }

    pub fn resource(&self) -> &PlayableResource {
        &self.resource
    }
}

/// Creates [`MemorySink`]s and remembers a handle to each.
#[derive(Clone, Default)]
pub struct MemorySinkFactory {
    sinks: Arc<Mutex<Vec<MemorySinkHandle>>>,
}

impl MemorySinkFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handles of every sink created so far, oldest first.
    pub fn sinks(&self) -> Vec<MemorySinkHandle> {
        self.sinks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl SinkFactory for MemorySinkFactory {
    fn create(&self, metadata: &TransferMetadata) -> Result<Box<dyn MediaSink>, SinkError> {
        let (sink, handle) = MemorySink::new(metadata);
        self.sinks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handle);
        Ok(Box::new(sink))
    }
}
