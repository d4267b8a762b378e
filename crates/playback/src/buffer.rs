//! Playback buffer adapter.
//!
//! The adapter owns its sink through a single flusher task: that task is
//! the only code that ever calls [`MediaSink::append`], and it does so only
//! after the sink reported ready. Frames handed to
//! [`PlaybackBuffer::append`] wait in a bounded queue in arrival order; a
//! full queue suspends the caller, which in turn stops reading from the
//! network.

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use capystream_protocol::TransferMetadata;

use crate::error::{PlaybackError, SinkError};
use crate::probe::FormatProbe;
use crate::sink::{MediaSink, PlayableResource, SinkFactory};

/// Default number of frames that may wait for the sink.
pub const DEFAULT_PENDING_FRAMES: usize = 32;

/// Totals flushed into the sink.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub frames: u64,
    pub bytes: u64,
}

/// Handle to one progressive sink and its pending-frame queue.
pub struct PlaybackBuffer {
    tx: Option<mpsc::Sender<Bytes>>,
    flusher: Option<JoinHandle<Result<FlushReport, PlaybackError>>>,
    resource: PlayableResource,
    capacity: usize,
}

impl PlaybackBuffer {
    /// Creates a buffer bound to a fresh sink for `metadata`.
    ///
    /// Fails synchronously with [`PlaybackError::Unsupported`] when the
    /// probe rejects the mime type; no sink is created in that case.
    /// Must be called from within a tokio runtime.
    pub fn open(
        metadata: &TransferMetadata,
        probe: &dyn FormatProbe,
        factory: &dyn SinkFactory,
        capacity: usize,
    ) -> Result<Self, PlaybackError> {
        if !probe.supports(metadata.mime_type()) {
            return Err(PlaybackError::Unsupported(metadata.mime_type().to_string()));
        }
        let sink = factory
            .create(metadata)
            .map_err(PlaybackError::SinkUnavailable)?;
        Ok(Self::with_sink(sink, capacity))
    }

    /// Wraps an already created sink. A capacity of 0 is raised to 1.
    pub fn with_sink(sink: Box<dyn MediaSink>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let resource = sink.resource();
        let (tx, rx) = mpsc::channel(capacity);
        let flusher = tokio::spawn(flush_loop(sink, rx));
        debug!(resource = %resource.id, capacity, "playback buffer opened");
        Self {
            tx: Some(tx),
            flusher: Some(flusher),
            resource,
            capacity,
        }
    }

    pub fn resource(&self) -> &PlayableResource {
        &self.resource
    }

    /// Queues `bytes` behind every earlier frame.
    ///
    /// Suspends while the queue is full. Returns the sink's error once the
    /// flusher has stopped on a rejected append; after that the buffer
    /// accepts nothing more.
    pub async fn append(&mut self, bytes: Bytes) -> Result<(), PlaybackError> {
        let tx = self.tx.as_ref().ok_or(PlaybackError::Finished)?;
        if tx.send(bytes).await.is_ok() {
            return Ok(());
        }
        self.tx = None;
        Err(self.join_flusher().await.err().unwrap_or(PlaybackError::Finished))
    }

    /// Frames queued but not yet handed to the sink.
    pub fn pending(&self) -> usize {
        self.tx
            .as_ref()
            .map_or(0, |tx| self.capacity - tx.capacity())
    }

    /// Whether the next append would suspend.
    pub fn is_saturated(&self) -> bool {
        self.tx.as_ref().is_some_and(|tx| tx.capacity() == 0)
    }

    /// Flushes every queued frame, signals end-of-stream to the sink and
    /// returns what was written.
    pub async fn finish(mut self) -> Result<FlushReport, PlaybackError> {
        self.tx = None;
        self.join_flusher().await
    }

    /// Stops the flusher without draining the queue.
    pub fn abort(mut self) {
        self.tx = None;
        if let Some(flusher) = self.flusher.take() {
            flusher.abort();
        }
    }

    async fn join_flusher(&mut self) -> Result<FlushReport, PlaybackError> {
        let flusher = self.flusher.take().ok_or(PlaybackError::Finished)?;
        match flusher.await {
            Ok(result) => result,
            Err(e) => Err(PlaybackError::Flusher(e.to_string())),
        }
    }
}

async fn flush_loop(
    mut sink: Box<dyn MediaSink>,
    mut rx: mpsc::Receiver<Bytes>,
) -> Result<FlushReport, PlaybackError> {
    let mut report = FlushReport::default();

    while let Some(frame) = rx.recv().await {
        let len = frame.len() as u64;
        let mut busy_retries: u32 = 0;
        loop {
            wait_ready(sink.as_mut()).await?;
            match sink.append(frame.clone()) {
                Ok(()) => break,
                Err(SinkError::Busy) => {
                    busy_retries += 1;
                    trace!(busy_retries, "sink refused append while busy, requeueing");
                    next_ready(sink.as_mut()).await?;
                    tokio::task::yield_now().await;
                }
                Err(e) => {
                    warn!(error = %e, frames = report.frames, "sink rejected append");
                    return Err(PlaybackError::AppendRejected(e));
                }
            }
        }
        report.frames += 1;
        report.bytes += len;
        trace!(frame = report.frames, len, "frame appended");
    }

    wait_ready(sink.as_mut()).await?;
    sink.end_of_stream()
        .map_err(PlaybackError::AppendRejected)?;
    debug!(frames = report.frames, bytes = report.bytes, "playback buffer drained");
    Ok(report)
}

async fn wait_ready(sink: &mut dyn MediaSink) -> Result<(), PlaybackError> {
    while sink.is_busy() {
        next_ready(sink).await?;
    }
    Ok(())
}

/// Waits for one `on_ready` callback.
async fn next_ready(sink: &mut dyn MediaSink) -> Result<(), PlaybackError> {
    let (tx, rx) = oneshot::channel();
    sink.on_ready(Box::new(move || {
        let _ = tx.send(());
    }));
    rx.await.map_err(|_| PlaybackError::SinkClosed)
}
