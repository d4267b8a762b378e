//! Per-stream session bookkeeping shared by sender and receiver.

use std::fmt;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{trace, warn};

use capystream_protocol::{ProtocolId, TransferMetadata};
use capystream_transport::PeerId;

use crate::error::{FailureKind, TransferError};
use crate::progress::{SpeedCalculator, TransferProgress};

/// Lifecycle of one transfer. `Completed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    AwaitingMetadata,
    Streaming,
    Completed,
    Failed(FailureKind),
}

impl TransferState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransferState::Completed | TransferState::Failed(_))
    }

    fn can_become(&self, next: &TransferState) -> bool {
        use TransferState::*;
        match (self, next) {
            (AwaitingMetadata, Streaming) => true,
            (AwaitingMetadata | Streaming, Failed(_)) => true,
            (Streaming, Completed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferState::AwaitingMetadata => f.write_str("awaiting_metadata"),
            TransferState::Streaming => f.write_str("streaming"),
            TransferState::Completed => f.write_str("completed"),
            TransferState::Failed(kind) => write!(f, "failed({kind:?})"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionRole {
    Sender,
    Receiver,
}

/// Totals of a completed transfer.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferSummary {
    pub transfer_id: String,
    pub peer: PeerId,
    pub metadata: Option<TransferMetadata>,
    /// Payload bytes, excluding the metadata frame.
    pub bytes: u64,
    /// Payload frames, excluding the metadata frame.
    pub chunks: u64,
    pub elapsed: Duration,
}

/// State and counters of one transfer, owned by exactly one side.
pub struct TransferSession {
    id: String,
    role: SessionRole,
    peer: PeerId,
    protocol: ProtocolId,
    state: TransferState,
    metadata: Option<TransferMetadata>,
    bytes: u64,
    chunks: u64,
    started_at: Instant,
    speed: SpeedCalculator,
    progress: Option<mpsc::Sender<TransferProgress>>,
}

impl TransferSession {
    pub fn new(role: SessionRole, peer: PeerId, protocol: ProtocolId) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            peer,
            protocol,
            state: TransferState::AwaitingMetadata,
            metadata: None,
            bytes: 0,
            chunks: 0,
            started_at: Instant::now(),
            speed: SpeedCalculator::default(),
            progress: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Pushes a [`TransferProgress`] after every chunk. Updates are dropped
    /// while the channel is full.
    pub fn with_progress(mut self, tx: mpsc::Sender<TransferProgress>) -> Self {
        self.progress = Some(tx);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn role(&self) -> SessionRole {
        self.role
    }

    pub fn peer(&self) -> &PeerId {
        &self.peer
    }

    pub fn protocol(&self) -> &ProtocolId {
        &self.protocol
    }

    pub fn state(&self) -> TransferState {
        self.state
    }

    pub fn metadata(&self) -> Option<&TransferMetadata> {
        self.metadata.as_ref()
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    pub fn chunks(&self) -> u64 {
        self.chunks
    }

    /// Moves to `next` if the lifecycle allows it. Returns whether it did.
    pub fn transition(&mut self, next: TransferState) -> bool {
        if !self.state.can_become(&next) {
            warn!(
                transfer = %self.id,
                from = %self.state,
                to = %next,
                "ignoring illegal transfer state change"
            );
            return false;
        }
        trace!(transfer = %self.id, from = %self.state, to = %next, "transfer state");
        self.state = next;
        true
    }

    /// Records the handshake and enters `Streaming`.
    pub fn start_streaming(&mut self, metadata: TransferMetadata) -> bool {
        if !self.transition(TransferState::Streaming) {
            return false;
        }
        self.metadata = Some(metadata);
        true
    }

    /// Counts one payload chunk and notifies the progress observer.
    pub fn record_chunk(&mut self, len: usize) {
        self.bytes += len as u64;
        self.chunks += 1;
        self.speed.add_sample(len as u64);

        if let Some(tx) = &self.progress {
            let total_bytes = self.metadata.as_ref().and_then(TransferMetadata::total_bytes);
            let update = TransferProgress {
                transfer_id: self.id.clone(),
                bytes: self.bytes,
                chunks: self.chunks,
                total_bytes,
                bytes_per_second: self.speed.bytes_per_second(),
                eta: total_bytes.and_then(|t| self.speed.eta(t.saturating_sub(self.bytes))),
            };
            if tx.try_send(update).is_err() {
                trace!(transfer = %self.id, "progress observer lagging, update dropped");
            }
        }
    }

    /// Enters `Completed` and returns the totals.
    pub fn complete(&mut self) -> TransferSummary {
        self.transition(TransferState::Completed);
        self.summary()
    }

    /// Enters `Failed` tagged with `err`'s kind and hands the error back.
    pub fn fail(&mut self, err: TransferError) -> TransferError {
        self.transition(TransferState::Failed(err.kind()));
        err
    }

    pub fn summary(&self) -> TransferSummary {
        TransferSummary {
            transfer_id: self.id.clone(),
            peer: self.peer.clone(),
            metadata: self.metadata.clone(),
            bytes: self.bytes,
            chunks: self.chunks,
            elapsed: self.started_at.elapsed(),
        }
    }
}

impl fmt::Debug for TransferSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferSession")
            .field("id", &self.id)
            .field("role", &self.role)
            .field("peer", &self.peer)
            .field("protocol", &self.protocol)
            .field("state", &self.state)
            .field("bytes", &self.bytes)
            .field("chunks", &self.chunks)
            .finish_non_exhaustive()
    }
}
