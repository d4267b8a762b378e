//! Receiving side of a transfer.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use capystream_playback::{
    DEFAULT_PENDING_FRAMES, FormatProbe, PlayableResource, PlaybackBuffer, SinkFactory,
};
use capystream_protocol::{TransferMetadata, TransferStream};
use capystream_transport::{InboundStream, PeerId};

use crate::error::TransferError;
use crate::progress::TransferProgress;
use crate::session::{SessionRole, TransferSession, TransferSummary};

/// Receiver tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiverConfig {
    /// Frames that may wait for a busy sink before reads are suspended.
    pub max_pending_frames: usize,
    /// Fail with [`TransferError::Timeout`] when no frame arrives for this
    /// long. `None` waits indefinitely.
    pub idle_timeout: Option<Duration>,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            max_pending_frames: DEFAULT_PENDING_FRAMES,
            idle_timeout: None,
        }
    }
}

/// Notifications emitted while transfers are received.
#[derive(Debug)]
pub enum ReceiverEvent {
    /// The handshake was accepted and the resource can be handed to a
    /// player. Payload frames are still arriving.
    Streaming {
        transfer_id: String,
        peer: PeerId,
        metadata: TransferMetadata,
        resource: PlayableResource,
    },
    /// The transfer reached a terminal state.
    Finished {
        transfer_id: String,
        peer: PeerId,
        outcome: Result<TransferSummary, TransferError>,
    },
}

impl ReceiverEvent {
    pub fn transfer_id(&self) -> &str {
        match self {
            ReceiverEvent::Streaming { transfer_id, .. }
            | ReceiverEvent::Finished { transfer_id, .. } => transfer_id,
        }
    }
}

/// Consumes one inbound stream: handshake first, then payload frames into
/// a [`PlaybackBuffer`] in arrival order.
pub struct ReceiverSession {
    probe: Arc<dyn FormatProbe>,
    factory: Arc<dyn SinkFactory>,
    config: ReceiverConfig,
    cancel: CancellationToken,
    events: Option<mpsc::Sender<ReceiverEvent>>,
    progress: Option<mpsc::Sender<TransferProgress>>,
    transfer_id: Option<String>,
}

impl ReceiverSession {
    pub fn new(
        probe: Arc<dyn FormatProbe>,
        factory: Arc<dyn SinkFactory>,
        config: ReceiverConfig,
    ) -> Self {
        Self {
            probe,
            factory,
            config,
            cancel: CancellationToken::new(),
            events: None,
            progress: None,
            transfer_id: None,
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Emits [`ReceiverEvent::Streaming`] once the sink is open.
    pub fn with_events(mut self, tx: mpsc::Sender<ReceiverEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn with_progress(mut self, tx: mpsc::Sender<TransferProgress>) -> Self {
        self.progress = Some(tx);
        self
    }

    pub fn with_transfer_id(mut self, id: impl Into<String>) -> Self {
        self.transfer_id = Some(id.into());
        self
    }

    /// Runs the session to a terminal state.
    pub async fn run(self, inbound: InboundStream) -> Result<TransferSummary, TransferError> {
        let InboundStream {
            remote,
            protocol,
            mut stream,
        } = inbound;

        let mut session = TransferSession::new(SessionRole::Receiver, remote, protocol);
        if let Some(id) = &self.transfer_id {
            session = session.with_id(id.clone());
        }
        if let Some(tx) = &self.progress {
            session = session.with_progress(tx.clone());
        }

        let metadata = match self.next_frame(&mut stream).await {
            Ok(Some(frame)) => match TransferMetadata::decode(&frame) {
                Ok(metadata) => metadata,
                Err(e) => {
                    warn!(
                        transfer = %session.id(),
                        peer = %session.peer(),
                        error = %e,
                        "bad handshake"
                    );
                    return Err(session.fail(TransferError::HandshakeDecode(e.to_string())));
                }
            },
            Ok(None) => return Err(session.fail(TransferError::ClosedBeforeHandshake)),
            Err(e) => return Err(session.fail(e)),
        };

        let mut buffer = match PlaybackBuffer::open(
            &metadata,
            self.probe.as_ref(),
            self.factory.as_ref(),
            self.config.max_pending_frames,
        ) {
            Ok(buffer) => buffer,
            Err(e) => {
                warn!(
                    transfer = %session.id(),
                    mime = %metadata.mime_type(),
                    error = %e,
                    "cannot play transfer"
                );
                return Err(session.fail(e.into()));
            }
        };

        session.start_streaming(metadata.clone());
        info!(
            transfer = %session.id(),
            peer = %session.peer(),
            mime = %metadata.mime_type(),
            total_bytes = ?metadata.total_bytes(),
            resource = %buffer.resource().id,
            "receiving transfer"
        );
        if let Some(events) = &self.events {
            let event = ReceiverEvent::Streaming {
                transfer_id: session.id().to_string(),
                peer: session.peer().clone(),
                metadata: metadata.clone(),
                resource: buffer.resource().clone(),
            };
            if events.send(event).await.is_err() {
                debug!(transfer = %session.id(), "event receiver dropped");
            }
        }

        loop {
            let frame = match self.next_frame(&mut stream).await {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e) => {
                    buffer.abort();
                    return Err(session.fail(e));
                }
            };

            let len = frame.len();
            let appended = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => Err(TransferError::Cancelled),
                r = buffer.append(frame) => r.map_err(TransferError::AppendRejected),
            };
            if let Err(e) = appended {
                buffer.abort();
                if matches!(e, TransferError::AppendRejected(_)) {
                    warn!(transfer = %session.id(), error = %e, "append failed, draining stream");
                    let discarded = self.drain(&mut stream).await;
                    debug!(transfer = %session.id(), discarded, "drained remaining frames");
                }
                return Err(session.fail(e));
            }
            session.record_chunk(len);
        }

        let report = match buffer.finish().await {
            Ok(report) => report,
            Err(e) => return Err(session.fail(TransferError::AppendRejected(e))),
        };

        if let Some(expected) = metadata.total_bytes().filter(|&n| n != session.bytes()) {
            warn!(
                transfer = %session.id(),
                expected,
                received = session.bytes(),
                "stream ended short of declared size"
            );
            return Err(session.fail(TransferError::Truncated {
                expected,
                received: session.bytes(),
            }));
        }

        let summary = session.complete();
        info!(
            transfer = %summary.transfer_id,
            bytes = summary.bytes,
            chunks = summary.chunks,
            flushed = report.frames,
            "transfer received"
        );
        Ok(summary)
    }

    /// Reads the next frame, honouring cancellation and the idle timeout.
    async fn next_frame(
        &self,
        stream: &mut TransferStream,
    ) -> Result<Option<Bytes>, TransferError> {
        let read = async {
            match self.config.idle_timeout {
                Some(limit) => match tokio::time::timeout(limit, stream.next_frame()).await {
                    Ok(frame) => frame.map_err(TransferError::MidStreamRead),
                    Err(_) => Err(TransferError::Timeout),
                },
                None => stream.next_frame().await.map_err(TransferError::MidStreamRead),
            }
        };
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(TransferError::Cancelled),
            r = read => r,
        }
    }

    /// Discards frames until the stream ends. Returns how many were dropped.
    async fn drain(&self, stream: &mut TransferStream) -> u64 {
        let mut discarded = 0;
        while let Ok(Some(_)) = self.next_frame(stream).await {
            discarded += 1;
        }
        discarded
    }
}
