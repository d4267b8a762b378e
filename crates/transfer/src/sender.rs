//! Sending side of a transfer.

use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use capystream_protocol::{
    DEFAULT_CHUNK_SIZE, DEFAULT_PACING, MAX_FRAME_SIZE, ProtocolId, TransferMetadata,
};
use capystream_transport::{PeerId, Transport};

use crate::chunked::split_slices;
use crate::error::TransferError;
use crate::progress::TransferProgress;
use crate::session::{SessionRole, TransferSession, TransferSummary};

/// Sender tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SenderConfig {
    /// Maximum payload bytes per frame. 0 means [`DEFAULT_CHUNK_SIZE`];
    /// at most [`MAX_FRAME_SIZE`].
    pub chunk_size: usize,
    /// Delay between consecutive chunk writes. Not applied after the last
    /// chunk.
    pub pacing: Duration,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            pacing: DEFAULT_PACING,
        }
    }
}

impl SenderConfig {
    /// Rejects chunk sizes no receiver would accept as one frame.
    pub fn validate(&self) -> Result<(), TransferError> {
        if self.chunk_size > MAX_FRAME_SIZE {
            return Err(TransferError::InvalidConfig(format!(
                "chunk size {} exceeds the {MAX_FRAME_SIZE}-byte frame limit",
                self.chunk_size
            )));
        }
        Ok(())
    }
}

/// Delivers one payload and its metadata to one peer over one stream.
///
/// The session dials, writes the metadata handshake as frame 0, writes
/// each chunk as its own frame in order and closes its write side. Any
/// failure aborts the transfer; nothing is retried.
pub struct SenderSession {
    protocol: ProtocolId,
    config: SenderConfig,
    cancel: CancellationToken,
    progress: Option<mpsc::Sender<TransferProgress>>,
}

impl SenderSession {
    pub fn new(protocol: ProtocolId, config: SenderConfig) -> Self {
        Self {
            protocol,
            config,
            cancel: CancellationToken::new(),
            progress: None,
        }
    }

    /// Halts the write loop when `cancel` fires. The stream is dropped and
    /// the receiver sees it end early.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_progress(mut self, tx: mpsc::Sender<TransferProgress>) -> Self {
        self.progress = Some(tx);
        self
    }

    pub fn protocol(&self) -> &ProtocolId {
        &self.protocol
    }

    pub fn config(&self) -> &SenderConfig {
        &self.config
    }

    /// Sends `payload`, held as consecutive slices, to `peer`.
    ///
    /// The declared size in the handshake is always overwritten with the
    /// actual payload length.
    pub async fn send(
        &self,
        transport: &dyn Transport,
        peer: &PeerId,
        metadata: TransferMetadata,
        payload: &[Bytes],
    ) -> Result<TransferSummary, TransferError> {
        let total: u64 = payload.iter().map(|s| s.len() as u64).sum();
        let metadata = metadata.with_total_bytes(total);

        let mut session =
            TransferSession::new(SessionRole::Sender, peer.clone(), self.protocol.clone());
        if let Some(tx) = &self.progress {
            session = session.with_progress(tx.clone());
        }

        if let Err(e) = self.config.validate() {
            return Err(session.fail(e));
        }
        let handshake = match metadata.encode() {
            Ok(frame) => frame,
            Err(e) => return Err(session.fail(TransferError::InvalidMetadata(e.to_string()))),
        };

        debug!(
            transfer = %session.id(),
            peer = %peer,
            protocol = %self.protocol,
            "dialing"
        );
        let dialed = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(session.fail(TransferError::Cancelled)),
            r = transport.dial(peer, &self.protocol) => r,
        };
        let mut stream = match dialed {
            Ok(stream) => stream,
            Err(e) => {
                warn!(transfer = %session.id(), peer = %peer, error = %e, "dial failed");
                return Err(session.fail(TransferError::Dial(e)));
            }
        };

        let written = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(session.fail(TransferError::Cancelled)),
            r = stream.send_frame(handshake) => r,
        };
        if let Err(e) = written {
            return Err(session.fail(TransferError::MidStreamWrite(e)));
        }
        session.start_streaming(metadata.clone());
        info!(
            transfer = %session.id(),
            peer = %peer,
            mime = %metadata.mime_type(),
            total_bytes = total,
            "transfer started"
        );

        let mut chunks = split_slices(payload, self.config.chunk_size).peekable();
        while let Some(chunk) = chunks.next() {
            let len = chunk.len();
            let written = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(self.cancelled(&mut session)),
                r = stream.send_frame(chunk) => r,
            };
            if let Err(e) = written {
                warn!(transfer = %session.id(), error = %e, "chunk write failed");
                return Err(session.fail(TransferError::MidStreamWrite(e)));
            }
            session.record_chunk(len);
            trace!(transfer = %session.id(), chunk = session.chunks(), len, "chunk sent");

            if chunks.peek().is_some() && !self.config.pacing.is_zero() {
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => return Err(self.cancelled(&mut session)),
                    _ = tokio::time::sleep(self.config.pacing) => {}
                }
            }
        }

        if let Err(e) = stream.close().await {
            return Err(session.fail(TransferError::MidStreamWrite(e)));
        }

        let summary = session.complete();
        info!(
            transfer = %summary.transfer_id,
            peer = %peer,
            bytes = summary.bytes,
            chunks = summary.chunks,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "transfer completed"
        );
        Ok(summary)
    }

    fn cancelled(&self, session: &mut TransferSession) -> TransferError {
        info!(
            transfer = %session.id(),
            bytes = session.bytes(),
            "transfer cancelled"
        );
        session.fail(TransferError::Cancelled)
    }
}

/// Sends one contiguous payload with the default protocol and settings.
pub async fn send_payload(
    transport: &dyn Transport,
    peer: &PeerId,
    metadata: TransferMetadata,
    payload: Bytes,
) -> Result<TransferSummary, TransferError> {
    SenderSession::new(ProtocolId::audio_stream(), SenderConfig::default())
        .send(transport, peer, metadata, &[payload])
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use capystream_transport::{InboundStream, MemoryNetwork, MemoryTransport, handler_fn};
    use tokio::time::Instant;

    use crate::error::FailureKind;

    const KIB: usize = 1024;

    /// Registers a handler on `peer` that records every frame with its
    /// arrival time and reports the whole stream once it ends.
    fn collect_frames(peer: &MemoryTransport) -> mpsc::Receiver<Vec<(Instant, Bytes)>> {
        let (tx, rx) = mpsc::channel(1);
        peer.register_handler(
            ProtocolId::audio_stream(),
            handler_fn(move |mut inbound: InboundStream| {
                let tx = tx.clone();
                async move {
                    let mut frames = Vec::new();
                    while let Ok(Some(frame)) = inbound.stream.next_frame().await {
                        frames.push((Instant::now(), frame));
                    }
                    let _ = tx.send(frames).await;
                }
            }),
        )
        .unwrap();
        rx
    }

    #[tokio::test(start_paused = true)]
    async fn handshake_first_then_paced_chunks() {
        let network = MemoryNetwork::new();
        let alice = network.join("alice");
        let bob = network.join("bob");
        let mut frames = collect_frames(&bob);

        let payload = Bytes::from(vec![9u8; 600 * KIB]);
        let meta = TransferMetadata::new("audio/mpeg")
            .unwrap()
            .with_display_name("track.mp3");
        let summary = send_payload(&alice, &PeerId::from("bob"), meta, payload.clone())
            .await
            .unwrap();
        assert_eq!(summary.bytes, 600 * KIB as u64);
        assert_eq!(summary.chunks, 3);

        let frames = frames.recv().await.unwrap();
        assert_eq!(frames.len(), 4);

        let handshake = TransferMetadata::decode(&frames[0].1).unwrap();
        assert_eq!(handshake.mime_type(), "audio/mpeg");
        assert_eq!(handshake.display_name(), Some("track.mp3"));
        assert_eq!(handshake.total_bytes(), Some(600 * KIB as u64));

        let sizes: Vec<usize> = frames[1..].iter().map(|(_, f)| f.len()).collect();
        assert_eq!(sizes, vec![256 * KIB, 256 * KIB, 88 * KIB]);

        let joined: Vec<u8> = frames[1..].iter().flat_map(|(_, f)| f.iter().copied()).collect();
        assert_eq!(joined, payload);

        for pair in frames[1..].windows(2) {
            assert!(pair[1].0 - pair[0].0 >= DEFAULT_PACING);
        }
        // No pacing delay after the last chunk.
        assert!(summary.elapsed < DEFAULT_PACING * 3);
    }

    #[tokio::test]
    async fn empty_payload_sends_only_the_handshake() {
        let network = MemoryNetwork::new();
        let alice = network.join("alice");
        let bob = network.join("bob");
        let mut frames = collect_frames(&bob);

        let summary = send_payload(
            &alice,
            &PeerId::from("bob"),
            TransferMetadata::new("audio/ogg").unwrap(),
            Bytes::new(),
        )
        .await
        .unwrap();
        assert_eq!(summary.chunks, 0);

        let frames = frames.recv().await.unwrap();
        assert_eq!(frames.len(), 1);
        let handshake = TransferMetadata::decode(&frames[0].1).unwrap();
        assert_eq!(handshake.total_bytes(), Some(0));
    }

    #[tokio::test]
    async fn unknown_peer_is_a_dial_failure() {
        let network = MemoryNetwork::new();
        let alice = network.join("alice");

        let err = send_payload(
            &alice,
            &PeerId::from("nobody"),
            TransferMetadata::new("audio/mpeg").unwrap(),
            Bytes::from_static(b"data"),
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind(), FailureKind::DialFailure);
    }

    #[tokio::test]
    async fn oversized_chunk_size_fails_before_dialing() {
        let network = MemoryNetwork::new();
        let alice = network.join("alice");

        // An unreachable peer: a dial attempt would report DialFailure.
        let err = SenderSession::new(
            ProtocolId::audio_stream(),
            SenderConfig {
                chunk_size: 16 * 1024 * KIB,
                pacing: Duration::ZERO,
            },
        )
        .send(
            &alice,
            &PeerId::from("nobody"),
            TransferMetadata::new("audio/mpeg").unwrap(),
            &[Bytes::from(vec![0u8; 9 * 1024 * KIB])],
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind(), FailureKind::InvalidConfig);
    }

    #[test]
    fn chunk_size_at_the_frame_limit_is_accepted() {
        let config = SenderConfig {
            chunk_size: MAX_FRAME_SIZE,
            pacing: Duration::ZERO,
        };
        assert!(config.validate().is_ok());
        assert!(SenderConfig { chunk_size: MAX_FRAME_SIZE + 1, ..config }.validate().is_err());
    }

    #[tokio::test]
    async fn oversized_handshake_fails_before_dialing() {
        let network = MemoryNetwork::new();
        let alice = network.join("alice");

        let meta = TransferMetadata::new("audio/mpeg")
            .unwrap()
            .with_display_name("n".repeat(20_000));
        let err = send_payload(&alice, &PeerId::from("nobody"), meta, Bytes::from_static(b"data"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), FailureKind::InvalidMetadata);
    }

    #[tokio::test]
    async fn protocol_mismatch_is_a_dial_failure() {
        let network = MemoryNetwork::new();
        let alice = network.join("alice");
        let bob = network.join("bob");
        let _frames = collect_frames(&bob);

        let v2 = ProtocolId::new("/capystream/audio-stream/2.0.0").unwrap();
        let err = SenderSession::new(v2, SenderConfig::default())
            .send(
                &alice,
                &PeerId::from("bob"),
                TransferMetadata::new("audio/mpeg").unwrap(),
                &[Bytes::from_static(b"data")],
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TransferError::Dial(capystream_transport::TransportError::UnsupportedProtocol { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_halts_the_write_loop() {
        let network = MemoryNetwork::new();
        let alice = network.join("alice");
        let bob = network.join("bob");
        let mut frames = collect_frames(&bob);

        let cancel = CancellationToken::new();
        let sender = SenderSession::new(
            ProtocolId::audio_stream(),
            SenderConfig {
                chunk_size: 4,
                pacing: Duration::from_secs(1),
            },
        )
        .with_cancel(cancel.clone());

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(1500)).await;
            cancel.cancel();
        });

        let err = sender
            .send(
                &alice,
                &PeerId::from("bob"),
                TransferMetadata::new("audio/mpeg").unwrap(),
                &[Bytes::from_static(b"0123456789abcdef")],
            )
            .await
            .unwrap_err();
        canceller.await.unwrap();
        assert_eq!(err.kind(), FailureKind::Cancelled);

        let frames = frames.recv().await.unwrap();
        // Handshake plus the chunks written at t=0s and t=1s.
        assert_eq!(frames.len(), 3);
    }

    #[tokio::test]
    async fn progress_follows_every_chunk() {
        let network = MemoryNetwork::new();
        let alice = network.join("alice");
        let bob = network.join("bob");
        let _frames = collect_frames(&bob);

        let (tx, mut rx) = mpsc::channel(16);
        SenderSession::new(
            ProtocolId::audio_stream(),
            SenderConfig {
                chunk_size: 10,
                pacing: Duration::ZERO,
            },
        )
        .with_progress(tx)
        .send(
            &alice,
            &PeerId::from("bob"),
            TransferMetadata::new("audio/wav").unwrap(),
            &[Bytes::from(vec![0u8; 25])],
        )
        .await
        .unwrap();

        let mut seen = Vec::new();
        while let Ok(p) = rx.try_recv() {
            seen.push((p.bytes, p.chunks, p.total_bytes));
        }
        assert_eq!(
            seen,
            vec![(10, 1, Some(25)), (20, 2, Some(25)), (25, 3, Some(25))]
        );
    }
}
