//! In-process transport.
//!
//! Peers join a shared [`MemoryNetwork`]; dialing creates a
//! `tokio::io::duplex` pipe and hands the far end to the target peer's
//! handler in a fresh task. Ordering and exactly-once delivery come from
//! the pipe itself.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use tracing::debug;

use capystream_protocol::{FrameStream, ProtocolId, TransferStream};

use crate::{HandlerRegistry, InboundHandler, InboundStream, PeerId, Transport, TransportError};

/// Default pipe capacity per stream direction (64 KiB).
pub const DEFAULT_PIPE_CAPACITY: usize = 64 * 1024;

/// A set of in-process peers that can dial each other.
#[derive(Clone)]
pub struct MemoryNetwork {
    peers: Arc<RwLock<HashMap<PeerId, HandlerRegistry>>>,
    pipe_capacity: usize,
}

impl Default for MemoryNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::with_pipe_capacity(DEFAULT_PIPE_CAPACITY)
    }

    /// Small capacities make the pipe push back on writers, which is
    /// useful for exercising backpressure.
    pub fn with_pipe_capacity(pipe_capacity: usize) -> Self {
        Self {
            peers: Arc::new(RwLock::new(HashMap::new())),
            pipe_capacity: pipe_capacity.max(1),
        }
    }

    /// Adds a peer to the network. A peer id that is already present is
    /// replaced.
    pub fn join(&self, peer: impl Into<PeerId>) -> MemoryTransport {
        let local = peer.into();
        let handlers = HandlerRegistry::new();
        self.peers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(local.clone(), handlers.clone());
        debug!(peer = %local, "joined memory network");
        MemoryTransport {
            local,
            network: self.clone(),
            handlers,
        }
    }

    fn handlers_of(&self, peer: &PeerId) -> Option<HandlerRegistry> {
        self.peers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(peer)
            .cloned()
    }

    fn leave(&self, peer: &PeerId, handlers: &HandlerRegistry) {
        let mut peers = self.peers.write().unwrap_or_else(PoisonError::into_inner);
        // Only remove our own entry; a later join may have replaced it.
        if peers
            .get(peer)
            .is_some_and(|current| Arc::ptr_eq(&current.inner, &handlers.inner))
        {
            peers.remove(peer);
        }
    }
}

/// One peer on a [`MemoryNetwork`]. Leaves the network when dropped.
pub struct MemoryTransport {
    local: PeerId,
    network: MemoryNetwork,
    handlers: HandlerRegistry,
}

#[async_trait]
impl Transport for MemoryTransport {
    fn local_peer(&self) -> &PeerId {
        &self.local
    }

    async fn dial(
        &self,
        peer: &PeerId,
        protocol: &ProtocolId,
    ) -> Result<TransferStream, TransportError> {
        let remote = self
            .network
            .handlers_of(peer)
            .ok_or_else(|| TransportError::Unreachable(peer.to_string()))?;
        let handler = remote
            .get(protocol)
            .ok_or_else(|| TransportError::UnsupportedProtocol {
                peer: peer.clone(),
                protocol: protocol.clone(),
            })?;

        let (local_end, remote_end) = tokio::io::duplex(self.network.pipe_capacity);
        let inbound = InboundStream {
            remote: self.local.clone(),
            protocol: protocol.clone(),
            stream: FrameStream::boxed(remote_end),
        };
        tokio::spawn(handler(inbound));

        debug!(from = %self.local, to = %peer, %protocol, "memory stream opened");
        Ok(FrameStream::boxed(local_end))
    }

    fn register_handler(
        &self,
        protocol: ProtocolId,
        handler: InboundHandler,
    ) -> Result<(), TransportError> {
        self.handlers.register(protocol, handler)
    }

    fn unregister_handler(&self, protocol: &ProtocolId) -> bool {
        self.handlers.unregister(protocol)
    }
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        self.network.leave(&self.local, &self.handlers);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use tokio::sync::mpsc;

    use crate::handler_fn;

    #[tokio::test]
    async fn dial_delivers_frames_to_handler() {
        let network = MemoryNetwork::new();
        let alice = network.join("alice");
        let bob = network.join("bob");

        let (tx, mut rx) = mpsc::channel(4);
        bob.register_handler(
            ProtocolId::audio_stream(),
            handler_fn(move |mut inbound: InboundStream| {
                let tx = tx.clone();
                async move {
                    let frame = inbound.stream.next_frame().await.unwrap().unwrap();
                    tx.send((inbound.remote, frame)).await.unwrap();
                }
            }),
        )
        .unwrap();

        let mut stream = alice
            .dial(&PeerId::from("bob"), &ProtocolId::audio_stream())
            .await
            .unwrap();
        stream.send_frame(Bytes::from_static(b"ping")).await.unwrap();

        let (remote, frame) = rx.recv().await.unwrap();
        assert_eq!(remote, PeerId::from("alice"));
        assert_eq!(frame, "ping");
    }

    #[tokio::test]
    async fn dial_unknown_peer_is_unreachable() {
        let network = MemoryNetwork::new();
        let alice = network.join("alice");
        let err = alice
            .dial(&PeerId::from("nobody"), &ProtocolId::audio_stream())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, TransportError::Unreachable(_)));
    }

    #[tokio::test]
    async fn dial_without_handler_is_unsupported() {
        let network = MemoryNetwork::new();
        let alice = network.join("alice");
        let _bob = network.join("bob");
        let err = alice
            .dial(&PeerId::from("bob"), &ProtocolId::audio_stream())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, TransportError::UnsupportedProtocol { .. }));
    }

    #[tokio::test]
    async fn dropped_peer_leaves_network() {
        let network = MemoryNetwork::new();
        let alice = network.join("alice");
        let bob = network.join("bob");
        bob.register_handler(ProtocolId::audio_stream(), handler_fn(|_| async {}))
            .unwrap();
        drop(bob);

        let err = alice
            .dial(&PeerId::from("bob"), &ProtocolId::audio_stream())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, TransportError::Unreachable(_)));
    }
}
