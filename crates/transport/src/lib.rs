//! Transport substrate for CapyStream transfers.
//!
//! Transfer sessions consume exactly two primitives from the networking
//! layer: [`Transport::dial`] to open an outbound stream to a peer for a
//! protocol, and [`Transport::register_handler`] to accept inbound streams
//! for a protocol. Everything else (addressing, discovery, encryption,
//! multiplexing) stays behind this trait.
//!
//! Two substrates ship with the crate:
//!
//! - [`memory::MemoryTransport`]: in-process peers joined to a
//!   [`memory::MemoryNetwork`], used by tests and loopback playback.
//! - [`tcp::TcpTransport`]: one TCP connection per stream with a small
//!   protocol negotiation header (see [`negotiate`]).

pub mod error;
pub mod memory;
pub mod negotiate;
pub mod tcp;

pub use error::TransportError;
pub use memory::{MemoryNetwork, MemoryTransport};
pub use tcp::{TcpTransport, TcpTransportConfig};

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use futures_util::future::BoxFuture;

use capystream_protocol::{ProtocolId, TransferStream};

/// Opaque peer identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for PeerId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A stream accepted for a registered protocol.
pub struct InboundStream {
    /// Peer that dialed us.
    pub remote: PeerId,
    /// Protocol the stream was negotiated for.
    pub protocol: ProtocolId,
    pub stream: TransferStream,
}

/// Callback invoked once per accepted stream. The returned future runs in
/// its own task and owns the stream until it completes.
pub type InboundHandler = Arc<dyn Fn(InboundStream) -> BoxFuture<'static, ()> + Send + Sync>;

/// Wraps an async closure as an [`InboundHandler`].
pub fn handler_fn<F, Fut>(f: F) -> InboundHandler
where
    F: Fn(InboundStream) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |inbound| Box::pin(f(inbound)))
}

/// Stream dial/accept primitives.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Identifier of the local peer.
    fn local_peer(&self) -> &PeerId;

    /// Opens a stream to `peer` negotiated for `protocol`.
    ///
    /// Fails before any application data is exchanged if the peer is
    /// unreachable or has no handler for `protocol`.
    async fn dial(
        &self,
        peer: &PeerId,
        protocol: &ProtocolId,
    ) -> Result<TransferStream, TransportError>;

    /// Registers the handler that accepts inbound streams for `protocol`.
    fn register_handler(
        &self,
        protocol: ProtocolId,
        handler: InboundHandler,
    ) -> Result<(), TransportError>;

    /// Removes the handler for `protocol`. Returns whether one was registered.
    fn unregister_handler(&self, protocol: &ProtocolId) -> bool;
}

/// Protocol → handler table shared between a transport and its accept path.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    inner: Arc<RwLock<HashMap<ProtocolId, InboundHandler>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &self,
        protocol: ProtocolId,
        handler: InboundHandler,
    ) -> Result<(), TransportError> {
        let mut map = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if map.contains_key(&protocol) {
            return Err(TransportError::AlreadyRegistered(protocol));
        }
        map.insert(protocol, handler);
        Ok(())
    }

    pub fn unregister(&self, protocol: &ProtocolId) -> bool {
        let mut map = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        map.remove(protocol).is_some()
    }

    pub fn get(&self, protocol: &ProtocolId) -> Option<InboundHandler> {
        let map = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        map.get(protocol).cloned()
    }

    pub fn protocols(&self) -> Vec<ProtocolId> {
        let map = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let mut protocols: Vec<_> = map.keys().cloned().collect();
        protocols.sort();
        protocols
    }
}
