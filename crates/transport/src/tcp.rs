//! TCP transport.
//!
//! Each stream is its own TCP connection. The dialer opens the connection,
//! sends a [`negotiate`](crate::negotiate) request naming the protocol and
//! itself, and waits for the listener's one-byte answer. Peers are
//! addressed through a static address book; a peer id that parses as a
//! socket address is dialed directly.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use capystream_protocol::{FrameStream, ProtocolId, TransferStream};

use crate::negotiate::{
    NegotiationRequest, read_request, read_response, write_request, write_response,
};
use crate::{HandlerRegistry, InboundHandler, InboundStream, PeerId, Transport, TransportError};

/// Default timeout for the TCP connection attempt.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default timeout for the negotiation exchange.
pub const DEFAULT_NEGOTIATE_TIMEOUT: Duration = Duration::from_secs(5);

/// TCP transport settings.
#[derive(Debug, Clone)]
pub struct TcpTransportConfig {
    /// Listen address. Port 0 binds an ephemeral port.
    pub bind_addr: SocketAddr,
    pub connect_timeout: Duration,
    pub negotiate_timeout: Duration,
}

impl Default for TcpTransportConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 0)),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            negotiate_timeout: DEFAULT_NEGOTIATE_TIMEOUT,
        }
    }
}

/// TCP-backed [`Transport`].
///
/// The accept loop runs until [`shutdown`](Self::shutdown) is called or the
/// transport is dropped.
pub struct TcpTransport {
    local: PeerId,
    config: TcpTransportConfig,
    local_addr: SocketAddr,
    handlers: HandlerRegistry,
    address_book: RwLock<HashMap<PeerId, SocketAddr>>,
    cancel: CancellationToken,
}

impl TcpTransport {
    /// Binds the listener and starts accepting streams.
    pub async fn bind(
        local: impl Into<PeerId>,
        config: TcpTransportConfig,
    ) -> Result<Self, TransportError> {
        let local = local.into();
        let listener = TcpListener::bind(config.bind_addr).await?;
        let local_addr = listener.local_addr()?;
        let handlers = HandlerRegistry::new();
        let cancel = CancellationToken::new();

        info!(peer = %local, %local_addr, "TCP transport listening");

        tokio::spawn(accept_loop(
            listener,
            handlers.clone(),
            config.negotiate_timeout,
            cancel.clone(),
        ));

        Ok(Self {
            local,
            config,
            local_addr,
            handlers,
            address_book: RwLock::new(HashMap::new()),
            cancel,
        })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Records where `peer` can be reached.
    pub fn add_peer(&self, peer: impl Into<PeerId>, addr: SocketAddr) {
        self.address_book
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(peer.into(), addr);
    }

    /// Stops accepting new streams. Streams already handed to handlers are
    /// unaffected.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    fn resolve(&self, peer: &PeerId) -> Result<SocketAddr, TransportError> {
        let book = self
            .address_book
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(addr) = book.get(peer) {
            return Ok(*addr);
        }
        peer.as_str()
            .parse()
            .map_err(|_| TransportError::UnknownPeer(peer.clone()))
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[async_trait]
impl Transport for TcpTransport {
    fn local_peer(&self) -> &PeerId {
        &self.local
    }

    async fn dial(
        &self,
        peer: &PeerId,
        protocol: &ProtocolId,
    ) -> Result<TransferStream, TransportError> {
        let addr = self.resolve(peer)?;

        let mut stream =
            match tokio::time::timeout(self.config.connect_timeout, TcpStream::connect(addr)).await
            {
                Ok(Ok(s)) => s,
                Ok(Err(e)) => return Err(TransportError::Unreachable(format!("{addr}: {e}"))),
                Err(_) => return Err(TransportError::Timeout),
            };
        stream.set_nodelay(true)?;

        let request = NegotiationRequest {
            protocol: protocol.clone(),
            peer: self.local.clone(),
        };
        let accepted = tokio::time::timeout(self.config.negotiate_timeout, async {
            write_request(&mut stream, &request).await?;
            read_response(&mut stream).await
        })
        .await
        .map_err(|_| TransportError::Timeout)??;

        if !accepted {
            return Err(TransportError::UnsupportedProtocol {
                peer: peer.clone(),
                protocol: protocol.clone(),
            });
        }

        debug!(to = %peer, %addr, %protocol, "TCP stream negotiated");
        Ok(FrameStream::boxed(stream))
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

async fn accept_loop(
    listener: TcpListener,
    handlers: HandlerRegistry,
    negotiate_timeout: Duration,
    cancel: CancellationToken,
) {
    loop {
        let (stream, addr) = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("TCP accept loop stopped");
                return;
            }
            result = listener.accept() => match result {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!(error = %e, "TCP accept failed");
                    continue;
                }
            },
        };

        let handlers = handlers.clone();
        tokio::spawn(async move {
            if let Err(e) = accept_stream(stream, addr, &handlers, negotiate_timeout).await {
                warn!(%addr, error = %e, "inbound negotiation failed");
            }
        });
    }
}

async fn accept_stream(
    mut stream: TcpStream,
    addr: SocketAddr,
    handlers: &HandlerRegistry,
    negotiate_timeout: Duration,
) -> Result<(), TransportError> {
    stream.set_nodelay(true)?;

    let request = tokio::time::timeout(negotiate_timeout, read_request(&mut stream))
        .await
        .map_err(|_| TransportError::Timeout)??;

    let Some(handler) = handlers.get(&request.protocol) else {
        warn!(%addr, protocol = %request.protocol, "no handler for protocol");
        write_response(&mut stream, false).await?;
        return Ok(());
    };
    write_response(&mut stream, true).await?;

    info!(%addr, peer = %request.peer, protocol = %request.protocol, "TCP stream accepted");
    handler(InboundStream {
        remote: request.peer,
        protocol: request.protocol,
        stream: FrameStream::boxed(stream),
    })
    .await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use tokio::sync::mpsc;

    use crate::handler_fn;

    fn loopback() -> TcpTransportConfig {
        TcpTransportConfig {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn dial_and_accept_over_loopback() {
        let listener = TcpTransport::bind("speaker", loopback()).await.unwrap();
        let dialer = TcpTransport::bind("phone", loopback()).await.unwrap();
        dialer.add_peer("speaker", listener.local_addr());

        let (tx, mut rx) = mpsc::channel(4);
        listener
            .register_handler(
                ProtocolId::audio_stream(),
                handler_fn(move |mut inbound: InboundStream| {
                    let tx = tx.clone();
                    async move {
                        let mut frames = Vec::new();
                        while let Some(frame) = inbound.stream.next_frame().await.unwrap() {
                            frames.push(frame);
                        }
                        tx.send((inbound.remote, frames)).await.unwrap();
                    }
                }),
            )
            .unwrap();

        let mut stream = dialer
            .dial(&PeerId::from("speaker"), &ProtocolId::audio_stream())
            .await
            .unwrap();
        stream.send_frame(Bytes::from_static(b"one")).await.unwrap();
        stream.send_frame(Bytes::from_static(b"two")).await.unwrap();
        stream.close().await.unwrap();

        let (remote, frames) = rx.recv().await.unwrap();
        assert_eq!(remote, PeerId::from("phone"));
        assert_eq!(frames, vec![Bytes::from("one"), Bytes::from("two")]);
    }

    #[tokio::test]
    async fn mismatched_protocol_fails_to_negotiate() {
        let listener = TcpTransport::bind("speaker", loopback()).await.unwrap();
        listener
            .register_handler(
                ProtocolId::new("/capystream/audio-stream/2.0.0").unwrap(),
                handler_fn(|_| async {}),
            )
            .unwrap();
        let dialer = TcpTransport::bind("phone", loopback()).await.unwrap();

        let peer = PeerId::new(listener.local_addr().to_string());
        let err = dialer
            .dial(&peer, &ProtocolId::audio_stream())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, TransportError::UnsupportedProtocol { .. }));
    }

    #[tokio::test]
    async fn unknown_peer_name_is_rejected() {
        let dialer = TcpTransport::bind("phone", loopback()).await.unwrap();
        let err = dialer
            .dial(&PeerId::from("kitchen"), &ProtocolId::audio_stream())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, TransportError::UnknownPeer(_)));
    }

    #[tokio::test]
    async fn closed_port_is_unreachable() {
        // Bind then drop to get a port nobody listens on.
        let addr = {
            let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            l.local_addr().unwrap()
        };
        let dialer = TcpTransport::bind("phone", loopback()).await.unwrap();
        let err = dialer
            .dial(&PeerId::new(addr.to_string()), &ProtocolId::audio_stream())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, TransportError::Unreachable(_)));
    }
}
