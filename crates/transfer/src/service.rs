//! Inbound handler that runs one [`ReceiverSession`] per accepted stream.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use capystream_playback::{FormatProbe, SinkFactory};
use capystream_protocol::ProtocolId;
use capystream_transport::{InboundStream, Transport, TransportError, handler_fn};

use crate::receiver::{ReceiverConfig, ReceiverEvent, ReceiverSession};

/// Accepts transfers for one protocol on one transport.
///
/// Every accepted stream gets a fresh transfer id and its own session task.
/// Sessions never share state; they report through the shared event
/// channel.
pub struct ReceiverService {
    protocol: ProtocolId,
    cancel: CancellationToken,
}

impl ReceiverService {
    /// Registers the inbound handler for `protocol` on `transport`.
    pub fn register(
        transport: &dyn Transport,
        protocol: ProtocolId,
        probe: Arc<dyn FormatProbe>,
        factory: Arc<dyn SinkFactory>,
        config: ReceiverConfig,
        events: mpsc::Sender<ReceiverEvent>,
    ) -> Result<Self, TransportError> {
        let cancel = CancellationToken::new();

        let handler = {
            let cancel = cancel.clone();
            handler_fn(move |inbound: InboundStream| {
                let transfer_id = uuid::Uuid::new_v4().to_string();
                let peer = inbound.remote.clone();
                let session = ReceiverSession::new(probe.clone(), factory.clone(), config.clone())
                    .with_cancel(cancel.child_token())
                    .with_events(events.clone())
                    .with_transfer_id(transfer_id.clone());
                let events = events.clone();
                async move {
                    debug!(transfer = %transfer_id, peer = %peer, "inbound transfer accepted");
                    let outcome = session.run(inbound).await;
                    let finished = ReceiverEvent::Finished {
                        transfer_id,
                        peer,
                        outcome,
                    };
                    if events.send(finished).await.is_err() {
                        debug!("event receiver dropped");
                    }
                }
            })
        };

        transport.register_handler(protocol.clone(), handler)?;
        info!(peer = %transport.local_peer(), protocol = %protocol, "receiver service registered");
        Ok(Self { protocol, cancel })
    }

    pub fn protocol(&self) -> &ProtocolId {
        &self.protocol
    }

    /// Stops accepting streams and cancels in-flight sessions.
    pub fn shutdown(self, transport: &dyn Transport) {
        transport.unregister_handler(&self.protocol);
        self.cancel.cancel();
        info!(protocol = %self.protocol, "receiver service stopped");
    }
}
