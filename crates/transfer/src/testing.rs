//! Fakes shared by the session tests.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;

use capystream_playback::{MediaSink, PlayableResource, ReadyCallback, SinkError, SinkFactory};
use capystream_protocol::{FrameStream, ProtocolId, TransferMetadata, TransferStream};
use capystream_transport::{InboundStream, PeerId};

/// Connected sender stream and inbound stream over an in-memory pipe.
pub fn pipe(capacity: usize) -> (TransferStream, InboundStream) {
    let (a, b) = tokio::io::duplex(capacity);
    let inbound = InboundStream {
        remote: PeerId::from("sender"),
        protocol: ProtocolId::audio_stream(),
        stream: FrameStream::boxed(b),
    };
    (FrameStream::boxed(a), inbound)
}

pub fn handshake(mime: &str, total_bytes: Option<u64>) -> Bytes {
    let mut metadata = TransferMetadata::new(mime).unwrap();
    if let Some(total) = total_bytes {
        metadata = metadata.with_total_bytes(total);
    }
    metadata.encode().unwrap()
}

#[derive(Default)]
pub struct SinkLog {
    pub appends: Vec<Bytes>,
    pub overlapped: bool,
    pub ended: bool,
    busy: bool,
    waiters: Vec<ReadyCallback>,
}

/// Sink that stays busy for a fixed delay after every append.
pub struct DelayedSink {
    log: Arc<Mutex<SinkLog>>,
    delay: Duration,
    resource: PlayableResource,
}

impl MediaSink for DelayedSink {
    fn is_busy(&self) -> bool {
        self.log.lock().unwrap().busy
    }

    fn append(&mut self, bytes: Bytes) -> Result<(), SinkError> {
        {
            let mut log = self.log.lock().unwrap();
            if log.busy {
                log.overlapped = true;
                return Err(SinkError::Busy);
            }
            log.busy = true;
            log.appends.push(bytes);
        }
        let log = self.log.clone();
        let delay = self.delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let waiters = {
                let mut log = log.lock().unwrap();
                log.busy = false;
                std::mem::take(&mut log.waiters)
            };
            for w in waiters {
                w();
            }
        });
        Ok(())
    }

    fn on_ready(&mut self, callback: ReadyCallback) {
        let mut log = self.log.lock().unwrap();
        if log.busy {
            log.waiters.push(callback);
        } else {
            drop(log);
            callback();
        }
    }

    fn end_of_stream(&mut self) -> Result<(), SinkError> {
        self.log.lock().unwrap().ended = true;
        Ok(())
    }

    fn resource(&self) -> PlayableResource {
        self.resource.clone()
    }
}

/// Creates [`DelayedSink`]s that all write into one shared log.
#[derive(Clone)]
pub struct DelayedSinkFactory {
    pub log: Arc<Mutex<SinkLog>>,
    delay: Duration,
}

impl DelayedSinkFactory {
    pub fn new(delay: Duration) -> Self {
        Self {
            log: Arc::default(),
            delay,
        }
    }
}

impl SinkFactory for DelayedSinkFactory {
    fn create(&self, metadata: &TransferMetadata) -> Result<Box<dyn MediaSink>, SinkError> {
        Ok(Box::new(DelayedSink {
            log: self.log.clone(),
            delay: self.delay,
            resource: PlayableResource::new(metadata),
        }))
    }
}

/// Sink whose decoder gives up on the first append.
pub struct RejectingSinkFactory;

struct RejectingSink(PlayableResource);

impl MediaSink for RejectingSink {
    fn is_busy(&self) -> bool {
        false
    }

    fn append(&mut self, _bytes: Bytes) -> Result<(), SinkError> {
        Err(SinkError::Rejected("corrupt frame header".into()))
    }

    fn on_ready(&mut self, callback: ReadyCallback) {
        callback();
    }

    fn resource(&self) -> PlayableResource {
        self.0.clone()
    }
}

impl SinkFactory for RejectingSinkFactory {
    fn create(&self, metadata: &TransferMetadata) -> Result<Box<dyn MediaSink>, SinkError> {
        Ok(Box::new(RejectingSink(PlayableResource::new(metadata))))
    }
}
