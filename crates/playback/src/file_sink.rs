//! File-backed sink for headless receivers.
//!
//! Appends are handed to a writer task; the sink stays busy until that
//! write has reached the file. A player can open the file while it grows.

use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use capystream_protocol::TransferMetadata;

use crate::error::SinkError;
use crate::sink::{MediaSink, PlayableResource, ReadyCallback, SinkFactory};

#[derive(Default)]
struct WriterState {
    busy: bool,
    waiters: Vec<ReadyCallback>,
    failed: Option<String>,
    written: u64,
}

/// Sink that streams appended bytes into a file.
pub struct FileSink {
    state: Arc<Mutex<WriterState>>,
    tx: Option<mpsc::UnboundedSender<Bytes>>,
    resource: PlayableResource,
}

impl FileSink {
    /// Creates (truncating) `path` and starts the writer task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn create(path: &Path, metadata: &TransferMetadata) -> Result<Self, SinkError> {
        let file = std::fs::File::create(path)?;
        let file = tokio::fs::File::from_std(file);
        let state = Arc::new(Mutex::new(WriterState::default()));
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(write_loop(file, rx, state.clone()));

        debug!(path = %path.display(), mime = metadata.mime_type(), "file sink created");
        Ok(Self {
            state,
            tx: Some(tx),
            resource: PlayableResource::new(metadata).with_path(path.to_path_buf()),
        })
    }

    /// Bytes that have reached the file so far.
    pub fn written(&self) -> u64 {
        self.lock().written
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, WriterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl MediaSink for FileSink {
    fn is_busy(&self) -> bool {
        self.lock().busy
    }

    fn append(&mut self, bytes: Bytes) -> Result<(), SinkError> {
        let tx = self.tx.as_ref().ok_or(SinkError::Closed)?;
        let mut s = self.lock();
        if let Some(e) = &s.failed {
            return Err(SinkError::Rejected(e.clone()));
        }
        if s.busy {
            return Err(SinkError::Busy);
        }
        tx.send(bytes).map_err(|_| SinkError::Closed)?;
        s.busy = true;
        Ok(())
    }

    fn on_ready(&mut self, callback: ReadyCallback) {
        let mut s = self.lock();
        if s.busy {
            s.waiters.push(callback);
        } else {
            drop(s);
            callback();
        }
    }

    fn end_of_stream(&mut self) -> Result<(), SinkError> {
        // Dropping the sender lets the writer task close the file.
        self.tx = None;
        match &self.lock().failed {
            Some(e) => Err(SinkError::Rejected(e.clone())),
            None => Ok(()),
        }
    }

    fn resource(&self) -> PlayableResource {
        self.resource.clone()
    }
}

async fn write_loop(
    mut file: tokio::fs::File,
    mut rx: mpsc::UnboundedReceiver<Bytes>,
    state: Arc<Mutex<WriterState>>,
) {
    while let Some(bytes) = rx.recv().await {
        let result = async {
            file.write_all(&bytes).await?;
            file.flush().await
        }
        .await;

        let waiters = {
            let mut s = state.lock().unwrap_or_else(PoisonError::into_inner);
            match result {
                Ok(()) => s.written += bytes.len() as u64,
                Err(e) => {
                    warn!(error = %e, "file sink write failed");
                    s.failed.get_or_insert_with(|| e.to_string());
                }
            }
            s.busy = false;
            std::mem::take(&mut s.waiters)
        };
        for waiter in waiters {
            waiter();
        }
    }
    if let Err(e) = file.sync_all().await {
        warn!(error = %e, "file sink sync failed");
    }
}

/// Creates one [`FileSink`] per transfer inside a directory.
///
/// Files are named `<id>-<display name>`, falling back to an extension
/// guessed from the mime type when the sender gave no usable name.
#[derive(Debug, Clone)]
pub struct FileSinkFactory {
    dir: PathBuf,
}

impl FileSinkFactory {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn file_name(&self, metadata: &TransferMetadata) -> String {
        let prefix = &uuid::Uuid::new_v4().simple().to_string()[..8];
        match metadata.display_name().and_then(safe_file_name) {
            Some(name) => format!("{prefix}-{name}"),
            None => {
                let ext = mime_guess::get_mime_extensions_str(&metadata.essence())
                    .and_then(|exts| exts.first())
                    .copied()
                    .unwrap_or("bin");
                format!("{prefix}-stream.{ext}")
            }
        }
    }
}

impl SinkFactory for FileSinkFactory {
    fn create(&self, metadata: &TransferMetadata) -> Result<Box<dyn MediaSink>, SinkError> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(self.file_name(metadata));
        Ok(Box::new(FileSink::create(&path, metadata)?))
    }
}

/// Reduces a peer-supplied display name to a single plain file name.
///
/// Returns `None` for names that are empty, absolute, contain a prefix or
/// parent traversal, or consist of more than one path component.
fn safe_file_name(name: &str) -> Option<String> {
    let name = name.trim();
    if name.is_empty() || name.starts_with("\\\\") {
        return None;
    }
    let mut components = Path::new(name).components();
    let only = components.next()?;
    if components.next().is_some() {
        return None;
    }
    match only {
        Component::Normal(n) => {
            let n = n.to_str()?;
            // Windows drive letters parse as Normal on Unix.
            if n.contains(':') || n.contains('\\') {
                None
            } else {
                Some(n.to_string())
            }
        }
        _ => None,
    }
}
