//! Wires the transport, receiver service and sender session together.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use capystream_playback::{FileSinkFactory, MimeAllowList};
use capystream_protocol::{ProtocolId, TransferMetadata};
use capystream_transfer::{
    ReceiverEvent, ReceiverService, SenderSession, TransferProgress, TransferSummary,
};
use capystream_transport::{PeerId, TcpTransport};

use crate::cli::{Cli, Command};
use crate::config::Config;

pub async fn run(cli: Cli, config: Config) -> anyhow::Result<()> {
    let protocol: ProtocolId = cli.protocol.parse()?;

    match cli.command {
        Command::Listen { addr, output } => {
            let addr = addr.unwrap_or(config.listen_addr);
            let output = output.unwrap_or_else(|| config.output_dir());
            listen(&config, protocol, addr, output).await
        }
        Command::Send {
            peer,
            file,
            mime,
            name,
            chunk_size,
            pacing_ms,
        } => {
            let mut config = config;
            if let Some(size) = chunk_size {
                config.chunk_size = size;
            }
            if let Some(ms) = pacing_ms {
                config.pacing_ms = ms;
            }
            let summary = send(&config, protocol, PeerId::new(peer), &file, mime, name).await?;
            tracing::info!(
                bytes = summary.bytes,
                chunks = summary.chunks,
                elapsed_ms = summary.elapsed.as_millis() as u64,
                "file sent"
            );
            Ok(())
        }
    }
}

async fn bind(config: &Config, addr: SocketAddr) -> anyhow::Result<TcpTransport> {
    let transport = TcpTransport::bind(config.name.clone(), config.transport(addr))
        .await
        .with_context(|| format!("binding {addr}"))?;
    for (name, addr) in &config.peers {
        transport.add_peer(name.clone(), *addr);
    }
    Ok(transport)
}

/// Accepts transfers until interrupted.
async fn listen(
    config: &Config,
    protocol: ProtocolId,
    addr: SocketAddr,
    output: PathBuf,
) -> anyhow::Result<()> {
    let transport = bind(config, addr).await?;
    let (tx, mut events) = mpsc::channel(64);
    let service = ReceiverService::register(
        &transport,
        protocol.clone(),
        Arc::new(MimeAllowList::new(&config.accepted_types)),
        Arc::new(FileSinkFactory::new(&output)),
        config.receiver(),
        tx,
    )?;

    tracing::info!(
        addr = %transport.local_addr(),
        %protocol,
        output = %output.display(),
        "listening for transfers"
    );

    let shutdown = interrupted();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => log_event(&event),
                None => break,
            },
            _ = &mut shutdown => {
                tracing::info!("SIGINT received, shutting down");
                break;
            }
        }
    }

    service.shutdown(&transport);
    transport.shutdown();
    Ok(())
}

fn log_event(event: &ReceiverEvent) {
    match event {
        ReceiverEvent::Streaming {
            transfer_id,
            peer,
            metadata,
            resource,
        } => {
            tracing::info!(
                transfer = %transfer_id,
                %peer,
                mime = %metadata.mime_type(),
                name = metadata.display_name().unwrap_or("-"),
                path = ?resource.path,
                "playable resource ready"
            );
        }
        ReceiverEvent::Finished {
            transfer_id,
            peer,
            outcome: Ok(summary),
        } => {
            tracing::info!(
                transfer = %transfer_id,
                %peer,
                bytes = summary.bytes,
                chunks = summary.chunks,
                "transfer saved"
            );
        }
        ReceiverEvent::Finished {
            transfer_id,
            peer,
            outcome: Err(e),
        } => {
            tracing::warn!(
                transfer = %transfer_id,
                %peer,
                kind = ?e.kind(),
                "transfer failed: {e}"
            );
        }
    }
}

/// Sends `file` to `peer`, cancelling on Ctrl-C.
async fn send(
    config: &Config,
    protocol: ProtocolId,
    peer: PeerId,
    file: &Path,
    mime: Option<String>,
    name: Option<String>,
) -> anyhow::Result<TransferSummary> {
    let payload = Bytes::from(
        tokio::fs::read(file)
            .await
            .with_context(|| format!("reading {}", file.display()))?,
    );
    let metadata = file_metadata(file, mime, name)?;

    let transport = bind(config, SocketAddr::from(([0, 0, 0, 0], 0))).await?;
    tracing::info!(
        peer = %peer,
        mime = %metadata.mime_type(),
        bytes = payload.len(),
        "sending file"
    );

    let cancel = CancellationToken::new();
    let (progress_tx, progress_rx) = mpsc::channel(16);
    let reporter = tokio::spawn(report_progress(progress_rx));
    let sender = SenderSession::new(protocol, config.sender())
        .with_cancel(cancel.clone())
        .with_progress(progress_tx);

    let slices = [payload];
    let result = tokio::select! {
        r = sender.send(&transport, &peer, metadata, &slices) => r,
        _ = async {
            interrupted().await;
            tracing::info!("SIGINT received, cancelling transfer");
            cancel.cancel();
            std::future::pending::<()>().await
        } => unreachable!(),
    };
    drop(sender);
    let _ = reporter.await;
    transport.shutdown();

    Ok(result?)
}

/// Resolves on SIGINT. Never resolves when the handler cannot be installed.
async fn interrupted() {
    interrupted_by(tokio::signal::ctrl_c()).await
}

async fn interrupted_by(signal: impl Future<Output = std::io::Result<()>>) {
    if let Err(e) = signal.await {
        tracing::warn!(error = %e, "cannot listen for SIGINT");
        std::future::pending::<()>().await
    }
}

async fn report_progress(mut rx: mpsc::Receiver<TransferProgress>) {
    while let Some(p) = rx.recv().await {
        match p.percentage() {
            Some(pct) => tracing::debug!(
                bytes = p.bytes,
                chunks = p.chunks,
                rate = p.bytes_per_second as u64,
                eta_secs = p.eta.map(|d| d.as_secs()),
                "{pct:.1}%"
            ),
            None => tracing::debug!(bytes = p.bytes, chunks = p.chunks, "progress"),
        }
    }
}

/// Builds the handshake for a local file.
fn file_metadata(
    file: &Path,
    mime: Option<String>,
    name: Option<String>,
) -> anyhow::Result<TransferMetadata> {
    let mime = match mime {
        Some(m) => m,
        None => mime_guess::from_path(file)
            .first()
            .map(|m| m.essence_str().to_string())
            .with_context(|| {
                format!("cannot guess mime type of {}, pass --mime", file.display())
            })?,
    };
    let name = name.or_else(|| {
        file.file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string)
    });

    let mut metadata = TransferMetadata::new(mime)?;
    if let Some(name) = name {
        metadata = metadata.with_display_name(name);
    }
    Ok(metadata)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mime_is_guessed_from_extension() {
        let meta = file_metadata(Path::new("/music/track.mp3"), None, None).unwrap();
        assert_eq!(meta.mime_type(), "audio/mpeg");
        assert_eq!(meta.display_name(), Some("track.mp3"));
    }

    #[test]
    fn explicit_values_win() {
        let meta = file_metadata(
            Path::new("clip.bin"),
            Some("audio/ogg".into()),
            Some("Live set".into()),
        )
        .unwrap();
        assert_eq!(meta.mime_type(), "audio/ogg");
        assert_eq!(meta.display_name(), Some("Live set"));
    }

    #[test]
    fn unknown_extension_needs_mime() {
        assert!(file_metadata(Path::new("noext"), None, None).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_signal_registration_never_interrupts() {
        let failed = interrupted_by(async { Err(std::io::Error::other("no signal driver")) });
        let waited = tokio::time::timeout(std::time::Duration::from_secs(3600), failed).await;
        assert!(waited.is_err());

        let delivered = interrupted_by(async { Ok(()) });
        tokio::time::timeout(std::time::Duration::from_secs(1), delivered)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn file_round_trips_over_tcp() {
        let out = tempfile::tempdir().unwrap();
        let src = tempfile::tempdir().unwrap();
        let file = src.path().join("tone.wav");
        let data: Vec<u8> = (0..300_000u32).map(|i| (i % 251) as u8).collect();
        std::fs::write(&file, &data).unwrap();

        let config = Config {
            name: "bob".into(),
            chunk_size: 64 * 1024,
            pacing_ms: 0,
            ..Config::default()
        };
        let receiver = bind(&config, SocketAddr::from(([127, 0, 0, 1], 0)))
            .await
            .unwrap();
        let (tx, mut events) = mpsc::channel(8);
        let _service = ReceiverService::register(
            &receiver,
            ProtocolId::audio_stream(),
            Arc::new(MimeAllowList::new(&config.accepted_types)),
            Arc::new(FileSinkFactory::new(out.path())),
            config.receiver(),
            tx,
        )
        .unwrap();

        let mut sender_config = config.clone();
        sender_config.name = "alice".into();
        sender_config
            .peers
            .insert("bob".into(), receiver.local_addr());
        let summary = send(
            &sender_config,
            ProtocolId::audio_stream(),
            PeerId::from("bob"),
            &file,
            None,
            None,
        )
        .await
        .unwrap();
        assert_eq!(summary.chunks, 5);

        let path = match events.recv().await.unwrap() {
            ReceiverEvent::Streaming { resource, .. } => resource.path.unwrap(),
            other => panic!("unexpected event: {other:?}"),
        };
        match events.recv().await.unwrap() {
            ReceiverEvent::Finished { outcome, .. } => {
                assert_eq!(outcome.unwrap().bytes, data.len() as u64)
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(path.to_string_lossy().ends_with("-tone.wav"));
        assert_eq!(std::fs::read(path).unwrap(), data);
    }
}
