use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Stream audio files between peers with progressive playback.
#[derive(Debug, Parser)]
#[command(name = "capystream-peer", version, about)]
pub struct Cli {
    /// Configuration file (defaults to the per-user config path).
    #[arg(long, short, global = true, env = "CAPYSTREAM_CONFIG")]
    pub config: Option<PathBuf>,

    /// Protocol id to speak.
    #[arg(long, global = true, default_value = capystream_protocol::AUDIO_STREAM_PROTOCOL)]
    pub protocol: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Accept transfers and save each one as it arrives.
    Listen {
        /// Listen address (overrides `listen_addr`).
        #[arg(long)]
        addr: Option<SocketAddr>,

        /// Output directory (overrides `output_dir`).
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Send one local file to a peer.
    Send {
        /// Peer name from the `[peers]` table, or `host:port`.
        peer: String,

        file: PathBuf,

        /// Mime type; guessed from the file extension when omitted.
        #[arg(long)]
        mime: Option<String>,

        /// Display name; defaults to the file name.
        #[arg(long)]
        name: Option<String>,

        /// Maximum bytes per chunk (overrides `chunk_size`).
        #[arg(long)]
        chunk_size: Option<usize>,

        /// Delay between chunks in milliseconds (overrides `pacing_ms`).
        #[arg(long)]
        pacing_ms: Option<u64>,
    },
}
