//! Peer configuration.
//!
//! Stored as TOML:
//! - Linux: `~/.config/capystream/peer.toml`
//! - Windows: `%APPDATA%/capystream/peer.toml`

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use capystream_playback::probe::DEFAULT_AUDIO_TYPES;
use capystream_protocol::{DEFAULT_CHUNK_SIZE, DEFAULT_PACING};
use capystream_transfer::{ReceiverConfig, SenderConfig};
use capystream_transport::TcpTransportConfig;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Peer id announced to the other side (hostname by default).
    #[serde(default = "default_name")]
    pub name: String,

    /// Address `listen` binds to.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Directory received transfers are written to. A leading `~` is
    /// expanded to the home directory.
    #[serde(default = "default_output_dir")]
    pub output_dir: String,

    /// Maximum payload bytes per frame.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Delay between chunk writes, in milliseconds.
    #[serde(default = "default_pacing_ms")]
    pub pacing_ms: u64,

    #[serde(default = "default_max_pending_frames")]
    pub max_pending_frames: usize,

    /// Fail a transfer after this many seconds without data (0 = never).
    #[serde(default)]
    pub idle_timeout_secs: u64,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Mime types accepted by `listen`. `type/*` accepts every subtype.
    #[serde(default = "default_accepted_types")]
    pub accepted_types: Vec<String>,

    /// Known peers by name.
    #[serde(default)]
    pub peers: BTreeMap<String, SocketAddr>,
}

fn default_name() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "capystream-peer".into())
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 7400))
}

fn default_output_dir() -> String {
    "~/Music/CapyStream".into()
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_pacing_ms() -> u64 {
    DEFAULT_PACING.as_millis() as u64
}

fn default_max_pending_frames() -> usize {
    capystream_playback::DEFAULT_PENDING_FRAMES
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_accepted_types() -> Vec<String> {
    DEFAULT_AUDIO_TYPES.iter().map(|t| t.to_string()).collect()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            name: default_name(),
            listen_addr: default_listen_addr(),
            output_dir: default_output_dir(),
            chunk_size: default_chunk_size(),
            pacing_ms: default_pacing_ms(),
            max_pending_frames: default_max_pending_frames(),
            idle_timeout_secs: 0,
            connect_timeout_secs: default_connect_timeout_secs(),
            accepted_types: default_accepted_types(),
            peers: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Loads `path`, or the platform default, creating it with defaults if
    /// it does not exist yet.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => config_path()?,
        };

        if path.exists() {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| format!("parsing {}", path.display()))?;
            config
                .sender()
                .validate()
                .with_context(|| format!("checking {}", path.display()))?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save(&path)?;
            Ok(config)
        }
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }

        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }

    pub fn output_dir(&self) -> PathBuf {
        expand_home(&self.output_dir)
    }

    pub fn sender(&self) -> SenderConfig {
        SenderConfig {
            chunk_size: self.chunk_size,
            pacing: Duration::from_millis(self.pacing_ms),
        }
    }

    pub fn receiver(&self) -> ReceiverConfig {
        ReceiverConfig {
            max_pending_frames: self.max_pending_frames,
            idle_timeout: (self.idle_timeout_secs > 0)
                .then(|| Duration::from_secs(self.idle_timeout_secs)),
        }
    }

    pub fn transport(&self, bind_addr: SocketAddr) -> TcpTransportConfig {
        TcpTransportConfig {
            bind_addr,
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            ..TcpTransportConfig::default()
        }
    }
}

fn home_dir() -> PathBuf {
    #[cfg(target_os = "windows")]
    let var = "USERPROFILE";
    #[cfg(not(target_os = "windows"))]
    let var = "HOME";
    PathBuf::from(std::env::var(var).unwrap_or_else(|_| ".".into()))
}

fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~") {
        Some(rest) => home_dir().join(rest.trim_start_matches(['/', '\\'])),
        None => PathBuf::from(path),
    }
}

/// Platform-specific configuration file path.
fn config_path() -> anyhow::Result<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        Ok(PathBuf::from(home)
            .join(".config")
            .join("capystream")
            .join("peer.toml"))
    }

    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        Ok(PathBuf::from(appdata).join("capystream").join("peer.toml"))
    }

    #[cfg(not(any(target_os = "linux", target_os = "windows")))]
    {
        Ok(PathBuf::from("/tmp/capystream/peer.toml"))
    }
}
