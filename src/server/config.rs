//! Relay configuration

use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::relay::{MirrorConfig, PlaybackConfig};

/// Default STUN server handed to every peer connection
pub const DEFAULT_ICE_SERVER: &str = "stun:stun.l.google.com:19302";

/// Default signaling port
pub const DEFAULT_PORT: u16 = 4321;

/// What the relay does with the sessions it negotiates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RelayMode {
    /// Inbound media from any peer is fanned out to every session
    #[default]
    Broadcast,
    /// A stored file is paced out to every session
    Playback,
    /// Each session receives its own media back
    Mirror,
}

impl RelayMode {
    pub fn as_str(self) -> &'static str {
        match self {
            RelayMode::Broadcast => "broadcast",
            RelayMode::Playback => "playback",
            RelayMode::Mirror => "mirror",
        }
    }
}

impl fmt::Display for RelayMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RelayMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "broadcast" => Ok(RelayMode::Broadcast),
            "playback" => Ok(RelayMode::Playback),
            "mirror" => Ok(RelayMode::Mirror),
            other => Err(format!(
                "unknown mode '{}', expected broadcast, playback or mirror",
                other
            )),
        }
    }
}

/// Relay configuration options
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Address the signaling endpoint binds to
    pub bind_addr: SocketAddr,

    /// Operating mode
    pub mode: RelayMode,

    /// ICE server URLs for every peer connection
    pub ice_servers: Vec<String>,

    /// Directory served for paths other than the signaling endpoint
    pub public_dir: PathBuf,

    /// Pacing scheduler settings (playback mode)
    pub playback: PlaybackConfig,

    /// VP8 IVF file to play (playback mode)
    pub video_path: Option<PathBuf>,

    /// Opus Ogg file to play (playback mode)
    pub audio_path: Option<PathBuf>,

    /// Per-session write deadline (None = writes may block indefinitely)
    pub write_timeout: Option<Duration>,

    /// Interval for repeated picture loss indications in mirror mode
    pub pli_interval: Option<Duration>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            mode: RelayMode::Broadcast,
            ice_servers: vec![DEFAULT_ICE_SERVER.to_string()],
            public_dir: PathBuf::from("public"),
            playback: PlaybackConfig::default(),
            video_path: None,
            audio_path: None,
            write_timeout: None,
            pli_interval: None,
        }
    }
}

impl RelayConfig {
    /// Create a new config with custom bind address
    pub fn with_addr(addr: SocketAddr) -> Self {
        Self {
            bind_addr: addr,
            ..Default::default()
        }
    }

    /// Set the bind address
    pub fn bind(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Set the operating mode
    pub fn mode(mut self, mode: RelayMode) -> Self {
        self.mode = mode;
        self
    }

    /// Replace the ICE server list
    pub fn ice_servers<I, S>(mut self, urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ice_servers = urls.into_iter().map(Into::into).collect();
        self
    }

    /// Set the static file directory
    pub fn public_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.public_dir = dir.into();
        self
    }

    /// Set the playback source files
    pub fn playback_files(mut self, video: Option<PathBuf>, audio: Option<PathBuf>) -> Self {
        self.video_path = video;
        self.audio_path = audio;
        self
    }

    /// Set pacing scheduler options
    pub fn playback(mut self, playback: PlaybackConfig) -> Self {
        self.playback = playback;
        self
    }

    /// Set the per-session write deadline
    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = Some(timeout);
        self
    }

    /// Repeat picture loss indications in mirror mode
    pub fn pli_interval(mut self, interval: Duration) -> Self {
        self.pli_interval = Some(interval);
        self
    }

    pub(crate) fn mirror_config(&self) -> MirrorConfig {
        MirrorConfig {
            pli_interval: self.pli_interval,
        }
    }
}
