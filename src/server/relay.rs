//! Relay orchestration
//!
//! [`Relay`] owns the session registry, the fan-out engine and the peer
//! factory, and is what the HTTP boundary talks to. One instance is one
//! independent relay; nothing is process-global.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

use super::config::{RelayConfig, RelayMode};
use crate::error::{Error, NegotiationError, Result};
use crate::media::FileContainerOpener;
use crate::peer::{Negotiated, PeerFactory, PeerSettings};
use crate::registry::SessionRegistry;
use crate::relay::{FanOut, Player};
use crate::session::SessionState;
use crate::stats::{RelayStats, RelayStatsSnapshot};

/// Signaling request body
#[derive(Debug, Deserialize)]
pub struct ConnectRequest {
    pub offer: RTCSessionDescription,
}

/// Signaling response body
#[derive(Debug, Serialize)]
pub struct ConnectResponse {
    pub answer: RTCSessionDescription,
    pub success: bool,
}

/// Relay state exposed on the stats endpoint
#[derive(Debug, Serialize)]
pub struct RelayReport {
    pub mode: &'static str,
    /// Registered sessions in any non-terminal state
    pub sessions: usize,
    /// Sessions currently connected
    pub active_sessions: usize,
    #[serde(flatten)]
    pub stats: RelayStatsSnapshot,
}

/// A media relay instance
pub struct Relay {
    config: RelayConfig,
    registry: Arc<SessionRegistry>,
    fanout: Arc<FanOut>,
    stats: Arc<RelayStats>,
    peers: PeerFactory,
    player: Mutex<Option<JoinHandle<()>>>,
}

impl Relay {
    /// Create a relay from its configuration
    pub fn new(config: RelayConfig) -> Result<Self> {
        let registry = Arc::new(SessionRegistry::new());
        let stats = Arc::new(RelayStats::new());
        let fanout = Arc::new(FanOut::new(Arc::clone(&registry), Arc::clone(&stats)));

        let peers = PeerFactory::new(
            PeerSettings {
                mode: config.mode,
                ice_servers: config.ice_servers.clone(),
                write_timeout: config.write_timeout,
                mirror: config.mirror_config(),
            },
            Arc::clone(&fanout),
        )?;

        Ok(Self {
            config,
            registry,
            fanout,
            stats,
            peers,
            player: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn fanout(&self) -> &Arc<FanOut> {
        &self.fanout
    }

    /// Start mode-specific background work
    ///
    /// In playback mode this spawns the pacing scheduler exactly once for
    /// the whole relay, independent of how many viewers join. Other modes
    /// have nothing to start.
    pub fn start(&self) -> Result<()> {
        if self.config.mode != RelayMode::Playback {
            return Ok(());
        }

        let mut slot = self.player.lock();
        if slot.is_some() {
            return Ok(());
        }

        if self.config.video_path.is_none() && self.config.audio_path.is_none() {
            return Err(Error::Server(
                "playback mode needs a video or audio file".into(),
            ));
        }

        let opener = FileContainerOpener::new(
            self.config.video_path.clone(),
            self.config.audio_path.clone(),
        );
        let player = Player::new(opener, Arc::clone(&self.fanout), self.config.playback.clone());

        tracing::info!(
            video = ?self.config.video_path,
            audio = ?self.config.audio_path,
            "Starting playback"
        );

        *slot = Some(tokio::spawn(async move {
            match player.run().await {
                Ok(()) => tracing::info!("Playback finished"),
                Err(e) => tracing::error!(error = %e, "Playback stopped"),
            }
        }));

        Ok(())
    }

    /// Negotiate and register a session for `offer`
    ///
    /// The session is registered only after its answer exists; a failed
    /// negotiation leaves the registry untouched.
    pub async fn connect(&self, offer: RTCSessionDescription) -> Result<RTCSessionDescription> {
        let Negotiated { answer, session } = self.peers.connect(offer).await?;

        self.stats.on_session_created();
        self.registry.add(session).await;

        Ok(answer)
    }

    /// Handle a raw `{"offer": ...}` request body
    pub async fn accept_offer(&self, body: &[u8]) -> Result<ConnectResponse> {
        let request: ConnectRequest = serde_json::from_slice(body)
            .map_err(|e| NegotiationError::MalformedOffer(e.to_string()))?;

        let answer = self.connect(request.offer).await?;

        Ok(ConnectResponse {
            answer,
            success: true,
        })
    }

    /// Current counters
    pub async fn report(&self) -> RelayReport {
        RelayReport {
            mode: self.config.mode.as_str(),
            sessions: self.registry.len().await,
            active_sessions: self.registry.active().await.len(),
            stats: self.stats.snapshot(),
        }
    }

    /// Stop playback and close every session
    pub async fn shutdown(&self) {
        if let Some(player) = self.player.lock().take() {
            player.abort();
        }

        let sessions = self.registry.clear().await;
        let count = sessions.len();
        for session in sessions {
            // Closes the underlying peer connection
            session.transition(SessionState::Closed);
        }

        tracing::info!(sessions = count, "Relay shut down");
    }
}
