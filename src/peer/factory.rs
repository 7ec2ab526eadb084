//! Peer connection factory
//!
//! Turns an SDP offer into an answer and a [`Session`]. The factory owns the
//! webrtc-rs API object, wires transport state changes onto the session
//! lifecycle and routes inbound tracks according to the relay mode.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::task::JoinHandle;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{
    RTCRtpCodecCapability, RTCRtpCodecParameters, RTPCodecType,
};
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

use super::sdp::validate_offer;
use super::track::{PeerFeedback, RemoteTrack, TrackFlavor, WebRtcTrack};
use crate::error::NegotiationError;
use crate::media::StreamKind;
use crate::relay::{
    forward_to_fanout, forward_to_session, FanOut, FeedbackSink, MirrorAdapter, MirrorConfig,
    RtpSource,
};
use crate::server::RelayMode;
use crate::session::{Session, SessionId, SessionState};

/// Media stream id shared by both outbound tracks
const STREAM_ID: &str = "webrtc-relay";

/// Payload types used when the playback codecs are registered explicitly
const VP8_PAYLOAD_TYPE: u8 = 96;
const OPUS_PAYLOAD_TYPE: u8 = 111;

/// Settings applied to every peer connection
#[derive(Debug, Clone)]
pub struct PeerSettings {
    pub mode: RelayMode,
    pub ice_servers: Vec<String>,
    pub write_timeout: Option<Duration>,
    pub mirror: MirrorConfig,
}

/// Result of a successful negotiation
pub struct Negotiated {
    /// Local description to return to the caller
    pub answer: RTCSessionDescription,
    /// Session for the new peer, not yet registered
    pub session: Arc<Session>,
}

/// Builds peer connections and their sessions
pub struct PeerFactory {
    api: API,
    settings: PeerSettings,
    fanout: Arc<FanOut>,
    next_session_id: AtomicU64,
}

impl PeerFactory {
    pub fn new(settings: PeerSettings, fanout: Arc<FanOut>) -> Result<Self, NegotiationError> {
        let api = build_api(settings.mode)?;

        Ok(Self {
            api,
            settings,
            fanout,
            next_session_id: AtomicU64::new(1),
        })
    }

    pub fn mode(&self) -> RelayMode {
        self.settings.mode
    }

    fn rtc_configuration(&self) -> RTCConfiguration {
        RTCConfiguration {
            ice_servers: vec![RTCIceServer {
                urls: self.settings.ice_servers.clone(),
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    /// Negotiate a session from an offer
    ///
    /// The offer is validated before any peer connection exists. If a later
    /// step fails the peer connection is closed and no session escapes.
    pub async fn connect(
        &self,
        offer: RTCSessionDescription,
    ) -> Result<Negotiated, NegotiationError> {
        if offer.sdp_type != RTCSdpType::Offer {
            return Err(NegotiationError::MalformedOffer(format!(
                "expected an offer, got {}",
                offer.sdp_type
            )));
        }
        let summary = validate_offer(&offer.sdp)?;

        let session_id = SessionId(self.next_session_id.fetch_add(1, Ordering::Relaxed));
        tracing::debug!(
            session_id = %session_id,
            mode = %self.settings.mode,
            audio_sections = summary.audio_sections,
            video_sections = summary.video_sections,
            "Negotiating session"
        );

        let peer_connection = Arc::new(
            self.api
                .new_peer_connection(self.rtc_configuration())
                .await?,
        );

        match self.negotiate(session_id, &peer_connection, offer).await {
            Ok(negotiated) => Ok(negotiated),
            Err(e) => {
                if let Err(close_err) = peer_connection.close().await {
                    tracing::debug!(
                        session_id = %session_id,
                        error = %close_err,
                        "Failed to close peer connection"
                    );
                }
                Err(e)
            }
        }
    }

    async fn negotiate(
        &self,
        session_id: SessionId,
        peer_connection: &Arc<RTCPeerConnection>,
        offer: RTCSessionDescription,
    ) -> Result<Negotiated, NegotiationError> {
        let (video, video_sender) = self.add_outbound(peer_connection, StreamKind::Video).await?;
        let (audio, audio_sender) = self.add_outbound(peer_connection, StreamKind::Audio).await?;

        let session = Arc::new(
            Session::new(session_id, Arc::new(video), Arc::new(audio))
                .with_write_timeout(self.settings.write_timeout),
        );
        session.spawn_task(spawn_rtcp_drain(video_sender));
        session.spawn_task(spawn_rtcp_drain(audio_sender));

        self.watch_connection_state(peer_connection, &session);
        self.route_inbound(peer_connection, &session);

        peer_connection.set_remote_description(offer).await?;
        let answer = peer_connection.create_answer(None).await?;

        // Answer is returned with every candidate included
        let mut gather_complete = peer_connection.gathering_complete_promise().await;
        peer_connection.set_local_description(answer).await?;
        let _ = gather_complete.recv().await;

        let answer = peer_connection
            .local_description()
            .await
            .ok_or_else(|| NegotiationError::WebRtc("no local description after answer".into()))?;

        spawn_closer(Arc::clone(peer_connection), &session);

        tracing::info!(session_id = %session_id, "Session negotiated");
        Ok(Negotiated { answer, session })
    }

    async fn add_outbound(
        &self,
        peer_connection: &Arc<RTCPeerConnection>,
        kind: StreamKind,
    ) -> Result<(WebRtcTrack, Arc<RTCRtpSender>), NegotiationError> {
        let capability = RTCRtpCodecCapability {
            mime_type: match kind {
                StreamKind::Video => MIME_TYPE_VP8,
                StreamKind::Audio => MIME_TYPE_OPUS,
            }
            .to_owned(),
            ..Default::default()
        };
        let track_id = kind.as_str().to_owned();

        let (flavor, local): (TrackFlavor, Arc<dyn TrackLocal + Send + Sync>) =
            match self.settings.mode {
                RelayMode::Playback => {
                    let track = Arc::new(TrackLocalStaticSample::new(
                        capability,
                        track_id,
                        STREAM_ID.to_owned(),
                    ));
                    (TrackFlavor::Sample(Arc::clone(&track)), track)
                }
                RelayMode::Broadcast | RelayMode::Mirror => {
                    let track = Arc::new(TrackLocalStaticRTP::new(
                        capability,
                        track_id,
                        STREAM_ID.to_owned(),
                    ));
                    (TrackFlavor::Rtp(Arc::clone(&track)), track)
                }
            };

        let sender = peer_connection.add_track(local).await?;
        let ssrc = sender
            .get_parameters()
            .await
            .encodings
            .first()
            .map(|encoding| encoding.ssrc)
            .unwrap_or_default();

        Ok((WebRtcTrack::new(flavor, ssrc), sender))
    }

    fn watch_connection_state(
        &self,
        peer_connection: &Arc<RTCPeerConnection>,
        session: &Arc<Session>,
    ) {
        let session: Weak<Session> = Arc::downgrade(session);

        peer_connection.on_peer_connection_state_change(Box::new(
            move |state: RTCPeerConnectionState| {
                if let Some(session) = session.upgrade() {
                    tracing::info!(
                        session_id = %session.id(),
                        state = %state,
                        "Peer connection state changed"
                    );
                    if let Some(next) = map_connection_state(state) {
                        session.transition(next);
                    }
                }
                Box::pin(async {})
            },
        ));
    }

    fn route_inbound(&self, peer_connection: &Arc<RTCPeerConnection>, session: &Arc<Session>) {
        let session: Weak<Session> = Arc::downgrade(session);
        let connection: Weak<RTCPeerConnection> = Arc::downgrade(peer_connection);
        let mode = self.settings.mode;
        let fanout = Arc::clone(&self.fanout);
        let mirror = self.settings.mirror.clone();

        peer_connection.on_track(Box::new(
            move |track: Arc<TrackRemote>,
                  _receiver: Arc<RTCRtpReceiver>,
                  _transceiver: Arc<RTCRtpTransceiver>| {
                if let (Some(session), Some(connection)) = (session.upgrade(), connection.upgrade()) {
                    let router = InboundRouter {
                        mode,
                        session,
                        feedback: PeerFeedback::new(&connection),
                        fanout: Arc::clone(&fanout),
                        mirror: mirror.clone(),
                    };
                    router.route(track);
                }
                Box::pin(async {})
            },
        ));
    }
}

/// Everything needed to start the copy task for one inbound track
struct InboundRouter {
    mode: RelayMode,
    session: Arc<Session>,
    feedback: PeerFeedback,
    fanout: Arc<FanOut>,
    mirror: MirrorConfig,
}

impl InboundRouter {
    fn route(self, track: Arc<TrackRemote>) {
        let kind = match track.kind() {
            RTPCodecType::Audio => StreamKind::Audio,
            RTPCodecType::Video => StreamKind::Video,
            _ => return,
        };
        let session_id = self.session.id();
        let source = Arc::new(RemoteTrack::new(track));

        tracing::info!(
            session_id = %session_id,
            kind = %kind,
            ssrc = source.ssrc(),
            mode = %self.mode,
            "Inbound track started"
        );

        let session = Arc::clone(&self.session);
        let task = match self.mode {
            RelayMode::Playback => {
                tracing::debug!(session_id = %session_id, kind = %kind, "Ignoring inbound media in playback mode");
                return;
            }
            RelayMode::Broadcast => {
                let feedback = self.feedback;
                let fanout = self.fanout;
                tokio::spawn(async move {
                    if kind == StreamKind::Video {
                        if let Err(e) = feedback.picture_loss(source.ssrc()).await {
                            tracing::warn!(session_id = %session_id, error = %e, "Failed to request key frame");
                        }
                    }
                    let forwarded = forward_to_fanout(source, kind, fanout).await;
                    tracing::debug!(session_id = %session_id, kind = %kind, forwarded = forwarded, "Broadcast copy ended");
                })
            }
            RelayMode::Mirror => match kind {
                StreamKind::Audio => {
                    let session = Arc::clone(&self.session);
                    tokio::spawn(async move {
                        log_copy_end(session_id, kind, forward_to_session(source, session, kind).await);
                    })
                }
                StreamKind::Video => {
                    let adapter = MirrorAdapter::new(Arc::clone(&self.session), self.mirror);
                    let feedback = self.feedback;
                    tokio::spawn(async move {
                        let result = adapter.run_video(source.as_ref(), &feedback).await;
                        log_copy_end(session_id, kind, result);
                    })
                }
            },
        };

        session.spawn_task(task);
    }
}

fn log_copy_end(session_id: SessionId, kind: StreamKind, result: crate::Result<u64>) {
    match result {
        Ok(forwarded) => tracing::debug!(
            session_id = %session_id,
            kind = %kind,
            forwarded = forwarded,
            "Mirror copy ended"
        ),
        Err(e) => tracing::warn!(
            session_id = %session_id,
            kind = %kind,
            error = %e,
            "Mirror copy failed"
        ),
    }
}

/// Map a transport state onto the session lifecycle
///
/// Returns `None` for states the lifecycle does not track.
pub fn map_connection_state(state: RTCPeerConnectionState) -> Option<SessionState> {
    match state {
        RTCPeerConnectionState::Connected => Some(SessionState::Connected),
        RTCPeerConnectionState::Disconnected => Some(SessionState::Disconnected),
        RTCPeerConnectionState::Failed => Some(SessionState::Failed),
        RTCPeerConnectionState::Closed => Some(SessionState::Closed),
        _ => None,
    }
}

fn build_api(mode: RelayMode) -> Result<API, NegotiationError> {
    let mut media_engine = MediaEngine::default();

    match mode {
        RelayMode::Playback => {
            media_engine.register_codec(
                RTCRtpCodecParameters {
                    capability: RTCRtpCodecCapability {
                        mime_type: MIME_TYPE_VP8.to_owned(),
                        clock_rate: StreamKind::Video.clock_rate(),
                        channels: 0,
                        sdp_fmtp_line: String::new(),
                        rtcp_feedback: vec![],
                    },
                    payload_type: VP8_PAYLOAD_TYPE,
                    ..Default::default()
                },
                RTPCodecType::Video,
            )?;
            media_engine.register_codec(
                RTCRtpCodecParameters {
                    capability: RTCRtpCodecCapability {
                        mime_type: MIME_TYPE_OPUS.to_owned(),
                        clock_rate: StreamKind::Audio.clock_rate(),
                        // Opus over RTP always signals two channels
                        channels: 2,
                        sdp_fmtp_line: "ptime=20".to_owned(),
                        rtcp_feedback: vec![],
                    },
                    payload_type: OPUS_PAYLOAD_TYPE,
                    ..Default::default()
                },
                RTPCodecType::Audio,
            )?;
        }
        RelayMode::Broadcast | RelayMode::Mirror => {
            media_engine.register_default_codecs()?;
        }
    }

    let registry = register_default_interceptors(Registry::new(), &mut media_engine)?;

    Ok(APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .build())
}

fn spawn_rtcp_drain(sender: Arc<RTCRtpSender>) -> JoinHandle<()> {
    // Interceptors only see RTCP that is read
    tokio::spawn(async move {
        let mut buf = vec![0u8; 1500];
        while sender.read(&mut buf).await.is_ok() {}
    })
}

/// Close the peer connection once the session terminates
fn spawn_closer(peer_connection: Arc<RTCPeerConnection>, session: &Arc<Session>) {
    let session_id = session.id();
    let mut state_rx = session.subscribe();

    tokio::spawn(async move {
        // A dropped session counts as terminated
        let _ = state_rx.wait_for(|state| state.is_terminal()).await;

        if let Err(e) = peer_connection.close().await {
            tracing::debug!(session_id = %session_id, error = %e, "Failed to close peer connection");
        }
        tracing::debug!(session_id = %session_id, "Peer connection closed");
    });
}
