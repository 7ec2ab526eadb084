//! webrtc-rs implementations of the relay seams

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use webrtc::media::Sample;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtcp::payload_feedbacks::picture_loss_indication::PictureLossIndication;
use webrtc::rtp::packet::Packet;
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocalWriter;
use webrtc::track::track_remote::TrackRemote;

use crate::error::{DeliveryError, SourceError};
use crate::media::Frame;
use crate::relay::{FeedbackSink, RtpSource};
use crate::session::{MediaTrack, TrackError};

/// How an outbound track accepts media
pub enum TrackFlavor {
    /// Encoded samples, packetized by the track (playback)
    Sample(Arc<TrackLocalStaticSample>),
    /// Ready-made RTP packets (live relay and mirror)
    Rtp(Arc<TrackLocalStaticRTP>),
}

/// Outbound track of a peer connection
pub struct WebRtcTrack {
    flavor: TrackFlavor,
    ssrc: u32,
}

impl WebRtcTrack {
    pub fn new(flavor: TrackFlavor, ssrc: u32) -> Self {
        Self { flavor, ssrc }
    }
}

#[async_trait]
impl MediaTrack for WebRtcTrack {
    fn ssrc(&self) -> u32 {
        self.ssrc
    }

    async fn write_frame(&self, frame: &Frame) -> Result<(), TrackError> {
        match &self.flavor {
            TrackFlavor::Sample(track) => {
                let sample = Sample {
                    data: frame.data.clone(),
                    duration: frame.pacing_delay(),
                    ..Default::default()
                };
                track.write_sample(&sample).await?;
            }
            // Live frames carry a marshalled packet; the track rewrites SSRC
            // and payload type for its binding
            TrackFlavor::Rtp(track) => {
                track.write(&frame.data).await?;
            }
        }
        Ok(())
    }

    async fn write_rtp(&self, packet: &Packet) -> Result<(), TrackError> {
        match &self.flavor {
            TrackFlavor::Sample(_) => Err(TrackError::Unsupported(
                "raw RTP on a sample track",
            )),
            TrackFlavor::Rtp(track) => {
                track.write_rtp(packet).await?;
                Ok(())
            }
        }
    }
}

/// Inbound track of a peer connection
pub struct RemoteTrack {
    track: Arc<TrackRemote>,
}

impl RemoteTrack {
    pub fn new(track: Arc<TrackRemote>) -> Self {
        Self { track }
    }
}

#[async_trait]
impl RtpSource for RemoteTrack {
    fn ssrc(&self) -> u32 {
        self.track.ssrc()
    }

    async fn read_rtp(&self) -> Result<Packet, SourceError> {
        let (packet, _attributes) = self.track.read_rtp().await?;
        Ok(packet)
    }
}

/// Sends RTCP feedback over a peer connection
///
/// Holds the connection weakly so a running copy task does not keep a closed
/// connection alive.
pub struct PeerFeedback {
    connection: Weak<RTCPeerConnection>,
}

impl PeerFeedback {
    pub fn new(connection: &Arc<RTCPeerConnection>) -> Self {
        Self {
            connection: Arc::downgrade(connection),
        }
    }
}

#[async_trait]
impl FeedbackSink for PeerFeedback {
    async fn picture_loss(&self, media_ssrc: u32) -> Result<(), DeliveryError> {
        let connection = self
            .connection
            .upgrade()
            .ok_or(DeliveryError::Track(TrackError::Closed))?;

        connection
            .write_rtcp(&[Box::new(PictureLossIndication {
                sender_ssrc: 0,
                media_ssrc,
            })])
            .await
            .map_err(|e| DeliveryError::Track(e.into()))?;
        Ok(())
    }
}
