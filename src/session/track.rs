//! Outbound track seam
//!
//! A [`MediaTrack`] is one outbound audio or video track of a peer
//! connection. The WebRTC implementation lives in `crate::peer`; tests use an
//! in-memory recorder.

use async_trait::async_trait;
use thiserror::Error;
use webrtc::rtp::packet::Packet;

use crate::media::Frame;

/// Error returned by an outbound track write
#[derive(Debug, Error)]
pub enum TrackError {
    /// Underlying transport rejected the write
    #[error("track write failed: {0}")]
    Write(String),

    /// Track flavour cannot carry this kind of write
    #[error("unsupported write: {0}")]
    Unsupported(&'static str),

    /// Track has been closed
    #[error("track closed")]
    Closed,
}

impl From<webrtc::Error> for TrackError {
    fn from(err: webrtc::Error) -> Self {
        match err {
            webrtc::Error::ErrClosedPipe => TrackError::Closed,
            other => TrackError::Write(other.to_string()),
        }
    }
}

/// One outbound media track
#[async_trait]
pub trait MediaTrack: Send + Sync {
    /// Synchronization source identifier the track sends with
    fn ssrc(&self) -> u32;

    /// Write one frame through the track's normal sample path
    async fn write_frame(&self, frame: &Frame) -> Result<(), TrackError>;

    /// Write a raw RTP packet, bypassing sample packetization
    async fn write_rtp(&self, packet: &Packet) -> Result<(), TrackError>;
}
