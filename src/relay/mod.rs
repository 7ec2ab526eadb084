//! Media relay engine
//!
//! Moves frames from a source to sessions:
//!
//! - [`FanOut`] delivers one frame to every connected session
//! - [`Player`] paces a stored container onto the fan-out in real time
//! - [`forward_to_fanout`] and [`forward_to_session`] copy live inbound RTP
//! - [`MirrorAdapter`] loops a session's own video back with SSRC rewriting
//!
//! Inbound media and loss feedback are reached through the [`RtpSource`] and
//! [`FeedbackSink`] traits so the engine runs without a network stack in
//! tests.

pub mod broadcast;
pub mod copy;
pub mod mirror;
pub mod player;

use async_trait::async_trait;
use webrtc::rtp::packet::Packet;

use crate::error::{DeliveryError, SourceError};

pub use broadcast::{BroadcastReport, FanOut};
pub use copy::{forward_to_fanout, forward_to_session};
pub use mirror::{MirrorAdapter, MirrorConfig};
pub use player::{PlaybackConfig, Player, ReadErrorPolicy};

/// Live inbound RTP stream of one peer
#[async_trait]
pub trait RtpSource: Send + Sync {
    /// SSRC the remote sender uses for this stream
    fn ssrc(&self) -> u32;

    /// Wait for the next packet
    async fn read_rtp(&self) -> Result<Packet, SourceError>;
}

/// Sends loss feedback back to a remote sender
#[async_trait]
pub trait FeedbackSink: Send + Sync {
    /// Ask the sender of `media_ssrc` for a fresh key frame
    async fn picture_loss(&self, media_ssrc: u32) -> Result<(), DeliveryError>;
}
