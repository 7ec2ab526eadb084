//! WebRTC negotiation
//!
//! Everything that touches webrtc-rs peer connections lives here:
//!
//! - [`validate_offer`] rejects offers without VP8/Opus before any peer
//!   connection is built
//! - [`PeerFactory`] negotiates a peer connection and returns its answer and
//!   [`Session`](crate::session::Session)
//! - [`WebRtcTrack`], [`RemoteTrack`] and [`PeerFeedback`] adapt webrtc-rs
//!   tracks to the relay seams

pub mod factory;
pub mod sdp;
pub mod track;

pub use factory::{map_connection_state, Negotiated, PeerFactory, PeerSettings};
pub use sdp::{validate_offer, OfferSummary};
pub use track::{PeerFeedback, RemoteTrack, TrackFlavor, WebRtcTrack};
