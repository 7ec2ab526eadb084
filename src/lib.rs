//! Real-time WebRTC media relay
//!
//! Relays audio and video between one source and many WebRTC peers in three
//! modes:
//!
//! - **Broadcast**: inbound media from a publishing peer is fanned out to
//!   every connected peer
//! - **Playback**: a stored VP8/Opus source is paced out in real time to
//!   every connected peer, looping forever
//! - **Mirror**: each peer's own media is sent back to it with the SSRC
//!   rewritten, after a key frame request
//!
//! # Example
//!
//! ```no_run
//! use webrtc_relay::{Relay, RelayConfig, RelayMode, RelayServer};
//!
//! #[tokio::main]
//! async fn main() -> webrtc_relay::Result<()> {
//!     let config = RelayConfig::default().mode(RelayMode::Mirror);
//!     let server = RelayServer::new(Relay::new(config)?);
//!     server.run().await
//! }
//! ```

pub mod error;
pub mod media;
pub mod peer;
pub mod registry;
pub mod relay;
pub mod server;
pub mod session;
pub mod stats;

#[cfg(test)]
mod testing;

pub use error::{Error, Result};
pub use media::{Frame, StreamKind};
pub use registry::SessionRegistry;
pub use server::{Relay, RelayConfig, RelayMode, RelayServer, DEFAULT_ICE_SERVER};
pub use session::{Session, SessionId, SessionState};
