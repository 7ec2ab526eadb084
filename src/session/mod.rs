//! Relay sessions
//!
//! A session is one remote peer with one outbound audio and one outbound video
//! track. Its lifecycle is driven by transport state reports:
//!
//! ```text
//! Negotiating ──► Connected ──► Disconnected | Failed | Closed
//!       │                              ▲
//!       └──────────────────────────────┘
//! ```
//!
//! Terminal states are final. Only `Connected` sessions receive media.

pub mod handle;
pub mod state;
pub mod track;

pub use handle::{Session, SessionId};
pub use state::SessionState;
pub use track::{MediaTrack, TrackError};
