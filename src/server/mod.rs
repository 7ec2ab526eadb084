//! Relay server
//!
//! Ties the relay engine to the outside world: [`RelayConfig`] describes an
//! instance, [`Relay`] owns its registry, fan-out engine and peer factory,
//! and [`RelayServer`] exposes it over HTTP.

pub mod config;
pub mod http;
pub mod relay;

pub use config::{RelayConfig, RelayMode, DEFAULT_ICE_SERVER, DEFAULT_PORT};
pub use http::RelayServer;
pub use relay::{ConnectRequest, ConnectResponse, Relay, RelayReport};
