//! Error types for the relay
//!
//! Errors are split by where they can occur. Only negotiation errors ever
//! reach the HTTP caller; delivery and source errors stay inside the task
//! that produced them.

use std::time::Duration;

use thiserror::Error;

use crate::session::TrackError;

/// Result type alias using the relay [`Error`]
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level relay error
#[derive(Debug, Error)]
pub enum Error {
    /// Offer could not be turned into a session
    #[error("negotiation failed: {0}")]
    Negotiation(#[from] NegotiationError),

    /// Writing to one session failed
    #[error("delivery failed: {0}")]
    Delivery(#[from] DeliveryError),

    /// Reading from a frame source failed
    #[error("source failed: {0}")]
    Source(#[from] SourceError),

    /// I/O error (binding the signaling endpoint, serving files)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Signaling server error
    #[error("server error: {0}")]
    Server(String),
}

/// Failure to negotiate a new session from an offer
#[derive(Debug, Error)]
pub enum NegotiationError {
    /// Request body was not a valid `{"offer": ...}` envelope
    #[error("malformed offer: {0}")]
    MalformedOffer(String),

    /// Offer SDP could not be parsed
    #[error("invalid session description: {0}")]
    InvalidSdp(String),

    /// Offer carries a media section the relay cannot serve
    #[error("unsupported media: {0}")]
    UnsupportedMedia(String),

    /// The WebRTC stack rejected an operation
    #[error("webrtc error: {0}")]
    WebRtc(String),
}

impl From<webrtc::Error> for NegotiationError {
    fn from(err: webrtc::Error) -> Self {
        NegotiationError::WebRtc(err.to_string())
    }
}

/// Failure to deliver one frame or packet to one session
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// Session was not connected when the write was attempted
    #[error("session not active")]
    Inactive,

    /// Write did not complete within the session write deadline
    #[error("write timed out after {0:?}")]
    Timeout(Duration),

    /// Session's outbound queue was full and the frame was dropped
    #[error("outbound queue full")]
    Backlogged,

    /// Outbound track rejected the write
    #[error(transparent)]
    Track(#[from] TrackError),
}

/// Failure to read the next unit from a frame source
#[derive(Debug, Error)]
pub enum SourceError {
    /// Stored container could not be opened
    #[error("failed to open {path}: {reason}")]
    Open { path: String, reason: String },

    /// Stored container data is truncated or corrupt
    #[error("malformed container: {0}")]
    Malformed(String),

    /// A full playback pass produced no packets
    #[error("container has no playable packets")]
    Empty,

    /// Live inbound track read failed
    #[error("inbound read failed: {0}")]
    Read(String),
}

impl From<webrtc::Error> for SourceError {
    fn from(err: webrtc::Error) -> Self {
        SourceError::Read(err.to_string())
    }
}

impl Error {
    /// Whether the HTTP caller should see this as a client error
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Error::Negotiation(
                NegotiationError::MalformedOffer(_)
                    | NegotiationError::InvalidSdp(_)
                    | NegotiationError::UnsupportedMedia(_)
            )
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_error_classification() {
        let err: Error = NegotiationError::UnsupportedMedia("video".into()).into();
        assert!(err.is_client_error());

        let err: Error = NegotiationError::WebRtc("ice".into()).into();
        assert!(!err.is_client_error());

        let err: Error = SourceError::Empty.into();
        assert!(!err.is_client_error());
    }

    #[test]
    fn test_delivery_error_display() {
        let err = DeliveryError::Timeout(Duration::from_millis(250));
        assert_eq!(err.to_string(), "write timed out after 250ms");
        assert_eq!(DeliveryError::Inactive.to_string(), "session not active");
        assert_eq!(DeliveryError::Backlogged.to_string(), "outbound queue full");
    }
}
