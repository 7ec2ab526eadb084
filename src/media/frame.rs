//! Frame types shared between sources and sessions
//!
//! A [`Frame`] is produced once and then handed to every session it is fanned
//! out to, so it must stay cheap to clone.

use std::time::Duration;

use bytes::Bytes;

/// Kind of media stream a frame belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    /// Opus audio
    Audio,
    /// VP8 video
    Video,
}

impl StreamKind {
    /// RTP clock rate advertised for this kind
    pub fn clock_rate(self) -> u32 {
        match self {
            StreamKind::Audio => 48_000,
            StreamKind::Video => 90_000,
        }
    }

    /// Duration assumed for a frame that carries no duration hint
    pub fn default_frame_duration(self) -> Duration {
        match self {
            StreamKind::Audio => Duration::from_millis(20),
            StreamKind::Video => Duration::from_millis(33),
        }
    }

    /// Lowercase name used in logs and track ids
    pub fn as_str(self) -> &'static str {
        match self {
            StreamKind::Audio => "audio",
            StreamKind::Video => "video",
        }
    }
}

impl std::fmt::Display for StreamKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A media unit to be delivered to sessions
///
/// `data` is either an encoded sample (playback) or a marshalled RTP packet
/// (live relay); the outbound track decides how to interpret it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Stream the frame belongs to
    pub kind: StreamKind,
    /// Payload (zero-copy via reference counting)
    pub data: Bytes,
    /// Declared presentation duration, if the source knows it
    pub duration: Option<Duration>,
}

impl Frame {
    /// Create a frame with a declared duration
    ///
    /// A zero duration declares nothing and is treated like a missing hint.
    pub fn new(kind: StreamKind, data: Bytes, duration: Duration) -> Self {
        Self {
            kind,
            data,
            duration: (!duration.is_zero()).then_some(duration),
        }
    }

    /// Create a video frame
    pub fn video(data: Bytes, duration: Duration) -> Self {
        Self::new(StreamKind::Video, data, duration)
    }

    /// Create an audio frame
    pub fn audio(data: Bytes, duration: Duration) -> Self {
        Self::new(StreamKind::Audio, data, duration)
    }

    /// Create a frame from a live packet with no duration hint
    pub fn live(kind: StreamKind, data: Bytes) -> Self {
        Self {
            kind,
            data,
            duration: None,
        }
    }

    /// Delay the pacing scheduler waits after delivering this frame
    pub fn pacing_delay(&self) -> Duration {
        self.duration
            .unwrap_or_else(|| self.kind.default_frame_duration())
    }

    /// Payload length in bytes
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the payload is empty
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
