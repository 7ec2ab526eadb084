//! Statistics for sessions and the relay as a whole
//!
//! Counters are atomics so delivery tasks can update them without locking.
//! [`SessionStats::snapshot`] and [`RelayStats::snapshot`] produce plain
//! serializable copies for logging and the `/stats` endpoint.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;

/// Per-session counters
#[derive(Debug)]
pub struct SessionStats {
    started_at: Instant,
    video_frames: AtomicU64,
    audio_frames: AtomicU64,
    bytes_sent: AtomicU64,
    failed_writes: AtomicU64,
}

/// Point-in-time copy of [`SessionStats`]
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct SessionStatsSnapshot {
    /// Video frames or packets written
    pub video_frames: u64,
    /// Audio frames or packets written
    pub audio_frames: u64,
    /// Total payload bytes written
    pub bytes_sent: u64,
    /// Writes that failed or timed out
    pub failed_writes: u64,
    /// Time since the session was created
    #[serde(with = "duration_ms")]
    pub duration: Duration,
}

impl SessionStats {
    /// Create new stats tracker
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            video_frames: AtomicU64::new(0),
            audio_frames: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            failed_writes: AtomicU64::new(0),
        }
    }

    /// Record a successful write
    pub fn on_write(&self, is_video: bool, bytes: usize) {
        if is_video {
            self.video_frames.fetch_add(1, Ordering::Relaxed);
        } else {
            self.audio_frames.fetch_add(1, Ordering::Relaxed);
        }
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Record a failed write
    pub fn on_failure(&self) {
        self.failed_writes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> SessionStatsSnapshot {
        SessionStatsSnapshot {
            video_frames: self.video_frames.load(Ordering::Relaxed),
            audio_frames: self.audio_frames.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            failed_writes: self.failed_writes.load(Ordering::Relaxed),
            duration: self.started_at.elapsed(),
        }
    }
}

impl Default for SessionStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Relay-wide counters
#[derive(Debug)]
pub struct RelayStats {
    started_at: Instant,
    sessions_created: AtomicU64,
    frames_broadcast: AtomicU64,
    writes_delivered: AtomicU64,
    writes_failed: AtomicU64,
    writes_skipped: AtomicU64,
    writes_dropped: AtomicU64,
    playback_passes: AtomicU64,
}

/// Point-in-time copy of [`RelayStats`]
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct RelayStatsSnapshot {
    /// Sessions negotiated since start
    pub sessions_created: u64,
    /// Frames handed to the fan-out engine
    pub frames_broadcast: u64,
    /// Successful per-session writes
    pub writes_delivered: u64,
    /// Failed per-session writes
    pub writes_failed: u64,
    /// Sessions passed over because they were not connected
    pub writes_skipped: u64,
    /// Frames dropped because a session's outbound queue was full
    pub writes_dropped: u64,
    /// Completed playback passes over the stored container
    pub playback_passes: u64,
    /// Time since the relay started
    #[serde(with = "duration_ms")]
    pub uptime: Duration,
}

impl RelayStats {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            sessions_created: AtomicU64::new(0),
            frames_broadcast: AtomicU64::new(0),
            writes_delivered: AtomicU64::new(0),
            writes_failed: AtomicU64::new(0),
            writes_skipped: AtomicU64::new(0),
            writes_dropped: AtomicU64::new(0),
            playback_passes: AtomicU64::new(0),
        }
    }

    pub fn on_session_created(&self) {
        self.sessions_created.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one broadcast; write outcomes are reported by the writers
    pub fn on_broadcast(&self, skipped: usize, dropped: usize) {
        self.frames_broadcast.fetch_add(1, Ordering::Relaxed);
        self.writes_skipped.fetch_add(skipped as u64, Ordering::Relaxed);
        self.writes_dropped.fetch_add(dropped as u64, Ordering::Relaxed);
    }

    pub fn on_write_delivered(&self) {
        self.writes_delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn on_write_failed(&self) {
        self.writes_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn on_write_skipped(&self) {
        self.writes_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn on_playback_pass(&self) {
        self.playback_passes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> RelayStatsSnapshot {
        RelayStatsSnapshot {
            sessions_created: self.sessions_created.load(Ordering::Relaxed),
            frames_broadcast: self.frames_broadcast.load(Ordering::Relaxed),
            writes_delivered: self.writes_delivered.load(Ordering::Relaxed),
            writes_failed: self.writes_failed.load(Ordering::Relaxed),
            writes_skipped: self.writes_skipped.load(Ordering::Relaxed),
            writes_dropped: self.writes_dropped.load(Ordering::Relaxed),
            playback_passes: self.playback_passes.load(Ordering::Relaxed),
            uptime: self.started_at.elapsed(),
        }
    }
}

impl Default for RelayStats {
    fn default() -> Self {
        Self::new()
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }
}
