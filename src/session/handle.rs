//! Session handle
//!
//! A [`Session`] wraps one peer connection's outbound audio and video tracks
//! together with its lifecycle state. Writes are checked against the state
//! immediately before they happen and are serialized per track.
//!
//! Fan-out does not write directly: it queues frames with
//! [`Session::enqueue`] into a bounded queue per track, drained by a writer
//! task the session owns. A stalled track only backs up its own queue.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use webrtc::rtp::packet::Packet;

use super::state::SessionState;
use super::track::MediaTrack;
use crate::error::DeliveryError;
use crate::media::{Frame, StreamKind};
use crate::stats::{SessionStats, SessionStatsSnapshot};

/// Opaque session identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One live relay endpoint
pub struct Session {
    id: SessionId,
    state: watch::Sender<SessionState>,
    video: Arc<dyn MediaTrack>,
    audio: Arc<dyn MediaTrack>,
    /// Serializes writes per track so payloads never interleave
    video_lock: AsyncMutex<()>,
    audio_lock: AsyncMutex<()>,
    /// Queues feeding the per-track writer tasks, created on first use
    video_outbox: Mutex<Option<mpsc::Sender<Frame>>>,
    audio_outbox: Mutex<Option<mpsc::Sender<Frame>>>,
    write_timeout: Option<Duration>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    stats: SessionStats,
}

impl Session {
    /// Create a session in the `Negotiating` state
    pub fn new(id: SessionId, video: Arc<dyn MediaTrack>, audio: Arc<dyn MediaTrack>) -> Self {
        let (state, _) = watch::channel(SessionState::Negotiating);

        Self {
            id,
            state,
            video,
            audio,
            video_lock: AsyncMutex::new(()),
            audio_lock: AsyncMutex::new(()),
            video_outbox: Mutex::new(None),
            audio_outbox: Mutex::new(None),
            write_timeout: None,
            tasks: Mutex::new(Vec::new()),
            stats: SessionStats::new(),
        }
    }

    /// Fail writes that do not complete within `timeout`
    pub fn with_write_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.write_timeout = timeout;
        self
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Whether the session is connected
    ///
    /// Reads the live state on every call; callers must not cache it.
    pub fn is_active(&self) -> bool {
        self.state().is_active()
    }

    /// Subscribe to lifecycle changes
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Apply a transport state change
    ///
    /// Returns `false` when the change is ignored (same state, or the session
    /// is already terminal).
    pub fn transition(&self, next: SessionState) -> bool {
        let changed = self.state.send_if_modified(|current| {
            if current.can_transition_to(next) {
                *current = next;
                true
            } else {
                false
            }
        });

        if changed {
            tracing::debug!(session_id = %self.id, state = %next, "Session state changed");
        }

        changed
    }

    /// Outbound track for `kind`
    pub fn track(&self, kind: StreamKind) -> &Arc<dyn MediaTrack> {
        match kind {
            StreamKind::Audio => &self.audio,
            StreamKind::Video => &self.video,
        }
    }

    fn lock(&self, kind: StreamKind) -> &AsyncMutex<()> {
        match kind {
            StreamKind::Audio => &self.audio_lock,
            StreamKind::Video => &self.video_lock,
        }
    }

    fn outbox(&self, kind: StreamKind) -> &Mutex<Option<mpsc::Sender<Frame>>> {
        match kind {
            StreamKind::Audio => &self.audio_outbox,
            StreamKind::Video => &self.video_outbox,
        }
    }

    /// Queue a frame for its track without waiting for the write
    ///
    /// The first frame of a kind creates that kind's queue with room for
    /// `depth` frames and passes the receiving end to `spawn_writer`; the
    /// returned task is owned by the session. A full queue drops the frame
    /// with [`DeliveryError::Backlogged`].
    pub fn enqueue<F>(&self, frame: Frame, depth: usize, spawn_writer: F) -> Result<(), DeliveryError>
    where
        F: FnOnce(mpsc::Receiver<Frame>) -> JoinHandle<()>,
    {
        if !self.is_active() {
            return Err(DeliveryError::Inactive);
        }

        let mut outbox = self.outbox(frame.kind).lock();
        let tx = outbox.get_or_insert_with(|| {
            let (tx, rx) = mpsc::channel(depth.max(1));
            self.spawn_task(spawn_writer(rx));
            tx
        });

        match tx.try_send(frame) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(DeliveryError::Backlogged),
            Err(TrySendError::Closed(_)) => Err(DeliveryError::Inactive),
        }
    }

    /// Write a frame to the matching outbound track
    pub async fn write_frame(&self, frame: &Frame) -> Result<(), DeliveryError> {
        if !self.is_active() {
            return Err(DeliveryError::Inactive);
        }

        let _guard = self.lock(frame.kind).lock().await;

        // State may have changed while waiting for the lock
        if !self.is_active() {
            return Err(DeliveryError::Inactive);
        }

        let track = self.track(frame.kind);
        let result = self.with_deadline(track.write_frame(frame)).await;
        self.record(frame.kind, frame.len(), &result);
        result
    }

    /// Write a raw RTP packet to the matching outbound track
    pub async fn write_rtp(&self, kind: StreamKind, packet: &Packet) -> Result<(), DeliveryError> {
        if !self.is_active() {
            return Err(DeliveryError::Inactive);
        }

        let _guard = self.lock(kind).lock().await;

        if !self.is_active() {
            return Err(DeliveryError::Inactive);
        }

        let track = self.track(kind);
        let result = self.with_deadline(track.write_rtp(packet)).await;
        self.record(kind, packet.payload.len(), &result);
        result
    }

    async fn with_deadline<F>(&self, write: F) -> Result<(), DeliveryError>
    where
        F: std::future::Future<Output = Result<(), super::track::TrackError>>,
    {
        match self.write_timeout {
            Some(limit) => match tokio::time::timeout(limit, write).await {
                Ok(result) => result.map_err(DeliveryError::from),
                Err(_) => Err(DeliveryError::Timeout(limit)),
            },
            None => write.await.map_err(DeliveryError::from),
        }
    }

    fn record(&self, kind: StreamKind, bytes: usize, result: &Result<(), DeliveryError>) {
        match result {
            Ok(()) => self.stats.on_write(kind == StreamKind::Video, bytes),
            Err(_) => self.stats.on_failure(),
        }
    }

    /// Attach a background task that is aborted on teardown
    pub fn spawn_task(&self, handle: JoinHandle<()>) {
        let mut tasks = self.tasks.lock();
        tasks.retain(|task| !task.is_finished());
        tasks.push(handle);
    }

    /// Number of background tasks still running
    pub fn task_count(&self) -> usize {
        self.tasks.lock().iter().filter(|t| !t.is_finished()).count()
    }

    /// Abort every background task attached to this session
    pub fn teardown(&self) {
        self.video_outbox.lock().take();
        self.audio_outbox.lock().take();

        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        let count = tasks.len();
        for task in tasks {
            task.abort();
        }

        if count > 0 {
            tracing::debug!(session_id = %self.id, tasks = count, "Session tasks cancelled");
        }
    }

    pub fn stats(&self) -> SessionStatsSnapshot {
        self.stats.snapshot()
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}
