//! Fan-out broadcast engine
//!
//! Delivers one frame to every connected session. Each session has its own
//! bounded queue per track and a writer task draining it, so a broadcast
//! never waits on any session's write: a slow or hung session only fills its
//! own queue, after which its frames are dropped. Failed writes are logged
//! and counted by the writer. There are no retries.
//!
//! ```text
//!                    ┌──► queue ──► writer ──► session 1 track
//!   broadcast(frame) ┼──► queue ──► writer ──► session 2 track
//!                    └──► queue (full, dropped)    session 3 (stalled)
//! ```

use std::sync::{Arc, Weak};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::DeliveryError;
use crate::media::Frame;
use crate::registry::SessionRegistry;
use crate::session::{Session, SessionId};
use crate::stats::RelayStats;

/// Frames buffered per session and track before frames are dropped
pub const DEFAULT_SESSION_QUEUE_DEPTH: usize = 64;

/// Outcome of one [`FanOut::broadcast`]
#[derive(Debug, Default)]
pub struct BroadcastReport {
    /// Sessions the frame was queued for
    pub queued: usize,
    /// Sessions that left the connected state before the frame was queued
    pub skipped: usize,
    /// Sessions whose queue was full
    pub dropped: Vec<SessionId>,
}

/// Fan-out engine over a session registry
pub struct FanOut {
    registry: Arc<SessionRegistry>,
    stats: Arc<RelayStats>,
    queue_depth: usize,
}

impl FanOut {
    pub fn new(registry: Arc<SessionRegistry>, stats: Arc<RelayStats>) -> Self {
        Self {
            registry,
            stats,
            queue_depth: DEFAULT_SESSION_QUEUE_DEPTH,
        }
    }

    /// Set the per-session queue depth
    pub fn with_queue_depth(mut self, depth: usize) -> Self {
        self.queue_depth = depth.max(1);
        self
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn stats(&self) -> &Arc<RelayStats> {
        &self.stats
    }

    /// Queue `frame` for every session connected at call time
    ///
    /// Returns once the frame is queued everywhere; the writes themselves
    /// happen on the sessions' writer tasks.
    pub async fn broadcast(&self, frame: &Frame) -> BroadcastReport {
        let sessions = self.registry.active().await;
        let mut report = BroadcastReport::default();

        for session in &sessions {
            let writer = |rx| spawn_writer(Arc::downgrade(session), rx, Arc::clone(&self.stats));

            match session.enqueue(frame.clone(), self.queue_depth, writer) {
                Ok(()) => report.queued += 1,
                Err(DeliveryError::Inactive) => report.skipped += 1,
                Err(e) => {
                    tracing::debug!(
                        session_id = %session.id(),
                        kind = %frame.kind,
                        error = %e,
                        "Session backlogged, frame dropped"
                    );
                    report.dropped.push(session.id());
                }
            }
        }

        self.stats.on_broadcast(report.skipped, report.dropped.len());
        report
    }
}

/// Drain one session track's queue
///
/// Holds the session weakly; the task is owned by the session and aborted on
/// teardown.
fn spawn_writer(
    session: Weak<Session>,
    mut rx: mpsc::Receiver<Frame>,
    stats: Arc<RelayStats>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let Some(session) = session.upgrade() else {
                break;
            };

            match session.write_frame(&frame).await {
                Ok(()) => stats.on_write_delivered(),
                Err(DeliveryError::Inactive) => stats.on_write_skipped(),
                Err(e) => {
                    stats.on_write_failed();
                    tracing::warn!(
                        session_id = %session.id(),
                        kind = %frame.kind,
                        error = %e,
                        "Write failed, frame dropped for session"
                    );
                }
            }
        }
    })
}
