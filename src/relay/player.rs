//! Pacing scheduler for playback mode
//!
//! Reads a stored container in container order and releases each frame to
//! the fan-out engine at the cadence given by the frame durations. One
//! producer task demuxes; one delivery task per stream kind broadcasts and
//! then sleeps for the frame's duration. The two kinds are paced
//! independently.
//!
//! ```text
//!   Container ──► producer ──┬──► mpsc(video) ──► deliver ──► FanOut
//!       ▲                    └──► mpsc(audio) ──► deliver ──► FanOut
//!       └── reopen on end of pass
//! ```

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::broadcast::FanOut;
use crate::error::SourceError;
use crate::media::{ContainerOpener, Frame, StreamKind};

/// What to do when reading a packet fails mid-pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadErrorPolicy {
    /// End the pass and reopen the container
    #[default]
    Reopen,
    /// Stop playback and return the error
    Fatal,
}

/// Playback scheduler configuration
#[derive(Debug, Clone)]
pub struct PlaybackConfig {
    /// Frames buffered per stream kind between demuxing and delivery
    pub queue_depth: usize,

    /// Handling of read errors other than end of stream
    pub read_error_policy: ReadErrorPolicy,

    /// Number of passes over the container (`None` loops forever)
    pub passes: Option<u64>,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            queue_depth: 10,
            read_error_policy: ReadErrorPolicy::Reopen,
            passes: None,
        }
    }
}

impl PlaybackConfig {
    /// Set the per-kind queue depth
    pub fn queue_depth(mut self, depth: usize) -> Self {
        self.queue_depth = depth.max(1);
        self
    }

    /// Set the read error policy
    pub fn read_error_policy(mut self, policy: ReadErrorPolicy) -> Self {
        self.read_error_policy = policy;
        self
    }

    /// Stop after `passes` passes
    pub fn passes(mut self, passes: u64) -> Self {
        self.passes = Some(passes);
        self
    }
}

/// How one pass over the container ended
enum PassEnd {
    EndOfStream,
    ReadError(SourceError),
}

/// Paces a stored container onto the fan-out engine
pub struct Player<O> {
    opener: O,
    fanout: Arc<FanOut>,
    config: PlaybackConfig,
}

impl<O: ContainerOpener> Player<O> {
    pub fn new(opener: O, fanout: Arc<FanOut>, config: PlaybackConfig) -> Self {
        Self {
            opener,
            fanout,
            config,
        }
    }

    /// Run playback
    ///
    /// Loops over the container until the configured number of passes is
    /// done, which with the default configuration is never. Returns an error
    /// if the container cannot be opened, if a pass yields no audio or video
    /// frame, or on a read error under [`ReadErrorPolicy::Fatal`].
    pub async fn run(self) -> Result<(), SourceError> {
        let (video_tx, video_rx) = mpsc::channel(self.config.queue_depth);
        let (audio_tx, audio_rx) = mpsc::channel(self.config.queue_depth);

        let video_task = spawn_delivery(StreamKind::Video, video_rx, Arc::clone(&self.fanout));
        let audio_task = spawn_delivery(StreamKind::Audio, audio_rx, Arc::clone(&self.fanout));

        let result = self.produce(&video_tx, &audio_tx).await;

        // Closing the queues lets the delivery tasks drain and exit
        drop(video_tx);
        drop(audio_tx);

        if result.is_err() {
            video_task.abort();
            audio_task.abort();
        }
        let _ = video_task.await;
        let _ = audio_task.await;

        result
    }

    async fn produce(
        &self,
        video_tx: &mpsc::Sender<Frame>,
        audio_tx: &mpsc::Sender<Frame>,
    ) -> Result<(), SourceError> {
        let mut pass: u64 = 0;

        loop {
            if let Some(limit) = self.config.passes {
                if pass >= limit {
                    return Ok(());
                }
            }

            let mut container = self.opener.open().await?;
            let video_stream = container.video_stream();
            let audio_stream = container.audio_stream();
            // Frames handed to delivery; packets of other streams do not count
            let mut frames: u64 = 0;

            let end = loop {
                let packet = match container.next_packet().await {
                    Ok(Some(packet)) => packet,
                    Ok(None) => break PassEnd::EndOfStream,
                    Err(e) => break PassEnd::ReadError(e),
                };

                let (kind, tx) = if Some(packet.stream_index) == video_stream {
                    (StreamKind::Video, video_tx)
                } else if Some(packet.stream_index) == audio_stream {
                    (StreamKind::Audio, audio_tx)
                } else {
                    continue;
                };

                let frame = Frame::new(kind, packet.data, packet.duration);
                if tx.send(frame).await.is_err() {
                    // Delivery task is gone; nothing left to pace for
                    container.close();
                    return Ok(());
                }
                frames += 1;
            };

            container.close();
            pass += 1;
            self.fanout.stats().on_playback_pass();

            match end {
                PassEnd::EndOfStream if frames == 0 => {
                    tracing::error!(pass = pass, "Container has no playable frames, stopping playback");
                    return Err(SourceError::Empty);
                }
                PassEnd::EndOfStream => {
                    tracing::debug!(pass = pass, frames = frames, "Playback pass complete, reopening");
                }
                PassEnd::ReadError(e) => match self.config.read_error_policy {
                    ReadErrorPolicy::Fatal => {
                        tracing::error!(pass = pass, error = %e, "Read error, stopping playback");
                        return Err(e);
                    }
                    ReadErrorPolicy::Reopen if frames == 0 => {
                        tracing::error!(
                            pass = pass,
                            error = %e,
                            "Read error before first frame, stopping playback"
                        );
                        return Err(e);
                    }
                    ReadErrorPolicy::Reopen => {
                        tracing::warn!(
                            pass = pass,
                            frames = frames,
                            error = %e,
                            "Read error, ending pass and reopening"
                        );
                    }
                },
            }
        }
    }
}

fn spawn_delivery(
    kind: StreamKind,
    mut rx: mpsc::Receiver<Frame>,
    fanout: Arc<FanOut>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let report = fanout.broadcast(&frame).await;
            tracing::trace!(
                kind = %kind,
                bytes = frame.len(),
                queued = report.queued,
                dropped = report.dropped.len(),
                "Frame released"
            );
            tokio::time::sleep(frame.pacing_delay()).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::Instant;

    use super::*;
    use crate::media::FileContainerOpener;
    use crate::registry::SessionRegistry;
    use crate::session::{Session, SessionId, SessionState};
    use crate::stats::RelayStats;
    use crate::testing::{connected_session, RecordedWrite, RecordingTrack, ScriptedOpener};

    fn fanout() -> Arc<FanOut> {
        Arc::new(FanOut::new(
            Arc::new(SessionRegistry::new()),
            Arc::new(RelayStats::new()),
        ))
    }

    fn gaps(writes: &[RecordedWrite]) -> Vec<Duration> {
        writes.windows(2).map(|w| w[1].at - w[0].at).collect()
    }

    fn three_video_frames() -> ScriptedOpener {
        ScriptedOpener::new(Some(0), None)
            .packet(0, b"frame-1", 33)
            .packet(0, b"frame-2", 33)
            .packet(0, b"frame-3", 34)
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_pass_delivers_to_active_sessions_only() {
        let fanout = fanout();
        let (a, a_video, a_audio) = connected_session(1);
        let (b, b_video, _) = connected_session(2);
        let (gone, gone_video, _) = connected_session(3);
        fanout.registry().add(a).await;
        fanout.registry().add(b).await;
        fanout.registry().add(Arc::clone(&gone)).await;
        gone.transition(SessionState::Failed);

        let player = Player::new(
            three_video_frames(),
            Arc::clone(&fanout),
            PlaybackConfig::default().passes(1),
        );
        player.run().await.unwrap();

        assert_eq!(a_video.write_count() + b_video.write_count(), 6);
        assert_eq!(a_video.write_count(), 3);
        assert_eq!(gone_video.write_count(), 0);
        assert_eq!(a_audio.write_count(), 0);

        let payloads: Vec<_> = a_video.writes().iter().map(|w| w.data.clone()).collect();
        assert_eq!(payloads, vec!["frame-1", "frame-2", "frame-3"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_delivers_early() {
        let fanout = fanout();
        let (session, video, _) = connected_session(1);
        fanout.registry().add(session).await;

        let player = Player::new(
            three_video_frames(),
            Arc::clone(&fanout),
            PlaybackConfig::default().passes(2),
        );
        player.run().await.unwrap();

        let writes = video.writes();
        assert_eq!(writes.len(), 6);

        let declared = [33, 33, 34, 33, 33].map(Duration::from_millis);
        for (gap, expected) in gaps(&writes).into_iter().zip(declared) {
            assert!(gap >= expected, "gap {:?} shorter than {:?}", gap, expected);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_restarts_after_last_frame() {
        let fanout = fanout();
        let (session, video, _) = connected_session(1);
        fanout.registry().add(session).await;

        let opener = Arc::new(three_video_frames());
        let player = Player::new(
            SharedOpener(Arc::clone(&opener)),
            Arc::clone(&fanout),
            PlaybackConfig::default().passes(3),
        );
        player.run().await.unwrap();

        assert_eq!(opener.open_count(), 3);
        assert_eq!(video.write_count(), 9);
        assert_eq!(fanout.stats().snapshot().playback_passes, 3);

        // First frame of the next pass follows the last frame's duration
        let writes = video.writes();
        let restart = writes[3].at - writes[2].at;
        assert!(restart >= Duration::from_millis(34));
        assert!(restart < Duration::from_millis(34 + 33));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_viewer_does_not_stall_playback() {
        let fanout = fanout();
        let hung = Arc::new(Session::new(
            SessionId(1),
            RecordingTrack::with_delay(1, Duration::from_secs(5)),
            RecordingTrack::new(2),
        ));
        hung.transition(SessionState::Connected);
        fanout.registry().add(hung).await;

        let (healthy, video, _) = connected_session(2);
        fanout.registry().add(healthy).await;

        let start = Instant::now();
        Player::new(
            three_video_frames(),
            Arc::clone(&fanout),
            PlaybackConfig::default().passes(2),
        )
        .run()
        .await
        .unwrap();

        let writes = video.writes();
        assert_eq!(writes.len(), 6);
        let declared = [33, 33, 34, 33, 33].map(Duration::from_millis);
        for (gap, expected) in gaps(&writes).into_iter().zip(declared) {
            assert!(gap >= expected);
            assert!(gap < expected + Duration::from_millis(5), "healthy viewer stalled: {:?}", gap);
        }
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_audio_and_video_paced_independently() {
        let fanout = fanout();
        let (session, video, audio) = connected_session(1);
        fanout.registry().add(session).await;

        let opener = ScriptedOpener::new(Some(0), Some(1))
            .packet(0, b"v1", 40)
            .packet(1, b"a1", 20)
            .packet(1, b"a2", 20)
            .packet(0, b"v2", 40)
            .packet(1, b"a3", 20)
            .packet(1, b"a4", 20);

        let start = Instant::now();
        Player::new(opener, Arc::clone(&fanout), PlaybackConfig::default().passes(1))
            .run()
            .await
            .unwrap();

        let audio_writes = audio.writes();
        let video_writes = video.writes();
        assert_eq!(audio_writes.len(), 4);
        assert_eq!(video_writes.len(), 2);

        // Audio is not held back by the slower video cadence
        assert!(audio_writes[3].at - start < Duration::from_millis(80));
        for gap in gaps(&audio_writes) {
            assert!(gap >= Duration::from_millis(20));
        }
        assert!(gaps(&video_writes)[0] >= Duration::from_millis(40));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_stream_ignored() {
        let fanout = fanout();
        let (session, video, audio) = connected_session(1);
        fanout.registry().add(session).await;

        let opener = ScriptedOpener::new(Some(0), Some(1))
            .packet(2, b"subtitle", 10)
            .packet(0, b"v1", 33);

        Player::new(opener, Arc::clone(&fanout), PlaybackConfig::default().passes(1))
            .run()
            .await
            .unwrap();

        assert_eq!(video.write_count(), 1);
        assert_eq!(audio.write_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_error_reopens_by_default() {
        let fanout = fanout();
        let (session, video, _) = connected_session(1);
        fanout.registry().add(session).await;

        let opener = Arc::new(
            ScriptedOpener::new(Some(0), None)
                .packet(0, b"v1", 33)
                .error()
                .packet(0, b"never", 33),
        );
        Player::new(
            SharedOpener(Arc::clone(&opener)),
            Arc::clone(&fanout),
            PlaybackConfig::default().passes(2),
        )
        .run()
        .await
        .unwrap();

        assert_eq!(opener.open_count(), 2);
        let payloads: Vec<_> = video.writes().iter().map(|w| w.data.clone()).collect();
        assert_eq!(payloads, vec!["v1", "v1"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_error_fatal_policy() {
        let fanout = fanout();
        let (session, video, _) = connected_session(1);
        fanout.registry().add(session).await;

        let opener = Arc::new(
            ScriptedOpener::new(Some(0), None)
                .packet(0, b"v1", 33)
                .error(),
        );
        let result = Player::new(
            SharedOpener(Arc::clone(&opener)),
            Arc::clone(&fanout),
            PlaybackConfig::default().read_error_policy(ReadErrorPolicy::Fatal),
        )
        .run()
        .await;

        assert!(matches!(result, Err(SourceError::Malformed(_))));
        assert_eq!(opener.open_count(), 1);
        assert!(video.write_count() <= 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_container_stops_playback() {
        let result = Player::new(
            ScriptedOpener::new(Some(0), Some(1)),
            fanout(),
            PlaybackConfig::default(),
        )
        .run()
        .await;

        assert!(matches!(result, Err(SourceError::Empty)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pass_without_playable_frames_stops_playback() {
        let opener = Arc::new(
            ScriptedOpener::new(Some(0), Some(1))
                .packet(2, b"subtitle", 10)
                .packet(3, b"data", 10),
        );
        let result = Player::new(
            SharedOpener(Arc::clone(&opener)),
            fanout(),
            PlaybackConfig::default(),
        )
        .run()
        .await;

        assert!(matches!(result, Err(SourceError::Empty)));
        assert_eq!(opener.open_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_duration_frames_are_still_paced() {
        let fanout = fanout();
        let (session, video, _) = connected_session(1);
        fanout.registry().add(session).await;

        let opener = ScriptedOpener::new(Some(0), None)
            .packet(0, b"v1", 0)
            .packet(0, b"v2", 0)
            .packet(0, b"v3", 0);
        Player::new(opener, Arc::clone(&fanout), PlaybackConfig::default().passes(1))
            .run()
            .await
            .unwrap();

        for gap in gaps(&video.writes()) {
            assert!(gap >= Duration::from_millis(33));
        }
    }

    #[tokio::test]
    async fn test_open_failure_stops_playback() {
        let dir = tempfile::tempdir().unwrap();
        let opener = FileContainerOpener::new(Some(dir.path().join("missing.ivf")), None);

        let result = Player::new(opener, fanout(), PlaybackConfig::default())
            .run()
            .await;

        assert!(matches!(result, Err(SourceError::Open { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_playback_without_viewers_keeps_looping() {
        let opener = Arc::new(three_video_frames());
        let fanout = fanout();

        Player::new(
            SharedOpener(Arc::clone(&opener)),
            Arc::clone(&fanout),
            PlaybackConfig::default().passes(4),
        )
        .run()
        .await
        .unwrap();

        assert_eq!(opener.open_count(), 4);
        let stats = fanout.stats().snapshot();
        assert_eq!(stats.frames_broadcast, 12);
        assert_eq!(stats.writes_delivered, 0);
    }

    /// Lets a test keep a handle on the opener after the player takes it
    struct SharedOpener(Arc<ScriptedOpener>);

    #[async_trait::async_trait]
    impl ContainerOpener for SharedOpener {
        async fn open(&self) -> Result<Box<dyn crate::media::Container>, SourceError> {
            self.0.open().await
        }
    }
}
