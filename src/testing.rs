//! In-memory test doubles shared by unit tests

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::time::Instant;
use webrtc::rtp::packet::Packet;

use crate::error::{DeliveryError, SourceError};
use crate::media::{Container, ContainerOpener, ContainerPacket, Frame};
use crate::relay::{FeedbackSink, RtpSource};
use crate::session::{MediaTrack, Session, SessionId, SessionState, TrackError};

/// One write observed by a [`RecordingTrack`]
#[derive(Debug, Clone)]
pub struct RecordedWrite {
    pub at: Instant,
    pub data: Bytes,
    /// SSRC of the packet for raw RTP writes
    pub ssrc: Option<u32>,
}

/// Track that records every write
pub struct RecordingTrack {
    ssrc: u32,
    chunk: Option<usize>,
    delay: Option<Duration>,
    fail: AtomicBool,
    writes: Mutex<Vec<RecordedWrite>>,
    bytes: Mutex<Vec<u8>>,
}

impl RecordingTrack {
    fn build(ssrc: u32, chunk: Option<usize>, delay: Option<Duration>) -> Arc<Self> {
        Arc::new(Self {
            ssrc,
            chunk,
            delay,
            fail: AtomicBool::new(false),
            writes: Mutex::new(Vec::new()),
            bytes: Mutex::new(Vec::new()),
        })
    }

    pub fn new(ssrc: u32) -> Arc<Self> {
        Self::build(ssrc, None, None)
    }

    /// Copies payloads `chunk` bytes at a time, yielding in between
    pub fn chunked(ssrc: u32, chunk: usize) -> Arc<Self> {
        Self::build(ssrc, Some(chunk), None)
    }

    /// Sleeps for `delay` before completing each write
    pub fn with_delay(ssrc: u32, delay: Duration) -> Arc<Self> {
        Self::build(ssrc, None, Some(delay))
    }

    /// Track whose writes always fail
    pub fn failing(ssrc: u32) -> Arc<Self> {
        let track = Self::new(ssrc);
        track.fail.store(true, Ordering::SeqCst);
        track
    }

    pub fn write_count(&self) -> usize {
        self.writes.lock().len()
    }

    pub fn writes(&self) -> Vec<RecordedWrite> {
        self.writes.lock().clone()
    }

    pub fn bytes(&self) -> Vec<u8> {
        self.bytes.lock().clone()
    }

    async fn record(&self, data: Bytes, ssrc: Option<u32>) -> Result<(), TrackError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(TrackError::Write("injected failure".into()));
        }

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        match self.chunk {
            Some(size) => {
                for piece in data.chunks(size) {
                    self.bytes.lock().extend_from_slice(piece);
                    tokio::task::yield_now().await;
                }
            }
            None => self.bytes.lock().extend_from_slice(&data),
        }

        self.writes.lock().push(RecordedWrite {
            at: Instant::now(),
            data,
            ssrc,
        });
        Ok(())
    }
}

#[async_trait]
impl MediaTrack for RecordingTrack {
    fn ssrc(&self) -> u32 {
        self.ssrc
    }

    async fn write_frame(&self, frame: &Frame) -> Result<(), TrackError> {
        self.record(frame.data.clone(), None).await
    }

    async fn write_rtp(&self, packet: &Packet) -> Result<(), TrackError> {
        self.record(packet.payload.clone(), Some(packet.header.ssrc))
            .await
    }
}

/// Session with recording tracks, already connected
pub fn connected_session(id: u64) -> (Arc<Session>, Arc<RecordingTrack>, Arc<RecordingTrack>) {
    let video = RecordingTrack::new(1000 + id as u32);
    let audio = RecordingTrack::new(2000 + id as u32);
    let session = Arc::new(Session::new(SessionId(id), video.clone(), audio.clone()));
    session.transition(SessionState::Connected);
    (session, video, audio)
}

/// Container that replays a fixed packet list
pub struct ScriptedContainer {
    video: Option<usize>,
    audio: Option<usize>,
    packets: VecDeque<Result<ContainerPacket, SourceError>>,
}

#[async_trait]
impl Container for ScriptedContainer {
    fn video_stream(&self) -> Option<usize> {
        self.video
    }

    fn audio_stream(&self) -> Option<usize> {
        self.audio
    }

    async fn next_packet(&mut self) -> Result<Option<ContainerPacket>, SourceError> {
        self.packets.pop_front().transpose()
    }
}

/// Opener producing [`ScriptedContainer`]s; counts how often it was opened
pub struct ScriptedOpener {
    pub video: Option<usize>,
    pub audio: Option<usize>,
    script: Vec<ScriptItem>,
    pub opens: AtomicUsize,
}

#[derive(Clone)]
enum ScriptItem {
    Packet(ContainerPacket),
    Error,
}

impl ScriptedOpener {
    pub fn new(video: Option<usize>, audio: Option<usize>) -> Self {
        Self {
            video,
            audio,
            script: Vec::new(),
            opens: AtomicUsize::new(0),
        }
    }

    pub fn packet(mut self, stream_index: usize, payload: &[u8], duration_ms: u64) -> Self {
        self.script.push(ScriptItem::Packet(ContainerPacket::new(
            stream_index,
            Bytes::copy_from_slice(payload),
            Duration::from_millis(duration_ms),
        )));
        self
    }

    /// Injects a read error at this position
    pub fn error(mut self) -> Self {
        self.script.push(ScriptItem::Error);
        self
    }

    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContainerOpener for ScriptedOpener {
    async fn open(&self) -> Result<Box<dyn Container>, SourceError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let packets = self
            .script
            .iter()
            .map(|item| match item {
                ScriptItem::Packet(packet) => Ok(packet.clone()),
                ScriptItem::Error => Err(SourceError::Malformed("injected".into())),
            })
            .collect();

        Ok(Box::new(ScriptedContainer {
            video: self.video,
            audio: self.audio,
            packets,
        }))
    }
}

/// Inbound RTP source fed from a list; errors once exhausted
pub struct ScriptedRtpSource {
    ssrc: u32,
    packets: Mutex<VecDeque<Packet>>,
}

impl ScriptedRtpSource {
    pub fn new(ssrc: u32, count: u16) -> Self {
        let packets = (0..count)
            .map(|seq| {
                let mut packet = Packet::default();
                packet.header.version = 2;
                packet.header.payload_type = 96;
                packet.header.sequence_number = seq;
                packet.header.timestamp = seq as u32 * 3000;
                packet.header.ssrc = ssrc;
                packet.payload = Bytes::from(vec![seq as u8; 8]);
                packet
            })
            .collect();

        Self {
            ssrc,
            packets: Mutex::new(packets),
        }
    }
}

#[async_trait]
impl RtpSource for ScriptedRtpSource {
    fn ssrc(&self) -> u32 {
        self.ssrc
    }

    async fn read_rtp(&self) -> Result<Packet, SourceError> {
        self.packets
            .lock()
            .pop_front()
            .ok_or_else(|| SourceError::Read("end of script".into()))
    }
}

/// Feedback sink that records picture loss requests
///
/// Each request stores the media SSRC and how many writes the observed track
/// had seen at that moment, so tests can check ordering.
pub struct RecordingFeedback {
    observed: Arc<RecordingTrack>,
    requests: Mutex<Vec<(u32, usize)>>,
}

impl RecordingFeedback {
    pub fn observing(track: Arc<RecordingTrack>) -> Self {
        Self {
            observed: track,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<(u32, usize)> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl FeedbackSink for RecordingFeedback {
    async fn picture_loss(&self, media_ssrc: u32) -> Result<(), DeliveryError> {
        let writes = self.observed.write_count();
        self.requests.lock().push((media_ssrc, writes));
        Ok(())
    }
}
