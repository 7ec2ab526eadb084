//! File-backed container: VP8 in IVF plus Opus in Ogg
//!
//! The two files are read with the `webrtc` crate's IVF and Ogg readers and
//! interleaved by presentation time, so the pair behaves like a single
//! container with a video stream (index 0) and an audio stream (index 1).
//!
//! Ogg pages are split into individual Opus packets using the page segment
//! table, so any page layout works. Each packet is timed from its TOC byte.

use std::collections::VecDeque;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use webrtc::media::io::ivf_reader::IVFReader;
use webrtc::media::io::ogg_reader::OggReader;

use super::container::{Container, ContainerOpener, ContainerPacket};
use crate::error::SourceError;

/// Stream index of the IVF video stream
pub const VIDEO_STREAM_INDEX: usize = 0;

/// Stream index of the Ogg audio stream
pub const AUDIO_STREAM_INDEX: usize = 1;

/// Longest gap between two IVF frames taken at face value
const MAX_VIDEO_FRAME_DURATION: Duration = Duration::from_secs(10);

/// Size of the fixed part of an Ogg page header; the segment count is its
/// last byte
const OGG_PAGE_HEADER_SIZE: usize = 27;

/// Reader that records how many bytes have been consumed
///
/// The readers report a clean end of file and a truncated frame the same way,
/// so end-of-stream is decided by comparing consumed bytes to the file size.
struct CountingReader {
    inner: Cursor<Bytes>,
    consumed: Arc<AtomicUsize>,
}

impl CountingReader {
    fn new(data: Bytes) -> (Self, Arc<AtomicUsize>) {
        let consumed = Arc::new(AtomicUsize::new(0));
        let reader = Self {
            inner: Cursor::new(data),
            consumed: Arc::clone(&consumed),
        };
        (reader, consumed)
    }
}

impl Read for CountingReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.consumed.fetch_add(n, Ordering::Relaxed);
        Ok(n)
    }
}

/// IVF video stream with one frame of lookahead for duration calculation
struct IvfStream {
    reader: IVFReader<CountingReader>,
    consumed: Arc<AtomicUsize>,
    total: usize,
    /// Timebase numerator and denominator from the file header
    timebase: (u64, u64),
    /// Duration used for the last frame (no successor to measure against)
    nominal: Duration,
    lookahead: Option<(Bytes, u64)>,
}

impl IvfStream {
    fn open(data: Bytes) -> Result<Self, SourceError> {
        let total = data.len();
        let (counting, consumed) = CountingReader::new(data);
        let (reader, header) = IVFReader::new(counting)
            .map_err(|e| SourceError::Malformed(format!("ivf header: {}", e)))?;

        if header.timebase_denominator == 0 {
            return Err(SourceError::Malformed(
                "ivf header has zero timebase denominator".into(),
            ));
        }

        let numerator = header.timebase_numerator as u64;
        let denominator = header.timebase_denominator as u64;
        let nominal_ms = 1000 * numerator / denominator;
        let nominal = if nominal_ms == 0 {
            crate::media::StreamKind::Video.default_frame_duration()
        } else {
            Duration::from_millis(nominal_ms)
        };

        Ok(Self {
            reader,
            consumed,
            total,
            timebase: (numerator, denominator),
            nominal,
            lookahead: None,
        })
    }

    fn read_raw(&mut self) -> Result<Option<(Bytes, u64)>, SourceError> {
        if self.consumed.load(Ordering::Relaxed) >= self.total {
            return Ok(None);
        }

        let (frame, header) = self
            .reader
            .parse_next_frame()
            .map_err(|e| SourceError::Malformed(format!("ivf frame: {}", e)))?;

        Ok(Some((frame.freeze(), header.timestamp)))
    }

    fn next(&mut self) -> Result<Option<(Bytes, Duration)>, SourceError> {
        let current = match self.lookahead.take() {
            Some(frame) => frame,
            None => match self.read_raw()? {
                Some(frame) => frame,
                None => return Ok(None),
            },
        };

        self.lookahead = self.read_raw()?;

        let duration = match self.lookahead {
            Some((_, next_ts)) if next_ts > current.1 => self.ticks_to_duration(next_ts - current.1),
            _ => self.nominal,
        };

        Ok(Some((current.0, duration)))
    }

    /// Convert a timestamp delta to a frame duration
    ///
    /// Gaps longer than [`MAX_VIDEO_FRAME_DURATION`] fall back to the nominal
    /// frame interval.
    fn ticks_to_duration(&self, ticks: u64) -> Duration {
        let (numerator, denominator) = self.timebase;
        let ms = u128::from(ticks) * u128::from(numerator) * 1000 / u128::from(denominator);

        match u64::try_from(ms).map(Duration::from_millis) {
            Ok(duration) if duration <= MAX_VIDEO_FRAME_DURATION => duration,
            _ => {
                tracing::debug!(ticks = ticks, "IVF timestamp gap out of range, using nominal duration");
                self.nominal
            }
        }
    }
}

/// Ogg/Opus audio stream, one Opus packet at a time
struct OggStream {
    reader: OggReader<CountingReader>,
    data: Bytes,
    consumed: Arc<AtomicUsize>,
    /// Complete packets from the last page
    packets: VecDeque<Bytes>,
    /// Start of a packet that continues on the next page
    partial: Vec<u8>,
}

impl OggStream {
    fn open(data: Bytes) -> Result<Self, SourceError> {
        let (counting, consumed) = CountingReader::new(data.clone());
        let (reader, _header) = OggReader::new(counting, true)
            .map_err(|e| SourceError::Malformed(format!("ogg header: {}", e)))?;

        Ok(Self {
            reader,
            data,
            consumed,
            packets: VecDeque::new(),
            partial: Vec::new(),
        })
    }

    fn next(&mut self) -> Result<Option<(Bytes, Duration)>, SourceError> {
        loop {
            if let Some(packet) = self.packets.pop_front() {
                // Comment header, carries no audio
                if packet.starts_with(b"OpusTags") {
                    continue;
                }
                let duration = opus_packet_duration(&packet)
                    .unwrap_or_else(|| crate::media::StreamKind::Audio.default_frame_duration());
                return Ok(Some((packet, duration)));
            }

            let offset = self.consumed.load(Ordering::Relaxed);
            if offset >= self.data.len() {
                if !self.partial.is_empty() {
                    tracing::debug!(bytes = self.partial.len(), "Dropping unfinished Opus packet at end of file");
                    self.partial.clear();
                }
                return Ok(None);
            }

            let (page, _header) = self
                .reader
                .parse_next_page()
                .map_err(|e| SourceError::Malformed(format!("ogg page: {}", e)))?;

            let lacing = self.segment_table(offset)?;
            self.split_page(&page, lacing);
        }
    }

    /// Lacing values of the page that starts at `offset`
    fn segment_table(&self, offset: usize) -> Result<Bytes, SourceError> {
        let count_at = offset + OGG_PAGE_HEADER_SIZE - 1;
        let count = self
            .data
            .get(count_at)
            .map(|&count| count as usize)
            .ok_or_else(|| SourceError::Malformed("ogg page header truncated".into()))?;
        let table = count_at + 1..count_at + 1 + count;

        if table.end > self.data.len() {
            return Err(SourceError::Malformed("ogg segment table truncated".into()));
        }
        Ok(self.data.slice(table))
    }

    /// Cut a page payload into packets
    ///
    /// A lacing value below 255 ends a packet. A page whose last lacing value
    /// is 255 leaves a packet open; it is finished by the next page.
    fn split_page(&mut self, page: &[u8], lacing: Bytes) {
        let mut pos = 0;
        for len in lacing.iter().map(|&len| len as usize) {
            let end = (pos + len).min(page.len());
            self.partial.extend_from_slice(&page[pos..end]);
            pos = end;

            if len < 255 {
                let packet = std::mem::take(&mut self.partial);
                if !packet.is_empty() {
                    self.packets.push_back(Bytes::from(packet));
                }
            }
        }
    }
}

/// Playback duration of an Opus packet, from its TOC byte
///
/// Returns `None` for packets too short to describe themselves.
fn opus_packet_duration(packet: &[u8]) -> Option<Duration> {
    let toc = *packet.first()?;
    let config = toc >> 3;

    let frame_us: u64 = match config {
        // SILK: 10, 20, 40, 60 ms
        0..=11 => [10_000, 20_000, 40_000, 60_000][(config % 4) as usize],
        // Hybrid: 10, 20 ms
        12..=15 => [10_000, 20_000][(config % 2) as usize],
        // CELT: 2.5, 5, 10, 20 ms
        _ => [2_500, 5_000, 10_000, 20_000][(config % 4) as usize],
    };

    let frames: u64 = match toc & 0x03 {
        0 => 1,
        1 | 2 => 2,
        _ => u64::from(*packet.get(1)? & 0x3F),
    };

    (frames > 0).then(|| Duration::from_micros(frame_us * frames))
}

/// One pending packet and the presentation time it starts at
struct Pending {
    start: Duration,
    data: Bytes,
    duration: Duration,
}

/// An IVF and/or Ogg file pair opened as one container
pub struct FileContainer {
    video: Option<IvfStream>,
    audio: Option<OggStream>,
    pending_video: Option<Pending>,
    pending_audio: Option<Pending>,
    video_clock: Duration,
    audio_clock: Duration,
}

impl FileContainer {
    /// Build a container from in-memory file contents
    pub fn from_bytes(video: Option<Bytes>, audio: Option<Bytes>) -> Result<Self, SourceError> {
        let video = video.map(IvfStream::open).transpose()?;
        let audio = audio.map(OggStream::open).transpose()?;

        Ok(Self {
            video,
            audio,
            pending_video: None,
            pending_audio: None,
            video_clock: Duration::ZERO,
            audio_clock: Duration::ZERO,
        })
    }

    fn fill(&mut self) -> Result<(), SourceError> {
        if self.pending_video.is_none() {
            if let Some(stream) = self.video.as_mut() {
                match stream.next()? {
                    Some((data, duration)) => {
                        self.pending_video = Some(Pending {
                            start: self.video_clock,
                            data,
                            duration,
                        });
                        self.video_clock += duration;
                    }
                    None => self.video = None,
                }
            }
        }

        if self.pending_audio.is_none() {
            if let Some(stream) = self.audio.as_mut() {
                match stream.next()? {
                    Some((data, duration)) => {
                        self.pending_audio = Some(Pending {
                            start: self.audio_clock,
                            data,
                            duration,
                        });
                        self.audio_clock += duration;
                    }
                    None => self.audio = None,
                }
            }
        }

        Ok(())
    }
}

#[async_trait]
impl Container for FileContainer {
    fn video_stream(&self) -> Option<usize> {
        Some(VIDEO_STREAM_INDEX)
    }

    fn audio_stream(&self) -> Option<usize> {
        Some(AUDIO_STREAM_INDEX)
    }

    async fn next_packet(&mut self) -> Result<Option<ContainerPacket>, SourceError> {
        self.fill()?;

        let take_video = match (&self.pending_video, &self.pending_audio) {
            (Some(video), Some(audio)) => video.start <= audio.start,
            (Some(_), None) => true,
            (None, Some(_)) => false,
            (None, None) => return Ok(None),
        };

        let (index, pending) = if take_video {
            (VIDEO_STREAM_INDEX, self.pending_video.take())
        } else {
            (AUDIO_STREAM_INDEX, self.pending_audio.take())
        };

        Ok(pending.map(|p| ContainerPacket::new(index, p.data, p.duration)))
    }

    fn close(&mut self) {
        self.video = None;
        self.audio = None;
        self.pending_video = None;
        self.pending_audio = None;
    }
}

/// Reopens the configured files for every playback pass
#[derive(Debug, Clone)]
pub struct FileContainerOpener {
    video_path: Option<PathBuf>,
    audio_path: Option<PathBuf>,
}

impl FileContainerOpener {
    /// Create an opener; at least one of the two paths should be set
    pub fn new(video_path: Option<PathBuf>, audio_path: Option<PathBuf>) -> Self {
        Self {
            video_path,
            audio_path,
        }
    }

    async fn read(path: &Path) -> Result<Bytes, SourceError> {
        tokio::fs::read(path)
            .await
            .map(Bytes::from)
            .map_err(|e| SourceError::Open {
                path: path.display().to_string(),
                reason: e.to_string(),
            })
    }
}

#[async_trait]
impl ContainerOpener for FileContainerOpener {
    async fn open(&self) -> Result<Box<dyn Container>, SourceError> {
        if self.video_path.is_none() && self.audio_path.is_none() {
            return Err(SourceError::Open {
                path: "<none>".into(),
                reason: "no video or audio file configured".into(),
            });
        }

        let video = match &self.video_path {
            Some(path) => Some(Self::read(path).await?),
            None => None,
        };
        let audio = match &self.audio_path {
            Some(path) => Some(Self::read(path).await?),
            None => None,
        };

        Ok(Box::new(FileContainer::from_bytes(video, audio)?))
    }
}
