//! Stored container seam
//!
//! The pacing scheduler pulls packets from a [`Container`] in container order
//! and reopens it through a [`ContainerOpener`] when a pass ends.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::SourceError;

/// One demuxed packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerPacket {
    /// Index of the stream the packet came from
    pub stream_index: usize,
    /// Encoded payload
    pub data: Bytes,
    /// Declared presentation duration
    pub duration: Duration,
}

impl ContainerPacket {
    pub fn new(stream_index: usize, data: Bytes, duration: Duration) -> Self {
        Self {
            stream_index,
            data,
            duration,
        }
    }
}

/// An open stored container
#[async_trait]
pub trait Container: Send {
    /// Index of the video stream, if any
    fn video_stream(&self) -> Option<usize>;

    /// Index of the audio stream, if any
    fn audio_stream(&self) -> Option<usize>;

    /// Read the next packet; `Ok(None)` marks the end of the container
    async fn next_packet(&mut self) -> Result<Option<ContainerPacket>, SourceError>;

    /// Release the container
    fn close(&mut self) {}
}

/// Opens a fresh [`Container`] for every playback pass
#[async_trait]
pub trait ContainerOpener: Send + Sync {
    async fn open(&self) -> Result<Box<dyn Container>, SourceError>;
}
