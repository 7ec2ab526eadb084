//! Media units and frame sources
//!
//! This module provides:
//! - [`Frame`] and [`StreamKind`], the unit the fan-out engine delivers
//! - The stored container seam used by the pacing scheduler
//! - A file-backed container (VP8 IVF + Opus Ogg)

pub mod container;
pub mod file;
pub mod frame;

pub use container::{Container, ContainerOpener, ContainerPacket};
pub use file::{FileContainer, FileContainerOpener, AUDIO_STREAM_INDEX, VIDEO_STREAM_INDEX};
pub use frame::{Frame, StreamKind};
