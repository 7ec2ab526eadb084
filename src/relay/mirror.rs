//! Mirror adapter
//!
//! Loops a session's own inbound video back to it. The first step asks the
//! sender for a key frame; after that every packet has its SSRC rewritten to
//! the session's outbound video track and is written as raw RTP, bypassing
//! sample packetization.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use super::{FeedbackSink, RtpSource};
use crate::error::{DeliveryError, Error};
use crate::media::StreamKind;
use crate::session::Session;

/// Mirror adapter configuration
#[derive(Debug, Clone, Default)]
pub struct MirrorConfig {
    /// Repeat the picture loss indication this often (`None` sends it once)
    pub pli_interval: Option<Duration>,
}

/// Self-loop relay for one session
pub struct MirrorAdapter {
    session: Arc<Session>,
    config: MirrorConfig,
}

impl MirrorAdapter {
    pub fn new(session: Arc<Session>, config: MirrorConfig) -> Self {
        Self { session, config }
    }

    async fn request_key_frame(&self, feedback: &dyn FeedbackSink, media_ssrc: u32) {
        if let Err(e) = feedback.picture_loss(media_ssrc).await {
            tracing::warn!(
                session_id = %self.session.id(),
                media_ssrc = media_ssrc,
                error = %e,
                "Failed to send picture loss indication"
            );
        }
    }

    /// Relay inbound video back to the session
    ///
    /// Returns the number of packets written. Ends with `Ok` once the
    /// session is terminal; a read or write failure while the session is
    /// still live ends the loop with an error. The loop never unregisters the
    /// session.
    pub async fn run_video(
        &self,
        source: &dyn RtpSource,
        feedback: &dyn FeedbackSink,
    ) -> Result<u64, Error> {
        let session_id = self.session.id();
        let inbound_ssrc = source.ssrc();
        let outbound_ssrc = self.session.track(StreamKind::Video).ssrc();

        tracing::debug!(
            session_id = %session_id,
            inbound_ssrc = inbound_ssrc,
            outbound_ssrc = outbound_ssrc,
            "Mirroring video"
        );

        self.request_key_frame(feedback, inbound_ssrc).await;
        let mut last_pli = Instant::now();
        let mut forwarded: u64 = 0;

        loop {
            let mut packet = match source.read_rtp().await {
                Ok(packet) => packet,
                Err(_) if self.session.state().is_terminal() => return Ok(forwarded),
                Err(e) => return Err(e.into()),
            };

            if let Some(interval) = self.config.pli_interval {
                if last_pli.elapsed() >= interval {
                    self.request_key_frame(feedback, inbound_ssrc).await;
                    last_pli = Instant::now();
                }
            }

            packet.header.ssrc = outbound_ssrc;

            match self.session.write_rtp(StreamKind::Video, &packet).await {
                Ok(()) => forwarded += 1,
                Err(DeliveryError::Inactive) if self.session.state().is_terminal() => {
                    tracing::debug!(
                        session_id = %session_id,
                        forwarded = forwarded,
                        "Session ended, mirror stopped"
                    );
                    return Ok(forwarded);
                }
                // Not connected yet
                Err(DeliveryError::Inactive) => {}
                Err(e) => return Err(e.into()),
            }
        }
    }
}
