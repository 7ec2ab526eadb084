//! Live copy tasks
//!
//! Copy inbound RTP from a publishing peer to outbound tracks. Each copy runs
//! as its own task per (session, stream kind) and ends when its source can no
//! longer be read. A failed read ends that copy only.

use std::sync::Arc;

use bytes::Bytes;
use webrtc::rtp::packet::Packet;
use webrtc::util::Marshal;

use super::broadcast::FanOut;
use super::RtpSource;
use crate::error::{DeliveryError, SourceError};
use crate::media::{Frame, StreamKind};
use crate::session::Session;

fn to_frame(kind: StreamKind, packet: &Packet) -> Result<Frame, SourceError> {
    let data: Bytes = packet
        .marshal()
        .map_err(|e| SourceError::Malformed(e.to_string()))?;
    Ok(Frame::live(kind, data))
}

/// Broadcast every packet read from `source` to all connected sessions
///
/// Returns the number of packets forwarded once the source ends.
pub async fn forward_to_fanout(
    source: Arc<dyn RtpSource>,
    kind: StreamKind,
    fanout: Arc<FanOut>,
) -> u64 {
    let ssrc = source.ssrc();
    let mut forwarded: u64 = 0;

    loop {
        let packet = match source.read_rtp().await {
            Ok(packet) => packet,
            Err(e) => {
                tracing::debug!(
                    ssrc = ssrc,
                    kind = %kind,
                    forwarded = forwarded,
                    error = %e,
                    "Inbound track ended"
                );
                return forwarded;
            }
        };

        let frame = match to_frame(kind, &packet) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(ssrc = ssrc, kind = %kind, error = %e, "Dropping packet");
                continue;
            }
        };

        fanout.broadcast(&frame).await;
        forwarded += 1;
    }
}

/// Copy every packet read from `source` back to one session
///
/// Packets arriving before the session is connected are dropped. The copy
/// ends when the source ends, the session terminates or a write fails.
pub async fn forward_to_session(
    source: Arc<dyn RtpSource>,
    session: Arc<Session>,
    kind: StreamKind,
) -> Result<u64, crate::Error> {
    let mut forwarded: u64 = 0;

    loop {
        let packet = match source.read_rtp().await {
            Ok(packet) => packet,
            Err(_) if session.state().is_terminal() => return Ok(forwarded),
            Err(e) => return Err(e.into()),
        };

        let frame = to_frame(kind, &packet)?;
        match session.write_frame(&frame).await {
            Ok(()) => forwarded += 1,
            Err(DeliveryError::Inactive) if session.state().is_terminal() => {
                return Ok(forwarded)
            }
            Err(DeliveryError::Inactive) => {}
            Err(e) => return Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use webrtc::util::Unmarshal;

    use super::*;
    use crate::registry::SessionRegistry;
    use crate::session::{SessionId, SessionState};
    use crate::stats::RelayStats;
    use crate::testing::{connected_session, RecordingTrack, ScriptedRtpSource};

    #[tokio::test(start_paused = true)]
    async fn test_forward_to_fanout_reaches_all_sessions() {
        let fanout = Arc::new(FanOut::new(
            Arc::new(SessionRegistry::new()),
            Arc::new(RelayStats::new()),
        ));
        let (a, a_video, a_audio) = connected_session(1);
        let (b, _, b_audio) = connected_session(2);
        fanout.registry().add(a).await;
        fanout.registry().add(b).await;

        let source: Arc<dyn RtpSource> = Arc::new(ScriptedRtpSource::new(4242, 5));
        let forwarded = forward_to_fanout(source, StreamKind::Audio, Arc::clone(&fanout)).await;

        assert_eq!(forwarded, 5);

        // Writers drain the session queues once the copy yields
        tokio::time::sleep(std::time::Duration::from_millis(1)).await;
        assert_eq!(a_audio.write_count(), 5);
        assert_eq!(b_audio.write_count(), 5);
        assert_eq!(a_video.write_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_forwarded_frames_are_marshalled_rtp() {
        let fanout = Arc::new(FanOut::new(
            Arc::new(SessionRegistry::new()),
            Arc::new(RelayStats::new()),
        ));
        let (session, video, _) = connected_session(1);
        fanout.registry().add(session).await;

        let source: Arc<dyn RtpSource> = Arc::new(ScriptedRtpSource::new(7, 2));
        forward_to_fanout(source, StreamKind::Video, fanout).await;
        tokio::time::sleep(std::time::Duration::from_millis(1)).await;

        let writes = video.writes();
        let mut raw = writes[1].data.clone();
        let packet = Packet::unmarshal(&mut raw).unwrap();
        assert_eq!(packet.header.ssrc, 7);
        assert_eq!(packet.header.sequence_number, 1);
        assert_eq!(&packet.payload[..], &[1u8; 8]);
    }

    #[tokio::test]
    async fn test_forward_to_session_ends_cleanly_when_terminal() {
        let (session, _, audio) = connected_session(1);
        let source: Arc<dyn RtpSource> = Arc::new(ScriptedRtpSource::new(9, 3));

        let result = forward_to_session(source, Arc::clone(&session), StreamKind::Audio).await;

        // Source exhausted while still connected
        assert!(result.is_err());
        assert_eq!(audio.write_count(), 3);

        session.transition(SessionState::Closed);
        let source: Arc<dyn RtpSource> = Arc::new(ScriptedRtpSource::new(9, 3));
        let forwarded = forward_to_session(source, session, StreamKind::Audio)
            .await
            .unwrap();
        assert_eq!(forwarded, 0);
    }

    #[tokio::test]
    async fn test_forward_to_session_drops_before_connected() {
        let audio = RecordingTrack::new(2);
        let session = Arc::new(crate::session::Session::new(
            SessionId(1),
            RecordingTrack::new(1),
            audio.clone(),
        ));
        let source: Arc<dyn RtpSource> = Arc::new(ScriptedRtpSource::new(9, 4));

        let result = forward_to_session(source, Arc::clone(&session), StreamKind::Audio).await;
        assert!(result.is_err());
        assert_eq!(audio.write_count(), 0);
    }

    #[tokio::test]
    async fn test_forward_to_session_stops_on_write_failure() {
        let session = Arc::new(crate::session::Session::new(
            SessionId(1),
            RecordingTrack::new(1),
            RecordingTrack::failing(2),
        ));
        session.transition(SessionState::Connected);
        let source: Arc<dyn RtpSource> = Arc::new(ScriptedRtpSource::new(9, 4));

        let result = forward_to_session(source, session, StreamKind::Audio).await;
        assert!(matches!(result, Err(crate::Error::Delivery(_))));
    }
}
