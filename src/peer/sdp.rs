//! Offer validation
//!
//! The relay only carries VP8 video and Opus audio. Offers are checked before
//! any peer connection is created so a rejected offer leaves nothing behind.

use std::io::Cursor;

use webrtc::sdp::description::media::MediaDescription;
use webrtc::sdp::description::session::SessionDescription;

use crate::error::NegotiationError;
use crate::media::StreamKind;

/// Encoding name the relay requires for each stream kind
pub fn required_codec(kind: StreamKind) -> &'static str {
    match kind {
        StreamKind::Audio => "opus",
        StreamKind::Video => "VP8",
    }
}

/// Media sections found in an accepted offer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OfferSummary {
    pub audio_sections: usize,
    pub video_sections: usize,
}

/// Parse an SDP offer and check its media sections
///
/// Every enabled audio section must offer Opus and every enabled video
/// section VP8. Sections of other media types (data channels) are ignored.
/// At least one audio or video section must be present.
pub fn validate_offer(sdp: &str) -> Result<OfferSummary, NegotiationError> {
    let mut reader = Cursor::new(sdp.as_bytes());
    let parsed = SessionDescription::unmarshal(&mut reader)
        .map_err(|e| NegotiationError::InvalidSdp(e.to_string()))?;

    let mut summary = OfferSummary::default();

    for media in &parsed.media_descriptions {
        let kind = match media.media_name.media.as_str() {
            "audio" => StreamKind::Audio,
            "video" => StreamKind::Video,
            _ => continue,
        };

        // Port zero marks a rejected section
        if media.media_name.port.value == 0 {
            continue;
        }

        let required = required_codec(kind);
        if !offers_codec(media, required) {
            return Err(NegotiationError::UnsupportedMedia(format!(
                "{} section does not offer {} (offered: {})",
                kind,
                required,
                codec_names(media).join(", ")
            )));
        }

        match kind {
            StreamKind::Audio => summary.audio_sections += 1,
            StreamKind::Video => summary.video_sections += 1,
        }
    }

    if summary.audio_sections + summary.video_sections == 0 {
        return Err(NegotiationError::UnsupportedMedia(
            "offer has no audio or video section".into(),
        ));
    }

    Ok(summary)
}

/// Encoding names from the section's `rtpmap` attributes
fn codec_names(media: &MediaDescription) -> Vec<String> {
    media
        .attributes
        .iter()
        .filter(|attr| attr.key == "rtpmap")
        .filter_map(|attr| attr.value.as_deref())
        // "<payload type> <encoding name>/<clock rate>[/<channels>]"
        .filter_map(|value| value.split_whitespace().nth(1))
        .filter_map(|encoding| encoding.split('/').next())
        .map(str::to_owned)
        .collect()
}

fn offers_codec(media: &MediaDescription, name: &str) -> bool {
    codec_names(media)
        .iter()
        .any(|codec| codec.eq_ignore_ascii_case(name))
}
