//! Playback decision engine
//!
//! Chooses between direct-play, remux (DirectStream) and transcode for a
//! media part against a client capability profile, and emits the stream
//! plan the client drives playback with.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::capability::CapabilityProfile;
use crate::model::{MediaItem, MediaPart, TranscodeTarget};

/// Bitset of reasons a part cannot be direct-played.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TranscodeReasons(pub u32);

impl TranscodeReasons {
    pub const CONTAINER_NOT_SUPPORTED: TranscodeReasons = TranscodeReasons(1 << 0);
    pub const VIDEO_CODEC_NOT_SUPPORTED: TranscodeReasons = TranscodeReasons(1 << 1);
    pub const AUDIO_CODEC_NOT_SUPPORTED: TranscodeReasons = TranscodeReasons(1 << 2);
    pub const SUBTITLE_NOT_SUPPORTED: TranscodeReasons = TranscodeReasons(1 << 3);
    pub const VIDEO_RESOLUTION_EXCEEDED: TranscodeReasons = TranscodeReasons(1 << 4);
    pub const VIDEO_BITRATE_EXCEEDED: TranscodeReasons = TranscodeReasons(1 << 5);
    pub const VIDEO_BIT_DEPTH_EXCEEDED: TranscodeReasons = TranscodeReasons(1 << 6);
    pub const AUDIO_CHANNELS_EXCEEDED: TranscodeReasons = TranscodeReasons(1 << 7);
    pub const TOTAL_BITRATE_EXCEEDED: TranscodeReasons = TranscodeReasons(1 << 8);
    pub const HDR_NOT_SUPPORTED: TranscodeReasons = TranscodeReasons(1 << 9);
    pub const USER_REQUESTED: TranscodeReasons = TranscodeReasons(1 << 10);
    pub const SERVER_CONFIGURATION: TranscodeReasons = TranscodeReasons(1 << 11);

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn contains(self, other: TranscodeReasons) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: TranscodeReasons) {
        self.0 |= other.0;
    }

    pub fn count(self) -> u32 {
        self.0.count_ones()
    }

    /// Whether every reason is container-level, i.e. all elementary
    /// streams are supported and only the wrapper needs changing.
    pub fn container_only(self) -> bool {
        !self.is_empty() && self.0 & !Self::CONTAINER_NOT_SUPPORTED.0 == 0
    }
}

impl std::ops::BitOr for TranscodeReasons {
    type Output = TranscodeReasons;
    fn bitor(self, rhs: Self) -> Self {
        TranscodeReasons(self.0 | rhs.0)
    }
}

/// Delivery mode, carried in the stream plan. Wire clients treat numeric
/// and string forms as equivalent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    DirectPlay = 0,
    DirectStream = 1,
    Transcode = 2,
}

impl Serialize for DeliveryMode {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(*self as u8)
    }
}

impl<'de> Deserialize<'de> for DeliveryMode {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(u8),
            Text(String),
        }
        let raw = Raw::deserialize(deserializer)?;
        let mode = match raw {
            Raw::Number(0) => DeliveryMode::DirectPlay,
            Raw::Number(1) => DeliveryMode::DirectStream,
            Raw::Number(2) => DeliveryMode::Transcode,
            Raw::Text(s) => match s.as_str() {
                "DirectPlay" | "direct_play" | "0" => DeliveryMode::DirectPlay,
                "DirectStream" | "direct_stream" | "1" => DeliveryMode::DirectStream,
                "Transcode" | "transcode" | "2" => DeliveryMode::Transcode,
                other => {
                    return Err(serde::de::Error::custom(format!("unknown mode '{other}'")))
                }
            },
            Raw::Number(n) => return Err(serde::de::Error::custom(format!("unknown mode {n}"))),
        };
        Ok(mode)
    }
}

/// The JSON blob describing how a specific playback will be delivered.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamPlan {
    pub mode: DeliveryMode,
    pub media_part_id: Uuid,
    pub container: Option<String>,
    #[serde(default)]
    pub reasons: TranscodeReasons,
}

/// The decision for one part.
#[derive(Debug, Clone)]
pub struct PartDecision {
    pub part_id: Uuid,
    pub mode: DeliveryMode,
    pub reasons: TranscodeReasons,
    pub plan: StreamPlan,
    pub playback_url: String,
    /// Set for transcode decisions.
    pub target: Option<TranscodeTarget>,
}

/// Server-side knobs that feed the decision.
#[derive(Debug, Clone, Default)]
pub struct DecisionConfig {
    pub use_hardware_acceleration: bool,
    pub enable_tone_mapping: bool,
    /// Force a transcode regardless of capability (user picked a quality).
    pub force_transcode: bool,
}

/// Compute the transcode reasons for one part under a profile.
pub fn transcode_reasons(
    part: &MediaPart,
    profile: &CapabilityProfile,
    config: &DecisionConfig,
) -> TranscodeReasons {
    let mut reasons = TranscodeReasons::default();

    if config.force_transcode {
        reasons.insert(TranscodeReasons::USER_REQUESTED);
    }

    if let Some(container) = &part.container {
        if !profile.supports_container(container) {
            reasons.insert(TranscodeReasons::CONTAINER_NOT_SUPPORTED);
        }
    }

    for stream in part.video_streams() {
        let Some(support) = profile
            .video
            .iter()
            .find(|v| v.codec.eq_ignore_ascii_case(&stream.codec))
        else {
            reasons.insert(TranscodeReasons::VIDEO_CODEC_NOT_SUPPORTED);
            continue;
        };
        if let (Some(max), Some(w)) = (support.max_width, stream.width) {
            if w > max {
                reasons.insert(TranscodeReasons::VIDEO_RESOLUTION_EXCEEDED);
            }
        }
        if let (Some(max), Some(h)) = (support.max_height, stream.height) {
            if h > max {
                reasons.insert(TranscodeReasons::VIDEO_RESOLUTION_EXCEEDED);
            }
        }
        if let (Some(max), Some(bitrate)) = (support.max_bitrate, stream.bitrate) {
            if bitrate > max {
                reasons.insert(TranscodeReasons::VIDEO_BITRATE_EXCEEDED);
            }
        }
        if let (Some(max), Some(depth)) = (support.max_bit_depth, stream.bit_depth) {
            if depth > max {
                reasons.insert(TranscodeReasons::VIDEO_BIT_DEPTH_EXCEEDED);
            }
        }
        if stream.hdr_type.is_some() && !profile.accepts_hdr {
            reasons.insert(TranscodeReasons::HDR_NOT_SUPPORTED);
        }
    }

    // Any one supported audio stream is enough for direct delivery; the
    // player picks the track.
    let mut audio_seen = false;
    let mut audio_ok = false;
    for stream in part.audio_streams() {
        audio_seen = true;
        if profile.supports_audio_stream(stream) {
            audio_ok = true;
            break;
        }
    }
    if audio_seen && !audio_ok {
        // Distinguish unsupported codec from exceeded caps for reporting.
        let any_codec_known = part.audio_streams().any(|s| {
            profile
                .audio
                .iter()
                .any(|a| a.codec.eq_ignore_ascii_case(&s.codec))
        });
        if any_codec_known {
            reasons.insert(TranscodeReasons::AUDIO_CHANNELS_EXCEEDED);
        } else {
            reasons.insert(TranscodeReasons::AUDIO_CODEC_NOT_SUPPORTED);
        }
    }

    // A forced image subtitle with no burn-in support forces a transcode;
    // optional text subtitles never do (they convert server-side).
    let forced_image_sub = part
        .subtitle_streams()
        .any(|s| s.is_forced && s.is_image_subtitle());
    if forced_image_sub && !profile.subtitles.accepts_burn_in {
        reasons.insert(TranscodeReasons::SUBTITLE_NOT_SUPPORTED);
    }

    if let Some(max_total) = profile.max_total_bitrate {
        let total: i64 = part.streams.iter().filter_map(|s| s.bitrate).sum();
        if total > max_total {
            reasons.insert(TranscodeReasons::TOTAL_BITRATE_EXCEEDED);
        }
    }

    reasons
}

/// Decide delivery for one part.
pub fn decide_part(
    part: &MediaPart,
    profile: &CapabilityProfile,
    config: &DecisionConfig,
) -> PartDecision {
    let reasons = transcode_reasons(part, profile, config);

    if reasons.is_empty() {
        return PartDecision {
            part_id: part.id,
            mode: DeliveryMode::DirectPlay,
            reasons,
            plan: StreamPlan {
                mode: DeliveryMode::DirectPlay,
                media_part_id: part.id,
                container: part.container.clone(),
                reasons,
            },
            playback_url: format!("/api/v1/playback/part/{}/file", part.id),
            target: None,
        };
    }

    if reasons.container_only() {
        // Remux into the client's first supported container.
        let container = profile
            .containers
            .first()
            .cloned()
            .unwrap_or_else(|| "mp4".to_string());
        return PartDecision {
            part_id: part.id,
            mode: DeliveryMode::DirectStream,
            reasons,
            plan: StreamPlan {
                mode: DeliveryMode::DirectStream,
                media_part_id: part.id,
                container: Some(container.clone()),
                reasons,
            },
            playback_url: format!(
                "/api/v1/playback/part/{}/remux-seek.{container}?seekMs=0",
                part.id
            ),
            target: None,
        };
    }

    let target = derive_target(profile, config);
    PartDecision {
        part_id: part.id,
        mode: DeliveryMode::Transcode,
        reasons,
        plan: StreamPlan {
            mode: DeliveryMode::Transcode,
            media_part_id: part.id,
            container: Some("mpd".to_string()),
            reasons,
        },
        playback_url: format!("/api/v1/playback/part/{}/dash/manifest.mpd", part.id),
        target: Some(target),
    }
}

/// Pick the part of a media item (or several renditions) that minimizes
/// transcode work: fewest reasons, then largest file.
pub fn select_part<'a>(
    media_items: &'a [MediaItem],
    profile: &CapabilityProfile,
    config: &DecisionConfig,
) -> Option<(&'a MediaItem, &'a MediaPart)> {
    media_items
        .iter()
        .flat_map(|mi| mi.parts.iter().map(move |p| (mi, p)))
        .min_by(|(_, a), (_, b)| {
            let reasons_a = transcode_reasons(a, profile, config).count();
            let reasons_b = transcode_reasons(b, profile, config).count();
            reasons_a
                .cmp(&reasons_b)
                .then(b.size_bytes.cmp(&a.size_bytes))
        })
}

/// Build the effective transcode target from the profile's best-supported
/// codecs and the server's configuration.
fn derive_target(profile: &CapabilityProfile, config: &DecisionConfig) -> TranscodeTarget {
    let video = profile.video.first();
    let audio = profile.audio.first();
    TranscodeTarget {
        video_codec: video.map(|v| v.codec.clone()).unwrap_or_else(|| "h264".to_string()),
        audio_codec: audio.map(|a| a.codec.clone()).unwrap_or_else(|| "aac".to_string()),
        video_bitrate: video.and_then(|v| v.max_bitrate),
        audio_bitrate: audio.and_then(|a| a.max_bitrate),
        max_width: video.and_then(|v| v.max_width),
        max_height: video.and_then(|v| v.max_height),
        audio_channels: audio.and_then(|a| a.max_channels),
        hardware_accel: config.use_hardware_acceleration,
        tone_mapping: config.enable_tone_mapping,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::capability::{AudioCodecSupport, SubtitleSupport, VideoCodecSupport};
    use crate::model::{MediaStream, StreamType};

    fn profile_mp4_h264_aac() -> CapabilityProfile {
        CapabilityProfile {
            version: 3,
            containers: vec!["mp4".into()],
            video: vec![VideoCodecSupport {
                codec: "h264".into(),
                profiles: vec![],
                max_level: None,
                max_bitrate: Some(10_000_000),
                max_width: Some(1920),
                max_height: Some(1080),
                max_bit_depth: Some(8),
            }],
            audio: vec![AudioCodecSupport {
                codec: "aac".into(),
                max_channels: Some(2),
                max_sample_rate: None,
                max_bitrate: None,
            }],
            subtitles: SubtitleSupport { text_formats: vec!["vtt".into()], accepts_burn_in: false },
            accepts_hdr: false,
            max_total_bitrate: None,
        }
    }

    fn part(container: &str, video: &str, audio: &str, channels: i32, bitrate: i64) -> MediaPart {
        let part_id = Uuid::new_v4();
        let mut v = MediaStream::new(part_id, 0, StreamType::Video, video);
        v.width = Some(1920);
        v.height = Some(1080);
        v.bitrate = Some(bitrate);
        let mut a = MediaStream::new(part_id, 1, StreamType::Audio, audio);
        a.channels = Some(channels);
        MediaPart {
            id: part_id,
            media_item_id: Uuid::new_v4(),
            part_index: 0,
            file_path: "/m/movie.mkv".into(),
            size_bytes: 1 << 30,
            modified_at: None,
            hash: None,
            duration_ms: Some(3_600_000),
            container: Some(container.to_string()),
            streams: vec![v, a],
        }
    }

    #[test]
    fn test_direct_play_when_everything_matches() {
        let p = part("mp4", "h264", "aac", 2, 5_000_000);
        let decision = decide_part(&p, &profile_mp4_h264_aac(), &DecisionConfig::default());
        assert_eq!(decision.mode, DeliveryMode::DirectPlay);
        assert!(decision.reasons.is_empty());
        assert!(decision.playback_url.ends_with("/file"));
    }

    #[test]
    fn test_container_only_mismatch_remuxes() {
        // mkv/h264/aac/stereo at 5 Mbps against mp4,h264,aac,stereo,<=10 Mbps.
        let p = part("mkv", "h264", "aac", 2, 5_000_000);
        let decision = decide_part(&p, &profile_mp4_h264_aac(), &DecisionConfig::default());
        assert_eq!(decision.mode, DeliveryMode::DirectStream);
        assert!(decision.reasons.container_only());
        assert_eq!(
            decision.playback_url,
            format!("/api/v1/playback/part/{}/remux-seek.mp4?seekMs=0", p.id)
        );
        assert_eq!(decision.plan.container.as_deref(), Some("mp4"));
    }

    #[test]
    fn test_codec_mismatch_transcodes() {
        let p = part("mkv", "hevc", "aac", 2, 5_000_000);
        let decision = decide_part(&p, &profile_mp4_h264_aac(), &DecisionConfig::default());
        assert_eq!(decision.mode, DeliveryMode::Transcode);
        assert!(decision
            .reasons
            .contains(TranscodeReasons::VIDEO_CODEC_NOT_SUPPORTED));
        assert!(decision.playback_url.ends_with("/dash/manifest.mpd"));
        let target = decision.target.unwrap();
        assert_eq!(target.video_codec, "h264");
        assert_eq!(target.audio_codec, "aac");
    }

    #[test]
    fn test_audio_caps_exceeded() {
        let p = part("mp4", "h264", "aac", 6, 5_000_000);
        let reasons =
            transcode_reasons(&p, &profile_mp4_h264_aac(), &DecisionConfig::default());
        assert!(reasons.contains(TranscodeReasons::AUDIO_CHANNELS_EXCEEDED));
        assert!(!reasons.container_only());
    }

    #[test]
    fn test_user_requested_forces_transcode() {
        let p = part("mp4", "h264", "aac", 2, 5_000_000);
        let config = DecisionConfig { force_transcode: true, ..Default::default() };
        let decision = decide_part(&p, &profile_mp4_h264_aac(), &config);
        assert_eq!(decision.mode, DeliveryMode::Transcode);
        assert!(decision.reasons.contains(TranscodeReasons::USER_REQUESTED));
    }

    #[test]
    fn test_part_selection_minimizes_reasons_then_size() {
        let profile = profile_mp4_h264_aac();
        let config = DecisionConfig::default();

        let mut mi = MediaItem::new(Uuid::new_v4());
        let clean_small = part("mp4", "h264", "aac", 2, 5_000_000);
        let mut clean_large = part("mp4", "h264", "aac", 2, 5_000_000);
        clean_large.size_bytes = 4 << 30;
        let needs_transcode = part("mkv", "hevc", "dts", 6, 20_000_000);
        mi.parts = vec![clean_small, needs_transcode, clean_large.clone()];

        let items = vec![mi];
        let (_, chosen) = select_part(&items, &profile, &config).unwrap();
        assert_eq!(chosen.id, clean_large.id);
    }

    #[test]
    fn test_mode_accepts_string_and_number() {
        let from_number: StreamPlan =
            serde_json::from_str(r#"{"mode":1,"mediaPartId":"00000000-0000-0000-0000-000000000000","container":"mp4"}"#)
                .unwrap();
        assert_eq!(from_number.mode, DeliveryMode::DirectStream);

        let from_string: StreamPlan = serde_json::from_str(
            r#"{"mode":"DirectStream","mediaPartId":"00000000-0000-0000-0000-000000000000","container":"mp4"}"#,
        )
        .unwrap();
        assert_eq!(from_string.mode, DeliveryMode::DirectStream);
    }
}
