//! Client capability profile
//!
//! A client declares what it can decode when it opens a playback session.
//! The profile is versioned; the server caches the latest version per
//! session and flags a mismatch back to the client so it can re-issue the
//! decision with updated capabilities.

use serde::{Deserialize, Serialize};

use super::media::{MediaStream, StreamType};

/// Per-codec video constraints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoCodecSupport {
    /// Codec name as ffprobe reports it ("h264", "hevc", "av1").
    pub codec: String,
    /// Accepted profiles; empty means any.
    #[serde(default)]
    pub profiles: Vec<String>,
    /// Maximum codec level (h264 4.1 => 41); None means any.
    pub max_level: Option<i32>,
    pub max_bitrate: Option<i64>,
    pub max_width: Option<i32>,
    pub max_height: Option<i32>,
    pub max_bit_depth: Option<i32>,
}

/// Per-codec audio constraints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioCodecSupport {
    pub codec: String,
    pub max_channels: Option<i32>,
    pub max_sample_rate: Option<i32>,
    pub max_bitrate: Option<i64>,
}

/// How the client wants subtitles delivered.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubtitleSupport {
    /// Text formats the client renders natively ("vtt", "srt", "ass").
    #[serde(default)]
    pub text_formats: Vec<String>,
    /// Whether image subtitles may be burned in by the transcoder.
    #[serde(default)]
    pub accepts_burn_in: bool,
}

/// The client's decoder/constraint declaration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityProfile {
    /// Monotonic per-session version.
    pub version: i64,
    /// Containers the client demuxes natively ("mp4", "mkv", "webm").
    pub containers: Vec<String>,
    pub video: Vec<VideoCodecSupport>,
    pub audio: Vec<AudioCodecSupport>,
    #[serde(default)]
    pub subtitles: SubtitleSupport,
    /// Whether the client accepts HDR content without server tone mapping.
    #[serde(default)]
    pub accepts_hdr: bool,
    /// Overall bitrate ceiling across all streams, if any.
    pub max_total_bitrate: Option<i64>,
}

impl CapabilityProfile {
    pub fn supports_container(&self, container: &str) -> bool {
        self.containers.iter().any(|c| c.eq_ignore_ascii_case(container))
    }

    /// Whether the given video stream can be direct-played under this
    /// profile, ignoring container concerns.
    pub fn supports_video_stream(&self, stream: &MediaStream) -> bool {
        debug_assert_eq!(stream.stream_type, StreamType::Video);
        let Some(support) = self
            .video
            .iter()
            .find(|v| v.codec.eq_ignore_ascii_case(&stream.codec))
        else {
            return false;
        };
        if !support.profiles.is_empty() {
            if let Some(profile) = &stream.profile {
                if !support.profiles.iter().any(|p| p.eq_ignore_ascii_case(profile)) {
                    return false;
                }
            }
        }
        if let (Some(max), Some(level)) = (support.max_level, stream.level) {
            if level > max {
                return false;
            }
        }
        if let (Some(max), Some(bitrate)) = (support.max_bitrate, stream.bitrate) {
            if bitrate > max {
                return false;
            }
        }
        if let (Some(max), Some(w)) = (support.max_width, stream.width) {
            if w > max {
                return false;
            }
        }
        if let (Some(max), Some(h)) = (support.max_height, stream.height) {
            if h > max {
                return false;
            }
        }
        if let (Some(max), Some(depth)) = (support.max_bit_depth, stream.bit_depth) {
            if depth > max {
                return false;
            }
        }
        true
    }

    pub fn supports_audio_stream(&self, stream: &MediaStream) -> bool {
        debug_assert_eq!(stream.stream_type, StreamType::Audio);
        let Some(support) = self
            .audio
            .iter()
            .find(|a| a.codec.eq_ignore_ascii_case(&stream.codec))
        else {
            return false;
        };
        if let (Some(max), Some(ch)) = (support.max_channels, stream.channels) {
            if ch > max {
                return false;
            }
        }
        if let (Some(max), Some(rate)) = (support.max_sample_rate, stream.sample_rate) {
            if rate > max {
                return false;
            }
        }
        if let (Some(max), Some(bitrate)) = (support.max_bitrate, stream.bitrate) {
            if bitrate > max {
                return false;
            }
        }
        true
    }

    pub fn supports_subtitle_stream(&self, stream: &MediaStream) -> bool {
        debug_assert_eq!(stream.stream_type, StreamType::Subtitle);
        if stream.is_image_subtitle() {
            return self.subtitles.accepts_burn_in;
        }
        // Text subtitles can always be converted server-side; a stream only
        // forces a transcode when the client renders no text format at all.
        !self.subtitles.text_formats.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn profile() -> CapabilityProfile {
        CapabilityProfile {
            version: 1,
            containers: vec!["mp4".into()],
            video: vec![VideoCodecSupport {
                codec: "h264".into(),
                profiles: vec![],
                max_level: Some(41),
                max_bitrate: Some(10_000_000),
                max_width: Some(1920),
                max_height: Some(1080),
                max_bit_depth: Some(8),
            }],
            audio: vec![AudioCodecSupport {
                codec: "aac".into(),
                max_channels: Some(2),
                max_sample_rate: Some(48_000),
                max_bitrate: None,
            }],
            subtitles: SubtitleSupport {
                text_formats: vec!["vtt".into()],
                accepts_burn_in: false,
            },
            accepts_hdr: false,
            max_total_bitrate: None,
        }
    }

    #[test]
    fn test_video_constraint_caps() {
        let p = profile();
        let mut s = MediaStream::new(Uuid::new_v4(), 0, StreamType::Video, "h264");
        s.width = Some(1920);
        s.height = Some(1080);
        s.bitrate = Some(5_000_000);
        assert!(p.supports_video_stream(&s));

        s.bitrate = Some(12_000_000);
        assert!(!p.supports_video_stream(&s));

        s.bitrate = Some(5_000_000);
        s.bit_depth = Some(10);
        assert!(!p.supports_video_stream(&s));
    }

    #[test]
    fn test_unknown_codec_unsupported() {
        let p = profile();
        let s = MediaStream::new(Uuid::new_v4(), 0, StreamType::Video, "av1");
        assert!(!p.supports_video_stream(&s));
    }

    #[test]
    fn test_image_subtitles_need_burn_in() {
        let p = profile();
        let s = MediaStream::new(Uuid::new_v4(), 2, StreamType::Subtitle, "hdmv_pgs_subtitle");
        assert!(!p.supports_subtitle_stream(&s));
        let t = MediaStream::new(Uuid::new_v4(), 2, StreamType::Subtitle, "subrip");
        assert!(p.supports_subtitle_stream(&t));
    }
}
