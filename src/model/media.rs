//! Physical media model
//!
//! A [MediaItem] is one playable rendition of a metadata item, composed of
//! one or more [MediaPart]s (actual files on disk). [MediaStream] rows
//! describe the individual elementary streams inside a part.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// HDR transfer detected from color metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HdrType {
    /// HDR10 (PQ transfer + BT.2020 primaries)
    Hdr10,
    /// HDR10+ (dynamic metadata)
    Hdr10Plus,
    /// Dolby Vision
    DolbyVision,
    /// Hybrid Log-Gamma
    Hlg,
}

impl HdrType {
    pub fn as_str(&self) -> &'static str {
        match self {
            HdrType::Hdr10 => "HDR10",
            HdrType::Hdr10Plus => "HDR10+",
            HdrType::DolbyVision => "Dolby Vision",
            HdrType::Hlg => "HLG",
        }
    }
}

impl std::fmt::Display for HdrType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Elementary stream type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamType {
    Video,
    Audio,
    Subtitle,
}

impl StreamType {
    pub fn as_str(self) -> &'static str {
        match self {
            StreamType::Video => "video",
            StreamType::Audio => "audio",
            StreamType::Subtitle => "subtitle",
        }
    }
}

/// One elementary stream inside a media part.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaStream {
    pub id: Uuid,
    pub media_part_id: Uuid,
    /// Index within the container.
    pub index: i32,
    pub stream_type: StreamType,
    pub codec: String,
    pub language: Option<String>,
    pub title: Option<String>,

    // Video
    pub width: Option<i32>,
    pub height: Option<i32>,
    pub profile: Option<String>,
    pub level: Option<i32>,
    pub bit_depth: Option<i32>,
    pub frame_rate: Option<f64>,
    pub hdr_type: Option<HdrType>,

    // Audio
    pub channels: Option<i32>,
    pub sample_rate: Option<i32>,

    pub bitrate: Option<i64>,
    pub is_default: bool,
    pub is_forced: bool,
}

impl MediaStream {
    pub fn new(part_id: Uuid, index: i32, stream_type: StreamType, codec: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            media_part_id: part_id,
            index,
            stream_type,
            codec: codec.into(),
            language: None,
            title: None,
            width: None,
            height: None,
            profile: None,
            level: None,
            bit_depth: None,
            frame_rate: None,
            hdr_type: None,
            channels: None,
            sample_rate: None,
            bitrate: None,
            is_default: false,
            is_forced: false,
        }
    }

    /// Image-based subtitle codecs cannot be converted in text form.
    pub fn is_image_subtitle(&self) -> bool {
        self.stream_type == StreamType::Subtitle
            && matches!(
                self.codec.as_str(),
                "hdmv_pgs_subtitle" | "pgssub" | "dvb_subtitle" | "dvbsub" | "dvd_subtitle"
                    | "dvdsub" | "xsub"
            )
    }
}

/// One file on disk making up (part of) a media item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaPart {
    pub id: Uuid,
    pub media_item_id: Uuid,
    /// Zero-based part order (cd1 = 0, cd2 = 1).
    pub part_index: i32,
    pub file_path: String,
    pub size_bytes: i64,
    pub modified_at: Option<OffsetDateTime>,
    pub hash: Option<String>,
    pub duration_ms: Option<i64>,
    pub container: Option<String>,
    pub streams: Vec<MediaStream>,
}

impl MediaPart {
    pub fn video_streams(&self) -> impl Iterator<Item = &MediaStream> {
        self.streams.iter().filter(|s| s.stream_type == StreamType::Video)
    }

    pub fn audio_streams(&self) -> impl Iterator<Item = &MediaStream> {
        self.streams.iter().filter(|s| s.stream_type == StreamType::Audio)
    }

    pub fn subtitle_streams(&self) -> impl Iterator<Item = &MediaStream> {
        self.streams.iter().filter(|s| s.stream_type == StreamType::Subtitle)
    }
}

/// A playable rendition of a metadata item with aggregated stream summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaItem {
    pub id: Uuid,
    pub metadata_item_id: Uuid,
    pub container: Option<String>,
    pub video_codec: Option<String>,
    pub audio_codec: Option<String>,
    pub width: Option<i32>,
    pub height: Option<i32>,
    pub hdr_type: Option<HdrType>,
    pub bitrate: Option<i64>,
    pub duration_ms: Option<i64>,
    /// `sum(parts.size_bytes)` unless unknown.
    pub file_size_bytes: Option<i64>,
    /// Disc image rendition (VIDEO_TS / BDMV folder).
    pub is_disc_image: bool,
    pub parts: Vec<MediaPart>,
}

impl MediaItem {
    pub fn new(metadata_item_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            metadata_item_id,
            container: None,
            video_codec: None,
            audio_codec: None,
            width: None,
            height: None,
            hdr_type: None,
            bitrate: None,
            duration_ms: None,
            file_size_bytes: None,
            is_disc_image: false,
            parts: Vec::new(),
        }
    }

    /// Recompute the aggregate summary from parts and their streams.
    /// Keeps `file_size_bytes == sum(parts.size_bytes)`.
    pub fn recompute_summary(&mut self) {
        self.parts.sort_by_key(|p| p.part_index);
        self.file_size_bytes = Some(self.parts.iter().map(|p| p.size_bytes).sum());
        self.duration_ms = {
            let known: Vec<i64> = self.parts.iter().filter_map(|p| p.duration_ms).collect();
            if known.len() == self.parts.len() && !known.is_empty() {
                Some(known.iter().sum())
            } else {
                None
            }
        };
        if let Some(first) = self.parts.first() {
            self.container = first.container.clone();
            if let Some(v) = first.video_streams().next() {
                self.video_codec = Some(v.codec.clone());
                self.width = v.width;
                self.height = v.height;
                self.hdr_type = v.hdr_type;
            }
            if let Some(a) = first.audio_streams().next() {
                self.audio_codec = Some(a.codec.clone());
            }
            self.bitrate = first.streams.iter().filter_map(|s| s.bitrate).sum::<i64>().into();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn part(idx: i32, size: i64) -> MediaPart {
        MediaPart {
            id: Uuid::new_v4(),
            media_item_id: Uuid::new_v4(),
            part_index: idx,
            file_path: format!("/m/part{idx}.mkv"),
            size_bytes: size,
            modified_at: None,
            hash: None,
            duration_ms: Some(1000),
            container: Some("mkv".into()),
            streams: Vec::new(),
        }
    }

    #[test]
    fn test_summary_aggregates_part_sizes() {
        let mut item = MediaItem::new(Uuid::new_v4());
        item.parts.push(part(1, 1 << 30));
        item.parts.push(part(0, 2 << 30));
        item.recompute_summary();
        assert_eq!(item.file_size_bytes, Some(3 << 30));
        // parts reordered by index
        assert_eq!(item.parts[0].part_index, 0);
        assert_eq!(item.duration_ms, Some(2000));
    }

    #[test]
    fn test_image_subtitle_detection() {
        let mut s = MediaStream::new(Uuid::new_v4(), 2, StreamType::Subtitle, "hdmv_pgs_subtitle");
        assert!(s.is_image_subtitle());
        s.codec = "subrip".into();
        assert!(!s.is_image_subtitle());
    }
}
