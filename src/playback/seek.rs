//! Seek-reload engine
//!
//! For DirectStream (remux) and Transcode (DASH) sessions the client's
//! media stack may not know the full duration, so a seek past the apparent
//! duration must reload the stream from a new start. The server side
//! answers keyframe queries (seeks must land on a GoP start) and chooses
//! the authoritative DASH start time; the reload decision itself is a pure
//! function over the session's numbers.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use dashmap::DashMap;
use tracing::debug;
use uuid::Uuid;

use crate::media::ffprobe::FfprobeService;

use super::decision::DeliveryMode;

/// DASH segment length; seek starts round down to a boundary.
pub const SEGMENT_DURATION_MS: i64 = 4_000;

/// An `ended` event is suppressed while more than this much stream remains.
pub const ENDED_SUPPRESSION_WINDOW_MS: i64 = 5_000;

/// Keyframe timestamps of one part, ascending.
#[derive(Debug, Clone)]
pub struct KeyframeIndex {
    timestamps_ms: Vec<i64>,
}

impl KeyframeIndex {
    pub fn new(mut timestamps_ms: Vec<i64>) -> Self {
        timestamps_ms.sort_unstable();
        timestamps_ms.dedup();
        Self { timestamps_ms }
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps_ms.is_empty()
    }

    /// Nearest keyframe at or before `target_ms`; 0 when the index is
    /// empty or the target precedes the first keyframe.
    pub fn seek_to_keyframe(&self, target_ms: i64) -> i64 {
        match self.timestamps_ms.partition_point(|&t| t <= target_ms) {
            0 => 0,
            n => self.timestamps_ms[n - 1],
        }
    }
}

/// Round a requested start down to the DASH segment boundary. This is the
/// authoritative start carried in `X-Dash-Start-Time-Ms`.
pub fn dash_start_time_ms(seek_ms: i64) -> i64 {
    (seek_ms / SEGMENT_DURATION_MS) * SEGMENT_DURATION_MS
}

/// Whether an `ended` event is a false positive caused by a post-seek
/// reload in a stream with unknown total duration.
pub fn should_suppress_ended(
    server_duration_ms: i64,
    current_time_ms: i64,
    stream_offset_ms: i64,
) -> bool {
    server_duration_ms - (current_time_ms + stream_offset_ms) > ENDED_SUPPRESSION_WINDOW_MS
}

/// What the client should do with a seek.
#[derive(Debug, Clone, PartialEq)]
pub enum ReloadAction {
    /// Within the buffered window: set `currentTime` directly.
    SetCurrentTime { seek_time_ms: i64 },
    /// Reload the remux stream at the keyframe; all future time reports are
    /// `stream_offset_ms + element_time`.
    LoadRemux { url: String, stream_offset_ms: i64 },
    /// Reload the DASH manifest; the true offset arrives in
    /// `X-Dash-Start-Time-Ms` on the response.
    LoadDash { url: String, requested_ms: i64 },
    /// No reload URL available: clamp to just before the known end.
    Clamp { seek_time_ms: i64 },
}

/// Decide how a client should execute a seek to `seek_time_ms` (already
/// keyframe-aligned).
pub fn reload_decision(
    mode: DeliveryMode,
    part_id: Uuid,
    container: &str,
    seek_time_ms: i64,
    browser_duration_ms: Option<i64>,
) -> ReloadAction {
    if let Some(browser_duration) = browser_duration_ms {
        if seek_time_ms <= browser_duration - 1_000 {
            return ReloadAction::SetCurrentTime { seek_time_ms };
        }
    }

    match mode {
        DeliveryMode::DirectStream => ReloadAction::LoadRemux {
            url: format!(
                "/api/v1/playback/part/{part_id}/remux-seek.{container}?seekMs={seek_time_ms}"
            ),
            stream_offset_ms: seek_time_ms,
        },
        DeliveryMode::Transcode => ReloadAction::LoadDash {
            url: format!(
                "/api/v1/playback/part/{part_id}/dash-seek/manifest.mpd?seekMs={seek_time_ms}"
            ),
            requested_ms: seek_time_ms,
        },
        DeliveryMode::DirectPlay => ReloadAction::Clamp {
            seek_time_ms: (browser_duration_ms.unwrap_or(1_000) - 1_000).max(0),
        },
    }
}

/// Keyframe lookup service with a per-part cache.
pub struct SeekService {
    ffprobe: FfprobeService,
    cache: DashMap<Uuid, Arc<KeyframeIndex>>,
}

impl SeekService {
    pub fn new(ffprobe: FfprobeService) -> Self {
        Self { ffprobe, cache: DashMap::new() }
    }

    /// Nearest keyframe at or before `target_ms` for a part, per its on-disk
    /// GoP structure. Falls back to the raw target when no keyframes can be
    /// read (audio-only or unreadable file).
    pub async fn seek_to_keyframe(
        &self,
        part_id: Uuid,
        file_path: &str,
        target_ms: i64,
    ) -> Result<i64> {
        let index = self.index_for(part_id, file_path).await?;
        if index.is_empty() {
            return Ok(target_ms.max(0));
        }
        let aligned = index.seek_to_keyframe(target_ms);
        debug!(part_id = %part_id, target_ms, aligned, "Keyframe-aligned seek");
        Ok(aligned)
    }

    async fn index_for(&self, part_id: Uuid, file_path: &str) -> Result<Arc<KeyframeIndex>> {
        if let Some(index) = self.cache.get(&part_id) {
            return Ok(index.clone());
        }
        let timestamps = if Path::new(file_path).is_file() {
            self.ffprobe.keyframes_ms(Path::new(file_path)).await.unwrap_or_default()
        } else {
            Vec::new()
        };
        let index = Arc::new(KeyframeIndex::new(timestamps));
        self.cache.insert(part_id, index.clone());
        Ok(index)
    }

    pub fn invalidate(&self, part_id: Uuid) {
        self.cache.remove(&part_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_keyframe_floor() {
        let index = KeyframeIndex::new(vec![0, 2_000, 4_000, 6_000]);
        assert_eq!(index.seek_to_keyframe(5_000), 4_000);
        assert_eq!(index.seek_to_keyframe(4_000), 4_000);
        assert_eq!(index.seek_to_keyframe(100_000), 6_000);
        assert_eq!(index.seek_to_keyframe(-5), 0);
        assert_eq!(KeyframeIndex::new(vec![]).seek_to_keyframe(1_000), 0);
    }

    #[test]
    fn test_dash_start_rounds_to_segment() {
        assert_eq!(dash_start_time_ms(1_898_000), 1_896_000);
        assert_eq!(dash_start_time_ms(4_000), 4_000);
        assert_eq!(dash_start_time_ms(3_999), 0);
    }

    #[test]
    fn test_ended_suppression_window() {
        // 3600s stream, reloaded at 1896s, element time 2s in.
        assert!(should_suppress_ended(3_600_000, 2_000, 1_896_000));
        // At the true end the event passes through.
        assert!(!should_suppress_ended(3_600_000, 1_703_000, 1_896_000));
        assert!(!should_suppress_ended(3_600_000, 1_700_000, 1_896_000));
    }

    #[test]
    fn test_reload_decision_within_buffer() {
        let action = reload_decision(
            DeliveryMode::DirectStream,
            Uuid::nil(),
            "mp4",
            30_000,
            Some(120_000),
        );
        assert_eq!(action, ReloadAction::SetCurrentTime { seek_time_ms: 30_000 });
    }

    #[test]
    fn test_reload_decision_remux_overshoot() {
        let part = Uuid::nil();
        let action =
            reload_decision(DeliveryMode::DirectStream, part, "mp4", 1_898_000, Some(1_800_000));
        match action {
            ReloadAction::LoadRemux { url, stream_offset_ms } => {
                assert_eq!(
                    url,
                    format!("/api/v1/playback/part/{part}/remux-seek.mp4?seekMs=1898000")
                );
                assert_eq!(stream_offset_ms, 1_898_000);
            }
            other => panic!("expected remux reload, got {other:?}"),
        }
    }

    #[test]
    fn test_reload_decision_dash_overshoot() {
        let part = Uuid::nil();
        let action =
            reload_decision(DeliveryMode::Transcode, part, "mpd", 1_898_000, Some(1_800_000));
        match action {
            ReloadAction::LoadDash { url, requested_ms } => {
                assert_eq!(
                    url,
                    format!("/api/v1/playback/part/{part}/dash-seek/manifest.mpd?seekMs=1898000")
                );
                assert_eq!(requested_ms, 1_898_000);
            }
            other => panic!("expected dash reload, got {other:?}"),
        }
    }

    #[test]
    fn test_absolute_position_monotonic_after_reload() {
        // After a remux reload, reported positions are offset + element
        // time and never decrease until the next reload.
        let stream_offset = 1_898_000;
        let element_times = [0, 500, 1_000, 2_500, 9_000];
        let mut last = i64::MIN;
        for t in element_times {
            let reported = stream_offset + t;
            assert!(reported >= last);
            last = reported;
        }
    }
}
