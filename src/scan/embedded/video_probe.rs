//! Container-tag extractor for video files
//!
//! Surfaces the container-level `title` and `date` tags ffprobe reports.
//! Stream analysis itself happens in the analyzer pass; this extractor only
//! contributes metadata fields.

use anyhow::Result;
use async_trait::async_trait;
use time::format_description::well_known::Iso8601;
use time::Date;

use crate::media::ffprobe::FfprobeService;
use crate::model::LibraryKind;

use super::super::patch::MetadataPatch;
use super::super::probe::Entry;
use super::super::resolvers::is_video;
use super::EmbeddedExtractor;

pub struct VideoProbeExtractor {
    ffprobe: FfprobeService,
}

impl VideoProbeExtractor {
    pub fn new(ffprobe: FfprobeService) -> Self {
        Self { ffprobe }
    }
}

#[async_trait]
impl EmbeddedExtractor for VideoProbeExtractor {
    fn name(&self) -> &'static str {
        "container-tags"
    }

    fn supports(&self, file: &Entry, kind: LibraryKind) -> bool {
        matches!(kind, LibraryKind::Movies | LibraryKind::TvShows) && is_video(file)
    }

    async fn extract(&self, file: &Entry) -> Result<Option<MetadataPatch>> {
        let analysis = self.ffprobe.analyze(&file.path).await?;

        let mut patch = MetadataPatch::default();
        patch.duration_ms = analysis.duration_ms;
        if let Some(title) = analysis.tags.get("title") {
            let trimmed = title.trim();
            if !trimmed.is_empty() {
                patch.title = Some(trimmed.to_string());
            }
        }
        if let Some(raw_date) = analysis.tags.get("date").or_else(|| analysis.tags.get("creation_time")) {
            if let Ok(date) = Date::parse(raw_date, &Iso8601::DEFAULT) {
                patch.release_date = Some(date);
                patch.year = Some(date.year());
            }
        }

        if patch.is_empty() {
            return Ok(None);
        }
        Ok(Some(patch))
    }
}
