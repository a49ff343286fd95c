//! `metadata.json` sidecar parser
//!
//! A flat JSON document colocated with the media file. Unknown keys land in
//! the hints map so downstream agents can still consume them.

use anyhow::Result;
use serde::Deserialize;
use time::format_description::well_known::Iso8601;
use time::Date;

use crate::model::ExternalId;

use super::super::patch::MetadataPatch;
use super::{Entry, SidecarParser, SidecarRequest, SidecarResult};

#[derive(Debug, Deserialize)]
struct JsonSidecar {
    title: Option<String>,
    sort_title: Option<String>,
    original_title: Option<String>,
    summary: Option<String>,
    tagline: Option<String>,
    content_rating: Option<String>,
    release_date: Option<String>,
    year: Option<i32>,
    #[serde(default)]
    genres: Vec<String>,
    #[serde(default)]
    tags: Vec<String>,
    /// provider -> value
    #[serde(default)]
    external_ids: std::collections::BTreeMap<String, String>,
    poster: Option<String>,
    backdrop: Option<String>,
    #[serde(flatten)]
    rest: std::collections::BTreeMap<String, serde_json::Value>,
}

pub struct JsonMetadataParser;

impl SidecarParser for JsonMetadataParser {
    fn name(&self) -> &'static str {
        "json"
    }

    fn can_parse(&self, file: &Entry) -> bool {
        file.name.eq_ignore_ascii_case("metadata.json")
            || (file.ext.as_deref() == Some("json") && file.stem().ends_with(".metadata"))
    }

    fn parse(&self, request: &SidecarRequest<'_>) -> Result<Option<SidecarResult>> {
        let raw = std::fs::read_to_string(&request.sidecar_file.path)?;
        let Ok(doc) = serde_json::from_str::<JsonSidecar>(&raw) else {
            // Unparsable sidecars are a benign skip.
            return Ok(None);
        };

        let mut patch = MetadataPatch {
            title: doc.title,
            sort_title: doc.sort_title,
            original_title: doc.original_title,
            summary: doc.summary,
            tagline: doc.tagline,
            content_rating: doc.content_rating,
            year: doc.year,
            poster_uri: doc.poster,
            backdrop_uri: doc.backdrop,
            ..Default::default()
        };
        if let Some(raw_date) = doc.release_date {
            if let Ok(date) = Date::parse(&raw_date, &Iso8601::DEFAULT) {
                patch.release_date = Some(date);
                patch.year = Some(date.year());
            }
        }
        patch.genres.extend(doc.genres);
        patch.tags.extend(doc.tags);
        for (provider, value) in doc.external_ids {
            patch.pending_external_ids.insert(ExternalId::new(provider, value));
        }
        for (key, value) in doc.rest {
            if let Some(s) = value.as_str() {
                patch.hints.insert(key, s.to_string());
            } else {
                patch.hints.insert(key, value.to_string());
            }
        }

        if patch.is_empty() {
            return Ok(None);
        }
        Ok(Some(SidecarResult { metadata: Some(patch), source: "json" }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn entry_for(path: &std::path::Path) -> Entry {
        Entry {
            name: path.file_name().unwrap().to_string_lossy().to_string(),
            ext: path.extension().map(|e| e.to_string_lossy().to_lowercase()),
            path: path.to_path_buf(),
            is_dir: false,
            size: Some(1),
            mtime: None,
            ctime: None,
            exists: true,
        }
    }

    #[test]
    fn test_parse_metadata_json() {
        let dir = tempfile::tempdir().unwrap();
        let sidecar_path = dir.path().join("metadata.json");
        std::fs::write(
            &sidecar_path,
            r#"{
                "title": "Big Picture",
                "year": 2001,
                "release_date": "2001-06-15",
                "genres": ["Drama"],
                "external_ids": {"tmdb": "8842"},
                "collection": "Trilogy"
            }"#,
        )
        .unwrap();

        let media = entry_for(&PathBuf::from("/m/movie.mkv"));
        let sidecar = entry_for(&sidecar_path);
        let request = SidecarRequest {
            media_file: &media,
            sidecar_file: &sidecar,
            library_kind: crate::model::LibraryKind::Movies,
            siblings: &[],
        };

        let result = JsonMetadataParser.parse(&request).unwrap().unwrap();
        let patch = result.metadata.unwrap();
        assert_eq!(patch.title.as_deref(), Some("Big Picture"));
        assert_eq!(patch.year, Some(2001));
        assert!(patch.release_date.is_some());
        assert!(patch
            .pending_external_ids
            .contains(&ExternalId::new("tmdb", "8842")));
        assert_eq!(patch.hints.get("collection").map(String::as_str), Some("Trilogy"));
    }

    #[test]
    fn test_unparsable_json_is_benign() {
        let dir = tempfile::tempdir().unwrap();
        let sidecar_path = dir.path().join("metadata.json");
        std::fs::write(&sidecar_path, "{not json").unwrap();

        let media = entry_for(&PathBuf::from("/m/movie.mkv"));
        let sidecar = entry_for(&sidecar_path);
        let request = SidecarRequest {
            media_file: &media,
            sidecar_file: &sidecar,
            library_kind: crate::model::LibraryKind::Movies,
            siblings: &[],
        };
        assert!(JsonMetadataParser.parse(&request).unwrap().is_none());
    }
}
