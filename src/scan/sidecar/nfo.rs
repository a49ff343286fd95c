//! NFO sidecar parser
//!
//! Reads Kodi-style `.nfo` XML (`<movie>`, `<tvshow>`, `<episodedetails>`,
//! `<album>`) into a metadata patch. Only fields actually present in the
//! document are set.

use anyhow::Result;
use quick_xml::events::Event;
use quick_xml::Reader;
use time::format_description::well_known::Iso8601;
use time::Date;

use crate::model::{Credit, CreditKind, ExternalId};

use super::super::patch::MetadataPatch;
use super::{Entry, SidecarParser, SidecarRequest, SidecarResult};

/// Root elements this parser understands.
const KNOWN_ROOTS: &[&str] = &["movie", "tvshow", "episodedetails", "album", "musicvideo"];

pub struct NfoParser;

impl SidecarParser for NfoParser {
    fn name(&self) -> &'static str {
        "nfo"
    }

    fn can_parse(&self, file: &Entry) -> bool {
        file.ext.as_deref() == Some("nfo")
    }

    fn parse(&self, request: &SidecarRequest<'_>) -> Result<Option<SidecarResult>> {
        // The NFO must share the media file's stem, or be the folder-level
        // movie.nfo.
        let media_stem = request.media_file.stem();
        let sidecar_stem = request.sidecar_file.stem();
        if sidecar_stem != media_stem && sidecar_stem != "movie" && sidecar_stem != "album" {
            return Ok(None);
        }

        let xml = std::fs::read_to_string(&request.sidecar_file.path)?;
        let Some(patch) = parse_nfo(&xml) else {
            return Ok(None);
        };
        if patch.is_empty() {
            return Ok(None);
        }
        Ok(Some(SidecarResult { metadata: Some(patch), source: "nfo" }))
    }
}

fn parse_nfo(xml: &str) -> Option<MetadataPatch> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut patch = MetadataPatch::default();
    let mut in_root = false;
    let mut tag_stack: Vec<String> = Vec::new();
    let mut actor_name: Option<String> = None;
    let mut actor_role: Option<String> = None;
    let mut uniqueid_type: Option<String> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => {
                let tag = String::from_utf8_lossy(e.name().as_ref()).to_string();
                if !in_root {
                    if KNOWN_ROOTS.contains(&tag.as_str()) {
                        in_root = true;
                        continue;
                    }
                    // Unknown root element; not our document.
                    return None;
                }
                if tag == "uniqueid" {
                    uniqueid_type = e
                        .attributes()
                        .flatten()
                        .find(|a| a.key.as_ref() == b"type")
                        .map(|a| String::from_utf8_lossy(&a.value).to_string());
                }
                tag_stack.push(tag);
            }
            Ok(Event::Text(ref t)) => {
                if !in_root {
                    continue;
                }
                let text = t.unescape().unwrap_or_default().trim().to_string();
                if text.is_empty() {
                    continue;
                }
                let current = tag_stack.last().map(String::as_str).unwrap_or("");
                let parent = tag_stack
                    .len()
                    .checked_sub(2)
                    .and_then(|i| tag_stack.get(i))
                    .map(String::as_str)
                    .unwrap_or("");
                match (parent, current) {
                    (_, "title") if tag_stack.len() == 1 => patch.title = Some(text),
                    (_, "sorttitle") => patch.sort_title = Some(text),
                    (_, "originaltitle") => patch.original_title = Some(text),
                    (_, "plot") | (_, "outline") if patch.summary.is_none() => {
                        patch.summary = Some(text)
                    }
                    (_, "tagline") => patch.tagline = Some(text),
                    (_, "mpaa") => patch.content_rating = Some(text),
                    (_, "premiered") | (_, "releasedate") | (_, "aired") => {
                        if let Ok(date) = Date::parse(&text, &Iso8601::DEFAULT) {
                            patch.release_date = Some(date);
                            patch.year = Some(date.year());
                        }
                    }
                    (_, "year") if patch.release_date.is_none() => {
                        patch.year = text.parse().ok();
                    }
                    (_, "runtime") => {
                        // Minutes in Kodi NFO convention.
                        if let Ok(minutes) = text.parse::<i64>() {
                            patch.duration_ms = Some(minutes * 60_000);
                        }
                    }
                    (_, "genre") => {
                        patch.genres.insert(text);
                    }
                    (_, "tag") => {
                        patch.tags.insert(text);
                    }
                    (_, "studio") => {
                        patch.credits.insert(Credit {
                            name: text,
                            role: Some("studio".to_string()),
                            kind: CreditKind::Group,
                        });
                    }
                    (_, "director") => {
                        patch.credits.insert(Credit {
                            name: text,
                            role: Some("director".to_string()),
                            kind: CreditKind::Person,
                        });
                    }
                    ("actor", "name") => actor_name = Some(text),
                    ("actor", "role") => actor_role = Some(text),
                    (_, "uniqueid") => {
                        let provider = uniqueid_type.clone().unwrap_or_else(|| "imdb".to_string());
                        patch.pending_external_ids.insert(ExternalId::new(provider, text));
                    }
                    (_, "thumb") if tag_stack.len() == 1 => {
                        patch.poster_uri = Some(text);
                    }
                    ("fanart", "thumb") => {
                        patch.backdrop_uri = Some(text);
                    }
                    _ => {}
                }
            }
            Ok(Event::End(ref e)) => {
                let tag = String::from_utf8_lossy(e.name().as_ref()).to_string();
                if tag == "actor" {
                    if let Some(name) = actor_name.take() {
                        patch.credits.insert(Credit {
                            name,
                            role: actor_role.take(),
                            kind: CreditKind::Person,
                        });
                    }
                    actor_role = None;
                }
                if tag == "uniqueid" {
                    uniqueid_type = None;
                }
                tag_stack.pop();
            }
            Ok(Event::Eof) => break,
            Err(_) => return None,
            _ => {}
        }
    }

    in_root.then_some(patch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const MOVIE_NFO: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<movie>
  <title>Big Picture</title>
  <sorttitle>Big Picture, The</sorttitle>
  <plot>Things happen.</plot>
  <tagline>They really do</tagline>
  <mpaa>PG-13</mpaa>
  <premiered>2001-06-15</premiered>
  <year>1999</year>
  <runtime>123</runtime>
  <genre>Drama</genre>
  <genre>Comedy</genre>
  <uniqueid type="imdb">tt0123456</uniqueid>
  <uniqueid type="tmdb">8842</uniqueid>
  <actor>
    <name>Jess Actor</name>
    <role>Lead</role>
  </actor>
  <thumb>https://img.example/poster.jpg</thumb>
</movie>"#;

    #[test]
    fn test_parse_movie_nfo() {
        let patch = parse_nfo(MOVIE_NFO).unwrap();
        assert_eq!(patch.title.as_deref(), Some("Big Picture"));
        assert_eq!(patch.sort_title.as_deref(), Some("Big Picture, The"));
        assert_eq!(patch.summary.as_deref(), Some("Things happen."));
        assert_eq!(patch.content_rating.as_deref(), Some("PG-13"));
        // premiered wins over the conflicting <year>
        assert_eq!(patch.year, Some(2001));
        assert_eq!(patch.duration_ms, Some(123 * 60_000));
        assert_eq!(patch.genres.len(), 2);
        assert_eq!(patch.pending_external_ids.len(), 2);
        assert!(patch
            .pending_external_ids
            .contains(&ExternalId::new("imdb", "tt0123456")));
        assert_eq!(patch.credits.len(), 1);
        assert_eq!(patch.poster_uri.as_deref(), Some("https://img.example/poster.jpg"));
    }

    #[test]
    fn test_unknown_root_rejected() {
        assert!(parse_nfo("<rss><title>nope</title></rss>").is_none());
    }

    #[test]
    fn test_malformed_xml_rejected() {
        assert!(parse_nfo("<movie><title>unterminated").map(|p| p.is_empty()).unwrap_or(true));
    }
}
