//! Metadata overlay
//!
//! The strictly ordered overlay producing the canonical item:
//! `resolved <- embedded <- sidecar <- remote-agents`. Later layers win for
//! the fields they set, subject to the per-field policy and the persisted
//! item's locked-field set.

use std::collections::BTreeSet;

use crate::model::{ItemKind, MetadataItem, ReleaseDate};

use super::content_rating::ContentRatingResolver;
use super::patch::MetadataPatch;

/// Overlay layers in application order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum OverlayLayer {
    Resolved,
    Embedded,
    Sidecar,
    Remote,
}

impl OverlayLayer {
    pub fn as_str(self) -> &'static str {
        match self {
            OverlayLayer::Resolved => "resolved",
            OverlayLayer::Embedded => "embedded",
            OverlayLayer::Sidecar => "sidecar",
            OverlayLayer::Remote => "remote",
        }
    }
}

fn locked(locked_fields: &BTreeSet<String>, overrides: &BTreeSet<String>, field: &str) -> bool {
    locked_fields.contains(field) && !overrides.contains(field)
}

fn non_blank(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Apply one layer's patch onto the item.
///
/// * `locked_fields` comes from the persisted item; locked fields skip the
///   overlay unless explicitly listed in `overrides`.
/// * `Year` is recomputed from `ReleaseDate.year` whenever this layer sets
///   the release date, even if the layer also supplied a year: the
///   authoritative release date wins.
pub async fn apply_layer(
    item: &mut MetadataItem,
    patch: &MetadataPatch,
    locked_fields: &BTreeSet<String>,
    overrides: &BTreeSet<String>,
    rating_resolver: &dyn ContentRatingResolver,
) {
    // Title and sort title are replaced only by non-blank, trimmed values.
    if !locked(locked_fields, overrides, "title") {
        if let Some(title) = non_blank(&patch.title) {
            item.title = Some(title);
        }
    }
    if !locked(locked_fields, overrides, "sort_title") {
        if let Some(sort_title) = non_blank(&patch.sort_title) {
            item.sort_title = Some(sort_title);
        }
    }
    if !locked(locked_fields, overrides, "original_title") {
        if let Some(original) = non_blank(&patch.original_title) {
            item.original_title = Some(original);
        }
    }
    if !locked(locked_fields, overrides, "summary") {
        if patch.summary.is_some() {
            item.summary = patch.summary.clone();
        }
    }
    if !locked(locked_fields, overrides, "tagline") {
        if patch.tagline.is_some() {
            item.tagline = patch.tagline.clone();
        }
    }

    if !locked(locked_fields, overrides, "release_date") {
        if let Some(date) = patch.release_date {
            item.release_date = Some(ReleaseDate(date));
            // Deterministic recompute, even when the patch carries its own
            // year.
            item.year = Some(date.year());
        } else if let Some(year) = patch.year {
            if !locked(locked_fields, overrides, "year") {
                item.year = Some(year);
            }
        }
    }

    if !locked(locked_fields, overrides, "content_rating") {
        if let Some(rating) = non_blank(&patch.content_rating) {
            item.content_rating = Some(rating.clone());
            item.content_rating_age = match patch.content_rating_age {
                Some(age) => Some(age),
                None => {
                    rating_resolver
                        .resolve_age(&rating, item.kind.is_television())
                        .await
                }
            };
        }
    }

    if !locked(locked_fields, overrides, "index_number") {
        if patch.index_number.is_some() {
            item.index_number = patch.index_number;
        }
    }
    if patch.absolute_index.is_some() {
        item.absolute_index = patch.absolute_index;
    }
    if !locked(locked_fields, overrides, "duration") {
        if patch.duration_ms.is_some() {
            item.duration_ms = patch.duration_ms;
        }
    }

    // Artwork source URIs land in the slots unresolved; the ingestion
    // service rewrites them to internal form.
    if !locked(locked_fields, overrides, "artwork") {
        if let Some(uri) = &patch.poster_uri {
            item.artwork.poster.uri = Some(uri.clone());
            item.artwork.poster.placeholder_hash = None;
        }
        if let Some(uri) = &patch.backdrop_uri {
            item.artwork.backdrop.uri = Some(uri.clone());
            item.artwork.backdrop.placeholder_hash = None;
        }
        if let Some(uri) = &patch.thumb_uri {
            item.artwork.thumb.uri = Some(uri.clone());
            item.artwork.thumb.placeholder_hash = None;
        }
    }

    // Right-biased custom-field merge; set-union collections.
    for (key, value) in &patch.extra_fields {
        item.extra_fields.insert(key.clone(), value.clone());
    }
    item.external_ids.extend(patch.pending_external_ids.iter().cloned());
    if !locked(locked_fields, overrides, "genres") {
        item.genres.extend(patch.genres.iter().cloned());
    }
    if !locked(locked_fields, overrides, "tags") {
        item.tags.extend(patch.tags.iter().cloned());
    }
    item.credits.extend(patch.credits.iter().cloned());
}

/// Apply the full overlay stack in order. `None` layers are skipped.
pub async fn apply_overlay(
    item: &mut MetadataItem,
    embedded: Option<&MetadataPatch>,
    sidecar: Option<&MetadataPatch>,
    remote: Option<&MetadataPatch>,
    locked_fields: &BTreeSet<String>,
    overrides: &BTreeSet<String>,
    rating_resolver: &dyn ContentRatingResolver,
) {
    for patch in [embedded, sidecar, remote].into_iter().flatten() {
        apply_layer(item, patch, locked_fields, overrides, rating_resolver).await;
    }
}

/// Whether two items would persist identically, used by the unchanged
/// short-circuit to satisfy scan determinism.
pub fn items_equivalent(a: &MetadataItem, b: &MetadataItem) -> bool {
    a.kind == b.kind
        && a.title == b.title
        && a.sort_title == b.sort_title
        && a.original_title == b.original_title
        && a.summary == b.summary
        && a.tagline == b.tagline
        && a.content_rating == b.content_rating
        && a.content_rating_age == b.content_rating_age
        && a.release_date == b.release_date
        && a.year == b.year
        && a.index_number == b.index_number
        && a.duration_ms == b.duration_ms
        && a.external_ids == b.external_ids
        && a.genres == b.genres
        && a.tags == b.tags
        && a.credits == b.credits
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan::content_rating::LocalContentRatingResolver;
    use time::{Date, Month};

    fn movie() -> MetadataItem {
        MetadataItem::skeleton(ItemKind::Movie)
    }

    #[tokio::test]
    async fn test_blank_title_does_not_replace() {
        let mut item = movie();
        item.title = Some("Kept".into());
        let patch = MetadataPatch { title: Some("   ".into()), ..Default::default() };
        apply_layer(
            &mut item,
            &patch,
            &BTreeSet::new(),
            &BTreeSet::new(),
            &LocalContentRatingResolver,
        )
        .await;
        assert_eq!(item.title.as_deref(), Some("Kept"));
    }

    #[tokio::test]
    async fn test_release_date_recomputes_year_over_explicit_year() {
        let mut item = movie();
        let patch = MetadataPatch {
            year: Some(1995),
            release_date: Some(Date::from_calendar_date(2001, Month::June, 15).unwrap()),
            ..Default::default()
        };
        apply_layer(
            &mut item,
            &patch,
            &BTreeSet::new(),
            &BTreeSet::new(),
            &LocalContentRatingResolver,
        )
        .await;
        assert_eq!(item.year, Some(2001));
    }

    #[tokio::test]
    async fn test_content_rating_age_resolved_when_missing() {
        let mut item = movie();
        let patch = MetadataPatch {
            content_rating: Some("PG-13".into()),
            ..Default::default()
        };
        apply_layer(
            &mut item,
            &patch,
            &BTreeSet::new(),
            &BTreeSet::new(),
            &LocalContentRatingResolver,
        )
        .await;
        assert_eq!(item.content_rating_age, Some(13));
    }

    #[tokio::test]
    async fn test_locked_field_skips_overlay_unless_overridden() {
        let mut item = movie();
        item.title = Some("Locked Title".into());
        let locked_fields: BTreeSet<String> = ["title".to_string()].into();
        let patch = MetadataPatch { title: Some("Intruder".into()), ..Default::default() };

        apply_layer(
            &mut item,
            &patch,
            &locked_fields,
            &BTreeSet::new(),
            &LocalContentRatingResolver,
        )
        .await;
        assert_eq!(item.title.as_deref(), Some("Locked Title"));

        let overrides: BTreeSet<String> = ["title".to_string()].into();
        apply_layer(
            &mut item,
            &patch,
            &locked_fields,
            &overrides,
            &LocalContentRatingResolver,
        )
        .await;
        assert_eq!(item.title.as_deref(), Some("Intruder"));
    }

    #[tokio::test]
    async fn test_overlay_order_later_layers_win() {
        let mut item = movie();
        let embedded = MetadataPatch { title: Some("Embedded".into()), ..Default::default() };
        let sidecar = MetadataPatch { title: Some("Sidecar".into()), ..Default::default() };
        apply_overlay(
            &mut item,
            Some(&embedded),
            Some(&sidecar),
            None,
            &BTreeSet::new(),
            &BTreeSet::new(),
            &LocalContentRatingResolver,
        )
        .await;
        assert_eq!(item.title.as_deref(), Some("Sidecar"));
    }
}
