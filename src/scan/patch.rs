//! Partial metadata patches
//!
//! Sidecar parsers, embedded extractors and remote agents all express their
//! contribution as a [MetadataPatch]: only the fields they actually learned
//! are set. Patches from several sources of the same layer merge with
//! last-writer-wins for non-null fields and set-union for collections; the
//! cross-layer overlay policy lives in [crate::scan::merge].

use std::collections::{BTreeMap, BTreeSet};

use time::Date;

use crate::model::{Credit, CustomValue, ExternalId};

/// Loose key/value hints consumable by downstream resolvers and agents.
pub type Hints = BTreeMap<String, String>;

/// A partial metadata contribution.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataPatch {
    pub title: Option<String>,
    pub sort_title: Option<String>,
    pub original_title: Option<String>,
    pub summary: Option<String>,
    pub tagline: Option<String>,
    pub content_rating: Option<String>,
    pub content_rating_age: Option<i32>,
    pub release_date: Option<Date>,
    pub year: Option<i32>,
    pub index_number: Option<i32>,
    pub absolute_index: Option<i32>,
    pub duration_ms: Option<i64>,

    /// Artwork source URIs (file paths or http URLs) awaiting ingestion.
    pub poster_uri: Option<String>,
    pub backdrop_uri: Option<String>,
    pub thumb_uri: Option<String>,

    /// Admin-defined custom fields; right-biased on merge.
    pub extra_fields: BTreeMap<String, CustomValue>,
    /// External ids to attach once the item is persisted; set-union on merge.
    pub pending_external_ids: BTreeSet<ExternalId>,

    pub genres: BTreeSet<String>,
    pub tags: BTreeSet<String>,
    pub credits: BTreeSet<Credit>,

    pub hints: Hints,
}

impl MetadataPatch {
    pub fn is_empty(&self) -> bool {
        *self == MetadataPatch::default()
    }

    /// Merge `other` over `self`: non-null scalar fields of `other` win,
    /// collections union, hints are right-biased.
    pub fn absorb(&mut self, other: MetadataPatch) {
        macro_rules! take_if_some {
            ($($field:ident),+ $(,)?) => {
                $(if other.$field.is_some() { self.$field = other.$field; })+
            };
        }
        take_if_some!(
            title,
            sort_title,
            original_title,
            summary,
            tagline,
            content_rating,
            content_rating_age,
            release_date,
            year,
            index_number,
            absolute_index,
            duration_ms,
            poster_uri,
            backdrop_uri,
            thumb_uri,
        );
        self.extra_fields.extend(other.extra_fields);
        self.pending_external_ids.extend(other.pending_external_ids);
        self.genres.extend(other.genres);
        self.tags.extend(other.tags);
        self.credits.extend(other.credits);
        self.hints.extend(other.hints);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absorb_last_writer_wins_non_null() {
        let mut a = MetadataPatch {
            title: Some("First".into()),
            year: Some(2001),
            ..Default::default()
        };
        let b = MetadataPatch {
            title: Some("Second".into()),
            summary: Some("plot".into()),
            ..Default::default()
        };
        a.absorb(b);
        assert_eq!(a.title.as_deref(), Some("Second"));
        assert_eq!(a.summary.as_deref(), Some("plot"));
        // null in the right side does not erase
        assert_eq!(a.year, Some(2001));
    }

    #[test]
    fn test_absorb_unions_collections_and_right_biases_hints() {
        let mut a = MetadataPatch::default();
        a.genres.insert("Drama".into());
        a.hints.insert("k".into(), "left".into());

        let mut b = MetadataPatch::default();
        b.genres.insert("Comedy".into());
        b.hints.insert("k".into(), "right".into());

        a.absorb(b);
        assert_eq!(a.genres.len(), 2);
        assert_eq!(a.hints.get("k").map(String::as_str), Some("right"));
    }
}
