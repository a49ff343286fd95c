//! Content-rating age resolution
//!
//! Maps a content-rating string to the minimum viewer age, parameterized by
//! whether the rated item is television (TV-MA and R carry different
//! labels for the same age band). The trait stands in for the external
//! rating service; the built-in table covers MPAA, US TV and common
//! international labels.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use std::collections::HashMap;

/// Rating-to-age resolution contract.
#[async_trait]
pub trait ContentRatingResolver: Send + Sync {
    async fn resolve_age(&self, rating: &str, is_television: bool) -> Option<i32>;
}

static FILM_RATINGS: Lazy<HashMap<&'static str, i32>> = Lazy::new(|| {
    HashMap::from([
        ("g", 0),
        ("pg", 8),
        ("pg-13", 13),
        ("r", 17),
        ("nc-17", 18),
        ("u", 0),
        ("12", 12),
        ("12a", 12),
        ("15", 15),
        ("18", 18),
        ("fsk 0", 0),
        ("fsk 6", 6),
        ("fsk 12", 12),
        ("fsk 16", 16),
        ("fsk 18", 18),
    ])
});

static TV_RATINGS: Lazy<HashMap<&'static str, i32>> = Lazy::new(|| {
    HashMap::from([
        ("tv-y", 0),
        ("tv-y7", 7),
        ("tv-g", 0),
        ("tv-pg", 8),
        ("tv-14", 14),
        ("tv-ma", 17),
    ])
});

/// Table-backed resolver used when no external service is registered.
pub struct LocalContentRatingResolver;

#[async_trait]
impl ContentRatingResolver for LocalContentRatingResolver {
    async fn resolve_age(&self, rating: &str, is_television: bool) -> Option<i32> {
        let normalized = rating.trim().to_lowercase();
        if is_television {
            // TV labels first, then fall back to film labels for sections
            // that carry MPAA strings on shows.
            TV_RATINGS
                .get(normalized.as_str())
                .or_else(|| FILM_RATINGS.get(normalized.as_str()))
                .copied()
        } else {
            FILM_RATINGS.get(normalized.as_str()).copied()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_film_vs_tv_parameterization() {
        let resolver = LocalContentRatingResolver;
        assert_eq!(resolver.resolve_age("PG-13", false).await, Some(13));
        assert_eq!(resolver.resolve_age("TV-MA", true).await, Some(17));
        // A TV item with an MPAA label still resolves.
        assert_eq!(resolver.resolve_age("R", true).await, Some(17));
        assert_eq!(resolver.resolve_age("TV-MA", false).await, None);
    }

    #[tokio::test]
    async fn test_unknown_rating() {
        let resolver = LocalContentRatingResolver;
        assert_eq!(resolver.resolve_age("Mystery-42", false).await, None);
    }
}
