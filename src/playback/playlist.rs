//! Playlist generator
//!
//! Server-owned cursors with shuffle and repeat. A seed (library filter,
//! smart definition, or explicit id list) produces a deterministic total
//! ordering; shuffle applies a stable permutation derived from the
//! persisted shuffle state, keeping cohorts (e.g. an album's tracks)
//! adjacent. Items materialize in chunks and expire with their session.

use anyhow::{Context, Result};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use time::{Duration, OffsetDateTime};
use tracing::{debug, info};
use uuid::Uuid;

use crate::db::Database;
use crate::model::{
    ItemKind, PlaylistGenerator, PlaylistGeneratorItem, PlaylistSeed,
};

/// Default materialization chunk size.
pub const DEFAULT_CHUNK_SIZE: i64 = 20;

/// A served chunk of the playlist.
#[derive(Debug)]
pub struct PlaylistChunk {
    pub items: Vec<PlaylistGeneratorItem>,
    pub total_count: i64,
    pub generator_id: String,
}

/// One ordered entry before materialization.
#[derive(Debug, Clone)]
struct OrderedEntry {
    metadata_item_id: Uuid,
    cohort: Option<String>,
}

pub struct PlaylistService {
    db: Database,
    ttl: Duration,
    default_chunk_size: i64,
}

impl PlaylistService {
    pub fn new(db: Database, ttl: Duration) -> Self {
        Self { db, ttl, default_chunk_size: DEFAULT_CHUNK_SIZE }
    }

    pub fn with_chunk_size(db: Database, ttl: Duration, default_chunk_size: i64) -> Self {
        Self { db, ttl, default_chunk_size: default_chunk_size.max(1) }
    }

    /// Create a generator for a session. The shuffle state is minted here
    /// and persisted so reopens reproduce the permutation.
    pub async fn create(
        &self,
        session_id: Uuid,
        seed: PlaylistSeed,
        shuffle: bool,
        repeat: bool,
        chunk_size: Option<i64>,
    ) -> Result<PlaylistGenerator> {
        let shuffle_state = shuffle.then(|| {
            let seed_value: u64 = rand::thread_rng().gen();
            BASE64.encode(seed_value.to_le_bytes())
        });

        let generator = PlaylistGenerator {
            id: Uuid::new_v4(),
            public_id: Uuid::new_v4().simple().to_string(),
            session_id,
            seed,
            cursor: 0,
            repeat,
            shuffle,
            shuffle_state,
            chunk_size: chunk_size.unwrap_or(self.default_chunk_size),
            total_count: None,
            expires_at: OffsetDateTime::now_utc() + self.ttl,
        };
        self.db.playlists().create(&generator).await?;

        // Record the total up front so exhaustion checks don't need a
        // re-evaluation.
        let ordering = self.evaluate_ordering(&generator).await?;
        self.db
            .playlists()
            .update_shuffle_state(
                generator.id,
                generator.shuffle_state.as_deref(),
                Some(ordering.len() as i64),
            )
            .await?;

        info!(
            generator = %generator.public_id,
            session = %session_id,
            total = ordering.len(),
            shuffle,
            repeat,
            "Playlist generator created"
        );

        let mut created = generator;
        created.total_count = Some(ordering.len() as i64);
        Ok(created)
    }

    /// Materialize and return `[start, start+limit)`.
    pub async fn chunk(&self, public_id: &str, start: i64, limit: i64) -> Result<PlaylistChunk> {
        let generator = self
            .db
            .playlists()
            .get_by_public_id(public_id)
            .await?
            .context("generator not found")?;

        let ordering = self.evaluate_ordering(&generator).await?;
        let total = ordering.len() as i64;

        let start = start.clamp(0, total);
        let end = (start + limit.max(0)).min(total);

        self.materialize_range(&generator, &ordering, start, end).await?;
        let items = self.db.playlists().items_range(generator.id, start, end - start).await?;

        Ok(PlaylistChunk { items, total_count: total, generator_id: generator.public_id })
    }

    /// Move the cursor to an absolute index.
    pub async fn jump_to(&self, public_id: &str, index: i64) -> Result<()> {
        let generator = self
            .db
            .playlists()
            .get_by_public_id(public_id)
            .await?
            .context("generator not found")?;
        let total = generator.total_count.unwrap_or(0);
        let clamped = if total > 0 { index.clamp(0, total - 1) } else { 0 };
        self.db.playlists().update_cursor(generator.id, clamped).await?;
        Ok(())
    }

    /// The item under the cursor, advancing it. `repeat` wraps modulo the
    /// total; otherwise the generator exhausts after `total` calls.
    pub async fn next(&self, public_id: &str) -> Result<Option<PlaylistGeneratorItem>> {
        let generator = self
            .db
            .playlists()
            .get_by_public_id(public_id)
            .await?
            .context("generator not found")?;

        let ordering = self.evaluate_ordering(&generator).await?;
        let total = ordering.len() as i64;
        if total == 0 {
            return Ok(None);
        }

        let cursor = generator.cursor;
        let effective = if generator.repeat { cursor % total } else { cursor };
        if !generator.repeat && effective >= total {
            debug!(generator = %public_id, "Generator exhausted");
            return Ok(None);
        }

        self.materialize_range(&generator, &ordering, effective, effective + 1).await?;
        let mut items = self.db.playlists().items_range(generator.id, effective, 1).await?;
        let Some(item) = items.pop() else {
            return Ok(None);
        };

        self.db.playlists().mark_served(generator.id, effective).await?;
        self.db.playlists().update_cursor(generator.id, cursor + 1).await?;
        Ok(Some(item))
    }

    /// Extend expiry on session heartbeat.
    pub async fn heartbeat(&self, session_id: Uuid) -> Result<()> {
        if let Some(generator) = self.db.playlists().get_by_session(session_id).await? {
            self.db.playlists().extend_expiry(generator.id, self.ttl).await?;
        }
        Ok(())
    }

    /// Garbage-collect expired generators. Returns how many were removed.
    pub async fn gc_expired(&self) -> Result<usize> {
        let expired = self.db.playlists().list_expired(OffsetDateTime::now_utc()).await?;
        let count = expired.len();
        for generator in expired {
            debug!(generator = %generator.public_id, "Expired generator removed");
            self.db.playlists().delete(generator.id).await?;
        }
        Ok(count)
    }

    /// Evaluate the seed into the deterministic total ordering, applying
    /// the stable shuffle when enabled.
    async fn evaluate_ordering(&self, generator: &PlaylistGenerator) -> Result<Vec<OrderedEntry>> {
        let mut entries = match &generator.seed {
            PlaylistSeed::LibraryFilter { library_section_id, item_kind } => {
                let kind = kind_from_str(item_kind)
                    .with_context(|| format!("unknown item kind '{item_kind}'"))?;
                let items = self
                    .db
                    .metadata_items()
                    .list_by_section(*library_section_id, Some(kind), false)
                    .await?;
                items
                    .into_iter()
                    .map(|item| OrderedEntry {
                        metadata_item_id: item.id,
                        cohort: cohort_for(kind, item.parent_id),
                    })
                    .collect::<Vec<_>>()
            }
            PlaylistSeed::Smart { definition } => {
                let section = definition
                    .get("library_section_id")
                    .and_then(|v| v.as_str())
                    .and_then(|s| Uuid::parse_str(s).ok())
                    .context("smart seed missing library_section_id")?;
                let kind = definition
                    .get("item_kind")
                    .and_then(|v| v.as_str())
                    .and_then(kind_from_str)
                    .context("smart seed missing item_kind")?;
                let genre = definition.get("genre").and_then(|v| v.as_str());
                let items = self
                    .db
                    .metadata_items()
                    .list_by_section(section, Some(kind), false)
                    .await?;
                items
                    .into_iter()
                    .filter(|item| genre.is_none_or(|g| item.genres.contains(g)))
                    .map(|item| OrderedEntry {
                        metadata_item_id: item.id,
                        cohort: cohort_for(kind, item.parent_id),
                    })
                    .collect()
            }
            PlaylistSeed::Explicit { item_ids } => item_ids
                .iter()
                .map(|id| OrderedEntry { metadata_item_id: *id, cohort: None })
                .collect(),
        };

        if generator.shuffle {
            if let Some(state) = &generator.shuffle_state {
                entries = shuffle_with_cohorts(entries, state);
            }
        }
        Ok(entries)
    }

    async fn materialize_range(
        &self,
        generator: &PlaylistGenerator,
        ordering: &[OrderedEntry],
        start: i64,
        end: i64,
    ) -> Result<()> {
        // Chunk-align the materialization window.
        let chunk = generator.chunk_size.max(1);
        let aligned_start = (start / chunk) * chunk;
        let end_div_ceil = {
            let d = end / chunk;
            let r = end % chunk;
            if (r > 0 && chunk > 0) || (r < 0 && chunk < 0) {
                d + 1
            } else {
                d
            }
        };
        let aligned_end = end_div_ceil * chunk;

        let mut rows = Vec::new();
        for index in aligned_start..aligned_end.min(ordering.len() as i64) {
            let entry = &ordering[index as usize];
            // Pin the primary rendition at materialization time.
            let media = self
                .db
                .media()
                .find_by_metadata_item(entry.metadata_item_id)
                .await?;
            let media_item = media.first();
            rows.push(PlaylistGeneratorItem {
                generator_id: generator.id,
                metadata_item_id: entry.metadata_item_id,
                media_item_id: media_item.map(|m| m.id),
                media_part_id: media_item.and_then(|m| m.parts.first()).map(|p| p.id),
                sort_order: index,
                served: false,
                cohort: entry.cohort.clone(),
            });
        }
        self.db.playlists().insert_items(&rows).await
    }
}

fn cohort_for(kind: ItemKind, parent_id: Option<Uuid>) -> Option<String> {
    // Keep an album's tracks together under shuffle.
    if kind == ItemKind::Track {
        parent_id.map(|id| id.to_string())
    } else {
        None
    }
}

fn kind_from_str(s: &str) -> Option<ItemKind> {
    (0..34)
        .filter_map(ItemKind::from_ordinal)
        .find(|k| k.as_str() == s)
}

/// Stable permutation: cohorts stay adjacent (in original internal order);
/// the group order is shuffled by an RNG seeded from the persisted state.
fn shuffle_with_cohorts(entries: Vec<OrderedEntry>, shuffle_state: &str) -> Vec<OrderedEntry> {
    let seed = BASE64
        .decode(shuffle_state)
        .ok()
        .and_then(|bytes| bytes.try_into().ok())
        .map(u64::from_le_bytes)
        .unwrap_or(0);
    let mut rng = StdRng::seed_from_u64(seed);

    // Group consecutive same-cohort runs; singletons are their own group.
    let mut groups: Vec<Vec<OrderedEntry>> = Vec::new();
    for entry in entries {
        match groups.last_mut() {
            Some(group)
                if group
                    .last()
                    .is_some_and(|last| last.cohort.is_some() && last.cohort == entry.cohort) =>
            {
                group.push(entry);
            }
            _ => groups.push(vec![entry]),
        }
    }
    groups.shuffle(&mut rng);
    groups.into_iter().flatten().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::CreateLibrarySection;
    use crate::model::{LibraryKind, LibrarySettings, MetadataItem};

    async fn setup() -> (Database, Uuid, Vec<Uuid>) {
        let db = Database::connect_in_memory().await.unwrap();
        db.migrate().await.unwrap();
        let section = db
            .library_sections()
            .create(CreateLibrarySection {
                name: "Movies".into(),
                kind: LibraryKind::Movies,
                root_paths: vec![],
                settings: LibrarySettings::default(),
            })
            .await
            .unwrap();

        let mut ids = Vec::new();
        for title in ["Alpha", "Beta", "Gamma", "Delta", "Epsilon"] {
            let mut item = MetadataItem::skeleton(ItemKind::Movie);
            item.title = Some(title.to_string());
            item.sort_title = Some(title.to_string());
            item.library_section_id = Some(section.id);
            let inserted = db.metadata_items().insert(&item).await.unwrap();
            ids.push(inserted.id);
        }
        (db, section.id, ids)
    }

    async fn session_for(db: &Database) -> Uuid {
        use crate::model::capability::{CapabilityProfile, SubtitleSupport};
        let profile = CapabilityProfile {
            version: 1,
            containers: vec!["mp4".into()],
            video: vec![],
            audio: vec![],
            subtitles: SubtitleSupport::default(),
            accepts_hdr: false,
            max_total_bitrate: None,
        };
        db.playback_sessions()
            .create("user-session", &profile, Duration::days(1))
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn test_chunking_and_total() {
        let (db, section, _) = setup().await;
        let service = PlaylistService::new(db.clone(), Duration::days(1));
        let session = session_for(&db).await;

        let generator = service
            .create(
                session,
                PlaylistSeed::LibraryFilter {
                    library_section_id: section,
                    item_kind: "movie".into(),
                },
                false,
                false,
                Some(2),
            )
            .await
            .unwrap();

        let chunk = service.chunk(&generator.public_id, 0, 2).await.unwrap();
        assert_eq!(chunk.total_count, 5);
        assert_eq!(chunk.items.len(), 2);
        assert_eq!(chunk.items[0].sort_order, 0);

        let tail = service.chunk(&generator.public_id, 4, 2).await.unwrap();
        assert_eq!(tail.items.len(), 1);
    }

    #[tokio::test]
    async fn test_next_exhausts_exactly_once_without_repeat() {
        let (db, section, _) = setup().await;
        let service = PlaylistService::new(db.clone(), Duration::days(1));
        let session = session_for(&db).await;

        let generator = service
            .create(
                session,
                PlaylistSeed::LibraryFilter {
                    library_section_id: section,
                    item_kind: "movie".into(),
                },
                false,
                false,
                None,
            )
            .await
            .unwrap();

        let mut served = Vec::new();
        while let Some(item) = service.next(&generator.public_id).await.unwrap() {
            served.push(item.metadata_item_id);
        }
        assert_eq!(served.len(), 5);
        // No duplicates on a single pass.
        let unique: std::collections::HashSet<_> = served.iter().collect();
        assert_eq!(unique.len(), 5);

        // Exhausted stays exhausted.
        assert!(service.next(&generator.public_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_repeat_wraps_in_cycles() {
        let (db, section, _) = setup().await;
        let service = PlaylistService::new(db.clone(), Duration::days(1));
        let session = session_for(&db).await;

        let generator = service
            .create(
                session,
                PlaylistSeed::LibraryFilter {
                    library_section_id: section,
                    item_kind: "movie".into(),
                },
                false,
                true,
                None,
            )
            .await
            .unwrap();

        let mut first_cycle = Vec::new();
        for _ in 0..5 {
            first_cycle.push(service.next(&generator.public_id).await.unwrap().unwrap().metadata_item_id);
        }
        let mut second_cycle = Vec::new();
        for _ in 0..5 {
            second_cycle.push(service.next(&generator.public_id).await.unwrap().unwrap().metadata_item_id);
        }
        assert_eq!(first_cycle, second_cycle);
    }

    #[tokio::test]
    async fn test_shuffle_stable_across_reopens() {
        let (db, section, _) = setup().await;
        let service = PlaylistService::new(db.clone(), Duration::days(1));
        let session = session_for(&db).await;

        let generator = service
            .create(
                session,
                PlaylistSeed::LibraryFilter {
                    library_section_id: section,
                    item_kind: "movie".into(),
                },
                true,
                false,
                None,
            )
            .await
            .unwrap();

        let first = service.chunk(&generator.public_id, 0, 5).await.unwrap();
        let second = service.chunk(&generator.public_id, 0, 5).await.unwrap();
        let order_a: Vec<_> = first.items.iter().map(|i| i.metadata_item_id).collect();
        let order_b: Vec<_> = second.items.iter().map(|i| i.metadata_item_id).collect();
        assert_eq!(order_a, order_b);
    }

    #[test]
    fn test_cohorts_stay_adjacent_under_shuffle() {
        let album_a = Uuid::new_v4().to_string();
        let album_b = Uuid::new_v4().to_string();
        let mut entries = Vec::new();
        for cohort in [&album_a, &album_a, &album_a, &album_b, &album_b] {
            entries.push(OrderedEntry {
                metadata_item_id: Uuid::new_v4(),
                cohort: Some(cohort.clone()),
            });
        }
        let state = BASE64.encode(42u64.to_le_bytes());
        let shuffled = shuffle_with_cohorts(entries, &state);

        // Each cohort occupies one contiguous run.
        let mut runs = Vec::new();
        for entry in &shuffled {
            if runs.last() != Some(&entry.cohort) {
                runs.push(entry.cohort.clone());
            }
        }
        assert_eq!(runs.len(), 2);
    }
}
