//! Metadata deduplication
//!
//! Global identity by external provider ids. A per-scan in-memory cache
//! keyed `{kind_ordinal}:{provider}:{value}` fronts the database lookup;
//! pending pairs for not-yet-persisted items are queued and flushed into
//! the cache when the insert completes. Two items never merge across
//! library sections unless the caller passes the same section id.

use std::collections::HashMap;

use anyhow::Result;
use tracing::debug;
use uuid::Uuid;

use crate::db::MetadataItemRepository;
use crate::model::{ExternalId, ItemKind, MetadataItem};

/// Outcome of an identity lookup.
#[derive(Debug)]
pub enum FindOrCreate {
    /// An item with this identity already exists.
    Existing(Uuid),
    /// The factory ran; the caller must persist the returned item and then
    /// call [MetadataDeduplication::confirm_persisted].
    Created(Box<MetadataItem>),
}

/// Per-scan dedup state. Private to one scan; never shared across scans.
pub struct MetadataDeduplication {
    repo: MetadataItemRepository,
    cache: HashMap<String, Uuid>,
    /// `(cache_key, item_id)` pairs awaiting insert confirmation.
    pending: HashMap<Uuid, Vec<String>>,
}

fn cache_key(kind: ItemKind, provider: &str, value: &str) -> String {
    format!("{}:{}:{}", kind.ordinal(), provider, value)
}

impl MetadataDeduplication {
    pub fn new(repo: MetadataItemRepository) -> Self {
        Self { repo, cache: HashMap::new(), pending: HashMap::new() }
    }

    /// Single-id variant of the identity protocol.
    pub async fn find_or_create_by_external_id<F>(
        &mut self,
        kind: ItemKind,
        provider: &str,
        value: &str,
        library_section_id: Option<Uuid>,
        factory: F,
    ) -> Result<FindOrCreate>
    where
        F: FnOnce() -> MetadataItem,
    {
        self.find_or_create_by_external_ids(
            kind,
            &[ExternalId::new(provider, value)],
            library_section_id,
            factory,
        )
        .await
    }

    /// Multi-id variant: any matching id claims the existing item; a miss on
    /// all ids runs the factory and queues every pair against the new item.
    pub async fn find_or_create_by_external_ids<F>(
        &mut self,
        kind: ItemKind,
        ids: &[ExternalId],
        library_section_id: Option<Uuid>,
        factory: F,
    ) -> Result<FindOrCreate>
    where
        F: FnOnce() -> MetadataItem,
    {
        for ext in ids {
            let key = cache_key(kind, &ext.provider, &ext.value);
            if let Some(id) = self.cache.get(&key) {
                return Ok(FindOrCreate::Existing(*id));
            }
        }

        for ext in ids {
            if let Some(id) = self
                .repo
                .find_by_external_id(library_section_id, kind, &ext.provider, &ext.value)
                .await?
            {
                for ext in ids {
                    self.cache
                        .insert(cache_key(kind, &ext.provider, &ext.value), id);
                }
                return Ok(FindOrCreate::Existing(id));
            }
        }

        let mut item = factory();
        debug_assert_eq!(item.kind, kind, "factory must produce the looked-up kind");
        item.library_section_id = library_section_id;
        item.external_ids.extend(ids.iter().cloned());

        let keys: Vec<String> = ids
            .iter()
            .map(|ext| cache_key(kind, &ext.provider, &ext.value))
            .collect();
        self.pending.insert(item.id, keys);
        debug!(item_id = %item.id, kind = %kind, ids = ids.len(), "Queued new item identity");

        Ok(FindOrCreate::Created(Box::new(item)))
    }

    /// Flush the pending identity pairs of a now-persisted item into the
    /// cache.
    pub fn confirm_persisted(&mut self, item_id: Uuid) {
        if let Some(keys) = self.pending.remove(&item_id) {
            for key in keys {
                self.cache.insert(key, item_id);
            }
        }
    }

    /// Drop the queued pairs of an item whose insert failed.
    pub fn abandon(&mut self, item_id: Uuid) {
        self.pending.remove(&item_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    async fn repo() -> MetadataItemRepository {
        let db = Database::connect_in_memory().await.unwrap();
        db.migrate().await.unwrap();
        db.metadata_items()
    }

    fn factory(kind: ItemKind, title: &str) -> impl FnOnce() -> MetadataItem + '_ {
        move || {
            let mut item = MetadataItem::skeleton(kind);
            item.title = Some(title.to_string());
            item
        }
    }

    #[tokio::test]
    async fn test_cache_hit_after_confirm() {
        let repo = repo().await;
        let section = Uuid::new_v4();
        let mut dedup = MetadataDeduplication::new(repo);

        let first = dedup
            .find_or_create_by_external_id(
                ItemKind::Movie,
                "imdb",
                "tt001",
                Some(section),
                factory(ItemKind::Movie, "A"),
            )
            .await
            .unwrap();
        let FindOrCreate::Created(item) = first else {
            panic!("expected creation")
        };
        let id = item.id;
        dedup.confirm_persisted(id);

        let second = dedup
            .find_or_create_by_external_id(
                ItemKind::Movie,
                "imdb",
                "tt001",
                Some(section),
                factory(ItemKind::Movie, "B"),
            )
            .await
            .unwrap();
        match second {
            FindOrCreate::Existing(found) => assert_eq!(found, id),
            FindOrCreate::Created(_) => panic!("expected cache hit"),
        }
    }

    #[tokio::test]
    async fn test_database_lookup_across_cache_instances() {
        let db = Database::connect_in_memory().await.unwrap();
        db.migrate().await.unwrap();
        let section = Uuid::new_v4();

        // First "scan" persists an item with an external id.
        let mut dedup = MetadataDeduplication::new(db.metadata_items());
        let created = dedup
            .find_or_create_by_external_id(
                ItemKind::Movie,
                "imdb",
                "tt002",
                Some(section),
                factory(ItemKind::Movie, "A"),
            )
            .await
            .unwrap();
        let FindOrCreate::Created(item) = created else {
            panic!("expected creation")
        };
        let id = item.id;
        db.metadata_items().insert(&item).await.unwrap();
        dedup.confirm_persisted(id);

        // A fresh scan's cache still finds it through the store.
        let mut fresh = MetadataDeduplication::new(db.metadata_items());
        let found = fresh
            .find_or_create_by_external_id(
                ItemKind::Movie,
                "imdb",
                "tt002",
                Some(section),
                factory(ItemKind::Movie, "B"),
            )
            .await
            .unwrap();
        match found {
            FindOrCreate::Existing(existing) => assert_eq!(existing, id),
            FindOrCreate::Created(_) => panic!("expected store hit"),
        }
    }

    #[tokio::test]
    async fn test_sections_do_not_merge() {
        let db = Database::connect_in_memory().await.unwrap();
        db.migrate().await.unwrap();

        let section_a = Uuid::new_v4();
        let section_b = Uuid::new_v4();

        let mut dedup = MetadataDeduplication::new(db.metadata_items());
        let created = dedup
            .find_or_create_by_external_id(
                ItemKind::Movie,
                "imdb",
                "tt003",
                Some(section_a),
                factory(ItemKind::Movie, "A"),
            )
            .await
            .unwrap();
        let FindOrCreate::Created(item) = created else {
            panic!("expected creation")
        };
        db.metadata_items().insert(&item).await.unwrap();
        dedup.confirm_persisted(item.id);

        // Same identity in a different section creates a second item.
        let mut other = MetadataDeduplication::new(db.metadata_items());
        let result = other
            .find_or_create_by_external_id(
                ItemKind::Movie,
                "imdb",
                "tt003",
                Some(section_b),
                factory(ItemKind::Movie, "B"),
            )
            .await
            .unwrap();
        assert!(matches!(result, FindOrCreate::Created(_)));
    }
}
