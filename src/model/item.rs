//! Metadata item model
//!
//! The central node of the metadata graph. Every library entity - movies,
//! show/season/episode trees, music release groups down to tracks, photo
//! albums, book editions, games, people and extras - is a [MetadataItem]
//! with a [ItemKind] discriminant and kind-agnostic common fields.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use time::{Date, OffsetDateTime};
use uuid::Uuid;

/// Discriminant for a metadata item. Never changes once the item is
/// persisted; the repository layer rejects kind updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    Movie = 0,
    Show = 1,
    Season = 2,
    Episode = 3,
    AlbumReleaseGroup = 4,
    AlbumRelease = 5,
    AlbumMedium = 6,
    Track = 7,
    Recording = 8,
    AudioWork = 9,
    Photo = 10,
    PhotoAlbum = 11,
    Picture = 12,
    PictureSet = 13,
    BookSeries = 14,
    Edition = 15,
    EditionItem = 16,
    LiteraryWork = 17,
    Game = 18,
    GameRelease = 19,
    Person = 20,
    Group = 21,
    Collection = 22,
    Playlist = 23,
    Trailer = 24,
    Clip = 25,
    BehindTheScenes = 26,
    DeletedScene = 27,
    Featurette = 28,
    Interview = 29,
    Scene = 30,
    ShortForm = 31,
    ExtraOther = 32,
    OptimizedVersion = 33,
}

impl ItemKind {
    /// Stable ordinal used in dedup cache keys and database rows.
    pub fn ordinal(self) -> i32 {
        self as i32
    }

    pub fn from_ordinal(n: i32) -> Option<Self> {
        use ItemKind::*;
        Some(match n {
            0 => Movie,
            1 => Show,
            2 => Season,
            3 => Episode,
            4 => AlbumReleaseGroup,
            5 => AlbumRelease,
            6 => AlbumMedium,
            7 => Track,
            8 => Recording,
            9 => AudioWork,
            10 => Photo,
            11 => PhotoAlbum,
            12 => Picture,
            13 => PictureSet,
            14 => BookSeries,
            15 => Edition,
            16 => EditionItem,
            17 => LiteraryWork,
            18 => Game,
            19 => GameRelease,
            20 => Person,
            21 => Group,
            22 => Collection,
            23 => Playlist,
            24 => Trailer,
            25 => Clip,
            26 => BehindTheScenes,
            27 => DeletedScene,
            28 => Featurette,
            29 => Interview,
            30 => Scene,
            31 => ShortForm,
            32 => ExtraOther,
            33 => OptimizedVersion,
            _ => return None,
        })
    }

    pub fn as_str(self) -> &'static str {
        use ItemKind::*;
        match self {
            Movie => "movie",
            Show => "show",
            Season => "season",
            Episode => "episode",
            AlbumReleaseGroup => "album_release_group",
            AlbumRelease => "album_release",
            AlbumMedium => "album_medium",
            Track => "track",
            Recording => "recording",
            AudioWork => "audio_work",
            Photo => "photo",
            PhotoAlbum => "photo_album",
            Picture => "picture",
            PictureSet => "picture_set",
            BookSeries => "book_series",
            Edition => "edition",
            EditionItem => "edition_item",
            LiteraryWork => "literary_work",
            Game => "game",
            GameRelease => "game_release",
            Person => "person",
            Group => "group",
            Collection => "collection",
            Playlist => "playlist",
            Trailer => "trailer",
            Clip => "clip",
            BehindTheScenes => "behind_the_scenes",
            DeletedScene => "deleted_scene",
            Featurette => "featurette",
            Interview => "interview",
            Scene => "scene",
            ShortForm => "short_form",
            ExtraOther => "extra_other",
            OptimizedVersion => "optimized_version",
        }
    }

    /// Extras must always reference an owning item via a typed relation.
    pub fn is_extra(self) -> bool {
        use ItemKind::*;
        matches!(
            self,
            Trailer
                | Clip
                | BehindTheScenes
                | DeletedScene
                | Featurette
                | Interview
                | Scene
                | ShortForm
                | ExtraOther
        )
    }

    /// Television kinds get TV content-rating semantics (TV-MA vs R).
    pub fn is_television(self) -> bool {
        matches!(self, ItemKind::Show | ItemKind::Season | ItemKind::Episode)
    }
}

impl std::fmt::Display for ItemKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed relation between two metadata items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    TrailerPromotes,
    ClipSupplements,
    BehindTheScenesOf,
    DeletedSceneOf,
    FeaturetteOf,
    InterviewOf,
    SceneOf,
    ShortFormOf,
    ExtraOtherOf,
    OptimizedVersionOf,
}

impl RelationKind {
    pub fn as_str(self) -> &'static str {
        use RelationKind::*;
        match self {
            TrailerPromotes => "trailer_promotes",
            ClipSupplements => "clip_supplements",
            BehindTheScenesOf => "behind_the_scenes_of",
            DeletedSceneOf => "deleted_scene_of",
            FeaturetteOf => "featurette_of",
            InterviewOf => "interview_of",
            SceneOf => "scene_of",
            ShortFormOf => "short_form_of",
            ExtraOtherOf => "extra_other_of",
            OptimizedVersionOf => "optimized_version_of",
        }
    }

    /// The relation an extra of the given kind uses to point at its owner.
    pub fn for_extra(kind: ItemKind) -> Option<Self> {
        use ItemKind::*;
        Some(match kind {
            Trailer => RelationKind::TrailerPromotes,
            Clip => RelationKind::ClipSupplements,
            BehindTheScenes => RelationKind::BehindTheScenesOf,
            DeletedScene => RelationKind::DeletedSceneOf,
            Featurette => RelationKind::FeaturetteOf,
            Interview => RelationKind::InterviewOf,
            Scene => RelationKind::SceneOf,
            ShortForm => RelationKind::ShortFormOf,
            ExtraOther => RelationKind::ExtraOtherOf,
            OptimizedVersion => RelationKind::OptimizedVersionOf,
            _ => return None,
        })
    }
}

/// Directed, typed edge in the metadata graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relation {
    pub kind: RelationKind,
    pub from_id: Uuid,
    pub to_id: Uuid,
}

/// External provider identifier, e.g. `("musicbrainz_recording", "b1a9...")`.
///
/// Unique per `(provider, value)` within an item; the system-wide uniqueness
/// invariant is `(kind, provider, value)` per library section.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ExternalId {
    pub provider: String,
    pub value: String,
}

impl ExternalId {
    pub fn new(provider: impl Into<String>, value: impl Into<String>) -> Self {
        Self { provider: provider.into(), value: value.into() }
    }
}

/// Admin-defined custom field value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", content = "v", rename_all = "snake_case")]
pub enum CustomValue {
    Text(String),
    Number(f64),
    Bool(bool),
    Date(Date),
}

/// One artwork slot: the stored URI plus a perceptual placeholder hash
/// computed at ingestion time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtworkRef {
    pub uri: Option<String>,
    pub placeholder_hash: Option<String>,
}

/// The three artwork slots every item carries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtworkSet {
    pub poster: ArtworkRef,
    pub backdrop: ArtworkRef,
    pub thumb: ArtworkRef,
}

/// A person or group credit attached by sidecar/embedded/remote enrichment.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Credit {
    pub name: String,
    pub role: Option<String>,
    /// `person` or `group`
    pub kind: CreditKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreditKind {
    Person,
    Group,
}

/// Release date with the derived year kept in lockstep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseDate(pub Date);

impl ReleaseDate {
    pub fn year(&self) -> i32 {
        self.0.year()
    }
}

/// The central metadata node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataItem {
    pub id: Uuid,
    pub kind: ItemKind,

    pub title: Option<String>,
    pub sort_title: Option<String>,
    pub original_title: Option<String>,
    pub summary: Option<String>,
    pub tagline: Option<String>,

    pub content_rating: Option<String>,
    /// Resolved minimum viewer age for `content_rating`.
    pub content_rating_age: Option<i32>,

    pub release_date: Option<ReleaseDate>,
    /// Derived from `release_date.year()` whenever the date is set.
    pub year: Option<i32>,

    /// Index within the parent (episode number, track number, disc slot).
    pub index_number: Option<i32>,
    /// Absolute index across the whole tree (absolute episode numbering).
    pub absolute_index: Option<i32>,

    pub duration_ms: Option<i64>,

    pub artwork: ArtworkSet,

    pub parent_id: Option<Uuid>,
    pub library_section_id: Option<Uuid>,

    pub deleted_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,

    /// Field names immune to automatic refresh overlays.
    pub locked_fields: BTreeSet<String>,
    /// Admin-defined custom fields.
    pub extra_fields: BTreeMap<String, CustomValue>,

    pub external_ids: BTreeSet<ExternalId>,
    pub genres: BTreeSet<String>,
    pub tags: BTreeSet<String>,
    pub credits: BTreeSet<Credit>,

    pub relations_out: Vec<Relation>,
    pub relations_in: Vec<Relation>,

    /// Ordered child item ids.
    pub children: Vec<Uuid>,
}

impl MetadataItem {
    /// Fresh skeleton of the given kind. Timestamps are set at persist time
    /// by the repository; a placeholder epoch keeps the struct total.
    pub fn skeleton(kind: ItemKind) -> Self {
        let epoch = OffsetDateTime::UNIX_EPOCH;
        Self {
            id: Uuid::new_v4(),
            kind,
            title: None,
            sort_title: None,
            original_title: None,
            summary: None,
            tagline: None,
            content_rating: None,
            content_rating_age: None,
            release_date: None,
            year: None,
            index_number: None,
            absolute_index: None,
            duration_ms: None,
            artwork: ArtworkSet::default(),
            parent_id: None,
            library_section_id: None,
            deleted_at: None,
            created_at: epoch,
            updated_at: epoch,
            locked_fields: BTreeSet::new(),
            extra_fields: BTreeMap::new(),
            external_ids: BTreeSet::new(),
            genres: BTreeSet::new(),
            tags: BTreeSet::new(),
            credits: BTreeSet::new(),
            relations_out: Vec::new(),
            relations_in: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Set the release date and recompute the derived year.
    pub fn set_release_date(&mut self, date: Date) {
        self.year = Some(date.year());
        self.release_date = Some(ReleaseDate(date));
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}
