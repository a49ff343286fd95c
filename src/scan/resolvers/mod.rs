//! Item resolvers
//!
//! A resolver classifies a filesystem entry into a typed metadata skeleton
//! for its library kind. Resolvers are tried in ascending priority order;
//! the first non-null result wins. A resolver must return `None` for any
//! library kind it does not serve.

pub mod extras;
pub mod filename;
pub mod movie;
pub mod music;
pub mod photo;
pub mod tv;

use std::path::PathBuf;

use uuid::Uuid;

use crate::model::LibraryKind;

use super::probe::Entry;
use super::work_item::ResolvedItem;

/// Everything a resolver may consult about an entry.
#[derive(Debug)]
pub struct ResolveArgs<'a> {
    pub entry: &'a Entry,
    pub library_kind: LibraryKind,
    pub section_location_id: Uuid,
    pub library_section_id: Uuid,
    /// Direct children (directories only).
    pub children: Option<&'a [Entry]>,
    pub is_root: bool,
    pub ancestors: &'a [PathBuf],
    /// The resolved item of the nearest resolved ancestor directory.
    pub resolved_parent: Option<&'a ResolvedItem>,
    /// Entries sharing the parent directory, including this one.
    pub siblings: &'a [Entry],
}

/// One entry classifier.
pub trait ItemResolver: Send + Sync {
    fn name(&self) -> &'static str;
    /// Ascending order; lower runs first.
    fn priority(&self) -> i32;
    fn resolve(&self, args: &ResolveArgs<'_>) -> Option<ResolvedItem>;
}

/// Video file extensions eligible for movie/episode/extra resolution.
pub const VIDEO_EXTENSIONS: &[&str] = &[
    "mkv", "mp4", "avi", "m4v", "mov", "wmv", "flv", "webm", "mpeg", "mpg", "ts", "m2ts",
];

/// Audio file extensions eligible for track resolution.
pub const AUDIO_EXTENSIONS: &[&str] =
    &["flac", "mp3", "m4a", "aac", "ogg", "opus", "wav", "wma", "alac", "aiff", "ape"];

/// Image file extensions eligible for photo/picture resolution.
pub const IMAGE_EXTENSIONS: &[&str] =
    &["jpg", "jpeg", "png", "webp", "gif", "bmp", "tif", "tiff", "heic", "avif"];

pub fn is_video(entry: &Entry) -> bool {
    !entry.is_dir
        && entry
            .ext
            .as_deref()
            .is_some_and(|e| VIDEO_EXTENSIONS.contains(&e))
}

pub fn is_audio(entry: &Entry) -> bool {
    !entry.is_dir
        && entry
            .ext
            .as_deref()
            .is_some_and(|e| AUDIO_EXTENSIONS.contains(&e))
}

pub fn is_image(entry: &Entry) -> bool {
    !entry.is_dir
        && entry
            .ext
            .as_deref()
            .is_some_and(|e| IMAGE_EXTENSIONS.contains(&e))
}

/// The default resolver set in priority order, as registered at startup.
pub fn default_resolvers() -> Vec<std::sync::Arc<dyn ItemResolver>> {
    vec![
        std::sync::Arc::new(extras::ExtrasResolver),
        std::sync::Arc::new(movie::MovieResolver),
        std::sync::Arc::new(tv::TvResolver),
        std::sync::Arc::new(music::MusicResolver),
        std::sync::Arc::new(photo::PhotoResolver),
    ]
}
