//! Artwork ingestion service
//!
//! Resolves artwork URIs found in sidecar/embedded/remote patches, fetches
//! remote ones, and places the bytes under the content-addressed media tree
//! keyed by the owning item's UUID:
//!
//! `<root>/<uuid[0:2]>/<uuid>/image/<kind>.<ext>`
//!
//! The metadata URI field is rewritten to the internal `media://` form and
//! a perceptual placeholder hash is computed and persisted next to it.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use image::imageops::FilterType;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::model::ArtworkRef;

/// Artwork slot within an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtworkKind {
    Poster,
    Backdrop,
    Thumb,
}

impl ArtworkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtworkKind::Poster => "poster",
            ArtworkKind::Backdrop => "backdrop",
            ArtworkKind::Thumb => "thumb",
        }
    }
}

/// Content-addressed artwork store.
#[derive(Clone)]
pub struct ArtworkService {
    media_root: PathBuf,
    http_client: reqwest::Client,
}

impl ArtworkService {
    pub fn new(media_root: PathBuf) -> Self {
        Self { media_root, http_client: reqwest::Client::new() }
    }

    /// Directory an item's blobs live under, sharded by the first two hex
    /// chars of its UUID.
    pub fn item_dir(&self, item_id: Uuid) -> PathBuf {
        let id = item_id.to_string();
        self.media_root.join(&id[0..2]).join(&id)
    }

    /// Ingest one artwork source URI for an item. Returns the rewritten
    /// internal reference, or `None` when the source cannot be read (a
    /// recoverable skip).
    pub async fn ingest(
        &self,
        item_id: Uuid,
        kind: ArtworkKind,
        source_uri: &str,
    ) -> Result<Option<ArtworkRef>> {
        // Already-internal URIs pass through untouched.
        if source_uri.starts_with("media://") {
            return Ok(Some(ArtworkRef {
                uri: Some(source_uri.to_string()),
                placeholder_hash: None,
            }));
        }

        let bytes = match self.fetch(source_uri).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(uri = %source_uri, error = %e, "Artwork source unreadable");
                return Ok(None);
            }
        };

        let extension = detect_extension(&bytes);
        let image_dir = self.item_dir(item_id).join("image");
        tokio::fs::create_dir_all(&image_dir)
            .await
            .with_context(|| format!("create {}", image_dir.display()))?;

        let file_name = format!("{}.{}", kind.as_str(), extension);
        let target = image_dir.join(&file_name);
        tokio::fs::write(&target, &bytes)
            .await
            .with_context(|| format!("write {}", target.display()))?;

        let placeholder_hash = {
            let bytes = bytes.clone();
            tokio::task::spawn_blocking(move || placeholder_hash(&bytes)).await?
        };

        let internal =
            format!("media://{}/{}/image/{}", &item_id.to_string()[0..2], item_id, file_name);
        debug!(uri = %source_uri, internal = %internal, bytes = bytes.len(), "Artwork ingested");

        Ok(Some(ArtworkRef { uri: Some(internal), placeholder_hash }))
    }

    /// Resolve an internal `media://` URI back to a filesystem path.
    pub fn resolve_internal(&self, uri: &str) -> Option<PathBuf> {
        let rest = uri.strip_prefix("media://")?;
        if rest.contains("..") {
            return None;
        }
        Some(self.media_root.join(rest))
    }

    async fn fetch(&self, source_uri: &str) -> Result<Vec<u8>> {
        if source_uri.starts_with("http://") || source_uri.starts_with("https://") {
            let response = self
                .http_client
                .get(source_uri)
                .send()
                .await
                .context("Fetch remote artwork")?;
            if !response.status().is_success() {
                anyhow::bail!("artwork fetch returned {}", response.status());
            }
            Ok(response.bytes().await.context("Read artwork bytes")?.to_vec())
        } else {
            let path = source_uri.strip_prefix("file://").unwrap_or(source_uri);
            Ok(tokio::fs::read(Path::new(path))
                .await
                .with_context(|| format!("read {path}"))?)
        }
    }
}

/// Sniff a file extension from the image bytes; defaults to jpg.
fn detect_extension(bytes: &[u8]) -> &'static str {
    match infer::get(bytes).map(|t| t.mime_type()) {
        Some("image/png") => "png",
        Some("image/webp") => "webp",
        Some("image/gif") => "gif",
        _ => "jpg",
    }
}

/// 8x8 average-hash over the decoded image, hex encoded. Cheap to compute
/// and stable across re-encodes, which is all the placeholder needs.
pub fn placeholder_hash(bytes: &[u8]) -> Option<String> {
    let decoded = image::load_from_memory(bytes).ok()?;
    let gray = decoded.resize_exact(8, 8, FilterType::Triangle).to_luma8();
    let pixels: Vec<u8> = gray.pixels().map(|p| p.0[0]).collect();
    let mean: u32 = pixels.iter().map(|&p| p as u32).sum::<u32>() / pixels.len() as u32;

    let mut hash: u64 = 0;
    for (i, &p) in pixels.iter().enumerate() {
        if p as u32 > mean {
            hash |= 1 << i;
        }
    }
    Some(format!("{hash:016x}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_png() -> Vec<u8> {
        let mut buffer = Vec::new();
        let img = image::RgbImage::from_fn(4, 4, |x, _| {
            if x < 2 { image::Rgb([255, 255, 255]) } else { image::Rgb([0, 0, 0]) }
        });
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut std::io::Cursor::new(&mut buffer), image::ImageFormat::Png)
            .unwrap();
        buffer
    }

    #[test]
    fn test_placeholder_hash_stable() {
        let bytes = test_png();
        let a = placeholder_hash(&bytes).unwrap();
        let b = placeholder_hash(&bytes).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
    }

    #[test]
    fn test_placeholder_hash_rejects_garbage() {
        assert_eq!(placeholder_hash(b"not an image"), None);
    }

    #[tokio::test]
    async fn test_ingest_local_file_rewrites_uri() {
        let media_root = tempfile::tempdir().unwrap();
        let source_dir = tempfile::tempdir().unwrap();
        let source = source_dir.path().join("poster.png");
        std::fs::write(&source, test_png()).unwrap();

        let service = ArtworkService::new(media_root.path().to_path_buf());
        let item_id = Uuid::new_v4();
        let artwork = service
            .ingest(item_id, ArtworkKind::Poster, &source.to_string_lossy())
            .await
            .unwrap()
            .unwrap();

        let uri = artwork.uri.unwrap();
        assert!(uri.starts_with("media://"));
        assert!(artwork.placeholder_hash.is_some());

        let resolved = service.resolve_internal(&uri).unwrap();
        assert!(resolved.exists());
        assert!(resolved.ends_with(format!("{item_id}/image/poster.png")));
    }

    #[tokio::test]
    async fn test_ingest_missing_source_is_recoverable() {
        let media_root = tempfile::tempdir().unwrap();
        let service = ArtworkService::new(media_root.path().to_path_buf());
        let result = service
            .ingest(Uuid::new_v4(), ArtworkKind::Poster, "/does/not/exist.jpg")
            .await
            .unwrap();
        assert!(result.is_none());
    }
}
