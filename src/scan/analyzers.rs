//! Built-in file analyzers
//!
//! Deep per-part analysis registered against playable item kinds: stream
//! extraction through ffprobe, and a cheap content fingerprint for
//! duplicate detection.

use anyhow::Result;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::debug;

use crate::media::ffprobe::FfprobeService;
use crate::model::{ItemKind, MediaPart};

use super::registry::FileAnalyzer;

/// Stream extraction for video and audio parts.
pub struct FfprobeAnalyzer {
    ffprobe: FfprobeService,
}

impl FfprobeAnalyzer {
    pub fn new(ffprobe: FfprobeService) -> Self {
        Self { ffprobe }
    }
}

#[async_trait]
impl FileAnalyzer for FfprobeAnalyzer {
    fn name(&self) -> &'static str {
        "ffprobe-streams"
    }

    fn supports(&self, kind: ItemKind) -> bool {
        matches!(
            kind,
            ItemKind::Movie
                | ItemKind::Episode
                | ItemKind::Track
                | ItemKind::OptimizedVersion
        ) || kind.is_extra()
    }

    async fn analyze(&self, part: &mut MediaPart) -> Result<()> {
        // Disc folders and missing files are skipped, not failed.
        let path = std::path::Path::new(&part.file_path);
        if !path.is_file() {
            debug!(part = %part.file_path, "Not a regular file, skipping probe");
            return Ok(());
        }
        self.ffprobe.analyze_part(part).await
    }
}

/// How much of each end of the file goes into the fingerprint.
const HASH_WINDOW: usize = 64 * 1024;

/// Content fingerprint over the first and last 64 KiB plus the size.
/// Enough to spot duplicates and renames without reading whole files.
pub struct PartHashAnalyzer;

#[async_trait]
impl FileAnalyzer for PartHashAnalyzer {
    fn name(&self) -> &'static str {
        "part-hash"
    }

    fn supports(&self, kind: ItemKind) -> bool {
        !matches!(kind, ItemKind::Person | ItemKind::Group | ItemKind::Collection)
    }

    async fn analyze(&self, part: &mut MediaPart) -> Result<()> {
        let path = std::path::Path::new(&part.file_path);
        if !path.is_file() {
            return Ok(());
        }

        let mut file = tokio::fs::File::open(path).await?;
        let len = file.metadata().await?.len();

        let mut hasher = Sha256::new();
        hasher.update(len.to_le_bytes());

        let mut head = vec![0u8; HASH_WINDOW.min(len as usize)];
        file.read_exact(&mut head).await?;
        hasher.update(&head);

        if len as usize > HASH_WINDOW * 2 {
            file.seek(std::io::SeekFrom::End(-(HASH_WINDOW as i64))).await?;
            let mut tail = vec![0u8; HASH_WINDOW];
            file.read_exact(&mut tail).await?;
            hasher.update(&tail);
        }

        part.hash = Some(format!("{:x}", hasher.finalize()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn part_for(path: &std::path::Path) -> MediaPart {
        MediaPart {
            id: Uuid::new_v4(),
            media_item_id: Uuid::new_v4(),
            part_index: 0,
            file_path: path.to_string_lossy().to_string(),
            size_bytes: 0,
            modified_at: None,
            hash: None,
            duration_ms: None,
            container: None,
            streams: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_part_hash_stable_and_content_sensitive() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.mkv");
        let b = dir.path().join("b.mkv");
        std::fs::write(&a, b"same contents").unwrap();
        std::fs::write(&b, b"other contents").unwrap();

        let mut part_a = part_for(&a);
        let mut part_a_again = part_for(&a);
        let mut part_b = part_for(&b);
        PartHashAnalyzer.analyze(&mut part_a).await.unwrap();
        PartHashAnalyzer.analyze(&mut part_a_again).await.unwrap();
        PartHashAnalyzer.analyze(&mut part_b).await.unwrap();

        assert_eq!(part_a.hash, part_a_again.hash);
        assert_ne!(part_a.hash, part_b.hash);
    }
}
