//! BIF (trickplay) codec
//!
//! Roku's Base Index Frames container: a 64-byte header, a frame index of
//! `(timestamp_ms, offset)` pairs, and concatenated JPEG payloads. All
//! integers little-endian. `read_one` is O(1) in disk accesses: the header,
//! two index entries, and exactly the image byte range.
//!
//! On-disk layout: `<media-root>/<uuid[0:2]>/<uuid>/index/index.bif`
//! (`index-N.bif` for part N > 0).

use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use byteorder::{ByteOrder, LittleEndian};
use thiserror::Error;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::debug;
use uuid::Uuid;

/// `\x89BIF` as it appears on disk.
pub const BIF_MAGIC: [u8; 4] = [0x89, 0x42, 0x49, 0x46];
/// Timestamps are milliseconds.
pub const TIMESTAMP_MULTIPLIER: u32 = 1000;
/// Header is exactly 64 bytes.
pub const HEADER_SIZE: u64 = 64;
/// Each index entry is two little-endian u32s.
pub const ENTRY_SIZE: u64 = 8;
/// Sanity cap on a single thumbnail.
pub const MAX_IMAGE_SIZE: usize = 10 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum BifError {
    #[error("not a BIF file (bad magic {0:#010x})")]
    BadMagic(u32),
    #[error("corrupt index: {0}")]
    CorruptIndex(String),
    #[error("thumbnail {0} out of range")]
    IndexOutOfRange(usize),
    #[error("image exceeds {MAX_IMAGE_SIZE} bytes")]
    ImageTooLarge,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// One frame: timestamp and its JPEG bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BifFrame {
    pub timestamp_ms: u32,
    pub image: Vec<u8>,
}

/// An in-memory BIF document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bif {
    pub version: u32,
    pub frames: Vec<BifFrame>,
}

impl Bif {
    pub fn new(frames: Vec<BifFrame>) -> Self {
        Self { version: 0, frames }
    }
}

/// Content-addressed BIF storage.
#[derive(Clone)]
pub struct BifStore {
    media_root: PathBuf,
}

impl BifStore {
    pub fn new(media_root: PathBuf) -> Self {
        Self { media_root }
    }

    /// `<root>/<uuid[0:2]>/<uuid>/index/index[-N].bif`
    pub fn index_path(&self, item_id: Uuid, part_index: u32) -> PathBuf {
        let id = item_id.to_string();
        let file_name = if part_index == 0 {
            "index.bif".to_string()
        } else {
            format!("index-{part_index}.bif")
        };
        self.media_root
            .join(&id[0..2])
            .join(&id)
            .join("index")
            .join(file_name)
    }

    pub fn exists(&self, item_id: Uuid, part_index: u32) -> bool {
        self.index_path(item_id, part_index).is_file()
    }

    /// Serialize and write atomically: temp file in the same directory,
    /// then rename over the target.
    pub async fn write(&self, item_id: Uuid, part_index: u32, bif: &Bif) -> Result<(), BifError> {
        let target = self.index_path(item_id, part_index);
        let id = item_id.to_string();
        let dir = self.media_root.join(&id[0..2]).join(&id).join("index");
        tokio::fs::create_dir_all(&dir).await?;

        let bytes = encode(bif);
        let temp = dir.join(format!(".index-{}.tmp", Uuid::new_v4().simple()));
        {
            let mut file = File::create(&temp).await?;
            file.write_all(&bytes).await?;
            file.sync_all().await?;
        }
        tokio::fs::rename(&temp, &target).await?;
        debug!(path = %target.display(), frames = bif.frames.len(), "BIF written");
        Ok(())
    }

    /// Read and validate the whole file.
    pub async fn read_all(&self, item_id: Uuid, part_index: u32) -> Result<Bif, BifError> {
        let path = self.index_path(item_id, part_index);
        let bytes = tokio::fs::read(&path).await?;
        decode(&bytes)
    }

    /// Random access to one thumbnail: header, two index entries, then the
    /// exact image range.
    pub async fn read_one(
        &self,
        item_id: Uuid,
        part_index: u32,
        thumbnail_index: usize,
    ) -> Result<BifFrame, BifError> {
        let path = self.index_path(item_id, part_index);
        read_one_from(&path, thumbnail_index).await
    }
}

/// Encode to the wire format. Frames are sorted by timestamp and offsets
/// computed sequentially.
pub fn encode(bif: &Bif) -> Vec<u8> {
    let mut frames: Vec<&BifFrame> = bif.frames.iter().collect();
    frames.sort_by_key(|f| f.timestamp_ms);

    let index_len = (frames.len() as u64) * ENTRY_SIZE;
    let data_start = HEADER_SIZE + index_len;

    let total_image_len: usize = frames.iter().map(|f| f.image.len()).sum();
    let mut out = Vec::with_capacity(data_start as usize + total_image_len);

    // Header: magic, version, frame count, timestamp multiplier, zeros.
    let mut header = [0u8; HEADER_SIZE as usize];
    header[0..4].copy_from_slice(&BIF_MAGIC);
    LittleEndian::write_u32(&mut header[4..8], bif.version);
    LittleEndian::write_u32(&mut header[8..12], frames.len() as u32);
    LittleEndian::write_u32(&mut header[12..16], TIMESTAMP_MULTIPLIER);
    out.extend_from_slice(&header);

    let mut offset = data_start as u32;
    for frame in &frames {
        let mut entry = [0u8; ENTRY_SIZE as usize];
        LittleEndian::write_u32(&mut entry[0..4], frame.timestamp_ms);
        LittleEndian::write_u32(&mut entry[4..8], offset);
        out.extend_from_slice(&entry);
        offset += frame.image.len() as u32;
    }
    for frame in &frames {
        out.extend_from_slice(&frame.image);
    }
    out
}

/// Decode and validate a full document.
pub fn decode(bytes: &[u8]) -> Result<Bif, BifError> {
    if bytes.len() < HEADER_SIZE as usize {
        return Err(BifError::CorruptIndex("file shorter than header".into()));
    }
    if bytes[0..4] != BIF_MAGIC {
        return Err(BifError::BadMagic(LittleEndian::read_u32(&bytes[0..4])));
    }
    let version = LittleEndian::read_u32(&bytes[4..8]);
    let frame_count = LittleEndian::read_u32(&bytes[8..12]) as usize;

    let index_end = HEADER_SIZE as usize + frame_count * ENTRY_SIZE as usize;
    if bytes.len() < index_end {
        return Err(BifError::CorruptIndex(format!(
            "index truncated: {} frames declared, {} bytes present",
            frame_count,
            bytes.len()
        )));
    }

    let mut entries = Vec::with_capacity(frame_count);
    for i in 0..frame_count {
        let at = HEADER_SIZE as usize + i * ENTRY_SIZE as usize;
        let timestamp_ms = LittleEndian::read_u32(&bytes[at..at + 4]);
        let offset = LittleEndian::read_u32(&bytes[at + 4..at + 8]) as usize;
        entries.push((timestamp_ms, offset));
    }

    let mut frames = Vec::with_capacity(frame_count);
    for (i, (timestamp_ms, offset)) in entries.iter().enumerate() {
        let end = entries
            .get(i + 1)
            .map(|(_, next_offset)| *next_offset)
            .unwrap_or(bytes.len());
        if *offset > end || end > bytes.len() {
            return Err(BifError::CorruptIndex(format!(
                "entry {i}: offset {offset} beyond end {end}"
            )));
        }
        let image = &bytes[*offset..end];
        if image.len() > MAX_IMAGE_SIZE {
            return Err(BifError::ImageTooLarge);
        }
        frames.push(BifFrame { timestamp_ms: *timestamp_ms, image: image.to_vec() });
    }

    Ok(Bif { version, frames })
}

/// O(1) single-thumbnail read: seek to `64 + 8*index`, read the current
/// and next entries to derive the image length, then read exactly that
/// range. The last entry's image runs to end-of-file.
pub async fn read_one_from(path: &Path, thumbnail_index: usize) -> Result<BifFrame, BifError> {
    let mut file = File::open(path).await?;

    let mut header = [0u8; 16];
    file.read_exact(&mut header).await?;
    if header[0..4] != BIF_MAGIC {
        return Err(BifError::BadMagic(LittleEndian::read_u32(&header[0..4])));
    }
    let frame_count = LittleEndian::read_u32(&header[8..12]) as usize;
    if thumbnail_index >= frame_count {
        return Err(BifError::IndexOutOfRange(thumbnail_index));
    }

    file.seek(SeekFrom::Start(HEADER_SIZE + ENTRY_SIZE * thumbnail_index as u64))
        .await?;

    let is_last = thumbnail_index == frame_count - 1;
    let mut entries = [0u8; (ENTRY_SIZE * 2) as usize];
    if is_last {
        file.read_exact(&mut entries[..ENTRY_SIZE as usize]).await?;
    } else {
        file.read_exact(&mut entries).await?;
    }

    let timestamp_ms = LittleEndian::read_u32(&entries[0..4]);
    let offset = LittleEndian::read_u32(&entries[4..8]) as u64;
    let end = if is_last {
        file.seek(SeekFrom::End(0)).await?
    } else {
        LittleEndian::read_u32(&entries[12..16]) as u64
    };

    if end < offset {
        return Err(BifError::CorruptIndex(format!(
            "entry {thumbnail_index}: end {end} before offset {offset}"
        )));
    }
    let length = (end - offset) as usize;
    if length > MAX_IMAGE_SIZE {
        return Err(BifError::ImageTooLarge);
    }

    file.seek(SeekFrom::Start(offset)).await?;
    let mut image = vec![0u8; length];
    file.read_exact(&mut image).await?;

    Ok(BifFrame { timestamp_ms, image })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample_bif(count: u32) -> Bif {
        let frames = (0..count)
            .map(|i| BifFrame {
                timestamp_ms: i * 10_000,
                image: format!("jpeg-{i}").into_bytes(),
            })
            .collect();
        Bif::new(frames)
    }

    #[test]
    fn test_header_layout() {
        let bytes = encode(&sample_bif(3));
        assert_eq!(&bytes[0..4], &[0x89, 0x42, 0x49, 0x46]);
        assert_eq!(LittleEndian::read_u32(&bytes[8..12]), 3);
        assert_eq!(LittleEndian::read_u32(&bytes[12..16]), 1000);
        // Reserved header tail is zeroed.
        assert!(bytes[16..64].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_round_trip() {
        let original = sample_bif(100);
        let decoded = decode(&encode(&original)).unwrap();
        assert_eq!(decoded.frames, original.frames);
    }

    #[test]
    fn test_write_sorts_by_timestamp() {
        let bif = Bif::new(vec![
            BifFrame { timestamp_ms: 20_000, image: b"b".to_vec() },
            BifFrame { timestamp_ms: 10_000, image: b"a".to_vec() },
        ]);
        let decoded = decode(&encode(&bif)).unwrap();
        assert_eq!(decoded.frames[0].timestamp_ms, 10_000);
        assert_eq!(decoded.frames[0].image, b"a");
        assert_eq!(decoded.frames[1].timestamp_ms, 20_000);
    }

    #[test]
    fn test_bad_magic_rejected() {
        let mut bytes = encode(&sample_bif(1));
        bytes[0] = 0x00;
        assert!(matches!(decode(&bytes), Err(BifError::BadMagic(_))));
    }

    #[test]
    fn test_empty_bif() {
        let decoded = decode(&encode(&sample_bif(0))).unwrap();
        assert!(decoded.frames.is_empty());
    }

    #[tokio::test]
    async fn test_store_round_trip_and_layout() {
        let root = tempfile::tempdir().unwrap();
        let store = BifStore::new(root.path().to_path_buf());
        let item_id = Uuid::new_v4();
        let bif = sample_bif(10);

        store.write(item_id, 0, &bif).await.unwrap();
        let id = item_id.to_string();
        let expected = root
            .path()
            .join(&id[0..2])
            .join(&id)
            .join("index")
            .join("index.bif");
        assert!(expected.is_file());

        let loaded = store.read_all(item_id, 0).await.unwrap();
        assert_eq!(loaded.frames, bif.frames);

        // Secondary parts carry the part index in the name.
        store.write(item_id, 2, &bif).await.unwrap();
        assert!(store.exists(item_id, 2));
        assert!(store
            .index_path(item_id, 2)
            .ends_with(format!("{id}/index/index-2.bif")));
    }

    #[tokio::test]
    async fn test_read_one_matches_read_all() {
        let root = tempfile::tempdir().unwrap();
        let store = BifStore::new(root.path().to_path_buf());
        let item_id = Uuid::new_v4();
        let bif = sample_bif(50);
        store.write(item_id, 0, &bif).await.unwrap();

        let all = store.read_all(item_id, 0).await.unwrap();
        for index in [0usize, 1, 25, 49] {
            let one = store.read_one(item_id, 0, index).await.unwrap();
            assert_eq!(one, all.frames[index]);
        }

        // Out of range is an error, not a panic.
        assert!(matches!(
            store.read_one(item_id, 0, 50).await,
            Err(BifError::IndexOutOfRange(50))
        ));
    }
}
