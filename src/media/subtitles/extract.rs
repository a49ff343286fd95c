//! FFmpeg-assisted subtitle extraction
//!
//! Image-based subtitle streams (and embedded text streams) are pulled out
//! of the container with `-map 0:s:{index} -c:s {codec}` into a temp file
//! before text conversion. Temp files are removed on every exit path.

use std::process::Stdio;

use anyhow::{Context, Result};
use tempfile::Builder;
use tokio::process::Command;
use tracing::debug;

/// Extract subtitle stream `stream_index` (subtitle-relative) from a media
/// file, re-encoding to `target_codec` (e.g. `srt`, `webvtt`). Returns the
/// extracted text.
pub async fn extract_subtitle_stream(
    ffmpeg_path: &str,
    media_path: &str,
    stream_index: usize,
    target_codec: &str,
) -> Result<String> {
    let extension = match target_codec {
        "webvtt" | "vtt" => "vtt",
        "ass" | "ssa" => "ass",
        _ => "srt",
    };
    // NamedTempFile unlinks on drop, which covers every exit path below.
    let temp = Builder::new()
        .prefix("sub-extract-")
        .suffix(&format!(".{extension}"))
        .tempfile()
        .context("create temp file")?;
    let temp_path = temp.path().to_string_lossy().to_string();

    debug!(
        media = media_path,
        stream = stream_index,
        codec = target_codec,
        "Extracting subtitle stream"
    );

    let output = Command::new(ffmpeg_path)
        .arg("-y")
        .args(["-i", media_path])
        .args(["-map", &format!("0:s:{stream_index}")])
        .args(["-c:s", target_codec])
        .arg(&temp_path)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .output()
        .await
        .context("spawn ffmpeg for subtitle extraction")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        anyhow::bail!(
            "subtitle extraction failed for '{media_path}' stream {stream_index}: {}",
            stderr.trim()
        );
    }

    let text = tokio::fs::read_to_string(temp.path())
        .await
        .context("read extracted subtitle")?;
    Ok(text)
}

/// Extract an image-based subtitle stream verbatim (`-c:s copy`) into a
/// container the client can render. Returns the raw bytes.
pub async fn extract_subtitle_raw(
    ffmpeg_path: &str,
    media_path: &str,
    stream_index: usize,
    codec: &str,
) -> Result<Vec<u8>> {
    // Matroska can hold any of the image subtitle codecs.
    let temp = Builder::new()
        .prefix("sub-extract-")
        .suffix(".mks")
        .tempfile()
        .context("create temp file")?;
    let temp_path = temp.path().to_string_lossy().to_string();

    debug!(media = media_path, stream = stream_index, codec, "Extracting image subtitle stream");

    let output = Command::new(ffmpeg_path)
        .arg("-y")
        .args(["-i", media_path])
        .args(["-map", &format!("0:s:{stream_index}")])
        .args(["-c:s", "copy"])
        .arg(&temp_path)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .output()
        .await
        .context("spawn ffmpeg for subtitle extraction")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        anyhow::bail!(
            "image subtitle extraction failed for '{media_path}' stream {stream_index}: {}",
            stderr.trim()
        );
    }

    let bytes = tokio::fs::read(temp.path())
        .await
        .context("read extracted subtitle")?;
    Ok(bytes)
}
