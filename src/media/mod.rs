//! Media format services: ffprobe analysis, trickplay (BIF), subtitles.

pub mod bif;
pub mod ffprobe;
pub mod subtitles;

pub use bif::{Bif, BifFrame, BifStore};
pub use ffprobe::FfprobeService;
