//! Canonical, reversible mapping between sample timestamps and media
//! filenames. One encoding only: externally discovered files that do not
//! parse are reconstructed from modification time, never multi-format
//! guessed.

use chrono::{DateTime, NaiveDateTime, Utc};

/// Colons are not portable in filenames, so the on-disk pattern swaps them
/// for dashes at fixed positions. Millisecond precision matches
/// `Sample::new` truncation, making the mapping exactly reversible.
const MEDIA_STEM_FORMAT: &str = "%Y-%m-%dT%H-%M-%S%.3fZ";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Png,
    Jpeg,
}

impl MediaKind {
    pub fn extension(&self) -> &'static str {
        match self {
            MediaKind::Png => "png",
            MediaKind::Jpeg => "jpg",
        }
    }

    fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "png" => Some(MediaKind::Png),
            "jpg" | "jpeg" => Some(MediaKind::Jpeg),
            _ => None,
        }
    }
}

pub fn format_media_name(timestamp: DateTime<Utc>, kind: MediaKind) -> String {
    format!(
        "{}.{}",
        timestamp.format(MEDIA_STEM_FORMAT),
        kind.extension()
    )
}

/// Exact inverse of [`format_media_name`]. Returns `None` for any name not
/// produced by it.
pub fn parse_media_name(name: &str) -> Option<(DateTime<Utc>, MediaKind)> {
    let (stem, ext) = name.rsplit_once('.')?;
    let kind = MediaKind::from_extension(ext)?;
    let naive = NaiveDateTime::parse_from_str(stem, MEDIA_STEM_FORMAT).ok()?;
    Some((naive.and_utc(), kind))
}

/// True for names carrying a raster payload, parseable or not.
pub fn is_media_name(name: &str) -> bool {
    name.rsplit_once('.')
        .and_then(|(_, ext)| MediaKind::from_extension(ext))
        .is_some()
}
