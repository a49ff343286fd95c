//! Filename parsing helpers
//!
//! Extraction of titles, years, stack part indices, episode markers, disc
//! numbers and extra-type suffixes from on-disk names.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::model::ItemKind;

/// Pattern for "Title (2001)" / "Title [2001]" / "Title 2001" folder names
static TITLE_YEAR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?P<title>.+?)[\s\(\[\.]+(?P<year>(?:19|20)\d{2})[\)\]\.]?\s*$").unwrap());

/// Pattern for stack part markers: cd1, disc 2, part3, pt.4
static STACK_PART_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)[\s\.\-_]*(?:cd|disc|disk|part|pt)[\s\.\-_]*(\d{1,2})\s*$").unwrap());

/// Pattern for sample files
static SAMPLE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)(?:^|[\s\.\-_])sample(?:[\s\.\-_]|$)").unwrap());

/// Pattern for inline extras: "Movie - trailer", "Movie - behind the scenes"
static INLINE_EXTRA_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^(?P<base>.+?)\s*-\s*(?P<extra>trailer|clip|behind\s*the\s*scenes|deleted\s*scene|featurette|interview|scene|short|other)\s*(?:\d+)?$",
    )
    .unwrap()
});

/// Pattern for SxxEyy episode markers
static EPISODE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(?P<show>.+?)[\s\.\-_]*[Ss](?P<season>\d{1,2})[Ee](?P<episode>\d{1,3})").unwrap());

/// Pattern for "Season 01" / "Staffel 2" style season folders
static SEASON_DIR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(?:season|staffel|series)[\s\._]*(\d{1,2})$").unwrap());

/// Pattern for disc subfolders in album directories: "CD1", "Disc 2"
static DISC_DIR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(?:cd|disc|disk)[\s\._]*(\d{1,2})$").unwrap());

/// Pattern for leading track numbers: "01 - Title", "1-02 Title", "07. Title"
static TRACK_NUM_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:(?P<disc>\d{1,2})[\-\.])?(?P<track>\d{1,3})[\s\.\-_]+(?P<title>.+)$").unwrap());

/// Pattern for date-only folder names: "2021", "2021-06", "2021-06-15"
static DATE_ONLY_DIR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{4}(?:[\-_ ]\d{2}(?:[\-_ ]\d{2})?)?$").unwrap());

/// Extras subfolder names and the item kind each maps to.
pub const EXTRAS_FOLDERS: &[(&str, ItemKind)] = &[
    ("trailers", ItemKind::Trailer),
    ("clips", ItemKind::Clip),
    ("behind the scenes", ItemKind::BehindTheScenes),
    ("deleted scenes", ItemKind::DeletedScene),
    ("featurettes", ItemKind::Featurette),
    ("interviews", ItemKind::Interview),
    ("scenes", ItemKind::Scene),
    ("shorts", ItemKind::ShortForm),
    ("extras", ItemKind::ExtraOther),
    ("others", ItemKind::ExtraOther),
];

/// Title and optional year parsed from a folder or file stem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedTitle {
    pub title: String,
    pub year: Option<i32>,
}

/// Parse "Movie (2001)" into title + year; names without a year come back
/// whole.
pub fn parse_title_year(name: &str) -> ParsedTitle {
    if let Some(caps) = TITLE_YEAR_RE.captures(name) {
        let title = clean_title(caps.name("title").map(|m| m.as_str()).unwrap_or(name));
        let year = caps.name("year").and_then(|m| m.as_str().parse().ok());
        if !title.is_empty() {
            return ParsedTitle { title, year };
        }
    }
    ParsedTitle { title: clean_title(name), year: None }
}

fn clean_title(raw: &str) -> String {
    let spaced = raw.replace(['.', '_'], " ");
    spaced.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// A stack marker split off a file stem: `Movie.cd1` -> (`Movie`, 1).
pub fn split_stack_marker(stem: &str) -> Option<(String, u32)> {
    let caps = STACK_PART_RE.captures(stem)?;
    let index: u32 = caps.get(1)?.as_str().parse().ok()?;
    let base = STACK_PART_RE.replace(stem, "").trim().to_string();
    Some((base.to_lowercase(), index))
}

pub fn is_sample(name: &str) -> bool {
    let stem = name.rsplit_once('.').map(|(s, _)| s).unwrap_or(name);
    SAMPLE_RE.is_match(stem)
}

/// Inline extra suffix: "Movie - trailer.mp4" -> (base, Trailer).
pub fn parse_inline_extra(stem: &str) -> Option<(String, ItemKind)> {
    let caps = INLINE_EXTRA_RE.captures(stem)?;
    let base = caps.name("base")?.as_str().trim().to_string();
    let marker = caps.name("extra")?.as_str().to_lowercase();
    let collapsed: String = marker.split_whitespace().collect::<Vec<_>>().join(" ");
    let kind = match collapsed.as_str() {
        "trailer" => ItemKind::Trailer,
        "clip" => ItemKind::Clip,
        "behind the scenes" => ItemKind::BehindTheScenes,
        "deleted scene" => ItemKind::DeletedScene,
        "featurette" => ItemKind::Featurette,
        "interview" => ItemKind::Interview,
        "scene" => ItemKind::Scene,
        "short" => ItemKind::ShortForm,
        "other" => ItemKind::ExtraOther,
        _ => return None,
    };
    Some((base, kind))
}

/// Extras subfolder lookup: "Featurettes" -> Featurette.
pub fn extras_folder_kind(dir_name: &str) -> Option<ItemKind> {
    let lower = dir_name.to_lowercase();
    EXTRAS_FOLDERS
        .iter()
        .find(|(name, _)| *name == lower)
        .map(|(_, kind)| *kind)
}

/// Parsed episode marker from a filename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedEpisode {
    pub show: String,
    pub season: i32,
    pub episode: i32,
}

pub fn parse_episode(stem: &str) -> Option<ParsedEpisode> {
    let cleaned = stem.replace(['.', '_'], " ");
    let caps = EPISODE_RE.captures(&cleaned)?;
    Some(ParsedEpisode {
        show: clean_title(caps.name("show")?.as_str()),
        season: caps.name("season")?.as_str().parse().ok()?,
        episode: caps.name("episode")?.as_str().parse().ok()?,
    })
}

/// Season number from a folder name like "Season 02".
pub fn parse_season_dir(name: &str) -> Option<i32> {
    SEASON_DIR_RE
        .captures(name.trim())
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Disc number from an album subfolder like "CD1" or "Disc 2".
pub fn parse_disc_dir(name: &str) -> Option<i32> {
    DISC_DIR_RE
        .captures(name.trim())
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Parsed track filename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedTrack {
    pub disc: Option<i32>,
    pub track: Option<i32>,
    pub title: String,
}

pub fn parse_track(stem: &str) -> ParsedTrack {
    if let Some(caps) = TRACK_NUM_RE.captures(stem.trim()) {
        return ParsedTrack {
            disc: caps.name("disc").and_then(|m| m.as_str().parse().ok()),
            track: caps.name("track").and_then(|m| m.as_str().parse().ok()),
            title: clean_title(caps.name("title").map(|m| m.as_str()).unwrap_or(stem)),
        };
    }
    ParsedTrack { disc: None, track: None, title: clean_title(stem) }
}

/// Whether a folder name is purely a date ("2021", "2021-06-15").
pub fn is_date_only_dir(name: &str) -> bool {
    DATE_ONLY_DIR_RE.is_match(name.trim())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    // =========================================================================
    // Title / year
    // =========================================================================

    #[test]
    fn test_parse_title_year_parens() {
        let parsed = parse_title_year("Movie (2001)");
        assert_eq!(parsed.title, "Movie");
        assert_eq!(parsed.year, Some(2001));
    }

    #[test]
    fn test_parse_title_year_dotted() {
        let parsed = parse_title_year("The.Long.Film.1987");
        assert_eq!(parsed.title, "The Long Film");
        assert_eq!(parsed.year, Some(1987));
    }

    #[test]
    fn test_parse_title_without_year() {
        let parsed = parse_title_year("Some Movie");
        assert_eq!(parsed.title, "Some Movie");
        assert_eq!(parsed.year, None);
    }

    // =========================================================================
    // Stack markers
    // =========================================================================

    #[test]
    fn test_split_stack_marker_variants() {
        assert_eq!(split_stack_marker("Movie.cd1"), Some(("movie".into(), 1)));
        assert_eq!(split_stack_marker("Movie - disc 2"), Some(("movie".into(), 2)));
        assert_eq!(split_stack_marker("Movie part3"), Some(("movie".into(), 3)));
        assert_eq!(split_stack_marker("Movie pt.4"), Some(("movie".into(), 4)));
        assert_eq!(split_stack_marker("Movie"), None);
    }

    #[test]
    fn test_sample_detection() {
        assert!(is_sample("movie.sample.mkv"));
        assert!(is_sample("sample-movie.mkv"));
        assert!(!is_sample("sampler documentary.mkv"));
    }

    // =========================================================================
    // Extras
    // =========================================================================

    #[test]
    fn test_parse_inline_extra() {
        assert_eq!(
            parse_inline_extra("Movie (2001) - trailer"),
            Some(("Movie (2001)".into(), ItemKind::Trailer))
        );
        assert_eq!(
            parse_inline_extra("Movie - Behind The Scenes"),
            Some(("Movie".into(), ItemKind::BehindTheScenes))
        );
        assert_eq!(parse_inline_extra("Movie - director commentary"), None);
    }

    #[test]
    fn test_extras_folder_kind() {
        assert_eq!(extras_folder_kind("Featurettes"), Some(ItemKind::Featurette));
        assert_eq!(extras_folder_kind("EXTRAS"), Some(ItemKind::ExtraOther));
        assert_eq!(extras_folder_kind("Specials"), None);
    }

    // =========================================================================
    // Episodes, discs, tracks
    // =========================================================================

    #[test]
    fn test_parse_episode() {
        let parsed = parse_episode("Chicago.Fire.S14E08.1080p.WEB").unwrap();
        assert_eq!(parsed.show, "Chicago Fire");
        assert_eq!(parsed.season, 14);
        assert_eq!(parsed.episode, 8);
    }

    #[test]
    fn test_parse_season_dir() {
        assert_eq!(parse_season_dir("Season 01"), Some(1));
        assert_eq!(parse_season_dir("season2"), Some(2));
        assert_eq!(parse_season_dir("Specials"), None);
    }

    #[test]
    fn test_parse_disc_dir() {
        assert_eq!(parse_disc_dir("CD1"), Some(1));
        assert_eq!(parse_disc_dir("Disc 2"), Some(2));
        assert_eq!(parse_disc_dir("Bonus"), None);
    }

    #[test]
    fn test_parse_track() {
        let parsed = parse_track("07 - Some Song");
        assert_eq!(parsed.track, Some(7));
        assert_eq!(parsed.title, "Some Song");

        let parsed = parse_track("1-02 Other Song");
        assert_eq!(parsed.disc, Some(1));
        assert_eq!(parsed.track, Some(2));
        assert_eq!(parsed.title, "Other Song");

        let parsed = parse_track("No Numbers Here");
        assert_eq!(parsed.track, None);
        assert_eq!(parsed.title, "No Numbers Here");
    }

    #[test]
    fn test_date_only_dir() {
        assert!(is_date_only_dir("2021"));
        assert!(is_date_only_dir("2021-06"));
        assert!(is_date_only_dir("2021_06_15"));
        assert!(!is_date_only_dir("Summer 2021"));
    }
}
