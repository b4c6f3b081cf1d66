//! Normalization of the genre and folksonomy tag lists MusicBrainz
//! attaches to recordings and release-groups.

use std::collections::{HashMap, HashSet};

use serde::Deserialize;

/// A genre or tag with its vote count, as the catalog returns it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Vote {
    pub name: String,
    #[serde(default)]
    pub count: i64,
}

impl Vote {
    pub fn new(name: &str, count: i64) -> Self {
        Vote { name: name.to_string(), count }
    }
}

/// Tags need at least this many summed votes to be kept.
pub const MIN_TAG_VOTES: i64 = 2;

/// Cleaned genres and tags for one catalog entity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenreTagSet {
    pub genres: Vec<String>,
    pub tags: Vec<String>,
}

impl GenreTagSet {
    pub fn from_votes(genres: &[Vote], tags: &[Vote]) -> Self {
        GenreTagSet {
            genres: normalize_genres(genres.iter().map(|g| g.name.as_str())),
            tags: normalize_tags(tags),
        }
    }
}

/// Trim, drop blanks and remove case-insensitive duplicates.
/// The first spelling and the first-seen order win.
pub fn normalize_genres<'a, I>(raw: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut seen = HashSet::new();
    raw.into_iter()
        .map(str::trim)
        .filter(|name| !name.is_empty() && seen.insert(name.to_lowercase()))
        .map(str::to_string)
        .collect()
}

/// Sum votes per lowercased name and keep names reaching
/// [`MIN_TAG_VOTES`]. Output is lowercased and sorted.
pub fn normalize_tags(raw: &[Vote]) -> Vec<String> {
    let mut totals: HashMap<String, i64> = HashMap::new();
    for vote in raw {
        let name = vote.name.trim();
        if name.is_empty() {
            continue;
        }
        *totals.entry(name.to_lowercase()).or_default() += vote.count;
    }

    let mut out: Vec<String> = totals
        .into_iter()
        .filter(|(_, count)| *count >= MIN_TAG_VOTES)
        .map(|(name, _)| name)
        .collect();
    out.sort();
    out
}
