//! Candidate scoring for fuzzy catalog searches.
//!
//! The remote search already ranks its hits; its score is the starting
//! point and local evidence (title, artist, album, duration, release year)
//! adds small bonuses on top. Missing local evidence never subtracts.
//! Ties keep the catalog's order.

use chrono::Datelike;

/// Local description of a track, as read from its tags.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Query {
    pub artist: String,
    pub title: String,
    /// Empty when unknown
    pub album: String,
    /// 0 when unknown
    pub duration_ms: u64,
}

impl Query {
    pub fn new(artist: &str, title: &str, album: &str, duration_ms: u64) -> Self {
        Query {
            artist: artist.trim().to_string(),
            title: title.trim().to_string(),
            album: album.trim().to_string(),
            duration_ms,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArtistCredit {
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReleaseRef {
    pub title: String,
}

/// A recording hit from the search endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordingCandidate {
    pub id: String,
    /// Remote relevance, 0–100
    pub base_score: u32,
    pub title: String,
    /// 0 when the catalog has no length
    pub length_ms: u64,
    pub artist_credits: Vec<ArtistCredit>,
    pub releases: Vec<ReleaseRef>,
}

/// A release-group hit from the search endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReleaseGroupCandidate {
    pub id: String,
    pub base_score: u32,
    pub title: String,
    pub artist_credits: Vec<ArtistCredit>,
    /// `YYYY`, `YYYY-MM` or `YYYY-MM-DD`; empty when unknown
    pub first_release_date: String,
}

/// A candidate id with its final score.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scored {
    pub id: String,
    pub title: String,
    pub score: u32,
}

const TITLE_BONUS: u32 = 5;
const ARTIST_BONUS: u32 = 5;
const RELEASE_BONUS: u32 = 4;
const YEAR_BONUS: u32 = 1;
const EARLIEST_YEAR: i32 = 1950;

fn ci_contains(haystack: &str, needle_lower: &str) -> bool {
    haystack.to_lowercase().contains(needle_lower)
}

fn has_artist(credits: &[ArtistCredit], want_lower: &str) -> bool {
    credits.iter().any(|a| ci_contains(&a.name, want_lower))
}

/// Bonus for how close the candidate's length is to the local duration.
/// Tiers are exclusive: ≤1.5 s → 6, ≤3 s → 3, ≤7 s → 1.
pub fn duration_bonus(query_ms: u64, candidate_ms: u64) -> u32 {
    if query_ms == 0 || candidate_ms == 0 {
        return 0;
    }
    match query_ms.abs_diff(candidate_ms) {
        0..=1500 => 6,
        1501..=3000 => 3,
        3001..=7000 => 1,
        _ => 0,
    }
}

/// Leading four-digit year of an ISO-style date, if any.
fn release_year(date: &str) -> Option<i32> {
    date.get(..4)?.parse().ok()
}

pub fn score_recording(candidate: &RecordingCandidate, query: &Query) -> u32 {
    let title = query.title.to_lowercase();
    let artist = query.artist.to_lowercase();
    let album = query.album.to_lowercase();

    let mut score = candidate.base_score;
    if ci_contains(&candidate.title, &title) {
        score += TITLE_BONUS;
    }
    if has_artist(&candidate.artist_credits, &artist) {
        score += ARTIST_BONUS;
    }
    if !album.is_empty() && candidate.releases.iter().any(|r| ci_contains(&r.title, &album)) {
        score += RELEASE_BONUS;
    }
    score + duration_bonus(query.duration_ms, candidate.length_ms)
}

pub fn score_release_group(
    candidate: &ReleaseGroupCandidate,
    artist: &str,
    album: &str,
    current_year: i32,
) -> u32 {
    let mut score = candidate.base_score;
    if ci_contains(&candidate.title, &album.to_lowercase()) {
        score += TITLE_BONUS;
    }
    if has_artist(&candidate.artist_credits, &artist.to_lowercase()) {
        score += ARTIST_BONUS;
    }
    if let Some(year) = release_year(&candidate.first_release_date) {
        if (EARLIEST_YEAR..=current_year + 1).contains(&year) {
            score += YEAR_BONUS;
        }
    }
    score
}

/// Stable descending sort, so equal scores keep their input order.
fn rank(mut items: Vec<Scored>) -> Vec<Scored> {
    items.sort_by(|a, b| b.score.cmp(&a.score));
    items
}

/// All recording candidates, best first.
pub fn rank_recordings(candidates: &[RecordingCandidate], query: &Query) -> Vec<Scored> {
    rank(
        candidates
            .iter()
            .map(|c| Scored {
                id: c.id.clone(),
                title: c.title.clone(),
                score: score_recording(c, query),
            })
            .collect(),
    )
}

/// All release-group candidates, best first.
pub fn rank_release_groups(
    candidates: &[ReleaseGroupCandidate],
    artist: &str,
    album: &str,
) -> Vec<Scored> {
    rank_release_groups_in(candidates, artist, album, chrono::Utc::now().year())
}

fn rank_release_groups_in(
    candidates: &[ReleaseGroupCandidate],
    artist: &str,
    album: &str,
    current_year: i32,
) -> Vec<Scored> {
    rank(
        candidates
            .iter()
            .map(|c| Scored {
                id: c.id.clone(),
                title: c.title.clone(),
                score: score_release_group(c, artist, album, current_year),
            })
            .collect(),
    )
}

/// Best recording id, or `None` for an empty candidate list.
pub fn resolve_best_recording(candidates: &[RecordingCandidate], query: &Query) -> Option<String> {
    rank_recordings(candidates, query).into_iter().next().map(|s| s.id)
}

/// Best release-group id, or `None` for an empty candidate list.
pub fn resolve_best_release_group(
    candidates: &[ReleaseGroupCandidate],
    artist: &str,
    album: &str,
) -> Option<String> {
    rank_release_groups(candidates, artist, album)
        .into_iter()
        .next()
        .map(|s| s.id)
}
