//! MusicBrainz web service client: recording and release-group search plus
//! genre/tag lookups by MBID.

use serde::Deserialize;

use crate::error::FetchError;
use crate::fetcher::{FetchContext, Fetcher};
use crate::query;
use crate::resolver::{ArtistCredit, Query, RecordingCandidate, ReleaseGroupCandidate, ReleaseRef};
use crate::tags::{GenreTagSet, Vote};

pub const DEFAULT_BASE_URL: &str = "https://musicbrainz.org/ws/2";

/// Number of search hits requested per query.
pub const SEARCH_LIMIT: u32 = 5;

// Search API response types

#[derive(Debug, Deserialize)]
struct RecordingSearchResponse {
    #[serde(default)]
    recordings: Vec<RecordingResult>,
}

#[derive(Debug, Deserialize)]
struct RecordingResult {
    id: String,
    #[serde(default)]
    score: u32,
    #[serde(default)]
    title: String,
    length: Option<u64>,
    #[serde(rename = "artist-credit", default)]
    artist_credit: Vec<ApiArtistCredit>,
    #[serde(default)]
    releases: Vec<ApiRelease>,
}

#[derive(Debug, Deserialize)]
struct ReleaseGroupSearchResponse {
    #[serde(rename = "release-groups", default)]
    release_groups: Vec<ReleaseGroupResult>,
}

#[derive(Debug, Deserialize)]
struct ReleaseGroupResult {
    id: String,
    #[serde(default)]
    score: u32,
    #[serde(default)]
    title: String,
    #[serde(rename = "artist-credit", default)]
    artist_credit: Vec<ApiArtistCredit>,
    #[serde(rename = "first-release-date", default)]
    first_release_date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiArtistCredit {
    name: String,
}

#[derive(Debug, Deserialize)]
struct ApiRelease {
    title: String,
}

// Lookup API response type, shared by recording and release-group

#[derive(Debug, Deserialize)]
struct GenreLookupResponse {
    #[serde(default)]
    genres: Vec<Vote>,
    #[serde(default)]
    tags: Vec<Vote>,
}

fn credits(raw: Vec<ApiArtistCredit>) -> Vec<ArtistCredit> {
    raw.into_iter().map(|a| ArtistCredit { name: a.name }).collect()
}

impl From<RecordingResult> for RecordingCandidate {
    fn from(r: RecordingResult) -> Self {
        RecordingCandidate {
            id: r.id,
            base_score: r.score,
            title: r.title,
            length_ms: r.length.unwrap_or(0),
            artist_credits: credits(r.artist_credit),
            releases: r.releases.into_iter().map(|rel| ReleaseRef { title: rel.title }).collect(),
        }
    }
}

impl From<ReleaseGroupResult> for ReleaseGroupCandidate {
    fn from(r: ReleaseGroupResult) -> Self {
        ReleaseGroupCandidate {
            id: r.id,
            base_score: r.score,
            title: r.title,
            artist_credits: credits(r.artist_credit),
            first_release_date: r.first_release_date.unwrap_or_default(),
        }
    }
}

/// The four catalog calls resolution needs. Implemented by
/// [`MusicBrainzClient`]; tests substitute an in-memory catalog.
pub trait Catalog: Send + Sync {
    fn search_recordings(&self, query: &Query, ctx: &FetchContext) -> Result<Vec<RecordingCandidate>, FetchError>;

    fn search_release_groups(
        &self,
        artist: &str,
        album: &str,
        ctx: &FetchContext,
    ) -> Result<Vec<ReleaseGroupCandidate>, FetchError>;

    fn recording_genres(&self, mbid: &str, ctx: &FetchContext) -> Result<GenreTagSet, FetchError>;

    fn release_group_genres(&self, mbid: &str, ctx: &FetchContext) -> Result<GenreTagSet, FetchError>;
}

pub struct MusicBrainzClient {
    fetcher: Fetcher,
    base_url: String,
}

impl MusicBrainzClient {
    pub fn new(fetcher: Fetcher, base_url: &str) -> Self {
        MusicBrainzClient {
            fetcher,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn search_url(&self, entity: &str, lucene: &str) -> String {
        format!(
            "{}/{}?query={}&limit={}&fmt=json",
            self.base_url,
            entity,
            urlencoding::encode(lucene),
            SEARCH_LIMIT
        )
    }

    fn lookup_url(&self, entity: &str, mbid: &str) -> String {
        format!(
            "{}/{}/{}?inc=genres+tags&fmt=json",
            self.base_url,
            entity,
            urlencoding::encode(mbid)
        )
    }

    fn genres(&self, entity: &str, mbid: &str, ctx: &FetchContext) -> Result<GenreTagSet, FetchError> {
        let r: GenreLookupResponse = self.fetcher.fetch_json(&self.lookup_url(entity, mbid), ctx)?;
        Ok(GenreTagSet::from_votes(&r.genres, &r.tags))
    }
}

impl Catalog for MusicBrainzClient {
    fn search_recordings(&self, q: &Query, ctx: &FetchContext) -> Result<Vec<RecordingCandidate>, FetchError> {
        let lucene = query::recording_query(&q.artist, &q.title, &q.album);
        let search: RecordingSearchResponse = self.fetcher.fetch_json(&self.search_url("recording", &lucene), ctx)?;
        Ok(search.recordings.into_iter().map(Into::into).collect())
    }

    fn search_release_groups(
        &self,
        artist: &str,
        album: &str,
        ctx: &FetchContext,
    ) -> Result<Vec<ReleaseGroupCandidate>, FetchError> {
        let lucene = query::release_group_query(artist, album);
        let search: ReleaseGroupSearchResponse =
            self.fetcher.fetch_json(&self.search_url("release-group", &lucene), ctx)?;
        Ok(search.release_groups.into_iter().map(Into::into).collect())
    }

    fn recording_genres(&self, mbid: &str, ctx: &FetchContext) -> Result<GenreTagSet, FetchError> {
        self.genres("recording", mbid, ctx)
    }

    fn release_group_genres(&self, mbid: &str, ctx: &FetchContext) -> Result<GenreTagSet, FetchError> {
        self.genres("release-group", mbid, ctx)
    }
}
