//! Genre resolution for one track: search, pick the best recording, consult
//! the cache, fetch genres (falling back to the release-group when the
//! recording has none) and remember the result.
//!
//! [`GenreResolver`] holds no per-item state and can be shared between
//! threads working on different files.

use std::path::Path;

use crate::cache::{CacheEntry, DiskCache, Source};
use crate::error::{Result, ResolveError};
use crate::fetcher::FetchContext;
use crate::metadata::MetadataStore;
use crate::musicbrainz::Catalog;
use crate::resolver::{self, Query};
use crate::tags::GenreTagSet;

/// Genres and tags found for a track.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Enrichment {
    /// The recording the track resolved to
    pub recording_mbid: String,
    /// Entity the genres were taken from
    pub source: Source,
    pub source_mbid: String,
    pub genres: Vec<String>,
    pub tags: Vec<String>,
    pub from_cache: bool,
}

/// Outcome of resolving one track. `NoMatch` is not an error: the catalog
/// simply has nothing resembling the query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    NoMatch,
    Found(Enrichment),
}

impl Resolution {
    pub fn enrichment(&self) -> Option<&Enrichment> {
        match self {
            Resolution::Found(e) => Some(e),
            Resolution::NoMatch => None,
        }
    }
}

/// Cache key of a recording's genres.
pub fn recording_key(mbid: &str) -> String {
    format!("rec:{}", mbid)
}

/// Cache key of a recording search; durations only count to the second.
pub fn search_key(query: &Query) -> String {
    format!(
        "search:rec:{}|{}|{}|{}",
        query.artist,
        query.title,
        query.album,
        query.duration_ms / 1000
    )
}

pub struct GenreResolver<C: Catalog> {
    catalog: C,
    cache: DiskCache,
    refresh: bool,
}

impl<C: Catalog> GenreResolver<C> {
    pub fn new(catalog: C, cache: DiskCache) -> Self {
        GenreResolver {
            catalog,
            cache,
            refresh: false,
        }
    }

    /// Ignore cached entries (results are still written back).
    pub fn with_refresh(mut self, refresh: bool) -> Self {
        self.refresh = refresh;
        self
    }

    pub fn catalog(&self) -> &C {
        &self.catalog
    }

    pub fn cache(&self) -> &DiskCache {
        &self.cache
    }

    /// Read a file's tags and resolve them.
    pub fn resolve_path(&self, store: &dyn MetadataStore, path: &Path, ctx: &FetchContext) -> Result<Resolution> {
        let fields = store.read_fields(path)?;
        let query = fields.to_query()?;
        log::debug!(
            "{}: artist={:?} title={:?} album={:?} duration={}ms",
            path.display(),
            query.artist,
            query.title,
            query.album,
            query.duration_ms
        );
        self.resolve(&query, ctx)
    }

    pub fn resolve(&self, query: &Query, ctx: &FetchContext) -> Result<Resolution> {
        let (recording_mbid, searched) = match self.find_recording(query, ctx)? {
            Some(found) => found,
            None => {
                log::info!("no recording matches {:?} / {:?}", query.artist, query.title);
                return Ok(Resolution::NoMatch);
            }
        };

        let key = recording_key(&recording_mbid);
        if let Some(entry) = self.cached(&key, false) {
            log::debug!("genres for {} read from cache", recording_mbid);
            if searched {
                self.remember_search(query, &recording_mbid);
            }
            return Ok(Resolution::Found(Enrichment {
                recording_mbid,
                source: entry.source,
                source_mbid: entry.mbid,
                genres: entry.genres,
                tags: entry.tags,
                from_cache: true,
            }));
        }

        let (source, source_mbid, set) = self.fetch_genres(&recording_mbid, query, ctx)?;

        // Nothing is cached for an item until all of its fetches succeeded
        if searched {
            self.remember_search(query, &recording_mbid);
        }
        let entry = CacheEntry::new(source, &source_mbid, set.genres.clone(), set.tags.clone());
        if let Err(e) = self.cache.put(&key, entry) {
            log::warn!("could not cache genres for {}: {}", recording_mbid, e);
        }

        Ok(Resolution::Found(Enrichment {
            recording_mbid,
            source,
            source_mbid,
            genres: set.genres,
            tags: set.tags,
            from_cache: false,
        }))
    }

    /// Fresh cache entry for `key`, if any. Stale entries, read failures
    /// and `--refresh` all count as a miss.
    fn cached(&self, key: &str, is_search: bool) -> Option<CacheEntry> {
        if self.refresh {
            return None;
        }
        match self.cache.get(key, is_search) {
            Ok(Some(hit)) if !hit.stale => Some(hit.entry),
            Ok(Some(_)) => {
                log::debug!("cache entry {} is stale; refreshing", key);
                None
            }
            Ok(None) => None,
            Err(e) => {
                log::warn!("cache unavailable for {}: {}", key, e);
                None
            }
        }
    }

    /// Best recording for `query` and whether it came from a fresh search
    /// that still has to be cached.
    fn find_recording(&self, query: &Query, ctx: &FetchContext) -> Result<Option<(String, bool)>> {
        if let Some(entry) = self.cached(&search_key(query), true) {
            log::debug!("recording search answered from cache: {}", entry.mbid);
            return Ok(Some((entry.mbid, false)));
        }

        let candidates = self.catalog.search_recordings(query, ctx)?;
        let ranked = resolver::rank_recordings(&candidates, query);
        for scored in &ranked {
            log::debug!("  candidate {} {:?}: {}", scored.id, scored.title, scored.score);
        }

        let best = ranked.into_iter().next().map(|s| s.id);
        if let Some(id) = &best {
            log::info!("resolved {:?} / {:?} to recording {}", query.artist, query.title, id);
        }
        Ok(best.map(|id| (id, true)))
    }

    fn remember_search(&self, query: &Query, recording_mbid: &str) {
        let entry = CacheEntry::new(Source::Search, recording_mbid, Vec::new(), Vec::new());
        if let Err(e) = self.cache.put(&search_key(query), entry) {
            log::warn!("could not cache search result: {}", e);
        }
    }

    fn fetch_genres(
        &self,
        recording_mbid: &str,
        query: &Query,
        ctx: &FetchContext,
    ) -> Result<(Source, String, GenreTagSet)> {
        let set = self.catalog.recording_genres(recording_mbid, ctx)?;
        if !set.genres.is_empty() {
            return Ok((Source::Recording, recording_mbid.to_string(), set));
        }

        // releasegroup:"" never matches, so skip the round-trip
        if query.album.is_empty() {
            log::debug!("recording {} has no genres and no album to fall back on", recording_mbid);
            return Ok((Source::Recording, recording_mbid.to_string(), set));
        }

        let candidates = self
            .catalog
            .search_release_groups(&query.artist, &query.album, ctx)?;
        let Some(rg) = resolver::resolve_best_release_group(&candidates, &query.artist, &query.album) else {
            log::debug!("no release-group matches {:?} / {:?}", query.artist, query.album);
            return Ok((Source::Recording, recording_mbid.to_string(), set));
        };

        log::info!("recording {} has no genres, using release-group {}", recording_mbid, rg);
        let rg_set = self.catalog.release_group_genres(&rg, ctx)?;
        Ok((Source::ReleaseGroup, rg, rg_set))
    }
}

impl<C: Catalog> std::fmt::Debug for GenreResolver<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenreResolver")
            .field("cache", &self.cache.dir())
            .field("refresh", &self.refresh)
            .finish()
    }
}

/// `true` for errors that say something about the file rather than the
/// network, so batch output can phrase them as skips.
pub fn is_skip(err: &ResolveError) -> bool {
    matches!(err, ResolveError::IncompleteMetadata(_))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheConfig;
    use crate::error::{FetchError, MetadataError};
    use crate::metadata::{Field, TrackFields};
    use crate::resolver::{ArtistCredit, RecordingCandidate, ReleaseGroupCandidate};
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;

    /// In-memory catalog that records every call.
    #[derive(Default)]
    struct FakeCatalog {
        recordings: Vec<RecordingCandidate>,
        release_groups: Vec<ReleaseGroupCandidate>,
        genres: HashMap<String, GenreTagSet>,
        failing: Vec<&'static str>,
        calls: Mutex<Vec<String>>,
    }

    impl FakeCatalog {
        fn record(&self, call: &str) -> std::result::Result<(), FetchError> {
            self.calls.lock().unwrap().push(call.to_string());
            if self.failing.iter().any(|f| call.starts_with(f)) {
                return Err(FetchError::Status { status: 503, body: "unavailable".to_string() });
            }
            Ok(())
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn count(&self, prefix: &str) -> usize {
            self.calls().iter().filter(|c| c.starts_with(prefix)).count()
        }
    }

    impl Catalog for FakeCatalog {
        fn search_recordings(&self, _query: &Query, _ctx: &FetchContext) -> std::result::Result<Vec<RecordingCandidate>, FetchError> {
            self.record("search-rec")?;
            Ok(self.recordings.clone())
        }

        fn search_release_groups(
            &self,
            _artist: &str,
            _album: &str,
            _ctx: &FetchContext,
        ) -> std::result::Result<Vec<ReleaseGroupCandidate>, FetchError> {
            self.record("search-rg")?;
            Ok(self.release_groups.clone())
        }

        fn recording_genres(&self, mbid: &str, _ctx: &FetchContext) -> std::result::Result<GenreTagSet, FetchError> {
            self.record(&format!("rec-genres:{}", mbid))?;
            Ok(self.genres.get(mbid).cloned().unwrap_or_default())
        }

        fn release_group_genres(&self, mbid: &str, _ctx: &FetchContext) -> std::result::Result<GenreTagSet, FetchError> {
            self.record(&format!("rg-genres:{}", mbid))?;
            Ok(self.genres.get(mbid).cloned().unwrap_or_default())
        }
    }

    fn set(genres: &[&str], tags: &[&str]) -> GenreTagSet {
        GenreTagSet {
            genres: genres.iter().map(|s| s.to_string()).collect(),
            tags: tags.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn rec(id: &str, score: u32, title: &str) -> RecordingCandidate {
        RecordingCandidate {
            id: id.to_string(),
            base_score: score,
            title: title.to_string(),
            artist_credits: vec![ArtistCredit { name: "Portishead".to_string() }],
            ..Default::default()
        }
    }

    fn rg(id: &str, score: u32, title: &str) -> ReleaseGroupCandidate {
        ReleaseGroupCandidate {
            id: id.to_string(),
            base_score: score,
            title: title.to_string(),
            artist_credits: vec![ArtistCredit { name: "Portishead".to_string() }],
            first_release_date: "1994-08-22".to_string(),
        }
    }

    fn query() -> Query {
        Query::new("Portishead", "Roads", "Dummy", 0)
    }

    fn resolver_in(dir: &tempfile::TempDir, catalog: FakeCatalog) -> GenreResolver<FakeCatalog> {
        GenreResolver::new(catalog, DiskCache::new(CacheConfig::new(dir.path().to_path_buf())))
    }

    fn catalog_with_recording_genres() -> FakeCatalog {
        let mut catalog = FakeCatalog {
            recordings: vec![rec("other", 90, "Glory Box"), rec("roads", 90, "Roads")],
            ..Default::default()
        };
        catalog.genres.insert("roads".to_string(), set(&["Trip Hop"], &["bristol"]));
        catalog
    }

    #[test]
    fn test_no_candidates_is_no_match() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = resolver_in(&dir, FakeCatalog::default());

        let outcome = resolver.resolve(&query(), &FetchContext::default()).unwrap();
        assert_eq!(outcome, Resolution::NoMatch);
        assert_eq!(resolver.catalog().calls(), vec!["search-rec"]);
        assert_eq!(resolver.cache().get(&search_key(&query()), true).unwrap(), None);
    }

    #[test]
    fn test_recording_genres_are_returned_and_cached() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = resolver_in(&dir, catalog_with_recording_genres());

        let outcome = resolver.resolve(&query(), &FetchContext::default()).unwrap();
        let found = outcome.enrichment().unwrap();
        assert_eq!(found.recording_mbid, "roads");
        assert_eq!(found.source, Source::Recording);
        assert_eq!(found.genres, vec!["Trip Hop"]);
        assert_eq!(found.tags, vec!["bristol"]);
        assert!(!found.from_cache);

        let hit = resolver.cache().get(&recording_key("roads"), false).unwrap().unwrap();
        assert_eq!(hit.entry.source, Source::Recording);
        assert_eq!(hit.entry.genres, vec!["Trip Hop"]);
    }

    #[test]
    fn test_fresh_cache_skips_network() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = resolver_in(&dir, catalog_with_recording_genres());
        let ctx = FetchContext::default();

        resolver.resolve(&query(), &ctx).unwrap();
        let second = resolver.resolve(&query(), &ctx).unwrap();

        assert!(second.enrichment().unwrap().from_cache);
        assert_eq!(second.enrichment().unwrap().genres, vec!["Trip Hop"]);
        assert_eq!(resolver.catalog().count("search-rec"), 1);
        assert_eq!(resolver.catalog().count("rec-genres"), 1);
    }

    #[test]
    fn test_cached_search_still_fetches_missing_genres() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = resolver_in(&dir, catalog_with_recording_genres());
        let ctx = FetchContext::default();

        resolver.resolve(&query(), &ctx).unwrap();
        resolver.cache().remove(&recording_key("roads")).unwrap();
        let again = resolver.resolve(&query(), &ctx).unwrap();

        assert!(!again.enrichment().unwrap().from_cache);
        assert_eq!(resolver.catalog().count("search-rec"), 1);
        assert_eq!(resolver.catalog().count("rec-genres"), 2);
    }

    #[test]
    fn test_stale_entry_is_refreshed() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = CacheConfig::new(dir.path().to_path_buf());
        config.ttl = Duration::ZERO;
        config.search_ttl = Duration::ZERO;
        let resolver = GenreResolver::new(catalog_with_recording_genres(), DiskCache::new(config));
        let ctx = FetchContext::default();

        resolver.resolve(&query(), &ctx).unwrap();
        std::thread::sleep(Duration::from_millis(20));
        let again = resolver.resolve(&query(), &ctx).unwrap();

        assert!(!again.enrichment().unwrap().from_cache);
        assert_eq!(resolver.catalog().count("search-rec"), 2);
        assert_eq!(resolver.catalog().count("rec-genres"), 2);
    }

    #[test]
    fn test_refresh_ignores_cache() {
        let dir = tempfile::tempdir().unwrap();
        resolver_in(&dir, catalog_with_recording_genres())
            .resolve(&query(), &FetchContext::default())
            .unwrap();

        let resolver = resolver_in(&dir, catalog_with_recording_genres()).with_refresh(true);
        let outcome = resolver.resolve(&query(), &FetchContext::default()).unwrap();
        assert!(!outcome.enrichment().unwrap().from_cache);
        assert_eq!(resolver.catalog().count("search-rec"), 1);
    }

    #[test]
    fn test_release_group_fallback_when_recording_has_no_genres() {
        let dir = tempfile::tempdir().unwrap();
        let mut catalog = FakeCatalog {
            recordings: vec![rec("roads", 100, "Roads")],
            release_groups: vec![rg("tribute", 95, "Dummy Tribute"), rg("dummy", 95, "Dummy")],
            ..Default::default()
        };
        catalog.genres.insert("roads".to_string(), set(&[], &["sad"]));
        catalog.genres.insert("dummy".to_string(), set(&["Trip Hop", "Electronic"], &[]));
        let resolver = resolver_in(&dir, catalog);

        let outcome = resolver.resolve(&query(), &FetchContext::default()).unwrap();
        let found = outcome.enrichment().unwrap();
        assert_eq!(found.recording_mbid, "roads");
        assert_eq!(found.source, Source::ReleaseGroup);
        assert_eq!(found.source_mbid, "tribute");
        assert_eq!(resolver.catalog().calls(), vec![
            "search-rec",
            "rec-genres:roads",
            "search-rg",
            "rg-genres:tribute",
        ]);

        let hit = resolver.cache().get(&recording_key("roads"), false).unwrap().unwrap();
        assert_eq!(hit.entry.source, Source::ReleaseGroup);
        assert_eq!(hit.entry.mbid, "tribute");
    }

    #[test]
    fn test_fallback_returns_release_group_genres() {
        let dir = tempfile::tempdir().unwrap();
        let mut catalog = FakeCatalog {
            recordings: vec![rec("roads", 100, "Roads")],
            release_groups: vec![rg("dummy", 95, "Dummy")],
            ..Default::default()
        };
        catalog.genres.insert("dummy".to_string(), set(&["Trip Hop", "Electronic"], &["90s"]));
        let resolver = resolver_in(&dir, catalog);

        let outcome = resolver.resolve(&query(), &FetchContext::default()).unwrap();
        let found = outcome.enrichment().unwrap();
        assert_eq!(found.source, Source::ReleaseGroup);
        assert_eq!(found.genres, vec!["Trip Hop", "Electronic"]);
        assert_eq!(found.tags, vec!["90s"]);
    }

    #[test]
    fn test_no_fallback_without_album() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = FakeCatalog {
            recordings: vec![rec("roads", 100, "Roads")],
            release_groups: vec![rg("dummy", 95, "Dummy")],
            ..Default::default()
        };
        let resolver = resolver_in(&dir, catalog);

        let outcome = resolver
            .resolve(&Query::new("Portishead", "Roads", "", 0), &FetchContext::default())
            .unwrap();
        let found = outcome.enrichment().unwrap();
        assert_eq!(found.source, Source::Recording);
        assert!(found.genres.is_empty());
        assert_eq!(resolver.catalog().count("search-rg"), 0);
    }

    #[test]
    fn test_fallback_without_release_group_match_keeps_recording() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = FakeCatalog {
            recordings: vec![rec("roads", 100, "Roads")],
            ..Default::default()
        };
        let resolver = resolver_in(&dir, catalog);

        let found = resolver.resolve(&query(), &FetchContext::default()).unwrap();
        assert_eq!(found.enrichment().unwrap().source, Source::Recording);
        assert_eq!(resolver.catalog().count("rg-genres"), 0);
    }

    #[test]
    fn test_search_failure_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = FakeCatalog {
            failing: vec!["search-rec"],
            ..Default::default()
        };
        let resolver = resolver_in(&dir, catalog);

        let err = resolver.resolve(&query(), &FetchContext::default()).unwrap_err();
        assert!(matches!(err, ResolveError::Fetch(FetchError::Status { status: 503, .. })));
    }

    #[test]
    fn test_genre_fetch_failure_leaves_cache_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let mut catalog = catalog_with_recording_genres();
        catalog.failing = vec!["rec-genres"];
        let resolver = resolver_in(&dir, catalog);

        assert!(resolver.resolve(&query(), &FetchContext::default()).is_err());
        assert_eq!(resolver.cache().get(&recording_key("roads"), false).unwrap(), None);
        assert_eq!(resolver.cache().get(&search_key(&query()), true).unwrap(), None);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_release_group_failure_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = FakeCatalog {
            recordings: vec![rec("roads", 100, "Roads")],
            release_groups: vec![rg("dummy", 95, "Dummy")],
            failing: vec!["rg-genres"],
            ..Default::default()
        };
        let resolver = resolver_in(&dir, catalog);

        assert!(resolver.resolve(&query(), &FetchContext::default()).is_err());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_search_cached_after_fresh_genre_hit() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = resolver_in(&dir, catalog_with_recording_genres());
        let ctx = FetchContext::default();

        resolver.resolve(&query(), &ctx).unwrap();
        resolver.cache().remove(&search_key(&query())).unwrap();
        let again = resolver.resolve(&query(), &ctx).unwrap();

        assert!(again.enrichment().unwrap().from_cache);
        let hit = resolver.cache().get(&search_key(&query()), true).unwrap().unwrap();
        assert_eq!(hit.entry.mbid, "roads");
        assert_eq!(hit.entry.source, Source::Search);
    }

    #[test]
    fn test_unusable_cache_falls_through_to_network() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = resolver_in(&dir, catalog_with_recording_genres());
        std::fs::write(resolver.cache().path_for(&search_key(&query())), b"garbage").unwrap();
        std::fs::write(resolver.cache().path_for(&recording_key("roads")), b"garbage").unwrap();

        let outcome = resolver.resolve(&query(), &FetchContext::default()).unwrap();
        assert_eq!(outcome.enrichment().unwrap().genres, vec!["Trip Hop"]);
        assert!(resolver.cache().get(&recording_key("roads"), false).unwrap().is_some());
    }

    #[test]
    fn test_shared_between_threads() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = resolver_in(&dir, catalog_with_recording_genres());
        std::thread::scope(|s| {
            for i in 0..4 {
                let resolver = &resolver;
                s.spawn(move || {
                    let q = Query::new("Portishead", "Roads", "Dummy", i * 10_000);
                    let outcome = resolver.resolve(&q, &FetchContext::default()).unwrap();
                    assert_eq!(outcome.enrichment().unwrap().genres, vec!["Trip Hop"]);
                });
            }
        });
    }

    struct FixedStore(TrackFields);

    impl MetadataStore for FixedStore {
        fn read_fields(&self, _path: &Path) -> std::result::Result<TrackFields, MetadataError> {
            Ok(self.0.clone())
        }

        fn write_field(&self, _path: &Path, field: Field, _values: &[String], _replace: bool) -> std::result::Result<(), MetadataError> {
            Err(MetadataError::UnknownField(field.name().to_string()))
        }
    }

    #[test]
    fn test_resolve_path_skips_untagged_file() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = resolver_in(&dir, catalog_with_recording_genres());
        let store = FixedStore(TrackFields {
            title: vec!["Roads".to_string()],
            ..Default::default()
        });

        let err = resolver
            .resolve_path(&store, Path::new("untagged.flac"), &FetchContext::default())
            .unwrap_err();
        assert!(is_skip(&err));
        assert!(resolver.catalog().calls().is_empty());
    }

    #[test]
    fn test_resolve_path() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = resolver_in(&dir, catalog_with_recording_genres());
        let store = FixedStore(TrackFields {
            title: vec!["Roads".to_string()],
            artist: vec!["Portishead".to_string()],
            album: vec!["Dummy".to_string()],
            ..Default::default()
        });

        let outcome = resolver
            .resolve_path(&store, Path::new("roads.flac"), &FetchContext::default())
            .unwrap();
        assert_eq!(outcome.enrichment().unwrap().recording_mbid, "roads");
    }
}
