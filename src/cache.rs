//! File-based cache for MusicBrainz lookups.
//!
//! Each logical key (`rec:<mbid>`, `search:rec:<fingerprint>`) is stored
//! as its own JSON file, named by the SHA-256 of the lowercased, trimmed
//! key, inside the cache directory (`~/.cache/genrebender` by default).
//! Entries carry the schema version they were written with; entries from
//! another version are ignored. Writes go to a temporary file that is then
//! renamed over the target, so readers never see half an entry.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::CacheError;

pub const DEFAULT_TTL: Duration = Duration::from_secs(30 * 24 * 60 * 60);
pub const DEFAULT_SEARCH_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Bump when the shape or meaning of cached data changes.
pub const SCHEMA_VERSION: u32 = 1;

/// Where an entry's genres came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Source {
    Recording,
    ReleaseGroup,
    /// A resolved search; `mbid` is the winning recording
    Search,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub source: Source,
    pub mbid: String,
    #[serde(default)]
    pub genres: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Set by [`DiskCache::put`]
    pub fetched_at: DateTime<Utc>,
    /// Set by [`DiskCache::put`]
    pub schema_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<serde_json::Value>,
}

impl CacheEntry {
    pub fn new(source: Source, mbid: &str, genres: Vec<String>, tags: Vec<String>) -> Self {
        CacheEntry {
            source,
            mbid: mbid.to_string(),
            genres,
            tags,
            fetched_at: DateTime::<Utc>::default(),
            schema_version: 0,
            raw: None,
        }
    }
}

#[derive(Deserialize)]
struct Versioned {
    schema_version: u32,
}

/// A readable entry with the current schema version.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheHit {
    pub entry: CacheEntry,
    /// Older than its category's TTL
    pub stale: bool,
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub dir: PathBuf,
    /// Freshness of identifier lookups
    pub ttl: Duration,
    /// Freshness of search results
    pub search_ttl: Duration,
    pub schema_version: u32,
}

impl CacheConfig {
    pub fn new(dir: PathBuf) -> Self {
        CacheConfig {
            dir,
            ttl: DEFAULT_TTL,
            search_ttl: DEFAULT_SEARCH_TTL,
            schema_version: SCHEMA_VERSION,
        }
    }

    /// `<platform cache dir>/genrebender`
    pub fn default_dir() -> Option<PathBuf> {
        dirs::cache_dir().map(|dir| dir.join("genrebender"))
    }
}

/// Version-gated JSON file cache. Configuration is fixed at construction.
#[derive(Debug, Clone)]
pub struct DiskCache {
    config: CacheConfig,
}

/// Filename stem for a logical key.
pub fn key_hash(key: &str) -> String {
    format!("{:x}", Sha256::digest(key.trim().to_lowercase().as_bytes()))
}

fn io_error(path: &Path, source: io::Error) -> CacheError {
    CacheError::Io {
        path: path.to_path_buf(),
        source,
    }
}

impl DiskCache {
    pub fn new(config: CacheConfig) -> Self {
        DiskCache { config }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn dir(&self) -> &Path {
        &self.config.dir
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        self.config.dir.join(format!("{}.json", key_hash(key)))
    }

    /// Look up `key`. A missing file or an entry from another schema
    /// version is `Ok(None)`; only I/O and parse failures are errors.
    pub fn get(&self, key: &str, is_search: bool) -> Result<Option<CacheHit>, CacheError> {
        self.get_at(key, is_search, Utc::now())
    }

    fn get_at(&self, key: &str, is_search: bool, now: DateTime<Utc>) -> Result<Option<CacheHit>, CacheError> {
        let path = self.path_for(key);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_error(&path, e)),
        };

        // Other schema versions may not parse as the current entry shape
        let versioned: Versioned = serde_json::from_slice(&bytes)
            .map_err(|source| CacheError::Deserialize { path: path.clone(), source })?;
        if versioned.schema_version != self.config.schema_version {
            log::debug!(
                "cache: {} has schema v{}, want v{}; treating as miss",
                key,
                versioned.schema_version,
                self.config.schema_version
            );
            return Ok(None);
        }

        let entry: CacheEntry = serde_json::from_slice(&bytes)
            .map_err(|source| CacheError::Deserialize { path: path.clone(), source })?;

        let ttl = if is_search { self.config.search_ttl } else { self.config.ttl };
        let age = now.signed_duration_since(entry.fetched_at);
        let stale = match chrono::Duration::from_std(ttl) {
            Ok(ttl) => age > ttl,
            Err(_) => false,
        };
        log::debug!("cache: {} hit ({})", key, if stale { "stale" } else { "fresh" });

        Ok(Some(CacheHit { entry, stale }))
    }

    /// Store `entry` under `key`, replacing any previous entry.
    /// `fetched_at` and `schema_version` are always overwritten.
    pub fn put(&self, key: &str, entry: CacheEntry) -> Result<(), CacheError> {
        self.put_at(key, entry, Utc::now())
    }

    fn put_at(&self, key: &str, mut entry: CacheEntry, now: DateTime<Utc>) -> Result<(), CacheError> {
        let dir = &self.config.dir;
        fs::create_dir_all(dir).map_err(|e| io_error(dir, e))?;

        entry.fetched_at = now;
        entry.schema_version = self.config.schema_version;
        let data = serde_json::to_vec_pretty(&entry)?;

        let path = self.path_for(key);
        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| io_error(dir, e))?;
        tmp.write_all(&data).map_err(|e| io_error(tmp.path(), e))?;
        tmp.as_file().sync_all().map_err(|e| io_error(&path, e))?;
        tmp.persist(&path).map_err(|e| io_error(&path, e.error))?;
        log::debug!("cache: stored {} at {}", key, path.display());
        Ok(())
    }

    /// Delete the entry for `key`. Missing entries are fine.
    pub fn remove(&self, key: &str) -> Result<(), CacheError> {
        let path = self.path_for(key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(&path, e)),
        }
    }

    /// Delete every entry file. Returns how many were removed.
    pub fn clear(&self) -> Result<usize, CacheError> {
        let dir = &self.config.dir;
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(io_error(dir, e)),
        };

        let mut removed = 0;
        for entry in entries {
            let path = entry.map_err(|e| io_error(dir, e))?.path();
            if path.extension().and_then(|ext| ext.to_str()) == Some("json") {
                fs::remove_file(&path).map_err(|e| io_error(&path, e))?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}
