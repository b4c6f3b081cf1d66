//! Error types for genrebender.
//!
//! "No match" and cache staleness are not errors; they are regular
//! outcomes (`Resolution::NoMatch`, `CacheHit::stale`).

use std::path::PathBuf;

use thiserror::Error;

/// Failure of a single remote request after the retry loop gave up.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// Non-2xx response; body is trimmed
    #[error("MusicBrainz {status}: {body}")]
    Status { status: u16, body: String },

    /// Connection, DNS, TLS or timeout failure
    #[error("transport error: {0}")]
    Transport(String),

    /// 2xx response whose body did not match the expected shape
    #[error("malformed response: {0}")]
    Decode(String),

    #[error("request cancelled")]
    Cancelled,

    #[error("deadline exceeded")]
    DeadlineExceeded,
}

impl FetchError {
    /// Whether another attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FetchError::Status { .. } | FetchError::Transport(_) | FetchError::Decode(_)
        )
    }
}

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("cache I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt cache entry {path}: {source}")]
    Deserialize {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("cannot serialize cache entry: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum MetadataError {
    #[error("cannot read tags from {path}: {message}")]
    Read { path: PathBuf, message: String },

    #[error("cannot write tags to {path}: {message}")]
    Write { path: PathBuf, message: String },

    #[error("unknown tag field: {0}")]
    UnknownField(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot determine the platform config directory")]
    NoConfigDir,

    #[error("cannot determine the platform cache directory")]
    NoCacheDir,

    #[error("config file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("cannot write config file: {0}")]
    Serialize(#[from] toml::ser::Error),
}

#[derive(Error, Debug)]
pub enum ResolveError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// A field the recording search cannot do without is absent
    #[error("missing {0} tag")]
    IncompleteMetadata(&'static str),

    #[error(transparent)]
    Metadata(#[from] MetadataError),
}

pub type Result<T, E = ResolveError> = std::result::Result<T, E>;
