pub mod cache;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod lookup;
pub mod metadata;
pub mod musicbrainz;
pub mod query;
pub mod rate_limiter;
pub mod resolver;
pub mod tags;

pub use cache::{CacheConfig, CacheEntry, CacheHit, DiskCache, Source};
pub use config::Config;
pub use error::{CacheError, ConfigError, FetchError, MetadataError, ResolveError};
pub use fetcher::{CancelToken, FetchContext, Fetcher, FetcherConfig};
pub use lookup::{Enrichment, GenreResolver, Resolution};
pub use metadata::{is_supported_audio, Field, LoftyStore, MetadataStore, TrackFields};
pub use musicbrainz::{Catalog, MusicBrainzClient};
pub use query::{build_search_query, escape_lucene, QueryField};
pub use resolver::{resolve_best_recording, resolve_best_release_group, Query};
pub use tags::GenreTagSet;
