//! Local tag access, backed by `lofty`.
//!
//! Only the handful of fields genre resolution needs are exposed. A file
//! without a title or artist is a normal input (untagged rips are common
//! in directory scans) and surfaces as an error value, never a panic.

use std::collections::HashSet;
use std::path::Path;

use lofty::config::WriteOptions;
use lofty::file::{AudioFile, TaggedFileExt};
use lofty::read_from_path;
use lofty::tag::{ItemKey, ItemValue, Tag, TagItem};

use crate::error::{MetadataError, ResolveError};
use crate::resolver::Query;

const AUDIO_EXTENSIONS: &[&str] = &["flac", "mp3", "ogg", "opus", "m4a", "wav", "aiff", "aif", "ape", "wv"];

/// Text fields this crate reads or writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Title,
    Artist,
    Album,
    Genre,
}

impl Field {
    pub fn from_name(name: &str) -> Result<Self, MetadataError> {
        match name.trim().to_ascii_lowercase().as_str() {
            "title" => Ok(Field::Title),
            "artist" => Ok(Field::Artist),
            "album" => Ok(Field::Album),
            "genre" => Ok(Field::Genre),
            _ => Err(MetadataError::UnknownField(name.to_string())),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Field::Title => "title",
            Field::Artist => "artist",
            Field::Album => "album",
            Field::Genre => "genre",
        }
    }

    fn item_key(self) -> ItemKey {
        match self {
            Field::Title => ItemKey::TrackTitle,
            Field::Artist => ItemKey::TrackArtist,
            Field::Album => ItemKey::AlbumTitle,
            Field::Genre => ItemKey::Genre,
        }
    }
}

/// Field values as stored in a file. A field may hold several values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackFields {
    pub title: Vec<String>,
    pub artist: Vec<String>,
    pub album: Vec<String>,
    pub genre: Vec<String>,
    /// 0 when the container does not report a duration
    pub duration_ms: u64,
}

impl TrackFields {
    pub fn values(&self, field: Field) -> &[String] {
        match field {
            Field::Title => &self.title,
            Field::Artist => &self.artist,
            Field::Album => &self.album,
            Field::Genre => &self.genre,
        }
    }

    /// First non-blank value of `field`, trimmed.
    pub fn first(&self, field: Field) -> Option<&str> {
        self.values(field)
            .iter()
            .map(|v| v.trim())
            .find(|v| !v.is_empty())
    }

    /// Build a search query. Title and artist are required; a missing album
    /// only drops the optional release clause.
    pub fn to_query(&self) -> Result<Query, ResolveError> {
        let title = self.first(Field::Title).ok_or(ResolveError::IncompleteMetadata("title"))?;
        let artist = self.first(Field::Artist).ok_or(ResolveError::IncompleteMetadata("artist"))?;
        let album = self.first(Field::Album).unwrap_or("");
        Ok(Query::new(artist, title, album, self.duration_ms))
    }
}

/// Read and write named text fields of a local audio file.
pub trait MetadataStore: Send + Sync {
    fn read_fields(&self, path: &Path) -> Result<TrackFields, MetadataError>;

    /// Store `values` in `field`. With `replace` any existing values are
    /// dropped first; otherwise the new values are appended, skipping
    /// those already present (case-insensitively).
    fn write_field(&self, path: &Path, field: Field, values: &[String], replace: bool) -> Result<(), MetadataError>;
}

/// [`MetadataStore`] over the tag formats `lofty` understands.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoftyStore;

fn read_error(path: &Path, message: impl ToString) -> MetadataError {
    MetadataError::Read {
        path: path.to_path_buf(),
        message: message.to_string(),
    }
}

fn write_error(path: &Path, message: impl ToString) -> MetadataError {
    MetadataError::Write {
        path: path.to_path_buf(),
        message: message.to_string(),
    }
}

fn collect(tag: Option<&Tag>, field: Field) -> Vec<String> {
    tag.map(|t| t.get_strings(field.item_key()).map(str::to_string).collect())
        .unwrap_or_default()
}

impl MetadataStore for LoftyStore {
    fn read_fields(&self, path: &Path) -> Result<TrackFields, MetadataError> {
        let tagged_file = read_from_path(path).map_err(|e| read_error(path, e))?;
        let tag = tagged_file.primary_tag().or_else(|| tagged_file.first_tag());
        if tag.is_none() {
            log::debug!("{} has no tag block", path.display());
        }

        Ok(TrackFields {
            title: collect(tag, Field::Title),
            artist: collect(tag, Field::Artist),
            album: collect(tag, Field::Album),
            genre: collect(tag, Field::Genre),
            duration_ms: tagged_file.properties().duration().as_millis() as u64,
        })
    }

    fn write_field(&self, path: &Path, field: Field, values: &[String], replace: bool) -> Result<(), MetadataError> {
        let mut tagged_file = read_from_path(path).map_err(|e| read_error(path, e))?;
        let tag_type = tagged_file.primary_tag_type();
        if tagged_file.tag(tag_type).is_none() {
            tagged_file.insert_tag(Tag::new(tag_type));
        }

        let tag = tagged_file
            .tag_mut(tag_type)
            .ok_or_else(|| write_error(path, format!("no writable tag available for {:?}", tag_type)))?;

        let key = field.item_key();
        if replace {
            tag.remove_key(key);
        }
        let mut present: HashSet<String> = tag.get_strings(key).map(str::to_lowercase).collect();
        for value in values.iter().map(|v| v.trim()).filter(|v| !v.is_empty()) {
            if present.insert(value.to_lowercase()) {
                tag.push(TagItem::new(key, ItemValue::Text(value.to_string())));
            }
        }

        tagged_file
            .save_to_path(path, WriteOptions::default())
            .map_err(|e| write_error(path, e))?;
        log::info!("wrote {} {} value(s) to {}", values.len(), field.name(), path.display());
        Ok(())
    }
}

/// Whether `path` has an audio extension worth handing to the store.
pub fn is_supported_audio(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| AUDIO_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}
