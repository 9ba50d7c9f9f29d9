//! Audiobook server API response types
//!
//! Metadata fields whose shape varies between server versions (authors,
//! narrators, published year) are kept as raw JSON here and normalized once
//! by the library cache at ingestion.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `media.metadata` of a library item
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BookMetadataDto {
    pub title: Option<String>,
    pub subtitle: Option<String>,
    /// Flattened author string (`"A, B"`)
    pub author_name: Option<String>,
    /// Either a string or a list of `{id, name}` objects
    pub authors: Option<Value>,
    pub narrator_name: Option<String>,
    /// Either a string or a list of strings
    pub narrators: Option<Value>,
    pub publisher: Option<String>,
    /// String or number depending on server version
    pub published_year: Option<Value>,
    pub genres: Vec<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MediaDto {
    pub metadata: BookMetadataDto,
    pub cover_path: Option<String>,
    /// Seconds
    pub duration: Option<f64>,
    /// Bytes
    pub size: Option<i64>,
}

/// Library item (a book)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LibraryItemDto {
    pub id: String,
    #[serde(default)]
    pub library_id: Option<String>,
    #[serde(default)]
    pub media: MediaDto,
    /// Total size of the item's files in bytes
    #[serde(default)]
    pub size: Option<i64>,
    /// Milliseconds since epoch
    #[serde(default)]
    pub updated_at: Option<i64>,
}

impl LibraryItemDto {
    /// Duration in seconds, when the server knows it.
    pub fn duration_secs(&self) -> Option<f64> {
        self.media.duration.filter(|d| *d > 0.0)
    }

    /// Size in bytes from the item or its media, when positive.
    pub fn size_bytes(&self) -> Option<i64> {
        self.size
            .filter(|s| *s > 0)
            .or_else(|| self.media.size.filter(|s| *s > 0))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LibraryDto {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub media_type: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct LibrariesResponse {
    pub libraries: Vec<LibraryDto>,
}

/// One page of `GET /api/libraries/{id}/items`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LibraryItemsPage {
    pub results: Vec<LibraryItemDto>,
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub limit: u32,
    #[serde(default)]
    pub page: u32,
}

impl LibraryItemsPage {
    /// Whether another page follows this one.
    pub fn has_more(&self) -> bool {
        let seen = (self.page as u64 + 1) * self.limit as u64;
        self.limit > 0 && !self.results.is_empty() && seen < self.total
    }
}

/// `GET /api/me/progress/{id}`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MediaProgressDto {
    /// Seconds
    pub current_time: f64,
    /// Seconds
    pub duration: f64,
    /// 0..1
    pub progress: f64,
    pub is_finished: bool,
    pub last_update: Option<i64>,
}

/// Body of `PATCH /api/me/progress/{id}`.
///
/// Position fields are sent only when they must be preserved, e.g. when
/// un-finishing a book at a chosen resume point.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressUpdate {
    pub is_finished: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_time: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
}

impl ProgressUpdate {
    pub fn finished(is_finished: bool) -> Self {
        Self {
            is_finished,
            ..Default::default()
        }
    }

    /// A position update; `progress` is derived when `duration` is positive.
    pub fn position(current_time: f64, duration: f64, is_finished: bool) -> Self {
        let progress = if duration > 0.0 {
            Some((current_time / duration).clamp(0.0, 1.0))
        } else {
            None
        };
        Self {
            is_finished,
            current_time: Some(current_time),
            duration: (duration > 0.0).then_some(duration),
            progress,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioTrackDto {
    #[serde(default)]
    pub index: u32,
    /// Seconds from the start of the book
    #[serde(default)]
    pub start_offset: f64,
    /// Seconds
    pub duration: f64,
    #[serde(default)]
    pub title: Option<String>,
    /// Server-relative URL
    pub content_url: String,
    #[serde(default)]
    pub mime_type: Option<String>,
}

/// Response of `POST /api/items/{id}/play`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackSessionDto {
    pub id: String,
    #[serde(default)]
    pub audio_tracks: Vec<AudioTrackDto>,
    #[serde(default)]
    pub current_time: f64,
    #[serde(default)]
    pub duration: f64,
}

impl PlaybackSessionDto {
    /// Sum of track durations in seconds.
    pub fn total_duration(&self) -> f64 {
        self.audio_tracks.iter().map(|t| t.duration.max(0.0)).sum()
    }
}

/// Body of session sync/close calls
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSync {
    /// Seconds
    pub current_time: f64,
    /// Seconds listened since the previous sync
    pub time_listened: f64,
    /// Seconds
    pub duration: f64,
}

/// One file of a library item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemFile {
    pub ino: String,
    pub name: Option<String>,
    pub size: u64,
}

/// Parse the file listing, which is either a bare list or `{files: [...]}`.
///
/// Sizes are read from `size`, `bytes`, `fileSize` or `metadata.size`, as a
/// number or numeric string. Entries without a readable size count as 0.
pub fn parse_item_files(value: &Value) -> Vec<ItemFile> {
    let entries: &[Value] = match value {
        Value::Array(list) => list.as_slice(),
        Value::Object(map) => match map.get("files").or_else(|| map.get("libraryFiles")) {
            Some(Value::Array(list)) => list.as_slice(),
            _ => &[],
        },
        _ => &[],
    };

    entries
        .iter()
        .filter_map(|entry| {
            let obj = entry.as_object()?;
            let metadata = obj.get("metadata").and_then(Value::as_object);

            let size = ["size", "bytes", "fileSize"]
                .iter()
                .find_map(|key| obj.get(*key).and_then(size_from_value))
                .or_else(|| metadata.and_then(|m| m.get("size")).and_then(size_from_value))
                .unwrap_or(0);

            let ino = obj
                .get("ino")
                .and_then(|v| match v {
                    Value::String(s) => Some(s.clone()),
                    Value::Number(n) => Some(n.to_string()),
                    _ => None,
                })
                .unwrap_or_default();

            let name = obj
                .get("name")
                .or_else(|| obj.get("filename"))
                .or_else(|| metadata.and_then(|m| m.get("filename")))
                .and_then(Value::as_str)
                .map(str::to_string);

            Some(ItemFile { ino, name, size })
        })
        .collect()
}

fn size_from_value(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
