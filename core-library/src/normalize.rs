//! Ingestion of server items into canonical [`Book`] records.
//!
//! The server reports people either as a flattened string (`"A, B"`), a list
//! of strings, or a list of `{name}` objects. They are reduced here to an
//! ordered, de-duplicated `Vec<String>` so read sites never reinterpret the
//! raw shape.

use crate::models::Book;
use provider_audiobookshelf::LibraryItemDto;
use serde_json::Value;

/// Placeholder for items whose metadata has no title.
pub const UNTITLED: &str = "Untitled";

/// Build a book from a server item. `now_ms` stamps `cached_at` and stands
/// in for a missing server `updatedAt`.
pub fn book_from_item(item: &LibraryItemDto, now_ms: i64) -> Book {
    let meta = &item.media.metadata;

    let mut authors = people(meta.authors.as_ref());
    if authors.is_empty() {
        authors = split_names(meta.author_name.as_deref());
    }
    let mut narrators = people(meta.narrators.as_ref());
    if narrators.is_empty() {
        narrators = split_names(meta.narrator_name.as_deref());
    }

    let title = meta
        .title
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .unwrap_or(UNTITLED)
        .to_string();

    Book {
        id: item.id.clone(),
        library_id: item.library_id.clone(),
        title,
        subtitle: non_empty(meta.subtitle.as_deref()),
        authors,
        narrators,
        publisher: non_empty(meta.publisher.as_deref()),
        publish_year: meta.published_year.as_ref().and_then(year),
        genres: dedup(meta.genres.iter().map(|g| g.trim().to_string())),
        cover_path: non_empty(item.media.cover_path.as_deref()),
        description: non_empty(meta.description.as_deref()),
        duration_ms: item.duration_secs().map(|s| (s * 1000.0).round() as i64),
        size_bytes: item.size_bytes(),
        updated_at: item.updated_at.unwrap_or(now_ms),
        cached_at: now_ms,
    }
}

/// Names from a string, a list of strings or a list of `{name}` objects.
pub fn people(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::String(s)) => split_names(Some(s)),
        Some(Value::Array(list)) => dedup(list.iter().filter_map(|entry| match entry {
            Value::String(s) => Some(s.trim().to_string()),
            Value::Object(map) => map
                .get("name")
                .and_then(Value::as_str)
                .map(|s| s.trim().to_string()),
            _ => None,
        })),
        _ => Vec::new(),
    }
}

/// Split a flattened `"A, B"` string.
pub fn split_names(value: Option<&str>) -> Vec<String> {
    match value {
        Some(s) => dedup(s.split(',').map(|part| part.trim().to_string())),
        None => Vec::new(),
    }
}

fn dedup(names: impl Iterator<Item = String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for name in names {
        if !name.is_empty() && !out.contains(&name) {
            out.push(name);
        }
    }
    out
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn year(value: &Value) -> Option<i32> {
    let year = match value {
        Value::Number(n) => n.as_i64()?,
        Value::String(s) => s.trim().get(..4)?.parse().ok()?,
        _ => return None,
    };
    i32::try_from(year).ok().filter(|y| (0..=9999).contains(y))
}
