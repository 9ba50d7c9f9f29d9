//! Domain models for the local library cache

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A book as known to this device.
///
/// `duration_ms` and `size_bytes` are resolved lazily and, once positive,
/// are never replaced by an absent or non-positive value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Book {
    pub id: String,
    pub library_id: Option<String>,
    pub title: String,
    pub subtitle: Option<String>,
    /// Canonical ordered author names
    pub authors: Vec<String>,
    pub narrators: Vec<String>,
    pub publisher: Option<String>,
    pub publish_year: Option<i32>,
    pub genres: Vec<String>,
    /// Server cover reference; the image itself is fetched by URL
    pub cover_path: Option<String>,
    pub description: Option<String>,
    pub duration_ms: Option<i64>,
    pub size_bytes: Option<i64>,
    /// Server modification time (ms since epoch)
    pub updated_at: i64,
    /// Last local write (ms since epoch)
    pub cached_at: i64,
}

impl Book {
    /// Minimal book, used by tests and by callers persisting a stub.
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            library_id: None,
            title: title.into(),
            subtitle: None,
            authors: Vec::new(),
            narrators: Vec::new(),
            publisher: None,
            publish_year: None,
            genres: Vec::new(),
            cover_path: None,
            description: None,
            duration_ms: None,
            size_bytes: None,
            updated_at: 0,
            cached_at: 0,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.id.trim().is_empty() {
            return Err("Book id cannot be empty".to_string());
        }
        if self.title.trim().is_empty() {
            return Err("Book title cannot be empty".to_string());
        }
        Ok(())
    }

    /// Display string derived from the canonical author list.
    pub fn author_display(&self) -> String {
        self.authors.join(", ")
    }

    pub fn known_duration_ms(&self) -> Option<i64> {
        self.duration_ms.filter(|d| *d > 0)
    }

    pub fn known_size_bytes(&self) -> Option<i64> {
        self.size_bytes.filter(|s| *s > 0)
    }

    pub fn duration_secs(&self) -> Option<f64> {
        self.known_duration_ms().map(|ms| ms as f64 / 1000.0)
    }

    /// Keep previously resolved duration/size when this copy lacks them.
    pub fn retain_resolved_from(&mut self, existing: &Book) {
        if self.known_duration_ms().is_none() {
            self.duration_ms = existing.known_duration_ms();
        }
        if self.known_size_bytes().is_none() {
            self.size_bytes = existing.known_size_bytes();
        }
    }

    /// Equality ignoring the local write timestamp.
    pub fn same_content(&self, other: &Book) -> bool {
        let mut a = self.clone();
        a.cached_at = other.cached_at;
        a == *other
    }
}

/// Database row of the `books` table; list columns hold JSON arrays.
#[derive(Debug, Clone, FromRow)]
pub(crate) struct BookRow {
    pub id: String,
    pub library_id: Option<String>,
    pub title: String,
    pub subtitle: Option<String>,
    pub authors: String,
    pub narrators: String,
    pub publisher: Option<String>,
    pub publish_year: Option<i32>,
    pub genres: String,
    pub cover_path: Option<String>,
    pub description: Option<String>,
    pub duration_ms: Option<i64>,
    pub size_bytes: Option<i64>,
    pub updated_at: i64,
    pub cached_at: i64,
}

fn decode_list(json: &str) -> Vec<String> {
    serde_json::from_str(json).unwrap_or_default()
}

pub(crate) fn encode_list(list: &[String]) -> String {
    serde_json::to_string(list).unwrap_or_else(|_| "[]".to_string())
}

impl From<BookRow> for Book {
    fn from(row: BookRow) -> Self {
        Self {
            authors: decode_list(&row.authors),
            narrators: decode_list(&row.narrators),
            genres: decode_list(&row.genres),
            id: row.id,
            library_id: row.library_id,
            title: row.title,
            subtitle: row.subtitle,
            publisher: row.publisher,
            publish_year: row.publish_year,
            cover_path: row.cover_path,
            description: row.description,
            duration_ms: row.duration_ms,
            size_bytes: row.size_bytes,
            updated_at: row.updated_at,
            cached_at: row.cached_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate() {
        assert!(Book::new("li_1", "Dune").validate().is_ok());
        assert!(Book::new("", "Dune").validate().is_err());
        assert!(Book::new("li_1", "  ").validate().is_err());
    }

    #[test]
    fn test_retain_resolved_keeps_positive_values() {
        let mut existing = Book::new("li_1", "Dune");
        existing.duration_ms = Some(3_300_000);
        existing.size_bytes = Some(0);

        let mut fresh = Book::new("li_1", "Dune (Unabridged)");
        fresh.size_bytes = Some(1024);
        fresh.retain_resolved_from(&existing);

        assert_eq!(fresh.duration_ms, Some(3_300_000));
        assert_eq!(fresh.size_bytes, Some(1024));
        assert_eq!(fresh.title, "Dune (Unabridged)");
    }

    #[test]
    fn test_row_with_corrupt_list_decodes_empty() {
        let row = BookRow {
            id: "li_1".into(),
            library_id: None,
            title: "Dune".into(),
            subtitle: None,
            authors: "not json".into(),
            narrators: r#"["Scott Brick"]"#.into(),
            publisher: None,
            publish_year: Some(1965),
            genres: "[]".into(),
            cover_path: None,
            description: None,
            duration_ms: None,
            size_bytes: None,
            updated_at: 0,
            cached_at: 0,
        };
        let book = Book::from(row);
        assert!(book.authors.is_empty());
        assert_eq!(book.narrators, vec!["Scott Brick"]);
    }
}
