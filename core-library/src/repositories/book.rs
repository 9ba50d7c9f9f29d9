//! Book repository trait and implementation

use crate::error::{LibraryError, Result};
use crate::models::{encode_list, Book, BookRow};
use crate::repositories::{Page, PageRequest};
use async_trait::async_trait;
use sqlx::{query, query_as, query_scalar, Sqlite, SqlitePool, Transaction};

/// Book repository interface for data access operations
#[async_trait]
pub trait BookRepository: Send + Sync {
    /// Find a book by its ID
    async fn find_by_id(&self, id: &str) -> Result<Option<Book>>;

    /// Fetch several books; missing ids are skipped, order is unspecified.
    async fn find_by_ids(&self, ids: &[String]) -> Result<Vec<Book>>;

    /// Insert or replace a book.
    ///
    /// A stored positive duration or size survives an upsert whose copy
    /// lacks it.
    async fn upsert(&self, book: &Book) -> Result<()>;

    /// Upsert a batch in one transaction.
    async fn upsert_many(&self, books: &[Book]) -> Result<()>;

    /// Books ordered by title
    async fn query(&self, page_request: PageRequest) -> Result<Page<Book>>;

    async fn count(&self) -> Result<i64>;

    /// Remove every cached book, returning how many were removed.
    async fn delete_all(&self) -> Result<u64>;

    /// Record a duration if none is known yet.
    ///
    /// # Returns
    /// - `Ok(true)` if the row was updated
    /// - `Ok(false)` if the book is missing or already has a positive value
    async fn set_duration(&self, id: &str, duration_ms: i64) -> Result<bool>;

    /// Record a size if none is known yet. Same contract as
    /// [`set_duration`](Self::set_duration).
    async fn set_size(&self, id: &str, size_bytes: i64) -> Result<bool>;
}

/// SQLite implementation of BookRepository
pub struct SqliteBookRepository {
    pool: SqlitePool,
}

impl SqliteBookRepository {
    /// Create a new SqliteBookRepository
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn upsert_in(tx: &mut Transaction<'_, Sqlite>, book: &Book) -> Result<()> {
        book.validate().map_err(|e| LibraryError::InvalidInput {
            field: "Book".to_string(),
            message: e,
        })?;

        query(UPSERT_SQL)
            .bind(&book.id)
            .bind(&book.library_id)
            .bind(&book.title)
            .bind(&book.subtitle)
            .bind(encode_list(&book.authors))
            .bind(encode_list(&book.narrators))
            .bind(&book.publisher)
            .bind(book.publish_year)
            .bind(encode_list(&book.genres))
            .bind(&book.cover_path)
            .bind(&book.description)
            .bind(book.duration_ms)
            .bind(book.size_bytes)
            .bind(book.updated_at)
            .bind(book.cached_at)
            .execute(&mut **tx)
            .await?;

        Ok(())
    }
}

const UPSERT_SQL: &str = r#"
    INSERT INTO books (
        id, library_id, title, subtitle, authors, narrators, publisher,
        publish_year, genres, cover_path, description, duration_ms,
        size_bytes, updated_at, cached_at
    )
    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
    ON CONFLICT(id) DO UPDATE SET
        library_id = excluded.library_id,
        title = excluded.title,
        subtitle = excluded.subtitle,
        authors = excluded.authors,
        narrators = excluded.narrators,
        publisher = excluded.publisher,
        publish_year = excluded.publish_year,
        genres = excluded.genres,
        cover_path = excluded.cover_path,
        description = excluded.description,
        duration_ms = CASE
            WHEN excluded.duration_ms IS NOT NULL AND excluded.duration_ms > 0
                THEN excluded.duration_ms
            WHEN books.duration_ms IS NOT NULL AND books.duration_ms > 0
                THEN books.duration_ms
            ELSE excluded.duration_ms
        END,
        size_bytes = CASE
            WHEN excluded.size_bytes IS NOT NULL AND excluded.size_bytes > 0
                THEN excluded.size_bytes
            WHEN books.size_bytes IS NOT NULL AND books.size_bytes > 0
                THEN books.size_bytes
            ELSE excluded.size_bytes
        END,
        updated_at = excluded.updated_at,
        cached_at = excluded.cached_at
"#;

#[async_trait]
impl BookRepository for SqliteBookRepository {
    async fn find_by_id(&self, id: &str) -> Result<Option<Book>> {
        let row = query_as::<_, BookRow>("SELECT * FROM books WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(Book::from))
    }

    async fn find_by_ids(&self, ids: &[String]) -> Result<Vec<Book>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!("SELECT * FROM books WHERE id IN ({})", placeholders);
        let mut statement = query_as::<_, BookRow>(&sql);
        for id in ids {
            statement = statement.bind(id);
        }

        let rows = statement.fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(Book::from).collect())
    }

    async fn upsert(&self, book: &Book) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        Self::upsert_in(&mut tx, book).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn upsert_many(&self, books: &[Book]) -> Result<()> {
        if books.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for book in books {
            Self::upsert_in(&mut tx, book).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn query(&self, page_request: PageRequest) -> Result<Page<Book>> {
        let total = self.count().await?;

        let rows = query_as::<_, BookRow>(
            "SELECT * FROM books ORDER BY title COLLATE NOCASE, id LIMIT ? OFFSET ?",
        )
        .bind(page_request.limit())
        .bind(page_request.offset())
        .fetch_all(&self.pool)
        .await?;

        let books = rows.into_iter().map(Book::from).collect();
        Ok(Page::new(books, total as u64, page_request))
    }

    async fn count(&self) -> Result<i64> {
        let count: i64 = query_scalar("SELECT COUNT(*) FROM books")
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }

    async fn delete_all(&self) -> Result<u64> {
        let result = query("DELETE FROM books").execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn set_duration(&self, id: &str, duration_ms: i64) -> Result<bool> {
        if duration_ms <= 0 {
            return Ok(false);
        }

        let result = query(
            "UPDATE books SET duration_ms = ? WHERE id = ? AND (duration_ms IS NULL OR duration_ms <= 0)",
        )
        .bind(duration_ms)
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn set_size(&self, id: &str, size_bytes: i64) -> Result<bool> {
        if size_bytes <= 0 {
            return Ok(false);
        }

        let result = query(
            "UPDATE books SET size_bytes = ? WHERE id = ? AND (size_bytes IS NULL OR size_bytes <= 0)",
        )
        .bind(size_bytes)
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
