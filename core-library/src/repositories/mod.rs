//! # Repository Pattern Implementation
//!
//! Repository traits and their SQLite implementations.
//!
//! - Traits define the interface for each repository
//! - SQLite implementations use sqlx for async database access
//! - Pagination is supported via the `Page<T>` wrapper

pub mod book;
pub mod pagination;

pub use book::{BookRepository, SqliteBookRepository};
pub use pagination::{Page, PageRequest};
