//! # Library Management Module
//!
//! Owns the on-device book cache and the repository used to access it.
//!
//! ## Overview
//!
//! This module manages:
//! - SQLite database schema and migrations
//! - Normalization of server items into canonical [`Book`] records
//! - [`LocalLibraryCache`]: network-first reads with write-through and
//!   offline fallback, bulk sync after login, change notifications

pub mod cache;
pub mod db;
pub mod error;
pub mod models;
pub mod normalize;
pub mod repositories;

pub use cache::{LocalLibraryCache, SyncOptions, SyncOutcome};
pub use db::{create_pool, create_test_pool, DatabaseConfig};
pub use error::{LibraryError, Result};
pub use models::Book;
pub use repositories::{BookRepository, Page, PageRequest, SqliteBookRepository};
