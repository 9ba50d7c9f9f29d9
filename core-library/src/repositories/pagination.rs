//! Offset pagination over the local book table.
//!
//! Pages are zero-based, matching the server's `page` query parameter, so a
//! view can page through the cache and the catalog the same way.

use serde::{Deserialize, Serialize};

const DEFAULT_PAGE_SIZE: u32 = 50;

/// One page of a listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub page: u32,
    pub page_size: u32,
}

impl PageRequest {
    /// A zero `page_size` is bumped to one row.
    pub fn new(page: u32, page_size: u32) -> Self {
        Self {
            page,
            page_size: page_size.max(1),
        }
    }

    pub fn first(page_size: u32) -> Self {
        Self::new(0, page_size)
    }

    pub fn next(self) -> Self {
        Self {
            page: self.page.saturating_add(1),
            ..self
        }
    }

    pub fn limit(&self) -> i64 {
        i64::from(self.page_size)
    }

    pub fn offset(&self) -> i64 {
        i64::from(self.page) * i64::from(self.page_size)
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::first(DEFAULT_PAGE_SIZE)
    }
}

/// Rows of one page plus the size of the whole listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub request: PageRequest,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, total: u64, request: PageRequest) -> Self {
        Self {
            items,
            total,
            request,
        }
    }

    pub fn total_pages(&self) -> u64 {
        self.total.div_ceil(u64::from(self.request.page_size))
    }

    pub fn has_next(&self) -> bool {
        u64::from(self.request.page) + 1 < self.total_pages()
    }

    /// Request for the following page, if there is one.
    pub fn next_request(&self) -> Option<PageRequest> {
        self.has_next().then(|| self.request.next())
    }
}
