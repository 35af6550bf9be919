//! Pagination types for list operations.

use serde::{Deserialize, Serialize};

/// A request for a page of results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    /// The page number (1-indexed).
    pub page: usize,
    /// The number of items per page.
    pub limit: usize,
}

impl PageRequest {
    /// The default page size.
    pub const DEFAULT_LIMIT: usize = 20;
    /// The maximum allowed page size.
    pub const MAX_LIMIT: usize = 100;

    /// Creates a new page request, clamping the page to at least 1 and the
    /// limit to `1..=MAX_LIMIT`.
    #[must_use]
    pub fn new(page: usize, limit: usize) -> Self {
        Self {
            page: page.max(1),
            limit: limit.clamp(1, Self::MAX_LIMIT),
        }
    }

    /// Creates a page request for the first page with default size.
    #[must_use]
    pub fn first() -> Self {
        Self::new(1, Self::DEFAULT_LIMIT)
    }

    /// Returns the number of items to skip.
    #[must_use]
    pub const fn offset(&self) -> usize {
        (self.page - 1) * self.limit
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::first()
    }
}

/// A page of results ordered newest-first.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Paged<T> {
    /// The items on this page.
    pub items: Vec<T>,
    /// The page number (1-indexed).
    pub page: usize,
    /// Whether more items exist after this page.
    pub has_more: bool,
}

impl<T> Paged<T> {
    /// Slices an already ordered collection into the requested page.
    #[must_use]
    pub fn from_ordered(all: Vec<T>, request: PageRequest) -> Self {
        let total = all.len();
        let start = request.offset().min(total);
        let end = (start + request.limit).min(total);
        let items = all.into_iter().skip(start).take(end - start).collect();
        Self {
            items,
            page: request.page,
            has_more: end < total,
        }
    }

    /// Maps the page content to a different type.
    #[must_use]
    pub fn map<U, F: FnMut(T) -> U>(self, f: F) -> Paged<U> {
        Paged {
            items: self.items.into_iter().map(f).collect(),
            page: self.page,
            has_more: self.has_more,
        }
    }
}
