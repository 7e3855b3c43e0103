//! Read model trait and paging.

use serde::Serialize;

/// A query-side view kept current by a projection.
pub trait ReadModel: Send + Sync {
    fn name(&self) -> &'static str;

    /// Number of entries, or 0 while the view is being written.
    fn count(&self) -> usize;
}

pub const DEFAULT_PAGE_SIZE: u32 = 10;
pub const MAX_PAGE_SIZE: u32 = 50;

/// A 1-based page request. Out-of-range input is clamped, never rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    page: u32,
    limit: u32,
}

impl PageRequest {
    /// Builds a request from optional query parameters.
    ///
    /// A missing or zero page becomes 1. A missing or zero limit becomes
    /// [`DEFAULT_PAGE_SIZE`], and limits above [`MAX_PAGE_SIZE`] are capped.
    pub fn new(page: Option<u32>, limit: Option<u32>) -> Self {
        let page = page.filter(|p| *p > 0).unwrap_or(1);
        let limit = limit
            .filter(|l| *l > 0)
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .min(MAX_PAGE_SIZE);
        Self { page, limit }
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    fn offset(&self) -> usize {
        (self.page as usize - 1).saturating_mul(self.limit as usize)
    }

    /// Cuts one page out of `items`, which must already be in display order.
    pub fn slice<T, I>(&self, items: I) -> Page<T>
    where
        I: ExactSizeIterator<Item = T>,
    {
        let total = items.len();
        let items = items.skip(self.offset()).take(self.limit as usize).collect();
        Page {
            page: self.page,
            limit: self.limit,
            total,
            items,
        }
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(None, None)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Page<T> {
    pub page: u32,
    pub limit: u32,
    pub total: usize,
    pub items: Vec<T>,
}
