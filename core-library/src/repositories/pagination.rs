//! Pagination helper types for repository queries

use serde::{Deserialize, Serialize};

/// Largest page a caller may request
pub const MAX_PAGE_SIZE: u32 = 100;

/// Pagination request parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    /// Current page number (0-indexed)
    pub page: u32,
    /// Number of items per page, capped at [`MAX_PAGE_SIZE`]
    pub page_size: u32,
}

impl PageRequest {
    /// Create a new page request
    ///
    /// # Examples
    ///
    /// ```
    /// use core_library::repositories::PageRequest;
    ///
    /// let request = PageRequest::new(2, 500);
    /// assert_eq!(request.page_size, 100);
    /// assert_eq!(request.offset(), 200);
    /// ```
    pub fn new(page: u32, page_size: u32) -> Self {
        Self {
            page,
            page_size: page_size.min(MAX_PAGE_SIZE),
        }
    }

    /// SQL OFFSET value
    pub fn offset(&self) -> i64 {
        i64::from(self.page) * i64::from(self.page_size)
    }

    /// SQL LIMIT value
    pub fn limit(&self) -> i64 {
        i64::from(self.page_size)
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: 0,
            page_size: 20,
        }
    }
}

/// Paginated response containing items and metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Total number of items across all pages
    pub total: u64,
    pub page: u32,
    pub total_pages: u32,
    pub page_size: u32,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, total: u64, request: PageRequest) -> Self {
        let total_pages = if request.page_size == 0 {
            0
        } else {
            total.div_ceil(u64::from(request.page_size)) as u32
        };

        Self {
            items,
            total,
            page: request.page,
            total_pages,
            page_size: request.page_size,
        }
    }

    /// Check if there are more pages after the current one
    pub fn has_next(&self) -> bool {
        self.page + 1 < self.total_pages
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_request_default() {
        let request = PageRequest::default();
        assert_eq!(request.page, 0);
        assert_eq!(request.page_size, 20);
    }

    #[test]
    fn test_page_request_offset_and_limit() {
        let request = PageRequest::new(0, 20);
        assert_eq!(request.offset(), 0);
        assert_eq!(request.limit(), 20);

        let request = PageRequest::new(3, 25);
        assert_eq!(request.offset(), 75);
    }

    #[test]
    fn test_page_request_caps_page_size() {
        let request = PageRequest::new(0, 10_000);
        assert_eq!(request.page_size, MAX_PAGE_SIZE);
    }

    #[test]
    fn test_page_new() {
        let page = Page::new(vec![1, 2, 3], 25, PageRequest::new(0, 10));

        assert_eq!(page.items.len(), 3);
        assert_eq!(page.total, 25);
        assert_eq!(page.total_pages, 3);
        assert!(page.has_next());

        let last = Page::new(vec![1], 25, PageRequest::new(2, 10));
        assert!(!last.has_next());
    }

    #[test]
    fn test_page_zero_page_size() {
        let page: Page<i32> = Page::new(vec![], 25, PageRequest::new(0, 0));
        assert_eq!(page.total_pages, 0);
        assert!(!page.has_next());
    }
}
