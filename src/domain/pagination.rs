//! Pagination
//!
//! Page/limit sanitation shared by every paginated read, and the envelope
//! returned alongside a page of results.

use serde::{Deserialize, Serialize};

pub const DEFAULT_PAGE: i64 = 1;
pub const DEFAULT_LIMIT: i64 = 10;
pub const MAX_LIMIT: i64 = 100;

/// A sanitized page request. Always `page >= 1` and `1 <= limit <= MAX_LIMIT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    page: i64,
    limit: i64,
}

impl PageRequest {
    /// Build from numeric values; non-positive values fall back to defaults.
    pub fn new(page: i64, limit: i64) -> Self {
        let page = if page > 0 { page } else { DEFAULT_PAGE };
        let limit = if limit > 0 {
            limit.min(MAX_LIMIT)
        } else {
            DEFAULT_LIMIT
        };
        Self { page, limit }
    }

    /// Build from raw query-string values.
    ///
    /// Missing, non-numeric and non-positive values fall back to defaults.
    pub fn from_raw(page: Option<&str>, limit: Option<&str>) -> Self {
        Self::new(parse_or(page, DEFAULT_PAGE), parse_or(limit, DEFAULT_LIMIT))
    }

    pub fn page(&self) -> i64 {
        self.page
    }

    pub fn limit(&self) -> i64 {
        self.limit
    }

    pub fn offset(&self) -> i64 {
        (self.page - 1).saturating_mul(self.limit)
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: DEFAULT_PAGE,
            limit: DEFAULT_LIMIT,
        }
    }
}

fn parse_or(raw: Option<&str>, default: i64) -> i64 {
    raw.and_then(|s| s.trim().parse::<i64>().ok())
        .unwrap_or(default)
}

/// Pagination block reported with each page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub page: i64,
    pub limit: i64,
    pub total: i64,
    pub total_pages: i64,
    pub has_more: bool,
}

impl Pagination {
    pub fn new(request: PageRequest, total: i64) -> Self {
        let total = total.max(0);
        let limit = request.limit();
        let total_pages = (total + limit - 1) / limit;

        Self {
            page: request.page(),
            limit,
            total,
            total_pages,
            has_more: request.page() < total_pages,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_raw_values_use_defaults() {
        let request = PageRequest::from_raw(Some("invalid"), Some("invalid"));
        assert_eq!(request.page(), 1);
        assert_eq!(request.limit(), 10);

        let request = PageRequest::from_raw(None, None);
        assert_eq!(request, PageRequest::default());
    }

    #[test]
    fn test_non_positive_values_use_defaults() {
        let request = PageRequest::new(0, -5);
        assert_eq!(request.page(), 1);
        assert_eq!(request.limit(), 10);

        let request = PageRequest::from_raw(Some("-3"), Some("0"));
        assert_eq!(request, PageRequest::default());
    }

    #[test]
    fn test_limit_capped() {
        assert_eq!(PageRequest::new(1, 5000).limit(), MAX_LIMIT);
    }

    #[test]
    fn test_offset() {
        assert_eq!(PageRequest::new(1, 10).offset(), 0);
        assert_eq!(PageRequest::new(3, 20).offset(), 40);
    }

    #[test]
    fn test_pagination_math() {
        let p = Pagination::new(PageRequest::new(1, 10), 25);
        assert_eq!(p.total_pages, 3);
        assert!(p.has_more);

        let p = Pagination::new(PageRequest::new(3, 10), 25);
        assert!(!p.has_more);

        let p = Pagination::new(PageRequest::new(1, 10), 20);
        assert_eq!(p.total_pages, 2);

        let p = Pagination::new(PageRequest::default(), 0);
        assert_eq!(p.total_pages, 0);
        assert!(!p.has_more);
    }

    #[test]
    fn test_pagination_serializes_camel_case() {
        let p = Pagination::new(PageRequest::default(), 2);
        let json = serde_json::to_value(p).unwrap();
        assert_eq!(json["totalPages"], 1);
        assert_eq!(json["hasMore"], false);
    }
}
