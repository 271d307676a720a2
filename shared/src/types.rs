//! Common types used across the inventory service

use serde::{Deserialize, Serialize};

/// Default page size for movement listings
pub const DEFAULT_PAGE_LIMIT: i64 = 100;

/// Largest page a client may request
pub const MAX_PAGE_LIMIT: i64 = 500;

/// Limit/offset pagination parameters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl PageRequest {
    pub fn new(limit: i64, offset: i64) -> Self {
        Self {
            limit: Some(limit),
            offset: Some(offset),
        }
    }

    /// Effective `(limit, offset)`: the limit is clamped to `1..=MAX_PAGE_LIMIT`
    pub fn resolve(&self) -> Result<(i64, i64), &'static str> {
        let offset = self.offset.unwrap_or(0);
        if offset < 0 {
            return Err("Offset cannot be negative");
        }
        let limit = self
            .limit
            .unwrap_or(DEFAULT_PAGE_LIMIT)
            .clamp(1, MAX_PAGE_LIMIT);
        Ok((limit, offset))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_defaults() {
        assert_eq!(PageRequest::default().resolve(), Ok((DEFAULT_PAGE_LIMIT, 0)));
    }

    #[test]
    fn test_page_limit_clamped() {
        assert_eq!(PageRequest::new(10_000, 5).resolve(), Ok((MAX_PAGE_LIMIT, 5)));
        assert_eq!(PageRequest::new(0, 0).resolve(), Ok((1, 0)));
    }

    #[test]
    fn test_negative_offset_rejected() {
        assert!(PageRequest::new(10, -1).resolve().is_err());
    }
}
