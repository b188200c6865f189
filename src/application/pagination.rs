//! Page-number pagination with a hard page-size ceiling.

use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum PaginationError {
    #[error("page must be at least 1")]
    ZeroPage,
    #[error("page_size must be at least 1")]
    ZeroPageSize,
}

impl PaginationError {
    pub fn field(self) -> &'static str {
        match self {
            PaginationError::ZeroPage => "page",
            PaginationError::ZeroPageSize => "page_size",
        }
    }
}

/// A validated 1-based page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    page: u32,
    page_size: u32,
}

impl PageRequest {
    /// Sizes above `max_page_size` are clamped rather than rejected.
    pub fn new(page: u32, page_size: u32, max_page_size: u32) -> Result<Self, PaginationError> {
        if page == 0 {
            return Err(PaginationError::ZeroPage);
        }
        if page_size == 0 {
            return Err(PaginationError::ZeroPageSize);
        }
        Ok(Self {
            page,
            page_size: page_size.min(max_page_size.max(1)),
        })
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.page_size)
    }
}

pub fn total_pages(total: u64, page_size: u32) -> u64 {
    if page_size == 0 {
        return 0;
    }
    total.div_ceil(u64::from(page_size))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offset_is_zero_based() {
        let request = PageRequest::new(3, 20, 100).expect("valid page");
        assert_eq!(request.offset(), 40);
    }

    #[test]
    fn page_size_is_clamped_to_ceiling() {
        let request = PageRequest::new(1, 500, 100).expect("valid page");
        assert_eq!(request.page_size(), 100);
    }

    #[test]
    fn zero_values_are_rejected() {
        assert_eq!(PageRequest::new(0, 20, 100), Err(PaginationError::ZeroPage));
        assert_eq!(
            PageRequest::new(1, 0, 100),
            Err(PaginationError::ZeroPageSize)
        );
    }

    #[test]
    fn total_pages_rounds_up() {
        assert_eq!(total_pages(0, 20), 0);
        assert_eq!(total_pages(20, 20), 1);
        assert_eq!(total_pages(21, 20), 2);
    }
}
