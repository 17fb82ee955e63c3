//! Offset pagination metadata for class-list pages.

use serde::Serialize;

use crate::application::filter::FilterSignature;

/// Where a page sits inside the full filtered result.
///
/// Pages are cut over distinct students, so `total_pages` follows
/// `total_students`; `total_matching` counts the grade records behind them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PaginationMeta {
    pub page: u32,
    pub page_size: u32,
    pub total_pages: u64,
    pub total_matching: u64,
    pub total_students: u64,
}

impl PaginationMeta {
    pub fn new(signature: &FilterSignature, total_matching: u64, total_students: u64) -> Self {
        let page_size = u64::from(signature.page_size.max(1));
        Self {
            page: signature.page,
            page_size: signature.page_size,
            total_pages: total_students.div_ceil(page_size),
            total_matching,
            total_students,
        }
    }

    pub fn has_next(&self) -> bool {
        u64::from(self.page) < self.total_pages
    }

    pub fn has_prev(&self) -> bool {
        self.page > 1
    }
}
