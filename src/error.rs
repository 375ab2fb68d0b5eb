//! # Page Corruption Errors
//!
//! Every fallible operation in this crate returns `eyre::Result`. Structural
//! corruption of a page (a slot pointing outside the heap, a next-record
//! cycle, an owned count out of range) is raised as a [`PageCorrupted`]
//! value inside the report, so the B-tree layer above can tell corruption
//! apart from a caller error and start its consistency-check workflow:
//!
//! ```ignore
//! match btree::insert_rec(page, &index, &cursor, &rec, &mut mtr) {
//!     Err(report) if error::is_corruption(&report) => mark_index_corrupted(),
//!     other => other?,
//! }
//! ```
//!
//! Insufficient space is not an error; it is reported through the return
//! value of the insert functions.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("page {page_no} corrupted: {reason}")]
pub struct PageCorrupted {
    pub page_no: u32,
    pub reason: String,
}

/// Builds a report carrying a [`PageCorrupted`] error.
pub fn corrupted(page_no: u32, reason: impl Into<String>) -> eyre::Report {
    let reason = reason.into();
    tracing::warn!(page_no, %reason, "index page corrupted");
    eyre::Report::new(PageCorrupted { page_no, reason })
}

pub fn is_corruption(report: &eyre::Report) -> bool {
    report.downcast_ref::<PageCorrupted>().is_some()
}

/// Reclassifies a failed parse of page content as corruption of that page.
pub(crate) trait PageContext<T> {
    fn in_page(self, page_no: u32) -> eyre::Result<T>;
}

impl<T> PageContext<T> for eyre::Result<T> {
    fn in_page(self, page_no: u32) -> eyre::Result<T> {
        self.map_err(|report| {
            if is_corruption(&report) {
                report
            } else {
                corrupted(page_no, report.to_string())
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn corrupted_report_is_detectable() {
        let report = corrupted(7, "slot 3 points outside the heap");

        assert!(is_corruption(&report));
        assert_eq!(
            report.to_string(),
            "page 7 corrupted: slot 3 points outside the heap"
        );
    }

    #[test]
    fn parse_failure_becomes_corruption() {
        let result: eyre::Result<()> = Err(eyre::eyre!("record header runs outside the page"));

        let report = result.in_page(12).unwrap_err();
        let err = report.downcast_ref::<PageCorrupted>().unwrap();
        assert_eq!(err.page_no, 12);
        assert_eq!(err.reason, "record header runs outside the page");
    }

    #[test]
    fn ordinary_report_is_not_corruption() {
        let report = eyre::eyre!("record too large");

        assert!(!is_corruption(&report));
    }
}
