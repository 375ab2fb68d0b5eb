//! # Crash Recovery
//!
//! Replays a redo log against a set of pages. Frames are read in log order
//! until the first one that is truncated or fails its checksum; the records
//! of every intact frame are applied to the pages they name.
//!
//! ## Idempotency
//!
//! A page whose LSN is at least a frame's LSN already contains that frame,
//! so its records are skipped for that page. Pages changed by a frame are
//! stamped with the frame's LSN once the whole frame has been applied, so
//! running recovery twice over the same log changes nothing the second time.
//!
//! ## Damaged Records
//!
//! A record that does not decode, names a page that does not exist, or does
//! not fit the page it names is reported in [`RecoveryReport::skipped`] and
//! recovery goes on with the next one. The page such a record names is not
//! modified by it.

use eyre::Result;
use hashbrown::{HashMap, HashSet};

use super::apply::{apply, apply_page_create, ApplyOutcome};
use super::mtr::read_frame;
use super::record::{decode_all, RedoOp};
use crate::config::PAGE_SIZE;
use crate::storage::page::{page_lsn, set_page_lsn};

/// Pages addressed by number during recovery.
pub trait PageStore {
    fn page_mut(&mut self, page_no: u32) -> Option<&mut [u8]>;

    /// Returns the page, allocating a zeroed one if it does not exist.
    fn page_mut_or_alloc(&mut self, page_no: u32) -> &mut [u8];
}

impl PageStore for HashMap<u32, Vec<u8>> {
    fn page_mut(&mut self, page_no: u32) -> Option<&mut [u8]> {
        self.get_mut(&page_no).map(Vec::as_mut_slice)
    }

    fn page_mut_or_alloc(&mut self, page_no: u32) -> &mut [u8] {
        self.entry(page_no).or_insert_with(|| vec![0u8; PAGE_SIZE])
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedRecord {
    pub lsn: u64,
    pub page_no: u32,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    pub frames: usize,
    pub applied: usize,
    pub already_applied: usize,
    pub skipped: Vec<SkippedRecord>,
    /// Bytes after the last intact frame were ignored.
    pub torn_tail: bool,
    /// LSN of the last intact frame, 0 for an empty log.
    pub end_lsn: u64,
}

/// Applies every intact frame of `log` to `pages`.
pub fn recover<S: PageStore + ?Sized>(log: &[u8], pages: &mut S) -> Result<RecoveryReport> {
    let mut report = RecoveryReport::default();
    let mut pos = 0;

    while let Some(frame) = read_frame(log, pos) {
        pos = frame.end;
        let lsn = frame.lsn();
        report.frames += 1;
        report.end_lsn = lsn;

        let records = match decode_all(frame.records) {
            Ok(records) => records,
            Err(err) => {
                report.skipped.push(SkippedRecord {
                    lsn,
                    page_no: 0,
                    reason: err.to_string(),
                });
                continue;
            }
        };

        let mut touched: HashSet<u32> = HashSet::new();
        for record in &records {
            let page = match &record.op {
                RedoOp::PageCreate(_) => Some(pages.page_mut_or_alloc(record.page_no)),
                _ => pages.page_mut(record.page_no),
            };
            let Some(page) = page else {
                report.skipped.push(SkippedRecord {
                    lsn,
                    page_no: record.page_no,
                    reason: format!("page {} does not exist", record.page_no),
                });
                continue;
            };

            if !touched.contains(&record.page_no) && page.len() == PAGE_SIZE && page_lsn(page) >= lsn
            {
                report.already_applied += 1;
                continue;
            }

            let outcome = match &record.op {
                RedoOp::PageCreate(op) => match apply_page_create(page, record.page_no, op) {
                    Ok(()) => ApplyOutcome::Applied,
                    Err(err) => ApplyOutcome::Skipped(err.to_string()),
                },
                _ => apply(page, record),
            };
            match outcome {
                ApplyOutcome::Applied => {
                    report.applied += 1;
                    touched.insert(record.page_no);
                }
                ApplyOutcome::Skipped(reason) => report.skipped.push(SkippedRecord {
                    lsn,
                    page_no: record.page_no,
                    reason,
                }),
            }
        }

        for page_no in touched {
            if let Some(page) = pages.page_mut(page_no) {
                set_page_lsn(page, lsn);
            }
        }
    }

    if pos < log.len() {
        report.torn_tail = true;
        tracing::warn!(
            offset = pos,
            ignored = log.len() - pos,
            "redo log ends in a torn frame"
        );
    }
    tracing::info!(
        frames = report.frames,
        applied = report.applied,
        already_applied = report.already_applied,
        skipped = report.skipped.len(),
        end_lsn = report.end_lsn,
        "recovery finished"
    );
    Ok(report)
}
