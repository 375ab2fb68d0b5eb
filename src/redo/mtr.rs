//! # Mini-Transactions and the Redo Log
//!
//! A [`MiniTransaction`] collects the redo records of one atomic group of
//! page changes and the numbers of the pages it modified. Committing it
//! appends one checksummed frame to a [`RedoLog`] and stamps the frame's LSN
//! on every modified page.
//!
//! ## Frame Format
//!
//! ```text
//! +-------------+---------------------------+---------------------+
//! | len varint  | records (len bytes)       | checksum (u64 BE)   |
//! +-------------+---------------------------+---------------------+
//! ```
//!
//! The checksum is CRC-64/ECMA-182 over the length prefix and the records.
//! The LSN of a frame is the log offset just past its checksum, so LSNs grow
//! with the log and a page whose LSN is at least a frame's LSN already holds
//! that frame's changes.
//!
//! ## Torn Writes
//!
//! A frame that is truncated or fails its checksum ends the log. Everything
//! before it is intact; the partial frame is what a crash during append
//! leaves behind.
//!
//! ## Concurrency
//!
//! `RedoLog` serializes appends with a `parking_lot::Mutex`; a mini-
//! transaction encodes its frame before taking the lock.

use crc::{Crc, CRC_64_ECMA_182};
use eyre::{ensure, Result};
use hashbrown::HashSet;
use parking_lot::Mutex;

use super::record::RedoRecord;
use super::recovery::PageStore;
use crate::encoding::{decode_varint, push_varint};
use crate::storage::page::set_page_lsn;

const CRC64: Crc<u64> = Crc::<u64>::new(&CRC_64_ECMA_182);

pub const FRAME_CHECKSUM_SIZE: usize = 8;

/// Receiver of the redo records produced by page operations.
pub trait RedoSink {
    /// Whether records passed to [`log`](Self::log) are kept.
    fn is_logged(&self) -> bool;

    fn log(&mut self, record: RedoRecord);

    fn set_modified(&mut self, page_no: u32);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogMode {
    #[default]
    All,
    /// Changes are made without redo records; the caller logs a page image
    /// afterwards.
    None,
}

#[derive(Debug, Default)]
pub struct MiniTransaction {
    mode: LogMode,
    records: Vec<RedoRecord>,
    modified: HashSet<u32>,
}

impl MiniTransaction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log_mode(&self) -> LogMode {
        self.mode
    }

    /// Switches the log mode and returns the previous one.
    pub fn set_log_mode(&mut self, mode: LogMode) -> LogMode {
        std::mem::replace(&mut self.mode, mode)
    }

    pub fn records(&self) -> &[RedoRecord] {
        &self.records
    }

    pub fn is_modified(&self, page_no: u32) -> bool {
        self.modified.contains(&page_no)
    }

    pub fn modified_pages(&self) -> impl Iterator<Item = u32> + '_ {
        self.modified.iter().copied()
    }

    /// Appends the collected records to `log` as one frame and stamps the
    /// frame LSN on the modified pages held by `pages`.
    ///
    /// Returns `None` when there was nothing to log.
    pub fn commit<S: PageStore + ?Sized>(self, log: &RedoLog, pages: &mut S) -> Result<Option<u64>> {
        if self.records.is_empty() {
            return Ok(None);
        }
        for &page_no in &self.modified {
            ensure!(
                pages.page_mut(page_no).is_some(),
                "modified page {} is not in the page store",
                page_no
            );
        }

        let lsn = log.append(&self.records)?;
        for &page_no in &self.modified {
            if let Some(page) = pages.page_mut(page_no) {
                set_page_lsn(page, lsn);
            }
        }
        Ok(Some(lsn))
    }
}

impl RedoSink for MiniTransaction {
    fn is_logged(&self) -> bool {
        self.mode == LogMode::All
    }

    fn log(&mut self, record: RedoRecord) {
        if self.is_logged() {
            self.records.push(record);
        }
    }

    fn set_modified(&mut self, page_no: u32) {
        self.modified.insert(page_no);
    }
}

/// Append-only in-memory redo log.
#[derive(Debug, Default)]
pub struct RedoLog {
    buf: Mutex<Vec<u8>>,
}

impl RedoLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Continues a log read back from storage.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            buf: Mutex::new(bytes),
        }
    }

    /// Appends one frame holding `records` and returns its LSN.
    pub fn append(&self, records: &[RedoRecord]) -> Result<u64> {
        let mut body = Vec::new();
        for record in records {
            record.encode(&mut body);
        }
        ensure!(
            body.len() <= u32::MAX as usize,
            "mini-transaction of {} bytes is too large",
            body.len()
        );

        let mut frame = Vec::with_capacity(body.len() + 5 + FRAME_CHECKSUM_SIZE);
        push_varint(body.len() as u32, &mut frame);
        frame.extend_from_slice(&body);
        let checksum = CRC64.checksum(&frame);
        frame.extend_from_slice(&checksum.to_be_bytes());

        let mut buf = self.buf.lock();
        buf.extend_from_slice(&frame);
        let lsn = buf.len() as u64;
        tracing::trace!(lsn, records = records.len(), bytes = frame.len(), "redo frame appended");
        Ok(lsn)
    }

    pub fn end_lsn(&self) -> u64 {
        self.buf.lock().len() as u64
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.buf.lock().clone()
    }
}

/// One verified frame of a redo log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogFrame<'a> {
    pub start: usize,
    /// Offset just past the checksum, also the frame LSN.
    pub end: usize,
    pub records: &'a [u8],
}

impl LogFrame<'_> {
    pub fn lsn(&self) -> u64 {
        self.end as u64
    }
}

/// Reads the frame starting at `pos`. Returns `None` at the end of the log
/// and for a truncated or corrupted frame.
pub fn read_frame(log: &[u8], pos: usize) -> Option<LogFrame<'_>> {
    let rest = log.get(pos..).filter(|r| !r.is_empty())?;
    let (len, n) = decode_varint(rest).ok()?;
    let body_end = n.checked_add(len as usize)?;
    let end = body_end.checked_add(FRAME_CHECKSUM_SIZE)?;
    let stored = rest.get(body_end..end)?;

    let mut digest = CRC64.digest();
    digest.update(&rest[..body_end]);
    if stored != digest.finalize().to_be_bytes().as_slice() {
        return None;
    }
    Some(LogFrame {
        start: pos,
        end: pos + end,
        records: &rest[n..body_end],
    })
}
