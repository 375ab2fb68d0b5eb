//! # Record Formats
//!
//! An index page stores its records in one of two encodings, chosen when the
//! page is created and recorded in the compact flag of PAGE_N_HEAP. Both put
//! a variable-size header in front of the record "origin" and the field
//! payload after it; in-page pointers (slots, next pointers, PAGE_FREE) always
//! address the origin.
//!
//! ```text
//!             extra_size                     data_size
//!   <----------------------------><--------------------------->
//!  +--------------------+---------+----------------------------+
//!  | per-field metadata | fixed   | field 0 | field 1 | ...    |
//!  | (read backwards)   | header  |                            |
//!  +--------------------+---------+----------------------------+
//!                                 ^ origin
//! ```
//!
//! ## Fixed Header Bytes
//!
//! ```text
//! Format     Byte(s)        Content
//! ---------  -------------  ---------------------------------------------
//! redundant  [-6]           info bits (high nibble) | n_owned (low nibble)
//!            [-5..-4]       heap_no << 3
//!            [-4..-3]       n_fields << 1 | one-byte-offsets flag
//!            [-2..-1]       next record, absolute page offset
//! compact    [-5]           info bits (high nibble) | n_owned (low nibble)
//!            [-4..-3]       heap_no << 3 | status
//!            [-2..-1]       next record, relative to this origin (mod 2^16)
//! ```
//!
//! The info/n_owned byte sits at `origin - EXTRA_BYTES` and the heap number
//! at `origin - EXTRA_BYTES + 1` in both formats, so those accessors are
//! shared by the [`RecordLayout`] trait. What differs is how the next pointer
//! is stored and how the per-field metadata is read:
//!
//! - **Redundant** records describe themselves: field end offsets are stored
//!   in reverse before the fixed bytes, so sizes can be derived without an
//!   index definition (which is what redo apply relies on).
//! - **Compact** records carry a null bitmap and a length array only for the
//!   nullable and variable-length fields, so parsing needs the [`IndexDef`].
//!
//! ## Module Organization
//!
//! - `schema`: index and field definitions
//! - `redundant`, `compact`: the two [`RecordLayout`] strategies
//! - `builder`: encoding a field list into record bytes

pub mod builder;
pub mod compact;
pub mod redundant;
pub mod schema;

pub use builder::{EncodedRecord, RecordBuilder};
pub use compact::Compact;
pub use redundant::Redundant;
pub use schema::{Collation, DataType, FieldDef, IndexDef, IndexKind};

use eyre::{ensure, Result};
use smallvec::SmallVec;

use crate::config::{
    PAGE_DIR, PAGE_SIZE, REC_INFO_BITS_MASK, REC_N_OWNED_MASK, REC_STATUS_INFIMUM,
    REC_STATUS_SUPREMUM,
};
use crate::encoding::{read_u16, write_u16};
use crate::storage::RecordFormat;

/// Header and payload size of one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecSizes {
    pub extra: usize,
    pub data: usize,
}

impl RecSizes {
    pub fn total(&self) -> usize {
        self.extra + self.data
    }
}

/// Location of one field's payload inside the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldRange {
    pub start: usize,
    pub len: usize,
    pub null: bool,
    pub external: bool,
}

impl FieldRange {
    /// Payload bytes, or `None` for SQL NULL.
    pub fn value<'p>(&self, page: &'p [u8]) -> Option<&'p [u8]> {
        if self.null {
            None
        } else {
            Some(&page[self.start..self.start + self.len])
        }
    }
}

pub type FieldRanges = SmallVec<[FieldRange; 16]>;

/// Decoded fixed header bytes of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecHeader {
    pub info_bits: u8,
    pub n_owned: usize,
    pub heap_no: usize,
    pub status: u8,
    /// Absolute offset of the next record, 0 if none.
    pub next: usize,
}

/// Bytes a new record shares with its predecessor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CommonBytes {
    /// Header bytes immediately before the fixed header bytes.
    pub hdr_c: usize,
    /// Leading payload bytes.
    pub data_c: usize,
}

/// Record encoding strategy of a page.
///
/// Offsets passed to these methods are record origins inside `page`. Callers
/// validate an origin against the heap bounds before reading through it; the
/// size and field parsers additionally check every byte they touch and
/// return an error rather than reading outside the page.
pub trait RecordLayout {
    const FORMAT: RecordFormat;
    const EXTRA_BYTES: usize;
    const INFIMUM: usize;
    const SUPREMUM: usize;
    const SUPREMUM_END: usize;

    #[inline]
    fn n_owned(page: &[u8], rec: usize) -> usize {
        (page[rec - Self::EXTRA_BYTES] & REC_N_OWNED_MASK) as usize
    }

    #[inline]
    fn set_n_owned(page: &mut [u8], rec: usize, n_owned: usize) {
        let b = &mut page[rec - Self::EXTRA_BYTES];
        *b = (*b & !REC_N_OWNED_MASK) | (n_owned as u8 & REC_N_OWNED_MASK);
    }

    #[inline]
    fn info_bits(page: &[u8], rec: usize) -> u8 {
        page[rec - Self::EXTRA_BYTES] & REC_INFO_BITS_MASK
    }

    #[inline]
    fn set_info_bits(page: &mut [u8], rec: usize, bits: u8) {
        let b = &mut page[rec - Self::EXTRA_BYTES];
        *b = (*b & REC_N_OWNED_MASK) | (bits & REC_INFO_BITS_MASK);
    }

    #[inline]
    fn heap_no(page: &[u8], rec: usize) -> usize {
        (read_u16(page, rec - Self::EXTRA_BYTES + 1) >> 3) as usize
    }

    #[inline]
    fn set_heap_no(page: &mut [u8], rec: usize, heap_no: usize) {
        let pos = rec - Self::EXTRA_BYTES + 1;
        let v = read_u16(page, pos);
        write_u16(page, pos, (v & 0x7) | ((heap_no as u16) << 3));
    }

    /// Absolute offset of the next record, 0 if the pointer is unset.
    fn next_offs(page: &[u8], rec: usize) -> usize;

    /// Points `rec` at the record whose origin is `next` (0 clears it).
    fn set_next_offs(page: &mut [u8], rec: usize, next: usize);

    /// Value stored in the next-pointer bytes of `rec` for target `next`.
    fn encode_next(rec: usize, next: usize) -> u16;

    fn status(page: &[u8], rec: usize) -> u8;

    fn parse_header(page: &[u8], rec: usize) -> RecHeader {
        RecHeader {
            info_bits: Self::info_bits(page, rec),
            n_owned: Self::n_owned(page, rec),
            heap_no: Self::heap_no(page, rec),
            status: Self::status(page, rec),
            next: Self::next_offs(page, rec),
        }
    }

    /// Sizes of the infimum and supremum records.
    fn sentinel_sizes(rec: usize) -> RecSizes;

    fn is_sentinel(rec: usize) -> bool {
        rec == Self::INFIMUM || rec == Self::SUPREMUM
    }

    fn sizes(page: &[u8], rec: usize, index: &IndexDef, leaf: bool) -> Result<RecSizes>;

    fn field_ranges(page: &[u8], rec: usize, index: &IndexDef, leaf: bool) -> Result<FieldRanges>;

    /// Counts the bytes `rec` shares with the record at `prev` whose sizes
    /// are `prev_sizes`.
    ///
    /// Header bytes are compared backwards from the byte before the fixed
    /// header bytes and never include the infimum; payload bytes are compared
    /// forwards from the origin. Only bytes belonging to `prev` itself are
    /// considered, so the result stays valid while other heap space changes.
    fn diff_with_prev(
        page: &[u8],
        prev: usize,
        prev_sizes: RecSizes,
        rec: &EncodedRecord,
    ) -> CommonBytes {
        let new = rec.as_bytes();
        let new_var = rec.extra_size() - Self::EXTRA_BYTES;

        let mut hdr_c = 0;
        if prev != Self::INFIMUM {
            let limit = new_var.min(prev_sizes.extra - Self::EXTRA_BYTES);
            while hdr_c < limit
                && new[new_var - 1 - hdr_c] == page[prev - Self::EXTRA_BYTES - 1 - hdr_c]
            {
                hdr_c += 1;
            }
        }

        let data = rec.data();
        let limit = data.len().min(prev_sizes.data);
        let data_c = data[..limit]
            .iter()
            .zip(&page[prev..prev + limit])
            .take_while(|(a, b)| a == b)
            .count();

        CommonBytes { hdr_c, data_c }
    }
}

/// Reads the status of a sentinel from its heap number, for formats that do
/// not store a status.
pub(crate) fn sentinel_status(heap_no: usize) -> Option<u8> {
    match heap_no {
        0 => Some(REC_STATUS_INFIMUM),
        1 => Some(REC_STATUS_SUPREMUM),
        _ => None,
    }
}

/// Checks that `[start, end)` lies inside the record area of a page.
pub(crate) fn check_span(page: &[u8], start: usize, end: usize) -> Result<()> {
    ensure!(
        start <= end && end <= page.len().min(PAGE_SIZE - PAGE_DIR),
        "record bytes [{}, {}) outside the page",
        start,
        end
    );
    Ok(())
}

/// Bounds-checked byte read used while walking record headers backwards.
#[inline]
pub(crate) fn header_byte(page: &[u8], pos: Option<usize>) -> Result<u8> {
    pos.and_then(|p| page.get(p).copied())
        .ok_or_else(|| eyre::eyre!("record header runs outside the page"))
}
