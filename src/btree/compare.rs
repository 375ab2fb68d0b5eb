//! # Key Comparison
//!
//! A [`SearchKey`] is a prefix of an index's fields; comparing it with a
//! record compares field by field until the first difference. Search keeps
//! the result of earlier comparisons as a [`Matched`] count of whole fields
//! and bytes of the next field known to be equal, so a later comparison
//! against a record between two already-compared records can start there.
//!
//! ## Field Order
//!
//! ```text
//! Field kind            Rule
//! --------------------  --------------------------------------------------
//! SQL NULL              lower than every value, equal to NULL
//! custom collation      Collation::compare, byte match reset to 0
//! geometry (MBR)        xmin, xmax, ymin, ymax with f64::total_cmp
//! character types      byte order, shorter value padded with 0x20
//! binary and integers  byte order, a proper prefix sorts first
//! descending column     result of the above reversed
//! ```
//!
//! A record carrying the MIN_REC info bit is lower than any key, the
//! infimum is lower and the supremum higher than any key.

use std::cmp::Ordering;

use eyre::Result;
use smallvec::SmallVec;

use super::rtree::Mbr;
use crate::config::REC_INFO_MIN_REC_FLAG;
use crate::error::PageContext;
use crate::records::{DataType, FieldDef, IndexDef, RecordLayout};
use crate::storage::page::{is_leaf, page_no};
use crate::storage::RecordFormat;
use crate::with_layout;

/// Leading fields of an index record to search for. `None` is SQL NULL.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchKey<'a> {
    fields: SmallVec<[Option<&'a [u8]>; 8]>,
}

impl<'a> SearchKey<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, value: &'a [u8]) -> Self {
        self.fields.push(Some(value));
        self
    }

    pub fn null(mut self) -> Self {
        self.fields.push(None);
        self
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn fields(&self) -> &[Option<&'a [u8]>] {
        &self.fields
    }
}

impl<'a> FromIterator<Option<&'a [u8]>> for SearchKey<'a> {
    fn from_iter<I: IntoIterator<Item = Option<&'a [u8]>>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}

/// Fields and bytes of the next field known to be equal to a key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Matched {
    pub fields: usize,
    pub bytes: usize,
}

/// Compares `key` with the record at `rec`.
///
/// `matched` gives the prefix already known to be equal and receives the
/// prefix found equal by this comparison.
pub fn compare_key_with_rec(
    page: &[u8],
    index: &IndexDef,
    key: &SearchKey<'_>,
    rec: usize,
    matched: &mut Matched,
) -> Result<Ordering> {
    with_layout!(RecordFormat::of(page), L => compare_with::<L>(page, index, key, rec, matched))
}

pub(crate) fn compare_with<L: RecordLayout>(
    page: &[u8],
    index: &IndexDef,
    key: &SearchKey<'_>,
    rec: usize,
    matched: &mut Matched,
) -> Result<Ordering> {
    if rec == L::INFIMUM {
        *matched = Matched::default();
        return Ok(Ordering::Greater);
    }
    if rec == L::SUPREMUM {
        *matched = Matched::default();
        return Ok(Ordering::Less);
    }
    if L::info_bits(page, rec) & REC_INFO_MIN_REC_FLAG != 0 {
        *matched = Matched::default();
        return Ok(Ordering::Greater);
    }

    let leaf = is_leaf(page);
    let ranges = L::field_ranges(page, rec, index, leaf).in_page(page_no(page))?;
    let n_cmp = key.len().min(ranges.len());

    let mut i = matched.fields.min(n_cmp);
    let mut start = if i == matched.fields { matched.bytes } else { 0 };
    while i < n_cmp {
        let (ord, bytes) = compare_field(
            index.field(i, leaf),
            key.fields[i],
            ranges[i].value(page),
            start,
        );
        if ord != Ordering::Equal {
            *matched = Matched { fields: i, bytes };
            return Ok(ord);
        }
        i += 1;
        start = 0;
    }
    *matched = Matched {
        fields: n_cmp,
        bytes: 0,
    };
    Ok(Ordering::Equal)
}

/// Compares one key field with one record field. Returns the order and the
/// number of leading bytes found equal.
pub(crate) fn compare_field(
    field: &FieldDef,
    key: Option<&[u8]>,
    rec: Option<&[u8]>,
    start: usize,
) -> (Ordering, usize) {
    let (ord, bytes) = match (key, rec) {
        (None, None) => (Ordering::Equal, 0),
        (None, Some(_)) => (Ordering::Less, 0),
        (Some(_), None) => (Ordering::Greater, 0),
        (Some(a), Some(b)) => match &field.collation {
            Some(collation) => (collation.compare(a, b), 0),
            None if field.dtype == DataType::Geometry => (compare_mbr(a, b), 0),
            None => compare_bytes(a, b, field.dtype.pad_byte(), start),
        },
    };
    if field.descending {
        (ord.reverse(), bytes)
    } else {
        (ord, bytes)
    }
}

fn compare_mbr(a: &[u8], b: &[u8]) -> Ordering {
    match (Mbr::from_bytes(a), Mbr::from_bytes(b)) {
        (Some(x), Some(y)) => x.total_cmp(&y),
        _ => compare_bytes(a, b, None, 0).0,
    }
}

fn compare_bytes(a: &[u8], b: &[u8], pad: Option<u8>, start: usize) -> (Ordering, usize) {
    let len = a.len().max(b.len());
    let mut i = start.min(len);
    while i < len {
        let x = match (a.get(i), pad) {
            (Some(&x), _) => x,
            (None, Some(p)) => p,
            (None, None) => return (Ordering::Less, i),
        };
        let y = match (b.get(i), pad) {
            (Some(&y), _) => y,
            (None, Some(p)) => p,
            (None, None) => return (Ordering::Greater, i),
        };
        if x != y {
            return (x.cmp(&y), i);
        }
        i += 1;
    }
    (Ordering::Equal, i)
}
