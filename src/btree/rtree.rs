//! # Spatial Page Search
//!
//! R-tree pages store records whose first field is a minimum bounding
//! rectangle (MBR) of four little-endian f64 values:
//!
//! ```text
//! Offset  Field
//! ------  -----
//! 0       xmin
//! 8       xmax
//! 16      ymin
//! 24      ymax
//! ```
//!
//! Node pointer records append the 4-byte child page number. Records are
//! kept in the chain in MBR order only so that inserts have a position; a
//! predicate query cannot binary-search on it, so [`search_rtree`] walks the
//! whole chain and tests every record.
//!
//! On non-leaf pages the predicate is relaxed to what a child subtree may
//! still satisfy: a subtree whose MBR merely intersects the query can hold
//! records contained in, equal to, or within it.

use eyre::Result;

use super::cursor::user_recs;
use crate::records::{IndexDef, RecordLayout};
use crate::storage::page::{is_leaf, page_no};
use crate::storage::RecordFormat;
use crate::with_layout;
use crate::{ensure_page, error::PageContext};

pub const MBR_SIZE: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Mbr {
    pub xmin: f64,
    pub xmax: f64,
    pub ymin: f64,
    pub ymax: f64,
}

impl Mbr {
    pub fn new(xmin: f64, xmax: f64, ymin: f64, ymax: f64) -> Self {
        Self {
            xmin,
            xmax,
            ymin,
            ymax,
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < MBR_SIZE {
            return None;
        }
        let f = |i: usize| {
            let mut b = [0u8; 8];
            b.copy_from_slice(&bytes[i * 8..i * 8 + 8]);
            f64::from_le_bytes(b)
        };
        Some(Self::new(f(0), f(1), f(2), f(3)))
    }

    pub fn to_bytes(&self) -> [u8; MBR_SIZE] {
        let mut out = [0u8; MBR_SIZE];
        for (i, v) in [self.xmin, self.xmax, self.ymin, self.ymax].iter().enumerate() {
            out[i * 8..i * 8 + 8].copy_from_slice(&v.to_le_bytes());
        }
        out
    }

    pub fn contains(&self, other: &Mbr) -> bool {
        self.xmin <= other.xmin
            && other.xmax <= self.xmax
            && self.ymin <= other.ymin
            && other.ymax <= self.ymax
    }

    pub fn within(&self, other: &Mbr) -> bool {
        other.contains(self)
    }

    pub fn intersects(&self, other: &Mbr) -> bool {
        self.xmin <= other.xmax
            && other.xmin <= self.xmax
            && self.ymin <= other.ymax
            && other.ymin <= self.ymax
    }

    pub fn disjoint(&self, other: &Mbr) -> bool {
        !self.intersects(other)
    }

    pub fn equals(&self, other: &Mbr) -> bool {
        self.xmin == other.xmin
            && self.xmax == other.xmax
            && self.ymin == other.ymin
            && self.ymax == other.ymax
    }

    /// Total order used to position records in the chain.
    pub fn total_cmp(&self, other: &Mbr) -> std::cmp::Ordering {
        self.xmin
            .total_cmp(&other.xmin)
            .then(self.xmax.total_cmp(&other.xmax))
            .then(self.ymin.total_cmp(&other.ymin))
            .then(self.ymax.total_cmp(&other.ymax))
    }
}

/// Relation a record's MBR must have to the query MBR.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RtreeMode {
    /// Record contains the query.
    Contain,
    Intersect,
    /// Record lies within the query.
    Within,
    Disjoint,
    Equal,
}

impl RtreeMode {
    pub fn matches(self, rec: &Mbr, query: &Mbr, leaf: bool) -> bool {
        match (self, leaf) {
            (RtreeMode::Contain, _) => rec.contains(query),
            (RtreeMode::Intersect, _) => rec.intersects(query),
            (RtreeMode::Within, true) => rec.within(query),
            (RtreeMode::Within, false) => rec.intersects(query),
            (RtreeMode::Disjoint, true) => rec.disjoint(query),
            // A subtree is worth visiting unless the query covers it whole.
            (RtreeMode::Disjoint, false) => !query.contains(rec),
            (RtreeMode::Equal, true) => rec.equals(query),
            (RtreeMode::Equal, false) => rec.contains(query),
        }
    }
}

/// Returns the origins of the records on a spatial page whose MBR satisfies
/// `mode` against `query`, in chain order.
pub fn search_rtree(
    page: &[u8],
    index: &IndexDef,
    query: &Mbr,
    mode: RtreeMode,
) -> Result<Vec<usize>> {
    ensure_page!(
        page,
        index.is_spatial(),
        "index {} is not a spatial index",
        index.id
    );
    let leaf = is_leaf(page);
    let mut out = Vec::new();
    with_layout!(RecordFormat::of(page), L => {
        for rec in user_recs(page)? {
            let ranges = L::field_ranges(page, rec, index, leaf).in_page(page_no(page))?;
            let Some(mbr) = ranges[0].value(page).and_then(Mbr::from_bytes) else {
                return Err(crate::error::corrupted(
                    page_no(page),
                    format!("record at {} has no bounding rectangle", rec),
                ));
            };
            if mode.matches(&mbr, query, leaf) {
                out.push(rec);
            }
        }
    });
    Ok(out)
}

/// Child page number of a node pointer record on a spatial page.
pub fn child_page_no(page: &[u8], index: &IndexDef, rec: usize) -> Result<u32> {
    ensure_page!(page, !is_leaf(page), "leaf page has no child pointers");
    let ranges = with_layout!(RecordFormat::of(page), L => {
        L::field_ranges(page, rec, index, false).in_page(page_no(page))?
    });
    let child = ranges.last().and_then(|r| r.value(page));
    match child {
        Some(b) if b.len() == 4 => Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]])),
        _ => Err(crate::error::corrupted(
            page_no(page),
            format!("record at {} has no child page number", rec),
        )),
    }
}
