//! # Page Reorganize
//!
//! Rebuilds a page with its records in key order, packed from the end of
//! the supremum, with no free list and no garbage. Heap numbers are
//! reassigned in key order and the directory is rebuilt with groups of
//! four records:
//!
//! ```text
//! before                                   after
//! +-----+---+---+-----+---+------+          +-----+---+---+---+---+------+
//! | sup | c | a | gap | b | free |   -->    | sup | a | b | c | free     |
//! +-----+---+---+-----+---+------+          +-----+---+---+---+----------+
//!         heap_no 2,3,5                           heap_no 2,3,4
//! ```
//!
//! The rebuilt page is logged as one page image of the index header, the
//! records and the directory. Record bytes are placed through a
//! [`HeapAllocator`] so the layout can be driven by other allocators in
//! tests.

use eyre::Result;

use super::cursor::user_recs;
use crate::config::{
    PAGE_DIR, PAGE_DIR_SLOT_MIN_N_OWNED, PAGE_DIR_SLOT_SIZE,
    PAGE_HEADER, PAGE_HEAP_NO_USER_LOW, PAGE_HEAP_TOP, PAGE_N_DIR_SLOTS, PAGE_N_RECS, PAGE_SIZE,
};
use crate::error::{corrupted, PageContext};
use crate::records::{IndexDef, RecordLayout};
use crate::redo::{PageImage, RedoOp, RedoRecord, RedoSink};
use crate::storage::page::{
    check_frame, create_empty, is_leaf, n_recs, page_no, set_header_field, set_n_heap,
    set_slot_rec,
};
use crate::storage::RecordFormat;
use crate::with_layout;

/// Hands out contiguous byte ranges of a page.
pub trait HeapAllocator {
    /// Returns the start of `size` free bytes, or `None` if they do not fit.
    fn alloc(&mut self, size: usize) -> Option<usize>;
}

/// Bump allocator over `[top, limit)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageHeap {
    top: usize,
    limit: usize,
}

impl PageHeap {
    pub fn new(start: usize, limit: usize) -> Self {
        Self { top: start, limit }
    }

    pub fn top(&self) -> usize {
        self.top
    }
}

impl HeapAllocator for PageHeap {
    fn alloc(&mut self, size: usize) -> Option<usize> {
        let end = self.top.checked_add(size).filter(|&end| end <= self.limit)?;
        let start = self.top;
        self.top = end;
        Some(start)
    }
}

/// Rebuilds the page in key order and logs it as a page image.
pub fn reorganize<M: RedoSink + ?Sized>(page: &mut [u8], index: &IndexDef, mtr: &mut M) -> Result<()> {
    check_frame(page)?;
    let n = with_layout!(RecordFormat::of(page), L => rebuild::<L>(page, index)?);
    log_image(page, mtr);
    tracing::debug!(page_no = page_no(page), n_recs = n, "page reorganized");
    Ok(())
}

/// Logs the index header, records and directory of `page` as one image.
pub(crate) fn log_image<M: RedoSink + ?Sized>(page: &[u8], mtr: &mut M) {
    let page_no = page_no(page);
    if mtr.is_logged() {
        mtr.log(RedoRecord::new(
            page_no,
            RedoOp::PageImage(PageImage {
                offset: PAGE_HEADER,
                bytes: page[PAGE_HEADER..PAGE_SIZE - PAGE_DIR].to_vec(),
            }),
        ));
    }
    mtr.set_modified(page_no);
}

/// Number of directory slots a rebuilt page with `n` user records uses.
fn rebuilt_slots(n: usize) -> usize {
    // The last full group is folded into the supremum's.
    2 + (n / PAGE_DIR_SLOT_MIN_N_OWNED).saturating_sub(1)
}

/// Rebuilds `page` in place and returns the number of user records. On
/// failure the page is restored.
pub(crate) fn rebuild<L: RecordLayout>(page: &mut [u8], index: &IndexDef) -> Result<usize> {
    let leaf = is_leaf(page);
    let page_no = page_no(page);
    let recs = user_recs(page)?;
    ensure_count(page, recs.len())?;

    // (start, extra, size) of every record in key order
    let mut spans = Vec::with_capacity(recs.len());
    for &rec in &recs {
        let sizes = L::sizes(page, rec, index, leaf).in_page(page_no)?;
        spans.push((rec - sizes.extra, sizes.extra, sizes.total()));
    }

    let old = page.to_vec();
    create_empty(page);

    let n = recs.len();
    let n_slots = rebuilt_slots(n);
    let limit = PAGE_SIZE - PAGE_DIR - PAGE_DIR_SLOT_SIZE * n_slots;
    let mut heap = PageHeap::new(L::SUPREMUM_END, limit);

    let mut slots: Vec<usize> = vec![L::INFIMUM];
    let mut prev = L::INFIMUM;
    let mut count = 0;
    for (i, &(start, extra, size)) in spans.iter().enumerate() {
        let Some(buf) = heap.alloc(size) else {
            page.copy_from_slice(&old);
            return Err(corrupted(
                page_no,
                format!("records do not fit a rebuilt page at record {}", i),
            ));
        };
        page[buf..buf + size].copy_from_slice(&old[start..start + size]);
        let rec = buf + extra;
        L::set_n_owned(page, rec, 0);
        L::set_heap_no(page, rec, PAGE_HEAP_NO_USER_LOW + i);
        L::set_next_offs(page, prev, rec);

        count += 1;
        if count == PAGE_DIR_SLOT_MIN_N_OWNED {
            L::set_n_owned(page, rec, count);
            slots.push(rec);
            count = 0;
        }
        prev = rec;
    }
    L::set_next_offs(page, prev, L::SUPREMUM);

    if slots.len() > 1 {
        if let Some(last) = slots.pop() {
            L::set_n_owned(page, last, 0);
            count += PAGE_DIR_SLOT_MIN_N_OWNED;
        }
    }
    L::set_n_owned(page, L::SUPREMUM, count + 1);
    slots.push(L::SUPREMUM);

    for (i, &rec) in slots.iter().enumerate() {
        set_slot_rec(page, i, rec);
    }
    set_header_field(page, PAGE_N_DIR_SLOTS, slots.len());
    set_header_field(page, PAGE_HEAP_TOP, heap.top());
    set_n_heap(page, PAGE_HEAP_NO_USER_LOW + n);
    set_header_field(page, PAGE_N_RECS, n);
    Ok(n)
}

fn ensure_count(page: &[u8], found: usize) -> Result<()> {
    if found != n_recs(page) {
        return Err(corrupted(
            page_no(page),
            format!("chain holds {} of {} records", found, n_recs(page)),
        ));
    }
    Ok(())
}
