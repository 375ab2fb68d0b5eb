//! Structural check of a whole page.
//!
//! Walks the record chain and the free list once and checks every invariant
//! the page algorithms rely on: slot order and ownership counts, unique heap
//! numbers, key order on non-spatial pages, disjoint record spans inside the
//! heap, and the header counters. Used by tests and by consistency checks
//! above this crate; the mutation paths check only what they touch.

use std::cmp::Ordering;

use eyre::Result;

use super::compare::{compare_with, Matched, SearchKey};
use super::directory::check_dir;
use super::{is_user_rec_origin, next_checked};
use crate::config::{
    PAGE_DIR_SLOT_MAX_N_OWNED, PAGE_DIR_SLOT_MIN_N_OWNED, PAGE_FREE, PAGE_HEAP_NO_INFIMUM,
    PAGE_HEAP_NO_LIMIT, PAGE_HEAP_NO_SUPREMUM, PAGE_HEAP_NO_USER_LOW,
};
use crate::ensure_page;
use crate::error::PageContext;
use crate::records::{IndexDef, RecordLayout};
use crate::storage::page::{
    check_frame, dir_start, garbage, header_field, heap_top, is_leaf, is_rtree, n_heap, n_recs,
    page_no, slot_rec,
};
use crate::storage::RecordFormat;
use crate::with_layout;

/// Counters of a page that passed [`validate_page`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageStats {
    pub n_recs: usize,
    pub n_slots: usize,
    pub n_heap: usize,
    /// Records on the free list.
    pub n_free: usize,
    pub garbage: usize,
    pub heap_top: usize,
}

pub fn validate_page(page: &[u8], index: &IndexDef) -> Result<PageStats> {
    check_frame(page)?;
    with_layout!(RecordFormat::of(page), L => validate::<L>(page, index))
}

fn validate<L: RecordLayout>(page: &[u8], index: &IndexDef) -> Result<PageStats> {
    let page_no = page_no(page);
    let n_slots = check_dir::<L>(page)?;
    let top = heap_top(page);
    let n_heap = n_heap(page);
    let leaf = is_leaf(page);

    ensure_page!(
        page,
        n_heap >= PAGE_HEAP_NO_USER_LOW && n_heap <= PAGE_HEAP_NO_LIMIT,
        "heap of {} records",
        n_heap
    );
    ensure_page!(
        page,
        top <= dir_start(page),
        "heap top {} overlaps the directory at {}",
        top,
        dir_start(page)
    );
    ensure_page!(
        page,
        L::heap_no(page, L::INFIMUM) == PAGE_HEAP_NO_INFIMUM
            && L::heap_no(page, L::SUPREMUM) == PAGE_HEAP_NO_SUPREMUM,
        "sentinel heap numbers {} and {}",
        L::heap_no(page, L::INFIMUM),
        L::heap_no(page, L::SUPREMUM)
    );

    let mut seen = vec![false; n_heap];
    let mut spans: Vec<(usize, usize)> = Vec::with_capacity(n_recs(page));
    let claim = |rec: usize, seen: &mut Vec<bool>| -> Result<()> {
        let h = L::heap_no(page, rec);
        ensure_page!(
            page,
            h >= PAGE_HEAP_NO_USER_LOW && h < n_heap && !seen[h],
            "record {} has heap number {} of {}",
            rec,
            h,
            n_heap
        );
        seen[h] = true;
        Ok(())
    };

    let mut rec = L::INFIMUM;
    let mut slot = 0;
    let mut group = 0;
    let mut n = 0;
    loop {
        group += 1;
        let owned = L::n_owned(page, rec);
        if owned != 0 {
            ensure_page!(
                page,
                slot < n_slots && slot_rec(page, slot) == rec,
                "record {} owns {} records but is not slot {}",
                rec,
                owned,
                slot
            );
            let (lo, hi) = if slot == 0 {
                (1, 1)
            } else if slot + 1 == n_slots {
                (1, PAGE_DIR_SLOT_MAX_N_OWNED)
            } else {
                (PAGE_DIR_SLOT_MIN_N_OWNED, PAGE_DIR_SLOT_MAX_N_OWNED)
            };
            ensure_page!(
                page,
                owned == group && owned >= lo && owned <= hi,
                "slot {} owns {} records, group has {}",
                slot,
                owned,
                group
            );
            slot += 1;
            group = 0;
        }
        ensure_page!(
            page,
            group < PAGE_DIR_SLOT_MAX_N_OWNED,
            "records after {} have no owner",
            rec
        );
        if rec == L::SUPREMUM {
            break;
        }

        let next = next_checked::<L>(page, rec)?;
        if next != L::SUPREMUM {
            claim(next, &mut seen)?;
            n += 1;
            let sizes = L::sizes(page, next, index, leaf).in_page(page_no)?;
            spans.push((next - sizes.extra, next + sizes.data));

            if rec != L::INFIMUM && !is_rtree(page) {
                let n_key = if leaf { index.n_fields(true) } else { index.n_uniq() };
                let ranges = L::field_ranges(page, rec, index, leaf).in_page(page_no)?;
                let key: SearchKey<'_> = ranges.iter().take(n_key).map(|r| r.value(page)).collect();
                let mut matched = Matched::default();
                let ord = compare_with::<L>(page, index, &key, next, &mut matched)?;
                ensure_page!(
                    page,
                    ord != Ordering::Greater,
                    "record {} sorts before its predecessor {}",
                    next,
                    rec
                );
            }
        }
        rec = next;
    }
    ensure_page!(
        page,
        slot == n_slots,
        "chain passes {} of {} slots",
        slot,
        n_slots
    );
    ensure_page!(
        page,
        n == n_recs(page),
        "chain holds {} records, header says {}",
        n,
        n_recs(page)
    );

    let mut n_free = 0;
    let mut free_bytes = 0;
    let mut free = header_field(page, PAGE_FREE);
    while free != 0 {
        ensure_page!(
            page,
            is_user_rec_origin::<L>(page, free),
            "free record {} outside the heap",
            free
        );
        claim(free, &mut seen)?;
        let sizes = L::sizes(page, free, index, leaf).in_page(page_no)?;
        spans.push((free - sizes.extra, free + sizes.data));
        free_bytes += sizes.total();
        n_free += 1;
        free = L::next_offs(page, free);
    }
    ensure_page!(
        page,
        n + n_free + PAGE_HEAP_NO_USER_LOW == n_heap,
        "{} records and {} free records in a heap of {}",
        n,
        n_free,
        n_heap
    );
    ensure_page!(
        page,
        free_bytes <= garbage(page),
        "free list holds {} bytes, garbage is {}",
        free_bytes,
        garbage(page)
    );

    spans.sort_unstable();
    for w in spans.windows(2) {
        ensure_page!(
            page,
            w[0].1 <= w[1].0,
            "records [{}, {}) and [{}, {}) overlap",
            w[0].0,
            w[0].1,
            w[1].0,
            w[1].1
        );
    }
    if let (Some(first), Some(last)) = (spans.first(), spans.last()) {
        ensure_page!(
            page,
            first.0 >= L::SUPREMUM_END && last.1 <= top,
            "records span [{}, {}) outside the heap",
            first.0,
            last.1
        );
    }

    Ok(PageStats {
        n_recs: n,
        n_slots,
        n_heap,
        n_free,
        garbage: garbage(page),
        heap_top: top,
    })
}
