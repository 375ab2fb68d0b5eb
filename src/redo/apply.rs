//! # Redo Apply
//!
//! Applies one [`RedoRecord`] to a page. The same routines execute live
//! inserts and deletes: the engines in [`crate::btree`] build the record
//! first and hand it here, so replaying a log reproduces the page byte for
//! byte.
//!
//! ## Validate, Then Write
//!
//! Each routine reads everything it needs from the page and checks it
//! (directory frame, predecessor inside the heap, chain pointers, owner
//! slot, free list head, room for the record and for a split slot) before
//! the first byte is written. A refused record leaves the page untouched.
//!
//! ## Insert
//!
//! ```text
//!   predecessor p                           new record
//!  +--------------+---------+------+       +------------+---------+------+------------+
//!  | .. | hdr_c  | fixed   | data |       | literal    | hdr_c   | fixed| data_c|lit |
//!  +--------------+---------+------+       +------------+---------+------+------------+
//!       copied ---------------------------------------^            ^-- copied from p
//! ```
//!
//! The fixed header bytes of the new record are rebuilt from the encoded
//! descriptor: info bits, n_owned 0, the heap number chosen by placement,
//! and the next pointer to p's old successor. Placement takes the heap top,
//! or for the reuse tags the free list head: redundant records start where
//! the freed record started, compact records at the freed origin moved by
//! the logged shift.
//!
//! ## Delete
//!
//! The record after p is unlinked; if it owned its slot, p takes over.
//! A record ending at the heap top gives its space back to the heap, any
//! other goes to the head of the free list with its payload zeroed. An
//! underfull slot is then balanced.

use eyre::Result;

use super::record::{
    decode_shift, DeleteDynamic, DeleteRedundant, InsertDynamic, InsertRedundant, PageCreate,
    PageImage, RedoOp, RedoRecord,
};
use crate::btree::directory::{
    balance_slot, check_dir, find_owner, plan_balance, plan_split, slot_of, split_slot,
};
use crate::btree::{is_user_rec_origin, next_checked};
use crate::config::*;
use crate::encoding::{write_u16, write_u32};
use crate::ensure_page;
use crate::error::PageContext;
use crate::records::{Compact, RecSizes, RecordLayout, Redundant};
use crate::storage::page::{
    check_frame, create, dir_start, direction, garbage, header_field, heap_top, is_leaf, is_rtree,
    n_heap, n_recs, page_no, set_direction, set_header_field, set_n_heap, set_slot_rec, PageInit,
    PageType,
};
use crate::storage::RecordFormat;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    /// The page disagrees with the record; the page was not modified.
    Skipped(String),
}

/// Applies `record` to `page`, reporting a mismatch instead of failing.
pub fn apply(page: &mut [u8], record: &RedoRecord) -> ApplyOutcome {
    match try_apply(page, record) {
        Ok(()) => {
            tracing::trace!(page_no = record.page_no, op = op_name(&record.op), "redo record applied");
            ApplyOutcome::Applied
        }
        Err(report) => {
            let reason = report.to_string();
            tracing::warn!(page_no = record.page_no, op = op_name(&record.op), %reason, "redo record skipped");
            ApplyOutcome::Skipped(reason)
        }
    }
}

fn op_name(op: &RedoOp) -> &'static str {
    match op {
        RedoOp::InsertRedundant(_) => "insert_redundant",
        RedoOp::InsertDynamic(_) => "insert_dynamic",
        RedoOp::DeleteRedundant(_) => "delete_redundant",
        RedoOp::DeleteDynamic(_) => "delete_dynamic",
        RedoOp::PageCreate(_) => "page_create",
        RedoOp::PageImage(_) => "page_image",
    }
}

fn try_apply(page: &mut [u8], record: &RedoRecord) -> Result<()> {
    if let RedoOp::PageCreate(op) = &record.op {
        return apply_page_create(page, record.page_no, op);
    }
    check_frame(page)?;
    eyre::ensure!(
        page_no(page) == record.page_no,
        "record for page {} applied to page {}",
        record.page_no,
        page_no(page)
    );
    let format = RecordFormat::of(page);
    match &record.op {
        RedoOp::InsertRedundant(op) => {
            expect_format(format, RecordFormat::Redundant)?;
            apply_insert_redundant(page, op).map(drop)
        }
        RedoOp::InsertDynamic(op) => {
            expect_format(format, RecordFormat::Compact)?;
            apply_insert_dynamic(page, op).map(drop)
        }
        RedoOp::DeleteRedundant(op) => {
            expect_format(format, RecordFormat::Redundant)?;
            apply_delete_redundant(page, op)
        }
        RedoOp::DeleteDynamic(op) => {
            expect_format(format, RecordFormat::Compact)?;
            apply_delete_dynamic(page, op)
        }
        RedoOp::PageImage(op) => apply_page_image(page, op),
        RedoOp::PageCreate(_) => Ok(()),
    }
}

fn expect_format(actual: RecordFormat, expected: RecordFormat) -> Result<()> {
    eyre::ensure!(
        actual == expected,
        "{:?} record applied to a {:?} page",
        expected,
        actual
    );
    Ok(())
}

/// Where an insert will be written and what it takes from the page.
struct Placement {
    buf: usize,
    heap_no: usize,
    /// New free list head when the free list head is reused.
    next_free: Option<usize>,
}

/// Predecessor, successor and owning slot of an insert position.
struct Anchor {
    prev: usize,
    next: usize,
    owner: usize,
    owned: usize,
    slot: usize,
}

fn anchor<L: RecordLayout>(page: &[u8], prev: usize) -> Result<Anchor> {
    let n_slots = check_dir::<L>(page)?;
    let n_heap = n_heap(page);
    ensure_page!(
        page,
        n_heap >= PAGE_HEAP_NO_USER_LOW && n_heap <= PAGE_HEAP_NO_LIMIT,
        "heap of {} records",
        n_heap
    );
    ensure_page!(
        page,
        L::next_offs(page, L::SUPREMUM) == 0,
        "supremum links to {}",
        L::next_offs(page, L::SUPREMUM)
    );

    let p = L::INFIMUM + prev;
    ensure_page!(
        page,
        p == L::INFIMUM || is_user_rec_origin::<L>(page, p),
        "predecessor {} outside the heap",
        p
    );
    let next = next_checked::<L>(page, p)?;
    let (owner, _) = find_owner::<L>(page, next)?;
    let owned = L::n_owned(page, owner);
    ensure_page!(
        page,
        owned <= PAGE_DIR_SLOT_MAX_N_OWNED,
        "record {} owns {} records",
        owner,
        owned
    );
    let slot = slot_of::<L>(page, owner, n_slots)?;
    Ok(Anchor {
        prev: p,
        next,
        owner,
        owned,
        slot,
    })
}

fn heap_placement(page: &[u8], size: usize) -> Result<Placement> {
    let top = heap_top(page);
    let n_heap = n_heap(page);
    ensure_page!(
        page,
        n_heap < PAGE_HEAP_NO_LIMIT,
        "heap numbers exhausted"
    );
    ensure_page!(
        page,
        top + size <= dir_start(page),
        "record of {} bytes does not fit above heap top {}",
        size,
        top
    );
    Ok(Placement {
        buf: top,
        heap_no: n_heap,
        next_free: None,
    })
}

/// Checks the free list head and its successor; returns both.
fn free_head<L: RecordLayout>(page: &[u8], size: usize) -> Result<(usize, usize)> {
    let free = header_field(page, PAGE_FREE);
    ensure_page!(
        page,
        is_user_rec_origin::<L>(page, free),
        "free list head {} outside the heap",
        free
    );
    ensure_page!(
        page,
        garbage(page) >= size,
        "garbage of {} bytes cannot supply {}",
        garbage(page),
        size
    );
    let next_free = L::next_offs(page, free);
    ensure_page!(
        page,
        next_free == 0 || (next_free != free && is_user_rec_origin::<L>(page, next_free)),
        "free record {} links to {}",
        free,
        next_free
    );
    Ok((free, next_free))
}

/// Copies `len` header bytes ending just before the fixed bytes of `p`.
fn common_header<'p, L: RecordLayout>(page: &'p [u8], p: usize, len: usize) -> Result<&'p [u8]> {
    if len == 0 {
        return Ok(&[]);
    }
    let start = (p - L::EXTRA_BYTES).checked_sub(len);
    ensure_page!(
        page,
        p != L::INFIMUM && start.is_some_and(|s| s >= L::SUPREMUM_END),
        "predecessor {} has no {} header bytes to share",
        p,
        len
    );
    let end = p - L::EXTRA_BYTES;
    Ok(&page[end - len..end])
}

/// Leading payload bytes of `p`.
fn common_data<'p, L: RecordLayout>(page: &'p [u8], p: usize, len: usize) -> Result<&'p [u8]> {
    let limit = if p == L::INFIMUM {
        p + L::sentinel_sizes(p).data
    } else {
        heap_top(page)
    };
    ensure_page!(
        page,
        p + len <= limit,
        "predecessor {} has no {} payload bytes to share",
        p,
        len
    );
    Ok(&page[p..p + len])
}

/// Writes a fully built record image and updates the chain, heap, header
/// and directory. Every check has been done by the caller.
fn commit_insert<L: RecordLayout>(
    page: &mut [u8],
    anchor: &Anchor,
    place: &Placement,
    image: &[u8],
    extra: usize,
) -> Result<usize> {
    let size = image.len();
    let origin = place.buf + extra;

    let split = if anchor.owned == PAGE_DIR_SLOT_MAX_N_OWNED {
        let new_top = match place.next_free {
            Some(_) => heap_top(page),
            None => heap_top(page) + size,
        };
        let (p, next) = (anchor.prev, anchor.next);
        let page_ro: &[u8] = page;
        Some(plan_split::<L>(page_ro, anchor.slot, new_top, |r| {
            if r == p {
                Ok(origin)
            } else if r == origin {
                Ok(next)
            } else {
                next_checked::<L>(page_ro, r)
            }
        })?)
    } else {
        None
    };

    page[place.buf..place.buf + size].copy_from_slice(image);
    L::set_next_offs(page, anchor.prev, origin);

    match place.next_free {
        Some(next_free) => {
            set_header_field(page, PAGE_FREE, next_free);
            set_header_field(page, PAGE_GARBAGE, garbage(page) - size);
        }
        None => {
            set_n_heap(page, n_heap(page) + 1);
            set_header_field(page, PAGE_HEAP_TOP, heap_top(page) + size);
        }
    }

    if !is_rtree(page) {
        let last = header_field(page, PAGE_LAST_INSERT);
        let dir = direction(page);
        let n_dir = header_field(page, PAGE_N_DIRECTION);
        let (dir, n_dir) = if last == 0 {
            (PAGE_NO_DIRECTION, 0)
        } else if last == anchor.prev && dir != PAGE_LEFT {
            (PAGE_RIGHT, n_dir + 1)
        } else if anchor.next == last && dir != PAGE_RIGHT {
            (PAGE_LEFT, n_dir + 1)
        } else {
            (PAGE_NO_DIRECTION, 0)
        };
        set_direction(page, dir);
        set_header_field(page, PAGE_N_DIRECTION, n_dir);
    }
    set_header_field(page, PAGE_LAST_INSERT, origin);
    set_header_field(page, PAGE_N_RECS, n_recs(page) + 1);

    L::set_n_owned(page, anchor.owner, anchor.owned + 1);
    if let Some(mid) = split {
        split_slot::<L>(page, anchor.slot, mid);
    }
    Ok(origin)
}

/// Replays an insert into a redundant page and returns the new origin.
pub fn apply_insert_redundant(page: &mut [u8], op: &InsertRedundant) -> Result<usize> {
    type L = Redundant;
    let anchor = anchor::<L>(page, op.prev)?;
    let p = anchor.prev;

    let n_fields = (op.enc_hdr >> 3) + 1;
    ensure_page!(
        page,
        n_fields <= REC_MAX_N_FIELDS,
        "insert of a record with {} fields",
        n_fields
    );
    let short = op.enc_hdr & 0x4 != 0;
    let info_bits = ((op.enc_hdr & 0x3) << 4) as u8;
    let extra = Redundant::extra_size_for(n_fields, short);
    let var = extra - REC_N_OLD_EXTRA_BYTES;
    ensure_page!(
        page,
        op.hdr_c <= var && op.literal.len() >= var - op.hdr_c,
        "insert shares {} of {} header bytes with {} literal bytes",
        op.hdr_c,
        var,
        op.literal.len()
    );

    let prev_sizes = if p == L::INFIMUM {
        L::sentinel_sizes(p)
    } else {
        Redundant::self_sizes(page, p).in_page(page_no(page))?
    };
    ensure_page!(
        page,
        op.hdr_c <= prev_sizes.extra - REC_N_OLD_EXTRA_BYTES && op.data_c <= prev_sizes.data,
        "predecessor {} shorter than the {} + {} shared bytes",
        p,
        op.hdr_c,
        op.data_c
    );

    let lit_hdr = var - op.hdr_c;
    let mut image: Vec<u8> = Vec::with_capacity(extra + op.data_c + op.literal.len() - lit_hdr);
    image.extend_from_slice(&op.literal[..lit_hdr]);
    image.extend_from_slice(common_header::<L>(page, p, op.hdr_c)?);
    image.extend_from_slice(&[0u8; REC_N_OLD_EXTRA_BYTES]);
    image.extend_from_slice(common_data::<L>(page, p, op.data_c)?);
    image.extend_from_slice(&op.literal[lit_hdr..]);

    Redundant::set_info_bits(&mut image, extra, info_bits);
    Redundant::set_n_fields(&mut image, extra, n_fields);
    Redundant::set_short(&mut image, extra, short);
    let sizes = Redundant::self_sizes(&image, extra).in_page(page_no(page))?;
    ensure_page!(
        page,
        sizes == (RecSizes {
            extra,
            data: image.len() - extra
        }),
        "inserted record header describes {} payload bytes, {} given",
        sizes.data,
        image.len() - extra
    );
    let size = image.len();

    let place = if op.reuse {
        let (free, next_free) = free_head::<L>(page, size)?;
        let fsizes = Redundant::self_sizes(page, free).in_page(page_no(page))?;
        ensure_page!(
            page,
            size <= fsizes.total(),
            "free record of {} bytes cannot hold {}",
            fsizes.total(),
            size
        );
        Placement {
            buf: free - fsizes.extra,
            heap_no: L::heap_no(page, free),
            next_free: Some(next_free),
        }
    } else {
        heap_placement(page, size)?
    };

    L::set_heap_no(&mut image, extra, place.heap_no);
    L::set_next_offs(&mut image, extra, anchor.next);
    commit_insert::<L>(page, &anchor, &place, &image, extra)
}

/// Replays an insert into a compact page and returns the new origin.
pub fn apply_insert_dynamic(page: &mut [u8], op: &InsertDynamic) -> Result<usize> {
    type L = Compact;
    let anchor = anchor::<L>(page, op.prev)?;
    let p = anchor.prev;

    ensure_page!(
        page,
        op.enc_hdr_l & 0x4 == 0,
        "reserved bit set in header descriptor {:#x}",
        op.enc_hdr_l
    );
    let hdr_l = op.enc_hdr_l >> 3;
    let info_bits = ((op.enc_hdr_l & 0x3) << 4) as u8;
    ensure_page!(
        page,
        op.literal.len() >= hdr_l,
        "literal of {} bytes shorter than the {} header bytes",
        op.literal.len(),
        hdr_l
    );
    let extra = REC_N_NEW_EXTRA_BYTES + op.hdr_c + hdr_l;
    let status = if is_leaf(page) {
        REC_STATUS_ORDINARY
    } else {
        REC_STATUS_NODE_PTR
    };

    let mut image: Vec<u8> = Vec::with_capacity(extra + op.data_c + op.literal.len() - hdr_l);
    image.extend_from_slice(&op.literal[..hdr_l]);
    image.extend_from_slice(common_header::<L>(page, p, op.hdr_c)?);
    image.extend_from_slice(&[info_bits, 0, status, 0, 0]);
    image.extend_from_slice(common_data::<L>(page, p, op.data_c)?);
    image.extend_from_slice(&op.literal[hdr_l..]);
    let size = image.len();

    let place = match op.shift {
        Some(shift) => {
            let (free, next_free) = free_head::<L>(page, size)?;
            let s = decode_shift(shift);
            let buf = (free as isize - extra as isize + s).max(0) as usize;
            ensure_page!(
                page,
                buf >= L::SUPREMUM_END && buf + size <= heap_top(page),
                "reused space [{}, {}) outside the heap",
                buf,
                buf + size
            );
            Placement {
                buf,
                heap_no: L::heap_no(page, free),
                next_free: Some(next_free),
            }
        }
        None => heap_placement(page, size)?,
    };

    let origin = place.buf + extra;
    L::set_heap_no(&mut image, extra, place.heap_no);
    write_u16(&mut image, extra - 2, L::encode_next(origin, anchor.next));
    commit_insert::<L>(page, &anchor, &place, &image, extra)
}

/// Size source of a deleted record.
trait DeleteSizes {
    fn prev(&self) -> usize;
    fn sizes(&self, page: &[u8], rec: usize) -> Result<RecSizes>;
}

impl DeleteSizes for DeleteRedundant {
    fn prev(&self) -> usize {
        self.prev
    }

    fn sizes(&self, page: &[u8], rec: usize) -> Result<RecSizes> {
        Redundant::self_sizes(page, rec).in_page(page_no(page))
    }
}

impl DeleteSizes for DeleteDynamic {
    fn prev(&self) -> usize {
        self.prev
    }

    fn sizes(&self, _page: &[u8], _rec: usize) -> Result<RecSizes> {
        Ok(RecSizes {
            extra: REC_N_NEW_EXTRA_BYTES + self.hdr_size,
            data: self.data_size,
        })
    }
}

fn apply_delete<L: RecordLayout>(page: &mut [u8], op: &impl DeleteSizes) -> Result<()> {
    let n_slots = check_dir::<L>(page)?;
    ensure_page!(page, n_recs(page) >= 1, "delete from an empty page");

    let p = L::INFIMUM + op.prev();
    ensure_page!(
        page,
        p == L::INFIMUM || is_user_rec_origin::<L>(page, p),
        "predecessor {} outside the heap",
        p
    );
    let rec = next_checked::<L>(page, p)?;
    ensure_page!(page, rec != L::SUPREMUM, "predecessor {} is the last record", p);

    let sizes = op.sizes(page, rec)?;
    let top = heap_top(page);
    ensure_page!(
        page,
        rec.checked_sub(sizes.extra).is_some_and(|s| s >= L::SUPREMUM_END)
            && rec + sizes.data <= top,
        "deleted record [{}, {}) outside the heap",
        rec.saturating_sub(sizes.extra),
        rec + sizes.data
    );
    let next = next_checked::<L>(page, rec)?;

    let (owner, _) = find_owner::<L>(page, rec)?;
    let owned = L::n_owned(page, owner);
    let slot = slot_of::<L>(page, owner, n_slots)?;
    ensure_page!(
        page,
        slot > 0 && owned >= 2 && owned <= PAGE_DIR_SLOT_MAX_N_OWNED,
        "slot {} owns {} records",
        slot,
        owned
    );
    let new_owner = if rec == owner {
        ensure_page!(
            page,
            L::n_owned(page, p) == 0,
            "predecessor {} owns another slot",
            p
        );
        p
    } else {
        owner
    };
    let new_owned = owned - 1;
    let next_of_owner = if new_owner == p {
        next
    } else {
        next_checked::<L>(page, new_owner)?
    };
    let balance = plan_balance::<L>(page, slot, new_owned, n_slots, next_of_owner)?;

    let at_top = rec + sizes.data == top;
    if at_top {
        ensure_page!(
            page,
            L::heap_no(page, rec) + 1 == n_heap(page),
            "record at the heap top has heap number {} of {}",
            L::heap_no(page, rec),
            n_heap(page)
        );
    }

    L::set_next_offs(page, p, next);
    if new_owner == p {
        set_slot_rec(page, slot, p);
    }
    L::set_n_owned(page, new_owner, new_owned);

    let start = rec - sizes.extra;
    if at_top {
        page[start..rec + sizes.data].fill(0);
        set_header_field(page, PAGE_HEAP_TOP, start);
        set_n_heap(page, n_heap(page) - 1);
    } else {
        let free = header_field(page, PAGE_FREE);
        L::set_next_offs(page, rec, free);
        set_header_field(page, PAGE_FREE, rec);
        set_header_field(page, PAGE_GARBAGE, garbage(page) + sizes.total());
        page[rec..rec + sizes.data].fill(0);
    }

    set_header_field(page, PAGE_LAST_INSERT, 0);
    set_header_field(page, PAGE_N_RECS, n_recs(page) - 1);
    balance_slot::<L>(page, slot, balance);
    Ok(())
}

pub fn apply_delete_redundant(page: &mut [u8], op: &DeleteRedundant) -> Result<()> {
    apply_delete::<Redundant>(page, op)
}

pub fn apply_delete_dynamic(page: &mut [u8], op: &DeleteDynamic) -> Result<()> {
    apply_delete::<Compact>(page, op)
}

/// Formats `page` as an empty index page numbered `page_no`.
pub fn apply_page_create(page: &mut [u8], page_no: u32, op: &PageCreate) -> Result<()> {
    eyre::ensure!(
        page.len() == PAGE_SIZE,
        "invalid page size: {} != {}",
        page.len(),
        PAGE_SIZE
    );
    let init = PageInit {
        format: if op.compact {
            RecordFormat::Compact
        } else {
            RecordFormat::Redundant
        },
        page_type: if op.rtree {
            PageType::RTree
        } else {
            PageType::Index
        },
        level: op.level,
        index_id: op.index_id,
        max_trx_id: op.max_trx_id,
    };
    write_u32(page, FIL_PAGE_OFFSET, page_no);
    create(page, &init);
    tracing::debug!(page_no, compact = op.compact, level = op.level, "page created");
    Ok(())
}

/// Copies logged bytes into the page body. The file header and trailer are
/// out of reach.
pub fn apply_page_image(page: &mut [u8], op: &PageImage) -> Result<()> {
    let end = op.offset.checked_add(op.bytes.len());
    ensure_page!(
        page,
        op.offset >= FIL_HEADER_SIZE && end.is_some_and(|e| e <= PAGE_SIZE - FIL_TRAILER_SIZE),
        "page image of {} bytes at {} outside the page body",
        op.bytes.len(),
        op.offset
    );
    page[op.offset..op.offset + op.bytes.len()].copy_from_slice(&op.bytes);
    Ok(())
}

/// The page-create record that empties `page` in place.
pub(crate) fn page_create_of(page: &[u8]) -> PageCreate {
    let init = PageInit::of(page);
    PageCreate {
        compact: init.format == RecordFormat::Compact,
        rtree: init.page_type == PageType::RTree,
        level: init.level,
        index_id: init.index_id,
        max_trx_id: init.max_trx_id,
    }
}
