//! # Page Directory
//!
//! The directory is an array of 2-byte record offsets at the end of the page,
//! slot 0 at the highest address. Each slot anchors a group of consecutive
//! chain records ending at the record it points to; that record's n_owned
//! bits hold the group size.
//!
//! ## Ownership Bounds
//!
//! ```text
//! Slot            n_owned
//! --------------  ------------------------------------------
//! 0 (infimum)     1
//! 1 .. n-2        PAGE_DIR_SLOT_MIN_N_OWNED ..= MAX_N_OWNED
//! n-1 (supremum)  1 ..= MAX_N_OWNED
//! ```
//!
//! An insert that would push a group to MAX + 1 records splits it: a new
//! slot is added below the owner for the first (MAX + 1) / 2 records. A
//! delete that leaves a non-supremum group with MIN - 1 records balances it
//! with the group above, merging the two when the upper group owns no more
//! than MIN records and moving one record down otherwise.
//!
//! The mutation functions here assume their plan was validated first; the
//! `plan_*` functions perform every check.

use eyre::Result;

use super::next_checked;
use crate::config::{
    PAGE_DIR, PAGE_DIR_SLOT_MAX_N_OWNED, PAGE_DIR_SLOT_MIN_N_OWNED, PAGE_DIR_SLOT_SIZE,
    PAGE_N_DIR_SLOTS, PAGE_SIZE,
};
use crate::ensure_page;
use crate::records::RecordLayout;
use crate::storage::page::{heap_top, n_slots, set_header_field, set_slot_rec, slot_pos, slot_rec};
use crate::storage::RecordFormat;
use crate::with_layout;

/// Checks the heap top and the directory frame and returns the slot count.
pub(crate) fn check_dir<L: RecordLayout>(page: &[u8]) -> Result<usize> {
    let top = heap_top(page);
    ensure_page!(
        page,
        top >= L::SUPREMUM_END && top <= PAGE_SIZE - PAGE_DIR,
        "heap top {} out of range",
        top
    );
    let n = n_slots(page);
    let room = (PAGE_SIZE - PAGE_DIR - top) / PAGE_DIR_SLOT_SIZE;
    ensure_page!(
        page,
        n >= 2 && n <= room,
        "directory of {} slots does not fit above heap top {}",
        n,
        top
    );
    ensure_page!(
        page,
        slot_rec(page, 0) == L::INFIMUM && slot_rec(page, n - 1) == L::SUPREMUM,
        "directory does not start at the infimum and end at the supremum"
    );
    Ok(n)
}

/// Record of slot `i`, checked against the heap bounds. `n_slots` must come
/// from [`check_dir`].
pub(crate) fn slot_rec_checked<L: RecordLayout>(
    page: &[u8],
    i: usize,
    n_slots: usize,
) -> Result<usize> {
    ensure_page!(page, i < n_slots, "slot {} of {} requested", i, n_slots);
    let rec = slot_rec(page, i);
    if i == 0 || i == n_slots - 1 {
        return Ok(rec);
    }
    ensure_page!(
        page,
        super::is_user_rec_origin::<L>(page, rec),
        "slot {} points to {}, outside the heap",
        i,
        rec
    );
    Ok(rec)
}

/// Walks from `rec` to the record that owns it. Returns the owner and the
/// number of hops taken.
pub(crate) fn find_owner<L: RecordLayout>(page: &[u8], rec: usize) -> Result<(usize, usize)> {
    let mut r = rec;
    for hops in 0..PAGE_DIR_SLOT_MAX_N_OWNED {
        if L::n_owned(page, r) != 0 {
            return Ok((r, hops));
        }
        ensure_page!(page, r != L::SUPREMUM, "supremum owns no records");
        r = next_checked::<L>(page, r)?;
    }
    ensure_page!(
        page,
        L::n_owned(page, r) != 0,
        "no owner within {} records of {}",
        PAGE_DIR_SLOT_MAX_N_OWNED,
        rec
    );
    Ok((r, PAGE_DIR_SLOT_MAX_N_OWNED))
}

/// Index of the slot that points to `owner`.
pub(crate) fn slot_of<L: RecordLayout>(page: &[u8], owner: usize, n_slots: usize) -> Result<usize> {
    let slot = (0..n_slots).rev().find(|&i| slot_rec(page, i) == owner);
    match slot {
        Some(slot) => Ok(slot),
        None => Err(crate::error::corrupted(
            crate::storage::page::page_no(page),
            format!("owner record {} has no directory slot", owner),
        )),
    }
}

/// Returns the directory slot whose group contains `rec`.
pub fn find_owner_slot(page: &[u8], rec: usize) -> Result<usize> {
    with_layout!(RecordFormat::of(page), L => {
        let n = check_dir::<L>(page)?;
        let (owner, _) = find_owner::<L>(page, rec)?;
        slot_of::<L>(page, owner, n)
    })
}

/// Finds the record that becomes the new slot when slot `slot` is split.
///
/// `next` yields the successor of a record in the chain as it will be when
/// the split is executed, which lets an insert plan the split before it
/// links the new record in. `new_heap_top` is the heap top after that
/// insert.
pub(crate) fn plan_split<L: RecordLayout>(
    page: &[u8],
    slot: usize,
    new_heap_top: usize,
    mut next: impl FnMut(usize) -> Result<usize>,
) -> Result<usize> {
    ensure_page!(page, slot > 0, "cannot split the infimum slot");
    let n = n_slots(page);
    ensure_page!(
        page,
        slot_pos(n) >= new_heap_top,
        "no room for a directory slot"
    );
    let mut rec = slot_rec_checked::<L>(page, slot - 1, n)?;
    for _ in 0..(PAGE_DIR_SLOT_MAX_N_OWNED + 1) / 2 {
        rec = next(rec)?;
    }
    Ok(rec)
}

/// Splits slot `slot`, whose group has grown to MAX + 1 records, at `mid`.
pub(crate) fn split_slot<L: RecordLayout>(page: &mut [u8], slot: usize, mid: usize) {
    let n = n_slots(page);
    let owned = PAGE_DIR_SLOT_MAX_N_OWNED + 1;

    page.copy_within(slot_pos(n - 1)..slot_pos(slot) + PAGE_DIR_SLOT_SIZE, slot_pos(n));
    set_slot_rec(page, slot, mid);
    set_header_field(page, PAGE_N_DIR_SLOTS, n + 1);

    L::set_n_owned(page, mid, owned / 2);
    let upper = slot_rec(page, slot + 1);
    L::set_n_owned(page, upper, owned - owned / 2);
}

/// How an underfull slot is repaired after a delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Balance {
    None,
    /// Fold the slot into the one above it.
    Merge,
    /// Move the first record of the upper group down; `new_rec` becomes the
    /// slot's record.
    Transfer { new_rec: usize },
}

/// Decides how to balance slot `slot` that owns `owned` records after a
/// delete. `next_of_slot_rec` is the successor of the slot's record in the
/// post-delete chain.
pub(crate) fn plan_balance<L: RecordLayout>(
    page: &[u8],
    slot: usize,
    owned: usize,
    n_slots: usize,
    next_of_slot_rec: usize,
) -> Result<Balance> {
    if owned >= PAGE_DIR_SLOT_MIN_N_OWNED || slot + 1 == n_slots {
        return Ok(Balance::None);
    }
    let up_rec = slot_rec_checked::<L>(page, slot + 1, n_slots)?;
    let up_owned = L::n_owned(page, up_rec);
    ensure_page!(
        page,
        up_owned >= 1 && up_owned <= PAGE_DIR_SLOT_MAX_N_OWNED,
        "slot {} owns {} records",
        slot + 1,
        up_owned
    );
    if up_owned <= PAGE_DIR_SLOT_MIN_N_OWNED {
        return Ok(Balance::Merge);
    }
    ensure_page!(
        page,
        super::is_user_rec_origin::<L>(page, next_of_slot_rec),
        "slot {} has no record to take over",
        slot + 1
    );
    Ok(Balance::Transfer {
        new_rec: next_of_slot_rec,
    })
}

pub(crate) fn balance_slot<L: RecordLayout>(page: &mut [u8], slot: usize, action: Balance) {
    if action == Balance::None {
        return;
    }
    let rec = slot_rec(page, slot);
    let up_rec = slot_rec(page, slot + 1);
    match action {
        Balance::None => {}
        Balance::Merge => {
            let owned = L::n_owned(page, rec) + L::n_owned(page, up_rec);
            L::set_n_owned(page, rec, 0);
            L::set_n_owned(page, up_rec, owned);
            delete_slot(page, slot);
        }
        Balance::Transfer { new_rec } => {
            let up_owned = L::n_owned(page, up_rec);
            L::set_n_owned(page, rec, 0);
            L::set_n_owned(page, new_rec, PAGE_DIR_SLOT_MIN_N_OWNED);
            L::set_n_owned(page, up_rec, up_owned - 1);
            set_slot_rec(page, slot, new_rec);
        }
    }
}

/// Removes slot `slot`, shifting the slots above it down and clearing the
/// vacated one.
fn delete_slot(page: &mut [u8], slot: usize) {
    let n = n_slots(page);
    page.copy_within(
        slot_pos(n - 1)..slot_pos(slot + 1) + PAGE_DIR_SLOT_SIZE,
        slot_pos(n - 2),
    );
    page[slot_pos(n - 1)..slot_pos(n - 1) + PAGE_DIR_SLOT_SIZE].fill(0);
    set_header_field(page, PAGE_N_DIR_SLOTS, n - 1);
}
