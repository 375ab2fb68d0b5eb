//! # Record Delete
//!
//! Removes the cursor record from the page. Like insert, delete derives a
//! redo record and applies it: the record is unlinked from the chain, its
//! bytes go back to the heap top or onto the free list, the owner count of
//! its slot drops by one and an underfull slot is merged or refilled.
//!
//! Deleting the only user record resets the page with a page-create record
//! instead, which also discards the free list and the garbage.
//!
//! On return the cursor points at the record that followed the deleted one.

use eyre::{ensure, Result};

use super::cursor::prev_rec;
use super::{next_checked, PageCursor};
use crate::config::REC_N_NEW_EXTRA_BYTES;
use crate::ensure_page;
use crate::error::PageContext;
use crate::records::{IndexDef, RecordLayout};
use crate::redo::apply::{
    apply_delete_dynamic, apply_delete_redundant, apply_page_create, page_create_of,
};
use crate::redo::{DeleteDynamic, DeleteRedundant, RedoOp, RedoRecord, RedoSink};
use crate::storage::page::{check_frame, is_leaf, n_recs, page_no};
use crate::storage::RecordFormat;
use crate::with_layout;

/// Deletes the record under `cursor` and moves the cursor to its successor.
pub fn delete_rec<M: RedoSink + ?Sized>(
    page: &mut [u8],
    index: &IndexDef,
    cursor: &mut PageCursor,
    mtr: &mut M,
) -> Result<()> {
    check_frame(page)?;
    ensure!(
        cursor.is_user_rec(page),
        "cursor at {} is not on a user record",
        cursor.rec()
    );
    with_layout!(RecordFormat::of(page), L => delete_low::<L, M>(page, index, cursor, mtr))
}

fn delete_low<L: RecordLayout, M: RedoSink + ?Sized>(
    page: &mut [u8],
    index: &IndexDef,
    cursor: &mut PageCursor,
    mtr: &mut M,
) -> Result<()> {
    let rec = cursor.rec();
    let page_no = page_no(page);

    let op = if n_recs(page) == 1 {
        let first = next_checked::<L>(page, L::INFIMUM)?;
        ensure_page!(
            page,
            first == rec,
            "only record of the page is {}, cursor at {}",
            first,
            rec
        );
        let op = page_create_of(page);
        apply_page_create(page, page_no, &op)?;
        *cursor = PageCursor::after_last(page);
        tracing::trace!(page_no, "last record deleted, page emptied");
        RedoOp::PageCreate(op)
    } else {
        let prev = prev_rec::<L>(page, rec)?;
        let next = next_checked::<L>(page, rec)?;
        let rel_prev = prev - L::INFIMUM;
        let op = match L::FORMAT {
            RecordFormat::Redundant => {
                let op = DeleteRedundant { prev: rel_prev };
                apply_delete_redundant(page, &op)?;
                RedoOp::DeleteRedundant(op)
            }
            RecordFormat::Compact => {
                let sizes = L::sizes(page, rec, index, is_leaf(page)).in_page(page_no)?;
                let op = DeleteDynamic {
                    prev: rel_prev,
                    hdr_size: sizes.extra - REC_N_NEW_EXTRA_BYTES,
                    data_size: sizes.data,
                };
                apply_delete_dynamic(page, &op)?;
                RedoOp::DeleteDynamic(op)
            }
        };
        *cursor = PageCursor::at(next);
        tracing::trace!(page_no, rec, "record deleted");
        op
    };

    if mtr.is_logged() {
        mtr.log(RedoRecord::new(page_no, op));
    }
    mtr.set_modified(page_no);
    Ok(())
}
