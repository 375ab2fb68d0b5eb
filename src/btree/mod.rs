//! # Index Page Algorithms
//!
//! This module holds everything that reads or changes the record chain and
//! the directory of a single index page: key comparison, cursor positioning,
//! insert, delete, reorganize and structural validation. Splitting and
//! merging whole pages is the business of the B-tree layer above.
//!
//! ## Record Chain and Directory
//!
//! ```text
//!   slot 0        slot 1                    slot 2 (last)
//!     |             |                          |
//!     v             v                          v
//! infimum -> r1 -> r2 -> r3 -> r4 -> r5 -> supremum
//! owned=1              owned=4             owned=3
//! ```
//!
//! Records are only reachable through the singly linked chain from the
//! infimum. A directory slot points at the last record of its group and that
//! record carries the group size in its n_owned bits; every other record has
//! n_owned = 0. Search binary-searches the slots and then walks at most
//! `PAGE_DIR_SLOT_MAX_N_OWNED` records of one group.
//!
//! ## Staged Mutations
//!
//! Insert and delete do not write to the page directly. They compute the
//! minimal redo record of the change and hand it to the same apply routine
//! that crash recovery runs (see [`crate::redo::apply`]). The apply routine
//! validates every offset it will touch before writing the first byte, so a
//! corrupted page is reported and left unmodified, and replaying the log of a
//! sequence of operations reproduces the page byte for byte.
//!
//! ## Corruption Handling
//!
//! Every pointer read from the page (slot, next pointer, free list head, last
//! insert) is range-checked against the heap before it is followed and every
//! chain walk is bounded, so no page content can cause a panic or an endless
//! loop. Violations surface as [`PageCorrupted`](crate::error::PageCorrupted).
//!
//! ## Module Organization
//!
//! - `compare`: search keys and the field-by-field comparator
//! - `cursor`: positioning and movement
//! - `directory`: slot lookup, split and balance
//! - `rtree`: bounding-rectangle predicates for spatial pages
//! - `insert`, `delete`: the live mutation engines
//! - `zip`: insert into pages that carry a compressed image
//! - `reorganize`: rebuilding a page in key order
//! - `validate`: full structural check

pub mod compare;
pub mod cursor;
pub mod delete;
pub mod directory;
pub mod insert;
pub mod reorganize;
pub mod rtree;
pub mod validate;
pub mod zip;

#[cfg(test)]
pub(crate) mod testutil;

pub use compare::{compare_key_with_rec, Matched, SearchKey};
pub use cursor::{
    n_recs_before, open_on_nth_user_rec, open_on_random_user_rec, rec_at, search,
    search_with_match, user_recs, PageCursor, SearchMode, SearchResult,
};
pub use delete::delete_rec;
pub use directory::find_owner_slot;
pub use insert::insert_rec;
pub use reorganize::{reorganize, HeapAllocator, PageHeap};
pub use rtree::{search_rtree, Mbr, RtreeMode};
pub use validate::{validate_page, PageStats};
pub use zip::{insert_rec_zip, reorganize_zip, PageCompressor, ZipDescriptor};

use eyre::Result;

use crate::ensure_page;
use crate::records::RecordLayout;
use crate::storage::page::heap_top;

/// Whether `rec` can be the origin of a user record on this page.
#[inline]
pub(crate) fn is_user_rec_origin<L: RecordLayout>(page: &[u8], rec: usize) -> bool {
    rec >= L::SUPREMUM_END + L::EXTRA_BYTES && rec < heap_top(page)
}

/// Successor of `rec` in the record chain, checked to be the supremum or a
/// user record inside the heap. `rec` must not be the supremum.
pub(crate) fn next_checked<L: RecordLayout>(page: &[u8], rec: usize) -> Result<usize> {
    let next = L::next_offs(page, rec);
    ensure_page!(
        page,
        next == L::SUPREMUM || is_user_rec_origin::<L>(page, next),
        "record at {} links to {}",
        rec,
        next
    );
    Ok(next)
}
