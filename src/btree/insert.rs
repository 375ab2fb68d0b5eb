//! # Record Insert
//!
//! Inserts an encoded record after the cursor record. The engine picks the
//! space, derives the redo record and lets [`crate::redo::apply`] perform
//! the change:
//!
//! 1. **Space**: the head of the free list if it is large enough, else the
//!    heap top if the record fits below the directory reservation. With
//!    neither the insert returns `Ok(None)` and the page is not touched.
//! 2. **Diff**: the header bytes just before the fixed bytes and the leading
//!    payload bytes that equal those of the predecessor are not logged.
//! 3. **Apply**: the redo record is applied to the page, which links the
//!    record in, updates the header and splits an overfull slot.
//!
//! ```text
//! free list reuse (compact)
//!
//!   freed record            new record, shift = extra - freed extra
//!  +--------+------+       +------------+----+
//!  | fextra | data |  -->  | extra      |data|
//!  +--------+------+       +------------+----+
//!  ^ start  ^ free         ^ start      ^ origin
//! ```

use eyre::{ensure, Result};

use super::is_user_rec_origin;
use super::PageCursor;
use crate::config::{
    PAGE_FREE, PAGE_HEAP_NO_LIMIT, REC_INFO_DELETED_FLAG, REC_INFO_MIN_REC_FLAG,
    REC_N_NEW_EXTRA_BYTES, REC_N_OLD_EXTRA_BYTES,
};
use crate::ensure_page;
use crate::error::PageContext;
use crate::records::{redundant, EncodedRecord, IndexDef, RecSizes, RecordLayout};
use crate::redo::apply::{apply_insert_dynamic, apply_insert_redundant};
use crate::redo::record::encode_shift;
use crate::redo::{InsertDynamic, InsertRedundant, RedoOp, RedoRecord, RedoSink};
use crate::storage::page::{check_frame, header_field, is_leaf, max_insert_size, n_heap, page_no};
use crate::storage::RecordFormat;
use crate::with_layout;

/// Where in a freed record the new record is placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FreeReuse {
    /// At the start of the freed bytes, if the total size fits.
    AtStart,
    /// At the freed origin, if header and payload each fit. Keeps record
    /// origins stable for a compressed image.
    AtOrigin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Space {
    Heap,
    Free { shift: isize },
}

/// Inserts `rec` after the cursor record and returns the new record's
/// origin, or `None` if the page has no room for it.
pub fn insert_rec<M: RedoSink + ?Sized>(
    page: &mut [u8],
    index: &IndexDef,
    cursor: &PageCursor,
    rec: &EncodedRecord,
    mtr: &mut M,
) -> Result<Option<usize>> {
    check_insert(page, cursor, rec)?;
    with_layout!(rec.format(), L => {
        insert_low::<L, M>(page, index, cursor.rec(), rec, mtr, FreeReuse::AtStart)
    })
}

/// Caller-side preconditions shared by the plain and compressed inserts.
pub(crate) fn check_insert(page: &[u8], cursor: &PageCursor, rec: &EncodedRecord) -> Result<()> {
    check_frame(page)?;
    let format = RecordFormat::of(page);
    ensure!(
        rec.format() == format,
        "{:?} record inserted into a {:?} page",
        rec.format(),
        format
    );
    ensure!(
        rec.is_leaf() == is_leaf(page),
        "{} record inserted into a {} page",
        if rec.is_leaf() { "leaf" } else { "node pointer" },
        if is_leaf(page) { "leaf" } else { "non-leaf" }
    );
    ensure!(
        rec.info_bits() & !(REC_INFO_MIN_REC_FLAG | REC_INFO_DELETED_FLAG) == 0,
        "unsupported info bits {:#04x}",
        rec.info_bits()
    );
    ensure!(
        cursor.rec() != format.supremum(),
        "cannot insert after the supremum"
    );
    Ok(())
}

fn choose_space<L: RecordLayout>(
    page: &[u8],
    index: &IndexDef,
    rec: &EncodedRecord,
    reuse: FreeReuse,
) -> Result<Option<Space>> {
    let free = header_field(page, PAGE_FREE);
    if free != 0 {
        ensure_page!(
            page,
            is_user_rec_origin::<L>(page, free),
            "free list head {} outside the heap",
            free
        );
        let fsizes = L::sizes(page, free, index, is_leaf(page)).in_page(page_no(page))?;
        let fits = match reuse {
            FreeReuse::AtStart => fsizes.total() >= rec.size(),
            FreeReuse::AtOrigin => {
                rec.extra_size() <= fsizes.extra && rec.data_size() <= fsizes.data
            }
        };
        if fits {
            let shift = match reuse {
                FreeReuse::AtStart => rec.extra_size() as isize - fsizes.extra as isize,
                FreeReuse::AtOrigin => 0,
            };
            return Ok(Some(Space::Free { shift }));
        }
    }

    if rec.size() > max_insert_size(page, 1) || n_heap(page) >= PAGE_HEAP_NO_LIMIT {
        return Ok(None);
    }
    Ok(Some(Space::Heap))
}

pub(crate) fn insert_low<L: RecordLayout, M: RedoSink + ?Sized>(
    page: &mut [u8],
    index: &IndexDef,
    prev: usize,
    rec: &EncodedRecord,
    mtr: &mut M,
    reuse: FreeReuse,
) -> Result<Option<usize>> {
    let Some(space) = choose_space::<L>(page, index, rec, reuse)? else {
        tracing::trace!(page_no = page_no(page), size = rec.size(), "insert does not fit");
        return Ok(None);
    };

    let prev_sizes: RecSizes = if prev == L::INFIMUM {
        L::sentinel_sizes(prev)
    } else {
        ensure_page!(
            page,
            is_user_rec_origin::<L>(page, prev),
            "cursor record {} outside the heap",
            prev
        );
        L::sizes(page, prev, index, is_leaf(page)).in_page(page_no(page))?
    };
    let common = L::diff_with_prev(page, prev, prev_sizes, rec);
    let bytes = rec.as_bytes();
    let data = rec.data();
    let rel_prev = prev - L::INFIMUM;

    let (op, origin) = match L::FORMAT {
        RecordFormat::Redundant => {
            let var = rec.extra_size() - REC_N_OLD_EXTRA_BYTES;
            let short = redundant::is_short_record(rec);
            let enc_hdr = ((rec.n_fields() - 1) << 3)
                | ((short as usize) << 2)
                | (rec.info_bits() >> 4) as usize;
            let mut literal = Vec::with_capacity(var - common.hdr_c + data.len() - common.data_c);
            literal.extend_from_slice(&bytes[..var - common.hdr_c]);
            literal.extend_from_slice(&data[common.data_c..]);
            let op = InsertRedundant {
                reuse: matches!(space, Space::Free { .. }),
                prev: rel_prev,
                enc_hdr,
                hdr_c: common.hdr_c,
                data_c: common.data_c,
                literal,
            };
            let origin = apply_insert_redundant(page, &op)?;
            (RedoOp::InsertRedundant(op), origin)
        }
        RecordFormat::Compact => {
            let hdr_l = rec.extra_size() - REC_N_NEW_EXTRA_BYTES - common.hdr_c;
            let mut literal = Vec::with_capacity(hdr_l + data.len() - common.data_c);
            literal.extend_from_slice(&bytes[..hdr_l]);
            literal.extend_from_slice(&data[common.data_c..]);
            let op = InsertDynamic {
                shift: match space {
                    Space::Free { shift } => Some(encode_shift(shift)),
                    Space::Heap => None,
                },
                prev: rel_prev,
                enc_hdr_l: (hdr_l << 3) | (rec.info_bits() >> 4) as usize,
                hdr_c: common.hdr_c,
                data_c: common.data_c,
                literal,
            };
            let origin = apply_insert_dynamic(page, &op)?;
            (RedoOp::InsertDynamic(op), origin)
        }
    };

    let page_no = page_no(page);
    tracing::trace!(
        page_no,
        origin,
        size = rec.size(),
        hdr_c = common.hdr_c,
        data_c = common.data_c,
        reused = matches!(space, Space::Free { .. }),
        "record inserted"
    );
    if mtr.is_logged() {
        mtr.log(RedoRecord::new(page_no, op));
    }
    mtr.set_modified(page_no);
    Ok(Some(origin))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::btree::testutil::{int_index, keys_of, page_with_keys, row};
    use crate::btree::{delete_rec, search, user_recs, validate_page, SearchKey, SearchMode};
    use crate::config::*;
    use crate::records::{Compact, RecordBuilder, Redundant};
    use crate::redo::MiniTransaction;
    use crate::storage::page::{direction, garbage, heap_top, n_recs, n_slots};
    use crate::storage::{new_page, PageInit};

    fn cursor_for(page: &[u8], k: u32) -> PageCursor {
        let key = k.to_be_bytes();
        let cursor = search(page, &int_index(), &SearchKey::new().field(&key), SearchMode::Le).unwrap();
        cursor
    }

    #[test]
    fn first_insert_into_empty_page() {
        for format in [RecordFormat::Redundant, RecordFormat::Compact] {
            let index = int_index();
            let mut page = new_page(5, &PageInit::leaf(format, index.id));
            let rec = row(&index, format, 42, b"answer");
            let top = heap_top(&page);
            let mut mtr = MiniTransaction::new();

            let at = PageCursor::before_first(&page);
            let origin = insert_rec(&mut page, &index, &at, &rec, &mut mtr)
                .unwrap()
                .unwrap();

            assert_eq!(origin, top + rec.extra_size());
            assert_eq!(heap_top(&page), top + rec.size());
            assert_eq!(n_recs(&page), 1);
            assert_eq!(n_heap(&page), 3);
            assert_eq!(header_field(&page, PAGE_LAST_INSERT), origin);
            assert_eq!(page[origin..origin + rec.data_size()], *rec.data());
            assert_eq!(keys_of(&page), [42]);
            assert!(mtr.is_modified(5));
            assert_eq!(mtr.records().len(), 1);
        }
    }

    #[test]
    fn ascending_inserts_track_right_direction() {
        let index = int_index();
        let page = page_with_keys(RecordFormat::Compact, &index, &[1, 2, 3, 4, 5]);

        assert_eq!(direction(&page), PAGE_RIGHT);
        assert_eq!(header_field(&page, PAGE_N_DIRECTION), 4);
    }

    #[test]
    fn descending_inserts_track_left_direction() {
        let index = int_index();
        let page = page_with_keys(RecordFormat::Redundant, &index, &[5, 4, 3, 2, 1]);

        assert_eq!(direction(&page), PAGE_LEFT);
        assert_eq!(header_field(&page, PAGE_N_DIRECTION), 4);
        assert_eq!(keys_of(&page), [1, 2, 3, 4, 5]);
    }

    #[test]
    fn shared_prefix_is_not_logged() {
        let index = int_index();
        let mut page = page_with_keys(RecordFormat::Compact, &index, &[1000]);
        let rec = row(&index, RecordFormat::Compact, 1001, b"value-1000");
        let mut mtr = MiniTransaction::new();

        let at = cursor_for(&page, 1001);
        insert_rec(&mut page, &index, &at, &rec, &mut mtr)
            .unwrap()
            .unwrap();

        let RedoOp::InsertDynamic(op) = &mtr.records()[0].op else {
            panic!("compact insert expected");
        };
        assert_eq!(op.data_c, 3);
        assert_eq!(op.hdr_c, rec.extra_size() - REC_N_NEW_EXTRA_BYTES);
        assert!(op.literal.len() < rec.size());
    }

    #[test]
    fn freed_space_is_reused() {
        for format in [RecordFormat::Redundant, RecordFormat::Compact] {
            let index = int_index();
            let mut page = page_with_keys(format, &index, &[1, 2, 3]);
            let freed = user_recs(&page).unwrap()[1];
            let mut cursor = PageCursor::at(freed);
            let mut mtr = MiniTransaction::new();
            delete_rec(&mut page, &index, &mut cursor, &mut mtr).unwrap();
            let top = heap_top(&page);
            let heap = n_heap(&page);
            assert_eq!(header_field(&page, PAGE_FREE), freed);

            let rec = row(&index, format, 2, b"value-9");
            let at = cursor_for(&page, 2);
            let origin = insert_rec(&mut page, &index, &at, &rec, &mut mtr)
                .unwrap()
                .unwrap();

            assert_eq!(heap_top(&page), top);
            assert_eq!(n_heap(&page), heap);
            assert_eq!(header_field(&page, PAGE_FREE), 0);
            assert_eq!(origin, freed);
            assert_eq!(garbage(&page), 0);
            assert_eq!(keys_of(&page), [1, 2, 3]);
            validate_page(&page, &index).unwrap();
        }
    }

    #[test]
    fn full_page_returns_none_and_leaves_page_alone() {
        let index = int_index();
        let mut page = new_page(5, &PageInit::leaf(RecordFormat::Redundant, index.id));
        let mut mtr = MiniTransaction::new();
        let mut k = 0u32;
        loop {
            let rec = row(&index, RecordFormat::Redundant, k, b"0123456789abcdef0123456789abcdef");
            let before = page.clone();
            let cursor = PageCursor::at(user_recs(&page).unwrap().last().copied().unwrap_or(Redundant::INFIMUM));
            match insert_rec(&mut page, &index, &cursor, &rec, &mut mtr).unwrap() {
                Some(_) => k += 1,
                None => {
                    assert_eq!(page, before);
                    break;
                }
            }
        }

        assert!(k > 100);
        assert_eq!(n_recs(&page), k as usize);
        assert!(n_slots(&page) > 2);
        validate_page(&page, &index).unwrap();
    }

    #[test]
    fn overfull_group_splits_slot() {
        let index = int_index();
        let keys: Vec<u32> = (1..=7).collect();
        let mut page = page_with_keys(RecordFormat::Compact, &index, &keys);
        // Seven user records and the supremum fill the last slot.
        assert_eq!(n_slots(&page), 2);
        assert_eq!(Compact::n_owned(&page, Compact::SUPREMUM), PAGE_DIR_SLOT_MAX_N_OWNED);

        let rec = row(&index, RecordFormat::Compact, 8, b"x");
        let mut mtr = MiniTransaction::new();
        let at = cursor_for(&page, 8);
        insert_rec(&mut page, &index, &at, &rec, &mut mtr)
            .unwrap()
            .unwrap();

        assert_eq!(n_slots(&page), 3);
        let mid = crate::storage::page::slot_rec(&page, 1);
        assert_eq!(Compact::n_owned(&page, mid), 4);
        assert_eq!(Compact::n_owned(&page, Compact::SUPREMUM), 5);
        validate_page(&page, &index).unwrap();
    }

    #[test]
    fn caller_errors_are_not_corruption() {
        let index = int_index();
        let mut page = page_with_keys(RecordFormat::Compact, &index, &[1]);
        let mut mtr = MiniTransaction::new();

        let redundant = row(&index, RecordFormat::Redundant, 2, b"");
        let at = PageCursor::before_first(&page);
        let err = insert_rec(&mut page, &index, &at, &redundant, &mut mtr)
            .unwrap_err();
        assert!(err.to_string().contains("Redundant record inserted"));

        let key = 2u32.to_be_bytes();
        let flagged = RecordBuilder::new(&index)
            .field(&key)
            .null()
            .info_bits(0x40)
            .build(RecordFormat::Compact)
            .unwrap();
        let at = PageCursor::before_first(&page);
        let err = insert_rec(&mut page, &index, &at, &flagged, &mut mtr)
            .unwrap_err();
        assert!(err.to_string().contains("info bits"));

        let rec = row(&index, RecordFormat::Compact, 2, b"");
        let at = PageCursor::after_last(&page);
        let err = insert_rec(&mut page, &index, &at, &rec, &mut mtr)
            .unwrap_err();
        assert!(err.to_string().contains("after the supremum"));
        assert_eq!(keys_of(&page), [1]);
    }

    #[test]
    fn unlogged_insert_marks_page_only() {
        let index = int_index();
        let mut page = page_with_keys(RecordFormat::Compact, &index, &[1]);
        let mut mtr = MiniTransaction::new();
        mtr.set_log_mode(crate::redo::LogMode::None);

        let rec = row(&index, RecordFormat::Compact, 2, b"");
        let at = cursor_for(&page, 2);
        insert_rec(&mut page, &index, &at, &rec, &mut mtr)
            .unwrap()
            .unwrap();

        assert!(mtr.records().is_empty());
        assert!(mtr.is_modified(5));
    }
}
