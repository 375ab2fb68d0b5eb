//! Page builders shared by the unit tests of the page algorithms.

use super::compare::SearchKey;
use super::cursor::{search, user_recs, SearchMode};
use super::insert::insert_rec;
use crate::records::{EncodedRecord, FieldDef, IndexDef, IndexKind, RecordBuilder};
use crate::redo::MiniTransaction;
use crate::storage::{new_page, PageInit, RecordFormat};

pub(crate) fn int_index() -> IndexDef {
    IndexDef::new(
        7,
        IndexKind::Clustered,
        [FieldDef::int(4), FieldDef::varchar(32).nullable()],
        1,
    )
    .unwrap()
}

pub(crate) fn spatial_index() -> IndexDef {
    IndexDef::new(9, IndexKind::Spatial, [FieldDef::mbr(), FieldDef::int(4)], 1).unwrap()
}

pub(crate) fn int_key(k: u32) -> [u8; 4] {
    k.to_be_bytes()
}

/// First field of a record decoded as a big-endian u32.
pub(crate) fn rec_key(page: &[u8], rec: usize) -> u32 {
    u32::from_be_bytes([page[rec], page[rec + 1], page[rec + 2], page[rec + 3]])
}

pub(crate) fn keys_of(page: &[u8]) -> Vec<u32> {
    user_recs(page)
        .unwrap()
        .into_iter()
        .map(|rec| rec_key(page, rec))
        .collect()
}

pub(crate) fn row(index: &IndexDef, format: RecordFormat, k: u32, value: &[u8]) -> EncodedRecord {
    let key = int_key(k);
    let mut b = RecordBuilder::new(index).field(&key);
    if index.n_fields(true) > 1 {
        b = b.field(value);
    }
    b.build(format).unwrap()
}

/// Inserts `rec` after the last record not greater than `key`.
pub(crate) fn insert_at_search(
    page: &mut [u8],
    index: &IndexDef,
    key: &SearchKey<'_>,
    rec: &EncodedRecord,
) -> usize {
    let cursor = search(page, index, key, SearchMode::Le).unwrap();
    let mut mtr = MiniTransaction::new();
    insert_rec(page, index, &cursor, rec, &mut mtr)
        .unwrap()
        .expect("page full")
}

pub(crate) fn page_with_rows(format: RecordFormat, index: &IndexDef, rows: &[(u32, &[u8])]) -> Vec<u8> {
    let mut page = new_page(5, &PageInit::leaf(format, index.id));
    for &(k, value) in rows {
        let key = int_key(k);
        let rec = row(index, format, k, value);
        insert_at_search(&mut page, index, &SearchKey::new().field(&key), &rec);
    }
    page
}

pub(crate) fn page_with_keys(format: RecordFormat, index: &IndexDef, keys: &[u32]) -> Vec<u8> {
    let values: Vec<Vec<u8>> = keys.iter().map(|k| format!("value-{k}").into_bytes()).collect();
    let rows: Vec<(u32, &[u8])> = keys
        .iter()
        .zip(&values)
        .map(|(&k, v)| (k, v.as_slice()))
        .collect();
    page_with_rows(format, index, &rows)
}
