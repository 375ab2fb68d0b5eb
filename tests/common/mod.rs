//! Shared helpers for the page integration tests.

#![allow(dead_code)]

use hashbrown::HashMap;
use indexpage::btree::{insert_rec, search, user_recs, SearchKey, SearchMode};
use indexpage::records::{EncodedRecord, FieldDef, IndexDef, IndexKind, RecordBuilder};
use indexpage::redo::{MiniTransaction, PageCreate, RedoLog, RedoOp, RedoRecord, RedoSink};
use indexpage::storage::{new_page, PageInit, RecordFormat};

pub const PAGE_NO: u32 = 3;
pub const INDEX_ID: u64 = 11;

pub type Pages = HashMap<u32, Vec<u8>>;

/// Routes the crate's tracing output to the test harness, filtered by
/// `RUST_LOG` (default `warn`).
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_test_writer()
        .try_init();
}

/// `(id INT4 PRIMARY KEY, payload VARCHAR(64) NULL)`
pub fn index() -> IndexDef {
    IndexDef::new(
        INDEX_ID,
        IndexKind::Clustered,
        [FieldDef::int(4), FieldDef::varchar(64).nullable()],
        1,
    )
    .unwrap()
}

pub fn key_bytes(k: u32) -> [u8; 4] {
    k.to_be_bytes()
}

/// Payload whose length varies with the key so freed records differ in size.
pub fn payload(k: u32) -> Vec<u8> {
    let len = 3 + (k as usize * 7) % 29;
    (0..len).map(|i| b'a' + ((k as usize + i) % 26) as u8).collect()
}

pub fn row(index: &IndexDef, format: RecordFormat, k: u32) -> EncodedRecord {
    let key = key_bytes(k);
    let value = payload(k);
    let rec = RecordBuilder::new(index)
        .field(&key)
        .field(&value)
        .build(format)
        .unwrap();
    rec
}

pub fn rec_key(page: &[u8], rec: usize) -> u32 {
    u32::from_be_bytes([page[rec], page[rec + 1], page[rec + 2], page[rec + 3]])
}

pub fn keys_of(page: &[u8]) -> Vec<u32> {
    user_recs(page)
        .unwrap()
        .into_iter()
        .map(|rec| rec_key(page, rec))
        .collect()
}

pub fn empty_page(format: RecordFormat) -> Vec<u8> {
    new_page(PAGE_NO, &PageInit::leaf(format, INDEX_ID))
}

/// Searches for the insertion point of `k` and inserts its row there.
/// Returns the new record's origin, `None` if the page is full.
pub fn insert_key<M: RedoSink>(
    page: &mut [u8],
    index: &IndexDef,
    k: u32,
    mtr: &mut M,
) -> Option<usize> {
    let key = key_bytes(k);
    let cursor = search(page, index, &SearchKey::new().field(&key), SearchMode::Le).unwrap();
    let rec = row(index, RecordFormat::of(page), k);
    insert_rec(page, index, &cursor, &rec, mtr).unwrap()
}

pub fn page_with_keys(format: RecordFormat, keys: &[u32]) -> Vec<u8> {
    let index = index();
    let mut page = empty_page(format);
    let mut mtr = MiniTransaction::new();
    for &k in keys {
        insert_key(&mut page, &index, k, &mut mtr).expect("page full");
    }
    page
}

pub fn page_create_record(format: RecordFormat) -> RedoRecord {
    RedoRecord::new(
        PAGE_NO,
        RedoOp::PageCreate(PageCreate {
            compact: format == RecordFormat::Compact,
            rtree: false,
            level: 0,
            index_id: INDEX_ID,
            max_trx_id: 0,
        }),
    )
}

/// A page store holding one empty page whose creation is the first frame
/// of the returned log.
pub fn logged_empty_page(format: RecordFormat) -> (RedoLog, Pages) {
    let log = RedoLog::new();
    let mut pages = Pages::new();
    pages.insert(PAGE_NO, empty_page(format));

    let mut mtr = MiniTransaction::new();
    mtr.log(page_create_record(format));
    mtr.set_modified(PAGE_NO);
    mtr.commit(&log, &mut pages).unwrap();
    (log, pages)
}
