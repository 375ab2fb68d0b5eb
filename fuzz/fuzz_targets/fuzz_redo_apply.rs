//! Fuzz testing for redo record decoding and apply.
//!
//! Builds a page from a list of keys, then decodes arbitrary bytes as redo
//! records and applies them to it. Decoding and apply must reject what does
//! not fit the page without panicking, whatever state earlier records left
//! the page in.

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;

use indexpage::btree::{insert_rec, search, validate_page, SearchKey, SearchMode};
use indexpage::records::{FieldDef, IndexDef, IndexKind, RecordBuilder};
use indexpage::redo::{apply, decode_all, ApplyOutcome, MiniTransaction, RedoRecord};
use indexpage::storage::{new_page, PageInit, RecordFormat};

const PAGE_NO: u32 = 7;

#[derive(Debug, Arbitrary)]
struct ApplyInput {
    compact: bool,
    keys: Vec<(u16, u8)>,
    records: Vec<u8>,
}

fn base_page(format: RecordFormat, index: &IndexDef, keys: &[(u16, u8)]) -> Vec<u8> {
    let mut page = new_page(PAGE_NO, &PageInit::leaf(format, index.id));
    let mut mtr = MiniTransaction::new();
    for &(k, len) in keys.iter().take(300) {
        let key = u32::from(k).to_be_bytes();
        let value = vec![b'v'; usize::from(len % 40)];
        let Ok(cursor) = search(&page, index, &SearchKey::new().field(&key), SearchMode::Le) else {
            break;
        };
        let Ok(rec) = RecordBuilder::new(index).field(&key).field(&value).build(format) else {
            break;
        };
        if !matches!(insert_rec(&mut page, index, &cursor, &rec, &mut mtr), Ok(Some(_))) {
            break;
        }
    }
    page
}

fuzz_target!(|input: ApplyInput| {
    let index = IndexDef::new(
        1,
        IndexKind::Clustered,
        [FieldDef::int(4), FieldDef::varchar(40)],
        1,
    )
    .unwrap();
    let format = if input.compact {
        RecordFormat::Compact
    } else {
        RecordFormat::Redundant
    };
    let mut page = base_page(format, &index, &input.keys);

    let Ok(records) = decode_all(&input.records) else {
        return;
    };
    for record in records {
        let record = RedoRecord {
            page_no: PAGE_NO,
            ..record
        };
        let before = page.clone();
        match apply(&mut page, &record) {
            ApplyOutcome::Applied => {
                let _ = validate_page(&page, &index);
            }
            ApplyOutcome::Skipped(_) => assert_eq!(page, before, "skipped record changed the page"),
        }
    }
});
