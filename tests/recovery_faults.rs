//! # Recovery Fault Tests
//!
//! Recovery against damaged inputs: pages that do not match the records
//! naming them, frames with a bad checksum and frames whose records do not
//! decode. Recovery must never panic, must leave a page alone when a record
//! does not fit it, and must keep going with the records that do.
//!
//! ## Test Categories
//!
//! 1. **Damaged pages**: records for a corrupted page are skipped, other
//!    pages in the same frames are recovered
//! 2. **Damaged log**: bit flips end the log, undecodable frames are skipped
//!
//! ## Usage
//!
//! ```sh
//! cargo test --test recovery_faults
//! ```

mod common;

use common::*;
use crc::{Crc, CRC_64_ECMA_182};
use indexpage::config::PAGE_N_DIR_SLOTS;
use indexpage::encoding::push_varint;
use indexpage::redo::{recover, MiniTransaction, RedoLog};
use indexpage::storage::page::set_header_field;
use indexpage::storage::{new_page, PageInit, RecordFormat};

const OTHER_PAGE: u32 = 4;

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

fn base_pages(format: RecordFormat) -> Pages {
    let mut pages = Pages::new();
    pages.insert(PAGE_NO, empty_page(format));
    pages.insert(OTHER_PAGE, new_page(OTHER_PAGE, &PageInit::leaf(format, INDEX_ID)));
    pages
}

/// Inserts the same keys into both pages, one frame per key.
fn two_page_log(format: RecordFormat, n: u32) -> (RedoLog, Pages) {
    init_tracing();
    let index = index();
    let log = RedoLog::new();
    let mut pages = base_pages(format);
    for k in 0..n {
        let key = (k * 17) % 101;
        let mut mtr = MiniTransaction::new();
        for page_no in [PAGE_NO, OTHER_PAGE] {
            let page = pages.get_mut(&page_no).unwrap();
            insert_key(page, &index, key, &mut mtr).unwrap();
        }
        mtr.commit(&log, &mut pages).unwrap();
    }
    (log, pages)
}

/// A frame with a valid checksum around `body`.
fn raw_frame(body: &[u8]) -> Vec<u8> {
    let mut frame = Vec::new();
    push_varint(body.len() as u32, &mut frame);
    frame.extend_from_slice(body);
    let checksum = Crc::<u64>::new(&CRC_64_ECMA_182).checksum(&frame);
    frame.extend_from_slice(&checksum.to_be_bytes());
    frame
}

// ============================================================================
// DAMAGED PAGES
// ============================================================================

mod damaged_page_tests {
    use super::*;

    #[test]
    fn corrupt_page_is_skipped_and_left_alone() {
        let (log, live) = two_page_log(RecordFormat::Compact, 40);
        let mut pages = base_pages(RecordFormat::Compact);
        set_header_field(pages.get_mut(&OTHER_PAGE).unwrap(), PAGE_N_DIR_SLOTS, 0);
        let damaged = pages[&OTHER_PAGE].clone();

        let report = recover(&log.to_bytes(), &mut pages).unwrap();

        assert_eq!(report.frames, 40);
        assert_eq!(report.applied, 40);
        assert_eq!(report.skipped.len(), 40);
        assert!(report.skipped.iter().all(|s| s.page_no == OTHER_PAGE));
        assert!(report.skipped[0].reason.contains("directory of 0 slots"), "{}", report.skipped[0].reason);
        assert_eq!(pages[&PAGE_NO], live[&PAGE_NO]);
        assert_eq!(pages[&OTHER_PAGE], damaged);
    }

    #[test]
    fn wrong_record_format_is_skipped() {
        let (log, live) = two_page_log(RecordFormat::Compact, 10);
        let mut pages = base_pages(RecordFormat::Compact);
        pages.insert(OTHER_PAGE, new_page(OTHER_PAGE, &PageInit::leaf(RecordFormat::Redundant, INDEX_ID)));

        let report = recover(&log.to_bytes(), &mut pages).unwrap();

        assert_eq!(report.skipped.len(), 10);
        assert!(report.skipped[0].reason.contains("applied to a Redundant page"));
        assert_eq!(pages[&PAGE_NO], live[&PAGE_NO]);
    }

    #[test]
    fn missing_page_is_reported() {
        let (log, live) = two_page_log(RecordFormat::Redundant, 5);
        let mut pages = base_pages(RecordFormat::Redundant);
        pages.remove(&OTHER_PAGE);

        let report = recover(&log.to_bytes(), &mut pages).unwrap();

        assert_eq!(report.skipped.len(), 5);
        assert!(report.skipped.iter().all(|s| s.reason.contains("does not exist")));
        assert_eq!(pages[&PAGE_NO], live[&PAGE_NO]);
        assert!(!pages.contains_key(&OTHER_PAGE));
    }

    #[test]
    fn page_of_wrong_size_is_skipped() {
        let (log, _) = two_page_log(RecordFormat::Compact, 3);
        let mut pages = base_pages(RecordFormat::Compact);
        pages.insert(OTHER_PAGE, vec![0u8; 100]);

        let report = recover(&log.to_bytes(), &mut pages).unwrap();

        assert_eq!(report.skipped.len(), 3);
        assert_eq!(pages[&OTHER_PAGE], vec![0u8; 100]);
    }
}

// ============================================================================
// DAMAGED LOG
// ============================================================================

mod damaged_log_tests {
    use super::*;

    #[test]
    fn bit_flip_ends_the_log() {
        let (log, _) = two_page_log(RecordFormat::Compact, 20);
        let mut bytes = log.to_bytes();
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0x10;

        let mut pages = base_pages(RecordFormat::Compact);
        let report = recover(&bytes, &mut pages).unwrap();

        assert!(report.torn_tail);
        assert!(report.frames < 20);
        assert!(report.end_lsn as usize <= mid);
        assert!(report.skipped.is_empty());
    }

    #[test]
    fn undecodable_frame_is_skipped_and_recovery_continues() {
        let index = index();
        let log = RedoLog::from_bytes(raw_frame(&[0x63, 0x01, 0x00]));
        let mut pages = base_pages(RecordFormat::Compact);
        let mut mtr = MiniTransaction::new();
        insert_key(pages.get_mut(&PAGE_NO).unwrap(), &index, 8, &mut mtr).unwrap();
        mtr.commit(&log, &mut pages).unwrap();

        let mut recovered = base_pages(RecordFormat::Compact);
        let report = recover(&log.to_bytes(), &mut recovered).unwrap();

        assert_eq!(report.frames, 2);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].page_no, 0);
        assert_eq!(report.applied, 1);
        assert_eq!(recovered[&PAGE_NO], pages[&PAGE_NO]);
    }

    #[test]
    fn random_garbage_never_panics() {
        use rand::rngs::StdRng;
        use rand::{Rng, SeedableRng};

        let mut rng = StdRng::seed_from_u64(1234);
        for _ in 0..200 {
            let len = rng.gen_range(0..64);
            let body: Vec<u8> = (0..len).map(|_| rng.gen()).collect();
            let mut log = raw_frame(&body);
            log.extend((0..rng.gen_range(0..16)).map(|_| rng.gen::<u8>()));

            let mut pages = base_pages(RecordFormat::Redundant);
            let report = recover(&log, &mut pages).unwrap();

            assert_eq!(report.frames, 1);
        }
    }
}
