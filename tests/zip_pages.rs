//! # Compressed Page Tests
//!
//! Drives inserts into compact pages that carry a compressed image, using a
//! stand-in codec whose output size depends only on the record bytes on the
//! page. Checks that the image bookkeeping stays within its size, that the
//! page stays valid through reorganizations and that the redo log replays
//! to the same page.
//!
//! ## Usage
//!
//! ```sh
//! cargo test --test zip_pages
//! ```

mod common;

use std::collections::BTreeSet;

use common::*;
use indexpage::btree::{
    delete_rec, insert_rec_zip, open_on_nth_user_rec, search, validate_page, PageCompressor,
    SearchKey, SearchMode, ZipDescriptor,
};
use indexpage::config::CompressionLevel;
use indexpage::redo::{recover, MiniTransaction, RedoOp};
use indexpage::storage::page::{data_size, n_recs};
use indexpage::storage::RecordFormat;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

/// Pretends records compress to about 60% of their size.
struct Proportional {
    calls: usize,
}

impl PageCompressor for Proportional {
    fn compress(&mut self, page: &[u8], level: CompressionLevel) -> Option<usize> {
        self.calls += 1;
        let ratio = 50 + 2 * level.get() as usize;
        Some(data_size(page) * ratio / 100 + 96)
    }
}

fn insert_zip(
    page: &mut [u8],
    zip: &mut ZipDescriptor,
    codec: &mut Proportional,
    k: u32,
    mtr: &mut MiniTransaction,
) -> Option<usize> {
    let index = index();
    let key = key_bytes(k);
    let mut cursor = search(page, &index, &SearchKey::new().field(&key), SearchMode::Le).unwrap();
    let rec = row(&index, RecordFormat::Compact, k);
    insert_rec_zip(page, zip, &index, &mut cursor, &rec, CompressionLevel::default(), codec, mtr).unwrap()
}

mod zip_workload_tests {
    use super::*;

    #[test]
    fn random_inserts_keep_image_within_size() {
        for size in [2048, 4096, 8192] {
            let mut rng = StdRng::seed_from_u64(size as u64);
            let index = index();
            let (log, mut pages) = logged_empty_page(RecordFormat::Compact);
            let mut zip = ZipDescriptor::new(size, true).unwrap();
            let mut codec = Proportional { calls: 0 };
            let mut model = BTreeSet::new();
            let mut images = 0;

            for step in 0..600 {
                let mut mtr = MiniTransaction::new();
                {
                    let page = pages.get_mut(&PAGE_NO).unwrap();
                    if step % 5 == 4 && n_recs(page) > 0 {
                        let nth = rng.gen_range(0..n_recs(page));
                        let mut cursor = open_on_nth_user_rec(page, nth).unwrap();
                        model.remove(&rec_key(page, cursor.rec()));
                        delete_rec(page, &index, &mut cursor, &mut mtr).unwrap();
                    } else {
                        let k = rng.gen_range(0..3000);
                        if !model.contains(&k) && insert_zip(page, &mut zip, &mut codec, k, &mut mtr).is_some() {
                            model.insert(k);
                        }
                    }

                    assert_eq!(keys_of(page), model.iter().copied().collect::<Vec<_>>());
                    assert!(
                        zip.m_end + zip.trailer(page, false) <= zip.size,
                        "image overflows at step {step}: {zip:?}"
                    );
                    validate_page(page, &index).unwrap();
                }
                images += mtr
                    .records()
                    .iter()
                    .filter(|r| matches!(r.op, RedoOp::PageImage(_)))
                    .count();
                mtr.commit(&log, &mut pages).unwrap();
            }

            assert!(codec.calls > 0, "image of {size} bytes never recompressed");
            assert!(images > 0);

            let mut recovered = Pages::new();
            let report = recover(&log.to_bytes(), &mut recovered).unwrap();
            assert!(report.skipped.is_empty(), "{:?}", report.skipped);
            assert_eq!(recovered[&PAGE_NO], pages[&PAGE_NO], "image size {size}");
        }
    }

    #[test]
    fn sequential_appends_fill_then_refuse() {
        let (_, mut pages) = logged_empty_page(RecordFormat::Compact);
        let page = pages.get_mut(&PAGE_NO).unwrap();
        let mut zip = ZipDescriptor::new(1024, true).unwrap();
        let mut codec = Proportional { calls: 0 };
        let mut mtr = MiniTransaction::new();

        let mut k = 0;
        while insert_zip(page, &mut zip, &mut codec, k, &mut mtr).is_some() {
            k += 1;
            assert!(k < 10_000);
        }
        let full = page.to_vec();
        let image = zip;

        assert!(k > 0);
        assert!(insert_zip(page, &mut zip, &mut codec, k, &mut mtr).is_none());
        assert_eq!(page.to_vec(), full);
        assert_eq!(zip, image);
        assert_eq!(keys_of(page), (0..k).collect::<Vec<_>>());
    }
}
