//! Fuzz testing for log recovery.
//!
//! Feeds arbitrary bytes to recovery as a redo log over a small page store.
//! Frames almost never pass their checksum, so the interesting inputs are
//! the ones the fuzzer finds through the length prefix and torn tails.

#![no_main]

use hashbrown::HashMap;
use libfuzzer_sys::fuzz_target;

use indexpage::redo::{read_frame, recover};
use indexpage::storage::{new_page, PageInit, RecordFormat};

fuzz_target!(|log: &[u8]| {
    let mut pages: HashMap<u32, Vec<u8>> = HashMap::new();
    pages.insert(1, new_page(1, &PageInit::leaf(RecordFormat::Compact, 1)));
    pages.insert(2, new_page(2, &PageInit::leaf(RecordFormat::Redundant, 1)));

    let mut frames = 0;
    let mut pos = 0;
    while let Some(frame) = read_frame(log, pos) {
        pos = frame.end;
        frames += 1;
    }

    let report = recover(log, &mut pages).expect("recovery reports damage instead of failing");
    assert_eq!(report.frames, frames);
    assert_eq!(report.torn_tail, pos < log.len());
});
