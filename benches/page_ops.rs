//! Page operation benchmarks for indexpage
//!
//! Measures the per-record cost of the operations a B-tree performs on one
//! page: search, insert at the search position, delete, and redo replay.
//! All work stays in memory on a single 16 KiB page.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use indexpage::btree::{
    delete_rec, insert_rec, open_on_nth_user_rec, search, PageCursor, SearchKey, SearchMode,
};
use indexpage::records::{FieldDef, IndexDef, IndexKind, RecordBuilder};
use indexpage::redo::{apply, MiniTransaction, RedoRecord};
use indexpage::storage::page::n_recs;
use indexpage::storage::{new_page, PageInit, RecordFormat};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

const FORMATS: [RecordFormat; 2] = [RecordFormat::Redundant, RecordFormat::Compact];

fn index() -> IndexDef {
    IndexDef::new(
        1,
        IndexKind::Clustered,
        [FieldDef::int(4), FieldDef::varchar(32)],
        1,
    )
    .unwrap()
}

fn shuffled(count: u32) -> Vec<u32> {
    let mut keys: Vec<u32> = (0..count).collect();
    keys.shuffle(&mut StdRng::seed_from_u64(42));
    keys
}

/// Inserts `keys` into a fresh page and returns it with the redo records.
fn fill(format: RecordFormat, index: &IndexDef, keys: &[u32]) -> (Vec<u8>, Vec<RedoRecord>) {
    let mut page = new_page(1, &PageInit::leaf(format, index.id));
    let mut mtr = MiniTransaction::new();
    for &k in keys {
        let key = k.to_be_bytes();
        let value = format!("value{:08}", k);
        let cursor = search(&page, index, &SearchKey::new().field(&key), SearchMode::Le).unwrap();
        let rec = RecordBuilder::new(index)
            .field(&key)
            .field(value.as_bytes())
            .build(format)
            .unwrap();
        insert_rec(&mut page, index, &cursor, &rec, &mut mtr).unwrap();
    }
    (page, mtr.records().to_vec())
}

fn bench_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("page_insert");
    let index = index();

    for format in FORMATS {
        for (name, keys) in [
            ("sequential", (0..400).collect::<Vec<u32>>()),
            ("random", shuffled(400)),
        ] {
            group.throughput(Throughput::Elements(keys.len() as u64));
            group.bench_with_input(
                BenchmarkId::new(format!("{name}/{format:?}"), keys.len()),
                &keys,
                |b, keys| b.iter(|| black_box(fill(format, &index, keys))),
            );
        }
    }

    group.finish();
}

fn bench_search(c: &mut Criterion) {
    let mut group = c.benchmark_group("page_search");
    let index = index();
    let probes = shuffled(400);

    for format in FORMATS {
        let (page, _) = fill(format, &index, &shuffled(400));
        group.throughput(Throughput::Elements(probes.len() as u64));
        group.bench_function(BenchmarkId::new("point", format!("{format:?}")), |b| {
            b.iter(|| {
                for &k in &probes {
                    let key = k.to_be_bytes();
                    let cursor =
                        search(&page, &index, &SearchKey::new().field(&key), SearchMode::Ge).unwrap();
                    black_box(cursor);
                }
            })
        });
    }

    group.finish();
}

fn bench_delete(c: &mut Criterion) {
    let mut group = c.benchmark_group("page_delete");
    let index = index();

    for format in FORMATS {
        let (page, _) = fill(format, &index, &shuffled(400));
        group.throughput(Throughput::Elements(400));
        group.bench_function(BenchmarkId::new("drain_middle", format!("{format:?}")), |b| {
            b.iter_with_setup(
                || page.clone(),
                |mut page| {
                    let mut mtr = MiniTransaction::new();
                    while n_recs(&page) > 0 {
                        let mut cursor: PageCursor =
                            open_on_nth_user_rec(&page, n_recs(&page) / 2).unwrap();
                        delete_rec(&mut page, &index, &mut cursor, &mut mtr).unwrap();
                    }
                    page
                },
            );
        });
    }

    group.finish();
}

fn bench_redo_apply(c: &mut Criterion) {
    let mut group = c.benchmark_group("redo_apply");
    let index = index();

    for format in FORMATS {
        let (_, records) = fill(format, &index, &shuffled(400));
        let empty = new_page(1, &PageInit::leaf(format, index.id));
        group.throughput(Throughput::Elements(records.len() as u64));
        group.bench_function(BenchmarkId::new("replay_inserts", format!("{format:?}")), |b| {
            b.iter_with_setup(
                || empty.clone(),
                |mut page| {
                    for record in &records {
                        black_box(apply(&mut page, record));
                    }
                    page
                },
            );
        });
    }

    group.finish();
}

criterion_group!(benches, bench_insert, bench_search, bench_delete, bench_redo_apply);
criterion_main!(benches);
