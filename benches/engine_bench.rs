use criterion::{criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use tempfile::tempdir;

use lsm_store::{Database, OpenOptions, ReadOptions, WriteBatch, WriteOptions};

const N: usize = 10_000;
const VAL_SIZE: usize = 100;

fn options() -> OpenOptions {
    OpenOptions {
        create_if_missing: true,
        write_buffer_size: 256 * 1024,
        ..OpenOptions::default()
    }
}

fn key(i: usize) -> Vec<u8> {
    format!("key{:08}", i).into_bytes()
}

/// Database pre-loaded with `N` keys, compacted out of level 0.
fn loaded() -> (tempfile::TempDir, Database) {
    let dir = tempdir().unwrap();
    let db = Database::open(dir.path(), options()).unwrap();
    let value = vec![b'x'; VAL_SIZE];
    for i in 0..N {
        db.put(&key(i), &value, &WriteOptions::default()).unwrap();
    }
    db.compact_range(None, None).unwrap();
    (dir, db)
}

fn sequential_puts(c: &mut Criterion) {
    let mut group = c.benchmark_group("write");
    group.throughput(Throughput::Elements(N as u64));
    group.sample_size(10);
    group.bench_function("put_10k", |b| {
        b.iter_batched(
            || {
                let dir = tempdir().unwrap();
                let db = Database::open(dir.path(), options()).unwrap();
                (dir, db)
            },
            |(_dir, db)| {
                let value = vec![b'x'; VAL_SIZE];
                for i in 0..N {
                    db.put(&key(i), &value, &WriteOptions::default()).unwrap();
                }
            },
            BatchSize::PerIteration,
        );
    });
    group.bench_function("batch_100x100", |b| {
        b.iter_batched(
            || {
                let dir = tempdir().unwrap();
                let db = Database::open(dir.path(), options()).unwrap();
                (dir, db)
            },
            |(_dir, db)| {
                let value = vec![b'x'; VAL_SIZE];
                for chunk in 0..N / 100 {
                    let mut batch = WriteBatch::new();
                    for i in chunk * 100..(chunk + 1) * 100 {
                        batch.put(&key(i), &value);
                    }
                    db.write(batch, &WriteOptions::default()).unwrap();
                }
            },
            BatchSize::PerIteration,
        );
    });
    group.finish();
}

fn point_reads(c: &mut Criterion) {
    let (_dir, db) = loaded();
    let mut i = 0usize;
    c.bench_function("get_hit", |b| {
        b.iter(|| {
            i = (i + 7919) % N;
            db.get(&key(i), &ReadOptions::default()).unwrap()
        })
    });
    c.bench_function("get_miss", |b| {
        b.iter(|| {
            i = (i + 7919) % N;
            db.get(format!("absent{:08}", i).as_bytes(), &ReadOptions::default())
                .unwrap()
        })
    });
}

fn full_scan(c: &mut Criterion) {
    let (_dir, db) = loaded();
    let mut group = c.benchmark_group("scan");
    group.throughput(Throughput::Elements(N as u64));
    group.bench_function("iterate_10k", |b| {
        b.iter(|| {
            let mut iter = db.iter(&ReadOptions::default()).unwrap();
            iter.seek_to_first().unwrap();
            let mut count = 0;
            while iter.valid() {
                count += 1;
                iter.next().unwrap();
            }
            assert_eq!(count, N);
        })
    });
    group.finish();
}

criterion_group!(benches, sequential_puts, point_reads, full_scan);
criterion_main!(benches);
