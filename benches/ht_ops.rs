//! Microbenchmarks for the hot table paths: pipelined vs no-prefetch
//! inserts and finds, uniform and zipfian key streams.

use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput};
use std::hint::black_box;
use std::time::Duration;

use kmerhash::constants::BATCH_LEN;
use kmerhash::{
    AggrKv, CasHashTable, HTBatchRunner, HashTable, InputReader, InsertFindArgument,
    TieredHashTable, ZipfianReader,
};

const TABLE_CAPACITY: u64 = 1 << 20;

fn bench_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("insert");
    group.sample_size(20);
    group.warm_up_time(Duration::from_millis(500));

    for &count in &[10_000u64, 100_000] {
        group.throughput(Throughput::Elements(count));
        group.bench_with_input(
            BenchmarkId::new("pipelined", count),
            &count,
            |b, &count| {
                b.iter_batched(
                    || CasHashTable::<AggrKv>::new(TABLE_CAPACITY),
                    |mut ht| {
                        let mut runner = HTBatchRunner::<_, BATCH_LEN>::new(&mut ht);
                        for key in 1..=count {
                            runner.insert(key, 1);
                        }
                        runner.flush();
                        drop(runner);
                        black_box(ht.get_fill())
                    },
                    BatchSize::LargeInput,
                );
            },
        );
        group.bench_with_input(
            BenchmarkId::new("noprefetch", count),
            &count,
            |b, &count| {
                b.iter_batched(
                    || CasHashTable::<AggrKv>::new(TABLE_CAPACITY),
                    |mut ht| {
                        for key in 1..=count {
                            ht.insert_noprefetch(&InsertFindArgument {
                                key,
                                value: 1,
                                id: 0,
                                part_id: 0,
                            });
                        }
                        black_box(ht.get_fill())
                    },
                    BatchSize::LargeInput,
                );
            },
        );
    }
    group.finish();
}

fn bench_find(c: &mut Criterion) {
    let mut group = c.benchmark_group("find");
    group.sample_size(20);
    group.warm_up_time(Duration::from_millis(500));

    let count = 100_000u64;
    let mut ht = CasHashTable::<AggrKv>::new(TABLE_CAPACITY);
    {
        let mut runner = HTBatchRunner::<_, BATCH_LEN>::new(&mut ht);
        for key in 1..=count {
            runner.insert(key, key);
        }
        runner.flush();
    }

    group.throughput(Throughput::Elements(count));
    group.bench_function("pipelined", |b| {
        b.iter(|| {
            let mut hits = 0u64;
            let mut runner = HTBatchRunner::<_, BATCH_LEN>::with_callback(
                &mut ht,
                Some(Box::new(|_r: &kmerhash::FindResult| hits += 1)),
            );
            for key in 1..=count {
                runner.find(key, key as u32);
            }
            runner.flush();
            drop(runner);
            black_box(hits)
        });
    });
    group.bench_function("noprefetch", |b| {
        b.iter(|| {
            let mut hits = 0u64;
            for key in 1..=count {
                hits += u64::from(ht.find_noprefetch(key).is_some());
            }
            black_box(hits)
        });
    });
    group.finish();
}

fn bench_zipfian_aggregation(c: &mut Criterion) {
    let mut group = c.benchmark_group("zipfian_insert");
    group.sample_size(15);
    group.warm_up_time(Duration::from_millis(500));

    let ops = 100_000u64;
    group.throughput(Throughput::Elements(ops));
    for &skew in &[0.5f64, 0.99] {
        group.bench_with_input(BenchmarkId::new("shared", skew), &skew, |b, &skew| {
            b.iter_batched(
                || {
                    (
                        CasHashTable::<AggrKv>::new(TABLE_CAPACITY),
                        ZipfianReader::new(1 << 16, skew, 42, ops),
                    )
                },
                |(mut ht, mut reader)| {
                    let mut runner = HTBatchRunner::<_, BATCH_LEN>::new(&mut ht);
                    let mut key = 0u64;
                    while reader.next(&mut key) {
                        runner.insert(key, 1);
                    }
                    runner.flush();
                    drop(runner);
                    black_box(ht.get_max_count())
                },
                BatchSize::LargeInput,
            );
        });
        group.bench_with_input(BenchmarkId::new("tiered", skew), &skew, |b, &skew| {
            b.iter_batched(
                || {
                    (
                        TieredHashTable::<AggrKv>::new(TABLE_CAPACITY),
                        ZipfianReader::new(1 << 16, skew, 42, ops),
                    )
                },
                |(mut ht, mut reader)| {
                    let mut runner = HTBatchRunner::<_, BATCH_LEN>::new(&mut ht);
                    let mut key = 0u64;
                    while reader.next(&mut key) {
                        runner.insert(key, 1);
                    }
                    runner.flush();
                    drop(runner);
                    black_box(ht.get_lvl1_fill())
                },
                BatchSize::LargeInput,
            );
        });
    }
    group.finish();
}

criterion_group!(benches, bench_insert, bench_find, bench_zipfian_aggregation);
criterion_main!(benches);
