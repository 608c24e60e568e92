//! Synthetic benchmark driver for the hash table topologies.
//!
//! Inserts a synthetic key stream (uniform counter or zipfian) across N
//! worker threads, then reads it back, and reports per-phase throughput
//! plus probe diagnostics. `--no-prefetch` bypasses the pipeline for the
//! single-key baseline.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::Parser;
use crossbeam_channel::bounded;
use tracing::info;
use tracing_subscriber::EnvFilter;

use kmerhash::stats::StatsSink;
use kmerhash::{
    AggrKv, BenchConfig, CasHashTable, CasTableShared, ConfigOverrides, CounterReader,
    HTBatchRunner, HasherKind, HashTable, InputReader, InsertFindArgument, OpTimings,
    PartitionedHashStore, ProbeStrategy, TableKind, ThreadStats, TieredHashTable,
    TieredTableShared, ZipfianReader,
};

#[derive(Debug, Parser)]
#[command(name = "khtbench", about = "concurrent hash table benchmark")]
struct Cli {
    /// Path to a TOML config file.
    #[arg(long)]
    config: Option<String>,
    /// Table topology: shared | partitioned | tiered.
    #[arg(long)]
    ht_type: Option<String>,
    /// Requested table capacity.
    #[arg(long)]
    ht_size: Option<u64>,
    /// Target fill percentage.
    #[arg(long)]
    ht_fill: Option<u32>,
    /// Worker thread count.
    #[arg(long)]
    num_threads: Option<u32>,
    /// Times the key set is re-inserted.
    #[arg(long)]
    insert_factor: Option<u64>,
    /// Zipfian skew (0 = uniform counter workload).
    #[arg(long)]
    skew: Option<f64>,
    /// Workload seed.
    #[arg(long)]
    seed: Option<u64>,
    /// Hash function: xxh3 | xxh64 | wyhash | fnv | fx.
    #[arg(long)]
    hasher: Option<String>,
    /// Probe strategy: branching | branchless-cmove | simd-batch.
    #[arg(long)]
    probe: Option<String>,
    /// Bypass batching and the prefetch pipeline.
    #[arg(long)]
    no_prefetch: bool,
    /// Sample per-request pipeline latency.
    #[arg(long)]
    collect_latency: bool,
    /// Dump table contents to this file after the run.
    #[arg(long)]
    ht_file: Option<std::path::PathBuf>,
}

fn parse_table_kind(text: &str) -> Result<TableKind> {
    Ok(match text {
        "shared" => TableKind::Shared,
        "partitioned" => TableKind::Partitioned,
        "tiered" => TableKind::Tiered,
        other => bail!("unknown table kind: {other}"),
    })
}

fn parse_hasher(text: &str) -> Result<HasherKind> {
    Ok(match text {
        "xxh3" => HasherKind::Xxh3,
        "xxh64" => HasherKind::Xxh64,
        "wyhash" => HasherKind::Wyhash,
        "fnv" => HasherKind::Fnv,
        "fx" => HasherKind::Fx,
        other => bail!("unknown hasher: {other}"),
    })
}

fn parse_probe(text: &str) -> Result<ProbeStrategy> {
    Ok(match text {
        "branching" => ProbeStrategy::Branching,
        "branchless-cmove" => ProbeStrategy::BranchlessCmove,
        "simd-batch" => ProbeStrategy::SimdBatch,
        other => bail!("unknown probe strategy: {other}"),
    })
}

fn overrides_from(cli: &Cli) -> Result<ConfigOverrides> {
    Ok(ConfigOverrides {
        ht_type: cli.ht_type.as_deref().map(parse_table_kind).transpose()?,
        ht_size: cli.ht_size,
        ht_fill: cli.ht_fill,
        num_threads: cli.num_threads,
        insert_factor: cli.insert_factor,
        skew: cli.skew,
        seed: cli.seed,
        hasher: cli.hasher.as_deref().map(parse_hasher).transpose()?,
        probe: cli.probe.as_deref().map(parse_probe).transpose()?,
        no_prefetch: cli.no_prefetch.then_some(true),
        collect_latency: cli.collect_latency.then_some(true),
        ht_file: cli.ht_file.clone(),
    })
}

/// Per-thread key stream selected by the config.
fn reader_for(config: &BenchConfig, thread_id: u32, base: u64, share: u64) -> Box<dyn InputReader<u64> + Send> {
    if config.skew > 0.0 {
        Box::new(ZipfianReader::new(
            config.num_keys().max(1),
            config.skew,
            config.seed + u64::from(thread_id),
            share,
        ))
    } else {
        Box::new(CounterReader::with_count(base, share))
    }
}

/// Drive one table handle through insert and find phases.
fn run_worker<H: HashTable>(
    ht: &mut H,
    config: &BenchConfig,
    thread_id: u32,
    base: u64,
    share: u64,
) -> ThreadStats {
    let mut key = 0u64;

    let insert_start = Instant::now();
    let mut inserted = 0u64;
    for _ in 0..config.insert_factor {
        let mut reader = reader_for(config, thread_id, base, share);
        if config.no_prefetch {
            while reader.next(&mut key) {
                ht.insert_noprefetch(&InsertFindArgument {
                    key,
                    value: 1,
                    id: 0,
                    part_id: thread_id,
                });
                inserted += 1;
            }
        } else {
            let mut runner = HTBatchRunner::<_>::new(ht);
            while reader.next(&mut key) {
                runner.insert(key, 1);
                inserted += 1;
            }
            runner.flush();
        }
    }
    let insertions = OpTimings::new(insert_start.elapsed(), inserted);

    let find_start = Instant::now();
    let mut looked_up = 0u64;
    let mut found = 0u64;
    let mut reader = reader_for(config, thread_id, base, share);
    if config.no_prefetch {
        while reader.next(&mut key) {
            looked_up += 1;
            found += u64::from(ht.find_noprefetch(key).is_some());
        }
    } else {
        let mut hits = 0u64;
        let mut runner = HTBatchRunner::<_>::with_callback(
            ht,
            Some(Box::new(|_result: &kmerhash::FindResult| hits += 1)),
        );
        while reader.next(&mut key) {
            runner.find(key, looked_up as u32);
            looked_up += 1;
        }
        runner.flush();
        drop(runner);
        found = hits;
    }
    let finds = OpTimings::new(find_start.elapsed(), looked_up);

    if found < looked_up {
        info!(thread_id, found, looked_up, "some lookups missed");
    }

    ThreadStats {
        thread_id,
        insertions,
        finds,
        ht_fill: 0,
        ht_capacity: 0,
        max_count: 0,
        probe: ht.probe_stats(),
    }
}

fn run_shared(config: &BenchConfig) -> Result<Vec<ThreadStats>> {
    let shared = CasTableShared::<AggrKv>::new(config.ht_size);
    let sink = Arc::new(StatsSink::new());
    let share = config.num_keys() / u64::from(config.num_threads);

    std::thread::scope(|scope| {
        for thread_id in 0..config.num_threads {
            let shared = Arc::clone(&shared);
            let sink = Arc::clone(&sink);
            scope.spawn(move || {
                let mut ht = CasHashTable::from_shared(shared, config.hasher, config.probe);
                ht.set_latency_sampling(config.collect_latency);
                let base = 1 + u64::from(thread_id) * share;
                let stats = run_worker(&mut ht, config, thread_id, base, share);
                report_latency(thread_id, &ht.take_latency_samples());
                sink.push(stats);
            });
        }
    });

    let facade = CasHashTable::from_shared(Arc::clone(&shared), config.hasher, config.probe);
    finish_table(&facade, config)?;
    Ok(sink.drain())
}

fn run_tiered(config: &BenchConfig) -> Result<Vec<ThreadStats>> {
    let shared = TieredTableShared::<AggrKv>::new(config.ht_size);
    let sink = Arc::new(StatsSink::new());
    let share = config.num_keys() / u64::from(config.num_threads);

    std::thread::scope(|scope| {
        for thread_id in 0..config.num_threads {
            let shared = Arc::clone(&shared);
            let sink = Arc::clone(&sink);
            scope.spawn(move || {
                let mut ht = TieredHashTable::from_shared(shared, config.hasher, config.probe);
                let base = 1 + u64::from(thread_id) * share;
                sink.push(run_worker(&mut ht, config, thread_id, base, share));
            });
        }
    });

    let facade = TieredHashTable::from_shared(Arc::clone(&shared), config.hasher, config.probe);
    info!(lvl1_fill = facade.get_lvl1_fill(), "overflow level usage");
    finish_table(&facade, config)?;
    Ok(sink.drain())
}

fn run_partitioned(config: &BenchConfig) -> Result<Vec<ThreadStats>> {
    let store = PartitionedHashStore::<AggrKv>::new(
        config.ht_size,
        config.num_threads,
        config.hasher,
        config.probe,
    );
    let share = config.num_keys() / u64::from(config.num_threads);
    let sink = Arc::new(StatsSink::new());

    // Zipfian keys hash to arbitrary partitions, so a router thread shards
    // the stream over per-owner channels. Uniform mode feeds disjoint
    // ranges directly.
    let routed = config.skew > 0.0;
    let parts = store.into_partitions();

    let collected: Vec<_> = std::thread::scope(|scope| {
        let mut senders = Vec::new();
        let mut handles = Vec::new();
        for mut part in parts {
            let thread_id = part.part_id();
            let sink = Arc::clone(&sink);
            if routed {
                let (tx, rx) = bounded::<u64>(1 << 12);
                senders.push(tx);
                handles.push(scope.spawn(move || {
                    let insert_start = Instant::now();
                    let mut runner = HTBatchRunner::<_>::new(&mut part);
                    let mut inserted = 0u64;
                    for key in rx.iter() {
                        runner.insert(key, 1);
                        inserted += 1;
                    }
                    runner.flush();
                    drop(runner);
                    sink.push(ThreadStats {
                        thread_id,
                        insertions: OpTimings::new(insert_start.elapsed(), inserted),
                        probe: part.probe_stats(),
                        ..Default::default()
                    });
                    part
                }));
            } else {
                handles.push(scope.spawn(move || {
                    let base = 1 + u64::from(thread_id) * share;
                    let stats = run_worker(&mut part, config, thread_id, base, share);
                    sink.push(stats);
                    part
                }));
            }
        }

        if routed {
            let num_parts = senders.len() as u64;
            let mut reader = ZipfianReader::new(
                config.num_keys().max(1),
                config.skew,
                config.seed,
                config.num_keys() * config.insert_factor,
            );
            let mut key = 0u64;
            while reader.next(&mut key) {
                let owner = (key % num_parts) as usize;
                if senders[owner].send(key).is_err() {
                    break;
                }
            }
            drop(senders);
        }

        handles
            .into_iter()
            .map(|h| h.join().expect("worker panicked"))
            .collect()
    });

    let store = PartitionedHashStore::from_partitions(collected);
    info!(
        fill = store.get_fill(),
        capacity = store.get_capacity(),
        max_count = store.get_max_count(),
        "partitioned store totals"
    );
    if let Some(path) = &config.ht_file {
        store
            .print_to_file(path)
            .with_context(|| format!("writing {}", path.display()))?;
    }
    Ok(sink.drain())
}

fn finish_table<H: HashTable>(ht: &H, config: &BenchConfig) -> Result<()> {
    info!(
        fill = ht.get_fill(),
        capacity = ht.get_capacity(),
        max_count = ht.get_max_count(),
        "table totals"
    );
    if let Some(path) = &config.ht_file {
        ht.print_to_file(path)
            .with_context(|| format!("writing {}", path.display()))?;
    }
    Ok(())
}

fn report_latency(thread_id: u32, samples: &[Duration]) {
    if samples.is_empty() {
        return;
    }
    let mut sorted = samples.to_vec();
    sorted.sort();
    let pct = |p: usize| sorted[(sorted.len() - 1) * p / 100];
    info!(
        thread_id,
        samples = sorted.len(),
        p50_ns = pct(50).as_nanos() as u64,
        p99_ns = pct(99).as_nanos() as u64,
        "pipeline request latency"
    );
}

fn report(config: &BenchConfig, all: &[ThreadStats]) {
    let mut insertions = OpTimings::default();
    let mut finds = OpTimings::default();
    let mut probe = kmerhash::ProbeStats::default();
    for stats in all {
        insertions.merge(&stats.insertions);
        finds.merge(&stats.finds);
        probe.merge(&stats.probe);
    }
    // Phases overlap across threads, so rates use the longest thread.
    let insert_wall = all
        .iter()
        .map(|s| s.insertions.duration)
        .max()
        .unwrap_or_default();
    let find_wall = all.iter().map(|s| s.finds.duration).max().unwrap_or_default();

    println!("workload: {} threads, {} topology, {} keys, skew {}",
        config.num_threads, config.ht_type, config.num_keys(), config.skew);
    println!(
        "set:  {} ops in {:?} ({:.2} Mops/s)",
        insertions.op_count,
        insert_wall,
        insertions.op_count as f64 / insert_wall.as_secs_f64().max(1e-9) / 1e6
    );
    println!(
        "get:  {} ops in {:?} ({:.2} Mops/s)",
        finds.op_count,
        find_wall,
        finds.op_count as f64 / find_wall.as_secs_f64().max(1e-9) / 1e6
    );
    println!(
        "probe: {} hard reprobes, {} soft reprobes, {} key compares, max distance {}",
        probe.num_reprobes,
        probe.num_soft_reprobes,
        probe.num_memcmps,
        probe.max_distance_from_bucket
    );
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let overrides = overrides_from(&cli)?;
    let config = BenchConfig::load(cli.config.as_deref(), overrides).context("loading config")?;
    if config.num_threads == 0 {
        bail!("num_threads must be at least 1");
    }
    info!(?config, "starting benchmark");

    let stats = match config.ht_type {
        TableKind::Shared => run_shared(&config)?,
        TableKind::Partitioned => run_partitioned(&config)?,
        TableKind::Tiered => run_tiered(&config)?,
    };
    report(&config, &stats);
    Ok(())
}
