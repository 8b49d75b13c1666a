//! Mixed-workload driver for `AvlTree`.
//!
//! Warms a tree with random keys, runs a get/insert/remove mix on several
//! threads, then checks the result at quiescence: the tree must validate, and
//! the walked size must equal the warmup count plus every thread's net
//! successful inserts.
//!
//! Run with:
//! ```bash
//! OPTAVL_THREADS=8 OPTAVL_UPDATE_PCT=50 cargo run --release
//! RUST_LOG=optavl=debug cargo run --features tracing
//! ```
//!
//! Configuration (environment, read once):
//! - `OPTAVL_THREADS`: worker threads (default: available parallelism)
//! - `OPTAVL_KEY_RANGE`: keys are drawn from `0..range` (default 65536)
//! - `OPTAVL_OPS`: operations per thread (default 1,000,000)
//! - `OPTAVL_UPDATE_PCT`: share of inserts + removes, 0-100 (default 20)
//! - `OPTAVL_SEED`: base RNG seed (default 0x5eed)

#![allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]

use std::env;
use std::process::ExitCode;
use std::sync::{Arc, OnceLock};
use std::thread;
use std::time::{Duration, Instant};

use optavl::{AvlTree, ValidationReport, get_debug_counters, reset_debug_counters};
use rand::SeedableRng;
use rand::distributions::{Distribution, Uniform, WeightedIndex};
use rand::rngs::StdRng;
use seize::Guard;

#[cfg(feature = "mimalloc")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// Operations between guard refreshes, so retired nodes can be freed while
/// workers are still running.
const GUARD_REFRESH_OPS: usize = 4096;

// =============================================================================
// Configuration
// =============================================================================

#[derive(Debug, Clone, Copy)]
struct WorkloadConfig {
    threads: usize,
    key_range: u64,
    ops_per_thread: usize,
    update_pct: u32,
    seed: u64,
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

impl WorkloadConfig {
    fn get() -> &'static Self {
        static CONFIG: OnceLock<WorkloadConfig> = OnceLock::new();
        CONFIG.get_or_init(|| {
            let parallelism = thread::available_parallelism().map_or(4, std::num::NonZero::get);

            Self {
                threads: env_or("OPTAVL_THREADS", parallelism).max(1),
                key_range: env_or("OPTAVL_KEY_RANGE", 65_536u64).max(1),
                ops_per_thread: env_or("OPTAVL_OPS", 1_000_000usize),
                update_pct: env_or("OPTAVL_UPDATE_PCT", 20u32).min(100),
                seed: env_or("OPTAVL_SEED", 0x5eed_u64),
            }
        })
    }
}

// =============================================================================
// Tracing
// =============================================================================

#[cfg(feature = "tracing")]
fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("optavl=info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_ids(true)
        .compact()
        .try_init();
}

#[cfg(not(feature = "tracing"))]
const fn init_tracing() {}

// =============================================================================
// Workload
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Get,
    Insert,
    Remove,
}

impl Op {
    const OPS: [Self; 3] = [Self::Get, Self::Insert, Self::Remove];
}

#[derive(Debug, Default, Clone, Copy)]
struct ThreadStats {
    gets: u64,
    hits: u64,
    inserted: u64,
    removed: u64,
}

/// Insert random keys from `0..key_range` until `count` of them were new.
fn warmup(tree: &AvlTree<u64>, count: u64, key_range: u64, seed: u64) -> u64 {
    let count = count.min(key_range);
    let keys = Uniform::new(0, key_range);
    let rng = &mut StdRng::seed_from_u64(seed);
    let guard = tree.guard();

    let mut inserted: u64 = 0;
    while inserted < count {
        let key = keys.sample(rng);
        // Values are never 0; key + 1 keeps them distinct per key.
        if tree.insert_with_guard(key, key as usize + 1, &guard) {
            inserted += 1;
        }
    }

    inserted
}

fn run_worker(tree: &AvlTree<u64>, config: &WorkloadConfig, thread_id: u64) -> ThreadStats {
    let rng = &mut StdRng::seed_from_u64(config.seed.wrapping_add(thread_id + 1));
    let keys = Uniform::new(0, config.key_range);
    let half_update = config.update_pct / 2;
    let Ok(ops) = WeightedIndex::new([100 - 2 * half_update, half_update, half_update]) else {
        return ThreadStats::default();
    };

    let mut guard = tree.guard();
    let mut stats = ThreadStats::default();

    for op in 1..=config.ops_per_thread {
        if op % GUARD_REFRESH_OPS == 0 {
            guard.refresh();
        }

        let key = keys.sample(rng);

        match Op::OPS[ops.sample(rng)] {
            Op::Get => {
                stats.gets += 1;
                if tree.get_with_guard(&key, &guard).is_some() {
                    stats.hits += 1;
                }
            }
            Op::Insert => {
                if tree.insert_with_guard(key, key as usize + 1, &guard) {
                    stats.inserted += 1;
                }
            }
            Op::Remove => {
                if tree.remove_with_guard(&key, &guard).is_some() {
                    stats.removed += 1;
                }
            }
        }
    }

    stats
}

fn report(
    elapsed: Duration,
    total_ops: usize,
    totals: &ThreadStats,
    validation: &ValidationReport,
) {
    let counters = get_debug_counters();

    println!("Workload:");
    println!("=======================");
    println!(
        "  {total_ops} ops in {elapsed:?} ({:.0} ops/sec)",
        total_ops as f64 / elapsed.as_secs_f64()
    );
    println!("  gets: {} ({} hits)", totals.gets, totals.hits);
    println!("  inserted: {}  removed: {}", totals.inserted, totals.removed);
    println!(
        "  retries (read/update): {}/{}",
        counters.read_retries, counters.update_retries
    );
    println!(
        "  rotations: {}  unlinks: {} ({} deferred)  freed: {}",
        counters.rotations, counters.unlinks, counters.deferred_unlinks, counters.freed
    );
    println!();
    println!("{validation}");
}

fn main() -> ExitCode {
    init_tracing();

    let config: &'static WorkloadConfig = WorkloadConfig::get();
    println!("{config:?}");

    let tree: Arc<AvlTree<u64>> = Arc::new(AvlTree::new());
    let warm = warmup(&tree, config.key_range / 2, config.key_range, config.seed);
    println!("warmed up with {warm} keys");

    reset_debug_counters();
    let start = Instant::now();

    let handles: Vec<_> = (0..config.threads as u64)
        .map(|t| {
            let tree = Arc::clone(&tree);
            thread::spawn(move || run_worker(&tree, config, t))
        })
        .collect();

    let mut totals = ThreadStats::default();
    for handle in handles {
        let Ok(stats) = handle.join() else {
            eprintln!("worker thread panicked");
            return ExitCode::FAILURE;
        };
        totals.gets += stats.gets;
        totals.hits += stats.hits;
        totals.inserted += stats.inserted;
        totals.removed += stats.removed;
    }

    let elapsed = start.elapsed();
    let validation = tree.validate();
    report(elapsed, config.threads * config.ops_per_thread, &totals, &validation);

    let expected = warm + totals.inserted - totals.removed;
    let size = tree.size() as u64;
    if size != expected {
        eprintln!("size mismatch: walked {size}, expected {expected}");
        return ExitCode::FAILURE;
    }

    match validation.into_result() {
        Ok(_) => ExitCode::SUCCESS,
        Err(violation) => {
            eprintln!("invalid tree: {violation}");
            ExitCode::FAILURE
        }
    }
}
