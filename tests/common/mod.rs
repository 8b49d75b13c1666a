//! Shared helpers for the integration tests: tracing setup and quiescent
//! tree checks.
//!
//! # Usage
//!
//! ```rust,ignore
//! mod common;
//!
//! #[test]
//! fn my_test() {
//!     common::init_tracing();
//!     let tree = optavl::AvlTree::<u64>::new();
//!     // ... concurrent work ...
//!     common::assert_quiescent(&tree, expected_len);
//! }
//! ```
//!
//! # Configuration
//!
//! Environment variables:
//! - `RUST_LOG`: Filter directives (e.g., `optavl=debug,optavl::tree::rebalance=trace`)
//! - `OPTAVL_LOG_DIR`: Log directory (default: `logs/`)
//! - `OPTAVL_LOG_CONSOLE`: Set to "0" to disable console output
//!
//! Library events are only emitted when built with `--features tracing`.
//!
//! # Log Files
//!
//! Logs are appended to `logs/optavl.jsonl` as newline-delimited JSON:
//!
//! ```bash
//! # Every rotation, with its shape
//! cat logs/optavl.jsonl | jq 'select(.fields.message == "rotation")'
//!
//! # Unlinks that happened during rebalancing
//! cat logs/optavl.jsonl | jq 'select(.fields.message == "unlinked node")'
//! ```

#![allow(dead_code)]

use std::env;
use std::fs::{self, OpenOptions};
use std::path::PathBuf;
use std::sync::{Mutex, Once};

use optavl::{AvlTree, NodeAllocator};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

static INIT: Once = Once::new();

/// Install the console and NDJSON file subscribers once per test binary.
pub fn init_tracing() {
    INIT.call_once(install_subscriber);
}

/// `RUST_LOG` if set, else `info`. Each layer needs its own filter.
fn filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

#[expect(clippy::expect_used)]
fn install_subscriber() {
    let dir: PathBuf =
        env::var_os("OPTAVL_LOG_DIR").map_or_else(|| PathBuf::from("logs"), PathBuf::from);
    let console: bool = env::var("OPTAVL_LOG_CONSOLE").map_or(true, |v| v != "0");

    fs::create_dir_all(&dir).expect("create log directory");

    // Appended, since nextest gives every test its own process.
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join("optavl.jsonl"))
        .expect("open log file");

    let console_layer = console.then(|| {
        tracing_subscriber::fmt::layer()
            .with_thread_names(true)
            .with_span_events(FmtSpan::CLOSE)
            .compact()
            .with_filter(filter())
    });

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(Mutex::new(file))
        .with_thread_ids(true)
        .with_line_number(true)
        .json()
        .with_filter(filter());

    let _ = Registry::default()
        .with(console_layer)
        .with(file_layer)
        .try_init();
}

// ============================================================================
//  Tree checks
// ============================================================================

/// Check a tree after every writer has joined.
///
/// Order and balance must hold, the walked size and the O(1) counter must
/// both equal `expected_len`, and no value-less node may be left unlinkable.
pub fn assert_quiescent<K, A>(tree: &AvlTree<K, A>, expected_len: usize)
where
    K: Ord + Copy + Default + Send + Sync,
    A: NodeAllocator<K>,
{
    let report = tree.validate();

    assert!(report.is_valid(), "{report}");
    assert_eq!(tree.size(), expected_len, "walked size\n{report}");
    assert_eq!(tree.len(), expected_len, "entry counter\n{report}");
    assert_eq!(report.value_nodes, expected_len, "{report}");

    tracing::info!(
        total_nodes = report.total_nodes,
        routing_nodes = report.routing_nodes,
        height = report.height,
        "quiescent tree ok"
    );
}

/// Deterministic per-thread key stream (xorshift64*).
#[derive(Debug, Clone)]
pub struct KeyStream(u64);

impl KeyStream {
    pub fn new(seed: u64) -> Self {
        Self(seed.wrapping_mul(0x9e37_79b9_7f4a_7c15) | 1)
    }

    pub fn next_below(&mut self, bound: u64) -> u64 {
        self.0 ^= self.0 >> 12;
        self.0 ^= self.0 << 25;
        self.0 ^= self.0 >> 27;
        self.0.wrapping_mul(0x2545_f491_4f6c_dd1d) % bound
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_tracing_twice() {
        init_tracing();
        init_tracing();
        tracing::debug!(key = 7u64, "subscriber installed");
    }

    #[test]
    fn test_key_stream_stays_in_bound() {
        let mut keys = KeyStream::new(3);
        assert!((0..1000).all(|_| keys.next_below(17) < 17));
    }
}
