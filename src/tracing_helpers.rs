//! Logging macros that vanish without the `tracing` feature.
//!
//! | macro | level | emitted for |
//! |---|---|---|
//! | `trace_log!` | trace | read/update restarts from the holder, rotations (with `shape`) |
//! | `debug_log!` | debug | unlinks, descents deeper than the path stack |
//!
//! ```bash
//! # Every rotation while a stress test runs
//! RUST_LOG=optavl::tree::rebalance=trace cargo test --features tracing --test stress_tests
//! ```
//!
//! The rebalancing entry point also opens a span through
//! `#[cfg_attr(feature = "tracing", tracing::instrument(...))]`.

#![allow(unused_imports)]

#[cfg(feature = "tracing")]
macro_rules! trace_log {
    ($($arg:tt)*) => {
        tracing::trace!($($arg)*)
    };
}

/// Without the feature the arguments are not even type-checked.
#[cfg(not(feature = "tracing"))]
macro_rules! trace_log {
    ($($arg:tt)*) => {};
}

#[cfg(feature = "tracing")]
macro_rules! debug_log {
    ($($arg:tt)*) => {
        tracing::debug!($($arg)*)
    };
}

#[cfg(not(feature = "tracing"))]
macro_rules! debug_log {
    ($($arg:tt)*) => {};
}

pub(crate) use debug_log;
pub(crate) use trace_log;
