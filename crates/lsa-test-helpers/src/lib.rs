//! Test helpers for lsa-core
//!
//! Builds graphs from named adjacency lists and provides shorthand for the
//! instructions the heap analyses look at.

pub mod graph;

pub use graph::{is_valid_subgraph, AdjacencyListGraph};

/// Install a `tracing` subscriber that writes through the test harness.
///
/// Filtering follows `RUST_LOG`. Safe to call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
