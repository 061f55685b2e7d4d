//! Test helpers shared by unit and integration tests
//!
//! - **TestContext**: temporary directory removed on drop
//! - **Logs**: memory and disk logs with small segments
//! - **Tracing**: opt-in log output via `RUST_LOG`

pub mod context;

pub use context::TestContext;

use crate::storage::{LogConfig, SegmentedLog};
use std::sync::Arc;

/// Install a tracing subscriber once, honouring `RUST_LOG`
///
/// Safe to call from every test; later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Open an in-memory log with `entries_per_segment` entries per segment
pub fn memory_log(name: &str, entries_per_segment: u32) -> Arc<SegmentedLog> {
    SegmentedLog::open(LogConfig::memory(name).with_max_entries_per_segment(entries_per_segment))
        .expect("Failed to open memory log")
}

/// Open a disk log inside the context's directory
pub fn disk_log(ctx: &TestContext, name: &str, entries_per_segment: u32) -> Arc<SegmentedLog> {
    SegmentedLog::open(
        LogConfig::new(name, ctx.path()).with_max_entries_per_segment(entries_per_segment),
    )
    .expect("Failed to open disk log")
}
