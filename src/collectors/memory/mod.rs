//! Physical memory acquisition.
//!
//! Best effort: the configured helper (AVML unless overridden) writes one raw
//! image which is then hashed and recorded like any other artifact.

pub mod collector;
pub mod models;

use std::env;

pub use collector::MemoryCollector;
pub use models::MemoryOutcome;

use crate::collectors::collector::Collector;

/// Acquire memory with `tool`, resolved against the process `PATH`.
pub fn collect_memory(collector: &Collector, tool: &str, hostname: &str) -> MemoryOutcome {
    let search_path = env::var_os("PATH");
    MemoryCollector::new(collector, tool, search_path.as_deref()).collect(hostname)
}
