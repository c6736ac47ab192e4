//! Volatile data collection module
//!
//! Captures state that disappears with the running system: platform
//! identity, processes, sockets, kernel modules and the environment. Each
//! capture is the stdout of a standard introspection command, stored as a
//! single artifact under `artefacts/`. A missing command is skipped.

mod collector;
pub mod models;

use std::env;

pub use collector::VolatileDataCollector;
pub use models::{VolatileCommand, VolatileSummary, VOLATILE_COMMANDS};

use crate::collectors::collector::Collector;

/// Capture the standard volatile set using the process `PATH`.
pub fn collect_volatile_data(collector: &Collector) -> VolatileSummary {
    let search_path = env::var_os("PATH");
    VolatileDataCollector::new(collector, search_path.as_deref()).collect_all(VOLATILE_COMMANDS)
}
