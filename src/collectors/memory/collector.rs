use std::ffi::OsStr;
use std::fs;
use std::process::{Command, Stdio};

use log::{info, warn};

use crate::collectors::collector::Collector;
use crate::collectors::memory::models::MemoryOutcome;
use crate::utils::tools::resolve_tool_in;

/// Invokes a physical memory imaging tool (AVML by default).
pub struct MemoryCollector<'a> {
    collector: &'a Collector,
    tool: &'a str,
    search_path: Option<&'a OsStr>,
}

impl<'a> MemoryCollector<'a> {
    pub fn new(collector: &'a Collector, tool: &'a str, search_path: Option<&'a OsStr>) -> Self {
        Self { collector, tool, search_path }
    }

    /// Write `artefacts/memory/<hostname>.mem` and record it.
    ///
    /// Never fails the acquisition: an absent tool or a failed dump is
    /// reported in the returned outcome and logged as a warning.
    pub fn collect(&self, hostname: &str) -> MemoryOutcome {
        let program = match resolve_tool_in(self.tool, self.search_path) {
            Some(program) => program,
            None => {
                warn!("Memory tool {} not available; continuing without a memory image", self.tool);
                return MemoryOutcome::ToolUnavailable(self.tool.to_string());
            }
        };

        let memory_dir = self.collector.artefacts_dir().join("memory");
        if let Err(e) = fs::create_dir_all(&memory_dir) {
            warn!("Cannot create {}: {}", memory_dir.display(), e);
            return MemoryOutcome::Failed(e.to_string());
        }
        let image = memory_dir.join(format!("{}.mem", hostname));

        info!("Acquiring memory with {} into {}", program.display(), image.display());
        let status = Command::new(&program)
            .arg(&image)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .status();

        match status {
            Ok(status) if status.success() => {}
            Ok(status) => {
                warn!("{} exited with {}", program.display(), status);
                let _ = fs::remove_file(&image);
                return MemoryOutcome::Failed(format!("exit status {}", status));
            }
            Err(e) => {
                warn!("Failed to run {}: {}", program.display(), e);
                return MemoryOutcome::Failed(e.to_string());
            }
        }

        match self.collector.adopt(&image) {
            Ok(artifact) => MemoryOutcome::Captured(artifact),
            Err(e) => {
                warn!("{}", e);
                MemoryOutcome::Failed(e.to_string())
            }
        }
    }
}
