use std::ffi::OsStr;
use std::process::{Command, Stdio};

use log::{debug, info, warn};

use crate::collectors::collector::Collector;
use crate::collectors::volatile::models::{VolatileCommand, VolatileSummary};
use crate::utils::tools::resolve_tool_in;

/// Runs introspection commands and records their output as artifacts.
pub struct VolatileDataCollector<'a> {
    collector: &'a Collector,
    search_path: Option<&'a OsStr>,
}

impl<'a> VolatileDataCollector<'a> {
    pub fn new(collector: &'a Collector, search_path: Option<&'a OsStr>) -> Self {
        Self { collector, search_path }
    }

    /// Capture every group in `commands`, skipping groups with no available program.
    pub fn collect_all(&self, commands: &[&[VolatileCommand]]) -> VolatileSummary {
        let mut summary = VolatileSummary::default();

        for group in commands {
            if self.collector.is_cancelled() {
                break;
            }
            match self.capture_group(group) {
                Some(artifact) => summary.captured.push(artifact.to_string()),
                None => {
                    let programs: Vec<&str> = group.iter().map(|c| c.program).collect();
                    warn!("No program available for {}; skipping", programs.join(" / "));
                    summary.skipped.extend(programs.into_iter().map(String::from));
                }
            }
        }

        info!(
            "Volatile state: {} captured, {} skipped",
            summary.captured.len(),
            summary.skipped.len()
        );
        summary
    }

    fn capture_group(&self, group: &[VolatileCommand]) -> Option<&'static str> {
        for command in group {
            let program = match resolve_tool_in(command.program, self.search_path) {
                Some(program) => program,
                None => {
                    debug!("{} not found", command.program);
                    continue;
                }
            };

            let output = match Command::new(&program)
                .args(command.args)
                .stdin(Stdio::null())
                .output()
            {
                Ok(output) => output,
                Err(e) => {
                    warn!("Failed to run {}: {}", program.display(), e);
                    continue;
                }
            };

            // partial output is still evidence
            if !output.status.success() {
                debug!(
                    "{} exited with {}: {}",
                    command.program,
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                );
            }

            let dest = self.collector.artefacts_dir().join(command.artifact);
            match self.collector.capture(&dest, &output.stdout) {
                Ok(_) => return Some(command.artifact),
                Err(e) => {
                    warn!("{}", e);
                    return None;
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{read_meta, Ledger};
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;
    use tempfile::TempDir;
    use tokio_util::sync::CancellationToken;

    fn fake_tool(dir: &Path, name: &str, script: &str) {
        let path = dir.join(name);
        fs::write(&path, format!("#!/bin/sh\n{}\n", script)).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    }

    const COMMANDS: &[&[VolatileCommand]] = &[
        &[VolatileCommand::new("host.info", "fake-uname", &["-a"])],
        &[
            VolatileCommand::new("ss.info", "fake-ss", &[]),
            VolatileCommand::new("netstat.info", "fake-netstat", &[]),
        ],
        &[VolatileCommand::new("lsmod.info", "fake-lsmod", &[])],
    ];

    #[test]
    fn test_fallback_and_skip() {
        let bin = TempDir::new().unwrap();
        let acq = TempDir::new().unwrap();
        fake_tool(bin.path(), "fake-uname", "echo \"Linux ws1 $1\"");
        fake_tool(bin.path(), "fake-netstat", "echo 'tcp LISTEN'; exit 3");

        let ledger = Ledger::open(acq.path(), "ws1").unwrap();
        let collector = Collector::new(acq.path(), ledger.handle(), None, CancellationToken::new());
        let search = bin.path().as_os_str().to_os_string();
        let summary = VolatileDataCollector::new(&collector, Some(&search)).collect_all(COMMANDS);
        drop(collector);
        ledger.close().unwrap();

        assert_eq!(summary.captured, vec!["host.info", "netstat.info"]);
        assert_eq!(summary.skipped, vec!["fake-lsmod"]);

        let artefacts = acq.path().join("artefacts");
        assert_eq!(fs::read_to_string(artefacts.join("host.info")).unwrap(), "Linux ws1 -a\n");
        // non-zero exit keeps what was printed
        assert_eq!(fs::read_to_string(artefacts.join("netstat.info")).unwrap(), "tcp LISTEN\n");
        assert!(!artefacts.join("ss.info").exists());

        let meta = read_meta(&acq.path().join("log.meta")).unwrap();
        assert_eq!(meta.len(), 2);
    }

    #[test]
    fn test_nothing_available() {
        let acq = TempDir::new().unwrap();
        let ledger = Ledger::open(acq.path(), "ws1").unwrap();
        let collector = Collector::new(acq.path(), ledger.handle(), None, CancellationToken::new());
        let summary = VolatileDataCollector::new(&collector, None).collect_all(COMMANDS);
        assert!(summary.captured.is_empty());
        assert_eq!(summary.skipped.len(), 4);
    }
}
