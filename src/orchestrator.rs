//! Single-host acquisition pipeline.
//!
//! ```text
//! Init → CollectingVolatile → CollectingMemory? → CollectingArtifacts
//!      → Archiving → Encrypting? → Done
//! ```
//!
//! Failures inside a collection phase are logged and skipped. Only archiving
//! and encryption can fail the host. The working directory is removed only
//! once the package is complete.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context};
use log::{debug, info, warn};
use tokio_util::sync::CancellationToken;

use crate::collectors::catalog;
use crate::collectors::collector::Collector;
use crate::collectors::memory::collect_memory;
use crate::collectors::volatile::collect_volatile_data;
use crate::config::GandalfConfig;
use crate::constants::ARTEFACTS_DIR;
use crate::crypto::{self, CredentialProvider};
use crate::error::GandalfError;
use crate::ledger::Ledger;
use crate::models::{AcquisitionJob, EncryptionMethod};
use crate::utils::access_times::AccessTimes;
use crate::utils::archive::{archive, archive_path};

/// File name of the access-time bodyfile inside `artefacts/`
pub const ACCESS_TIMES_FILE: &str = "access.times";

/// Pipeline stage of a host's acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Init,
    CollectingVolatile,
    CollectingMemory,
    CollectingArtifacts,
    Archiving,
    Encrypting,
    Done,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Phase::Init => "Preparing acquisition",
            Phase::CollectingVolatile => "Collecting volatile state",
            Phase::CollectingMemory => "Acquiring memory",
            Phase::CollectingArtifacts => "Collecting filesystem and user artifacts",
            Phase::Archiving => "Packaging acquisition",
            Phase::Encrypting => "Encrypting package",
            Phase::Done => "Acquisition complete",
        };
        f.write_str(label)
    }
}

/// Outcome of a successful host acquisition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcquisitionReport {
    pub hostname: String,
    /// `<hostname>.tar.gz` or `<hostname>.tar.gz.enc`
    pub package: PathBuf,
    pub key_file: Option<PathBuf>,
    /// Number of ledger entries
    pub artifacts: usize,
    pub elapsed: Duration,
}

/// Local hostname as reported by the OS.
pub fn resolve_hostname() -> Result<String, GandalfError> {
    let name = hostname::get().context("Failed to resolve local hostname")?;
    let name = name.to_string_lossy().trim().to_string();
    if name.is_empty() {
        return Err(GandalfError::Other(anyhow!("local hostname is empty")));
    }
    Ok(name)
}

fn banner(phase: Phase) {
    println!("[*] {}", phase);
    info!("Phase: {:?}", phase);
}

/// Acquire this host into `job.output_dir`.
pub fn run_local(
    job: &AcquisitionJob,
    config: &GandalfConfig,
    credentials: &dyn CredentialProvider,
    cancel: &CancellationToken,
) -> Result<AcquisitionReport, GandalfError> {
    let hostname = resolve_hostname()?;
    run_for_host(&hostname, job, config, credentials, cancel)
}

/// Acquire into `<output_dir>/<hostname>` using `hostname` for every name.
pub fn run_for_host(
    hostname: &str,
    job: &AcquisitionJob,
    config: &GandalfConfig,
    credentials: &dyn CredentialProvider,
    cancel: &CancellationToken,
) -> Result<AcquisitionReport, GandalfError> {
    let start = Instant::now();

    banner(Phase::Init);
    let acquisition_dir = job.output_dir.join(hostname);
    refuse_existing_package(&job.output_dir, hostname)?;
    prepare_working_dir(&acquisition_dir)?;

    let ledger = Ledger::open(&acquisition_dir, hostname)?;
    let access_times = job.flags.access_times.then(|| Arc::new(AccessTimes::new()));
    let collector = Collector::new(&acquisition_dir, ledger.handle(), access_times.clone(), cancel.clone());

    banner(Phase::CollectingVolatile);
    collect_volatile_data(&collector);
    if cancel.is_cancelled() {
        return cancelled(collector, ledger);
    }

    if job.flags.memory_dump {
        banner(Phase::CollectingMemory);
        collect_memory(&collector, &config.memory_tool, hostname);
        if cancel.is_cancelled() {
            return cancelled(collector, ledger);
        }
    }

    banner(Phase::CollectingArtifacts);
    catalog::collect_all(&collector, config);
    if job.flags.collect_files {
        catalog::collect_declared_files(&collector, config);
    }
    if cancel.is_cancelled() {
        return cancelled(collector, ledger);
    }

    if let Some(access_times) = &access_times {
        let dest = collector.artefacts_dir().join(ACCESS_TIMES_FILE);
        match collector.capture(&dest, access_times.render().as_bytes()) {
            Ok(_) => info!("Recorded access times for {} source files", access_times.len()),
            Err(e) => warn!("{}", e),
        }
    }

    drop(collector);
    let stats = ledger.close()?;
    info!("{} artifacts recorded for {}", stats.entries, hostname);

    if cancel.is_cancelled() {
        return Err(GandalfError::Cancelled);
    }

    banner(Phase::Archiving);
    let packaged = archive(&acquisition_dir, &job.output_dir, hostname).map_err(GandalfError::Archive)?;

    let outcome = if job.encryption_method == EncryptionMethod::None {
        crypto::EncryptionOutcome { package: packaged, key_file: None }
    } else {
        banner(Phase::Encrypting);
        crypto::encrypt(&packaged, job.encryption_method, credentials)?
    };

    banner(Phase::Done);
    if let Err(e) = fs::remove_dir_all(&acquisition_dir) {
        warn!("Could not remove working directory {}: {}", acquisition_dir.display(), e);
    }

    let elapsed = start.elapsed();
    println!(
        "[+] {}: {} ({} artifacts, {:.1}s)",
        hostname,
        outcome.package.display(),
        stats.entries,
        elapsed.as_secs_f64()
    );

    Ok(AcquisitionReport {
        hostname: hostname.to_string(),
        package: outcome.package,
        key_file: outcome.key_file,
        artifacts: stats.entries,
        elapsed,
    })
}

/// An earlier package of the same host is evidence in its own right and
/// must not be replaced by this run's archive or container.
fn refuse_existing_package(output_dir: &Path, hostname: &str) -> Result<(), GandalfError> {
    let plain = archive_path(output_dir, hostname);
    for package in [crypto::encrypted_path(&plain), plain] {
        if package.exists() {
            return Err(GandalfError::InvalidArgument(format!(
                "package {} already exists; move it aside first",
                package.display()
            )));
        }
    }
    Ok(())
}

/// A leftover directory from an earlier run may hold the only copy of its
/// evidence, so it is never reused.
fn prepare_working_dir(acquisition_dir: &Path) -> Result<(), GandalfError> {
    if acquisition_dir.exists() {
        return Err(GandalfError::InvalidArgument(format!(
            "acquisition directory {} already exists; move it aside first",
            acquisition_dir.display()
        )));
    }
    fs::create_dir_all(acquisition_dir.join(ARTEFACTS_DIR))
        .context(format!("Failed to create {}", acquisition_dir.display()))?;
    debug!("Working directory {}", acquisition_dir.display());
    Ok(())
}

fn cancelled(collector: Collector, ledger: Ledger) -> Result<AcquisitionReport, GandalfError> {
    drop(collector);
    match ledger.close() {
        Ok(stats) => warn!("Cancelled after {} artifacts; partial ledgers kept", stats.entries),
        Err(e) => warn!("Cancelled; ledger flush failed: {:#}", e),
    }
    Err(GandalfError::Cancelled)
}
