//! Audit and metadata ledgers.
//!
//! Every collection event produces exactly one row in `log.audit` (that the
//! artifact was collected, and when) and one row in `log.meta` (its SHA-256).
//! Both rows are written by a single writer thread from a single event, so
//! the two logs can never disagree about which artifacts exist.
//!
//! Collectors hold a cheap [`LedgerHandle`] and may run on any thread.
//! Timestamps are assigned by the writer on receipt, which keeps the audit
//! log non-decreasing even when several collectors race.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::thread::JoinHandle;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use crossbeam::channel::{unbounded, Receiver, Sender};
use log::{debug, warn};

use crate::constants::{AUDIT_HEADER, AUDIT_LOG, COLLECTED_STATUS, META_HEADER, META_LOG};

/// Audit timestamp format: UTC with microsecond resolution
pub const AUDIT_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";

enum LedgerEvent {
    Collected { artifact: String, sha256: String },
}

/// Counters returned when a ledger is closed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LedgerStats {
    pub entries: usize,
}

/// Sending side used by collectors.
#[derive(Clone)]
pub struct LedgerHandle {
    sender: Sender<LedgerEvent>,
}

impl LedgerHandle {
    /// Append one collection event.
    ///
    /// `artifact` is the destination path relative to the acquisition
    /// directory and must be the file `sha256` was computed over.
    pub fn record(&self, artifact: &str, sha256: &str) -> Result<()> {
        self.sender
            .send(LedgerEvent::Collected {
                artifact: artifact.to_string(),
                sha256: sha256.to_string(),
            })
            .map_err(|_| anyhow!("ledger writer has stopped"))
    }
}

/// Owner of the two ledger files for one host.
pub struct Ledger {
    handle: Option<LedgerHandle>,
    writer: Option<JoinHandle<Result<LedgerStats>>>,
    audit_path: PathBuf,
    meta_path: PathBuf,
}

impl Ledger {
    /// Create `log.audit` and `log.meta` in `acquisition_dir` and start the writer.
    pub fn open(acquisition_dir: &Path, hostname: &str) -> Result<Self> {
        let audit_path = acquisition_dir.join(AUDIT_LOG);
        let meta_path = acquisition_dir.join(META_LOG);

        let mut audit = csv::Writer::from_writer(create_append(&audit_path)?);
        let mut meta = csv::Writer::from_writer(create_append(&meta_path)?);
        audit.write_record(AUDIT_HEADER).context("Failed to write audit header")?;
        meta.write_record(META_HEADER).context("Failed to write metadata header")?;
        audit.flush().context("Failed to flush audit log")?;
        meta.flush().context("Failed to flush metadata log")?;

        let (sender, receiver) = unbounded();
        let hostname = hostname.to_string();

        let writer = std::thread::Builder::new()
            .name("ledger-writer".to_string())
            .spawn(move || write_events(receiver, audit, meta, hostname))
            .context("Failed to start ledger writer")?;

        debug!("Ledgers opened at {} and {}", audit_path.display(), meta_path.display());

        Ok(Self {
            handle: Some(LedgerHandle { sender }),
            writer: Some(writer),
            audit_path,
            meta_path,
        })
    }

    pub fn handle(&self) -> LedgerHandle {
        match &self.handle {
            Some(handle) => handle.clone(),
            // only reachable after close(), which consumes self
            None => unreachable!("ledger handle requested after close"),
        }
    }

    pub fn audit_path(&self) -> &Path {
        &self.audit_path
    }

    pub fn meta_path(&self) -> &Path {
        &self.meta_path
    }

    /// Drain pending events, flush both files and stop the writer.
    ///
    /// Handles still held elsewhere keep the channel open; every clone must
    /// be dropped before this returns.
    pub fn close(mut self) -> Result<LedgerStats> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<LedgerStats> {
        self.handle.take();
        match self.writer.take() {
            Some(writer) => writer
                .join()
                .map_err(|_| anyhow!("ledger writer panicked"))?,
            None => Ok(LedgerStats::default()),
        }
    }
}

impl Drop for Ledger {
    fn drop(&mut self) {
        if self.writer.is_some() {
            if let Err(e) = self.shutdown() {
                warn!("Ledger shutdown failed: {:#}", e);
            }
        }
    }
}

fn create_append(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .context(format!("Failed to open ledger {}", path.display()))
}

fn write_events(
    receiver: Receiver<LedgerEvent>,
    mut audit: csv::Writer<File>,
    mut meta: csv::Writer<File>,
    hostname: String,
) -> Result<LedgerStats> {
    let mut stats = LedgerStats::default();
    let mut last: Option<DateTime<Utc>> = None;

    for event in receiver {
        match event {
            LedgerEvent::Collected { artifact, sha256 } => {
                let now = Utc::now();
                let stamp = match last {
                    Some(prev) if prev > now => prev,
                    _ => now,
                };
                last = Some(stamp);
                let datetime = stamp.format(AUDIT_TIME_FORMAT).to_string();

                audit
                    .write_record([datetime.as_str(), hostname.as_str(), artifact.as_str(), COLLECTED_STATUS])
                    .context("Failed to append audit entry")?;
                meta
                    .write_record([hostname.as_str(), artifact.as_str(), sha256.as_str()])
                    .context("Failed to append metadata entry")?;
                audit.flush().context("Failed to flush audit log")?;
                meta.flush().context("Failed to flush metadata log")?;

                stats.entries += 1;
            }
        }
    }

    audit.flush().context("Failed to flush audit log")?;
    meta.flush().context("Failed to flush metadata log")?;
    Ok(stats)
}

/// One row of `log.audit` as read back by verifiers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditRow {
    pub datetime: String,
    pub hostname: String,
    pub artefact: String,
    pub collected: String,
}

/// One row of `log.meta` as read back by verifiers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetaRow {
    pub hostname: String,
    pub file_path: String,
    pub sha256_hash: String,
}

/// Parse `log.audit`.
pub fn read_audit(path: &Path) -> Result<Vec<AuditRow>> {
    let mut reader = csv::Reader::from_path(path)
        .context(format!("Failed to open {}", path.display()))?;
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.context("Malformed audit row")?;
        rows.push(AuditRow {
            datetime: record.get(0).unwrap_or_default().to_string(),
            hostname: record.get(1).unwrap_or_default().to_string(),
            artefact: record.get(2).unwrap_or_default().to_string(),
            collected: record.get(3).unwrap_or_default().to_string(),
        });
    }
    Ok(rows)
}

/// Parse `log.meta`.
pub fn read_meta(path: &Path) -> Result<Vec<MetaRow>> {
    let mut reader = csv::Reader::from_path(path)
        .context(format!("Failed to open {}", path.display()))?;
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.context("Malformed metadata row")?;
        rows.push(MetaRow {
            hostname: record.get(0).unwrap_or_default().to_string(),
            file_path: record.get(1).unwrap_or_default().to_string(),
            sha256_hash: record.get(2).unwrap_or_default().to_string(),
        });
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_headers_written_on_open() {
        let dir = TempDir::new().unwrap();
        let ledger = Ledger::open(dir.path(), "ws1").unwrap();
        let stats = ledger.close().unwrap();
        assert_eq!(stats.entries, 0);

        let audit = fs::read_to_string(dir.path().join("log.audit")).unwrap();
        let meta = fs::read_to_string(dir.path().join("log.meta")).unwrap();
        assert_eq!(audit, "datetime,hostname,artefact,collected\n");
        assert_eq!(meta, "hostname,file_path,sha256_hash\n");
    }

    #[test]
    fn test_each_record_produces_paired_rows() {
        let dir = TempDir::new().unwrap();
        let ledger = Ledger::open(dir.path(), "ws1").unwrap();
        let handle = ledger.handle();
        handle.record("artefacts/conf/etc+passwd", "aa").unwrap();
        handle.record("artefacts/conf/etc+group", "bb").unwrap();
        drop(handle);
        assert_eq!(ledger.close().unwrap().entries, 2);

        let audit = read_audit(&dir.path().join("log.audit")).unwrap();
        let meta = read_meta(&dir.path().join("log.meta")).unwrap();
        assert_eq!(audit.len(), 2);
        assert_eq!(meta.len(), 2);
        assert!(audit.iter().all(|r| r.hostname == "ws1" && r.collected == "collected"));

        let audit_paths: HashSet<_> = audit.iter().map(|r| r.artefact.clone()).collect();
        let meta_paths: HashSet<_> = meta.iter().map(|r| r.file_path.clone()).collect();
        assert_eq!(audit_paths, meta_paths);
        assert_eq!(meta[0].sha256_hash, "aa");
    }

    #[test]
    fn test_timestamps_have_microseconds_and_do_not_decrease() {
        let dir = TempDir::new().unwrap();
        let ledger = Ledger::open(dir.path(), "ws1").unwrap();

        std::thread::scope(|scope| {
            for t in 0..4 {
                let handle = ledger.handle();
                scope.spawn(move || {
                    for i in 0..50 {
                        handle.record(&format!("artefacts/t{}/{}", t, i), "00").unwrap();
                    }
                });
            }
        });
        assert_eq!(ledger.close().unwrap().entries, 200);

        let audit = read_audit(&dir.path().join("log.audit")).unwrap();
        let stamps: Vec<DateTime<Utc>> = audit
            .iter()
            .map(|r| {
                // 2024-01-01T00:00:00.123456Z
                assert_eq!(r.datetime.len(), 27, "unexpected timestamp {}", r.datetime);
                DateTime::parse_from_rfc3339(&r.datetime).unwrap().with_timezone(&Utc)
            })
            .collect();
        assert!(stamps.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_commas_in_paths_are_quoted() {
        let dir = TempDir::new().unwrap();
        let ledger = Ledger::open(dir.path(), "ws1").unwrap();
        ledger.handle().record("artefacts/user/bob/odd,name", "cc").unwrap();
        ledger.close().unwrap();

        let meta = read_meta(&dir.path().join("log.meta")).unwrap();
        assert_eq!(meta[0].file_path, "artefacts/user/bob/odd,name");
    }

    #[test]
    fn test_drop_flushes_partial_ledger() {
        let dir = TempDir::new().unwrap();
        {
            let ledger = Ledger::open(dir.path(), "ws1").unwrap();
            ledger.handle().record("artefacts/host.info", "dd").unwrap();
        }
        assert_eq!(read_audit(&dir.path().join("log.audit")).unwrap().len(), 1);
        assert_eq!(read_meta(&dir.path().join("log.meta")).unwrap().len(), 1);
    }
}
