use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use filetime::FileTime;
use log::{debug, warn};
use tokio_util::sync::CancellationToken;

use crate::constants::ARTEFACTS_DIR;
use crate::error::CollectError;
use crate::ledger::LedgerHandle;
use crate::models::CollectedArtifact;
use crate::utils::access_times::AccessTimes;
use crate::utils::hash::calculate_sha256;

/// The universal copy-hash-record primitive for one host.
///
/// Cloning is cheap; every artifact category gets its own clone and they all
/// feed the same ledger.
#[derive(Clone)]
pub struct Collector {
    acquisition_dir: PathBuf,
    ledger: LedgerHandle,
    access_times: Option<Arc<AccessTimes>>,
    cancel: CancellationToken,
}

impl Collector {
    pub fn new(
        acquisition_dir: impl Into<PathBuf>,
        ledger: LedgerHandle,
        access_times: Option<Arc<AccessTimes>>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            acquisition_dir: acquisition_dir.into(),
            ledger,
            access_times,
            cancel,
        }
    }

    /// `<acquisition_dir>/artefacts`
    pub fn artefacts_dir(&self) -> PathBuf {
        self.acquisition_dir.join(ARTEFACTS_DIR)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Copy `source` to `destination`, hash the copy and record it.
    ///
    /// A missing source (including a dangling symlink) yields
    /// [`CollectError::NotFound`] and leaves both ledgers untouched.
    pub fn collect(&self, source: &Path, destination: &Path) -> Result<CollectedArtifact, CollectError> {
        if self.is_cancelled() {
            return Err(CollectError::Cancelled);
        }

        // fs::metadata follows symlinks, so a dangling link reports NotFound
        let metadata = fs::metadata(source).map_err(|e| CollectError::io(source, e))?;
        if !metadata.is_file() {
            return Err(CollectError::io(
                source,
                io::Error::new(io::ErrorKind::InvalidInput, "not a regular file"),
            ));
        }

        ensure_parent(destination)?;
        fs::copy(source, destination).map_err(|e| CollectError::io(source, e))?;

        let sha256 = match calculate_sha256(destination) {
            Ok(hash) => hash,
            Err(e) => {
                discard(destination);
                return Err(CollectError::io(destination, e));
            }
        };

        // after hashing, so reading the copy back does not move its atime
        let atime = FileTime::from_last_access_time(&metadata);
        let mtime = FileTime::from_last_modification_time(&metadata);
        if let Err(e) = filetime::set_file_times(destination, atime, mtime) {
            warn!("Could not preserve timestamps on {}: {}", destination.display(), e);
        }

        let artifact = self.record(source, destination, sha256)?;
        // taken before the copy, listed only once the source is in the ledgers
        if let Some(access_times) = &self.access_times {
            access_times.snapshot(source, &metadata);
        }
        Ok(artifact)
    }

    /// Write generated bytes (command output, reports) as an artifact.
    pub fn capture(&self, destination: &Path, contents: &[u8]) -> Result<CollectedArtifact, CollectError> {
        if self.is_cancelled() {
            return Err(CollectError::Cancelled);
        }

        ensure_parent(destination)?;
        fs::write(destination, contents).map_err(|e| CollectError::io(destination, e))?;
        self.adopt(destination)
    }

    /// Hash and record a file something else already wrote in place, such as
    /// a memory image produced by an external tool.
    pub fn adopt(&self, destination: &Path) -> Result<CollectedArtifact, CollectError> {
        let sha256 = calculate_sha256(destination).map_err(|e| CollectError::io(destination, e))?;
        self.record(destination, destination, sha256)
    }

    /// Destination path as stored in both ledgers.
    pub fn ledger_path(&self, destination: &Path) -> String {
        destination
            .strip_prefix(&self.acquisition_dir)
            .unwrap_or(destination)
            .to_string_lossy()
            .into_owned()
    }

    fn record(&self, source: &Path, destination: &Path, sha256: String) -> Result<CollectedArtifact, CollectError> {
        let artifact = self.ledger_path(destination);
        if let Err(e) = self.ledger.record(&artifact, &sha256) {
            // an unrecorded copy must not end up in the package
            discard(destination);
            return Err(CollectError::Ledger { path: artifact, reason: e.to_string() });
        }

        debug!("Collected {} -> {} ({})", source.display(), artifact, sha256);

        Ok(CollectedArtifact {
            source_path: source.to_path_buf(),
            destination_path: destination.to_path_buf(),
            sha256,
            collected: true,
        })
    }
}

fn ensure_parent(destination: &Path) -> Result<(), CollectError> {
    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent).map_err(|e| CollectError::io(parent, e))?;
    }
    Ok(())
}

fn discard(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        debug!("Could not remove {}: {}", path.display(), e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{read_audit, read_meta, Ledger};
    use crate::utils::hash::sha256_hex;
    use tempfile::TempDir;

    fn setup() -> (TempDir, TempDir, Ledger) {
        let src = TempDir::new().unwrap();
        let acq = TempDir::new().unwrap();
        let ledger = Ledger::open(acq.path(), "ws1").unwrap();
        (src, acq, ledger)
    }

    #[test]
    fn test_collect_copies_hashes_and_records() {
        let (src, acq, ledger) = setup();
        let source = src.path().join("passwd");
        fs::write(&source, b"root:x:0:0::/root:/bin/sh\n").unwrap();

        let collector = Collector::new(acq.path(), ledger.handle(), None, CancellationToken::new());
        let dest = collector.artefacts_dir().join("conf/etc+passwd");
        let artifact = collector.collect(&source, &dest).unwrap();
        drop(collector);
        ledger.close().unwrap();

        assert!(artifact.collected);
        assert_eq!(fs::read(&dest).unwrap(), fs::read(&source).unwrap());
        assert_eq!(artifact.sha256, sha256_hex(b"root:x:0:0::/root:/bin/sh\n"));

        let meta = read_meta(&acq.path().join("log.meta")).unwrap();
        assert_eq!(meta.len(), 1);
        assert_eq!(meta[0].file_path, "artefacts/conf/etc+passwd");
        assert_eq!(meta[0].sha256_hash, artifact.sha256);
    }

    #[test]
    fn test_missing_source_writes_nothing() {
        let (src, acq, ledger) = setup();
        let collector = Collector::new(acq.path(), ledger.handle(), None, CancellationToken::new());
        let dest = collector.artefacts_dir().join("conf/missing");

        let err = collector.collect(&src.path().join("missing"), &dest).unwrap_err();
        assert!(err.is_not_found());
        assert!(!dest.exists());

        drop(collector);
        assert_eq!(ledger.close().unwrap().entries, 0);
        assert!(read_audit(&acq.path().join("log.audit")).unwrap().is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_dangling_symlink_is_not_found() {
        let (src, acq, ledger) = setup();
        let link = src.path().join("link");
        std::os::unix::fs::symlink(src.path().join("gone"), &link).unwrap();

        let collector = Collector::new(acq.path(), ledger.handle(), None, CancellationToken::new());
        let err = collector.collect(&link, &acq.path().join("artefacts/link")).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_timestamps_are_preserved() {
        let (src, acq, ledger) = setup();
        let source = src.path().join("hosts");
        fs::write(&source, b"127.0.0.1 localhost\n").unwrap();
        let past = FileTime::from_unix_time(1_500_000_000, 0);
        filetime::set_file_times(&source, past, past).unwrap();

        let collector = Collector::new(acq.path(), ledger.handle(), None, CancellationToken::new());
        let dest = acq.path().join("artefacts/conf/etc+hosts");
        collector.collect(&source, &dest).unwrap();

        let copied = fs::metadata(&dest).unwrap();
        assert_eq!(FileTime::from_last_modification_time(&copied), past);
    }

    #[test]
    fn test_access_times_snapshot_taken() {
        let (src, acq, ledger) = setup();
        let source = src.path().join("bash_history");
        fs::write(&source, b"ls\n").unwrap();

        let access_times = Arc::new(AccessTimes::new());
        let collector = Collector::new(
            acq.path(),
            ledger.handle(),
            Some(Arc::clone(&access_times)),
            CancellationToken::new(),
        );
        collector.collect(&source, &acq.path().join("artefacts/user/x")).unwrap();
        assert_eq!(access_times.len(), 1);
    }

    #[test]
    fn test_failed_copy_is_not_in_bodyfile() {
        let (src, acq, ledger) = setup();
        let source = src.path().join("hosts");
        fs::write(&source, b"127.0.0.1 localhost\n").unwrap();
        // a regular file where the destination's parent directory should be
        fs::write(acq.path().join("blocked"), b"").unwrap();

        let access_times = Arc::new(AccessTimes::new());
        let collector = Collector::new(
            acq.path(),
            ledger.handle(),
            Some(Arc::clone(&access_times)),
            CancellationToken::new(),
        );
        assert!(collector.collect(&source, &acq.path().join("blocked/hosts")).is_err());
        assert!(access_times.is_empty());

        collector.collect(&source, &acq.path().join("artefacts/conf/hosts")).unwrap();
        assert_eq!(access_times.len(), 1);
        assert!(access_times.render().contains(&*source.to_string_lossy()));
    }

    #[test]
    fn test_capture_records_generated_output() {
        let (_src, acq, ledger) = setup();
        let collector = Collector::new(acq.path(), ledger.handle(), None, CancellationToken::new());
        let dest = collector.artefacts_dir().join("host.info");
        let artifact = collector.capture(&dest, b"Linux ws1 6.1.0\n").unwrap();
        assert_eq!(artifact.sha256, sha256_hex(b"Linux ws1 6.1.0\n"));
        assert_eq!(collector.ledger_path(&dest), "artefacts/host.info");
    }

    #[test]
    fn test_cancelled_collector_refuses_work() {
        let (src, acq, ledger) = setup();
        let source = src.path().join("f");
        fs::write(&source, b"x").unwrap();
        let cancel = CancellationToken::new();
        let collector = Collector::new(acq.path(), ledger.handle(), None, cancel.clone());
        cancel.cancel();

        let err = collector.collect(&source, &acq.path().join("artefacts/f")).unwrap_err();
        assert!(matches!(err, CollectError::Cancelled));
    }
}
