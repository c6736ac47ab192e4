//! End-to-end tests for single-host acquisition
//!
//! Each test builds a throwaway filesystem root, runs the pipeline against
//! it and verifies the extracted package against its own ledgers.

use std::collections::BTreeSet;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

use anyhow::Result;
use flate2::read::GzDecoder;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

use gandalf::config::GandalfConfig;
use gandalf::crypto::StaticCredentials;
use gandalf::ledger::{read_audit, read_meta};
use gandalf::models::{AcquisitionJob, EncryptionMethod, JobFlags, Mode, RemoteTargets};
use gandalf::orchestrator::run_for_host;
use gandalf::utils::hash::calculate_sha256;

fn write(root: &Path, relative: &str, contents: &str) -> Result<()> {
    let path = root.join(relative);
    fs::create_dir_all(path.parent().unwrap())?;
    fs::write(path, contents)?;
    Ok(())
}

/// A small host: two config files, a log tree five levels deep and one user.
fn fixture() -> Result<TempDir> {
    let root = TempDir::new()?;
    let r = root.path();
    write(r, "etc/passwd", "root:x:0:0:root:/root:/bin/bash\n")?;
    write(r, "etc/hosts", "127.0.0.1 localhost\n")?;
    write(r, "var/log/syslog", "boot\n")?;
    write(r, "var/log/apt/history.log", "install\n")?;
    write(r, "var/log/apt/x/term.log", "term\n")?;
    write(r, "var/log/apt/x/y/too-deep.log", "skip\n")?;
    write(r, "home/alice/.bash_history", "sudo -i\n")?;
    write(r, "home/alice/.ssh/authorized_keys", "ssh-ed25519 AAAA alice\n")?;
    Ok(root)
}

fn config(root: &Path) -> GandalfConfig {
    GandalfConfig {
        fs_root: root.to_path_buf(),
        memory_tool: "gandalf-test-missing-avml".into(),
        required_tools: Vec::new(),
        ..GandalfConfig::default()
    }
}

fn job(output_dir: &Path, method: EncryptionMethod, flags: JobFlags) -> AcquisitionJob {
    AcquisitionJob {
        encryption_method: method,
        mode: Mode::Local,
        output_dir: output_dir.to_path_buf(),
        flags,
        remote: RemoteTargets::default(),
        passphrase_from_stdin: false,
    }
}

fn extract(package: &Path, into: &Path) -> Result<()> {
    let decoder = GzDecoder::new(File::open(package)?);
    tar::Archive::new(decoder).unpack(into)?;
    Ok(())
}

fn artefact_files(acquisition: &Path) -> BTreeSet<String> {
    WalkDir::new(acquisition.join("artefacts"))
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| {
            e.path()
                .strip_prefix(acquisition)
                .unwrap()
                .to_string_lossy()
                .into_owned()
        })
        .collect()
}

/// Every file in the package is in both ledgers and hashes to its meta entry.
fn verify_package(acquisition: &Path, hostname: &str) -> Result<usize> {
    let audit = read_audit(&acquisition.join("log.audit"))?;
    let meta = read_meta(&acquisition.join("log.meta"))?;
    assert_eq!(audit.len(), meta.len());

    let audited: BTreeSet<String> = audit.iter().map(|r| r.artefact.clone()).collect();
    let hashed: BTreeSet<String> = meta.iter().map(|r| r.file_path.clone()).collect();
    assert_eq!(audited, hashed);
    assert_eq!(hashed, artefact_files(acquisition));

    for row in &audit {
        assert_eq!(row.hostname, hostname);
        assert_eq!(row.collected, "collected");
    }
    for row in &meta {
        assert_eq!(row.hostname, hostname);
        assert_eq!(calculate_sha256(&acquisition.join(&row.file_path))?, row.sha256_hash);
    }
    Ok(meta.len())
}

#[test]
fn test_none_local_package_matches_ledgers() -> Result<()> {
    let root = fixture()?;
    let out = TempDir::new()?;
    let creds = StaticCredentials::new(None, None);

    let report = run_for_host(
        "ws1",
        &job(out.path(), EncryptionMethod::None, JobFlags::default()),
        &config(root.path()),
        &creds,
        &CancellationToken::new(),
    )?;

    assert_eq!(report.package, out.path().join("ws1.tar.gz"));
    assert!(!out.path().join("ws1").exists());

    let extracted = TempDir::new()?;
    extract(&report.package, extracted.path())?;
    let acquisition = extracted.path().join("ws1");

    let entries = verify_package(&acquisition, "ws1")?;
    assert_eq!(entries, report.artifacts);
    Ok(())
}

#[test]
fn test_catalog_layout_and_depth_bound() -> Result<()> {
    let root = fixture()?;
    let out = TempDir::new()?;
    let creds = StaticCredentials::new(None, None);

    let report = run_for_host(
        "ws2",
        &job(out.path(), EncryptionMethod::None, JobFlags::default()),
        &config(root.path()),
        &creds,
        &CancellationToken::new(),
    )?;

    let extracted = TempDir::new()?;
    extract(&report.package, extracted.path())?;
    let artefacts = extracted.path().join("ws2/artefacts");

    assert!(artefacts.join("conf/etc+passwd").is_file());
    assert!(artefacts.join("conf/etc+hosts").is_file());
    assert!(artefacts.join("logs/syslog").is_file());
    assert!(artefacts.join("logs/apt+history.log").is_file());
    assert!(artefacts.join("logs/apt+x+term.log").is_file());
    assert!(!artefacts.join("logs/apt+x+y+too-deep.log").exists());

    assert_eq!(fs::read_to_string(artefacts.join("user/alice/bash_history"))?, "sudo -i\n");
    assert!(artefacts.join("user/alice/ssh/authorized_keys").is_file());
    Ok(())
}

#[test]
fn test_missing_sources_are_not_recorded() -> Result<()> {
    let root = fixture()?;
    let out = TempDir::new()?;
    let creds = StaticCredentials::new(None, None);
    let flags = JobFlags { memory_dump: true, access_times: false, collect_files: false };

    let report = run_for_host(
        "ws3",
        &job(out.path(), EncryptionMethod::None, flags),
        &config(root.path()),
        &creds,
        &CancellationToken::new(),
    )?;

    let extracted = TempDir::new()?;
    extract(&report.package, extracted.path())?;
    let meta = read_meta(&extracted.path().join("ws3/log.meta"))?;

    // no shadow file in the fixture and no memory tool on PATH
    assert!(meta.iter().all(|r| r.file_path != "artefacts/conf/etc+shadow"));
    assert!(meta.iter().all(|r| !r.file_path.starts_with("artefacts/memory/")));
    assert!(meta.iter().any(|r| r.file_path == "artefacts/conf/etc+passwd"));
    Ok(())
}

#[test]
fn test_access_times_bodyfile_is_packaged() -> Result<()> {
    let root = fixture()?;
    let out = TempDir::new()?;
    let creds = StaticCredentials::new(None, None);
    let flags = JobFlags { memory_dump: false, access_times: true, collect_files: false };

    let report = run_for_host(
        "ws4",
        &job(out.path(), EncryptionMethod::None, flags),
        &config(root.path()),
        &creds,
        &CancellationToken::new(),
    )?;

    let extracted = TempDir::new()?;
    extract(&report.package, extracted.path())?;
    let acquisition = extracted.path().join("ws4");
    verify_package(&acquisition, "ws4")?;

    let bodyfile = fs::read_to_string(acquisition.join("artefacts/access.times"))?;
    let passwd = root.path().join("etc/passwd");
    assert!(bodyfile.lines().any(|l| l.contains(&*passwd.to_string_lossy())));
    Ok(())
}

#[test]
fn test_declared_files_are_collected_with_flag() -> Result<()> {
    let root = fixture()?;
    write(root.path(), "opt/app/app.conf", "listen 0.0.0.0\n")?;
    let out = TempDir::new()?;
    let creds = StaticCredentials::new(None, None);
    let mut config = config(root.path());
    config.collect_files = vec!["/opt/app/app.conf".into()];
    let flags = JobFlags { memory_dump: false, access_times: false, collect_files: true };

    let report = run_for_host(
        "ws5",
        &job(out.path(), EncryptionMethod::None, flags),
        &config,
        &creds,
        &CancellationToken::new(),
    )?;

    let extracted = TempDir::new()?;
    extract(&report.package, extracted.path())?;
    let declared: PathBuf = extracted.path().join("ws5/artefacts/files/opt+app+app.conf");
    assert_eq!(fs::read_to_string(declared)?, "listen 0.0.0.0\n");
    Ok(())
}
