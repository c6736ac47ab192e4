//! Command-line surface tests

use anyhow::Result;
use clap::Parser;

use gandalf::cli::Args;
use gandalf::error::GandalfError;
use gandalf::models::{EncryptionMethod, Mode};

#[test]
fn test_positionals_any_case() -> Result<()> {
    let cases = [
        ("key", "local", EncryptionMethod::Key, Mode::Local),
        ("KEY", "REMOTE", EncryptionMethod::Key, Mode::Remote),
        ("Password", "Local", EncryptionMethod::Password, Mode::Local),
        ("nOnE", "rEmOtE", EncryptionMethod::None, Mode::Remote),
    ];
    for (method, mode, expected_method, expected_mode) in cases {
        let args = Args::try_parse_from(["gandalf", method, mode, "-h", "ws1"])?;
        assert_eq!(args.method, Some(expected_method));
        assert_eq!(args.mode, Some(expected_mode));
    }
    Ok(())
}

#[test]
fn test_remote_job_from_hosts_file() -> Result<()> {
    let args = Args::try_parse_from([
        "gandalf", "None", "Remote", "-f", "hosts.txt", "-u", "ir", "-m", "-a", "-o", "/cases/4711",
    ])?;
    let job = args.into_job()?;

    assert_eq!(job.mode, Mode::Remote);
    assert_eq!(job.remote.hosts_file.as_deref(), Some(std::path::Path::new("hosts.txt")));
    assert_eq!(job.remote.user.as_deref(), Some("ir"));
    assert!(job.flags.memory_dump && job.flags.access_times);
    assert_eq!(job.output_dir, std::path::PathBuf::from("/cases/4711"));
    Ok(())
}

#[test]
fn test_invalid_invocations() {
    assert!(Args::try_parse_from(["gandalf"]).is_err());
    assert!(Args::try_parse_from(["gandalf", "Rot13", "Local"]).is_err());
    assert!(Args::try_parse_from(["gandalf", "Key", "Local", "--bogus"]).is_err());

    let args = Args::try_parse_from(["gandalf", "Key", "Remote"]).unwrap();
    assert!(matches!(args.into_job(), Err(GandalfError::InvalidArgument(_))));
}
