use std::path::PathBuf;

use clap::Parser;
use log::warn;

use crate::constants::DEFAULT_OUTPUT_DIR;
use crate::error::GandalfError;
use crate::models::{AcquisitionJob, EncryptionMethod, JobFlags, Mode, RemoteTargets};

/// Command-line arguments for gandalf.
///
/// `-h` selects a remote host, so help is only available as `--help`.
#[derive(Parser, Debug)]
#[clap(
    name = "gandalf",
    version,
    about = "Forensic evidence acquisition and chain-of-custody engine",
    disable_help_flag = true
)]
pub struct Args {
    /// Encryption method: Key, Password or None (case-insensitive)
    #[clap(required_unless_present = "init_config")]
    pub method: Option<EncryptionMethod>,

    /// Acquisition mode: Local or Remote (case-insensitive)
    #[clap(required_unless_present = "init_config")]
    pub mode: Option<Mode>,

    /// Output directory (default: /tmp/gandalf/acquisitions)
    #[clap(short, long)]
    pub output: Option<PathBuf>,

    /// Include a physical memory image
    #[clap(short = 'm', long = "memory")]
    pub memory: bool,

    /// Record source access times as a bodyfile
    #[clap(short = 'a', long = "access-times")]
    pub access_times: bool,

    /// Collect the files declared in the configuration
    #[clap(short = 'c', long = "collect-files")]
    pub collect_files: bool,

    /// Remote target host (host, host:port or user@host)
    #[clap(short = 'h', long = "host")]
    pub host: Option<String>,

    /// Remote username (prompted if omitted)
    #[clap(short = 'u', long = "user")]
    pub user: Option<String>,

    /// File listing remote targets, one per line
    #[clap(short = 'f', long = "hosts-file")]
    pub hosts_file: Option<PathBuf>,

    /// Path to configuration YAML file
    #[clap(long)]
    pub config: Option<PathBuf>,

    /// Write the default configuration to PATH and exit
    #[clap(long, value_name = "PATH")]
    pub init_config: Option<PathBuf>,

    /// Verbose logging
    #[clap(short, long)]
    pub verbose: bool,

    /// Read the encryption passphrase from stdin (used by remote dispatch)
    #[clap(long, hide = true)]
    pub passphrase_stdin: bool,

    /// Print help
    #[clap(long, action = clap::ArgAction::Help)]
    pub help: Option<bool>,
}

impl Args {
    /// Validate the arguments and build the run's immutable job.
    pub fn into_job(&self) -> Result<AcquisitionJob, GandalfError> {
        let encryption_method = self
            .method
            .ok_or_else(|| GandalfError::InvalidArgument("missing encryption method".into()))?;
        let mode = self
            .mode
            .ok_or_else(|| GandalfError::InvalidArgument("missing acquisition mode".into()))?;

        let remote = RemoteTargets {
            host: self.host.clone(),
            user: self.user.clone(),
            hosts_file: self.hosts_file.clone(),
        };

        match mode {
            Mode::Remote => {
                if remote.host.is_none() && remote.hosts_file.is_none() {
                    return Err(GandalfError::InvalidArgument(
                        "Remote mode needs -h HOST or -f HOSTS_FILE".into(),
                    ));
                }
                if self.collect_files {
                    warn!("-c is not forwarded to remote hosts; declared files are collected locally only");
                }
            }
            Mode::Local => {
                if remote.host.is_some() || remote.hosts_file.is_some() || remote.user.is_some() {
                    warn!("Remote targeting options are ignored in Local mode");
                }
            }
        }

        if self.passphrase_stdin && encryption_method != EncryptionMethod::Password {
            return Err(GandalfError::InvalidArgument(
                "--passphrase-stdin only applies to Password encryption".into(),
            ));
        }

        Ok(AcquisitionJob {
            encryption_method,
            mode,
            output_dir: self.output.clone().unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR)),
            flags: JobFlags {
                memory_dump: self.memory,
                access_times: self.access_times,
                collect_files: self.collect_files,
            },
            remote,
            passphrase_from_stdin: self.passphrase_stdin,
        })
    }
}
