use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::GandalfError;

/// How the packaged acquisition is protected before handoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EncryptionMethod {
    None,
    Password,
    Key,
}

impl FromStr for EncryptionMethod {
    type Err = GandalfError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(EncryptionMethod::None),
            "password" => Ok(EncryptionMethod::Password),
            "key" => Ok(EncryptionMethod::Key),
            _ => Err(GandalfError::InvalidArgument(format!(
                "unknown encryption method '{}' (expected Key, Password or None)",
                s
            ))),
        }
    }
}

impl fmt::Display for EncryptionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EncryptionMethod::None => write!(f, "None"),
            EncryptionMethod::Password => write!(f, "Password"),
            EncryptionMethod::Key => write!(f, "Key"),
        }
    }
}

/// Where the acquisition runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mode {
    Local,
    Remote,
}

impl FromStr for Mode {
    type Err = GandalfError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "local" => Ok(Mode::Local),
            "remote" => Ok(Mode::Remote),
            _ => Err(GandalfError::InvalidArgument(format!(
                "unknown acquisition mode '{}' (expected Local or Remote)",
                s
            ))),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Local => write!(f, "Local"),
            Mode::Remote => write!(f, "Remote"),
        }
    }
}

/// Optional acquisition capabilities selected on the command line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFlags {
    pub memory_dump: bool,
    pub access_times: bool,
    pub collect_files: bool,
}

/// Remote targeting options as supplied by the operator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteTargets {
    pub host: Option<String>,
    pub user: Option<String>,
    pub hosts_file: Option<PathBuf>,
}

/// A validated, immutable description of one run.
///
/// Built once from command-line input and passed by reference to every
/// component; nothing mutates it afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcquisitionJob {
    pub encryption_method: EncryptionMethod,
    pub mode: Mode,
    pub output_dir: PathBuf,
    pub flags: JobFlags,
    pub remote: RemoteTargets,
    /// Read the passphrase from stdin instead of the terminal (remote invocation)
    pub passphrase_from_stdin: bool,
}

/// Whether a catalog entry is a single file or a directory tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionKind {
    SingleFile,
    DirectoryTree { max_depth: Option<usize> },
}

/// A static catalog entry: where an artifact lives and where it lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArtifactSpec {
    pub source_path: &'static str,
    /// Destination file name (single files) or directory (trees), relative to
    /// the category directory
    pub destination: &'static str,
    pub kind: CollectionKind,
}

impl ArtifactSpec {
    pub const fn file(source_path: &'static str, destination: &'static str) -> Self {
        Self { source_path, destination, kind: CollectionKind::SingleFile }
    }

    pub const fn tree(source_path: &'static str, destination: &'static str) -> Self {
        Self {
            source_path,
            destination,
            kind: CollectionKind::DirectoryTree { max_depth: None },
        }
    }
}

/// Result of one successful collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectedArtifact {
    pub source_path: PathBuf,
    pub destination_path: PathBuf,
    pub sha256: String,
    pub collected: bool,
}

/// A target of remote dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteHost {
    pub address: String,
    pub port: u16,
    pub user: String,
}

impl fmt::Display for RemoteHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.user, self.address, self.port)
    }
}
