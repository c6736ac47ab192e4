//! # gandalf
//!
//! Forensic evidence acquisition and chain-of-custody engine for Linux hosts.
//!
//! ## Overview
//!
//! gandalf collects volatile state and well-known filesystem artifacts from
//! the local host or from a fleet of remote hosts over SSH. Every collected
//! file is hashed after it is written and recorded in two append-only
//! ledgers, the acquisition is packaged as `tar.gz`, and the package is
//! optionally encrypted in an OpenSSL-compatible format.
//!
//! ## Features
//!
//! - **Chain of custody**: `log.audit` (what, when) and `log.meta` (SHA-256)
//!   written together from one event per artifact
//! - **Depth-bounded traversal**: directory trees flattened to one level
//!   with `+`, collision-safe
//! - **Per-user and browser artifacts**: homes and Firefox profiles
//!   discovered by listing, in sorted order
//! - **Memory**: opportunistic AVML image
//! - **Encryption**: AES-256-CBC with PBKDF2, by generated key file or passphrase
//! - **Remote dispatch**: bounded worker pool, per-host timeout, isolated failures
//!
//! ## Usage
//!
//! ```no_run
//! use gandalf::config::GandalfConfig;
//! use gandalf::crypto::TerminalPrompt;
//! use gandalf::models::{AcquisitionJob, EncryptionMethod, JobFlags, Mode, RemoteTargets};
//! use gandalf::orchestrator::run_local;
//! use tokio_util::sync::CancellationToken;
//!
//! # fn main() -> Result<(), gandalf::error::GandalfError> {
//! let job = AcquisitionJob {
//!     encryption_method: EncryptionMethod::Key,
//!     mode: Mode::Local,
//!     output_dir: "/tmp/gandalf/acquisitions".into(),
//!     flags: JobFlags::default(),
//!     remote: RemoteTargets::default(),
//!     passphrase_from_stdin: false,
//! };
//!
//! let report = run_local(&job, &GandalfConfig::default(), &TerminalPrompt, &CancellationToken::new())?;
//! println!("{} -> {}", report.hostname, report.package.display());
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Organization
//!
//! - [`cli`]: command-line interface and job construction
//! - [`models`]: jobs, catalog entries and collection results
//! - [`collectors`]: collector primitive, traversal, catalog, volatile and memory
//! - [`ledger`]: audit and metadata logs
//! - [`orchestrator`]: the single-host pipeline
//! - [`remote`]: multi-host dispatch over SSH
//! - [`crypto`]: encryption and credential providers
//! - [`utils`]: hashing, archiving, access times, tool lookup
//! - [`config`]: YAML configuration
//! - [`preflight`] and [`privileges`]: precondition checks
//! - [`constants`] and [`error`]

/// Command-line interface definitions and argument parsing
pub mod cli;

/// Core data models and structures used throughout the application
pub mod models;

/// Artifact collectors
pub mod collectors;

/// Audit and metadata ledgers
pub mod ledger;

/// Single-host acquisition pipeline
pub mod orchestrator;

/// Remote dispatch over SSH
pub mod remote;

/// Package encryption and credential providers
pub mod crypto;

/// Utility functions for archiving, hashing, and file operations
pub mod utils;

/// Configuration management
pub mod config;

/// Privilege and dependency checks run before any work
pub mod preflight;

/// Effective privilege detection
pub mod privileges;

/// Application constants and configuration values
pub mod constants;

/// Error taxonomy
pub mod error;
