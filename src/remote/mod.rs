//! Remote acquisition over SSH.
//!
//! For each target the dispatcher pushes this binary, runs it in `Local`
//! mode, pulls the package back and removes its remote working tree. Hosts
//! are independent; a failed host never aborts the batch.

/// Batch execution across hosts
pub mod dispatcher;

/// Target list parsing
pub mod hosts;

/// SSH session abstraction and `ssh2` implementation
pub mod ssh;

pub use dispatcher::{dispatch, BatchReport, HostOutcome, RemotePlan};
pub use hosts::{load_hosts, parse_hosts, resolve_targets};
pub use ssh::{RemoteConnector, RemoteSession, SshConnector};
