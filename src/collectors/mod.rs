//! Artifact collection implementations.
//!
//! Everything bottoms out in [`collector::Collector`], which copies one file,
//! hashes the copy and records it in the host's ledger.
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │   catalog   volatile   memory            │
//! ├──────────────────────────────────────────┤
//! │   traversal (depth-bounded, flattened)   │
//! ├──────────────────────────────────────────┤
//! │   collector (copy, preserve, hash)       │
//! ├──────────────────────────────────────────┤
//! │   ledger (log.audit + log.meta)          │
//! └──────────────────────────────────────────┘
//! ```
//!
//! ## Usage Example
//!
//! ```no_run
//! use gandalf::collectors::{catalog, collector::Collector};
//! use gandalf::config::GandalfConfig;
//! use gandalf::ledger::Ledger;
//! use std::path::Path;
//! use tokio_util::sync::CancellationToken;
//!
//! # fn example() -> anyhow::Result<()> {
//! let acquisition_dir = Path::new("/tmp/gandalf/acquisitions/ws1");
//! let ledger = Ledger::open(acquisition_dir, "ws1")?;
//! let collector = Collector::new(acquisition_dir, ledger.handle(), None, CancellationToken::new());
//!
//! let count = catalog::collect_all(&collector, &GandalfConfig::default());
//! drop(collector);
//! let stats = ledger.close()?;
//! assert_eq!(count, stats.entries);
//! # Ok(())
//! # }
//! ```

/// Copy, preserve, hash and record a single file
pub mod collector;

/// Depth-bounded directory walking with flattened names
pub mod traversal;

/// Static table of well-known artifact locations
pub mod catalog;

/// Volatile state captured from introspection commands
pub mod volatile;

/// Physical memory acquisition
pub mod memory;
