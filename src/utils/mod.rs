//! Utility functions for packaging and verifying collected evidence.
//!
//! - **Hashing**: streaming SHA-256 used for every chain-of-custody entry
//! - **Archive**: `tar.gz` packaging of an acquisition directory
//! - **Access times**: bodyfile snapshot of source MAC times (`-a`)
//! - **Tools**: capability checks for external programs
//!
//! ### Hashing a collected file
//!
//! ```no_run
//! use gandalf::utils::hash::calculate_sha256;
//! use std::path::Path;
//!
//! # fn example() -> std::io::Result<()> {
//! let digest = calculate_sha256(Path::new("/tmp/out/ws1/artefacts/conf/etc+passwd"))?;
//! println!("SHA-256: {}", digest);
//! # Ok(())
//! # }
//! ```

/// Source MAC time snapshots written as a bodyfile
pub mod access_times;

/// Compressed container creation
pub mod archive;

/// Cryptographic hash calculation utilities
pub mod hash;

/// External program resolution against `PATH`
pub mod tools;
