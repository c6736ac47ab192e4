//! Global constants for the gandalf acquisition engine.
//!
//! File names and layout markers live here because downstream tooling
//! (verifiers, the analysis engine) depends on them staying stable.

// Buffer sizes
/// Default buffer size for file hashing and copying (1MB)
pub const DEFAULT_BUFFER_SIZE: usize = 1024 * 1024;

/// Chunk size used when streaming an archive through the cipher (64KB)
pub const CIPHER_CHUNK_SIZE: usize = 64 * 1024;

// Acquisition layout
/// Name of the tool, used for default paths
pub const TOOL_NAME: &str = "gandalf";

/// Default output root when `-o` is not supplied
pub const DEFAULT_OUTPUT_DIR: &str = "/tmp/gandalf/acquisitions";

/// Directory inside a host's acquisition directory holding every artifact
pub const ARTEFACTS_DIR: &str = "artefacts";

/// Audit ledger file name
pub const AUDIT_LOG: &str = "log.audit";

/// Metadata (hash) ledger file name
pub const META_LOG: &str = "log.meta";

/// Audit ledger header
pub const AUDIT_HEADER: [&str; 4] = ["datetime", "hostname", "artefact", "collected"];

/// Metadata ledger header
pub const META_HEADER: [&str; 3] = ["hostname", "file_path", "sha256_hash"];

/// Status value written to the audit ledger for every collection event
pub const COLLECTED_STATUS: &str = "collected";

/// Separator replacement used when flattening hierarchical paths
pub const FLATTEN_CHAR: char = '+';

/// Default traversal depth for directory-tree artifacts
pub const DEFAULT_MAX_DEPTH: usize = 3;

/// Default traversal depth for per-user SSH directories
pub const DEFAULT_SSH_MAX_DEPTH: usize = 1;

// Packaging
/// Extension of the compressed acquisition container
pub const ARCHIVE_EXTENSION: &str = "tar.gz";

/// Extension appended to an encrypted container
pub const ENCRYPTED_EXTENSION: &str = "enc";

/// Suffix for files that are still being written
pub const PARTIAL_SUFFIX: &str = "partial";

/// Name of the generated key file in `Key` mode
pub const KEY_FILE_NAME: &str = "shadowfax.key";

/// Size of the random secret generated in `Key` mode (32 bytes)
pub const GENERATED_KEY_SIZE: usize = 32;

/// OpenSSL `enc` salted header magic
pub const OPENSSL_SALT_MAGIC: &[u8; 8] = b"Salted__";

/// Salt length used by OpenSSL `enc`
pub const SALT_SIZE: usize = 8;

/// PBKDF2 iteration count (OpenSSL `enc -pbkdf2` default)
pub const PBKDF2_ITERATIONS: usize = 10_000;

// Remote dispatch
/// Default SSH port
pub const SSH_DEFAULT_PORT: u16 = 22;

/// Fixed remote working tree
pub const REMOTE_WORKDIR: &str = "/tmp/gandalf";

/// Default per-host timeout in seconds
pub const DEFAULT_HOST_TIMEOUT_SECS: u64 = 3600;

/// Connection timeout for the TCP connect and SSH handshake in seconds
pub const SSH_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Budget for removing the remote working tree, even after the host timed out
pub const REMOTE_CLEANUP_TIMEOUT_SECS: u64 = 30;

/// How long the runtime waits for abandoned host workers on exit
pub const RUNTIME_SHUTDOWN_GRACE_SECS: u64 = 5;

/// File the dispatcher writes after a remote batch
pub const DISPATCH_SUMMARY_FILE: &str = "dispatch-summary.json";
