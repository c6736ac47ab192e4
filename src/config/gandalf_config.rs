use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::config::env_vars::expand_env_vars;
use crate::constants::{
    DEFAULT_HOST_TIMEOUT_SECS, DEFAULT_MAX_DEPTH, DEFAULT_SSH_MAX_DEPTH, REMOTE_WORKDIR,
    SSH_DEFAULT_PORT,
};

/// Tunables for an acquisition run.
///
/// Everything has a default; the YAML file only needs the keys an operator
/// wants to change.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct GandalfConfig {
    /// Root prefix applied to every catalog source path
    pub fs_root: PathBuf,
    /// Traversal depth for directory-tree artifacts
    pub max_depth: usize,
    /// Traversal depth for per-user SSH directories
    pub ssh_max_depth: usize,
    /// Memory acquisition helper, a program name on PATH or an absolute path
    pub memory_tool: String,
    /// External programs that must be resolvable before a local run starts
    pub required_tools: Vec<String>,
    /// Declared files and directories collected with `-c`
    pub collect_files: Vec<String>,
    pub remote: RemoteConfig,
}

/// Settings for remote dispatch.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct RemoteConfig {
    pub port: u16,
    pub identity_file: Option<PathBuf>,
    /// Remote temporary working tree, removed after each host
    pub workdir: String,
    /// Hosts acquired concurrently; 1 keeps list order strictly sequential
    pub workers: usize,
    pub timeout_secs: u64,
    /// Prefix the remote invocation with `sudo -n` for non-root users
    pub sudo: bool,
}

impl Default for GandalfConfig {
    fn default() -> Self {
        Self {
            fs_root: PathBuf::from("/"),
            max_depth: DEFAULT_MAX_DEPTH,
            ssh_max_depth: DEFAULT_SSH_MAX_DEPTH,
            memory_tool: "avml".to_string(),
            required_tools: vec!["uname".to_string(), "ps".to_string(), "env".to_string()],
            collect_files: Vec::new(),
            remote: RemoteConfig::default(),
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            port: SSH_DEFAULT_PORT,
            identity_file: None,
            workdir: REMOTE_WORKDIR.to_string(),
            workers: 1,
            timeout_secs: DEFAULT_HOST_TIMEOUT_SECS,
            sudo: true,
        }
    }
}

impl RemoteConfig {
    pub fn host_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl GandalfConfig {
    /// Load configuration from a YAML file
    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .context(format!("Failed to read config file: {}", path.display()))?;

        let config: GandalfConfig = serde_yaml::from_str(&content)
            .context("Failed to parse YAML config")?;

        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Save configuration to a YAML file
    pub fn save_to_yaml_file(&self, path: &Path) -> Result<()> {
        let yaml = serde_yaml::to_string(self)
            .context("Failed to serialize config to YAML")?;

        fs::write(path, yaml)
            .context(format!("Failed to write config to {}", path.display()))?;

        info!("Saved configuration to {}", path.display());
        Ok(())
    }

    /// Resolve an absolute catalog path under `fs_root`.
    pub fn resolve(&self, source: impl AsRef<Path>) -> PathBuf {
        let source = source.as_ref();
        match source.strip_prefix("/") {
            Ok(relative) => self.fs_root.join(relative),
            Err(_) => self.fs_root.join(source),
        }
    }

    /// Declared `-c` paths with environment variables expanded, in declaration order.
    pub fn declared_files(&self) -> Vec<PathBuf> {
        self.collect_files
            .iter()
            .map(|p| expand_env_vars(p.trim()))
            .filter(|p| !p.is_empty())
            .map(PathBuf::from)
            .collect()
    }

    /// Clamp values that would make a run meaningless.
    pub fn normalized(mut self) -> Self {
        self.remote.workers = self.remote.workers.max(1);
        self.max_depth = self.max_depth.max(1);
        self.ssh_max_depth = self.ssh_max_depth.max(1);
        self
    }
}

/// Load a configuration file, falling back to built-in defaults.
///
/// A path that was given explicitly must parse; a missing file is an error
/// so a typo does not silently run with defaults.
pub fn load_or_default(config_path: Option<&Path>) -> Result<GandalfConfig> {
    match config_path {
        Some(path) => {
            let config = GandalfConfig::from_yaml_file(path)?;
            Ok(config.normalized())
        }
        None => {
            debug!("No config path provided, using built-in defaults");
            Ok(GandalfConfig::default())
        }
    }
}
