//! Target list parsing.
//!
//! One target per line: `host`, `host:port`, `user@host[:port]` or
//! `[v6addr]:port`. Blank lines and lines starting with `#` are ignored.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use log::warn;

use crate::models::{RemoteHost, RemoteTargets};

/// A target as written, before defaults are applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostEntry {
    pub user: Option<String>,
    pub address: String,
    pub port: Option<u16>,
}

/// Parse one target specification.
pub fn parse_entry(spec: &str) -> Result<HostEntry> {
    let spec = spec.trim();
    let (user, rest) = match spec.rsplit_once('@') {
        Some((user, rest)) if !user.is_empty() => (Some(user.to_string()), rest),
        Some(_) => bail!("empty user in '{}'", spec),
        None => (None, spec),
    };

    let (address, port) = if let Some(inner) = rest.strip_prefix('[') {
        let (address, tail) = inner
            .split_once(']')
            .ok_or_else(|| anyhow!("unterminated '[' in '{}'", spec))?;
        let port = match tail {
            "" => None,
            tail => Some(parse_port(tail.strip_prefix(':').unwrap_or(tail), spec)?),
        };
        (address.to_string(), port)
    } else if rest.matches(':').count() == 1 {
        let (address, port) = rest.split_once(':').unwrap_or((rest, ""));
        (address.to_string(), Some(parse_port(port, spec)?))
    } else {
        // bare IPv6 address or plain host name
        (rest.to_string(), None)
    };

    if address.is_empty() {
        bail!("missing host in '{}'", spec);
    }
    Ok(HostEntry { user, address, port })
}

fn parse_port(port: &str, spec: &str) -> Result<u16> {
    match port.parse::<u16>() {
        Ok(0) | Err(_) => bail!("invalid port '{}' in '{}'", port, spec),
        Ok(port) => Ok(port),
    }
}

/// Parse a hosts file body, preserving order.
pub fn parse_hosts(text: &str) -> Result<Vec<HostEntry>> {
    text.lines()
        .enumerate()
        .map(|(n, line)| (n + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'))
        .map(|(n, line)| parse_entry(line).with_context(|| format!("line {}", n)))
        .collect()
}

pub fn load_hosts(path: &Path) -> Result<Vec<HostEntry>> {
    let text = fs::read_to_string(path).context(format!("Failed to read hosts file {}", path.display()))?;
    parse_hosts(&text).context(format!("Invalid hosts file {}", path.display()))
}

/// Combine `-h` and `-f` into the final target list.
///
/// The single host comes first, then the file in order. Duplicates are
/// dropped with a warning since two workers would fight over one remote
/// working directory.
pub fn resolve_targets(targets: &RemoteTargets, user: &str, default_port: u16) -> Result<Vec<RemoteHost>> {
    let mut entries = Vec::new();
    if let Some(host) = &targets.host {
        entries.push(parse_entry(host)?);
    }
    if let Some(file) = &targets.hosts_file {
        entries.extend(load_hosts(file)?);
    }
    if entries.is_empty() {
        bail!("remote mode needs a target: use -h HOST or -f HOSTS_FILE");
    }

    let mut seen = HashSet::new();
    let mut hosts = Vec::with_capacity(entries.len());
    for entry in entries {
        let host = RemoteHost {
            user: entry.user.unwrap_or_else(|| user.to_string()),
            port: entry.port.unwrap_or(default_port),
            address: entry.address,
        };
        if seen.insert((host.address.clone(), host.port)) {
            hosts.push(host);
        } else {
            warn!("Ignoring duplicate target {}", host);
        }
    }
    Ok(hosts)
}
