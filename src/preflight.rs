//! Preconditions checked before anything is written to disk.

use std::env;
use std::ffi::OsStr;

use log::{debug, info};

use crate::error::GandalfError;
use crate::privileges::{get_elevation_instructions, is_elevated};
use crate::utils::tools::resolve_tool_in;

/// Every entry of `required_tools` missing from `search_path`, in input order.
pub fn missing_tools(required_tools: &[String], search_path: Option<&OsStr>) -> Vec<String> {
    required_tools
        .iter()
        .filter(|tool| {
            let found = resolve_tool_in(tool, search_path);
            debug!("Dependency {}: {:?}", tool, found);
            found.is_none()
        })
        .cloned()
        .collect()
}

/// Require root and every listed tool on `PATH`.
///
/// Privilege is checked first; dependency failures list every missing tool.
pub fn check(required_tools: &[String]) -> Result<(), GandalfError> {
    if !is_elevated() {
        return Err(GandalfError::NotElevated(get_elevation_instructions()));
    }

    let search_path = env::var_os("PATH");
    let missing = missing_tools(required_tools, search_path.as_deref());
    if !missing.is_empty() {
        return Err(GandalfError::MissingDependencies(missing));
    }

    info!("Preflight passed ({} dependencies present)", required_tools.len());
    Ok(())
}
