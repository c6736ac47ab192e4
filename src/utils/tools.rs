//! External program lookup.
//!
//! Volatile capture, memory acquisition and the preflight check all follow
//! the same pattern: resolve the program first, then either run it or report
//! it as absent. Nothing shells out to `which`.

use std::env;
use std::ffi::OsStr;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

/// Resolve `program` against an explicit search path.
///
/// Names containing a `/` are checked directly and never searched.
pub fn resolve_tool_in(program: &str, search_path: Option<&OsStr>) -> Option<PathBuf> {
    if program.is_empty() {
        return None;
    }
    if program.contains('/') {
        let path = PathBuf::from(program);
        return is_executable(&path).then_some(path);
    }

    let search_path = search_path?;
    env::split_paths(search_path)
        .filter(|dir| !dir.as_os_str().is_empty())
        .map(|dir| dir.join(program))
        .find(|candidate| is_executable(candidate))
}

fn is_executable(path: &Path) -> bool {
    fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsString;
    use tempfile::TempDir;

    fn make_tool(dir: &Path, name: &str, mode: u32) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, "#!/bin/sh\n").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(mode)).unwrap();
        path
    }

    #[test]
    fn test_resolves_first_match_in_order() {
        let first = TempDir::new().unwrap();
        let second = TempDir::new().unwrap();
        make_tool(second.path(), "ss", 0o755);
        let expected = make_tool(first.path(), "ss", 0o755);

        let search = env::join_paths([first.path(), second.path()]).unwrap();
        assert_eq!(resolve_tool_in("ss", Some(&search)), Some(expected));
    }

    #[test]
    fn test_non_executable_is_ignored() {
        let dir = TempDir::new().unwrap();
        make_tool(dir.path(), "lsmod", 0o644);
        let search = OsString::from(dir.path());
        assert_eq!(resolve_tool_in("lsmod", Some(&search)), None);
    }

    #[test]
    fn test_explicit_path_is_not_searched() {
        let dir = TempDir::new().unwrap();
        let tool = make_tool(dir.path(), "avml", 0o700);
        let program = tool.to_string_lossy().into_owned();
        assert_eq!(resolve_tool_in(&program, None), Some(tool));
        assert_eq!(resolve_tool_in("/nonexistent/avml", None), None);
    }

    #[test]
    fn test_missing_path_variable() {
        assert_eq!(resolve_tool_in("uname", None), None);
        assert_eq!(resolve_tool_in("", Some(OsStr::new("/bin"))), None);
    }
}
