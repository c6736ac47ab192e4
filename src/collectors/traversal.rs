//! Depth-bounded directory collection with flattened destination names.
//!
//! `var/log/apt/history.log` under a `logs/` destination becomes
//! `logs/apt+history.log`: one level on disk, still traceable by eye.

use std::collections::HashSet;
use std::path::{Component, Path};

use log::{debug, warn};
use walkdir::WalkDir;

use crate::collectors::collector::Collector;
use crate::constants::FLATTEN_CHAR;
use crate::error::CollectError;
use crate::utils::hash::sha256_hex;

/// Join the components of a relative path with [`FLATTEN_CHAR`].
pub fn flatten(relative: &Path) -> String {
    let separator = FLATTEN_CHAR.to_string();
    relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join(&separator)
}

/// Name used when `flatten(relative)` is already taken in the destination.
pub fn disambiguate(flat: &str, relative: &Path) -> String {
    let digest = sha256_hex(relative.to_string_lossy().as_bytes());
    format!("{}~{}", flat, &digest[..8])
}

/// Collect every regular file under `source_dir` up to `max_depth` levels
/// deep into `dest_dir`, returning how many were collected.
///
/// Symlinks are not followed and unreadable entries are skipped.
pub fn walk(collector: &Collector, source_dir: &Path, dest_dir: &Path, max_depth: usize) -> usize {
    if !source_dir.is_dir() {
        debug!("Skipping absent directory {}", source_dir.display());
        return 0;
    }

    let mut taken: HashSet<String> = HashSet::new();
    let mut count = 0;

    let walker = WalkDir::new(source_dir)
        .min_depth(1)
        .max_depth(max_depth)
        .follow_links(false)
        .sort_by_file_name();

    for entry in walker {
        if collector.is_cancelled() {
            debug!("Traversal of {} interrupted", source_dir.display());
            break;
        }

        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Skipping unreadable entry under {}: {}", source_dir.display(), e);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let relative = match entry.path().strip_prefix(source_dir) {
            Ok(rel) => rel,
            Err(_) => continue,
        };

        let mut name = flatten(relative);
        if taken.contains(&name) || dest_dir.join(&name).exists() {
            let unique = disambiguate(&name, relative);
            warn!(
                "Flattened name {} already used in {}, storing {} as {}",
                name,
                dest_dir.display(),
                relative.display(),
                unique
            );
            name = unique;
        }

        match collector.collect(entry.path(), &dest_dir.join(&name)) {
            Ok(_) => {
                taken.insert(name);
                count += 1;
            }
            Err(CollectError::Cancelled) => break,
            Err(e) => warn!("{}", e),
        }
    }

    debug!("Collected {} files from {}", count, source_dir.display());
    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{read_meta, Ledger};
    use proptest::prelude::*;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::TempDir;
    use tokio_util::sync::CancellationToken;

    fn write(root: &Path, rel: &str, contents: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    #[test]
    fn test_flatten_joins_components() {
        assert_eq!(flatten(Path::new("apt/history.log")), "apt+history.log");
        assert_eq!(flatten(Path::new("syslog")), "syslog");
        assert_eq!(flatten(Path::new("a/b/c/d")), "a+b+c+d");
    }

    #[test]
    fn test_walk_respects_depth_bound() {
        let src = TempDir::new().unwrap();
        let acq = TempDir::new().unwrap();
        write(src.path(), "d1.txt", "1");
        write(src.path(), "a/d2.txt", "2");
        write(src.path(), "a/b/d3.txt", "3");
        write(src.path(), "a/b/c/d4.txt", "4");
        write(src.path(), "a/b/c/d/d5.txt", "5");

        let ledger = Ledger::open(acq.path(), "ws1").unwrap();
        let collector = Collector::new(acq.path(), ledger.handle(), None, CancellationToken::new());
        let dest = acq.path().join("artefacts/logs");
        let count = walk(&collector, src.path(), &dest, 3);
        drop(collector);
        ledger.close().unwrap();

        assert_eq!(count, 3);
        assert!(dest.join("d1.txt").exists());
        assert!(dest.join("a+d2.txt").exists());
        assert!(dest.join("a+b+d3.txt").exists());
        assert!(!dest.join("a+b+c+d4.txt").exists());

        let meta: Vec<String> = read_meta(&acq.path().join("log.meta"))
            .unwrap()
            .into_iter()
            .map(|r| r.file_path)
            .collect();
        assert_eq!(meta.len(), 3);
        assert!(!meta.iter().any(|p| p.contains("d4") || p.contains("d5")));
    }

    #[test]
    fn test_collision_gets_hashed_suffix() {
        let src = TempDir::new().unwrap();
        let acq = TempDir::new().unwrap();
        write(src.path(), "a/b", "nested");
        write(src.path(), "a+b", "literal");

        let ledger = Ledger::open(acq.path(), "ws1").unwrap();
        let collector = Collector::new(acq.path(), ledger.handle(), None, CancellationToken::new());
        let dest = acq.path().join("artefacts/cron");
        assert_eq!(walk(&collector, src.path(), &dest, 3), 2);

        let mut names: Vec<String> = fs::read_dir(&dest)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names.len(), 2);
        assert_eq!(names[0], "a+b");
        assert!(names[1].starts_with("a+b~"));
        assert_eq!(names[1].len(), "a+b~".len() + 8);
    }

    #[test]
    fn test_absent_source_collects_nothing() {
        let acq = TempDir::new().unwrap();
        let ledger = Ledger::open(acq.path(), "ws1").unwrap();
        let collector = Collector::new(acq.path(), ledger.handle(), None, CancellationToken::new());
        let count = walk(&collector, &acq.path().join("nope"), &acq.path().join("artefacts/x"), 3);
        assert_eq!(count, 0);
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinks_are_not_followed() {
        let src = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        let acq = TempDir::new().unwrap();
        write(outside.path(), "secret", "s");
        write(src.path(), "real", "r");
        std::os::unix::fs::symlink(outside.path().join("secret"), src.path().join("link")).unwrap();

        let ledger = Ledger::open(acq.path(), "ws1").unwrap();
        let collector = Collector::new(acq.path(), ledger.handle(), None, CancellationToken::new());
        assert_eq!(walk(&collector, src.path(), &acq.path().join("artefacts/t"), 3), 1);
    }

    proptest! {
        #[test]
        fn prop_flatten_has_no_separators(parts in prop::collection::vec("[a-zA-Z0-9._-]{1,12}", 1..6)) {
            let relative: PathBuf = parts.iter().collect();
            let flat = flatten(&relative);
            prop_assert!(!flat.contains('/'));
            prop_assert_eq!(flat.split('+').count(), parts.len());
            prop_assert_eq!(flat, parts.join("+"));
        }

        #[test]
        fn prop_disambiguated_names_differ(a in "[a-z]{1,8}", b in "[a-z]{1,8}") {
            let first = PathBuf::from(format!("{}/{}", a, b));
            let second = PathBuf::from(format!("{}+{}", a, b));
            let flat = flatten(&first);
            prop_assert_eq!(&flat, &flatten(&second));
            prop_assert_ne!(disambiguate(&flat, &first), disambiguate(&flat, &second));
        }
    }
}
