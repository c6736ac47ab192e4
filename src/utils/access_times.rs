//! Source-side MAC time capture for `-a`.
//!
//! Copying a file reads it, which can move its access time. The collector
//! therefore snapshots each source's timestamps *before* copying, and the
//! snapshot is written out as a Sleuthkit 3.x bodyfile once collection ends.

use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::Path;
use std::sync::Mutex;

use bodyfile::Bodyfile3Line;
use log::debug;

/// Bodyfile header written at the top of `access.times`
pub const BODYFILE_HEADER: &str = "# MD5|name|inode|mode_as_string|UID|GID|size|atime|mtime|ctime|crtime";

/// Thread-safe accumulator of bodyfile lines.
#[derive(Debug, Default)]
pub struct AccessTimes {
    lines: Mutex<Vec<String>>,
}

impl AccessTimes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the source's current timestamps. Unreadable metadata is skipped.
    pub fn snapshot(&self, source: &Path, metadata: &fs::Metadata) {
        if let Some(line) = bodyfile_line(source, metadata) {
            if let Ok(mut lines) = self.lines.lock() {
                lines.push(line);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.lines.lock().map(|l| l.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Render the bodyfile, sorted by path for a reproducible artifact.
    pub fn render(&self) -> String {
        let mut lines = self.lines.lock().map(|l| l.clone()).unwrap_or_default();
        lines.sort_by(|a, b| name_field(a).cmp(name_field(b)));

        let mut out = String::from(BODYFILE_HEADER);
        out.push('\n');
        for line in lines {
            out.push_str(&line);
            out.push('\n');
        }
        out
    }
}

fn name_field(line: &str) -> &str {
    line.split('|').nth(1).unwrap_or("")
}

fn bodyfile_line(path: &Path, metadata: &fs::Metadata) -> Option<String> {
    // `|` would corrupt the column layout
    let name = path.to_string_lossy().replace('|', "\\|");

    let line = format!(
        "0|{}|{}|{}|{}|{}|{}|{}|{}|{}|{}",
        name,
        metadata.ino(),
        mode_string(metadata),
        metadata.uid(),
        metadata.gid(),
        metadata.len(),
        metadata.atime().max(0),
        metadata.mtime().max(0),
        metadata.ctime().max(0),
        crtime(metadata),
    );

    match Bodyfile3Line::try_from(line.as_str()) {
        Ok(_) => Some(line),
        Err(e) => {
            debug!("Skipping bodyfile line for {}: {}", path.display(), e);
            None
        }
    }
}

fn crtime(metadata: &fs::Metadata) -> u64 {
    metadata
        .created()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Mode in `ls` notation prefixed with the type, e.g. `r/rrw-r--r--`.
fn mode_string(metadata: &fs::Metadata) -> String {
    let mode = metadata.mode();
    let kind = if metadata.is_dir() {
        "d/d"
    } else if metadata.file_type().is_symlink() {
        "l/l"
    } else {
        "r/r"
    };

    let bits = [
        (0o400, 'r'), (0o200, 'w'), (0o100, 'x'),
        (0o040, 'r'), (0o020, 'w'), (0o010, 'x'),
        (0o004, 'r'), (0o002, 'w'), (0o001, 'x'),
    ];
    let perms: String = bits
        .iter()
        .map(|(mask, c)| if mode & mask != 0 { *c } else { '-' })
        .collect();

    format!("{}{}", kind, perms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use filetime::{set_file_times, FileTime};
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    #[test]
    fn test_snapshot_records_source_times() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("passwd");
        fs::write(&path, b"root:x:0:0").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).unwrap();
        set_file_times(&path, FileTime::from_unix_time(1_600_000_000, 0), FileTime::from_unix_time(1_500_000_000, 0)).unwrap();

        let times = AccessTimes::new();
        times.snapshot(&path, &fs::metadata(&path).unwrap());
        assert_eq!(times.len(), 1);

        let rendered = times.render();
        let mut lines = rendered.lines();
        assert_eq!(lines.next(), Some(BODYFILE_HEADER));

        let fields: Vec<&str> = lines.next().unwrap().split('|').collect();
        assert_eq!(fields.len(), 11);
        assert_eq!(fields[1], path.to_string_lossy());
        assert_eq!(fields[3], "r/rrw-r--r--");
        assert_eq!(fields[6], "10");
        assert_eq!(fields[7], "1600000000");
        assert_eq!(fields[8], "1500000000");
    }

    #[test]
    fn test_render_sorted_by_name() {
        let dir = TempDir::new().unwrap();
        let times = AccessTimes::new();
        for name in ["zeta", "alpha", "mid"] {
            let path = dir.path().join(name);
            fs::write(&path, name).unwrap();
            times.snapshot(&path, &fs::metadata(&path).unwrap());
        }

        let rendered = times.render();
        let names: Vec<String> = rendered
            .lines()
            .skip(1)
            .map(|l| name_field(l).rsplit('/').next().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["alpha", "mid", "zeta"]);
    }

    #[test]
    fn test_empty_render_has_header_only() {
        let times = AccessTimes::new();
        assert!(times.is_empty());
        assert_eq!(times.render(), format!("{}\n", BODYFILE_HEADER));
    }
}
