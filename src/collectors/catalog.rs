//! Declarative table of well-known Linux artifact locations.
//!
//! Every source path is absolute as it appears on a live system and is
//! resolved under [`GandalfConfig::fs_root`] before use, so the same tables
//! drive collection from `/` or from a mounted image.
//!
//! Destinations, relative to `artefacts/`:
//!
//! ```text
//! conf/<flattened path>            single configuration files
//! logs/  cron/<dir>/  conf/<dir>/  directory trees
//! user/<user>/                     shell history, profiles, ssh/
//! browsers/<browser>/<user>/       browser databases
//! files/<flattened path>           operator-declared list (-c)
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};

use crate::collectors::collector::Collector;
use crate::collectors::traversal::{flatten, walk};
use crate::config::GandalfConfig;
use crate::error::CollectError;
use crate::models::{ArtifactSpec, CollectionKind};

/// Identity, credential, boot, scheduling and service configuration.
pub const CONFIG_FILES: &[ArtifactSpec] = &[
    ArtifactSpec::file("/etc/passwd", "etc+passwd"),
    ArtifactSpec::file("/etc/shadow", "etc+shadow"),
    ArtifactSpec::file("/etc/group", "etc+group"),
    ArtifactSpec::file("/etc/gshadow", "etc+gshadow"),
    ArtifactSpec::file("/etc/sudoers", "etc+sudoers"),
    ArtifactSpec::file("/etc/hosts", "etc+hosts"),
    ArtifactSpec::file("/etc/hostname", "etc+hostname"),
    ArtifactSpec::file("/etc/resolv.conf", "etc+resolv.conf"),
    ArtifactSpec::file("/etc/fstab", "etc+fstab"),
    ArtifactSpec::file("/etc/os-release", "etc+os-release"),
    ArtifactSpec::file("/etc/timezone", "etc+timezone"),
    ArtifactSpec::file("/etc/rc.local", "etc+rc.local"),
    ArtifactSpec::file("/etc/ld.so.preload", "etc+ld.so.preload"),
    ArtifactSpec::file("/etc/crontab", "etc+crontab"),
    ArtifactSpec::file("/etc/anacrontab", "etc+anacrontab"),
    ArtifactSpec::file("/etc/ssh/sshd_config", "etc+ssh+sshd_config"),
    ArtifactSpec::file("/etc/ssh/ssh_config", "etc+ssh+ssh_config"),
    ArtifactSpec::file("/boot/grub/grub.cfg", "boot+grub+grub.cfg"),
    ArtifactSpec::file("/boot/grub2/grub.cfg", "boot+grub2+grub.cfg"),
];

/// Logs, scheduled jobs and service-manager configuration.
pub const DIRECTORY_TREES: &[ArtifactSpec] = &[
    ArtifactSpec::tree("/var/log", "logs"),
    ArtifactSpec::tree("/etc/cron.d", "cron/cron.d"),
    ArtifactSpec::tree("/etc/cron.hourly", "cron/cron.hourly"),
    ArtifactSpec::tree("/etc/cron.daily", "cron/cron.daily"),
    ArtifactSpec::tree("/etc/cron.weekly", "cron/cron.weekly"),
    ArtifactSpec::tree("/etc/cron.monthly", "cron/cron.monthly"),
    ArtifactSpec::tree("/var/spool/cron", "cron/spool"),
    ArtifactSpec::tree("/etc/systemd/system", "conf/systemd"),
    ArtifactSpec::tree("/etc/init.d", "conf/init.d"),
];

/// Per-user files, relative to the home directory.
pub const USER_FILES: &[ArtifactSpec] = &[
    ArtifactSpec::file(".bash_history", "bash_history"),
    ArtifactSpec::file(".zsh_history", "zsh_history"),
    ArtifactSpec::file(".sh_history", "sh_history"),
    ArtifactSpec::file(".python_history", "python_history"),
    ArtifactSpec::file(".mysql_history", "mysql_history"),
    ArtifactSpec::file(".lesshst", "lesshst"),
    ArtifactSpec::file(".viminfo", "viminfo"),
    ArtifactSpec::file(".bashrc", "bashrc"),
    ArtifactSpec::file(".bash_profile", "bash_profile"),
    ArtifactSpec::file(".bash_logout", "bash_logout"),
    ArtifactSpec::file(".profile", "profile"),
    ArtifactSpec::file(".zshrc", "zshrc"),
    // depth comes from ssh_max_depth
    ArtifactSpec::tree(".ssh", "ssh"),
];

/// Chromium-family profile directories: (browser, path relative to home).
pub const CHROMIUM_PROFILES: &[(&str, &str)] = &[
    ("chrome", ".config/google-chrome/Default"),
    ("chromium", ".config/chromium/Default"),
    ("brave", ".config/BraveSoftware/Brave-Browser/Default"),
    ("edge", ".config/microsoft-edge/Default"),
    ("opera", ".config/opera"),
    ("vivaldi", ".config/vivaldi/Default"),
];

/// Files collected from every Chromium-family profile.
pub const CHROMIUM_FILES: &[&str] = &[
    "History",
    "Bookmarks",
    "Preferences",
    "Cookies",
    "Web Data",
    "Login Data",
    "Top Sites",
    "Shortcuts",
    "Visited Links",
];

/// Files collected from every Firefox profile.
pub const FIREFOX_FILES: &[&str] = &[
    "places.sqlite",
    "cookies.sqlite",
    "formhistory.sqlite",
    "downloads.sqlite",
    "prefs.js",
    "extensions.json",
    "sessionstore.jsonlz4",
];

const FIREFOX_ROOT: &str = ".mozilla/firefox";

/// A user home found under the filesystem root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Home {
    pub user: String,
    pub path: PathBuf,
}

/// Home directories under `<fs_root>/home/*` plus `<fs_root>/root`, sorted
/// by user name.
pub fn enumerate_homes(fs_root: &Path) -> Vec<Home> {
    let mut homes: Vec<Home> = sorted_subdirs(&fs_root.join("home"))
        .into_iter()
        .filter_map(|path| {
            let user = path.file_name()?.to_string_lossy().into_owned();
            Some(Home { user, path })
        })
        .collect();

    let root_home = fs_root.join("root");
    if root_home.is_dir() {
        homes.push(Home { user: "root".to_string(), path: root_home });
    }

    homes.sort_by(|a, b| a.user.cmp(&b.user));
    homes.dedup_by(|a, b| a.user == b.user);
    homes
}

/// Firefox profile directories (`<name>.<profile>`) under a home, sorted.
pub fn firefox_profiles(home: &Path) -> Vec<PathBuf> {
    sorted_subdirs(&home.join(FIREFOX_ROOT))
        .into_iter()
        .filter(|p| {
            p.file_name()
                .map(|n| n.to_string_lossy().contains('.'))
                .unwrap_or(false)
        })
        .collect()
}

fn sorted_subdirs(dir: &Path) -> Vec<PathBuf> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            debug!("Cannot list {}: {}", dir.display(), e);
            return Vec::new();
        }
    };

    let mut dirs: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect();
    dirs.sort();
    dirs
}

/// Collect one catalog entry; returns the number of files recorded.
fn collect_spec(collector: &Collector, spec: &ArtifactSpec, source: &Path, dest: &Path, default_depth: usize) -> usize {
    match spec.kind {
        CollectionKind::SingleFile => collect_one(collector, source, dest),
        CollectionKind::DirectoryTree { max_depth } => {
            walk(collector, source, dest, max_depth.unwrap_or(default_depth))
        }
    }
}

fn collect_one(collector: &Collector, source: &Path, dest: &Path) -> usize {
    match collector.collect(source, dest) {
        Ok(_) => 1,
        Err(e) if e.is_not_found() => {
            debug!("{}", e);
            0
        }
        Err(CollectError::Cancelled) => 0,
        Err(e) => {
            warn!("{}", e);
            0
        }
    }
}

/// System configuration files and directory trees.
pub fn collect_filesystem(collector: &Collector, config: &GandalfConfig) -> usize {
    let artefacts = collector.artefacts_dir();
    let mut count = 0;

    for spec in CONFIG_FILES {
        let dest = artefacts.join("conf").join(spec.destination);
        count += collect_spec(collector, spec, &config.resolve(spec.source_path), &dest, config.max_depth);
    }
    for spec in DIRECTORY_TREES {
        let dest = artefacts.join(spec.destination);
        count += collect_spec(collector, spec, &config.resolve(spec.source_path), &dest, config.max_depth);
    }

    info!("Filesystem artifacts: {} collected", count);
    count
}

/// Shell history, profiles and the SSH directory of every user.
pub fn collect_users(collector: &Collector, config: &GandalfConfig) -> usize {
    let artefacts = collector.artefacts_dir();
    let mut count = 0;

    for home in enumerate_homes(&config.fs_root) {
        let dest_root = artefacts.join("user").join(&home.user);
        for spec in USER_FILES {
            if collector.is_cancelled() {
                return count;
            }
            let source = home.path.join(spec.source_path);
            let dest = dest_root.join(spec.destination);
            count += collect_spec(collector, spec, &source, &dest, config.ssh_max_depth);
        }
    }

    info!("User artifacts: {} collected", count);
    count
}

/// Chromium-family and Firefox databases of every user.
pub fn collect_browsers(collector: &Collector, config: &GandalfConfig) -> usize {
    let browsers = collector.artefacts_dir().join("browsers");
    let mut count = 0;

    for home in enumerate_homes(&config.fs_root) {
        for (browser, profile) in CHROMIUM_PROFILES {
            let profile_dir = home.path.join(profile);
            if !profile_dir.is_dir() {
                continue;
            }
            let dest = browsers.join(browser).join(&home.user);
            for file in CHROMIUM_FILES {
                count += collect_one(collector, &profile_dir.join(file), &dest.join(file));
            }
        }

        for profile_dir in firefox_profiles(&home.path) {
            let profile_name = match profile_dir.file_name() {
                Some(name) => name.to_os_string(),
                None => continue,
            };
            let dest = browsers.join("firefox").join(&home.user).join(profile_name);
            for file in FIREFOX_FILES {
                count += collect_one(collector, &profile_dir.join(file), &dest.join(file));
            }
        }
    }

    info!("Browser artifacts: {} collected", count);
    count
}

/// Operator-declared files and directories (`-c`).
pub fn collect_declared_files(collector: &Collector, config: &GandalfConfig) -> usize {
    let files = collector.artefacts_dir().join("files");
    let mut count = 0;

    for declared in config.declared_files() {
        let source = config.resolve(&declared);
        let dest = files.join(flatten(&declared));
        count += if source.is_dir() {
            walk(collector, &source, &dest, config.max_depth)
        } else {
            collect_one(collector, &source, &dest)
        };
    }

    info!("Declared files: {} collected", count);
    count
}

/// Run the filesystem, user and browser categories concurrently.
///
/// They write disjoint subtrees and share only the ledger channel.
pub fn collect_all(collector: &Collector, config: &GandalfConfig) -> usize {
    let (mut filesystem, mut users, mut browsers) = (0, 0, 0);

    rayon::scope(|s| {
        s.spawn(|_| filesystem = collect_filesystem(collector, config));
        s.spawn(|_| users = collect_users(collector, config));
        s.spawn(|_| browsers = collect_browsers(collector, config));
    });

    filesystem + users + browsers
}
