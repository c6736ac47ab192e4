use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use flate2::write::GzEncoder;
use flate2::Compression;
use log::{debug, info, warn};

use crate::constants::{ARCHIVE_EXTENSION, PARTIAL_SUFFIX};

/// Path of the container produced for `hostname` under `output_dir`.
pub fn archive_path(output_dir: &Path, hostname: &str) -> PathBuf {
    output_dir.join(format!("{}.{}", hostname, ARCHIVE_EXTENSION))
}

/// Package an acquisition directory into `<output_dir>/<hostname>.tar.gz`.
///
/// Entries are stored under a top-level `<hostname>/` directory so the
/// archive extracts to the same layout the acquisition had on disk. The
/// container is written to a `.partial` sibling and renamed once complete;
/// on any failure the partial file is removed and `source_dir` is left alone.
pub fn archive(source_dir: &Path, output_dir: &Path, hostname: &str) -> Result<PathBuf> {
    let start = Instant::now();

    if !source_dir.is_dir() {
        return Err(anyhow!("Acquisition directory {} does not exist", source_dir.display()));
    }

    fs::create_dir_all(output_dir)
        .context(format!("Failed to create output directory {}", output_dir.display()))?;

    let final_path = archive_path(output_dir, hostname);
    let partial_path = PathBuf::from(format!("{}.{}", final_path.display(), PARTIAL_SUFFIX));

    info!("Packaging {} into {}", source_dir.display(), final_path.display());

    match write_tar_gz(source_dir, &partial_path, hostname) {
        Ok(()) => {
            fs::rename(&partial_path, &final_path).context(format!(
                "Failed to move {} into place",
                partial_path.display()
            ))?;
            debug!("Archive finalized in {:?}", start.elapsed());
            Ok(final_path)
        }
        Err(e) => {
            if partial_path.exists() {
                if let Err(rm) = fs::remove_file(&partial_path) {
                    warn!("Failed to remove partial archive {}: {}", partial_path.display(), rm);
                }
            }
            Err(e)
        }
    }
}

fn write_tar_gz(source_dir: &Path, destination: &Path, root_name: &str) -> Result<()> {
    let file = File::create(destination)
        .context(format!("Failed to create archive file {}", destination.display()))?;

    let encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
    let mut builder = tar::Builder::new(encoder);
    builder.follow_symlinks(false);

    builder
        .append_dir_all(root_name, source_dir)
        .context(format!("Failed to add {} to archive", source_dir.display()))?;

    let encoder = builder.into_inner().context("Failed to finish tar stream")?;
    let mut writer = encoder.finish().context("Failed to finish gzip stream")?;
    writer.flush().context("Failed to flush archive")?;

    let file = writer
        .into_inner()
        .map_err(|e| anyhow!("Failed to flush archive buffer: {}", e.error()))?;
    file.sync_all().context("Failed to sync archive to disk")?;

    Ok(())
}
