use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, info};

use crate::busy::BusyDaySet;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("no snapshot at {}", path.display())]
    Missing { path: PathBuf },

    #[error("failed reading snapshot {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("snapshot {} is not a flat array of YYYY-MM-DD strings", path.display())]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Writes the busy days as a pretty JSON array, replacing `path` atomically
/// so a reader never sees a half-written file.
#[tracing::instrument(skip(busy), fields(path = %path.display(), count = busy.len()))]
pub fn write_snapshot(path: &Path, busy: &BusyDaySet) -> anyhow::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;

    let payload = busy.to_json_pretty()?;
    let mut temp = NamedTempFile::new_in(dir)
        .with_context(|| format!("failed to create temp file in {}", dir.display()))?;
    temp.write_all(payload.as_bytes())?;
    writeln!(temp)?;
    temp.flush()?;

    temp.persist(path)
        .map_err(|err| anyhow!("failed to persist {}: {}", path.display(), err))?;

    info!(count = busy.len(), "wrote busy-day snapshot");
    Ok(())
}

#[tracing::instrument(fields(path = %path.display()))]
pub fn read_snapshot(path: &Path) -> Result<BusyDaySet, SnapshotError> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            return Err(SnapshotError::Missing {
                path: path.to_path_buf(),
            });
        }
        Err(source) => {
            return Err(SnapshotError::Io {
                path: path.to_path_buf(),
                source,
            });
        }
    };

    let busy: BusyDaySet =
        serde_json::from_str(&raw).map_err(|source| SnapshotError::Malformed {
            path: path.to_path_buf(),
            source,
        })?;

    debug!(count = busy.len(), "loaded busy-day snapshot");
    Ok(busy)
}
