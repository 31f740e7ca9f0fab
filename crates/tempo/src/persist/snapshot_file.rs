use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::time::ClockSnapshot;

use super::atomic_io::write_atomic;

pub const SAVE_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("failed to read clock snapshot '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to write clock snapshot '{path}': {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to encode clock snapshot: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("failed to parse clock snapshot at {json_path}: {source}")]
    Parse {
        json_path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("unsupported save_version: expected {expected}, got {actual}")]
    Version { expected: u32, actual: u32 },
}

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotDocument {
    save_version: u32,
    clock: ClockSnapshot,
}

pub fn save_clock_snapshot(path: &Path, snapshot: &ClockSnapshot) -> Result<(), PersistError> {
    let document = SnapshotDocument {
        save_version: SAVE_VERSION,
        clock: *snapshot,
    };
    let json = serde_json::to_string_pretty(&document).map_err(PersistError::Encode)?;
    write_atomic(path, json.as_bytes()).map_err(|source| PersistError::Write {
        path: path.to_path_buf(),
        source,
    })?;

    info!(
        path = %path.display(),
        saved_at_ticks = snapshot.saved_at_ticks,
        "clock_snapshot_saved"
    );
    Ok(())
}

pub fn load_clock_snapshot(path: &Path) -> Result<ClockSnapshot, PersistError> {
    let raw = fs::read_to_string(path).map_err(|source| PersistError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let snapshot = parse_clock_snapshot(&raw)?;
    info!(path = %path.display(), "clock_snapshot_loaded");
    Ok(snapshot)
}

/// Like [`load_clock_snapshot`], but a missing file is `Ok(None)`.
pub fn try_load_clock_snapshot(path: &Path) -> Result<Option<ClockSnapshot>, PersistError> {
    match load_clock_snapshot(path) {
        Ok(snapshot) => Ok(Some(snapshot)),
        Err(PersistError::Read { source, .. }) if source.kind() == io::ErrorKind::NotFound => {
            Ok(None)
        }
        Err(error) => Err(error),
    }
}

fn parse_clock_snapshot(raw: &str) -> Result<ClockSnapshot, PersistError> {
    let mut deserializer = serde_json::Deserializer::from_str(raw);
    let document: SnapshotDocument = serde_path_to_error::deserialize(&mut deserializer)
        .map_err(|error| {
            let json_path = error.path().to_string();
            PersistError::Parse {
                json_path,
                source: error.into_inner(),
            }
        })?;

    if document.save_version != SAVE_VERSION {
        return Err(PersistError::Version {
            expected: SAVE_VERSION,
            actual: document.save_version,
        });
    }
    Ok(document.clock)
}
