// ABOUTME: Atomic snapshot save and load for resumable agent and team state.
// ABOUTME: Writes snapshots with atomic rename for crash safety and loads the latest by sequence.

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur during snapshot operations.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// One persisted snapshot: the opaque state exported by an agent's or team's
/// `save_state`, plus a sequence number for ordering saves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotData {
    pub state: serde_json::Value,
    pub seq: u64,
    pub saved_at: DateTime<Utc>,
}

impl SnapshotData {
    pub fn new(state: serde_json::Value, seq: u64) -> Self {
        Self {
            state,
            seq,
            saved_at: Utc::now(),
        }
    }
}

/// Save a snapshot to disk using atomic write (write to .tmp, fsync, rename).
/// Creates the target directory if it does not exist.
pub fn save_snapshot(dir: &Path, data: &SnapshotData) -> Result<(), SnapshotError> {
    fs::create_dir_all(dir)?;

    let tmp_path = dir.join(format!("state_{}.tmp", data.seq));
    let final_path = dir.join(format!("state_{}.json", data.seq));

    let json = serde_json::to_string_pretty(data)?;

    let mut file = File::create(&tmp_path)?;
    file.write_all(json.as_bytes())?;
    file.sync_all()?;
    drop(file);

    fs::rename(&tmp_path, &final_path)?;

    Ok(())
}

/// Load the snapshot with the highest sequence number from the given
/// directory. Returns None if the directory is empty or does not exist.
pub fn load_latest_snapshot(dir: &Path) -> Result<Option<SnapshotData>, SnapshotError> {
    if !dir.exists() {
        return Ok(None);
    }

    let mut best: Option<(u64, std::path::PathBuf)> = None;

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let name_str = name.to_string_lossy();

        // Match pattern: state_<seq>.json
        if let Some(rest) = name_str.strip_prefix("state_")
            && let Some(seq_str) = rest.strip_suffix(".json")
            && let Ok(seq) = seq_str.parse::<u64>()
        {
            match &best {
                Some((current_best, _)) if seq > *current_best => {
                    best = Some((seq, entry.path()));
                }
                None => {
                    best = Some((seq, entry.path()));
                }
                _ => {}
            }
        }
    }

    match best {
        Some((_, path)) => {
            let contents = fs::read_to_string(&path)?;
            let data: SnapshotData = serde_json::from_str(&contents)?;
            Ok(Some(data))
        }
        None => Ok(None),
    }
}
