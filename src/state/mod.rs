//! Durable storage of the download log
//!
//! [`StateStore`] is the only writer of the log file. Every write goes to a
//! temporary file in the same directory which is then renamed over the
//! previous log, so a crash mid-write leaves the last committed log intact.
//! The first write of a store instance snapshots the existing log to a `.bak`
//! sibling.


use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::config::HarvestConfig;
use crate::error::{Error, Result};
use crate::types::LogState;

/// What [`StateStore::load`] found on disk
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LoadStatus {
    /// No log file existed
    Fresh,
    /// The log was read successfully
    Restored {
        /// Number of records in the log
        records: usize,
    },
    /// The log could not be parsed; an empty state is used instead
    Corrupt(String),
}

/// Why a checkpoint is requested
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CheckpointMode {
    /// Natural save point; writes only on the configured cadence
    Regular,
    /// Write unconditionally
    Forced,
    /// End of run; write unconditionally
    Final,
}

/// Owner of the persisted [`LogState`]
#[derive(Debug)]
pub struct StateStore {
    path: PathBuf,
    backup_path: PathBuf,
    interval: usize,
    read_only: bool,
    backed_up: bool,
    last_regular_count: Option<usize>,
    writes: usize,
}

impl StateStore {
    /// Create a store writing to `path`, backing up to `backup_path`
    pub fn new(path: impl Into<PathBuf>, backup_path: impl Into<PathBuf>, interval: usize) -> Self {
        Self {
            path: path.into(),
            backup_path: backup_path.into(),
            interval: interval.max(1),
            read_only: false,
            backed_up: false,
            last_regular_count: None,
            writes: 0,
        }
    }

    /// Create the store described by `config`; dry runs get a read-only store
    pub fn from_config(config: &HarvestConfig) -> Self {
        let store = Self::new(
            config.persistence.log_file.clone(),
            config.backup_file(),
            config.persistence.checkpoint_interval,
        );
        if config.download.dry_run {
            store.read_only()
        } else {
            store
        }
    }

    /// Never touch the disk; checkpoints become no-ops
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// Path of the log file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of the pre-run snapshot
    pub fn backup_path(&self) -> &Path {
        &self.backup_path
    }

    /// Number of log writes made by this store
    pub fn write_count(&self) -> usize {
        self.writes
    }

    /// Read the persisted log
    ///
    /// A missing file yields an empty state. A file that cannot be parsed
    /// also yields an empty state, flagged as [`LoadStatus::Corrupt`]. Only
    /// I/O failures other than "not found" are returned as errors.
    pub async fn load(&self) -> Result<(LogState, LoadStatus)> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no download log yet, starting fresh");
                return Ok((LogState::default(), LoadStatus::Fresh));
            }
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_str::<LogState>(&contents) {
            Ok(mut state) => {
                let recorded = state.last_successful_id;
                state.refresh_last_successful_id();
                if recorded != state.last_successful_id {
                    warn!(
                        recorded = ?recorded,
                        derived = ?state.last_successful_id,
                        "last_successful_id did not match downloaded records, using derived value"
                    );
                }
                let records = state.messages.len();
                info!(
                    path = %self.path.display(),
                    records,
                    downloaded = state.downloaded_count(),
                    "loaded download log"
                );
                Ok((state, LoadStatus::Restored { records }))
            }
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "download log is corrupt, starting with empty state"
                );
                Ok((LogState::default(), LoadStatus::Corrupt(e.to_string())))
            }
        }
    }

    /// Persist `state` if `mode` calls for it; returns whether a write happened
    ///
    /// `last_successful_id` is re-derived before every decision. Regular
    /// checkpoints write when the downloaded count is a positive multiple of
    /// the interval that has not been written yet.
    pub async fn checkpoint(&mut self, state: &mut LogState, mode: CheckpointMode) -> Result<bool> {
        state.refresh_last_successful_id();
        let downloaded = state.downloaded_count();

        let due = match mode {
            CheckpointMode::Forced | CheckpointMode::Final => true,
            CheckpointMode::Regular => {
                downloaded > 0
                    && downloaded % self.interval == 0
                    && self.last_regular_count != Some(downloaded)
            }
        };
        if !due {
            return Ok(false);
        }
        if mode == CheckpointMode::Regular {
            self.last_regular_count = Some(downloaded);
        }
        if self.read_only {
            debug!(?mode, "read-only store, checkpoint skipped");
            return Ok(false);
        }

        self.backup_once().await?;
        let json = serde_json::to_string_pretty(state)?;
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_atomic(&path, json.as_bytes()))
            .await
            .map_err(|e| Error::Other(format!("checkpoint task failed: {e}")))??;
        self.writes += 1;

        debug!(
            path = %self.path.display(),
            ?mode,
            records = state.messages.len(),
            downloaded,
            "checkpoint written"
        );
        Ok(true)
    }

    /// Copy the existing log to the backup path, once per store
    async fn backup_once(&mut self) -> Result<()> {
        if self.backed_up {
            return Ok(());
        }
        match tokio::fs::copy(&self.path, &self.backup_path).await {
            Ok(bytes) => {
                info!(backup = %self.backup_path.display(), bytes, "backed up download log");
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        self.backed_up = true;
        Ok(())
    }
}

/// Replace `path` with `contents` via a synced temp file in the same directory
fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent)?;

    let mut temp_file = tempfile::NamedTempFile::new_in(parent)?;
    temp_file.write_all(contents)?;
    temp_file.flush()?;
    temp_file.as_file().sync_all()?;
    temp_file.persist(path).map_err(|e| Error::Io(e.error))?;

    // Make the rename durable
    if let Ok(dir) = std::fs::File::open(parent) {
        let _ = dir.sync_all();
    }
    Ok(())
}
