//! Execution Persistence
//!
//! Saves the execution snapshot after every change so an interrupted run
//! can be resumed from its last recorded state.
//!
//! Executions are stored as `<state_dir>/<flow_id>.execution.json`. A
//! snapshot is written to a `.tmp` sibling first and renamed over the
//! target, so a crash mid-write leaves the previous snapshot intact.

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};

use crate::error::StoreError;
use crate::runtime::Execution;

/// Default directory for execution snapshots.
pub const DEFAULT_STATE_DIR: &str = ".flowrunner";

/// File-based store holding at most one unfinished execution per flow.
#[derive(Debug, Clone)]
pub struct ExecutionStore {
    dir: PathBuf,
}

impl ExecutionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns the snapshot path for a flow.
    pub fn path_for(&self, flow_id: &str) -> PathBuf {
        self.dir.join(format!("{}.execution.json", flow_id))
    }

    fn temp_path_for(&self, flow_id: &str) -> PathBuf {
        self.dir.join(format!("{}.execution.json.tmp", flow_id))
    }

    /// Saves the execution snapshot.
    pub fn save(&self, execution: &Execution) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir)?;

        let path = self.path_for(&execution.flow_id);
        let temp_path = self.temp_path_for(&execution.flow_id);
        let json = serde_json::to_string_pretty(execution)?;
        fs::write(&temp_path, json)?;
        fs::rename(&temp_path, &path)?;

        debug!("Saved execution {} to {}", execution.id, path.display());
        Ok(())
    }

    /// Loads the stored execution of a flow, if any.
    pub fn load(&self, flow_id: &str) -> Result<Option<Execution>, StoreError> {
        let path = self.path_for(flow_id);
        if !path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&path)?;
        let execution: Execution = serde_json::from_str(&content)?;

        info!(
            "Loaded execution {} from {} ({} task runs)",
            execution.id,
            path.display(),
            execution.task_runs.len()
        );
        Ok(Some(execution))
    }

    /// Moves an unreadable snapshot aside to `<file>.corrupt` so a new
    /// execution can be stored. Returns the new location.
    pub fn set_aside(&self, flow_id: &str) -> Result<PathBuf, StoreError> {
        let path = self.path_for(flow_id);
        let corrupt = self.dir.join(format!("{}.execution.json.corrupt", flow_id));
        fs::rename(&path, &corrupt)?;
        warn!("Moved unreadable execution file to {}", corrupt.display());
        Ok(corrupt)
    }

    /// Deletes the stored execution of a flow.
    pub fn delete(&self, flow_id: &str) -> Result<(), StoreError> {
        for path in [self.path_for(flow_id), self.temp_path_for(flow_id)] {
            if path.exists() {
                fs::remove_file(&path)?;
                info!("Deleted execution file: {}", path.display());
            }
        }
        Ok(())
    }
}

impl Default for ExecutionStore {
    fn default() -> Self {
        Self::new(DEFAULT_STATE_DIR)
    }
}
