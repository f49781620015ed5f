//! Run state persistence
//!
//! Small JSON documents under the state directory that must survive a
//! restart: the authentication retry counters, the challenge resume marker,
//! first-run bookkeeping and the append-only run log.

use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use serde::{de::DeserializeOwned, Serialize};

use super::{read_json, write_json_atomic};
use crate::models::{FirstRunState, PendingRun, RunRecord};
use crate::utils::error::PersistError;
use crate::utils::retry::RetryState;

const RETRY_STATE: &str = "retry_state";
const PENDING_RUN: &str = "pending_run";
const FIRST_RUN: &str = "first_run";
const RUN_LOG: &str = "run_log.jsonl";

// ============================================================================
// State Store
// ============================================================================

/// Manages the JSON documents in the state directory
#[derive(Debug, Clone)]
pub struct StateStore {
    state_dir: PathBuf,
}

impl StateStore {
    /// Create a store, creating the directory if needed
    pub fn new(state_dir: &Path) -> Result<Self, PersistError> {
        fs::create_dir_all(state_dir).map_err(|e| PersistError::io(state_dir, e))?;

        Ok(Self {
            state_dir: state_dir.to_path_buf(),
        })
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.state_dir.join(format!("{name}.json"))
    }

    /// Save a named document
    pub fn save<T: Serialize>(&self, name: &str, value: &T) -> Result<PathBuf, PersistError> {
        let path = self.path_for(name);
        write_json_atomic(&path, value)?;
        Ok(path)
    }

    /// Load a named document
    pub fn load<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>, PersistError> {
        read_json(&self.path_for(name))
    }

    /// Check if a document exists
    pub fn exists(&self, name: &str) -> bool {
        self.path_for(name).exists()
    }

    /// Delete a document; missing documents are not an error
    pub fn delete(&self, name: &str) -> Result<(), PersistError> {
        let path = self.path_for(name);
        match fs::remove_file(&path) {
            Ok(()) => {
                tracing::debug!(path = %path.display(), "State deleted");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(PersistError::io(&path, e)),
        }
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    // ------------------------------------------------------------------------
    // Typed documents
    // ------------------------------------------------------------------------

    pub fn load_retry_state(&self) -> Result<Option<RetryState>, PersistError> {
        self.load(RETRY_STATE)
    }

    pub fn save_retry_state(&self, state: &RetryState) -> Result<(), PersistError> {
        self.save(RETRY_STATE, state).map(|_| ())
    }

    pub fn load_pending_run(&self) -> Result<Option<PendingRun>, PersistError> {
        self.load(PENDING_RUN)
    }

    pub fn save_pending_run(&self, pending: &PendingRun) -> Result<(), PersistError> {
        self.save(PENDING_RUN, pending).map(|_| ())
    }

    pub fn clear_pending_run(&self) -> Result<(), PersistError> {
        self.delete(PENDING_RUN)
    }

    pub fn load_first_run(&self) -> Result<FirstRunState, PersistError> {
        Ok(self.load(FIRST_RUN)?.unwrap_or_default())
    }

    pub fn save_first_run(&self, state: &FirstRunState) -> Result<(), PersistError> {
        self.save(FIRST_RUN, state).map(|_| ())
    }

    // ------------------------------------------------------------------------
    // Run log
    // ------------------------------------------------------------------------

    /// Append one run record to the log
    pub fn append_run(&self, record: &RunRecord) -> Result<(), PersistError> {
        let path = self.state_dir.join(RUN_LOG);
        let line = serde_json::to_string(record).map_err(|e| PersistError::json(&path, e))?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| PersistError::io(&path, e))?;
        writeln!(file, "{line}").map_err(|e| PersistError::io(&path, e))?;
        Ok(())
    }

    /// Read every run record; unreadable lines are skipped
    pub fn load_runs(&self) -> Result<Vec<RunRecord>, PersistError> {
        let path = self.state_dir.join(RUN_LOG);
        let file = match fs::File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(PersistError::io(&path, e)),
        };

        let mut runs = Vec::new();
        for (index, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|e| PersistError::io(&path, e))?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(&line) {
                Ok(record) => runs.push(record),
                Err(e) => tracing::warn!(
                    line = index + 1,
                    error = %e,
                    "Skipping unreadable run log entry"
                ),
            }
        }
        Ok(runs)
    }

    /// Most recent run record
    pub fn last_run(&self) -> Result<Option<RunRecord>, PersistError> {
        Ok(self.load_runs()?.pop())
    }
}
