//! Durable storage for datasets and run state
//!
//! Everything is plain JSON on the local filesystem. Writes go to a temp file
//! in the same directory and are renamed into place, so a crash never leaves
//! a half-written file behind.

pub mod dataset;
pub mod state;

pub use dataset::DatasetStore;
pub use state::StateStore;

use serde::{de::DeserializeOwned, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use crate::utils::error::PersistError;

/// Serialize `value` to `path` atomically (temp file + rename)
pub(crate) fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), PersistError> {
    let temp_path = path.with_extension("json.tmp");

    let file = File::create(&temp_path).map_err(|e| PersistError::io(&temp_path, e))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, value).map_err(|e| PersistError::json(path, e))?;
    writer.flush().map_err(|e| PersistError::io(&temp_path, e))?;
    drop(writer);

    fs::rename(&temp_path, path).map_err(|e| PersistError::io(path, e))?;
    tracing::debug!(path = %path.display(), "State written");
    Ok(())
}

/// Read JSON from `path`; `None` if the file does not exist
pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, PersistError> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(PersistError::io(path, e)),
    };

    let value = serde_json::from_reader(BufReader::new(file))
        .map_err(|e| PersistError::json(path, e))?;
    Ok(Some(value))
}
