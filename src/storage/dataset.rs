//! Per-day dataset files

use chrono::NaiveDate;
use std::fs;
use std::path::{Path, PathBuf};

use super::{read_json, write_json_atomic};
use crate::models::DailyDataset;
use crate::utils::error::PersistError;

/// One `YYYY-MM-DD.json` file per logical day
#[derive(Debug, Clone)]
pub struct DatasetStore {
    dir: PathBuf,
}

impl DatasetStore {
    /// Open `dir` for writing, creating it if needed
    pub fn new(dir: &Path) -> Result<Self, PersistError> {
        fs::create_dir_all(dir).map_err(|e| PersistError::io(dir, e))?;
        Ok(Self::open(dir))
    }

    /// Open `dir` for reading only; a missing directory reads as empty
    pub fn open(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
        }
    }

    pub fn path_for(&self, date: NaiveDate) -> PathBuf {
        self.dir.join(format!("{}.json", date.format("%Y-%m-%d")))
    }

    /// Load the dataset for `date`, or an empty one if none exists yet
    pub fn load_or_new(&self, date: NaiveDate) -> Result<DailyDataset, PersistError> {
        Ok(self
            .load(date)?
            .unwrap_or_else(|| DailyDataset::new(date)))
    }

    pub fn load(&self, date: NaiveDate) -> Result<Option<DailyDataset>, PersistError> {
        read_json(&self.path_for(date))
    }

    /// Replace the stored dataset for its day
    pub fn save(&self, dataset: &DailyDataset) -> Result<PathBuf, PersistError> {
        let path = self.path_for(dataset.date);
        write_json_atomic(&path, dataset)?;
        Ok(path)
    }

    /// Days with a stored dataset, oldest first
    pub fn list_dates(&self) -> Result<Vec<NaiveDate>, PersistError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(PersistError::io(&self.dir, e)),
        };

        let mut dates: Vec<NaiveDate> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let name = entry.file_name();
                let stem = name.to_str()?.strip_suffix(".json")?.to_string();
                NaiveDate::parse_from_str(&stem, "%Y-%m-%d").ok()
            })
            .collect();
        dates.sort();
        Ok(dates)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}
