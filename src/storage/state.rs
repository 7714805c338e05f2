use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;

use tempfile::NamedTempFile;

use crate::error::HarvestError;
use crate::models::Checkpoint;

/// File holding the mid-harvest resume checkpoint.
pub const STATE_FILE: &str = "last_state.txt";

/// File holding the datestamp of the last fully-successful run.
pub const DATE_FILE: &str = "last_harvest.txt";

const FIELD_SEPARATOR: char = '\t';

/// Durable storage for harvest progress.
///
/// `load_state` hands back the raw persisted fields rather than a typed
/// checkpoint: validating the four-slot shape (and deciding what a corrupt
/// file means) is the driver's policy, not the store's.
pub trait StateManager {
    /// Returns the persisted checkpoint fields, or `None` if no harvest is
    /// in progress.
    fn load_state(&self) -> Result<Option<Vec<String>>, HarvestError>;

    /// Atomically persists the four-field checkpoint. After a crash,
    /// `load_state` observes either the previous checkpoint or this one,
    /// never a partial write.
    fn save_state(&self, checkpoint: &Checkpoint) -> Result<(), HarvestError>;

    /// Removes the checkpoint. Succeeds if none exists.
    fn clear_state(&self) -> Result<(), HarvestError>;

    /// Returns the last-harvest marker, or `None` if no run has completed.
    fn load_date(&self) -> Result<Option<String>, HarvestError>;

    /// Atomically persists the last-harvest marker.
    fn save_date(&self, date: &str) -> Result<(), HarvestError>;
}

/// Flat-file state storage in a single directory.
///
/// The checkpoint is one tab-separated line of exactly four fields in
/// `last_state.txt`; the marker is a single datestamp in
/// `last_harvest.txt`. Both are written via temp-file-then-rename so a
/// crash mid-write cannot leave a torn file behind.
pub struct FileStateStore {
    dir: PathBuf,
}

impl FileStateStore {
    /// Opens (creating if necessary) the state directory.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, HarvestError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn write_atomic(&self, filename: &str, content: &str) -> Result<(), HarvestError> {
        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(content.as_bytes())?;
        tmp.flush()?;
        tmp.as_file_mut().sync_all()?;
        tmp.persist(self.dir.join(filename))
            .map_err(|e| HarvestError::State(e.error))?;
        Ok(())
    }

    fn read_optional(&self, filename: &str) -> Result<Option<String>, HarvestError> {
        match fs::read_to_string(self.dir.join(filename)) {
            Ok(content) => Ok(Some(content.trim_end_matches(['\r', '\n']).to_string())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

impl StateManager for FileStateStore {
    fn load_state(&self) -> Result<Option<Vec<String>>, HarvestError> {
        Ok(self
            .read_optional(STATE_FILE)?
            .map(|line| line.split(FIELD_SEPARATOR).map(String::from).collect()))
    }

    fn save_state(&self, checkpoint: &Checkpoint) -> Result<(), HarvestError> {
        let line = checkpoint.to_fields().join(&FIELD_SEPARATOR.to_string());
        self.write_atomic(STATE_FILE, &line)
    }

    fn clear_state(&self) -> Result<(), HarvestError> {
        match fs::remove_file(self.dir.join(STATE_FILE)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn load_date(&self) -> Result<Option<String>, HarvestError> {
        self.read_optional(DATE_FILE)
    }

    fn save_date(&self, date: &str) -> Result<(), HarvestError> {
        self.write_atomic(DATE_FILE, date)
    }
}
