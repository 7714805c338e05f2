//! Persistence side of the harvester.
//!
//! [`state`] keeps the resume checkpoint and last-harvest marker;
//! [`writer`] persists harvested records.

pub mod state;
pub mod writer;

pub use state::{FileStateStore, StateManager, DATE_FILE, STATE_FILE};
pub use writer::{DirectoryWriter, RecordWriter};
