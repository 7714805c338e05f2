//! demeter - OAI-PMH 2.0 metadata harvester with checkpointed resume.
//!
//! The [`harvester::Harvester`] drives the protocol state machine against
//! one repository, composing three substitutable collaborators: a
//! [`clients::Communicator`] for the wire, a [`storage::RecordWriter`] for
//! persistence of harvested records, and a [`storage::StateManager`] for
//! the resume checkpoint and last-harvest marker.

pub mod clients;
pub mod config;
pub mod error;
pub mod harvester;
pub mod models;
pub mod storage;

// Re-export commonly used items for easier access
pub use error::HarvestError;
pub use harvester::Harvester;
