//! HTTP-facing side of the harvester.
//!
//! [`oai`] holds the [`Communicator`](oai::Communicator) capability
//! contract, the reqwest-backed client, and the OAI-PMH response parser.

pub mod oai;

pub use oai::{list_sets, Communicator, OaiHttpClient};
