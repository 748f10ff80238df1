//! tally-core - Core library for Tally
//!
//! Shared record model, three-way merge, conflict resolution, stores and the
//! sync orchestrator used by the CLI and the relay.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod store;
pub mod sync;
pub mod util;

pub use error::{Error, Result};
pub use models::{RecordId, ReplicaId};
