//! Eternal Return match ingestion: fetch or replay denormalized participation
//! records, normalize them into relational rows and persist them idempotently.

// Test fixtures build full participation records with `json!`, which blows
// the default macro recursion limit.
#![recursion_limit = "256"]

pub mod error;
pub mod ingest;
pub mod logging;
pub mod model;
pub mod normalization;
pub mod orchestrator;
pub mod storage;

pub mod util {
    pub mod env;
}

pub use error::{FetchError, StorageError, ValidationError};
pub use ingest::{Driver, ErApiClient, RunSummary};
pub use model::{MatchParticipation, UserIdentity};
pub use orchestrator::{InsertOutcome, Orchestrator};
pub use storage::{MatchStore, MemoryStore, PgStore};
