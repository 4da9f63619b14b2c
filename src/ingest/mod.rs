//! API client plus the driver that feeds fetched or replayed records
//! through the orchestrator.

pub mod api;
pub mod driver;
pub mod files;

pub use api::ErApiClient;
pub use driver::{Driver, RunSummary};
pub use files::FileDisposition;
