use thiserror::Error;

/// Upstream API failure: a transport error or a non-2xx status. Distinct from a
/// parse failure so callers can tell "the API was down" from "the payload was
/// garbage".
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} returned {status}: {body}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("unexpected response shape from {url}: {detail}")]
    Shape { url: String, detail: String },
}

/// A single raw participation record could not be turned into a
/// `MatchParticipation`. Recovery is always "skip this record", never "abort
/// the batch".
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("participation record is not a JSON object")]
    NotAnObject,
    #[error("payload does not contain a participation array")]
    NotAnArray,
    #[error("unparseable timestamp in `{field}`: {raw:?}")]
    BadTimestamp { field: &'static str, raw: String },
    /// serde's message names the offending field (e.g. "missing field `game_id`").
    #[error("invalid participation record: {0}")]
    Record(String),
}

/// Backend rejected an upsert or lookup. Recovered at the granularity of the
/// failing table-insert call.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
    #[error("storage backend error: {0}")]
    Backend(String),
}
