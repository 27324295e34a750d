use thiserror::Error;

/// Failures that reach the caller of the ingest API.
///
/// Protocol violations (duplicate chunks, chunks for a closed session) are
/// not errors; see [`crate::ingest::IgnoreReason`].
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("storage error for session {session_id}: {source}")]
    Storage {
        session_id: String,
        #[source]
        source: std::io::Error,
    },

    #[error("ingest is shutting down")]
    ShuttingDown,

    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type IngestResult<T> = Result<T, IngestError>;
