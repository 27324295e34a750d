use super::SessionState;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;

/// Point-in-time view of an open recording session
#[derive(Debug, Clone, Serialize)]
pub struct SessionStats {
    pub session_id: String,

    /// Lifecycle state at the time of the snapshot
    pub state: SessionState,

    /// When the recording started
    pub started_at: DateTime<Utc>,

    /// Where the container will be written
    pub target_path: PathBuf,

    /// Distinct chunks buffered so far
    pub received_chunks: usize,

    /// Latest declared total (0 if no chunk has declared one)
    pub expected_chunks: u32,

    /// Indices below `expected_chunks` that have not arrived
    pub missing_chunks: Vec<u32>,

    pub buffered_bytes: u64,

    /// Whether the client has sent its end signal
    pub end_signaled: bool,
}
