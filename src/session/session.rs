use super::config::SessionConfig;
use super::stats::SessionStats;
use crate::audio::container::encode_header;
use crate::ingest::buffer::{ChunkBuffer, InsertOutcome};
use crate::ingest::timeout::Deadline;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::info;

/// Finalization state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Accepting chunks
    Open,
    /// Removed from the registry; the container is being written
    Finalizing,
    /// Terminal
    Closed,
}

/// Mutable state of one in-progress recording.
///
/// Always accessed through the per-session mutex held by the registry, so
/// every method here runs inside that session's critical section.
#[derive(Debug)]
pub struct RecordingSession {
    session_id: String,

    /// Container destination, fixed at creation
    target_path: PathBuf,

    started_at: DateTime<Utc>,

    chunks: ChunkBuffer,

    /// Latest declared total; a hint that later chunks may revise
    expected_chunk_count: u32,

    end_signaled: bool,

    deadline: Option<Deadline>,

    state: SessionState,
}

impl RecordingSession {
    /// Open a session and lay down its placeholder container.
    ///
    /// Creates the storage directory on demand and writes a size-zero header
    /// so the file is well-formed before any payload lands.
    pub fn create(
        session_id: &str,
        started_at: DateTime<Utc>,
        config: &SessionConfig,
    ) -> io::Result<Self> {
        fs::create_dir_all(&config.base_path)?;

        let target_path = config
            .base_path
            .join(container_file_name(session_id, started_at));
        fs::write(&target_path, encode_header(&config.fallback_spec, 0))?;

        info!(
            "Recording session created: {} -> {}",
            session_id,
            target_path.display()
        );

        Ok(Self {
            session_id: session_id.to_string(),
            target_path,
            started_at,
            chunks: ChunkBuffer::new(),
            expected_chunk_count: 0,
            end_signaled: false,
            deadline: None,
            state: SessionState::Open,
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn target_path(&self) -> &Path {
        &self.target_path
    }

    pub fn is_open(&self) -> bool {
        self.state == SessionState::Open
    }

    pub fn expected_chunk_count(&self) -> u32 {
        self.expected_chunk_count
    }

    pub fn received_chunks(&self) -> usize {
        self.chunks.len()
    }

    /// Buffer a chunk. A non-zero `expected_count` replaces the previous
    /// declaration, even on a duplicate, since it is the freshest hint.
    pub fn record_chunk(
        &mut self,
        sequence_index: u32,
        expected_count: u32,
        payload: Vec<u8>,
    ) -> InsertOutcome {
        if expected_count > 0 {
            self.expected_chunk_count = expected_count;
        }
        self.chunks.insert(sequence_index, payload)
    }

    pub fn is_complete(&self) -> bool {
        self.chunks.is_complete(self.expected_chunk_count)
    }

    /// True if the buffered indices run 0..n without gaps
    pub fn has_contiguous_chunks(&self) -> bool {
        self.chunks.is_contiguous()
    }

    pub fn buffered_bytes(&self) -> u64 {
        self.chunks.buffered_bytes()
    }

    pub fn missing_chunks(&self) -> Vec<u32> {
        self.chunks.missing(self.expected_chunk_count)
    }

    /// Returns false if the end signal had already been seen.
    pub fn mark_end_signaled(&mut self) -> bool {
        !std::mem::replace(&mut self.end_signaled, true)
    }

    /// Install a new deadline; the previous one, if any, is cancelled.
    pub fn replace_deadline(&mut self, deadline: Deadline) {
        self.deadline = Some(deadline);
    }

    /// Cancel the armed deadline, if any.
    pub fn clear_deadline(&mut self) {
        self.deadline = None;
    }

    pub fn deadline_generation(&self) -> Option<u64> {
        self.deadline.as_ref().map(Deadline::generation)
    }

    pub fn begin_finalizing(&mut self) {
        self.state = SessionState::Finalizing;
    }

    /// Hand the buffered chunks to the writer in index order.
    pub fn drain_chunks(&mut self) -> Vec<(u32, Vec<u8>)> {
        self.chunks.drain_ordered()
    }

    pub fn close(&mut self) {
        self.deadline = None;
        self.state = SessionState::Closed;
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            session_id: self.session_id.clone(),
            state: self.state,
            started_at: self.started_at,
            target_path: self.target_path.clone(),
            received_chunks: self.chunks.len(),
            expected_chunks: self.expected_chunk_count,
            missing_chunks: self.missing_chunks(),
            buffered_bytes: self.chunks.buffered_bytes(),
            end_signaled: self.end_signaled,
        }
    }
}

/// `meeting_<id>_<start>.wav`, with anything outside `[A-Za-z0-9_-]` in the
/// id replaced so it cannot escape the storage directory.
fn container_file_name(session_id: &str, started_at: DateTime<Utc>) -> String {
    let safe_id: String = session_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();

    format!(
        "meeting_{}_{}.wav",
        safe_id,
        started_at.format("%Y%m%dT%H%M%S")
    )
}
