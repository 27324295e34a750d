//! Downstream hand-off of finished recordings
//!
//! Once a container is written, its absolute path and session id are passed
//! to the transcription collaborator:
//! - `HttpHandoff` - POST to a transcriber endpoint
//! - `NatsHandoff` - publish a recording-ready message
//! - `LogHandoff` - log only
//!
//! Calls run on a bounded pool so a slow transcriber never blocks ingest.

mod http;

pub use http::HttpHandoff;

use crate::config::{HandoffKind, TranscriptionConfig};
use crate::ingest::tracker::TaskTracker;
use crate::nats::NatsHandoff;
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

/// What caused a session to be finalized
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalizeTrigger {
    /// Every declared chunk arrived
    ChunksComplete,
    /// The client sent its end signal
    EndSignal,
    /// Inactivity deadline elapsed
    Timeout,
    /// Process shutdown
    Shutdown,
}

impl FinalizeTrigger {
    /// Forced finalizations salvage whatever was buffered.
    pub fn is_forced(self) -> bool {
        matches!(self, Self::Timeout | Self::Shutdown)
    }
}

impl fmt::Display for FinalizeTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ChunksComplete => "chunks-complete",
            Self::EndSignal => "end-signal",
            Self::Timeout => "timeout",
            Self::Shutdown => "shutdown",
        };
        f.write_str(name)
    }
}

/// A recording whose container has been written and patched
#[derive(Debug, Clone, Serialize)]
pub struct FinalizedRecording {
    pub session_id: String,

    /// Absolute path of the container
    pub path: PathBuf,

    pub payload_bytes: u64,

    pub chunks_written: usize,

    /// Latest declared total (0 if never declared)
    pub expected_chunks: u32,

    /// Declared indices that never arrived
    pub missing_chunks: Vec<u32>,

    /// False when a forced finalization salvaged a partial chunk set
    pub complete: bool,

    pub trigger: FinalizeTrigger,

    pub duration_secs: f64,

    pub finished_at: DateTime<Utc>,
}

/// The transcription collaborator
#[async_trait::async_trait]
pub trait TranscriptionHandoff: Send + Sync {
    async fn hand_off(&self, recording: &FinalizedRecording) -> Result<()>;

    /// Name for logging
    fn name(&self) -> &str;
}

/// Hand-off that only logs; used when no transcriber is configured
pub struct LogHandoff;

#[async_trait::async_trait]
impl TranscriptionHandoff for LogHandoff {
    async fn hand_off(&self, recording: &FinalizedRecording) -> Result<()> {
        info!(
            "Recording ready for transcription: {} ({}, {} bytes, {:.1}s, complete={})",
            recording.session_id,
            recording.path.display(),
            recording.payload_bytes,
            recording.duration_secs,
            recording.complete
        );
        Ok(())
    }

    fn name(&self) -> &str {
        "log"
    }
}

/// Build the hand-off selected by `transcription.kind`.
pub async fn build_handoff(cfg: &TranscriptionConfig) -> Result<Arc<dyn TranscriptionHandoff>> {
    let handoff: Arc<dyn TranscriptionHandoff> = match cfg.kind {
        HandoffKind::Log => Arc::new(LogHandoff),
        HandoffKind::Http => Arc::new(HttpHandoff::new(cfg.url.clone(), cfg.participants)),
        HandoffKind::Nats => {
            Arc::new(NatsHandoff::connect(&cfg.nats_url, cfg.subject_prefix.clone()).await?)
        }
    };

    info!("Transcription hand-off: {}", handoff.name());
    Ok(handoff)
}

/// Runs hand-offs on a bounded pool, decoupled from the finalizing task.
pub struct HandoffDispatcher {
    handoff: Arc<dyn TranscriptionHandoff>,
    permits: Arc<Semaphore>,
    tasks: TaskTracker,
}

impl HandoffDispatcher {
    pub fn new(handoff: Arc<dyn TranscriptionHandoff>, workers: usize, tasks: TaskTracker) -> Self {
        Self {
            handoff,
            permits: Arc::new(Semaphore::new(workers.max(1))),
            tasks,
        }
    }

    /// Queue one hand-off. Its outcome is logged, never retried.
    pub fn dispatch(&self, recording: FinalizedRecording) {
        let handoff = Arc::clone(&self.handoff);
        let permits = Arc::clone(&self.permits);

        self.tasks.spawn(async move {
            let _permit = match permits.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    warn!(
                        "Hand-off pool closed, dropping recording {}",
                        recording.session_id
                    );
                    return;
                }
            };

            match handoff.hand_off(&recording).await {
                Ok(()) => info!(
                    "Hand-off via {} succeeded for session {}",
                    handoff.name(),
                    recording.session_id
                ),
                Err(e) => error!(
                    "Hand-off via {} failed for session {} ({}): {:#}",
                    handoff.name(),
                    recording.session_id,
                    recording.path.display(),
                    e
                ),
            }
        });
    }
}
