use super::coordinator::FinalizationCoordinator;
use super::registry::{Lookup, SessionHandle, SessionRegistry};
use super::timeout::TimeoutSupervisor;
use super::tracker::TaskTracker;
use crate::error::{IngestError, IngestResult};
use crate::handoff::{FinalizeTrigger, HandoffDispatcher, TranscriptionHandoff};
use crate::ingest::buffer::InsertOutcome;
use crate::session::{RecordingSession, SessionConfig, SessionStats};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::fs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// One uploaded chunk, as handed over by the upload layer
#[derive(Debug, Clone)]
pub struct ChunkUpload {
    pub session_id: String,
    /// 0-based position of the chunk in the recording
    pub sequence_index: u32,
    /// Declared total chunk count; 0 if the client does not know yet
    pub expected_count: u32,
    pub payload: Vec<u8>,
    /// Client-reported recording start, used to name the container
    pub started_at: Option<DateTime<Utc>>,
}

/// Answer to a chunk submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkAck {
    /// Buffered; the session is still waiting for more
    Stored { received: usize, expected: u32 },
    /// This chunk completed the set; finalization has been scheduled
    Completed,
    /// Protocol violation treated as a no-op
    Ignored(IgnoreReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    DuplicateChunk,
    SessionClosed,
}

/// Result of [`SessionLifecycle::shutdown_all`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Sessions that were open when shutdown began
    pub sessions: usize,
    /// Of those, how many produced a container
    pub finalized: usize,
    /// Whether every background task finished inside the grace period
    pub drained: bool,
}

/// Entry point for the upload layer: submit chunks, signal the end of a
/// recording, shut everything down.
pub struct SessionLifecycle {
    config: SessionConfig,
    registry: Arc<SessionRegistry>,
    coordinator: Arc<FinalizationCoordinator>,
    tasks: TaskTracker,
    deadline_pump: JoinHandle<()>,
    shutting_down: AtomicBool,
}

impl SessionLifecycle {
    /// Must be called inside a Tokio runtime.
    ///
    /// Fails if the storage directory cannot be created or written.
    pub fn new(
        mut config: SessionConfig,
        handoff: Arc<dyn TranscriptionHandoff>,
    ) -> IngestResult<Self> {
        config.base_path = prepare_storage(&config)?;

        let registry = Arc::new(SessionRegistry::new(config.closed_session_ttl));
        let tasks = TaskTracker::new();
        let (supervisor, mut fired_rx) = TimeoutSupervisor::new();
        let dispatcher = HandoffDispatcher::new(handoff, config.handoff_workers, tasks.clone());

        let coordinator = Arc::new(FinalizationCoordinator::new(
            Arc::clone(&registry),
            supervisor,
            dispatcher,
            config.clone(),
            tasks.clone(),
        ));

        let deadline_pump = {
            let coordinator = Arc::clone(&coordinator);
            let tasks = tasks.clone();
            tokio::spawn(async move {
                while let Some(fired) = fired_rx.recv().await {
                    let coordinator = Arc::clone(&coordinator);
                    tasks.spawn(async move {
                        coordinator.on_timeout(fired).await;
                    });
                }
            })
        };

        info!(
            "Session lifecycle ready: storage={}, chunk timeout={:?}, hand-off workers={}",
            config.base_path.display(),
            config.chunk_timeout,
            config.handoff_workers
        );

        Ok(Self {
            config,
            registry,
            coordinator,
            tasks,
            deadline_pump,
            shutting_down: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Buffer a chunk, rearm the session's deadline and, if the set is now
    /// complete, schedule finalization without waiting for it.
    pub async fn submit_chunk(&self, upload: ChunkUpload) -> IngestResult<ChunkAck> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(IngestError::ShuttingDown);
        }

        let ChunkUpload {
            session_id,
            sequence_index,
            expected_count,
            payload,
            started_at,
        } = upload;

        let Some(handle) = self.open_session(&session_id, started_at)? else {
            warn!(
                "Chunk {} for closed session {} ignored",
                sequence_index, session_id
            );
            return Ok(ChunkAck::Ignored(IgnoreReason::SessionClosed));
        };

        let mut session = handle.lock().await;
        if !session.is_open() {
            debug!(
                "Chunk {} arrived while session {} was finalizing",
                sequence_index, session_id
            );
            return Ok(ChunkAck::Ignored(IgnoreReason::SessionClosed));
        }

        let payload_len = payload.len();
        let outcome = session.record_chunk(sequence_index, expected_count, payload);
        self.coordinator
            .supervisor()
            .rearm(&mut session, self.config.chunk_timeout);

        if outcome == InsertOutcome::Duplicate {
            warn!(
                "Duplicate chunk {} for session {} ignored",
                sequence_index, session_id
            );
            return Ok(ChunkAck::Ignored(IgnoreReason::DuplicateChunk));
        }

        let received = session.received_chunks();
        let expected = session.expected_chunk_count();
        info!(
            "Chunk stored: session={}, chunk={}/{}, bytes={}, received={}",
            session_id, sequence_index, expected, payload_len, received
        );

        if !session.is_complete() {
            return Ok(ChunkAck::Stored { received, expected });
        }
        drop(session);

        info!("All {} chunks received for session {}", expected, session_id);
        let coordinator = Arc::clone(&self.coordinator);
        self.tasks.spawn(async move {
            coordinator.on_chunk_complete(&session_id).await;
        });

        Ok(ChunkAck::Completed)
    }

    /// Open a session ahead of its first chunk and arm the start deadline.
    /// Returns false if the session already existed or was recently closed.
    pub async fn start_session(
        &self,
        session_id: &str,
        started_at: Option<DateTime<Utc>>,
    ) -> IngestResult<bool> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(IngestError::ShuttingDown);
        }

        let lookup = self
            .registry
            .get_or_create(session_id, || self.create_session(session_id, started_at))?;

        match lookup {
            Lookup::Created(handle) => {
                let mut session = handle.lock().await;
                // A chunk that beat us to the lock already armed the shorter deadline.
                if session.received_chunks() == 0 {
                    self.coordinator
                        .supervisor()
                        .rearm(&mut session, self.config.start_timeout);
                }
                info!("Session {} started explicitly", session_id);
                Ok(true)
            }
            Lookup::Existing(_) => {
                debug!("Start for already open session {}", session_id);
                Ok(false)
            }
            Lookup::Closed => {
                warn!("Start for recently closed session {} ignored", session_id);
                Ok(false)
            }
        }
    }

    /// Route the client's end signal. Unknown or closed sessions are a
    /// logged no-op.
    pub async fn mark_end(&self, session_id: &str) -> bool {
        self.coordinator.on_end_signal(session_id).await
    }

    pub async fn status(&self, session_id: &str) -> Option<SessionStats> {
        let handle = self.registry.get(session_id)?;
        let session = handle.lock().await;
        Some(session.stats())
    }

    pub fn active_sessions(&self) -> Vec<String> {
        self.registry.session_ids()
    }

    /// Force-finalize every open session, then wait (bounded by the
    /// shutdown grace) for finalizations and hand-offs to drain.
    ///
    /// The registry is re-read after each pass, so a session created by a
    /// submission already past the shutdown check is still finalized.
    pub async fn shutdown_all(&self) -> ShutdownReport {
        self.shutting_down.store(true, Ordering::SeqCst);
        let started = Instant::now();
        let grace = self.config.shutdown_grace;

        let mut attempted: HashSet<String> = HashSet::new();
        let mut finalized = 0;

        loop {
            let fresh: Vec<String> = self
                .registry
                .session_ids()
                .into_iter()
                .filter(|id| !attempted.contains(id))
                .collect();
            if fresh.is_empty() {
                break;
            }

            info!("Shutdown: force-finalizing {} open sessions", fresh.len());
            let remaining = grace.saturating_sub(started.elapsed());
            let batch = self
                .coordinator
                .finalize_all(&fresh, FinalizeTrigger::Shutdown, remaining)
                .await;

            finalized += batch.finalized;
            attempted.extend(fresh);

            if batch.timed_out {
                warn!(
                    "Shutdown grace of {:?} elapsed during forced finalization ({} of {} finished)",
                    grace, batch.finalized, batch.attempted
                );
                break;
            }
        }

        let remaining = grace.saturating_sub(started.elapsed());
        let drained = self.tasks.wait_idle(remaining).await;
        if !drained {
            warn!(
                "Shutdown abandoned {} in-flight tasks after {:?}",
                self.tasks.inflight(),
                grace
            );
        }

        self.deadline_pump.abort();

        info!(
            "Shutdown complete: {} sessions, {} finalized, drained={}",
            attempted.len(),
            finalized,
            drained
        );

        ShutdownReport {
            sessions: attempted.len(),
            finalized,
            drained,
        }
    }

    /// `None` means the id was closed recently and must not be reopened.
    fn open_session(
        &self,
        session_id: &str,
        started_at: Option<DateTime<Utc>>,
    ) -> IngestResult<Option<SessionHandle>> {
        let lookup = self
            .registry
            .get_or_create(session_id, || self.create_session(session_id, started_at))?;

        Ok(match lookup {
            Lookup::Existing(handle) | Lookup::Created(handle) => Some(handle),
            Lookup::Closed => None,
        })
    }

    fn create_session(
        &self,
        session_id: &str,
        started_at: Option<DateTime<Utc>>,
    ) -> IngestResult<RecordingSession> {
        // Runs under the registry's entry lock, after any earlier shutdown
        // store is visible; no session is created once shutdown began.
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(IngestError::ShuttingDown);
        }

        RecordingSession::create(
            session_id,
            started_at.unwrap_or_else(Utc::now),
            &self.config,
        )
        .map_err(|source| IngestError::Storage {
            session_id: session_id.to_string(),
            source,
        })
    }
}

impl Drop for SessionLifecycle {
    fn drop(&mut self) {
        self.deadline_pump.abort();
    }
}

/// Create the storage directory, check it is writable and return its
/// absolute path.
fn prepare_storage(config: &SessionConfig) -> IngestResult<std::path::PathBuf> {
    let base = &config.base_path;
    let unusable = |what: &str, e: std::io::Error| {
        IngestError::Config(format!(
            "storage path {} {}: {}",
            base.display(),
            what,
            e
        ))
    };

    fs::create_dir_all(base).map_err(|e| unusable("cannot be created", e))?;

    let probe = base.join(".write-probe");
    fs::write(&probe, b"").map_err(|e| unusable("is not writable", e))?;
    fs::remove_file(&probe).map_err(|e| unusable("is not writable", e))?;

    fs::canonicalize(base).map_err(|e| unusable("cannot be resolved", e))
}
