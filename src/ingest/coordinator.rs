//! Exactly-once finalization.
//!
//! Three triggers can close a session: the last chunk arriving, the client's
//! end signal, and the inactivity deadline (plus shutdown). All of them end
//! up in [`FinalizationCoordinator::finalize`], which runs inside the
//! session's mutex and only proceeds for the caller that takes the session
//! out of the registry while it is still `Open`.

use super::registry::{SessionHandle, SessionRegistry};
use super::timeout::{DeadlineFired, TimeoutSupervisor};
use super::tracker::TaskTracker;
use crate::audio::container::{assemble_container, duration_secs};
use crate::handoff::{FinalizeTrigger, FinalizedRecording, HandoffDispatcher};
use crate::session::{RecordingSession, SessionConfig};
use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::MutexGuard;
use tracing::{debug, error, info, warn};

/// How a finalization attempt ended
#[derive(Debug, Clone)]
pub enum FinalizeOutcome {
    /// Container written and hand-off dispatched
    Finalized(FinalizedRecording),
    /// Forced close of a session with no buffered chunks; nothing handed off
    Empty,
    /// The write failed; partial data stays on disk, nothing handed off
    Failed,
    /// Not forced and incomplete; the session stays open
    Deferred,
    /// Another trigger got there first
    AlreadyFinalized,
    /// A deadline fired after it had been replaced
    StaleDeadline,
}

impl FinalizeOutcome {
    pub fn is_finalized(&self) -> bool {
        matches!(self, Self::Finalized(_))
    }
}

/// Result of [`FinalizationCoordinator::finalize_all`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub attempted: usize,
    /// Finalizations that completed with a written container
    pub finalized: usize,
    /// The limit elapsed before every finalization returned
    pub timed_out: bool,
}

pub struct FinalizationCoordinator {
    registry: Arc<SessionRegistry>,
    supervisor: TimeoutSupervisor,
    dispatcher: HandoffDispatcher,
    config: SessionConfig,
    tasks: TaskTracker,
}

impl FinalizationCoordinator {
    pub fn new(
        registry: Arc<SessionRegistry>,
        supervisor: TimeoutSupervisor,
        dispatcher: HandoffDispatcher,
        config: SessionConfig,
        tasks: TaskTracker,
    ) -> Self {
        Self {
            registry,
            supervisor,
            dispatcher,
            config,
            tasks,
        }
    }

    pub fn supervisor(&self) -> &TimeoutSupervisor {
        &self.supervisor
    }

    pub async fn on_chunk_complete(&self, session_id: &str) -> FinalizeOutcome {
        self.finalize(session_id, FinalizeTrigger::ChunksComplete).await
    }

    /// Record the end signal and schedule finalization after the grace
    /// delay. Returns false for unknown, closed or already-ended sessions.
    pub async fn on_end_signal(self: &Arc<Self>, session_id: &str) -> bool {
        let Some(handle) = self.registry.get(session_id) else {
            info!("End signal for unknown or closed session {}", session_id);
            return false;
        };

        {
            let mut session = handle.lock().await;
            if !session.is_open() {
                debug!("End signal for session {} lost the race", session_id);
                return false;
            }
            if !session.mark_end_signaled() {
                debug!("Repeated end signal for session {}", session_id);
                return false;
            }
            self.supervisor.cancel(&mut session);
            info!(
                "End signal for session {} ({}/{} chunks buffered)",
                session_id,
                session.received_chunks(),
                session.expected_chunk_count()
            );
        }

        let coordinator = Arc::clone(self);
        let session_id = session_id.to_string();
        let grace = self.config.end_grace;
        self.tasks.spawn(async move {
            if !grace.is_zero() {
                tokio::time::sleep(grace).await;
            }
            coordinator
                .finalize(&session_id, FinalizeTrigger::EndSignal)
                .await;
        });

        true
    }

    /// Force-finalize on inactivity, unless the deadline was superseded.
    pub async fn on_timeout(&self, fired: DeadlineFired) -> FinalizeOutcome {
        let Some(handle) = self.registry.get(&fired.session_id) else {
            debug!(
                "Deadline for session {} fired after it was finalized",
                fired.session_id
            );
            return FinalizeOutcome::AlreadyFinalized;
        };

        let session = handle.lock().await;
        if session.is_open() && session.deadline_generation() != Some(fired.generation) {
            debug!(
                "Ignoring stale deadline {} for session {}",
                fired.generation, fired.session_id
            );
            return FinalizeOutcome::StaleDeadline;
        }

        warn!(
            "Session {} timed out after inactivity, forcing finalization",
            fired.session_id
        );
        self.finalize_locked(&handle, session, FinalizeTrigger::Timeout)
            .await
    }

    /// The single finalization entry point for every trigger.
    pub async fn finalize(&self, session_id: &str, trigger: FinalizeTrigger) -> FinalizeOutcome {
        let Some(handle) = self.registry.get(session_id) else {
            debug!(
                "Finalize ({}) for session {} lost the race",
                trigger, session_id
            );
            return FinalizeOutcome::AlreadyFinalized;
        };

        let session = handle.lock().await;
        self.finalize_locked(&handle, session, trigger).await
    }

    /// Finalize several sessions concurrently, giving up after `limit`.
    /// Outcomes that completed before the limit are still counted.
    pub async fn finalize_all(
        &self,
        session_ids: &[String],
        trigger: FinalizeTrigger,
        limit: Duration,
    ) -> BatchOutcome {
        let mut pending: FuturesUnordered<_> = session_ids
            .iter()
            .map(|id| self.finalize(id, trigger))
            .collect();

        let mut finalized = 0;
        let drained = tokio::time::timeout(limit, async {
            while let Some(outcome) = pending.next().await {
                if outcome.is_finalized() {
                    finalized += 1;
                }
            }
        })
        .await;

        BatchOutcome {
            attempted: session_ids.len(),
            finalized,
            timed_out: drained.is_err(),
        }
    }

    async fn finalize_locked(
        &self,
        handle: &SessionHandle,
        mut session: MutexGuard<'_, RecordingSession>,
        trigger: FinalizeTrigger,
    ) -> FinalizeOutcome {
        let session_id = session.session_id().to_string();

        if !session.is_open() {
            debug!(
                "Finalize ({}) for session {} lost the race",
                trigger, session_id
            );
            return FinalizeOutcome::AlreadyFinalized;
        }

        // Without a declared count only the end signal or a forced close can
        // finish the session; it counts as complete if no index is skipped.
        // A declared total may shrink mid-session, so reaching the count is
        // not enough: every index below it must be present.
        let expected_chunks = session.expected_chunk_count();
        let complete = if expected_chunks > 0 {
            session.is_complete() && session.missing_chunks().is_empty()
        } else {
            session.received_chunks() > 0 && session.has_contiguous_chunks()
        };
        let may_write = trigger.is_forced()
            || session.is_complete()
            || (trigger == FinalizeTrigger::EndSignal && expected_chunks == 0);

        if !may_write {
            if trigger == FinalizeTrigger::EndSignal {
                warn!(
                    "Session {} ended with {}/{} chunks (missing {:?}); waiting for stragglers until timeout",
                    session_id,
                    session.received_chunks(),
                    session.expected_chunk_count(),
                    session.missing_chunks()
                );
            }
            self.supervisor
                .rearm(&mut session, self.config.chunk_timeout);
            return FinalizeOutcome::Deferred;
        }

        match self.registry.remove(&session_id) {
            Some(removed) if Arc::ptr_eq(&removed, handle) => {}
            _ => {
                debug!("Session {} already left the registry", session_id);
                return FinalizeOutcome::AlreadyFinalized;
            }
        }

        session.begin_finalizing();
        self.supervisor.cancel(&mut session);

        info!(
            "Finalizing session {} ({}, forced={}, {}/{} chunks, {} bytes buffered)",
            session_id,
            trigger,
            trigger.is_forced(),
            session.received_chunks(),
            session.expected_chunk_count(),
            session.buffered_bytes()
        );

        let missing_chunks = session.missing_chunks();
        let chunks = session.drain_chunks();

        if chunks.is_empty() {
            warn!(
                "Session {} closed ({}) with no chunks; nothing to write",
                session_id, trigger
            );
            session.close();
            return FinalizeOutcome::Empty;
        }

        if !complete {
            warn!(
                "Writing incomplete recording for session {} ({}): {} chunks, missing {:?} of {}",
                session_id,
                trigger,
                chunks.len(),
                missing_chunks,
                expected_chunks
            );
        }

        let buffered_bytes: u64 = chunks.iter().map(|(_, bytes)| bytes.len() as u64).sum();
        let path = session.target_path().to_path_buf();
        let fallback = self.config.fallback_spec;

        let written = tokio::task::spawn_blocking(move || {
            assemble_container(
                &path,
                fallback,
                chunks.iter().map(|(index, bytes)| (*index, bytes.as_slice())),
            )
        })
        .await;

        let assembled = match written {
            Ok(Ok(assembled)) => assembled,
            Ok(Err(e)) => {
                error!(
                    "Failed to write container for session {} ({} bytes buffered, {}): {:#}",
                    session_id,
                    buffered_bytes,
                    session.target_path().display(),
                    e
                );
                session.close();
                return FinalizeOutcome::Failed;
            }
            Err(e) => {
                error!(
                    "Container writer for session {} panicked ({} bytes buffered): {}",
                    session_id, buffered_bytes, e
                );
                session.close();
                return FinalizeOutcome::Failed;
            }
        };

        session.close();

        let recording = FinalizedRecording {
            session_id: session_id.clone(),
            path: session.target_path().to_path_buf(),
            payload_bytes: assembled.payload_bytes,
            chunks_written: assembled.chunks_written,
            expected_chunks,
            missing_chunks,
            complete,
            trigger,
            duration_secs: duration_secs(&assembled.spec, assembled.payload_bytes),
            finished_at: Utc::now(),
        };
        drop(session);

        info!(
            "Session {} finalized: {} ({} bytes, {:.1}s, complete={})",
            session_id,
            recording.path.display(),
            recording.payload_bytes,
            recording.duration_secs,
            recording.complete
        );

        self.dispatcher.dispatch(recording.clone());
        FinalizeOutcome::Finalized(recording)
    }
}
