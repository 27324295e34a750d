use crate::session::RecordingSession;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

/// Message sent when a session's inactivity deadline elapses
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadlineFired {
    pub session_id: String,
    /// Identifies which arming of the deadline fired
    pub generation: u64,
}

/// A scheduled deadline. Dropping it cancels the timer.
///
/// Cancellation is best-effort: a deadline that already sent its
/// [`DeadlineFired`] cannot be recalled, which is why receivers compare
/// generations before acting.
#[derive(Debug)]
pub struct Deadline {
    generation: u64,
    task: JoinHandle<()>,
}

impl Deadline {
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl Drop for Deadline {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Arms and cancels per-session inactivity deadlines.
///
/// The supervisor never touches session state when a deadline fires; it
/// only reports the session id, and the receiver re-fetches the session.
pub struct TimeoutSupervisor {
    fired_tx: mpsc::UnboundedSender<DeadlineFired>,
    next_generation: AtomicU64,
}

impl TimeoutSupervisor {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<DeadlineFired>) {
        let (fired_tx, fired_rx) = mpsc::unbounded_channel();
        (
            Self {
                fired_tx,
                next_generation: AtomicU64::new(1),
            },
            fired_rx,
        )
    }

    /// Cancel the session's current deadline and schedule a new one.
    pub fn rearm(&self, session: &mut RecordingSession, duration: Duration) {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let session_id = session.session_id().to_string();
        let fired_tx = self.fired_tx.clone();

        let task = tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            debug!(
                "Deadline elapsed for session {} (generation {})",
                session_id, generation
            );
            // Receiver is gone only during shutdown.
            let _ = fired_tx.send(DeadlineFired {
                session_id,
                generation,
            });
        });

        session.replace_deadline(Deadline { generation, task });
    }

    pub fn cancel(&self, session: &mut RecordingSession) {
        session.clear_deadline();
    }
}
