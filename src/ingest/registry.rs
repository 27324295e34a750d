use crate::session::RecordingSession;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Shared handle to one session; the mutex is that session's critical section.
pub type SessionHandle = Arc<Mutex<RecordingSession>>;

/// Result of [`SessionRegistry::get_or_create`]
pub enum Lookup {
    Existing(SessionHandle),
    Created(SessionHandle),
    /// The id was finalized recently and must not be reopened
    Closed,
}

/// Concurrent table of open recording sessions.
///
/// Locking is per shard for the table and per session for session state;
/// there is no lock spanning every session.
pub struct SessionRegistry {
    sessions: DashMap<String, SessionHandle>,
    /// Recently removed ids and when they were removed
    closed: DashMap<String, Instant>,
    closed_ttl: Duration,
}

impl SessionRegistry {
    pub fn new(closed_ttl: Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            closed: DashMap::new(),
            closed_ttl,
        }
    }

    /// Atomic get-or-insert. `factory` runs at most once per id, under the
    /// table's entry lock, so concurrent first chunks share one session.
    ///
    /// The factory's file I/O (directory creation and the 44-byte
    /// placeholder) runs on the calling worker while the id's shard is
    /// write-locked; other ids hashing to that shard wait for it.
    pub fn get_or_create<F, E>(&self, session_id: &str, factory: F) -> Result<Lookup, E>
    where
        F: FnOnce() -> Result<RecordingSession, E>,
    {
        match self.sessions.entry(session_id.to_string()) {
            Entry::Occupied(entry) => Ok(Lookup::Existing(Arc::clone(entry.get()))),
            Entry::Vacant(entry) => {
                if self.is_recently_closed(session_id) {
                    return Ok(Lookup::Closed);
                }
                let handle = Arc::new(Mutex::new(factory()?));
                entry.insert(Arc::clone(&handle));
                Ok(Lookup::Created(handle))
            }
        }
    }

    pub fn get(&self, session_id: &str) -> Option<SessionHandle> {
        self.sessions
            .get(session_id)
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Atomic take: at most one caller receives the handle for an id.
    ///
    /// The id is tombstoned before removal so a late chunk cannot slip in
    /// and reopen it.
    pub fn remove(&self, session_id: &str) -> Option<SessionHandle> {
        self.closed.insert(session_id.to_string(), Instant::now());
        self.prune_closed();
        self.sessions.remove(session_id).map(|(_, handle)| handle)
    }

    pub fn is_recently_closed(&self, session_id: &str) -> bool {
        self.closed
            .get(session_id)
            .map(|closed_at| closed_at.elapsed() < self.closed_ttl)
            .unwrap_or(false)
    }

    pub fn session_ids(&self) -> Vec<String> {
        self.sessions.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn prune_closed(&self) {
        let ttl = self.closed_ttl;
        self.closed.retain(|_, closed_at| closed_at.elapsed() < ttl);
    }
}
