//! Inter-request session event relay
//!
//! Bridges a long-running backend computation across multiple short-lived
//! HTTP requests: the computation publishes an append-only event log under
//! a session id, and later requests read successive indices, blocking until
//! the next event exists. A session has exactly one writer and any number
//! of concurrent readers at independent offsets.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;

/// How long a closed session's log stays queryable before it is reclaimed.
pub const SESSION_GRACE: Duration = Duration::from_secs(60);

#[derive(Debug, Default)]
struct Session {
    events: Vec<Value>,
    /// Pending readers, drained and woken on every publish or close.
    waiters: Vec<oneshot::Sender<()>>,
    closed: bool,
}

/// Process-wide session map. Cheap to clone; all clones share state.
#[derive(Debug, Clone, Default)]
pub struct SessionRelay {
    sessions: Arc<Mutex<HashMap<String, Session>>>,
}

impl SessionRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty, non-closed session. Idempotent: opening an existing
    /// session leaves its log alone.
    pub fn open(&self, session_id: &str) {
        let mut sessions = self.lock();
        sessions.entry(session_id.to_string()).or_default();
    }

    /// Append an event and wake every pending reader. Publishing to a
    /// session that does not exist is a silent no-op, matching the
    /// fire-and-forget nature of the push endpoint.
    pub fn publish(&self, session_id: &str, event: Value) {
        let waiters = {
            let mut sessions = self.lock();
            let Some(session) = sessions.get_mut(session_id) else {
                return;
            };
            session.events.push(event);
            std::mem::take(&mut session.waiters)
        };
        for waiter in waiters {
            let _ = waiter.send(());
        }
    }

    /// Mark the session closed, wake all pending readers, and reclaim the
    /// log after [`SESSION_GRACE`]. Reads against a reclaimed id behave as
    /// if the session never existed.
    pub fn close(&self, session_id: &str) {
        let waiters = {
            let mut sessions = self.lock();
            let Some(session) = sessions.get_mut(session_id) else {
                return;
            };
            session.closed = true;
            std::mem::take(&mut session.waiters)
        };
        for waiter in waiters {
            let _ = waiter.send(());
        }

        // The deadline is fixed at the moment of close. Computing it inside
        // the task would start the clock at the task's first poll instead,
        // stretching the grace period under a busy scheduler.
        let deadline = tokio::time::Instant::now() + SESSION_GRACE;
        let sessions = Arc::clone(&self.sessions);
        let session_id = session_id.to_string();
        tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            if let Ok(mut sessions) = sessions.lock() {
                sessions.remove(&session_id);
            }
        });
    }

    /// Return the event at `index`, waiting for it if it has not arrived.
    ///
    /// Resolution order: an already-present event returns immediately; a
    /// closed session with no such event returns `None`; otherwise the
    /// caller suspends until the next publish or close and the same two
    /// checks run exactly once more. A reader that registers before a
    /// publish is guaranteed to observe it (the waiter list is drained
    /// under the same lock that appends the event).
    pub async fn read(&self, session_id: &str, index: usize) -> Option<Value> {
        let rx = {
            let mut sessions = self.lock();
            let session = sessions.get_mut(session_id)?;
            if let Some(event) = session.events.get(index) {
                return Some(event.clone());
            }
            if session.closed {
                return None;
            }
            let (tx, rx) = oneshot::channel();
            session.waiters.push(tx);
            rx
        };

        // A dropped sender (session reclaimed mid-wait) resolves the same
        // way as a close: fall through to the recheck.
        let _ = rx.await;

        let sessions = self.lock();
        let session = sessions.get(session_id)?;
        session.events.get(index).cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Session>> {
        // Writers never panic while holding the lock; recover the map if
        // one somehow does rather than wedging every reader.
        self.sessions
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
