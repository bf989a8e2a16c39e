//! Per-session turn ordering.
//!
//! Turns of one session run strictly in arrival order; turns of different
//! sessions run concurrently. Each session id maps to its own
//! `tokio::sync::Mutex`, whose waiters are served first-in first-out.
//! A session's entry lives only while one of its turns is running or
//! queued, so the map stays as small as the set of active sessions.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::Mutex as TurnLock;
use tracing::debug;

use crate::orchestrator::{Assistant, Response};

/// Session used when a caller does not name one.
pub const DEFAULT_SESSION: &str = "default";

type SessionMap = Mutex<HashMap<String, Arc<TurnLock<()>>>>;

pub struct SessionManager {
    assistant: Arc<Assistant>,
    sessions: SessionMap,
}

/// A claim on one session's turn lock. Dropping the last claim removes
/// the session from the map, including when the turn is cancelled.
struct SessionSlot<'a> {
    sessions: &'a SessionMap,
    id: &'a str,
    lock: Arc<TurnLock<()>>,
}

impl Drop for SessionSlot<'_> {
    fn drop(&mut self) {
        let mut sessions = self.sessions.lock().unwrap_or_else(|p| p.into_inner());
        // the map and this slot hold the only references
        let idle = sessions
            .get(self.id)
            .is_some_and(|l| Arc::ptr_eq(l, &self.lock) && Arc::strong_count(l) == 2);
        if idle {
            sessions.remove(self.id);
            debug!(session = self.id, "session released");
        }
    }
}

impl SessionManager {
    pub fn new(assistant: Arc<Assistant>) -> Self {
        Self {
            assistant,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn assistant(&self) -> &Arc<Assistant> {
        &self.assistant
    }

    /// Run one turn for `session_id`, after every earlier turn of that session.
    pub async fn handle(&self, session_id: &str, line: &str) -> Response {
        let slot = self.claim(session_id);
        let _turn = slot.lock.lock().await;
        debug!(session = session_id, "turn started");
        self.assistant.handle_turn(line).await
    }

    /// Number of sessions with a turn running or queued.
    pub fn session_count(&self) -> usize {
        self.sessions.lock().map(|s| s.len()).unwrap_or(0)
    }

    fn claim<'a>(&'a self, session_id: &'a str) -> SessionSlot<'a> {
        let mut sessions = self.sessions.lock().unwrap_or_else(|p| p.into_inner());
        let lock = sessions
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(TurnLock::new(())))
            .clone();
        SessionSlot {
            sessions: &self.sessions,
            id: session_id,
            lock,
        }
    }
}
