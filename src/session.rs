//! Session registry
//!
//! In-memory, process-wide map between agent names and their live RPC
//! sessions. Populated on `register` (and lazily on `send`/`check_inbox`/
//! `ping`), mutated when a push hits a dead session, drained on process
//! exit; never persisted.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use uuid::Uuid;

pub type SessionId = Uuid;

/// A push the server can emit on a live session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Push {
    /// Tell the client its capability list is stale so it re-fetches tool
    /// descriptions (which now carry the unread-alert prefix).
    ToolListChanged,
    /// An alert-level log line surfaced straight into the client's
    /// conversation.
    Alert(String),
}

/// Handle to one live session: an id plus the channel its transport drains.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub id: SessionId,
    tx: mpsc::UnboundedSender<Push>,
}

impl SessionHandle {
    /// Create a handle and the receiver its transport will drain.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Push>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                id: Uuid::new_v4(),
                tx,
            },
            rx,
        )
    }

    /// Queue a push. Fails only when the transport side is gone, which the
    /// caller must treat as session death.
    pub fn push(&self, push: Push) -> Result<(), SessionDead> {
        self.tx.send(push).map_err(|_| SessionDead)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionDead;

#[derive(Default)]
struct Inner {
    by_agent: HashMap<String, SessionHandle>,
    by_session: HashMap<SessionId, String>,
}

/// Bidirectional agent ↔ session map.
///
/// Both directions are updated under one lock so an agent is never
/// half-registered.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    inner: Arc<Mutex<Inner>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Associate an agent with a session, evicting any previous handle for
    /// that agent.
    pub fn bind(&self, agent: &str, handle: SessionHandle) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(old) = inner.by_agent.remove(agent) {
            inner.by_session.remove(&old.id);
        }
        inner.by_session.insert(handle.id, agent.to_string());
        inner.by_agent.insert(agent.to_string(), handle);
    }

    /// Bind only when the agent has no live session yet.
    pub fn bind_if_absent(&self, agent: &str, handle: &SessionHandle) {
        let mut inner = self.inner.lock().unwrap();
        if inner.by_agent.contains_key(agent) {
            return;
        }
        inner.by_session.insert(handle.id, agent.to_string());
        inner.by_agent.insert(agent.to_string(), handle.clone());
    }

    pub fn unbind_agent(&self, agent: &str) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(handle) = inner.by_agent.remove(agent) {
            inner.by_session.remove(&handle.id);
        }
    }

    /// Drop a session by id, e.g. when its transport connection closes. The
    /// agent mapping is only cleared when it still points at this session.
    pub fn unbind_session(&self, session: SessionId) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(agent) = inner.by_session.remove(&session) {
            if inner.by_agent.get(&agent).map(|h| h.id) == Some(session) {
                inner.by_agent.remove(&agent);
            }
        }
    }

    pub fn handle_for(&self, agent: &str) -> Option<SessionHandle> {
        self.inner.lock().unwrap().by_agent.get(agent).cloned()
    }

    pub fn agent_for(&self, session: SessionId) -> Option<String> {
        self.inner.lock().unwrap().by_session.get(&session).cloned()
    }

    pub fn is_connected(&self, agent: &str) -> bool {
        self.inner.lock().unwrap().by_agent.contains_key(agent)
    }

    /// Agent names with a live session right now.
    pub fn connected_agents(&self) -> Vec<String> {
        self.inner.lock().unwrap().by_agent.keys().cloned().collect()
    }
}
