//! Session registry and broadcast fan-out

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, warn};

use super::connection::CancelFlag;
use super::mailbox::{Mailbox, MailboxError, DEFAULT_CONTROL_CAPACITY};
use super::protocol::SessionId;

/// Server-side state of one connected client
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    outbound: Mailbox,
    alive: AtomicBool,
    cancel: CancelFlag,
}

impl Session {
    /// A session outside any registry. Clients use this for their one
    /// server connection.
    pub fn new(id: SessionId) -> Self {
        Self {
            id,
            outbound: Mailbox::new(DEFAULT_CONTROL_CAPACITY),
            alive: AtomicBool::new(true),
            cancel: CancelFlag::new(),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn outbound(&self) -> &Mailbox {
        &self.outbound
    }

    /// Shared cancellation flag of this session's read/write tasks
    pub fn cancel_flag(&self) -> &CancelFlag {
        &self.cancel
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Mark dead and stop both I/O tasks
    fn kill(&self) {
        self.alive.store(false, Ordering::Release);
        self.outbound.close();
        self.cancel.cancel();
    }
}

/// Tracks connected sessions and fans messages out to them
#[derive(Debug)]
pub struct SessionRegistry {
    sessions: Mutex<BTreeMap<SessionId, Arc<Session>>>,
    max_sessions: usize,
}

impl SessionRegistry {
    pub fn new(max_sessions: usize) -> Self {
        Self {
            sessions: Mutex::new(BTreeMap::new()),
            max_sessions,
        }
    }

    /// Admit a session under the lowest unused id.
    /// Returns `None` when the registry is at capacity.
    pub fn register(&self) -> Option<Arc<Session>> {
        let mut sessions = self.sessions.lock();
        if sessions.len() >= self.max_sessions {
            return None;
        }

        // Keys are sorted, so the first gap is the lowest free id.
        let mut id: SessionId = 0;
        for &taken in sessions.keys() {
            if taken != id {
                break;
            }
            id += 1;
        }

        let session = Arc::new(Session::new(id));
        sessions.insert(id, session.clone());
        debug!(session_id = id, total = sessions.len(), "Session registered");
        Some(session)
    }

    /// Remove a session. Safe to call on a session that is already gone.
    /// Only the registered instance is removed, so a stale handle never
    /// evicts a newer session that reuses its id.
    pub fn unregister(&self, session: &Session) -> bool {
        let removed = {
            let mut sessions = self.sessions.lock();
            match sessions.get(&session.id) {
                Some(current) if std::ptr::eq(Arc::as_ptr(current), session) => {
                    sessions.remove(&session.id)
                }
                _ => None,
            }
        };
        session.kill();
        match removed {
            Some(_) => {
                debug!(session_id = session.id, "Session unregistered");
                true
            }
            None => false,
        }
    }

    /// Drop every session, stopping all connections
    pub fn clear(&self) {
        let drained = std::mem::take(&mut *self.sessions.lock());
        for session in drained.values() {
            session.kill();
        }
    }

    pub fn get(&self, id: SessionId) -> Option<Arc<Session>> {
        self.sessions.lock().get(&id).cloned()
    }

    pub fn contains(&self, id: SessionId) -> bool {
        self.sessions.lock().contains_key(&id)
    }

    pub fn ids(&self) -> Vec<SessionId> {
        self.sessions.lock().keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Queue a control message for every session except `exclude`.
    /// Returns the ids of the sessions that were reached.
    pub fn broadcast(&self, payload: &Bytes, exclude: Option<SessionId>) -> Vec<SessionId> {
        self.fan_out(exclude, |session| {
            session.outbound.push_control(payload.clone())
        })
    }

    /// Offer a state snapshot to every session except `exclude`.
    /// Unsent older snapshots are replaced.
    pub fn broadcast_state(&self, payload: &Bytes, exclude: Option<SessionId>) -> Vec<SessionId> {
        self.fan_out(exclude, |session| {
            session.outbound.push_state(payload.clone())
        })
    }

    fn fan_out<F>(&self, exclude: Option<SessionId>, mut send: F) -> Vec<SessionId>
    where
        F: FnMut(&Session) -> Result<(), MailboxError>,
    {
        let targets: Vec<Arc<Session>> = {
            let sessions = self.sessions.lock();
            sessions
                .values()
                .filter(|s| s.is_alive() && Some(s.id) != exclude)
                .cloned()
                .collect()
        };

        // A failing session is only stopped here. Its slot stays taken until
        // its own connection teardown unregisters it.
        let mut reached = Vec::with_capacity(targets.len());
        for session in targets {
            match send(&session) {
                Ok(()) => reached.push(session.id),
                Err(e) => {
                    warn!(session_id = session.id, error = %e, "Broadcast failed, stopping session");
                    session.kill();
                }
            }
        }
        reached
    }
}
