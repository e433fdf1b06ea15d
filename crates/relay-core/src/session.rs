use dashmap::DashMap;

use crate::connection::ConnectionHandle;
use crate::ids::{ConnectionId, UserId};

/// Node-local binding of user identities to connection handles.
///
/// Each operation is atomic per key; no cross-key locking. Sessions are never
/// replicated, so a missing entry is an expected state, not a fault.
pub struct SessionTable<H = ConnectionHandle> {
    sessions: DashMap<UserId, H>,
}

impl<H: Clone> SessionTable<H> {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    pub fn get(&self, uid: &UserId) -> Option<H> {
        self.sessions.get(uid).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, uid: &UserId) -> bool {
        self.sessions.contains_key(uid)
    }

    /// Bind a user, returning the handle it replaced.
    pub fn bind(&self, uid: UserId, handle: H) -> Option<H> {
        self.sessions.insert(uid, handle)
    }

    pub fn unbind(&self, uid: &UserId) -> Option<H> {
        self.sessions.remove(uid).map(|(_, handle)| handle)
    }

    /// Remove the binding only if the current handle matches `predicate`.
    pub fn unbind_if(&self, uid: &UserId, predicate: impl FnOnce(&H) -> bool) -> Option<H> {
        self.sessions
            .remove_if(uid, |_, handle| predicate(handle))
            .map(|(_, handle)| handle)
    }

    /// Keep only bindings for which `keep` returns true.
    pub fn retain(&self, mut keep: impl FnMut(&UserId, &H) -> bool) {
        self.sessions.retain(|uid, handle| keep(uid, handle));
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl<H: Clone> Default for SessionTable<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionTable<ConnectionHandle> {
    /// Drop every binding that points at the given connection. Returns how many went.
    pub fn unbind_connection(&self, connection: &ConnectionId) -> usize {
        let before = self.len();
        self.retain(|_, handle| handle.id() != connection);
        before.saturating_sub(self.len())
    }
}
