//! The authoritative set of registered sessions

use std::collections::BTreeMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::crypto::PeerPublicKey;
use crate::send_path::SendPath;

/// Identifies one accepted connection for its whole lifetime
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Raw numeric value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A registered participant
///
/// `outbound` is the only way to write to this peer.
#[derive(Clone, Debug)]
pub struct Session {
    /// Connection handle
    pub id: ConnectionId,
    /// Where the peer connected from
    pub remote_addr: SocketAddr,
    /// Key every block to this peer is encrypted with
    pub peer_key: PeerPublicKey,
    /// Name shown as the sender label; not unique
    pub display_name: String,
    /// Queue feeding this peer's writer task
    pub outbound: SendPath,
}

/// Mutex-guarded map from connection handle to session
///
/// Iteration always happens on a [`snapshot`](ClientRegistry::snapshot), so a
/// broadcast never holds the lock while it fans out.
#[derive(Default)]
pub struct ClientRegistry {
    sessions: Mutex<BTreeMap<ConnectionId, Session>>,
    next_id: AtomicU64,
}

impl ClientRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Hand out a fresh connection handle
    pub fn allocate_id(&self) -> ConnectionId {
        ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1)
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<ConnectionId, Session>> {
        // A panic elsewhere cannot leave the map half-updated, so keep going
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `session`, returning the new registry size
    ///
    /// A session already registered under the same handle is replaced.
    pub fn add(&self, session: Session) -> usize {
        let mut sessions = self.lock();
        sessions.insert(session.id, session);
        sessions.len()
    }

    /// Deregister `id`; `None` if it was not registered
    pub fn remove(&self, id: ConnectionId) -> Option<Session> {
        self.lock().remove(&id)
    }

    /// Copy of every session, in connection order
    pub fn snapshot(&self) -> Vec<Session> {
        self.lock().values().cloned().collect()
    }

    /// Run `f` over the live map while holding the lock
    ///
    /// `f` must not block or call back into the registry.
    pub(crate) fn with_sessions<T>(&self, f: impl FnOnce(&BTreeMap<ConnectionId, Session>) -> T) -> T {
        f(&self.lock())
    }

    /// Look up one session
    pub fn get(&self, id: ConnectionId) -> Option<Session> {
        self.lock().get(&id).cloned()
    }

    /// Whether `id` is registered
    pub fn contains(&self, id: ConnectionId) -> bool {
        self.lock().contains_key(&id)
    }

    /// Number of registered sessions
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether nobody is registered
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Remove and return everyone
    pub fn drain(&self) -> Vec<Session> {
        std::mem::take(&mut *self.lock()).into_values().collect()
    }
}
