//! Live connections keyed by identity.

use std::collections::HashMap;
use std::sync::Arc;

use chatter_core::ConnectionId;
use chatter_net::Connection;
use parking_lot::RwLock;

struct Entry {
    seq: u64,
    connection: Arc<Connection>,
}

#[derive(Default)]
struct Inner {
    next_seq: u64,
    entries: HashMap<ConnectionId, Entry>,
}

/// Thread-safe set of the connections currently believed live.
///
/// Snapshots are ordered by insertion, so broadcast order follows join order.
#[derive(Default)]
pub struct Registry {
    inner: RwLock<Inner>,
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert under the connection's identity.
    ///
    /// Returns `false` and leaves the registry unchanged if the identity is
    /// already present.
    pub fn add(&self, connection: Arc<Connection>) -> bool {
        let mut inner = self.inner.write();
        if inner.entries.contains_key(connection.id()) {
            return false;
        }
        let seq = inner.next_seq;
        inner.next_seq += 1;
        let _ = inner
            .entries
            .insert(connection.id().clone(), Entry { seq, connection });
        true
    }

    /// Remove by identity. Only the caller that actually removed the entry
    /// gets it back.
    pub fn remove(&self, id: &ConnectionId) -> Option<Arc<Connection>> {
        self.inner.write().entries.remove(id).map(|e| e.connection)
    }

    /// Find a connection by identity.
    pub fn lookup(&self, id: &ConnectionId) -> Option<Arc<Connection>> {
        self.inner
            .read()
            .entries
            .get(id)
            .map(|e| Arc::clone(&e.connection))
    }

    /// Point-in-time copy in join order, safe to iterate while others
    /// add and remove.
    pub fn snapshot(&self) -> Vec<Arc<Connection>> {
        let inner = self.inner.read();
        let mut entries: Vec<&Entry> = inner.entries.values().collect();
        entries.sort_by_key(|e| e.seq);
        entries
            .into_iter()
            .map(|e| Arc::clone(&e.connection))
            .collect()
    }

    /// Identities in join order.
    pub fn identities(&self) -> Vec<ConnectionId> {
        self.snapshot().iter().map(|c| c.id().clone()).collect()
    }

    /// Remove everything, returning the removed connections in join order.
    pub fn drain(&self) -> Vec<Arc<Connection>> {
        let mut inner = self.inner.write();
        let mut entries: Vec<Entry> = inner.entries.drain().map(|(_, e)| e).collect();
        entries.sort_by_key(|e| e.seq);
        entries.into_iter().map(|e| e.connection).collect()
    }

    /// Number of registered connections.
    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    /// Whether no connections are registered.
    pub fn is_empty(&self) -> bool {
        self.inner.read().entries.is_empty()
    }
}
