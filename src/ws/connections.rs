//! Connection registry - live outbound queues keyed by connection identity

use indexmap::IndexMap;
use tokio::sync::mpsc;
use uuid::Uuid;

/// A serialized frame ready to be written to a socket
pub type Frame = String;

/// Sending half of a connection's outbound queue
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub id: Uuid,
    pub outbound: mpsc::Sender<Frame>,
}

impl ConnectionHandle {
    /// Whether the writer side is still receiving
    pub fn is_open(&self) -> bool {
        !self.outbound.is_closed()
    }
}

/// Live connections in the order they were added
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: IndexMap<Uuid, ConnectionHandle>,
}

impl ConnectionRegistry {
    /// Register an outbound queue under a freshly minted identity
    pub fn add(&mut self, outbound: mpsc::Sender<Frame>) -> Uuid {
        let mut id = Uuid::new_v4();
        while self.connections.contains_key(&id) {
            id = Uuid::new_v4();
        }
        self.connections.insert(id, ConnectionHandle { id, outbound });
        id
    }

    /// Remove a connection. Removing an unknown id is a no-op.
    pub fn remove(&mut self, id: &Uuid) -> Option<ConnectionHandle> {
        self.connections.shift_remove(id)
    }

    pub fn contains(&self, id: &Uuid) -> bool {
        self.connections.contains_key(id)
    }

    pub fn get(&self, id: &Uuid) -> Option<&ConnectionHandle> {
        self.connections.get(id)
    }

    /// Visit every connection whose writer is still open
    pub fn for_each_live<F>(&self, f: F)
    where
        F: FnMut(&ConnectionHandle),
    {
        self.connections.values().filter(|c| c.is_open()).for_each(f);
    }

    /// Ids of registered connections whose writer has gone away
    pub fn stale(&self) -> Vec<Uuid> {
        self.connections
            .values()
            .filter(|c| !c.is_open())
            .map(|c| c.id)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }
}
