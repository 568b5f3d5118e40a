use dashmap::DashMap;
use tokio::sync::mpsc;

use medichat_core::ids::{ConnectionId, UserId};

/// One live transport bound to a verified identity. The send half feeds the
/// connection's single writer task, so delivery to a given connection is
/// FIFO in the order sends were issued.
pub struct Connection {
    pub id: ConnectionId,
    pub user_id: UserId,
    tx: mpsc::Sender<String>,
}

/// Registry of live connections keyed by connection id, with delivery by
/// user id. Owned by the accepting component and passed by handle to each
/// connection task; nothing here is a hidden global.
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, Connection>,
    max_send_queue: usize,
}

impl ConnectionRegistry {
    pub fn new(max_send_queue: usize) -> Self {
        Self {
            connections: DashMap::new(),
            max_send_queue,
        }
    }

    /// Register a new connection under a user identity. Each transport
    /// registers exactly once; many connections may share a user id.
    pub fn register(&self, user_id: UserId) -> (ConnectionId, mpsc::Receiver<String>) {
        let id = ConnectionId::new();
        let (tx, rx) = mpsc::channel(self.max_send_queue);
        self.connections.insert(
            id.clone(),
            Connection {
                id: id.clone(),
                user_id,
                tx,
            },
        );
        (id, rx)
    }

    /// Remove a connection. No-op if it was never registered or already
    /// removed.
    pub fn unregister(&self, id: &ConnectionId) {
        self.connections.remove(id);
    }

    /// Deliver a payload to one specific connection (error reporting back
    /// to the invoking socket). Returns false if the connection is gone.
    pub fn send_to(&self, id: &ConnectionId, payload: &str) -> bool {
        match self.connections.get(id) {
            Some(conn) => queue(&conn, payload),
            None => false,
        }
    }

    /// Deliver a payload to every connection registered for a user.
    /// Returns the number of connections the payload was queued to; zero
    /// is not an error — the user may simply be offline.
    pub fn send_to_user(&self, user_id: UserId, payload: &str) -> usize {
        let mut delivered = 0;
        for entry in self.connections.iter() {
            if entry.value().user_id == user_id && queue(entry.value(), payload) {
                delivered += 1;
            }
        }
        delivered
    }

    /// Deliver a payload to every live connection (presence snapshots).
    pub fn broadcast_all(&self, payload: &str) {
        for entry in self.connections.iter() {
            queue(entry.value(), payload);
        }
    }

    /// Number of live connections.
    pub fn count(&self) -> usize {
        self.connections.len()
    }

    /// Number of live connections for one user.
    pub fn connections_for_user(&self, user_id: UserId) -> usize {
        self.connections
            .iter()
            .filter(|entry| entry.value().user_id == user_id)
            .count()
    }
}

fn queue(conn: &Connection, payload: &str) -> bool {
    match conn.tx.try_send(payload.to_string()) {
        Ok(()) => true,
        Err(mpsc::error::TrySendError::Full(_)) => {
            // Backpressure: drop this payload rather than block the sender.
            tracing::warn!(
                connection_id = %conn.id,
                user_id = %conn.user_id,
                "send queue full, dropping payload"
            );
            false
        }
        Err(mpsc::error::TrySendError::Closed(_)) => false,
    }
}
