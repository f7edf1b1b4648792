//! Live connection set.
//!
//! Each registered connection owns an unbounded outbound queue. The registry
//! holds the sending half; whoever drains the receiving half (the socket
//! writer) decides how fast that connection is served.

use std::{collections::HashMap, fmt, sync::Arc};

use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

use crate::error::SendError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

/// An encoded frame queued for delivery.
#[derive(Debug)]
pub struct Outbound {
    /// Event this frame carries, if any.
    pub event_id: Option<Uuid>,
    pub frame: String,
}

/// Sending half of one connection's outbound queue.
#[derive(Debug, Clone)]
pub struct Peer {
    id: ConnectionId,
    tx: mpsc::UnboundedSender<Arc<Outbound>>,
}

impl Peer {
    pub fn new(id: ConnectionId) -> (Self, mpsc::UnboundedReceiver<Arc<Outbound>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { id, tx }, rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn send(&self, outbound: Arc<Outbound>) -> Result<(), SendError> {
        self.tx
            .send(outbound)
            .map_err(|_| SendError::Closed(self.id))
    }
}

#[derive(Debug, Default)]
pub struct Registry {
    peers: RwLock<HashMap<ConnectionId, Peer>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a peer. Registering the same id again keeps the first peer.
    pub async fn register(&self, peer: Peer) {
        self.peers.write().await.entry(peer.id).or_insert(peer);
    }

    /// Removes a peer. Returns false if it was not registered.
    pub async fn deregister(&self, id: ConnectionId) -> bool {
        self.peers.write().await.remove(&id).is_some()
    }

    pub async fn get(&self, id: ConnectionId) -> Option<Peer> {
        self.peers.read().await.get(&id).cloned()
    }

    /// Point-in-time copy of the membership.
    pub async fn snapshot(&self) -> Vec<Peer> {
        self.peers.read().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.peers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.peers.read().await.is_empty()
    }
}
