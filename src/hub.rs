//! Broadcast hub.
//!
//! Each connection runs its own task that feeds inbound frames through
//! [`Hub::ingest`] one at a time. An event is appended to the store before
//! anyone sees it, then pushed onto the outbound queue of every registered
//! connection, the sender included.

use std::{
    collections::HashSet,
    sync::{
        Arc,
        atomic::{AtomicI64, Ordering},
    },
};

use time::OffsetDateTime;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    codec::{self, Event},
    error::IngestError,
    registry::{ConnectionId, Outbound, Peer, Registry},
    store::{MessageStore, from_millis, to_millis},
};

/// One open connection as seen by its transport task.
pub struct Session {
    id: ConnectionId,
    history: String,
    replayed: HashSet<Uuid>,
    rx: mpsc::UnboundedReceiver<Arc<Outbound>>,
}

impl Session {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// The `history` frame. Must be written before anything from [`Session::recv`].
    pub fn history_frame(&self) -> &str {
        &self.history
    }

    /// Next queued frame, in broadcast order. `None` once deregistered.
    ///
    /// Events that were already part of the history frame are skipped.
    pub async fn recv(&mut self) -> Option<Arc<Outbound>> {
        loop {
            let outbound = self.rx.recv().await?;
            if let Some(outbound) = self.admit(outbound) {
                return Some(outbound);
            }
        }
    }

    // history ids are only kept until the first live event
    fn admit(&mut self, outbound: Arc<Outbound>) -> Option<Arc<Outbound>> {
        let Some(id) = outbound.event_id else {
            return Some(outbound);
        };
        if self.replayed.remove(&id) {
            return None;
        }
        if !self.replayed.is_empty() {
            self.replayed = HashSet::new();
        }
        Some(outbound)
    }
}

pub struct Hub {
    store: Arc<dyn MessageStore>,
    registry: Registry,
    // millis of the latest stamp handed out
    last_stamp: AtomicI64,
}

impl Hub {
    pub fn new(store: Arc<dyn MessageStore>) -> Self {
        Self {
            store,
            registry: Registry::new(),
            last_stamp: AtomicI64::new(i64::MIN),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Registers a new connection and loads its history.
    ///
    /// A failed history read still opens the connection, with an empty
    /// history frame.
    pub async fn connect(&self) -> Session {
        let id = ConnectionId::new();
        let (peer, rx) = Peer::new(id);
        self.registry.register(peer).await;

        let history = match self.store.read_all_ordered().await {
            Ok(history) => history,
            Err(e) => {
                warn!(conn = %id, error = %e, "history unavailable, replaying nothing");
                Vec::new()
            }
        };
        info!(conn = %id, history = history.len(), "client connected");

        Session {
            id,
            history: codec::encode_history(&history),
            replayed: history.iter().map(|event| event.id).collect(),
            rx,
        }
    }

    /// Handles one inbound frame from `from`.
    ///
    /// Malformed frames and failed appends are reported to the caller and
    /// leave the connection usable. On success the persisted event is
    /// returned after it has been queued for every registered connection.
    pub async fn ingest(&self, from: ConnectionId, raw: &[u8]) -> Result<Event, IngestError> {
        let inbound = codec::decode(raw).inspect_err(|e| {
            debug!(conn = %from, error = %e, "dropping frame");
        })?;

        let event = Event::stamp(inbound, self.stamp_at(OffsetDateTime::now_utc()));
        if let Err(e) = self.store.append(&event).await {
            warn!(conn = %from, kind = %event.kind, error = %e, "append failed, not broadcasting");
            if let Some(peer) = self.registry.get(from).await {
                let _ = peer.send(Arc::new(Outbound {
                    event_id: None,
                    frame: codec::encode_error("message could not be saved"),
                }));
            }
            return Err(e.into());
        }

        let peers = self.broadcast(&event).await;
        debug!(conn = %from, kind = %event.kind, id = %event.id, peers, "event relayed");
        Ok(event)
    }

    /// Deregisters a connection. Safe to call more than once.
    pub async fn disconnect(&self, id: ConnectionId) {
        if self.registry.deregister(id).await {
            info!(conn = %id, "client disconnected");
        }
    }

    async fn broadcast(&self, event: &Event) -> usize {
        let outbound = Arc::new(Outbound {
            event_id: Some(event.id),
            frame: codec::encode_event(event),
        });

        let mut delivered = 0;
        for peer in self.registry.snapshot().await {
            match peer.send(outbound.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    debug!(error = %e, "send failed, dropping peer");
                    self.registry.deregister(peer.id()).await;
                }
            }
        }
        delivered
    }

    /// `now` truncated to millis, never behind a stamp already issued.
    fn stamp_at(&self, now: OffsetDateTime) -> OffsetDateTime {
        let millis = to_millis(now);
        let latest = self.last_stamp.fetch_max(millis, Ordering::AcqRel).max(millis);
        from_millis(latest).unwrap_or(now)
    }
}
