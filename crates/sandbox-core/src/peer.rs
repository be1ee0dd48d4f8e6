//! Connected peers and fan-out membership sets.

use std::{collections::HashMap, sync::Mutex};

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::Envelope;

/// Peer identifier, unique per connection.
pub type PeerId = Uuid;

/// A connected viewer/controller of a session resource.
///
/// Cheap to clone: the queue is the peer's outbound connection writer,
/// shared by every registry the peer joins. Membership in a registry is
/// never ownership — dropping a `Peer` clone does not close the connection.
#[derive(Debug, Clone)]
pub struct Peer {
    id: PeerId,
    tx: mpsc::UnboundedSender<Envelope>,
}

impl Peer {
    /// Create a peer with a fresh id around an outbound queue.
    #[must_use]
    pub fn new(tx: mpsc::UnboundedSender<Envelope>) -> Self {
        Self {
            id: Uuid::new_v4(),
            tx,
        }
    }

    /// This peer's identifier.
    #[must_use]
    pub const fn id(&self) -> PeerId {
        self.id
    }

    /// Queue an envelope for delivery. A closed queue means the connection
    /// is already gone; the envelope is silently dropped.
    pub fn send(&self, envelope: Envelope) {
        if self.tx.send(envelope).is_err() {
            tracing::trace!(peer = %self.id, "peer queue closed, dropping envelope");
        }
    }
}

/// Concurrency-safe membership set keyed by peer id.
///
/// Mutated from any connection's task; one mutex guards the map and
/// broadcasts snapshot the membership under that mutex before sending, so
/// concurrent joins/leaves never race an in-progress fan-out.
#[derive(Debug, Default)]
pub struct PeerSet {
    inner: Mutex<HashMap<PeerId, Peer>>,
}

impl PeerSet {
    /// Create an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a peer. Idempotent: re-adding the same id replaces the entry.
    pub fn add(&self, peer: Peer) {
        self.inner.lock().unwrap().insert(peer.id(), peer);
    }

    /// Remove a peer. Idempotent; returns whether it was a member.
    pub fn remove(&self, id: PeerId) -> bool {
        self.inner.lock().unwrap().remove(&id).is_some()
    }

    /// Whether `id` is a member.
    #[must_use]
    pub fn contains(&self, id: PeerId) -> bool {
        self.inner.lock().unwrap().contains_key(&id)
    }

    /// Current membership count.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    /// Whether the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().is_empty()
    }

    /// Drop all members.
    pub fn clear(&self) {
        self.inner.lock().unwrap().clear();
    }

    /// Send `envelope` to every current member.
    ///
    /// Peers added after the snapshot is taken do not receive this
    /// envelope — late joiners only see subsequent broadcasts.
    pub fn broadcast(&self, envelope: &Envelope) {
        let peers: Vec<Peer> = self.inner.lock().unwrap().values().cloned().collect();
        for peer in peers {
            peer.send(envelope.clone());
        }
    }
}
