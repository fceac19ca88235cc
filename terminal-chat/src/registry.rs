//! Shared set of connected sessions.
//!
//! The registry is the only state shared between the accept loop, every
//! session task and the broadcast dispatcher. Structural changes happen
//! under a short `std::sync::Mutex` critical section; nothing awaits while
//! holding it. Iteration works on a cloned snapshot of `Arc<Peer>` handles,
//! so a peer removed mid-broadcast is still safe to touch: it is simply
//! observed as closed.

use std::{
    collections::BTreeMap,
    fmt, io,
    net::SocketAddr,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
};

use tokio::{
    io::{AsyncWrite, AsyncWriteExt},
    select,
    sync::{Mutex as AsyncMutex, watch},
};
use tracing::debug;

/// Identity of one accepted connection. Exclusion during broadcast compares
/// ids, never message content or addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId(u64);

impl SessionId {
    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// The registry's handle to a session: its write side plus a close signal.
///
/// The session task owns the read side and the read buffer; a `Peer` only
/// ever writes. Every recipient has its own writer lock, so two broadcasts
/// to the same peer queue up there and nowhere else.
pub struct Peer {
    id: SessionId,
    addr: SocketAddr,
    writer: AsyncMutex<BoxedWriter>,
    closed: watch::Sender<bool>,
}

impl Peer {
    pub fn new<W>(id: SessionId, addr: SocketAddr, writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (closed, _) = watch::channel(false);
        Self {
            id,
            addr,
            writer: AsyncMutex::new(Box::new(writer)),
            closed,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Writes `bytes` verbatim and flushes. Fails with `NotConnected` once
    /// the peer is closed, including when the close lands mid-write.
    pub async fn send(&self, bytes: &[u8]) -> io::Result<()> {
        if self.is_closed() {
            return Err(io::ErrorKind::NotConnected.into());
        }
        let mut writer = self.writer.lock().await;
        // The peer may have been closed while we queued for the writer.
        if self.is_closed() {
            return Err(io::ErrorKind::NotConnected.into());
        }
        select! {
            _ = self.closed() => Err(io::Error::from(io::ErrorKind::NotConnected)),
            written = async {
                writer.write_all(bytes).await?;
                writer.flush().await
            } => written,
        }
    }

    /// Marks the peer closed, wakes its receive loop, cancels any write in
    /// flight and shuts down the write side. Returns `false` when the peer
    /// was already closed, in which case nothing else happens.
    pub async fn close(&self) -> bool {
        let newly_closed = self.closed.send_if_modified(|closed| {
            if *closed {
                false
            } else {
                *closed = true;
                true
            }
        });
        if !newly_closed {
            return false;
        }

        // Any write holding the lock observes the flag and gives it up, and
        // queued writers bail out as soon as they acquire it.
        let mut writer = self.writer.lock().await;
        if let Err(error) = writer.shutdown().await {
            debug!(peer = %self.addr, ?error, "write half already gone");
        }
        true
    }

    /// Resolves once [`Peer::close`] has been called.
    pub async fn closed(&self) {
        let mut rx = self.closed.subscribe();
        // The sender lives in `self`, so `wait_for` cannot observe a dropped
        // channel while we are borrowed.
        let _ = rx.wait_for(|closed| *closed).await;
    }
}

impl fmt::Debug for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Peer")
            .field("id", &self.id)
            .field("addr", &self.addr)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Concurrent set of peers eligible to receive broadcasts.
pub struct Registry {
    peers: Mutex<BTreeMap<SessionId, Arc<Peer>>>,
    next_id: AtomicU64,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self {
            peers: Mutex::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Allocates a fresh session identity. Ids increase monotonically, so
    /// registry iteration follows accept order.
    pub fn next_id(&self) -> SessionId {
        SessionId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Inserts `peer`. Returns `false` if a peer with the same id is already
    /// registered; the existing entry is kept.
    pub fn add(&self, peer: Arc<Peer>) -> bool {
        let mut peers = self.lock();
        if peers.contains_key(&peer.id()) {
            return false;
        }
        peers.insert(peer.id(), peer);
        true
    }

    pub fn remove(&self, id: SessionId) -> Option<Arc<Peer>> {
        self.lock().remove(&id)
    }

    pub fn contains(&self, id: SessionId) -> bool {
        self.lock().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Owned snapshot of every peer except `excluded`, in registry order.
    pub fn snapshot_except(&self, excluded: Option<SessionId>) -> Vec<Arc<Peer>> {
        self.lock()
            .iter()
            .filter(|(id, _)| Some(**id) != excluded)
            .map(|(_, peer)| Arc::clone(peer))
            .collect()
    }

    /// Calls `f` for every peer except `excluded`. The lock is released
    /// before `f` runs, so `f` may itself add or remove peers.
    pub fn for_each_except<F>(&self, excluded: Option<SessionId>, mut f: F)
    where
        F: FnMut(&Arc<Peer>),
    {
        for peer in self.snapshot_except(excluded) {
            f(&peer);
        }
    }

    /// Empties the registry and hands back everything that was in it.
    pub fn clear(&self) -> Vec<Arc<Peer>> {
        std::mem::take(&mut *self.lock()).into_values().collect()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<SessionId, Arc<Peer>>> {
        // Critical sections never run user code, so a poisoned map is still
        // structurally sound.
        self.peers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
