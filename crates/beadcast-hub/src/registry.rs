//! Live set of push connections.
//!
//! The registry is the one structure touched by several tasks: accept tasks
//! add, connection handlers and the hub's dispatch path remove. Every
//! mutation goes through one `RwLock`, and readers take a snapshot so that
//! per-client I/O never happens while the lock is held.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::sink::ClientSink;

// ─── Identity ────────────────────────────────────────────────────────

/// Process-unique connection id. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(u64);

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client-{}", self.0)
    }
}

/// One live push connection as seen by the registry.
pub struct ClientHandle<S> {
    id: ClientId,
    sink: S,
    /// Fired when the handle leaves the registry, whoever removed it.
    closed: CancellationToken,
}

impl<S> ClientHandle<S> {
    pub fn id(&self) -> ClientId {
        self.id
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn closed(&self) -> &CancellationToken {
        &self.closed
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

impl<S> fmt::Debug for ClientHandle<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientHandle")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

// ─── Registry ────────────────────────────────────────────────────────

pub struct ClientRegistry<S> {
    clients: RwLock<BTreeMap<ClientId, Arc<ClientHandle<S>>>>,
    next_id: AtomicU64,
    /// Set under the write lock by `shut_down`; `insert` checks it there too.
    sealed: AtomicBool,
}

impl<S: ClientSink> ClientRegistry<S> {
    pub fn new() -> Self {
        Self {
            clients: RwLock::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
            sealed: AtomicBool::new(false),
        }
    }

    /// Allocate a handle for `sink` without registering it.
    pub fn handle(&self, sink: S) -> Arc<ClientHandle<S>> {
        let id = ClientId(self.next_id.fetch_add(1, Ordering::Relaxed));
        Arc::new(ClientHandle {
            id,
            sink,
            closed: CancellationToken::new(),
        })
    }

    /// Allocate and register in one step.
    pub async fn register(&self, sink: S) -> Arc<ClientHandle<S>> {
        let handle = self.handle(sink);
        self.insert(Arc::clone(&handle)).await;
        handle
    }

    /// Register an existing handle. Returns `false` (and changes nothing)
    /// if the id is already present or the handle was already closed.
    /// After `shut_down` every insert is refused and the handle is closed.
    pub async fn insert(&self, handle: Arc<ClientHandle<S>>) -> bool {
        if handle.is_closed() {
            return false;
        }
        let mut clients = self.clients.write().await;
        if self.sealed.load(Ordering::Acquire) {
            handle.closed.cancel();
            tracing::debug!(client = %handle.id, "registry shut down, client refused");
            return false;
        }
        if clients.contains_key(&handle.id) {
            return false;
        }
        tracing::debug!(client = %handle.id, total = clients.len() + 1, "client registered");
        clients.insert(handle.id, handle);
        true
    }

    /// Remove a client and fire its close token. Absent ids are a no-op.
    pub async fn deregister(&self, id: ClientId) -> Option<Arc<ClientHandle<S>>> {
        let removed = {
            let mut clients = self.clients.write().await;
            clients.remove(&id)
        };
        if let Some(handle) = &removed {
            handle.closed.cancel();
            tracing::debug!(client = %id, "client deregistered");
        }
        removed
    }

    /// Remove every client, firing each close token.
    pub async fn close_all(&self) -> usize {
        let drained = std::mem::take(&mut *self.clients.write().await);
        Self::fire_all(&drained)
    }

    /// `close_all`, then refuse every later insert.
    pub async fn shut_down(&self) -> usize {
        let drained = {
            let mut clients = self.clients.write().await;
            self.sealed.store(true, Ordering::Release);
            std::mem::take(&mut *clients)
        };
        Self::fire_all(&drained)
    }

    fn fire_all(drained: &BTreeMap<ClientId, Arc<ClientHandle<S>>>) -> usize {
        for handle in drained.values() {
            handle.closed.cancel();
        }
        drained.len()
    }

    /// Copy of the current membership, in registration order.
    pub async fn snapshot(&self) -> Vec<Arc<ClientHandle<S>>> {
        self.clients.read().await.values().cloned().collect()
    }

    /// Visit a snapshot of the membership. The lock is not held while
    /// `visit` runs, so it may call back into the registry.
    pub async fn for_each<F>(&self, mut visit: F)
    where
        F: FnMut(&Arc<ClientHandle<S>>),
    {
        for handle in self.snapshot().await {
            visit(&handle);
        }
    }

    pub async fn contains(&self, id: ClientId) -> bool {
        self.clients.read().await.contains_key(&id)
    }

    pub async fn len(&self) -> usize {
        self.clients.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.clients.read().await.is_empty()
    }
}

impl<S: ClientSink> Default for ClientRegistry<S> {
    fn default() -> Self {
        Self::new()
    }
}
