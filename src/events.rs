//! Per-store event listeners.
//!
//! Each store owns a [`Listeners`] registry. Callbacks are registered per
//! event kind with [`Listeners::on`] and removed with [`Listeners::off`].
//! Async consumers can instead take a broadcast receiver from
//! [`Listeners::subscribe`], which sees every event.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;

/// Capacity of the broadcast channel; slow receivers past this lag.
const BROADCAST_CAPACITY: usize = 64;

/// Events emitted by a store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigEvent {
    /// The store's content was replaced by a reload.
    Reload,
    /// A reload failed; the previous content is still live.
    Error(String),
}

impl ConfigEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            ConfigEvent::Reload => EventKind::Reload,
            ConfigEvent::Error(_) => EventKind::Error,
        }
    }
}

/// Event names listeners register for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Reload,
    Error,
}

/// Handle returned by [`Listeners::on`], used to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Callback = Arc<dyn Fn(&ConfigEvent) + Send + Sync>;

/// Listener registry owned by a single store.
pub struct Listeners {
    next_id: AtomicU64,
    callbacks: Mutex<Vec<(ListenerId, EventKind, Callback)>>,
    broadcast: broadcast::Sender<ConfigEvent>,
}

impl Listeners {
    pub fn new() -> Self {
        let (broadcast, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            next_id: AtomicU64::new(1),
            callbacks: Mutex::new(Vec::new()),
            broadcast,
        }
    }

    /// Register a callback for one kind of event.
    pub fn on<F>(&self, kind: EventKind, callback: F) -> ListenerId
    where
        F: Fn(&ConfigEvent) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock().push((id, kind, Arc::new(callback)));
        id
    }

    /// Remove a callback. Returns `true` if it was registered.
    pub fn off(&self, id: ListenerId) -> bool {
        let mut callbacks = self.lock();
        let before = callbacks.len();
        callbacks.retain(|(existing, _, _)| *existing != id);
        callbacks.len() != before
    }

    /// Receive every future event on an async channel.
    pub fn subscribe(&self) -> broadcast::Receiver<ConfigEvent> {
        self.broadcast.subscribe()
    }

    /// Number of registered callbacks.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver an event to matching callbacks, then to broadcast receivers.
    ///
    /// Callbacks run without the registry lock held, so they may register or
    /// remove listeners, or call back into the store.
    pub fn emit(&self, event: ConfigEvent) {
        let kind = event.kind();
        let matching: Vec<Callback> = self
            .lock()
            .iter()
            .filter(|(_, k, _)| *k == kind)
            .map(|(_, _, cb)| Arc::clone(cb))
            .collect();

        for callback in matching {
            callback(&event);
        }

        // No receivers is fine.
        let _ = self.broadcast.send(event);
    }

    fn lock(&self) -> MutexGuard<'_, Vec<(ListenerId, EventKind, Callback)>> {
        self.callbacks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for Listeners {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Listeners {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listeners")
            .field("callbacks", &self.len())
            .field("receivers", &self.broadcast.receiver_count())
            .finish()
    }
}
