//! Typed event bus
//!
//! Every loader, aggregate and module system owns an [`Emitter`]. Handlers
//! subscribe to one event kind, several kinds, or all kinds, and are called
//! synchronously in registration order with the owner and the event.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::warn;

use crate::config::HandlerFaultPolicy;
use crate::utils::lock;

/// Event payload with a discriminating kind
pub trait Event: fmt::Debug {
    type Kind: Copy + Eq + fmt::Debug + Send + Sync + 'static;

    fn kind(&self) -> Self::Kind;
}

/// Stable id assigned to each subscription
pub type ListenerId = u64;

/// Shared handler reference
///
/// Returning `true` marks the event as handled and stops dispatch.
pub type Handler<O, E> = Arc<dyn Fn(&O, &E) -> bool + Send + Sync>;

/// What a subscription listens to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topic<K> {
    Kind(K),
    /// Every event kind
    Any,
}

impl<K: PartialEq> Topic<K> {
    fn accepts(&self, kind: &K) -> bool {
        match self {
            Topic::Kind(k) => k == kind,
            Topic::Any => true,
        }
    }
}

struct Listener<O, E: Event> {
    id: ListenerId,
    topic: Topic<E::Kind>,
    handler: Handler<O, E>,
}

/// Per-owner publish/subscribe list
pub struct Emitter<O, E: Event> {
    listeners: Mutex<Vec<Listener<O, E>>>,
    next_id: AtomicU64,
    faults: HandlerFaultPolicy,
}

impl<O, E: Event> Emitter<O, E> {
    pub fn new() -> Self {
        Self::with_policy(HandlerFaultPolicy::default())
    }

    pub fn with_policy(faults: HandlerFaultPolicy) -> Self {
        Self {
            listeners: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            faults,
        }
    }

    /// Subscribe a shared handler to a topic
    pub fn subscribe(&self, topic: Topic<E::Kind>, handler: Handler<O, E>) -> ListenerId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        lock(&self.listeners).push(Listener { id, topic, handler });
        id
    }

    /// Subscribe to one event kind
    pub fn on<F>(&self, kind: E::Kind, handler: F) -> ListenerId
    where
        F: Fn(&O, &E) -> bool + Send + Sync + 'static,
    {
        self.subscribe(Topic::Kind(kind), Arc::new(handler))
    }

    /// Subscribe one handler to several kinds, one entry per kind
    ///
    /// All entries share the handler reference, so `off_handler` removes them
    /// together.
    pub fn on_each<F>(&self, kinds: &[E::Kind], handler: F) -> Vec<ListenerId>
    where
        F: Fn(&O, &E) -> bool + Send + Sync + 'static,
    {
        let handler: Handler<O, E> = Arc::new(handler);
        kinds
            .iter()
            .map(|kind| self.subscribe(Topic::Kind(*kind), Arc::clone(&handler)))
            .collect()
    }

    /// Subscribe to every event kind
    pub fn on_any<F>(&self, handler: F) -> ListenerId
    where
        F: Fn(&O, &E) -> bool + Send + Sync + 'static,
    {
        self.subscribe(Topic::Any, Arc::new(handler))
    }

    /// Remove a subscription by id
    pub fn off(&self, id: ListenerId) -> bool {
        let mut listeners = lock(&self.listeners);
        let before = listeners.len();
        listeners.retain(|listener| listener.id != id);
        listeners.len() != before
    }

    /// Remove every subscription using `handler`; returns how many were removed
    pub fn off_handler(&self, handler: &Handler<O, E>) -> usize {
        let mut listeners = lock(&self.listeners);
        let before = listeners.len();
        listeners.retain(|listener| !same_handler(&listener.handler, handler));
        before - listeners.len()
    }

    /// Dispatch `event` to matching handlers in registration order
    ///
    /// Returns `true` if a handler reported the event as handled, which stops
    /// dispatch. Handlers run without the listener lock held, so they may
    /// subscribe or unsubscribe. A panicking handler is logged and skipped
    /// unless the emitter propagates handler faults.
    pub fn fire(&self, owner: &O, event: &E) -> bool {
        let kind = event.kind();
        let matching: Vec<(ListenerId, Handler<O, E>)> = lock(&self.listeners)
            .iter()
            .filter(|listener| listener.topic.accepts(&kind))
            .map(|listener| (listener.id, Arc::clone(&listener.handler)))
            .collect();

        for (id, handler) in matching {
            match panic::catch_unwind(AssertUnwindSafe(|| handler(owner, event))) {
                Ok(true) => return true,
                Ok(false) => {}
                Err(payload) => match self.faults {
                    HandlerFaultPolicy::Isolate => {
                        warn!(
                            "Event handler {} panicked on {:?}: {}",
                            id,
                            kind,
                            panic_message(payload.as_ref())
                        );
                    }
                    HandlerFaultPolicy::Propagate => panic::resume_unwind(payload),
                },
            }
        }
        false
    }

    pub fn len(&self) -> usize {
        lock(&self.listeners).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        lock(&self.listeners).clear();
    }
}

impl<O, E: Event> Default for Emitter<O, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<O, E: Event> fmt::Debug for Emitter<O, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Emitter")
            .field("listeners", &self.len())
            .field("faults", &self.faults)
            .finish()
    }
}

fn same_handler<O, E>(a: &Handler<O, E>, b: &Handler<O, E>) -> bool {
    // Compare data pointers only; vtables may be duplicated across codegen units
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
