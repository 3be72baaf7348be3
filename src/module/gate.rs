//! Readiness gates
//!
//! A gate is a deferred readiness token created while a module is being
//! declared. Its disposition is fixed by the first settle or reject; later
//! calls are no-ops.

use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

use crate::module::traits::GateError;

/// Current disposition of a gate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    Pending,
    Settled,
    Rejected(String),
}

/// Deferred readiness token
#[derive(Clone)]
pub struct Gate {
    state: Arc<watch::Sender<Disposition>>,
}

impl Gate {
    /// Create a gate and hand its resolver to `body`
    ///
    /// An error returned by `body` rejects the gate, unless the body already
    /// settled or rejected it.
    pub fn new<F>(body: F) -> Self
    where
        F: FnOnce(Resolver) -> anyhow::Result<()>,
    {
        let (gate, resolver) = Self::pending();
        if let Err(e) = body(resolver) {
            gate.finish(Disposition::Rejected(e.to_string()));
        }
        gate
    }

    /// A pending gate and the resolver that decides it
    pub fn pending() -> (Self, Resolver) {
        let (state, _) = watch::channel(Disposition::Pending);
        let gate = Self {
            state: Arc::new(state),
        };
        let resolver = Resolver { gate: gate.clone() };
        (gate, resolver)
    }

    pub fn disposition(&self) -> Disposition {
        self.state.borrow().clone()
    }

    pub fn is_pending(&self) -> bool {
        *self.state.borrow() == Disposition::Pending
    }

    fn finish(&self, disposition: Disposition) -> bool {
        let applied = self.state.send_if_modified(|current| {
            if *current == Disposition::Pending {
                *current = disposition;
                true
            } else {
                false
            }
        });
        if !applied {
            debug!("Gate already decided, ignoring later disposition");
        }
        applied
    }

    /// Wait until the gate is decided
    pub async fn wait(&self) -> Result<(), GateError> {
        let mut receiver = self.state.subscribe();
        let decided = receiver
            .wait_for(|disposition| *disposition != Disposition::Pending)
            .await
            .map_err(|_| GateError::Abandoned)?;
        match &*decided {
            Disposition::Rejected(reason) => Err(GateError::Rejected(reason.clone())),
            _ => Ok(()),
        }
    }
}

impl fmt::Debug for Gate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Gate").field(&*self.state.borrow()).finish()
    }
}

/// Settles or rejects one gate; clones share the same gate
#[derive(Clone)]
pub struct Resolver {
    gate: Gate,
}

impl Resolver {
    /// Mark the gate ready; returns `false` if it was already decided
    pub fn settle(&self) -> bool {
        self.gate.finish(Disposition::Settled)
    }

    /// Mark the gate failed; returns `false` if it was already decided
    pub fn reject(&self, reason: impl Into<String>) -> bool {
        self.gate.finish(Disposition::Rejected(reason.into()))
    }

    pub fn gate(&self) -> &Gate {
        &self.gate
    }
}

impl fmt::Debug for Resolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver").field("gate", &self.gate).finish()
    }
}
