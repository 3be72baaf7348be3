//! Aggregate request resolution
//!
//! [`Using`] takes a batch of requests, obtains one loader per request from
//! the registered loader factories, starts them all, and settles exactly once:
//! success with results in request order, or failure with every collected
//! error.

use futures::channel::oneshot;
use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::module::api::events::{Emitter, Event, ListenerId};
use crate::module::definition::Module;
use crate::module::loader::loader::{Loader, LoaderEventKind, LoaderState};
use crate::module::manager::{ModuleSystem, SystemEvent};
use crate::module::traits::{ConstructError, ErrorKind, Export, LoaderError, Request, UsingError};
use crate::utils::lock;

/// Notifications fired by a batch
#[derive(Debug, Clone, PartialEq)]
pub enum UsingEvent {
    /// Mean progress of all loaders
    Progress(f64),
    Success,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UsingEventKind {
    Progress,
    Success,
    Error,
}

impl Event for UsingEvent {
    type Kind = UsingEventKind;

    fn kind(&self) -> UsingEventKind {
        match self {
            UsingEvent::Progress(_) => UsingEventKind::Progress,
            UsingEvent::Success => UsingEventKind::Success,
            UsingEvent::Error => UsingEventKind::Error,
        }
    }
}

/// One entry of a successful batch
#[derive(Clone)]
pub enum Resolved {
    /// Value produced by the module's factory
    Value(Export),
    /// The module itself, when factory invocation was bypassed
    Module(Arc<Module>),
}

impl Resolved {
    pub fn into_value(self) -> Option<Export> {
        match self {
            Resolved::Value(value) => Some(value),
            Resolved::Module(_) => None,
        }
    }

    pub fn into_module(self) -> Option<Arc<Module>> {
        match self {
            Resolved::Module(module) => Some(module),
            Resolved::Value(_) => None,
        }
    }
}

impl fmt::Debug for Resolved {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resolved::Value(_) => f.write_str("Value(..)"),
            Resolved::Module(module) => f.debug_tuple("Module").field(&module.describe()).finish(),
        }
    }
}

/// A loader factory declined a request
#[derive(Debug, Clone)]
pub struct Rejection {
    pub system: String,
    pub request: Request,
    pub reason: String,
}

impl Rejection {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::RequestNotAccepted
    }
}

/// Errors of one failed loader
#[derive(Debug, Clone)]
pub struct RequestFailure {
    pub request: Request,
    pub errors: Vec<Arc<LoaderError>>,
}

/// Everything that went wrong in a failed batch
#[derive(Debug, Clone, Default)]
pub struct UsingFailure {
    /// Batch-level errors
    pub errors: Vec<Arc<UsingError>>,
    /// Loaders that ended in error, in request order
    pub requests: Vec<RequestFailure>,
}

impl UsingFailure {
    /// Total number of errors across the batch and its loaders
    pub fn len(&self) -> usize {
        self.errors.len()
            + self
                .requests
                .iter()
                .map(|failure| failure.errors.len())
                .sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every error message, batch errors first
    pub fn messages(&self) -> Vec<String> {
        self.errors
            .iter()
            .map(|error| error.to_string())
            .chain(
                self.requests
                    .iter()
                    .flat_map(|failure| failure.errors.iter().map(|error| error.to_string())),
            )
            .collect()
    }
}

impl fmt::Display for UsingFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} error(s): {}", self.len(), self.messages().join("; "))
    }
}

impl std::error::Error for UsingFailure {}

type SuccessFn = Box<dyn FnOnce(Vec<Resolved>) + Send>;
type FailFn = Box<dyn FnOnce(UsingFailure) + Send>;

struct Continuation {
    on_success: SuccessFn,
    on_fail: FailFn,
    bypass_factory: bool,
}

enum Phase {
    Idle,
    Waiting {
        continuation: Continuation,
        subscriptions: Vec<(usize, ListenerId)>,
    },
    Settled,
}

/// A batch of requests resolved together
pub struct Using {
    id: Uuid,
    system: Arc<ModuleSystem>,
    loaders: Vec<Arc<Loader>>,
    errors: Mutex<Vec<Arc<UsingError>>>,
    warnings: Vec<Rejection>,
    progress: Mutex<f64>,
    phase: Mutex<Phase>,
    events: Emitter<Using, UsingEvent>,
}

impl Using {
    /// Build loaders for every request
    ///
    /// Factories are tried in registration order. Rejections move on to the
    /// next factory and are kept as warnings; factory faults are recorded as
    /// errors and also move on. Requests nobody accepts are recorded as
    /// unsupported.
    pub(crate) fn new(system: Arc<ModuleSystem>, requests: Vec<Result<Request, UsingError>>) -> Arc<Self> {
        let id = Uuid::new_v4();
        let factories = system.loaders().entries();
        let mut loaders = Vec::new();
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        for request in requests {
            let request = match request {
                Ok(request) => request,
                Err(e) => {
                    warn!(using = %id, "{}", e);
                    errors.push(Arc::new(e));
                    continue;
                }
            };

            let mut accepted = false;
            for (name, factory) in &factories {
                match factory.create(&system, &request) {
                    Ok(loader) => {
                        debug!(using = %id, "loader '{}' accepted {}", name, request);
                        loaders.push(loader);
                        accepted = true;
                        break;
                    }
                    Err(ConstructError::Rejected(reason)) => {
                        debug!(using = %id, "loader '{}' rejected {}: {}", name, request, reason);
                        warnings.push(Rejection {
                            system: name.clone(),
                            request: request.clone(),
                            reason,
                        });
                    }
                    Err(ConstructError::Faulted(source)) => {
                        warn!(using = %id, "loader '{}' failed on {}: {}", name, request, source);
                        errors.push(Arc::new(UsingError::ConstructorFaulted {
                            system: name.clone(),
                            request: request.clone(),
                            source,
                        }));
                    }
                }
            }

            if !accepted {
                warn!(using = %id, "no loader accepted {}", request);
                errors.push(Arc::new(UsingError::UnsupportedRequest { request }));
            }
        }

        let faults = system.config().events.handler_faults;
        let using = Arc::new(Self {
            id,
            system: Arc::clone(&system),
            loaders,
            errors: Mutex::new(errors),
            warnings,
            progress: Mutex::new(0.0),
            phase: Mutex::new(Phase::Idle),
            events: Emitter::with_policy(faults),
        });
        system
            .events()
            .fire(&system, &SystemEvent::Using(Arc::clone(&using)));
        using
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn system(&self) -> &Arc<ModuleSystem> {
        &self.system
    }

    /// Accepted loaders in request order
    pub fn loaders(&self) -> &[Arc<Loader>] {
        &self.loaders
    }

    /// Batch-level errors recorded so far
    pub fn errors(&self) -> Vec<Arc<UsingError>> {
        lock(&self.errors).clone()
    }

    /// Factory rejections seen while building loaders
    pub fn warnings(&self) -> &[Rejection] {
        &self.warnings
    }

    /// Last computed mean progress
    pub fn progress(&self) -> f64 {
        *lock(&self.progress)
    }

    pub fn events(&self) -> &Emitter<Using, UsingEvent> {
        &self.events
    }

    pub fn is_settled(&self) -> bool {
        matches!(*lock(&self.phase), Phase::Settled)
    }

    /// Batch errors plus the errors of every failed loader
    pub fn failure(&self) -> UsingFailure {
        UsingFailure {
            errors: self.errors(),
            requests: self
                .loaders
                .iter()
                .filter(|loader| loader.state() == LoaderState::Error)
                .map(|loader| RequestFailure {
                    request: loader.request().clone(),
                    errors: loader.errors(),
                })
                .collect(),
        }
    }

    /// Start every loader and settle with the factory values
    pub fn then<S, F>(self: &Arc<Self>, on_success: S, on_fail: F)
    where
        S: FnOnce(Vec<Export>) + Send + 'static,
        F: FnOnce(UsingFailure) + Send + 'static,
    {
        self.then_with(
            false,
            move |results| on_success(results.into_iter().filter_map(Resolved::into_value).collect()),
            on_fail,
        );
    }

    /// Start every loader and settle with the modules, skipping their factories
    pub fn then_modules<S, F>(self: &Arc<Self>, on_success: S, on_fail: F)
    where
        S: FnOnce(Vec<Arc<Module>>) + Send + 'static,
        F: FnOnce(UsingFailure) + Send + 'static,
    {
        self.then_with(
            true,
            move |results| on_success(results.into_iter().filter_map(Resolved::into_module).collect()),
            on_fail,
        );
    }

    /// Start every loader; exactly one continuation runs, once
    ///
    /// Only the first call has any effect. A batch with construction errors
    /// fails without starting any loader; an empty batch succeeds at once.
    pub fn then_with<S, F>(self: &Arc<Self>, bypass_factory: bool, on_success: S, on_fail: F)
    where
        S: FnOnce(Vec<Resolved>) + Send + 'static,
        F: FnOnce(UsingFailure) + Send + 'static,
    {
        {
            let mut phase = lock(&self.phase);
            if !matches!(*phase, Phase::Idle) {
                warn!(using = %self.id, "continuations already attached, ignoring");
                return;
            }
            *phase = Phase::Waiting {
                continuation: Continuation {
                    on_success: Box::new(on_success),
                    on_fail: Box::new(on_fail),
                    bypass_factory,
                },
                subscriptions: Vec::new(),
            };
        }

        if !lock(&self.errors).is_empty() {
            if let Some(continuation) = self.take_continuation() {
                self.reject(continuation);
            }
            return;
        }
        if self.loaders.is_empty() {
            if let Some(continuation) = self.take_continuation() {
                self.accept(continuation, Vec::new());
            }
            return;
        }

        info!(using = %self.id, "fetching {} request(s)", self.loaders.len());
        for (index, loader) in self.loaders.iter().enumerate() {
            let using = Arc::clone(self);
            let mut ids = loader.events().on_each(
                &[LoaderEventKind::Success, LoaderEventKind::Error],
                move |_, _| {
                    using.check_completion();
                    false
                },
            );
            let using = Arc::clone(self);
            ids.push(loader.events().on(LoaderEventKind::Progress, move |_, _| {
                using.update_progress();
                false
            }));

            let registered = match &mut *lock(&self.phase) {
                Phase::Waiting { subscriptions, .. } => {
                    subscriptions.extend(ids.iter().map(|id| (index, *id)));
                    true
                }
                _ => false,
            };
            if !registered {
                for id in ids {
                    loader.events().off(id);
                }
                break;
            }

            self.system
                .events()
                .fire(&self.system, &SystemEvent::Request(Arc::clone(loader)));
            loader.fetch();
        }
    }

    /// Await the factory values
    ///
    /// Wrap in `tokio::time::timeout` for a deadline; a loader that never
    /// completes keeps this pending forever.
    pub async fn resolve(self: &Arc<Self>) -> Result<Vec<Export>, UsingFailure> {
        let (on_success, on_fail, receiver) = channel_continuations::<Vec<Export>>();
        self.then(on_success, on_fail);
        receiver.await.unwrap_or_else(|_| Err(already_attached()))
    }

    /// Await the modules, skipping their factories
    pub async fn resolve_modules(self: &Arc<Self>) -> Result<Vec<Arc<Module>>, UsingFailure> {
        let (on_success, on_fail, receiver) = channel_continuations::<Vec<Arc<Module>>>();
        self.then_modules(on_success, on_fail);
        receiver.await.unwrap_or_else(|_| Err(already_attached()))
    }

    fn take_continuation(&self) -> Option<Continuation> {
        let previous = std::mem::replace(&mut *lock(&self.phase), Phase::Settled);
        match previous {
            Phase::Waiting {
                continuation,
                subscriptions,
            } => {
                // Drop our listeners so loaders stop holding this batch alive
                for (index, id) in subscriptions {
                    self.loaders[index].events().off(id);
                }
                Some(continuation)
            }
            Phase::Idle => {
                *lock(&self.phase) = Phase::Idle;
                None
            }
            Phase::Settled => None,
        }
    }

    fn check_completion(&self) {
        let mut failed = false;
        for loader in &self.loaders {
            match loader.state() {
                LoaderState::Initial => return,
                LoaderState::Error => failed = true,
                LoaderState::Success => {}
            }
        }

        let Some(continuation) = self.take_continuation() else {
            return;
        };
        if failed || !lock(&self.errors).is_empty() {
            self.reject(continuation);
            return;
        }

        match self.assemble(continuation.bypass_factory) {
            Ok(results) => self.accept(continuation, results),
            Err(error) => {
                warn!(using = %self.id, "{}", error);
                lock(&self.errors).push(Arc::new(error));
                self.reject(continuation);
            }
        }
    }

    /// Results in request order; the first fault aborts
    fn assemble(&self, bypass_factory: bool) -> Result<Vec<Resolved>, UsingError> {
        self.loaders
            .iter()
            .map(|loader| {
                let module = loader.module().ok_or_else(|| UsingError::MissingModule {
                    request: loader.request().clone(),
                })?;
                if bypass_factory {
                    return Ok(Resolved::Module(module));
                }
                module
                    .invoke(&self.system, Some(loader.request()))
                    .map(Resolved::Value)
                    .map_err(|source| UsingError::Module {
                        request: loader.request().clone(),
                        source,
                    })
            })
            .collect()
    }

    fn update_progress(&self) {
        let total: f64 = self.loaders.iter().map(|loader| loader.progress()).sum();
        let mean = total / self.loaders.len() as f64;
        *lock(&self.progress) = mean;
        self.events.fire(self, &UsingEvent::Progress(mean));
    }

    fn accept(&self, continuation: Continuation, results: Vec<Resolved>) {
        info!(using = %self.id, "resolved {} request(s)", results.len());
        self.events.fire(self, &UsingEvent::Success);
        (continuation.on_success)(results);
    }

    fn reject(&self, continuation: Continuation) {
        let failure = self.failure();
        info!(using = %self.id, "failed with {}", failure);
        self.events.fire(self, &UsingEvent::Error);
        (continuation.on_fail)(failure);
    }
}

impl fmt::Debug for Using {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Using")
            .field("id", &self.id)
            .field("loaders", &self.loaders)
            .field("errors", &lock(&self.errors).len())
            .field("warnings", &self.warnings.len())
            .field("settled", &self.is_settled())
            .finish()
    }
}

type Outcome<T> = Result<T, UsingFailure>;

/// Continuations that forward whichever runs into one channel
#[allow(clippy::type_complexity)]
fn channel_continuations<T: Send + 'static>() -> (
    impl FnOnce(T) + Send + 'static,
    impl FnOnce(UsingFailure) + Send + 'static,
    oneshot::Receiver<Outcome<T>>,
) {
    let (sender, receiver) = oneshot::channel();
    let sender = Arc::new(Mutex::new(Some(sender)));
    let fail_sender = Arc::clone(&sender);

    let on_success = move |values: T| {
        if let Some(sender) = lock(&sender).take() {
            let _ = sender.send(Ok(values));
        }
    };
    let on_fail = move |failure: UsingFailure| {
        if let Some(sender) = lock(&fail_sender).take() {
            let _ = sender.send(Err(failure));
        }
    };
    (on_success, on_fail, receiver)
}

fn already_attached() -> UsingFailure {
    UsingFailure {
        errors: vec![Arc::new(UsingError::AlreadyAttached)],
        requests: Vec::new(),
    }
}
