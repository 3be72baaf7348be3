//! Per-request loader
//!
//! A [`Loader`] wraps one externally supplied fetch operation. The operation
//! receives a [`Completion`] handle and consumes it exactly once to report
//! the outcome, at which point the loader becomes terminal.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex, Weak};
use tracing::{debug, warn};

use crate::config::HandlerFaultPolicy;
use crate::module::api::events::{Emitter, Event};
use crate::module::definition::Module;
use crate::module::traits::{LoaderError, Request};
use crate::utils::lock;

/// Loader lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoaderState {
    Initial,
    Success,
    Error,
}

/// Notifications fired by a loader
#[derive(Debug, Clone, PartialEq)]
pub enum LoaderEvent {
    Progress(f64),
    Success,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoaderEventKind {
    Progress,
    Success,
    Error,
}

impl Event for LoaderEvent {
    type Kind = LoaderEventKind;

    fn kind(&self) -> LoaderEventKind {
        match self {
            LoaderEvent::Progress(_) => LoaderEventKind::Progress,
            LoaderEvent::Success => LoaderEventKind::Success,
            LoaderEvent::Error => LoaderEventKind::Error,
        }
    }
}

/// What a fetch operation reports when it completes
#[derive(Debug)]
pub enum FetchOutcome {
    /// The requested module
    Module(Arc<Module>),
    /// Nothing; success unless errors were reported beforehand
    Empty,
    /// Something that is not a module
    Unexpected(String),
}

/// Fetch operation supplied by a backend
pub type FetchFn = Box<dyn FnOnce(Completion) -> anyhow::Result<()> + Send>;

type DoneFn = Box<dyn FnOnce(&Arc<Loader>) + Send>;

struct LoaderInner {
    module: Option<Arc<Module>>,
    errors: Vec<Arc<LoaderError>>,
    terminal: Option<LoaderState>,
    progress: f64,
    fetch: Option<FetchFn>,
    /// Runs once, when the loader first becomes terminal
    on_done: Option<DoneFn>,
}

/// Runtime state for one request
pub struct Loader {
    request: Request,
    inner: Mutex<LoaderInner>,
    events: Emitter<Loader, LoaderEvent>,
    this: Weak<Loader>,
}

impl Loader {
    pub fn new<F>(request: Request, fetch: F) -> Arc<Self>
    where
        F: FnOnce(Completion) -> anyhow::Result<()> + Send + 'static,
    {
        Self::with_policy(request, HandlerFaultPolicy::default(), fetch)
    }

    pub fn with_policy<F>(request: Request, faults: HandlerFaultPolicy, fetch: F) -> Arc<Self>
    where
        F: FnOnce(Completion) -> anyhow::Result<()> + Send + 'static,
    {
        Arc::new_cyclic(|this| Self {
            request,
            inner: Mutex::new(LoaderInner {
                module: None,
                errors: Vec::new(),
                terminal: None,
                progress: 0.0,
                fetch: Some(Box::new(fetch)),
                on_done: None,
            }),
            events: Emitter::with_policy(faults),
            this: Weak::clone(this),
        })
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    /// Module stored on success
    pub fn module(&self) -> Option<Arc<Module>> {
        lock(&self.inner).module.clone()
    }

    /// Errors recorded so far, oldest first
    pub fn errors(&self) -> Vec<Arc<LoaderError>> {
        lock(&self.inner).errors.clone()
    }

    pub fn state(&self) -> LoaderState {
        lock(&self.inner).terminal.unwrap_or(LoaderState::Initial)
    }

    pub fn is_terminal(&self) -> bool {
        lock(&self.inner).terminal.is_some()
    }

    pub fn progress(&self) -> f64 {
        lock(&self.inner).progress
    }

    /// Store progress and notify; values are not validated
    pub fn set_progress(&self, progress: f64) {
        lock(&self.inner).progress = progress;
        self.events.fire(self, &LoaderEvent::Progress(progress));
    }

    pub fn events(&self) -> &Emitter<Loader, LoaderEvent> {
        &self.events
    }

    /// Start the fetch operation
    pub fn fetch(&self) {
        self.start(None);
    }

    /// Start the fetch operation and run `on_done` after it completes
    ///
    /// `on_done` runs once, whether the loader became terminal through its
    /// completion or through a fetch error.
    pub fn fetch_with<C>(&self, on_done: C)
    where
        C: FnOnce(&Arc<Loader>) + Send + 'static,
    {
        self.start(Some(Box::new(on_done)));
    }

    fn start(&self, on_done: Option<DoneFn>) {
        let Some(loader) = self.this.upgrade() else {
            return;
        };
        let operation = {
            let mut inner = lock(&self.inner);
            let operation = inner.fetch.take();
            if operation.is_some() {
                inner.on_done = on_done;
            }
            operation
        };
        let Some(operation) = operation else {
            warn!("Fetch of {} was already started", self.request);
            self.record(LoaderError::AlreadyStarted {
                request: self.request.to_string(),
            });
            return;
        };

        debug!("Fetching {}", self.request);
        let completion = Completion {
            loader: Arc::clone(&loader),
            settled: false,
        };
        if let Err(source) = operation(completion) {
            self.fail(LoaderError::Fetch {
                request: self.request.to_string(),
                source,
            });
            Self::done(&loader);
        }
    }

    /// Run the completion callback if it has not run yet
    fn done(loader: &Arc<Loader>) {
        let on_done = lock(&loader.inner).on_done.take();
        if let Some(on_done) = on_done {
            on_done(loader);
        }
    }

    fn record(&self, error: LoaderError) {
        lock(&self.inner).errors.push(Arc::new(error));
    }

    /// Record a fetch failure; terminal loaders keep their state
    fn fail(&self, error: LoaderError) {
        let transitioned = {
            let mut inner = lock(&self.inner);
            inner.errors.push(Arc::new(error));
            if inner.terminal.is_some() {
                false
            } else {
                inner.terminal = Some(LoaderState::Error);
                true
            }
        };
        if transitioned {
            debug!("Loader for {} failed", self.request);
            self.events.fire(self, &LoaderEvent::Error);
        } else {
            warn!("Fetch of {} failed after it had completed", self.request);
        }
    }

    fn finish(&self, outcome: FetchOutcome) {
        let state = {
            let mut inner = lock(&self.inner);
            if inner.terminal.is_some() {
                inner.errors.push(Arc::new(LoaderError::AlreadyCompleted {
                    request: self.request.to_string(),
                }));
                drop(inner);
                warn!("Fetch of {} completed more than once", self.request);
                return;
            }

            let state = match outcome {
                FetchOutcome::Module(module) => {
                    inner.module = Some(module);
                    LoaderState::Success
                }
                FetchOutcome::Unexpected(detail) => {
                    inner.errors.push(Arc::new(LoaderError::NotAModule {
                        request: self.request.to_string(),
                        detail,
                    }));
                    LoaderState::Error
                }
                FetchOutcome::Empty if inner.errors.is_empty() => LoaderState::Success,
                FetchOutcome::Empty => LoaderState::Error,
            };
            inner.terminal = Some(state);
            state
        };

        debug!("Loader for {} finished: {:?}", self.request, state);
        let event = match state {
            LoaderState::Success => LoaderEvent::Success,
            _ => LoaderEvent::Error,
        };
        self.events.fire(self, &event);
    }
}

impl fmt::Debug for Loader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = lock(&self.inner);
        f.debug_struct("Loader")
            .field("request", &self.request)
            .field("state", &inner.terminal.unwrap_or(LoaderState::Initial))
            .field("progress", &inner.progress)
            .field("errors", &inner.errors.len())
            .finish()
    }
}

/// Single-use completion handle given to a fetch operation
///
/// Consuming methods make the loader terminal. Dropping the handle without
/// completing leaves the loader pending forever.
pub struct Completion {
    loader: Arc<Loader>,
    settled: bool,
}

impl Completion {
    pub fn loader(&self) -> &Arc<Loader> {
        &self.loader
    }

    pub fn request(&self) -> &Request {
        &self.loader.request
    }

    pub fn set_progress(&self, progress: f64) {
        self.loader.set_progress(progress);
    }

    /// Record a backend error without completing
    pub fn report_error(&self, error: anyhow::Error) {
        self.loader.record(LoaderError::Backend(error));
    }

    /// Report the outcome; the loader becomes terminal
    pub fn complete(mut self, outcome: FetchOutcome) {
        self.settled = true;
        self.loader.finish(outcome);
        Loader::done(&self.loader);
    }

    /// Complete with a module
    pub fn resolve(self, module: Arc<Module>) {
        self.complete(FetchOutcome::Module(module));
    }

    /// Complete without a module
    pub fn succeed(self) {
        self.complete(FetchOutcome::Empty);
    }

    /// Record `error` and complete without a module
    pub fn fail(self, error: anyhow::Error) {
        self.report_error(error);
        self.complete(FetchOutcome::Empty);
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        if !self.settled && !self.loader.is_terminal() {
            warn!(
                "Completion for {} dropped without completing; the loader stays pending",
                self.loader.request
            );
        }
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("request", &self.loader.request)
            .field("settled", &self.settled)
            .finish()
    }
}
