#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use using_core::module::{
    export, Completion, ConstructError, Definition, Export, Loader, LoaderFactory, Module,
    ModuleSystem, RegistryLoader, Request, UsingFailure,
};

/// Backend that parks every completion until the test drives it
pub struct DeferredBackend {
    prefix: String,
    parked: Arc<Mutex<Vec<Completion>>>,
}

impl DeferredBackend {
    /// Accept id requests starting with `prefix`
    pub fn accepting(prefix: &str) -> Arc<Self> {
        Arc::new(Self {
            prefix: prefix.to_string(),
            parked: Arc::new(Mutex::new(Vec::new())),
        })
    }

    pub fn pending(&self) -> usize {
        self.parked.lock().unwrap().len()
    }

    /// Remove the parked completion for request `id`
    pub fn take(&self, id: &str) -> Completion {
        let mut parked = self.parked.lock().unwrap();
        let index = parked
            .iter()
            .position(|done| done.request().id() == Some(id))
            .unwrap_or_else(|| panic!("no parked completion for {}", id));
        parked.remove(index)
    }

    /// Report progress for request `id`; the completion stays parked
    pub fn set_progress(&self, id: &str, progress: f64) {
        let loader = {
            let parked = self.parked.lock().unwrap();
            let done = parked
                .iter()
                .find(|done| done.request().id() == Some(id))
                .unwrap_or_else(|| panic!("no parked completion for {}", id));
            Arc::clone(done.loader())
        };
        loader.set_progress(progress);
    }
}

impl LoaderFactory for DeferredBackend {
    fn create(&self, system: &Arc<ModuleSystem>, request: &Request) -> Result<Arc<Loader>, ConstructError> {
        let accepted = request.id().is_some_and(|id| id.starts_with(&self.prefix));
        if !accepted {
            return Err(ConstructError::rejected(format!("not under '{}'", self.prefix)));
        }

        let parked = Arc::clone(&self.parked);
        let faults = system.config().events.handler_faults;
        Ok(Loader::with_policy(request.clone(), faults, move |done| {
            parked.lock().unwrap().push(done);
            Ok(())
        }))
    }
}

/// System with the registry loader installed
pub fn system_with_registry() -> Arc<ModuleSystem> {
    // Another test may already have installed the subscriber
    let _ = using_core::utils::init_logging(Some("warn"));
    let system = Arc::new(ModuleSystem::new());
    system
        .register_loader(RegistryLoader::NAME, Arc::new(RegistryLoader))
        .unwrap();
    system
}

/// Define a module whose factory returns `value`
pub fn constant(system: &ModuleSystem, id: &str, value: &'static str) -> Arc<Module> {
    system
        .define(Definition::new(move |_| Ok(export(value))).id(id))
        .unwrap()
}

pub fn text(value: &Export) -> &'static str {
    *value.downcast_ref::<&'static str>().unwrap()
}

/// What a batch settled with
#[derive(Debug)]
pub enum Outcome {
    Success(Vec<Export>),
    Failure(UsingFailure),
}

impl Outcome {
    pub fn values(&self) -> &[Export] {
        match self {
            Outcome::Success(values) => values,
            Outcome::Failure(failure) => panic!("batch failed: {}", failure),
        }
    }

    pub fn failure(&self) -> &UsingFailure {
        match self {
            Outcome::Failure(failure) => failure,
            Outcome::Success(_) => panic!("batch succeeded"),
        }
    }
}

/// Collects every continuation call
pub type Outcomes = Arc<Mutex<Vec<Outcome>>>;

pub fn outcomes() -> Outcomes {
    Arc::new(Mutex::new(Vec::new()))
}

/// Continuations recording into `outcomes`
pub fn recording(
    outcomes: &Outcomes,
) -> (
    impl FnOnce(Vec<Export>) + Send + 'static,
    impl FnOnce(UsingFailure) + Send + 'static,
) {
    let on_success = Arc::clone(outcomes);
    let on_fail = Arc::clone(outcomes);
    (
        move |values| on_success.lock().unwrap().push(Outcome::Success(values)),
        move |failure| on_fail.lock().unwrap().push(Outcome::Failure(failure)),
    )
}
