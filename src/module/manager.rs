//! Module system
//!
//! [`ModuleSystem`] ties the pieces together: the module registry (write
//! path from `define`), the loader factory registry (read path from
//! `using`), the declaration parameter channel and the instrumentation bus.
//! A process-wide default instance backs the free functions in
//! [`crate::module`].

use serde_json::Value;
use std::fmt;
use std::sync::{Arc, Mutex, OnceLock};
use tracing::debug;

use crate::config::SystemConfig;
use crate::module::api::events::{Emitter, Event};
use crate::module::define::{definition_from_args, DefineArg, DefineParameters, Definition};
use crate::module::definition::Module;
use crate::module::gate::{Gate, Resolver};
use crate::module::loader::factory::{LoaderFactory, LoaderRegistry};
use crate::module::loader::loader::Loader;
use crate::module::registry::store::ModuleRegistry;
use crate::module::traits::{DefineError, RegistrationError, Request};
use crate::module::using::Using;
use crate::utils::{lock, with_lock};

/// Instrumentation fired on the system bus
#[derive(Clone)]
pub enum SystemEvent {
    /// A new batch was created
    Using(Arc<Using>),
    /// A batch dispatched one of its loaders
    Request(Arc<Loader>),
    /// A module was registered
    Defined(Arc<Module>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SystemEventKind {
    Using,
    Request,
    Defined,
}

impl Event for SystemEvent {
    type Kind = SystemEventKind;

    fn kind(&self) -> SystemEventKind {
        match self {
            SystemEvent::Using(_) => SystemEventKind::Using,
            SystemEvent::Request(_) => SystemEventKind::Request,
            SystemEvent::Defined(_) => SystemEventKind::Defined,
        }
    }
}

impl fmt::Debug for SystemEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SystemEvent::Using(using) => f.debug_tuple("Using").field(&using.id()).finish(),
            SystemEvent::Request(loader) => f.debug_tuple("Request").field(loader.request()).finish(),
            SystemEvent::Defined(module) => f.debug_tuple("Defined").field(&module.describe()).finish(),
        }
    }
}

/// Registry, loaders and parameter channel for one module namespace
pub struct ModuleSystem {
    registry: ModuleRegistry,
    loaders: LoaderRegistry,
    parameters: Mutex<DefineParameters>,
    events: Emitter<ModuleSystem, SystemEvent>,
    config: SystemConfig,
}

static GLOBAL: OnceLock<Arc<ModuleSystem>> = OnceLock::new();

impl ModuleSystem {
    pub fn new() -> Self {
        Self::with_config(SystemConfig::default())
    }

    /// Build a system with the registry and event policies from `config`
    pub fn with_config(config: SystemConfig) -> Self {
        Self {
            registry: ModuleRegistry::with_policy(config.registry.overwrite),
            loaders: LoaderRegistry::new(),
            parameters: Mutex::new(DefineParameters::default()),
            events: Emitter::with_policy(config.events.handler_faults),
            config,
        }
    }

    /// The process-wide default system
    pub fn global() -> Arc<ModuleSystem> {
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(ModuleSystem::new())))
    }

    pub fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    pub fn loaders(&self) -> &LoaderRegistry {
        &self.loaders
    }

    /// Instrumentation bus
    pub fn events(&self) -> &Emitter<ModuleSystem, SystemEvent> {
        &self.events
    }

    pub fn config(&self) -> &SystemConfig {
        &self.config
    }

    /// Register a loader factory under a module system name
    pub fn register_loader(
        &self,
        name: impl Into<String>,
        factory: Arc<dyn LoaderFactory>,
    ) -> Result<(), RegistrationError> {
        self.loaders.register(name, factory)
    }

    /// Snapshot of the declaration parameters
    pub fn parameters(&self) -> DefineParameters {
        lock(&self.parameters).clone()
    }

    pub fn set_parameters(&self, parameters: DefineParameters) {
        *lock(&self.parameters) = parameters;
    }

    /// Take the declaration parameters, leaving defaults behind
    pub fn take_parameters(&self) -> DefineParameters {
        std::mem::take(&mut *lock(&self.parameters))
    }

    pub fn update_parameters<R>(&self, f: impl FnOnce(&mut DefineParameters) -> R) -> R {
        with_lock(&self.parameters, f)
    }

    /// Create a readiness gate and add it to the declaration parameters
    ///
    /// `body` runs immediately with the gate's resolver; an error it returns
    /// rejects the gate.
    pub fn wait<F>(&self, body: F) -> Gate
    where
        F: FnOnce(Resolver) -> anyhow::Result<()>,
    {
        let gate = Gate::new(body);
        lock(&self.parameters).wait.push(gate.clone());
        gate
    }

    /// Declare a module
    ///
    /// Unset fields are taken from the declaration parameters, which are
    /// also captured on the module.
    pub fn define(&self, definition: Definition) -> Result<Arc<Module>, DefineError> {
        let parameters = self.parameters();
        let merged = definition.merge(&parameters)?;
        let module = Module::new(
            merged.id,
            merged.dependencies,
            merged.factory,
            merged.system,
            parameters,
        );

        self.registry.register(Arc::clone(&module))?;
        debug!(module = %module.describe(), "Defined");
        self.events.fire(self, &SystemEvent::Defined(Arc::clone(&module)));
        Ok(module)
    }

    /// Declare a module from loose `(id?, dependencies?, factory)` arguments
    pub fn define_args<I>(&self, args: I) -> Result<Arc<Module>, DefineError>
    where
        I: IntoIterator,
        I::Item: Into<DefineArg>,
    {
        let definition = definition_from_args(args.into_iter().map(Into::into).collect())?;
        self.define(definition)
    }

    /// Start resolving a batch of requests
    pub fn using<I>(self: &Arc<Self>, requests: I) -> Arc<Using>
    where
        I: IntoIterator,
        I::Item: Into<Request>,
    {
        let requests = requests.into_iter().map(|request| Ok(request.into())).collect();
        Using::new(Arc::clone(self), requests)
    }

    /// Start resolving a batch of raw JSON requests
    ///
    /// Values that are neither strings nor objects are recorded as invalid
    /// requests on the batch, which then fails without fetching.
    pub fn using_values<I>(self: &Arc<Self>, requests: I) -> Arc<Using>
    where
        I: IntoIterator<Item = Value>,
    {
        let requests = requests.into_iter().map(Request::from_value).collect();
        Using::new(Arc::clone(self), requests)
    }
}

impl Default for ModuleSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ModuleSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleSystem")
            .field("modules", &self.registry.stats())
            .field("loaders", &self.loaders.names())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
