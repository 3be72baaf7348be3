//! Loader factories
//!
//! A [`LoaderFactory`] decides whether it handles a request and, if so,
//! builds the [`Loader`] for it. Factories are registered by module system
//! name; the orchestrator tries them in registration order. A factory's
//! pipeline also runs every invocation of modules declared with its name.

use indexmap::IndexMap;
use std::any::TypeId;
use std::sync::{Arc, RwLock};
use tracing::debug;

use crate::module::definition::Module;
use crate::module::loader::loader::Loader;
use crate::module::manager::ModuleSystem;
use crate::module::traits::{ConstructError, Export, ModuleError, RegistrationError, Request};
use crate::utils::{read, write};

/// Builds loaders for the requests it accepts
pub trait LoaderFactory: Send + Sync {
    /// Build a loader for `request`
    ///
    /// Return [`ConstructError::Rejected`] for requests this factory does not
    /// handle and [`ConstructError::Faulted`] when it failed to build one.
    fn create(&self, system: &Arc<ModuleSystem>, request: &Request) -> Result<Arc<Loader>, ConstructError>;

    /// Produce the value of a module declared with this factory's system name
    ///
    /// The default resolves the module's dependencies into positional
    /// arguments and runs the raw factory with them.
    fn pipeline(
        &self,
        system: &ModuleSystem,
        module: &Arc<Module>,
        request: Option<&Request>,
    ) -> Result<Export, ModuleError> {
        let arguments = module.resolve_arguments(system, request)?;
        module.call_raw(system, request, &arguments)
    }
}

impl<F> LoaderFactory for F
where
    F: Fn(&Arc<ModuleSystem>, &Request) -> Result<Arc<Loader>, ConstructError> + Send + Sync,
{
    fn create(&self, system: &Arc<ModuleSystem>, request: &Request) -> Result<Arc<Loader>, ConstructError> {
        self(system, request)
    }
}

struct Registered {
    factory: Arc<dyn LoaderFactory>,
    /// Set for zero-sized factories, where every value is the same factory
    stateless: Option<TypeId>,
}

/// Loader factories by module system name, in registration order
#[derive(Default)]
pub struct LoaderRegistry {
    factories: RwLock<IndexMap<String, Registered>>,
}

impl LoaderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `factory` under `name`
    ///
    /// Each name and each factory instance may only be registered once.
    pub fn register(
        &self,
        name: impl Into<String>,
        factory: Arc<dyn LoaderFactory>,
    ) -> Result<(), RegistrationError> {
        self.insert(name.into(), Registered { factory, stateless: None })
    }

    /// Register a function or closure factory
    ///
    /// A function item or non-capturing closure counts as the same factory
    /// wherever it is passed, so it may only be registered once.
    pub fn register_fn<F>(&self, name: impl Into<String>, factory: F) -> Result<(), RegistrationError>
    where
        F: Fn(&Arc<ModuleSystem>, &Request) -> Result<Arc<Loader>, ConstructError> + Send + Sync + 'static,
    {
        let stateless = (std::mem::size_of::<F>() == 0).then(TypeId::of::<F>);
        self.insert(
            name.into(),
            Registered {
                factory: Arc::new(factory),
                stateless,
            },
        )
    }

    fn insert(&self, name: String, entry: Registered) -> Result<(), RegistrationError> {
        if name.is_empty() {
            return Err(RegistrationError::EmptyName);
        }

        let mut factories = write(&self.factories);
        if factories.contains_key(&name) {
            return Err(RegistrationError::DuplicateSystem(name));
        }
        if let Some((existing, _)) = factories
            .iter()
            .find(|(_, registered)| registered.same_as(&entry))
        {
            return Err(RegistrationError::DuplicateFactory(existing.clone()));
        }

        debug!("Registered loader for module system '{}'", name);
        factories.insert(name, entry);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn LoaderFactory>, RegistrationError> {
        read(&self.factories)
            .get(name)
            .map(|registered| Arc::clone(&registered.factory))
            .ok_or_else(|| RegistrationError::UnknownSystem(name.to_string()))
    }

    pub fn unregister(&self, name: &str) -> Option<Arc<dyn LoaderFactory>> {
        // Keep the relative order of the remaining factories
        write(&self.factories)
            .shift_remove(name)
            .map(|registered| registered.factory)
    }

    pub fn names(&self) -> Vec<String> {
        read(&self.factories).keys().cloned().collect()
    }

    /// Snapshot of all factories in registration order
    pub fn entries(&self) -> Vec<(String, Arc<dyn LoaderFactory>)> {
        read(&self.factories)
            .iter()
            .map(|(name, registered)| (name.clone(), Arc::clone(&registered.factory)))
            .collect()
    }

    pub fn len(&self) -> usize {
        read(&self.factories).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Registered {
    fn same_as(&self, other: &Registered) -> bool {
        let same_instance = std::ptr::eq(
            Arc::as_ptr(&self.factory) as *const (),
            Arc::as_ptr(&other.factory) as *const (),
        );
        same_instance || (self.stateless.is_some() && self.stateless == other.stateless)
    }
}

/// Resolves requests for modules that are already registered
///
/// Accepts id requests (and descriptors with an `"id"`) that match a
/// registered module, exactly or by wildcard, and completes immediately.
#[derive(Debug, Default, Clone, Copy)]
pub struct RegistryLoader;

impl RegistryLoader {
    /// Conventional system name
    pub const NAME: &'static str = "registry";
}

impl LoaderFactory for RegistryLoader {
    fn create(&self, system: &Arc<ModuleSystem>, request: &Request) -> Result<Arc<Loader>, ConstructError> {
        let id = request
            .id()
            .ok_or_else(|| ConstructError::rejected("request has no module id"))?;
        let module = system
            .registry()
            .find(id)
            .ok_or_else(|| ConstructError::rejected(format!("no registered module matches '{}'", id)))?;

        let faults = system.config().events.handler_faults;
        Ok(Loader::with_policy(request.clone(), faults, move |done| {
            done.resolve(module);
            Ok(())
        }))
    }
}
