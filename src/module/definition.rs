//! Declared modules
//!
//! A [`Module`] is immutable once declared: an optional id, an ordered
//! dependency list, a factory, and the parameters captured at declaration.

use serde_json::{Map, Value};
use std::fmt;
use std::sync::{Arc, Weak};

use crate::module::define::DefineParameters;
use crate::module::manager::ModuleSystem;
use crate::module::registry::dependencies::{
    Dependencies, Dependency, DependencySpec, Literal, Scope, SELF_DEPENDENCY,
};
use crate::module::traits::{Export, GateError, Identified, ModuleError, Request};

/// Factory signature
pub type FactoryFn = dyn Fn(&Invocation<'_>) -> anyhow::Result<Export> + Send + Sync;

/// Shared module factory
///
/// Factories are not memoized; every invocation runs the function again.
#[derive(Clone)]
pub struct Factory(Arc<FactoryFn>);

impl Factory {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&Invocation<'_>) -> anyhow::Result<Export> + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    pub fn ptr_eq(&self, other: &Factory) -> bool {
        std::ptr::eq(
            Arc::as_ptr(&self.0) as *const (),
            Arc::as_ptr(&other.0) as *const (),
        )
    }

    fn call(&self, invocation: &Invocation<'_>) -> anyhow::Result<Export> {
        (self.0)(invocation)
    }
}

impl fmt::Debug for Factory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Factory(..)")
    }
}

/// Positional argument handed to a factory by a pipeline
#[derive(Clone)]
pub enum Argument {
    Module(Arc<Module>),
    Value(Export),
    Descriptor(Map<String, Value>),
    /// Dependency id that was never resolved
    Unresolved(String),
}

impl fmt::Debug for Argument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Argument::Module(module) => f.debug_tuple("Module").field(&module.id()).finish(),
            Argument::Value(_) => f.write_str("Value(..)"),
            Argument::Descriptor(map) => f.debug_tuple("Descriptor").field(map).finish(),
            Argument::Unresolved(id) => f.debug_tuple("Unresolved").field(id).finish(),
        }
    }
}

/// Everything a factory sees when it runs
pub struct Invocation<'a> {
    system: &'a ModuleSystem,
    module: &'a Arc<Module>,
    request: Option<&'a Request>,
    arguments: &'a [Argument],
}

impl<'a> Invocation<'a> {
    pub fn system(&self) -> &'a ModuleSystem {
        self.system
    }

    /// The module whose factory is running
    pub fn module(&self) -> &'a Arc<Module> {
        self.module
    }

    pub fn request(&self) -> Option<&'a Request> {
        self.request
    }

    pub fn arguments(&self) -> &'a [Argument] {
        self.arguments
    }

    pub fn argument(&self, index: usize) -> Option<&'a Argument> {
        self.arguments.get(index)
    }

    /// Resolve and invoke a dependency of the running module
    pub fn dependency(&self, pattern: &str, scope: Scope) -> Result<Export, ModuleError> {
        self.module
            .dependency(self.system, pattern, scope, self.request)
    }
}

/// Immutable module declaration
pub struct Module {
    id: Option<String>,
    dependencies: Dependencies,
    factory: Factory,
    system: Option<String>,
    parameters: DefineParameters,
    this: Weak<Module>,
}

impl Module {
    /// Build a module; self references in `dependencies` bind to the new module
    pub fn new(
        id: Option<String>,
        dependencies: Vec<DependencySpec>,
        factory: Factory,
        system: Option<String>,
        parameters: DefineParameters,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            id,
            dependencies: Dependencies::bind(dependencies, this),
            factory,
            system,
            parameters,
            this: Weak::clone(this),
        })
    }

    pub fn dependencies(&self) -> &Dependencies {
        &self.dependencies
    }

    pub fn factory(&self) -> &Factory {
        &self.factory
    }

    /// Name of the pipeline this module's invocations go through
    pub fn system(&self) -> Option<&str> {
        self.system.as_deref()
    }

    /// Parameters captured at declaration
    pub fn parameters(&self) -> &DefineParameters {
        &self.parameters
    }

    /// Id for diagnostics
    pub fn describe(&self) -> String {
        match &self.id {
            Some(id) => format!("module '{}'", id),
            None => "anonymous module".to_string(),
        }
    }

    /// Produce this module's value for `request`
    ///
    /// Modules declared with a system tag are handed to that system's
    /// pipeline; everything else runs the raw factory with no arguments.
    pub fn invoke(
        self: &Arc<Self>,
        system: &ModuleSystem,
        request: Option<&Request>,
    ) -> Result<Export, ModuleError> {
        match &self.system {
            Some(name) => {
                let loader = system.loaders().get(name)?;
                loader.pipeline(system, self, request)
            }
            None => self.call_raw(system, request, &[]),
        }
    }

    /// Run the factory with explicit arguments
    ///
    /// Fails without calling the factory if any argument is still an
    /// unresolved dependency.
    pub fn call_raw(
        self: &Arc<Self>,
        system: &ModuleSystem,
        request: Option<&Request>,
        arguments: &[Argument],
    ) -> Result<Export, ModuleError> {
        if let Some(id) = arguments.iter().find_map(|argument| match argument {
            Argument::Unresolved(id) => Some(id),
            _ => None,
        }) {
            return Err(ModuleError::UnresolvedDependency(id.clone()));
        }

        let invocation = Invocation {
            system,
            module: self,
            request,
            arguments,
        };
        self.factory
            .call(&invocation)
            .map_err(|source| ModuleError::Factory {
                module: self.describe(),
                source,
            })
    }

    /// Positional arguments for a pipeline, one per declared dependency
    ///
    /// Literals pass through, references are looked up in the registry and
    /// invoked with `request`. References that are not registered become
    /// [`Argument::Unresolved`].
    pub fn resolve_arguments(
        &self,
        system: &ModuleSystem,
        request: Option<&Request>,
    ) -> Result<Vec<Argument>, ModuleError> {
        self.dependencies
            .iter()
            .map(|dependency| match dependency {
                Dependency::Literal(Literal::Descriptor(map)) => Ok(Argument::Descriptor(map.clone())),
                Dependency::Literal(_) => Ok(dependency
                    .module()
                    .map(Argument::Module)
                    .unwrap_or_else(|| Argument::Unresolved(SELF_DEPENDENCY.to_string()))),
                Dependency::Reference(id) => match system.registry().find(id) {
                    Some(module) => module.invoke(system, request).map(Argument::Value),
                    None => Ok(Argument::Unresolved(id.clone())),
                },
            })
            .collect()
    }

    /// Find a dependency matching `pattern` and invoke it with `request`
    ///
    /// [`Scope::Declared`] restricts the search to this module's own
    /// dependencies; [`Scope::Registry`] searches every registered module.
    pub fn dependency(
        &self,
        system: &ModuleSystem,
        pattern: &str,
        scope: Scope,
        request: Option<&Request>,
    ) -> Result<Export, ModuleError> {
        let found = self
            .dependencies
            .find(system.registry(), pattern, scope)
            .ok_or_else(|| ModuleError::DependencyNotFound {
                pattern: pattern.to_string(),
                owner: self.describe(),
            })?;
        found.invoke(system, request)
    }

    /// Wait for every gate registered while this module was declared
    pub async fn ready(&self) -> Result<(), GateError> {
        self.parameters.wait_all().await
    }

    /// This module as a shared handle
    pub fn handle(&self) -> Option<Arc<Module>> {
        self.this.upgrade()
    }
}

impl Identified for Module {
    fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }
}

impl fmt::Debug for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Module")
            .field("id", &self.id)
            .field("dependencies", &self.dependencies)
            .field("system", &self.system)
            .finish_non_exhaustive()
    }
}
