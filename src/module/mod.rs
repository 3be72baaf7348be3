//! Module declaration and asynchronous resolution
//!
//! Modules are declared with [`define`] (or [`ModuleSystem::define`]) and
//! stored in a [`ModuleRegistry`]. Requests go through [`using`]: each one is
//! offered to the registered loader factories, the accepted loaders are
//! started, and the batch settles once every loader is terminal.
//!
//! ## Layout
//!
//! - `registry`: id matching, ranking, storage and dependency lookup
//! - `definition`: the immutable [`Module`] and its invocation
//! - `loader`: per-request state machine and loader factories
//! - `using`: batch orchestration
//! - `api::events`: typed event bus
//! - `define`, `gate`, `manager`: the declaration entry point

pub mod api;
pub mod define;
pub mod definition;
pub mod gate;
pub mod loader;
pub mod manager;
pub mod registry;
pub mod traits;
pub mod using;

use std::sync::Arc;

pub use api::events::{Emitter, Event, Handler, ListenerId, Topic};
pub use define::{definition_from_args, DefineArg, DefineParameters, Definition};
pub use definition::{Argument, Factory, Invocation, Module};
pub use gate::{Disposition, Gate, Resolver};
pub use loader::{
    Completion, FetchOutcome, Loader, LoaderEvent, LoaderEventKind, LoaderFactory, LoaderRegistry,
    LoaderState, RegistryLoader,
};
pub use manager::{ModuleSystem, SystemEvent, SystemEventKind};
pub use registry::{DependencySpec, ModuleRegistry, Scope, SELF_DEPENDENCY};
pub use traits::{
    export, ConstructError, DefineError, ErrorKind, Export, GateError, Identified, LoaderError,
    ModuleError, RegistrationError, Request, UsingError,
};
pub use using::{Rejection, RequestFailure, Resolved, Using, UsingEvent, UsingEventKind, UsingFailure};

/// Declare a module on the process-wide system
pub fn define(definition: Definition) -> Result<Arc<Module>, DefineError> {
    ModuleSystem::global().define(definition)
}

/// Declare a module on the process-wide system from loose arguments
pub fn define_args<I>(args: I) -> Result<Arc<Module>, DefineError>
where
    I: IntoIterator,
    I::Item: Into<DefineArg>,
{
    ModuleSystem::global().define_args(args)
}

/// Resolve a batch of requests on the process-wide system
pub fn using<I>(requests: I) -> Arc<Using>
where
    I: IntoIterator,
    I::Item: Into<Request>,
{
    ModuleSystem::global().using(requests)
}

/// Add a readiness gate to the process-wide declaration parameters
pub fn wait<F>(body: F) -> Gate
where
    F: FnOnce(Resolver) -> anyhow::Result<()>,
{
    ModuleSystem::global().wait(body)
}
