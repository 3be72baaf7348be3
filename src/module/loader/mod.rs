//! Request loading
//!
//! Per-request loader state machines and the factories that build them.

pub mod factory;
pub mod loader;

pub use factory::{LoaderFactory, LoaderRegistry, RegistryLoader};
pub use loader::{Completion, FetchFn, FetchOutcome, Loader, LoaderEvent, LoaderEventKind, LoaderState};
