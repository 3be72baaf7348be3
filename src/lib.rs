//! using-core - dependency registration and asynchronous resolution
//!
//! Callers declare modules (an optional id, ordered dependencies and a
//! factory) and separately issue requests. Requests are offered to pluggable
//! loader factories, resolved into modules, and composed into one batch
//! outcome with results in request order.
//!
//! ## Design Principles
//!
//! 1. **Backends are external**: fetching scripts, files or network
//!    resources is the job of [`module::LoaderFactory`] implementations
//! 2. **Deterministic ids**: wildcard requests pick the highest ranked
//!    matching id, with digit runs compared numerically
//! 3. **Settle once**: a batch runs exactly one continuation, after every
//!    loader is terminal
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use using_core::module::{export, Definition, ModuleSystem, RegistryLoader};
//!
//! let system = Arc::new(ModuleSystem::new());
//! system.register_loader(RegistryLoader::NAME, Arc::new(RegistryLoader)).unwrap();
//! system.define(Definition::new(|_| Ok(export(1u32))).id("pkg.v1")).unwrap();
//! system.define(Definition::new(|_| Ok(export(2u32))).id("pkg.v2")).unwrap();
//!
//! system.using(["pkg.*"]).then(
//!     |values| assert_eq!(values[0].downcast_ref::<u32>(), Some(&2)),
//!     |failure| panic!("{}", failure),
//! );
//! ```

pub mod config;
pub mod module;
pub mod utils;

pub use config::*;
pub use module::{define, using, wait, ModuleSystem};
