//! Module registry and id resolution
//!
//! Handles module storage, wildcard id matching, and dependency lookup.

pub mod dependencies;
pub mod matcher;
pub mod store;

pub use dependencies::{Dependencies, Dependency, DependencySpec, Literal, Scope, SELF_DEPENDENCY};
pub use matcher::{
    compare_ids, matches, matches_wildcard, rank_descending, rank_ids_descending, resolve,
    WildcardPattern, WILDCARD,
};
pub use store::{ModuleRegistry, RegistryStats};
