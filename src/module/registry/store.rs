//! Module registry
//!
//! Named modules keyed by id plus an ordered list of anonymous modules.
//! Lookups never mutate the registry.

use indexmap::IndexMap;
use std::sync::{Arc, RwLock};
use tracing::debug;

use crate::config::OverwritePolicy;
use crate::module::definition::Module;
use crate::module::registry::matcher;
use crate::module::traits::{DefineError, Identified};
use crate::utils::{read, write};

#[derive(Default)]
struct Entries {
    named: IndexMap<String, Arc<Module>>,
    anonymous: Vec<Arc<Module>>,
}

/// Registry counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryStats {
    pub named: usize,
    pub anonymous: usize,
}

/// Store of declared modules
pub struct ModuleRegistry {
    entries: RwLock<Entries>,
    overwrite: OverwritePolicy,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::with_policy(OverwritePolicy::default())
    }

    pub fn with_policy(overwrite: OverwritePolicy) -> Self {
        Self {
            entries: RwLock::new(Entries::default()),
            overwrite,
        }
    }

    /// Store a module
    ///
    /// Named modules are keyed by id; re-registering an id replaces the older
    /// module unless the registry rejects overwrites. Anonymous modules are
    /// appended in registration order.
    pub fn register(&self, module: Arc<Module>) -> Result<(), DefineError> {
        let mut entries = write(&self.entries);
        match module.id() {
            Some(id) => {
                if entries.named.contains_key(id) {
                    if self.overwrite == OverwritePolicy::Reject {
                        return Err(DefineError::DuplicateId(id.to_string()));
                    }
                    debug!("Replacing registered module {}", id);
                } else {
                    debug!("Registered module {}", id);
                }
                // Replacement keeps the original insertion slot
                entries.named.insert(id.to_string(), Arc::clone(&module));
            }
            None => {
                entries.anonymous.push(Arc::clone(&module));
                debug!("Registered anonymous module #{}", entries.anonymous.len());
            }
        }
        Ok(())
    }

    /// Look a module up
    ///
    /// `None` returns the most recently registered anonymous module. Otherwise
    /// plain ids match exactly and wildcard patterns return the highest ranked
    /// match over all entries.
    pub fn get(&self, pattern: Option<&str>) -> Option<Arc<Module>> {
        match pattern {
            None => self.last_anonymous(),
            Some(pattern) => self.find(pattern),
        }
    }

    /// Look a module up by id or wildcard pattern
    pub fn find(&self, pattern: &str) -> Option<Arc<Module>> {
        let entries = read(&self.entries);
        if !matcher::is_pattern(pattern) {
            return entries.named.get(pattern).cloned();
        }
        matcher::resolve(entries.named.values().chain(entries.anonymous.iter()), pattern).cloned()
    }

    pub fn last_anonymous(&self) -> Option<Arc<Module>> {
        read(&self.entries).anonymous.last().cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        read(&self.entries).named.contains_key(id)
    }

    /// All modules, named first in registration order, then anonymous
    pub fn snapshot(&self) -> Vec<Arc<Module>> {
        let entries = read(&self.entries);
        entries
            .named
            .values()
            .chain(entries.anonymous.iter())
            .cloned()
            .collect()
    }

    /// Named ids in registration order
    pub fn ids(&self) -> Vec<String> {
        read(&self.entries).named.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        let entries = read(&self.entries);
        entries.named.len() + entries.anonymous.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> RegistryStats {
        let entries = read(&self.entries);
        RegistryStats {
            named: entries.named.len(),
            anonymous: entries.anonymous.len(),
        }
    }
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}
