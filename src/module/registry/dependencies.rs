//! Module dependency lists
//!
//! Each declared dependency is either a literal bound at declaration time
//! (another module, the declaring module itself, or a descriptor) or an id
//! reference resolved lazily through the registry.

use serde_json::{Map, Value};
use std::fmt;
use std::sync::{Arc, Weak};

use crate::module::definition::Module;
use crate::module::registry::matcher;
use crate::module::registry::store::ModuleRegistry;
use crate::module::traits::Identified;

/// Dependency string denoting the declaring module itself
pub const SELF_DEPENDENCY: &str = "module";

/// A dependency as written in a declaration
#[derive(Clone)]
pub enum DependencySpec {
    /// The declaring module
    This,
    /// Module id, resolved lazily
    Id(String),
    /// Structured descriptor, passed through unchanged
    Descriptor(Map<String, Value>),
    /// An already declared module
    Module(Arc<Module>),
}

impl DependencySpec {
    /// Build from a JSON value; only strings and objects are dependencies
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::String(id) => Some(DependencySpec::from(id)),
            Value::Object(map) => Some(DependencySpec::Descriptor(map)),
            _ => None,
        }
    }
}

impl fmt::Debug for DependencySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DependencySpec::This => f.write_str("This"),
            DependencySpec::Id(id) => f.debug_tuple("Id").field(id).finish(),
            DependencySpec::Descriptor(map) => f.debug_tuple("Descriptor").field(map).finish(),
            DependencySpec::Module(module) => f.debug_tuple("Module").field(&module.id()).finish(),
        }
    }
}

impl From<&str> for DependencySpec {
    fn from(id: &str) -> Self {
        if id == SELF_DEPENDENCY {
            DependencySpec::This
        } else {
            DependencySpec::Id(id.to_string())
        }
    }
}

impl From<String> for DependencySpec {
    fn from(id: String) -> Self {
        if id == SELF_DEPENDENCY {
            DependencySpec::This
        } else {
            DependencySpec::Id(id)
        }
    }
}

impl From<Arc<Module>> for DependencySpec {
    fn from(module: Arc<Module>) -> Self {
        DependencySpec::Module(module)
    }
}

impl From<Map<String, Value>> for DependencySpec {
    fn from(map: Map<String, Value>) -> Self {
        DependencySpec::Descriptor(map)
    }
}

/// Value bound at declaration time
#[derive(Clone)]
pub enum Literal {
    Module(Arc<Module>),
    /// Self reference; weak so a module does not own itself
    This(Weak<Module>),
    Descriptor(Map<String, Value>),
}

/// One entry of a module's dependency list
#[derive(Clone)]
pub enum Dependency {
    Literal(Literal),
    Reference(String),
}

impl Dependency {
    pub(crate) fn bind(spec: DependencySpec, this: &Weak<Module>) -> Self {
        match spec {
            DependencySpec::This => Dependency::Literal(Literal::This(Weak::clone(this))),
            DependencySpec::Module(module) => Dependency::Literal(Literal::Module(module)),
            DependencySpec::Descriptor(map) => Dependency::Literal(Literal::Descriptor(map)),
            DependencySpec::Id(id) => Dependency::Reference(id),
        }
    }

    /// Module bound as a literal, if any
    pub fn module(&self) -> Option<Arc<Module>> {
        match self {
            Dependency::Literal(Literal::Module(module)) => Some(Arc::clone(module)),
            Dependency::Literal(Literal::This(this)) => this.upgrade(),
            _ => None,
        }
    }

    pub fn reference(&self) -> Option<&str> {
        match self {
            Dependency::Reference(id) => Some(id),
            _ => None,
        }
    }

    pub fn is_self(&self) -> bool {
        matches!(self, Dependency::Literal(Literal::This(_)))
    }
}

impl fmt::Debug for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dependency::Literal(Literal::This(_)) => f.write_str("Literal(This)"),
            Dependency::Literal(Literal::Module(module)) => {
                write!(f, "Literal(Module({:?}))", module.id())
            }
            Dependency::Literal(Literal::Descriptor(map)) => write!(f, "Literal({:?})", map),
            Dependency::Reference(id) => f.debug_tuple("Reference").field(id).finish(),
        }
    }
}

/// Where a dependency lookup may search
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Only the module's own declared dependencies
    Declared,
    /// The whole registry
    Registry,
}

impl Scope {
    pub fn from_allow_update(allow_update: bool) -> Self {
        if allow_update {
            Scope::Registry
        } else {
            Scope::Declared
        }
    }
}

/// Ordered dependency list of a module
#[derive(Debug, Clone, Default)]
pub struct Dependencies {
    entries: Vec<Dependency>,
}

impl Dependencies {
    pub(crate) fn bind(specs: Vec<DependencySpec>, this: &Weak<Module>) -> Self {
        Self {
            entries: specs
                .into_iter()
                .map(|spec| Dependency::bind(spec, this))
                .collect(),
        }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Dependency> {
        self.entries.iter()
    }

    pub fn get(&self, index: usize) -> Option<&Dependency> {
        self.entries.get(index)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Modules a lookup in `scope` may pick from
    ///
    /// Declared scope yields the literal modules plus every reference that
    /// currently resolves in the registry; references that do not resolve are
    /// skipped. Registry scope yields the declared candidates followed by the
    /// rest of the registry, so literal modules that were never registered
    /// stay reachable.
    pub fn candidates(&self, registry: &ModuleRegistry, scope: Scope) -> Vec<Arc<Module>> {
        let mut candidates: Vec<Arc<Module>> = self
            .entries
            .iter()
            .filter_map(|entry| match entry {
                Dependency::Reference(id) => registry.find(id),
                literal => literal.module(),
            })
            .collect();

        if scope == Scope::Registry {
            for module in registry.snapshot() {
                if !candidates.iter().any(|seen| Arc::ptr_eq(seen, &module)) {
                    candidates.push(module);
                }
            }
        }
        candidates
    }

    /// Resolve `pattern` against the candidates of `scope`
    pub fn find(&self, registry: &ModuleRegistry, pattern: &str, scope: Scope) -> Option<Arc<Module>> {
        let candidates = self.candidates(registry, scope);
        matcher::resolve(candidates.iter(), pattern).cloned()
    }
}

impl<'a> IntoIterator for &'a Dependencies {
    type Item = &'a Dependency;
    type IntoIter = std::slice::Iter<'a, Dependency>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}
