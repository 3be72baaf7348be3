//! Module declaration
//!
//! [`Definition`] is the explicit builder consumed by `ModuleSystem::define`.
//! [`DefineParameters`] is the override channel that may pre-supply any field
//! and collects readiness gates. [`definition_from_args`] accepts the loose
//! `(id?, dependencies?, factory)` call shape and sniffs which argument is
//! which.

use serde_json::{Map, Value};
use std::fmt;

use crate::module::definition::{Factory, Invocation};
use crate::module::gate::Gate;
use crate::module::registry::dependencies::DependencySpec;
use crate::module::traits::{value_kind, DefineError, Export, GateError};

/// Declaration-time parameters
///
/// Fields set here apply to the next definition unless the definition sets
/// them itself. Anything outside the known fields lives in `extra`.
#[derive(Clone, Default)]
pub struct DefineParameters {
    pub id: Option<String>,
    pub dependencies: Option<Vec<DependencySpec>>,
    pub factory: Option<Factory>,
    pub system: Option<String>,
    /// Readiness gates, in creation order
    pub wait: Vec<Gate>,
    pub extra: Map<String, Value>,
}

impl DefineParameters {
    /// Build parameters from a JSON object
    ///
    /// `id` and `system` must be strings, `dependencies` a list of strings or
    /// objects. Other keys are kept in `extra`.
    pub fn from_value(value: Value) -> Result<Self, DefineError> {
        let map = match value {
            Value::Object(map) => map,
            other => return Err(DefineError::InvalidParameters(value_kind(&other).to_string())),
        };

        let mut parameters = DefineParameters::default();
        for (key, value) in map {
            match key.as_str() {
                "id" => parameters.id = parse_id(value)?,
                "system" => parameters.system = parse_system(value)?,
                "dependencies" => parameters.dependencies = parse_dependencies(value)?,
                "factory" | "wait" => {
                    return Err(DefineError::InvalidParameters(format!(
                        "'{}' cannot be given as data",
                        key
                    )))
                }
                _ => {
                    parameters.extra.insert(key, value);
                }
            }
        }
        Ok(parameters)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.extra.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.extra.insert(key.into(), value)
    }

    pub fn gates(&self) -> &[Gate] {
        &self.wait
    }

    pub fn pending_gates(&self) -> usize {
        self.wait.iter().filter(|gate| gate.is_pending()).count()
    }

    /// Wait for every gate; the first rejection wins
    pub async fn wait_all(&self) -> Result<(), GateError> {
        futures::future::try_join_all(self.wait.iter().map(Gate::wait))
            .await
            .map(|_| ())
    }
}

impl fmt::Debug for DefineParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DefineParameters")
            .field("id", &self.id)
            .field("dependencies", &self.dependencies)
            .field("factory", &self.factory.is_some())
            .field("system", &self.system)
            .field("wait", &self.wait)
            .field("extra", &self.extra)
            .finish()
    }
}

/// Empty strings count as absent, like an omitted id or system
fn non_empty(value: String) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

fn parse_id(value: Value) -> Result<Option<String>, DefineError> {
    match value {
        Value::Null => Ok(None),
        Value::String(id) => Ok(non_empty(id)),
        other => Err(DefineError::InvalidId(value_kind(&other).to_string())),
    }
}

fn parse_system(value: Value) -> Result<Option<String>, DefineError> {
    match value {
        Value::Null => Ok(None),
        Value::String(system) => Ok(non_empty(system)),
        other => Err(DefineError::InvalidSystem(value_kind(&other).to_string())),
    }
}

fn parse_dependencies(value: Value) -> Result<Option<Vec<DependencySpec>>, DefineError> {
    match value {
        Value::Null => Ok(None),
        Value::Array(items) => items
            .into_iter()
            .map(|item| {
                let kind = value_kind(&item);
                DependencySpec::from_value(item)
                    .ok_or_else(|| DefineError::InvalidDependencies(format!("a list containing {}", kind)))
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Some),
        other => Err(DefineError::InvalidDependencies(value_kind(&other).to_string())),
    }
}

/// Explicit module declaration
///
/// # Example
/// ```rust
/// use using_core::module::{export, Definition, ModuleSystem};
///
/// let system = ModuleSystem::new();
/// let module = system
///     .define(Definition::new(|_| Ok(export(42u32))).id("answer"))
///     .unwrap();
/// assert_eq!(system.registry().find("answer").unwrap().describe(), module.describe());
/// ```
#[derive(Debug, Clone, Default)]
pub struct Definition {
    pub(crate) id: Option<String>,
    pub(crate) dependencies: Option<Vec<DependencySpec>>,
    pub(crate) factory: Option<Factory>,
    pub(crate) system: Option<String>,
}

impl Definition {
    /// Definition with a factory and nothing else
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn(&Invocation<'_>) -> anyhow::Result<Export> + Send + Sync + 'static,
    {
        Self::default().factory(factory)
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = non_empty(id.into());
        self
    }

    /// Replace the dependency list
    pub fn dependencies<I, D>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = D>,
        D: Into<DependencySpec>,
    {
        self.dependencies = Some(dependencies.into_iter().map(Into::into).collect());
        self
    }

    /// Append one dependency
    pub fn depends_on(mut self, dependency: impl Into<DependencySpec>) -> Self {
        self.dependencies
            .get_or_insert_with(Vec::new)
            .push(dependency.into());
        self
    }

    pub fn factory<F>(mut self, factory: F) -> Self
    where
        F: Fn(&Invocation<'_>) -> anyhow::Result<Export> + Send + Sync + 'static,
    {
        self.factory = Some(Factory::new(factory));
        self
    }

    pub fn with_factory(mut self, factory: Factory) -> Self {
        self.factory = Some(factory);
        self
    }

    /// Route invocations through the named loader pipeline
    pub fn system(mut self, system: impl Into<String>) -> Self {
        self.system = non_empty(system.into());
        self
    }

    /// Fill unset fields from the override channel
    ///
    /// Explicit fields win. With no dependencies anywhere the module depends
    /// on itself.
    pub(crate) fn merge(self, overrides: &DefineParameters) -> Result<MergedDefinition, DefineError> {
        let factory = self
            .factory
            .or_else(|| overrides.factory.clone())
            .ok_or(DefineError::MissingFactory)?;
        let dependencies = self
            .dependencies
            .or_else(|| overrides.dependencies.clone())
            .filter(|dependencies| !dependencies.is_empty())
            .unwrap_or_else(|| vec![DependencySpec::This]);

        Ok(MergedDefinition {
            id: self.id.or_else(|| overrides.id.clone()),
            dependencies,
            factory,
            system: self.system.or_else(|| overrides.system.clone()),
        })
    }
}

/// Definition with every field decided
pub(crate) struct MergedDefinition {
    pub id: Option<String>,
    pub dependencies: Vec<DependencySpec>,
    pub factory: Factory,
    pub system: Option<String>,
}

/// Loosely typed `define` argument
#[derive(Clone)]
pub enum DefineArg {
    Value(Value),
    Factory(Factory),
}

impl DefineArg {
    pub fn factory<F>(f: F) -> Self
    where
        F: Fn(&Invocation<'_>) -> anyhow::Result<Export> + Send + Sync + 'static,
    {
        DefineArg::Factory(Factory::new(f))
    }

    fn is_factory(&self) -> bool {
        matches!(self, DefineArg::Factory(_))
    }

    fn is_list(&self) -> bool {
        matches!(self, DefineArg::Value(Value::Array(_)))
    }

    fn describe(&self) -> &'static str {
        match self {
            DefineArg::Value(value) => value_kind(value),
            DefineArg::Factory(_) => "factory",
        }
    }
}

impl fmt::Debug for DefineArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DefineArg::Value(value) => f.debug_tuple("Value").field(value).finish(),
            DefineArg::Factory(_) => f.write_str("Factory(..)"),
        }
    }
}

impl From<Value> for DefineArg {
    fn from(value: Value) -> Self {
        DefineArg::Value(value)
    }
}

impl From<&str> for DefineArg {
    fn from(id: &str) -> Self {
        DefineArg::Value(Value::from(id))
    }
}

impl From<Vec<&str>> for DefineArg {
    fn from(ids: Vec<&str>) -> Self {
        DefineArg::Value(Value::from(ids))
    }
}

impl From<Factory> for DefineArg {
    fn from(factory: Factory) -> Self {
        DefineArg::Factory(factory)
    }
}

/// Turn loose `(id?, dependencies?, factory)` arguments into a [`Definition`]
///
/// A factory in the dependency slot means no dependencies were given; a
/// factory in the id slot means neither id nor dependencies were; a list in
/// the id slot is the dependency list. Missing factories are left for the
/// override channel to supply.
pub fn definition_from_args(args: Vec<DefineArg>) -> Result<Definition, DefineError> {
    if args.len() > 3 {
        return Err(DefineError::TooManyArguments(args.len()));
    }

    let mut slots = args.into_iter();
    let mut id = slots.next();
    let mut dependencies = slots.next();
    let mut factory = slots.next();

    if dependencies.as_ref().is_some_and(DefineArg::is_factory) {
        factory = dependencies.take();
    }
    if id.as_ref().is_some_and(DefineArg::is_factory) {
        factory = id.take();
    }
    if id.as_ref().is_some_and(DefineArg::is_list) {
        dependencies = id.take();
    }

    let mut definition = Definition::default();

    match id {
        None => {}
        Some(DefineArg::Value(value)) => definition.id = parse_id(value)?,
        Some(other) => return Err(DefineError::InvalidId(other.describe().to_string())),
    }

    match dependencies {
        None => {}
        Some(DefineArg::Value(value)) => definition.dependencies = parse_dependencies(value)?,
        Some(other) => return Err(DefineError::InvalidDependencies(other.describe().to_string())),
    }

    match factory {
        None | Some(DefineArg::Value(Value::Null)) => {}
        Some(DefineArg::Factory(factory)) => definition.factory = Some(factory),
        Some(other) => return Err(DefineError::InvalidFactory(other.describe().to_string())),
    }

    Ok(definition)
}
