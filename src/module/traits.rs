//! Module system core types and errors
//!
//! Defines requests, exported values, and the error taxonomy shared by the
//! registry, loaders and the `using` orchestrator.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Value produced by a module factory
pub type Export = Arc<dyn Any + Send + Sync>;

/// Wrap a value as an [`Export`]
pub fn export<T: Any + Send + Sync>(value: T) -> Export {
    Arc::new(value)
}

/// Anything addressable by an optional module id
pub trait Identified {
    /// Module id, `None` for anonymous entries
    fn id(&self) -> Option<&str>;
}

impl<T: Identified + ?Sized> Identified for Arc<T> {
    fn id(&self) -> Option<&str> {
        (**self).id()
    }
}

/// What a caller asks the module system to resolve
///
/// Requests are opaque to the registry; only loader factories interpret them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Request {
    /// String shorthand, usually a module id or wildcard pattern
    Id(String),
    /// Structured descriptor
    Descriptor(Map<String, Value>),
}

impl Request {
    /// Build a request from a raw JSON value
    ///
    /// Strings become id requests and objects become descriptors. Any other
    /// shape is rejected.
    pub fn from_value(value: Value) -> Result<Self, UsingError> {
        match value {
            Value::String(id) => Ok(Request::Id(id)),
            Value::Object(map) => Ok(Request::Descriptor(map)),
            other => Err(UsingError::InvalidRequest(format!(
                "expected a string or an object, got {}",
                value_kind(&other)
            ))),
        }
    }

    /// Module id this request refers to
    ///
    /// For descriptors this is the string stored under `"id"`.
    pub fn id(&self) -> Option<&str> {
        match self {
            Request::Id(id) => Some(id),
            Request::Descriptor(map) => map.get("id").and_then(Value::as_str),
        }
    }

    /// Descriptor field lookup; always `None` for id requests
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Request::Id(_) => None,
            Request::Descriptor(map) => map.get(key),
        }
    }

    pub fn is_descriptor(&self) -> bool {
        matches!(self, Request::Descriptor(_))
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Request::Id(id) => write!(f, "\"{}\"", id),
            Request::Descriptor(map) => {
                let rendered = serde_json::to_string(map).map_err(|_| fmt::Error)?;
                f.write_str(&rendered)
            }
        }
    }
}

impl From<&str> for Request {
    fn from(id: &str) -> Self {
        Request::Id(id.to_string())
    }
}

impl From<String> for Request {
    fn from(id: String) -> Self {
        Request::Id(id)
    }
}

impl From<Map<String, Value>> for Request {
    fn from(map: Map<String, Value>) -> Self {
        Request::Descriptor(map)
    }
}

/// JSON type name used in validation messages
pub(crate) fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Stable diagnostic code attached to every error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    #[serde(rename = "error-invalid-definition")]
    InvalidDefinition,
    #[serde(rename = "error-invalid-request")]
    InvalidRequest,
    #[serde(rename = "error-unsupported-request")]
    UnsupportedRequest,
    #[serde(rename = "error-unexpected")]
    Unexpected,
    #[serde(rename = "error-module")]
    Module,
    #[serde(rename = "error-dependency-not-found")]
    DependencyNotFound,
    #[serde(rename = "error-unresolved-dependency")]
    UnresolvedDependency,
    #[serde(rename = "error-loader-registry")]
    LoaderRegistry,
    #[serde(rename = "error-gate")]
    Gate,
    #[serde(rename = "warning-request-not-accepted")]
    RequestNotAccepted,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidDefinition => "error-invalid-definition",
            ErrorKind::InvalidRequest => "error-invalid-request",
            ErrorKind::UnsupportedRequest => "error-unsupported-request",
            ErrorKind::Unexpected => "error-unexpected",
            ErrorKind::Module => "error-module",
            ErrorKind::DependencyNotFound => "error-dependency-not-found",
            ErrorKind::UnresolvedDependency => "error-unresolved-dependency",
            ErrorKind::LoaderRegistry => "error-loader-registry",
            ErrorKind::Gate => "error-gate",
            ErrorKind::RequestNotAccepted => "warning-request-not-accepted",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validation faults raised synchronously by `define`
#[derive(Debug, Error)]
pub enum DefineError {
    #[error("Invalid module definition: optional parameter 'id' should be a string, got {0}")]
    InvalidId(String),

    #[error("Invalid module definition: dependencies should be a list of strings or descriptors, got {0}")]
    InvalidDependencies(String),

    #[error("Invalid module definition: mandatory parameter 'factory' is missing")]
    MissingFactory,

    #[error("Invalid module definition: parameter 'factory' should be callable, got {0}")]
    InvalidFactory(String),

    #[error("Invalid module definition: optional parameter 'system' should be a string, got {0}")]
    InvalidSystem(String),

    #[error("Invalid module definition: parameters should be an object, got {0}")]
    InvalidParameters(String),

    #[error("Invalid module definition: too many arguments ({0}), expected at most 3")]
    TooManyArguments(usize),

    #[error("Module '{0}' is already registered")]
    DuplicateId(String),
}

impl DefineError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::InvalidDefinition
    }
}

/// Faults of the loader-constructor registry
#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("Module system name must not be empty")]
    EmptyName,

    #[error("A loader for module system '{0}' is already registered")]
    DuplicateSystem(String),

    #[error("Loader factory is already registered as '{0}'")]
    DuplicateFactory(String),

    #[error("No loader was found for module system '{0}'")]
    UnknownSystem(String),
}

impl RegistrationError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::LoaderRegistry
    }
}

/// Faults raised while invoking a module factory
#[derive(Debug, Error)]
pub enum ModuleError {
    #[error("Dependency '{pattern}' could not be found (required by {owner})")]
    DependencyNotFound { pattern: String, owner: String },

    #[error("Dependency '{0}' was never resolved before invoking the factory")]
    UnresolvedDependency(String),

    #[error(transparent)]
    Pipeline(#[from] RegistrationError),

    #[error("Factory of {module} failed: {source}")]
    Factory {
        module: String,
        #[source]
        source: anyhow::Error,
    },
}

impl ModuleError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ModuleError::DependencyNotFound { .. } => ErrorKind::DependencyNotFound,
            ModuleError::UnresolvedDependency(_) => ErrorKind::UnresolvedDependency,
            ModuleError::Pipeline(e) => e.kind(),
            ModuleError::Factory { .. } => ErrorKind::Module,
        }
    }
}

/// Errors accumulated by a loader
#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("Fetch of {request} failed: {source}")]
    Fetch {
        request: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Fetch of {request} produced something that is not a module: {detail}")]
    NotAModule { request: String, detail: String },

    #[error("Fetch of {request} was already started")]
    AlreadyStarted { request: String },

    #[error("Fetch of {request} completed more than once")]
    AlreadyCompleted { request: String },

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

impl LoaderError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Unexpected
    }
}

/// Outcome of a loader factory that did not produce a loader
#[derive(Debug, Error)]
pub enum ConstructError {
    /// The factory does not handle this request; the next factory is tried
    #[error("Request not accepted: {0}")]
    Rejected(String),

    /// The factory failed; recorded and the next factory is tried
    #[error("Loader factory failed: {0}")]
    Faulted(#[source] anyhow::Error),
}

impl ConstructError {
    pub fn rejected(reason: impl Into<String>) -> Self {
        ConstructError::Rejected(reason.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ConstructError::Rejected(_) => ErrorKind::RequestNotAccepted,
            ConstructError::Faulted(_) => ErrorKind::Unexpected,
        }
    }
}

/// Errors owned by a `using` aggregate
#[derive(Debug, Error)]
pub enum UsingError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Unsupported request {request}: no loader accepted it")]
    UnsupportedRequest { request: Request },

    #[error("Loader '{system}' failed unexpectedly for request {request}: {source}")]
    ConstructorFaulted {
        system: String,
        request: Request,
        #[source]
        source: anyhow::Error,
    },

    #[error("Module for request {request} failed: {source}")]
    Module {
        request: Request,
        #[source]
        source: ModuleError,
    },

    #[error("Loader for request {request} succeeded without a module")]
    MissingModule { request: Request },

    #[error("Continuations were already attached to this request batch")]
    AlreadyAttached,
}

impl UsingError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            UsingError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            UsingError::UnsupportedRequest { .. } => ErrorKind::UnsupportedRequest,
            UsingError::ConstructorFaulted { .. } | UsingError::AlreadyAttached => {
                ErrorKind::Unexpected
            }
            UsingError::Module { .. } | UsingError::MissingModule { .. } => ErrorKind::Module,
        }
    }
}

/// Gate failures observed while waiting
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GateError {
    #[error("Gate rejected: {0}")]
    Rejected(String),

    #[error("Gate was dropped before it settled")]
    Abandoned,
}

impl GateError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Gate
    }
}
