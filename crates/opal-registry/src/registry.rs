//! The in-process decorator registry.
//!
//! One registry is built at startup, validated, and then shared read-only by
//! the parser and the planner. Registration failures (duplicate paths,
//! inconsistent schemas) abort startup rather than surfacing as parse
//! errors: a broken plug-in set is an operator problem, not a source
//! problem.

use std::collections::BTreeMap;
use std::fmt;

use rustc_hash::FxHashMap;

use opal_common::Value;

use crate::schema::{DecoratorSchema, Role};
use crate::ResolveValue;

/// A value produced by a value decorator at plan time.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved {
    pub value: Value,
    /// Whether the decorator flags this particular value as secret,
    /// overriding the schema's default classification.
    pub secret: bool,
}

/// Read access to user variables, implemented by the planner's scope graph.
///
/// The registry's `var` decorator resolves through this so the registry
/// stays independent of the planner's scope machinery.
pub trait VarSource {
    fn get(&self, name: &str) -> Option<VarView>;
}

/// A variable as seen through [`VarSource`].
#[derive(Debug, Clone, PartialEq)]
pub struct VarView {
    pub value: Value,
    pub secret: bool,
}

/// Registration failure. Any of these aborts startup.
#[derive(Debug, Clone, PartialEq)]
pub enum RegistryError {
    DuplicatePath(String),
    InvalidSchema { path: String, reason: String },
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::DuplicatePath(path) => {
                write!(f, "decorator {path:?} is registered twice")
            }
            RegistryError::InvalidSchema { path, reason } => {
                write!(f, "decorator {path:?} has an invalid schema: {reason}")
            }
        }
    }
}

impl std::error::Error for RegistryError {}

/// Failure inside a decorator's own plan-time execution (I/O, missing
/// environment, external service).
#[derive(Debug)]
pub struct DispatchError {
    pub path: String,
    pub message: String,
}

impl DispatchError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}: {}", self.path, self.message)
    }
}

impl std::error::Error for DispatchError {}

struct Entry {
    schema: DecoratorSchema,
    resolver: Option<Box<dyn ResolveValue>>,
}

/// Process-wide decorator table, populated by plug-ins at startup.
pub struct DecoratorRegistry {
    entries: FxHashMap<String, Entry>,
}

impl DecoratorRegistry {
    /// An empty registry. Most callers want [`DecoratorRegistry::builtin`].
    pub fn new() -> Self {
        Self {
            entries: FxHashMap::default(),
        }
    }

    /// Register a decorator. The resolver must be present exactly when the
    /// schema's role is [`Role::Value`].
    pub fn register(
        &mut self,
        schema: DecoratorSchema,
        resolver: Option<Box<dyn ResolveValue>>,
    ) -> Result<(), RegistryError> {
        schema.validate().map_err(|reason| RegistryError::InvalidSchema {
            path: schema.path.clone(),
            reason,
        })?;
        match (schema.role, resolver.is_some()) {
            (Role::Value, false) => {
                return Err(RegistryError::InvalidSchema {
                    path: schema.path.clone(),
                    reason: "value decorator registered without a resolver".to_string(),
                })
            }
            (Role::Execution, true) => {
                return Err(RegistryError::InvalidSchema {
                    path: schema.path.clone(),
                    reason: "execution decorator registered with a resolver".to_string(),
                })
            }
            _ => {}
        }
        let path = schema.path.clone();
        if self.entries.contains_key(&path) {
            return Err(RegistryError::DuplicatePath(path));
        }
        self.entries.insert(path, Entry { schema, resolver });
        Ok(())
    }

    /// Whether a dotted path is registered.
    pub fn is_registered(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    /// The longest registered dotted prefix of `candidate`.
    ///
    /// `candidate` is the full dotted name seen in source, e.g.
    /// `file.read.path`. Returns `file.read` when both `file.read` and
    /// `file` are registered -- longest wins.
    pub fn longest_match<'a>(&self, candidate: &'a str) -> Option<&'a str> {
        let mut end = candidate.len();
        loop {
            let prefix = &candidate[..end];
            if self.is_registered(prefix) {
                return Some(prefix);
            }
            match prefix.rfind('.') {
                Some(dot) => end = dot,
                None => return None,
            }
        }
    }

    /// Schema lookup.
    pub fn schema(&self, path: &str) -> Option<&DecoratorSchema> {
        self.entries.get(path).map(|e| &e.schema)
    }

    /// Role lookup.
    pub fn role(&self, path: &str) -> Option<Role> {
        self.entries.get(path).map(|e| e.schema.role)
    }

    /// All registered paths, sorted. Iteration order feeds user-facing
    /// listings and must be stable.
    pub fn paths(&self) -> Vec<&str> {
        let mut paths: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        paths.sort_unstable();
        paths
    }

    /// Dispatch a value decorator.
    ///
    /// `args` must already be schema-keyed (the planner re-binds positional
    /// and primary arguments to parameter names before dispatch). May
    /// perform I/O.
    pub fn resolve_value(
        &self,
        path: &str,
        args: &BTreeMap<String, Value>,
        vars: &dyn VarSource,
    ) -> Result<Resolved, DispatchError> {
        let entry = self
            .entries
            .get(path)
            .ok_or_else(|| DispatchError::new(path, "decorator is not registered"))?;
        let resolver = entry
            .resolver
            .as_ref()
            .ok_or_else(|| DispatchError::new(path, "decorator does not produce a value"))?;
        resolver.resolve(args, vars)
    }
}

impl Default for DecoratorRegistry {
    fn default() -> Self {
        Self::new()
    }
}
