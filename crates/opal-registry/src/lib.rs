//! Decorator schemas and the in-process decorator registry.
//!
//! Decorators are the plug-in surface of Opal: `@env.HOME`, `@retry(times=3)`,
//! `@ssh(host="web1") { ... }`. Each decorator registers a [`DecoratorSchema`]
//! describing its parameters, block policy, and pipe/redirect capabilities.
//! The parser validates decorator call sites against these schemas while
//! parsing; the planner dispatches value decorators through the registry to
//! materialize [`Value`]s.
//!
//! Polymorphism is by role, not inheritance: a registry entry is a schema
//! plus an optional [`ResolveValue`] implementation (present exactly for
//! value decorators).

mod builtins;
mod registry;
mod schema;

pub use registry::{DecoratorRegistry, DispatchError, RegistryError, Resolved, VarSource, VarView};
pub use schema::{
    BlockPolicy, DecoratorSchema, ParamSchema, ParamType, ParamViolation, RedirectMode,
    RedirectSupport, Role, ValueClass,
};

use opal_common::Value;

/// Plan-time resolution hook for value decorators.
///
/// Implementations may perform I/O (environment lookup, file reads). They
/// receive the schema-keyed arguments and a [`VarSource`] view of the scope
/// graph for decorators that read user variables.
pub trait ResolveValue: Send + Sync {
    fn resolve(
        &self,
        args: &std::collections::BTreeMap<String, Value>,
        vars: &dyn VarSource,
    ) -> Result<Resolved, DispatchError>;
}
