//! The builtin decorator set.
//!
//! Every Opal process registers these at startup. Plug-ins extend the same
//! registry with additional paths; a collision with a builtin is a startup
//! failure like any other duplicate.

use std::collections::BTreeMap;
use std::time::Duration;

use opal_common::Value;

use crate::registry::{DecoratorRegistry, DispatchError, Resolved, VarSource};
use crate::schema::{
    BlockPolicy, DecoratorSchema, ParamSchema, ParamType, RedirectSupport, Role, ValueClass,
};
use crate::ResolveValue;

impl DecoratorRegistry {
    /// Build a registry holding the builtin decorator set.
    ///
    /// # Panics
    ///
    /// Panics if the builtin schemas fail their own validation -- that is a
    /// programming error in this module, not a runtime condition.
    pub fn builtin() -> Self {
        let mut registry = DecoratorRegistry::new();

        let mut register = |schema: DecoratorSchema, resolver: Option<Box<dyn ResolveValue>>| {
            let path = schema.path.clone();
            registry
                .register(schema, resolver)
                .unwrap_or_else(|e| panic!("builtin decorator {path:?} failed to register: {e}"));
        };

        // ── Value decorators ───────────────────────────────────────────
        register(env_schema(), Some(Box::new(EnvDecorator)));
        register(var_schema(), Some(Box::new(VarDecorator)));
        register(file_read_schema(), Some(Box::new(FileReadDecorator)));

        // ── Execution decorators ───────────────────────────────────────
        register(shell_schema(), None);
        register(retry_schema(), None);
        register(timeout_schema(), None);
        register(parallel_schema(), None);
        register(workdir_schema(), None);
        register(ssh_schema(), None);
        register(docker_schema(), None);

        registry
    }
}

// ── Schemas ────────────────────────────────────────────────────────────

fn one_param(name: &str, param: ParamSchema) -> BTreeMap<String, ParamSchema> {
    let mut params = BTreeMap::new();
    params.insert(name.to_string(), param);
    params
}

fn env_schema() -> DecoratorSchema {
    DecoratorSchema {
        path: "env".to_string(),
        role: Role::Value,
        primary: Some("name".to_string()),
        params: one_param("name", ParamSchema::required(ParamType::String).with_length(1, 256)),
        returns: ParamType::String,
        block: BlockPolicy::Forbidden,
        redirects: RedirectSupport::None,
        produces_stdout: false,
        transport: false,
        value_class: ValueClass::Config,
    }
}

fn var_schema() -> DecoratorSchema {
    DecoratorSchema {
        path: "var".to_string(),
        role: Role::Value,
        primary: Some("name".to_string()),
        params: one_param("name", ParamSchema::required(ParamType::String).with_length(1, 256)),
        returns: ParamType::String,
        block: BlockPolicy::Forbidden,
        redirects: RedirectSupport::None,
        produces_stdout: false,
        transport: false,
        value_class: ValueClass::Data,
    }
}

fn file_read_schema() -> DecoratorSchema {
    DecoratorSchema {
        path: "file.read".to_string(),
        role: Role::Value,
        primary: Some("path".to_string()),
        params: one_param("path", ParamSchema::required(ParamType::String).with_length(1, 4096)),
        returns: ParamType::String,
        block: BlockPolicy::Forbidden,
        redirects: RedirectSupport::None,
        produces_stdout: false,
        transport: false,
        // File contents are treated as sensitive until proven otherwise:
        // the common use is key material and tokens.
        value_class: ValueClass::Secret,
    }
}

fn shell_schema() -> DecoratorSchema {
    DecoratorSchema {
        path: "shell".to_string(),
        role: Role::Execution,
        primary: Some("command".to_string()),
        params: one_param("command", ParamSchema::required(ParamType::String)),
        returns: ParamType::String,
        block: BlockPolicy::Forbidden,
        redirects: RedirectSupport::Both,
        produces_stdout: true,
        transport: false,
        value_class: ValueClass::Data,
    }
}

fn retry_schema() -> DecoratorSchema {
    let mut params = BTreeMap::new();
    params.insert(
        "times".to_string(),
        ParamSchema::required(ParamType::Int).with_range(1, 100),
    );
    params.insert(
        "delay".to_string(),
        ParamSchema::optional(ParamType::Duration).with_default(Value::Duration(Duration::from_secs(1))),
    );
    DecoratorSchema {
        path: "retry".to_string(),
        role: Role::Execution,
        primary: Some("times".to_string()),
        params,
        returns: ParamType::String,
        block: BlockPolicy::Required,
        redirects: RedirectSupport::None,
        produces_stdout: true,
        transport: false,
        value_class: ValueClass::Data,
    }
}

fn timeout_schema() -> DecoratorSchema {
    DecoratorSchema {
        path: "timeout".to_string(),
        role: Role::Execution,
        primary: Some("duration".to_string()),
        params: one_param("duration", ParamSchema::required(ParamType::Duration)),
        returns: ParamType::String,
        block: BlockPolicy::Required,
        redirects: RedirectSupport::None,
        produces_stdout: true,
        transport: false,
        value_class: ValueClass::Data,
    }
}

fn parallel_schema() -> DecoratorSchema {
    let mut params = BTreeMap::new();
    params.insert(
        "jobs".to_string(),
        ParamSchema::optional(ParamType::Int).with_range(1, 64),
    );
    params.insert(
        "fail-fast".to_string(),
        ParamSchema::optional(ParamType::Bool).with_default(Value::Bool(true)),
    );
    DecoratorSchema {
        path: "parallel".to_string(),
        role: Role::Execution,
        primary: None,
        params,
        returns: ParamType::String,
        block: BlockPolicy::Required,
        redirects: RedirectSupport::None,
        // Interleaved output from parallel tasks is not pipeable.
        produces_stdout: false,
        transport: false,
        value_class: ValueClass::Data,
    }
}

fn workdir_schema() -> DecoratorSchema {
    DecoratorSchema {
        path: "workdir".to_string(),
        role: Role::Execution,
        primary: Some("path".to_string()),
        params: one_param("path", ParamSchema::required(ParamType::String).with_length(1, 4096)),
        returns: ParamType::String,
        block: BlockPolicy::Required,
        redirects: RedirectSupport::None,
        produces_stdout: true,
        transport: false,
        value_class: ValueClass::Data,
    }
}

fn ssh_schema() -> DecoratorSchema {
    let mut params = BTreeMap::new();
    params.insert(
        "host".to_string(),
        ParamSchema::required(ParamType::String).with_length(1, 255),
    );
    params.insert("user".to_string(), ParamSchema::optional(ParamType::String));
    params.insert(
        "port".to_string(),
        ParamSchema::optional(ParamType::Int)
            .with_range(1, 65535)
            .with_default(Value::Int(22)),
    );
    DecoratorSchema {
        path: "ssh".to_string(),
        role: Role::Execution,
        primary: Some("host".to_string()),
        params,
        returns: ParamType::String,
        block: BlockPolicy::Required,
        redirects: RedirectSupport::None,
        produces_stdout: true,
        transport: true,
        value_class: ValueClass::Data,
    }
}

fn docker_schema() -> DecoratorSchema {
    let mut params = BTreeMap::new();
    params.insert(
        "container".to_string(),
        ParamSchema::required(ParamType::String).with_length(1, 255),
    );
    params.insert("user".to_string(), ParamSchema::optional(ParamType::String));
    params.insert("workdir".to_string(), ParamSchema::optional(ParamType::String));
    DecoratorSchema {
        path: "docker".to_string(),
        role: Role::Execution,
        primary: Some("container".to_string()),
        params,
        returns: ParamType::String,
        block: BlockPolicy::Required,
        redirects: RedirectSupport::None,
        produces_stdout: true,
        transport: true,
        value_class: ValueClass::Data,
    }
}

// ── Resolvers ──────────────────────────────────────────────────────────

fn string_arg<'a>(
    args: &'a BTreeMap<String, Value>,
    key: &str,
    path: &str,
) -> Result<&'a str, DispatchError> {
    match args.get(key) {
        Some(Value::String(s)) => Ok(s),
        Some(other) => Err(DispatchError::new(
            path,
            format!("parameter {key:?} must be a string, got {}", other.type_name()),
        )),
        None => Err(DispatchError::new(path, format!("missing parameter {key:?}"))),
    }
}

/// `@env.NAME` -- read an environment variable from the planning process.
struct EnvDecorator;

impl ResolveValue for EnvDecorator {
    fn resolve(
        &self,
        args: &BTreeMap<String, Value>,
        _vars: &dyn VarSource,
    ) -> Result<Resolved, DispatchError> {
        let name = string_arg(args, "name", "env")?;
        match std::env::var(name) {
            Ok(value) => Ok(Resolved {
                value: Value::String(value),
                secret: false,
            }),
            Err(std::env::VarError::NotPresent) => Err(DispatchError::new(
                "env",
                format!("environment variable {name:?} is not set"),
            )),
            Err(std::env::VarError::NotUnicode(_)) => Err(DispatchError::new(
                "env",
                format!("environment variable {name:?} is not valid UTF-8"),
            )),
        }
    }
}

/// `@var.NAME` -- read a previously declared Opal variable.
struct VarDecorator;

impl ResolveValue for VarDecorator {
    fn resolve(
        &self,
        args: &BTreeMap<String, Value>,
        vars: &dyn VarSource,
    ) -> Result<Resolved, DispatchError> {
        let name = string_arg(args, "name", "var")?;
        match vars.get(name) {
            Some(view) => Ok(Resolved {
                value: view.value,
                secret: view.secret,
            }),
            None => Err(DispatchError::new(
                "var",
                format!("variable {name:?} is not defined"),
            )),
        }
    }
}

/// `@file.read.PATH` -- read a file's contents at plan time.
struct FileReadDecorator;

impl ResolveValue for FileReadDecorator {
    fn resolve(
        &self,
        args: &BTreeMap<String, Value>,
        _vars: &dyn VarSource,
    ) -> Result<Resolved, DispatchError> {
        let path = string_arg(args, "path", "file.read")?;
        let contents = std::fs::read_to_string(path)
            .map_err(|e| DispatchError::new("file.read", format!("{path}: {e}")))?;
        // Key files conventionally end with a newline that is not part of
        // the material.
        let trimmed = contents.strip_suffix('\n').unwrap_or(&contents);
        Ok(Resolved {
            value: Value::String(trimmed.to_string()),
            secret: true,
        })
    }
}
