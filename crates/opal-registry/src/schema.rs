//! Decorator schema types.
//!
//! A [`DecoratorSchema`] is the contract a decorator publishes at
//! registration time: its dotted path, role, parameter shapes, whether it
//! takes a block, and how it behaves under pipes and redirects. Schemas are
//! validated for internal consistency when registered, so the parser and
//! planner can rely on them blindly afterwards.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use opal_common::Value;

/// Whether a decorator produces a value or wraps execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Role {
    /// Produces a [`Value`] at plan time (`@env.HOME`, `@file.read`).
    Value,
    /// Wraps or selects execution of a block (`@retry`, `@ssh`).
    Execution,
}

/// Sensitivity classification of a resolved value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum ValueClass {
    /// Plain data: literals, arithmetic results.
    Data,
    /// Configuration values: environment, settings.
    Config,
    /// Secrets: never rendered, never cross transport boundaries.
    Secret,
}

/// Block policy for a decorator call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BlockPolicy {
    /// A block is an error (`@env { ... }`).
    Forbidden,
    /// A block may follow but is not required.
    Optional,
    /// A block must follow (`@retry(times=3) { ... }`).
    Required,
}

/// Redirect mode of a `>` or `>>` operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RedirectMode {
    /// `>`
    Overwrite,
    /// `>>`
    Append,
}

impl fmt::Display for RedirectMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RedirectMode::Overwrite => write!(f, ">"),
            RedirectMode::Append => write!(f, ">>"),
        }
    }
}

/// Which redirect operators a decorator supports as a redirect target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RedirectSupport {
    None,
    OverwriteOnly,
    AppendOnly,
    Both,
}

impl RedirectSupport {
    /// Whether the given redirect mode is permitted.
    pub fn allows(self, mode: RedirectMode) -> bool {
        match self {
            RedirectSupport::None => false,
            RedirectSupport::OverwriteOnly => mode == RedirectMode::Overwrite,
            RedirectSupport::AppendOnly => mode == RedirectMode::Append,
            RedirectSupport::Both => true,
        }
    }
}

/// The type of a decorator parameter.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ParamType {
    String,
    Int,
    Float,
    Bool,
    Duration,
    /// One of a fixed set of string values.
    Enum(Vec<String>),
    /// A nested object with typed fields.
    Object(BTreeMap<String, ParamType>),
    /// A homogeneous array with optional bounds and uniqueness.
    Array {
        elem: Box<ParamType>,
        min: Option<usize>,
        max: Option<usize>,
        unique: bool,
    },
}

impl ParamType {
    /// Name used in error messages.
    pub fn name(&self) -> &'static str {
        match self {
            ParamType::String => "string",
            ParamType::Int => "int",
            ParamType::Float => "float",
            ParamType::Bool => "bool",
            ParamType::Duration => "duration",
            ParamType::Enum(_) => "enum",
            ParamType::Object(_) => "object",
            ParamType::Array { .. } => "array",
        }
    }

    /// An example literal for error suggestions.
    pub fn example(&self) -> String {
        match self {
            ParamType::String => "\"text\"".to_string(),
            ParamType::Int => "42".to_string(),
            ParamType::Float => "3.14".to_string(),
            ParamType::Bool => "true".to_string(),
            ParamType::Duration => "30s".to_string(),
            ParamType::Enum(values) => values
                .first()
                .map(|v| format!("\"{v}\""))
                .unwrap_or_else(|| "\"value\"".to_string()),
            ParamType::Object(_) => "{key=\"value\"}".to_string(),
            ParamType::Array { elem, .. } => format!("[{}]", elem.example()),
        }
    }

    /// Whether a runtime value has this type. Ints promote to float.
    /// Placeholders match `String` -- they stand in for resolved string
    /// secrets and their true shape is unknowable by design.
    fn matches(&self, value: &Value) -> bool {
        match (self, value) {
            (ParamType::String, Value::String(_) | Value::Placeholder { .. }) => true,
            (ParamType::Int, Value::Int(_)) => true,
            (ParamType::Float, Value::Float(_) | Value::Int(_)) => true,
            (ParamType::Bool, Value::Bool(_)) => true,
            (ParamType::Duration, Value::Duration(_)) => true,
            (ParamType::Enum(_), Value::String(_)) => true,
            (ParamType::Object(_), Value::Object(_)) => true,
            (ParamType::Array { .. }, Value::Array(_)) => true,
            _ => false,
        }
    }
}

/// A single violation of a parameter schema.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ParamViolation {
    TypeMismatch {
        expected: String,
        got: String,
        example: String,
    },
    OutOfRange {
        min: i64,
        max: i64,
        got: i64,
    },
    NotInEnum {
        values: Vec<String>,
        got: String,
    },
    LengthOutOfBounds {
        min: usize,
        max: usize,
        got: usize,
    },
    ArrayBounds {
        min: Option<usize>,
        max: Option<usize>,
        got: usize,
    },
    DuplicateElement,
}

impl fmt::Display for ParamViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamViolation::TypeMismatch { expected, got, example } => {
                write!(f, "expected {expected}, got {got} (e.g. {example})")
            }
            ParamViolation::OutOfRange { min, max, got } => {
                write!(f, "value {got} is outside the permitted range {min}..{max}")
            }
            ParamViolation::NotInEnum { values, got } => {
                write!(f, "\"{got}\" is not one of: {}", values.join(", "))
            }
            ParamViolation::LengthOutOfBounds { min, max, got } => {
                write!(f, "length {got} is outside the permitted bounds {min}..{max}")
            }
            ParamViolation::ArrayBounds { min, max, got } => {
                let min = min.map(|n| n.to_string()).unwrap_or_default();
                let max = max.map(|n| n.to_string()).unwrap_or_default();
                write!(f, "array length {got} is outside the permitted bounds {min}..{max}")
            }
            ParamViolation::DuplicateElement => write!(f, "array elements must be unique"),
        }
    }
}

/// Schema of a single decorator parameter.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParamSchema {
    pub ty: ParamType,
    pub required: bool,
    pub default: Option<Value>,
    /// Inclusive numeric range for int parameters.
    pub range: Option<(i64, i64)>,
    /// Inclusive length bounds for string parameters.
    pub length: Option<(usize, usize)>,
    /// Reserved for plug-in schemas; not checked at plan time.
    pub pattern: Option<String>,
    pub examples: Vec<String>,
}

impl ParamSchema {
    /// A required parameter of the given type.
    pub fn required(ty: ParamType) -> Self {
        Self {
            ty,
            required: true,
            default: None,
            range: None,
            length: None,
            pattern: None,
            examples: Vec::new(),
        }
    }

    /// An optional parameter of the given type.
    pub fn optional(ty: ParamType) -> Self {
        Self {
            required: false,
            ..Self::required(ty)
        }
    }

    /// Attach a default value (implies optional).
    pub fn with_default(mut self, default: Value) -> Self {
        self.required = false;
        self.default = Some(default);
        self
    }

    /// Attach an inclusive numeric range.
    pub fn with_range(mut self, min: i64, max: i64) -> Self {
        self.range = Some((min, max));
        self
    }

    /// Attach inclusive string length bounds.
    pub fn with_length(mut self, min: usize, max: usize) -> Self {
        self.length = Some((min, max));
        self
    }

    /// Check a value against this parameter schema.
    pub fn check(&self, value: &Value) -> Result<(), ParamViolation> {
        if !self.ty.matches(value) {
            return Err(ParamViolation::TypeMismatch {
                expected: self.ty.name().to_string(),
                got: value.type_name().to_string(),
                example: self
                    .examples
                    .first()
                    .cloned()
                    .unwrap_or_else(|| self.ty.example()),
            });
        }

        if let (Some((min, max)), Value::Int(n)) = (self.range, value) {
            if *n < min || *n > max {
                return Err(ParamViolation::OutOfRange { min, max, got: *n });
            }
        }

        if let (Some((min, max)), Value::String(s)) = (self.length, value) {
            let got = s.chars().count();
            if got < min || got > max {
                return Err(ParamViolation::LengthOutOfBounds { min, max, got });
            }
        }

        if let (ParamType::Enum(values), Value::String(s)) = (&self.ty, value) {
            if !values.iter().any(|v| v == s) {
                return Err(ParamViolation::NotInEnum {
                    values: values.clone(),
                    got: s.clone(),
                });
            }
        }

        if let (ParamType::Array { min, max, unique, .. }, Value::Array(items)) = (&self.ty, value)
        {
            let got = items.len();
            if min.is_some_and(|m| got < m) || max.is_some_and(|m| got > m) {
                return Err(ParamViolation::ArrayBounds {
                    min: *min,
                    max: *max,
                    got,
                });
            }
            if *unique {
                for (i, a) in items.iter().enumerate() {
                    if items[..i].contains(a) {
                        return Err(ParamViolation::DuplicateElement);
                    }
                }
            }
        }

        Ok(())
    }
}

/// The full schema a decorator publishes at registration time.
#[derive(Debug, Clone, Serialize)]
pub struct DecoratorSchema {
    /// Dotted path, e.g. `env` or `file.read`.
    pub path: String,
    pub role: Role,
    /// Name of the parameter bound by `@path.VALUE` dot-syntax.
    pub primary: Option<String>,
    pub params: BTreeMap<String, ParamSchema>,
    /// Type of the value produced (value decorators) or of the wrapped
    /// block's result (execution decorators).
    pub returns: ParamType,
    pub block: BlockPolicy,
    pub redirects: RedirectSupport,
    /// Whether piping *from* this decorator is meaningful.
    pub produces_stdout: bool,
    /// Whether this execution decorator changes sessions (ssh, docker).
    pub transport: bool,
    /// Default classification of values this decorator produces.
    pub value_class: ValueClass,
}

impl DecoratorSchema {
    /// Validate internal consistency. Called at registration; a failure
    /// here is a startup failure, not a parse error.
    pub fn validate(&self) -> Result<(), String> {
        if self.path.is_empty() || self.path.split('.').any(|seg| seg.is_empty()) {
            return Err(format!("invalid decorator path {:?}", self.path));
        }
        if let Some(primary) = &self.primary {
            if !self.params.contains_key(primary) {
                return Err(format!(
                    "primary parameter {primary:?} is not declared in parameters"
                ));
            }
        }
        for (name, param) in &self.params {
            if let ParamType::Enum(values) = &param.ty {
                if values.is_empty() {
                    return Err(format!("parameter {name:?}: enum has no values"));
                }
            }
            if let Some((min, max)) = param.range {
                if min > max {
                    return Err(format!("parameter {name:?}: range {min}..{max} is inverted"));
                }
            }
            if let Some((min, max)) = param.length {
                if min > max {
                    return Err(format!(
                        "parameter {name:?}: length bounds {min}..{max} are inverted"
                    ));
                }
            }
            if let ParamType::Array { min, max, .. } = &param.ty {
                if let (Some(min), Some(max)) = (min, max) {
                    if min > max {
                        return Err(format!(
                            "parameter {name:?}: array bounds {min}..{max} are inverted"
                        ));
                    }
                }
            }
            if let Some(default) = &param.default {
                if param.check(default).is_err() {
                    return Err(format!(
                        "parameter {name:?}: default value does not satisfy its own schema"
                    ));
                }
            }
        }
        if self.transport && self.role != Role::Execution {
            return Err(format!(
                "decorator {:?}: only execution decorators may declare a transport effect",
                self.path
            ));
        }
        Ok(())
    }

    /// Parameter names in sorted order, for suggestions.
    pub fn param_names(&self) -> Vec<&str> {
        self.params.keys().map(String::as_str).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int_param(min: i64, max: i64) -> ParamSchema {
        ParamSchema::required(ParamType::Int).with_range(min, max)
    }

    #[test]
    fn redirect_support_allows() {
        assert!(RedirectSupport::Both.allows(RedirectMode::Overwrite));
        assert!(RedirectSupport::Both.allows(RedirectMode::Append));
        assert!(RedirectSupport::OverwriteOnly.allows(RedirectMode::Overwrite));
        assert!(!RedirectSupport::OverwriteOnly.allows(RedirectMode::Append));
        assert!(RedirectSupport::AppendOnly.allows(RedirectMode::Append));
        assert!(!RedirectSupport::None.allows(RedirectMode::Overwrite));
    }

    #[test]
    fn param_check_type_mismatch_includes_example() {
        let param = ParamSchema::required(ParamType::Duration);
        let err = param.check(&Value::Int(5)).unwrap_err();
        match err {
            ParamViolation::TypeMismatch { expected, got, example } => {
                assert_eq!(expected, "duration");
                assert_eq!(got, "int");
                assert_eq!(example, "30s");
            }
            other => panic!("unexpected violation: {other:?}"),
        }
    }

    #[test]
    fn param_check_range() {
        let param = int_param(1, 100);
        assert!(param.check(&Value::Int(50)).is_ok());
        let err = param.check(&Value::Int(200)).unwrap_err();
        assert_eq!(err, ParamViolation::OutOfRange { min: 1, max: 100, got: 200 });
    }

    #[test]
    fn param_check_enum() {
        let param = ParamSchema::required(ParamType::Enum(vec!["fast".into(), "safe".into()]));
        assert!(param.check(&Value::String("fast".into())).is_ok());
        let err = param.check(&Value::String("slow".into())).unwrap_err();
        assert!(matches!(err, ParamViolation::NotInEnum { .. }));
    }

    #[test]
    fn param_check_string_length() {
        let param = ParamSchema::required(ParamType::String).with_length(1, 3);
        assert!(param.check(&Value::String("ok".into())).is_ok());
        let err = param.check(&Value::String("toolong".into())).unwrap_err();
        assert!(matches!(err, ParamViolation::LengthOutOfBounds { min: 1, max: 3, .. }));
    }

    #[test]
    fn int_promotes_to_float() {
        let param = ParamSchema::required(ParamType::Float);
        assert!(param.check(&Value::Int(2)).is_ok());
    }

    #[test]
    fn placeholder_matches_string() {
        let param = ParamSchema::required(ParamType::String);
        let placeholder = Value::Placeholder {
            length: 5,
            algorithm: "sha-256".into(),
            hash_prefix: "abcdef".into(),
        };
        assert!(param.check(&placeholder).is_ok());
    }

    #[test]
    fn schema_validation_rejects_unknown_primary() {
        let schema = DecoratorSchema {
            path: "broken".into(),
            role: Role::Value,
            primary: Some("nope".into()),
            params: BTreeMap::new(),
            returns: ParamType::String,
            block: BlockPolicy::Forbidden,
            redirects: RedirectSupport::None,
            produces_stdout: false,
            transport: false,
            value_class: ValueClass::Data,
        };
        assert!(schema.validate().is_err());
    }

    #[test]
    fn schema_validation_rejects_inverted_range() {
        let mut params = BTreeMap::new();
        params.insert("times".to_string(), int_param(100, 1));
        let schema = DecoratorSchema {
            path: "broken".into(),
            role: Role::Execution,
            primary: None,
            params,
            returns: ParamType::String,
            block: BlockPolicy::Required,
            redirects: RedirectSupport::None,
            produces_stdout: true,
            transport: false,
            value_class: ValueClass::Data,
        };
        assert!(schema.validate().is_err());
    }

    #[test]
    fn schema_validation_rejects_transport_value_decorator() {
        let schema = DecoratorSchema {
            path: "weird".into(),
            role: Role::Value,
            primary: None,
            params: BTreeMap::new(),
            returns: ParamType::String,
            block: BlockPolicy::Forbidden,
            redirects: RedirectSupport::None,
            produces_stdout: false,
            transport: true,
            value_class: ValueClass::Data,
        };
        assert!(schema.validate().is_err());
    }
}
