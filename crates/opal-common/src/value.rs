use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::Serialize;

/// A runtime value flowing through the planner.
///
/// Values are produced by literals, binary-expression evaluation, and value
/// decorators. A [`Value::Placeholder`] stands in for a resolved secret: it
/// carries the raw value's character count and a truncated hash prefix but
/// never the raw bytes, so plans and plan hashes stay free of secret
/// material.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Value {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Duration(Duration),
    Object(BTreeMap<String, Value>),
    Array(Vec<Value>),
    Placeholder {
        /// Character count of the raw value.
        length: usize,
        /// Hash algorithm tag, e.g. `sha-256` or `blake3`.
        algorithm: String,
        /// Truncated lowercase-hex hash of the raw value.
        hash_prefix: String,
    },
}

impl Value {
    /// Type name used in error messages and schema mismatch diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::String(_) => "string",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Bool(_) => "bool",
            Value::Duration(_) => "duration",
            Value::Object(_) => "object",
            Value::Array(_) => "array",
            Value::Placeholder { .. } => "placeholder",
        }
    }

    /// Whether this value is a secret placeholder.
    pub fn is_placeholder(&self) -> bool {
        matches!(self, Value::Placeholder { .. })
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => write!(f, "{s}"),
            Value::Int(n) => write!(f, "{n}"),
            Value::Float(n) => write!(f, "{n}"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Duration(d) => {
                // Render in the largest unit that divides evenly.
                let nanos = d.as_nanos();
                if nanos % 1_000_000_000 == 0 {
                    let secs = d.as_secs();
                    if secs % 3600 == 0 && secs != 0 {
                        write!(f, "{}h", secs / 3600)
                    } else if secs % 60 == 0 && secs != 0 {
                        write!(f, "{}m", secs / 60)
                    } else {
                        write!(f, "{secs}s")
                    }
                } else if nanos % 1_000_000 == 0 {
                    write!(f, "{}ms", nanos / 1_000_000)
                } else if nanos % 1_000 == 0 {
                    write!(f, "{}us", nanos / 1_000)
                } else {
                    write!(f, "{nanos}ns")
                }
            }
            Value::Object(map) => {
                write!(f, "{{")?;
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                write!(f, "}}")
            }
            Value::Array(items) => {
                write!(f, "[")?;
                for (i, v) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{v}")?;
                }
                write!(f, "]")
            }
            Value::Placeholder {
                length,
                algorithm,
                hash_prefix,
            } => write!(f, "<{length}:{algorithm}:{hash_prefix}>"),
        }
    }
}
