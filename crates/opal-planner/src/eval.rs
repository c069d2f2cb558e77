//! Plan-time evaluation of binary expressions.
//!
//! Variable declarations may carry expressions over literals, variables,
//! and value decorators. They are evaluated during planning with ordinary
//! operator precedence (the parser already shaped the `BinaryExpr` nodes);
//! this module implements the per-operator type rules and the class/taint
//! combination for derived values.

use opal_common::token::TokenKind;
use opal_common::Value;
use opal_registry::ValueClass;

use crate::scope::{Origin, Taint};

/// A value with its sensitivity metadata, as produced by evaluation.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Evaluated {
    pub value: Value,
    pub class: ValueClass,
    pub taint: Taint,
    pub origin: Origin,
}

impl Evaluated {
    pub(crate) fn literal(value: Value) -> Self {
        Self {
            value,
            class: ValueClass::Data,
            taint: Taint::Agnostic,
            origin: Origin::Literal,
        }
    }
}

/// Combine two operands' metadata: the stricter class wins, and any
/// non-literal operand makes the result session-local.
pub(crate) fn combine(lhs: &Evaluated, rhs: &Evaluated, value: Value) -> Evaluated {
    let class = lhs.class.max(rhs.class);
    let taint = match (lhs.taint, rhs.taint) {
        (Taint::Agnostic, Taint::Agnostic) => Taint::Agnostic,
        (Taint::Sealed, _) | (_, Taint::Sealed) => Taint::Sealed,
        _ => Taint::LocalOnly,
    };
    let origin = match (&lhs.origin, &rhs.origin) {
        (Origin::Literal, Origin::Literal) => Origin::Literal,
        (Origin::Decorator(path), _) | (_, Origin::Decorator(path)) => {
            Origin::Decorator(path.clone())
        }
    };
    Evaluated {
        value,
        class,
        taint,
        origin,
    }
}

/// Apply a binary operator with type checking. Errors are human-readable
/// one-liners that become `Eval` diagnostics.
pub(crate) fn apply_binop(op: TokenKind, lhs: &Value, rhs: &Value) -> Result<Value, String> {
    use TokenKind::*;
    use Value::*;

    match op {
        Plus => match (lhs, rhs) {
            (Int(a), Int(b)) => Ok(Int(a.wrapping_add(*b))),
            (Float(a), Float(b)) => Ok(Float(a + b)),
            (Int(a), Float(b)) => Ok(Float(*a as f64 + b)),
            (Float(a), Int(b)) => Ok(Float(a + *b as f64)),
            (String(a), String(b)) => Ok(String(format!("{a}{b}"))),
            _ => Err(type_error("+", lhs, rhs)),
        },
        Minus => numeric(op, lhs, rhs, |a, b| a.wrapping_sub(b), |a, b| a - b),
        Star => numeric(op, lhs, rhs, |a, b| a.wrapping_mul(b), |a, b| a * b),
        Slash => match (lhs, rhs) {
            (Int(_), Int(0)) => Err("division by zero".to_string()),
            (Int(a), Int(b)) => Ok(Int(a / b)),
            _ => float_op(op, lhs, rhs, |a, b| a / b),
        },
        Percent => match (lhs, rhs) {
            (Int(_), Int(0)) => Err("division by zero".to_string()),
            (Int(a), Int(b)) => Ok(Int(a % b)),
            _ => float_op(op, lhs, rhs, |a, b| a % b),
        },

        EqEq => equality(lhs, rhs).map(Bool),
        NotEq => equality(lhs, rhs).map(|eq| Bool(!eq)),

        Lt => compare(op, lhs, rhs, |ord| ord == std::cmp::Ordering::Less),
        LtEq => compare(op, lhs, rhs, |ord| ord != std::cmp::Ordering::Greater),
        Gt => compare(op, lhs, rhs, |ord| ord == std::cmp::Ordering::Greater),
        GtEq => compare(op, lhs, rhs, |ord| ord != std::cmp::Ordering::Less),

        AmpAmp => match (lhs, rhs) {
            (Bool(a), Bool(b)) => Ok(Bool(*a && *b)),
            _ => Err(type_error("&&", lhs, rhs)),
        },
        PipePipe => match (lhs, rhs) {
            (Bool(a), Bool(b)) => Ok(Bool(*a || *b)),
            _ => Err(type_error("||", lhs, rhs)),
        },

        other => Err(format!("{} is not a binary operator", other.describe())),
    }
}

fn type_error(op: &str, lhs: &Value, rhs: &Value) -> String {
    format!(
        "operator `{op}` cannot combine {} and {}",
        lhs.type_name(),
        rhs.type_name()
    )
}

fn numeric(
    op: TokenKind,
    lhs: &Value,
    rhs: &Value,
    int_op: impl Fn(i64, i64) -> i64,
    float_fn: impl Fn(f64, f64) -> f64,
) -> Result<Value, String> {
    match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) => Ok(Value::Int(int_op(*a, *b))),
        _ => float_op(op, lhs, rhs, float_fn),
    }
}

fn float_op(
    op: TokenKind,
    lhs: &Value,
    rhs: &Value,
    f: impl Fn(f64, f64) -> f64,
) -> Result<Value, String> {
    let promote = |v: &Value| match v {
        Value::Int(n) => Some(*n as f64),
        Value::Float(n) => Some(*n),
        _ => None,
    };
    match (promote(lhs), promote(rhs)) {
        (Some(a), Some(b)) => Ok(Value::Float(f(a, b))),
        _ => Err(type_error(op.describe().trim_matches('`'), lhs, rhs)),
    }
}

fn equality(lhs: &Value, rhs: &Value) -> Result<bool, String> {
    match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) => Ok(a == b),
        (Value::Float(a), Value::Float(b)) => Ok(a == b),
        (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => {
            Ok((*a as f64) == *b)
        }
        (Value::String(a), Value::String(b)) => Ok(a == b),
        (Value::Bool(a), Value::Bool(b)) => Ok(a == b),
        (Value::Duration(a), Value::Duration(b)) => Ok(a == b),
        _ => Err(type_error("==", lhs, rhs)),
    }
}

fn compare(
    op: TokenKind,
    lhs: &Value,
    rhs: &Value,
    accept: impl Fn(std::cmp::Ordering) -> bool,
) -> Result<Value, String> {
    let ordering = match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) => a.cmp(b),
        (Value::String(a), Value::String(b)) => a.cmp(b),
        (Value::Duration(a), Value::Duration(b)) => a.cmp(b),
        (Value::Float(a), Value::Float(b)) => a
            .partial_cmp(b)
            .ok_or_else(|| "cannot compare NaN".to_string())?,
        (Value::Int(a), Value::Float(b)) => (*a as f64)
            .partial_cmp(b)
            .ok_or_else(|| "cannot compare NaN".to_string())?,
        (Value::Float(a), Value::Int(b)) => a
            .partial_cmp(&(*b as f64))
            .ok_or_else(|| "cannot compare NaN".to_string())?,
        _ => return Err(type_error(op.describe().trim_matches('`'), lhs, rhs)),
    };
    Ok(Value::Bool(accept(ordering)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_arithmetic() {
        assert_eq!(apply_binop(TokenKind::Plus, &Value::Int(2), &Value::Int(3)), Ok(Value::Int(5)));
        assert_eq!(apply_binop(TokenKind::Star, &Value::Int(4), &Value::Int(5)), Ok(Value::Int(20)));
        assert_eq!(apply_binop(TokenKind::Slash, &Value::Int(7), &Value::Int(2)), Ok(Value::Int(3)));
        assert_eq!(apply_binop(TokenKind::Percent, &Value::Int(7), &Value::Int(2)), Ok(Value::Int(1)));
    }

    #[test]
    fn division_by_zero_is_an_error() {
        assert!(apply_binop(TokenKind::Slash, &Value::Int(1), &Value::Int(0)).is_err());
        assert!(apply_binop(TokenKind::Percent, &Value::Int(1), &Value::Int(0)).is_err());
    }

    #[test]
    fn float_promotion() {
        assert_eq!(
            apply_binop(TokenKind::Plus, &Value::Int(1), &Value::Float(0.5)),
            Ok(Value::Float(1.5))
        );
    }

    #[test]
    fn string_concat_with_plus() {
        assert_eq!(
            apply_binop(
                TokenKind::Plus,
                &Value::String("a".into()),
                &Value::String("b".into())
            ),
            Ok(Value::String("ab".into()))
        );
    }

    #[test]
    fn string_plus_int_is_a_type_error() {
        let err = apply_binop(TokenKind::Plus, &Value::String("a".into()), &Value::Int(1))
            .unwrap_err();
        assert!(err.contains("string"), "error: {err}");
        assert!(err.contains("int"), "error: {err}");
    }

    #[test]
    fn comparisons_and_equality() {
        assert_eq!(
            apply_binop(TokenKind::Lt, &Value::Int(1), &Value::Int(2)),
            Ok(Value::Bool(true))
        );
        assert_eq!(
            apply_binop(TokenKind::EqEq, &Value::String("x".into()), &Value::String("x".into())),
            Ok(Value::Bool(true))
        );
        assert_eq!(
            apply_binop(TokenKind::NotEq, &Value::Bool(true), &Value::Bool(false)),
            Ok(Value::Bool(true))
        );
    }

    #[test]
    fn logic_requires_booleans() {
        assert!(apply_binop(TokenKind::AmpAmp, &Value::Int(1), &Value::Bool(true)).is_err());
        assert_eq!(
            apply_binop(TokenKind::PipePipe, &Value::Bool(false), &Value::Bool(true)),
            Ok(Value::Bool(true))
        );
    }

    #[test]
    fn combine_takes_stricter_class_and_taint() {
        let literal = Evaluated::literal(Value::Int(1));
        let secret = Evaluated {
            value: Value::String("s".into()),
            class: ValueClass::Secret,
            taint: Taint::Sealed,
            origin: Origin::Decorator("file.read".into()),
        };
        let combined = combine(&literal, &secret, Value::String("x".into()));
        assert_eq!(combined.class, ValueClass::Secret);
        assert_eq!(combined.taint, Taint::Sealed);
        assert_eq!(combined.origin, Origin::Decorator("file.read".into()));
    }
}
