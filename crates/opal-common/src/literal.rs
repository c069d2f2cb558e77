//! Literal token materialization.
//!
//! Converts literal token text into [`Value`]s. Both the parser (decorator
//! parameter validation) and the planner (argument evaluation) need the same
//! conversions, so they live here.

use std::time::Duration;

use crate::token::TokenKind;
use crate::value::Value;

/// Convert a literal token's raw text into a [`Value`].
///
/// Returns `None` for token kinds that are not literals or for text that
/// does not parse (which the lexer should not produce).
pub fn value_of_literal(kind: TokenKind, text: &str) -> Option<Value> {
    match kind {
        TokenKind::IntLiteral => text.parse::<i64>().ok().map(Value::Int),
        TokenKind::FloatLiteral => text.parse::<f64>().ok().map(Value::Float),
        TokenKind::DurationLiteral => parse_duration(text).map(Value::Duration),
        TokenKind::StringLiteral | TokenKind::SingleStringLiteral => {
            Some(Value::String(unquote(text)))
        }
        TokenKind::True => Some(Value::Bool(true)),
        TokenKind::False => Some(Value::Bool(false)),
        _ => None,
    }
}

/// Strip the surrounding quotes from a string literal and process escapes.
///
/// `\"`, `\'`, `\\`, `\n`, `\t` are unescaped; an unknown escape keeps the
/// backslash literally. Text without surrounding quotes is returned as-is
/// (interpolation parts are unquoted slices).
pub fn unquote(text: &str) -> String {
    let inner = match text.as_bytes() {
        [b'"', .., b'"'] | [b'\'', .., b'\''] if text.len() >= 2 => &text[1..text.len() - 1],
        _ => text,
    };
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('"') => out.push('"'),
            Some('\'') => out.push('\''),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

/// Parse a duration literal: an integer count followed by a unit suffix
/// (`ns`, `us`, `ms`, `s`, `m`, `h`).
pub fn parse_duration(text: &str) -> Option<Duration> {
    let split = text.find(|c: char| !c.is_ascii_digit())?;
    let (digits, unit) = text.split_at(split);
    let count: u64 = digits.parse().ok()?;
    match unit {
        "ns" => Some(Duration::from_nanos(count)),
        "us" => Some(Duration::from_micros(count)),
        "ms" => Some(Duration::from_millis(count)),
        "s" => Some(Duration::from_secs(count)),
        "m" => count.checked_mul(60).map(Duration::from_secs),
        "h" => count.checked_mul(3600).map(Duration::from_secs),
        _ => None,
    }
}
