//! Decorator call-site parsing and schema validation.
//!
//! At an `@`, the parser collects the adjacent dotted name and asks the
//! registry for the longest registered prefix. No match means the `@` is
//! ordinary text (an email address in a shell command produces no decorator
//! node). A match opens a `Decorator` node covering the name, an optional
//! `.primary` property access binding the primary parameter, an optional
//! `(k=v, ...)` parameter list, and an optional block.
//!
//! All parameter validation happens here, at parse time, producing ordinary
//! [`ParseError`]s: unknown names, type mismatches, range/enum/length
//! violations, missing required parameters, and block misuse.

use std::ops::Range;

use opal_common::literal::value_of_literal;
use opal_common::token::TokenKind;
use opal_common::Value;
use opal_registry::{BlockPolicy, DecoratorRegistry, DecoratorSchema, ParamViolation, Role};

use crate::event::NodeKind;
use crate::token_set::TokenSet;

use super::{items, MarkClosed, Parser};

/// A parsed decorator call site.
pub(crate) struct DecoratorCall {
    pub(crate) mark: MarkClosed,
    /// The registered path that matched, e.g. `file.read`.
    pub(crate) path: String,
}

/// Whether the cursor sits on an `@` that begins a registered decorator.
pub(crate) fn at_decorator(p: &Parser) -> bool {
    if !p.at(TokenKind::At) {
        return false;
    }
    match dotted_candidate(p) {
        Some((candidate, _)) => p.registry().longest_match(&candidate).is_some(),
        None => false,
    }
}

/// Collect the dotted name glued to the `@`: `Ident (. Ident)*`, all
/// adjacent. Returns the candidate string and the number of name tokens.
fn dotted_candidate(p: &Parser) -> Option<(String, usize)> {
    if p.nth(1) != TokenKind::Ident || !p.nth_adjacent(1) {
        return None;
    }
    let base = p.cursor();
    let mut candidate = p.text_at(base + 1).to_string();
    let mut consumed = 1;
    loop {
        let dot = 1 + consumed;
        if p.nth(dot) == TokenKind::Dot
            && p.nth_adjacent(dot)
            && p.nth(dot + 1) == TokenKind::Ident
            && p.nth_adjacent(dot + 1)
        {
            candidate.push('.');
            candidate.push_str(p.text_at(base + dot + 1));
            consumed += 2;
        } else {
            break;
        }
    }
    Some((candidate, consumed))
}

const PARAM_RECOVERY: TokenSet = TokenSet::of(&[TokenKind::RParen, TokenKind::Comma]);

/// Parse a decorator call site. Returns `None` when the `@` does not begin
/// a registered decorator; the caller then treats `@` as a literal token.
pub(crate) fn decorator(p: &mut Parser) -> Option<MarkClosed> {
    decorator_call(p).map(|call| call.mark)
}

pub(crate) fn decorator_call(p: &mut Parser) -> Option<DecoratorCall> {
    p.trace_rule("decorator");
    let (candidate, _) = dotted_candidate(p)?;
    let matched = p.registry().longest_match(&candidate)?;
    let schema = p
        .registry()
        .schema(matched)
        .expect("longest_match only returns registered paths");
    let path = matched.to_string();

    let m = p.open(NodeKind::Decorator);
    p.advance(); // @

    // Name tokens: idents and dots of the matched path.
    let segments = path.split('.').count();
    for _ in 0..(2 * segments - 1) {
        p.advance();
    }

    let mut provided: Vec<String> = Vec::new();

    // Optional `.primary` property access.
    if p.at(TokenKind::Dot) && p.nth_adjacent(0) && p.nth_adjacent(1) {
        parse_primary_binding(p, schema, &path, &mut provided);
    }

    // Optional `(k=v, ...)` parameter list.
    if p.at(TokenKind::LParen) {
        parse_param_list(p, schema, &path, &mut provided);
    }

    // Missing required parameters, now that the whole call was scanned.
    for (name, param) in &schema.params {
        if param.required && !provided.iter().any(|n| n == name) {
            let err = p.error_here(
                format!("@{path} is missing the required parameter \"{name}\""),
                "decorator parameters",
            );
            if schema.primary.as_deref() == Some(name) {
                err.suggestion = Some(format!("bind it with dot-syntax: @{path}.VALUE"));
            } else {
                err.suggestion = Some(format!("add {name}={}", param.ty.example()));
            }
        }
    }

    // Block handling.
    if p.at(TokenKind::LBrace) {
        let block_allowed = schema.role == Role::Execution && schema.block != BlockPolicy::Forbidden;
        if !block_allowed {
            p.error_here(format!("@{path} cannot have a block"), "decorator block");
        }
        // Parse the block either way so recovery keeps the tree aligned.
        items::block(p);
    } else if schema.role == Role::Execution && schema.block == BlockPolicy::Required {
        p.error_here(format!("@{path} requires a block"), "decorator block")
            .example = Some(format!("@{path}(...) {{ ... }}"));
    }

    let mark = p.close(m);
    Some(DecoratorCall { mark, path })
}

/// Parse `.VALUE` binding the primary parameter.
fn parse_primary_binding(
    p: &mut Parser,
    schema: &DecoratorSchema,
    path: &str,
    provided: &mut Vec<String>,
) {
    let Some(primary) = schema.primary.clone() else {
        // `@parallel.3` when parallel declares no primary parameter.
        p.error_here(
            format!("@{path} does not take a dot-syntax argument"),
            "decorator parameters",
        );
        p.advance(); // .
        if matches!(
            p.current(),
            TokenKind::Ident
                | TokenKind::IntLiteral
                | TokenKind::FloatLiteral
                | TokenKind::DurationLiteral
                | TokenKind::StringLiteral
                | TokenKind::SingleStringLiteral
        ) {
            p.advance();
        }
        return;
    };

    p.advance(); // .

    let value_index = p.cursor();
    let value = match p.current() {
        // `@env.HOME`: a bare identifier binds as its text.
        TokenKind::Ident => {
            let v = Value::String(p.current_text().to_string());
            p.advance();
            Some(v)
        }
        TokenKind::IntLiteral
        | TokenKind::FloatLiteral
        | TokenKind::DurationLiteral
        | TokenKind::StringLiteral
        | TokenKind::SingleStringLiteral => {
            let v = value_of_literal(p.current(), p.current_text());
            p.advance();
            v
        }
        _ => {
            p.error_here(
                format!("expected a value after `@{path}.`"),
                "decorator parameters",
            )
            .expected = Some(vec![TokenKind::Ident, TokenKind::IntLiteral]);
            None
        }
    };

    if let Some(value) = value {
        provided.push(primary.clone());
        let param = &schema.params[&primary];
        if let Err(violation) = param.check(&value) {
            report_violation(p, value_index, path, &primary, violation);
        }
    }
}

/// Parse `(name=value, ...)`, validating each pair against the schema.
fn parse_param_list(
    p: &mut Parser,
    schema: &DecoratorSchema,
    path: &str,
    provided: &mut Vec<String>,
) {
    p.advance(); // (
    p.push_recovery(PARAM_RECOVERY);

    loop {
        p.eat_newlines();
        if p.at(TokenKind::RParen) || p.at_eof() {
            break;
        }

        let before = p.cursor();
        parse_param_pair(p, schema, path, provided);

        if !p.eat(TokenKind::Comma) && !p.at(TokenKind::RParen) && !p.at_eof() {
            p.error_here("expected `,` or `)`", "decorator parameters").expected =
                Some(vec![TokenKind::Comma, TokenKind::RParen]);
            p.recover();
        }
        p.ensure_progress(before, "decorator parameters");
    }

    p.pop_recovery();
    p.expect(TokenKind::RParen, "decorator parameters");
}

fn parse_param_pair(
    p: &mut Parser,
    schema: &DecoratorSchema,
    path: &str,
    provided: &mut Vec<String>,
) {
    if !p.at(TokenKind::Ident) {
        p.error_here("expected parameter name", "decorator parameters")
            .expected = Some(vec![TokenKind::Ident]);
        p.recover();
        return;
    }

    let name = p.current_text().to_string();
    let name_index = p.cursor();
    let known = schema.params.contains_key(&name);
    if !known {
        let valid = schema.param_names().join(", ");
        p.error_at_token_index(
            name_index,
            format!("@{path} has no parameter \"{name}\""),
            "decorator parameters",
        )
        .suggestion = Some(format!("valid parameters: {valid}"));
    }
    p.advance(); // name

    if !p.expect(TokenKind::Eq, "decorator parameters") {
        return;
    }

    let value_index = p.cursor();
    let value = match p.current() {
        TokenKind::IntLiteral
        | TokenKind::FloatLiteral
        | TokenKind::DurationLiteral
        | TokenKind::StringLiteral
        | TokenKind::SingleStringLiteral
        | TokenKind::True
        | TokenKind::False => {
            let v = value_of_literal(p.current(), p.current_text());
            p.advance();
            v
        }
        _ => {
            p.error_here("expected a literal value", "decorator parameters")
                .example = Some("times=3".into());
            p.recover();
            None
        }
    };

    if let Some(value) = value {
        provided.push(name.clone());
        if known {
            if let Err(violation) = schema.params[&name].check(&value) {
                report_violation(p, value_index, path, &name, violation);
            }
        }
    }
}

/// Turn a [`ParamViolation`] into a positioned parse error.
fn report_violation(
    p: &mut Parser,
    token_index: usize,
    path: &str,
    name: &str,
    violation: ParamViolation,
) {
    let message = format!("@{path} parameter \"{name}\": {violation}");
    let example = match &violation {
        ParamViolation::TypeMismatch { example, .. } => Some(format!("{name}={example}")),
        _ => None,
    };
    let err = p.error_at_token_index(token_index, message, "decorator parameters");
    err.example = example;
}

// ── String interpolation ───────────────────────────────────────────────

/// One piece of an interpolated string's inner text.
#[derive(Debug, Clone, PartialEq)]
pub enum StringPiece {
    /// A literal byte range of the inner text.
    Literal(Range<usize>),
    /// A decorator reference: `@path` or `@path.primary`.
    Decorator {
        range: Range<usize>,
        path: String,
        primary: Option<String>,
    },
}

/// Scan the *inner* text of a double-quoted string for decorator
/// references. Only references whose dotted path has a registry match are
/// recognized; everything else stays literal (`user@host.com` survives).
///
/// The same scan drives the parser's `InterpolatedString` events and the
/// planner's argument materialization, so both stay in agreement.
pub fn scan_interpolations(inner: &str, registry: &DecoratorRegistry) -> Vec<StringPiece> {
    let bytes = inner.as_bytes();
    let mut pieces = Vec::new();
    let mut literal_start = 0;
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] != b'@' {
            i += 1;
            continue;
        }

        // Collect the dotted name after `@`.
        let name_start = i + 1;
        let mut j = name_start;
        let mut segments: Vec<Range<usize>> = Vec::new();
        loop {
            let seg_start = j;
            if j < bytes.len() && (bytes[j].is_ascii_alphabetic() || bytes[j] == b'_') {
                j += 1;
                while j < bytes.len() && (bytes[j].is_ascii_alphanumeric() || bytes[j] == b'_') {
                    j += 1;
                }
                segments.push(seg_start..j);
            } else {
                break;
            }
            if j < bytes.len() && bytes[j] == b'.' {
                j += 1;
            } else {
                break;
            }
        }

        if segments.is_empty() {
            i += 1;
            continue;
        }

        let candidate: String = segments
            .iter()
            .map(|r| &inner[r.clone()])
            .collect::<Vec<_>>()
            .join(".");

        let Some(matched) = registry.longest_match(&candidate) else {
            i += 1;
            continue;
        };
        let matched_segments = matched.split('.').count();
        let path = matched.to_string();

        // One extra segment beyond the match binds the primary parameter.
        let (primary, end) = if segments.len() > matched_segments {
            let r = &segments[matched_segments];
            (Some(inner[r.clone()].to_string()), r.end)
        } else {
            (None, segments[matched_segments - 1].end)
        };

        if literal_start < i {
            pieces.push(StringPiece::Literal(literal_start..i));
        }
        pieces.push(StringPiece::Decorator {
            range: i..end,
            path,
            primary,
        });
        literal_start = end;
        i = end;
    }

    if pieces.is_empty() {
        return pieces;
    }
    if literal_start < bytes.len() {
        pieces.push(StringPiece::Literal(literal_start..bytes.len()));
    }
    pieces
}

/// Parse the string literal at the cursor, producing either a plain
/// `Literal` node or an `InterpolatedString` with `StringPart`/`Decorator`
/// children. Every part node references the string token itself; part byte
/// ranges are recovered by re-running [`scan_interpolations`].
pub(crate) fn string_literal(p: &mut Parser) -> MarkClosed {
    debug_assert_eq!(p.current(), TokenKind::StringLiteral);
    let inner = unquote_span(p.current_text());
    let pieces = scan_interpolations(inner, p.registry());

    if pieces.is_empty() {
        let m = p.open(NodeKind::Literal);
        p.advance();
        return p.close(m);
    }

    let m = p.open(NodeKind::InterpolatedString);
    for piece in &pieces {
        match piece {
            StringPiece::Literal(_) => {
                let part = p.open(NodeKind::StringPart);
                p.emit_current_token();
                p.close(part);
            }
            StringPiece::Decorator { .. } => {
                let part = p.open(NodeKind::Decorator);
                p.emit_current_token();
                p.close(part);
            }
        }
    }
    p.skip_emitted();
    p.close(m)
}

/// The text between the quotes, without unescaping.
///
/// Interpolation scanning works on raw inner text so byte ranges line up
/// with the token span; escapes are resolved when values materialize.
fn unquote_span(text: &str) -> &str {
    if text.len() >= 2 {
        &text[1..text.len() - 1]
    } else {
        text
    }
}
