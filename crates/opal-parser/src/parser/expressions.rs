//! Expression parser for variable declarations and conditions.
//!
//! Precedence climbing with a fixed binding-power table. Binary expressions
//! are built with [`Parser::wrap`]: the left operand parses first, then the
//! whole thing is retroactively wrapped in a `BinaryExpr` node. Left
//! associativity falls out of the `(left, right)` power pairs.

use opal_common::token::TokenKind;

use crate::event::NodeKind;

use super::{decorators, MarkClosed, Parser};

/// `(left_bp, right_bp)` for infix operators. Left < right everywhere:
/// all Opal binary operators are left-associative.
///
/// Precedence bands, low to high: `||`, `&&`, equality, comparison,
/// additive, multiplicative.
fn infix_binding_power(op: TokenKind) -> Option<(u8, u8)> {
    match op {
        TokenKind::PipePipe => Some((1, 2)),
        TokenKind::AmpAmp => Some((3, 4)),
        TokenKind::EqEq | TokenKind::NotEq => Some((5, 6)),
        TokenKind::Lt | TokenKind::LtEq | TokenKind::Gt | TokenKind::GtEq => Some((7, 8)),
        TokenKind::Plus | TokenKind::Minus => Some((9, 10)),
        TokenKind::Star | TokenKind::Slash | TokenKind::Percent => Some((11, 12)),
        _ => None,
    }
}

/// Parse an expression at the lowest binding power.
pub(crate) fn expr(p: &mut Parser) {
    expr_bp(p, 0);
}

fn expr_bp(p: &mut Parser, min_bp: u8) -> Option<MarkClosed> {
    let mut lhs = atom(p)?;

    loop {
        let Some((l_bp, r_bp)) = infix_binding_power(p.current()) else {
            break;
        };
        if l_bp < min_bp {
            break;
        }

        p.advance(); // operator
        expr_bp(p, r_bp);
        lhs = p.wrap(lhs, NodeKind::BinaryExpr);
    }

    Some(lhs)
}

/// Parse an expression atom: a literal, identifier, value decorator, or
/// parenthesized group.
fn atom(p: &mut Parser) -> Option<MarkClosed> {
    match p.current() {
        TokenKind::IntLiteral
        | TokenKind::FloatLiteral
        | TokenKind::DurationLiteral
        | TokenKind::True
        | TokenKind::False
        | TokenKind::SingleStringLiteral => {
            let m = p.open(NodeKind::Literal);
            p.advance();
            Some(p.close(m))
        }

        // Double-quoted strings may interpolate decorator references.
        TokenKind::StringLiteral => Some(decorators::string_literal(p)),

        TokenKind::Ident => {
            let m = p.open(NodeKind::Identifier);
            p.advance();
            Some(p.close(m))
        }

        TokenKind::At => decorators::decorator(p).or_else(|| {
            // `@` with no registered decorator behind it is not a value.
            p.error_here("expected a value after `@`", "expression")
                .suggestion = Some("decorator paths must be registered, e.g. @env.HOME".into());
            p.recover();
            None
        }),

        TokenKind::LParen => {
            // Grouping has no node of its own; the checkpoint makes a later
            // wrap cover the parentheses too.
            let start = p.checkpoint();
            p.advance(); // (
            expr_bp(p, 0);
            p.expect(TokenKind::RParen, "parenthesized expression");
            Some(start)
        }

        _ => {
            p.error_here("expected an expression", "expression").expected = Some(vec![
                TokenKind::IntLiteral,
                TokenKind::StringLiteral,
                TokenKind::Ident,
                TokenKind::At,
            ]);
            p.recover();
            None
        }
    }
}
