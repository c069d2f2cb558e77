//! Declaration and statement parsers: functions, parameter lists, variable
//! declarations, assignments, conditionals, and blocks.

use opal_common::token::TokenKind;

use crate::event::NodeKind;
use crate::token_set::TokenSet;

use super::{expressions, statement, Parser};

/// Tokens that may begin a parameter.
const PARAM_FIRST: TokenSet = TokenSet::of(&[TokenKind::Ident]);

/// Recovery inside a parameter list.
const PARAM_RECOVERY: TokenSet = TokenSet::of(&[TokenKind::RParen, TokenKind::Comma]);

/// Parse a function declaration: `fun name(params) [: type] { body }`.
pub(crate) fn function(p: &mut Parser) {
    p.trace_rule("function");
    let m = p.open(NodeKind::Function);
    p.advance(); // fun

    if p.at(TokenKind::Ident) {
        let name = p.open(NodeKind::Identifier);
        p.advance();
        p.close(name);
    } else {
        p.error_here("expected function name", "function declaration")
            .expected = Some(vec![TokenKind::Ident]);
        p.recover();
    }

    if p.at(TokenKind::LParen) {
        param_list(p);
    }

    if p.at(TokenKind::Colon) {
        type_annotation(p);
    }

    if p.at(TokenKind::LBrace) {
        block(p);
    } else {
        p.error_here("expected `{` to open the function body", "function declaration")
            .expected = Some(vec![TokenKind::LBrace]);
        p.recover();
    }

    p.close(m);
}

/// Parse `(a, b: string, c = 1)`.
fn param_list(p: &mut Parser) {
    p.trace_rule("param_list");
    let m = p.open(NodeKind::ParamList);
    p.advance(); // (
    p.push_recovery(PARAM_RECOVERY);

    loop {
        p.eat_newlines();
        if p.at(TokenKind::RParen) || p.at_eof() {
            break;
        }

        let before = p.cursor();
        if p.at_any(PARAM_FIRST) {
            param(p);
        } else {
            p.error_here("expected parameter name", "parameter list")
                .expected = Some(vec![TokenKind::Ident, TokenKind::RParen]);
            p.recover();
        }

        if !p.eat(TokenKind::Comma) && !p.at(TokenKind::RParen) && !p.at_eof() {
            p.error_here("expected `,` or `)`", "parameter list").expected =
                Some(vec![TokenKind::Comma, TokenKind::RParen]);
            p.recover();
        }
        p.ensure_progress(before, "param_list");
    }

    p.pop_recovery();
    p.expect(TokenKind::RParen, "parameter list");
    p.close(m);
}

/// Parse one parameter: `name [: type] [= default]`.
fn param(p: &mut Parser) {
    let m = p.open(NodeKind::Param);

    let name = p.open(NodeKind::Identifier);
    p.advance();
    p.close(name);

    if p.at(TokenKind::Colon) {
        type_annotation(p);
    }

    if p.at(TokenKind::Eq) {
        let d = p.open(NodeKind::DefaultValue);
        p.advance(); // =
        expressions::expr(p);
        p.close(d);
    }

    p.close(m);
}

/// Parse `: type` where type is a bare identifier (`string`, `int`, ...).
fn type_annotation(p: &mut Parser) {
    let m = p.open(NodeKind::TypeAnnotation);
    p.advance(); // :
    if p.at(TokenKind::Ident) {
        p.advance();
    } else {
        p.error_here("expected type name", "type annotation").expected =
            Some(vec![TokenKind::Ident]);
        p.recover();
    }
    p.close(m);
}

/// Parse `var NAME = expr`.
pub(crate) fn var_decl(p: &mut Parser) {
    p.trace_rule("var_decl");
    let m = p.open(NodeKind::VarDecl);
    p.advance(); // var

    if p.at(TokenKind::Ident) {
        let name = p.open(NodeKind::Identifier);
        p.advance();
        p.close(name);
    } else {
        p.error_here("expected variable name", "variable declaration")
            .expected = Some(vec![TokenKind::Ident]);
        p.recover();
        p.close(m);
        return;
    }

    if p.expect(TokenKind::Eq, "variable declaration") {
        expressions::expr(p);
    }

    p.close(m);
}

/// Parse `NAME op= expr` where op= is one of `=`, `+=`, `-=`, `*=`, `/=`, `%=`.
pub(crate) fn assignment(p: &mut Parser) {
    p.trace_rule("assignment");
    let m = p.open(NodeKind::Assignment);

    let name = p.open(NodeKind::Identifier);
    p.advance(); // NAME
    p.close(name);

    p.advance(); // operator (dispatch already checked it)
    expressions::expr(p);

    p.close(m);
}

/// Parse `if expr { ... } [else (if ... | { ... })]`.
pub(crate) fn if_stmt(p: &mut Parser) {
    p.trace_rule("if_stmt");
    let m = p.open(NodeKind::If);
    p.advance(); // if

    expressions::expr(p);

    if p.at(TokenKind::LBrace) {
        block(p);
    } else {
        p.error_here("expected `{` after the condition", "if statement")
            .expected = Some(vec![TokenKind::LBrace]);
        p.recover();
    }

    if p.at(TokenKind::Else) {
        let e = p.open(NodeKind::Else);
        p.advance(); // else
        if p.at(TokenKind::If) {
            if_stmt(p);
        } else if p.at(TokenKind::LBrace) {
            block(p);
        } else {
            p.error_here("expected `if` or `{` after `else`", "if statement")
                .expected = Some(vec![TokenKind::If, TokenKind::LBrace]);
            p.recover();
        }
        p.close(e);
    }

    p.close(m);
}

/// Recovery inside a block: the closing brace.
const BLOCK_RECOVERY: TokenSet = TokenSet::of(&[TokenKind::RBrace]);

/// Parse `{ statements }`.
pub(crate) fn block(p: &mut Parser) {
    p.trace_rule("block");
    let m = p.open(NodeKind::Block);
    p.advance(); // {
    p.push_recovery(BLOCK_RECOVERY);

    loop {
        p.eat_newlines();
        while p.eat(TokenKind::Semicolon) {
            p.eat_newlines();
        }
        if p.at(TokenKind::RBrace) || p.at_eof() {
            break;
        }

        let before = p.cursor();
        statement(p);
        p.ensure_progress(before, "block");
    }

    p.pop_recovery();
    p.expect(TokenKind::RBrace, "block");
    p.close(m);
}
