//! Shell command lowering.
//!
//! Inside a function body (or at top level in script mode), anything that is
//! not a declaration is a shell command line. A command line is a sequence
//! of `ShellCommand` segments separated by shell operators (`&&`, `||`,
//! `|`, `;`, `>`, `>>`), terminated by a statement boundary (newline, `}`,
//! EOF).
//!
//! Segments stay flat: operators are emitted as plain tokens between the
//! `ShellCommand` nodes, and the planner builds the operator-precedence
//! execution tree from the flat list. Within a segment, adjacency groups
//! tokens into `ShellArg` nodes: `out.txt` is one argument, `out .txt` is
//! two.
//!
//! Pipe and redirect capability checks against decorator schemas happen
//! here, positioned at the operator token.

use opal_common::token::TokenKind;
use opal_registry::RedirectMode;

use crate::event::NodeKind;

use super::{decorators, Parser};

/// What a parsed segment looked like, for operator validation.
struct SegmentInfo {
    /// Set when the segment is exactly one argument consisting of exactly
    /// one decorator invocation.
    sole_decorator: Option<String>,
}

/// Parse a full command line: segments joined by shell operators.
pub(crate) fn command_line(p: &mut Parser) {
    p.trace_rule("command_line");
    let mut pending_redirect: Option<(usize, RedirectMode)> = None;

    loop {
        let segment = shell_command(p);

        // Redirect target validation: `... > @decorator` where the schema
        // excludes the operator.
        if let Some((op_index, mode)) = pending_redirect.take() {
            if let Some(path) = &segment.sole_decorator {
                let supported = p
                    .registry()
                    .schema(path)
                    .is_some_and(|schema| schema.redirects.allows(mode));
                if !supported {
                    p.error_at_token_index(
                        op_index,
                        format!("@{path} does not support `{mode}` redirection"),
                        "redirect operator",
                    );
                }
            }
        }

        let op = p.current();
        if !op.is_shell_operator() {
            break;
        }

        // Pipe source validation: `@decorator | ...` where the schema says
        // the decorator produces no stdout.
        if op == TokenKind::Pipe {
            if let Some(path) = &segment.sole_decorator {
                let produces = p
                    .registry()
                    .schema(path)
                    .is_some_and(|schema| schema.produces_stdout);
                if !produces {
                    let pipe_index = p.cursor();
                    p.error_at_token_index(
                        pipe_index,
                        format!("@{path} does not produce stdout and cannot be piped from"),
                        "pipe operator",
                    );
                }
            }
        }

        let op_index = p.cursor();
        p.advance(); // the operator token

        if p.current().is_command_terminator() {
            // A trailing `;` is ordinary; a dangling `&&`/`|`/redirect is not.
            if op != TokenKind::Semicolon {
                p.error_here(
                    format!("expected a command after {}", op.describe()),
                    "shell command",
                );
            }
            break;
        }

        pending_redirect = match op {
            TokenKind::Gt => Some((op_index, RedirectMode::Overwrite)),
            TokenKind::GtGt => Some((op_index, RedirectMode::Append)),
            _ => None,
        };
    }
}

/// Parse one command segment: a maximal run of arguments up to the next
/// operator or statement boundary.
fn shell_command(p: &mut Parser) -> SegmentInfo {
    p.trace_rule("shell_command");
    let m = p.open(NodeKind::ShellCommand);

    let mut args = 0usize;
    let mut sole_decorator = None;

    loop {
        let kind = p.current();
        if kind.is_shell_operator() || kind.is_command_terminator() {
            break;
        }

        let before = p.cursor();
        let arg = shell_arg(p);
        if args == 0 {
            sole_decorator = arg.decorator_path;
        } else {
            sole_decorator = None;
        }
        args += 1;
        p.ensure_progress(before, "shell_command");
    }

    if args == 0 {
        p.error_here("expected a command", "shell command");
    }

    p.close(m);
    SegmentInfo { sole_decorator }
}

struct ArgInfo {
    /// Set when this argument is exactly one decorator invocation.
    decorator_path: Option<String>,
}

/// Parse one shell argument: the token at the cursor plus every following
/// token glued to it (no space between).
fn shell_arg(p: &mut Parser) -> ArgInfo {
    let m = p.open(NodeKind::ShellArg);

    let mut units = 0usize;
    let mut first_decorator: Option<String> = None;

    loop {
        let kind = p.current();
        if kind.is_shell_operator() || kind.is_command_terminator() {
            break;
        }
        if units > 0 && !p.nth_adjacent(0) {
            break;
        }

        if kind == TokenKind::At && decorators::at_decorator(p) {
            let call = decorators::decorator_call(p).expect("at_decorator confirmed a match");
            if units == 0 {
                first_decorator = Some(call.path);
            }
            units += 1;
            continue;
        }

        if kind == TokenKind::StringLiteral {
            decorators::string_literal(p);
            units += 1;
            continue;
        }

        // Anything else -- including an `@` with no registered decorator
        // behind it -- is ordinary argument text.
        p.advance();
        units += 1;
    }

    p.close(m);
    ArgInfo {
        decorator_path: first_decorator.filter(|_| units == 1),
    }
}
