//! The parser's output vocabulary.
//!
//! The parser does not build a tree. It emits a flat stream of [`Event`]s:
//! `Open`/`Close` pairs delimit syntactic nodes, `Token` references a token
//! by index. Consumers that need a tree build one lazily; the planner walks
//! the stream directly.
//!
//! Stream invariants (checked by [`crate::ParseTree::check_balance`]):
//!
//! - `Open`/`Close` events are balanced by a stack: depth never goes
//!   negative and is zero at the end.
//! - A `Close` carries the same [`NodeKind`] as its paired `Open`.
//! - Token indices are monotonically non-decreasing.

use serde::Serialize;

/// Discriminant of an [`Event`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EventKind {
    Open,
    Close,
    Token,
}

/// Kinds of syntactic nodes delimited by `Open`/`Close` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[repr(u32)]
pub enum NodeKind {
    /// Root node covering the whole file.
    Source = 0,
    /// `fun name(params) { ... }`
    Function,
    /// `(a, b: string, c = 1)`
    ParamList,
    /// Single parameter in a parameter list.
    Param,
    /// `: type` on a parameter or function.
    TypeAnnotation,
    /// `= expr` default on a parameter.
    DefaultValue,
    /// `{ ... }`
    Block,
    /// `var NAME = expr`
    VarDecl,
    /// `NAME += expr` and friends.
    Assignment,
    /// Literal expression (int, float, bool, duration, string).
    Literal,
    /// Identifier used as an expression or name.
    Identifier,
    /// `a + b`, `a == b`, ...
    BinaryExpr,
    /// One shell command segment (between operators/boundaries).
    ShellCommand,
    /// One shell argument (maximal run of adjacent tokens).
    ShellArg,
    /// `@name.primary(k=v)` at any position.
    Decorator,
    /// Double-quoted string containing decorator references.
    InterpolatedString,
    /// Literal range inside an interpolated string.
    StringPart,
    /// `if expr { ... }`
    If,
    /// `else { ... }` or `else if ...`
    Else,
}

impl NodeKind {
    /// Decode from the 32-bit event payload.
    pub fn from_u32(raw: u32) -> Option<NodeKind> {
        use NodeKind::*;
        Some(match raw {
            0 => Source,
            1 => Function,
            2 => ParamList,
            3 => Param,
            4 => TypeAnnotation,
            5 => DefaultValue,
            6 => Block,
            7 => VarDecl,
            8 => Assignment,
            9 => Literal,
            10 => Identifier,
            11 => BinaryExpr,
            12 => ShellCommand,
            13 => ShellArg,
            14 => Decorator,
            15 => InterpolatedString,
            16 => StringPart,
            17 => If,
            18 => Else,
            _ => return None,
        })
    }
}

/// A single step of the parser's output stream.
///
/// `data` is a [`NodeKind`] discriminant for `Open`/`Close` and a token
/// index for `Token`. Events never borrow from tokens or source; they
/// outlive both as plain integers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Event {
    pub kind: EventKind,
    pub data: u32,
}

impl Event {
    pub fn open(node: NodeKind) -> Event {
        Event {
            kind: EventKind::Open,
            data: node as u32,
        }
    }

    pub fn close(node: NodeKind) -> Event {
        Event {
            kind: EventKind::Close,
            data: node as u32,
        }
    }

    pub fn token(index: usize) -> Event {
        Event {
            kind: EventKind::Token,
            data: index as u32,
        }
    }

    /// The node kind, for `Open`/`Close` events.
    pub fn node_kind(&self) -> Option<NodeKind> {
        match self.kind {
            EventKind::Open | EventKind::Close => NodeKind::from_u32(self.data),
            EventKind::Token => None,
        }
    }

    /// The token index, for `Token` events.
    pub fn token_index(&self) -> Option<usize> {
        match self.kind {
            EventKind::Token => Some(self.data as usize),
            _ => None,
        }
    }
}
