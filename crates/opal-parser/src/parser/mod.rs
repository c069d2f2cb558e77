//! Event-based parser for Opal.
//!
//! The parser consumes the lexer's token stream and produces a flat stream
//! of `Open`/`Close`/`Token` events rather than a tree. Parse functions call
//! [`Parser::open`] to start a node, [`Parser::advance`] to consume tokens,
//! and [`Parser::close`] to finish a node. [`Parser::wrap`] retroactively
//! wraps a completed node (used to build left-associative binary
//! expressions).
//!
//! # Resilience
//!
//! Errors never abort parsing. On an unexpected token the parser records one
//! [`ParseError`] and skips forward to a RECOVERY token -- the union of
//! synchronization tokens inherited from the enclosing productions (`}`,
//! `;`, newline, `fun`, EOF) plus whatever the current production pushed.
//! Every opened node is closed, so the event stream is always balanced.
//!
//! # Forward progress
//!
//! A fuel counter bounds lookahead between advances; exhausting it means the
//! parser is stuck, which is a bug, not a recoverable condition -- it panics
//! in development. Loops additionally assert that each iteration consumed
//! input.

pub(crate) mod commands;
pub(crate) mod decorators;
pub(crate) mod expressions;
pub(crate) mod items;

use std::cell::Cell;

use opal_common::token::{Token, TokenKind};
use opal_registry::DecoratorRegistry;

use crate::error::ParseError;
use crate::event::{Event, NodeKind};
use crate::telemetry::{DebugTrace, ParseTelemetry, TelemetryLevel, TraceLevel};
use crate::token_set::TokenSet;
use crate::ParseOptions;

/// Fuel budget between cursor advances. Exhausting it means a loop is not
/// consuming input.
const FUEL: u32 = 256;

/// Synchronization tokens shared by every production.
pub(crate) const BASE_RECOVERY: TokenSet = TokenSet::of(&[
    TokenKind::RBrace,
    TokenKind::Semicolon,
    TokenKind::Newline,
    TokenKind::Fun,
    TokenKind::Eof,
]);

/// An opened but not yet closed node.
#[derive(Debug, Clone, Copy)]
pub(crate) struct MarkOpened {
    index: usize,
    kind: NodeKind,
}

/// A completed node, usable with [`Parser::wrap`].
#[derive(Debug, Clone, Copy)]
pub(crate) struct MarkClosed {
    start: usize,
}

pub(crate) struct Parser<'reg, 'src> {
    source: &'src str,
    tokens: Vec<Token>,
    registry: &'reg DecoratorRegistry,
    pos: usize,
    fuel: Cell<u32>,
    events: Vec<Event>,
    errors: Vec<ParseError>,
    /// Currently-open node count; zero again when parsing finishes.
    depth: u32,
    /// Recovery sets pushed by enclosing productions.
    recovery: Vec<TokenSet>,
    telemetry_level: TelemetryLevel,
    telemetry: ParseTelemetry,
    trace_level: TraceLevel,
    trace: Vec<String>,
}

impl<'reg, 'src> Parser<'reg, 'src> {
    pub(crate) fn new(
        source: &'src str,
        tokens: Vec<Token>,
        registry: &'reg DecoratorRegistry,
        options: &ParseOptions,
    ) -> Self {
        Self {
            source,
            tokens,
            registry,
            pos: 0,
            fuel: Cell::new(FUEL),
            events: Vec::new(),
            errors: Vec::new(),
            depth: 0,
            recovery: Vec::new(),
            telemetry_level: options.telemetry,
            telemetry: ParseTelemetry::default(),
            trace_level: options.trace,
            trace: Vec::new(),
        }
    }

    pub(crate) fn registry(&self) -> &'reg DecoratorRegistry {
        self.registry
    }

    // ── Lookahead ──────────────────────────────────────────────────────

    /// Kind of the current token. Consumes fuel; a parser that looks at the
    /// same position 256 times without advancing is stuck.
    pub(crate) fn current(&self) -> TokenKind {
        self.nth(0)
    }

    /// Kind of the token `n` positions ahead.
    pub(crate) fn nth(&self, n: usize) -> TokenKind {
        let fuel = self.fuel.get();
        if fuel == 0 {
            panic!(
                "parser is stuck at token {} ({:?}) with input remaining",
                self.pos,
                self.tokens.get(self.pos).map(|t| t.kind)
            );
        }
        self.fuel.set(fuel - 1);
        self.tokens
            .get(self.pos + n)
            .map(|t| t.kind)
            .unwrap_or(TokenKind::Eof)
    }

    /// Text of the token at an absolute index.
    pub(crate) fn text_at(&self, index: usize) -> &'src str {
        let span = self.tokens[index].span;
        &self.source[span.start as usize..span.end as usize]
    }

    /// Text of the current token.
    pub(crate) fn current_text(&self) -> &'src str {
        self.text_at(self.pos.min(self.tokens.len() - 1))
    }

    /// Absolute index of the current token.
    pub(crate) fn cursor(&self) -> usize {
        self.pos
    }

    pub(crate) fn at(&self, kind: TokenKind) -> bool {
        self.current() == kind
    }

    pub(crate) fn at_any(&self, set: TokenSet) -> bool {
        set.includes(self.current())
    }

    pub(crate) fn at_eof(&self) -> bool {
        self.at(TokenKind::Eof)
    }

    /// Whether the token `n` ahead is glued to its predecessor (no space).
    pub(crate) fn nth_adjacent(&self, n: usize) -> bool {
        self.tokens
            .get(self.pos + n)
            .is_some_and(|t| !t.has_space_before)
    }

    // ── Events ─────────────────────────────────────────────────────────

    fn push_event(&mut self, event: Event) {
        if self.trace_level == TraceLevel::Events {
            self.trace.push(format!("{:?} data={}", event.kind, event.data));
        }
        if self.telemetry_level != TelemetryLevel::Off {
            self.telemetry.events += 1;
        }
        self.events.push(event);
    }

    /// Start a node.
    pub(crate) fn open(&mut self, kind: NodeKind) -> MarkOpened {
        let mark = MarkOpened {
            index: self.events.len(),
            kind,
        };
        if self.telemetry_level != TelemetryLevel::Off {
            self.telemetry.nodes += 1;
        }
        self.depth += 1;
        self.push_event(Event::open(kind));
        mark
    }

    /// Finish a node. The Close event carries the same kind as the Open.
    pub(crate) fn close(&mut self, mark: MarkOpened) -> MarkClosed {
        self.depth -= 1;
        self.push_event(Event::close(mark.kind));
        MarkClosed { start: mark.index }
    }

    /// A mark at the current event position, before any node is opened.
    /// Wrapping it makes everything emitted afterwards the wrapper's
    /// children -- used for parenthesized groups, which have no node.
    pub(crate) fn checkpoint(&self) -> MarkClosed {
        MarkClosed {
            start: self.events.len(),
        }
    }

    /// Wrap a completed node in a new node of the given kind.
    ///
    /// Inserts an Open event before the completed node's events and appends
    /// the matching Close, so everything emitted since -- including the
    /// completed node -- becomes children of the wrapper. Used for binary
    /// expressions, where the left operand is parsed before the operator is
    /// seen.
    pub(crate) fn wrap(&mut self, completed: MarkClosed, kind: NodeKind) -> MarkClosed {
        if self.telemetry_level != TelemetryLevel::Off {
            self.telemetry.nodes += 1;
            self.telemetry.events += 2;
        }
        self.events.insert(completed.start, Event::open(kind));
        self.events.push(Event::close(kind));
        MarkClosed {
            start: completed.start,
        }
    }

    /// Consume the current token, emitting a Token event. No-op at EOF: the
    /// Eof token never appears in the event stream (an empty source is
    /// exactly `Open(Source), Close(Source)`).
    pub(crate) fn advance(&mut self) {
        if self.pos >= self.tokens.len() || self.tokens[self.pos].kind == TokenKind::Eof {
            return;
        }
        self.fuel.set(FUEL);
        if self.telemetry_level != TelemetryLevel::Off {
            self.telemetry.tokens_consumed += 1;
        }
        self.push_event(Event::token(self.pos));
        self.pos += 1;
    }

    /// Emit a Token event for the current token without advancing.
    ///
    /// String interpolation emits several part nodes that all reference the
    /// same string token; equal indices keep the token-index monotonicity
    /// invariant intact.
    pub(crate) fn emit_current_token(&mut self) {
        if self.pos < self.tokens.len() && self.tokens[self.pos].kind != TokenKind::Eof {
            self.push_event(Event::token(self.pos));
        }
    }

    /// Advance the cursor past a token whose events were already emitted
    /// via [`Parser::emit_current_token`].
    pub(crate) fn skip_emitted(&mut self) {
        if self.pos >= self.tokens.len() || self.tokens[self.pos].kind == TokenKind::Eof {
            return;
        }
        self.fuel.set(FUEL);
        if self.telemetry_level != TelemetryLevel::Off {
            self.telemetry.tokens_consumed += 1;
        }
        self.pos += 1;
    }

    /// If the current token matches, consume it and return true.
    pub(crate) fn eat(&mut self, kind: TokenKind) -> bool {
        if self.at(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    /// Consume the current token if it matches; otherwise record an error
    /// and recover. Returns whether the token was consumed.
    pub(crate) fn expect(&mut self, kind: TokenKind, context: &str) -> bool {
        if self.eat(kind) {
            return true;
        }
        let message = format!("expected {}", kind.describe());
        self.error_here(message, context).expected = Some(vec![kind]);
        self.recover();
        // The recovery skip may have landed exactly on the wanted token.
        self.eat(kind)
    }

    /// Consume any run of newline tokens.
    pub(crate) fn eat_newlines(&mut self) {
        while self.at(TokenKind::Newline) {
            self.advance();
        }
    }

    // ── Error reporting and recovery ───────────────────────────────────

    /// Record an error at the current token and return a mutable reference
    /// for attaching expected/suggestion/example.
    pub(crate) fn error_here(
        &mut self,
        message: impl Into<String>,
        context: impl Into<String>,
    ) -> &mut ParseError {
        let index = self.pos.min(self.tokens.len() - 1);
        self.error_at_token_index(index, message, context)
    }

    /// Record an error positioned at an arbitrary token index.
    pub(crate) fn error_at_token_index(
        &mut self,
        index: usize,
        message: impl Into<String>,
        context: impl Into<String>,
    ) -> &mut ParseError {
        let token = &self.tokens[index.min(self.tokens.len() - 1)];
        let error = ParseError::new(
            message,
            context,
            token.span,
            token.line,
            token.column,
            token.kind,
        );
        if self.telemetry_level != TelemetryLevel::Off {
            self.telemetry.errors += 1;
        }
        self.errors.push(error);
        self.errors.last_mut().expect("error was just pushed")
    }

    /// Skip tokens until one in the active recovery set is reached.
    ///
    /// Skipped tokens are still emitted as Token events inside the current
    /// node, so the stream stays complete and balanced.
    pub(crate) fn recover(&mut self) {
        let set = self.recovery_set();
        while !self.at_eof() && !set.includes(self.current()) {
            self.advance();
        }
    }

    /// The union of all inherited recovery sets plus the base set.
    pub(crate) fn recovery_set(&self) -> TokenSet {
        self.recovery
            .iter()
            .fold(BASE_RECOVERY, |acc, set| acc.union(*set))
    }

    /// Push a recovery set for the duration of an enclosing production.
    pub(crate) fn push_recovery(&mut self, set: TokenSet) {
        self.recovery.push(set);
    }

    pub(crate) fn pop_recovery(&mut self) {
        self.recovery.pop();
    }

    /// Assert that a loop iteration consumed input. In release builds the
    /// parser forces progress instead of spinning.
    pub(crate) fn ensure_progress(&mut self, before: usize, rule: &'static str) {
        if self.pos == before && !self.at_eof() {
            debug_assert!(false, "parser failed to advance in {rule} at token {before}");
            self.advance();
        }
    }

    /// Record a grammar-rule entry in the debug trace.
    pub(crate) fn trace_rule(&mut self, rule: &'static str) {
        if self.trace_level == TraceLevel::CallPaths {
            self.trace.push(format!("{rule} @{}", self.pos));
        }
    }

    // ── Finishing ──────────────────────────────────────────────────────

    /// Consume the parser, returning its accumulated products.
    pub(crate) fn finish(
        self,
    ) -> (
        Vec<Token>,
        Vec<Event>,
        Vec<ParseError>,
        ParseTelemetry,
        Option<DebugTrace>,
    ) {
        debug_assert_eq!(self.depth, 0, "every opened node must be closed");
        let trace = match self.trace_level {
            TraceLevel::Off => None,
            _ => Some(DebugTrace { lines: self.trace }),
        };
        (self.tokens, self.events, self.errors, self.telemetry, trace)
    }
}

// ── Top-level parsing ──────────────────────────────────────────────────

/// Parse a complete source file: the root `Source` node containing function
/// declarations and top-level statements.
pub(crate) fn source(p: &mut Parser) {
    p.trace_rule("source");
    let root = p.open(NodeKind::Source);

    loop {
        p.eat_newlines();
        while p.eat(TokenKind::Semicolon) {
            p.eat_newlines();
        }
        if p.at_eof() {
            break;
        }
        if p.at(TokenKind::RBrace) {
            p.error_here("unexpected `}`", "source");
            p.advance();
            continue;
        }

        let before = p.cursor();
        statement(p);
        p.ensure_progress(before, "source");
    }

    p.close(root);
}

/// Parse one statement: function declaration, variable declaration,
/// assignment, conditional, or shell command line.
pub(crate) fn statement(p: &mut Parser) {
    p.trace_rule("statement");
    match p.current() {
        TokenKind::Fun => items::function(p),
        TokenKind::Var => items::var_decl(p),
        TokenKind::If => items::if_stmt(p),
        TokenKind::Ident
            if matches!(
                p.nth(1),
                TokenKind::Eq
                    | TokenKind::PlusEq
                    | TokenKind::MinusEq
                    | TokenKind::StarEq
                    | TokenKind::SlashEq
                    | TokenKind::PercentEq
            ) =>
        {
            items::assignment(p)
        }
        _ => commands::command_line(p),
    }
}
