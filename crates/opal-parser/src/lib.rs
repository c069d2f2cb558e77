//! Opal parser: a resilient event-stream parser for `.opl` files.
//!
//! This crate transforms the token stream from `opal-lexer` into a flat
//! stream of `Open`/`Close`/`Token` events. No syntax tree is allocated:
//! the planner consumes the event array directly, and tools that want a
//! tree can build one lazily from the same events.
//!
//! Parsing never aborts. Errors accumulate in [`ParseTree::errors`] while
//! the parser recovers and keeps the event stream balanced, so a file with
//! ten mistakes reports ten errors in one pass.

pub mod error;
pub mod event;
mod parser;
pub mod telemetry;
pub mod token_set;

pub use error::ParseError;
pub use event::{Event, EventKind, NodeKind};
pub use parser::decorators::{scan_interpolations, StringPiece};
pub use telemetry::{DebugTrace, ParseTelemetry, TelemetryLevel, TraceLevel};

use std::time::Instant;

use opal_common::token::Token;
use opal_lexer::Lexer;
use opal_registry::DecoratorRegistry;

/// Options controlling telemetry and debug tracing. The defaults are all
/// off; the event stream is identical at every setting.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParseOptions {
    pub telemetry: TelemetryLevel,
    pub trace: TraceLevel,
}

/// Result of parsing an Opal source file.
///
/// Owns the source text and tokens; events and errors reference tokens only
/// by index, so they stay valid however the tree is moved around.
pub struct ParseTree {
    pub source: String,
    pub tokens: Vec<Token>,
    pub events: Vec<Event>,
    pub errors: Vec<ParseError>,
    pub telemetry: Option<ParseTelemetry>,
    pub trace: Option<DebugTrace>,
}

impl ParseTree {
    /// Whether parsing completed without errors.
    pub fn ok(&self) -> bool {
        self.errors.is_empty()
    }

    /// Text of the token at an index.
    pub fn token_text(&self, index: usize) -> &str {
        self.tokens[index].text(&self.source)
    }

    /// Verify the event-stream invariants: `Open`/`Close` balanced by a
    /// stack with non-negative depth ending at zero, `Close` kinds matching
    /// their paired `Open`, and token indices monotonically non-decreasing.
    pub fn check_balance(&self) -> Result<(), String> {
        let mut stack: Vec<NodeKind> = Vec::new();
        let mut last_token = 0u32;

        for (i, event) in self.events.iter().enumerate() {
            match event.kind {
                EventKind::Open => {
                    let kind = event
                        .node_kind()
                        .ok_or_else(|| format!("event {i}: Open with unknown kind {}", event.data))?;
                    stack.push(kind);
                }
                EventKind::Close => {
                    let kind = event
                        .node_kind()
                        .ok_or_else(|| format!("event {i}: Close with unknown kind {}", event.data))?;
                    match stack.pop() {
                        Some(open) if open == kind => {}
                        Some(open) => {
                            return Err(format!(
                                "event {i}: Close({kind:?}) does not match Open({open:?})"
                            ))
                        }
                        None => return Err(format!("event {i}: Close({kind:?}) at depth zero")),
                    }
                }
                EventKind::Token => {
                    if event.data < last_token {
                        return Err(format!(
                            "event {i}: token index {} goes backwards (last was {last_token})",
                            event.data
                        ));
                    }
                    if event.data as usize >= self.tokens.len() {
                        return Err(format!("event {i}: token index {} out of range", event.data));
                    }
                    last_token = event.data;
                }
            }
        }

        if !stack.is_empty() {
            return Err(format!("{} nodes left open at end of stream", stack.len()));
        }
        Ok(())
    }

    /// Render the event stream as an indented outline, for tests and
    /// debugging.
    pub fn debug_events(&self) -> String {
        let mut out = String::new();
        let mut depth = 0usize;
        for event in &self.events {
            match event.kind {
                EventKind::Open => {
                    out.push_str(&"  ".repeat(depth));
                    out.push_str(&format!("{:?}\n", event.node_kind().unwrap()));
                    depth += 1;
                }
                EventKind::Close => depth = depth.saturating_sub(1),
                EventKind::Token => {
                    out.push_str(&"  ".repeat(depth));
                    let idx = event.data as usize;
                    out.push_str(&format!(
                        "{:?} {:?}\n",
                        self.tokens[idx].kind,
                        self.token_text(idx)
                    ));
                }
            }
        }
        out
    }
}

/// Parse Opal source into an event stream.
///
/// The registry drives decorator detection (longest dotted match) and all
/// parse-time schema validation. Parsing the same source against the same
/// registry twice yields byte-identical tokens, events, and errors.
pub fn parse(source: &str, registry: &DecoratorRegistry, options: ParseOptions) -> ParseTree {
    let started = Instant::now();
    let tokens = Lexer::tokenize(source);

    let mut p = parser::Parser::new(source, tokens, registry, &options);
    parser::source(&mut p);
    let (tokens, events, errors, mut telemetry, trace) = p.finish();

    let telemetry = match options.telemetry {
        TelemetryLevel::Off => None,
        TelemetryLevel::Counts => Some(telemetry),
        TelemetryLevel::CountsAndTiming => {
            telemetry.elapsed = Some(started.elapsed());
            Some(telemetry)
        }
    };

    ParseTree {
        source: source.to_string(),
        tokens,
        events,
        errors,
        telemetry,
        trace,
    }
}
