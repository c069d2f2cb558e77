//! Opal planner: turns a parse-event stream into an immutable execution
//! plan.
//!
//! The planner walks the parser's events for a chosen target, resolves
//! value decorators through the registry, evaluates variable declarations,
//! enforces transport-scope boundaries, lowers command lines into an
//! operator-precedence execution tree, and registers every resolved secret
//! with the plan so the scrubber can be armed before execution.
//!
//! Planning is pure apart from decorator dispatch (which may read the
//! environment or files): given the same source, tokens, and registry, two
//! runs produce equal canonical plans and equal plan hashes.

pub mod error;
pub mod plan;
pub mod scope;

mod cursor;
mod eval;
mod lower;

pub use error::{Diagnostic, PlanError, ScopeError};
pub use plan::{
    placeholder_token, placeholder_value, CommandNode, ExecutionNode, HashAlgorithm, Plan,
    PlanHeader, PlanKind, PluginProvenance, SecretBinding,
};
pub use scope::{Origin, ScopeGraph, Taint, VarEntry};

use std::collections::BTreeMap;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tracing::debug;

use opal_common::literal::{unquote, value_of_literal};
use opal_common::token::TokenKind;
use opal_common::Value;
use opal_parser::{
    scan_interpolations, DebugTrace, NodeKind, ParseTree, StringPiece, TelemetryLevel, TraceLevel,
};
use opal_registry::{DecoratorRegistry, Role, ValueClass, VarSource, VarView};

use cursor::EventCursor;
use eval::{apply_binop, combine, Evaluated};
use lower::{lower, Item, OpKind};
use scope::SESSION_LOCAL;

/// Planner configuration.
#[derive(Debug, Clone, Default)]
pub struct PlanConfig {
    /// Target function name; empty selects script mode.
    pub target: String,
    pub algorithm: HashAlgorithm,
    pub telemetry: TelemetryLevel,
    pub trace: TraceLevel,
}

/// Counters collected while planning.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PlanTelemetry {
    pub commands: usize,
    pub secrets: usize,
    pub scopes_entered: usize,
    pub diagnostics: usize,
    pub elapsed: Option<Duration>,
}

/// A plan plus its optional telemetry and trace artifacts.
pub struct PlanOutcome {
    pub plan: Plan,
    pub telemetry: Option<PlanTelemetry>,
    pub trace: Option<DebugTrace>,
}

/// Build an execution plan from a parse tree.
///
/// Refuses to plan when the tree carries parse errors. Command mode
/// (`config.target` non-empty) plans the named function's body; script mode
/// plans all top-level statements, skipping function declarations.
pub fn plan(
    tree: &ParseTree,
    registry: &DecoratorRegistry,
    config: PlanConfig,
) -> Result<PlanOutcome, PlanError> {
    let started = Instant::now();

    if !tree.errors.is_empty() {
        return Err(PlanError::Parse {
            errors: tree.errors.clone(),
        });
    }

    let functions = collect_functions(tree);
    let script_mode = config.target.is_empty();
    if !script_mode && !functions.iter().any(|f| f == &config.target) {
        let mut available = functions.clone();
        available.sort_unstable();
        let suggestion = best_suggestion(&config.target, &available);
        return Err(PlanError::CommandNotFound {
            target: config.target,
            suggestion,
            available,
        });
    }

    debug!(plan_target = %config.target, script_mode, "planning");

    let mut planner = Planner {
        tree,
        registry,
        scopes: ScopeGraph::new(SESSION_LOCAL),
        secrets: Vec::new(),
        diagnostics: Vec::new(),
        algorithm: config.algorithm,
        telemetry: PlanTelemetry::default(),
        trace_level: config.trace,
        trace: Vec::new(),
    };

    let mut cursor = EventCursor::new(tree);
    let mut roots = Vec::new();
    planner.plan_source(&mut cursor, script_mode, &config.target, &mut roots);

    if !planner.diagnostics.is_empty() {
        return Err(PlanError::Failed {
            diagnostics: planner.diagnostics,
        });
    }

    let root = match roots.len() {
        1 => roots.pop().expect("len checked"),
        _ => ExecutionNode::Sequence { nodes: roots },
    };

    let mut plan = Plan {
        target: config.target.clone(),
        header: PlanHeader {
            kind: if script_mode {
                PlanKind::Script
            } else {
                PlanKind::Command
            },
            plan_hash: String::new(),
            source_hash: config.algorithm.hex_digest(tree.source.as_bytes()),
            algorithm: config.algorithm,
            created_unix: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
            provenance: vec![PluginProvenance {
                name: "builtin".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                source: "builtin://opal".to_string(),
                verified: true,
            }],
        },
        root,
        secrets: planner.secrets,
    };
    plan.canonicalize();

    let telemetry = match config.telemetry {
        TelemetryLevel::Off => None,
        TelemetryLevel::Counts => Some(planner.telemetry),
        TelemetryLevel::CountsAndTiming => {
            planner.telemetry.elapsed = Some(started.elapsed());
            Some(planner.telemetry)
        }
    };
    let trace = match config.trace {
        TraceLevel::Off => None,
        _ => Some(DebugTrace {
            lines: planner.trace,
        }),
    };

    Ok(PlanOutcome {
        plan,
        telemetry,
        trace,
    })
}

/// Names of all top-level functions, in declaration order.
fn collect_functions(tree: &ParseTree) -> Vec<String> {
    let mut names = Vec::new();
    let mut depth = 0u32;
    let mut i = 0;
    while i < tree.events.len() {
        let event = tree.events[i];
        match event.kind {
            opal_parser::EventKind::Open => {
                depth += 1;
                if event.node_kind() == Some(NodeKind::Function) && depth == 2 {
                    if let Some(name) = function_name(tree, i) {
                        names.push(name);
                    }
                }
            }
            opal_parser::EventKind::Close => depth -= 1,
            opal_parser::EventKind::Token => {}
        }
        i += 1;
    }
    names
}

/// The text of the first Identifier inside the Function node opening at
/// `open_index`.
fn function_name(tree: &ParseTree, open_index: usize) -> Option<String> {
    let mut depth = 0u32;
    let mut in_identifier = false;
    for event in &tree.events[open_index..] {
        match event.kind {
            opal_parser::EventKind::Open => {
                depth += 1;
                in_identifier = event.node_kind() == Some(NodeKind::Identifier);
            }
            opal_parser::EventKind::Close => {
                if depth == 0 {
                    break;
                }
                depth -= 1;
                if depth == 0 {
                    break;
                }
                in_identifier = false;
            }
            opal_parser::EventKind::Token if in_identifier => {
                return Some(tree.token_text(event.token_index()?).to_string());
            }
            opal_parser::EventKind::Token => {}
        }
    }
    None
}

/// Closest known command by normalized edit distance, if close enough to
/// be worth suggesting.
fn best_suggestion(target: &str, available: &[String]) -> Option<String> {
    available
        .iter()
        .map(|name| (name, strsim::normalized_levenshtein(target, name)))
        .filter(|(_, score)| *score >= 0.6)
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(name, _)| name.clone())
}

// ── The walk ───────────────────────────────────────────────────────────

/// What a decorator call site amounted to.
enum DecoratorPlan {
    Value(ResolvedValue),
    Exec(CommandNode),
}

/// A resolved value decorator: the raw value for storage, the display text
/// for command rendering (placeholder when secret), and its sensitivity.
struct ResolvedValue {
    raw: Value,
    display: String,
    class: ValueClass,
    taint: Taint,
    origin: Origin,
}

/// Outcome of rendering an interpolated string.
struct Interpolated {
    raw: String,
    display: String,
    class: ValueClass,
    taint: Taint,
    origin: Origin,
}

/// Schema-keyed arguments extracted from a decorator call site.
struct CallSpec {
    path: String,
    args: BTreeMap<String, Value>,
}

struct Planner<'t, 'r> {
    tree: &'t ParseTree,
    registry: &'r DecoratorRegistry,
    scopes: ScopeGraph,
    secrets: Vec<SecretBinding>,
    diagnostics: Vec<Diagnostic>,
    algorithm: HashAlgorithm,
    telemetry: PlanTelemetry,
    trace_level: TraceLevel,
    trace: Vec<String>,
}

impl Planner<'_, '_> {
    fn diag(&mut self, diagnostic: Diagnostic) {
        self.telemetry.diagnostics += 1;
        self.diagnostics.push(diagnostic);
    }

    fn trace_line(&mut self, line: impl FnOnce() -> String) {
        if self.trace_level != TraceLevel::Off {
            self.trace.push(line());
        }
    }

    // ── Top level ──────────────────────────────────────────────────────

    fn plan_source(
        &mut self,
        c: &mut EventCursor,
        script_mode: bool,
        target: &str,
        roots: &mut Vec<ExecutionNode>,
    ) {
        c.expect_open(NodeKind::Source);
        while !c.at_close(NodeKind::Source) {
            if c.at_open(NodeKind::Function) {
                let start = c.pos();
                let name = function_name(self.tree, start).unwrap_or_default();
                if !script_mode && name == target {
                    self.trace_line(|| format!("plan target {name}"));
                    self.plan_function(c, roots);
                } else {
                    c.skip();
                }
                continue;
            }
            self.plan_statement(c, script_mode, roots);
        }
        c.expect_close(NodeKind::Source);
    }

    /// Dispatch one statement. `execute` controls whether command lines
    /// become execution nodes or are skipped (command mode at top level
    /// only binds variables).
    fn plan_statement(
        &mut self,
        c: &mut EventCursor,
        execute: bool,
        out: &mut Vec<ExecutionNode>,
    ) {
        if c.at_open(NodeKind::VarDecl) {
            self.guarded(c, |s, c| s.plan_var_decl(c));
        } else if c.at_open(NodeKind::Assignment) {
            self.guarded(c, |s, c| s.plan_assignment(c));
        } else if c.at_open(NodeKind::If) {
            let start = c.pos();
            if self.plan_if(c, execute, out).is_err() {
                c.set_pos(start);
                c.skip();
            }
        } else if c.at_open(NodeKind::ShellCommand) {
            if execute {
                let start = c.pos();
                match self.plan_command_group(c) {
                    Ok(node) => out.push(node),
                    Err(()) => {
                        c.set_pos(start);
                        self.skip_command_group(c);
                    }
                }
            } else {
                self.skip_command_group(c);
            }
        } else if c.at_open(NodeKind::Function) {
            // Nested function declarations have no plan-time meaning.
            c.skip();
        } else {
            c.skip();
        }
    }

    /// Run a fallible node planner; on failure, reset to the node start
    /// and skip the whole node so the walk stays aligned.
    fn guarded(
        &mut self,
        c: &mut EventCursor,
        f: impl FnOnce(&mut Self, &mut EventCursor) -> Result<(), ()>,
    ) {
        let start = c.pos();
        if f(self, c).is_err() {
            c.set_pos(start);
            c.skip();
        }
    }

    // ── Functions and blocks ───────────────────────────────────────────

    fn plan_function(&mut self, c: &mut EventCursor, out: &mut Vec<ExecutionNode>) {
        c.expect_open(NodeKind::Function);
        let session = self.scopes.current_session().to_string();
        self.enter_scope(session, false);

        while !c.at_close(NodeKind::Function) {
            if c.at_open(NodeKind::Identifier) {
                c.skip(); // function name
            } else if c.at_open(NodeKind::ParamList) {
                self.plan_params(c);
            } else if c.at_open(NodeKind::TypeAnnotation) {
                c.skip(); // return type
            } else if c.at_open(NodeKind::Block) {
                self.plan_block_into(c, out);
            } else {
                c.skip();
            }
        }

        self.exit_scope();
        c.expect_close(NodeKind::Function);
    }

    /// Bind parameter defaults into the function scope. Parameters without
    /// defaults stay unbound; referencing one fails resolution later.
    fn plan_params(&mut self, c: &mut EventCursor) {
        c.expect_open(NodeKind::ParamList);
        while !c.at_close(NodeKind::ParamList) {
            if !c.at_open(NodeKind::Param) {
                c.skip();
                continue;
            }
            c.expect_open(NodeKind::Param);
            let mut name = None;
            while !c.at_close(NodeKind::Param) {
                if c.at_open(NodeKind::Identifier) {
                    let indices = c.node_token_indices();
                    name = indices.first().map(|&i| c.token_text(i).to_string());
                } else if c.at_open(NodeKind::DefaultValue) {
                    c.expect_open(NodeKind::DefaultValue);
                    while c.token_kind() == Some(TokenKind::Eq) {
                        c.bump();
                    }
                    if let (Some(name), Ok(ev)) = (name.clone(), self.eval_expr(c)) {
                        self.scopes
                            .store(name, ev.origin, ev.value, ev.class, ev.taint);
                    }
                    while !c.at_close(NodeKind::DefaultValue) {
                        c.skip();
                    }
                    c.expect_close(NodeKind::DefaultValue);
                } else {
                    c.skip();
                }
            }
            c.expect_close(NodeKind::Param);
        }
        c.expect_close(NodeKind::ParamList);
    }

    fn plan_block_into(&mut self, c: &mut EventCursor, out: &mut Vec<ExecutionNode>) {
        c.expect_open(NodeKind::Block);
        while !c.at_close(NodeKind::Block) {
            self.plan_statement(c, true, out);
        }
        c.expect_close(NodeKind::Block);
    }

    fn enter_scope(&mut self, session: String, transport: bool) {
        self.telemetry.scopes_entered += 1;
        self.trace_line(|| format!("enter scope {session} (transport={transport})"));
        debug!(%session, transport, "enter scope");
        self.scopes.enter(session, transport);
    }

    fn exit_scope(&mut self) {
        self.scopes.exit().expect("planner never exits the root scope");
    }

    // ── Declarations ───────────────────────────────────────────────────

    fn plan_var_decl(&mut self, c: &mut EventCursor) -> Result<(), ()> {
        c.expect_open(NodeKind::VarDecl);

        let name = if c.at_open(NodeKind::Identifier) {
            let indices = c.node_token_indices();
            indices
                .first()
                .map(|&i| c.token_text(i).to_string())
                .unwrap_or_default()
        } else {
            String::new()
        };

        if c.token_kind() == Some(TokenKind::Eq) {
            c.bump();
        }

        let ev = self.eval_expr(c)?;
        while !c.at_close(NodeKind::VarDecl) {
            c.skip();
        }
        c.expect_close(NodeKind::VarDecl);

        self.trace_line(|| format!("var {name} = {} ({:?})", ev.value, ev.class));
        self.scopes.store(name, ev.origin, ev.value, ev.class, ev.taint);
        Ok(())
    }

    fn plan_assignment(&mut self, c: &mut EventCursor) -> Result<(), ()> {
        c.expect_open(NodeKind::Assignment);

        let name = if c.at_open(NodeKind::Identifier) {
            let indices = c.node_token_indices();
            indices
                .first()
                .map(|&i| c.token_text(i).to_string())
                .unwrap_or_default()
        } else {
            String::new()
        };

        let op = c.token_kind().unwrap_or(TokenKind::Eq);
        c.bump();

        let rhs = self.eval_expr(c)?;
        while !c.at_close(NodeKind::Assignment) {
            c.skip();
        }
        c.expect_close(NodeKind::Assignment);

        let new = if op == TokenKind::Eq {
            rhs.clone()
        } else {
            let base = match op {
                TokenKind::PlusEq => TokenKind::Plus,
                TokenKind::MinusEq => TokenKind::Minus,
                TokenKind::StarEq => TokenKind::Star,
                TokenKind::SlashEq => TokenKind::Slash,
                TokenKind::PercentEq => TokenKind::Percent,
                other => {
                    self.diag(Diagnostic::Eval {
                        message: format!("{} is not an assignment operator", other.describe()),
                    });
                    return Err(());
                }
            };
            let current = match self.scopes.resolve(&name) {
                Ok(r) => Evaluated {
                    value: r.entry.value.clone(),
                    class: r.entry.class,
                    taint: r.entry.taint,
                    origin: r.entry.origin.clone(),
                },
                Err(e) => {
                    self.diag(Diagnostic::Resolution(e));
                    return Err(());
                }
            };
            match apply_binop(base, &current.value, &rhs.value) {
                Ok(value) => combine(&current, &rhs, value),
                Err(message) => {
                    self.diag(Diagnostic::Eval { message });
                    return Err(());
                }
            }
        };

        match self.scopes.update_entry(&name, |entry| {
            entry.value = new.value;
            entry.class = entry.class.max(new.class);
            if new.taint != Taint::Agnostic {
                entry.taint = new.taint;
            }
        }) {
            Ok(()) => Ok(()),
            Err(e) => {
                self.diag(Diagnostic::Resolution(e));
                Err(())
            }
        }
    }

    fn plan_if(
        &mut self,
        c: &mut EventCursor,
        execute: bool,
        out: &mut Vec<ExecutionNode>,
    ) -> Result<(), ()> {
        c.expect_open(NodeKind::If);

        let cond = self.eval_expr(c)?;
        let truthy = match cond.value {
            Value::Bool(b) => b,
            other => {
                self.diag(Diagnostic::Eval {
                    message: format!("if condition must be a bool, got {}", other.type_name()),
                });
                return Err(());
            }
        };

        if c.at_open(NodeKind::Block) {
            if truthy {
                let session = self.scopes.current_session().to_string();
                self.enter_scope(session, false);
                let result = self.plan_block_guarded(c, execute, out);
                self.exit_scope();
                result?;
            } else {
                c.skip();
            }
        }

        if c.at_open(NodeKind::Else) {
            c.expect_open(NodeKind::Else);
            if c.at_open(NodeKind::If) {
                if truthy {
                    c.skip();
                } else {
                    self.plan_if(c, execute, out)?;
                }
            } else if c.at_open(NodeKind::Block) {
                if truthy {
                    c.skip();
                } else {
                    let session = self.scopes.current_session().to_string();
                    self.enter_scope(session, false);
                    let result = self.plan_block_guarded(c, execute, out);
                    self.exit_scope();
                    result?;
                }
            }
            while !c.at_close(NodeKind::Else) {
                c.skip();
            }
            c.expect_close(NodeKind::Else);
        }

        while !c.at_close(NodeKind::If) {
            c.skip();
        }
        c.expect_close(NodeKind::If);
        Ok(())
    }

    /// Plan a block with command execution toggled; statements guard
    /// themselves, so this only fails on walk misalignment.
    fn plan_block_guarded(
        &mut self,
        c: &mut EventCursor,
        execute: bool,
        out: &mut Vec<ExecutionNode>,
    ) -> Result<(), ()> {
        c.expect_open(NodeKind::Block);
        while !c.at_close(NodeKind::Block) {
            self.plan_statement(c, execute, out);
        }
        c.expect_close(NodeKind::Block);
        Ok(())
    }

    // ── Commands ───────────────────────────────────────────────────────

    /// Map a token kind to its chaining operator.
    fn op_kind(kind: TokenKind) -> Option<OpKind> {
        Some(match kind {
            TokenKind::Semicolon => OpKind::Seq,
            TokenKind::PipePipe => OpKind::Or,
            TokenKind::AmpAmp => OpKind::And,
            TokenKind::Pipe => OpKind::Pipe,
            TokenKind::Gt => OpKind::RedirectOverwrite,
            TokenKind::GtGt => OpKind::RedirectAppend,
            _ => return None,
        })
    }

    fn plan_command_group(&mut self, c: &mut EventCursor) -> Result<ExecutionNode, ()> {
        let mut items = vec![Item::Command(self.plan_shell_command(c)?)];

        loop {
            let Some(op) = c.token_kind().and_then(Self::op_kind) else {
                break;
            };
            c.bump();
            if !c.at_open(NodeKind::ShellCommand) {
                break;
            }
            items.push(Item::Op(op));
            items.push(Item::Command(self.plan_shell_command(c)?));
        }

        lower(items).map_err(|message| {
            self.diag(Diagnostic::Lowering { message });
        })
    }

    fn skip_command_group(&mut self, c: &mut EventCursor) {
        if c.at_open(NodeKind::ShellCommand) {
            c.skip();
        }
        while c.token_kind().and_then(Self::op_kind).is_some() {
            c.bump();
            if c.at_open(NodeKind::ShellCommand) {
                c.skip();
            } else {
                break;
            }
        }
    }

    fn plan_shell_command(&mut self, c: &mut EventCursor) -> Result<CommandNode, ()> {
        c.expect_open(NodeKind::ShellCommand);

        let mut parts: Vec<String> = Vec::new();
        let mut exec: Option<CommandNode> = None;
        let mut args = 0usize;

        while !c.at_close(NodeKind::ShellCommand) {
            if c.at_open(NodeKind::ShellArg) {
                match self.plan_shell_arg(c) {
                    Ok(ArgPlan::Text(text)) => parts.push(text),
                    Ok(ArgPlan::Exec(cmd)) => exec = Some(cmd),
                    Err(()) => {
                        // Abort the whole command; the caller realigns.
                        return Err(());
                    }
                }
                args += 1;
            } else {
                c.skip();
            }
        }
        c.expect_close(NodeKind::ShellCommand);

        match exec {
            Some(cmd) if args == 1 => Ok(cmd),
            Some(_) => {
                self.diag(Diagnostic::Lowering {
                    message: "an execution decorator must be the whole command".to_string(),
                });
                Err(())
            }
            None => {
                self.telemetry.commands += 1;
                let command = parts.join(" ");
                self.trace_line(|| format!("command: {command}"));
                Ok(CommandNode::new(
                    "shell",
                    vec![("command".to_string(), Value::String(command))],
                ))
            }
        }
    }

    fn plan_shell_arg(&mut self, c: &mut EventCursor) -> Result<ArgPlan, ()> {
        c.expect_open(NodeKind::ShellArg);

        let mut text = String::new();
        let mut exec: Option<CommandNode> = None;
        let mut units = 0usize;

        while !c.at_close(NodeKind::ShellArg) {
            if let Some(event) = c.peek() {
                if event.kind == opal_parser::EventKind::Token {
                    text.push_str(c.token_text(event.token_index().expect("token event")));
                    c.bump();
                    units += 1;
                    continue;
                }
            }
            if c.at_open(NodeKind::Literal) {
                for index in c.node_token_indices() {
                    text.push_str(c.token_text(index));
                }
                units += 1;
            } else if c.at_open(NodeKind::Decorator) {
                match self.plan_decorator(c)? {
                    DecoratorPlan::Value(resolved) => text.push_str(&resolved.display),
                    DecoratorPlan::Exec(cmd) => exec = Some(cmd),
                }
                units += 1;
            } else if c.at_open(NodeKind::InterpolatedString) {
                let rendered = self.plan_interpolated(c)?;
                text.push('"');
                text.push_str(&rendered.display);
                text.push('"');
                units += 1;
            } else {
                c.skip();
            }
        }
        c.expect_close(NodeKind::ShellArg);

        match exec {
            Some(cmd) if units == 1 => Ok(ArgPlan::Exec(cmd)),
            Some(_) => {
                self.diag(Diagnostic::Lowering {
                    message: "an execution decorator cannot be glued to other text".to_string(),
                });
                Err(())
            }
            None => Ok(ArgPlan::Text(text)),
        }
    }

    // ── Decorators ─────────────────────────────────────────────────────

    fn plan_decorator(&mut self, c: &mut EventCursor) -> Result<DecoratorPlan, ()> {
        c.expect_open(NodeKind::Decorator);

        // The call-site tokens come before any block.
        let mut tokens = Vec::new();
        while let Some(event) = c.peek() {
            if event.kind == opal_parser::EventKind::Token {
                tokens.push(event.token_index().expect("token event"));
                c.bump();
            } else {
                break;
            }
        }

        let call = self.parse_call_tokens(&tokens)?;
        let schema = self
            .registry
            .schema(&call.path)
            .expect("parser only emits registered decorators")
            .clone();

        let result = match schema.role {
            Role::Value => {
                let resolved = self.resolve_value_decorator(&call.path, &call.args)?;
                DecoratorPlan::Value(resolved)
            }
            Role::Execution => {
                let block = if c.at_open(NodeKind::Block) {
                    let session = if schema.transport {
                        let primary = schema
                            .primary
                            .as_ref()
                            .and_then(|p| call.args.get(p))
                            .map(|v| v.to_string())
                            .unwrap_or_default();
                        format!("{}:{}", call.path, primary)
                    } else {
                        self.scopes.current_session().to_string()
                    };
                    self.enter_scope(session, schema.transport);
                    let mut nodes = Vec::new();
                    let result = self.plan_block_guarded(c, true, &mut nodes);
                    self.exit_scope();
                    result?;
                    Some(Box::new(match nodes.len() {
                        1 => nodes.pop().expect("len checked"),
                        _ => ExecutionNode::Sequence { nodes },
                    }))
                } else {
                    None
                };

                self.telemetry.commands += 1;
                let mut cmd = CommandNode::new(
                    call.path.clone(),
                    call.args.into_iter().collect(),
                );
                cmd.block = block;
                DecoratorPlan::Exec(cmd)
            }
        };

        while !c.at_close(NodeKind::Decorator) {
            c.skip();
        }
        c.expect_close(NodeKind::Decorator);
        Ok(result)
    }

    /// Re-derive the call's path and schema-keyed args from its tokens:
    /// `@ name(.name)* (. primary)? ( '(' k=v (, k=v)* ')' )?`.
    fn parse_call_tokens(&self, tokens: &[usize]) -> Result<CallSpec, ()> {
        let kind = |i: usize| self.tree.tokens[tokens[i]].kind;
        let text = |i: usize| self.tree.token_text(tokens[i]);

        debug_assert!(!tokens.is_empty() && kind(0) == TokenKind::At);

        // Dotted name run.
        let mut run = vec![text(1).to_string()];
        let mut i = 2;
        while i + 1 < tokens.len() && kind(i) == TokenKind::Dot && kind(i + 1) == TokenKind::Ident {
            run.push(text(i + 1).to_string());
            i += 2;
        }
        let candidate = run.join(".");
        let path = self
            .registry
            .longest_match(&candidate)
            .expect("parser only emits registered decorators")
            .to_string();
        let matched_segments = path.split('.').count();

        let schema = self
            .registry
            .schema(&path)
            .expect("schema exists for matched path")
            .clone();
        let mut args: BTreeMap<String, Value> = BTreeMap::new();

        // Primary binding: an extra name segment, or a dot plus literal.
        let mut primary_value = None;
        if matched_segments < run.len() {
            primary_value = Some(Value::String(run[matched_segments].clone()));
        } else if i < tokens.len() && kind(i) == TokenKind::Dot {
            i += 1;
            if i < tokens.len() {
                primary_value = match kind(i) {
                    TokenKind::Ident => Some(Value::String(text(i).to_string())),
                    other => value_of_literal(other, text(i)),
                };
                i += 1;
            }
        }
        if let (Some(value), Some(primary)) = (primary_value, schema.primary.as_ref()) {
            args.insert(primary.clone(), value);
        }

        // Parenthesized parameters.
        if i < tokens.len() && kind(i) == TokenKind::LParen {
            i += 1;
            while i < tokens.len() && kind(i) != TokenKind::RParen {
                if kind(i) == TokenKind::Comma || kind(i) == TokenKind::Newline {
                    i += 1;
                    continue;
                }
                let name = text(i).to_string();
                i += 1;
                if i < tokens.len() && kind(i) == TokenKind::Eq {
                    i += 1;
                }
                if i < tokens.len() {
                    if let Some(value) = value_of_literal(kind(i), text(i)) {
                        args.insert(name, value);
                    }
                    i += 1;
                }
            }
        }

        // Schema defaults for absent optional parameters.
        for (name, param) in &schema.params {
            if !args.contains_key(name) {
                if let Some(default) = &param.default {
                    args.insert(name.clone(), default.clone());
                }
            }
        }

        Ok(CallSpec { path, args })
    }

    /// Resolve a value decorator and, when the result is secret, register
    /// it and produce a placeholder rendering.
    fn resolve_value_decorator(
        &mut self,
        path: &str,
        args: &BTreeMap<String, Value>,
    ) -> Result<ResolvedValue, ()> {
        let schema = self
            .registry
            .schema(path)
            .expect("resolved decorators are registered");
        let default_class = schema.value_class;

        let (raw, secret) = if path == "var" {
            // Variable references resolve through the scope graph so the
            // cross-session rules apply with full diagnostics.
            let name = match args.get("name") {
                Some(Value::String(name)) => name.clone(),
                _ => {
                    self.diag(Diagnostic::Dispatch {
                        path: path.to_string(),
                        message: "missing variable name".to_string(),
                    });
                    return Err(());
                }
            };
            let (value, secret, crossed, source_session) = match self.scopes.resolve(&name) {
                Ok(r) => (
                    r.entry.value.clone(),
                    r.entry.class == ValueClass::Secret,
                    r.crossed_sealed,
                    self.scopes.session_of(r.scope).to_string(),
                ),
                Err(e) => {
                    self.diag(Diagnostic::Resolution(e));
                    return Err(());
                }
            };
            if secret && crossed {
                // Import lets the name resolve, but a secret still never
                // binds into a remote invocation.
                let err = ScopeError::CrossSessionLeakage {
                    name: name.clone(),
                    source_session,
                    target_session: self.scopes.current_session().to_string(),
                };
                self.diag(Diagnostic::Resolution(err));
                return Err(());
            }
            (value, secret)
        } else {
            match self.registry.resolve_value(path, args, &ScopeVars(&self.scopes)) {
                Ok(resolved) => {
                    let secret = resolved.secret || default_class == ValueClass::Secret;
                    (resolved.value, secret)
                }
                Err(e) => {
                    self.diag(Diagnostic::Dispatch {
                        path: e.path,
                        message: e.message,
                    });
                    return Err(());
                }
            }
        };

        if secret {
            let raw_text = raw.to_string();
            let display = placeholder_token(&raw_text, self.algorithm);
            self.register_secret(raw_text, display.clone());
            Ok(ResolvedValue {
                raw,
                display,
                class: ValueClass::Secret,
                taint: Taint::Sealed,
                origin: Origin::Decorator(path.to_string()),
            })
        } else {
            let display = raw.to_string();
            Ok(ResolvedValue {
                raw,
                display,
                class: default_class,
                taint: Taint::LocalOnly,
                origin: Origin::Decorator(path.to_string()),
            })
        }
    }

    fn register_secret(&mut self, value: String, display: String) {
        if self.secrets.iter().any(|s| s.value == value) {
            return;
        }
        let display_val = &display;
        debug!(display = %display_val, "register secret");
        self.trace_line(|| format!("register secret {display}"));
        self.telemetry.secrets += 1;
        self.secrets.push(SecretBinding { value, display });
    }

    // ── Interpolated strings ───────────────────────────────────────────

    fn plan_interpolated(&mut self, c: &mut EventCursor) -> Result<Interpolated, ()> {
        c.expect_open(NodeKind::InterpolatedString);

        // Every part references the same string token.
        let mut token_index = None;
        while !c.at_close(NodeKind::InterpolatedString) {
            if let Some(event) = c.peek() {
                if let Some(index) = event.token_index() {
                    token_index = Some(index);
                }
            }
            c.bump();
        }
        c.expect_close(NodeKind::InterpolatedString);

        let Some(token_index) = token_index else {
            self.diag(Diagnostic::Eval {
                message: "interpolated string has no token".to_string(),
            });
            return Err(());
        };

        let text = self.tree.token_text(token_index);
        let inner = &text[1..text.len() - 1];
        let pieces = scan_interpolations(inner, self.registry);

        let mut raw = String::new();
        let mut display = String::new();
        let mut class = ValueClass::Data;
        let mut taint = Taint::Agnostic;
        let mut origin = Origin::Literal;

        for piece in pieces {
            match piece {
                StringPiece::Literal(range) => {
                    raw.push_str(&unquote(&inner[range.clone()]));
                    display.push_str(&inner[range]);
                }
                StringPiece::Decorator { path, primary, .. } => {
                    let schema = self
                        .registry
                        .schema(&path)
                        .expect("scanner only matches registered paths")
                        .clone();
                    let mut args = BTreeMap::new();
                    if let (Some(value), Some(name)) = (primary, schema.primary.as_ref()) {
                        args.insert(name.clone(), Value::String(value));
                    }
                    for (name, param) in &schema.params {
                        if !args.contains_key(name) {
                            if let Some(default) = &param.default {
                                args.insert(name.clone(), default.clone());
                            }
                        }
                    }
                    let resolved = self.resolve_value_decorator(&path, &args)?;
                    raw.push_str(&resolved.raw.to_string());
                    display.push_str(&resolved.display);
                    class = class.max(resolved.class);
                    taint = match (taint, resolved.taint) {
                        (Taint::Sealed, _) | (_, Taint::Sealed) => Taint::Sealed,
                        _ => Taint::LocalOnly,
                    };
                    origin = resolved.origin;
                }
            }
        }

        Ok(Interpolated {
            raw,
            display,
            class,
            taint,
            origin,
        })
    }

    // ── Expressions ────────────────────────────────────────────────────

    fn eval_expr(&mut self, c: &mut EventCursor) -> Result<Evaluated, ()> {
        // Grouping parentheses carry no node; skip them.
        while matches!(c.token_kind(), Some(TokenKind::LParen | TokenKind::RParen)) {
            c.bump();
        }

        if c.at_open(NodeKind::Literal) {
            let indices = c.node_token_indices();
            let index = *indices.first().ok_or(())?;
            let token = c.token_at(index);
            let value = value_of_literal(token.kind, c.token_text(index)).ok_or(())?;
            return Ok(Evaluated::literal(value));
        }

        if c.at_open(NodeKind::Identifier) {
            let indices = c.node_token_indices();
            let index = *indices.first().ok_or(())?;
            let name = c.token_text(index);
            return match self.scopes.resolve(name) {
                Ok(r) => Ok(Evaluated {
                    value: r.entry.value.clone(),
                    class: r.entry.class,
                    taint: r.entry.taint,
                    origin: r.entry.origin.clone(),
                }),
                Err(e) => {
                    self.diag(Diagnostic::Resolution(e));
                    Err(())
                }
            };
        }

        if c.at_open(NodeKind::Decorator) {
            return match self.plan_decorator(c)? {
                DecoratorPlan::Value(resolved) => Ok(Evaluated {
                    value: resolved.raw,
                    class: resolved.class,
                    taint: resolved.taint,
                    origin: resolved.origin,
                }),
                DecoratorPlan::Exec(_) => {
                    self.diag(Diagnostic::Eval {
                        message: "an execution decorator is not a value".to_string(),
                    });
                    Err(())
                }
            };
        }

        if c.at_open(NodeKind::InterpolatedString) {
            let rendered = self.plan_interpolated(c)?;
            return Ok(Evaluated {
                value: Value::String(rendered.raw),
                class: rendered.class,
                taint: rendered.taint,
                origin: rendered.origin,
            });
        }

        if c.at_open(NodeKind::BinaryExpr) {
            return self.eval_binary(c);
        }

        self.diag(Diagnostic::Eval {
            message: "expected an expression".to_string(),
        });
        Err(())
    }

    fn eval_binary(&mut self, c: &mut EventCursor) -> Result<Evaluated, ()> {
        c.expect_open(NodeKind::BinaryExpr);

        let mut lhs: Option<Evaluated> = None;
        let mut op: Option<TokenKind> = None;

        while !c.at_close(NodeKind::BinaryExpr) {
            if let Some(kind) = c.token_kind() {
                if lhs.is_some() && op.is_none() && is_binary_op(kind) {
                    op = Some(kind);
                }
                c.bump();
                continue;
            }

            let operand = self.eval_expr(c)?;
            match (lhs.take(), op) {
                (None, _) => lhs = Some(operand),
                (Some(left), Some(operator)) => {
                    match apply_binop(operator, &left.value, &operand.value) {
                        Ok(value) => {
                            lhs = Some(combine(&left, &operand, value));
                            op = None;
                        }
                        Err(message) => {
                            self.diag(Diagnostic::Eval { message });
                            return Err(());
                        }
                    }
                }
                (Some(_), None) => {
                    self.diag(Diagnostic::Eval {
                        message: "missing operator between operands".to_string(),
                    });
                    return Err(());
                }
            }
        }
        c.expect_close(NodeKind::BinaryExpr);

        lhs.ok_or(())
    }
}

enum ArgPlan {
    Text(String),
    Exec(CommandNode),
}

fn is_binary_op(kind: TokenKind) -> bool {
    matches!(
        kind,
        TokenKind::PipePipe
            | TokenKind::AmpAmp
            | TokenKind::EqEq
            | TokenKind::NotEq
            | TokenKind::Lt
            | TokenKind::LtEq
            | TokenKind::Gt
            | TokenKind::GtEq
            | TokenKind::Plus
            | TokenKind::Minus
            | TokenKind::Star
            | TokenKind::Slash
            | TokenKind::Percent
    )
}

/// [`VarSource`] view of the scope graph for registry-dispatched
/// decorators that read user variables.
struct ScopeVars<'a>(&'a ScopeGraph);

impl VarSource for ScopeVars<'_> {
    fn get(&self, name: &str) -> Option<VarView> {
        self.0.resolve(name).ok().map(|r| VarView {
            value: r.entry.value.clone(),
            secret: r.entry.class == ValueClass::Secret,
        })
    }
}
