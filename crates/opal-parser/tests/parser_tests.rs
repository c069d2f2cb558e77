//! Parser integration tests.
//!
//! These exercise the public `parse` entry point against the builtin
//! decorator registry and assert on the event stream, the accumulated
//! errors, and the §-level invariants: balance, determinism, whitespace
//! invariance, and position validity.

use opal_common::token::TokenKind;
use opal_parser::{parse, EventKind, NodeKind, ParseOptions, ParseTree, TelemetryLevel};
use opal_registry::DecoratorRegistry;

fn parse_src(source: &str) -> ParseTree {
    let registry = DecoratorRegistry::builtin();
    parse(source, &registry, ParseOptions::default())
}

/// All node kinds opened, in stream order.
fn opened_kinds(tree: &ParseTree) -> Vec<NodeKind> {
    tree.events
        .iter()
        .filter(|e| e.kind == EventKind::Open)
        .map(|e| e.node_kind().unwrap())
        .collect()
}

fn count_nodes(tree: &ParseTree, kind: NodeKind) -> usize {
    opened_kinds(tree).iter().filter(|&&k| k == kind).count()
}

// ── Structure ──────────────────────────────────────────────────────────

#[test]
fn empty_source_is_exactly_open_close_source() {
    let tree = parse_src("");
    assert!(tree.ok());
    assert_eq!(tree.events.len(), 2);
    assert_eq!(tree.events[0].node_kind(), Some(NodeKind::Source));
    assert_eq!(tree.events[0].kind, EventKind::Open);
    assert_eq!(tree.events[1].kind, EventKind::Close);
    assert_eq!(tree.events[1].node_kind(), Some(NodeKind::Source));
}

#[test]
fn single_shell_command() {
    let tree = parse_src("echo \"Hello, World!\"");
    assert!(tree.ok(), "errors: {:?}", tree.errors);
    assert_eq!(count_nodes(&tree, NodeKind::ShellCommand), 1);
    assert_eq!(count_nodes(&tree, NodeKind::ShellArg), 2);
    tree.check_balance().unwrap();
}

#[test]
fn adjacency_groups_arguments() {
    let tree = parse_src("cp out.txt backup/out.txt");
    // Three arguments: cp, out.txt, backup/out.txt -- dots and slashes
    // glue to their neighbors.
    assert_eq!(count_nodes(&tree, NodeKind::ShellArg), 3);
}

#[test]
fn operators_stay_flat_between_segments() {
    let tree = parse_src("echo \"A\" && echo \"B\" || echo \"C\" ; echo \"D\"");
    assert!(tree.ok(), "errors: {:?}", tree.errors);
    assert_eq!(count_nodes(&tree, NodeKind::ShellCommand), 4);

    // The operator tokens appear between ShellCommand nodes, not inside.
    let mut depth_at_ops = Vec::new();
    let mut depth = 0;
    for event in &tree.events {
        match event.kind {
            EventKind::Open => depth += 1,
            EventKind::Close => depth -= 1,
            EventKind::Token => {
                let kind = tree.tokens[event.data as usize].kind;
                if matches!(kind, TokenKind::AmpAmp | TokenKind::PipePipe | TokenKind::Semicolon) {
                    depth_at_ops.push(depth);
                }
            }
        }
    }
    // Depth 1 = directly inside Source.
    assert_eq!(depth_at_ops, vec![1, 1, 1]);
}

#[test]
fn function_declaration_shape() {
    let tree = parse_src("fun deploy(env: string, count = 2) {\n  echo start\n}\n");
    assert!(tree.ok(), "errors: {:?}", tree.errors);
    let kinds = opened_kinds(&tree);
    assert_eq!(kinds[0], NodeKind::Source);
    assert_eq!(kinds[1], NodeKind::Function);
    assert!(kinds.contains(&NodeKind::ParamList));
    assert_eq!(count_nodes(&tree, NodeKind::Param), 2);
    assert_eq!(count_nodes(&tree, NodeKind::TypeAnnotation), 1);
    assert_eq!(count_nodes(&tree, NodeKind::DefaultValue), 1);
    assert_eq!(count_nodes(&tree, NodeKind::Block), 1);
}

#[test]
fn var_decl_with_binary_expression() {
    let tree = parse_src("var COUNT = 1 + 2 * 3");
    assert!(tree.ok(), "errors: {:?}", tree.errors);
    // Two nested BinaryExpr nodes: 1 + (2 * 3).
    assert_eq!(count_nodes(&tree, NodeKind::BinaryExpr), 2);
    // The multiplication must nest inside the addition: the first opened
    // BinaryExpr is the outer (addition) one.
    let kinds = opened_kinds(&tree);
    let first_binary = kinds.iter().position(|&k| k == NodeKind::BinaryExpr).unwrap();
    assert_eq!(kinds[first_binary + 1], NodeKind::Literal); // lhs `1`
}

#[test]
fn if_else_chain() {
    let tree = parse_src("if 1 == 1 {\n  echo yes\n} else {\n  echo no\n}\n");
    assert!(tree.ok(), "errors: {:?}", tree.errors);
    assert_eq!(count_nodes(&tree, NodeKind::If), 1);
    assert_eq!(count_nodes(&tree, NodeKind::Else), 1);
    assert_eq!(count_nodes(&tree, NodeKind::Block), 2);
}

// ── Decorators ─────────────────────────────────────────────────────────

#[test]
fn registered_decorator_opens_a_node() {
    let tree = parse_src("var HOME = @env.HOME");
    assert!(tree.ok(), "errors: {:?}", tree.errors);
    assert_eq!(count_nodes(&tree, NodeKind::Decorator), 1);
}

#[test]
fn unregistered_at_is_plain_text() {
    let tree = parse_src("echo admin@example.com");
    assert!(tree.ok(), "errors: {:?}", tree.errors);
    assert_eq!(count_nodes(&tree, NodeKind::Decorator), 0);
    // admin@example.com is one argument (all adjacent).
    assert_eq!(count_nodes(&tree, NodeKind::ShellArg), 2);
}

#[test]
fn retry_out_of_range_is_a_parse_error() {
    let tree = parse_src("@retry(times=200) { echo go }");
    assert_eq!(tree.errors.len(), 1, "errors: {:?}", tree.errors);
    let err = &tree.errors[0];
    assert!(err.message.contains("1..100"), "message: {}", err.message);
    assert_eq!(err.context, "decorator parameters");
    tree.check_balance().unwrap();
}

#[test]
fn unknown_parameter_suggests_valid_names() {
    let tree = parse_src("@retry(attempts=3) { echo go }");
    let err = tree
        .errors
        .iter()
        .find(|e| e.message.contains("no parameter"))
        .expect("unknown-parameter error");
    let suggestion = err.suggestion.as_deref().unwrap();
    assert!(suggestion.contains("times"), "suggestion: {suggestion}");
    assert!(suggestion.contains("delay"), "suggestion: {suggestion}");
}

#[test]
fn type_mismatch_carries_an_example() {
    let tree = parse_src("@timeout(duration=5) { echo go }");
    let err = tree
        .errors
        .iter()
        .find(|e| e.message.contains("expected duration"))
        .expect("type-mismatch error");
    assert_eq!(err.example.as_deref(), Some("duration=30s"));
}

#[test]
fn missing_primary_suggests_dot_syntax() {
    let tree = parse_src("@retry { echo go }");
    let err = tree
        .errors
        .iter()
        .find(|e| e.message.contains("missing the required parameter"))
        .expect("missing-required error");
    assert_eq!(
        err.suggestion.as_deref(),
        Some("bind it with dot-syntax: @retry.VALUE")
    );
}

#[test]
fn value_decorator_with_block_is_an_error() {
    let tree = parse_src("@env.HOME { echo no }");
    let err = tree
        .errors
        .iter()
        .find(|e| e.context == "decorator block")
        .expect("block error");
    assert_eq!(err.message, "@env cannot have a block");
}

#[test]
fn execution_decorator_without_required_block_is_an_error() {
    let tree = parse_src("@retry(times=3)");
    let err = tree
        .errors
        .iter()
        .find(|e| e.context == "decorator block")
        .expect("missing-block error");
    assert_eq!(err.message, "@retry requires a block");
}

#[test]
fn piping_from_non_stdout_decorator_is_an_error() {
    let tree = parse_src("@parallel { echo a } | grep a");
    let err = tree
        .errors
        .iter()
        .find(|e| e.context == "pipe operator")
        .expect("pipe error");
    assert!(err.message.contains("@parallel"), "message: {}", err.message);
}

#[test]
fn redirecting_to_unsupported_decorator_is_an_error() {
    let tree = parse_src("echo a > @retry(times=3) { echo b }");
    let err = tree
        .errors
        .iter()
        .find(|e| e.context == "redirect operator")
        .expect("redirect error");
    assert!(err.message.contains("@retry"), "message: {}", err.message);
    assert!(err.message.contains("`>`"), "message: {}", err.message);
}

// ── String interpolation ───────────────────────────────────────────────

#[test]
fn double_quoted_string_interpolates_registered_refs() {
    let tree = parse_src("echo \"home is @env.HOME today\"");
    assert!(tree.ok(), "errors: {:?}", tree.errors);
    assert_eq!(count_nodes(&tree, NodeKind::InterpolatedString), 1);
    assert_eq!(count_nodes(&tree, NodeKind::StringPart), 2);
    assert_eq!(count_nodes(&tree, NodeKind::Decorator), 1);
}

#[test]
fn single_quoted_string_never_interpolates() {
    let tree = parse_src("echo 'home is @env.HOME today'");
    assert!(tree.ok(), "errors: {:?}", tree.errors);
    assert_eq!(count_nodes(&tree, NodeKind::InterpolatedString), 0);
    assert_eq!(count_nodes(&tree, NodeKind::Decorator), 0);
}

#[test]
fn email_inside_string_does_not_interpolate() {
    let tree = parse_src("echo \"mail admin@example.com\"");
    assert_eq!(count_nodes(&tree, NodeKind::InterpolatedString), 0);
}

// ── Resilience ─────────────────────────────────────────────────────────

#[test]
fn errors_accumulate_and_stream_stays_balanced() {
    let tree = parse_src("fun (broken {\nvar = 3\n@retry(times=200) { echo x }\n");
    assert!(tree.errors.len() >= 2, "errors: {:?}", tree.errors);
    tree.check_balance().unwrap();
}

#[test]
fn junk_input_still_balances() {
    for source in [
        "}}}}",
        "fun fun fun",
        "var var var =",
        "((((",
        "&& || |",
        "@ @ @",
        "\"unterminated",
    ] {
        let tree = parse_src(source);
        tree.check_balance()
            .unwrap_or_else(|e| panic!("{source:?}: {e}"));
    }
}

// ── Invariants ─────────────────────────────────────────────────────────

#[test]
fn parsing_is_deterministic() {
    let source = "var A = @env.HOME\nfun go { echo @var.A && ls | wc -l > out.txt }\n";
    let a = parse_src(source);
    let b = parse_src(source);
    assert_eq!(a.tokens, b.tokens);
    assert_eq!(a.events, b.events);
    assert_eq!(a.errors, b.errors);
}

#[test]
fn whitespace_rewrites_do_not_change_semantics() {
    let compact = "var A = 1 + 2\necho done";
    let spaced = "var  A   =  1  +  2\necho\t\tdone";
    let a = parse_src(compact);
    let b = parse_src(spaced);

    // Same events (kinds and structure; token indices match because the
    // token streams are parallel).
    assert_eq!(a.events, b.events);
    let a_kinds: Vec<_> = a.tokens.iter().map(|t| t.kind).collect();
    let b_kinds: Vec<_> = b.tokens.iter().map(|t| t.kind).collect();
    assert_eq!(a_kinds, b_kinds);
    let a_texts: Vec<_> = (0..a.tokens.len()).map(|i| a.token_text(i)).collect();
    let b_texts: Vec<_> = (0..b.tokens.len()).map(|i| b.token_text(i)).collect();
    assert_eq!(a_texts, b_texts);
}

#[test]
fn token_positions_are_valid() {
    let source = "fun go {\n  echo hi\n}\n";
    let tree = parse_src(source);
    let mut prev = 0;
    for token in &tree.tokens {
        assert!(token.span.start <= token.span.end);
        assert!((token.span.end as usize) <= source.len());
        assert!(token.span.start >= prev);
        assert!(token.line >= 1);
        assert!(token.column >= 1);
        prev = token.span.start;
    }
}

#[test]
fn telemetry_counts_when_enabled() {
    let registry = DecoratorRegistry::builtin();
    let tree = parse(
        "echo hi",
        &registry,
        ParseOptions {
            telemetry: TelemetryLevel::Counts,
            ..Default::default()
        },
    );
    let telemetry = tree.telemetry.expect("telemetry requested");
    assert!(telemetry.events > 0);
    assert!(telemetry.tokens_consumed > 0);
    assert_eq!(telemetry.errors, 0);
    assert!(telemetry.elapsed.is_none());

    let timed = parse(
        "echo hi",
        &registry,
        ParseOptions {
            telemetry: TelemetryLevel::CountsAndTiming,
            ..Default::default()
        },
    );
    assert!(timed.telemetry.unwrap().elapsed.is_some());
}

#[test]
fn telemetry_does_not_change_the_stream() {
    let registry = DecoratorRegistry::builtin();
    let plain = parse("echo hi && ls", &registry, ParseOptions::default());
    let counted = parse(
        "echo hi && ls",
        &registry,
        ParseOptions {
            telemetry: TelemetryLevel::CountsAndTiming,
            trace: opal_parser::TraceLevel::Events,
        },
    );
    assert_eq!(plain.events, counted.events);
    assert_eq!(plain.tokens, counted.tokens);
}
