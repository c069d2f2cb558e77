//! Human-readable plan rendering for `--dry-run` and plan emission.

use std::fmt::Write;

use opal_planner::{CommandNode, ExecutionNode, Plan, PlanKind};

/// Render a plan: the header block, the secret display ids, and the
/// execution tree as an indented outline.
pub fn render_plan(plan: &Plan) -> String {
    let mut out = String::new();

    let kind = match plan.header.kind {
        PlanKind::Command => "command",
        PlanKind::Script => "script",
    };
    let target = if plan.target.is_empty() {
        "<script>"
    } else {
        &plan.target
    };

    let _ = writeln!(out, "plan {kind} target={target}");
    let _ = writeln!(out, "plan-hash   {}", plan.header.plan_hash);
    let _ = writeln!(out, "source-hash {}", plan.header.source_hash);
    let _ = writeln!(out, "algorithm   {}", plan.header.algorithm.tag());
    let _ = writeln!(out, "created     {}", plan.header.created_unix);
    for plugin in &plan.header.provenance {
        let _ = writeln!(
            out,
            "plugin      {} {} ({}, verified={})",
            plugin.name, plugin.version, plugin.source, plugin.verified
        );
    }
    if !plan.secrets.is_empty() {
        let _ = writeln!(out, "secrets     {}", plan.secrets.len());
        for secret in &plan.secrets {
            let _ = writeln!(out, "  {}", secret.display);
        }
    }
    let _ = writeln!(out);

    render_node(&plan.root, 0, &mut out);
    out
}

fn indent(out: &mut String, depth: usize) {
    for _ in 0..depth {
        out.push_str("  ");
    }
}

fn render_node(node: &ExecutionNode, depth: usize, out: &mut String) {
    match node {
        ExecutionNode::Command(cmd) => render_command(cmd, depth, out),
        ExecutionNode::Pipeline { commands } => {
            indent(out, depth);
            out.push_str("pipeline:\n");
            for cmd in commands {
                render_command(cmd, depth + 1, out);
            }
        }
        ExecutionNode::Sequence { nodes } => {
            indent(out, depth);
            out.push_str("sequence:\n");
            for node in nodes {
                render_node(node, depth + 1, out);
            }
        }
        ExecutionNode::And { left, right } => {
            indent(out, depth);
            out.push_str("and:\n");
            render_node(left, depth + 1, out);
            render_node(right, depth + 1, out);
        }
        ExecutionNode::Or { left, right } => {
            indent(out, depth);
            out.push_str("or:\n");
            render_node(left, depth + 1, out);
            render_node(right, depth + 1, out);
        }
        ExecutionNode::Redirect {
            source,
            target,
            mode,
        } => {
            indent(out, depth);
            let _ = writeln!(out, "redirect {mode}:");
            render_node(source, depth + 1, out);
            indent(out, depth + 1);
            out.push_str("into:\n");
            render_command(target, depth + 2, out);
        }
    }
}

fn render_command(cmd: &CommandNode, depth: usize, out: &mut String) {
    indent(out, depth);
    let _ = write!(out, "{}. @{}", cmd.step, cmd.decorator);
    for (key, value) in &cmd.args {
        let _ = write!(out, " {key}={value}");
    }
    out.push('\n');
    if let Some(block) = &cmd.block {
        render_node(block, depth + 1, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opal_common::Value;
    use opal_planner::{HashAlgorithm, PlanHeader};

    fn shell(command: &str) -> CommandNode {
        CommandNode::new(
            "shell",
            vec![("command".into(), Value::String(command.into()))],
        )
    }

    #[test]
    fn renders_header_and_tree() {
        let mut plan = Plan {
            target: "deploy".into(),
            header: PlanHeader {
                kind: PlanKind::Command,
                plan_hash: String::new(),
                source_hash: String::new(),
                algorithm: HashAlgorithm::Sha256,
                created_unix: 0,
                provenance: Vec::new(),
            },
            root: ExecutionNode::And {
                left: Box::new(ExecutionNode::Command(shell("echo a"))),
                right: Box::new(ExecutionNode::Command(shell("echo b"))),
            },
            secrets: Vec::new(),
        };
        plan.canonicalize();

        let rendered = render_plan(&plan);
        assert!(rendered.contains("plan command target=deploy"));
        assert!(rendered.contains("algorithm   sha-256"));
        assert!(rendered.contains("and:"));
        assert!(rendered.contains("1. @shell command=echo a"));
        assert!(rendered.contains("2. @shell command=echo b"));
    }
}
