//! Operator-precedence lowering of flat command lists.
//!
//! The parser leaves command lines flat: `ShellCommand` segments with the
//! operator tokens between them. This module folds such a list into the
//! execution tree, honoring shell precedence low to high:
//! `;` < `||` < `&&` < `|` = redirect.
//!
//! `||`/`&&` associate left-to-right; placing the *rightmost* occurrence as
//! the outermost node yields that associativity under recursion. Pipes and
//! redirects are then scanned left-to-right, matching shell behavior:
//! adjacent pipes flatten into one `Pipeline`, and a redirect takes the
//! whole already-built subtree on its left as the source.

use opal_registry::RedirectMode;

use crate::plan::{CommandNode, ExecutionNode};

/// A shell chaining operator between two command segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OpKind {
    /// `;`
    Seq,
    /// `||`
    Or,
    /// `&&`
    And,
    /// `|`
    Pipe,
    /// `>`
    RedirectOverwrite,
    /// `>>`
    RedirectAppend,
}

/// One element of a flat command list.
#[derive(Debug)]
pub(crate) enum Item {
    Command(CommandNode),
    Op(OpKind),
}

/// Fold a flat command list into an execution tree.
pub(crate) fn lower(items: Vec<Item>) -> Result<ExecutionNode, String> {
    if items.is_empty() {
        return Err("empty command list".to_string());
    }

    // `;` splits into a Sequence of independent subtrees.
    if items.iter().any(|i| matches!(i, Item::Op(OpKind::Seq))) {
        let mut nodes = Vec::new();
        let mut segment = Vec::new();
        for item in items {
            if matches!(item, Item::Op(OpKind::Seq)) {
                if !segment.is_empty() {
                    nodes.push(lower(std::mem::take(&mut segment))?);
                }
            } else {
                segment.push(item);
            }
        }
        if !segment.is_empty() {
            nodes.push(lower(segment)?);
        }
        return Ok(ExecutionNode::Sequence { nodes });
    }

    // Rightmost `||` becomes the outermost Or.
    if let Some(split) = rightmost(&items, OpKind::Or) {
        let (left, right) = split_at_op(items, split);
        return Ok(ExecutionNode::Or {
            left: Box::new(lower(left)?),
            right: Box::new(lower(right)?),
        });
    }

    // Rightmost `&&` becomes the outermost And.
    if let Some(split) = rightmost(&items, OpKind::And) {
        let (left, right) = split_at_op(items, split);
        return Ok(ExecutionNode::And {
            left: Box::new(lower(left)?),
            right: Box::new(lower(right)?),
        });
    }

    // Pipes and redirects, left to right.
    let mut iter = items.into_iter();
    let mut current = match iter.next() {
        Some(Item::Command(cmd)) => ExecutionNode::Command(cmd),
        _ => return Err("command list must start with a command".to_string()),
    };

    while let Some(item) = iter.next() {
        let Item::Op(op) = item else {
            return Err("two commands without an operator between them".to_string());
        };
        let Some(Item::Command(next)) = iter.next() else {
            return Err("operator without a following command".to_string());
        };

        current = match op {
            OpKind::Pipe => match current {
                ExecutionNode::Command(cmd) => ExecutionNode::Pipeline {
                    commands: vec![cmd, next],
                },
                ExecutionNode::Pipeline { mut commands } => {
                    commands.push(next);
                    ExecutionNode::Pipeline { commands }
                }
                _ => return Err("cannot pipe from a redirect".to_string()),
            },
            OpKind::RedirectOverwrite => ExecutionNode::Redirect {
                source: Box::new(current),
                target: next,
                mode: RedirectMode::Overwrite,
            },
            OpKind::RedirectAppend => ExecutionNode::Redirect {
                source: Box::new(current),
                target: next,
                mode: RedirectMode::Append,
            },
            OpKind::Seq | OpKind::Or | OpKind::And => unreachable!("handled above"),
        };
    }

    Ok(current)
}

fn rightmost(items: &[Item], op: OpKind) -> Option<usize> {
    items
        .iter()
        .rposition(|i| matches!(i, Item::Op(kind) if *kind == op))
}

fn split_at_op(items: Vec<Item>, index: usize) -> (Vec<Item>, Vec<Item>) {
    let mut left = items;
    let right = left.split_off(index + 1);
    left.pop(); // the operator itself
    (left, right)
}

#[cfg(test)]
mod tests {
    use super::*;
    use opal_common::Value;

    fn cmd(text: &str) -> Item {
        Item::Command(CommandNode::new(
            "shell",
            vec![("command".into(), Value::String(text.into()))],
        ))
    }

    fn command_text(node: &ExecutionNode) -> &str {
        match node {
            ExecutionNode::Command(c) => match c.arg("command") {
                Some(Value::String(s)) => s,
                _ => panic!("missing command arg"),
            },
            other => panic!("expected command, got {other:?}"),
        }
    }

    #[test]
    fn single_command() {
        let node = lower(vec![cmd("echo hi")]).unwrap();
        assert_eq!(command_text(&node), "echo hi");
    }

    #[test]
    fn precedence_and_or_sequence() {
        // echo A && echo B || echo C ; echo D
        let node = lower(vec![
            cmd("echo A"),
            Item::Op(OpKind::And),
            cmd("echo B"),
            Item::Op(OpKind::Or),
            cmd("echo C"),
            Item::Op(OpKind::Seq),
            cmd("echo D"),
        ])
        .unwrap();

        let ExecutionNode::Sequence { nodes } = node else {
            panic!("expected Sequence, got {node:?}");
        };
        assert_eq!(nodes.len(), 2);
        assert_eq!(command_text(&nodes[1]), "echo D");

        let ExecutionNode::Or { left, right } = &nodes[0] else {
            panic!("expected Or, got {:?}", nodes[0]);
        };
        assert_eq!(command_text(right), "echo C");

        let ExecutionNode::And { left, right } = left.as_ref() else {
            panic!("expected And");
        };
        assert_eq!(command_text(left), "echo A");
        assert_eq!(command_text(right), "echo B");
    }

    #[test]
    fn or_chain_is_left_associative() {
        // a || b || c => Or(Or(a, b), c)
        let node = lower(vec![
            cmd("a"),
            Item::Op(OpKind::Or),
            cmd("b"),
            Item::Op(OpKind::Or),
            cmd("c"),
        ])
        .unwrap();
        let ExecutionNode::Or { left, right } = node else {
            panic!("expected Or");
        };
        assert_eq!(command_text(&right), "c");
        assert!(matches!(*left, ExecutionNode::Or { .. }));
    }

    #[test]
    fn adjacent_pipes_flatten() {
        // a | b | c => one Pipeline of three commands, in order
        let node = lower(vec![
            cmd("a"),
            Item::Op(OpKind::Pipe),
            cmd("b"),
            Item::Op(OpKind::Pipe),
            cmd("c"),
        ])
        .unwrap();
        let ExecutionNode::Pipeline { commands } = node else {
            panic!("expected Pipeline");
        };
        let texts: Vec<_> = commands
            .iter()
            .map(|c| match c.arg("command") {
                Some(Value::String(s)) => s.as_str(),
                _ => "",
            })
            .collect();
        assert_eq!(texts, vec!["a", "b", "c"]);
    }

    #[test]
    fn redirect_takes_left_subtree_as_source() {
        // a | b > f => Redirect(Pipeline[a, b], target=f, mode=overwrite)
        let node = lower(vec![
            cmd("a"),
            Item::Op(OpKind::Pipe),
            cmd("b"),
            Item::Op(OpKind::RedirectOverwrite),
            cmd("f"),
        ])
        .unwrap();
        let ExecutionNode::Redirect {
            source,
            target,
            mode,
        } = node
        else {
            panic!("expected Redirect");
        };
        assert_eq!(mode, RedirectMode::Overwrite);
        assert!(matches!(*source, ExecutionNode::Pipeline { .. }));
        assert_eq!(target.arg("command"), Some(&Value::String("f".into())));
    }

    #[test]
    fn append_redirect_mode() {
        let node = lower(vec![cmd("a"), Item::Op(OpKind::RedirectAppend), cmd("f")]).unwrap();
        assert!(matches!(
            node,
            ExecutionNode::Redirect {
                mode: RedirectMode::Append,
                ..
            }
        ));
    }

    #[test]
    fn piping_from_a_redirect_is_an_error() {
        let err = lower(vec![
            cmd("a"),
            Item::Op(OpKind::RedirectOverwrite),
            cmd("f"),
            Item::Op(OpKind::Pipe),
            cmd("b"),
        ])
        .unwrap_err();
        assert!(err.contains("pipe"), "error: {err}");
    }
}
