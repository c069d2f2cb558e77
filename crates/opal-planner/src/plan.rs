//! The plan: an immutable execution contract.
//!
//! A [`Plan`] is what the planner hands to the executor (or the serializer,
//! for `--dry-run`). It is canonicalized before it leaves the planner: args
//! sorted by key, step ids assigned in a deterministic pre-order walk, the
//! secret registry deduplicated, and the plan hash computed over the
//! canonical shape. Raw secret bytes never enter the hash input; only their
//! placeholders do.

use serde::Serialize;
use sha2::{Digest, Sha256};

use opal_common::Value;
use opal_registry::RedirectMode;

/// Hash algorithm for plan/source hashes and secret placeholders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum HashAlgorithm {
    #[default]
    Sha256,
    Blake3,
}

impl HashAlgorithm {
    /// The tag rendered into placeholder tokens and the plan header.
    pub fn tag(self) -> &'static str {
        match self {
            HashAlgorithm::Sha256 => "sha-256",
            HashAlgorithm::Blake3 => "blake3",
        }
    }

    /// Lowercase hex digest of `bytes`.
    pub fn hex_digest(self, bytes: &[u8]) -> String {
        match self {
            HashAlgorithm::Sha256 => hex::encode(Sha256::digest(bytes)),
            HashAlgorithm::Blake3 => blake3::hash(bytes).to_hex().to_string(),
        }
    }
}

/// Length of the hash prefix carried in placeholder tokens.
const PLACEHOLDER_HASH_LEN: usize = 6;

/// The placeholder token for a secret value: `<length:algorithm:hash>`.
///
/// `length` is the raw value's character count; the hash prefix is the
/// first [`PLACEHOLDER_HASH_LEN`] lowercase hex characters of the digest.
pub fn placeholder_token(raw: &str, algorithm: HashAlgorithm) -> String {
    let digest = algorithm.hex_digest(raw.as_bytes());
    format!(
        "<{}:{}:{}>",
        raw.chars().count(),
        algorithm.tag(),
        &digest[..PLACEHOLDER_HASH_LEN]
    )
}

/// The placeholder [`Value`] substituted into an argument slot.
pub fn placeholder_value(raw: &str, algorithm: HashAlgorithm) -> Value {
    let digest = algorithm.hex_digest(raw.as_bytes());
    Value::Placeholder {
        length: raw.chars().count(),
        algorithm: algorithm.tag().to_string(),
        hash_prefix: digest[..PLACEHOLDER_HASH_LEN].to_string(),
    }
}

/// One step of the plan: a decorator invocation with sorted arguments and
/// an optional block.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandNode {
    /// Pre-order step id; assigned during canonicalization (root = 1).
    pub step: u32,
    /// Dotted decorator path; plain shell commands use `shell`.
    pub decorator: String,
    /// Arguments, sorted by key.
    pub args: Vec<(String, Value)>,
    /// Block planned under this command (execution decorators).
    pub block: Option<Box<ExecutionNode>>,
}

impl CommandNode {
    pub fn new(decorator: impl Into<String>, args: Vec<(String, Value)>) -> Self {
        Self {
            step: 0,
            decorator: decorator.into(),
            args,
            block: None,
        }
    }

    /// Value of an argument by key.
    pub fn arg(&self, key: &str) -> Option<&Value> {
        self.args
            .iter()
            .find_map(|(k, v)| (k == key).then_some(v))
    }
}

/// The execution tree. Variants follow shell semantics: `Sequence` runs to
/// completion regardless of exit status, `And`/`Or` short-circuit on it,
/// `Pipeline` chains stdout left-to-right.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "node", rename_all = "snake_case")]
pub enum ExecutionNode {
    Command(CommandNode),
    /// Left-to-right stdout chaining; members are always plain commands.
    Pipeline { commands: Vec<CommandNode> },
    /// `;` semantics.
    Sequence { nodes: Vec<ExecutionNode> },
    /// `&&`
    And {
        left: Box<ExecutionNode>,
        right: Box<ExecutionNode>,
    },
    /// `||`
    Or {
        left: Box<ExecutionNode>,
        right: Box<ExecutionNode>,
    },
    /// `>` / `>>`
    Redirect {
        source: Box<ExecutionNode>,
        target: CommandNode,
        mode: RedirectMode,
    },
}

impl ExecutionNode {
    /// All command nodes in pre-order (children in declaration order).
    pub fn commands(&self) -> Vec<&CommandNode> {
        let mut out = Vec::new();
        self.collect_commands(&mut out);
        out
    }

    fn collect_commands<'a>(&'a self, out: &mut Vec<&'a CommandNode>) {
        match self {
            ExecutionNode::Command(cmd) => {
                out.push(cmd);
                if let Some(block) = &cmd.block {
                    block.collect_commands(out);
                }
            }
            ExecutionNode::Pipeline { commands } => {
                for cmd in commands {
                    out.push(cmd);
                    if let Some(block) = &cmd.block {
                        block.collect_commands(out);
                    }
                }
            }
            ExecutionNode::Sequence { nodes } => {
                for node in nodes {
                    node.collect_commands(out);
                }
            }
            ExecutionNode::And { left, right } | ExecutionNode::Or { left, right } => {
                left.collect_commands(out);
                right.collect_commands(out);
            }
            ExecutionNode::Redirect { source, target, .. } => {
                source.collect_commands(out);
                out.push(target);
                if let Some(block) = &target.block {
                    block.collect_commands(out);
                }
            }
        }
    }

    fn for_each_command_mut(&mut self, f: &mut impl FnMut(&mut CommandNode)) {
        match self {
            ExecutionNode::Command(cmd) => {
                f(cmd);
                if let Some(block) = &mut cmd.block {
                    block.for_each_command_mut(f);
                }
            }
            ExecutionNode::Pipeline { commands } => {
                for cmd in commands {
                    f(cmd);
                    if let Some(block) = &mut cmd.block {
                        block.for_each_command_mut(f);
                    }
                }
            }
            ExecutionNode::Sequence { nodes } => {
                for node in nodes {
                    node.for_each_command_mut(f);
                }
            }
            ExecutionNode::And { left, right } | ExecutionNode::Or { left, right } => {
                left.for_each_command_mut(f);
                right.for_each_command_mut(f);
            }
            ExecutionNode::Redirect { source, target, .. } => {
                source.for_each_command_mut(f);
                f(target);
                if let Some(block) = &mut target.block {
                    block.for_each_command_mut(f);
                }
            }
        }
    }
}

/// Whether the plan was built for a named command or for top-level script
/// statements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PlanKind {
    Command,
    Script,
}

/// Provenance of one plug-in that contributed decorators to this plan.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PluginProvenance {
    pub name: String,
    pub version: String,
    pub source: String,
    pub verified: bool,
}

/// Header identifying a plan: what it is, its hash, and the source hash.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanHeader {
    pub kind: PlanKind,
    pub plan_hash: String,
    pub source_hash: String,
    pub algorithm: HashAlgorithm,
    /// Seconds since the Unix epoch at plan construction. Not part of the
    /// plan hash.
    pub created_unix: u64,
    pub provenance: Vec<PluginProvenance>,
}

/// A registered secret: the raw runtime value and its display token.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SecretBinding {
    /// Raw bytes, kept for the executor's scrubber registration. Never
    /// serialized into emitted plans.
    #[serde(skip_serializing)]
    pub value: String,
    /// The placeholder token shown everywhere else.
    pub display: String,
}

/// The immutable execution contract.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Plan {
    /// Target function name; empty in script mode.
    pub target: String,
    pub header: PlanHeader,
    pub root: ExecutionNode,
    pub secrets: Vec<SecretBinding>,
}

impl Plan {
    /// Canonicalize in place: sort args, assign pre-order step ids, dedupe
    /// secrets (earliest display id wins), and recompute the plan hash.
    /// Idempotent.
    pub fn canonicalize(&mut self) {
        let mut next = 1u32;
        self.root.for_each_command_mut(&mut |cmd| {
            cmd.args.sort_by(|a, b| a.0.cmp(&b.0));
            cmd.step = next;
            next += 1;
        });

        let mut seen = Vec::new();
        self.secrets.retain(|binding| {
            if seen.contains(&binding.value) {
                false
            } else {
                seen.push(binding.value.clone());
                true
            }
        });

        self.header.plan_hash = self.compute_hash();
    }

    /// The plan hash: a digest over the target, the canonical tree shape,
    /// argument keys and values (placeholders included, raw secrets
    /// excluded), child order, and the sorted secret display ids.
    pub fn compute_hash(&self) -> String {
        let mut input = String::new();
        input.push_str("target=");
        input.push_str(&self.target);
        input.push('\n');
        hash_node(&self.root, &mut input);

        let mut displays: Vec<&str> = self.secrets.iter().map(|s| s.display.as_str()).collect();
        displays.sort_unstable();
        for display in displays {
            input.push_str("secret=");
            input.push_str(display);
            input.push('\n');
        }

        self.header.algorithm.hex_digest(input.as_bytes())
    }
}

fn hash_node(node: &ExecutionNode, input: &mut String) {
    match node {
        ExecutionNode::Command(cmd) => hash_command(cmd, input),
        ExecutionNode::Pipeline { commands } => {
            input.push_str("pipeline{\n");
            for cmd in commands {
                hash_command(cmd, input);
            }
            input.push_str("}\n");
        }
        ExecutionNode::Sequence { nodes } => {
            input.push_str("sequence{\n");
            for node in nodes {
                hash_node(node, input);
            }
            input.push_str("}\n");
        }
        ExecutionNode::And { left, right } => {
            input.push_str("and{\n");
            hash_node(left, input);
            hash_node(right, input);
            input.push_str("}\n");
        }
        ExecutionNode::Or { left, right } => {
            input.push_str("or{\n");
            hash_node(left, input);
            hash_node(right, input);
            input.push_str("}\n");
        }
        ExecutionNode::Redirect {
            source,
            target,
            mode,
        } => {
            input.push_str(&format!("redirect[{mode}]{{\n"));
            hash_node(source, input);
            hash_command(target, input);
            input.push_str("}\n");
        }
    }
}

fn hash_command(cmd: &CommandNode, input: &mut String) {
    input.push_str("cmd=");
    input.push_str(&cmd.decorator);
    for (key, value) in &cmd.args {
        input.push(' ');
        input.push_str(key);
        input.push('=');
        input.push_str(&value.to_string());
    }
    input.push('\n');
    if let Some(block) = &cmd.block {
        input.push_str("block{\n");
        hash_node(block, input);
        input.push_str("}\n");
    }
}
