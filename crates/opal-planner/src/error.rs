//! Planner error types.
//!
//! Parse and schema errors stop planning before it starts (the planner
//! refuses to build a plan from a tree with errors). Resolution, dispatch,
//! evaluation, and lowering problems accumulate as [`Diagnostic`]s: a
//! failure aborts the affected branch, but the planner keeps reporting
//! independent problems before returning.

use std::fmt;

use opal_parser::ParseError;

/// Structural failure of scope resolution.
#[derive(Debug, Clone, PartialEq)]
pub enum ScopeError {
    /// The name is absent from every reachable scope.
    NotFound { name: String },
    /// The lookup reached a sealed boundary and the name is not imported.
    TransportBoundary {
        name: String,
        parent_session: String,
        current_session: String,
    },
    /// A session-local value was referenced across a sealed boundary.
    CrossSessionLeakage {
        name: String,
        source_session: String,
        target_session: String,
    },
    /// `exit()` was called on the root scope.
    ExitRoot,
}

impl fmt::Display for ScopeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScopeError::NotFound { name } => write!(f, "variable \"{name}\" is not defined"),
            ScopeError::TransportBoundary {
                name,
                parent_session,
                current_session,
            } => write!(
                f,
                "variable \"{name}\" from session \"{parent_session}\" is not visible in \"{current_session}\" (not imported across the transport boundary)"
            ),
            ScopeError::CrossSessionLeakage {
                name,
                source_session,
                target_session,
            } => write!(
                f,
                "variable \"{name}\" was resolved in session \"{source_session}\" and must not leak into \"{target_session}\""
            ),
            ScopeError::ExitRoot => write!(f, "cannot exit the root scope"),
        }
    }
}

impl std::error::Error for ScopeError {}

/// One problem found while planning. Diagnostics accumulate; see the
/// module docs for the abort-the-branch semantics.
#[derive(Debug, Clone, PartialEq)]
pub enum Diagnostic {
    /// Scope resolution failed.
    Resolution(ScopeError),
    /// A decorator's own plan-time execution failed (I/O, auth, service).
    Dispatch { path: String, message: String },
    /// Expression evaluation failed (type mismatch, division by zero).
    Eval { message: String },
    /// The command operators could not be lowered into an execution tree.
    Lowering { message: String },
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::Resolution(err) => write!(f, "{err}"),
            Diagnostic::Dispatch { path, message } => write!(f, "@{path}: {message}"),
            Diagnostic::Eval { message } => write!(f, "{message}"),
            Diagnostic::Lowering { message } => write!(f, "{message}"),
        }
    }
}

/// Why no plan was produced.
#[derive(Debug)]
pub enum PlanError {
    /// The parse tree carries errors; nothing was planned.
    Parse { errors: Vec<ParseError> },
    /// The requested target function does not exist.
    CommandNotFound {
        target: String,
        suggestion: Option<String>,
        available: Vec<String>,
    },
    /// Planning started but failed; all collected diagnostics.
    Failed { diagnostics: Vec<Diagnostic> },
}

impl fmt::Display for PlanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlanError::Parse { errors } => {
                write!(f, "source has {} parse error(s)", errors.len())
            }
            PlanError::CommandNotFound {
                target,
                suggestion,
                available,
            } => {
                write!(f, "command \"{target}\" not found")?;
                if let Some(suggestion) = suggestion {
                    write!(f, "; did you mean \"{suggestion}\"?")?;
                }
                if !available.is_empty() {
                    write!(f, " (available: {})", available.join(", "))?;
                }
                Ok(())
            }
            PlanError::Failed { diagnostics } => {
                write!(f, "planning failed with {} error(s)", diagnostics.len())?;
                for diagnostic in diagnostics {
                    write!(f, "\n  {diagnostic}")?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for PlanError {}
