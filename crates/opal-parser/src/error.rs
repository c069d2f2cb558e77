//! Parse error types.
//!
//! Errors accumulate while parsing continues; the parser always completes
//! the event stream. Each error carries enough structure for the CLI to
//! render a labeled diagnostic: position, the grammatical context, the
//! expected token set, what was actually found, and an optional suggestion
//! and example.

use std::fmt;

use serde::Serialize;

use opal_common::span::Span;
use opal_common::token::TokenKind;

/// A parse or schema error recorded during parsing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParseError {
    /// Primary source location where the error was detected.
    pub span: Span,
    /// 1-based line of the error position.
    pub line: u32,
    /// 1-based column of the error position.
    pub column: u32,
    /// Human-readable description of what went wrong.
    pub message: String,
    /// Grammatical context, e.g. `"parameter list"` or `"pipe operator"`.
    pub context: String,
    /// Token kinds that would have been accepted here, if known.
    pub expected: Option<Vec<TokenKind>>,
    /// The token kind actually found.
    pub got: TokenKind,
    /// A context-sensitive fix-it hint.
    pub suggestion: Option<String>,
    /// An example of valid input.
    pub example: Option<String>,
}

impl ParseError {
    pub fn new(
        message: impl Into<String>,
        context: impl Into<String>,
        span: Span,
        line: u32,
        column: u32,
        got: TokenKind,
    ) -> Self {
        Self {
            span,
            line,
            column,
            message: message.into(),
            context: context.into(),
            expected: None,
            got,
            suggestion: None,
            example: None,
        }
    }

    pub fn with_expected(mut self, expected: Vec<TokenKind>) -> Self {
        self.expected = Some(expected);
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    pub fn with_example(mut self, example: impl Into<String>) -> Self {
        self.example = Some(example.into());
        self
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}: {} (in {})",
            self.line, self.column, self.message, self.context
        )?;
        if let Some(suggestion) = &self.suggestion {
            write!(f, "; {suggestion}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ParseError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_one_line() {
        let err = ParseError::new(
            "expected `)`",
            "parameter list",
            Span::new(10, 11),
            2,
            5,
            TokenKind::Newline,
        )
        .with_suggestion("close the parameter list");
        assert_eq!(
            err.to_string(),
            "2:5: expected `)` (in parameter list); close the parameter list"
        );
    }

    #[test]
    fn builder_attaches_structure() {
        let err = ParseError::new("boom", "block", Span::new(0, 1), 1, 1, TokenKind::Error)
            .with_expected(vec![TokenKind::LBrace])
            .with_example("{ echo hi }");
        assert_eq!(err.expected, Some(vec![TokenKind::LBrace]));
        assert_eq!(err.example.as_deref(), Some("{ echo hi }"));
    }
}
