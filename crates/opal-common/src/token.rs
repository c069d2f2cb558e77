use serde::Serialize;

use crate::span::Span;

/// A token produced by the Opal lexer.
///
/// Tokens carry their byte span plus the 1-based line/column of their start,
/// recorded at lex time. `has_space_before` is set when the token was
/// separated from its predecessor by spaces or tabs; the parser uses it to
/// group adjacent tokens into a single shell argument.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
    pub line: u32,
    pub column: u32,
    pub has_space_before: bool,
}

impl Token {
    /// Create a new token.
    pub fn new(kind: TokenKind, span: Span, line: u32, column: u32, has_space_before: bool) -> Self {
        Self {
            kind,
            span,
            line,
            column,
            has_space_before,
        }
    }

    /// The raw text of this token, sliced out of the source it was lexed from.
    pub fn text<'src>(&self, source: &'src str) -> &'src str {
        self.span.slice(source)
    }
}

/// Every kind of token in an `.opl` file.
///
/// This enum is the complete vocabulary for the lexer: keywords, operators,
/// delimiters, literals, identifiers, and the special newline/EOF/error
/// tokens. Shell command text is ordinary tokens -- the parser decides which
/// runs of tokens form commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[repr(u8)]
pub enum TokenKind {
    // ── Keywords (6) ───────────────────────────────────────────────────
    Fun,
    Var,
    If,
    Else,
    True,
    False,

    // ── Operators (23) ─────────────────────────────────────────────────
    /// `=`
    Eq,
    /// `+=`
    PlusEq,
    /// `-=`
    MinusEq,
    /// `*=`
    StarEq,
    /// `/=`
    SlashEq,
    /// `%=`
    PercentEq,
    /// `+`
    Plus,
    /// `-`
    Minus,
    /// `*`
    Star,
    /// `/`
    Slash,
    /// `%`
    Percent,
    /// `==`
    EqEq,
    /// `!=`
    NotEq,
    /// `<`
    Lt,
    /// `<=`
    LtEq,
    /// `>`
    Gt,
    /// `>=`
    GtEq,
    /// `&&`
    AmpAmp,
    /// `||`
    PipePipe,
    /// `|`
    Pipe,
    /// `>>`
    GtGt,
    /// `@`
    At,
    /// `!`
    Bang,

    // ── Delimiters (6) ─────────────────────────────────────────────────
    /// `(`
    LParen,
    /// `)`
    RParen,
    /// `{`
    LBrace,
    /// `}`
    RBrace,
    /// `[`
    LBracket,
    /// `]`
    RBracket,

    // ── Punctuation (5) ────────────────────────────────────────────────
    /// `,`
    Comma,
    /// `.`
    Dot,
    /// `:`
    Colon,
    /// `;`
    Semicolon,
    /// Statement-terminating newline.
    Newline,

    // ── Literals (5) ───────────────────────────────────────────────────
    /// Integer literal, e.g. `42`.
    IntLiteral,
    /// Floating-point literal, e.g. `3.14`.
    FloatLiteral,
    /// Duration literal, e.g. `30s`, `5m`, `250ms`.
    DurationLiteral,
    /// Double-quoted string literal (interpolation candidate).
    StringLiteral,
    /// Single-quoted string literal (never interpolates).
    SingleStringLiteral,

    // ── Identifiers and special (3) ────────────────────────────────────
    /// Identifier or bare shell word, e.g. `echo`, `my-tool`.
    Ident,
    /// End of file. Always the final token.
    Eof,
    /// Invalid/unexpected input. Used for error recovery.
    Error,
}

impl TokenKind {
    /// Total number of variants, used to size token bitsets.
    pub const CARDINALITY: usize = TokenKind::Error as usize + 1;

    /// Human-readable name used in error messages.
    pub fn describe(self) -> &'static str {
        match self {
            TokenKind::Fun => "`fun`",
            TokenKind::Var => "`var`",
            TokenKind::If => "`if`",
            TokenKind::Else => "`else`",
            TokenKind::True => "`true`",
            TokenKind::False => "`false`",
            TokenKind::Eq => "`=`",
            TokenKind::PlusEq => "`+=`",
            TokenKind::MinusEq => "`-=`",
            TokenKind::StarEq => "`*=`",
            TokenKind::SlashEq => "`/=`",
            TokenKind::PercentEq => "`%=`",
            TokenKind::Plus => "`+`",
            TokenKind::Minus => "`-`",
            TokenKind::Star => "`*`",
            TokenKind::Slash => "`/`",
            TokenKind::Percent => "`%`",
            TokenKind::EqEq => "`==`",
            TokenKind::NotEq => "`!=`",
            TokenKind::Lt => "`<`",
            TokenKind::LtEq => "`<=`",
            TokenKind::Gt => "`>`",
            TokenKind::GtEq => "`>=`",
            TokenKind::AmpAmp => "`&&`",
            TokenKind::PipePipe => "`||`",
            TokenKind::Pipe => "`|`",
            TokenKind::GtGt => "`>>`",
            TokenKind::At => "`@`",
            TokenKind::Bang => "`!`",
            TokenKind::LParen => "`(`",
            TokenKind::RParen => "`)`",
            TokenKind::LBrace => "`{`",
            TokenKind::RBrace => "`}`",
            TokenKind::LBracket => "`[`",
            TokenKind::RBracket => "`]`",
            TokenKind::Comma => "`,`",
            TokenKind::Dot => "`.`",
            TokenKind::Colon => "`:`",
            TokenKind::Semicolon => "`;`",
            TokenKind::Newline => "newline",
            TokenKind::IntLiteral => "integer literal",
            TokenKind::FloatLiteral => "float literal",
            TokenKind::DurationLiteral => "duration literal",
            TokenKind::StringLiteral => "string literal",
            TokenKind::SingleStringLiteral => "string literal",
            TokenKind::Ident => "identifier",
            TokenKind::Eof => "end of file",
            TokenKind::Error => "invalid token",
        }
    }

    /// Whether this token terminates a shell command segment.
    pub fn is_command_terminator(self) -> bool {
        matches!(
            self,
            TokenKind::Newline | TokenKind::Semicolon | TokenKind::RBrace | TokenKind::Eof
        )
    }

    /// Whether this token is one of the shell chaining/redirect operators.
    pub fn is_shell_operator(self) -> bool {
        matches!(
            self,
            TokenKind::AmpAmp
                | TokenKind::PipePipe
                | TokenKind::Pipe
                | TokenKind::Semicolon
                | TokenKind::Gt
                | TokenKind::GtGt
        )
    }
}

/// Look up a keyword from its string representation.
///
/// Returns `Some(TokenKind)` if the string is an Opal keyword, `None`
/// otherwise. The lexer calls this to distinguish keywords from identifiers
/// after scanning an identifier-shaped token.
pub fn keyword_from_str(s: &str) -> Option<TokenKind> {
    match s {
        "fun" => Some(TokenKind::Fun),
        "var" => Some(TokenKind::Var),
        "if" => Some(TokenKind::If),
        "else" => Some(TokenKind::Else),
        "true" => Some(TokenKind::True),
        "false" => Some(TokenKind::False),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyword_from_str_recognizes_all_keywords() {
        let keywords = [
            ("fun", TokenKind::Fun),
            ("var", TokenKind::Var),
            ("if", TokenKind::If),
            ("else", TokenKind::Else),
            ("true", TokenKind::True),
            ("false", TokenKind::False),
        ];
        for (s, expected) in &keywords {
            assert_eq!(keyword_from_str(s), Some(*expected));
        }
        assert_eq!(keywords.len(), 6, "must test all 6 keywords");
    }

    #[test]
    fn keyword_from_str_rejects_non_keywords() {
        assert_eq!(keyword_from_str("echo"), None);
        assert_eq!(keyword_from_str(""), None);
        assert_eq!(keyword_from_str("FUN"), None); // case-sensitive
    }

    #[test]
    fn token_text_slices_source() {
        let source = "var NAME = 1";
        let tok = Token::new(TokenKind::Ident, Span::new(4, 8), 1, 5, true);
        assert_eq!(tok.text(source), "NAME");
    }

    #[test]
    fn command_terminators() {
        assert!(TokenKind::Newline.is_command_terminator());
        assert!(TokenKind::Semicolon.is_command_terminator());
        assert!(TokenKind::RBrace.is_command_terminator());
        assert!(TokenKind::Eof.is_command_terminator());
        assert!(!TokenKind::Pipe.is_command_terminator());
    }

    #[test]
    fn shell_operators() {
        for kind in [
            TokenKind::AmpAmp,
            TokenKind::PipePipe,
            TokenKind::Pipe,
            TokenKind::Semicolon,
            TokenKind::Gt,
            TokenKind::GtGt,
        ] {
            assert!(kind.is_shell_operator(), "{kind:?} should be a shell operator");
        }
        assert!(!TokenKind::Ident.is_shell_operator());
    }
}
