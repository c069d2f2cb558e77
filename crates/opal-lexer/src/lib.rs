// Opal lexer -- tokenizer for `.opl` command files.

mod scanner;

use opal_common::span::Span;
use opal_common::token::{keyword_from_str, Token, TokenKind};
use scanner::Scanner;

/// The Opal lexer. Converts source text into a stream of tokens.
///
/// Drives a [`Scanner`] that owns the byte offset and line/column counters,
/// and implements `Iterator<Item = Token>` so callers can consume tokens
/// lazily or collect them into a `Vec`. Every token records whether spaces
/// or tabs separated it from the previous token -- the parser relies on
/// that flag to group adjacent tokens into shell arguments.
pub struct Lexer<'src> {
    scanner: Scanner<'src>,
    /// Whether we have already emitted the `Eof` token.
    emitted_eof: bool,
}

impl<'src> Lexer<'src> {
    /// Create a new lexer for the given source text.
    pub fn new(source: &'src str) -> Self {
        Self {
            scanner: Scanner::new(source),
            emitted_eof: false,
        }
    }

    /// Convenience: tokenize the entire source into a `Vec<Token>`.
    ///
    /// The returned vector always ends with an `Eof` token, even for an
    /// empty source.
    pub fn tokenize(source: &str) -> Vec<Token> {
        Lexer::new(source).collect()
    }

    /// Produce the next token.
    fn produce_token(&mut self) -> Token {
        let had_space = self.skip_whitespace();

        let start = self.scanner.offset();
        let line = self.scanner.line();
        let column = self.scanner.column();

        let token = |kind: TokenKind, lexer: &Lexer| {
            Token::new(
                kind,
                Span::new(start, lexer.scanner.offset()),
                line,
                column,
                had_space,
            )
        };

        let Some(c) = self.scanner.peek() else {
            return Token::new(TokenKind::Eof, Span::point(start), line, column, had_space);
        };

        match c {
            // ── Newlines ───────────────────────────────────────────────
            '\n' => {
                self.scanner.bump();
                token(TokenKind::Newline, self)
            }
            '\r' => {
                self.scanner.bump();
                // \r\n = single Newline
                self.scanner.accept('\n');
                token(TokenKind::Newline, self)
            }

            // ── Single-character delimiters and punctuation ────────────
            '(' => self.single(TokenKind::LParen, start, line, column, had_space),
            ')' => self.single(TokenKind::RParen, start, line, column, had_space),
            '{' => self.single(TokenKind::LBrace, start, line, column, had_space),
            '}' => self.single(TokenKind::RBrace, start, line, column, had_space),
            '[' => self.single(TokenKind::LBracket, start, line, column, had_space),
            ']' => self.single(TokenKind::RBracket, start, line, column, had_space),
            ',' => self.single(TokenKind::Comma, start, line, column, had_space),
            '.' => self.single(TokenKind::Dot, start, line, column, had_space),
            ':' => self.single(TokenKind::Colon, start, line, column, had_space),
            ';' => self.single(TokenKind::Semicolon, start, line, column, had_space),
            '@' => self.single(TokenKind::At, start, line, column, had_space),

            // ── Multi-character operators ──────────────────────────────
            '=' => {
                self.scanner.bump();
                if self.scanner.accept('=') {
                    token(TokenKind::EqEq, self)
                } else {
                    token(TokenKind::Eq, self)
                }
            }
            '!' => {
                self.scanner.bump();
                if self.scanner.accept('=') {
                    token(TokenKind::NotEq, self)
                } else {
                    token(TokenKind::Bang, self)
                }
            }
            '<' => {
                self.scanner.bump();
                if self.scanner.accept('=') {
                    token(TokenKind::LtEq, self)
                } else {
                    token(TokenKind::Lt, self)
                }
            }
            '>' => {
                self.scanner.bump();
                if self.scanner.accept('=') {
                    token(TokenKind::GtEq, self)
                } else if self.scanner.accept('>') {
                    token(TokenKind::GtGt, self)
                } else {
                    token(TokenKind::Gt, self)
                }
            }
            '&' => {
                self.scanner.bump();
                if self.scanner.accept('&') {
                    token(TokenKind::AmpAmp, self)
                } else {
                    // A lone `&` has no meaning in Opal.
                    token(TokenKind::Error, self)
                }
            }
            '|' => {
                self.scanner.bump();
                if self.scanner.accept('|') {
                    token(TokenKind::PipePipe, self)
                } else {
                    token(TokenKind::Pipe, self)
                }
            }
            '+' => self.op_with_eq(TokenKind::Plus, TokenKind::PlusEq, start, line, column, had_space),
            '-' => self.op_with_eq(TokenKind::Minus, TokenKind::MinusEq, start, line, column, had_space),
            '*' => self.op_with_eq(TokenKind::Star, TokenKind::StarEq, start, line, column, had_space),
            '/' => self.op_with_eq(TokenKind::Slash, TokenKind::SlashEq, start, line, column, had_space),
            '%' => self.op_with_eq(TokenKind::Percent, TokenKind::PercentEq, start, line, column, had_space),

            // ── Comments ───────────────────────────────────────────────
            '#' => {
                self.scanner.take_while(|c| c != '\n');
                // Comments vanish entirely; retry from the next character.
                self.produce_token()
            }

            // ── Literals ───────────────────────────────────────────────
            '0'..='9' => self.lex_number(start, line, column, had_space),
            '"' => self.lex_string(start, line, column, had_space, '"', TokenKind::StringLiteral),
            '\'' => self.lex_string(start, line, column, had_space, '\'', TokenKind::SingleStringLiteral),

            // ── Identifiers and keywords ───────────────────────────────
            c if is_ident_start(c) => self.lex_ident(start, line, column, had_space),

            // ── Unknown character (error recovery) ─────────────────────
            _ => {
                self.scanner.bump();
                token(TokenKind::Error, self)
            }
        }
    }

    // ── Helpers ────────────────────────────────────────────────────────

    /// Skip spaces and tabs. Returns whether anything was skipped, which
    /// becomes the next token's `has_space_before`.
    fn skip_whitespace(&mut self) -> bool {
        let before = self.scanner.offset();
        self.scanner.take_while(|c| c == ' ' || c == '\t');
        self.scanner.offset() != before
    }

    fn single(
        &mut self,
        kind: TokenKind,
        start: u32,
        line: u32,
        column: u32,
        had_space: bool,
    ) -> Token {
        self.scanner.bump();
        Token::new(kind, Span::new(start, self.scanner.offset()), line, column, had_space)
    }

    /// Lex `X` or `X=` (e.g. `+` vs `+=`).
    fn op_with_eq(
        &mut self,
        plain: TokenKind,
        with_eq: TokenKind,
        start: u32,
        line: u32,
        column: u32,
        had_space: bool,
    ) -> Token {
        self.scanner.bump();
        let kind = if self.scanner.accept('=') { with_eq } else { plain };
        Token::new(kind, Span::new(start, self.scanner.offset()), line, column, had_space)
    }

    /// Lex an integer, float, or duration literal.
    ///
    /// A run of digits followed by `.digits` is a float. A run of digits
    /// followed immediately by a duration suffix (`ns`, `us`, `ms`, `s`,
    /// `m`, `h`) is a duration as long as the suffix is not the start of a
    /// longer identifier (`30seconds` stays `30` + `seconds`).
    fn lex_number(&mut self, start: u32, line: u32, column: u32, had_space: bool) -> Token {
        self.scanner.take_while(|c| c.is_ascii_digit());

        // Float: digits '.' digits
        if self.scanner.peek() == Some('.')
            && self.scanner.second().is_some_and(|c| c.is_ascii_digit())
        {
            self.scanner.bump(); // .
            self.scanner.take_while(|c| c.is_ascii_digit());
            return Token::new(
                TokenKind::FloatLiteral,
                Span::new(start, self.scanner.offset()),
                line,
                column,
                had_space,
            );
        }

        // Duration suffix
        for suffix in ["ns", "us", "ms", "s", "m", "h"] {
            if self.try_suffix(suffix) {
                return Token::new(
                    TokenKind::DurationLiteral,
                    Span::new(start, self.scanner.offset()),
                    line,
                    column,
                    had_space,
                );
            }
        }

        Token::new(
            TokenKind::IntLiteral,
            Span::new(start, self.scanner.offset()),
            line,
            column,
            had_space,
        )
    }

    /// Consume `suffix` if the remaining input starts with it and it is not
    /// followed by an identifier character. Leaves the scanner untouched
    /// otherwise.
    fn try_suffix(&mut self, suffix: &str) -> bool {
        let Some(after) = self.scanner.rest().strip_prefix(suffix) else {
            return false;
        };
        // The suffix must not continue into an identifier (`30seconds`).
        if after.chars().next().is_some_and(is_ident_continue) {
            return false;
        }
        for _ in suffix.chars() {
            self.scanner.bump();
        }
        true
    }

    /// Lex a quoted string literal. The token span includes the quotes.
    ///
    /// `\` escapes the next character (kept raw in the token text -- unescaping
    /// happens when the value is materialized). An unterminated string becomes
    /// an `Error` token covering the rest of the line.
    fn lex_string(
        &mut self,
        start: u32,
        line: u32,
        column: u32,
        had_space: bool,
        quote: char,
        kind: TokenKind,
    ) -> Token {
        self.scanner.bump(); // opening quote
        loop {
            match self.scanner.peek() {
                None | Some('\n') => {
                    // Unterminated: error token to end of line.
                    return Token::new(
                        TokenKind::Error,
                        Span::new(start, self.scanner.offset()),
                        line,
                        column,
                        had_space,
                    );
                }
                Some('\\') => {
                    self.scanner.bump();
                    self.scanner.bump();
                }
                Some(c) if c == quote => {
                    self.scanner.bump();
                    return Token::new(
                        kind,
                        Span::new(start, self.scanner.offset()),
                        line,
                        column,
                        had_space,
                    );
                }
                Some(_) => {
                    self.scanner.bump();
                }
            }
        }
    }

    /// Lex an identifier, keyword, or bare shell word.
    ///
    /// `-` is allowed mid-word when flanked by alphanumerics (`my-tool`,
    /// `apt-get`); a trailing or doubled `-` ends the word so operators
    /// still lex on their own.
    fn lex_ident(&mut self, start: u32, line: u32, column: u32, had_space: bool) -> Token {
        loop {
            match self.scanner.peek() {
                Some(c) if is_ident_continue(c) => {
                    self.scanner.bump();
                }
                Some('-') if self.scanner.second().is_some_and(|c| c.is_ascii_alphanumeric()) => {
                    self.scanner.bump(); // -
                    self.scanner.bump(); // following alphanumeric
                }
                _ => break,
            }
        }
        let text = self.scanner.text_from(start);
        let kind = keyword_from_str(text).unwrap_or(TokenKind::Ident);
        Token::new(kind, Span::new(start, self.scanner.offset()), line, column, had_space)
    }
}

impl Iterator for Lexer<'_> {
    type Item = Token;

    fn next(&mut self) -> Option<Token> {
        if self.emitted_eof {
            return None;
        }
        let token = self.produce_token();
        if token.kind == TokenKind::Eof {
            self.emitted_eof = true;
        }
        Some(token)
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        Lexer::tokenize(source).into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn empty_source_yields_eof() {
        let tokens = Lexer::tokenize("");
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].kind, TokenKind::Eof);
        assert_eq!(tokens[0].span, Span::point(0));
    }

    #[test]
    fn keywords_and_identifiers() {
        assert_eq!(
            kinds("fun deploy"),
            vec![TokenKind::Fun, TokenKind::Ident, TokenKind::Eof]
        );
        assert_eq!(
            kinds("var X = true"),
            vec![
                TokenKind::Var,
                TokenKind::Ident,
                TokenKind::Eq,
                TokenKind::True,
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn shell_words_keep_inner_dashes() {
        let tokens = Lexer::tokenize("apt-get install my-tool");
        assert_eq!(tokens[0].kind, TokenKind::Ident);
        assert_eq!(tokens[0].text("apt-get install my-tool"), "apt-get");
        assert_eq!(tokens[2].text("apt-get install my-tool"), "my-tool");
    }

    #[test]
    fn lone_dash_is_minus() {
        assert_eq!(
            kinds("a - b"),
            vec![TokenKind::Ident, TokenKind::Minus, TokenKind::Ident, TokenKind::Eof]
        );
    }

    #[test]
    fn flag_lexes_as_minus_then_word() {
        // `-v`: minus followed by adjacent ident; the parser re-joins them
        // into one shell argument via has_space_before.
        let tokens = Lexer::tokenize("echo -v");
        assert_eq!(tokens[1].kind, TokenKind::Minus);
        assert_eq!(tokens[2].kind, TokenKind::Ident);
        assert!(!tokens[2].has_space_before);
    }

    #[test]
    fn operators() {
        assert_eq!(
            kinds("a && b || c | d ; e"),
            vec![
                TokenKind::Ident,
                TokenKind::AmpAmp,
                TokenKind::Ident,
                TokenKind::PipePipe,
                TokenKind::Ident,
                TokenKind::Pipe,
                TokenKind::Ident,
                TokenKind::Semicolon,
                TokenKind::Ident,
                TokenKind::Eof
            ]
        );
        assert_eq!(
            kinds("> >> >= ="),
            vec![
                TokenKind::Gt,
                TokenKind::GtGt,
                TokenKind::GtEq,
                TokenKind::Eq,
                TokenKind::Eof
            ]
        );
        assert_eq!(
            kinds("+= -= *= /= %="),
            vec![
                TokenKind::PlusEq,
                TokenKind::MinusEq,
                TokenKind::StarEq,
                TokenKind::SlashEq,
                TokenKind::PercentEq,
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn number_literals() {
        assert_eq!(kinds("42"), vec![TokenKind::IntLiteral, TokenKind::Eof]);
        assert_eq!(kinds("3.14"), vec![TokenKind::FloatLiteral, TokenKind::Eof]);
    }

    #[test]
    fn duration_literals() {
        for src in ["30s", "5m", "2h", "250ms", "10us", "7ns"] {
            assert_eq!(kinds(src), vec![TokenKind::DurationLiteral, TokenKind::Eof], "{src}");
        }
        // Suffix running into an identifier is not a duration.
        assert_eq!(
            kinds("30seconds"),
            vec![TokenKind::IntLiteral, TokenKind::Ident, TokenKind::Eof]
        );
    }

    #[test]
    fn string_literals() {
        let tokens = Lexer::tokenize(r#""hello" 'world'"#);
        assert_eq!(tokens[0].kind, TokenKind::StringLiteral);
        assert_eq!(tokens[1].kind, TokenKind::SingleStringLiteral);
    }

    #[test]
    fn string_with_escape() {
        let source = r#""say \"hi\"""#;
        let tokens = Lexer::tokenize(source);
        assert_eq!(tokens[0].kind, TokenKind::StringLiteral);
        assert_eq!(tokens[0].text(source), source);
    }

    #[test]
    fn unterminated_string_is_error_token() {
        let tokens = Lexer::tokenize("\"oops\necho");
        assert_eq!(tokens[0].kind, TokenKind::Error);
        assert_eq!(tokens[1].kind, TokenKind::Newline);
        assert_eq!(tokens[2].kind, TokenKind::Ident);
    }

    #[test]
    fn at_is_a_plain_token() {
        assert_eq!(
            kinds("@retry"),
            vec![TokenKind::At, TokenKind::Ident, TokenKind::Eof]
        );
    }

    #[test]
    fn comments_vanish() {
        assert_eq!(
            kinds("echo # trailing comment\nnext"),
            vec![TokenKind::Ident, TokenKind::Newline, TokenKind::Ident, TokenKind::Eof]
        );
    }

    #[test]
    fn has_space_before_tracks_separation() {
        let tokens = Lexer::tokenize("out.txt file");
        // out . txt are adjacent; file is separated.
        assert!(!tokens[0].has_space_before);
        assert!(!tokens[1].has_space_before); // .
        assert!(!tokens[2].has_space_before); // txt
        assert!(tokens[3].has_space_before); // file
    }

    #[test]
    fn line_and_column_are_one_based() {
        let tokens = Lexer::tokenize("ab\n  cd");
        assert_eq!((tokens[0].line, tokens[0].column), (1, 1));
        // newline token
        assert_eq!(tokens[1].kind, TokenKind::Newline);
        // cd on line 2, column 3 (after two spaces)
        assert_eq!((tokens[2].line, tokens[2].column), (2, 3));
    }

    #[test]
    fn crlf_is_one_newline() {
        assert_eq!(
            kinds("a\r\nb"),
            vec![TokenKind::Ident, TokenKind::Newline, TokenKind::Ident, TokenKind::Eof]
        );
    }

    #[test]
    fn offsets_are_monotonic_and_bounded() {
        let source = "fun greet() { echo \"hi\" && ls | wc -l }";
        let tokens = Lexer::tokenize(source);
        let mut prev = 0;
        for tok in &tokens {
            assert!(tok.span.start >= prev, "offsets must be monotonic");
            assert!(tok.span.end as usize <= source.len());
            prev = tok.span.start;
        }
        assert_eq!(tokens.last().unwrap().kind, TokenKind::Eof);
    }

    #[test]
    fn lexing_is_deterministic() {
        let source = "var A = @env.HOME\necho @var.A > out.txt";
        assert_eq!(Lexer::tokenize(source), Lexer::tokenize(source));
    }

    #[test]
    fn unknown_bytes_become_error_tokens() {
        let tokens = Lexer::tokenize("echo \u{1F600}");
        assert_eq!(tokens[0].kind, TokenKind::Ident);
        assert_eq!(tokens[1].kind, TokenKind::Error);
        assert_eq!(tokens[2].kind, TokenKind::Eof);
    }
}
