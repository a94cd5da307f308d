/// Streaming lexer for register-machine source.
///
/// The [`Lexer`] consumes bytes from any [`std::io::Read`] source and
/// implements [`Iterator`] over [`Token`]s, ending with exactly one
/// [`TokenKind::Eof`]. Malformed input becomes a [`TokenKind::Error`]
/// token; [`tokenize`] turns the first one into a [`LexError`].
///
/// Comments run from `//` to the end of the line and are dropped.
use std::fmt;
use std::io::Read;

use crate::span::{Pos, Span};
use crate::token::{Token, TokenKind};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LexError {
    pub message: String,
    pub pos: Pos,
}

impl fmt::Display for LexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at {}", self.message, self.pos)
    }
}

impl std::error::Error for LexError {}

/// Lex all of `source`, stopping at the first malformed token.
/// The returned tokens end with [`TokenKind::Eof`].
pub fn tokenize(source: &str) -> Result<Vec<Token>, LexError> {
    let mut tokens = Vec::new();
    for token in Lexer::from_str(source) {
        if let TokenKind::Error(message) = token.kind {
            return Err(LexError {
                message,
                pos: token.span.start,
            });
        }
        tokens.push(token);
    }
    Ok(tokens)
}

/// Two bytes cover the longest lookahead: `//` and two-character operators.
const LOOKAHEAD: usize = 2;

/// `peek()` / `peek_ahead()` / `advance()` over any `Read`, with position
/// tracking.
struct ReadBuf<R: Read> {
    reader: R,
    buf: [u8; LOOKAHEAD],
    filled: usize,
    reader_eof: bool,
    offset: usize,
    line: usize,
    column: usize,
}

impl<R: Read> ReadBuf<R> {
    fn new(reader: R) -> Self {
        let mut rb = Self {
            reader,
            buf: [0u8; LOOKAHEAD],
            filled: 0,
            reader_eof: false,
            offset: 0,
            line: 1,
            column: 1,
        };
        rb.fill();
        rb
    }

    fn fill(&mut self) {
        while !self.reader_eof && self.filled < LOOKAHEAD {
            let mut one = [0u8; 1];
            match self.reader.read(&mut one) {
                Ok(0) | Err(_) => self.reader_eof = true,
                Ok(_) => {
                    self.buf[self.filled] = one[0];
                    self.filled += 1;
                }
            }
        }
    }

    fn pos(&self) -> Pos {
        Pos::new(self.offset, self.line, self.column)
    }

    fn peek(&self) -> Option<u8> {
        self.peek_ahead(0)
    }

    fn peek_ahead(&self, n: usize) -> Option<u8> {
        (n < self.filled).then(|| self.buf[n])
    }

    fn advance(&mut self) -> Option<u8> {
        if self.filled == 0 {
            return None;
        }
        let b = self.buf[0];
        self.buf.copy_within(1..self.filled, 0);
        self.filled -= 1;
        self.fill();

        self.offset += 1;
        if b == b'\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(b)
    }
}

pub struct Lexer<R: Read> {
    rb: ReadBuf<R>,
    emitted_eof: bool,
}

impl<R: Read> Lexer<R> {
    pub fn new(reader: R) -> Self {
        Self {
            rb: ReadBuf::new(reader),
            emitted_eof: false,
        }
    }
}

impl<'a> Lexer<&'a [u8]> {
    pub fn from_str(source: &'a str) -> Self {
        Self::new(source.as_bytes())
    }
}

impl<R: Read> Lexer<R> {
    fn skip_trivia(&mut self) {
        loop {
            match self.rb.peek() {
                Some(b' ' | b'\t' | b'\r' | b'\n') => {
                    self.rb.advance();
                }
                Some(b'/') if self.rb.peek_ahead(1) == Some(b'/') => {
                    while !matches!(self.rb.peek(), Some(b'\n') | None) {
                        self.rb.advance();
                    }
                }
                _ => break,
            }
        }
    }

    fn lex_word(&mut self) -> Token {
        let start = self.rb.pos();
        let mut word = String::new();
        while let Some(b) = self.rb.peek() {
            if b.is_ascii_alphanumeric() || b == b'_' {
                word.push(b as char);
                self.rb.advance();
            } else {
                break;
            }
        }
        let kind = TokenKind::keyword(&word)
            .unwrap_or_else(|| TokenKind::Identifier(word.clone()));
        Token::new(kind, Span::new(start, self.rb.pos()), word)
    }

    fn lex_number(&mut self) -> Token {
        let start = self.rb.pos();
        let mut raw = String::new();
        self.take_digits(&mut raw);

        let is_float = self.rb.peek() == Some(b'.')
            && self.rb.peek_ahead(1).is_some_and(|b| b.is_ascii_digit());
        let kind = if is_float {
            raw.push('.');
            self.rb.advance();
            self.take_digits(&mut raw);
            match raw.parse::<f64>() {
                Ok(v) => TokenKind::Float(v),
                Err(_) => TokenKind::Error("Malformed float literal.".into()),
            }
        } else {
            match raw.parse::<i64>() {
                Ok(v) => TokenKind::Integer(v),
                Err(_) => {
                    TokenKind::Error("Integer literal out of range.".into())
                }
            }
        };
        Token::new(kind, Span::new(start, self.rb.pos()), raw)
    }

    fn take_digits(&mut self, raw: &mut String) {
        while let Some(b) = self.rb.peek() {
            if !b.is_ascii_digit() {
                break;
            }
            raw.push(b as char);
            self.rb.advance();
        }
    }

    /// Lex a string literal delimited by double quotes.
    ///
    /// Escape sequences: `\\`, `\"`, `\0`, `\r`, `\n`, `\t`.
    fn lex_string(&mut self) -> Token {
        let start = self.rb.pos();
        self.rb.advance();
        let mut value = Vec::new();
        let mut raw = vec![b'"'];
        loop {
            let error_pos = self.rb.pos();
            match self.rb.advance() {
                Some(b'"') => {
                    raw.push(b'"');
                    break;
                }
                Some(b'\\') => {
                    raw.push(b'\\');
                    let (escaped, code) = match self.rb.advance() {
                        Some(c @ (b'\\' | b'"')) => (c, c),
                        Some(b'0') => (b'\0', b'0'),
                        Some(b'r') => (b'\r', b'r'),
                        Some(b'n') => (b'\n', b'n'),
                        Some(b't') => (b'\t', b't'),
                        Some(other) => {
                            raw.push(other);
                            return self.error_token(
                                format!(
                                    "Invalid escape sequence \\{}.",
                                    other.escape_ascii()
                                ),
                                error_pos,
                                raw,
                            );
                        }
                        None => {
                            return self.error_token(
                                "Unexpected end of input in escape sequence.",
                                error_pos,
                                raw,
                            );
                        }
                    };
                    raw.push(code);
                    value.push(escaped);
                }
                Some(b) => {
                    raw.push(b);
                    value.push(b);
                }
                None => {
                    return self.error_token(
                        format!(
                            "Unexpected end of input, missing \" to close the \
                             string opened at {start}."
                        ),
                        start,
                        raw,
                    );
                }
            }
        }
        let span = Span::new(start, self.rb.pos());
        let value = String::from_utf8_lossy(&value).into_owned();
        Token::new(
            TokenKind::String(value),
            span,
            String::from_utf8_lossy(&raw),
        )
    }

    fn error_token(
        &self,
        message: impl Into<String>,
        at: Pos,
        raw: Vec<u8>,
    ) -> Token {
        Token::new(
            TokenKind::Error(message.into()),
            Span::new(at, self.rb.pos()),
            String::from_utf8_lossy(&raw),
        )
    }

    fn lex_punct(&mut self) -> Token {
        let start = self.rb.pos();
        let Some(first) = self.rb.advance() else {
            return Token::new(TokenKind::Eof, Span::point(start), "");
        };
        let second = self.rb.peek();

        let double = match (first, second) {
            (b'+', Some(b'=')) => Some(TokenKind::PlusEquals),
            (b'-', Some(b'=')) => Some(TokenKind::MinusEquals),
            (b'*', Some(b'=')) => Some(TokenKind::StarEquals),
            (b'/', Some(b'=')) => Some(TokenKind::SlashEquals),
            (b'%', Some(b'=')) => Some(TokenKind::PercentEquals),
            (b'&', Some(b'=')) => Some(TokenKind::AmpersandEquals),
            (b'|', Some(b'=')) => Some(TokenKind::PipeEquals),
            (b'^', Some(b'=')) => Some(TokenKind::CaretEquals),
            (b'<', Some(b'=')) => Some(TokenKind::LessEquals),
            (b'>', Some(b'=')) => Some(TokenKind::GreaterEquals),
            (b'=', Some(b'=')) => Some(TokenKind::EqualsEquals),
            (b'!', Some(b'=')) => Some(TokenKind::NotEquals),
            (b'<', Some(b'<')) => Some(TokenKind::Shl),
            (b'>', Some(b'>')) => Some(TokenKind::Shr),
            _ => None,
        };
        if let Some(kind) = double {
            let second = self.rb.advance().unwrap_or_default();
            let lexeme = format!("{}{}", first as char, second as char);
            return Token::new(kind, Span::new(start, self.rb.pos()), lexeme);
        }

        let kind = match first {
            b'[' => TokenKind::BracketOpen,
            b']' => TokenKind::BracketClose,
            b'(' => TokenKind::ParenOpen,
            b')' => TokenKind::ParenClose,
            b'{' => TokenKind::BraceOpen,
            b'}' => TokenKind::BraceClose,
            b'+' => TokenKind::Plus,
            b'-' => TokenKind::Minus,
            b'*' => TokenKind::Star,
            b'/' => TokenKind::Slash,
            b'%' => TokenKind::Percent,
            b'&' => TokenKind::Ampersand,
            b'|' => TokenKind::Pipe,
            b'^' => TokenKind::Caret,
            b'=' => TokenKind::Equals,
            b'<' => TokenKind::Less,
            b'>' => TokenKind::Greater,
            b'#' => TokenKind::Hash,
            b',' => TokenKind::Comma,
            b';' => TokenKind::Semicolon,
            _ => TokenKind::Error("Unrecognized token.".into()),
        };
        Token::new(
            kind,
            Span::new(start, self.rb.pos()),
            first.escape_ascii().to_string(),
        )
    }
}

impl<R: Read> Iterator for Lexer<R> {
    type Item = Token;

    fn next(&mut self) -> Option<Token> {
        if self.emitted_eof {
            return None;
        }
        self.skip_trivia();
        let token = match self.rb.peek() {
            None => {
                self.emitted_eof = true;
                Token::new(TokenKind::Eof, Span::point(self.rb.pos()), "")
            }
            Some(b) if b.is_ascii_alphabetic() || b == b'_' => self.lex_word(),
            Some(b) if b.is_ascii_digit() => self.lex_number(),
            Some(b'"') => self.lex_string(),
            Some(_) => self.lex_punct(),
        };
        Some(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Register;

    fn kinds(source: &str) -> Vec<TokenKind> {
        Lexer::from_str(source).map(|t| t.kind).collect()
    }

    #[test]
    fn lexes_registers_keywords_and_identifiers() {
        assert_eq!(
            kinds("proc main { rax r15 loop xmm3 foo_1 }"),
            vec![
                TokenKind::Proc,
                TokenKind::Identifier("main".into()),
                TokenKind::BraceOpen,
                TokenKind::Register(Register::Rax),
                TokenKind::Register(Register::R15),
                TokenKind::Loop,
                TokenKind::VectorRegister(3),
                TokenKind::Identifier("foo_1".into()),
                TokenKind::BraceClose,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn near_register_names_are_identifiers() {
        assert_eq!(
            kinds("r16 xmm16 rsp raxx"),
            vec![
                TokenKind::Identifier("r16".into()),
                TokenKind::Identifier("xmm16".into()),
                TokenKind::Identifier("rsp".into()),
                TokenKind::Identifier("raxx".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn lexes_compound_operators() {
        assert_eq!(
            kinds("+= -= *= /= %= &= |= ^= <= >= == != << >> < > = -"),
            vec![
                TokenKind::PlusEquals,
                TokenKind::MinusEquals,
                TokenKind::StarEquals,
                TokenKind::SlashEquals,
                TokenKind::PercentEquals,
                TokenKind::AmpersandEquals,
                TokenKind::PipeEquals,
                TokenKind::CaretEquals,
                TokenKind::LessEquals,
                TokenKind::GreaterEquals,
                TokenKind::EqualsEquals,
                TokenKind::NotEquals,
                TokenKind::Shl,
                TokenKind::Shr,
                TokenKind::Less,
                TokenKind::Greater,
                TokenKind::Equals,
                TokenKind::Minus,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn numbers_and_floats() {
        assert_eq!(
            kinds("42 - 7 3.25 9."),
            vec![
                TokenKind::Integer(42),
                TokenKind::Minus,
                TokenKind::Integer(7),
                TokenKind::Float(3.25),
                TokenKind::Integer(9),
                TokenKind::Error("Unrecognized token.".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn integer_overflow_is_an_error() {
        let err = tokenize("rax = 99999999999999999999;").expect_err("overflow");
        assert_eq!(err.message, "Integer literal out of range.");
        assert_eq!(err.pos, Pos::new(6, 1, 7));
    }

    #[test]
    fn string_escapes() {
        let tokens = tokenize(r#"<< "a\tb\n\\\"\0";"#).expect("lex");
        assert_eq!(tokens[1].kind, TokenKind::String("a\tb\n\\\"\0".into()));
        assert_eq!(tokens[1].lexeme, r#""a\tb\n\\\"\0""#);
    }

    #[test]
    fn invalid_escape_is_reported_at_backslash() {
        let err = tokenize("<< \"ab\\q\";").expect_err("bad escape");
        assert_eq!(err.message, "Invalid escape sequence \\q.");
        assert_eq!(err.pos.column, 7);
    }

    #[test]
    fn unterminated_string_points_at_opening_quote() {
        let err = tokenize("\n  << \"abc").expect_err("unterminated");
        assert_eq!(err.pos, Pos::new(6, 2, 6));
        assert!(err.message.contains("missing \""));
    }

    #[test]
    fn comments_and_positions() {
        let tokens = tokenize("// header\n  rax += 1; // trailing\nret").expect("lex");
        let first = &tokens[0];
        assert_eq!(first.kind, TokenKind::Register(Register::Rax));
        assert_eq!(first.span.start, Pos::new(12, 2, 3));
        assert_eq!(first.span.end, Pos::new(15, 2, 6));
        let last = &tokens[tokens.len() - 2];
        assert_eq!(last.kind, TokenKind::Identifier("ret".into()));
        assert_eq!(last.span.start.line, 3);
        assert!(tokens.last().is_some_and(Token::is_eof));
    }

    #[test]
    fn unknown_character_stops_tokenize() {
        let err = tokenize("rax = 1 @").expect_err("unknown char");
        assert_eq!(err.message, "Unrecognized token.");
        assert_eq!(err.pos.column, 9);
    }

    #[test]
    fn streams_from_any_reader() {
        let reader = std::io::Cursor::new(b"push rbx;".to_vec());
        let kinds: Vec<_> = Lexer::new(reader).map(|t| t.kind).collect();
        assert_eq!(
            kinds,
            vec![
                TokenKind::Push,
                TokenKind::Register(Register::Rbx),
                TokenKind::Semicolon,
                TokenKind::Eof,
            ]
        );
    }
}
