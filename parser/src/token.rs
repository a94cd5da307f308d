/// Token types produced by the lexer.
use std::fmt;

use crate::ast::Register;
use crate::span::Span;

/// The kind of a lexical token.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    /// Decimal integer literal. The sign is a separate [`TokenKind::Minus`].
    Integer(i64),
    /// `digits.digits`; lexed so it can be rejected with a precise message.
    Float(f64),
    /// String literal with escapes already resolved.
    String(String),
    Identifier(String),

    Register(Register),
    /// `xmm0` to `xmm15`.
    VectorRegister(u8),

    Branch,
    Break,
    Continue,
    Else,
    If,
    Loop,
    Macro,
    Pop,
    Proc,
    Push,
    Return,
    Val,
    Var,

    PlusEquals,
    MinusEquals,
    StarEquals,
    SlashEquals,
    PercentEquals,
    AmpersandEquals,
    PipeEquals,
    CaretEquals,
    LessEquals,
    GreaterEquals,
    EqualsEquals,
    NotEquals,
    /// `<<`
    Shl,
    /// `>>`
    Shr,

    BracketOpen,
    BracketClose,
    ParenOpen,
    ParenClose,
    BraceOpen,
    BraceClose,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Ampersand,
    Pipe,
    Caret,
    Equals,
    Less,
    Greater,
    Hash,
    Comma,
    Semicolon,

    /// End of input.
    Eof,
    /// An unrecognized character or malformed token.
    Error(String),
}

impl TokenKind {
    /// Reserved word for `word`, if it is one.
    pub fn keyword(word: &str) -> Option<Self> {
        let kind = match word {
            "branch" => Self::Branch,
            "break" => Self::Break,
            "continue" => Self::Continue,
            "else" => Self::Else,
            "if" => Self::If,
            "loop" => Self::Loop,
            "macro" => Self::Macro,
            "pop" => Self::Pop,
            "proc" => Self::Proc,
            "push" => Self::Push,
            "return" => Self::Return,
            "val" => Self::Val,
            "var" => Self::Var,
            _ => {
                if let Some(reg) = Register::from_name(word) {
                    return Some(Self::Register(reg));
                }
                return vector_register(word).map(Self::VectorRegister);
            }
        };
        Some(kind)
    }

    /// Human-readable name for error messages and token dumps.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Integer(_) => "integer",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Identifier(_) => "identifier",
            Self::Register(_) => "register",
            Self::VectorRegister(_) => "vector register",
            Self::Branch => "`branch`",
            Self::Break => "`break`",
            Self::Continue => "`continue`",
            Self::Else => "`else`",
            Self::If => "`if`",
            Self::Loop => "`loop`",
            Self::Macro => "`macro`",
            Self::Pop => "`pop`",
            Self::Proc => "`proc`",
            Self::Push => "`push`",
            Self::Return => "`return`",
            Self::Val => "`val`",
            Self::Var => "`var`",
            Self::PlusEquals => "`+=`",
            Self::MinusEquals => "`-=`",
            Self::StarEquals => "`*=`",
            Self::SlashEquals => "`/=`",
            Self::PercentEquals => "`%=`",
            Self::AmpersandEquals => "`&=`",
            Self::PipeEquals => "`|=`",
            Self::CaretEquals => "`^=`",
            Self::LessEquals => "`<=`",
            Self::GreaterEquals => "`>=`",
            Self::EqualsEquals => "`==`",
            Self::NotEquals => "`!=`",
            Self::Shl => "`<<`",
            Self::Shr => "`>>`",
            Self::BracketOpen => "`[`",
            Self::BracketClose => "`]`",
            Self::ParenOpen => "`(`",
            Self::ParenClose => "`)`",
            Self::BraceOpen => "`{`",
            Self::BraceClose => "`}`",
            Self::Plus => "`+`",
            Self::Minus => "`-`",
            Self::Star => "`*`",
            Self::Slash => "`/`",
            Self::Percent => "`%`",
            Self::Ampersand => "`&`",
            Self::Pipe => "`|`",
            Self::Caret => "`^`",
            Self::Equals => "`=`",
            Self::Less => "`<`",
            Self::Greater => "`>`",
            Self::Hash => "`#`",
            Self::Comma => "`,`",
            Self::Semicolon => "`;`",
            Self::Eof => "end of input",
            Self::Error(_) => "error",
        }
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer(v) => write!(f, "integer {v}"),
            Self::Float(v) => write!(f, "float {v}"),
            Self::String(s) => {
                write!(f, "string \"{}\"", s.as_bytes().escape_ascii())
            }
            Self::Identifier(name) => write!(f, "identifier {name}"),
            Self::Register(reg) => write!(f, "register {reg}"),
            Self::VectorRegister(n) => write!(f, "vector register xmm{n}"),
            Self::Error(message) => write!(f, "error {message}"),
            other => f.write_str(other.name()),
        }
    }
}

fn vector_register(word: &str) -> Option<u8> {
    let digits = word.strip_prefix("xmm")?;
    if digits.is_empty() || (digits.len() > 1 && digits.starts_with('0')) {
        return None;
    }
    let n: u8 = digits.parse().ok()?;
    (n < 16).then_some(n)
}

/// A token with its source span.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
    /// The original source text of this token.
    pub lexeme: String,
}

impl Token {
    pub fn new(kind: TokenKind, span: Span, lexeme: impl Into<String>) -> Self {
        Self {
            kind,
            span,
            lexeme: lexeme.into(),
        }
    }

    pub fn is_eof(&self) -> bool {
        matches!(self.kind, TokenKind::Eof)
    }
}
