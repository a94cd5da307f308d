//! # regjit
//!
//! Compiles register-machine programs straight to x86-64 machine code and
//! runs them in process.
//!
//! ```text
//!  source ──▶ parser::tokenize ──▶ parser::parse_tokens ──▶ ProcedureTable
//!                                                              │
//!               CompiledProgram ◀── program::compile_program ◀─┘
//!                     │
//!                     ▼
//!           loader::execute (W^X mapping, call entry)
//! ```
//!
//! Generated code calls back into the host only through the
//! [`Intrinsics`] table it was compiled against.

use std::fmt;

use parser::{LexError, ParseError, Pos, parse_tokens, tokenize};

pub mod compiler;
pub mod condition;
pub mod dump;
pub mod intrinsics;
pub mod loader;
pub mod program;

pub use compiler::{CompileError, CompileErrorKind, CompileSession};
pub use dump::dump_code;
pub use intrinsics::{IntrinsicBinding, Intrinsics, capture_output};
pub use loader::{ExecutableImage, LoadError, execute};
pub use program::{CompiledProgram, ENTRY_PROCEDURE, compile_program};

/// Any failure between source text and a finished run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    Lex(LexError),
    Parse(ParseError),
    Compile(CompileError),
    Load(LoadError),
}

impl Error {
    /// Pipeline stage that failed, as shown in diagnostics.
    pub fn stage(&self) -> &'static str {
        match self {
            Self::Lex(_) => "Lexer",
            Self::Parse(_) => "Parser",
            Self::Compile(_) => "Compiler",
            Self::Load(_) => "Loader",
        }
    }

    /// Source position of the failure; loader errors have none.
    pub fn pos(&self) -> Option<Pos> {
        match self {
            Self::Lex(err) => Some(err.pos),
            Self::Parse(err) => Some(err.pos),
            Self::Compile(err) => Some(err.pos),
            Self::Load(_) => None,
        }
    }

    /// The message without its position.
    pub fn message(&self) -> String {
        match self {
            Self::Lex(err) => err.message.clone(),
            Self::Parse(err) => err.message.clone(),
            Self::Compile(err) => err.kind.to_string(),
            Self::Load(err) => err.to_string(),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.pos() {
            Some(pos) => {
                write!(f, "{pos}: {} error: {}", self.stage(), self.message())
            }
            None => write!(f, "{} error: {}", self.stage(), self.message()),
        }
    }
}

impl std::error::Error for Error {}

impl From<LexError> for Error {
    fn from(err: LexError) -> Self {
        Self::Lex(err)
    }
}

impl From<ParseError> for Error {
    fn from(err: ParseError) -> Self {
        Self::Parse(err)
    }
}

impl From<CompileError> for Error {
    fn from(err: CompileError) -> Self {
        Self::Compile(err)
    }
}

impl From<LoadError> for Error {
    fn from(err: LoadError) -> Self {
        Self::Load(err)
    }
}

/// Lexes, parses and compiles `source`.
pub fn compile_source(
    source: &str,
    intrinsics: Intrinsics,
) -> Result<CompiledProgram, Error> {
    let tokens = tokenize(source)?;
    let table = parse_tokens(tokens)?;
    Ok(compile_program(&table, intrinsics)?)
}

/// Compiles and runs `source` against the host intrinsics.
pub fn run_source(source: &str) -> Result<(), Error> {
    let program = compile_source(source, Intrinsics::host())?;
    execute(&program)?;
    Ok(())
}
