//! # Parser
//!
//! Lexer and recursive-descent parser for the register-machine language.
//!
//! ```text
//!  impl Read (file, &[u8], …)
//!      │
//!      ▼
//!  ┌────────┐    Token stream     ┌────────┐
//!  │ Lexer  │ ──────────────────▶ │ Parser │ ──────▶ ProcedureTable
//!  └────────┘  (impl Iterator)    └────────┘
//! ```
//!
//! ```rust
//! use parser::{parse_tokens, tokenize};
//!
//! let source = "proc main { rax = 1; loop (rax < 10) { rax += 1; } }";
//! let table = parse_tokens(tokenize(source).unwrap()).unwrap();
//! assert!(table.contains("main"));
//! ```

pub mod ast;
pub mod dump;
pub mod lexer;
pub mod parser;
pub mod span;
pub mod token;

pub use ast::{
    Comparison, Condition, Operand, OperandKind, Operation, Procedure,
    ProcedureTable, Register, Statement, StatementKind,
};
pub use lexer::{LexError, Lexer, tokenize};
pub use parser::{ParseError, Parser, parse_tokens};
pub use span::{Pos, Span};
pub use token::{Token, TokenKind};
