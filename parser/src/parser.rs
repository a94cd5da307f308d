use std::fmt;
use std::iter::Peekable;

use crate::ast::{
    Comparison, Condition, Operand, Operation, Procedure, ProcedureTable,
    Register, Statement, StatementKind,
};
use crate::span::{Pos, Span};
use crate::token::{Token, TokenKind};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub message: String,
    pub pos: Pos,
}

impl ParseError {
    pub fn new(message: impl Into<String>, pos: Pos) -> Self {
        Self {
            message: message.into(),
            pos,
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at {}", self.message, self.pos)
    }
}

impl std::error::Error for ParseError {}

type ParseResult<T> = Result<T, ParseError>;

/// Recursive-descent parser producing a [`ProcedureTable`].
///
/// ```text
/// program    := { "proc" IDENT "{" { statement } "}" }
/// statement  := REG ("=" | OP "=") operand [ OP operand ] [ guard ] ";"
///             | "loop" [ "(" condition ")" ] block
///             | "branch" "(" condition ")" block [ "else" block ]
///             | ("break" | "continue" | "return") [ guard ] ";"
///             | IDENT [ guard ] ";"
///             | "<<" (operand | STRING) [ guard ] ";"
///             | ("push" | "pop") REG [ guard ] ";"
/// guard      := "if" condition
/// operand    := REG | INTEGER | "-" INTEGER
/// condition  := operand CMP operand
/// ```
///
/// The first error aborts parsing.
pub struct Parser<I: Iterator<Item = Token>> {
    tokens: Peekable<I>,
    last_span: Span,
}

impl<I: Iterator<Item = Token>> Parser<I> {
    pub fn new(tokens: I) -> Self {
        Self {
            tokens: tokens.peekable(),
            last_span: Span::point(Pos::origin()),
        }
    }

    pub fn parse_program(mut self) -> ParseResult<ProcedureTable> {
        let mut table = ProcedureTable::new();
        while !self.at_eof() {
            let procedure = self.parse_procedure()?;
            let pos = procedure.pos;
            if let Err(duplicate) = table.insert(procedure) {
                return Err(ParseError::new(
                    format!("Procedure \"{}\" redeclaration.", duplicate.name),
                    pos,
                ));
            }
        }
        Ok(table)
    }

    // ── Token plumbing ──────────────────────────────────────────

    fn peek_kind(&mut self) -> &TokenKind {
        match self.tokens.peek() {
            Some(tok) => &tok.kind,
            None => &TokenKind::Eof,
        }
    }

    fn peek_pos(&mut self) -> Pos {
        match self.tokens.peek() {
            Some(tok) => tok.span.start,
            None => self.last_span.end,
        }
    }

    fn at_eof(&mut self) -> bool {
        matches!(self.peek_kind(), TokenKind::Eof)
    }

    fn advance(&mut self) -> Token {
        match self.tokens.next() {
            Some(tok) => {
                self.last_span = tok.span;
                tok
            }
            None => Token::new(TokenKind::Eof, Span::point(self.last_span.end), ""),
        }
    }

    /// Consumes the next token if it has the same kind as `expected`.
    fn eat(&mut self, expected: &TokenKind) -> bool {
        if std::mem::discriminant(self.peek_kind())
            == std::mem::discriminant(expected)
        {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: &TokenKind, message: &str) -> ParseResult<()> {
        if self.eat(expected) {
            Ok(())
        } else {
            Err(self.error_here(message))
        }
    }

    /// Error at the next token. A lexer error token reports its own
    /// message instead.
    fn error_here(&mut self, message: &str) -> ParseError {
        let pos = self.peek_pos();
        match self.peek_kind() {
            TokenKind::Error(lex_message) => ParseError::new(lex_message.clone(), pos),
            _ => ParseError::new(message, pos),
        }
    }

    // ── Declarations ────────────────────────────────────────────

    fn parse_procedure(&mut self) -> ParseResult<Procedure> {
        if !self.eat(&TokenKind::Proc) {
            return Err(self.error_here("Unrecognized top-level declaration."));
        }
        let pos = self.peek_pos();
        let name = match self.peek_kind() {
            TokenKind::Identifier(name) => name.clone(),
            _ => {
                return Err(self.error_here(
                    "Expected identifier in procedure declaration.",
                ));
            }
        };
        self.advance();
        let body = self.parse_block("Expected { in procedure declaration.")?;
        Ok(Procedure { name, body, pos })
    }

    fn parse_block(&mut self, open_message: &str) -> ParseResult<Vec<Statement>> {
        self.expect(&TokenKind::BraceOpen, open_message)?;
        let mut statements = Vec::new();
        while !self.eat(&TokenKind::BraceClose) {
            statements.push(self.parse_statement()?);
        }
        Ok(statements)
    }

    // ── Statements ──────────────────────────────────────────────

    fn parse_statement(&mut self) -> ParseResult<Statement> {
        let pos = self.peek_pos();
        match self.peek_kind().clone() {
            TokenKind::Register(dest) => {
                self.advance();
                self.parse_assignment(dest, pos)
            }
            TokenKind::Loop => {
                self.advance();
                self.parse_loop(pos)
            }
            TokenKind::Branch => {
                self.advance();
                self.parse_branch(pos)
            }
            TokenKind::Break => {
                self.advance();
                self.finish_simple(StatementKind::Break, pos)
            }
            TokenKind::Continue => {
                self.advance();
                self.finish_simple(StatementKind::Continue, pos)
            }
            TokenKind::Return => {
                self.advance();
                self.finish_simple(StatementKind::Return, pos)
            }
            TokenKind::Identifier(procedure) => {
                self.advance();
                self.finish_simple(StatementKind::Call { procedure }, pos)
            }
            TokenKind::Shl => {
                self.advance();
                let kind = match self.peek_kind().clone() {
                    TokenKind::String(text) => {
                        self.advance();
                        StatementKind::StdoutText { text }
                    }
                    _ => StatementKind::Stdout {
                        source: self.parse_operand()?,
                    },
                };
                self.finish_simple(kind, pos)
            }
            TokenKind::Push => {
                self.advance();
                let reg = self.parse_register()?;
                self.finish_simple(StatementKind::Push { reg }, pos)
            }
            TokenKind::Pop => {
                self.advance();
                let reg = self.parse_register()?;
                self.finish_simple(StatementKind::Pop { reg }, pos)
            }
            _ => Err(self.error_here("Unrecognized statement.")),
        }
    }

    /// Optional guard followed by the terminating `;`.
    fn finish_simple(
        &mut self,
        kind: StatementKind,
        pos: Pos,
    ) -> ParseResult<Statement> {
        let guard = self.parse_guard()?;
        self.expect(&TokenKind::Semicolon, "Expected ;.")?;
        Ok(Statement::new(kind, guard, pos))
    }

    fn parse_guard(&mut self) -> ParseResult<Option<Condition>> {
        if self.eat(&TokenKind::If) {
            Ok(Some(self.parse_condition()?))
        } else {
            Ok(None)
        }
    }

    fn parse_assignment(
        &mut self,
        dest: Register,
        pos: Pos,
    ) -> ParseResult<Statement> {
        let shorthand = match self.peek_kind() {
            TokenKind::Equals => None,
            TokenKind::PlusEquals => Some(Operation::Add),
            TokenKind::MinusEquals => Some(Operation::Sub),
            TokenKind::StarEquals => Some(Operation::Mul),
            TokenKind::SlashEquals => Some(Operation::Div),
            TokenKind::PercentEquals => Some(Operation::Mod),
            TokenKind::AmpersandEquals => Some(Operation::And),
            TokenKind::PipeEquals => Some(Operation::Or),
            TokenKind::CaretEquals => Some(Operation::Xor),
            _ => {
                return Err(self.error_here(
                    "Expected =, +=, -=, *=, /=, %=, &=, |= or ^=.",
                ));
            }
        };
        self.advance();
        let source = self.parse_operand()?;

        if let Some(op) = shorthand {
            let kind = StatementKind::Shorthand { dest, op, source };
            let guard = self.parse_guard()?;
            self.expect(
                &TokenKind::Semicolon,
                if guard.is_some() {
                    "Expected ; after condition."
                } else {
                    "Expected ; or condition after source operand."
                },
            )?;
            return Ok(Statement::new(kind, guard, pos));
        }

        let op = match self.peek_kind() {
            TokenKind::Plus => Operation::Add,
            TokenKind::Minus => Operation::Sub,
            TokenKind::Star => Operation::Mul,
            TokenKind::Slash => Operation::Div,
            TokenKind::Percent => Operation::Mod,
            TokenKind::Ampersand => Operation::And,
            TokenKind::Pipe => Operation::Or,
            TokenKind::Caret => Operation::Xor,
            TokenKind::Semicolon | TokenKind::If => {
                let kind = StatementKind::Assignment { dest, source };
                return self.finish_simple(kind, pos);
            }
            _ => {
                return Err(
                    self.error_here("Expected ;, +, -, *, /, %, &, | or ^.")
                );
            }
        };
        self.advance();
        let rhs = self.parse_operand()?;
        let kind = StatementKind::Longhand {
            dest,
            op,
            lhs: source,
            rhs,
        };
        self.finish_simple(kind, pos)
    }

    fn parse_loop(&mut self, pos: Pos) -> ParseResult<Statement> {
        let condition = if self.eat(&TokenKind::ParenOpen) {
            let condition = self.parse_condition()?;
            self.expect(
                &TokenKind::ParenClose,
                "Expected ) after loop condition.",
            )?;
            Some(condition)
        } else {
            None
        };
        let body = self.parse_block("Expected { in loop statement.")?;
        Ok(Statement::new(
            StatementKind::Loop { condition, body },
            None,
            pos,
        ))
    }

    fn parse_branch(&mut self, pos: Pos) -> ParseResult<Statement> {
        self.expect(&TokenKind::ParenOpen, "Expected ( after branch keyword.")?;
        let condition = self.parse_condition()?;
        self.expect(
            &TokenKind::ParenClose,
            "Expected ) after branch condition.",
        )?;
        let then_body = self.parse_block("Expected { in branch statement.")?;
        let else_body = if self.eat(&TokenKind::Else) {
            self.parse_block("Expected { in else statement.")?
        } else {
            Vec::new()
        };
        Ok(Statement::new(
            StatementKind::Branch {
                condition,
                then_body,
                else_body,
            },
            None,
            pos,
        ))
    }

    // ── Operands and conditions ─────────────────────────────────

    fn parse_condition(&mut self) -> ParseResult<Condition> {
        let pos = self.peek_pos();
        let lhs = self.parse_operand()?;
        let comparison = match self.peek_kind() {
            TokenKind::Less => Comparison::Less,
            TokenKind::LessEquals => Comparison::LessEqual,
            TokenKind::Greater => Comparison::Greater,
            TokenKind::GreaterEquals => Comparison::GreaterEqual,
            TokenKind::EqualsEquals => Comparison::Equal,
            TokenKind::NotEquals => Comparison::NotEqual,
            _ => {
                return Err(self.error_here(
                    "Unrecognized comparison operator, expected <, <=, >, >=, \
                     == or !=.",
                ));
            }
        };
        self.advance();
        let rhs = self.parse_operand()?;
        Ok(Condition {
            lhs,
            rhs,
            comparison,
            pos,
        })
    }

    fn parse_operand(&mut self) -> ParseResult<Operand> {
        let pos = self.peek_pos();
        let operand = match self.peek_kind() {
            TokenKind::Register(reg) => Operand::register(*reg, pos),
            TokenKind::Integer(value) => Operand::immediate(*value, pos),
            TokenKind::Minus => {
                self.advance();
                return match self.peek_kind() {
                    TokenKind::Integer(value) => {
                        let value = -*value;
                        self.advance();
                        Ok(Operand::immediate(value, pos))
                    }
                    _ => Err(ParseError::new(
                        "Number expected after minus sign to form an \
                         immediate value.",
                        pos,
                    )),
                };
            }
            TokenKind::VectorRegister(_) => {
                return Err(
                    self.error_here("Vector registers are not supported.")
                );
            }
            TokenKind::Float(_) => {
                return Err(self.error_here(
                    "Floating-point immediates are not supported.",
                ));
            }
            _ => {
                return Err(self.error_here(
                    "Unrecognized operand, expected register or immediate \
                     value.",
                ));
            }
        };
        self.advance();
        Ok(operand)
    }

    fn parse_register(&mut self) -> ParseResult<Register> {
        match self.peek_kind() {
            TokenKind::Register(reg) => {
                let reg = *reg;
                self.advance();
                Ok(reg)
            }
            _ => Err(self.error_here("Expected register.")),
        }
    }
}

/// Parses an already lexed token stream.
pub fn parse_tokens(
    tokens: impl IntoIterator<Item = Token>,
) -> Result<ProcedureTable, ParseError> {
    Parser::new(tokens.into_iter()).parse_program()
}
