//! Syntax tree for register-machine programs.
//!
//! A program is a [`ProcedureTable`]: named procedures in declaration
//! order, each a list of [`Statement`]s. Every statement may carry a guard
//! [`Condition`] that skips it when false, independently of any enclosing
//! `branch` or `loop`.

use std::fmt;

use crate::span::Pos;

/// One of the fifteen general-purpose registers a program may name.
/// The stack pointer is never exposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Register {
    Rax,
    Rbx,
    Rcx,
    Rdx,
    Rsi,
    Rdi,
    Rbp,
    R8,
    R9,
    R10,
    R11,
    R12,
    R13,
    R14,
    R15,
}

impl Register {
    pub const ALL: [Register; 15] = [
        Register::Rax,
        Register::Rbx,
        Register::Rcx,
        Register::Rdx,
        Register::Rsi,
        Register::Rdi,
        Register::Rbp,
        Register::R8,
        Register::R9,
        Register::R10,
        Register::R11,
        Register::R12,
        Register::R13,
        Register::R14,
        Register::R15,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Rax => "rax",
            Self::Rbx => "rbx",
            Self::Rcx => "rcx",
            Self::Rdx => "rdx",
            Self::Rsi => "rsi",
            Self::Rdi => "rdi",
            Self::Rbp => "rbp",
            Self::R8 => "r8",
            Self::R9 => "r9",
            Self::R10 => "r10",
            Self::R11 => "r11",
            Self::R12 => "r12",
            Self::R13 => "r13",
            Self::R14 => "r14",
            Self::R15 => "r15",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|reg| reg.name() == name)
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandKind {
    Register(Register),
    Immediate(i64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Operand {
    pub kind: OperandKind,
    pub pos: Pos,
}

impl Operand {
    pub fn register(reg: Register, pos: Pos) -> Self {
        Self {
            kind: OperandKind::Register(reg),
            pos,
        }
    }

    pub fn immediate(value: i64, pos: Pos) -> Self {
        Self {
            kind: OperandKind::Immediate(value),
            pos,
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            OperandKind::Register(reg) => write!(f, "{reg}"),
            OperandKind::Immediate(value) => write!(f, "{value}"),
        }
    }
}

/// Signed comparison between two operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Comparison {
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    Equal,
    NotEqual,
}

impl Comparison {
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Less => "<",
            Self::LessEqual => "<=",
            Self::Greater => ">",
            Self::GreaterEqual => ">=",
            Self::Equal => "==",
            Self::NotEqual => "!=",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Condition {
    pub lhs: Operand,
    pub rhs: Operand,
    pub comparison: Comparison,
    pub pos: Pos,
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.lhs, self.comparison.symbol(), self.rhs)
    }
}

/// Binary arithmetic/bitwise operation of shorthand (`rax += 1`) and
/// longhand (`rax = rbx + 1`) statements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    And,
    Or,
    Xor,
}

impl Operation {
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Mod => "%",
            Self::And => "&",
            Self::Or => "|",
            Self::Xor => "^",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatementKind {
    /// `dest = source`
    Assignment { dest: Register, source: Operand },
    /// `dest op= source`
    Shorthand {
        dest: Register,
        op: Operation,
        source: Operand,
    },
    /// `dest = lhs op rhs`; parsed but never compiled.
    Longhand {
        dest: Register,
        op: Operation,
        lhs: Operand,
        rhs: Operand,
    },
    /// `loop [(cond)] { body }`; the condition is re-checked before every
    /// iteration.
    Loop {
        condition: Option<Condition>,
        body: Vec<Statement>,
    },
    /// `branch (cond) { then } [else { else }]`
    Branch {
        condition: Condition,
        then_body: Vec<Statement>,
        else_body: Vec<Statement>,
    },
    Break,
    Continue,
    Return,
    Call { procedure: String },
    /// `<< operand`: prints the value as a decimal integer.
    Stdout { source: Operand },
    /// `<< "text"`
    StdoutText { text: String },
    Push { reg: Register },
    Pop { reg: Register },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    pub kind: StatementKind,
    pub guard: Option<Condition>,
    pub pos: Pos,
}

impl Statement {
    pub fn new(kind: StatementKind, guard: Option<Condition>, pos: Pos) -> Self {
        Self { kind, guard, pos }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Procedure {
    pub name: String,
    pub body: Vec<Statement>,
    pub pos: Pos,
}

/// Procedures keyed by name, kept in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcedureTable {
    procedures: Vec<Procedure>,
}

impl ProcedureTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `procedure`, handing it back if the name is already taken.
    pub fn insert(&mut self, procedure: Procedure) -> Result<(), Procedure> {
        if self.contains(&procedure.name) {
            return Err(procedure);
        }
        self.procedures.push(procedure);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Procedure> {
        self.procedures.iter().find(|p| p.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Procedure> {
        self.procedures.iter()
    }

    pub fn len(&self) -> usize {
        self.procedures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.procedures.is_empty()
    }
}

impl<'a> IntoIterator for &'a ProcedureTable {
    type Item = &'a Procedure;
    type IntoIter = std::slice::Iter<'a, Procedure>;

    fn into_iter(self) -> Self::IntoIter {
        self.procedures.iter()
    }
}
