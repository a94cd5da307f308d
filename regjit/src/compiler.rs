//! Statement compiler.
//!
//! Lowers one procedure body at a time into the shared [`Assembler`]
//! buffer. Forward references are placeholders: guard skips and branch
//! exits are patched as soon as their statement ends, loop exits together
//! with `break`/`continue` when their loop ends, and calls only once every
//! procedure has an offset (see [`crate::program`]).

use std::fmt;

use assembler::{
    AluOp, Assembler, AssemblerError, PendingCall, PendingJump, Reg,
};
use parser::{
    Condition, Operand, OperandKind, Operation, Procedure, Pos, Register,
    Statement, StatementKind,
};

use crate::condition::compile_condition;
use crate::intrinsics::Intrinsics;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompileErrorKind {
    UnsupportedComparison,
    Unimplemented,
    StrayLoopControl,
    UndefinedProcedure(String),
    Assembler(AssemblerError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileError {
    pub kind: CompileErrorKind,
    pub pos: Pos,
}

impl CompileError {
    pub fn new(kind: CompileErrorKind, pos: Pos) -> Self {
        Self { kind, pos }
    }

    /// Attaches `pos` to an encoder error that has no position yet.
    fn or_at(mut self, pos: Pos) -> Self {
        if self.pos == Pos::unknown()
            && matches!(self.kind, CompileErrorKind::Assembler(_))
        {
            self.pos = pos;
        }
        self
    }
}

impl fmt::Display for CompileErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsupportedComparison => {
                write!(f, "Unsupported comparison operand type combination.")
            }
            Self::Unimplemented => {
                write!(f, "Statement not implemented in the compiler.")
            }
            Self::StrayLoopControl => {
                write!(f, "break or continue outside a loop.")
            }
            Self::UndefinedProcedure(name) => {
                write!(f, "Calling procedure \"{name}\", which doesn't exist.")
            }
            Self::Assembler(err) => write!(f, "{err}"),
        }
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at {}", self.kind, self.pos)
    }
}

impl std::error::Error for CompileError {}

impl From<AssemblerError> for CompileError {
    fn from(err: AssemblerError) -> Self {
        Self::new(CompileErrorKind::Assembler(err), Pos::unknown())
    }
}

/// Maps a language register onto its hardware register.
pub fn machine_register(reg: Register) -> Reg {
    match reg {
        Register::Rax => Reg::Rax,
        Register::Rbx => Reg::Rbx,
        Register::Rcx => Reg::Rcx,
        Register::Rdx => Reg::Rdx,
        Register::Rsi => Reg::Rsi,
        Register::Rdi => Reg::Rdi,
        Register::Rbp => Reg::Rbp,
        Register::R8 => Reg::R8,
        Register::R9 => Reg::R9,
        Register::R10 => Reg::R10,
        Register::R11 => Reg::R11,
        Register::R12 => Reg::R12,
        Register::R13 => Reg::R13,
        Register::R14 => Reg::R14,
        Register::R15 => Reg::R15,
    }
}

/// Pending `break`/`continue` jumps of one loop.
///
/// The bottom context of every procedure belongs to no loop; anything left
/// in it once the body is compiled is a stray.
#[derive(Debug, Default)]
pub(crate) struct LoopContext {
    breaks: Vec<(PendingJump, Pos)>,
    continues: Vec<(PendingJump, Pos)>,
}

impl LoopContext {
    fn first_stray(&self) -> Option<Pos> {
        self.breaks
            .iter()
            .chain(&self.continues)
            .map(|(_, pos)| *pos)
            .min_by_key(|pos| pos.offset)
    }
}

/// State shared by every procedure of one program.
#[derive(Debug)]
pub struct CompileSession {
    pub(crate) asm: Assembler,
    pub(crate) intrinsics: Intrinsics,
    pub(crate) loops: Vec<LoopContext>,
    pub(crate) calls: Vec<(PendingCall, String)>,
    pub(crate) procedures: Vec<(String, usize)>,
}

impl CompileSession {
    pub fn new(intrinsics: Intrinsics) -> Self {
        Self {
            asm: Assembler::new(),
            intrinsics,
            loops: Vec::new(),
            calls: Vec::new(),
            procedures: Vec::new(),
        }
    }

    pub fn offset(&self) -> usize {
        self.asm.offset()
    }

    /// Compiles `procedure` followed by a `ret` and records its offset.
    pub fn compile_procedure(
        &mut self,
        procedure: &Procedure,
    ) -> Result<usize, CompileError> {
        let start = self.asm.offset();
        log::debug!("procedure `{}` at 0x{start:04x}", procedure.name);
        self.procedures.push((procedure.name.clone(), start));

        self.loops.push(LoopContext::default());
        let body = self.compile_body(&procedure.body);
        let root = self.loops.pop().unwrap_or_default();
        body?;
        if let Some(pos) = root.first_stray() {
            return Err(CompileError::new(
                CompileErrorKind::StrayLoopControl,
                pos,
            ));
        }

        self.asm.ret();
        Ok(start)
    }

    fn compile_body(&mut self, body: &[Statement]) -> Result<(), CompileError> {
        for statement in body {
            self.compile_statement(statement)
                .map_err(|err| err.or_at(statement.pos))?;
        }
        Ok(())
    }

    pub fn compile_statement(
        &mut self,
        statement: &Statement,
    ) -> Result<(), CompileError> {
        let start = self.asm.offset();
        log::trace!("0x{start:04x} {}: {:?}", statement.pos, statement.kind);

        let skip = match &statement.guard {
            Some(guard) => {
                let cond = compile_condition(&mut self.asm, guard)?;
                Some((self.asm.reserve_branch(), cond))
            }
            None => None,
        };

        self.lower(statement)?;

        if let Some((branch, cond)) = skip {
            let end = self.asm.offset();
            log::trace!("guard skip 0x{:04x} -> 0x{end:04x}", branch.offset());
            self.asm.patch_branch(branch, end, cond, true)?;
        }
        Ok(())
    }

    fn lower(&mut self, statement: &Statement) -> Result<(), CompileError> {
        match &statement.kind {
            StatementKind::Assignment { dest, source } => {
                self.assign(machine_register(*dest), source);
            }
            StatementKind::Shorthand { dest, op, source } => {
                self.arithmetic(machine_register(*dest), *op, source);
            }
            StatementKind::Longhand { .. } => {
                return Err(CompileError::new(
                    CompileErrorKind::Unimplemented,
                    statement.pos,
                ));
            }
            StatementKind::Loop { condition, body } => {
                self.lower_loop(condition.as_ref(), body)?;
            }
            StatementKind::Branch {
                condition,
                then_body,
                else_body,
            } => {
                self.lower_branch(condition, then_body, else_body)?;
            }
            StatementKind::Break => {
                let jump = self.asm.reserve_jump();
                self.innermost_loop().breaks.push((jump, statement.pos));
            }
            StatementKind::Continue => {
                let jump = self.asm.reserve_jump();
                self.innermost_loop().continues.push((jump, statement.pos));
            }
            StatementKind::Return => self.asm.ret(),
            StatementKind::Call { procedure } => {
                let call = self.asm.reserve_call();
                self.calls.push((call, procedure.clone()));
            }
            StatementKind::Stdout { source } => self.print_integer(source)?,
            StatementKind::StdoutText { text } => self.print_text(text)?,
            StatementKind::Push { reg } => self.asm.push_r(machine_register(*reg)),
            StatementKind::Pop { reg } => self.asm.pop_r(machine_register(*reg)),
        }
        Ok(())
    }

    fn innermost_loop(&mut self) -> &mut LoopContext {
        if self.loops.is_empty() {
            self.loops.push(LoopContext::default());
        }
        let last = self.loops.len() - 1;
        &mut self.loops[last]
    }

    fn assign(&mut self, dest: Reg, source: &Operand) {
        match source.kind {
            OperandKind::Register(src) => {
                self.asm.mov_rr(dest, machine_register(src))
            }
            OperandKind::Immediate(imm) => self.asm.mov_ri64(dest, imm),
        }
    }

    fn arithmetic(&mut self, dest: Reg, op: Operation, source: &Operand) {
        let alu = match op {
            Operation::Add => Some(AluOp::Add),
            Operation::Sub => Some(AluOp::Sub),
            Operation::And => Some(AluOp::And),
            Operation::Or => Some(AluOp::Or),
            Operation::Xor => Some(AluOp::Xor),
            Operation::Mul | Operation::Div | Operation::Mod => None,
        };
        let asm = &mut self.asm;
        match (source.kind, alu) {
            (OperandKind::Register(src), Some(alu)) => {
                asm.alu_rr(alu, dest, machine_register(src))
            }
            (OperandKind::Immediate(imm), Some(alu)) => {
                asm.alu_ri(alu, dest, imm)
            }
            (OperandKind::Register(src), None) => {
                let src = machine_register(src);
                match op {
                    Operation::Mul => asm.imul_rr(dest, src),
                    Operation::Div => asm.div_rr(dest, src),
                    _ => asm.rem_rr(dest, src),
                }
            }
            (OperandKind::Immediate(imm), None) => match op {
                Operation::Mul => asm.imul_ri(dest, imm),
                Operation::Div => asm.div_ri(dest, imm),
                _ => asm.rem_ri(dest, imm),
            },
        }
    }

    fn lower_loop(
        &mut self,
        condition: Option<&Condition>,
        body: &[Statement],
    ) -> Result<(), CompileError> {
        let start = self.asm.offset();
        let exit = match condition {
            Some(condition) => {
                let cond = compile_condition(&mut self.asm, condition)?;
                Some((self.asm.reserve_branch(), cond))
            }
            None => None,
        };

        self.loops.push(LoopContext::default());
        let compiled = self.compile_body(body);
        let context = self.loops.pop().unwrap_or_default();
        compiled?;
        self.asm.jmp_back(start)?;

        let end = self.asm.offset();
        log::trace!(
            "loop 0x{start:04x}..0x{end:04x}: {} break(s), {} continue(s)",
            context.breaks.len(),
            context.continues.len()
        );
        for (jump, _) in context.breaks {
            self.asm.patch_jump(jump, end)?;
        }
        for (jump, _) in context.continues {
            self.asm.patch_jump(jump, start)?;
        }
        if let Some((branch, cond)) = exit {
            self.asm.patch_branch(branch, end, cond, true)?;
        }
        Ok(())
    }

    fn lower_branch(
        &mut self,
        condition: &Condition,
        then_body: &[Statement],
        else_body: &[Statement],
    ) -> Result<(), CompileError> {
        let cond = compile_condition(&mut self.asm, condition)?;
        let entry = self.asm.reserve_branch();
        self.compile_body(then_body)?;

        if else_body.is_empty() {
            let end = self.asm.offset();
            self.asm.patch_branch(entry, end, cond, true)?;
            return Ok(());
        }

        let over_else = self.asm.reserve_jump();
        let else_start = self.asm.offset();
        self.compile_body(else_body)?;
        let end = self.asm.offset();
        self.asm.patch_branch(entry, else_start, cond, true)?;
        self.asm.patch_jump(over_else, end)?;
        Ok(())
    }

    /// Saves every register, aligns the stack, calls the host function at
    /// `address` and restores everything. `load_args` runs after the
    /// registers are saved and before the stack is realigned.
    fn host_call(
        &mut self,
        address: usize,
        scratch: Reg,
        load_args: impl FnOnce(&mut Assembler) -> Result<(), CompileError>,
    ) -> Result<(), CompileError> {
        let asm = &mut self.asm;
        asm.push_all();
        asm.mov_ri64(scratch, address as i64);
        load_args(asm)?;
        asm.mov_rr(Reg::Rbp, Reg::Rsp);
        asm.and_ri(Reg::Rsp, -16);
        asm.call_r(scratch);
        asm.mov_rr(Reg::Rsp, Reg::Rbp);
        asm.pop_all();
        Ok(())
    }

    fn print_integer(&mut self, source: &Operand) -> Result<(), CompileError> {
        let address = self.intrinsics.print_integer_address();
        let scratch = match source.kind {
            OperandKind::Register(Register::Rax) => Reg::Rbx,
            _ => Reg::Rax,
        };
        self.host_call(address, scratch, |asm| {
            match source.kind {
                OperandKind::Register(Register::Rdi) => {}
                OperandKind::Register(src) => {
                    asm.mov_rr(Reg::Rdi, machine_register(src))
                }
                OperandKind::Immediate(imm) => asm.mov_ri64(Reg::Rdi, imm),
            }
            Ok(())
        })
    }

    fn print_text(&mut self, text: &str) -> Result<(), CompileError> {
        let over_text = self.asm.reserve_jump();
        let range = self.asm.embed_bytes(text.as_bytes());
        log::trace!(
            "text {} byte(s) at 0x{:04x}, skip -> 0x{:04x}",
            range.len(),
            range.start,
            range.end
        );
        self.asm.patch_jump(over_text, range.end)?;

        let address = self.intrinsics.print_text_address();
        let len = range.len() as i64;
        self.host_call(address, Reg::Rax, |asm| {
            asm.lea_rip(Reg::Rdi, range.start)?;
            asm.mov_ri64(Reg::Rsi, len);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parser::{parse_tokens, tokenize};

    fn session() -> CompileSession {
        CompileSession::new(Intrinsics::host())
    }

    fn statements(source: &str) -> Vec<Statement> {
        let wrapped = format!("proc main {{ {source} }}");
        let table = parse_tokens(tokenize(&wrapped).expect("lex")).expect("parse");
        table.get("main").expect("main").body.clone()
    }

    fn compile_main(source: &str) -> Result<CompileSession, CompileError> {
        let wrapped = format!("proc main {{ {source} }}");
        let table = parse_tokens(tokenize(&wrapped).expect("lex")).expect("parse");
        let mut session = session();
        session.compile_procedure(table.get("main").expect("main"))?;
        Ok(session)
    }

    fn rel32_at(bytes: &[u8], at: usize) -> i32 {
        i32::from_le_bytes(bytes[at..at + 4].try_into().expect("4 bytes"))
    }

    #[test]
    fn assignment_uses_full_width_immediate() {
        let mut session = session();
        for statement in statements("rax = 1; r9 = rcx;") {
            session.compile_statement(&statement).expect("compile");
        }
        let mut expected = Assembler::new();
        expected.mov_ri64(Reg::Rax, 1);
        expected.mov_rr(Reg::R9, Reg::Rcx);
        assert_eq!(session.asm.bytes(), expected.bytes());
    }

    #[test]
    fn shorthand_maps_onto_encoder() {
        let mut session = session();
        for statement in statements("rax += 1; rbx -= rcx; rdx *= 3; r8 /= r9;") {
            session.compile_statement(&statement).expect("compile");
        }
        let mut expected = Assembler::new();
        expected.add_ri(Reg::Rax, 1);
        expected.sub_rr(Reg::Rbx, Reg::Rcx);
        expected.imul_ri(Reg::Rdx, 3);
        expected.div_rr(Reg::R8, Reg::R9);
        assert_eq!(session.asm.bytes(), expected.bytes());
    }

    #[test]
    fn guard_skips_exactly_its_statement() {
        let session = compile_main("rax = 7 if rbx == 1;").expect("compile");
        let bytes = session.asm.bytes();
        // cmp rbx, 1 (4 bytes), jne rel32 (6 bytes), mov rax, 7 (10 bytes)
        assert_eq!(&bytes[..4], &[0x48, 0x83, 0xFB, 0x01]);
        assert_eq!(&bytes[4..6], &[0x0F, 0x85]);
        assert_eq!(rel32_at(bytes, 6), 10);
        assert_eq!(bytes[20], 0xC3);
    }

    #[test]
    fn swapped_guard_jumps_on_mirrored_complement() {
        let session = compile_main("rax = 7 if 1 < rbx;").expect("compile");
        let bytes = session.asm.bytes();
        assert_eq!(&bytes[..4], &[0x48, 0x83, 0xFB, 0x01]);
        // `1 < rbx` holds when `rbx > 1`; skip on `rbx <= 1`
        assert_eq!(&bytes[4..6], &[0x0F, 0x8E]);
    }

    #[test]
    fn text_skip_lands_after_the_text() {
        let session = compile_main(r#"<< "hey\n";"#).expect("compile");
        let bytes = session.asm.bytes();
        let ranges = session.asm.data_ranges();
        assert_eq!(ranges.len(), 1);
        let text = ranges[0].clone();
        assert_eq!(text, 5..9);
        assert_eq!(&bytes[text.clone()], b"hey\n");
        assert_eq!(bytes[0], 0xE9);
        let target = 5 + rel32_at(bytes, 1) as usize;
        assert_eq!(target, text.start + text.len());
    }

    #[test]
    fn loop_patches_break_continue_and_exit() {
        let session =
            compile_main("loop (rax < 10) { break if rax == 5; continue; }")
                .expect("compile");
        let bytes = session.asm.bytes();
        assert_eq!(session.asm.pending_placeholders(), 0);
        let end = bytes.len() - 1;
        assert_eq!(bytes[end], 0xC3);

        // cmp rax, 10; jge end
        assert_eq!(&bytes[4..6], &[0x0F, 0x8D]);
        assert_eq!(10 + rel32_at(bytes, 6) as isize, end as isize);
        // cmp rax, 5; jne over the break; jmp end
        assert_eq!(&bytes[14..16], &[0x0F, 0x85]);
        assert_eq!(bytes[20], 0xE9);
        assert_eq!(25 + rel32_at(bytes, 21) as isize, end as isize);
        // continue; jmp start
        assert_eq!(bytes[25], 0xE9);
        assert_eq!(30 + rel32_at(bytes, 26) as isize, 0);
        // back-edge
        assert_eq!(bytes[30], 0xE9);
        assert_eq!(35 + rel32_at(bytes, 31) as isize, 0);
    }

    #[test]
    fn branch_with_else_jumps_over_else() {
        let session =
            compile_main("branch (rax == 1) { rbx = 1; } else { rbx = 2; }")
                .expect("compile");
        let bytes = session.asm.bytes();
        // cmp (4), jne (6), mov (10), jmp (5), mov (10), ret
        assert_eq!(&bytes[4..6], &[0x0F, 0x85]);
        assert_eq!(10 + rel32_at(bytes, 6), 25);
        assert_eq!(bytes[20], 0xE9);
        assert_eq!(25 + rel32_at(bytes, 21), 35);
        assert_eq!(bytes[35], 0xC3);
    }

    #[test]
    fn longhand_is_unimplemented() {
        let err = compile_main("rax = rbx + 1;").expect_err("longhand");
        assert_eq!(err.kind, CompileErrorKind::Unimplemented);
        assert_eq!(err.pos.line, 1);
        assert_eq!(err.pos.column, 13);
    }

    #[test]
    fn stray_break_is_reported_at_the_statement() {
        let err = compile_main("rax = 1; break;").expect_err("stray");
        assert_eq!(err.kind, CompileErrorKind::StrayLoopControl);
        assert_eq!(err.pos.column, 22);
    }

    #[test]
    fn continue_inside_loop_is_not_stray() {
        compile_main("loop { continue if rax == 0; break; }").expect("compile");
    }

    #[test]
    fn two_immediate_guard_is_rejected() {
        let err = compile_main("rax = 1 if 1 == 2;").expect_err("two immediates");
        assert_eq!(err.kind, CompileErrorKind::UnsupportedComparison);
    }

    #[test]
    fn calls_are_recorded_for_resolution() {
        let session = compile_main("helper; other;").expect("compile");
        let names: Vec<_> = session.calls.iter().map(|(_, n)| n.as_str()).collect();
        assert_eq!(names, vec!["helper", "other"]);
        assert_eq!(session.asm.pending_placeholders(), 2);
    }

    #[test]
    fn print_integer_aligns_and_restores_stack() {
        let session = compile_main("<< rax;").expect("compile");
        let bytes = session.asm.bytes();
        let intrinsics = Intrinsics::host();
        let mut expected = Assembler::new();
        expected.push_all();
        expected.mov_ri64(Reg::Rbx, intrinsics.print_integer_address() as i64);
        expected.mov_rr(Reg::Rdi, Reg::Rax);
        expected.mov_rr(Reg::Rbp, Reg::Rsp);
        expected.and_ri(Reg::Rsp, -16);
        expected.call_r(Reg::Rbx);
        expected.mov_rr(Reg::Rsp, Reg::Rbp);
        expected.pop_all();
        expected.ret();
        assert_eq!(bytes, expected.bytes());
    }

    #[test]
    fn print_integer_from_rdi_skips_the_move() {
        let with_rdi = compile_main("<< rdi;").expect("compile");
        let with_rsi = compile_main("<< rsi;").expect("compile");
        assert_eq!(with_rdi.asm.bytes().len() + 3, with_rsi.asm.bytes().len());
    }

    #[test]
    fn encoder_errors_take_the_statement_position() {
        let err = CompileError::from(AssemblerError::UnpatchedPlaceholders {
            count: 1,
        })
        .or_at(Pos::new(3, 1, 4));
        assert_eq!(err.pos, Pos::new(3, 1, 4));
        let err = CompileError::new(CompileErrorKind::Unimplemented, Pos::unknown())
            .or_at(Pos::new(3, 1, 4));
        assert_eq!(err.pos, Pos::unknown());
    }

    #[test]
    fn error_messages() {
        let err = CompileError::new(
            CompileErrorKind::UndefinedProcedure("foo".into()),
            Pos::unknown(),
        );
        assert_eq!(
            err.to_string(),
            "Calling procedure \"foo\", which doesn't exist. at 0:0"
        );
        assert_eq!(
            CompileErrorKind::UnsupportedComparison.to_string(),
            "Unsupported comparison operand type combination."
        );
    }
}
