use std::fmt;
use std::ops::Range;

use super::disassembler::{
    DisasmError, DisasmOptions, disassemble_with_options,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssemblerError {
    RelativeOutOfRange { at: usize, target: usize },
    TargetOutOfBounds { at: usize, target: usize },
    UnpatchedPlaceholders { count: usize },
    ScratchSectionOpen,
}

impl fmt::Display for AssemblerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RelativeOutOfRange { at, target } => {
                write!(
                    f,
                    "relative displacement from 0x{at:04x} to 0x{target:04x} \
                     is out of range"
                )
            }
            Self::TargetOutOfBounds { at, target } => {
                write!(
                    f,
                    "target 0x{target:04x} of placeholder at 0x{at:04x} lies \
                     outside the code buffer"
                )
            }
            Self::UnpatchedPlaceholders { count } => {
                write!(f, "{count} placeholder(s) were never patched")
            }
            Self::ScratchSectionOpen => {
                write!(f, "scratch section still open at finish")
            }
        }
    }
}

impl std::error::Error for AssemblerError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Reg {
    Rax,
    Rcx,
    Rdx,
    Rbx,
    Rsp,
    Rbp,
    Rsi,
    Rdi,
    R8,
    R9,
    R10,
    R11,
    R12,
    R13,
    R14,
    R15,
}

impl Reg {
    /// Registers saved by [`Assembler::push_all`], in push order.
    /// `rsp` is never part of the set.
    pub const SAVED: [Reg; 15] = [
        Reg::Rax,
        Reg::Rbx,
        Reg::Rcx,
        Reg::Rdx,
        Reg::Rsi,
        Reg::Rdi,
        Reg::Rbp,
        Reg::R8,
        Reg::R9,
        Reg::R10,
        Reg::R11,
        Reg::R12,
        Reg::R13,
        Reg::R14,
        Reg::R15,
    ];

    /// 4-bit hardware encoding.
    #[inline]
    pub fn enc(self) -> u8 {
        match self {
            Self::Rax => 0,
            Self::Rcx => 1,
            Self::Rdx => 2,
            Self::Rbx => 3,
            Self::Rsp => 4,
            Self::Rbp => 5,
            Self::Rsi => 6,
            Self::Rdi => 7,
            Self::R8 => 8,
            Self::R9 => 9,
            Self::R10 => 10,
            Self::R11 => 11,
            Self::R12 => 12,
            Self::R13 => 13,
            Self::R14 => 14,
            Self::R15 => 15,
        }
    }

    #[inline]
    fn low3(self) -> u8 {
        self.enc() & 0b111
    }

    #[inline]
    fn high(self) -> bool {
        (self.enc() & 0b1000) != 0
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Rax => "rax",
            Self::Rcx => "rcx",
            Self::Rdx => "rdx",
            Self::Rbx => "rbx",
            Self::Rsp => "rsp",
            Self::Rbp => "rbp",
            Self::Rsi => "rsi",
            Self::Rdi => "rdi",
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
}

impl fmt::Display for Reg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Signed comparison outcome tested by a conditional jump.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cond {
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    Equal,
    NotEqual,
}

impl Cond {
    /// Condition code nibble (`0F 80+cc` for the rel32 form).
    #[inline]
    pub fn code(self) -> u8 {
        match self {
            Self::Equal => 0x4,
            Self::NotEqual => 0x5,
            Self::Less => 0xC,
            Self::GreaterEqual => 0xD,
            Self::LessEqual => 0xE,
            Self::Greater => 0xF,
        }
    }

    /// Logical negation: the jump taken exactly when `self` is not.
    pub fn complement(self) -> Self {
        match self {
            Self::Less => Self::GreaterEqual,
            Self::LessEqual => Self::Greater,
            Self::Greater => Self::LessEqual,
            Self::GreaterEqual => Self::Less,
            Self::Equal => Self::NotEqual,
            Self::NotEqual => Self::Equal,
        }
    }

    /// The same relation with its operands exchanged: `a < b` is `b > a`.
    pub fn mirror(self) -> Self {
        match self {
            Self::Less => Self::Greater,
            Self::LessEqual => Self::GreaterEqual,
            Self::Greater => Self::Less,
            Self::GreaterEqual => Self::LessEqual,
            Self::Equal => Self::Equal,
            Self::NotEqual => Self::NotEqual,
        }
    }
}

/// Two-operand integer ops sharing the `01 /r` and `81 /n` / `83 /n` shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AluOp {
    Add,
    Or,
    And,
    Sub,
    Xor,
    Cmp,
}

impl AluOp {
    #[inline]
    fn rr_opcode(self) -> u8 {
        match self {
            Self::Add => 0x01,
            Self::Or => 0x09,
            Self::And => 0x21,
            Self::Sub => 0x29,
            Self::Xor => 0x31,
            Self::Cmp => 0x39,
        }
    }

    #[inline]
    fn ext(self) -> u8 {
        match self {
            Self::Add => 0,
            Self::Or => 1,
            Self::And => 4,
            Self::Sub => 5,
            Self::Xor => 6,
            Self::Cmp => 7,
        }
    }
}

/// Bytes below `rsp` that signal handlers leave alone (System V red zone).
const RED_ZONE_BYTES: i32 = 128;

/// Named 8-byte slots below the stack pointer used by multi-instruction
/// sequences that need temporary storage.
///
/// A slot is only live inside one scratch section. Sections never nest and
/// never contain a push, pop or call, so `rsp` is stable while a slot is
/// live.
/// `Spill` and `SavedRax` share a slot: the large-immediate spill and the
/// division sequence are separate sections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScratchSlot {
    Spill,
    SavedRax,
    SavedRdx,
    SavedRbx,
    Result,
    Divisor,
}

impl ScratchSlot {
    /// Number of slots the frame occupies.
    pub const DEPTH: i32 = 5;

    /// Slot index relative to `rsp`, in 8-byte units.
    pub const fn index(self) -> i32 {
        match self {
            Self::Spill | Self::SavedRax => -1,
            Self::SavedRdx => -2,
            Self::SavedRbx => -3,
            Self::Result => -4,
            Self::Divisor => -5,
        }
    }
}

const _: () = assert!(ScratchSlot::DEPTH * 8 <= RED_ZONE_BYTES);

const JUMP_LEN: usize = 5;
const BRANCH_LEN: usize = 6;
const CALL_LEN: usize = 5;
const NOP: u8 = 0x90;

/// Reserved 5-byte unconditional jump. Consumed by [`Assembler::patch_jump`].
#[derive(Debug, PartialEq, Eq)]
#[must_use = "a reserved jump must be patched"]
pub struct PendingJump(usize);

/// Reserved 6-byte conditional jump. Consumed by [`Assembler::patch_branch`].
#[derive(Debug, PartialEq, Eq)]
#[must_use = "a reserved branch must be patched"]
pub struct PendingBranch(usize);

/// Reserved 5-byte relative call. Consumed by [`Assembler::patch_call`].
#[derive(Debug, PartialEq, Eq)]
#[must_use = "a reserved call must be patched"]
pub struct PendingCall(usize);

impl PendingJump {
    pub fn offset(&self) -> usize {
        self.0
    }
}

impl PendingBranch {
    pub fn offset(&self) -> usize {
        self.0
    }
}

impl PendingCall {
    pub fn offset(&self) -> usize {
        self.0
    }
}

#[derive(Clone, Copy)]
enum Divisor {
    Reg(Reg),
    Imm(i64),
}

#[derive(Clone, Copy)]
enum DivPart {
    Quotient,
    Remainder,
}

#[derive(Debug, Default)]
pub struct Assembler {
    bytes: Vec<u8>,
    data: Vec<Range<usize>>,
    pending: usize,
    scratch_open: bool,
}

impl Assembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current end of the buffer; the offset the next instruction lands at.
    #[inline]
    pub fn offset(&self) -> usize {
        self.bytes.len()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Byte ranges holding embedded data rather than instructions.
    pub fn data_ranges(&self) -> &[Range<usize>] {
        &self.data
    }

    /// Number of reserved placeholders not yet patched.
    pub fn pending_placeholders(&self) -> usize {
        self.pending
    }

    // ── Moves ───────────────────────────────────────────────────

    pub fn mov_rr(&mut self, dst: Reg, src: Reg) {
        self.emit_rex(true, src.high(), false, dst.high());
        self.emit_u8(0x89);
        self.emit_modrm(0b11, src.low3(), dst.low3());
    }

    /// `mov r64, imm64`; always embeds all eight immediate bytes.
    pub fn mov_ri64(&mut self, dst: Reg, imm: i64) {
        self.emit_rex(true, false, false, dst.high());
        self.emit_u8(0xB8 + dst.low3());
        self.emit_u64(imm as u64);
    }

    /// `lea dst, [rip + disp32]` addressing the absolute buffer offset
    /// `target`.
    pub fn lea_rip(
        &mut self,
        dst: Reg,
        target: usize,
    ) -> Result<(), AssemblerError> {
        let at = self.offset();
        let instr_end = at + 7;
        let disp = rel32(at, instr_end, target)?;
        self.emit_rex(true, dst.high(), false, false);
        self.emit_u8(0x8D);
        self.emit_modrm(0b00, dst.low3(), 0b101);
        self.emit_u32(disp as u32);
        Ok(())
    }

    pub fn store_slot(&mut self, slot: ScratchSlot, src: Reg) {
        debug_assert!(self.scratch_open, "scratch slot used outside section");
        self.store_stack(slot.index(), src);
    }

    pub fn load_slot(&mut self, dst: Reg, slot: ScratchSlot) {
        debug_assert!(self.scratch_open, "scratch slot used outside section");
        self.load_stack(dst, slot.index());
    }

    // ── Arithmetic / bitwise ────────────────────────────────────

    pub fn alu_rr(&mut self, op: AluOp, dst: Reg, src: Reg) {
        self.emit_rex(true, src.high(), false, dst.high());
        self.emit_u8(op.rr_opcode());
        self.emit_modrm(0b11, src.low3(), dst.low3());
    }

    /// Register/immediate form using the narrowest immediate that holds
    /// `imm`. Values outside the signed 32-bit range go through a spilled
    /// scratch register instead.
    pub fn alu_ri(&mut self, op: AluOp, dst: Reg, imm: i64) {
        if fits_i8(imm) {
            self.emit_rex(true, false, false, dst.high());
            self.emit_u8(0x83);
            self.emit_modrm(0b11, op.ext(), dst.low3());
            self.emit_u8(imm as i8 as u8);
        } else if fits_i32(imm) {
            self.emit_rex(true, false, false, dst.high());
            self.emit_u8(0x81);
            self.emit_modrm(0b11, op.ext(), dst.low3());
            self.emit_u32(imm as i32 as u32);
        } else {
            self.with_spilled_immediate(dst, imm, |a, tmp| {
                a.alu_rr(op, dst, tmp)
            });
        }
    }

    pub fn add_rr(&mut self, dst: Reg, src: Reg) {
        self.alu_rr(AluOp::Add, dst, src);
    }

    pub fn sub_rr(&mut self, dst: Reg, src: Reg) {
        self.alu_rr(AluOp::Sub, dst, src);
    }

    pub fn and_rr(&mut self, dst: Reg, src: Reg) {
        self.alu_rr(AluOp::And, dst, src);
    }

    pub fn or_rr(&mut self, dst: Reg, src: Reg) {
        self.alu_rr(AluOp::Or, dst, src);
    }

    pub fn xor_rr(&mut self, dst: Reg, src: Reg) {
        self.alu_rr(AluOp::Xor, dst, src);
    }

    pub fn add_ri(&mut self, dst: Reg, imm: i64) {
        self.alu_ri(AluOp::Add, dst, imm);
    }

    pub fn sub_ri(&mut self, dst: Reg, imm: i64) {
        self.alu_ri(AluOp::Sub, dst, imm);
    }

    pub fn and_ri(&mut self, dst: Reg, imm: i64) {
        self.alu_ri(AluOp::And, dst, imm);
    }

    pub fn or_ri(&mut self, dst: Reg, imm: i64) {
        self.alu_ri(AluOp::Or, dst, imm);
    }

    pub fn xor_ri(&mut self, dst: Reg, imm: i64) {
        self.alu_ri(AluOp::Xor, dst, imm);
    }

    /// `imul dst, src` (`0F AF /r`).
    pub fn imul_rr(&mut self, dst: Reg, src: Reg) {
        self.emit_rex(true, dst.high(), false, src.high());
        self.emit_u8(0x0F);
        self.emit_u8(0xAF);
        self.emit_modrm(0b11, dst.low3(), src.low3());
    }

    /// `imul dst, dst, imm` with the same width selection as [`alu_ri`].
    ///
    /// [`alu_ri`]: Assembler::alu_ri
    pub fn imul_ri(&mut self, dst: Reg, imm: i64) {
        if fits_i8(imm) {
            self.emit_rex(true, dst.high(), false, dst.high());
            self.emit_u8(0x6B);
            self.emit_modrm(0b11, dst.low3(), dst.low3());
            self.emit_u8(imm as i8 as u8);
        } else if fits_i32(imm) {
            self.emit_rex(true, dst.high(), false, dst.high());
            self.emit_u8(0x69);
            self.emit_modrm(0b11, dst.low3(), dst.low3());
            self.emit_u32(imm as i32 as u32);
        } else {
            self.with_spilled_immediate(dst, imm, |a, tmp| a.imul_rr(dst, tmp));
        }
    }

    /// `dst = dst / src`, truncating toward zero.
    pub fn div_rr(&mut self, dst: Reg, src: Reg) {
        self.divide(dst, Divisor::Reg(src), DivPart::Quotient);
    }

    pub fn div_ri(&mut self, dst: Reg, imm: i64) {
        self.divide(dst, Divisor::Imm(imm), DivPart::Quotient);
    }

    /// `dst = dst % src`; the result takes the sign of the dividend.
    pub fn rem_rr(&mut self, dst: Reg, src: Reg) {
        self.divide(dst, Divisor::Reg(src), DivPart::Remainder);
    }

    pub fn rem_ri(&mut self, dst: Reg, imm: i64) {
        self.divide(dst, Divisor::Imm(imm), DivPart::Remainder);
    }

    /// Sign-extends `rax` into `rdx`.
    pub fn cqo(&mut self) {
        self.emit_u8(0x48);
        self.emit_u8(0x99);
    }

    /// `idiv divisor`: `rdx:rax / divisor`, quotient in `rax`, remainder in
    /// `rdx`.
    pub fn idiv_r(&mut self, divisor: Reg) {
        self.emit_rex(true, false, false, divisor.high());
        self.emit_u8(0xF7);
        self.emit_modrm(0b11, 7, divisor.low3());
    }

    // ── Comparisons ─────────────────────────────────────────────

    pub fn cmp_rr(&mut self, lhs: Reg, rhs: Reg) {
        self.alu_rr(AluOp::Cmp, lhs, rhs);
    }

    pub fn cmp_ri(&mut self, lhs: Reg, imm: i64) {
        self.alu_ri(AluOp::Cmp, lhs, imm);
    }

    /// There is no `cmp imm, reg`; the operands are swapped into
    /// `cmp reg, imm` and the returned flag is `inverted` toggled. A set
    /// flag means the flags describe `rhs` against `lhs`; see
    /// [`Cond::mirror`].
    pub fn cmp_ir(&mut self, lhs: i64, rhs: Reg, inverted: bool) -> bool {
        self.cmp_ri(rhs, lhs);
        !inverted
    }

    // ── Stack and calls ─────────────────────────────────────────

    pub fn push_r(&mut self, reg: Reg) {
        debug_assert!(!self.scratch_open, "push inside a scratch section");
        self.emit_rex(false, false, false, reg.high());
        self.emit_u8(0x50 + reg.low3());
    }

    pub fn pop_r(&mut self, reg: Reg) {
        debug_assert!(!self.scratch_open, "pop inside a scratch section");
        self.emit_rex(false, false, false, reg.high());
        self.emit_u8(0x58 + reg.low3());
    }

    pub fn push_all(&mut self) {
        for reg in Reg::SAVED {
            self.push_r(reg);
        }
    }

    pub fn pop_all(&mut self) {
        for reg in Reg::SAVED.into_iter().rev() {
            self.pop_r(reg);
        }
    }

    /// `call reg` (`FF /2`).
    pub fn call_r(&mut self, reg: Reg) {
        debug_assert!(!self.scratch_open, "call inside a scratch section");
        self.emit_rex(false, false, false, reg.high());
        self.emit_u8(0xFF);
        self.emit_modrm(0b11, 2, reg.low3());
    }

    pub fn ret(&mut self) {
        self.emit_u8(0xC3);
    }

    // ── Embedded data ───────────────────────────────────────────

    /// Appends raw bytes that are data, not instructions. The caller must
    /// make sure control flow never falls into them.
    pub fn embed_bytes(&mut self, data: &[u8]) -> Range<usize> {
        let start = self.offset();
        self.bytes.extend_from_slice(data);
        let range = start..self.offset();
        self.data.push(range.clone());
        range
    }

    // ── Placeholders and backpatching ───────────────────────────

    pub fn reserve_jump(&mut self) -> PendingJump {
        PendingJump(self.reserve(JUMP_LEN))
    }

    pub fn reserve_branch(&mut self) -> PendingBranch {
        PendingBranch(self.reserve(BRANCH_LEN))
    }

    pub fn reserve_call(&mut self) -> PendingCall {
        PendingCall(self.reserve(CALL_LEN))
    }

    /// Rewrites a reserved jump as `jmp rel32` to `target`.
    pub fn patch_jump(
        &mut self,
        jump: PendingJump,
        target: usize,
    ) -> Result<(), AssemblerError> {
        let at = jump.0;
        let disp = self.checked_rel32(at, at + JUMP_LEN, target)?;
        self.bytes[at] = 0xE9;
        self.write_i32(at + 1, disp);
        self.pending -= 1;
        Ok(())
    }

    /// Rewrites a reserved branch as `jcc rel32` to `target`. The jump is
    /// taken when `cond` holds, or when its complement holds if `inverted`.
    pub fn patch_branch(
        &mut self,
        branch: PendingBranch,
        target: usize,
        cond: Cond,
        inverted: bool,
    ) -> Result<(), AssemblerError> {
        let at = branch.0;
        let disp = self.checked_rel32(at, at + BRANCH_LEN, target)?;
        let cond = if inverted { cond.complement() } else { cond };
        self.bytes[at] = 0x0F;
        self.bytes[at + 1] = 0x80 | cond.code();
        self.write_i32(at + 2, disp);
        self.pending -= 1;
        Ok(())
    }

    /// Rewrites a reserved call as `call rel32` to `target`.
    pub fn patch_call(
        &mut self,
        call: PendingCall,
        target: usize,
    ) -> Result<(), AssemblerError> {
        let at = call.0;
        let disp = self.checked_rel32(at, at + CALL_LEN, target)?;
        self.bytes[at] = 0xE8;
        self.write_i32(at + 1, disp);
        self.pending -= 1;
        Ok(())
    }

    /// Unconditional jump to an already-emitted offset.
    pub fn jmp_back(&mut self, target: usize) -> Result<(), AssemblerError> {
        let jump = self.reserve_jump();
        self.patch_jump(jump, target)
    }

    pub fn finish(self) -> Result<AssembledCode, AssemblerError> {
        if self.scratch_open {
            return Err(AssemblerError::ScratchSectionOpen);
        }
        if self.pending != 0 {
            return Err(AssemblerError::UnpatchedPlaceholders {
                count: self.pending,
            });
        }
        Ok(AssembledCode {
            bytes: self.bytes,
            data: self.data,
        })
    }

    // ── Internals ───────────────────────────────────────────────

    fn reserve(&mut self, len: usize) -> usize {
        let at = self.offset();
        self.bytes.resize(at + len, NOP);
        self.pending += 1;
        at
    }

    fn checked_rel32(
        &self,
        at: usize,
        instr_end: usize,
        target: usize,
    ) -> Result<i32, AssemblerError> {
        if target > self.offset() {
            return Err(AssemblerError::TargetOutOfBounds { at, target });
        }
        rel32(at, instr_end, target)
    }

    fn scratch_section(&mut self, emit: impl FnOnce(&mut Self)) {
        debug_assert!(!self.scratch_open, "nested scratch section");
        self.scratch_open = true;
        emit(self);
        self.scratch_open = false;
    }

    fn with_spilled_immediate(
        &mut self,
        dst: Reg,
        imm: i64,
        op: impl FnOnce(&mut Self, Reg),
    ) {
        let tmp = scratch_for(dst);
        self.scratch_section(|a| {
            a.store_slot(ScratchSlot::Spill, tmp);
            a.mov_ri64(tmp, imm);
            op(a, tmp);
            a.load_slot(tmp, ScratchSlot::Spill);
        });
    }

    fn divide(&mut self, dst: Reg, divisor: Divisor, part: DivPart) {
        self.scratch_section(|a| {
            a.store_slot(ScratchSlot::SavedRax, Reg::Rax);
            a.store_slot(ScratchSlot::SavedRdx, Reg::Rdx);
            a.store_slot(ScratchSlot::SavedRbx, Reg::Rbx);

            a.store_slot(ScratchSlot::Result, dst);
            if let Divisor::Reg(src) = divisor {
                a.store_slot(ScratchSlot::Divisor, src);
            }

            a.load_slot(Reg::Rax, ScratchSlot::Result);
            match divisor {
                Divisor::Reg(_) => a.load_slot(Reg::Rbx, ScratchSlot::Divisor),
                Divisor::Imm(imm) => a.mov_ri64(Reg::Rbx, imm),
            }
            a.cqo();
            a.idiv_r(Reg::Rbx);
            let result = match part {
                DivPart::Quotient => Reg::Rax,
                DivPart::Remainder => Reg::Rdx,
            };
            a.store_slot(ScratchSlot::Result, result);

            a.load_slot(Reg::Rax, ScratchSlot::SavedRax);
            a.load_slot(Reg::Rdx, ScratchSlot::SavedRdx);
            a.load_slot(Reg::Rbx, ScratchSlot::SavedRbx);

            a.load_slot(dst, ScratchSlot::Result);
        });
    }

    /// `mov [rsp + index*8], src`.
    fn store_stack(&mut self, index: i32, src: Reg) {
        self.emit_rex(true, src.high(), false, false);
        self.emit_u8(0x89);
        self.emit_rsp_disp(src.low3(), index);
    }

    /// `mov dst, [rsp + index*8]`.
    fn load_stack(&mut self, dst: Reg, index: i32) {
        self.emit_rex(true, dst.high(), false, false);
        self.emit_u8(0x8B);
        self.emit_rsp_disp(dst.low3(), index);
    }

    fn emit_rsp_disp(&mut self, reg: u8, index: i32) {
        let disp = i64::from(index) * 8;
        if fits_i8(disp) {
            self.emit_modrm(0b01, reg, 0b100);
            self.emit_sib(0b00, 0b100, Reg::Rsp.low3());
            self.emit_u8(disp as i8 as u8);
        } else {
            self.emit_modrm(0b10, reg, 0b100);
            self.emit_sib(0b00, 0b100, Reg::Rsp.low3());
            self.emit_u32(disp as i32 as u32);
        }
    }

    #[inline]
    fn write_i32(&mut self, at: usize, v: i32) {
        self.bytes[at..at + 4].copy_from_slice(&v.to_le_bytes());
    }

    #[inline]
    fn emit_u8(&mut self, v: u8) {
        self.bytes.push(v);
    }

    #[inline]
    fn emit_u32(&mut self, v: u32) {
        self.bytes.extend_from_slice(&v.to_le_bytes());
    }

    #[inline]
    fn emit_u64(&mut self, v: u64) {
        self.bytes.extend_from_slice(&v.to_le_bytes());
    }

    #[inline]
    fn emit_modrm(&mut self, mode: u8, reg: u8, rm: u8) {
        debug_assert!(mode < 4);
        debug_assert!(reg < 8);
        debug_assert!(rm < 8);
        self.emit_u8((mode << 6) | ((reg & 7) << 3) | (rm & 7));
    }

    #[inline]
    fn emit_sib(&mut self, scale: u8, index: u8, base: u8) {
        self.emit_u8((scale << 6) | ((index & 7) << 3) | (base & 7));
    }

    #[inline]
    fn emit_rex(&mut self, w: bool, r: bool, x: bool, b: bool) {
        let rex = 0x40
            | ((w as u8) << 3)
            | ((r as u8) << 2)
            | ((x as u8) << 1)
            | (b as u8);
        if rex != 0x40 {
            self.emit_u8(rex);
        }
    }
}

#[inline]
fn fits_i8(v: i64) -> bool {
    i8::try_from(v).is_ok()
}

#[inline]
fn fits_i32(v: i64) -> bool {
    i32::try_from(v).is_ok()
}

/// The register spilled to hold an out-of-range immediate for `dst`.
#[inline]
fn scratch_for(dst: Reg) -> Reg {
    if dst != Reg::Rax { Reg::Rax } else { Reg::Rbx }
}

fn rel32(
    at: usize,
    instr_end: usize,
    target: usize,
) -> Result<i32, AssemblerError> {
    let disp = (target as i64) - (instr_end as i64);
    i32::try_from(disp)
        .map_err(|_| AssemblerError::RelativeOutOfRange { at, target })
}

/// Finished machine code plus the ranges of embedded data inside it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledCode {
    bytes: Vec<u8>,
    data: Vec<Range<usize>>,
}

impl AssembledCode {
    pub fn machine_code(&self) -> &[u8] {
        &self.bytes
    }

    pub fn data_ranges(&self) -> &[Range<usize>] {
        &self.data
    }

    pub fn into_parts(self) -> (Vec<u8>, Vec<Range<usize>>) {
        (self.bytes, self.data)
    }

    pub fn disassemble(&self) -> Result<String, DisasmError> {
        disassemble_with_options(
            &self.bytes,
            &DisasmOptions {
                data_ranges: &self.data,
                ..Default::default()
            },
        )
    }

    pub fn disassemble_with_options(
        &self,
        options: &DisasmOptions<'_>,
    ) -> Result<String, DisasmError> {
        if options.data_ranges.is_empty() && !self.data.is_empty() {
            return disassemble_with_options(
                &self.bytes,
                &DisasmOptions {
                    symbol_resolver: options.symbol_resolver,
                    data_ranges: &self.data,
                },
            );
        }
        disassemble_with_options(&self.bytes, options)
    }
}
