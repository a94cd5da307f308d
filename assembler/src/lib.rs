//! x86-64 machine code emission for the register language.
//!
//! The encoder appends one instruction per call to a growing byte buffer.
//! Forward references are handled by reserving a fixed-size placeholder and
//! patching it once the target offset is known; see [`x64::PendingJump`],
//! [`x64::PendingBranch`] and [`x64::PendingCall`].

pub mod x64;

pub use x64::{
    AluOp, AssembledCode, Assembler, AssemblerError, Cond, DisasmError,
    DisasmOptions, PendingBranch, PendingCall, PendingJump, Reg, ScratchSlot,
    disassemble, disassemble_with_options,
};
