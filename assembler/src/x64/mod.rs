mod assembler;
mod disassembler;

pub use assembler::{
    AluOp, AssembledCode, Assembler, AssemblerError, Cond, PendingBranch,
    PendingCall, PendingJump, Reg, ScratchSlot,
};
pub use disassembler::{
    DisasmError, DisasmOptions, disassemble, disassemble_with_options,
};
