//! Whole-program compilation: every procedure, the entry trampoline, and
//! call resolution.

use std::ops::Range;

use assembler::{AssembledCode, DisasmError, DisasmOptions};
use parser::{Pos, ProcedureTable};

use crate::compiler::{CompileError, CompileErrorKind, CompileSession};
use crate::intrinsics::Intrinsics;

/// Name of the procedure the trampoline calls.
pub const ENTRY_PROCEDURE: &str = "main";

/// Finished machine code for one program, ready for the loader.
#[derive(Debug, Clone)]
pub struct CompiledProgram {
    code: AssembledCode,
    entry: usize,
    procedures: Vec<(String, usize)>,
    intrinsics: Intrinsics,
}

impl CompiledProgram {
    pub fn machine_code(&self) -> &[u8] {
        self.code.machine_code()
    }

    /// Offset of the trampoline, the program's only entry point.
    pub fn entry(&self) -> usize {
        self.entry
    }

    /// `(name, offset)` pairs in declaration order.
    pub fn procedures(&self) -> &[(String, usize)] {
        &self.procedures
    }

    pub fn procedure_offset(&self, name: &str) -> Option<usize> {
        self.procedures
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, offset)| *offset)
    }

    /// Embedded string literals.
    pub fn data_ranges(&self) -> &[Range<usize>] {
        self.code.data_ranges()
    }

    pub fn intrinsics(&self) -> &Intrinsics {
        &self.intrinsics
    }

    /// Disassembly with procedure names and the trampoline as labels.
    pub fn disassemble(&self) -> Result<String, DisasmError> {
        let resolver = |offset: usize| -> Option<String> {
            if offset == self.entry {
                return Some("<entry>".to_string());
            }
            self.procedures
                .iter()
                .find(|(_, at)| *at == offset)
                .map(|(name, _)| name.clone())
        };
        self.code.disassemble_with_options(&DisasmOptions {
            symbol_resolver: Some(&resolver),
            data_ranges: self.code.data_ranges(),
        })
    }
}

impl CompileSession {
    /// Emits the trampoline: save every register, call `main`, restore,
    /// return. Returns its offset.
    pub fn emit_entry_trampoline(&mut self) -> usize {
        let entry = self.asm.offset();
        self.asm.push_all();
        let call = self.asm.reserve_call();
        self.calls.push((call, ENTRY_PROCEDURE.to_string()));
        self.asm.pop_all();
        self.asm.ret();
        entry
    }

    /// Patches every recorded call site with its callee's offset.
    pub fn resolve_calls(&mut self) -> Result<(), CompileError> {
        for (call, name) in std::mem::take(&mut self.calls) {
            let Some(&(_, target)) =
                self.procedures.iter().find(|(n, _)| *n == name)
            else {
                return Err(CompileError::new(
                    CompileErrorKind::UndefinedProcedure(name),
                    Pos::unknown(),
                ));
            };
            log::trace!(
                "call 0x{:04x} -> {name} at 0x{target:04x}",
                call.offset()
            );
            self.asm.patch_call(call, target)?;
        }
        Ok(())
    }

    pub fn finish(self, entry: usize) -> Result<CompiledProgram, CompileError> {
        let code = self.asm.finish()?;
        Ok(CompiledProgram {
            code,
            entry,
            procedures: self.procedures,
            intrinsics: self.intrinsics,
        })
    }
}

/// Compiles `table` into one buffer whose entry runs `main`.
pub fn compile_program(
    table: &ProcedureTable,
    intrinsics: Intrinsics,
) -> Result<CompiledProgram, CompileError> {
    let mut session = CompileSession::new(intrinsics);
    for procedure in table {
        session.compile_procedure(procedure)?;
    }
    let entry = session.emit_entry_trampoline();
    session.resolve_calls()?;
    log::debug!(
        "compiled {} procedure(s), {} byte(s), entry 0x{entry:04x}",
        session.procedures.len(),
        session.offset()
    );
    session.finish(entry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use parser::{parse_tokens, tokenize};

    fn compile(source: &str) -> Result<CompiledProgram, CompileError> {
        let table = parse_tokens(tokenize(source).expect("lex")).expect("parse");
        compile_program(&table, Intrinsics::host())
    }

    fn rel32_at(bytes: &[u8], at: usize) -> i32 {
        i32::from_le_bytes(bytes[at..at + 4].try_into().expect("4 bytes"))
    }

    #[test]
    fn trampoline_follows_procedures_and_calls_main() {
        let program =
            compile("proc helper { return; } proc main { helper; }").expect("compile");
        let code = program.machine_code();
        assert_eq!(program.procedure_offset("helper"), Some(0));
        // helper: ret; ret
        assert_eq!(program.procedure_offset("main"), Some(2));
        // main: call helper (5 bytes); ret
        assert_eq!(program.entry(), 8);
        assert_eq!(code[2], 0xE8);
        assert_eq!(7 + rel32_at(code, 3), 0);

        // push_all is 15 pushes, 8 of them with a REX prefix
        let call_at = program.entry() + 15 + 8;
        assert_eq!(code[call_at], 0xE8);
        assert_eq!(call_at as i32 + 5 + rel32_at(code, call_at + 1), 2);
        assert_eq!(*code.last().expect("ret"), 0xC3);
    }

    #[test]
    fn undefined_procedure_is_reported_without_position() {
        let err = compile("proc main { nope; }").expect_err("undefined");
        assert_eq!(err.kind, CompileErrorKind::UndefinedProcedure("nope".into()));
        assert_eq!(err.pos, Pos::unknown());
    }

    #[test]
    fn missing_main_is_an_undefined_procedure() {
        let err = compile("proc other { }").expect_err("no main");
        assert_eq!(err.kind, CompileErrorKind::UndefinedProcedure("main".into()));
        assert_eq!((err.pos.line, err.pos.column), (0, 0));
    }

    #[test]
    fn procedures_keep_declaration_order() {
        let program = compile("proc b { } proc main { } proc a { }").expect("compile");
        let names: Vec<_> = program.procedures().iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["b", "main", "a"]);
    }

    #[test]
    fn disassembly_names_procedures() {
        let program = compile(r#"proc main { << "hi"; }"#).expect("compile");
        let listing = program.disassemble().expect("disassemble");
        assert!(listing.contains("main"), "{listing}");
        assert!(listing.contains("<entry>"), "{listing}");
        assert!(listing.contains(".ascii \"hi\""), "{listing}");
        assert_eq!(program.data_ranges().len(), 1);
    }
}
