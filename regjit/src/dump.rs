//! `--dump-code` output.

use std::fmt::Write;

use assembler::DisasmError;

use crate::program::CompiledProgram;

const BYTES_PER_LINE: usize = 16;

/// Entry point, intrinsic bindings, procedure offsets, raw bytes and a
/// disassembly of `program`.
pub fn dump_code(program: &CompiledProgram) -> Result<String, DisasmError> {
    let mut out = String::new();
    let _ = writeln!(out, "entry: 0x{:04x}", program.entry());
    for binding in program.intrinsics().bindings() {
        let _ = writeln!(
            out,
            "intrinsic {}/{}: 0x{:016x}",
            binding.name, binding.arity, binding.address
        );
    }
    for (name, offset) in program.procedures() {
        let _ = writeln!(out, "procedure {name}: 0x{offset:04x}");
    }

    let code = program.machine_code();
    let _ = writeln!(out, "\n{} byte(s):", code.len());
    for (line, chunk) in code.chunks(BYTES_PER_LINE).enumerate() {
        let hex: Vec<_> = chunk.iter().map(|b| format!("{b:02x}")).collect();
        let _ = writeln!(out, "{:04x}: {}", line * BYTES_PER_LINE, hex.join(" "));
    }

    let _ = writeln!(out, "\n{}", program.disassemble()?);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intrinsics::Intrinsics;
    use crate::program::compile_program;
    use parser::{parse_tokens, tokenize};

    #[test]
    fn dump_lists_layout_bytes_and_listing() {
        let source = "proc main { rax = 1; }";
        let table = parse_tokens(tokenize(source).expect("lex")).expect("parse");
        let program = compile_program(&table, Intrinsics::host()).expect("compile");
        let dump = dump_code(&program).expect("dump");

        let lines: Vec<_> = dump.lines().collect();
        assert_eq!(lines[0], format!("entry: 0x{:04x}", program.entry()));
        assert!(lines[1].starts_with("intrinsic print_integer/1: 0x"));
        assert!(lines[2].starts_with("intrinsic print_text/2: 0x"));
        assert_eq!(lines[3], "procedure main: 0x0000");
        assert_eq!(lines[5], format!("{} byte(s):", program.machine_code().len()));
        assert!(lines[6].starts_with("0000: 48 b8 01 00 00 00 00 00 00 00 c3"));
        assert!(dump.contains("0000: mov rax, 1"), "{dump}");
        assert!(dump.contains("call main"), "{dump}");
    }
}
