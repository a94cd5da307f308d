use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::ops::Range;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisasmError {
    UnexpectedEof { offset: usize },
    UnsupportedOpcode { offset: usize, opcode: u8 },
    UnsupportedAddressing { offset: usize },
    InvalidRelativeTarget { offset: usize, target: i64 },
}

impl fmt::Display for DisasmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnexpectedEof { offset } => {
                write!(f, "unexpected EOF at byte offset {offset}")
            }
            Self::UnsupportedOpcode { offset, opcode } => {
                write!(
                    f,
                    "unsupported opcode 0x{opcode:02x} at byte offset {offset}"
                )
            }
            Self::UnsupportedAddressing { offset } => {
                write!(f, "unsupported addressing mode at byte offset {offset}")
            }
            Self::InvalidRelativeTarget { offset, target } => {
                write!(
                    f,
                    "invalid relative target {target} at byte offset {offset}"
                )
            }
        }
    }
}

impl std::error::Error for DisasmError {}

#[derive(Default)]
pub struct DisasmOptions<'a> {
    /// Names an absolute offset; consulted before the automatic `L<n>`
    /// labels.
    pub symbol_resolver: Option<&'a dyn Fn(usize) -> Option<String>>,
    /// Ranges printed as `.ascii` data instead of being decoded.
    pub data_ranges: &'a [Range<usize>],
}

pub fn disassemble(bytes: &[u8]) -> Result<String, DisasmError> {
    disassemble_with_options(bytes, &DisasmOptions::default())
}

pub fn disassemble_with_options(
    bytes: &[u8],
    options: &DisasmOptions<'_>,
) -> Result<String, DisasmError> {
    let labels = collect_auto_labels(bytes, options.data_ranges)?;

    let mut out = Vec::new();
    let mut pc = 0usize;

    while pc < bytes.len() {
        let inst_start = pc;
        let named = options.symbol_resolver.and_then(|resolve| resolve(inst_start));
        if let Some(name) = named.as_ref().or(labels.get(&inst_start)) {
            out.push(format!("{name}:"));
        }

        if let Some(end) = data_end(options.data_ranges, pc) {
            let end = end.min(bytes.len());
            out.push(format!(
                "{inst_start:04x}: .ascii \"{}\"",
                bytes[pc..end].escape_ascii()
            ));
            pc = end;
            continue;
        }

        let insn = decode(bytes, pc)?;
        pc = insn.next;
        let text = match insn.kind {
            Kind::Text(text) => text,
            Kind::Relative { mnemonic, target } => format!(
                "{mnemonic} {}",
                format_target(target, options.symbol_resolver, &labels)
            ),
            Kind::RipLea { reg, target } => format!(
                "lea {reg}, [rip -> {}]",
                format_target(target, options.symbol_resolver, &labels)
            ),
        };
        out.push(format!("{inst_start:04x}: {text}"));
    }

    Ok(out.join("\n"))
}

enum Kind {
    Text(String),
    Relative { mnemonic: &'static str, target: usize },
    RipLea { reg: &'static str, target: usize },
}

struct Insn {
    next: usize,
    kind: Kind,
}

/// Decodes the single instruction starting at `pc`.
fn decode(bytes: &[u8], mut pc: usize) -> Result<Insn, DisasmError> {
    let inst_start = pc;
    let mut rex = Rex::default();

    if matches!(bytes[pc], 0x40..=0x4F) {
        rex = Rex::from_byte(bytes[pc]);
        pc += 1;
        if pc >= bytes.len() {
            return Err(DisasmError::UnexpectedEof { offset: pc });
        }
    }

    let opcode = read_u8(bytes, &mut pc)?;
    let bad_addressing = DisasmError::UnsupportedAddressing { offset: inst_start };

    let text = match opcode {
        0x90 => "nop".to_string(),
        0x99 if rex.w => "cqo".to_string(),
        0xC3 => "ret".to_string(),
        0x50..=0x57 => format!("push {}", rex.base(opcode - 0x50)),
        0x58..=0x5F => format!("pop {}", rex.base(opcode - 0x58)),
        0xB8..=0xBF => {
            let reg = rex.base(opcode - 0xB8);
            let imm = if rex.w {
                read_u64(bytes, &mut pc)? as i64
            } else {
                i64::from(read_u32(bytes, &mut pc)? as i32)
            };
            format!("mov {reg}, {imm}")
        }
        0x01 | 0x09 | 0x21 | 0x29 | 0x31 | 0x39 | 0x89 | 0x8B => {
            let modrm = read_u8(bytes, &mut pc)?;
            let (mode, reg, rm) = decode_modrm(modrm);
            let mnemonic = match opcode {
                0x01 => "add",
                0x09 => "or",
                0x21 => "and",
                0x29 => "sub",
                0x31 => "xor",
                0x39 => "cmp",
                _ => "mov",
            };
            let reg = rex.reg(reg);
            if mode == 0b11 {
                if opcode == 0x8B {
                    format!("{mnemonic} {reg}, {}", rex.base(rm))
                } else {
                    format!("{mnemonic} {}, {reg}", rex.base(rm))
                }
            } else if opcode == 0x89 || opcode == 0x8B {
                let mem = decode_rsp_operand(bytes, &mut pc, mode, rm)
                    .ok_or(bad_addressing)??;
                if opcode == 0x89 {
                    format!("mov {mem}, {reg}")
                } else {
                    format!("mov {reg}, {mem}")
                }
            } else {
                return Err(bad_addressing);
            }
        }
        0x8D => {
            let modrm = read_u8(bytes, &mut pc)?;
            let (mode, reg, rm) = decode_modrm(modrm);
            if mode != 0b00 || rm != 0b101 {
                return Err(bad_addressing);
            }
            let disp = read_u32(bytes, &mut pc)? as i32;
            let target = relative_target(pc, disp, inst_start)?;
            return Ok(Insn {
                next: pc,
                kind: Kind::RipLea {
                    reg: rex.reg(reg),
                    target,
                },
            });
        }
        0x81 | 0x83 => {
            let modrm = read_u8(bytes, &mut pc)?;
            let (mode, ext, rm) = decode_modrm(modrm);
            if mode != 0b11 {
                return Err(bad_addressing);
            }
            let mnemonic = match ext {
                0 => "add",
                1 => "or",
                4 => "and",
                5 => "sub",
                6 => "xor",
                7 => "cmp",
                _ => return Err(bad_addressing),
            };
            let imm = if opcode == 0x83 {
                i64::from(read_u8(bytes, &mut pc)? as i8)
            } else {
                i64::from(read_u32(bytes, &mut pc)? as i32)
            };
            format!("{mnemonic} {}, {imm}", rex.base(rm))
        }
        0x69 | 0x6B => {
            let modrm = read_u8(bytes, &mut pc)?;
            let (mode, reg, rm) = decode_modrm(modrm);
            if mode != 0b11 {
                return Err(bad_addressing);
            }
            let imm = if opcode == 0x6B {
                i64::from(read_u8(bytes, &mut pc)? as i8)
            } else {
                i64::from(read_u32(bytes, &mut pc)? as i32)
            };
            format!("imul {}, {}, {imm}", rex.reg(reg), rex.base(rm))
        }
        0xF7 => {
            let modrm = read_u8(bytes, &mut pc)?;
            let (mode, ext, rm) = decode_modrm(modrm);
            if mode != 0b11 || ext != 7 {
                return Err(bad_addressing);
            }
            format!("idiv {}", rex.base(rm))
        }
        0xFF => {
            let modrm = read_u8(bytes, &mut pc)?;
            let (mode, ext, rm) = decode_modrm(modrm);
            if mode != 0b11 || ext != 2 {
                return Err(bad_addressing);
            }
            format!("call {}", rex.base(rm))
        }
        0xE8 | 0xE9 => {
            let disp = read_u32(bytes, &mut pc)? as i32;
            let target = relative_target(pc, disp, inst_start)?;
            let mnemonic = if opcode == 0xE8 { "call" } else { "jmp" };
            return Ok(Insn {
                next: pc,
                kind: Kind::Relative { mnemonic, target },
            });
        }
        0x0F => {
            let ext = read_u8(bytes, &mut pc)?;
            match ext {
                0x80..=0x8F => {
                    let disp = read_u32(bytes, &mut pc)? as i32;
                    let target = relative_target(pc, disp, inst_start)?;
                    return Ok(Insn {
                        next: pc,
                        kind: Kind::Relative {
                            mnemonic: jcc_name(ext & 0x0F),
                            target,
                        },
                    });
                }
                0xAF => {
                    let modrm = read_u8(bytes, &mut pc)?;
                    let (mode, reg, rm) = decode_modrm(modrm);
                    if mode != 0b11 {
                        return Err(bad_addressing);
                    }
                    format!("imul {}, {}", rex.reg(reg), rex.base(rm))
                }
                _ => {
                    return Err(DisasmError::UnsupportedOpcode {
                        offset: inst_start,
                        opcode: ext,
                    });
                }
            }
        }
        _ => {
            return Err(DisasmError::UnsupportedOpcode {
                offset: inst_start,
                opcode,
            });
        }
    };

    Ok(Insn {
        next: pc,
        kind: Kind::Text(text),
    })
}

/// `[rsp + disp8/disp32]` through a SIB byte with no index. `None` when the
/// encoding is anything else.
fn decode_rsp_operand(
    bytes: &[u8],
    pc: &mut usize,
    mode: u8,
    rm: u8,
) -> Option<Result<String, DisasmError>> {
    if rm != 0b100 || !(mode == 0b01 || mode == 0b10) {
        return None;
    }
    let sib = match read_u8(bytes, pc) {
        Ok(sib) => sib,
        Err(e) => return Some(Err(e)),
    };
    if sib != 0x24 {
        return None;
    }
    let disp = if mode == 0b01 {
        read_u8(bytes, pc).map(|d| i64::from(d as i8))
    } else {
        read_u32(bytes, pc).map(|d| i64::from(d as i32))
    };
    Some(disp.map(|disp| match disp {
        0 => "[rsp]".to_string(),
        d if d < 0 => format!("[rsp - {}]", -d),
        d => format!("[rsp + {d}]"),
    }))
}

fn data_end(ranges: &[Range<usize>], pc: usize) -> Option<usize> {
    ranges
        .iter()
        .find(|range| range.contains(&pc))
        .map(|range| range.end)
}

#[derive(Debug, Clone, Copy, Default)]
struct Rex {
    w: bool,
    r: bool,
    b: bool,
}

impl Rex {
    #[inline]
    fn from_byte(byte: u8) -> Self {
        Self {
            w: (byte & 0b0000_1000) != 0,
            r: (byte & 0b0000_0100) != 0,
            b: (byte & 0b0000_0001) != 0,
        }
    }

    #[inline]
    fn reg(self, low3: u8) -> &'static str {
        reg_name((low3 | ((self.r as u8) << 3)) as usize)
    }

    #[inline]
    fn base(self, low3: u8) -> &'static str {
        reg_name((low3 | ((self.b as u8) << 3)) as usize)
    }
}

#[inline]
fn decode_modrm(modrm: u8) -> (u8, u8, u8) {
    ((modrm >> 6) & 0b11, (modrm >> 3) & 0b111, modrm & 0b111)
}

#[inline]
fn read_u8(bytes: &[u8], pc: &mut usize) -> Result<u8, DisasmError> {
    if *pc >= bytes.len() {
        return Err(DisasmError::UnexpectedEof { offset: *pc });
    }
    let v = bytes[*pc];
    *pc += 1;
    Ok(v)
}

#[inline]
fn read_u32(bytes: &[u8], pc: &mut usize) -> Result<u32, DisasmError> {
    let Some(chunk) = bytes.get(*pc..*pc + 4) else {
        return Err(DisasmError::UnexpectedEof { offset: *pc });
    };
    let mut buf = [0u8; 4];
    buf.copy_from_slice(chunk);
    *pc += 4;
    Ok(u32::from_le_bytes(buf))
}

#[inline]
fn read_u64(bytes: &[u8], pc: &mut usize) -> Result<u64, DisasmError> {
    let Some(chunk) = bytes.get(*pc..*pc + 8) else {
        return Err(DisasmError::UnexpectedEof { offset: *pc });
    };
    let mut buf = [0u8; 8];
    buf.copy_from_slice(chunk);
    *pc += 8;
    Ok(u64::from_le_bytes(buf))
}

fn relative_target(
    next_pc: usize,
    disp: i32,
    offset: usize,
) -> Result<usize, DisasmError> {
    let target = (next_pc as i64) + (disp as i64);
    if target < 0 {
        return Err(DisasmError::InvalidRelativeTarget { offset, target });
    }
    Ok(target as usize)
}

fn format_target(
    target: usize,
    resolver: Option<&dyn Fn(usize) -> Option<String>>,
    labels: &BTreeMap<usize, String>,
) -> String {
    if let Some(name) = resolver.and_then(|resolve| resolve(target)) {
        return name;
    }
    if let Some(name) = labels.get(&target) {
        return name.clone();
    }
    format!("0x{target:04x}")
}

fn collect_auto_labels(
    bytes: &[u8],
    data_ranges: &[Range<usize>],
) -> Result<BTreeMap<usize, String>, DisasmError> {
    let mut targets = BTreeSet::new();
    let mut pc = 0usize;

    while pc < bytes.len() {
        if let Some(end) = data_end(data_ranges, pc) {
            pc = end;
            continue;
        }
        let insn = decode(bytes, pc)?;
        pc = insn.next;
        match insn.kind {
            Kind::Relative { target, .. } | Kind::RipLea { target, .. } => {
                targets.insert(target);
            }
            Kind::Text(_) => {}
        }
    }

    Ok(targets
        .into_iter()
        .enumerate()
        .map(|(idx, target)| (target, format!("L{idx}")))
        .collect())
}

fn jcc_name(cc: u8) -> &'static str {
    match cc {
        0x0 => "jo",
        0x1 => "jno",
        0x2 => "jb",
        0x3 => "jae",
        0x4 => "je",
        0x5 => "jne",
        0x6 => "jbe",
        0x7 => "ja",
        0x8 => "js",
        0x9 => "jns",
        0xA => "jp",
        0xB => "jnp",
        0xC => "jl",
        0xD => "jge",
        0xE => "jle",
        _ => "jg",
    }
}

fn reg_name(idx: usize) -> &'static str {
    match idx {
        0 => "rax",
        1 => "rcx",
        2 => "rdx",
        3 => "rbx",
        4 => "rsp",
        5 => "rbp",
        6 => "rsi",
        7 => "rdi",
        8 => "r8",
        9 => "r9",
        10 => "r10",
        11 => "r11",
        12 => "r12",
        13 => "r13",
        14 => "r14",
        15 => "r15",
        _ => "<bad-reg>",
    }
}
