use assembler::{Assembler, Cond};
use parser::{Comparison, Condition, OperandKind};

use crate::compiler::{CompileError, CompileErrorKind, machine_register};

/// Emits the compare for `condition` and returns the relation to test on
/// the resulting flags.
///
/// An immediate on the left is swapped to the right by the encoder; the
/// returned relation is mirrored to match, so `5 > rax` tests `rax < 5`.
pub fn compile_condition(
    asm: &mut Assembler,
    condition: &Condition,
) -> Result<Cond, CompileError> {
    let cond = flag_condition(condition.comparison);
    let inverted = match (condition.lhs.kind, condition.rhs.kind) {
        (OperandKind::Register(lhs), OperandKind::Register(rhs)) => {
            asm.cmp_rr(machine_register(lhs), machine_register(rhs));
            false
        }
        (OperandKind::Register(lhs), OperandKind::Immediate(rhs)) => {
            asm.cmp_ri(machine_register(lhs), rhs);
            false
        }
        (OperandKind::Immediate(lhs), OperandKind::Register(rhs)) => {
            asm.cmp_ir(lhs, machine_register(rhs), false)
        }
        (OperandKind::Immediate(_), OperandKind::Immediate(_)) => {
            return Err(CompileError::new(
                CompileErrorKind::UnsupportedComparison,
                condition.pos,
            ));
        }
    };
    log::trace!(
        "condition `{condition}` at {}: {cond:?}, inverted={inverted}",
        condition.pos
    );
    Ok(if inverted { cond.mirror() } else { cond })
}

fn flag_condition(comparison: Comparison) -> Cond {
    match comparison {
        Comparison::Less => Cond::Less,
        Comparison::LessEqual => Cond::LessEqual,
        Comparison::Greater => Cond::Greater,
        Comparison::GreaterEqual => Cond::GreaterEqual,
        Comparison::Equal => Cond::Equal,
        Comparison::NotEqual => Cond::NotEqual,
    }
}
