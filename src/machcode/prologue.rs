//! Prologue/epilogue insertion (spec.md §4.9), grounded on
//! `original_source/src/machinecode/machinecode.cpp`'s
//! `add_prologue_and_epilogue`.
//!
//! Runs after register allocation, once [`super::stack::StackInfo`] knows
//! the final spill footprint, and before the late peephole so the extra
//! `vmovaps`-adjacent instructions it introduces (none, currently — the
//! prologue is pure scalar/stack setup) don't interfere with that pass's
//! window.

use super::insertion_set::InsertionSet;
use super::registers::MachineRegister;
use super::MachineCode;

/// Masks off the low 5 bits of `rsp`, aligning it to 32 bytes for YMM
/// spill slots (spec.md §4.9).
const STACK_ALIGN_MASK: u64 = !31u64;

/// Insert `push rbp; mov rbp, rsp; sub rsp, <stack_size>; and rsp,
/// ~31` before the first instruction and `mov rsp, rbp; pop rbp; ret`
/// after the last, via the insertion set so the rest of the program's
/// indices don't shift mid-pass.
pub fn insert(mc: &mut MachineCode) {
    let mut set = InsertionSet::new();
    let last = mc.instructions.len().saturating_sub(1);

    set.push_reg_before(0, MachineRegister::Rbp);
    set.mov_reg_before(0, MachineRegister::Rbp, MachineRegister::Rsp);
    set.sub_imm_before(0, MachineRegister::Rsp, mc.stack.current_offset as u64);
    set.and64_imm_before(0, MachineRegister::Rsp, STACK_ALIGN_MASK);

    set.mov_reg_after(last, MachineRegister::Rsp, MachineRegister::Rbp);
    set.pop_reg_after(last, MachineRegister::Rbp);

    set.commit(&mut mc.instructions);

    // `ret` has no operands to stage through the insertion set; appending
    // it directly is equivalent since nothing is ever queued after the
    // program's final instruction.
    mc.ret();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machcode::Op;

    #[test]
    fn wraps_the_program_in_a_frame() {
        let mut mc = MachineCode::new();
        let zero = mc.new_virtual_register();
        let _ = zero;
        mc.instructions.push(crate::machcode::Instruction {
            op: Op::Nop,
            registers: smallvec::smallvec![],
        });

        insert(&mut mc);

        assert_eq!(mc.instructions.first().unwrap().op, Op::Push);
        assert_eq!(mc.instructions.last().unwrap().op, Op::Ret);
    }
}
