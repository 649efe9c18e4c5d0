//! Late machine-code peephole optimizer, grounded on
//! `original_source/src/machinecode/passes/movelimination.cpp`.

use super::{MachineCode, Op};

/// If a store to memory is immediately followed by a load of that exact
/// memory operand, forward the stored register directly instead
/// (`vmovaps [slot], r; vmovaps r2, [slot]` → `vmovaps [slot], r; mov r2,
/// r`, and if `r2 == r` the load disappears entirely). The store itself
/// can't be dropped — something later may still depend on the spill slot
/// holding that value — so this only ever removes the redundant load.
pub fn eliminate_redundant_movs(mc: &mut MachineCode) {
    for i in 1..mc.instructions.len() {
        let (before, after) = mc.instructions.split_at_mut(i);
        let insn1 = &before[i - 1];
        let insn2 = &mut after[0];

        if insn1.op != Op::Vmovaps || insn2.op != Op::Vmovaps {
            continue;
        }

        let insn1_dst = insn1.registers[0];
        let insn2_src = insn2.registers[1];
        if insn1_dst.is_memory() && insn1_dst == insn2_src {
            insn2.registers[1] = insn1.registers[1];
            if insn2.registers[0] == insn2.registers[1] {
                insn2.convert_to_nop();
            }
        }
    }
}
