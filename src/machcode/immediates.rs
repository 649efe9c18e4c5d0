//! Immediate resolution (spec.md §4.6): vector opcodes never take an
//! inline float literal, so every [`Register::Immediate`] operand an
//! opcode doesn't accept directly is pushed into the constant pool and
//! replaced with a memory reference anchored on the constant-pool
//! argument register.
//!
//! Runs after [`super::lower::lower`] and before [`super::regalloc::allocate`],
//! so the allocator's materialisation step (see its module doc) is the
//! one place that still has to turn a disallowed memory operand into a
//! register load — this pass only ever produces memory operands, never
//! consumes them.

use super::registers::MachineRegister;
use super::{permits_immediate, MachineCode, MemoryBase, MemoryReference, Register};

/// The constant pool is addressed through the fourth System V argument
/// register — the same one [`super::lower::lower`] uses to load scene
/// constants.
const CONSTANT_POOL_BASE: MachineRegister = MachineRegister::Rcx;

pub fn resolve_immediates(mc: &mut MachineCode) {
    for i in 0..mc.instructions.len() {
        let op = mc.instructions[i].op;
        for pos in 0..mc.instructions[i].registers.len() {
            let Register::Immediate(bits) = mc.instructions[i].registers[pos] else {
                continue;
            };
            if permits_immediate(op, pos) {
                continue;
            }
            let offset = mc.constants.add_dword(bits as u32);
            mc.instructions[i].registers[pos] =
                Register::Memory(MemoryReference { base: MemoryBase::Machine(CONSTANT_POOL_BASE), offset });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machcode::registers::MachineRegister;
    use smallvec::smallvec;

    #[test]
    fn broadcast_immediate_becomes_a_pool_reference() {
        let mut mc = MachineCode::new();
        let scalar = Register::Immediate(0x3f800000);
        mc.vbroadcastss(scalar);
        // vbroadcastss doesn't actually accept an Immediate operand directly
        // in normal use (callers always pass a Memory ref already); exercise
        // the pass on a synthetic instruction that still carries one.
        mc.instructions[0].registers[1] = scalar;

        resolve_immediates(&mut mc);

        let resolved = mc.instructions[0].registers[1];
        assert!(resolved.is_memory());
        assert_eq!(resolved.memory_ref().base, MemoryBase::Machine(CONSTANT_POOL_BASE));
        assert_eq!(mc.constants.size(), 4);
    }

    #[test]
    fn shift_amount_is_left_as_an_immediate() {
        let mut mc = MachineCode::new();
        let src = Register::Machine(MachineRegister::Ymm0);
        mc.vpslld(src, 1);

        resolve_immediates(&mut mc);

        assert_eq!(mc.instructions[0].registers[2], Register::Immediate(1));
    }

    #[test]
    fn two_identical_masks_dedup_in_the_pool() {
        let mut mc = MachineCode::new();
        let dst0 = mc.new_virtual_register();
        mc.instructions.push(crate::machcode::Instruction {
            op: crate::machcode::Op::Vxorps,
            registers: smallvec![dst0, Register::Machine(MachineRegister::Ymm0), Register::Immediate(0x80000000)],
        });
        let dst1 = mc.new_virtual_register();
        mc.instructions.push(crate::machcode::Instruction {
            op: crate::machcode::Op::Vxorps,
            registers: smallvec![dst1, Register::Machine(MachineRegister::Ymm1), Register::Immediate(0x80000000)],
        });

        resolve_immediates(&mut mc);

        assert_eq!(mc.instructions[0].registers[2], mc.instructions[1].registers[2]);
        assert_eq!(mc.constants.size(), 4);
    }
}
