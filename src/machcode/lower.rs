//! Bytecode → machine IR lowering (spec.md §4.4-§4.6).
//!
//! `original_source` never reached this stage — its machine-code layer
//! stops at `Instruction::set_registers`/`used_registers` and a couple of
//! hand-called builders (see `machinecode.cpp`) — so this module, the
//! transcendental recipes in particular, is grounded directly on
//! spec.md's prose rather than on any original `.cpp`.

use super::registers::MachineRegister;
use super::{immediates, prologue, regalloc, MachineCode, MemoryBase, MemoryReference, Register};
use crate::bytecode::{self, Bytecode};
use std::collections::HashMap;
use std::f32::consts::PI;

/// Lower optimized bytecode into a fully allocated, framed, peephole-cleaned
/// machine program — immediate resolution, register allocation,
/// prologue/epilogue insertion, and the late peephole all run here, in
/// pipeline order (spec.md §2). Callers only need to run
/// [`super::encoder`] on the result before it's executable.
pub fn lower(bc: &Bytecode) -> MachineCode {
    let mut mc = MachineCode::new();
    let mut values: HashMap<bytecode::NodeId, Register> = HashMap::new();

    for (id, node) in bc.nodes.iter().enumerate() {
        let reg = match node.op {
            bytecode::Op::Nop => continue,
            bytecode::Op::LoadArg => {
                let base = MachineRegister::ARG_REGISTERS[node.arg_index];
                mc.load(memory(MemoryBase::Machine(base), 0))
            }
            bytecode::Op::StoreResult => {
                let value = values[&node.operands[0]];
                let out = memory(MemoryBase::Machine(MachineRegister::RESULT_REGISTER), 0);
                mc.store(out, value);
                continue;
            }
            bytecode::Op::Assign => values[&node.operands[0]],
            bytecode::Op::AssignFloat => broadcast(&mut mc, node.value),
            bytecode::Op::Add => mc.vaddps(values[&node.operands[0]], values[&node.operands[1]]),
            bytecode::Op::Subtract => mc.vsubps(values[&node.operands[0]], values[&node.operands[1]]),
            bytecode::Op::Multiply => mc.vmulps(values[&node.operands[0]], values[&node.operands[1]]),
            bytecode::Op::Divide => mc.vdivps(values[&node.operands[0]], values[&node.operands[1]]),
            bytecode::Op::Sqrt => mc.vsqrtps(values[&node.operands[0]]),
            bytecode::Op::Rsqrt => mc.vrsqrtps(values[&node.operands[0]]),
            bytecode::Op::Abs => abs(&mut mc, values[&node.operands[0]]),
            bytecode::Op::Negate => {
                let mask = broadcast_bits(&mut mc, SIGN_MASK);
                mc.vxorps(values[&node.operands[0]], mask)
            }
            bytecode::Op::Min => mc.vminps(values[&node.operands[0]], values[&node.operands[1]]),
            bytecode::Op::Max => mc.vmaxps(values[&node.operands[0]], values[&node.operands[1]]),
            bytecode::Op::Sin => sin(&mut mc, values[&node.operands[0]]),
            bytecode::Op::Cos => {
                let half_pi = broadcast(&mut mc, PI / 2.0);
                let shifted = mc.vaddps(values[&node.operands[0]], half_pi);
                sin(&mut mc, shifted)
            }
            bytecode::Op::Mod => modulo(&mut mc, values[&node.operands[0]], values[&node.operands[1]]),
        };
        values.insert(id, reg);
    }

    immediates::resolve_immediates(&mut mc);
    regalloc::allocate(&mut mc);
    prologue::insert(&mut mc);
    mc.optimize();
    mc
}

const SIGN_MASK: u64 = 0x8000_0000;

fn memory(base: MemoryBase, offset: u32) -> Register {
    Register::Memory(MemoryReference { base, offset })
}

fn broadcast(mc: &mut MachineCode, value: f32) -> Register {
    mc.vbroadcastss(Register::Immediate(crate::util::float_to_bits(value)))
}

/// Broadcast a raw 32-bit pattern (a mask, not a float value) into every
/// lane. `vandps`/`vxorps` take a full YMM operand, never an inline
/// immediate (spec.md §4.6), so the sign mask has to reach them the same
/// way a float literal does: as a broadcast register, not a bare
/// `Register::Immediate` that `resolve_immediates` would otherwise spill
/// to the constant pool as an unaligned dword and fault on a 32-byte
/// `vmovaps` reload.
fn broadcast_bits(mc: &mut MachineCode, bits: u64) -> Register {
    mc.vbroadcastss(Register::Immediate(bits))
}

/// Strip the sign bit by shifting it out and back in as zero, per spec.md
/// §4.4's note that this avoids spending a register on an and-mask.
fn abs(mc: &mut MachineCode, value: Register) -> Register {
    let shifted = mc.vpslld(value, 1);
    mc.vpsrld(shifted, 1)
}

/// Bhaskara I's approximation (spec.md §4.5): range-reduce to `[-π, π)`,
/// stash the sign bit, evaluate the polynomial on the magnitude, and
/// toggle the sign back onto the result.
fn sin(mc: &mut MachineCode, x: Register) -> Register {
    let two_pi = broadcast(mc, 2.0 * PI);
    let pi = broadcast(mc, PI);
    let rem = modulo(mc, x, two_pi);
    let reduced = mc.vsubps(rem, pi);

    let sign_mask = broadcast_bits(mc, SIGN_MASK);
    let sign = mc.vandps(reduced, sign_mask);
    let ax = abs(mc, reduced);

    let pi_again = broadcast(mc, PI);
    let pi_minus_ax = mc.vsubps(pi_again, ax);
    let t = mc.vmulps(ax, pi_minus_ax);
    let sixteen = broadcast(mc, 16.0);
    let numerator = mc.vmulps(sixteen, t);
    let four = broadcast(mc, 4.0);
    let four_t = mc.vmulps(four, t);
    let five_pi_sq = broadcast(mc, 5.0 * PI * PI);
    let denominator = mc.vsubps(five_pi_sq, four_t);
    let magnitude = mc.vdivps(numerator, denominator);

    mc.vxorps(magnitude, sign)
}

/// Truncating division remainder: `x - trunc(x / m) * m` (spec.md §4.4).
/// `0b11` is the MXCSR-independent truncation rounding mode for
/// `vroundps`.
const ROUND_TRUNCATE: u8 = 0b11;

fn modulo(mc: &mut MachineCode, x: Register, m: Register) -> Register {
    let q = mc.vdivps(x, m);
    let truncated = mc.vroundps(q, ROUND_TRUNCATE);
    let product = mc.vmulps(truncated, m);
    mc.vsubps(x, product)
}
