//! The x86-64 VEX/ModRM encoder (spec.md §4.11), grounded byte-for-byte on
//! `original_source/src/machinecode/assembler.cpp`'s `Assembler`.
//!
//! The encoder is deliberately minimal: every opcode family below covers
//! exactly the operand shapes the rest of the pipeline ever produces, and
//! returns [`crate::Error::UnsupportedOperandShape`] rather than panicking
//! on anything else (spec.md §7 — this is the one place in the crate most
//! likely to meet a shape nobody anticipated, since it's the final,
//! least-abstracted stage).

use super::{MachineCode, MachineRegister, MemoryBase, MemoryReference, Op, Register};
use crate::error::Error;
use crate::util::hexdump;
use std::fmt;

/// An assembled program: the raw bytes plus a parallel `(offset, length)`
/// table so a caller can print mnemonic-annotated disassembly alongside
/// the hex dump (spec.md §6).
#[derive(Debug, Clone, Default)]
pub struct EncodedProgram {
    pub code: Vec<u8>,
    /// One entry per source instruction (including zero-length `Nop`s),
    /// in program order.
    pub offsets: Vec<(usize, usize)>,
}

impl EncodedProgram {
    /// `mnemonic operands` followed by an offset-annotated hex dump of its
    /// encoded bytes, one block per instruction (spec.md §6). `Nop`
    /// entries (zero length) still get a mnemonic line with an empty dump.
    pub fn disassemble(&self, mc: &MachineCode) -> String {
        use std::fmt::Write as _;
        let mut out = String::new();
        for (insn, &(offset, length)) in mc.instructions.iter().zip(&self.offsets) {
            let _ = writeln!(out, "{insn}");
            if length > 0 {
                out.push_str(&hexdump(&self.code[offset..offset + length], offset));
            }
        }
        out
    }
}

/// Encode every instruction in `mc` into a flat byte buffer.
pub fn encode(mc: &MachineCode) -> crate::Result<EncodedProgram> {
    let mut program = EncodedProgram::default();
    for insn in &mc.instructions {
        let begin = program.code.len();
        encode_instruction(&mut program.code, insn)?;
        let end = program.code.len();
        program.offsets.push((begin, end - begin));
    }
    Ok(program)
}

fn encode_instruction(buf: &mut Vec<u8>, insn: &super::Instruction) -> crate::Result<()> {
    match insn.op {
        Op::Vminps => vector_binary(buf, insn, 0x5d),
        Op::Vmaxps => vector_binary(buf, insn, 0x5f),
        Op::Vaddps => vector_binary(buf, insn, 0x58),
        Op::Vsubps => vector_binary(buf, insn, 0x5c),
        Op::Vmulps => vector_binary(buf, insn, 0x59),
        Op::Vdivps => vector_binary(buf, insn, 0x5e),
        Op::Vandps => vector_binary(buf, insn, 0x54),
        Op::Vxorps => vector_binary(buf, insn, 0x57),
        Op::Vsqrtps => vector_unary(buf, insn, 0x51),
        Op::Vrsqrtps => vector_unary(buf, insn, 0x52),
        Op::Vmovaps => vmovaps(buf, insn),
        Op::Vbroadcastss => vbroadcastss(buf, insn),
        Op::Vpslld => shift_immediate(buf, insn, 0xf0),
        Op::Vpsrld => shift_immediate(buf, insn, 0xd0),
        Op::Vroundps => vroundps(buf, insn),
        Op::Push => {
            buf.push(0x50 | machine(insn, 0)?.number());
            Ok(())
        }
        Op::Pop => {
            buf.push(0x58 | machine(insn, 0)?.number());
            Ok(())
        }
        Op::Ret => {
            buf.push(0xc3);
            Ok(())
        }
        Op::Nop => Ok(()),
        Op::Add => group1_imm(buf, insn, 0),
        Op::Sub => group1_imm(buf, insn, 5),
        Op::And64 => and64(buf, insn),
        Op::Mov => mov_reg(buf, insn),
    }
}

fn machine(insn: &super::Instruction, pos: usize) -> crate::Result<MachineRegister> {
    let reg = insn.registers.get(pos).copied().ok_or_else(|| shape_error(insn))?;
    if !reg.is_machine() {
        return Err(shape_error(insn));
    }
    Ok(reg.machine_reg())
}

fn shape_error(insn: &super::Instruction) -> Error {
    Error::UnsupportedOperandShape(format!("{insn}"))
}

/// Non-destructive three-address vector ops (spec.md §4.11): `(dst, lhs,
/// rhs)`, VEX.vvvv carries `lhs`.
fn vector_binary(buf: &mut Vec<u8>, insn: &super::Instruction, opcode: u8) -> crate::Result<()> {
    let dst = machine(insn, 0)?.number();
    let lhs = machine(insn, 1)?.number();
    let rhs = machine(insn, 2)?.number();

    buf.push(0xc5);
    buf.push(0x80 | ((!lhs & 0xf) << 3) | 0x4);
    buf.push(opcode);
    buf.push(0xc0 | (dst << 3) | rhs);
    Ok(())
}

fn vector_unary(buf: &mut Vec<u8>, insn: &super::Instruction, opcode: u8) -> crate::Result<()> {
    let dst = machine(insn, 0)?.number();
    let src = machine(insn, 1)?.number();

    buf.push(0xc5);
    buf.push(0xfc);
    buf.push(opcode);
    buf.push(0xc0 | (dst << 3) | src);
    Ok(())
}

/// Encode a `[base + offset]` operand's ModR/M (+ optional SIB, + optional
/// displacement immediate) given the register number that goes in the
/// ModR/M `reg` field. Shared between loads and stores since the encoding
/// only differs in the leading opcode byte (spec.md §4.11).
fn encode_memory_operand(buf: &mut Vec<u8>, reg_field: u8, mem: &MemoryReference) -> crate::Result<()> {
    let MemoryBase::Machine(base) = mem.base else {
        return Err(Error::UnsupportedOperandShape(format!("unresolved virtual memory base in {mem}")));
    };
    let base_num = base.number();

    if mem.offset == 0 {
        buf.push((reg_field << 3) | (base_num & 7));
        if base == MachineRegister::Rsp {
            buf.push((base_num << 3) | (base_num & 7));
        }
    } else if mem.offset < 0x80 {
        buf.push(0x40 | (reg_field << 3) | (base_num & 7));
        if base == MachineRegister::Rsp {
            buf.push((base_num << 3) | (base_num & 7));
        }
        buf.push(mem.offset as u8);
    } else {
        buf.push(0x80 | (reg_field << 3) | (base_num & 7));
        if base == MachineRegister::Rsp {
            buf.push((base_num << 3) | (base_num & 7));
        }
        buf.extend_from_slice(&mem.offset.to_le_bytes());
    }
    Ok(())
}

/// Three forms (spec.md §4.11): reg←reg, reg←mem, mem←reg. The memory
/// base's register number decides whether a 2- or 3-byte VEX is needed —
/// `r8` (the output pointer) is the one base this crate ever uses that
/// exceeds the 3-bit field a 2-byte VEX can address.
fn vmovaps(buf: &mut Vec<u8>, insn: &super::Instruction) -> crate::Result<()> {
    let lhs = insn.registers.first().copied().ok_or_else(|| shape_error(insn))?;
    let rhs = insn.registers.get(1).copied().ok_or_else(|| shape_error(insn))?;

    if lhs.is_machine() && rhs.is_machine() {
        buf.push(0xc5);
        buf.push(0xfc);
        buf.push(0x28);
        buf.push(0xc0 | (lhs.machine_reg().number() << 3) | rhs.machine_reg().number());
        return Ok(());
    }

    let (reg, mem, opcode) = if lhs.is_machine() && rhs.is_memory() {
        (lhs.machine_reg(), rhs.memory_ref(), 0x28u8)
    } else if lhs.is_memory() && rhs.is_machine() {
        (rhs.machine_reg(), lhs.memory_ref(), 0x29u8)
    } else {
        return Err(shape_error(insn));
    };

    let MemoryBase::Machine(base) = mem.base else {
        return Err(shape_error(insn));
    };

    if base.needs_extension_bit() {
        let ext_bit = !(base.number() >> 3) & 1;
        buf.push(0xc4);
        buf.push(0xc0 | (ext_bit << 5) | 1);
        buf.push(0x7c);
    } else {
        buf.push(0xc5);
        buf.push(0xfc);
    }
    buf.push(opcode);
    encode_memory_operand(buf, reg.number(), &mem)
}

/// Source must be `[rcx + disp]` — the constant pool base (spec.md §4.11).
fn vbroadcastss(buf: &mut Vec<u8>, insn: &super::Instruction) -> crate::Result<()> {
    let dst = machine(insn, 0)?;
    let src = insn.registers.get(1).copied().ok_or_else(|| shape_error(insn))?;
    if !src.is_memory() {
        return Err(shape_error(insn));
    }
    let mem = src.memory_ref();
    if mem.base != MemoryBase::Machine(MachineRegister::Rcx) {
        return Err(shape_error(insn));
    }

    buf.push(0xc4);
    buf.push(0xe2);
    buf.push(0x7d);
    buf.push(0x18);
    encode_memory_operand(buf, dst.number(), &mem)
}

fn shift_immediate(buf: &mut Vec<u8>, insn: &super::Instruction, subop: u8) -> crate::Result<()> {
    let dst = machine(insn, 0)?.number();
    let src = machine(insn, 1)?.number();
    let imm = immediate_byte(insn, 2)?;

    buf.push(0xc5);
    buf.push(0x80 | ((!dst & 0xf) << 3) | 0x5);
    buf.push(0x72);
    buf.push(subop | src);
    buf.push(imm);
    Ok(())
}

fn vroundps(buf: &mut Vec<u8>, insn: &super::Instruction) -> crate::Result<()> {
    let dst = machine(insn, 0)?.number();
    let src = machine(insn, 1)?.number();
    let imm = immediate_byte(insn, 2)?;

    buf.push(0xc4);
    buf.push(0xe3);
    buf.push(0x7d);
    buf.push(0x08);
    buf.push(0xc0 | (dst << 3) | src);
    buf.push(imm);
    Ok(())
}

fn immediate_byte(insn: &super::Instruction, pos: usize) -> crate::Result<u8> {
    let Some(Register::Immediate(value)) = insn.registers.get(pos).copied() else {
        return Err(shape_error(insn));
    };
    if value > 0xff {
        return Err(Error::ImmediateOutOfRange(value));
    }
    Ok(value as u8)
}

/// `add`/`sub r64, imm` (spec.md §4.11); `extension` is the ModR/M `/n`
/// opcode-extension field (`/0` for add, `/5` for sub).
fn group1_imm(buf: &mut Vec<u8>, insn: &super::Instruction, extension: u8) -> crate::Result<()> {
    let dst = machine(insn, 0)?.number();
    let Some(Register::Immediate(imm)) = insn.registers.get(1).copied() else {
        return Err(shape_error(insn));
    };

    buf.push(0x48);
    if imm <= 0x7f {
        buf.push(0x83);
        buf.push(0xc0 | (extension << 3) | dst);
        buf.push(imm as u8);
    } else if imm <= 0xffff_ffff {
        buf.push(0x81);
        buf.push(0xc0 | (extension << 3) | dst);
        buf.extend_from_slice(&(imm as u32).to_le_bytes());
    } else {
        return Err(Error::ImmediateOutOfRange(imm));
    }
    Ok(())
}

/// Only the specific pair the prologue emits — `and rsp, ~31` — is
/// supported (spec.md §4.11).
fn and64(buf: &mut Vec<u8>, insn: &super::Instruction) -> crate::Result<()> {
    let dst = machine(insn, 0)?;
    let Some(Register::Immediate(mask)) = insn.registers.get(1).copied() else {
        return Err(shape_error(insn));
    };
    if dst != MachineRegister::Rsp || mask != 0xffff_ffff_ffff_ffe0 {
        return Err(shape_error(insn));
    }

    buf.push(0x48);
    buf.push(0x83);
    buf.push(0xe4);
    buf.push(0xe0);
    Ok(())
}

fn mov_reg(buf: &mut Vec<u8>, insn: &super::Instruction) -> crate::Result<()> {
    let dst = machine(insn, 0)?.number();
    let src = machine(insn, 1)?.number();

    buf.push(0x48);
    buf.push(0x89);
    buf.push(0xc0 | (src << 3) | dst);
    Ok(())
}

impl fmt::Display for EncodedProgram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hexdump(&self.code, 0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machcode::{MachineCode, MemoryBase, MemoryReference};
    use smallvec::smallvec;

    #[test]
    fn vaddps_matches_known_good_bytes() {
        let mut mc = MachineCode::new();
        mc.instructions.push(super::super::Instruction {
            op: Op::Vaddps,
            registers: smallvec![
                Register::Machine(MachineRegister::Ymm0),
                Register::Machine(MachineRegister::Ymm1),
                Register::Machine(MachineRegister::Ymm2),
            ],
        });

        let program = encode(&mc).unwrap();

        // vaddps ymm0, ymm1, ymm2
        assert_eq!(program.code, vec![0xc5, 0xf4, 0x58, 0xc2]);
    }

    #[test]
    fn ret_and_nop_contribute_expected_lengths() {
        let mut mc = MachineCode::new();
        mc.ret();
        mc.instructions.push(super::super::Instruction { op: Op::Nop, registers: smallvec![] });

        let program = encode(&mc).unwrap();

        assert_eq!(program.code, vec![0xc3]);
        assert_eq!(program.offsets, vec![(0, 1), (1, 0)]);
    }

    #[test]
    fn push_pop_use_the_0x50_0x58_base() {
        let mut mc = MachineCode::new();
        mc.push_reg(MachineRegister::Rbp);
        mc.pop_reg(MachineRegister::Rbp);

        let program = encode(&mc).unwrap();

        assert_eq!(program.code, vec![0x55, 0x5d]);
    }

    #[test]
    fn vmovaps_register_to_register() {
        let mut mc = MachineCode::new();
        mc.instructions.push(super::super::Instruction {
            op: Op::Vmovaps,
            registers: smallvec![Register::Machine(MachineRegister::Ymm1), Register::Machine(MachineRegister::Ymm0)],
        });

        let program = encode(&mc).unwrap();

        assert_eq!(program.code, vec![0xc5, 0xfc, 0x28, 0xc8]);
    }

    #[test]
    fn vmovaps_load_from_rdi_with_zero_offset() {
        let mut mc = MachineCode::new();
        let mem = Register::Memory(MemoryReference { base: MemoryBase::Machine(MachineRegister::Rdi), offset: 0 });
        mc.instructions.push(super::super::Instruction {
            op: Op::Vmovaps,
            registers: smallvec![Register::Machine(MachineRegister::Ymm0), mem],
        });

        let program = encode(&mc).unwrap();

        // vmovaps ymm0, [rdi]
        assert_eq!(program.code, vec![0xc5, 0xfc, 0x28, 0x07]);
    }

    #[test]
    fn vmovaps_store_to_r8_needs_the_three_byte_vex() {
        let mut mc = MachineCode::new();
        let mem = Register::Memory(MemoryReference { base: MemoryBase::Machine(MachineRegister::R8), offset: 0 });
        mc.instructions.push(super::super::Instruction {
            op: Op::Vmovaps,
            registers: smallvec![mem, Register::Machine(MachineRegister::Ymm0)],
        });

        let program = encode(&mc).unwrap();

        assert_eq!(program.code, vec![0xc4, 0xc1, 0x7c, 0x29, 0x00]);
    }

    #[test]
    fn vpslld_rejects_an_immediate_over_a_byte() {
        let mut mc = MachineCode::new();
        mc.instructions.push(super::super::Instruction {
            op: Op::Vpslld,
            registers: smallvec![
                Register::Machine(MachineRegister::Ymm0),
                Register::Machine(MachineRegister::Ymm1),
                Register::Immediate(0x100),
            ],
        });

        assert!(matches!(encode(&mc), Err(Error::ImmediateOutOfRange(0x100))));
    }

    #[test]
    fn and64_rejects_any_operand_pair_other_than_the_prologue_mask() {
        let mut mc = MachineCode::new();
        mc.and64_imm(MachineRegister::Rbp, 0xffff_ffff_ffff_ffe0);

        assert!(matches!(encode(&mc), Err(Error::UnsupportedOperandShape(_))));
    }

    #[test]
    fn offsets_table_sums_to_buffer_length() {
        let mut mc = MachineCode::new();
        mc.push_reg(MachineRegister::Rbp);
        mc.ret();

        let program = encode(&mc).unwrap();

        let total: usize = program.offsets.iter().map(|(_, len)| len).sum();
        assert_eq!(total, program.code.len());
    }
}
