//! Deferred instruction insertion, grounded on
//! `original_source/src/machinecode/insertion_set.{h,cpp}`.
//!
//! Register allocation and prologue/epilogue insertion both want to say
//! "put this instruction right before/after index N" while walking the
//! instruction list — which would invalidate every later index if done
//! eagerly. Instead every edit is staged here and applied in a single
//! `commit()` pass, sorted so that the highest indices are spliced in
//! first (so earlier-recorded indices are still valid at the point
//! they're spliced).

use super::{Instruction, MachineRegister, Op, Register};
use smallvec::smallvec;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Side {
    Before,
    After,
}

struct InsertAt {
    side: Side,
    index: usize,
    insert_id: usize,
    instruction: Instruction,
}

/// A batch of pending insertions against a single instruction list.
#[derive(Default)]
pub struct InsertionSet {
    insertions: Vec<InsertAt>,
    insert_count: usize,
}

impl InsertionSet {
    pub fn new() -> Self {
        InsertionSet::default()
    }

    fn stage(&mut self, side: Side, index: usize, instruction: Instruction) {
        let insert_id = self.insert_count;
        self.insert_count += 1;
        self.insertions.push(InsertAt { side, index, insert_id, instruction });
    }

    pub fn insert_before(&mut self, index: usize, instruction: Instruction) {
        self.stage(Side::Before, index, instruction);
    }
    pub fn insert_after(&mut self, index: usize, instruction: Instruction) {
        self.stage(Side::After, index, instruction);
    }

    pub fn load_before(&mut self, index: usize, dst: Register, mem: Register) {
        self.insert_before(index, Instruction { op: Op::Vmovaps, registers: smallvec![dst, mem] });
    }
    pub fn store_after(&mut self, index: usize, mem: Register, value: Register) {
        self.insert_after(index, Instruction { op: Op::Vmovaps, registers: smallvec![mem, value] });
    }
    pub fn store_before(&mut self, index: usize, mem: Register, value: Register) {
        self.insert_before(index, Instruction { op: Op::Vmovaps, registers: smallvec![mem, value] });
    }

    pub fn push_reg_before(&mut self, index: usize, reg: MachineRegister) {
        self.insert_before(index, Instruction { op: Op::Push, registers: smallvec![Register::Machine(reg)] });
    }
    pub fn pop_reg_after(&mut self, index: usize, reg: MachineRegister) {
        self.insert_after(index, Instruction { op: Op::Pop, registers: smallvec![Register::Machine(reg)] });
    }
    pub fn mov_reg_before(&mut self, index: usize, dst: MachineRegister, src: MachineRegister) {
        self.insert_before(
            index,
            Instruction { op: Op::Mov, registers: smallvec![Register::Machine(dst), Register::Machine(src)] },
        );
    }
    pub fn mov_reg_after(&mut self, index: usize, dst: MachineRegister, src: MachineRegister) {
        self.insert_after(
            index,
            Instruction { op: Op::Mov, registers: smallvec![Register::Machine(dst), Register::Machine(src)] },
        );
    }
    pub fn and64_imm_before(&mut self, index: usize, reg: MachineRegister, mask: u64) {
        self.insert_before(
            index,
            Instruction { op: Op::And64, registers: smallvec![Register::Machine(reg), Register::Immediate(mask)] },
        );
    }
    pub fn sub_imm_before(&mut self, index: usize, reg: MachineRegister, imm: u64) {
        self.insert_before(
            index,
            Instruction { op: Op::Sub, registers: smallvec![Register::Machine(reg), Register::Immediate(imm)] },
        );
    }
    pub fn add_imm_after(&mut self, index: usize, reg: MachineRegister, imm: u64) {
        self.insert_after(
            index,
            Instruction { op: Op::Add, registers: smallvec![Register::Machine(reg), Register::Immediate(imm)] },
        );
    }

    /// Splice every staged insertion into `instructions`.
    pub fn commit(mut self, instructions: &mut Vec<Instruction>) {
        // Reverse program order: highest index first; at equal index, After
        // before Before; ties broken by insert_id descending (so insertions
        // recorded earlier still end up in program order once spliced from
        // the back).
        self.insertions.sort_by(|a, b| {
            if a.index != b.index {
                return b.index.cmp(&a.index);
            }
            if a.side != b.side {
                return b.side.cmp(&a.side);
            }
            b.insert_id.cmp(&a.insert_id)
        });

        instructions.reserve(self.insertions.len());

        for insertion in self.insertions {
            let insert_index = match insertion.side {
                Side::Before => insertion.index,
                Side::After => insertion.index + 1,
            };
            instructions.insert(insert_index, insertion.instruction);
        }
    }
}
