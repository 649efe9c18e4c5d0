//! Physical register set, grounded on
//! `original_source/src/machinecode/machinecode.h`'s `Machine_Register`
//! enum, extended with the general-purpose registers the calling
//! convention and prologue/epilogue actually need (the header's own
//! registers are mostly placeholders — see DESIGN.md).

use std::fmt;

/// A concrete x86-64 register. The five general-purpose entries are ABI
/// plumbing (argument passing, the frame pointer, spill-alignment); the
/// eight YMMs are the allocator's whole working set — six generally
/// available, two reserved as spill scratch (spec.md §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MachineRegister {
    Rdi,
    Rsi,
    Rdx,
    Rcx,
    R8,
    Rsp,
    Rbp,
    Ymm0,
    Ymm1,
    Ymm2,
    Ymm3,
    Ymm4,
    Ymm5,
    Ymm6,
    Ymm7,
}

impl MachineRegister {
    /// The three ordinary position inputs and the constant pool base, in
    /// System V AMD64 argument order (spec.md §2's ABI: `xs, ys, zs,
    /// constants, results`). `results` arrives as the fifth argument, in
    /// `r8`.
    pub const ARG_REGISTERS: [MachineRegister; 4] =
        [MachineRegister::Rdi, MachineRegister::Rsi, MachineRegister::Rdx, MachineRegister::Rcx];
    pub const RESULT_REGISTER: MachineRegister = MachineRegister::R8;

    /// The pool the linear-scan allocator draws from, in preference order.
    pub const ALLOCATABLE: [MachineRegister; 6] = [
        MachineRegister::Ymm0,
        MachineRegister::Ymm1,
        MachineRegister::Ymm2,
        MachineRegister::Ymm3,
        MachineRegister::Ymm4,
        MachineRegister::Ymm5,
    ];

    /// Reserved for staging spilled values in and out of memory; never
    /// handed out by the allocator itself.
    pub const SPILL_SCRATCH: [MachineRegister; 2] = [MachineRegister::Ymm6, MachineRegister::Ymm7];

    /// The x86-64 register number used in ModRM/SIB/REX encoding.
    pub fn number(self) -> u8 {
        match self {
            MachineRegister::Rdi => 7,
            MachineRegister::Rsi => 6,
            MachineRegister::Rdx => 2,
            MachineRegister::Rcx => 1,
            MachineRegister::R8 => 8,
            MachineRegister::Rsp => 4,
            MachineRegister::Rbp => 5,
            MachineRegister::Ymm0 => 0,
            MachineRegister::Ymm1 => 1,
            MachineRegister::Ymm2 => 2,
            MachineRegister::Ymm3 => 3,
            MachineRegister::Ymm4 => 4,
            MachineRegister::Ymm5 => 5,
            MachineRegister::Ymm6 => 6,
            MachineRegister::Ymm7 => 7,
        }
    }

    /// Does this register's number need the VEX/REX `B`/`R` extension bit
    /// (spec.md §4.11's "if the memory base register number exceeds 7")?
    pub fn needs_extension_bit(self) -> bool {
        self.number() > 7
    }
}

impl fmt::Display for MachineRegister {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MachineRegister::Rdi => "rdi",
            MachineRegister::Rsi => "rsi",
            MachineRegister::Rdx => "rdx",
            MachineRegister::Rcx => "rcx",
            MachineRegister::R8 => "r8",
            MachineRegister::Rsp => "rsp",
            MachineRegister::Rbp => "rbp",
            MachineRegister::Ymm0 => "ymm0",
            MachineRegister::Ymm1 => "ymm1",
            MachineRegister::Ymm2 => "ymm2",
            MachineRegister::Ymm3 => "ymm3",
            MachineRegister::Ymm4 => "ymm4",
            MachineRegister::Ymm5 => "ymm5",
            MachineRegister::Ymm6 => "ymm6",
            MachineRegister::Ymm7 => "ymm7",
        };
        f.write_str(name)
    }
}
