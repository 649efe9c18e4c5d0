//! Compiler-wide error type.
//!
//! The original implementation this crate is grounded on treats unsupported
//! input as a programmer error and `abort()`s (see spec.md §7). A library
//! cannot do that to its caller's process, so every fatal condition listed
//! there becomes a variant here and is returned with `?` instead.

use crate::bytecode::Op as BytecodeOp;

/// Everything that can go wrong while compiling or executing a scene.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A bytecode opcode has no machine-lowering case. Every opcode in
    /// [`BytecodeOp`] is in fact lowered today (`Divide`/`Rsqrt` map onto
    /// `vdivps`/`vrsqrtps` directly, per spec.md §4.4's "binary ops become
    /// their AVX counterparts"); this variant exists so that a future
    /// opcode addition fails loudly here instead of panicking in
    /// `machcode::lower`.
    #[error("bytecode opcode {0:?} has no machine-code lowering")]
    Unimplemented(BytecodeOp),

    /// An ast opcode has no bytecode-lowering case. spec.md §7 lists
    /// `Scale` here; see DESIGN.md.
    #[error("ast opcode {0:?} has no bytecode lowering")]
    UnimplementedAstOp(crate::ast::Op),

    /// The encoder was asked to emit an operand shape it doesn't cover.
    #[error("encoder cannot emit this operand shape: {0}")]
    UnsupportedOperandShape(String),

    /// A shift or round immediate didn't fit in a byte.
    #[error("immediate {0:#x} does not fit in 8 bits")]
    ImmediateOutOfRange(u64),

    /// A constant-pool or stack displacement exceeded what the encoder's
    /// addressing forms can represent.
    #[error("displacement {0:#x} does not fit the encoder's addressing forms")]
    DisplacementOutOfRange(u64),

    /// Failed to map or protect an executable/constant memory region.
    #[error("failed to prepare executable memory: {0}")]
    Region(#[from] region::Error),

    /// The host CPU does not support the instructions this crate emits.
    #[error("host CPU lacks required feature: {0}")]
    UnsupportedHost(&'static str),

    /// Writing a dumped pipeline stage or rendered image failed.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
