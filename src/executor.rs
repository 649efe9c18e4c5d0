//! Executable-memory management (spec.md §4.12), grounded on
//! `original_source/src/machinecode/executor.{h,cpp}`.
//!
//! The original maps pages with raw `mmap`/`mprotect`; this crate uses the
//! `region` crate instead, the same dependency `cranelift-jit` and
//! `cranelift-simplejit` reach for to do exactly this (see DESIGN.md).

use crate::error::Error;
use crate::machcode::MachineCode;
use region::{protect, Protection};
use std::ffi::c_void;

/// The compiled function's calling convention (spec.md §6): five pointer
/// arguments — per-lane x, y, z, the constant-pool base, and the output
/// buffer — System V AMD64, no return value.
type CompiledFn = unsafe extern "C" fn(
    xs: *const f32,
    ys: *const f32,
    zs: *const f32,
    constants: *const u8,
    out: *mut f32,
);

/// An eight-lane `f32` buffer aligned to a 32-byte boundary, the original's
/// `alignas(32) float[8]` (`raytracer.h`). Every argument and output load
/// the compiled code emits is a `vmovaps` — there is no unaligned `vmovups`
/// in this opcode set — so [`Executor::call`] can only accept pointers into
/// storage the type system has actually aligned, not a bare `[f32; 8]`
/// (natural alignment 4).
#[repr(align(32))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LaneBuffer(pub [f32; 8]);

impl LaneBuffer {
    pub const ZERO: LaneBuffer = LaneBuffer([0.0; 8]);

    /// Copy eight lanes out of a plain slice into aligned storage.
    /// Panics if `slice.len() != 8`.
    pub fn from_slice(slice: &[f32]) -> LaneBuffer {
        let mut buf = [0.0f32; 8];
        buf.copy_from_slice(slice);
        LaneBuffer(buf)
    }
}

impl Default for LaneBuffer {
    fn default() -> Self {
        LaneBuffer::ZERO
    }
}

impl std::ops::Deref for LaneBuffer {
    type Target = [f32; 8];

    fn deref(&self) -> &[f32; 8] {
        &self.0
    }
}

impl std::ops::DerefMut for LaneBuffer {
    fn deref_mut(&mut self) -> &mut [f32; 8] {
        &mut self.0
    }
}

impl From<[f32; 8]> for LaneBuffer {
    fn from(values: [f32; 8]) -> LaneBuffer {
        LaneBuffer(values)
    }
}

/// Owns a page of executable code and a page of read-only constants,
/// produced by assembling a [`MachineCode`] program. Immutable and
/// `Send + Sync` once built: the compiled function only reads its input
/// pointers and writes its output pointer, so any number of threads may
/// call it concurrently as long as each supplies its own output buffer
/// (spec.md §5).
pub struct Executor {
    code: region::Allocation,
    code_len: usize,
    constants: region::Allocation,
}

// SAFETY: both allocations are immutable after `Executor::new` returns
// (code is read+exec, constants are read-only), and the compiled function
// itself touches only caller-supplied pointers.
unsafe impl Send for Executor {}
unsafe impl Sync for Executor {}

impl Executor {
    /// Assemble `mc` and map it executable. Requires a host with AVX2;
    /// checked at runtime since the compiled bytes assume it
    /// unconditionally.
    pub fn new(mc: &MachineCode) -> crate::Result<Executor> {
        if !is_x86_feature_detected!("avx2") {
            return Err(Error::UnsupportedHost("avx2"));
        }

        let program = crate::machcode::encoder::encode(mc)?;
        let code = map_region(&program.code, Protection::READ_WRITE)?;
        // SAFETY: `code` was just allocated by `region::alloc` with room
        // for at least `program.code.len()` bytes.
        unsafe {
            std::ptr::copy_nonoverlapping(program.code.as_ptr(), code.as_ptr::<u8>() as *mut u8, program.code.len());
        }
        // SAFETY: `code`'s full allocated range is what we just wrote.
        unsafe {
            protect(code.as_ptr::<u8>(), code.len(), Protection::READ_EXECUTE)?;
        }

        let constant_bytes = mc.constants.data();
        let constants = map_region(constant_bytes, Protection::READ_WRITE)?;
        unsafe {
            std::ptr::copy_nonoverlapping(
                constant_bytes.as_ptr(),
                constants.as_ptr::<u8>() as *mut u8,
                constant_bytes.len(),
            );
        }
        unsafe {
            protect(constants.as_ptr::<u8>(), constants.len(), Protection::READ_ONLY)?;
        }

        Ok(Executor { code_len: program.code.len(), code, constants })
    }

    /// The mapped code region's base address and length, used by the
    /// perf-map writer (spec.md §4.12, behind the `perf-map` feature).
    pub fn code_region(&self) -> (*const c_void, usize) {
        (self.code.as_ptr::<u8>() as *const c_void, self.code_len)
    }

    /// Invoke the compiled function over one lane bundle (eight rays).
    /// Every buffer is 32-byte aligned by construction (`LaneBuffer`); `out`
    /// receives eight distances.
    pub fn call(&self, xs: &LaneBuffer, ys: &LaneBuffer, zs: &LaneBuffer, out: &mut LaneBuffer) {
        let func: CompiledFn = unsafe { std::mem::transmute(self.code.as_ptr::<u8>()) };
        // SAFETY: `func` was assembled from a machine program whose ABI
        // matches `CompiledFn` exactly (spec.md §6); all five pointers are
        // valid for the duration of this call and don't alias each other
        // (`out` is `&mut`, the rest are shared references), and each is
        // 32-byte aligned as `vmovaps` requires.
        unsafe {
            func(xs.0.as_ptr(), ys.0.as_ptr(), zs.0.as_ptr(), self.constants.as_ptr::<u8>(), out.0.as_mut_ptr());
        }
    }
}

fn map_region(bytes: &[u8], initial: Protection) -> crate::Result<region::Allocation> {
    let len = bytes.len().max(1);
    // SAFETY: `region::alloc` itself performs the mapping; there is no
    // precondition beyond a nonzero length, which `.max(1)` guarantees.
    let alloc = unsafe { region::alloc(len, initial)? };
    Ok(alloc)
}
