//! `sdfjit` compiles symbolic signed-distance-field scenes to native AVX2
//! machine code and drives the result with a sphere-tracing raymarcher.
//!
//! The compilation pipeline has three intermediate representations, each a
//! flat, index-addressed sequence so that passes can rewrite nodes in place
//! without disturbing earlier indices:
//!
//!   - [`ast`]: the scene graph (primitives, booleans, rigid transforms).
//!   - [`bytecode`]: a scalar SSA form lowered from the AST.
//!   - [`machcode`]: vector machine instructions, lowered from bytecode,
//!     resolved, register-allocated, and encoded to x86-64 bytes.
//!
//! [`executor::Executor`] maps the encoded bytes executable and
//! [`raymarch::Raymarcher`] drives it with bundles of rays.
//!
//! Only x86-64 with AVX/AVX2 is supported; there is no generic backend and
//! compiled functions are straight-line (no branches, no loops).

pub mod ast;
pub mod bytecode;
pub mod error;
pub mod executor;
pub mod machcode;
#[cfg(feature = "perf-map")]
pub mod perfmap;
pub mod raymarch;
mod util;

pub use error::Error;
pub use raymarch::{CompileOptions, Raymarcher};

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
