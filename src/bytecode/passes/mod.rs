//! The bytecode optimizer (spec.md §4.3): three order-independent passes
//! run once each, in a fixed order. `optimize` makes a single pass over
//! each; running it again is expected to be idempotent (a property tested
//! in `tests/pipeline.rs`, not enforced by an internal fixpoint loop) —
//! grounded on `original_source/src/bytecode/opt.cpp`, which likewise
//! drives its passes with one top-level call per invocation.

mod constant_fold;
mod cse;
mod simplify_arithmetic;
mod unused_value;

use super::Bytecode;

/// Run CSE, constant folding, arithmetic simplification, and unused-value
/// elimination, in that order, each exactly once.
pub fn optimize(bc: &mut Bytecode) {
    cse::common_subexpression_elimination(bc);
    constant_fold::constant_fold(bc);
    simplify_arithmetic::simplify_arithmetic(bc);
    unused_value::unused_value_elimination(bc);
}
