//! AST-level common-subexpression elimination (spec.md §4.1), grounded on
//! `original_source/src/ast/combine_identical_nodes.cpp`.

use super::{Ast, Op};

/// A single quadratic sweep: for each pair `(i, j < i)`, if `j` is
/// identical to `i`, redirect every reference to `j` into a reference to
/// `i` and kill `j`. Indices stay stable; killed nodes are retained as
/// `Noop` rather than removed.
pub fn combine_identical_nodes(ast: &mut Ast) {
    let mut merged = 0usize;
    for i in 0..ast.nodes.len() {
        for j in (i + 1)..ast.nodes.len() {
            if ast.nodes[i].is_same_as(&ast.nodes[j]) {
                ast.replace_all_uses_with(j as i32, i as i32);
                ast.kill(j as i32);
                merged += 1;
            }
        }
    }
    log::debug!("ast cse merged {merged} duplicate node(s)");
}
