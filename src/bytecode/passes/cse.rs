//! Bytecode-level common-subexpression elimination, grounded on
//! `original_source/src/bytecode/passes/cse.cpp`.

use super::Bytecode;

/// Quadratic sweep: for `i < j`, if `j` is identical to `i`, redirect every
/// reference to `j` into `i` and convert `j` to `Nop`.
pub fn common_subexpression_elimination(bc: &mut Bytecode) {
    let mut merged = 0usize;
    for i in 0..bc.nodes.len() {
        for j in (i + 1)..bc.nodes.len() {
            if !bc.nodes[i].is_same_as(&bc.nodes[j]) {
                continue;
            }
            bc.replace_all_uses_with(j, i);
            bc.nodes[j].convert_to_nop();
            merged += 1;
        }
    }
    log::debug!("bytecode cse merged {merged} duplicate node(s)");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::Op;

    #[test]
    fn merges_identical_multiplies() {
        let mut bc = Bytecode::new();
        let x = bc.load_arg(0);
        let a = bc.multiply(x, x);
        let b = bc.multiply(x, x);
        bc.add(a, b);

        common_subexpression_elimination(&mut bc);

        assert_eq!(bc.nodes[b].op, Op::Nop);
        assert_eq!(bc.nodes[bc.nodes.len() - 1].operands[1], a);
    }

    #[test]
    fn distinct_loads_are_not_merged() {
        let mut bc = Bytecode::new();
        let x = bc.load_arg(0);
        let y = bc.load_arg(1);
        bc.add(x, y);

        common_subexpression_elimination(&mut bc);

        assert_eq!(bc.nodes[x].op, Op::LoadArg);
        assert_eq!(bc.nodes[y].op, Op::LoadArg);
    }
}
