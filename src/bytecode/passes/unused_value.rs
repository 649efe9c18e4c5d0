//! Unused-value elimination, grounded on
//! `original_source/src/bytecode/passes/unused_value_elimination.cpp`.

use super::Bytecode;
use crate::bytecode::Op;

fn is_unused(bc: &Bytecode, id: usize) -> bool {
    !bc.nodes.iter().any(|other| other.uses(id))
}

/// A node that is not `StoreResult` and is referenced by nothing else is
/// converted to `Nop`. Walking in reverse index order lets a single sweep
/// collect a whole cascade of deaths (killing a node can make whatever it
/// used become unused in turn).
pub fn unused_value_elimination(bc: &mut Bytecode) {
    let mut killed = 0usize;
    for i in (0..bc.nodes.len()).rev() {
        if bc.nodes[i].op == Op::StoreResult {
            continue;
        }
        if is_unused(bc, i) {
            bc.nodes[i].convert_to_nop();
            killed += 1;
        }
    }
    log::debug!("unused value elimination killed {killed} node(s)");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kills_cascading_dead_chain() {
        let mut bc = Bytecode::new();
        let x = bc.load_arg(0);
        let y = bc.load_arg(1);
        let dead = bc.add(x, y); // never used
        let _ = dead;
        let live = bc.assign_float(1.0);
        bc.store_result(live);

        unused_value_elimination(&mut bc);

        assert_eq!(bc.nodes[dead].op, Op::Nop);
        assert_eq!(bc.nodes[x].op, Op::Nop);
        assert_eq!(bc.nodes[y].op, Op::Nop);
    }

    #[test]
    fn store_result_is_never_eliminated() {
        let mut bc = Bytecode::new();
        let value = bc.assign_float(1.0);
        let store = bc.store_result(value);

        unused_value_elimination(&mut bc);

        assert_eq!(bc.nodes[store].op, Op::StoreResult);
    }
}
