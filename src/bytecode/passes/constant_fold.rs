//! Constant folding, grounded on
//! `original_source/src/bytecode/passes/constant_fold.cpp`.

use super::Bytecode;
use crate::bytecode::Op;

/// For any node whose every operand is an `AssignFloat`, evaluate it and
/// replace the node in place with a fresh `AssignFloat` literal. Covers the
/// full arithmetic opcode set; anything else is left untouched (a later
/// pass may still make it dead).
pub fn constant_fold(bc: &mut Bytecode) {
    let mut folded_count = 0usize;
    for i in 0..bc.nodes.len() {
        if !bc.nodes[i].is_constant_expression(bc) {
            continue;
        }

        let operands = bc.nodes[i].operands.clone();
        let op = bc.nodes[i].op;

        let folded = match op {
            Op::Add => Some(bc.nodes[operands[0]].value + bc.nodes[operands[1]].value),
            Op::Subtract => Some(bc.nodes[operands[0]].value - bc.nodes[operands[1]].value),
            Op::Multiply => Some(bc.nodes[operands[0]].value * bc.nodes[operands[1]].value),
            Op::Divide => Some(bc.nodes[operands[0]].value / bc.nodes[operands[1]].value),
            Op::Sqrt => Some(bc.nodes[operands[0]].value.sqrt()),
            Op::Abs => Some(bc.nodes[operands[0]].value.abs()),
            Op::Negate => Some(-bc.nodes[operands[0]].value),
            Op::Min => Some(bc.nodes[operands[0]].value.min(bc.nodes[operands[1]].value)),
            Op::Max => Some(bc.nodes[operands[0]].value.max(bc.nodes[operands[1]].value)),
            Op::Sin => Some(bc.nodes[operands[0]].value.sin()),
            Op::Cos => Some(bc.nodes[operands[0]].value.cos()),
            Op::Mod => Some(bc.nodes[operands[0]].value % bc.nodes[operands[1]].value),
            // no folding rule for this opcode (yet)
            _ => None,
        };

        // We'd like to convert the now-dead operands to Nop here, but we
        // don't know yet whether they're used elsewhere; unused-value
        // elimination cleans them up afterward.
        if let Some(value) = folded {
            let node = &mut bc.nodes[i];
            node.operands.clear();
            node.op = Op::AssignFloat;
            node.value = value;
            folded_count += 1;
        }
    }
    log::debug!("constant folding replaced {folded_count} node(s)");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folds_constant_arithmetic_chain() {
        let mut bc = Bytecode::new();
        let two = bc.assign_float(2.0);
        let three = bc.assign_float(3.0);
        let sum = bc.add(two, three);

        constant_fold(&mut bc);

        assert_eq!(bc.nodes[sum].op, Op::AssignFloat);
        assert_eq!(bc.nodes[sum].value, 5.0);
    }

    #[test]
    fn leaves_non_constant_operands_alone() {
        let mut bc = Bytecode::new();
        let x = bc.load_arg(0);
        let two = bc.assign_float(2.0);
        let product = bc.multiply(x, two);

        constant_fold(&mut bc);

        assert_eq!(bc.nodes[product].op, Op::Multiply);
    }
}
