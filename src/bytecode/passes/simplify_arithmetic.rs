//! Arithmetic simplification, grounded on
//! `original_source/src/bytecode/passes/simplify_arithmetic.cpp`.

use super::Bytecode;
use crate::bytecode::Op;
use crate::util::floats_equal;

fn operand_is_add_or_subtract_by_zero(bc: &Bytecode, node_op: Op, operand: crate::bytecode::NodeId) -> bool {
    matches!(node_op, Op::Add | Op::Subtract)
        && bc.nodes[operand].op == Op::AssignFloat
        && floats_equal(bc.nodes[operand].value, 0.0)
}

fn operand_is_multiply_by_one(bc: &Bytecode, node_op: Op, operand: crate::bytecode::NodeId) -> bool {
    node_op == Op::Multiply
        && bc.nodes[operand].op == Op::AssignFloat
        && floats_equal(bc.nodes[operand].value, 1.0)
}

fn operand_is_multiply_by_zero(bc: &Bytecode, node_op: Op, operand: crate::bytecode::NodeId) -> bool {
    node_op == Op::Multiply
        && bc.nodes[operand].op == Op::AssignFloat
        && floats_equal(bc.nodes[operand].value, 0.0)
}

/// `x+0`/`x-0` → forward to `x`; `x*1` → forward to `x`; `x*0` →
/// `AssignFloat(0)`.
pub fn simplify_arithmetic(bc: &mut Bytecode) {
    let mut simplified = 0usize;
    for i in 0..bc.nodes.len() {
        let op = bc.nodes[i].op;
        if !bc.nodes[i].has_operands() || bc.nodes[i].operands.len() != 2 {
            continue;
        }
        let lhs = bc.nodes[i].operands[0];
        let rhs = bc.nodes[i].operands[1];

        let is_lhs_zero = operand_is_add_or_subtract_by_zero(bc, op, lhs);
        let is_rhs_zero = operand_is_add_or_subtract_by_zero(bc, op, rhs);
        if is_lhs_zero || is_rhs_zero {
            let forward_to = if is_lhs_zero { rhs } else { lhs };
            bc.nodes[i].convert_to_nop();
            bc.replace_all_uses_with(i, forward_to);
            simplified += 1;
            continue;
        }

        let is_lhs_one = operand_is_multiply_by_one(bc, op, lhs);
        let is_rhs_one = operand_is_multiply_by_one(bc, op, rhs);
        if is_lhs_one || is_rhs_one {
            let forward_to = if is_lhs_one { rhs } else { lhs };
            bc.nodes[i].convert_to_nop();
            bc.replace_all_uses_with(i, forward_to);
            simplified += 1;
            continue;
        }

        if operand_is_multiply_by_zero(bc, op, lhs) || operand_is_multiply_by_zero(bc, op, rhs) {
            let node = &mut bc.nodes[i];
            node.op = Op::AssignFloat;
            node.operands.clear();
            node.value = 0.0;
            simplified += 1;
        }
    }
    log::debug!("arithmetic simplification rewrote {simplified} node(s)");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_zero_forwards_to_operand() {
        let mut bc = Bytecode::new();
        let x = bc.load_arg(0);
        let zero = bc.assign_float(0.0);
        let sum = bc.add(x, zero);
        let user = bc.sqrt(sum);

        simplify_arithmetic(&mut bc);

        assert_eq!(bc.nodes[sum].op, Op::Nop);
        assert_eq!(bc.nodes[user].operands[0], x);
    }

    #[test]
    fn multiply_one_forwards_and_multiply_zero_becomes_literal() {
        let mut bc = Bytecode::new();
        let x = bc.load_arg(0);
        let one = bc.assign_float(1.0);
        let scaled = bc.multiply(x, one);

        let zero = bc.assign_float(0.0);
        let zeroed = bc.multiply(x, zero);

        simplify_arithmetic(&mut bc);

        assert_eq!(bc.nodes[scaled].op, Op::Nop);
        assert_eq!(bc.nodes[zeroed].op, Op::AssignFloat);
        assert_eq!(bc.nodes[zeroed].value, 0.0);
    }
}
