//! Scalar SSA bytecode lowered from the [`crate::ast::Ast`] (spec.md §3,
//! §4.2), and its local optimization passes (spec.md §4.3).
//!
//! Like [`crate::ast::Ast`], this is a flat, append-only, index-addressed
//! sequence: every operand reference points strictly backward (spec.md §3's
//! topological-order invariant), which is what lets every pass below rewrite
//! nodes to `Nop` in place instead of physically removing them.

mod lower;
pub mod passes;

pub use passes::optimize;

use crate::util::floats_equal;
use smallvec::SmallVec;

/// Index into [`Bytecode::nodes`]. Always non-negative: bytecode has no
/// sentinel inputs of its own, since the AST's negative sentinels are
/// materialized into concrete `Load_Arg` nodes during lowering
/// (spec.md §4.2).
pub type NodeId = usize;

/// Opcode for a [`Node`] (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    /// dead instruction; never equal to anything
    Nop,
    /// materialize one of the four incoming pointer arguments
    LoadArg,
    /// the sink: consumes the final distance value
    StoreResult,
    /// `rhs`, unchanged (kept for completeness; has no AST producer — see
    /// DESIGN.md)
    Assign,
    /// a float literal, carried in [`Node::value`]
    AssignFloat,
    Add,
    Subtract,
    Multiply,
    Divide,
    Sqrt,
    Rsqrt,
    Abs,
    Negate,
    Min,
    Max,
    Sin,
    Cos,
    Mod,
}

/// A single bytecode instruction (spec.md §3).
#[derive(Debug, Clone)]
pub struct Node {
    pub op: Op,
    /// Operand references, valid whenever [`Node::has_operands`] is true.
    pub operands: SmallVec<[NodeId; 2]>,
    /// Literal payload, valid when `op == Op::AssignFloat`.
    pub value: f32,
    /// Which of the incoming pointer arguments to load, valid when
    /// `op == Op::LoadArg`.
    pub arg_index: usize,
}

impl Node {
    fn with_operands(op: Op, operands: &[NodeId]) -> Self {
        Node {
            op,
            operands: SmallVec::from_slice(operands),
            value: 0.0,
            arg_index: 0,
        }
    }

    /// `true` for every opcode except `AssignFloat` and `LoadArg`, which
    /// carry a payload in `value`/`arg_index` instead of operands.
    pub fn has_operands(&self) -> bool {
        !matches!(self.op, Op::AssignFloat | Op::LoadArg)
    }

    /// Equality used for common-subexpression purposes (spec.md §3):
    /// `Nop` is never equal to anything, `AssignFloat` compares payloads
    /// within tolerance, `LoadArg` compares its argument index, everything
    /// else compares opcode and operand list pointwise.
    pub fn is_same_as(&self, other: &Node) -> bool {
        if self.op != other.op {
            return false;
        }
        match self.op {
            Op::Nop => false,
            Op::AssignFloat => floats_equal(self.value, other.value),
            Op::LoadArg => self.arg_index == other.arg_index,
            _ => self.operands == other.operands,
        }
    }

    /// Convert this node to a dead `Nop`, dropping its operands.
    pub fn convert_to_nop(&mut self) {
        self.op = Op::Nop;
        self.operands.clear();
    }

    /// Does this node reference `id` as an operand?
    pub fn uses(&self, id: NodeId) -> bool {
        self.has_operands() && self.operands.contains(&id)
    }

    /// Redirect any operand equal to `from` into `to`.
    pub fn replace_all_uses_with(&mut self, from: NodeId, to: NodeId) {
        if !self.has_operands() {
            return;
        }
        for operand in &mut self.operands {
            if *operand == from {
                *operand = to;
            }
        }
    }

    /// Is every operand of this node an `AssignFloat` literal? Used by the
    /// constant-folding pass to decide whether a node can be replaced by a
    /// single folded literal.
    pub fn is_constant_expression(&self, bc: &Bytecode) -> bool {
        self.has_operands()
            && !self.operands.is_empty()
            && self
                .operands
                .iter()
                .all(|&id| bc.nodes[id].op == Op::AssignFloat)
    }
}

/// The bytecode program itself.
#[derive(Debug, Clone, Default)]
pub struct Bytecode {
    pub nodes: Vec<Node>,
}

impl Bytecode {
    pub fn new() -> Self {
        Bytecode { nodes: Vec::new() }
    }

    pub fn add_node(&mut self, node: Node) -> NodeId {
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    /// Redirect every reference to `from` into a reference to `to`, across
    /// every node in the program.
    pub fn replace_all_uses_with(&mut self, from: NodeId, to: NodeId) {
        for node in &mut self.nodes {
            node.replace_all_uses_with(from, to);
        }
    }

    /// Lower an [`crate::ast::Ast`] into bytecode (spec.md §4.2).
    pub fn from_ast(ast: &crate::ast::Ast) -> crate::Result<Bytecode> {
        lower::lower(ast)
    }

    /// `@i: Op(@operand, @operand, ...)`, one line per node.
    pub fn dump(&self) -> String {
        use std::fmt::Write as _;
        let mut out = String::new();
        for (i, node) in self.nodes.iter().enumerate() {
            let _ = write!(out, "@{i}: {:?}(", node.op);
            match node.op {
                Op::AssignFloat => {
                    let _ = write!(out, "{}", node.value);
                }
                Op::LoadArg => {
                    let _ = write!(out, "{}", node.arg_index);
                }
                _ => {
                    for operand in &node.operands {
                        let _ = write!(out, "@{operand}, ");
                    }
                }
            }
            out.push_str(")\n");
        }
        out
    }

    pub fn nop(&mut self) -> NodeId {
        self.add_node(Node::with_operands(Op::Nop, &[]))
    }

    pub fn load_arg(&mut self, arg_index: usize) -> NodeId {
        let mut node = Node::with_operands(Op::LoadArg, &[]);
        node.arg_index = arg_index;
        self.add_node(node)
    }

    pub fn store_result(&mut self, value: NodeId) -> NodeId {
        self.add_node(Node::with_operands(Op::StoreResult, &[value]))
    }

    pub fn assign(&mut self, rhs: NodeId) -> NodeId {
        self.add_node(Node::with_operands(Op::Assign, &[rhs]))
    }

    pub fn assign_float(&mut self, value: f32) -> NodeId {
        let mut node = Node::with_operands(Op::AssignFloat, &[]);
        node.value = value;
        self.add_node(node)
    }

    pub fn add(&mut self, lhs: NodeId, rhs: NodeId) -> NodeId {
        self.add_node(Node::with_operands(Op::Add, &[lhs, rhs]))
    }

    pub fn subtract(&mut self, lhs: NodeId, rhs: NodeId) -> NodeId {
        self.add_node(Node::with_operands(Op::Subtract, &[lhs, rhs]))
    }

    pub fn multiply(&mut self, lhs: NodeId, rhs: NodeId) -> NodeId {
        self.add_node(Node::with_operands(Op::Multiply, &[lhs, rhs]))
    }

    pub fn divide(&mut self, lhs: NodeId, rhs: NodeId) -> NodeId {
        self.add_node(Node::with_operands(Op::Divide, &[lhs, rhs]))
    }

    pub fn sqrt(&mut self, value: NodeId) -> NodeId {
        self.add_node(Node::with_operands(Op::Sqrt, &[value]))
    }

    pub fn rsqrt(&mut self, value: NodeId) -> NodeId {
        self.add_node(Node::with_operands(Op::Rsqrt, &[value]))
    }

    pub fn abs(&mut self, value: NodeId) -> NodeId {
        self.add_node(Node::with_operands(Op::Abs, &[value]))
    }

    pub fn negate(&mut self, value: NodeId) -> NodeId {
        self.add_node(Node::with_operands(Op::Negate, &[value]))
    }

    pub fn min(&mut self, lhs: NodeId, rhs: NodeId) -> NodeId {
        self.add_node(Node::with_operands(Op::Min, &[lhs, rhs]))
    }

    pub fn max(&mut self, lhs: NodeId, rhs: NodeId) -> NodeId {
        self.add_node(Node::with_operands(Op::Max, &[lhs, rhs]))
    }

    pub fn sin(&mut self, value: NodeId) -> NodeId {
        self.add_node(Node::with_operands(Op::Sin, &[value]))
    }

    pub fn cos(&mut self, value: NodeId) -> NodeId {
        self.add_node(Node::with_operands(Op::Cos, &[value]))
    }

    pub fn modulo(&mut self, lhs: NodeId, rhs: NodeId) -> NodeId {
        self.add_node(Node::with_operands(Op::Mod, &[lhs, rhs]))
    }
}
