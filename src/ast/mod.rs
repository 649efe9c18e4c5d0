//! The scene graph: composed primitives, boolean set operations, and rigid
//! transforms (spec.md §3, §4.1).
//!
//! `Ast` is a flat, append-only vector of [`Node`]s; children refer to
//! earlier or later positions in the same vector by index, never by
//! pointer, so a simplifier pass can rewrite nodes in place without
//! invalidating anyone else's references.

mod simplify;

pub use simplify::combine_identical_nodes;

use crate::util::floats_equal;
use smallvec::SmallVec;
use std::fmt;

/// Index into [`Ast::nodes`]. Non-negative values index a real node;
/// negative values are sentinels for the five inputs a compiled function
/// receives (spec.md §3).
pub type NodeId = i32;

/// The per-lane x coordinate stream.
pub const IN_X: NodeId = -1;
/// The per-lane y coordinate stream.
pub const IN_Y: NodeId = -2;
/// The per-lane z coordinate stream.
pub const IN_Z: NodeId = -3;
/// The constant-pool base pointer.
pub const IN_CONSTANTS: NodeId = -4;
/// The output distance buffer pointer.
pub const OUT_PTR: NodeId = -5;

/// Operation tag for an [`Ast`] node (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "enable-serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Op {
    /// `length(p) - r`
    Sphere,
    /// axis-aligned box centered at the origin with half-extents `(wx,wy,wz)`
    Box,
    /// a float literal, carried in [`Node::value`]
    Float32,
    /// a 3-component position built from three scalar children
    Pos3,
    /// dead node left behind by a simplifier merge; never identical to
    /// anything, including another `Noop`
    Noop,
    /// union: `min(d1, d2)`
    Add,
    /// subtraction: `max(-d1, d2)`
    Subtract,
    /// intersection: `max(d1, d2)`
    Intersect,
    /// rotate a position by three axis angles
    Rotate,
    /// translate a position by a delta
    Translate,
    /// scale a position (declared, not lowered — see DESIGN.md)
    Scale,
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A single AST node (spec.md §3).
#[derive(Debug, Clone)]
#[cfg_attr(feature = "enable-serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Node {
    pub op: Op,
    /// Child node references. Unused (and empty) for `Float32`.
    pub children: SmallVec<[NodeId; 4]>,
    /// Literal payload, only meaningful when `op == Op::Float32`.
    pub value: f32,
}

impl Node {
    fn new(op: Op, children: &[NodeId]) -> Self {
        Node {
            op,
            children: SmallVec::from_slice(children),
            value: 0.0,
        }
    }

    /// Structural identity used by the CSE peephole (spec.md §3): same tag,
    /// pointwise-equal children, and — for `Float32` — floats agreeing
    /// within tolerance. `Noop` is defined as never identical to anything.
    pub fn is_same_as(&self, other: &Node) -> bool {
        if self.op != other.op {
            return false;
        }
        if self.op == Op::Noop {
            return false;
        }
        if self.op == Op::Float32 {
            return floats_equal(self.value, other.value);
        }
        self.children == other.children
    }
}

/// A value that can be used wherever the original C++ builder accepted
/// either a raw float or a previously-built node id (the original
/// overloads `Ast::sphere`, `Ast::box_`, ... on both; Rust expresses that
/// with a small conversion trait instead of overloading).
pub trait IntoNode {
    fn into_node(self, ast: &mut Ast) -> NodeId;
}

impl IntoNode for NodeId {
    fn into_node(self, _ast: &mut Ast) -> NodeId {
        self
    }
}

impl IntoNode for f32 {
    fn into_node(self, ast: &mut Ast) -> NodeId {
        ast.float32(self)
    }
}

/// The scene graph itself: an append-only list of [`Node`]s.
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "enable-serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Ast {
    pub nodes: Vec<Node>,
}

impl Ast {
    pub fn new() -> Self {
        Ast { nodes: Vec::new() }
    }

    fn add_node(&mut self, node: Node) -> NodeId {
        self.nodes.push(node);
        (self.nodes.len() - 1) as NodeId
    }

    /// The most recently appended node is always the scene's root
    /// (spec.md §3).
    pub fn root_node_id(&self) -> NodeId {
        (self.nodes.len() - 1) as NodeId
    }

    /// Convert a node to `Noop` and drop its children, breaking its
    /// dependence on anything it used to reference.
    pub fn kill(&mut self, id: NodeId) {
        let node = &mut self.nodes[id as usize];
        node.op = Op::Noop;
        node.children.clear();
    }

    /// Redirect every reference to `from` into a reference to `to`, across
    /// every node in the graph (`Float32` nodes have no children to
    /// rewrite and are skipped).
    pub fn replace_all_uses_with(&mut self, from: NodeId, to: NodeId) {
        for node in &mut self.nodes {
            if node.op == Op::Float32 {
                continue;
            }
            for child in &mut node.children {
                if *child == from {
                    *child = to;
                }
            }
        }
    }

    // ---- primitives ----

    pub fn sphere(&mut self, position: NodeId, radius: impl IntoNode) -> NodeId {
        let radius = radius.into_node(self);
        self.add_node(Node::new(Op::Sphere, &[position, radius]))
    }

    pub fn box_(
        &mut self,
        position: NodeId,
        wx: impl IntoNode,
        wy: impl IntoNode,
        wz: impl IntoNode,
    ) -> NodeId {
        let wx = wx.into_node(self);
        let wy = wy.into_node(self);
        let wz = wz.into_node(self);
        self.add_node(Node::new(Op::Box, &[position, wx, wy, wz]))
    }

    pub fn float32(&mut self, value: f32) -> NodeId {
        let mut node = Node::new(Op::Float32, &[]);
        node.value = value;
        self.add_node(node)
    }

    pub fn pos3(&mut self, x: impl IntoNode, y: impl IntoNode, z: impl IntoNode) -> NodeId {
        let x = x.into_node(self);
        let y = y.into_node(self);
        let z = z.into_node(self);
        self.add_node(Node::new(Op::Pos3, &[x, y, z]))
    }

    // ---- composition operators ----

    pub fn add(&mut self, lhs: NodeId, rhs: NodeId) -> NodeId {
        self.add_node(Node::new(Op::Add, &[lhs, rhs]))
    }

    pub fn subtract(&mut self, lhs: NodeId, rhs: NodeId) -> NodeId {
        self.add_node(Node::new(Op::Subtract, &[lhs, rhs]))
    }

    pub fn intersect(&mut self, lhs: NodeId, rhs: NodeId) -> NodeId {
        self.add_node(Node::new(Op::Intersect, &[lhs, rhs]))
    }

    // ---- movement operators ----

    pub fn rotate(&mut self, position: NodeId, rx: f32, ry: f32, rz: f32) -> NodeId {
        let rotation = self.pos3(rx, ry, rz);
        self.rotate_by(position, rotation)
    }

    pub fn rotate_by(&mut self, position: NodeId, rotation: NodeId) -> NodeId {
        self.add_node(Node::new(Op::Rotate, &[position, rotation]))
    }

    pub fn translate(&mut self, position: NodeId, dx: f32, dy: f32, dz: f32) -> NodeId {
        let delta = self.pos3(dx, dy, dz);
        self.translate_by(position, delta)
    }

    pub fn translate_by(&mut self, position: NodeId, delta: NodeId) -> NodeId {
        self.add_node(Node::new(Op::Translate, &[position, delta]))
    }

    pub fn scale(&mut self, position: NodeId, sx: f32, sy: f32, sz: f32) -> NodeId {
        let factor = self.pos3(sx, sy, sz);
        self.scale_by(position, factor)
    }

    pub fn scale_by(&mut self, position: NodeId, factor: NodeId) -> NodeId {
        self.add_node(Node::new(Op::Scale, &[position, factor]))
    }

    // ---- diagnostics ----

    /// Linear, one-node-per-line dump (`@i: Op(@child,@child,)`).
    pub fn dump(&self) -> String {
        use std::fmt::Write as _;
        let mut out = String::new();
        for (i, node) in self.nodes.iter().enumerate() {
            let _ = write!(out, "@{i}: {}(", node.op);
            if node.op == Op::Float32 {
                let _ = write!(out, "{}", node.value);
            } else {
                for child in &node.children {
                    let _ = write!(out, "@{child},");
                }
            }
            out.push_str(")\n");
        }
        out
    }

    /// Indented s-expression dump rooted at [`Ast::root_node_id`].
    pub fn dump_sexpr(&self) -> String {
        let mut out = String::new();
        self.dump_sexpr_node(self.root_node_id(), 0, &mut out);
        out
    }

    fn dump_sexpr_node(&self, id: NodeId, indent: usize, out: &mut String) {
        use std::fmt::Write as _;
        let pad = "  ".repeat(indent);
        if id < 0 {
            let _ = writeln!(out, "{pad}(arg {})", -id - 1);
            return;
        }
        let node = &self.nodes[id as usize];
        let _ = writeln!(out, "{pad}({}", node.op);
        if node.op == Op::Float32 {
            let _ = writeln!(out, "{pad}  {}", node.value);
        } else {
            for &child in &node.children {
                self.dump_sexpr_node(child, indent + 1, out);
            }
        }
        let _ = writeln!(out, "{pad})");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_is_last_appended_node() {
        let mut ast = Ast::new();
        let pos = ast.pos3(IN_X, IN_Y, IN_Z);
        let root = ast.sphere(pos, 10.0f32);
        assert_eq!(ast.root_node_id(), root);
    }

    #[test]
    fn kill_clears_children_and_converts_to_noop() {
        let mut ast = Ast::new();
        let a = ast.float32(1.0);
        let b = ast.float32(2.0);
        let sum_ish = ast.add(a, b);
        ast.kill(sum_ish);
        assert_eq!(ast.nodes[sum_ish as usize].op, Op::Noop);
        assert!(ast.nodes[sum_ish as usize].children.is_empty());
    }

    #[test]
    fn replace_all_uses_skips_float32_nodes() {
        let mut ast = Ast::new();
        let a = ast.float32(1.0);
        let b = ast.float32(2.0);
        ast.replace_all_uses_with(a, b);
        // Float32 nodes have no children; this must not panic or mutate `value`.
        assert_eq!(ast.nodes[a as usize].value, 1.0);
    }

    #[test]
    fn is_same_as_tolerates_float_noise() {
        let mut ast = Ast::new();
        let a = ast.float32(1.0);
        let b = ast.float32(1.0 + 1e-6);
        assert!(ast.nodes[a as usize].is_same_as(&ast.nodes[b as usize]));
    }

    #[test]
    fn noop_is_never_identical() {
        let mut ast = Ast::new();
        ast.float32(1.0);
        ast.kill(0);
        let noop_copy = ast.nodes[0].clone();
        assert!(!ast.nodes[0].is_same_as(&noop_copy));
    }
}
