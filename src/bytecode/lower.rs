//! AST → bytecode lowering (spec.md §4.2), grounded on
//! `original_source/src/bytecode/bytecode.cpp`'s `Bytecode::from_ast`.

use super::{Bytecode, NodeId as BcNodeId};
use crate::ast::{self, Ast, NodeId as AstNodeId, Op as AstOp};
use crate::error::Error;
use std::collections::HashMap;

/// A position-valued AST node (`Pos3`, or anything that produces one, such
/// as `Rotate`/`Translate`) lowers to three scalar bytecode results rather
/// than one; everything else lowers to exactly one.
type Results = Vec<BcNodeId>;

pub fn lower(ast: &Ast) -> crate::Result<Bytecode> {
    let mut bc = Bytecode::new();

    let arg_x = bc.load_arg(0);
    let arg_y = bc.load_arg(1);
    let arg_z = bc.load_arg(2);
    let arg_constants = bc.load_arg(3);

    // Scalar result for each lowered ast node, keyed by ast id (including
    // the sentinel inputs).
    let mut scalar: HashMap<AstNodeId, BcNodeId> = HashMap::new();
    // Multi-result (x, y, z) for any node that represents a position.
    let mut results: HashMap<AstNodeId, Results> = HashMap::new();

    scalar.insert(ast::IN_X, arg_x);
    results.insert(ast::IN_X, vec![arg_x]);
    scalar.insert(ast::IN_Y, arg_y);
    results.insert(ast::IN_Y, vec![arg_y]);
    scalar.insert(ast::IN_Z, arg_z);
    results.insert(ast::IN_Z, vec![arg_z]);
    scalar.insert(ast::IN_CONSTANTS, arg_constants);
    results.insert(ast::IN_CONSTANTS, vec![arg_constants]);

    for (i, node) in ast.nodes.iter().enumerate() {
        let i = i as AstNodeId;
        match node.op {
            AstOp::Sphere => {
                // length(p) - r
                let position = results[&node.children[0]].clone();
                let (px, py, pz) = (position[0], position[1], position[2]);
                let radius = scalar[&node.children[1]];

                let x_sq = bc.multiply(px, px);
                let y_sq = bc.multiply(py, py);
                let z_sq = bc.multiply(pz, pz);
                let yz_sq = bc.add(y_sq, z_sq);
                let sum_sq = bc.add(x_sq, yz_sq);
                let length = bc.sqrt(sum_sq);

                let result = bc.subtract(length, radius);
                scalar.insert(i, result);
                results.insert(i, vec![result]);
            }

            AstOp::Box => {
                // d = abs(p) - b
                // length(max(d,0)) + min(max(d.x,max(d.y,d.z)),0)
                let position = results[&node.children[0]].clone();
                let (px, py, pz) = (position[0], position[1], position[2]);
                let wx = scalar[&node.children[1]];
                let wy = scalar[&node.children[2]];
                let wz = scalar[&node.children[3]];

                let abs_px = bc.abs(px);
                let abs_py = bc.abs(py);
                let abs_pz = bc.abs(pz);
                let dx = bc.subtract(abs_px, wx);
                let dy = bc.subtract(abs_py, wy);
                let dz = bc.subtract(abs_pz, wz);

                let zero = bc.assign_float(0.0);
                let dx_max = bc.max(dx, zero);
                let dy_max = bc.max(dy, zero);
                let dz_max = bc.max(dz, zero);
                let dx_sq = bc.multiply(dx_max, dx_max);
                let dy_sq = bc.multiply(dy_max, dy_max);
                let dz_sq = bc.multiply(dz_max, dz_max);
                let dyz_sq = bc.add(dy_sq, dz_sq);
                let d_sq = bc.add(dx_sq, dyz_sq);
                let length = bc.sqrt(d_sq);

                let dydz_max = bc.max(dy, dz);
                let dxyz_max = bc.max(dx, dydz_max);
                let minmax = bc.min(dxyz_max, zero);

                let result = bc.add(length, minmax);
                scalar.insert(i, result);
                results.insert(i, vec![result]);
            }

            AstOp::Float32 => {
                let result = bc.assign_float(node.value);
                scalar.insert(i, result);
                results.insert(i, vec![result]);
            }

            AstOp::Pos3 => {
                let x = scalar[&node.children[0]];
                let y = scalar[&node.children[1]];
                let z = scalar[&node.children[2]];
                results.insert(i, vec![x, y, z]);
            }

            AstOp::Noop => {}

            AstOp::Add => {
                // union: min(d1, d2)
                let lhs = scalar[&node.children[0]];
                let rhs = scalar[&node.children[1]];
                let result = bc.min(lhs, rhs);
                scalar.insert(i, result);
                results.insert(i, vec![result]);
            }

            AstOp::Subtract => {
                // max(-d1, d2)
                let lhs = scalar[&node.children[0]];
                let rhs = scalar[&node.children[1]];
                let negated = bc.negate(lhs);
                let result = bc.max(negated, rhs);
                scalar.insert(i, result);
                results.insert(i, vec![result]);
            }

            AstOp::Intersect => {
                let lhs = scalar[&node.children[0]];
                let rhs = scalar[&node.children[1]];
                let result = bc.max(lhs, rhs);
                scalar.insert(i, result);
                results.insert(i, vec![result]);
            }

            AstOp::Rotate => {
                let position = results[&node.children[0]].clone();
                let (mut x, mut y, mut z) = (position[0], position[1], position[2]);

                let rotation = results[&node.children[1]].clone();
                let (rx, ry, rz) = (rotation[0], rotation[1], rotation[2]);

                let sinrx = bc.sin(rx);
                let cosrx = bc.cos(rx);
                let sinry = bc.sin(ry);
                let cosry = bc.cos(ry);
                let sinrz = bc.sin(rz);
                let cosrz = bc.cos(rz);

                // about x: x'=x, y'=y*cos-z*sin, z'=y*sin+z*cos
                {
                    let y_cosrx = bc.multiply(y, cosrx);
                    let z_sinrx = bc.multiply(z, sinrx);
                    let y_sinrx = bc.multiply(y, sinrx);
                    let z_cosrx = bc.multiply(z, cosrx);
                    let y_prime = bc.subtract(y_cosrx, z_sinrx);
                    let z_prime = bc.add(y_sinrx, z_cosrx);
                    y = y_prime;
                    z = z_prime;
                }

                // about y: x'=x*cos+z*sin, y'=y, z'=-x*sin+z*cos
                {
                    let x_cosry = bc.multiply(x, cosry);
                    let z_sinry = bc.multiply(z, sinry);
                    let neg_sinry = bc.negate(sinry);
                    let x_negsinry = bc.multiply(x, neg_sinry);
                    let z_cosry = bc.multiply(z, cosry);
                    let x_prime = bc.add(x_cosry, z_sinry);
                    let z_prime = bc.add(x_negsinry, z_cosry);
                    x = x_prime;
                    z = z_prime;
                }

                // about z: x'=x*cos-y*sin, y'=x*sin+y*cos, z'=z
                {
                    let x_cosrz = bc.multiply(x, cosrz);
                    let y_sinrz = bc.multiply(y, sinrz);
                    let x_sinrz = bc.multiply(x, sinrz);
                    let y_cosrz = bc.multiply(y, cosrz);
                    let x_prime = bc.subtract(x_cosrz, y_sinrz);
                    let y_prime = bc.add(x_sinrz, y_cosrz);
                    x = x_prime;
                    y = y_prime;
                }

                results.insert(i, vec![x, y, z]);
            }

            AstOp::Translate => {
                let position = results[&node.children[0]].clone();
                let (x, y, z) = (position[0], position[1], position[2]);

                let delta = results[&node.children[1]].clone();
                let (dx, dy, dz) = (delta[0], delta[1], delta[2]);

                let new_x = bc.subtract(x, dx);
                let new_y = bc.subtract(y, dy);
                let new_z = bc.subtract(z, dz);

                results.insert(i, vec![new_x, new_y, new_z]);
            }

            AstOp::Scale => return Err(Error::UnimplementedAstOp(AstOp::Scale)),
        }
    }

    let root_result = scalar[&ast.root_node_id()];
    bc.store_result(root_result);

    Ok(bc)
}
