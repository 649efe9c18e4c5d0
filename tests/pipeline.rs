//! End-to-end pipeline scenarios (spec.md §8, S1-S6): scene AST all the way
//! through to a JIT'd function call. These exercise real AVX2 machine code,
//! so every test bails out on hosts that can't run it.

use proptest::prelude::*;
use sdfjit::ast::{Ast, IN_X, IN_Y, IN_Z};
use sdfjit::bytecode::{Bytecode, NodeId};
use sdfjit::executor::{Executor, LaneBuffer};
use sdfjit::machcode;

const EPSILON: f32 = 1e-3;

fn avx2_available() -> bool {
    #[cfg(target_arch = "x86_64")]
    {
        is_x86_feature_detected!("avx2")
    }
    #[cfg(not(target_arch = "x86_64"))]
    {
        false
    }
}

/// Compile `ast`'s root and evaluate it at a single point, replicated across
/// all eight lanes (the caller only cares about lane 0).
fn eval(ast: &Ast, x: f32, y: f32, z: f32) -> f32 {
    let mut bc = Bytecode::from_ast(ast).expect("ast should lower to bytecode");
    sdfjit::bytecode::optimize(&mut bc);
    let mc = machcode::lower::lower(&bc);
    let exec = Executor::new(&mc).expect("mc should assemble and map");

    let xs = LaneBuffer([x; 8]);
    let ys = LaneBuffer([y; 8]);
    let zs = LaneBuffer([z; 8]);
    let mut out = LaneBuffer::ZERO;
    exec.call(&xs, &ys, &zs, &mut out);
    out[0]
}

fn assert_close(actual: f32, expected: f32, msg: &str) {
    assert!(
        (actual - expected).abs() < EPSILON,
        "{msg}: expected {expected}, got {actual}"
    );
}

#[test]
fn s1_single_sphere_at_origin() {
    if !avx2_available() {
        return;
    }
    let mut ast = Ast::new();
    let pos = ast.pos3(IN_X, IN_Y, IN_Z);
    ast.sphere(pos, 10.0f32);

    assert_close(eval(&ast, 0.0, 0.0, 0.0), -10.0, "inside sphere");
    assert_close(eval(&ast, 10.0, 0.0, 0.0), 0.0, "on sphere surface");
    assert_close(eval(&ast, 20.0, 0.0, 0.0), 10.0, "outside sphere");
}

#[test]
fn s2_box_at_origin() {
    if !avx2_available() {
        return;
    }
    let mut ast = Ast::new();
    let pos = ast.pos3(IN_X, IN_Y, IN_Z);
    ast.box_(pos, 10.0f32, 20.0f32, 30.0f32);

    assert_close(eval(&ast, 0.0, 0.0, 0.0), -10.0, "inside box, nearest face at x");
    assert_close(eval(&ast, 15.0, 0.0, 0.0), 5.0, "outside box along x");
    assert_close(eval(&ast, 10.0, 20.0, 30.0), 0.0, "exactly on box corner-face");
}

#[test]
fn s3_union_of_two_spheres() {
    if !avx2_available() {
        return;
    }
    let mut ast = Ast::new();
    let pos = ast.pos3(IN_X, IN_Y, IN_Z);
    let a = ast.sphere(pos, 10.0f32);
    let translated = ast.translate(pos, 20.0, 0.0, 0.0);
    let b = ast.sphere(translated, 5.0f32);
    ast.add(a, b);

    assert_close(eval(&ast, 0.0, 0.0, 0.0), -10.0, "inside first sphere");
    assert_close(eval(&ast, 20.0, 0.0, 0.0), -5.0, "inside second sphere");
    assert_close(eval(&ast, 30.0, 0.0, 0.0), 5.0, "outside both, nearer second");
}

#[test]
fn s4_subtract_carves_a_hole() {
    if !avx2_available() {
        return;
    }
    let mut ast = Ast::new();
    let pos = ast.pos3(IN_X, IN_Y, IN_Z);
    let a = ast.sphere(pos, 10.0f32);
    let translated = ast.translate(pos, 5.0, 0.0, 0.0);
    let b = ast.sphere(translated, 3.0f32);
    ast.subtract(a, b);

    assert_close(eval(&ast, -10.0, 0.0, 0.0), 0.0, "on the surviving sphere's surface");
    assert!(
        eval(&ast, 5.0, 0.0, 0.0) > 0.0,
        "carved-out region should read as outside the solid"
    );
}

#[test]
fn s5_rotate_by_pi_about_y_flips_x_and_z() {
    if !avx2_available() {
        return;
    }
    let mut rotated_ast = Ast::new();
    let pos = rotated_ast.pos3(IN_X, IN_Y, IN_Z);
    let rotated = rotated_ast.rotate(pos, 0.0, std::f32::consts::PI, 0.0);
    rotated_ast.box_(rotated, 10.0f32, 20.0f32, 30.0f32);

    let mut plain_ast = Ast::new();
    let plain_pos = plain_ast.pos3(IN_X, IN_Y, IN_Z);
    plain_ast.box_(plain_pos, 10.0f32, 20.0f32, 30.0f32);

    for &(x, y, z) in &[(15.0f32, 0.0f32, 0.0f32), (0.0, 0.0, 35.0), (5.0, 25.0, -12.0)] {
        let rotated_value = eval(&rotated_ast, x, y, z);
        let plain_value = eval(&plain_ast, -x, y, -z);
        assert_close(
            rotated_value,
            plain_value,
            "rotating the box by pi about y should match evaluating the unrotated box with x/z negated",
        );
    }
}

#[test]
fn s6_translate_moves_the_sphere() {
    if !avx2_available() {
        return;
    }
    let mut ast = Ast::new();
    let pos = ast.pos3(IN_X, IN_Y, IN_Z);
    let moved = ast.translate(pos, 100.0, 0.0, 0.0);
    ast.sphere(moved, 10.0f32);

    assert_close(eval(&ast, 100.0, 0.0, 0.0), -10.0, "at the translated sphere's center");
    assert_close(eval(&ast, 0.0, 0.0, 0.0), 90.0, "far from the translated sphere");
}

/// Property tests for spec.md §8's "Round-trip and equivalence" bullets:
/// the optimizer is idempotent after one application, and optimizing
/// doesn't change what the compiled function computes. Scenes are built
/// from a small random union/subtract/intersect combination of a sphere
/// and a translated box, which is enough structure to exercise CSE,
/// constant folding, and unused-value elimination without needing a
/// bytecode interpreter to check against.
mod optimizer_properties {
    use super::*;

    #[derive(Debug, Clone, Copy)]
    enum Combine {
        Add,
        Subtract,
        Intersect,
    }

    fn combine_strategy() -> impl Strategy<Value = Combine> {
        prop_oneof![Just(Combine::Add), Just(Combine::Subtract), Just(Combine::Intersect)]
    }

    fn build_scene(radius: f32, box_dims: (f32, f32, f32), offset: (f32, f32, f32), combine: Combine) -> Ast {
        let mut ast = Ast::new();
        let pos = ast.pos3(IN_X, IN_Y, IN_Z);
        let sphere = ast.sphere(pos, radius);
        let translated = ast.translate(pos, offset.0, offset.1, offset.2);
        let cube = ast.box_(translated, box_dims.0, box_dims.1, box_dims.2);
        match combine {
            Combine::Add => ast.add(sphere, cube),
            Combine::Subtract => ast.subtract(sphere, cube),
            Combine::Intersect => ast.intersect(sphere, cube),
        };
        ast
    }

    fn lower_to_bytecode(ast: &Ast) -> Bytecode {
        Bytecode::from_ast(ast).expect("scene should lower to bytecode")
    }

    /// Running the optimizer a second time on its own output changes
    /// nothing further: its dump is a fixed point after one application.
    fn optimize_is_idempotent_after_first_application(
        radius: f32,
        box_dims: (f32, f32, f32),
        offset: (f32, f32, f32),
        combine: Combine,
    ) {
        let ast = build_scene(radius, box_dims, offset, combine);
        let mut bc = lower_to_bytecode(&ast);

        sdfjit::bytecode::optimize(&mut bc);
        let once = bc.dump();

        sdfjit::bytecode::optimize(&mut bc);
        let twice = bc.dump();

        assert_eq!(once, twice, "optimize() should be a fixed point after its first application");
    }

    /// Optimizing the bytecode must not change what the compiled function
    /// computes at an arbitrary sample point.
    fn optimize_preserves_compiled_output(
        radius: f32,
        box_dims: (f32, f32, f32),
        offset: (f32, f32, f32),
        combine: Combine,
        sample: (f32, f32, f32),
    ) {
        if !avx2_available() {
            return;
        }
        let ast = build_scene(radius, box_dims, offset, combine);

        let unoptimized_bc = lower_to_bytecode(&ast);
        let unoptimized_mc = machcode::lower::lower(&unoptimized_bc);
        let unoptimized_exec = Executor::new(&unoptimized_mc).expect("unoptimized mc should assemble");

        let mut optimized_bc = unoptimized_bc;
        sdfjit::bytecode::optimize(&mut optimized_bc);
        let optimized_mc = machcode::lower::lower(&optimized_bc);
        let optimized_exec = Executor::new(&optimized_mc).expect("optimized mc should assemble");

        let xs = LaneBuffer([sample.0; 8]);
        let ys = LaneBuffer([sample.1; 8]);
        let zs = LaneBuffer([sample.2; 8]);
        let mut unoptimized_out = LaneBuffer::ZERO;
        let mut optimized_out = LaneBuffer::ZERO;
        unoptimized_exec.call(&xs, &ys, &zs, &mut unoptimized_out);
        optimized_exec.call(&xs, &ys, &zs, &mut optimized_out);

        assert_close(
            optimized_out[0],
            unoptimized_out[0],
            "optimizing the bytecode should not change the compiled result",
        );
    }

    /// Redirecting every use of a folded constant expression to a fresh
    /// `Assign_Float` of the same value must not change downstream results
    /// (spec.md §8's constant-folding soundness bullet).
    #[test]
    fn constant_fold_substitution_preserves_output() {
        if !avx2_available() {
            return;
        }
        let mut bc = Bytecode::new();
        let x = bc.load_arg(0);
        let y = bc.load_arg(1);
        let z = bc.load_arg(2);
        let _constants = bc.load_arg(3);

        // A constant sub-expression (2.0 + 3.0) folds to 5.0; check that
        // swapping it for a fresh literal node of the same value, by hand,
        // produces identical output to running the real constant-fold pass.
        let two: NodeId = bc.assign_float(2.0);
        let three: NodeId = bc.assign_float(3.0);
        let folded_sum = bc.add(two, three);
        let radius_sq = bc.multiply(folded_sum, folded_sum);
        let x_sq = bc.multiply(x, x);
        let y_sq = bc.multiply(y, y);
        let z_sq = bc.multiply(z, z);
        let yz_sq = bc.add(y_sq, z_sq);
        let length_sq = bc.add(x_sq, yz_sq);
        let length = bc.sqrt(length_sq);
        let radius = bc.sqrt(radius_sq);
        let distance = bc.subtract(length, radius);
        bc.store_result(distance);

        let mut by_pass = bc.clone();
        sdfjit::bytecode::optimize(&mut by_pass);

        let mut by_hand = bc.clone();
        let fresh_literal = by_hand.assign_float(5.0);
        by_hand.replace_all_uses_with(radius_sq, fresh_literal);

        let mc_pass = machcode::lower::lower(&by_pass);
        let mc_hand = machcode::lower::lower(&by_hand);
        let exec_pass = Executor::new(&mc_pass).expect("pass-folded mc should assemble");
        let exec_hand = Executor::new(&mc_hand).expect("hand-folded mc should assemble");

        let xs = LaneBuffer([7.0f32; 8]);
        let ys = LaneBuffer([1.0f32; 8]);
        let zs = LaneBuffer([2.0f32; 8]);
        let mut out_pass = LaneBuffer::ZERO;
        let mut out_hand = LaneBuffer::ZERO;
        exec_pass.call(&xs, &ys, &zs, &mut out_pass);
        exec_hand.call(&xs, &ys, &zs, &mut out_hand);

        assert_close(out_hand[0], out_pass[0], "hand-substituted constant fold should match the real pass");
    }

    proptest! {
        #[test]
        fn idempotent_after_first_application(
            radius in 1.0f32..50.0,
            box_dims in (1.0f32..50.0, 1.0f32..50.0, 1.0f32..50.0),
            offset in (-50.0f32..50.0, -50.0f32..50.0, -50.0f32..50.0),
            combine in combine_strategy(),
        ) {
            optimize_is_idempotent_after_first_application(radius, box_dims, offset, combine);
        }

        #[test]
        fn optimization_preserves_output(
            radius in 1.0f32..50.0,
            box_dims in (1.0f32..50.0, 1.0f32..50.0, 1.0f32..50.0),
            offset in (-50.0f32..50.0, -50.0f32..50.0, -50.0f32..50.0),
            combine in combine_strategy(),
            sample in (-100.0f32..100.0, -100.0f32..100.0, -100.0f32..100.0),
        ) {
            optimize_preserves_compiled_output(radius, box_dims, offset, combine, sample);
        }
    }
}
