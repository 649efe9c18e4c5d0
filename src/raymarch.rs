//! The raymarching driver (spec.md §4.13, an EXTERNAL COLLABORATOR:
//! specified only as a consumer of the executor's ABI), grounded on
//! `original_source/src/raytracer/raytracer.{h,cpp}`.
//!
//! [`Raymarcher::compile`] runs the full pipeline — AST simplification,
//! bytecode lowering and optimization, machine-code lowering, and
//! executable mapping — and hands back something that can be driven
//! with [`Raymarcher::one_round`] or [`Raymarcher::trace_image`].

use crate::ast::Ast;
use crate::bytecode::{self, Bytecode};
use crate::executor::{Executor, LaneBuffer};
use crate::machcode;
#[cfg(feature = "perf-map")]
use crate::perfmap;

/// Distance past which a ray is considered to have escaped the scene
/// (`original_source/src/raytracer/raytracer.h`'s `MAX_DIST`).
pub const MAX_DIST: f32 = 10_000.0;

/// Step added past the sampled distance before the next march, so a ray
/// doesn't re-sample exactly on the surface it just found
/// (`raytracer.cpp`'s `epsilon`).
const STEP_EPSILON: f32 = 0.1;

/// Offset used on either side of a hit point to estimate the surface
/// normal by central difference (`raytracer.cpp`'s `normal_epsilon`).
const NORMAL_EPSILON: f32 = 1e-5;

/// How far past a hit's "skin" a ray is moved before tracing its
/// reflection bounce, so it doesn't immediately re-hit itself
/// (`raytracer.cpp`: `distances[i] + 1.0f`).
const REFLECTION_SKIN: f32 = 1.0;

/// Rays processed per `rayon` task in [`Raymarcher::march_all`]. Must stay
/// a multiple of 8 so every task's final chunk is still a whole number of
/// lane bundles.
const CHUNK_SIZE: usize = 1024;

/// A single fixed key light, since this crate has no material/color
/// channel to shade against (see the crate-level shading deviation noted
/// in DESIGN.md); normalized `(1, 1, 1)`.
const LIGHT_DIR: [f32; 3] = {
    let c = 0.577_350_27;
    [c, c, c]
};

/// Compilation knobs (spec.md §9's call for explicit configuration
/// rather than global optimizer toggles), mirroring how
/// `cranelift-codegen`'s `Context` takes a settings object instead of
/// mutating ambient state.
#[derive(Debug, Clone)]
pub struct CompileOptions {
    /// Run the AST-level CSE sweep (spec.md §4.1) before lowering.
    pub run_ast_simplifier: bool,
    /// Run the bytecode optimizer passes (spec.md §4.3) before
    /// machine-code lowering.
    pub run_bytecode_optimizer: bool,
    /// Keep a textual disassembly of the encoded program around for
    /// [`Raymarcher::disassembly`].
    pub capture_disassembly: bool,
    /// If set (and the `perf-map` feature is enabled), register the
    /// compiled function's code region under this name in
    /// `/tmp/perf-<pid>.map`.
    pub perf_map_name: Option<String>,
}

impl Default for CompileOptions {
    fn default() -> Self {
        CompileOptions {
            run_ast_simplifier: true,
            run_bytecode_optimizer: true,
            capture_disassembly: false,
            perf_map_name: None,
        }
    }
}

/// A compiled scene, ready to be driven by a sphere-tracer.
///
/// Immutable and `Send + Sync` once built (spec.md §5): the only interior
/// state is the executor's two `region`-owned memory maps, one
/// read+execute and one read-only, so any number of threads may call
/// [`Raymarcher::one_round`] concurrently as long as each supplies its
/// own buffers.
pub struct Raymarcher {
    exec: Executor,
    disassembly: Option<String>,
}

impl Raymarcher {
    /// Run the full pipeline over `ast` and map the result executable.
    pub fn compile(ast: &mut Ast, options: CompileOptions) -> crate::Result<Raymarcher> {
        if options.run_ast_simplifier {
            crate::ast::combine_identical_nodes(ast);
        }

        let mut bc = Bytecode::from_ast(ast)?;
        if options.run_bytecode_optimizer {
            bytecode::optimize(&mut bc);
        }

        let mc = machcode::lower::lower(&bc);

        let disassembly = if options.capture_disassembly {
            Some(machcode::encoder::encode(&mc)?.disassemble(&mc))
        } else {
            None
        };

        let exec = Executor::new(&mc)?;

        #[cfg(feature = "perf-map")]
        if let Some(name) = &options.perf_map_name {
            perfmap::add_perf_map_region(&exec, name)?;
        }
        #[cfg(not(feature = "perf-map"))]
        let _ = &options.perf_map_name;

        Ok(Raymarcher { exec, disassembly })
    }

    /// The disassembly captured during `compile`, if
    /// [`CompileOptions::capture_disassembly`] was set.
    pub fn disassembly(&self) -> Option<&str> {
        self.disassembly.as_deref()
    }

    /// Advance every ray in the bundle one sphere-trace step: evaluate
    /// the compiled distance function eight lanes at a time, then march
    /// any ray whose sample lies in `(0, MAX_DIST)` forward by
    /// `distance + STEP_EPSILON` along its direction. Returns whether any
    /// ray is still marching.
    ///
    /// All seven slices must have equal length, a multiple of 8.
    pub fn one_round(
        &self,
        xs: &mut [f32],
        ys: &mut [f32],
        zs: &mut [f32],
        dxs: &[f32],
        dys: &[f32],
        dzs: &[f32],
        distances: &mut [f32],
    ) -> bool {
        let count = xs.len();
        assert!(count % 8 == 0, "ray bundle length must be a multiple of 8");
        assert_eq!(count, ys.len());
        assert_eq!(count, zs.len());
        assert_eq!(count, dxs.len());
        assert_eq!(count, dys.len());
        assert_eq!(count, dzs.len());
        assert_eq!(count, distances.len());

        for offset in (0..count).step_by(8) {
            let x = LaneBuffer::from_slice(&xs[offset..offset + 8]);
            let y = LaneBuffer::from_slice(&ys[offset..offset + 8]);
            let z = LaneBuffer::from_slice(&zs[offset..offset + 8]);
            let mut d = LaneBuffer::ZERO;
            self.exec.call(&x, &y, &z, &mut d);
            distances[offset..offset + 8].copy_from_slice(&d.0);
        }

        let mut still_marching = false;
        for i in 0..count {
            let dist = distances[i];
            if dist > 0.0 && dist < MAX_DIST {
                still_marching = true;
                let step = dist + STEP_EPSILON;
                xs[i] += dxs[i] * step;
                ys[i] += dys[i] * step;
                zs[i] += dzs[i] * step;
            }
        }
        still_marching
    }

    /// Drive [`Raymarcher::one_round`] to completion over disjoint chunks
    /// of the bundle in parallel, one `rayon` task per chunk — the same
    /// disjoint-slice-per-thread structure as the original's
    /// `pthread_create` loop over `Trace_Thread_Arg`, where each thread
    /// loops `one_round` on its own slice independently until its slice
    /// is done (not synchronized against the other threads' progress).
    fn march_all(
        &self,
        mut xs: &mut [f32],
        mut ys: &mut [f32],
        mut zs: &mut [f32],
        mut dxs: &[f32],
        mut dys: &[f32],
        mut dzs: &[f32],
        mut distances: &mut [f32],
    ) {
        rayon::scope(|scope| {
            while !xs.is_empty() {
                let n = CHUNK_SIZE.min(xs.len());
                let (xs_head, xs_tail) = xs.split_at_mut(n);
                let (ys_head, ys_tail) = ys.split_at_mut(n);
                let (zs_head, zs_tail) = zs.split_at_mut(n);
                let (dxs_head, dxs_tail) = dxs.split_at(n);
                let (dys_head, dys_tail) = dys.split_at(n);
                let (dzs_head, dzs_tail) = dzs.split_at(n);
                let (dist_head, dist_tail) = distances.split_at_mut(n);

                xs = xs_tail;
                ys = ys_tail;
                zs = zs_tail;
                dxs = dxs_tail;
                dys = dys_tail;
                dzs = dzs_tail;
                distances = dist_tail;

                scope.spawn(move |_| {
                    while self.one_round(xs_head, ys_head, zs_head, dxs_head, dys_head, dzs_head, dist_head) {}
                });
            }
        });
    }

    /// Evaluate the compiled distance function once over every ray
    /// position, `count` lanes padded up to a multiple of 8.
    fn sample_all(&self, xs: &[f32], ys: &[f32], zs: &[f32], out: &mut [f32]) {
        let count = xs.len();
        for offset in (0..count).step_by(8) {
            let x = LaneBuffer::from_slice(&xs[offset..offset + 8]);
            let y = LaneBuffer::from_slice(&ys[offset..offset + 8]);
            let z = LaneBuffer::from_slice(&zs[offset..offset + 8]);
            let mut d = LaneBuffer::ZERO;
            self.exec.call(&x, &y, &z, &mut d);
            out[offset..offset + 8].copy_from_slice(&d.0);
        }
    }

    /// Fire one ray per pixel from a pinhole camera at `(px, py, pz)`
    /// looking down `-z`, march to the first surface, estimate its
    /// normal, trace one reflection bounce, and shade by a fixed
    /// Lambertian light. Returns `width * height` RGB triples, row-major
    /// from the top-left pixel.
    ///
    /// `hx`/`hy`/`hz` are accepted for interface parity with the
    /// original (a heading the camera would look along) but unused —
    /// the original never wired them up either (`(void)hx;` etc. in
    /// `raytracer.cpp`).
    #[allow(clippy::too_many_arguments)]
    pub fn trace_image(
        &self,
        px: f32,
        py: f32,
        pz: f32,
        _hx: f32,
        _hy: f32,
        _hz: f32,
        width: usize,
        height: usize,
    ) -> Vec<[u8; 3]> {
        let count = width * height;
        let padded = count.div_ceil(8) * 8;

        let mut xs = vec![0.0f32; padded];
        let mut ys = vec![0.0f32; padded];
        let mut zs = vec![0.0f32; padded];
        let mut dxs = vec![0.0f32; padded];
        let mut dys = vec![0.0f32; padded];
        let mut dzs = vec![0.0f32; padded];
        let mut distances = vec![0.0f32; padded];

        let inv_width = 1.0 / width as f32;
        let inv_height = 1.0 / height as f32;
        let fov = 45.0f32;
        let aspect_ratio = width as f32 / height as f32;
        let angle = (std::f32::consts::PI * 0.5 * fov / 180.0).tan();

        for y in 0..height {
            for x in 0..width {
                let xx = (2.0 * ((x as f32 + 0.5) * inv_width) - 1.0) * angle * aspect_ratio;
                let yy = (1.0 - 2.0 * ((y as f32 + 0.5) * inv_height)) * angle;
                let zz = -1.0f32;
                let len = (xx * xx + yy * yy + zz * zz).sqrt();

                let offset = y * width + x;
                dxs[offset] = xx / len;
                dys[offset] = yy / len;
                dzs[offset] = zz / len;
                xs[offset] = px;
                ys[offset] = py;
                zs[offset] = pz;
            }
        }

        // pass 1: find geometry collisions.
        self.march_all(&mut xs, &mut ys, &mut zs, &dxs, &dys, &dzs, &mut distances);

        // pass 2: estimate normals by central difference.
        let mut normal_low = vec![0.0f32; padded];
        let mut normal_high = vec![0.0f32; padded];
        let mut normal = [vec![0.0f32; padded], vec![0.0f32; padded], vec![0.0f32; padded]];

        for axis in 0..3 {
            for i in 0..padded {
                let base = [xs[i], ys[i], zs[i]];
                let mut low = base;
                let mut high = base;
                low[axis] -= NORMAL_EPSILON;
                high[axis] += NORMAL_EPSILON;
                normal_low[i] = low[axis];
                normal_high[i] = high[axis];
            }

            let (sample_xs_lo, sample_ys_lo, sample_zs_lo) = axis_samples(axis, &normal_low, &xs, &ys, &zs);
            let (sample_xs_hi, sample_ys_hi, sample_zs_hi) = axis_samples(axis, &normal_high, &xs, &ys, &zs);

            let mut low_d = vec![0.0f32; padded];
            let mut high_d = vec![0.0f32; padded];
            self.sample_all(&sample_xs_lo, &sample_ys_lo, &sample_zs_lo, &mut low_d);
            self.sample_all(&sample_xs_hi, &sample_ys_hi, &sample_zs_hi, &mut high_d);

            for i in 0..padded {
                normal[axis][i] = high_d[i] - low_d[i];
            }
        }

        for i in 0..padded {
            let n = [normal[0][i], normal[1][i], normal[2][i]];
            let len = (n[0] * n[0] + n[1] * n[1] + n[2] * n[2]).sqrt().max(f32::EPSILON);
            normal[0][i] /= len;
            normal[1][i] /= len;
            normal[2][i] /= len;
        }

        // move rays past the hit surface's skin before bouncing them.
        for i in 0..padded {
            let step = distances[i] + REFLECTION_SKIN;
            xs[i] += normal[0][i] * step;
            ys[i] += normal[1][i] * step;
            zs[i] += normal[2][i] * step;
        }

        let mut reflected_distances = vec![0.0f32; padded];
        self.march_all(&mut xs, &mut ys, &mut zs, &normal[0], &normal[1], &normal[2], &mut reflected_distances);

        let mut pixels = Vec::with_capacity(count);
        for y in 0..height {
            for x in 0..width {
                let offset = y * width + x;
                if distances[offset] <= 0.0 {
                    let lambert = normal[0][offset] * LIGHT_DIR[0]
                        + normal[1][offset] * LIGHT_DIR[1]
                        + normal[2][offset] * LIGHT_DIR[2];
                    let shade = (lambert.max(0.0).min(1.0) * 255.0) as u8;
                    pixels.push([shade, shade, shade]);
                } else {
                    pixels.push([0, 0, 0]);
                }
            }
        }
        pixels
    }
}

/// Build position buffers for a normal-estimation sample: `perturbed`
/// replaces the given `axis`'s coordinate, the other two axes come from
/// the ray's current position.
fn axis_samples(axis: usize, perturbed: &[f32], xs: &[f32], ys: &[f32], zs: &[f32]) -> (Vec<f32>, Vec<f32>, Vec<f32>) {
    match axis {
        0 => (perturbed.to_vec(), ys.to_vec(), zs.to_vec()),
        1 => (xs.to_vec(), perturbed.to_vec(), zs.to_vec()),
        2 => (xs.to_vec(), ys.to_vec(), perturbed.to_vec()),
        _ => unreachable!("only three position axes"),
    }
}
