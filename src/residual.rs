// residual.rs — Defect evaluation and the scalar convergence metric.
//
// `evaluate` writes r = b - A·x over a whole level (0 at inactive pixels),
// using the same `Stencil` as the smoother.
//
// The metric is the mean Euclidean length of the level-0 residual texels.
// On the GPU it is a two-stage reduction:
//
//   stage 1 (device)  G workgroups × T threads. Thread t of group g sums
//                     pixels g·T + t, g·T + t + G·T, ... then thread 0
//                     adds the T sums into partial[g].
//   stage 2 (host)    Σ partial[g] / (w·h)
//
// `partial_sums` reproduces stage 1 on the CPU with the same pixel-to-group
// assignment so GPU partials can be checked one by one.

use crate::field::{self, Field, ZERO};
use crate::level::GridLevel;
use crate::stencil::Stencil;

/// r = b - A·x_front, zero where inactive.
pub fn evaluate(stencil: &dyn Stencil, level: &mut GridLevel) {
    let parts = level.parts_mut();
    let x = parts.x.front();
    for py in 0..x.height() {
        for px in 0..x.width() {
            let r = if stencil.is_active(parts.coeffs, px, py) {
                field::sub(parts.b.get(px, py), stencil.apply(parts.coeffs, x, px, py))
            } else {
                ZERO
            };
            parts.r.set(px, py, r);
        }
    }
}

/// Mean residual length, the convergence metric.
pub fn average_magnitude(r: &Field) -> f32 {
    r.mean_length()
}

/// Stage-1 partial sums, one per workgroup.
pub fn partial_sums(r: &Field, groups: usize, threads: usize) -> Vec<f32> {
    let texels = r.as_slice();
    let stride = groups * threads;
    (0..groups)
        .map(|g| {
            let mut group_sum = 0.0f32;
            for t in 0..threads {
                let mut thread_sum = 0.0f32;
                let mut i = g * threads + t;
                while i < texels.len() {
                    thread_sum += field::length(texels[i]);
                    i += stride;
                }
                group_sum += thread_sum;
            }
            group_sum
        })
        .collect()
}

/// Stage 2: fold the partials and normalise by pixel count.
pub fn finish_average(partials: &[f32], pixel_count: usize) -> f32 {
    let total: f64 = partials.iter().map(|&p| p as f64).sum();
    (total / pixel_count as f64) as f32
}
