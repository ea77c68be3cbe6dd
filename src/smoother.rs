// smoother.rs — Weighted Jacobi relaxation (CPU reference).
//
// One sweep reads the front buffer and writes the back buffer:
//
//   active:    x'(p) = x(p) + ω · (b(p) - (A·x)(p)) / diag(p)
//   inactive:  x'(p) = x(p)
//
// then flips the ping-pong selector. Every pixel of a sweep sees the same
// previous iterate, so the result is independent of traversal order and
// matches the GPU kernel bit-for-bit up to float reassociation.
//
// An active pixel with a zero diagonal has no well-defined update and is
// copied like an inactive one.

use crate::field::{self, Field};
use crate::level::GridLevel;
use crate::stencil::{Coefficients, Stencil};

/// Write one Jacobi sweep of `front` into `back`.
pub fn jacobi_step(
    stencil: &dyn Stencil,
    coeffs: Coefficients<'_>,
    b: &Field,
    front: &Field,
    back: &mut Field,
    omega: f32,
) {
    for y in 0..front.height() {
        for x in 0..front.width() {
            let xv = front.get(x, y);
            let next = if stencil.is_active(coeffs, x, y) {
                let d = stencil.diagonal(coeffs, x, y);
                if d != 0.0 {
                    let defect = field::sub(b.get(x, y), stencil.apply(coeffs, front, x, y));
                    field::mul_add(xv, omega / d, defect)
                } else {
                    xv
                }
            } else {
                xv
            };
            back.set(x, y, next);
        }
    }
}

/// Run `sweeps` Jacobi sweeps on `level`, swapping after each.
pub fn smooth(stencil: &dyn Stencil, level: &mut GridLevel, omega: f32, sweeps: u32) {
    let parts = level.parts_mut();
    for _ in 0..sweeps {
        let (front, back) = parts.x.split();
        jacobi_step(stencil, parts.coeffs, parts.b, front, back, omega);
        parts.x.swap();
    }
}
