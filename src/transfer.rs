// transfer.rs — Inter-grid transfer operators (CPU reference).
//
// Grids are vertex-centred: coarse pixel (i, j) sits on fine pixel
// (2i, 2j). With ceil-halving, the last fine column maps to
// ceil(w/2) - 1 ≥ (w-1)/2, so every fine pixel has a coarse neighbour.
//
//   restrict  fine → coarse   full weighting, [1/4 1/2 1/4] ⊗ [1/4 1/2 1/4]
//                             around (2i, 2j), clamp-to-edge
//   prolong   coarse → fine   bilinear sample at (x/2, y/2), clamp-to-edge
//   inject    fine → coarse   coarse(i, j) = fine(2i, 2j), clamped
//
// `restrict` and `prolong` are adjoint up to a factor of 4 in the
// interior. `inject` is only used for the coefficient fields: the active
// flag and stencil weights are discrete and must not be averaged.
//
// COARSE ACTIVITY
// ───────────────
// An injected flag only looks at (2i, 2j), but restriction reads the whole
// 3×3 footprint around it. `coarsen_activity` keeps a coarse pixel active
// only if every fine pixel of that footprint is active:
//
//     fine   . . . . . . .        coarse   .   .   .   .
//            . # # # # # .                     #   #
//            . # # # # # .        (#: active, .: boundary)
//            . # # # # # .
//            . . . . . . .
//
// Coarse boundary pixels hold zero correction, so the coarse problem sees
// homogeneous Dirichlet conditions wherever its footprint reaches the fine
// boundary. This matters on odd widths, where the last coarse column
// straddles the fine border.

use crate::field::{self, sample_bilinear, Field, ZERO};
use crate::stencil::{Coefficients, Stencil};

/// 1D full-weighting kernel.
pub const FULL_WEIGHTING: [f32; 3] = [0.25, 0.5, 0.25];

/// Coarse dimensions for a fine level: ceil-halving.
#[inline]
pub fn coarse_dims(width: usize, height: usize) -> (usize, usize) {
    (width.div_ceil(2), height.div_ceil(2))
}

/// Full-weighting restriction of `fine` into `coarse`, scaled by `weight`.
///
/// # Panics
/// If `coarse` is not `coarse_dims(fine)`.
pub fn restrict_into(fine: &Field, coarse: &mut Field, weight: f32) {
    assert_eq!(coarse.dims(), coarse_dims(fine.width(), fine.height()), "coarse size");
    for j in 0..coarse.height() {
        for i in 0..coarse.width() {
            let (cx, cy) = (2 * i as isize, 2 * j as isize);
            let mut acc = ZERO;
            for (dy, wy) in FULL_WEIGHTING.iter().enumerate() {
                for (dx, wx) in FULL_WEIGHTING.iter().enumerate() {
                    let t = fine.get_clamped(cx + dx as isize - 1, cy + dy as isize - 1);
                    acc = field::mul_add(acc, wx * wy, t);
                }
            }
            coarse.set(i, j, field::scale(acc, weight));
        }
    }
}

pub fn restrict(fine: &Field) -> Field {
    let (w, h) = coarse_dims(fine.width(), fine.height());
    let mut coarse = Field::new(w, h);
    restrict_into(fine, &mut coarse, 1.0);
    coarse
}

/// Bilinear prolongation of `coarse` at fine pixel `(x, y)`.
#[inline]
pub fn prolong_at(coarse: &Field, x: usize, y: usize) -> field::Texel {
    sample_bilinear(coarse, x as f32 * 0.5, y as f32 * 0.5)
}

pub fn prolong_into(coarse: &Field, fine: &mut Field) {
    assert_eq!(coarse.dims(), coarse_dims(fine.width(), fine.height()), "coarse size");
    for y in 0..fine.height() {
        for x in 0..fine.width() {
            fine.set(x, y, prolong_at(coarse, x, y));
        }
    }
}

pub fn prolong(coarse: &Field, fine_width: usize, fine_height: usize) -> Field {
    let mut fine = Field::new(fine_width, fine_height);
    prolong_into(coarse, &mut fine);
    fine
}

/// Nearest-neighbour subsampling for coefficient fields.
pub fn inject_into(fine: &Field, coarse: &mut Field) {
    assert_eq!(coarse.dims(), coarse_dims(fine.width(), fine.height()), "coarse size");
    let (fw, fh) = fine.dims();
    for j in 0..coarse.height() {
        for i in 0..coarse.width() {
            coarse.set(i, j, fine.get((2 * i).min(fw - 1), (2 * j).min(fh - 1)));
        }
    }
}

/// Clear the coarse active flag wherever the fine 3×3 footprint around
/// `(2i, 2j)` contains an inactive pixel. `coarse_a1` must already hold the
/// injected first coefficient field.
pub fn coarsen_activity(stencil: &dyn Stencil, fine: Coefficients<'_>, coarse_a1: &mut Field) {
    assert_eq!(coarse_a1.dims(), coarse_dims(fine.a1.width(), fine.a1.height()), "coarse size");
    let (fw, fh) = fine.a1.dims();
    let clamp = |v: isize, n: usize| v.clamp(0, n as isize - 1) as usize;
    for j in 0..coarse_a1.height() {
        for i in 0..coarse_a1.width() {
            let (cx, cy) = (2 * i as isize, 2 * j as isize);
            let covered = (-1..=1).all(|dy| {
                (-1..=1).all(|dx| stencil.is_active(fine, clamp(cx + dx, fw), clamp(cy + dy, fh)))
            });
            if !covered {
                coarse_a1.set(i, j, stencil.deactivate(coarse_a1.get(i, j)));
            }
        }
    }
}

/// Coarse-grid correction: `x += prolong(coarse_x)` at active pixels only.
/// Inactive pixels are never written.
pub fn correct(stencil: &dyn Stencil, coeffs: Coefficients<'_>, x: &mut Field, coarse_x: &Field) {
    assert_eq!(coarse_x.dims(), coarse_dims(x.width(), x.height()), "coarse size");
    for py in 0..x.height() {
        for px in 0..x.width() {
            if stencil.is_active(coeffs, px, py) {
                let c = prolong_at(coarse_x, px, py);
                x.set(px, py, field::add(x.get(px, py), c));
            }
        }
    }
}
