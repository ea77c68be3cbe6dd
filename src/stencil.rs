// stencil.rs — The per-pixel linear operator A.
//
// The solver never interprets the coefficient fields `a1, a2, a3` itself:
// every kernel goes through a `Stencil`, which answers three questions for
// one pixel of one level:
//
//   is_active(p)  — does this pixel carry an unknown? Inactive pixels hold
//                   fixed boundary values and are never updated.
//   diagonal(p)   — the coefficient of x(p) in row p of A.
//   apply(p, x)   — (A·x)(p), reading neighbours with clamp-to-edge.
//
// The same formula must exist twice, once in Rust (CPU reference solver)
// and once in WGSL (spliced into shaders/multigrid.wgsl at the
// `//{{STENCIL}}` marker). `wgsl()` returns the WGSL half. The snippet may
// call the accessors the multigrid shader defines:
//
//   fn coeff_a1(p: vec2<i32>) -> vec4<f32>
//   fn coeff_a2(p: vec2<i32>) -> vec4<f32>
//   fn coeff_a3(p: vec2<i32>) -> vec4<f32>
//   fn unknown(p: vec2<i32>) -> vec4<f32>    // clamp-to-edge
//
// and must define `stencil_active`, `stencil_diagonal`, `stencil_apply`
// and `stencil_deactivate` with the signatures used in NINE_POINT_WGSL
// below. `stencil_active` may only read the coeff_* accessors: the coarse
// injection kernel binds no unknowns.
//
// COARSE LEVELS
// ─────────────
// Coarse rows are injected, not Galerkin products, so a stencil states how
// its unscaled row relates to the coarse operator: `coarse_scale()` is the
// factor the restricted residual is multiplied by. For a second-order
// operator that is (2h)² / h² = 4. `deactivate` turns a coarse row into a
// boundary row when its fine footprint touches an inactive pixel.
//
// NINE-POINT LAYOUT
// ─────────────────
// Each coefficient field stores one row of a 3×3 stencil:
//
//            x-1        x          x+1        w
//   a1   [ s(-1,-1)   s(0,-1)   s(+1,-1)   active ]     row y-1
//   a2   [ s(-1, 0)   s(0, 0)   s(+1, 0)     -    ]     row y
//   a3   [ s(-1,+1)   s(0,+1)   s(+1,+1)     -    ]     row y+1
//
// `a1.w > 0.5` marks the pixel active. An inactive pixel is expected to
// carry the identity row (s(0,0) = 1) so that its residual is b - x, but
// the kernels force its residual to zero regardless.

use crate::field::{Field, Texel, ZERO};

/// Borrowed view of one level's three coefficient fields.
#[derive(Clone, Copy)]
pub struct Coefficients<'a> {
    pub a1: &'a Field,
    pub a2: &'a Field,
    pub a3: &'a Field,
}

/// A pluggable stencil formula, evaluated identically on CPU and GPU.
pub trait Stencil: Send + Sync {
    fn is_active(&self, c: Coefficients<'_>, x: usize, y: usize) -> bool;

    fn diagonal(&self, c: Coefficients<'_>, x: usize, y: usize) -> f32;

    /// `(A·u)(x, y)`.
    fn apply(&self, c: Coefficients<'_>, u: &Field, x: usize, y: usize) -> Texel;

    /// Factor between the injected coarse row and the operator it stands
    /// for on a grid of twice the spacing.
    fn coarse_scale(&self) -> f32;

    /// The first coefficient texel with the active flag cleared.
    fn deactivate(&self, a1: Texel) -> Texel;

    /// WGSL source defining `stencil_active`, `stencil_diagonal`,
    /// `stencil_apply` and `stencil_deactivate`.
    fn wgsl(&self) -> &'static str;
}

// ---------------------------------------------------------------------------
// NinePointStencil
// ---------------------------------------------------------------------------

/// Full 3×3 stencil stored row-wise in `a1, a2, a3`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NinePointStencil;

/// Threshold above which `a1.w` marks a pixel active.
pub const ACTIVE_THRESHOLD: f32 = 0.5;

impl NinePointStencil {
    /// Pack a 3×3 weight matrix (`weights[row][col]`, row 0 = y-1) and the
    /// active flag into the three coefficient texels.
    pub fn pack(weights: [[f32; 3]; 3], active: bool) -> (Texel, Texel, Texel) {
        let flag = if active { 1.0 } else { 0.0 };
        let [r0, r1, r2] = weights;
        (
            [r0[0], r0[1], r0[2], flag],
            [r1[0], r1[1], r1[2], 0.0],
            [r2[0], r2[1], r2[2], 0.0],
        )
    }

    /// Inactive identity row: `x = b`.
    pub fn identity() -> (Texel, Texel, Texel) {
        Self::pack([[0.0; 3], [0.0, 1.0, 0.0], [0.0; 3]], false)
    }

    /// Active five-point Laplacian (`4x - Σ neighbours`).
    pub fn laplacian() -> (Texel, Texel, Texel) {
        Self::pack(
            [[0.0, -1.0, 0.0], [-1.0, 4.0, -1.0], [0.0, -1.0, 0.0]],
            true,
        )
    }

    /// Active diagonal-only row with weight `d`.
    pub fn diagonal_only(d: f32) -> (Texel, Texel, Texel) {
        Self::pack([[0.0; 3], [0.0, d, 0.0], [0.0; 3]], true)
    }
}

impl Stencil for NinePointStencil {
    #[inline]
    fn is_active(&self, c: Coefficients<'_>, x: usize, y: usize) -> bool {
        c.a1.get(x, y)[3] > ACTIVE_THRESHOLD
    }

    #[inline]
    fn diagonal(&self, c: Coefficients<'_>, x: usize, y: usize) -> f32 {
        c.a2.get(x, y)[1]
    }

    fn apply(&self, c: Coefficients<'_>, u: &Field, x: usize, y: usize) -> Texel {
        let rows = [c.a1.get(x, y), c.a2.get(x, y), c.a3.get(x, y)];
        let (xi, yi) = (x as isize, y as isize);
        let mut acc = ZERO;
        for (dy, row) in rows.iter().enumerate() {
            for dx in 0..3 {
                let w = row[dx];
                if w == 0.0 {
                    continue;
                }
                let n = u.get_clamped(xi + dx as isize - 1, yi + dy as isize - 1);
                for k in 0..4 {
                    acc[k] += w * n[k];
                }
            }
        }
        acc
    }

    fn coarse_scale(&self) -> f32 {
        4.0
    }

    #[inline]
    fn deactivate(&self, a1: Texel) -> Texel {
        [a1[0], a1[1], a1[2], 0.0]
    }

    fn wgsl(&self) -> &'static str {
        NINE_POINT_WGSL
    }
}

const NINE_POINT_WGSL: &str = r#"
fn stencil_active(p: vec2<i32>) -> bool {
    return coeff_a1(p).w > 0.5;
}

fn stencil_diagonal(p: vec2<i32>) -> f32 {
    return coeff_a2(p).y;
}

fn stencil_apply(p: vec2<i32>) -> vec4<f32> {
    let r0 = coeff_a1(p);
    let r1 = coeff_a2(p);
    let r2 = coeff_a3(p);
    var acc = vec4<f32>(0.0);
    acc += r0.x * unknown(p + vec2<i32>(-1, -1));
    acc += r0.y * unknown(p + vec2<i32>( 0, -1));
    acc += r0.z * unknown(p + vec2<i32>( 1, -1));
    acc += r1.x * unknown(p + vec2<i32>(-1,  0));
    acc += r1.y * unknown(p);
    acc += r1.z * unknown(p + vec2<i32>( 1,  0));
    acc += r2.x * unknown(p + vec2<i32>(-1,  1));
    acc += r2.y * unknown(p + vec2<i32>( 0,  1));
    acc += r2.z * unknown(p + vec2<i32>( 1,  1));
    return acc;
}

fn stencil_deactivate(a1: vec4<f32>) -> vec4<f32> {
    return vec4<f32>(a1.xyz, 0.0);
}
"#;
