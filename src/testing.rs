// testing.rs — Reference systems shared by tests and benches.
//
// Not part of the solver API. Every system here is small and fully
// deterministic so CPU and GPU runs can be compared texel by texel.

use crate::field::Field;
use crate::stencil::NinePointStencil;
use crate::system::LinearSystem;

/// Dirichlet-bordered Poisson problem.
///
/// Border pixels are inactive identity rows holding the ramp `x / (w - 1)`
/// in channel 0. Interior pixels carry the five-point Laplacian with
/// `b = 0.1 · sin(0.7 x) · cos(0.5 y)` in channel 0 and start from zero.
pub fn poisson_problem(width: usize, height: usize) -> LinearSystem {
    assert!(width >= 3 && height >= 3, "need an interior");
    let border = |x: usize, y: usize| x == 0 || y == 0 || x + 1 == width || y + 1 == height;
    let ramp = |x: usize| x as f32 / (width - 1) as f32;
    let rows = |x, y| {
        if border(x, y) {
            NinePointStencil::identity()
        } else {
            NinePointStencil::laplacian()
        }
    };

    LinearSystem {
        a1: Field::from_fn(width, height, |x, y| rows(x, y).0),
        a2: Field::from_fn(width, height, |x, y| rows(x, y).1),
        a3: Field::from_fn(width, height, |x, y| rows(x, y).2),
        b: Field::from_fn(width, height, |x, y| {
            if border(x, y) {
                [ramp(x), 0.0, 0.0, 0.0]
            } else {
                let v = 0.1 * (0.7 * x as f32).sin() * (0.5 * y as f32).cos();
                [v, 0.0, 0.0, 0.0]
            }
        }),
        x0: Field::from_fn(width, height, |x, y| {
            if border(x, y) {
                [ramp(x), 0.0, 0.0, 0.0]
            } else {
                [0.0; 4]
            }
        }),
    }
}

/// Every pixel inactive. The solver must leave `x0` untouched.
pub fn all_inactive(width: usize, height: usize) -> LinearSystem {
    let (a1, a2, a3) = NinePointStencil::identity();
    LinearSystem {
        a1: Field::filled(width, height, a1),
        a2: Field::filled(width, height, a2),
        a3: Field::filled(width, height, a3),
        b: Field::filled(width, height, [9.0, 9.0, 9.0, 9.0]),
        x0: Field::from_fn(width, height, |x, y| [x as f32, y as f32, 0.5, 1.0]),
    }
}

/// Every pixel active with the unit diagonal: `A = I`, so `x = b` is
/// reached by a single undamped Jacobi sweep.
pub fn unit_diagonal(width: usize, height: usize) -> LinearSystem {
    let (a1, a2, a3) = NinePointStencil::diagonal_only(1.0);
    LinearSystem {
        a1: Field::filled(width, height, a1),
        a2: Field::filled(width, height, a2),
        a3: Field::filled(width, height, a3),
        b: Field::from_fn(width, height, |x, y| [x as f32 * 0.25, y as f32 * 0.5, 1.0, -2.0]),
        x0: Field::new(width, height),
    }
}

/// Source patch with a round mask (alpha) and curved colour gradients,
/// and a linear-gradient target, for the seamless clone assembler.
pub fn clone_images(patch: usize, target: usize) -> (Field, Field) {
    let c = (patch as f32 - 1.0) / 2.0;
    let radius = c - 1.0;
    let source = Field::from_fn(patch, patch, |x, y| {
        let (dx, dy) = (x as f32 - c, y as f32 - c);
        let alpha = if dx * dx + dy * dy <= radius * radius { 1.0 } else { 0.0 };
        let u = x as f32 / patch as f32;
        [0.8, 0.2 + 0.5 * u * u, 0.3 + 0.2 * (y as f32 / 3.0).sin(), alpha]
    });
    let t = target as f32;
    let target = Field::from_fn(target, target, |x, y| [0.1 + 0.3 * y as f32 / t, 0.4, 0.6 * x as f32 / t, 1.0]);
    (source, target)
}
