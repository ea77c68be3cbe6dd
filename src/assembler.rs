// assembler.rs — Seamless cloning system (reference `SystemAssembler`).
//
// Given a source patch whose alpha channel is the clone mask, a target
// image and an offset, builds the guided-interpolation Poisson system on
// the patch grid:
//
//   active pixel p (mask > 0.5, not on the patch border):
//       4·x(p) - Σ x(n) = 4·s(p) - Σ s(n)          n ∈ 4-neighbours
//
//   inactive pixel p:
//       x(p) = t(p + offset)                       (Dirichlet value)
//
// where s is the source and t the target (clamped to its bounds; where
// the patch hangs off the target the source value is used instead). The
// solution therefore keeps the source's gradients inside the mask and
// meets the target seamlessly along the mask boundary.
//
// Coefficients use the `NinePointStencil` layout.

use crate::field::{Field, Texel, ZERO};
use crate::stencil::NinePointStencil;
use crate::system::{LinearSystem, Offset, SystemAssembler};

/// Mask threshold on the source alpha channel.
pub const MASK_THRESHOLD: f32 = 0.5;

#[derive(Debug, Clone)]
pub struct SeamlessCloneAssembler {
    source: Field,
    target: Field,
}

impl SeamlessCloneAssembler {
    pub fn new(source: Field, target: Field) -> Self {
        SeamlessCloneAssembler { source, target }
    }

    pub fn source(&self) -> &Field {
        &self.source
    }

    pub fn target(&self) -> &Field {
        &self.target
    }

    /// Replace the target. The solver must be rebuilt afterwards.
    pub fn set_target(&mut self, target: Field) {
        self.target = target;
    }

    /// Replace the source patch. Changes the system size, so the solver
    /// must be rebuilt with `initialize = true`.
    pub fn set_source(&mut self, source: Field) {
        self.source = source;
    }

    /// Whether patch pixel `(x, y)` carries an unknown.
    pub fn is_active(&self, x: usize, y: usize) -> bool {
        let (w, h) = self.source.dims();
        let border = x == 0 || y == 0 || x + 1 == w || y + 1 == h;
        !border && self.source.get(x, y)[3] > MASK_THRESHOLD
    }

    /// Target texel under patch pixel `(x, y)`, or the source texel when
    /// that position lies outside the target.
    fn boundary_value(&self, x: usize, y: usize, offset: Offset) -> Texel {
        match self.target_coords(x, y, offset) {
            Some((tx, ty)) => self.target.get(tx, ty),
            None => self.source.get(x, y),
        }
    }

    fn target_coords(&self, x: usize, y: usize, offset: Offset) -> Option<(usize, usize)> {
        let tx = x as i64 + offset.dx as i64;
        let ty = y as i64 + offset.dy as i64;
        let (tw, th) = self.target.dims();
        if tx < 0 || ty < 0 || tx >= tw as i64 || ty >= th as i64 {
            None
        } else {
            Some((tx as usize, ty as usize))
        }
    }

    /// Paste `solution` into a copy of the target at `offset`, inside the
    /// mask only. Alpha of pasted pixels is forced to 1.
    pub fn composite(&self, solution: &Field, offset: Offset) -> Field {
        assert_eq!(solution.dims(), self.source.dims(), "solution must be patch-sized");
        let mut out = self.target.clone();
        for (x, y, t) in solution.texels() {
            if self.source.get(x, y)[3] <= MASK_THRESHOLD {
                continue;
            }
            if let Some((tx, ty)) = self.target_coords(x, y, offset) {
                let c = |v: f32| v.clamp(0.0, 1.0);
                out.set(tx, ty, [c(t[0]), c(t[1]), c(t[2]), 1.0]);
            }
        }
        out
    }
}

impl SystemAssembler for SeamlessCloneAssembler {
    fn dimensions(&self) -> (usize, usize) {
        self.source.dims()
    }

    fn assemble(&self, offset: Offset) -> LinearSystem {
        let (w, h) = self.source.dims();
        let mut a1 = Field::new(w, h);
        let mut a2 = Field::new(w, h);
        let mut a3 = Field::new(w, h);
        let mut b = Field::new(w, h);
        let mut x0 = Field::new(w, h);

        let active = NinePointStencil::laplacian();
        let inactive = NinePointStencil::identity();
        let s = &self.source;

        for y in 0..h {
            for x in 0..w {
                let boundary = self.boundary_value(x, y, offset);
                let (rows, rhs) = if self.is_active(x, y) {
                    let (xi, yi) = (x as isize, y as isize);
                    let mut lap = ZERO;
                    let centre = s.get(x, y);
                    for (nx, ny) in [(xi - 1, yi), (xi + 1, yi), (xi, yi - 1), (xi, yi + 1)] {
                        let n = s.get_clamped(nx, ny);
                        for c in 0..4 {
                            lap[c] += centre[c] - n[c];
                        }
                    }
                    (active, lap)
                } else {
                    (inactive, boundary)
                };
                a1.set(x, y, rows.0);
                a2.set(x, y, rows.1);
                a3.set(x, y, rows.2);
                b.set(x, y, rhs);
                x0.set(x, y, boundary);
            }
        }

        LinearSystem { a1, a2, a3, b, x0 }
    }
}
