// level.rs — One resolution of the multigrid hierarchy (CPU).
//
// A `GridLevel` is a complete linear system at one resolution:
//
//   a1, a2, a3   stencil coefficients (read through a `Stencil`)
//   b            right-hand side
//   x            unknowns, ping-ponged across relaxation sweeps
//   r            residual b - A·x
//
// On level 0, `b` and the boundary values in `x` come from the system
// assembler. On coarser levels `b` is the restricted fine residual and `x`
// is a correction that gets prolonged back up.

use crate::config::ResetPolicy;
use crate::field::{Field, ZERO};
use crate::pingpong::PingPong;
use crate::stencil::Coefficients;

#[derive(Debug, Clone)]
pub struct GridLevel {
    pub width: usize,
    pub height: usize,
    pub a1: Field,
    pub a2: Field,
    pub a3: Field,
    pub b: Field,
    pub x: PingPong<Field>,
    pub r: Field,
}

/// Disjoint borrows of a level's fields: coefficients and `b` shared,
/// unknowns and residual exclusive.
pub struct LevelParts<'a> {
    pub coeffs: Coefficients<'a>,
    pub b: &'a Field,
    pub x: &'a mut PingPong<Field>,
    pub r: &'a mut Field,
}

impl GridLevel {
    /// Zero-filled level. All-zero coefficients mark every pixel inactive.
    pub fn new(width: usize, height: usize) -> Self {
        GridLevel {
            width,
            height,
            a1: Field::new(width, height),
            a2: Field::new(width, height),
            a3: Field::new(width, height),
            b: Field::new(width, height),
            x: PingPong::new(Field::new(width, height), Field::new(width, height)),
            r: Field::new(width, height),
        }
    }

    #[inline]
    pub fn dims(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    pub fn pixel_count(&self) -> usize {
        self.width * self.height
    }

    pub fn coefficients(&self) -> Coefficients<'_> {
        Coefficients { a1: &self.a1, a2: &self.a2, a3: &self.a3 }
    }

    /// Current estimate (front buffer).
    pub fn solution(&self) -> &Field {
        self.x.front()
    }

    pub fn solution_mut(&mut self) -> &mut Field {
        self.x.front_mut()
    }

    pub fn parts_mut(&mut self) -> LevelParts<'_> {
        LevelParts {
            coeffs: Coefficients { a1: &self.a1, a2: &self.a2, a3: &self.a3 },
            b: &self.b,
            x: &mut self.x,
            r: &mut self.r,
        }
    }

    /// Clear the unknowns and residual per `policy`. Coefficients and `b`
    /// are left alone.
    pub fn reset(&mut self, policy: ResetPolicy) {
        if policy == ResetPolicy::Zero {
            for buf in self.x.buffers_mut() {
                buf.fill(ZERO);
            }
        }
        self.r.fill(ZERO);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_level_is_zeroed() {
        let lvl = GridLevel::new(3, 2);
        assert_eq!(lvl.dims(), (3, 2));
        assert_eq!(lvl.pixel_count(), 6);
        assert!(lvl.solution().as_slice().iter().all(|&t| t == ZERO));
    }

    #[test]
    fn test_reset_zero_clears_both_buffers() {
        let mut lvl = GridLevel::new(2, 2);
        lvl.x.front_mut().fill([1.0; 4]);
        lvl.x.back_mut().fill([2.0; 4]);
        lvl.r.fill([3.0; 4]);
        lvl.b.fill([4.0; 4]);
        lvl.reset(ResetPolicy::Zero);
        assert_eq!(lvl.x.front().get(0, 0), ZERO);
        assert_eq!(lvl.x.back().get(1, 1), ZERO);
        assert_eq!(lvl.r.get(1, 0), ZERO);
        assert_eq!(lvl.b.get(0, 1), [4.0; 4]);
    }

    #[test]
    fn test_reset_retain_keeps_unknowns() {
        let mut lvl = GridLevel::new(2, 2);
        lvl.x.front_mut().fill([1.0; 4]);
        lvl.r.fill([3.0; 4]);
        lvl.reset(ResetPolicy::Retain);
        assert_eq!(lvl.solution().get(0, 0), [1.0; 4]);
        assert_eq!(lvl.r.get(0, 0), ZERO);
    }
}
