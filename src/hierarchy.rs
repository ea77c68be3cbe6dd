// hierarchy.rs — The stack of grid levels (CPU).
//
// SHAPE
// ─────
// Level 0 has the system's resolution. Each next level halves both
// dimensions, rounding up, and the stack stops at the first level whose
// width or height is 1:
//
//   16×16 → 8×8 → 4×4 → 2×2 → 1×1        (5 levels)
//    5×5  → 3×3 → 2×2 → 1×1              (4 levels)
//   64×4  → 32×2 → 16×1                  (3 levels)
//
// The level count depends only on the level-0 size. `build(.., false)`
// refreshes contents in place and never reallocates.
//
// WHAT BUILD DERIVES
// ──────────────────
//   a1, a2, a3   injection from the next-finer level (discrete topology),
//                then a1 loses its active flag wherever the fine 3×3
//                footprint is not entirely active (`coarsen_activity`)
//   b            full-weighting restriction from the next-finer level
//   x, r         reset per `ResetPolicy` (the V-cycle overwrites b and
//                resets x before every coarse solve anyway)

use log::{debug, info};

use crate::config::ResetPolicy;
use crate::field::{Field, ZERO};
use crate::level::GridLevel;
use crate::stencil::{Coefficients, Stencil};
use crate::system::LinearSystem;
use crate::transfer::{coarse_dims, coarsen_activity, inject_into, restrict_into};

/// Dimensions of every level for a `width × height` level 0.
pub fn level_dimensions(width: usize, height: usize) -> Vec<(usize, usize)> {
    assert!(width > 0 && height > 0, "hierarchy needs at least a 1×1 level");
    let mut dims = vec![(width, height)];
    let (mut w, mut h) = (width, height);
    while w != 1 && h != 1 {
        (w, h) = coarse_dims(w, h);
        dims.push((w, h));
    }
    dims
}

/// Multigrid levels, finest first.
#[derive(Debug, Clone)]
pub struct GridHierarchy {
    levels: Vec<GridLevel>,
    policy: ResetPolicy,
}

impl GridHierarchy {
    /// Allocate and populate a hierarchy for `system`.
    pub fn new(system: &LinearSystem, stencil: &dyn Stencil, policy: ResetPolicy) -> Self {
        let mut h = GridHierarchy { levels: Vec::new(), policy };
        h.build(system, stencil, true);
        h
    }

    /// Load a new level-0 system and refresh the coarse levels.
    ///
    /// With `initialize`, every level is reallocated and level 0's unknowns
    /// are set to `system.x0`. Without it, the level count is kept, active
    /// level-0 unknowns keep their current values (warm start) and only the
    /// inactive ones pick up the new boundary values from `system.x0`.
    ///
    /// # Panics
    /// If `initialize` is false and the system size differs from level 0.
    pub fn build(&mut self, system: &LinearSystem, stencil: &dyn Stencil, initialize: bool) {
        system.assert_consistent();
        let (w, h) = system.dims();

        if initialize {
            self.levels = level_dimensions(w, h)
                .into_iter()
                .map(|(lw, lh)| GridLevel::new(lw, lh))
                .collect();
            info!("multigrid hierarchy: {}×{}, {} levels", w, h, self.levels.len());
        } else {
            assert_eq!(
                self.levels.first().map(GridLevel::dims),
                Some((w, h)),
                "non-initializing build must keep the level-0 size"
            );
            debug!("multigrid hierarchy: refreshing {} levels", self.levels.len());
        }

        let l0 = &mut self.levels[0];
        l0.a1.copy_from(&system.a1);
        l0.a2.copy_from(&system.a2);
        l0.a3.copy_from(&system.a3);
        l0.b.copy_from(&system.b);
        if initialize {
            l0.x.front_mut().copy_from(&system.x0);
        } else {
            let coeffs = Coefficients { a1: &l0.a1, a2: &l0.a2, a3: &l0.a3 };
            let x = l0.x.front_mut();
            for (px, py, t) in system.x0.texels() {
                if !stencil.is_active(coeffs, px, py) {
                    x.set(px, py, t);
                }
            }
        }
        l0.r.fill(ZERO);

        for i in 1..self.levels.len() {
            let (fine, coarse) = self.levels.split_at_mut(i);
            let (fine, coarse) = (&fine[i - 1], &mut coarse[0]);
            inject_into(&fine.a1, &mut coarse.a1);
            inject_into(&fine.a2, &mut coarse.a2);
            inject_into(&fine.a3, &mut coarse.a3);
            coarsen_activity(stencil, fine.coefficients(), &mut coarse.a1);
            restrict_into(&fine.b, &mut coarse.b, 1.0);
            coarse.reset(self.policy);
        }
    }

    /// Clear one level's unknowns and residual per the configured policy.
    pub fn reset(&mut self, level: usize) {
        self.levels[level].reset(self.policy);
    }

    pub fn policy(&self) -> ResetPolicy {
        self.policy
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// Index of the coarsest level.
    pub fn coarsest(&self) -> usize {
        self.levels.len() - 1
    }

    pub fn level(&self, i: usize) -> &GridLevel {
        &self.levels[i]
    }

    pub fn level_mut(&mut self, i: usize) -> &mut GridLevel {
        &mut self.levels[i]
    }

    pub fn levels(&self) -> &[GridLevel] {
        &self.levels
    }

    /// Mutable access to levels `i` (fine) and `i + 1` (coarse) at once.
    pub fn pair_mut(&mut self, i: usize) -> (&mut GridLevel, &mut GridLevel) {
        let (fine, coarse) = self.levels.split_at_mut(i + 1);
        (&mut fine[i], &mut coarse[0])
    }

    pub fn dims(&self) -> Vec<(usize, usize)> {
        self.levels.iter().map(GridLevel::dims).collect()
    }

    /// Level-0 solution.
    pub fn solution(&self) -> &Field {
        self.levels[0].solution()
    }

    /// Level-0 residual.
    pub fn residual(&self) -> &Field {
        &self.levels[0].r
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_dimensions_power_of_two() {
        assert_eq!(
            level_dimensions(16, 16),
            vec![(16, 16), (8, 8), (4, 4), (2, 2), (1, 1)]
        );
    }

    #[test]
    fn test_level_dimensions_odd() {
        assert_eq!(level_dimensions(5, 5), vec![(5, 5), (3, 3), (2, 2), (1, 1)]);
    }

    #[test]
    fn test_level_dimensions_stops_on_first_unit_dimension() {
        assert_eq!(level_dimensions(64, 4), vec![(64, 4), (32, 2), (16, 1)]);
        assert_eq!(level_dimensions(1, 9), vec![(1, 9)]);
        assert_eq!(level_dimensions(1, 1), vec![(1, 1)]);
    }
}
