// vcycle.rs — Recursive V-cycle scheduling.
//
// The control flow is backend-independent. A `MultigridBackend` knows how
// to smooth, evaluate a residual, and move data between two adjacent
// levels; `VCycle` decides in which order:
//
//   descend(i), i < L:   smooth(i, n)
//                        residual(i)
//                        push        restrict r[i] → b[i+1], reset x[i+1]
//                        descend(i+1)
//                        pop         x[i] += mask(prolong(x[i+1]))
//                        smooth(i, n)
//   descend(L):          smooth(L, n)
//
// followed by one final residual(0) so the level-0 residual describes the
// returned iterate. The CPU backend executes each step immediately; the
// GPU backend (gpu/hierarchy.rs) records it into a command encoder.
//
// `current_level` is moved only by push (+1) and pop (-1). It is 0 before
// and after every `run`, including when the backend reports an error.

use std::convert::Infallible;

use log::trace;

use crate::config::SolverConfig;
use crate::hierarchy::GridHierarchy;
use crate::residual;
use crate::smoother;
use crate::stencil::Stencil;
use crate::transfer;

/// The per-level operations a V-cycle is made of.
pub trait MultigridBackend {
    type Error;

    /// Number of levels (≥ 1).
    fn depth(&self) -> usize;

    fn smooth(&mut self, level: usize, sweeps: u32) -> Result<(), Self::Error>;

    fn residual(&mut self, level: usize) -> Result<(), Self::Error>;

    /// Restrict the residual of `fine` into the right-hand side of
    /// `fine + 1` and reset that level's unknowns.
    fn restrict(&mut self, fine: usize) -> Result<(), Self::Error>;

    /// Prolong the unknowns of `coarse` and add them, masked, into level
    /// `coarse - 1`.
    fn correct(&mut self, coarse: usize) -> Result<(), Self::Error>;
}

/// V-cycle state machine.
#[derive(Debug, Default)]
pub struct VCycle {
    current_level: usize,
    deepest: usize,
}

impl VCycle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Level the scheduler is currently working on. 0 outside of `run`.
    pub fn current_level(&self) -> usize {
        self.current_level
    }

    /// Deepest level reached by the last `run`.
    pub fn deepest(&self) -> usize {
        self.deepest
    }

    /// One full V-cycle with `sweeps` relaxation sweeps per visit.
    pub fn run<B: MultigridBackend>(&mut self, backend: &mut B, sweeps: u32) -> Result<(), B::Error> {
        debug_assert_eq!(self.current_level, 0, "V-cycle re-entered");
        self.deepest = 0;
        let result = self.descend(backend, sweeps).and_then(|()| backend.residual(0));
        if result.is_err() {
            self.current_level = 0;
        }
        debug_assert_eq!(self.current_level, 0, "unbalanced push/pop");
        result
    }

    fn descend<B: MultigridBackend>(&mut self, backend: &mut B, sweeps: u32) -> Result<(), B::Error> {
        let level = self.current_level;
        backend.smooth(level, sweeps)?;
        if level + 1 >= backend.depth() {
            return Ok(());
        }
        backend.residual(level)?;
        self.push(backend)?;
        self.descend(backend, sweeps)?;
        self.pop(backend)?;
        backend.smooth(level, sweeps)
    }

    fn push<B: MultigridBackend>(&mut self, backend: &mut B) -> Result<(), B::Error> {
        trace!("vcycle push {} -> {}", self.current_level, self.current_level + 1);
        backend.restrict(self.current_level)?;
        self.current_level += 1;
        self.deepest = self.deepest.max(self.current_level);
        Ok(())
    }

    fn pop<B: MultigridBackend>(&mut self, backend: &mut B) -> Result<(), B::Error> {
        trace!("vcycle pop {} -> {}", self.current_level, self.current_level - 1);
        backend.correct(self.current_level)?;
        self.current_level -= 1;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// CPU backend
// ---------------------------------------------------------------------------

/// Executes V-cycle steps directly on a `GridHierarchy`.
pub struct CpuBackend<'a> {
    pub hierarchy: &'a mut GridHierarchy,
    pub stencil: &'a dyn Stencil,
    pub config: &'a SolverConfig,
}

impl MultigridBackend for CpuBackend<'_> {
    type Error = Infallible;

    fn depth(&self) -> usize {
        self.hierarchy.len()
    }

    fn smooth(&mut self, level: usize, sweeps: u32) -> Result<(), Infallible> {
        let omega = self.config.jacobi_weight;
        smoother::smooth(self.stencil, self.hierarchy.level_mut(level), omega, sweeps);
        Ok(())
    }

    fn residual(&mut self, level: usize) -> Result<(), Infallible> {
        residual::evaluate(self.stencil, self.hierarchy.level_mut(level));
        Ok(())
    }

    fn restrict(&mut self, fine: usize) -> Result<(), Infallible> {
        let policy = self.hierarchy.policy();
        let (f, c) = self.hierarchy.pair_mut(fine);
        let weight = self.config.correction_weight_for(self.stencil);
        transfer::restrict_into(&f.r, &mut c.b, weight);
        c.reset(policy);
        Ok(())
    }

    fn correct(&mut self, coarse: usize) -> Result<(), Infallible> {
        let (f, c) = self.hierarchy.pair_mut(coarse - 1);
        let parts = f.parts_mut();
        transfer::correct(self.stencil, parts.coeffs, parts.x.front_mut(), c.solution());
        Ok(())
    }
}
