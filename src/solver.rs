// solver.rs — The frame-loop facing solver API and the CPU reference solver.
//
// A frame of an interactive session looks like this:
//
//   solver.wait()?;                          // previous V-cycle finished
//   let r = solver.average_residual()?;      // optional, blocking
//   renderer.show(solver.current_solution()?);
//   solver.start(iterations)?;               // enqueue next V-cycle
//
// `start` never blocks on the GPU solver: the work is recorded, submitted
// and the trailing submission index remembered. Anything that mutates the
// system (`set_offset`, `rebuild`) drains in-flight work first.
//
// `CpuSolver` implements the same trait synchronously on top of the CPU
// reference operators. It is what the GPU results are validated against.

use log::debug;

use crate::config::SolverConfig;
use crate::error::DeviceResult;
use crate::field::Field;
use crate::hierarchy::GridHierarchy;
use crate::residual;
use crate::stencil::{NinePointStencil, Stencil};
use crate::system::{Offset, SystemAssembler};
use crate::vcycle::{CpuBackend, VCycle};

/// Controls one multigrid solve that is refined frame by frame.
pub trait Solver {
    /// Enqueue one V-cycle with `iterations_per_level` relaxation sweeps
    /// per level visit (rounded to an even count, see
    /// [`SolverConfig::even_sweeps`]).
    fn start(&mut self, iterations_per_level: u32) -> DeviceResult<()>;

    /// Block until the last started V-cycle has completed.
    fn wait(&mut self) -> DeviceResult<()>;

    /// Mean residual magnitude at level 0. Blocking round trip.
    fn average_residual(&mut self) -> DeviceResult<f32>;

    /// Level-0 solution. Valid between `wait` and the next `start`.
    fn current_solution(&mut self) -> DeviceResult<Field>;

    /// Level-0 residual. Valid between `wait` and the next `start`.
    fn current_residual(&mut self) -> DeviceResult<Field>;

    /// Move the patch and rebuild the system without reinitialising the
    /// unknowns.
    fn set_offset(&mut self, dx: i32, dy: i32) -> DeviceResult<()>;

    fn offset(&self) -> Offset;

    /// Re-assemble the system at the current offset, e.g. after the target
    /// image changed. With `initialize`, unknowns restart from `x0`.
    fn rebuild(&mut self, initialize: bool) -> DeviceResult<()>;

    /// Dimensions of every hierarchy level, finest first.
    fn level_dimensions(&self) -> Vec<(usize, usize)>;

    /// Scheduler level; 0 whenever no V-cycle is being recorded.
    fn current_level(&self) -> usize;
}

// ---------------------------------------------------------------------------
// CpuSolver
// ---------------------------------------------------------------------------

/// Synchronous reference solver.
pub struct CpuSolver<A: SystemAssembler> {
    assembler: A,
    stencil: Box<dyn Stencil>,
    config: SolverConfig,
    hierarchy: GridHierarchy,
    vcycle: VCycle,
    offset: Offset,
    cycles: u64,
}

impl<A: SystemAssembler> CpuSolver<A> {
    /// Solver with the nine-point stencil at offset (0, 0).
    pub fn new(assembler: A, config: SolverConfig) -> DeviceResult<Self> {
        Self::with_stencil(assembler, Box::new(NinePointStencil), config, Offset::default())
    }

    pub fn with_stencil(
        assembler: A,
        stencil: Box<dyn Stencil>,
        config: SolverConfig,
        offset: Offset,
    ) -> DeviceResult<Self> {
        config.validate()?;
        let system = assembler.assemble(offset);
        let hierarchy = GridHierarchy::new(&system, stencil.as_ref(), config.reset_policy);
        Ok(CpuSolver {
            assembler,
            stencil,
            config,
            hierarchy,
            vcycle: VCycle::new(),
            offset,
            cycles: 0,
        })
    }

    pub fn hierarchy(&self) -> &GridHierarchy {
        &self.hierarchy
    }

    pub fn assembler(&self) -> &A {
        &self.assembler
    }

    /// Mutable access to the assembler, e.g. to swap the target image.
    /// Call [`Solver::rebuild`] afterwards.
    pub fn assembler_mut(&mut self) -> &mut A {
        &mut self.assembler
    }

    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    /// V-cycles run since construction.
    pub fn cycles(&self) -> u64 {
        self.cycles
    }
}

impl<A: SystemAssembler> Solver for CpuSolver<A> {
    fn start(&mut self, iterations_per_level: u32) -> DeviceResult<()> {
        let sweeps = self.config.even_sweeps(iterations_per_level);
        let mut backend = CpuBackend {
            hierarchy: &mut self.hierarchy,
            stencil: self.stencil.as_ref(),
            config: &self.config,
        };
        self.vcycle.run(&mut backend, sweeps).unwrap_or_else(|never| match never {});
        self.cycles += 1;
        debug!("cpu v-cycle {} ({} sweeps/level)", self.cycles, sweeps);
        Ok(())
    }

    fn wait(&mut self) -> DeviceResult<()> {
        Ok(())
    }

    fn average_residual(&mut self) -> DeviceResult<f32> {
        residual::evaluate(self.stencil.as_ref(), self.hierarchy.level_mut(0));
        Ok(residual::average_magnitude(self.hierarchy.residual()))
    }

    fn current_solution(&mut self) -> DeviceResult<Field> {
        Ok(self.hierarchy.solution().clone())
    }

    fn current_residual(&mut self) -> DeviceResult<Field> {
        Ok(self.hierarchy.residual().clone())
    }

    fn set_offset(&mut self, dx: i32, dy: i32) -> DeviceResult<()> {
        self.offset = Offset::new(dx, dy);
        self.rebuild(false)
    }

    fn offset(&self) -> Offset {
        self.offset
    }

    fn rebuild(&mut self, initialize: bool) -> DeviceResult<()> {
        let system = self.assembler.assemble(self.offset);
        let resize = system.dims() != self.hierarchy.level(0).dims();
        self.hierarchy.build(&system, self.stencil.as_ref(), initialize || resize);
        Ok(())
    }

    fn level_dimensions(&self) -> Vec<(usize, usize)> {
        self.hierarchy.dims()
    }

    fn current_level(&self) -> usize {
        self.vcycle.current_level()
    }
}
