// gpu/solver.rs — Asynchronous execution controller.
//
// `GpuSolver` pipelines solve work one frame behind presentation. A frame:
//
//   wait()                    poll until the trailing submission is done
//   average_residual()        optional; stage-1 reduction + blocking map
//   display_rgba8(..)         presentation bracket around a readback
//   start(n)                  acquire shared images, record one V-cycle
//                             plus the display update, submit, release
//                             with the new submission index
//
// `start` returns as soon as the command buffer is queued. The only state
// crossing frames is `pending`, the submission index of the last V-cycle
// or hierarchy build. Everything that reads or mutates device fields calls
// `wait` first; buffers are updated in place and have no versioning.
//
// A change of level-0 size (a different source patch) reallocates the
// hierarchy, the display images and the reduction.

use log::{debug, info};

use crate::config::SolverConfig;
use crate::error::DeviceResult;
use crate::field::Field;
use crate::gpu::context::{AdapterInfo, ComputeContext};
use crate::gpu::hierarchy::GpuHierarchy;
use crate::gpu::kernels::MultigridKernels;
use crate::gpu::present::{DisplayImage, SharedImages};
use crate::gpu::reduce::Reduction;
use crate::solver::Solver;
use crate::stencil::{NinePointStencil, Stencil};
use crate::system::{Offset, SystemAssembler};
use crate::vcycle::VCycle;

/// Device state that depends on the level-0 size.
struct Resources {
    shared: SharedImages,
    hierarchy: GpuHierarchy,
    reduction: Reduction,
}

impl Resources {
    fn new(
        ctx: &ComputeContext,
        kernels: &MultigridKernels,
        config: &SolverConfig,
        stencil: &dyn Stencil,
        (width, height): (usize, usize),
    ) -> DeviceResult<Self> {
        let (w, h) = (width as u32, height as u32);
        let shared = SharedImages::new(ctx, w, h)?;
        let hierarchy = GpuHierarchy::new(ctx, kernels, config, stencil, &shared, w, h)?;
        let reduction = Reduction::new(ctx, config, &hierarchy.level(0).r)?;
        Ok(Resources { shared, hierarchy, reduction })
    }
}

/// GPU multigrid solver for one `SystemAssembler`.
pub struct GpuSolver<'c, A: SystemAssembler> {
    ctx: &'c ComputeContext,
    assembler: A,
    config: SolverConfig,
    stencil: Box<dyn Stencil>,
    kernels: MultigridKernels,
    res: Resources,
    vcycle: VCycle,
    offset: Offset,
    pending: Option<wgpu::SubmissionIndex>,
    cycles: u64,
}

impl<'c, A: SystemAssembler> GpuSolver<'c, A> {
    /// Solver with the nine-point stencil at offset (0, 0).
    pub fn new(ctx: &'c ComputeContext, assembler: A, config: SolverConfig) -> DeviceResult<Self> {
        Self::with_stencil(ctx, assembler, Box::new(NinePointStencil), config, Offset::default())
    }

    /// Compile the kernels for `stencil`, allocate the hierarchy and load
    /// the system assembled at `offset`.
    pub fn with_stencil(
        ctx: &'c ComputeContext,
        assembler: A,
        stencil: Box<dyn Stencil>,
        config: SolverConfig,
        offset: Offset,
    ) -> DeviceResult<Self> {
        config.validate()?;
        let kernels = MultigridKernels::new(ctx, stencil.as_ref())?;
        let system = assembler.assemble(offset);
        let mut res = Resources::new(ctx, &kernels, &config, stencil.as_ref(), system.dims())?;
        let idx = res.hierarchy.load(ctx, &kernels, &system, true)?;
        info!("gpu solver ready on {}", ctx.adapter_info);
        Ok(GpuSolver {
            ctx,
            assembler,
            config,
            stencil,
            kernels,
            res,
            vcycle: VCycle::new(),
            offset,
            pending: Some(idx),
            cycles: 0,
        })
    }

    pub fn context(&self) -> &'c ComputeContext {
        self.ctx
    }

    pub fn adapter_info(&self) -> &AdapterInfo {
        &self.ctx.adapter_info
    }

    pub fn assembler(&self) -> &A {
        &self.assembler
    }

    /// Mutable access to the assembler. Call [`Solver::rebuild`] afterwards.
    pub fn assembler_mut(&mut self) -> &mut A {
        &mut self.assembler
    }

    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    /// The stencil the kernels were compiled for.
    pub fn stencil(&self) -> &dyn Stencil {
        self.stencil.as_ref()
    }

    /// V-cycles submitted since construction.
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    pub fn hierarchy(&self) -> &GpuHierarchy {
        &self.res.hierarchy
    }

    /// The display images, for callers driving the presentation bracket
    /// themselves.
    pub fn shared_images_mut(&mut self) -> &mut SharedImages {
        &mut self.res.shared
    }

    /// Read one display image inside a complete presentation bracket.
    pub fn display_rgba8(&mut self, which: DisplayImage) -> DeviceResult<Vec<u8>> {
        let shared = &mut self.res.shared;
        shared.acquire_for_presentation(self.ctx)?;
        let pixels = shared.read_rgba8(self.ctx, which);
        shared.release_from_presentation();
        pixels
    }
}

impl<A: SystemAssembler> Solver for GpuSolver<'_, A> {
    fn start(&mut self, iterations_per_level: u32) -> DeviceResult<()> {
        let sweeps = self.config.even_sweeps(iterations_per_level);
        self.res.shared.acquire_for_compute()?;

        let mut encoder = self.ctx.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("v-cycle"),
        });
        let mut recorder = self.res.hierarchy.recorder(&self.kernels, &mut encoder);
        self.vcycle.run(&mut recorder, sweeps).unwrap_or_else(|never| match never {});
        self.res.hierarchy.record_present(&self.kernels, &mut encoder);

        let idx = self.ctx.queue.submit(std::iter::once(encoder.finish()));
        self.res.shared.release_from_compute(idx.clone());
        self.pending = Some(idx);
        self.cycles += 1;
        debug!("gpu v-cycle {} submitted ({} sweeps/level)", self.cycles, sweeps);
        Ok(())
    }

    fn wait(&mut self) -> DeviceResult<()> {
        if let Some(idx) = self.pending.take() {
            self.ctx.device.poll(wgpu::Maintain::WaitForSubmissionIndex(idx));
        }
        self.ctx.check_device_errors()
    }

    fn average_residual(&mut self) -> DeviceResult<f32> {
        self.wait()?;
        self.res.reduction.average(self.ctx)
    }

    fn current_solution(&mut self) -> DeviceResult<Field> {
        self.wait()?;
        self.res.hierarchy.solution(self.ctx)
    }

    fn current_residual(&mut self) -> DeviceResult<Field> {
        self.wait()?;
        self.res.hierarchy.residual(self.ctx)
    }

    fn set_offset(&mut self, dx: i32, dy: i32) -> DeviceResult<()> {
        self.wait()?;
        self.offset = Offset::new(dx, dy);
        debug!("offset -> {}", self.offset);
        self.rebuild(false)
    }

    fn offset(&self) -> Offset {
        self.offset
    }

    fn rebuild(&mut self, initialize: bool) -> DeviceResult<()> {
        self.wait()?;
        let system = self.assembler.assemble(self.offset);
        let resize = system.dims() != self.res.hierarchy.level(0).dims();
        if resize {
            self.res = Resources::new(self.ctx, &self.kernels, &self.config, self.stencil.as_ref(), system.dims())?;
        }
        let idx = self.res.hierarchy.load(self.ctx, &self.kernels, &system, initialize || resize)?;
        self.pending = Some(idx);
        Ok(())
    }

    fn level_dimensions(&self) -> Vec<(usize, usize)> {
        self.res.hierarchy.dims()
    }

    fn current_level(&self) -> usize {
        self.vcycle.current_level()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DeviceError;
    use crate::gpu::run_gpu_test_in_subprocess;
    use crate::solver::CpuSolver;
    use crate::testing::{all_inactive, poisson_problem, unit_diagonal};

    fn ctx() -> ComputeContext {
        ComputeContext::new(&SolverConfig::default()).expect("compute context")
    }

    #[test]
    #[ignore = "GPU integration: run via outer subprocess wrapper"]
    fn inner_gpu_solver_converges_monotonically() {
        let ctx = ctx();
        let mut s = GpuSolver::new(&ctx, poisson_problem(16, 16), SolverConfig::default()).unwrap();
        let mut prev = s.average_residual().unwrap();
        let first = prev;
        for cycle in 0..12 {
            s.start(2).unwrap();
            s.wait().unwrap();
            let r = s.average_residual().unwrap();
            assert!(r <= prev * (1.0 + 1e-4), "cycle {cycle}: {r} > {prev}");
            prev = r;
        }
        assert!(prev < first * 1e-2, "{first} -> {prev}");
        println!("GPU_TEST_OK");
    }

    #[test]
    #[ignore = "GPU integration: run via outer subprocess wrapper"]
    fn inner_gpu_solver_matches_cpu_solver() {
        let ctx = ctx();
        let cfg = SolverConfig::default();
        let mut gpu = GpuSolver::new(&ctx, poisson_problem(21, 13), cfg).unwrap();
        let mut cpu = CpuSolver::new(poisson_problem(21, 13), cfg).unwrap();
        for _ in 0..4 {
            gpu.start(4).unwrap();
            cpu.start(4).unwrap();
        }
        let g = gpu.current_solution().unwrap();
        let c = cpu.current_solution().unwrap();
        assert!(g.max_abs_diff(&c) < 1e-4, "diff {}", g.max_abs_diff(&c));
        let (gr, cr) = (gpu.average_residual().unwrap(), cpu.average_residual().unwrap());
        assert!((gr - cr).abs() < 1e-4 + 1e-3 * cr, "gpu {gr} vs cpu {cr}");
        assert_eq!(gpu.level_dimensions(), cpu.level_dimensions());
        println!("GPU_TEST_OK");
    }

    #[test]
    #[ignore = "GPU integration: run via outer subprocess wrapper"]
    fn inner_gpu_solver_matches_cpu_on_odd_coarse_widths() {
        // 50 → 25 → 13 and 100×60 → 50×30 → 25×15: the coarse chains
        // pass through odd widths on both axes.
        let ctx = ctx();
        let cfg = SolverConfig::default();
        for (w, h) in [(50, 50), (100, 60)] {
            let mut gpu = GpuSolver::new(&ctx, poisson_problem(w, h), cfg).unwrap();
            let mut cpu = CpuSolver::new(poisson_problem(w, h), cfg).unwrap();
            let first = cpu.average_residual().unwrap();
            let mut prev = first;
            for cycle in 0..6 {
                gpu.start(2).unwrap();
                cpu.start(2).unwrap();
                let r = cpu.average_residual().unwrap();
                assert!(r <= prev, "{w}×{h} cycle {cycle}: {r} > {prev}");
                prev = r;
            }
            assert!(prev < first * 0.1, "{w}×{h}: {first} -> {prev}");

            let g = gpu.current_solution().unwrap();
            let c = cpu.current_solution().unwrap();
            assert!(g.max_abs_diff(&c) < 1e-4, "{w}×{h} diff {}", g.max_abs_diff(&c));
            let gr = gpu.average_residual().unwrap();
            assert!((gr - prev).abs() < 1e-5 + 1e-3 * prev, "{w}×{h}: gpu {gr} vs cpu {prev}");
        }
        ctx.check_device_errors().unwrap();
        println!("GPU_TEST_OK");
    }

    #[test]
    #[ignore = "GPU integration: run via outer subprocess wrapper"]
    fn inner_gpu_solver_all_inactive_is_fixed_point() {
        let ctx = ctx();
        let sys = all_inactive(4, 4);
        let x0 = sys.x0.clone();
        let mut s = GpuSolver::new(&ctx, sys, SolverConfig::default()).unwrap();
        assert_eq!(s.level_dimensions(), vec![(4, 4), (2, 2), (1, 1)]);
        s.start(3).unwrap();
        assert_eq!(s.current_solution().unwrap(), x0);
        assert_eq!(s.average_residual().unwrap(), 0.0);
        println!("GPU_TEST_OK");
    }

    #[test]
    #[ignore = "GPU integration: run via outer subprocess wrapper"]
    fn inner_gpu_solver_unit_diagonal_one_cycle() {
        let ctx = ctx();
        let cfg = SolverConfig { jacobi_weight: 1.0, ..Default::default() };
        let sys = unit_diagonal(9, 7);
        let b = sys.b.clone();
        let mut s = GpuSolver::new(&ctx, sys, cfg).unwrap();
        s.start(1).unwrap();
        let x = s.current_solution().unwrap();
        assert!(x.max_abs_diff(&b) < 1e-6, "diff {}", x.max_abs_diff(&b));
        assert!(s.average_residual().unwrap() < 1e-6);
        println!("GPU_TEST_OK");
    }

    #[test]
    #[ignore = "GPU integration: run via outer subprocess wrapper"]
    fn inner_gpu_solver_presentation_bracket() {
        let ctx = ctx();
        let mut s = GpuSolver::new(&ctx, poisson_problem(8, 8), SolverConfig::default()).unwrap();
        s.start(2).unwrap();

        s.shared_images_mut().acquire_for_presentation(&ctx).unwrap();
        let err = s.start(2).unwrap_err();
        assert!(matches!(err, DeviceError::SharedImageBusy { holder: "presentation side" }), "{err}");
        s.shared_images_mut().release_from_presentation();

        s.start(2).unwrap();
        s.wait().unwrap();
        let pixels = s.display_rgba8(DisplayImage::Solution).unwrap();
        assert_eq!(pixels.len(), 8 * 8 * 4);
        // Right border holds the ramp value 1.0 in red, alpha is opaque.
        let right = (3 * 8 + 7) * 4;
        assert_eq!(pixels[right], 255);
        assert_eq!(pixels[right + 3], 255);
        assert_eq!(s.current_level(), 0);
        println!("GPU_TEST_OK");
    }

    #[test]
    #[ignore = "GPU integration: run via outer subprocess wrapper"]
    fn inner_gpu_solver_set_offset_keeps_level_count() {
        let ctx = ctx();
        let mut s = GpuSolver::new(&ctx, poisson_problem(16, 16), SolverConfig::default()).unwrap();
        s.start(2).unwrap();
        s.set_offset(4, -3).unwrap();
        assert_eq!(s.offset(), Offset::new(4, -3));
        assert_eq!(s.level_dimensions().len(), 5);
        s.start(2).unwrap();
        s.wait().unwrap();
        println!("GPU_TEST_OK");
    }

    macro_rules! gpu_wrapper {
        ($outer:ident, $inner:literal) => {
            #[test]
            #[ignore = "requires a GPU or software adapter"]
            fn $outer() {
                let out = run_gpu_test_in_subprocess(concat!("gpu::solver::tests::", $inner));
                assert!(out.contains("GPU_TEST_OK"), "inner test did not print GPU_TEST_OK:\n{out}");
            }
        };
    }

    gpu_wrapper!(test_gpu_solver_converges_monotonically, "inner_gpu_solver_converges_monotonically");
    gpu_wrapper!(test_gpu_solver_matches_cpu_solver, "inner_gpu_solver_matches_cpu_solver");
    gpu_wrapper!(
        test_gpu_solver_matches_cpu_on_odd_coarse_widths,
        "inner_gpu_solver_matches_cpu_on_odd_coarse_widths"
    );
    gpu_wrapper!(test_gpu_solver_all_inactive_is_fixed_point, "inner_gpu_solver_all_inactive_is_fixed_point");
    gpu_wrapper!(test_gpu_solver_unit_diagonal_one_cycle, "inner_gpu_solver_unit_diagonal_one_cycle");
    gpu_wrapper!(test_gpu_solver_presentation_bracket, "inner_gpu_solver_presentation_bracket");
    gpu_wrapper!(test_gpu_solver_set_offset_keeps_level_count, "inner_gpu_solver_set_offset_keeps_level_count");
}
