// gpu/hierarchy.rs — Device-resident grid levels and V-cycle recording.
//
// Mirrors hierarchy.rs: same level shapes, same fields per level, same
// build rules. Every bind group a V-cycle can need is created up front, so
// recording a cycle is nothing but `set_pipeline` / `dispatch` calls.
//
// PING-PONG INDEXING
// ──────────────────
// The unknowns of each level are two textures. The host tracks which one
// is the front (`PingPong::front_index`) and picks the bind group that
// reads it:
//
//   jacobi[f]        x = x[f]               out = x[1-f]
//   correct[f][c]    x = fine.x[f]          coarse = x[c]   out = fine.x[1-f]
//   load_boundary[f] x = x[f], aux = x0     out = x[1-f]    (level 0)
//   present[f]       x = x[f], aux = r      display images  (level 0)
//
// and flips the index right after recording the dispatch. GPU execution
// follows recording order, so the host index always names the buffer the
// next recorded kernel will see. An encoder that is recorded but never
// submitted would desynchronise the two, so every recorded encoder is
// submitted.
//
// TRANSFERS
// ─────────
// Bind groups that connect level i-1 (fine) and level i (coarse) live on
// the coarse level:
//
//   restrict_residual   aux = fine.r  → out = b    cycle params (weight c)
//   restrict_rhs        aux = fine.b  → out = b    build params (weight 1)
//   inject_active       a1..a3 = fine, aux = fine.a1 → out = a1
//   inject[k]           aux = fine.a2, fine.a3 → out = a2, a3

use std::convert::Infallible;

use log::{debug, info};

use crate::config::{ResetPolicy, SolverConfig};
use crate::error::{DeviceError, DeviceResult};
use crate::field::Field;
use crate::gpu::context::{ComputeContext, ScopeKind};
use crate::gpu::field::GpuField;
use crate::gpu::kernels::{Bindings, KernelParams, MultigridKernels, DEFAULT_RESIDUAL_GAIN};
use crate::gpu::present::SharedImages;
use crate::hierarchy::level_dimensions;
use crate::pingpong::PingPong;
use crate::stencil::Stencil;
use crate::system::LinearSystem;
use crate::vcycle::MultigridBackend;

use wgpu::util::DeviceExt;

struct Transfers {
    restrict_residual: wgpu::BindGroup,
    restrict_rhs: wgpu::BindGroup,
    inject_active: wgpu::BindGroup,
    inject: [wgpu::BindGroup; 2],
    /// Indexed `[fine front][coarse front]`.
    correct: [[wgpu::BindGroup; 2]; 2],
}

struct Display {
    load_boundary: [wgpu::BindGroup; 2],
    present: [wgpu::BindGroup; 2],
}

/// One level of the GPU hierarchy.
pub struct GpuLevel {
    pub width: u32,
    pub height: u32,
    pub a1: GpuField,
    pub a2: GpuField,
    pub a3: GpuField,
    pub b: GpuField,
    pub x: PingPong<GpuField>,
    pub r: GpuField,
    groups: (u32, u32),
    jacobi: [wgpu::BindGroup; 2],
    residual: [wgpu::BindGroup; 2],
    fill_x: [wgpu::BindGroup; 2],
    fill_r: wgpu::BindGroup,
    from_finer: Option<Transfers>,
}

impl GpuLevel {
    fn new(
        ctx: &ComputeContext,
        kernels: &MultigridKernels,
        params: &wgpu::Buffer,
        index: usize,
        width: u32,
        height: u32,
    ) -> DeviceResult<Self> {
        let field = |name: &str| GpuField::new(ctx, width, height, &format!("L{index} {name}"));
        let a1 = field("a1")?;
        let a2 = field("a2")?;
        let a3 = field("a3")?;
        let b = field("b")?;
        let x = PingPong::new(field("x0")?, field("x1")?);
        let r = field("r")?;

        let label = format!("L{index}");
        let [x0, x1] = x.buffers();
        let level = Bindings {
            params: Some(params),
            a1: Some(&a1.view),
            a2: Some(&a2.view),
            a3: Some(&a3.view),
            b: Some(&b.view),
            ..Default::default()
        };
        let jacobi = [
            kernels.jacobi.bind(ctx, &Bindings { x: Some(&x0.view), out: Some(&x1.view), ..level }, &label)?,
            kernels.jacobi.bind(ctx, &Bindings { x: Some(&x1.view), out: Some(&x0.view), ..level }, &label)?,
        ];
        let residual = [
            kernels.residual.bind(ctx, &Bindings { x: Some(&x0.view), out: Some(&r.view), ..level }, &label)?,
            kernels.residual.bind(ctx, &Bindings { x: Some(&x1.view), out: Some(&r.view), ..level }, &label)?,
        ];
        let fill = |target: &GpuField| {
            kernels.fill.bind(ctx, &Bindings { out: Some(&target.view), ..Default::default() }, &label)
        };
        let fill_x = [fill(x0)?, fill(x1)?];
        let fill_r = fill(&r)?;

        Ok(GpuLevel {
            width,
            height,
            groups: ctx.dispatch_size(width, height),
            a1,
            a2,
            a3,
            b,
            x,
            r,
            jacobi,
            residual,
            fill_x,
            fill_r,
            from_finer: None,
        })
    }

    pub fn dims(&self) -> (usize, usize) {
        (self.width as usize, self.height as usize)
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Current unknowns (front buffer).
    pub fn solution(&self) -> &GpuField {
        self.x.front()
    }
}

fn link(
    ctx: &ComputeContext,
    kernels: &MultigridKernels,
    cycle_params: &wgpu::Buffer,
    build_params: &wgpu::Buffer,
    fine: &GpuLevel,
    coarse: &GpuLevel,
    label: &str,
) -> DeviceResult<Transfers> {
    let restrict = |params: &wgpu::Buffer, src: &GpuField| {
        kernels.restrict.bind(
            ctx,
            &Bindings { params: Some(params), aux: Some(&src.view), out: Some(&coarse.b.view), ..Default::default() },
            label,
        )
    };
    let inject = |src: &GpuField, dst: &GpuField| {
        kernels.inject.bind(ctx, &Bindings { aux: Some(&src.view), out: Some(&dst.view), ..Default::default() }, label)
    };
    let coeffs = Bindings {
        a1: Some(&fine.a1.view),
        a2: Some(&fine.a2.view),
        a3: Some(&fine.a3.view),
        ..Default::default()
    };
    let [f0, f1] = fine.x.buffers();
    let [c0, c1] = coarse.x.buffers();
    let correct = |fx: &GpuField, fout: &GpuField, cx: &GpuField| {
        kernels.correct.bind(
            ctx,
            &Bindings { x: Some(&fx.view), out: Some(&fout.view), coarse: Some(&cx.view), ..coeffs },
            label,
        )
    };
    Ok(Transfers {
        restrict_residual: restrict(cycle_params, &fine.r)?,
        restrict_rhs: restrict(build_params, &fine.b)?,
        inject_active: kernels.inject_active.bind(
            ctx,
            &Bindings { aux: Some(&fine.a1.view), out: Some(&coarse.a1.view), ..coeffs },
            label,
        )?,
        inject: [inject(&fine.a2, &coarse.a2)?, inject(&fine.a3, &coarse.a3)?],
        correct: [
            [correct(f0, f1, c0)?, correct(f0, f1, c1)?],
            [correct(f1, f0, c0)?, correct(f1, f0, c1)?],
        ],
    })
}

// ---------------------------------------------------------------------------
// GpuHierarchy
// ---------------------------------------------------------------------------

/// Multigrid levels on the device, finest first, plus the level-0 boundary
/// field `x0` and the kernel parameter buffers.
pub struct GpuHierarchy {
    levels: Vec<GpuLevel>,
    x0: GpuField,
    display: Display,
    policy: ResetPolicy,
    _cycle_params: wgpu::Buffer,
    _build_params: wgpu::Buffer,
}

impl GpuHierarchy {
    /// Allocate every level for a `width × height` system and pre-build all
    /// bind groups. Contents are zero until `load`.
    pub fn new(
        ctx: &ComputeContext,
        kernels: &MultigridKernels,
        config: &SolverConfig,
        stencil: &dyn Stencil,
        shared: &SharedImages,
        width: u32,
        height: u32,
    ) -> DeviceResult<Self> {
        let cycle = KernelParams {
            omega: config.jacobi_weight,
            correction_weight: config.correction_weight_for(stencil),
            residual_gain: DEFAULT_RESIDUAL_GAIN,
            _pad: 0.0,
        };
        let build = KernelParams { correction_weight: 1.0, ..cycle };
        let cycle_params = uniform(ctx, "cycle params", &cycle)?;
        let build_params = uniform(ctx, "build params", &build)?;

        let dims = level_dimensions(width as usize, height as usize);
        let mut levels: Vec<GpuLevel> = Vec::with_capacity(dims.len());
        for (i, &(w, h)) in dims.iter().enumerate() {
            let mut level = GpuLevel::new(ctx, kernels, &cycle_params, i, w as u32, h as u32)?;
            if let Some(fine) = levels.last() {
                let label = format!("L{} -> L{i}", i - 1);
                level.from_finer = Some(link(ctx, kernels, &cycle_params, &build_params, fine, &level, &label)?);
            }
            levels.push(level);
        }

        let x0 = GpuField::new(ctx, width, height, "L0 boundary x0")?;
        let l0 = &levels[0];
        let [xa, xb] = l0.x.buffers();
        let coeffs = Bindings {
            a1: Some(&l0.a1.view),
            a2: Some(&l0.a2.view),
            a3: Some(&l0.a3.view),
            ..Default::default()
        };
        let boundary = |x: &GpuField, out: &GpuField| {
            kernels.load_boundary.bind(
                ctx,
                &Bindings { x: Some(&x.view), aux: Some(&x0.view), out: Some(&out.view), ..coeffs },
                "L0 load boundary",
            )
        };
        let present = |x: &GpuField| {
            kernels.present.bind(
                ctx,
                &Bindings {
                    params: Some(&cycle_params),
                    x: Some(&x.view),
                    aux: Some(&l0.r.view),
                    display_solution: Some(shared.solution_view()),
                    display_residual: Some(shared.residual_view()),
                    ..Default::default()
                },
                "L0 present",
            )
        };
        let display = Display {
            load_boundary: [boundary(xa, xb)?, boundary(xb, xa)?],
            present: [present(xa)?, present(xb)?],
        };

        info!("gpu multigrid hierarchy: {}×{}, {} levels", width, height, levels.len());
        Ok(GpuHierarchy {
            levels,
            x0,
            display,
            policy: config.reset_policy,
            _cycle_params: cycle_params,
            _build_params: build_params,
        })
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn level(&self, i: usize) -> &GpuLevel {
        &self.levels[i]
    }

    pub fn dims(&self) -> Vec<(usize, usize)> {
        self.levels.iter().map(GpuLevel::dims).collect()
    }

    /// Upload a level-0 system and derive the coarse levels on the device.
    ///
    /// With `initialize`, level-0 unknowns restart from `system.x0`.
    /// Without it, active unknowns are kept and inactive ones take the new
    /// boundary values. Returns the submission that finishes the build.
    pub fn load(
        &mut self,
        ctx: &ComputeContext,
        kernels: &MultigridKernels,
        system: &LinearSystem,
        initialize: bool,
    ) -> DeviceResult<wgpu::SubmissionIndex> {
        system.assert_consistent();
        let expected = self.levels[0].dims();
        if system.dims() != expected {
            return Err(DeviceError::DimensionMismatch { expected, got: system.dims() });
        }

        let l0 = &mut self.levels[0];
        l0.a1.upload(ctx, &system.a1)?;
        l0.a2.upload(ctx, &system.a2)?;
        l0.a3.upload(ctx, &system.a3)?;
        l0.b.upload(ctx, &system.b)?;
        self.x0.upload(ctx, &system.x0)?;
        if initialize {
            l0.x.front().upload(ctx, &system.x0)?;
        }

        let mut encoder = ctx.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("hierarchy build"),
        });
        if !initialize {
            let f = l0.x.front_index();
            kernels.load_boundary.dispatch(&mut encoder, &self.display.load_boundary[f], l0.groups);
            l0.x.swap();
        }
        // Level-0 residual of the loaded iterate, so the metric is valid
        // before the first V-cycle.
        kernels.residual.dispatch(&mut encoder, &l0.residual[l0.x.front_index()], l0.groups);

        for level in &self.levels[1..] {
            let Some(t) = &level.from_finer else { continue };
            kernels.inject_active.dispatch(&mut encoder, &t.inject_active, level.groups);
            for bind in &t.inject {
                kernels.inject.dispatch(&mut encoder, bind, level.groups);
            }
            kernels.restrict.dispatch(&mut encoder, &t.restrict_rhs, level.groups);
            record_reset(kernels, &mut encoder, level, self.policy);
        }

        let idx = ctx.queue.submit(std::iter::once(encoder.finish()));
        debug!("gpu hierarchy loaded (initialize = {initialize})");
        Ok(idx)
    }

    /// Read the level-0 solution back. Synchronous.
    pub fn solution(&self, ctx: &ComputeContext) -> DeviceResult<Field> {
        self.levels[0].solution().readback(ctx)
    }

    /// Read the level-0 residual back. Synchronous.
    pub fn residual(&self, ctx: &ComputeContext) -> DeviceResult<Field> {
        self.levels[0].r.readback(ctx)
    }

    /// Record the display-image update for the current level-0 state.
    pub fn record_present(&self, kernels: &MultigridKernels, encoder: &mut wgpu::CommandEncoder) {
        let l0 = &self.levels[0];
        kernels.present.dispatch(encoder, &self.display.present[l0.x.front_index()], l0.groups);
    }

    /// A V-cycle backend recording into `encoder`.
    pub fn recorder<'a>(
        &'a mut self,
        kernels: &'a MultigridKernels,
        encoder: &'a mut wgpu::CommandEncoder,
    ) -> GpuRecorder<'a> {
        GpuRecorder { hierarchy: self, kernels, encoder }
    }
}

fn record_reset(kernels: &MultigridKernels, encoder: &mut wgpu::CommandEncoder, level: &GpuLevel, policy: ResetPolicy) {
    if policy == ResetPolicy::Zero {
        for bind in &level.fill_x {
            kernels.fill.dispatch(encoder, bind, level.groups);
        }
    }
    kernels.fill.dispatch(encoder, &level.fill_r, level.groups);
}

fn uniform(ctx: &ComputeContext, label: &str, params: &KernelParams) -> DeviceResult<wgpu::Buffer> {
    ctx.capture(label, ScopeKind::Allocation, || {
        ctx.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(label),
            contents: bytemuck::bytes_of(params),
            usage: wgpu::BufferUsages::UNIFORM,
        })
    })
}

// ---------------------------------------------------------------------------
// GpuRecorder
// ---------------------------------------------------------------------------

/// Records V-cycle steps as compute passes. Nothing executes until the
/// caller submits the encoder.
pub struct GpuRecorder<'a> {
    hierarchy: &'a mut GpuHierarchy,
    kernels: &'a MultigridKernels,
    encoder: &'a mut wgpu::CommandEncoder,
}

impl MultigridBackend for GpuRecorder<'_> {
    type Error = Infallible;

    fn depth(&self) -> usize {
        self.hierarchy.len()
    }

    fn smooth(&mut self, level: usize, sweeps: u32) -> Result<(), Infallible> {
        let lvl = &mut self.hierarchy.levels[level];
        for _ in 0..sweeps {
            let f = lvl.x.front_index();
            self.kernels.jacobi.dispatch(self.encoder, &lvl.jacobi[f], lvl.groups);
            lvl.x.swap();
        }
        Ok(())
    }

    fn residual(&mut self, level: usize) -> Result<(), Infallible> {
        let lvl = &self.hierarchy.levels[level];
        self.kernels.residual.dispatch(self.encoder, &lvl.residual[lvl.x.front_index()], lvl.groups);
        Ok(())
    }

    fn restrict(&mut self, fine: usize) -> Result<(), Infallible> {
        let policy = self.hierarchy.policy;
        let coarse = &self.hierarchy.levels[fine + 1];
        if let Some(t) = &coarse.from_finer {
            self.kernels.restrict.dispatch(self.encoder, &t.restrict_residual, coarse.groups);
        }
        record_reset(self.kernels, self.encoder, coarse, policy);
        Ok(())
    }

    fn correct(&mut self, coarse: usize) -> Result<(), Infallible> {
        let (fine_levels, coarse_levels) = self.hierarchy.levels.split_at_mut(coarse);
        let fine = &mut fine_levels[coarse - 1];
        let c = &coarse_levels[0];
        if let Some(t) = &c.from_finer {
            let bind = &t.correct[fine.x.front_index()][c.x.front_index()];
            self.kernels.correct.dispatch(self.encoder, bind, fine.groups);
            fine.x.swap();
        }
        Ok(())
    }
}
