// gpu/kernels.rs — Compiled multigrid compute pipelines.
//
// One WGSL module (shaders/multigrid.wgsl) holds every per-pixel kernel.
// Before compilation the host substitutes the workgroup shape and splices
// in the stencil's WGSL at the `//{{STENCIL}}` marker:
//
//   template ──replace {{WG_X}}, {{WG_Y}}──replace //{{STENCIL}}──▶ module
//
// naga does not accept `override` constants inside @workgroup_size(), so
// the shape is baked into the source text.
//
// BINDING TABLE (group 0)
// ───────────────────────
//    0  params            uniform KernelParams
//    1  a1                texture_2d<f32>
//    2  a2                texture_2d<f32>
//    3  a3                texture_2d<f32>
//    4  b                 texture_2d<f32>
//    5  x                 texture_2d<f32>      unknowns being read
//    6  out               storage rgba32float  the one field written
//    7  coarse            texture_2d<f32>      coarse unknowns (correct)
//    8  aux               texture_2d<f32>      fine field / x0 / residual
//    9  display_solution  storage rgba8unorm
//   10  display_residual  storage rgba8unorm
//
// Each kernel gets its own bind group layout listing only the slots it
// uses (`Kernel::slots`); layouts built from the shader via `auto` would
// drop unused bindings unpredictably across backends.

use log::debug;

use crate::error::{DeviceError, DeviceResult};
use crate::gpu::context::{ComputeContext, ScopeKind};
use crate::gpu::field::FIELD_FORMAT;
use crate::gpu::present::DISPLAY_FORMAT;
use crate::stencil::Stencil;

const MULTIGRID_WGSL: &str = include_str!("../shaders/multigrid.wgsl");

const STENCIL_MARKER: &str = "//{{STENCIL}}";

/// Uniform parameters shared by all multigrid kernels.
///
/// Layout must match `Params` in multigrid.wgsl (16 bytes).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct KernelParams {
    pub omega: f32,
    /// Scale applied by `restrict`: the configured correction weight during
    /// a V-cycle, 1.0 while building the hierarchy.
    pub correction_weight: f32,
    /// Multiplier on |r| for the residual display image.
    pub residual_gain: f32,
    pub _pad: f32,
}

/// Residual magnitude that maps to full white in the display image.
pub const DEFAULT_RESIDUAL_GAIN: f32 = 10.0;

/// A binding slot of the multigrid shader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Params = 0,
    A1 = 1,
    A2 = 2,
    A3 = 3,
    B = 4,
    X = 5,
    Out = 6,
    Coarse = 7,
    Aux = 8,
    DisplaySolution = 9,
    DisplayResidual = 10,
}

impl Slot {
    pub fn binding(self) -> u32 {
        self as u32
    }

    fn layout_entry(self) -> wgpu::BindGroupLayoutEntry {
        let ty = match self {
            Slot::Params => wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: wgpu::BufferSize::new(std::mem::size_of::<KernelParams>() as u64),
            },
            Slot::Out => storage_texture(FIELD_FORMAT),
            Slot::DisplaySolution | Slot::DisplayResidual => storage_texture(DISPLAY_FORMAT),
            _ => wgpu::BindingType::Texture {
                multisampled: false,
                view_dimension: wgpu::TextureViewDimension::D2,
                sample_type: wgpu::TextureSampleType::Float { filterable: false },
            },
        };
        wgpu::BindGroupLayoutEntry {
            binding: self.binding(),
            visibility: wgpu::ShaderStages::COMPUTE,
            ty,
            count: None,
        }
    }
}

fn storage_texture(format: wgpu::TextureFormat) -> wgpu::BindingType {
    wgpu::BindingType::StorageTexture {
        access: wgpu::StorageTextureAccess::WriteOnly,
        format,
        view_dimension: wgpu::TextureViewDimension::D2,
    }
}

const JACOBI_SLOTS: &[Slot] = &[Slot::Params, Slot::A1, Slot::A2, Slot::A3, Slot::B, Slot::X, Slot::Out];
const RESIDUAL_SLOTS: &[Slot] = &[Slot::A1, Slot::A2, Slot::A3, Slot::B, Slot::X, Slot::Out];
const RESTRICT_SLOTS: &[Slot] = &[Slot::Params, Slot::Aux, Slot::Out];
const INJECT_SLOTS: &[Slot] = &[Slot::Aux, Slot::Out];
const INJECT_ACTIVE_SLOTS: &[Slot] = &[Slot::A1, Slot::A2, Slot::A3, Slot::Aux, Slot::Out];
const CORRECT_SLOTS: &[Slot] = &[Slot::A1, Slot::A2, Slot::A3, Slot::X, Slot::Coarse, Slot::Out];
const FILL_SLOTS: &[Slot] = &[Slot::Out];
const LOAD_BOUNDARY_SLOTS: &[Slot] = &[Slot::A1, Slot::A2, Slot::A3, Slot::X, Slot::Aux, Slot::Out];
const PRESENT_SLOTS: &[Slot] =
    &[Slot::Params, Slot::X, Slot::Aux, Slot::DisplaySolution, Slot::DisplayResidual];

/// Resources for one bind group. Only the slots the kernel lists are read.
#[derive(Default, Clone, Copy)]
pub struct Bindings<'a> {
    pub params: Option<&'a wgpu::Buffer>,
    pub a1: Option<&'a wgpu::TextureView>,
    pub a2: Option<&'a wgpu::TextureView>,
    pub a3: Option<&'a wgpu::TextureView>,
    pub b: Option<&'a wgpu::TextureView>,
    pub x: Option<&'a wgpu::TextureView>,
    pub out: Option<&'a wgpu::TextureView>,
    pub coarse: Option<&'a wgpu::TextureView>,
    pub aux: Option<&'a wgpu::TextureView>,
    pub display_solution: Option<&'a wgpu::TextureView>,
    pub display_residual: Option<&'a wgpu::TextureView>,
}

impl<'a> Bindings<'a> {
    fn resource(&self, slot: Slot) -> Option<wgpu::BindingResource<'a>> {
        let view = match slot {
            Slot::Params => return self.params.map(|b| b.as_entire_binding()),
            Slot::A1 => self.a1,
            Slot::A2 => self.a2,
            Slot::A3 => self.a3,
            Slot::B => self.b,
            Slot::X => self.x,
            Slot::Out => self.out,
            Slot::Coarse => self.coarse,
            Slot::Aux => self.aux,
            Slot::DisplaySolution => self.display_solution,
            Slot::DisplayResidual => self.display_residual,
        };
        view.map(wgpu::BindingResource::TextureView)
    }
}

// ---------------------------------------------------------------------------
// Kernel
// ---------------------------------------------------------------------------

/// One entry point of the multigrid module with its layout.
pub struct Kernel {
    name: &'static str,
    slots: &'static [Slot],
    layout: wgpu::BindGroupLayout,
    pipeline: wgpu::ComputePipeline,
}

impl Kernel {
    fn new(
        ctx: &ComputeContext,
        module: &wgpu::ShaderModule,
        name: &'static str,
        slots: &'static [Slot],
    ) -> DeviceResult<Self> {
        ctx.capture(name, ScopeKind::KernelBuild, || {
            let entries: Vec<_> = slots.iter().map(|s| s.layout_entry()).collect();
            let layout = ctx.device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some(name),
                entries: &entries,
            });
            let pipeline_layout = ctx.device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(name),
                bind_group_layouts: &[&layout],
                push_constant_ranges: &[],
            });
            let pipeline = ctx.device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(name),
                layout: Some(&pipeline_layout),
                module,
                entry_point: Some(name),
                compilation_options: Default::default(),
                cache: None,
            });
            Kernel { name, slots, layout, pipeline }
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn slots(&self) -> &'static [Slot] {
        self.slots
    }

    /// Create a bind group from `bindings`.
    pub fn bind(&self, ctx: &ComputeContext, bindings: &Bindings<'_>, label: &str) -> DeviceResult<wgpu::BindGroup> {
        let mut entries = Vec::with_capacity(self.slots.len());
        for &slot in self.slots {
            let resource = bindings.resource(slot).ok_or_else(|| {
                DeviceError::validation(format!("{}: no resource for binding {:?}", self.name, slot))
            })?;
            entries.push(wgpu::BindGroupEntry { binding: slot.binding(), resource });
        }
        ctx.capture(label, ScopeKind::Allocation, || {
            ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(label),
                layout: &self.layout,
                entries: &entries,
            })
        })
    }

    /// Record one dispatch covering `groups` workgroups in its own pass.
    /// Passes on the same encoder execute in recording order, which is the
    /// only synchronisation the V-cycle needs.
    pub fn dispatch(&self, encoder: &mut wgpu::CommandEncoder, bind_group: &wgpu::BindGroup, groups: (u32, u32)) {
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some(self.name),
            timestamp_writes: None,
        });
        pass.set_pipeline(&self.pipeline);
        pass.set_bind_group(0, bind_group, &[]);
        pass.dispatch_workgroups(groups.0, groups.1, 1);
    }
}

// ---------------------------------------------------------------------------
// MultigridKernels
// ---------------------------------------------------------------------------

/// Every multigrid kernel, compiled for one stencil and workgroup shape.
/// Expensive to create; build once per `GpuSolver`.
pub struct MultigridKernels {
    pub jacobi: Kernel,
    pub residual: Kernel,
    pub restrict: Kernel,
    pub inject: Kernel,
    pub inject_active: Kernel,
    pub correct: Kernel,
    pub fill: Kernel,
    pub load_boundary: Kernel,
    pub present: Kernel,
}

impl MultigridKernels {
    pub fn new(ctx: &ComputeContext, stencil: &dyn Stencil) -> DeviceResult<Self> {
        let source = shader_source(MULTIGRID_WGSL, stencil.wgsl(), ctx.workgroup.x, ctx.workgroup.y)?;
        let module = ctx.capture("multigrid.wgsl", ScopeKind::KernelBuild, || {
            ctx.device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some("multigrid.wgsl"),
                source: wgpu::ShaderSource::Wgsl(source.into()),
            })
        })?;
        debug!("compiled multigrid kernels, workgroup {}", ctx.workgroup);

        Ok(MultigridKernels {
            jacobi: Kernel::new(ctx, &module, "jacobi", JACOBI_SLOTS)?,
            residual: Kernel::new(ctx, &module, "residual", RESIDUAL_SLOTS)?,
            restrict: Kernel::new(ctx, &module, "restrict", RESTRICT_SLOTS)?,
            inject: Kernel::new(ctx, &module, "inject", INJECT_SLOTS)?,
            inject_active: Kernel::new(ctx, &module, "inject_active", INJECT_ACTIVE_SLOTS)?,
            correct: Kernel::new(ctx, &module, "correct", CORRECT_SLOTS)?,
            fill: Kernel::new(ctx, &module, "fill", FILL_SLOTS)?,
            load_boundary: Kernel::new(ctx, &module, "load_boundary", LOAD_BOUNDARY_SLOTS)?,
            present: Kernel::new(ctx, &module, "present", PRESENT_SLOTS)?,
        })
    }
}

/// Expand the shader template. Fails if the template lacks the stencil
/// marker, so a stencil can never be silently dropped.
pub fn shader_source(template: &str, stencil_wgsl: &str, wg_x: u32, wg_y: u32) -> DeviceResult<String> {
    if !template.contains(STENCIL_MARKER) {
        return Err(DeviceError::KernelBuild {
            label: "multigrid.wgsl".into(),
            log: format!("template has no {STENCIL_MARKER} marker"),
        });
    }
    Ok(template
        .replace("{{WG_X}}", &wg_x.to_string())
        .replace("{{WG_Y}}", &wg_y.to_string())
        .replace(STENCIL_MARKER, stencil_wgsl))
}
