// gpu/reduce.rs — Mean residual magnitude, two-stage reduction.
//
// Stage 1 runs on the device (shaders/reduce.wgsl): G workgroups of T
// threads each write one partial sum of |r| into a storage buffer. Stage 2
// runs on the host: the G partials are copied into a mappable buffer, read
// back and folded by `residual::finish_average`.
//
//   r (w×h) ──reduce_partial──▶ partials[G] ──copy──▶ staging ──map──▶ Σ / (w·h)
//
// Both buffers are allocated once per residual texture; only the readback
// blocks.

use log::trace;

use crate::config::SolverConfig;
use crate::error::DeviceResult;
use crate::gpu::context::{check_dispatch, ComputeContext, ScopeKind};
use crate::gpu::field::{map_read, GpuField};
use crate::residual::finish_average;

const REDUCE_WGSL: &str = include_str!("../shaders/reduce.wgsl");

pub struct Reduction {
    pipeline: wgpu::ComputePipeline,
    bind_group: wgpu::BindGroup,
    partials: wgpu::Buffer,
    staging: wgpu::Buffer,
    groups: u32,
    pixel_count: usize,
}

impl Reduction {
    /// Build the reduction for one residual field.
    ///
    /// `config` may differ from the one the context was created with, so
    /// the group count is checked against the device limits again here.
    pub fn new(ctx: &ComputeContext, config: &SolverConfig, residual: &GpuField) -> DeviceResult<Self> {
        check_dispatch(config.reduction_groups, &ctx.limits)?;
        let source = REDUCE_WGSL.replace("{{THREADS}}", &config.reduction_threads.to_string());
        let groups = config.reduction_groups;
        let size = partials_size(groups);

        let (pipeline, layout) = ctx.capture("reduce.wgsl", ScopeKind::KernelBuild, || {
            let module = ctx.device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some("reduce.wgsl"),
                source: wgpu::ShaderSource::Wgsl(source.into()),
            });
            let layout = ctx.device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("reduce_partial"),
                entries: &[
                    wgpu::BindGroupLayoutEntry {
                        binding: 0,
                        visibility: wgpu::ShaderStages::COMPUTE,
                        ty: wgpu::BindingType::Texture {
                            multisampled: false,
                            view_dimension: wgpu::TextureViewDimension::D2,
                            sample_type: wgpu::TextureSampleType::Float { filterable: false },
                        },
                        count: None,
                    },
                    wgpu::BindGroupLayoutEntry {
                        binding: 1,
                        visibility: wgpu::ShaderStages::COMPUTE,
                        ty: wgpu::BindingType::Buffer {
                            ty: wgpu::BufferBindingType::Storage { read_only: false },
                            has_dynamic_offset: false,
                            min_binding_size: None,
                        },
                        count: None,
                    },
                ],
            });
            let pipeline_layout = ctx.device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("reduce_partial"),
                bind_group_layouts: &[&layout],
                push_constant_ranges: &[],
            });
            let pipeline = ctx.device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some("reduce_partial"),
                layout: Some(&pipeline_layout),
                module: &module,
                entry_point: Some("reduce_partial"),
                compilation_options: Default::default(),
                cache: None,
            });
            (pipeline, layout)
        })?;

        let (partials, staging, bind_group) = ctx.capture("reduction buffers", ScopeKind::Allocation, || {
            let partials = ctx.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("reduction partials"),
                size,
                usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
                mapped_at_creation: false,
            });
            let staging = ctx.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("reduction staging"),
                size,
                usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            });
            let bind_group = ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("reduce_partial"),
                layout: &layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: wgpu::BindingResource::TextureView(&residual.view),
                    },
                    wgpu::BindGroupEntry { binding: 1, resource: partials.as_entire_binding() },
                ],
            });
            (partials, staging, bind_group)
        })?;

        Ok(Reduction {
            pipeline,
            bind_group,
            partials,
            staging,
            groups,
            pixel_count: residual.width as usize * residual.height as usize,
        })
    }

    /// Record stage 1 and the copy into the staging buffer.
    pub fn encode(&self, encoder: &mut wgpu::CommandEncoder) {
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("reduce_partial"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, &self.bind_group, &[]);
            pass.dispatch_workgroups(self.groups, 1, 1);
        }
        encoder.copy_buffer_to_buffer(&self.partials, 0, &self.staging, 0, partials_size(self.groups));
    }

    /// Map the staging buffer and return the stage-1 partials. Blocks.
    pub fn read_partials(&self, ctx: &ComputeContext) -> DeviceResult<Vec<f32>> {
        let bytes = map_read(ctx, &self.staging, partials_size(self.groups))?;
        Ok(bytes.chunks_exact(4).map(bytemuck::pod_read_unaligned::<f32>).collect())
    }

    /// Run both stages now. Blocks until the result is on the host.
    pub fn average(&self, ctx: &ComputeContext) -> DeviceResult<f32> {
        let mut encoder = ctx.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("residual reduction"),
        });
        self.encode(&mut encoder);
        ctx.queue.submit(std::iter::once(encoder.finish()));
        let partials = self.read_partials(ctx)?;
        let avg = finish_average(&partials, self.pixel_count);
        trace!("average residual {avg:.3e} over {} partials", partials.len());
        Ok(avg)
    }
}

fn partials_size(groups: u32) -> u64 {
    u64::from(groups) * std::mem::size_of::<f32>() as u64
}
