// gpu/field.rs — Device-resident `Field`: an Rgba32Float texture.
//
// Every multigrid field lives in its own 2D texture. Kernels read through a
// `texture_2d<f32>` binding (textureLoad, no sampler) and write through a
// `texture_storage_2d<rgba32float, write>` binding; both use the same view.
// A texture is never bound for reading and writing in the same dispatch,
// which is why the unknowns are ping-ponged.
//
// UPLOAD / READBACK
// ─────────────────
// Upload goes through `queue.write_texture`, which accepts tightly packed
// rows. Readback is a texture→buffer copy, whose rows must be padded to
// `COPY_BYTES_PER_ROW_ALIGNMENT` (256 bytes); the padding is stripped on the
// host. Readback is synchronous and stalls the queue: it is meant for the
// renderer hand-off and for tests, not for the inner solve loop.

use std::sync::mpsc;

use crate::error::{DeviceError, DeviceResult};
use crate::field::{Field, Texel};
use crate::gpu::context::{ComputeContext, ScopeKind};

pub const FIELD_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba32Float;

/// Bytes per Rgba32Float texel.
pub const TEXEL_BYTES: u32 = 16;

/// One Rgba32Float texture plus its view.
pub struct GpuField {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub width: u32,
    pub height: u32,
}

impl GpuField {
    /// Allocate an uninitialised (zeroed by wgpu) field.
    pub fn new(ctx: &ComputeContext, width: u32, height: u32, label: &str) -> DeviceResult<Self> {
        ctx.capture(label, ScopeKind::Allocation, || {
            let texture = ctx.device.create_texture(&wgpu::TextureDescriptor {
                label: Some(label),
                size: wgpu::Extent3d { width, height, depth_or_array_layers: 1 },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: FIELD_FORMAT,
                usage: wgpu::TextureUsages::TEXTURE_BINDING
                    | wgpu::TextureUsages::STORAGE_BINDING
                    | wgpu::TextureUsages::COPY_DST
                    | wgpu::TextureUsages::COPY_SRC,
                view_formats: &[],
            });
            let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
            GpuField { texture, view, width, height }
        })
    }

    /// Allocate and fill from a CPU field.
    pub fn from_field(ctx: &ComputeContext, field: &Field, label: &str) -> DeviceResult<Self> {
        let gpu = Self::new(ctx, field.width() as u32, field.height() as u32, label)?;
        gpu.upload(ctx, field)?;
        Ok(gpu)
    }

    pub fn dims(&self) -> (usize, usize) {
        (self.width as usize, self.height as usize)
    }

    /// Overwrite the texture with `field`. Queued; ordered before any
    /// later submission.
    pub fn upload(&self, ctx: &ComputeContext, field: &Field) -> DeviceResult<()> {
        if field.dims() != self.dims() {
            return Err(DeviceError::DimensionMismatch { expected: self.dims(), got: field.dims() });
        }
        ctx.queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &self.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            field.as_bytes(),
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(self.width * TEXEL_BYTES),
                rows_per_image: Some(self.height),
            },
            wgpu::Extent3d { width: self.width, height: self.height, depth_or_array_layers: 1 },
        );
        Ok(())
    }

    /// Read the texture back. **Synchronous**: waits for all prior work.
    pub fn readback(&self, ctx: &ComputeContext) -> DeviceResult<Field> {
        let bytes = read_texture(ctx, &self.texture, self.width, self.height, TEXEL_BYTES)?;
        // The staging copy is a Vec<u8> with no alignment guarantee.
        let texels = bytes
            .chunks_exact(TEXEL_BYTES as usize)
            .map(bytemuck::pod_read_unaligned::<Texel>)
            .collect();
        Ok(Field::from_vec(self.width as usize, self.height as usize, texels))
    }
}

/// Copy a whole 2D texture into host memory with row padding removed.
pub(crate) fn read_texture(
    ctx: &ComputeContext,
    texture: &wgpu::Texture,
    width: u32,
    height: u32,
    bytes_per_texel: u32,
) -> DeviceResult<Vec<u8>> {
    let row_bytes = width * bytes_per_texel;
    let padded_row = align_to(row_bytes, wgpu::COPY_BYTES_PER_ROW_ALIGNMENT);
    let size = u64::from(padded_row) * u64::from(height);

    let staging = ctx.capture("readback staging", ScopeKind::Allocation, || {
        ctx.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("readback staging"),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        })
    })?;

    let mut encoder = ctx
        .device
        .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("readback") });
    encoder.copy_texture_to_buffer(
        wgpu::ImageCopyTexture {
            texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        wgpu::ImageCopyBuffer {
            buffer: &staging,
            layout: wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(padded_row),
                rows_per_image: Some(height),
            },
        },
        wgpu::Extent3d { width, height, depth_or_array_layers: 1 },
    );
    ctx.queue.submit(std::iter::once(encoder.finish()));

    let padded = map_read(ctx, &staging, size)?;
    let mut out = Vec::with_capacity((row_bytes * height) as usize);
    for row in padded.chunks_exact(padded_row as usize) {
        out.extend_from_slice(&row[..row_bytes as usize]);
    }
    Ok(out)
}

/// Map `buffer[..size]` for reading, block until it is available, copy it
/// out and unmap.
pub(crate) fn map_read(ctx: &ComputeContext, buffer: &wgpu::Buffer, size: u64) -> DeviceResult<Vec<u8>> {
    let slice = buffer.slice(..size);
    let (tx, rx) = mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        // The receiver outlives the poll below; a failed send only means
        // the caller already gave up.
        let _ = tx.send(result);
    });
    ctx.device.poll(wgpu::Maintain::Wait);
    rx.recv().map_err(|_| DeviceError::CallbackDropped)??;

    let bytes = slice.get_mapped_range().to_vec();
    buffer.unmap();
    Ok(bytes)
}

/// Round `value` up to the next multiple of `alignment` (a power of two).
///
///   align_to(100, 256) = 256
///   align_to(256, 256) = 256
///   align_to(257, 256) = 512
pub(crate) fn align_to(value: u32, alignment: u32) -> u32 {
    debug_assert!(alignment.is_power_of_two());
    (value + alignment - 1) & !(alignment - 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SolverConfig;
    use crate::gpu::run_gpu_test_in_subprocess;

    #[test]
    fn test_align_to_rounds_up() {
        assert_eq!(align_to(1, 256), 256);
        assert_eq!(align_to(255, 256), 256);
        assert_eq!(align_to(257, 256), 512);
        assert_eq!(align_to(512, 256), 512);
        assert_eq!(align_to(0, 256), 0);
    }

    #[test]
    fn test_rgba32_row_padding() {
        // 5 texels × 16 bytes = 80 bytes → padded to 256.
        assert_eq!(align_to(5 * TEXEL_BYTES, wgpu::COPY_BYTES_PER_ROW_ALIGNMENT), 256);
        // 16 texels = 256 bytes, already aligned.
        assert_eq!(align_to(16 * TEXEL_BYTES, wgpu::COPY_BYTES_PER_ROW_ALIGNMENT), 256);
    }

    #[test]
    #[ignore = "GPU integration: run via outer subprocess wrapper"]
    fn inner_field_upload_readback() {
        let ctx = ComputeContext::new(&SolverConfig::default()).unwrap();
        // Odd width exercises the row padding path.
        let f = Field::from_fn(7, 3, |x, y| [x as f32, y as f32, -1.5, 0.25]);
        let gpu = GpuField::from_field(&ctx, &f, "roundtrip").unwrap();
        let back = gpu.readback(&ctx).unwrap();
        assert_eq!(back, f);
        println!("GPU_TEST_OK");
    }

    #[test]
    #[ignore = "GPU integration: run via outer subprocess wrapper"]
    fn inner_field_upload_wrong_size() {
        let ctx = ComputeContext::new(&SolverConfig::default()).unwrap();
        let gpu = GpuField::new(&ctx, 4, 4, "sized").unwrap();
        let err = gpu.upload(&ctx, &Field::new(3, 4)).unwrap_err();
        assert!(matches!(err, DeviceError::DimensionMismatch { .. }));
        println!("GPU_TEST_OK");
    }

    #[test]
    #[ignore = "requires a GPU or software adapter"]
    fn test_field_upload_readback() {
        let out = run_gpu_test_in_subprocess("gpu::field::tests::inner_field_upload_readback");
        assert!(out.contains("GPU_TEST_OK"), "inner test did not print GPU_TEST_OK:\n{out}");
    }

    #[test]
    #[ignore = "requires a GPU or software adapter"]
    fn test_field_upload_wrong_size() {
        let out = run_gpu_test_in_subprocess("gpu::field::tests::inner_field_upload_wrong_size");
        assert!(out.contains("GPU_TEST_OK"), "inner test did not print GPU_TEST_OK:\n{out}");
    }
}
