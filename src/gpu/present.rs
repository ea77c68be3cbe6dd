// gpu/present.rs — Display images shared between solver and renderer.
//
// The solver writes two 8-bit images at the end of every V-cycle (the
// clamped level-0 solution and a scaled residual magnitude). A renderer
// reads them between frames. Both sides go through an explicit bracket:
//
//   compute       acquire_for_compute ── record + submit ── release_from_compute(idx)
//   presentation  acquire_for_presentation (waits on idx) ── read ── release_from_presentation
//
// Acquiring while the other side holds the images is an error, not a
// wait: the frame loop is expected to alternate the two brackets, and a
// violation means the loop is wrong.

use log::trace;

use crate::error::{DeviceError, DeviceResult};
use crate::gpu::context::{ComputeContext, ScopeKind};
use crate::gpu::field::read_texture;

/// Format of both display images.
pub const DISPLAY_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

/// Who currently owns the shared images.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Holder {
    Idle,
    Compute,
    Presentation,
}

/// Which display image to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayImage {
    Solution,
    Residual,
}

pub struct SharedImages {
    solution: wgpu::Texture,
    solution_view: wgpu::TextureView,
    residual: wgpu::Texture,
    residual_view: wgpu::TextureView,
    width: u32,
    height: u32,
    holder: Holder,
    signal: Option<wgpu::SubmissionIndex>,
}

impl SharedImages {
    pub fn new(ctx: &ComputeContext, width: u32, height: u32) -> DeviceResult<Self> {
        let (solution, solution_view) = display_texture(ctx, width, height, "display solution")?;
        let (residual, residual_view) = display_texture(ctx, width, height, "display residual")?;
        Ok(SharedImages {
            solution,
            solution_view,
            residual,
            residual_view,
            width,
            height,
            holder: Holder::Idle,
            signal: None,
        })
    }

    pub fn dims(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn holder(&self) -> Holder {
        self.holder
    }

    pub(crate) fn solution_view(&self) -> &wgpu::TextureView {
        &self.solution_view
    }

    pub(crate) fn residual_view(&self) -> &wgpu::TextureView {
        &self.residual_view
    }

    /// Claim the images for the compute side.
    pub fn acquire_for_compute(&mut self) -> DeviceResult<()> {
        match self.holder {
            Holder::Idle => {
                trace!("shared images: acquired by compute");
                self.holder = Holder::Compute;
                Ok(())
            }
            Holder::Presentation => Err(DeviceError::SharedImageBusy { holder: "presentation side" }),
            Holder::Compute => Err(DeviceError::SharedImageBusy { holder: "compute side" }),
        }
    }

    /// Hand the images back. `signal` is the submission that last writes
    /// them; presentation will not read before it completes.
    pub fn release_from_compute(&mut self, signal: wgpu::SubmissionIndex) {
        debug_assert_eq!(self.holder, Holder::Compute, "release without acquire");
        trace!("shared images: released by compute");
        self.holder = Holder::Idle;
        self.signal = Some(signal);
    }

    /// Claim the images for reading. Blocks until the last compute
    /// submission that wrote them has completed.
    pub fn acquire_for_presentation(&mut self, ctx: &ComputeContext) -> DeviceResult<()> {
        match self.holder {
            Holder::Idle => {}
            Holder::Compute => return Err(DeviceError::SharedImageBusy { holder: "compute side" }),
            Holder::Presentation => {
                return Err(DeviceError::SharedImageBusy { holder: "presentation side" })
            }
        }
        if let Some(signal) = self.signal.take() {
            ctx.device.poll(wgpu::Maintain::WaitForSubmissionIndex(signal));
        }
        trace!("shared images: acquired by presentation");
        self.holder = Holder::Presentation;
        Ok(())
    }

    pub fn release_from_presentation(&mut self) {
        debug_assert_eq!(self.holder, Holder::Presentation, "release without acquire");
        trace!("shared images: released by presentation");
        self.holder = Holder::Idle;
    }

    /// Tightly packed RGBA8 pixels of one display image. Only valid inside
    /// the presentation bracket.
    pub fn read_rgba8(&self, ctx: &ComputeContext, which: DisplayImage) -> DeviceResult<Vec<u8>> {
        if self.holder != Holder::Presentation {
            return Err(DeviceError::validation("display images read outside the presentation bracket"));
        }
        let texture = match which {
            DisplayImage::Solution => &self.solution,
            DisplayImage::Residual => &self.residual,
        };
        read_texture(ctx, texture, self.width, self.height, 4)
    }
}

fn display_texture(
    ctx: &ComputeContext,
    width: u32,
    height: u32,
    label: &str,
) -> DeviceResult<(wgpu::Texture, wgpu::TextureView)> {
    ctx.capture(label, ScopeKind::Allocation, || {
        let texture = ctx.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d { width, height, depth_or_array_layers: 1 },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: DISPLAY_FORMAT,
            usage: wgpu::TextureUsages::STORAGE_BINDING
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        (texture, view)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SolverConfig;
    use crate::gpu::run_gpu_test_in_subprocess;

    #[test]
    #[ignore = "GPU integration: run via outer subprocess wrapper"]
    fn inner_shared_images_bracket() {
        let ctx = ComputeContext::new(&SolverConfig::default()).unwrap();
        let mut shared = SharedImages::new(&ctx, 8, 4).unwrap();
        assert_eq!(shared.holder(), Holder::Idle);

        shared.acquire_for_compute().unwrap();
        assert!(matches!(
            shared.acquire_for_presentation(&ctx),
            Err(DeviceError::SharedImageBusy { holder: "compute side" })
        ));
        let idx = ctx.queue.submit(std::iter::empty());
        shared.release_from_compute(idx);

        shared.acquire_for_presentation(&ctx).unwrap();
        assert!(matches!(
            shared.acquire_for_compute(),
            Err(DeviceError::SharedImageBusy { holder: "presentation side" })
        ));
        let pixels = shared.read_rgba8(&ctx, DisplayImage::Solution).unwrap();
        assert_eq!(pixels.len(), 8 * 4 * 4);
        shared.release_from_presentation();

        assert!(shared.read_rgba8(&ctx, DisplayImage::Residual).is_err());
        shared.acquire_for_compute().unwrap();
        println!("GPU_TEST_OK");
    }

    #[test]
    #[ignore = "requires a GPU or software adapter"]
    fn test_shared_images_bracket() {
        let out = run_gpu_test_in_subprocess("gpu::present::tests::inner_shared_images_bracket");
        assert!(out.contains("GPU_TEST_OK"), "inner test did not print GPU_TEST_OK:\n{out}");
    }
}
