//! Render targets and execution context for the render graph.

use crate::camera::Camera;
use crate::gpu::GpuContext;
use crate::shadow::ShadowAtlas;

/// Size of a buffer rendered at `scale` of a `width` x `height` source.
///
/// Each dimension is rounded to the nearest pixel and never drops below 1.
/// Returns `None` when the source itself is empty (e.g. a minimized window).
pub fn scaled_extent(width: u32, height: u32, scale: f32) -> Option<(u32, u32)> {
    if width == 0 || height == 0 {
        return None;
    }
    let scale = if scale.is_finite() { scale.clamp(0.0, 1.0) } else { 1.0 };
    let scaled = |v: u32| ((v as f32 * scale).round() as u32).clamp(1, v);
    Some((scaled(width), scaled(height)))
}

/// An off-screen render target used for intermediate pass results.
///
/// Render targets are GPU textures that can be both rendered to (as a color attachment)
/// and sampled from (as a texture binding). The render graph ping-pongs between two of
/// them; the volumetric chain owns four more at its own sizes.
pub struct RenderTarget {
    /// The underlying GPU texture that stores pixel data.
    pub texture: wgpu::Texture,
    /// A view into the texture, used for render pass attachments and shader sampling.
    pub view: wgpu::TextureView,
    format: wgpu::TextureFormat,
    width: u32,
    height: u32,
}

impl RenderTarget {
    /// Creates a new render target matching the current GPU surface.
    pub fn new(gpu: &GpuContext, label: &str) -> Self {
        Self::with_size(
            &gpu.device,
            label,
            gpu.width(),
            gpu.height(),
            gpu.config.format,
        )
    }

    /// Creates a render target of an explicit size and format.
    ///
    /// Zero dimensions are clamped to 1.
    pub fn with_size(
        device: &wgpu::Device,
        label: &str,
        width: u32,
        height: u32,
        format: wgpu::TextureFormat,
    ) -> Self {
        let width = width.max(1);
        let height = height.max(1);
        log::debug!("Allocating render target {label:?} ({width}x{height}, {format:?})");

        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self {
            texture,
            view,
            format,
            width,
            height,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn format(&self) -> wgpu::TextureFormat {
        self.format
    }

    /// Checks if the target dimensions match the GPU surface and recreates if needed.
    pub fn ensure_size(&mut self, gpu: &GpuContext, label: &str) {
        self.resize(&gpu.device, label, gpu.width(), gpu.height());
    }

    /// Recreates the texture if its size differs; returns whether it did.
    pub fn resize(&mut self, device: &wgpu::Device, label: &str, width: u32, height: u32) -> bool {
        if self.width == width.max(1) && self.height == height.max(1) {
            return false;
        }
        *self = Self::with_size(device, label, width, height, self.format);
        true
    }

    /// Records a pass that clears the target to transparent black.
    pub fn clear(&self, encoder: &mut wgpu::CommandEncoder) {
        encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Clear Render Target"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &self.view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                    store: wgpu::StoreOp::Store,
                },
                depth_slice: None,
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
    }
}

/// Per-frame scene inputs the volumetric chain reads.
///
/// The host fills this in; nothing is looked up from global state.
#[derive(Clone, Copy)]
pub struct SceneFrame<'a> {
    /// Entities carrying [`SpotLight`](crate::SpotLight) + [`Transform`](crate::Transform).
    pub world: &'a hecs::World,
    /// Scene depth at surface resolution (`Depth32Float`, `[0, 1]` range).
    pub depth: Option<&'a wgpu::TextureView>,
    /// Shadow maps of the lights that have a shadow layer. `None` renders unshadowed.
    pub shadows: Option<&'a ShadowAtlas>,
}

/// Execution context passed to each render node during graph traversal.
///
/// This struct bundles all the resources a render node needs to execute its
/// rendering operations. It is created fresh for each frame and passed through
/// the entire node chain.
pub struct RenderContext<'a> {
    /// GPU context providing access to device, queue, and configuration.
    pub gpu: &'a GpuContext,
    /// Command encoder for recording render pass commands.
    /// Nodes append their commands to this encoder.
    pub encoder: &'a mut wgpu::CommandEncoder,
    /// Elapsed time in seconds since application start.
    pub time: f32,
    /// Current camera providing view and projection matrices.
    pub camera: &'a Camera,
    /// Scene inputs for this frame.
    pub scene: SceneFrame<'a>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn half_scale_rounds() {
        assert_eq!(scaled_extent(1920, 1080, 0.5), Some((960, 540)));
        assert_eq!(scaled_extent(1281, 721, 0.5), Some((641, 361)));
    }

    #[test]
    fn never_below_one_pixel() {
        assert_eq!(scaled_extent(1, 1, 0.25), Some((1, 1)));
        assert_eq!(scaled_extent(3, 1000, 0.01), Some((1, 10)));
    }

    #[test]
    fn empty_source_has_no_extent() {
        assert_eq!(scaled_extent(0, 720, 0.5), None);
        assert_eq!(scaled_extent(1280, 0, 0.5), None);
    }

    #[test]
    fn full_scale_is_identity() {
        assert_eq!(scaled_extent(800, 600, 1.0), Some((800, 600)));
    }
}
