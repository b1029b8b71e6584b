//! Shared shadow-map atlas for the volumetric lights.
//!
//! One `Depth32Float` 2D array texture with a layer per light slot. The host
//! renders each shadowed light's depth into [`ShadowAtlas::layer_view`] using
//! the light's `shadow_view_projection`, then hands the atlas to the chain
//! through [`SceneFrame`](crate::SceneFrame). The kernel indexes the array
//! directly with the light's [`ShadowLayer`].

use crate::gpu::GpuContext;
use crate::light::{MAX_LIGHTS, ShadowLayer};

/// A depth texture array with one layer per light slot.
pub struct ShadowAtlas {
    #[allow(dead_code)]
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    layer_views: Vec<wgpu::TextureView>,
    size: u32,
}

impl ShadowAtlas {
    pub const FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

    /// Creates a `size` x `size` atlas with [`MAX_LIGHTS`] layers, cleared to
    /// the far plane so that every light starts fully lit.
    pub fn new(gpu: &GpuContext, size: u32) -> Self {
        let size = size.max(1);
        let texture = gpu.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Shadow Atlas"),
            size: wgpu::Extent3d {
                width: size,
                height: size,
                depth_or_array_layers: MAX_LIGHTS as u32,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: Self::FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        });

        let view = texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some("Shadow Atlas View"),
            dimension: Some(wgpu::TextureViewDimension::D2Array),
            ..Default::default()
        });

        let layer_views = (0..MAX_LIGHTS as u32)
            .map(|layer| {
                texture.create_view(&wgpu::TextureViewDescriptor {
                    label: Some("Shadow Atlas Layer"),
                    dimension: Some(wgpu::TextureViewDimension::D2),
                    base_array_layer: layer,
                    array_layer_count: Some(1),
                    ..Default::default()
                })
            })
            .collect();

        let atlas = Self {
            texture,
            view,
            layer_views,
            size,
        };

        let mut encoder = gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Shadow Atlas Clear Encoder"),
            });
        atlas.clear(&mut encoder);
        gpu.queue.submit(std::iter::once(encoder.finish()));

        log::debug!("Created shadow atlas ({size}x{size}, {MAX_LIGHTS} layers)");
        atlas
    }

    /// A 1 x 1 atlas bound when the host supplies no shadow maps.
    pub fn stub(gpu: &GpuContext) -> Self {
        Self::new(gpu, 1)
    }

    /// Records passes that reset every layer to the far plane.
    pub fn clear(&self, encoder: &mut wgpu::CommandEncoder) {
        for view in &self.layer_views {
            encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Shadow Atlas Clear"),
                color_attachments: &[],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            });
        }
    }

    /// Depth attachment for rendering one light's shadow map.
    pub fn layer_view(&self, layer: ShadowLayer) -> Option<&wgpu::TextureView> {
        self.layer_views.get(layer.0 as usize)
    }

    /// The whole array, as bound by the kernel.
    pub fn view(&self) -> &wgpu::TextureView {
        &self.view
    }

    pub fn size(&self) -> u32 {
        self.size
    }
}
