//! Post-process passes of the volumetric chain.
//!
//! The chain after the ray march is:
//!
//! ```text
//! march (scaled) ──▶ UpsamplePass ──▶ DepthAwareBlurPass (H) ──▶ DepthAwareBlurPass (V) ──▶ volumetrics
//!                                                                                              │
//!                                                 scene color ──▶ CompositePass ◀──────────────┘
//! ```
//!
//! Every pass draws one fullscreen triangle; the shaders define `vs` and `fs`
//! entry points and work in pixel coordinates from `@builtin(position)`.
//!
//! [`TENT_WEIGHTS`], [`gaussian_weight`], [`depth_weight`] and [`blur_line`]
//! are the CPU versions of the filter weights the shaders use, next to
//! [`raymarch`](crate::raymarch) for the march itself.

use crate::gpu::GpuContext;
use crate::settings::BlurSettings;

/// Weights of the 3 x 3 tent filter used by the upsample, row-major.
pub const TENT_WEIGHTS: [[f32; 3]; 3] = [
    [1.0 / 16.0, 2.0 / 16.0, 1.0 / 16.0],
    [2.0 / 16.0, 4.0 / 16.0, 2.0 / 16.0],
    [1.0 / 16.0, 2.0 / 16.0, 1.0 / 16.0],
];

/// Spatial Gaussian weight of tap `offset` for a blur of `radius` taps per side.
pub fn gaussian_weight(offset: i32, radius: u32) -> f32 {
    let sigma = (radius as f32).max(1.0) * 0.5;
    (-((offset * offset) as f32) / (2.0 * sigma * sigma)).exp()
}

/// Depth-similarity weight of a tap whose linear depth differs by `delta`.
pub fn depth_weight(delta: f32, sharpness: f32) -> f32 {
    (-delta.abs() * sharpness).exp()
}

/// Weighted average of `samples` (offset, value, linear depth) around a
/// center at `center_depth`, exactly as one blur direction computes it.
pub fn blur_line(samples: &[(i32, f32, f32)], center_depth: f32, blur: &BlurSettings) -> f32 {
    let (sum, weights) = samples
        .iter()
        .filter(|(offset, _, _)| offset.unsigned_abs() <= blur.radius)
        .fold((0.0, 0.0), |(sum, weights), &(offset, value, depth)| {
            let w = gaussian_weight(offset, blur.radius)
                * depth_weight(depth - center_depth, blur.depth_sharpness);
            (sum + value * w, weights + w)
        });
    sum / f32::max(weights, 1e-5)
}

pub(crate) fn uniform_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

pub(crate) fn texture_entry(
    binding: u32,
    sample_type: wgpu::TextureSampleType,
    view_dimension: wgpu::TextureViewDimension,
) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Texture {
            sample_type,
            view_dimension,
            multisampled: false,
        },
        count: None,
    }
}

pub(crate) fn sampler_entry(binding: u32, ty: wgpu::SamplerBindingType) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Sampler(ty),
        count: None,
    }
}

pub(crate) fn linear_clamp_sampler(device: &wgpu::Device, label: &str) -> wgpu::Sampler {
    device.create_sampler(&wgpu::SamplerDescriptor {
        label: Some(label),
        address_mode_u: wgpu::AddressMode::ClampToEdge,
        address_mode_v: wgpu::AddressMode::ClampToEdge,
        address_mode_w: wgpu::AddressMode::ClampToEdge,
        mag_filter: wgpu::FilterMode::Linear,
        min_filter: wgpu::FilterMode::Linear,
        mipmap_filter: wgpu::FilterMode::Nearest,
        ..Default::default()
    })
}

pub(crate) fn uniform_buffer<T>(device: &wgpu::Device, label: &str) -> wgpu::Buffer {
    device.create_buffer(&wgpu::BufferDescriptor {
        label: Some(label),
        size: std::mem::size_of::<T>() as u64,
        usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    })
}

/// Builds a fullscreen-triangle pipeline writing one color target.
pub(crate) fn fullscreen_pipeline(
    device: &wgpu::Device,
    label: &str,
    shader_source: &str,
    bind_group_layout: &wgpu::BindGroupLayout,
    format: wgpu::TextureFormat,
) -> wgpu::RenderPipeline {
    let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(label),
        source: wgpu::ShaderSource::Wgsl(shader_source.into()),
    });

    let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(label),
        bind_group_layouts: &[bind_group_layout],
        push_constant_ranges: &[],
    });

    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(label),
        layout: Some(&pipeline_layout),
        vertex: wgpu::VertexState {
            module: &shader,
            entry_point: Some("vs"),
            buffers: &[],
            compilation_options: Default::default(),
        },
        fragment: Some(wgpu::FragmentState {
            module: &shader,
            entry_point: Some("fs"),
            targets: &[Some(wgpu::ColorTargetState {
                format,
                blend: Some(wgpu::BlendState::REPLACE),
                write_mask: wgpu::ColorWrites::ALL,
            })],
            compilation_options: Default::default(),
        }),
        primitive: wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleList,
            ..Default::default()
        },
        depth_stencil: None,
        multisample: wgpu::MultisampleState::default(),
        multiview: None,
        cache: None,
    })
}

/// Records a fullscreen draw into `target`, clearing it first.
pub(crate) fn draw_fullscreen(
    encoder: &mut wgpu::CommandEncoder,
    label: &str,
    target: &wgpu::TextureView,
    pipeline: &wgpu::RenderPipeline,
    bind_group: &wgpu::BindGroup,
) {
    let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
        label: Some(label),
        color_attachments: &[Some(wgpu::RenderPassColorAttachment {
            view: target,
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
    pass.set_pipeline(pipeline);
    pass.set_bind_group(0, bind_group, &[]);
    pass.draw(0..3, 0..1);
}

/// Uniforms of the upsample shader.
#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
pub struct UpsampleUniforms {
    /// `1 / source size`.
    pub source_texel: [f32; 2],
    /// Render target size in pixels.
    pub target_size: [f32; 2],
}

/// Tent-filtered upsample from the scaled march buffer to full resolution.
pub struct UpsamplePass {
    pipeline: wgpu::RenderPipeline,
    uniform_buffer: wgpu::Buffer,
    bind_group_layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
}

impl UpsamplePass {
    pub fn new(gpu: &GpuContext, format: wgpu::TextureFormat) -> Self {
        let device = &gpu.device;

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Upsample Bind Group Layout"),
            entries: &[
                uniform_entry(0),
                texture_entry(
                    1,
                    wgpu::TextureSampleType::Float { filterable: true },
                    wgpu::TextureViewDimension::D2,
                ),
                sampler_entry(2, wgpu::SamplerBindingType::Filtering),
            ],
        });

        let pipeline = fullscreen_pipeline(
            device,
            "Upsample Pipeline",
            include_str!("shaders/upsample.wgsl"),
            &bind_group_layout,
            format,
        );

        Self {
            pipeline,
            uniform_buffer: uniform_buffer::<UpsampleUniforms>(device, "Upsample Uniforms"),
            bind_group_layout,
            sampler: linear_clamp_sampler(device, "Upsample Sampler"),
        }
    }

    /// Upsamples `source` (of `source_size`) into `target` (of `target_size`).
    pub fn render(
        &self,
        gpu: &GpuContext,
        encoder: &mut wgpu::CommandEncoder,
        source: &wgpu::TextureView,
        source_size: (u32, u32),
        target: &wgpu::TextureView,
        target_size: (u32, u32),
    ) {
        let uniforms = UpsampleUniforms {
            source_texel: [
                1.0 / source_size.0.max(1) as f32,
                1.0 / source_size.1.max(1) as f32,
            ],
            target_size: [target_size.0 as f32, target_size.1 as f32],
        };
        gpu.queue
            .write_buffer(&self.uniform_buffer, 0, bytemuck::cast_slice(&[uniforms]));

        let bind_group = gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Upsample Bind Group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: self.uniform_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(source),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
            ],
        });

        draw_fullscreen(encoder, "Upsample Pass", target, &self.pipeline, &bind_group);
    }
}

/// Uniforms of one blur direction.
#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
pub struct BlurUniforms {
    pub inverse_projection: [[f32; 4]; 4],
    pub direction: [f32; 2],
    /// `1 / target size`.
    pub texel: [f32; 2],
    pub radius: f32,
    pub depth_sharpness: f32,
    pub _padding: [f32; 2],
}

/// Blur direction of one [`DepthAwareBlurPass`] invocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlurAxis {
    Horizontal,
    Vertical,
}

impl BlurAxis {
    fn direction(self) -> [f32; 2] {
        match self {
            BlurAxis::Horizontal => [1.0, 0.0],
            BlurAxis::Vertical => [0.0, 1.0],
        }
    }
}

/// Separable Gaussian blur that rejects taps across depth discontinuities.
///
/// Each axis has its own uniform buffer: both directions are recorded into
/// the same encoder, and queue writes land before the whole submission.
pub struct DepthAwareBlurPass {
    pipeline: wgpu::RenderPipeline,
    horizontal_uniforms: wgpu::Buffer,
    vertical_uniforms: wgpu::Buffer,
    bind_group_layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
}

impl DepthAwareBlurPass {
    pub fn new(gpu: &GpuContext, format: wgpu::TextureFormat) -> Self {
        let device = &gpu.device;

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Depth Aware Blur Bind Group Layout"),
            entries: &[
                uniform_entry(0),
                texture_entry(
                    1,
                    wgpu::TextureSampleType::Float { filterable: true },
                    wgpu::TextureViewDimension::D2,
                ),
                sampler_entry(2, wgpu::SamplerBindingType::Filtering),
                texture_entry(
                    3,
                    wgpu::TextureSampleType::Depth,
                    wgpu::TextureViewDimension::D2,
                ),
            ],
        });

        let pipeline = fullscreen_pipeline(
            device,
            "Depth Aware Blur Pipeline",
            include_str!("shaders/depth_aware_blur.wgsl"),
            &bind_group_layout,
            format,
        );

        Self {
            pipeline,
            horizontal_uniforms: uniform_buffer::<BlurUniforms>(device, "Blur Uniforms (H)"),
            vertical_uniforms: uniform_buffer::<BlurUniforms>(device, "Blur Uniforms (V)"),
            bind_group_layout,
            sampler: linear_clamp_sampler(device, "Blur Sampler"),
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn render(
        &self,
        gpu: &GpuContext,
        encoder: &mut wgpu::CommandEncoder,
        axis: BlurAxis,
        blur: &BlurSettings,
        inverse_projection: glam::Mat4,
        source: &wgpu::TextureView,
        depth: &wgpu::TextureView,
        target: &wgpu::TextureView,
        target_size: (u32, u32),
    ) {
        let uniforms = BlurUniforms {
            inverse_projection: inverse_projection.to_cols_array_2d(),
            direction: axis.direction(),
            texel: [
                1.0 / target_size.0.max(1) as f32,
                1.0 / target_size.1.max(1) as f32,
            ],
            radius: blur.radius as f32,
            depth_sharpness: blur.depth_sharpness,
            _padding: [0.0; 2],
        };
        let buffer = match axis {
            BlurAxis::Horizontal => &self.horizontal_uniforms,
            BlurAxis::Vertical => &self.vertical_uniforms,
        };
        gpu.queue
            .write_buffer(buffer, 0, bytemuck::cast_slice(&[uniforms]));

        let bind_group = gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Depth Aware Blur Bind Group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(source),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: wgpu::BindingResource::TextureView(depth),
                },
            ],
        });

        let label = match axis {
            BlurAxis::Horizontal => "Depth Aware Blur (H)",
            BlurAxis::Vertical => "Depth Aware Blur (V)",
        };
        draw_fullscreen(encoder, label, target, &self.pipeline, &bind_group);
    }
}

/// Adds the volumetrics texture onto the scene color.
///
/// Either input may be missing: a 1 x 1 black texture stands in, so the pass
/// always produces a valid frame.
pub struct CompositePass {
    pipeline: wgpu::RenderPipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    #[allow(dead_code)]
    black: wgpu::Texture,
    black_view: wgpu::TextureView,
}

impl CompositePass {
    /// `format` is the format of the final target (usually the surface).
    pub fn new(gpu: &GpuContext, format: wgpu::TextureFormat) -> Self {
        use wgpu::util::DeviceExt;
        let device = &gpu.device;

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Composite Bind Group Layout"),
            entries: &[
                texture_entry(
                    0,
                    wgpu::TextureSampleType::Float { filterable: false },
                    wgpu::TextureViewDimension::D2,
                ),
                texture_entry(
                    1,
                    wgpu::TextureSampleType::Float { filterable: false },
                    wgpu::TextureViewDimension::D2,
                ),
            ],
        });

        let pipeline = fullscreen_pipeline(
            device,
            "Composite Pipeline",
            include_str!("shaders/composite.wgsl"),
            &bind_group_layout,
            format,
        );

        let black = device.create_texture_with_data(
            &gpu.queue,
            &wgpu::TextureDescriptor {
                label: Some("Composite Black"),
                size: wgpu::Extent3d {
                    width: 1,
                    height: 1,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: wgpu::TextureFormat::Rgba8Unorm,
                usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                view_formats: &[],
            },
            wgpu::util::TextureDataOrder::LayerMajor,
            &[0, 0, 0, 255],
        );
        let black_view = black.create_view(&wgpu::TextureViewDescriptor::default());

        Self {
            pipeline,
            bind_group_layout,
            black,
            black_view,
        }
    }

    pub fn render(
        &self,
        gpu: &GpuContext,
        encoder: &mut wgpu::CommandEncoder,
        scene: Option<&wgpu::TextureView>,
        volumetrics: Option<&wgpu::TextureView>,
        target: &wgpu::TextureView,
    ) {
        let bind_group = gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Composite Bind Group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(
                        scene.unwrap_or(&self.black_view),
                    ),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(
                        volumetrics.unwrap_or(&self.black_view),
                    ),
                },
            ],
        });

        draw_fullscreen(encoder, "Composite Pass", target, &self.pipeline, &bind_group);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tent_weights_sum_to_one() {
        let sum: f32 = TENT_WEIGHTS.iter().flatten().sum();
        assert!((sum - 1.0).abs() < 1e-6);
        assert_eq!(TENT_WEIGHTS[1][1], 0.25);
    }

    #[test]
    fn blur_keeps_flat_regions_flat() {
        let blur = BlurSettings::default();
        let samples: Vec<_> = (-4..=4).map(|i| (i, 0.7, 10.0)).collect();
        assert!((blur_line(&samples, 10.0, &blur) - 0.7).abs() < 1e-6);
    }

    #[test]
    fn blur_does_not_bleed_across_depth_edges() {
        let blur = BlurSettings::default();
        // Lit background on the left at depth 50, dark foreground at depth 2.
        let samples: Vec<_> = (-4..=4)
            .map(|i| if i < 0 { (i, 1.0, 50.0) } else { (i, 0.0, 2.0) })
            .collect();
        let foreground = blur_line(&samples, 2.0, &blur);
        assert!(foreground < 1e-6, "{foreground}");

        let no_depth = BlurSettings {
            depth_sharpness: 0.0,
            ..blur
        };
        assert!(blur_line(&samples, 2.0, &no_depth) > 0.2);
    }

    #[test]
    fn gaussian_peaks_at_center() {
        assert_eq!(gaussian_weight(0, 4), 1.0);
        assert!(gaussian_weight(1, 4) > gaussian_weight(2, 4));
        assert_eq!(gaussian_weight(-3, 4), gaussian_weight(3, 4));
    }
}
