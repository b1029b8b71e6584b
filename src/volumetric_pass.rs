//! The fullscreen ray-march pass.
//!
//! [`VolumetricLightPass`] owns the pipeline running `shaders/volumetric.wgsl`
//! and its uniform buffers. The controller feeds it one frame at a time: the
//! gathered light snapshot, the camera, scene depth, the shadow atlas and the
//! blue-noise tile. Output goes to the scaled HDR march buffer.

use crate::camera::Camera;
use crate::gpu::GpuContext;
use crate::light::LightDescriptor;
use crate::noise::BlueNoiseTexture;
use crate::post_process::{
    draw_fullscreen, fullscreen_pipeline, sampler_entry, texture_entry, uniform_buffer,
    uniform_entry,
};
use crate::settings::VolumetricSettings;
use crate::shadow::ShadowAtlas;
use crate::uniforms::{FrameUniforms, LightUniforms, MarchUniforms};

/// Inputs of one march.
pub struct MarchInputs<'a> {
    pub camera: &'a Camera,
    pub time: f32,
    pub lights: &'a [LightDescriptor],
    pub depth: &'a wgpu::TextureView,
    pub shadows: &'a ShadowAtlas,
    pub noise: &'a BlueNoiseTexture,
}

/// Ray-marches every light into the volumetric buffer.
pub struct VolumetricLightPass {
    pipeline: wgpu::RenderPipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    frame_buffer: wgpu::Buffer,
    light_buffer: wgpu::Buffer,
    march_buffer: wgpu::Buffer,
    shadow_sampler: wgpu::Sampler,
}

impl VolumetricLightPass {
    pub fn new(gpu: &GpuContext, format: wgpu::TextureFormat) -> Self {
        let device = &gpu.device;

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Volumetric Bind Group Layout"),
            entries: &[
                uniform_entry(0),
                uniform_entry(1),
                uniform_entry(2),
                // Scene depth
                texture_entry(
                    3,
                    wgpu::TextureSampleType::Depth,
                    wgpu::TextureViewDimension::D2,
                ),
                // Blue noise (R32Float, read with textureLoad)
                texture_entry(
                    4,
                    wgpu::TextureSampleType::Float { filterable: false },
                    wgpu::TextureViewDimension::D2,
                ),
                // Shadow atlas
                texture_entry(
                    5,
                    wgpu::TextureSampleType::Depth,
                    wgpu::TextureViewDimension::D2Array,
                ),
                sampler_entry(6, wgpu::SamplerBindingType::Comparison),
            ],
        });

        let pipeline = fullscreen_pipeline(
            device,
            "Volumetric Light Pipeline",
            include_str!("shaders/volumetric.wgsl"),
            &bind_group_layout,
            format,
        );

        let shadow_sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Volumetric Shadow Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            compare: Some(wgpu::CompareFunction::LessEqual),
            ..Default::default()
        });

        log::info!("Created volumetric light pass ({format:?})");

        Self {
            pipeline,
            bind_group_layout,
            frame_buffer: uniform_buffer::<FrameUniforms>(device, "Volumetric Frame Uniforms"),
            light_buffer: uniform_buffer::<LightUniforms>(device, "Volumetric Light Uniforms"),
            march_buffer: uniform_buffer::<MarchUniforms>(device, "Volumetric March Uniforms"),
            shadow_sampler,
        }
    }

    /// Uploads the frame's uniforms and records the march into `target`.
    ///
    /// `target_size` is the size of the scaled buffer; the camera aspect is
    /// derived from it.
    pub fn render(
        &self,
        gpu: &GpuContext,
        encoder: &mut wgpu::CommandEncoder,
        inputs: &MarchInputs,
        settings: &VolumetricSettings,
        target: &wgpu::TextureView,
        target_size: (u32, u32),
    ) {
        let (lights, count) = LightUniforms::pack(inputs.lights);
        let frame = FrameUniforms::new(
            inputs.camera,
            target_size,
            inputs.time,
            inputs.noise.size,
            count as usize,
        );
        let march = MarchUniforms::new(&settings.march, settings.intensity);

        gpu.queue
            .write_buffer(&self.frame_buffer, 0, bytemuck::cast_slice(&[frame]));
        gpu.queue
            .write_buffer(&self.light_buffer, 0, bytemuck::cast_slice(&[lights]));
        gpu.queue
            .write_buffer(&self.march_buffer, 0, bytemuck::cast_slice(&[march]));

        let bind_group = gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Volumetric Bind Group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: self.frame_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: self.light_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: self.march_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: wgpu::BindingResource::TextureView(inputs.depth),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: wgpu::BindingResource::TextureView(&inputs.noise.view),
                },
                wgpu::BindGroupEntry {
                    binding: 5,
                    resource: wgpu::BindingResource::TextureView(inputs.shadows.view()),
                },
                wgpu::BindGroupEntry {
                    binding: 6,
                    resource: wgpu::BindingResource::Sampler(&self.shadow_sampler),
                },
            ],
        });

        draw_fullscreen(encoder, "Volumetric Light Pass", target, &self.pipeline, &bind_group);
    }
}
