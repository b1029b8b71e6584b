//! Hi-Z occlusion culling.
//!
//! The scene depth is reduced into a pyramid where every texel holds the
//! farthest depth of the 2 x 2 footprint below it. An object whose nearest
//! projected depth is farther than the farthest depth stored over its screen
//! rectangle is hidden behind what was already drawn.
//!
//! [`HiZPyramid`] builds the pyramid on the GPU with `shaders/hiz.wgsl`;
//! [`HiZBuffer`] is the CPU version used for queries (e.g. over a depth
//! read-back or a software-rasterized occluder buffer). [`OcclusionCuller`]
//! keeps the visible-last-frame set so hosts can draw last frame's visible
//! objects first and test the rest against their depth.

use std::collections::HashSet;

use glam::{Mat4, Vec3};

use crate::gpu::GpuContext;

/// Size of the next pyramid level: halved, rounded up, at least 1.
pub fn next_level_extent(width: u32, height: u32) -> (u32, u32) {
    (width.div_ceil(2).max(1), height.div_ceil(2).max(1))
}

/// Number of levels down to 1 x 1 (inclusive).
pub fn level_count(width: u32, height: u32) -> u32 {
    let (mut w, mut h) = (width.max(1), height.max(1));
    let mut count = 1;
    while w > 1 || h > 1 {
        (w, h) = next_level_extent(w, h);
        count += 1;
    }
    count
}

/// One level of a CPU Hi-Z pyramid.
#[derive(Clone, Debug, PartialEq)]
pub struct HiZLevel {
    pub width: u32,
    pub height: u32,
    pub depth: Vec<f32>,
}

impl HiZLevel {
    fn at(&self, x: u32, y: u32) -> f32 {
        let x = x.min(self.width - 1) as usize;
        let y = y.min(self.height - 1) as usize;
        self.depth[y * self.width as usize + x]
    }

    /// The next level, each texel the max of a 2 x 2 footprint.
    pub fn downsample_max(&self) -> HiZLevel {
        let (width, height) = next_level_extent(self.width, self.height);
        let mut depth = Vec::with_capacity((width * height) as usize);
        for y in 0..height {
            for x in 0..width {
                let (sx, sy) = (x * 2, y * 2);
                let farthest = self
                    .at(sx, sy)
                    .max(self.at(sx + 1, sy))
                    .max(self.at(sx, sy + 1))
                    .max(self.at(sx + 1, sy + 1));
                depth.push(farthest);
            }
        }
        HiZLevel {
            width,
            height,
            depth,
        }
    }
}

/// CPU Hi-Z pyramid over a `[0, 1]` depth buffer (1 = far plane).
#[derive(Clone, Debug, PartialEq)]
pub struct HiZBuffer {
    levels: Vec<HiZLevel>,
}

impl HiZBuffer {
    /// Builds the full pyramid from a row-major depth buffer.
    ///
    /// Returns `None` if `depth` does not hold `width * height` values.
    pub fn from_depth(width: u32, height: u32, depth: &[f32]) -> Option<Self> {
        if width == 0 || height == 0 || depth.len() != (width * height) as usize {
            return None;
        }
        let mut levels = vec![HiZLevel {
            width,
            height,
            depth: depth.to_vec(),
        }];
        while let Some(last) = levels.last() {
            if last.width == 1 && last.height == 1 {
                break;
            }
            let next = last.downsample_max();
            levels.push(next);
        }
        Some(Self { levels })
    }

    pub fn level(&self, index: usize) -> Option<&HiZLevel> {
        self.levels.get(index)
    }

    pub fn level_count(&self) -> usize {
        self.levels.len()
    }

    /// Returns `true` only if the box is certainly hidden.
    ///
    /// Boxes crossing the near plane, or entirely off-screen, are reported as
    /// visible; frustum culling is the caller's job.
    pub fn is_occluded(&self, aabb_min: Vec3, aabb_max: Vec3, view_projection: Mat4) -> bool {
        let mut ndc_min = Vec3::splat(f32::INFINITY);
        let mut ndc_max = Vec3::splat(f32::NEG_INFINITY);
        for i in 0..8 {
            let corner = Vec3::new(
                if i & 1 == 0 { aabb_min.x } else { aabb_max.x },
                if i & 2 == 0 { aabb_min.y } else { aabb_max.y },
                if i & 4 == 0 { aabb_min.z } else { aabb_max.z },
            );
            let clip = view_projection * corner.extend(1.0);
            if clip.w <= 1e-5 {
                return false;
            }
            let ndc = clip.truncate() / clip.w;
            ndc_min = ndc_min.min(ndc);
            ndc_max = ndc_max.max(ndc);
        }

        if ndc_max.x < -1.0 || ndc_min.x > 1.0 || ndc_max.y < -1.0 || ndc_min.y > 1.0 {
            return false;
        }
        let nearest = ndc_min.z;
        if nearest < 0.0 {
            return false;
        }

        let base = &self.levels[0];
        let to_pixel = |ndc_x: f32, ndc_y: f32| {
            let u = (ndc_x.clamp(-1.0, 1.0) * 0.5 + 0.5) * base.width as f32;
            let v = (0.5 - ndc_y.clamp(-1.0, 1.0) * 0.5) * base.height as f32;
            (u, v)
        };
        let (x0, y0) = to_pixel(ndc_min.x, ndc_max.y);
        let (x1, y1) = to_pixel(ndc_max.x, ndc_min.y);

        // Pick the level where the rectangle spans about two texels.
        let extent = (x1 - x0).max(y1 - y0).max(1.0);
        let level_index = (extent.log2().ceil() as usize).min(self.levels.len() - 1);
        let level = &self.levels[level_index];
        let scale = (1u32 << level_index) as f32;

        let min_x = (x0 / scale).floor() as u32;
        let min_y = (y0 / scale).floor() as u32;
        let max_x = ((x1 / scale).ceil() as u32).saturating_sub(1).max(min_x);
        let max_y = ((y1 / scale).ceil() as u32).saturating_sub(1).max(min_y);

        let mut farthest = 0.0f32;
        for y in min_y..=max_y.min(level.height - 1) {
            for x in min_x..=max_x.min(level.width - 1) {
                farthest = farthest.max(level.at(x, y));
            }
        }

        nearest > farthest
    }
}

/// Visible-last-frame bookkeeping for occlusion culling.
#[derive(Debug, Default)]
pub struct OcclusionCuller {
    visible_last_frame: HashSet<hecs::Entity>,
    visible_this_frame: HashSet<hecs::Entity>,
}

impl OcclusionCuller {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rolls this frame's results into the visible-last-frame set.
    pub fn begin_frame(&mut self) {
        self.visible_last_frame = std::mem::take(&mut self.visible_this_frame);
    }

    pub fn record(&mut self, entity: hecs::Entity, visible: bool) {
        if visible {
            self.visible_this_frame.insert(entity);
        } else {
            self.visible_this_frame.remove(&entity);
        }
    }

    pub fn visible_last_frame(&self, entity: hecs::Entity) -> bool {
        self.visible_last_frame.contains(&entity)
    }

    /// Tests a box against `hiz` and records the result.
    pub fn test(
        &mut self,
        hiz: &HiZBuffer,
        entity: hecs::Entity,
        aabb_min: Vec3,
        aabb_max: Vec3,
        view_projection: Mat4,
    ) -> bool {
        let visible = !hiz.is_occluded(aabb_min, aabb_max, view_projection);
        self.record(entity, visible);
        visible
    }
}

/// GPU Hi-Z pyramid built from the scene depth each frame.
pub struct HiZPyramid {
    texture: wgpu::Texture,
    mip_views: Vec<wgpu::TextureView>,
    view: wgpu::TextureView,
    copy_pipeline: wgpu::ComputePipeline,
    copy_layout: wgpu::BindGroupLayout,
    downsample_pipeline: wgpu::ComputePipeline,
    downsample_layout: wgpu::BindGroupLayout,
    width: u32,
    height: u32,
}

const WORKGROUP_SIZE: u32 = 8;

impl HiZPyramid {
    pub fn new(gpu: &GpuContext, width: u32, height: u32) -> Self {
        let device = &gpu.device;

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("HiZ Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shaders/hiz.wgsl").into()),
        });

        let storage_entry = wgpu::BindGroupLayoutEntry {
            binding: 1,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::StorageTexture {
                access: wgpu::StorageTextureAccess::WriteOnly,
                format: wgpu::TextureFormat::R32Float,
                view_dimension: wgpu::TextureViewDimension::D2,
            },
            count: None,
        };

        let copy_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("HiZ Copy Layout"),
            entries: &[
                storage_entry,
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Depth,
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
            ],
        });

        let downsample_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("HiZ Downsample Layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: false },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                storage_entry,
            ],
        });

        let pipeline = |label: &str, layout: &wgpu::BindGroupLayout, entry_point: &str| {
            let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(label),
                bind_group_layouts: &[layout],
                push_constant_ranges: &[],
            });
            device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(label),
                layout: Some(&pipeline_layout),
                module: &shader,
                entry_point: Some(entry_point),
                compilation_options: Default::default(),
                cache: None,
            })
        };

        let copy_pipeline = pipeline("HiZ Copy Pipeline", &copy_layout, "copy_depth");
        let downsample_pipeline =
            pipeline("HiZ Downsample Pipeline", &downsample_layout, "downsample");

        let (texture, view, mip_views) = Self::create_texture(device, width, height);

        Self {
            texture,
            mip_views,
            view,
            copy_pipeline,
            copy_layout,
            downsample_pipeline,
            downsample_layout,
            width: width.max(1),
            height: height.max(1),
        }
    }

    fn create_texture(
        device: &wgpu::Device,
        width: u32,
        height: u32,
    ) -> (wgpu::Texture, wgpu::TextureView, Vec<wgpu::TextureView>) {
        let width = width.max(1);
        let height = height.max(1);
        let mip_level_count = level_count(width, height);
        log::debug!("Allocating Hi-Z pyramid ({width}x{height}, {mip_level_count} levels)");

        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("HiZ Pyramid"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::R32Float,
            usage: wgpu::TextureUsages::STORAGE_BINDING | wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let mip_views = (0..mip_level_count)
            .map(|level| {
                texture.create_view(&wgpu::TextureViewDescriptor {
                    label: Some("HiZ Level"),
                    base_mip_level: level,
                    mip_level_count: Some(1),
                    ..Default::default()
                })
            })
            .collect();
        (texture, view, mip_views)
    }

    /// Reallocates the pyramid when the scene depth changes size.
    pub fn ensure_size(&mut self, device: &wgpu::Device, width: u32, height: u32) {
        if self.width == width.max(1) && self.height == height.max(1) {
            return;
        }
        let (texture, view, mip_views) = Self::create_texture(device, width, height);
        self.texture = texture;
        self.view = view;
        self.mip_views = mip_views;
        self.width = width.max(1);
        self.height = height.max(1);
    }

    /// Records the copy of `depth` into level 0 and the reduction of every
    /// further level. `depth` must match the pyramid size.
    pub fn build(&self, gpu: &GpuContext, encoder: &mut wgpu::CommandEncoder, depth: &wgpu::TextureView) {
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("HiZ Build"),
            timestamp_writes: None,
        });

        let copy_group = gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("HiZ Copy Bind Group"),
            layout: &self.copy_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(&self.mip_views[0]),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::TextureView(depth),
                },
            ],
        });
        pass.set_pipeline(&self.copy_pipeline);
        pass.set_bind_group(0, &copy_group, &[]);
        pass.dispatch_workgroups(
            self.width.div_ceil(WORKGROUP_SIZE),
            self.height.div_ceil(WORKGROUP_SIZE),
            1,
        );

        pass.set_pipeline(&self.downsample_pipeline);
        let (mut w, mut h) = (self.width, self.height);
        for level in 1..self.mip_views.len() {
            (w, h) = next_level_extent(w, h);
            let group = gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("HiZ Downsample Bind Group"),
                layout: &self.downsample_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: wgpu::BindingResource::TextureView(&self.mip_views[level - 1]),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::TextureView(&self.mip_views[level]),
                    },
                ],
            });
            pass.set_bind_group(0, &group, &[]);
            pass.dispatch_workgroups(w.div_ceil(WORKGROUP_SIZE), h.div_ceil(WORKGROUP_SIZE), 1);
        }
    }

    /// All levels, for sampling with `textureLoad(hiz, p, level)`.
    pub fn view(&self) -> &wgpu::TextureView {
        &self.view
    }

    pub fn texture(&self) -> &wgpu::Texture {
        &self.texture
    }

    pub fn level_count(&self) -> u32 {
        self.mip_views.len() as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn camera_vp() -> Mat4 {
        Mat4::perspective_rh(60f32.to_radians(), 1.0, 0.1, 100.0)
            * Mat4::look_at_rh(Vec3::ZERO, Vec3::NEG_Z, Vec3::Y)
    }

    /// A depth buffer with a wall at view distance `distance` covering the screen.
    fn wall(size: u32, distance: f32) -> HiZBuffer {
        let clip = camera_vp() * Vec3::new(0.0, 0.0, -distance).extend(1.0);
        let depth = clip.z / clip.w;
        HiZBuffer::from_depth(size, size, &vec![depth; (size * size) as usize]).unwrap()
    }

    #[test]
    fn levels_halve_down_to_one() {
        assert_eq!(level_count(1, 1), 1);
        assert_eq!(level_count(8, 8), 4);
        assert_eq!(level_count(5, 3), 4);
        assert_eq!(next_level_extent(5, 3), (3, 2));
    }

    #[test]
    fn downsample_keeps_farthest_depth() {
        let depth = [0.1, 0.2, 0.3, 0.9, 0.5, 0.6, 0.7, 0.8];
        let hiz = HiZBuffer::from_depth(4, 2, &depth).unwrap();
        assert_eq!(hiz.level(1).unwrap().depth, vec![0.6, 0.9]);
        assert_eq!(hiz.level(2).unwrap().depth, vec![0.9]);
        assert_eq!(hiz.level_count(), 3);
    }

    #[test]
    fn odd_sizes_cover_every_texel() {
        let mut depth = vec![0.0; 9];
        depth[8] = 1.0; // bottom-right corner
        let hiz = HiZBuffer::from_depth(3, 3, &depth).unwrap();
        assert_eq!(hiz.level(hiz.level_count() - 1).unwrap().depth, vec![1.0]);
    }

    #[test]
    fn rejects_mismatched_buffers() {
        assert!(HiZBuffer::from_depth(4, 4, &[0.0; 15]).is_none());
        assert!(HiZBuffer::from_depth(0, 4, &[]).is_none());
    }

    #[test]
    fn box_behind_wall_is_occluded() {
        let hiz = wall(64, 10.0);
        let hidden = hiz.is_occluded(
            Vec3::new(-1.0, -1.0, -31.0),
            Vec3::new(1.0, 1.0, -29.0),
            camera_vp(),
        );
        assert!(hidden);
    }

    #[test]
    fn box_in_front_of_wall_is_visible() {
        let hiz = wall(64, 10.0);
        let visible = !hiz.is_occluded(
            Vec3::new(-1.0, -1.0, -6.0),
            Vec3::new(1.0, 1.0, -4.0),
            camera_vp(),
        );
        assert!(visible);
    }

    #[test]
    fn box_crossing_near_plane_is_visible() {
        let hiz = wall(64, 0.5);
        assert!(!hiz.is_occluded(
            Vec3::new(-1.0, -1.0, -5.0),
            Vec3::new(1.0, 1.0, 5.0),
            camera_vp(),
        ));
    }

    #[test]
    fn culler_rolls_visibility_between_frames() {
        let mut world = hecs::World::new();
        let a = world.spawn(());
        let b = world.spawn(());

        let mut culler = OcclusionCuller::new();
        culler.begin_frame();
        culler.record(a, true);
        culler.record(b, false);
        assert!(!culler.visible_last_frame(a));

        culler.begin_frame();
        assert!(culler.visible_last_frame(a));
        assert!(!culler.visible_last_frame(b));

        let hiz = wall(16, 10.0);
        let visible = culler.test(
            &hiz,
            b,
            Vec3::new(-1.0, -1.0, -6.0),
            Vec3::new(1.0, 1.0, -4.0),
            camera_vp(),
        );
        assert!(visible);
        culler.begin_frame();
        assert!(culler.visible_last_frame(b));
        assert!(!culler.visible_last_frame(a));
    }
}
