//! GPU-side layouts of the volumetric pass uniforms.
//!
//! Every struct here mirrors a WGSL struct in `shaders/volumetric.wgsl` and
//! follows WGSL uniform alignment rules (16-byte aligned members, explicit
//! padding). They are uploaded with `bytemuck::cast_slice`.

use crate::camera::Camera;
use crate::light::{LightDescriptor, MAX_LIGHTS};
use crate::settings::MarchSettings;

/// Camera and frame data, `@group(0) @binding(0)`.
///
/// # WGSL Declaration
///
/// ```wgsl
/// struct Frame {
///     view_projection: mat4x4f,
///     inverse_view_projection: mat4x4f,
///     projection: mat4x4f,
///     camera_position: vec3f,
///     time: f32,
///     resolution: vec2f,
///     noise_size: f32,
///     light_count: u32,
/// }
/// ```
#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct FrameUniforms {
    pub view_projection: [[f32; 4]; 4],
    pub inverse_view_projection: [[f32; 4]; 4],
    pub projection: [[f32; 4]; 4],
    pub camera_position: [f32; 3],
    /// Elapsed time in seconds, drives the temporal noise offset.
    pub time: f32,
    /// Size in pixels of the buffer being marched into.
    pub resolution: [f32; 2],
    /// Edge length of the blue-noise tile in texels.
    pub noise_size: f32,
    /// Number of populated entries in [`LightUniforms::lights`].
    pub light_count: u32,
}

impl FrameUniforms {
    /// Builds the frame block for a march buffer of `resolution` pixels.
    ///
    /// The camera aspect comes from the buffer itself so the scaled buffer
    /// covers exactly the same frustum as the full-resolution one.
    pub fn new(
        camera: &Camera,
        resolution: (u32, u32),
        time: f32,
        noise_size: u32,
        light_count: usize,
    ) -> Self {
        let (width, height) = resolution;
        let aspect = width as f32 / height.max(1) as f32;
        let view_projection = camera.view_projection(aspect);

        Self {
            view_projection: view_projection.to_cols_array_2d(),
            inverse_view_projection: view_projection.inverse().to_cols_array_2d(),
            projection: camera.projection_matrix(aspect).to_cols_array_2d(),
            camera_position: camera.position.to_array(),
            time,
            resolution: [width as f32, height as f32],
            noise_size: noise_size as f32,
            light_count: light_count.min(MAX_LIGHTS) as u32,
        }
    }
}

/// Kernel tunables, `@group(0) @binding(2)`.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct MarchUniforms {
    pub min_steps: f32,
    pub max_steps: f32,
    pub attenuation_softening: f32,
    pub transmittance_cutoff: f32,
    pub bounds_scale: f32,
    pub shadow_bias: f32,
    pub intensity: f32,
    pub _padding: f32,
}

impl MarchUniforms {
    pub fn new(march: &MarchSettings, intensity: f32) -> Self {
        Self {
            min_steps: march.min_steps as f32,
            max_steps: march.max_steps as f32,
            attenuation_softening: march.attenuation_softening,
            transmittance_cutoff: march.transmittance_cutoff,
            bounds_scale: march.bounds_scale,
            shadow_bias: march.shadow_bias,
            intensity,
            _padding: 0.0,
        }
    }
}

/// One light slot.
///
/// # WGSL Declaration
///
/// ```wgsl
/// struct SpotLight {
///     props: vec4f,      // inner cone, outer cone, intensity, range
///     color: vec4f,      // rgb, shadow layer (-1 = unshadowed)
///     medium: vec4f,     // scattering, extinction
///     direction: vec4f,  // xyz forward axis
///     transform: mat4x4f,
///     shadow_view_projection: mat4x4f,
/// }
/// ```
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct GpuSpotLight {
    pub props: [f32; 4],
    pub color: [f32; 4],
    pub medium: [f32; 4],
    pub direction: [f32; 4],
    pub transform: [[f32; 4]; 4],
    pub shadow_view_projection: [[f32; 4]; 4],
}

impl From<&LightDescriptor> for GpuSpotLight {
    fn from(light: &LightDescriptor) -> Self {
        let shadow_layer = light.shadow.map_or(-1.0, |layer| layer.0 as f32);
        Self {
            props: [light.inner_cone, light.outer_cone, light.intensity, light.range],
            color: light.color.extend(shadow_layer).to_array(),
            medium: [light.scattering, light.extinction, 0.0, 0.0],
            direction: light.direction.extend(0.0).to_array(),
            transform: light.world_transform.to_cols_array_2d(),
            shadow_view_projection: light.shadow_view_projection.to_cols_array_2d(),
        }
    }
}

/// Fixed-capacity light array, `@group(0) @binding(1)`.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct LightUniforms {
    pub lights: [GpuSpotLight; MAX_LIGHTS],
}

impl LightUniforms {
    /// Packs the first `MAX_LIGHTS` descriptors; returns the block and the
    /// number of populated slots. Remaining slots stay zeroed.
    pub fn pack(lights: &[LightDescriptor]) -> (Self, u32) {
        let mut block: Self = bytemuck::Zeroable::zeroed();
        let count = lights.len().min(MAX_LIGHTS);
        for (slot, light) in block.lights.iter_mut().zip(&lights[..count]) {
            *slot = GpuSpotLight::from(light);
        }
        (block, count as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::light::SpotLight;
    use crate::transform::Transform;
    use glam::Vec3;

    impl LightUniforms {
        /// Number of leading non-empty slots.
        fn populated(&self) -> usize {
            self.lights
                .iter()
                .take_while(|l| **l != GpuSpotLight::default())
                .count()
        }

        /// Position of slot `index`, read back from its transform.
        fn position(&self, index: usize) -> Option<Vec3> {
            self.lights
                .get(index)
                .map(|l| Vec3::new(l.transform[3][0], l.transform[3][1], l.transform[3][2]))
        }
    }

    fn descriptors(n: usize) -> Vec<LightDescriptor> {
        (0..n)
            .map(|i| {
                LightDescriptor::from_light(
                    &SpotLight::new(),
                    &Transform::from_position(Vec3::new(i as f32, 1.0, 0.0)),
                )
            })
            .collect()
    }

    #[test]
    fn layouts_match_wgsl() {
        assert_eq!(std::mem::size_of::<FrameUniforms>(), 224);
        assert_eq!(std::mem::size_of::<MarchUniforms>(), 32);
        assert_eq!(std::mem::size_of::<GpuSpotLight>(), 192);
        assert_eq!(std::mem::size_of::<LightUniforms>(), 192 * MAX_LIGHTS);
    }

    #[test]
    fn populates_exactly_the_light_count() {
        for n in 0..=12 {
            let (block, count) = LightUniforms::pack(&descriptors(n));
            let expected = n.min(MAX_LIGHTS);
            assert_eq!(count as usize, expected, "n = {n}");
            assert_eq!(block.populated(), expected, "n = {n}");
        }
    }

    #[test]
    fn packs_in_order() {
        let (block, _) = LightUniforms::pack(&descriptors(3));
        for i in 0..3 {
            assert_eq!(block.position(i), Some(Vec3::new(i as f32, 1.0, 0.0)));
        }
    }

    #[test]
    fn unshadowed_lights_flag_negative_layer() {
        let mut lights = descriptors(2);
        lights[1].shadow = Some(crate::light::ShadowLayer(5));
        let (block, _) = LightUniforms::pack(&lights);
        assert_eq!(block.lights[0].color[3], -1.0);
        assert_eq!(block.lights[1].color[3], 5.0);
    }

    #[test]
    fn frame_light_count_is_capped() {
        let camera = Camera::new();
        let frame = FrameUniforms::new(&camera, (320, 180), 0.0, 64, 20);
        assert_eq!(frame.light_count, MAX_LIGHTS as u32);
        assert_eq!(frame.resolution, [320.0, 180.0]);
    }
}
