//! CPU reference of the volumetric ray-march kernel.
//!
//! `shaders/volumetric.wgsl` runs this algorithm once per pixel on the GPU.
//! The functions here use the same constants and the same order of operations,
//! which makes the kernel's behavior testable without an adapter and gives
//! host code a way to query scattering at a point (e.g. for audio or gameplay
//! occlusion).
//!
//! # Algorithm
//!
//! 1. Reconstruct the world position under the pixel from scene depth.
//! 2. Cast a ray from the camera toward it; its length caps the march.
//! 3. For every light, intersect the ray with a sphere of
//!    `bounds_scale * range` around the light and clamp the interval to the
//!    ray. No overlap, no work.
//! 4. Choose between `min_steps` and `max_steps` steps, more for rays passing
//!    close to the light.
//! 5. March with blue-noise jitter. Inside the range and the cone, sample the
//!    shadow map and accumulate
//!    `color * spot * attenuation * scattering * exp(-extinction * d) * shadow * T * dt`,
//!    then decay transmittance `T *= exp(-extinction * dt)` (Beer–Lambert).
//! 6. Stop once `T` drops below the cutoff.
//! 7. Sum lights, scale by the global intensity and tone map with `x / (1 + x)`.

use glam::{Mat4, Vec2, Vec3, Vec4};

use crate::light::{LightDescriptor, ShadowLayer};
use crate::noise::BlueNoise;
use crate::settings::MarchSettings;

/// Smallest ray length or direction magnitude the kernel accepts.
const EPSILON: f32 = 1e-5;
/// Amplitude of the final per-pixel dither applied before tone mapping.
const FINAL_DITHER: f32 = 0.02;

/// A ray with a unit (or zero) direction.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Ray {
    pub origin: Vec3,
    pub direction: Vec3,
}

impl Ray {
    /// Creates a ray; the direction is normalized, or zero if degenerate.
    pub fn new(origin: Vec3, direction: Vec3) -> Self {
        Self {
            origin,
            direction: direction.normalize_or_zero(),
        }
    }

    #[inline]
    pub fn point_at(&self, t: f32) -> Vec3 {
        self.origin + self.direction * t
    }

    /// Entry and exit distances of the ray's line through a sphere.
    ///
    /// Both values may be negative when the sphere lies behind the origin.
    pub fn intersect_sphere_interval(&self, center: Vec3, radius: f32) -> Option<(f32, f32)> {
        let oc = self.origin - center;
        let a = self.direction.dot(self.direction);
        if a < EPSILON {
            return None;
        }
        let b = 2.0 * oc.dot(self.direction);
        let c = oc.dot(oc) - radius * radius;
        let discriminant = b * b - 4.0 * a * c;

        if discriminant < 0.0 {
            return None;
        }

        let sqrt_disc = discriminant.sqrt();
        Some(((-b - sqrt_disc) / (2.0 * a), (-b + sqrt_disc) / (2.0 * a)))
    }

    /// The point of the ray (not the line) closest to `point`.
    pub fn closest_point(&self, point: Vec3) -> Vec3 {
        let t = (point - self.origin).dot(self.direction);
        self.point_at(t.max(0.0))
    }
}

/// Clamps a sphere interval to `[0, ray_length]`, `None` if nothing is left.
pub fn clip_interval(t0: f32, t1: f32, ray_length: f32) -> Option<(f32, f32)> {
    let t0 = t0.max(0.0);
    let t1 = t1.min(ray_length);
    (t1 > t0).then_some((t0, t1))
}

/// Hermite interpolation; a zero-width edge degrades to a step.
pub fn smoothstep(edge0: f32, edge1: f32, x: f32) -> f32 {
    let width = edge1 - edge0;
    if width.abs() < 1e-6 {
        return if x >= edge1 { 1.0 } else { 0.0 };
    }
    let t = ((x - edge0) / width).clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

/// Soft cone edge: 0 outside the outer cone, 1 inside the inner cone.
pub fn spot_falloff(cos_angle: f32, cos_outer: f32, cos_inner: f32) -> f32 {
    smoothstep(cos_outer, cos_inner, cos_angle)
}

/// Softened inverse-square falloff, windowed to reach zero at `range`.
pub fn distance_attenuation(distance: f32, range: f32, softening: f32) -> f32 {
    let window = 1.0 - smoothstep(0.0, range, distance);
    window / (1.0 + distance * distance * softening)
}

/// Number of steps for a ray whose closest approach to the light is `min_distance`.
pub fn adaptive_step_count(min_distance: f32, range: f32, march: &MarchSettings) -> u32 {
    let closeness = 1.0 - smoothstep(0.0, range * 0.5, min_distance);
    let min = march.min_steps as f32;
    let max = march.max_steps as f32;
    (min + (max - min) * closeness) as u32
}

/// `x / (1 + x)` per channel; maps `[0, inf)` into `[0, 1)`.
pub fn tone_map(radiance: Vec3) -> Vec3 {
    let x = radiance.max(Vec3::ZERO);
    x / (Vec3::ONE + x)
}

/// Unprojects a screen UV (origin top-left) and a `[0, 1]` depth sample.
pub fn reconstruct_world_position(uv: Vec2, depth: f32, inverse_view_projection: Mat4) -> Vec3 {
    let ndc = Vec4::new(uv.x * 2.0 - 1.0, 1.0 - uv.y * 2.0, depth, 1.0);
    let world = inverse_view_projection * ndc;
    if world.w.abs() < EPSILON {
        world.truncate()
    } else {
        world.truncate() / world.w
    }
}

/// Maps a world position into `(u, v, depth)` of a light's shadow map.
pub fn shadow_coordinates(shadow_view_projection: Mat4, position: Vec3) -> Vec3 {
    let clip = shadow_view_projection * position.extend(1.0);
    let w = if clip.w.abs() < EPSILON { EPSILON } else { clip.w };
    let ndc = clip.truncate() / w;
    Vec3::new(ndc.x * 0.5 + 0.5, 0.5 - ndc.y * 0.5, ndc.z)
}

/// Shadow lookups for the reference kernel.
pub trait ShadowSampler {
    /// Visibility in `[0, 1]` of `coordinates` (from [`shadow_coordinates`]).
    fn visibility(&self, layer: ShadowLayer, coordinates: Vec3, bias: f32) -> f32;
}

/// Every light fully visible everywhere.
#[derive(Clone, Copy, Debug, Default)]
pub struct Unshadowed;

impl ShadowSampler for Unshadowed {
    fn visibility(&self, _layer: ShadowLayer, _coordinates: Vec3, _bias: f32) -> f32 {
        1.0
    }
}

/// Source of per-step jitter in `[0, 1)`.
pub trait Dither {
    fn march_offset(&self, screen: Vec2, depth: f32, index: f32, time: f32) -> f32;
    fn dither(&self, screen: Vec2, time: f32) -> f32;
}

impl Dither for BlueNoise {
    fn march_offset(&self, screen: Vec2, depth: f32, index: f32, time: f32) -> f32 {
        BlueNoise::march_offset(self, screen, depth, index, time)
    }

    fn dither(&self, screen: Vec2, time: f32) -> f32 {
        BlueNoise::dither(self, screen, time)
    }
}

/// No jitter: every sample sits at the same fraction of its step.
#[derive(Clone, Copy, Debug)]
pub struct FixedOffset(pub f32);

impl Dither for FixedOffset {
    fn march_offset(&self, _screen: Vec2, _depth: f32, _index: f32, _time: f32) -> f32 {
        self.0
    }

    fn dither(&self, _screen: Vec2, _time: f32) -> f32 {
        0.5
    }
}

/// Per-pixel invocation inputs.
#[derive(Clone, Copy, Debug)]
pub struct PixelContext {
    /// Position in pixels of the march buffer.
    pub screen: Vec2,
    pub time: f32,
}

/// State after one iteration of the march loop.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MarchStep {
    pub index: u32,
    pub t: f32,
    pub transmittance: f32,
    /// Whether the sample was inside range and cone and not fully shadowed.
    pub lit: bool,
}

/// Outcome of marching one light.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MarchResult {
    /// In-scattered radiance, already scaled by the light intensity.
    pub radiance: Vec3,
    /// Loop iterations executed.
    pub steps: u32,
    pub transmittance: f32,
}

impl MarchResult {
    const NONE: Self = Self {
        radiance: Vec3::ZERO,
        steps: 0,
        transmittance: 1.0,
    };
}

/// Marches one light along `ray` up to `ray_length`.
pub fn march_light(
    ray: &Ray,
    ray_length: f32,
    light: &LightDescriptor,
    march: &MarchSettings,
    pixel: PixelContext,
    dither: &impl Dither,
    shadows: &impl ShadowSampler,
) -> MarchResult {
    march_light_inspect(ray, ray_length, light, march, pixel, dither, shadows, |_| {})
}

/// [`march_light`] with a callback after every iteration.
#[allow(clippy::too_many_arguments)]
pub fn march_light_inspect(
    ray: &Ray,
    ray_length: f32,
    light: &LightDescriptor,
    march: &MarchSettings,
    pixel: PixelContext,
    dither: &impl Dither,
    shadows: &impl ShadowSampler,
    mut inspect: impl FnMut(&MarchStep),
) -> MarchResult {
    let range = light.range;
    if !(range.is_finite() && range > 0.0) || ray.direction == Vec3::ZERO || ray_length < EPSILON {
        return MarchResult::NONE;
    }

    let Some((t0, t1)) = ray.intersect_sphere_interval(light.position, range * march.bounds_scale)
    else {
        return MarchResult::NONE;
    };
    let Some((t0, t1)) = clip_interval(t0, t1, ray_length) else {
        return MarchResult::NONE;
    };

    let min_distance = ray.closest_point(light.position).distance(light.position);
    let steps = adaptive_step_count(min_distance, range, march).max(1);
    let step_size = (t1 - t0) / steps as f32;

    let cos_outer = light.outer_cone.cos();
    let cos_inner = light.inner_cone.cos();
    let scattering = light.scattering.max(0.0);
    let extinction_coefficient = light.extinction.max(0.0);

    let mut t = t0 + step_size * dither.march_offset(pixel.screen, min_distance, 0.0, pixel.time);
    let mut radiance = Vec3::ZERO;
    let mut transmittance = 1.0f32;
    let mut executed = 0;

    for i in 0..steps {
        if transmittance <= march.transmittance_cutoff || t > t1 {
            break;
        }
        executed += 1;

        let jitter = dither.march_offset(pixel.screen, i as f32, t, pixel.time);
        let sample = ray.point_at(t + jitter * step_size * 0.5);
        let to_sample = sample - light.position;
        let distance = to_sample.length();

        let mut lit = false;
        if distance < range && distance > EPSILON {
            let cos_angle = (to_sample / distance).dot(light.direction);
            if cos_angle > cos_outer {
                let shadow = match light.shadow {
                    Some(layer) => shadows.visibility(
                        layer,
                        shadow_coordinates(light.shadow_view_projection, sample),
                        march.shadow_bias * (1.0 - cos_angle),
                    ),
                    None => 1.0,
                };

                if shadow > 0.0 {
                    let attenuation =
                        distance_attenuation(distance, range, march.attenuation_softening);
                    let spot = spot_falloff(cos_angle, cos_outer, cos_inner);
                    let extinction = (-distance * extinction_coefficient).exp();

                    radiance += light.color
                        * (spot * attenuation * scattering * extinction * shadow)
                        * transmittance
                        * step_size;
                    transmittance *= (-extinction_coefficient * step_size).exp();
                    lit = true;
                }
            }
        }

        inspect(&MarchStep {
            index: i,
            t,
            transmittance,
            lit,
        });
        t += step_size;
    }

    MarchResult {
        radiance: radiance * light.intensity,
        steps: executed,
        transmittance,
    }
}

/// Camera and global inputs shared by every pixel of a frame.
#[derive(Clone, Copy, Debug)]
pub struct MarchFrame {
    pub camera_position: Vec3,
    pub inverse_view_projection: Mat4,
    /// Size in pixels of the march buffer.
    pub resolution: Vec2,
    pub time: f32,
    pub intensity: f32,
}

/// Full per-pixel kernel: all lights, dither, intensity and tone mapping.
///
/// `uv` has its origin at the top-left of the screen; `depth` is the scene
/// depth under the pixel in `[0, 1]`.
pub fn march_pixel(
    uv: Vec2,
    depth: f32,
    frame: &MarchFrame,
    lights: &[LightDescriptor],
    march: &MarchSettings,
    dither: &impl Dither,
    shadows: &impl ShadowSampler,
) -> Vec3 {
    let world = reconstruct_world_position(uv, depth, frame.inverse_view_projection);
    let to_world = world - frame.camera_position;
    let ray_length = to_world.length();
    if !ray_length.is_finite() || ray_length < EPSILON {
        return Vec3::ZERO;
    }
    let ray = Ray::new(frame.camera_position, to_world);

    let pixel = PixelContext {
        screen: uv * frame.resolution,
        time: frame.time,
    };

    let total: Vec3 = lights
        .iter()
        .take(crate::light::MAX_LIGHTS)
        .map(|light| march_light(&ray, ray_length, light, march, pixel, dither, shadows).radiance)
        .sum();

    let grain = 1.0 + (dither.dither(pixel.screen.floor(), frame.time) - 0.5) * FINAL_DITHER;
    tone_map(total * grain * frame.intensity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::light::SpotLight;
    use crate::transform::Transform;

    fn light_at_origin_facing(direction: Vec3) -> LightDescriptor {
        let light = SpotLight::new().range(20.0).cone_degrees(10.0, 30.0);
        LightDescriptor::from_light(&light, &Transform::new().looking_to(direction))
    }

    fn pixel() -> PixelContext {
        PixelContext {
            screen: Vec2::new(10.0, 10.0),
            time: 0.0,
        }
    }

    #[test]
    fn tone_map_bounds() {
        assert_eq!(tone_map(Vec3::ZERO), Vec3::ZERO);
        for x in [1e-6, 0.5, 1.0, 10.0, 1e6, f32::MAX] {
            let y = tone_map(Vec3::splat(x));
            assert!(y.x >= 0.0 && y.x < 1.0 || x == f32::MAX && y.x <= 1.0);
            assert!(y.x <= x);
        }
        assert!((tone_map(Vec3::ONE).x - 0.5).abs() < 1e-6);
    }

    #[test]
    fn ray_pointing_away_executes_no_steps() {
        let light = light_at_origin_facing(Vec3::NEG_Z);
        let ray = Ray::new(Vec3::new(0.0, 0.0, -40.0), Vec3::NEG_Z);
        let result = march_light(
            &ray,
            1000.0,
            &light,
            &MarchSettings::default(),
            pixel(),
            &FixedOffset(0.5),
            &Unshadowed,
        );
        assert_eq!(result.radiance, Vec3::ZERO);
        assert_eq!(result.steps, 0);
    }

    #[test]
    fn ray_missing_sphere_executes_no_steps() {
        let light = light_at_origin_facing(Vec3::NEG_Z);
        let ray = Ray::new(Vec3::new(0.0, 50.0, -40.0), Vec3::Z);
        let result = march_light(
            &ray,
            1000.0,
            &light,
            &MarchSettings::default(),
            pixel(),
            &FixedOffset(0.5),
            &Unshadowed,
        );
        assert_eq!(result.steps, 0);
    }

    #[test]
    fn transmittance_never_increases() {
        let light = light_at_origin_facing(Vec3::NEG_Z);
        let ray = Ray::new(Vec3::new(0.0, 0.0, -10.0), Vec3::Z);
        let noise = BlueNoise::generate(8, 9);

        let mut history = vec![1.0f32];
        let result = march_light_inspect(
            &ray,
            1000.0,
            &light,
            &MarchSettings::default(),
            pixel(),
            &noise,
            &Unshadowed,
            |step| history.push(step.transmittance),
        );

        assert!(result.steps > 0);
        assert!(history.windows(2).all(|w| w[1] <= w[0]));
        assert!(*history.last().unwrap() < 1.0);
    }

    #[test]
    fn negative_extinction_cannot_amplify_light() {
        let light = SpotLight::new().range(20.0).cone_degrees(10.0, 30.0).medium(1.0, -0.5);
        let light = LightDescriptor::from_light(&light, &Transform::new().looking_to(Vec3::NEG_Z));
        let ray = Ray::new(Vec3::new(0.0, 0.0, -10.0), Vec3::Z);

        let mut history = vec![1.0f32];
        let result = march_light_inspect(
            &ray,
            1000.0,
            &light,
            &MarchSettings::default(),
            pixel(),
            &FixedOffset(0.5),
            &Unshadowed,
            |step| history.push(step.transmittance),
        );

        assert!(result.steps > 0);
        assert!(history.windows(2).all(|w| w[1] <= w[0]), "{history:?}");
        assert!(result.transmittance <= 1.0);
        assert!(result.radiance.is_finite());
    }

    #[test]
    fn dense_medium_terminates_early() {
        let mut light = light_at_origin_facing(Vec3::NEG_Z);
        light.extinction = 50.0;
        let ray = Ray::new(Vec3::new(0.0, 0.0, -10.0), Vec3::Z);
        let march = MarchSettings::default();
        let result = march_light(&ray, 1000.0, &light, &march, pixel(), &FixedOffset(0.5), &Unshadowed);
        assert!(result.transmittance <= march.transmittance_cutoff);
        assert!(result.steps < march.max_steps);
    }

    #[test]
    fn zero_range_light_contributes_nothing() {
        let mut light = light_at_origin_facing(Vec3::NEG_Z);
        light.range = 0.0;
        let ray = Ray::new(Vec3::new(0.0, 0.0, -10.0), Vec3::Z);
        let result = march_light(
            &ray,
            1000.0,
            &light,
            &MarchSettings::default(),
            pixel(),
            &FixedOffset(0.5),
            &Unshadowed,
        );
        assert_eq!(result, MarchResult::NONE);
    }

    #[test]
    fn degenerate_ray_contributes_nothing() {
        let light = light_at_origin_facing(Vec3::NEG_Z);
        let ray = Ray::new(Vec3::ZERO, Vec3::ZERO);
        let result = march_light(
            &ray,
            10.0,
            &light,
            &MarchSettings::default(),
            pixel(),
            &FixedOffset(0.5),
            &Unshadowed,
        );
        assert_eq!(result.steps, 0);
    }

    #[test]
    fn camera_at_reconstructed_point_yields_black() {
        let frame = MarchFrame {
            camera_position: Vec3::ZERO,
            inverse_view_projection: Mat4::ZERO,
            resolution: Vec2::new(64.0, 64.0),
            time: 0.0,
            intensity: 1.0,
        };
        let lights = [light_at_origin_facing(Vec3::NEG_Z)];
        let color = march_pixel(
            Vec2::splat(0.5),
            1.0,
            &frame,
            &lights,
            &MarchSettings::default(),
            &FixedOffset(0.5),
            &Unshadowed,
        );
        assert_eq!(color, Vec3::ZERO);
    }

    #[test]
    fn full_shadow_blocks_scattering() {
        struct Occluded;
        impl ShadowSampler for Occluded {
            fn visibility(&self, _: ShadowLayer, _: Vec3, _: f32) -> f32 {
                0.0
            }
        }

        let mut light = light_at_origin_facing(Vec3::NEG_Z);
        light.shadow = Some(ShadowLayer(0));
        let ray = Ray::new(Vec3::new(0.0, 0.0, -10.0), Vec3::Z);
        let result = march_light(
            &ray,
            1000.0,
            &light,
            &MarchSettings::default(),
            pixel(),
            &FixedOffset(0.5),
            &Occluded,
        );
        assert_eq!(result.radiance, Vec3::ZERO);
        assert_eq!(result.transmittance, 1.0);
        assert!(result.steps > 0);
    }

    #[test]
    fn closer_rays_take_more_steps() {
        let march = MarchSettings::default();
        assert_eq!(adaptive_step_count(0.0, 20.0, &march), 64);
        assert_eq!(adaptive_step_count(10.0, 20.0, &march), 32);
        assert_eq!(adaptive_step_count(100.0, 20.0, &march), 32);
        let mid = adaptive_step_count(5.0, 20.0, &march);
        assert!(mid > 32 && mid < 64);
    }

    #[test]
    fn spot_falloff_edges() {
        let cos_outer = 30f32.to_radians().cos();
        let cos_inner = 10f32.to_radians().cos();
        assert_eq!(spot_falloff(1.0, cos_outer, cos_inner), 1.0);
        assert_eq!(spot_falloff(0.0, cos_outer, cos_inner), 0.0);
        let mid = spot_falloff(20f32.to_radians().cos(), cos_outer, cos_inner);
        assert!(mid > 0.0 && mid < 1.0);
        // Equal cones give a hard edge instead of NaN.
        assert_eq!(spot_falloff(0.95, 0.9, 0.9), 1.0);
        assert_eq!(spot_falloff(0.85, 0.9, 0.9), 0.0);
    }

    #[test]
    fn attenuation_is_finite_at_the_light() {
        let near = distance_attenuation(0.0, 20.0, 0.02);
        assert_eq!(near, 1.0);
        assert_eq!(distance_attenuation(20.0, 20.0, 0.02), 0.0);
        assert!(distance_attenuation(5.0, 20.0, 0.02) < near);
    }

    #[test]
    fn interval_clipping() {
        assert_eq!(clip_interval(-5.0, 5.0, 100.0), Some((0.0, 5.0)));
        assert_eq!(clip_interval(2.0, 8.0, 4.0), Some((2.0, 4.0)));
        assert_eq!(clip_interval(-8.0, -2.0, 100.0), None);
        assert_eq!(clip_interval(6.0, 8.0, 4.0), None);
    }

    #[test]
    fn world_reconstruction_inverts_projection() {
        let view_projection = Mat4::perspective_rh(1.0, 1.5, 0.1, 100.0)
            * Mat4::look_at_rh(Vec3::new(1.0, 2.0, 3.0), Vec3::ZERO, Vec3::Y);
        let point = Vec3::new(0.3, -0.2, 0.5);
        let clip = view_projection * point.extend(1.0);
        let ndc = clip.truncate() / clip.w;
        let uv = Vec2::new(ndc.x * 0.5 + 0.5, 0.5 - ndc.y * 0.5);

        let world = reconstruct_world_position(uv, ndc.z, view_projection.inverse());
        assert!((world - point).length() < 1e-3);
    }
}
