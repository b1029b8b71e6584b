//! Spot lights and the per-frame light gatherer.
//!
//! Lights live in a `hecs::World` as a [`SpotLight`] next to a
//! [`Transform`]. Every frame the gatherer walks the world, keeps the lights
//! that should scatter this frame and turns them into at most [`MAX_LIGHTS`]
//! [`LightDescriptor`]s, the snapshot that gets uploaded to the GPU.
//!
//! # Example
//!
//! ```
//! use godrays::*;
//!
//! let mut world = World::new();
//! world.spawn((
//!     Transform::from_position(Vec3::new(0.0, 5.0, 0.0)).looking_to(Vec3::NEG_Y),
//!     SpotLight::new().color(Vec3::new(1.0, 0.9, 0.7)).cone_degrees(10.0, 30.0),
//! ));
//!
//! let snapshot = gather_from_world(&world, &GatherOptions::default());
//! assert_eq!(snapshot.lights.len(), 1);
//! ```

use glam::{Mat4, Vec3};

use crate::transform::Transform;

/// Maximum number of lights uploaded per frame.
pub const MAX_LIGHTS: usize = 8;

/// Range used for lights that do not specify one.
pub const DEFAULT_LIGHT_RANGE: f32 = 20.0;

/// Layer of the shared shadow atlas a light's shadow map was rendered into.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ShadowLayer(pub u32);

/// A spot light component.
///
/// Cone angles are half-angles in radians, measured from the light's forward
/// axis (local -Z of its [`Transform`]).
#[derive(Clone, Debug, PartialEq)]
pub struct SpotLight {
    pub enabled: bool,
    /// Whether the light takes part in volumetric scattering.
    pub volumetric: bool,
    /// Set by the host's visibility pass each frame.
    pub visible_this_frame: bool,
    /// Linear RGB.
    pub color: Vec3,
    pub intensity: f32,
    pub inner_cone: f32,
    pub outer_cone: f32,
    /// `None` falls back to [`DEFAULT_LIGHT_RANGE`].
    pub range: Option<f32>,
    /// Fraction of light scattered toward the viewer per unit distance.
    pub scattering: f32,
    /// Beer–Lambert extinction coefficient of the medium inside the cone.
    pub extinction: f32,
    pub shadow: Option<ShadowLayer>,
}

impl Default for SpotLight {
    fn default() -> Self {
        Self {
            enabled: true,
            volumetric: true,
            visible_this_frame: true,
            color: Vec3::ONE,
            intensity: 1.0,
            inner_cone: 10f32.to_radians(),
            outer_cone: 30f32.to_radians(),
            range: None,
            scattering: 1.0,
            extinction: 0.1,
            shadow: None,
        }
    }
}

impl SpotLight {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn color(mut self, color: Vec3) -> Self {
        self.color = color;
        self
    }

    pub fn intensity(mut self, intensity: f32) -> Self {
        self.intensity = intensity;
        self
    }

    /// Sets inner and outer cone half-angles in degrees.
    pub fn cone_degrees(mut self, inner: f32, outer: f32) -> Self {
        self.inner_cone = inner.to_radians();
        self.outer_cone = outer.to_radians();
        self
    }

    pub fn range(mut self, range: f32) -> Self {
        self.range = Some(range);
        self
    }

    pub fn medium(mut self, scattering: f32, extinction: f32) -> Self {
        self.scattering = scattering;
        self.extinction = extinction;
        self
    }

    pub fn volumetric(mut self, volumetric: bool) -> Self {
        self.volumetric = volumetric;
        self
    }

    pub fn shadow(mut self, layer: u32) -> Self {
        self.shadow = Some(ShadowLayer(layer));
        self
    }

    pub fn effective_range(&self) -> f32 {
        self.range.unwrap_or(DEFAULT_LIGHT_RANGE)
    }
}

/// One light as the kernel sees it for the current frame.
#[derive(Clone, Debug, PartialEq)]
pub struct LightDescriptor {
    pub world_transform: Mat4,
    pub position: Vec3,
    /// Unit forward axis; `-Z` if the transform degenerates.
    pub direction: Vec3,
    pub color: Vec3,
    pub intensity: f32,
    pub inner_cone: f32,
    pub outer_cone: f32,
    pub range: f32,
    pub scattering: f32,
    pub extinction: f32,
    /// Perspective projection from the light, used for shadow lookups.
    pub shadow_view_projection: Mat4,
    pub shadow: Option<ShadowLayer>,
}

impl LightDescriptor {
    pub fn from_light(light: &SpotLight, transform: &Transform) -> Self {
        let world_transform = transform.matrix();
        let position = transform.position;
        let direction = transform.forward().try_normalize().unwrap_or(Vec3::NEG_Z);
        let range = light.effective_range();

        Self {
            world_transform,
            position,
            direction,
            color: light.color,
            intensity: light.intensity,
            inner_cone: light.inner_cone.min(light.outer_cone),
            outer_cone: light.outer_cone,
            range,
            scattering: medium_coefficient(light.scattering),
            extinction: medium_coefficient(light.extinction),
            shadow_view_projection: spot_view_projection(position, direction, light.outer_cone, range),
            shadow: light.shadow.filter(|layer| (layer.0 as usize) < MAX_LIGHTS),
        }
    }
}

/// Scattering and extinction must be finite and non-negative, or transmittance
/// could grow along the ray.
fn medium_coefficient(value: f32) -> f32 {
    if value.is_finite() { value.max(0.0) } else { 0.0 }
}

/// Builds a perspective view-projection matrix covering a spot light's cone.
pub fn spot_view_projection(position: Vec3, direction: Vec3, outer_cone: f32, range: f32) -> Mat4 {
    let safe_dir = if direction.length_squared() > 1e-6 {
        direction.normalize()
    } else {
        Vec3::NEG_Z
    };
    let up = if safe_dir.y.abs() > 0.99 { Vec3::X } else { Vec3::Y };
    let view = Mat4::look_at_rh(position, position + safe_dir, up);
    let fov = (outer_cone * 2.0).clamp(0.1, std::f32::consts::PI - 0.01);
    let far = range.max(1.0);
    let proj = Mat4::perspective_rh(fov, 1.0, 0.1, far);
    proj * view
}

/// How to choose lights when more than [`MAX_LIGHTS`] qualify.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LightPriority {
    /// Keep the first lights in traversal order.
    #[default]
    SceneOrder,
    /// Keep the lights closest to the camera.
    NearestToCamera,
    /// Keep the lights with the highest `intensity * max(color)`.
    BrightestFirst,
}

/// Filter and ordering applied by the gatherer.
#[derive(Clone, Copy, Debug)]
pub struct GatherOptions {
    pub require_volumetric_flag: bool,
    pub priority: LightPriority,
    /// Used by [`LightPriority::NearestToCamera`].
    pub camera_position: Vec3,
}

impl Default for GatherOptions {
    fn default() -> Self {
        Self {
            require_volumetric_flag: true,
            priority: LightPriority::SceneOrder,
            camera_position: Vec3::ZERO,
        }
    }
}

/// The lights selected for one frame.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LightSnapshot {
    /// At most [`MAX_LIGHTS`] entries.
    pub lights: Vec<LightDescriptor>,
    /// Qualifying lights that did not fit.
    pub dropped: usize,
}

impl LightSnapshot {
    pub fn is_empty(&self) -> bool {
        self.lights.is_empty()
    }
}

/// Returns `true` if the light should scatter this frame.
pub fn qualifies(light: &SpotLight, options: &GatherOptions) -> bool {
    light.enabled
        && light.visible_this_frame
        && (light.volumetric || !options.require_volumetric_flag)
}

/// Selects and converts lights from an iterator in traversal order.
pub fn gather_lights<'a, I>(candidates: I, options: &GatherOptions) -> LightSnapshot
where
    I: IntoIterator<Item = (&'a SpotLight, &'a Transform)>,
{
    let mut selected: Vec<LightDescriptor> = candidates
        .into_iter()
        .filter(|(light, _)| qualifies(light, options))
        .map(|(light, transform)| LightDescriptor::from_light(light, transform))
        .collect();

    match options.priority {
        LightPriority::SceneOrder => {}
        LightPriority::NearestToCamera => {
            let camera = options.camera_position;
            selected.sort_by(|a, b| {
                a.position
                    .distance_squared(camera)
                    .total_cmp(&b.position.distance_squared(camera))
            });
        }
        LightPriority::BrightestFirst => {
            let brightness = |l: &LightDescriptor| l.intensity * l.color.max_element();
            selected.sort_by(|a, b| brightness(b).total_cmp(&brightness(a)));
        }
    }

    let dropped = selected.len().saturating_sub(MAX_LIGHTS);
    if dropped > 0 {
        log::trace!("{dropped} volumetric light(s) over capacity dropped this frame");
    }
    selected.truncate(MAX_LIGHTS);

    LightSnapshot {
        lights: selected,
        dropped,
    }
}

/// Gathers from every entity with a [`SpotLight`] and a [`Transform`].
pub fn gather_from_world(world: &hecs::World, options: &GatherOptions) -> LightSnapshot {
    let mut query = world.query::<(&SpotLight, &Transform)>();
    gather_lights(query.iter().map(|(_, (light, transform))| (light, transform)), options)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lights(n: usize) -> Vec<(SpotLight, Transform)> {
        (0..n)
            .map(|i| {
                (
                    SpotLight::new().intensity(i as f32 + 1.0),
                    Transform::from_position(Vec3::new(i as f32, 0.0, 0.0)),
                )
            })
            .collect()
    }

    fn gather(list: &[(SpotLight, Transform)], options: &GatherOptions) -> LightSnapshot {
        gather_lights(list.iter().map(|(l, t)| (l, t)), options)
    }

    #[test]
    fn keeps_all_lights_under_capacity() {
        for n in 0..=MAX_LIGHTS {
            let snapshot = gather(&lights(n), &GatherOptions::default());
            assert_eq!(snapshot.lights.len(), n);
            assert_eq!(snapshot.dropped, 0);
        }
    }

    #[test]
    fn truncates_over_capacity_in_scene_order() {
        let snapshot = gather(&lights(11), &GatherOptions::default());
        assert_eq!(snapshot.lights.len(), MAX_LIGHTS);
        assert_eq!(snapshot.dropped, 3);
        let xs: Vec<f32> = snapshot.lights.iter().map(|l| l.position.x).collect();
        assert_eq!(xs, vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0]);
    }

    #[test]
    fn filters_disabled_invisible_and_non_volumetric() {
        let mut list = lights(4);
        list[0].0.enabled = false;
        list[1].0.visible_this_frame = false;
        list[2].0.volumetric = false;

        let snapshot = gather(&list, &GatherOptions::default());
        assert_eq!(snapshot.lights.len(), 1);
        assert_eq!(snapshot.lights[0].position.x, 3.0);

        let options = GatherOptions {
            require_volumetric_flag: false,
            ..Default::default()
        };
        assert_eq!(gather(&list, &options).lights.len(), 2);
    }

    #[test]
    fn nearest_priority_keeps_closest_lights() {
        let options = GatherOptions {
            priority: LightPriority::NearestToCamera,
            camera_position: Vec3::new(20.0, 0.0, 0.0),
            ..Default::default()
        };
        let snapshot = gather(&lights(12), &options);
        assert_eq!(snapshot.lights.len(), MAX_LIGHTS);
        assert_eq!(snapshot.lights[0].position.x, 11.0);
        assert!(snapshot.lights.iter().all(|l| l.position.x >= 4.0));
    }

    #[test]
    fn brightest_priority_keeps_strongest_lights() {
        let options = GatherOptions {
            priority: LightPriority::BrightestFirst,
            ..Default::default()
        };
        let snapshot = gather(&lights(10), &options);
        assert_eq!(snapshot.lights[0].intensity, 10.0);
        assert!(snapshot.lights.iter().all(|l| l.intensity >= 3.0));
    }

    #[test]
    fn missing_range_defaults_to_twenty() {
        let snapshot = gather(&lights(1), &GatherOptions::default());
        assert_eq!(snapshot.lights[0].range, DEFAULT_LIGHT_RANGE);

        let ranged = [(SpotLight::new().range(5.0), Transform::new())];
        assert_eq!(gather(&ranged, &GatherOptions::default()).lights[0].range, 5.0);
    }

    #[test]
    fn gathers_from_hecs_world() {
        let mut world = hecs::World::new();
        for (light, transform) in lights(9) {
            world.spawn((light, transform));
        }
        world.spawn((SpotLight::new(),)); // no transform, not a scene light

        let snapshot = gather_from_world(&world, &GatherOptions::default());
        assert_eq!(snapshot.lights.len(), MAX_LIGHTS);
        assert_eq!(snapshot.dropped, 1);
    }

    #[test]
    fn spot_projection_contains_cone_axis() {
        let position = Vec3::new(0.0, 3.0, 0.0);
        let vp = spot_view_projection(position, Vec3::NEG_Y, 30f32.to_radians(), 20.0);
        let clip = vp * (position + Vec3::NEG_Y * 5.0).extend(1.0);
        let ndc = clip.truncate() / clip.w;
        assert!(ndc.x.abs() < 1e-4 && ndc.y.abs() < 1e-4);
        assert!(ndc.z > 0.0 && ndc.z < 1.0);
    }

    #[test]
    fn invalid_medium_is_clamped() {
        let transform = Transform::new();
        let negative = SpotLight::new().medium(-2.0, -0.5);
        let descriptor = LightDescriptor::from_light(&negative, &transform);
        assert_eq!((descriptor.scattering, descriptor.extinction), (0.0, 0.0));

        let non_finite = SpotLight::new().medium(f32::NAN, f32::INFINITY);
        let descriptor = LightDescriptor::from_light(&non_finite, &transform);
        assert_eq!((descriptor.scattering, descriptor.extinction), (0.0, 0.0));

        let valid = SpotLight::new().medium(0.8, 0.05);
        let descriptor = LightDescriptor::from_light(&valid, &transform);
        assert_eq!((descriptor.scattering, descriptor.extinction), (0.8, 0.05));
    }

    #[test]
    fn out_of_range_shadow_layer_renders_unshadowed() {
        let transform = Transform::new();
        let last = SpotLight::new().shadow(MAX_LIGHTS as u32 - 1);
        assert_eq!(
            LightDescriptor::from_light(&last, &transform).shadow,
            Some(ShadowLayer(MAX_LIGHTS as u32 - 1))
        );

        let beyond = SpotLight::new().shadow(MAX_LIGHTS as u32);
        assert_eq!(LightDescriptor::from_light(&beyond, &transform).shadow, None);
    }
}
