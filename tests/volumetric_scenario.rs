//! End-to-end scenario tests on the CPU kernel
//!
//! Tests for:
//! - One spot light seen from inside its bounding sphere
//! - Pixels on and off the light's cone
//! - Capacity limit and shadowing through the whole gather + march path

use godrays::raymarch::{MarchFrame, ShadowSampler, Unshadowed, march_pixel};
use godrays::{
    BlueNoise, Camera, GatherOptions, LightPriority, MAX_LIGHTS, MarchSettings, ShadowLayer,
    SpotLight, Transform, Vec2, Vec3, World, gather_from_world,
};

const WIDTH: f32 = 64.0;
const HEIGHT: f32 = 64.0;
/// Depth of an unobstructed pixel.
const FAR_PLANE: f32 = 1.0;

fn camera() -> Camera {
    Camera::new().at(0.0, 0.0, -10.0).looking_at(0.0, 0.0, 0.0)
}

fn frame() -> MarchFrame {
    let camera = camera();
    MarchFrame {
        camera_position: camera.position,
        inverse_view_projection: camera.inverse_view_projection(WIDTH / HEIGHT),
        resolution: Vec2::new(WIDTH, HEIGHT),
        time: 0.25,
        intensity: 1.0,
    }
}

/// One light at the origin shining away from the camera along +Z.
fn scene() -> World {
    let mut world = World::new();
    world.spawn((
        Transform::new().looking_to(Vec3::Z),
        SpotLight::new()
            .range(20.0)
            .cone_degrees(10.0, 30.0)
            .intensity(1.0),
    ));
    world
}

fn render(world: &World, uv: Vec2, shadows: &impl ShadowSampler) -> Vec3 {
    let snapshot = gather_from_world(world, &GatherOptions::default());
    let noise = BlueNoise::generate(16, 7);
    march_pixel(
        uv,
        FAR_PLANE,
        &frame(),
        &snapshot.lights,
        &MarchSettings::default(),
        &noise,
        shadows,
    )
}

// ============================================================================
// Single light
// ============================================================================

#[test]
fn forward_axis_pixel_is_lit() {
    let color = render(&scene(), Vec2::new(0.5, 0.5), &Unshadowed);

    assert!(color.is_finite(), "{color}");
    assert!(color.x > 0.0 && color.y > 0.0 && color.z > 0.0, "{color}");
    assert!(color.max_element() < 1.0, "tone mapped output must stay below 1: {color}");
}

#[test]
fn pixels_outside_the_cone_stay_black() {
    let world = scene();
    for uv in [
        Vec2::new(0.02, 0.02),
        Vec2::new(0.98, 0.02),
        Vec2::new(0.02, 0.98),
        Vec2::new(0.98, 0.98),
    ] {
        assert_eq!(render(&world, uv, &Unshadowed), Vec3::ZERO, "uv {uv}");
    }
}

#[test]
fn every_pixel_is_finite_and_bounded() {
    let world = scene();
    for y in (0..HEIGHT as u32).step_by(8) {
        for x in (0..WIDTH as u32).step_by(8) {
            let uv = (Vec2::new(x as f32, y as f32) + 0.5) / Vec2::new(WIDTH, HEIGHT);
            let color = render(&world, uv, &Unshadowed);
            assert!(color.is_finite(), "uv {uv}: {color}");
            assert!(color.min_element() >= 0.0 && color.max_element() < 1.0, "uv {uv}: {color}");
        }
    }
}

#[test]
fn disabled_light_contributes_nothing() {
    let mut world = scene();
    for (_, light) in world.query_mut::<&mut SpotLight>() {
        light.enabled = false;
    }
    assert_eq!(render(&world, Vec2::new(0.5, 0.5), &Unshadowed), Vec3::ZERO);
}

// ============================================================================
// Shadows and capacity
// ============================================================================

struct Blocked;

impl ShadowSampler for Blocked {
    fn visibility(&self, _layer: ShadowLayer, _coordinates: Vec3, _bias: f32) -> f32 {
        0.0
    }
}

#[test]
fn fully_shadowed_light_is_black() {
    let mut world = World::new();
    world.spawn((
        Transform::new().looking_to(Vec3::Z),
        SpotLight::new().range(20.0).cone_degrees(10.0, 30.0).shadow(0),
    ));
    assert_eq!(render(&world, Vec2::new(0.5, 0.5), &Blocked), Vec3::ZERO);
    assert!(render(&world, Vec2::new(0.5, 0.5), &Unshadowed).x > 0.0);
}

#[test]
fn over_capacity_lights_are_dropped_silently() {
    let mut world = World::new();
    for i in 0..MAX_LIGHTS + 4 {
        world.spawn((
            Transform::from_position(Vec3::new(0.0, i as f32, 0.0)).looking_to(Vec3::Z),
            SpotLight::new().range(20.0),
        ));
    }

    let options = GatherOptions {
        priority: LightPriority::NearestToCamera,
        camera_position: camera().position,
        ..Default::default()
    };
    let snapshot = gather_from_world(&world, &options);
    assert_eq!(snapshot.lights.len(), MAX_LIGHTS);
    assert_eq!(snapshot.dropped, 4);
    assert!(snapshot.lights.iter().all(|l| l.position.y < MAX_LIGHTS as f32));

    let color = render(&world, Vec2::new(0.5, 0.5), &Unshadowed);
    assert!(color.is_finite() && color.max_element() < 1.0);
}
