//! # godrays
//!
//! **Ray-marched volumetric spot lights for wgpu.**
//!
//! Light shafts from spot lights, rendered at reduced resolution, cleaned up by
//! a depth-aware post-process chain and added onto your scene.
//!
//! ## Quick Start
//!
//! ```no_run
//! use godrays::*;
//!
//! # fn scene_depth() -> wgpu::TextureView { unimplemented!() }
//! let gpu = GpuContext::headless(1280, 720)?;
//! let mut world = World::new();
//! world.spawn((
//!     Transform::from_position(Vec3::new(0.0, 6.0, 0.0)).looking_to(Vec3::NEG_Y),
//!     SpotLight::new().color(Vec3::new(1.0, 0.85, 0.6)).cone_degrees(12.0, 25.0),
//! ));
//!
//! let mut graph = RenderGraph::builder()
//!     .node(VolumetricNode::new(&gpu, VolumetricSettings::default())?)
//!     .build(&gpu);
//!
//! let camera = Camera::new().at(0.0, 2.0, 10.0).looking_at(0.0, 2.0, 0.0);
//! let depth = scene_depth();
//! let output = RenderTarget::new(&gpu, "Output");
//! let scene = SceneFrame { world: &world, depth: Some(&depth), shadows: None };
//! graph.execute_to_target(&gpu, 0.0, &camera, scene, &output.view);
//! # Ok::<(), VolumetricError>(())
//! ```
//!
//! ## Pieces
//!
//! - [`gather_from_world`] turns `SpotLight` + `Transform` entities into at most
//!   [`MAX_LIGHTS`] [`LightDescriptor`]s per frame.
//! - [`VolumetricLighting`] marches them (`shaders/volumetric.wgsl`), upsamples,
//!   blurs and publishes one HDR texture per frame.
//! - [`VolumetricNode`] plugs that into a [`RenderGraph`] and composites it.
//! - [`raymarch`] is the same kernel on the CPU, for tests and point queries;
//!   [`post_process`] holds the CPU versions of the upsample and blur weights.
//! - [`HiZPyramid`] / [`HiZBuffer`] / [`OcclusionCuller`] provide Hi-Z occlusion
//!   culling over the same scene depth.

mod camera;
mod error;
mod gpu;
mod light;
mod noise;
mod occlusion;
pub mod post_process;
pub mod raymarch;
mod render_graph;
mod settings;
mod shadow;
mod transform;
pub mod uniforms;
mod volumetric;
mod volumetric_pass;

pub use camera::Camera;
pub use error::{Result, VolumetricError};
pub use gpu::GpuContext;
pub use light::{
    DEFAULT_LIGHT_RANGE, GatherOptions, LightDescriptor, LightPriority, LightSnapshot, MAX_LIGHTS,
    ShadowLayer, SpotLight, gather_from_world, gather_lights, qualifies, spot_view_projection,
};
pub use noise::{BlueNoise, BlueNoiseTexture};
pub use occlusion::{HiZBuffer, HiZLevel, HiZPyramid, OcclusionCuller};
pub use post_process::{BlurAxis, CompositePass, DepthAwareBlurPass, UpsamplePass};
pub use render_graph::{
    RenderContext, RenderGraph, RenderGraphBuilder, RenderNode, RenderTarget, SceneFrame,
    VolumetricNode, scaled_extent,
};
pub use settings::{
    BlueNoiseSource, BlurSettings, MAX_GENERATED_NOISE_SIZE, MarchSettings, VolumetricSettings,
};
pub use shadow::ShadowAtlas;
pub use transform::Transform;
pub use volumetric::{
    ChainExtents, ChainStage, FrameOutcome, SkipReason, VolumetricLighting, plan_frame,
};
pub use volumetric_pass::{MarchInputs, VolumetricLightPass};

// Re-export glam math types for convenience
pub use glam::{Mat4, Quat, Vec2, Vec3, Vec4};

// ECS types the light gatherer reads
pub use hecs::{Entity, World};
