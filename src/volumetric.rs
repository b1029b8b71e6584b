//! The volumetric lighting controller.
//!
//! [`VolumetricLighting`] owns everything the effect needs between frames:
//! the blue-noise tile, the three passes and the chain buffers. Once per frame
//! it gathers lights from the host's `hecs::World`, marches them into a scaled
//! HDR buffer and runs the post-process chain:
//!
//! ```text
//! March ──▶ Upsample ──▶ BlurHorizontal ──▶ BlurVertical ──▶ volumetrics_view()
//! ```
//!
//! Stages run strictly in that order and never twice in a frame. When an
//! input is missing the whole chain is skipped for the frame and the published
//! buffer holds transparent black; the frame itself never fails.

use crate::error::Result;
use crate::gpu::GpuContext;
use crate::light::{GatherOptions, LightSnapshot, gather_from_world};
use crate::noise::{BlueNoise, BlueNoiseTexture};
use crate::post_process::{BlurAxis, DepthAwareBlurPass, UpsamplePass};
use crate::render_graph::{RenderContext, RenderTarget, SceneFrame, scaled_extent};
use crate::settings::{BlueNoiseSource, VolumetricSettings};
use crate::shadow::ShadowAtlas;
use crate::volumetric_pass::{MarchInputs, VolumetricLightPass};

/// One stage of the chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChainStage {
    March,
    Upsample,
    BlurHorizontal,
    BlurVertical,
}

impl ChainStage {
    /// Execution order.
    pub const ORDER: [ChainStage; 4] = [
        ChainStage::March,
        ChainStage::Upsample,
        ChainStage::BlurHorizontal,
        ChainStage::BlurVertical,
    ];
}

/// Why a frame produced no volumetric light.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkipReason {
    /// The source surface is empty, so no buffers exist.
    TargetUnavailable,
    /// The host did not supply scene depth.
    DepthUnavailable,
    /// No light qualified this frame.
    NoLights,
}

/// Result of [`VolumetricLighting::execute`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    Skipped(SkipReason),
    Rendered {
        /// Lights marched (at most `MAX_LIGHTS`).
        lights: usize,
        /// Qualifying lights left out by the capacity limit.
        dropped: usize,
    },
}

/// Decides what a frame does from the inputs available to it.
///
/// Skips are checked in order: buffers, scene depth, then lights.
pub fn plan_frame(has_targets: bool, has_depth: bool, snapshot: &LightSnapshot) -> FrameOutcome {
    if !has_targets {
        FrameOutcome::Skipped(SkipReason::TargetUnavailable)
    } else if !has_depth {
        FrameOutcome::Skipped(SkipReason::DepthUnavailable)
    } else if snapshot.is_empty() {
        FrameOutcome::Skipped(SkipReason::NoLights)
    } else {
        FrameOutcome::Rendered {
            lights: snapshot.lights.len(),
            dropped: snapshot.dropped,
        }
    }
}

/// Sizes of every chain buffer for one source size.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChainExtents {
    /// Scaled ray-march buffer.
    pub march: (u32, u32),
    /// Upsample, blur scratch and published buffers.
    pub full: (u32, u32),
}

impl ChainExtents {
    /// `None` when the source is empty.
    pub fn new(width: u32, height: u32, scale: f32) -> Option<Self> {
        Some(Self {
            march: scaled_extent(width, height, scale)?,
            full: (width, height),
        })
    }

    /// Size of the buffer a stage writes.
    pub fn output_of(&self, stage: ChainStage) -> (u32, u32) {
        match stage {
            ChainStage::March => self.march,
            ChainStage::Upsample | ChainStage::BlurHorizontal | ChainStage::BlurVertical => {
                self.full
            }
        }
    }
}

/// The buffers of one chain, sized by a [`ChainExtents`].
struct ChainTargets {
    extents: ChainExtents,
    march: RenderTarget,
    upsampled: RenderTarget,
    scratch: RenderTarget,
    output: RenderTarget,
}

impl ChainTargets {
    fn new(device: &wgpu::Device, extents: ChainExtents, format: wgpu::TextureFormat) -> Self {
        let (mw, mh) = extents.march;
        let (fw, fh) = extents.full;
        Self {
            extents,
            march: RenderTarget::with_size(device, "Volumetric March", mw, mh, format),
            upsampled: RenderTarget::with_size(device, "Volumetric Upsampled", fw, fh, format),
            scratch: RenderTarget::with_size(device, "Volumetric Blur Scratch", fw, fh, format),
            output: RenderTarget::with_size(device, "Volumetric Output", fw, fh, format),
        }
    }

    fn resize(&mut self, device: &wgpu::Device, extents: ChainExtents) {
        let (mw, mh) = extents.march;
        let (fw, fh) = extents.full;
        self.march.resize(device, "Volumetric March", mw, mh);
        self.upsampled.resize(device, "Volumetric Upsampled", fw, fh);
        self.scratch.resize(device, "Volumetric Blur Scratch", fw, fh);
        self.output.resize(device, "Volumetric Output", fw, fh);
        self.extents = extents;
    }

    fn target(&self, stage: ChainStage) -> &RenderTarget {
        match stage {
            ChainStage::March => &self.march,
            ChainStage::Upsample => &self.upsampled,
            ChainStage::BlurHorizontal => &self.scratch,
            ChainStage::BlurVertical => &self.output,
        }
    }
}

/// Volumetric spot-light scattering for one view.
///
/// # Example
///
/// ```no_run
/// use godrays::*;
///
/// let gpu = GpuContext::headless(1280, 720)?;
/// let mut lighting = VolumetricLighting::new(&gpu, VolumetricSettings::default().scale(0.5))?;
///
/// let mut world = World::new();
/// world.spawn((Transform::new().looking_to(Vec3::NEG_Z), SpotLight::new()));
///
/// // Every frame, inside a render graph node or with a hand-built RenderContext:
/// // let outcome = lighting.execute(&mut ctx, &scene);
/// // composite lighting.volumetrics_view() onto the scene color.
/// # Ok::<(), VolumetricError>(())
/// ```
pub struct VolumetricLighting {
    settings: VolumetricSettings,
    noise: BlueNoiseTexture,
    march_pass: VolumetricLightPass,
    upsample_pass: UpsamplePass,
    blur_pass: DepthAwareBlurPass,
    shadow_stub: ShadowAtlas,
    source_size: (u32, u32),
    targets: Option<ChainTargets>,
}

impl VolumetricLighting {
    /// Validates `settings`, loads or generates the noise tile and creates the
    /// passes and buffers at the context's current size.
    pub fn new(gpu: &GpuContext, settings: VolumetricSettings) -> Result<Self> {
        settings.validate()?;

        let noise = match &settings.noise {
            BlueNoiseSource::Generated { size, seed } => BlueNoise::generate(*size, *seed),
            BlueNoiseSource::File(path) => BlueNoise::from_file(path)?,
        };
        log::info!(
            "Volumetric lighting: {}x{} blue noise, scale {}, {}..{} steps",
            noise.size(),
            noise.size(),
            settings.scale,
            settings.march.min_steps,
            settings.march.max_steps
        );

        let format = settings.format;
        let mut lighting = Self {
            noise: BlueNoiseTexture::upload(gpu, &noise),
            march_pass: VolumetricLightPass::new(gpu, format),
            upsample_pass: UpsamplePass::new(gpu, format),
            blur_pass: DepthAwareBlurPass::new(gpu, format),
            shadow_stub: ShadowAtlas::stub(gpu),
            source_size: (0, 0),
            targets: None,
            settings,
        };
        lighting.resize(&gpu.device, gpu.width(), gpu.height());
        Ok(lighting)
    }

    pub fn settings(&self) -> &VolumetricSettings {
        &self.settings
    }

    /// Current chain extents, `None` while the source is empty.
    pub fn extents(&self) -> Option<ChainExtents> {
        self.targets.as_ref().map(|t| t.extents)
    }

    /// The published HDR volumetrics texture, at source resolution.
    pub fn volumetrics_view(&self) -> Option<&wgpu::TextureView> {
        self.targets.as_ref().map(|t| &t.output.view)
    }

    /// Resizes every chain buffer for a new source size.
    pub fn resize(&mut self, device: &wgpu::Device, width: u32, height: u32) {
        self.source_size = (width, height);
        let Some(extents) = ChainExtents::new(width, height, self.settings.scale) else {
            log::debug!("Volumetric source is empty ({width}x{height}); releasing buffers");
            self.targets = None;
            return;
        };

        match &mut self.targets {
            Some(targets) if targets.extents == extents => {}
            Some(targets) => targets.resize(device, extents),
            None => {
                self.targets = Some(ChainTargets::new(device, extents, self.settings.format));
            }
        }
    }

    /// Follows the context's surface size.
    pub fn ensure_size(&mut self, gpu: &GpuContext) {
        if self.source_size != (gpu.width(), gpu.height()) {
            self.resize(&gpu.device, gpu.width(), gpu.height());
        }
    }

    /// Changes the march buffer scale, reallocating it if needed.
    pub fn set_scale(&mut self, device: &wgpu::Device, scale: f32) -> Result<()> {
        let candidate = self.settings.clone().scale(scale);
        candidate.validate()?;
        self.settings = candidate;
        let (width, height) = self.source_size;
        self.resize(device, width, height);
        Ok(())
    }

    /// Sets the global intensity multiplier.
    pub fn set_intensity(&mut self, intensity: f32) -> Result<()> {
        let candidate = self.settings.clone().intensity(intensity);
        candidate.validate()?;
        self.settings = candidate;
        Ok(())
    }

    /// Runs the chain for one frame.
    pub fn execute(&mut self, ctx: &mut RenderContext, scene: &SceneFrame) -> FrameOutcome {
        self.ensure_size(ctx.gpu);

        let options = GatherOptions {
            require_volumetric_flag: self.settings.require_volumetric_flag,
            priority: self.settings.priority,
            camera_position: ctx.camera.position,
        };
        let snapshot = gather_from_world(scene.world, &options);
        let outcome = plan_frame(self.targets.is_some(), scene.depth.is_some(), &snapshot);

        let (Some(targets), Some(depth), FrameOutcome::Rendered { .. }) =
            (&self.targets, scene.depth, outcome)
        else {
            log::trace!("Volumetric chain skipped: {outcome:?}");
            if let Some(targets) = &self.targets {
                targets.output.clear(ctx.encoder);
            }
            return outcome;
        };

        let extents = targets.extents;
        let (width, height) = extents.full;
        let inverse_projection = ctx
            .camera
            .projection_matrix(width as f32 / height.max(1) as f32)
            .inverse();

        for stage in ChainStage::ORDER {
            let target = targets.target(stage);
            let size = extents.output_of(stage);
            match stage {
                ChainStage::March => {
                    let inputs = MarchInputs {
                        camera: ctx.camera,
                        time: ctx.time,
                        lights: &snapshot.lights,
                        depth,
                        shadows: scene.shadows.unwrap_or(&self.shadow_stub),
                        noise: &self.noise,
                    };
                    self.march_pass.render(
                        ctx.gpu,
                        ctx.encoder,
                        &inputs,
                        &self.settings,
                        &target.view,
                        size,
                    );
                }
                ChainStage::Upsample => self.upsample_pass.render(
                    ctx.gpu,
                    ctx.encoder,
                    &targets.march.view,
                    extents.march,
                    &target.view,
                    size,
                ),
                ChainStage::BlurHorizontal => self.blur_pass.render(
                    ctx.gpu,
                    ctx.encoder,
                    BlurAxis::Horizontal,
                    &self.settings.blur,
                    inverse_projection,
                    &targets.upsampled.view,
                    depth,
                    &target.view,
                    size,
                ),
                ChainStage::BlurVertical => self.blur_pass.render(
                    ctx.gpu,
                    ctx.encoder,
                    BlurAxis::Vertical,
                    &self.settings.blur,
                    inverse_projection,
                    &targets.scratch.view,
                    depth,
                    &target.view,
                    size,
                ),
            }
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stages_run_in_fixed_order() {
        assert_eq!(
            ChainStage::ORDER,
            [
                ChainStage::March,
                ChainStage::Upsample,
                ChainStage::BlurHorizontal,
                ChainStage::BlurVertical
            ]
        );
    }

    #[test]
    fn resize_propagates_to_every_buffer() {
        let before = ChainExtents::new(1280, 720, 0.5).unwrap();
        let after = ChainExtents::new(1920, 1080, 0.5).unwrap();
        assert_ne!(before, after);

        for stage in ChainStage::ORDER {
            let expected = if stage == ChainStage::March {
                (960, 540)
            } else {
                (1920, 1080)
            };
            assert_eq!(after.output_of(stage), expected, "{stage:?}");
        }
    }

    #[test]
    fn scale_only_affects_march_buffer() {
        let quarter = ChainExtents::new(1000, 500, 0.25).unwrap();
        assert_eq!(quarter.march, (250, 125));
        assert_eq!(quarter.full, (1000, 500));
    }

    #[test]
    fn empty_source_has_no_chain() {
        assert!(ChainExtents::new(0, 0, 0.5).is_none());
    }

    fn snapshot(lights: usize, dropped: usize) -> LightSnapshot {
        use crate::light::{LightDescriptor, SpotLight};
        use crate::transform::Transform;

        let light = LightDescriptor::from_light(&SpotLight::new(), &Transform::new());
        LightSnapshot {
            lights: vec![light; lights],
            dropped,
        }
    }

    #[test]
    fn missing_target_skips_first() {
        assert_eq!(
            plan_frame(false, false, &snapshot(0, 0)),
            FrameOutcome::Skipped(SkipReason::TargetUnavailable)
        );
        assert_eq!(
            plan_frame(false, true, &snapshot(3, 0)),
            FrameOutcome::Skipped(SkipReason::TargetUnavailable)
        );
    }

    #[test]
    fn missing_depth_skips() {
        assert_eq!(
            plan_frame(true, false, &snapshot(3, 0)),
            FrameOutcome::Skipped(SkipReason::DepthUnavailable)
        );
    }

    #[test]
    fn no_lights_skips() {
        assert_eq!(
            plan_frame(true, true, &snapshot(0, 0)),
            FrameOutcome::Skipped(SkipReason::NoLights)
        );
    }

    #[test]
    fn rendered_frame_reports_counts() {
        assert_eq!(
            plan_frame(true, true, &snapshot(8, 4)),
            FrameOutcome::Rendered {
                lights: 8,
                dropped: 4
            }
        );
    }
}
