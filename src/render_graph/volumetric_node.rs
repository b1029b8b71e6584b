//! Render graph node adding volumetric light to the previous pass.

use crate::error::Result;
use crate::gpu::GpuContext;
use crate::post_process::CompositePass;
use crate::render_graph::{RenderContext, RenderNode};
use crate::settings::VolumetricSettings;
use crate::volumetric::{FrameOutcome, SkipReason, VolumetricLighting};

/// Runs [`VolumetricLighting`] and composites its output over the node input.
///
/// Writes `input + volumetrics` to the target. If the chain skips a frame the
/// input passes through unchanged.
pub struct VolumetricNode {
    lighting: VolumetricLighting,
    composite: CompositePass,
    last_outcome: FrameOutcome,
}

impl VolumetricNode {
    /// Creates the node for a graph presenting in `gpu.config.format`.
    pub fn new(gpu: &GpuContext, settings: VolumetricSettings) -> Result<Self> {
        Ok(Self {
            lighting: VolumetricLighting::new(gpu, settings)?,
            composite: CompositePass::new(gpu, gpu.config.format),
            last_outcome: FrameOutcome::Skipped(SkipReason::TargetUnavailable),
        })
    }

    pub fn lighting(&self) -> &VolumetricLighting {
        &self.lighting
    }

    pub fn lighting_mut(&mut self) -> &mut VolumetricLighting {
        &mut self.lighting
    }

    /// What the chain did in the most recent frame.
    pub fn last_outcome(&self) -> FrameOutcome {
        self.last_outcome
    }
}

impl RenderNode for VolumetricNode {
    fn execute(
        &mut self,
        ctx: &mut RenderContext,
        target: &wgpu::TextureView,
        input: Option<&wgpu::TextureView>,
    ) {
        let scene = ctx.scene;
        self.last_outcome = self.lighting.execute(ctx, &scene);

        self.composite.render(
            ctx.gpu,
            ctx.encoder,
            input,
            self.lighting.volumetrics_view(),
            target,
        );
    }
}
