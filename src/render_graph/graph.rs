//! The main render graph and builder for composing render pipelines.

use crate::camera::Camera;
use crate::error::{Result, VolumetricError};
use crate::gpu::GpuContext;
use crate::render_graph::{RenderContext, RenderNode, RenderTarget, SceneFrame};

/// Builder for constructing render graphs with a fluent API.
///
/// Nodes are executed in the order they are added. The first node receives no
/// input (`input` is `None`), while subsequent nodes receive the previous
/// node's output. The final node renders directly to the screen.
///
/// ```ignore
/// let graph = RenderGraph::builder()
///     .node(scene_node)                              // First: render scene color
///     .node(VolumetricNode::new(&gpu, settings)?)    // Then: add light shafts
///     .build(&gpu);
/// ```
pub struct RenderGraphBuilder {
    nodes: Vec<Box<dyn RenderNode>>,
}

impl RenderGraphBuilder {
    /// Creates a new empty render graph builder.
    pub fn new() -> Self {
        Self { nodes: Vec::new() }
    }

    /// Adds a render node to the graph.
    pub fn node<N: RenderNode + 'static>(mut self, node: N) -> Self {
        self.nodes.push(Box::new(node));
        self
    }

    /// Builds the render graph, allocating ping-pong buffers at the current
    /// surface size.
    pub fn build(self, gpu: &GpuContext) -> RenderGraph {
        let target_a = RenderTarget::new(gpu, "RenderGraph Target A");
        let target_b = RenderTarget::new(gpu, "RenderGraph Target B");

        RenderGraph {
            nodes: self.nodes,
            target_a,
            target_b,
        }
    }
}

impl Default for RenderGraphBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A linear chain of render passes.
///
/// For multi-pass rendering the graph uses two intermediate render targets
/// (ping-pong buffers). Each pass alternates between reading from one buffer
/// and writing to the other, with the final pass writing directly to the screen.
///
/// ```text
/// Pass 0: None → Target A
/// Pass 1: Target A → Target B
/// Pass 2: Target B → Screen
/// ```
///
/// For single-node graphs, no intermediate buffers are used.
pub struct RenderGraph {
    nodes: Vec<Box<dyn RenderNode>>,
    target_a: RenderTarget,
    target_b: RenderTarget,
}

impl RenderGraph {
    /// Creates a new render graph builder.
    pub fn builder() -> RenderGraphBuilder {
        RenderGraphBuilder::new()
    }

    /// Adds a node to an existing render graph.
    pub fn with_node<N: RenderNode + 'static>(mut self, node: N, gpu: &GpuContext) -> Self {
        self.nodes.push(Box::new(node));
        self.target_a.ensure_size(gpu, "RenderGraph Target A");
        self.target_b.ensure_size(gpu, "RenderGraph Target B");
        self
    }

    /// Executes the render graph and presents to the surface.
    ///
    /// Fails only when the context is headless or the next surface texture
    /// cannot be acquired; node execution itself never fails.
    pub fn execute(
        &mut self,
        gpu: &GpuContext,
        time: f32,
        camera: &Camera,
        scene: SceneFrame,
    ) -> Result<()> {
        let surface = gpu.surface.as_ref().ok_or(VolumetricError::NoSurface)?;
        let output = surface.get_current_texture()?;
        let screen_view = output
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());

        self.execute_to_target(gpu, time, camera, scene, &screen_view);

        output.present();
        Ok(())
    }

    /// Executes the render graph into an arbitrary target texture.
    ///
    /// Used by headless hosts and for capturing a frame. Does not present.
    pub fn execute_to_target(
        &mut self,
        gpu: &GpuContext,
        time: f32,
        camera: &Camera,
        scene: SceneFrame,
        target: &wgpu::TextureView,
    ) {
        self.target_a.ensure_size(gpu, "RenderGraph Target A");
        self.target_b.ensure_size(gpu, "RenderGraph Target B");

        let mut encoder = gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("RenderGraph Encoder"),
            });

        let node_count = self.nodes.len();

        {
            let mut ctx = RenderContext {
                gpu,
                encoder: &mut encoder,
                time,
                camera,
                scene,
            };

            let mut current_input: Option<&wgpu::TextureView> = None;

            for (i, node) in self.nodes.iter_mut().enumerate() {
                let is_last = i == node_count - 1;

                let node_target = if is_last {
                    target
                } else if i % 2 == 0 {
                    &self.target_a.view
                } else {
                    &self.target_b.view
                };

                node.execute(&mut ctx, node_target, current_input);

                if !is_last {
                    current_input = Some(node_target);
                }
            }
        }

        gpu.queue.submit(std::iter::once(encoder.finish()));
    }
}
