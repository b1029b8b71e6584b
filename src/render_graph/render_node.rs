//! The core render node trait for the render graph.

use crate::render_graph::RenderContext;

/// Trait for render graph nodes that can execute rendering operations.
///
/// Implement this trait to create custom render passes that integrate with the
/// render graph system. Each node receives the previous pass's output (if any)
/// and writes to a target texture view.
///
/// # Execution Flow
///
/// 1. `execute()` is called in sequence, with ping-pong buffer management
/// 2. The final node renders directly to the screen (or the caller's target)
///
/// # Implementing Custom Nodes
///
/// ```ignore
/// struct ClearNode {
///     color: wgpu::Color,
/// }
///
/// impl RenderNode for ClearNode {
///     fn execute(
///         &mut self,
///         ctx: &mut RenderContext,
///         target: &wgpu::TextureView,
///         _input: Option<&wgpu::TextureView>,
///     ) {
///         ctx.encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
///             color_attachments: &[Some(wgpu::RenderPassColorAttachment {
///                 view: target,
///                 ops: wgpu::Operations {
///                     load: wgpu::LoadOp::Clear(self.color),
///                     store: wgpu::StoreOp::Store,
///                 },
///                 // ...
///             })],
///             // ...
///         });
///     }
/// }
/// ```
pub trait RenderNode {
    /// Executes this node's rendering operations.
    ///
    /// # Arguments
    ///
    /// * `ctx` - Render context with GPU access, encoder, time, camera and scene inputs
    /// * `target` - Texture view to render into (either intermediate buffer or screen)
    /// * `input` - Previous pass output, or `None` for the first node in the graph
    ///
    /// Nodes must tolerate a missing `input` and render something valid anyway.
    fn execute(
        &mut self,
        ctx: &mut RenderContext,
        target: &wgpu::TextureView,
        input: Option<&wgpu::TextureView>,
    );
}
