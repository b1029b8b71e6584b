//! Linear render graph hosting the volumetric chain.
//!
//! Nodes run in insertion order with automatic ping-pong buffer management.
//! Each pass reads the previous pass's output and writes to its own render
//! target; the last one writes to the screen.
//!
//! ```text
//! ┌─────────────┐    ┌────────────────┐    ┌─────────────┐
//! │ Scene node  │───▶│ VolumetricNode │───▶│   Screen    │
//! │ (host)      │    │ (+ composite)  │    │  (Final)    │
//! └─────────────┘    └────────────────┘    └─────────────┘
//!       │
//!       ▼
//!   Target A
//! ```
//!
//! Per-frame scene inputs (light world, depth, shadow atlas) travel in
//! [`SceneFrame`] inside the [`RenderContext`].
//!
//! # Example
//!
//! ```ignore
//! use godrays::{RenderGraph, SceneFrame, VolumetricNode, VolumetricSettings};
//!
//! let mut graph = RenderGraph::builder()
//!     .node(scene_node)
//!     .node(VolumetricNode::new(&gpu, VolumetricSettings::default())?)
//!     .build(&gpu);
//!
//! // In render loop:
//! let scene = SceneFrame { world: &world, depth: Some(&depth_view), shadows: None };
//! graph.execute(&gpu, time, &camera, scene)?;
//! ```

mod graph;
mod render_node;
mod render_target;
mod volumetric_node;

pub use graph::{RenderGraph, RenderGraphBuilder};
pub use render_node::RenderNode;
pub use render_target::{RenderContext, RenderTarget, SceneFrame, scaled_extent};
pub use volumetric_node::VolumetricNode;
