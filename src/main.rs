use std::sync::Arc;
use std::time::Instant;
use winit::application::ApplicationHandler;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::{Window, WindowId};

use godrays::{
    Camera, GpuContext, Quat, RenderContext, RenderGraph, RenderNode, SceneFrame, SpotLight,
    Transform, Vec3, VolumetricError, VolumetricNode, VolumetricSettings, World,
};

/// Clears the frame to a dark sky; stands in for a real scene pass.
struct SkyNode;

impl RenderNode for SkyNode {
    fn execute(
        &mut self,
        ctx: &mut RenderContext,
        target: &wgpu::TextureView,
        _input: Option<&wgpu::TextureView>,
    ) {
        ctx.encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Sky Pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: target,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color {
                        r: 0.01,
                        g: 0.012,
                        b: 0.02,
                        a: 1.0,
                    }),
                    store: wgpu::StoreOp::Store,
                },
                depth_slice: None,
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
    }
}

/// Swings a light around its resting direction.
struct Sweep {
    rest: Vec3,
    speed: f32,
    phase: f32,
}

/// Scene depth at the far plane everywhere (no geometry in the demo).
fn far_plane_depth(gpu: &GpuContext) -> (wgpu::Texture, wgpu::TextureView) {
    let texture = gpu.device.create_texture(&wgpu::TextureDescriptor {
        label: Some("Demo Depth"),
        size: wgpu::Extent3d {
            width: gpu.width(),
            height: gpu.height(),
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: wgpu::TextureFormat::Depth32Float,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
        view_formats: &[],
    });
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

    let mut encoder = gpu
        .device
        .create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Demo Depth Clear"),
        });
    encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
        label: Some("Demo Depth Clear"),
        color_attachments: &[],
        depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
            view: &view,
            depth_ops: Some(wgpu::Operations {
                load: wgpu::LoadOp::Clear(1.0),
                store: wgpu::StoreOp::Store,
            }),
            stencil_ops: None,
        }),
        timestamp_writes: None,
        occlusion_query_set: None,
    });
    gpu.queue.submit(std::iter::once(encoder.finish()));
    (texture, view)
}

struct Demo {
    gpu: GpuContext,
    graph: RenderGraph,
    world: World,
    depth: (wgpu::Texture, wgpu::TextureView),
}

impl Demo {
    fn new(window: Arc<Window>) -> godrays::Result<Self> {
        let gpu = GpuContext::new(window)?;

        let settings = VolumetricSettings::default().scale(0.5).intensity(1.2);
        let graph = RenderGraph::builder()
            .node(SkyNode)
            .node(VolumetricNode::new(&gpu, settings)?)
            .build(&gpu);

        let mut world = World::new();
        let colors = [
            Vec3::new(1.0, 0.8, 0.55),
            Vec3::new(0.55, 0.7, 1.0),
            Vec3::new(0.9, 0.45, 0.8),
        ];
        for (i, color) in colors.into_iter().enumerate() {
            let x = (i as f32 - 1.0) * 6.0;
            let rest = Vec3::new(-x * 0.1, -1.0, 0.2).normalize();
            world.spawn((
                Transform::from_position(Vec3::new(x, 8.0, 0.0)).looking_to(rest),
                SpotLight::new()
                    .color(color)
                    .intensity(2.0)
                    .cone_degrees(8.0, 20.0)
                    .range(18.0)
                    .medium(0.8, 0.05),
                Sweep {
                    rest,
                    speed: 0.4 + i as f32 * 0.15,
                    phase: i as f32 * 2.1,
                },
            ));
        }

        let depth = far_plane_depth(&gpu);

        Ok(Self {
            gpu,
            graph,
            world,
            depth,
        })
    }

    fn resize(&mut self, width: u32, height: u32) {
        self.gpu.resize(width, height);
        self.depth = far_plane_depth(&self.gpu);
    }

    fn render(&mut self, time: f32) -> godrays::Result<()> {
        for (_, (transform, sweep)) in self.world.query_mut::<(&mut Transform, &Sweep)>() {
            let angle = (time * sweep.speed + sweep.phase).sin() * 0.35;
            let direction = Quat::from_rotation_z(angle) * sweep.rest;
            *transform = transform.looking_to(direction);
        }

        let orbit = time * 0.1;
        let camera = Camera::new()
            .at(orbit.sin() * 16.0, 3.0, orbit.cos() * 16.0)
            .looking_at(0.0, 3.0, 0.0);

        let scene = SceneFrame {
            world: &self.world,
            depth: Some(&self.depth.1),
            shadows: None,
        };
        self.graph.execute(&self.gpu, time, &camera, scene)
    }
}

struct App {
    window: Option<Arc<Window>>,
    demo: Option<Demo>,
    start_time: Instant,
}

impl Default for App {
    fn default() -> Self {
        Self {
            window: None,
            demo: None,
            start_time: Instant::now(),
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        let attributes = Window::default_attributes().with_title("godrays");
        let window = match event_loop.create_window(attributes) {
            Ok(window) => Arc::new(window),
            Err(err) => {
                log::error!("Failed to create window: {err}");
                event_loop.exit();
                return;
            }
        };

        match Demo::new(window.clone()) {
            Ok(demo) => self.demo = Some(demo),
            Err(err) => {
                log::error!("{err}");
                event_loop.exit();
                return;
            }
        }
        self.window = Some(window);
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                if let Some(demo) = &mut self.demo {
                    demo.resize(size.width, size.height);
                }
            }
            WindowEvent::RedrawRequested => {
                if let Some(demo) = &mut self.demo {
                    let time = self.start_time.elapsed().as_secs_f32();
                    match demo.render(time) {
                        Ok(()) => {}
                        Err(VolumetricError::SurfaceAcquireFailed(
                            wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated,
                        )) => {
                            let (width, height) = (demo.gpu.width(), demo.gpu.height());
                            demo.resize(width, height);
                        }
                        Err(err) => log::warn!("Frame dropped: {err}"),
                    }
                }

                if let Some(window) = &self.window {
                    window.request_redraw();
                }
            }
            _ => (),
        }
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let event_loop = match EventLoop::new() {
        Ok(event_loop) => event_loop,
        Err(err) => {
            log::error!("Failed to create event loop: {err}");
            return;
        }
    };
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App::default();
    if let Err(err) = event_loop.run_app(&mut app) {
        log::error!("{err}");
    }
}
