use glam::Vec3;
use tracing::warn;
use wgpu::*;

use crate::model::{Camera, Scene};
use crate::utils::{Mesh, MeshBuffer, Vertex};

use super::gpu_init::GpuContext;
use super::ui::{build_ui, OverlayState};
use super::FrameRenderer;

const DEPTH_FORMAT: TextureFormat = TextureFormat::Depth32Float;

#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct CameraUniform {
    pub view_proj: [[f32; 4]; 4],
}

#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct LightingUniform {
    pub sun_dir: [f32; 3],
    pub sun_intensity: f32,
    pub ambient: f32,
    pub _pad1: f32,
    pub _pad2: f32,
    pub _pad3: f32,
}

impl Default for LightingUniform {
    fn default() -> Self {
        Self {
            sun_dir: Vec3::new(-0.4, -1.0, -0.3).normalize().to_array(),
            sun_intensity: 0.8,
            ambient: 0.35,
            _pad1: 0.0,
            _pad2: 0.0,
            _pad3: 0.0,
        }
    }
}

// Shared graphics setup used by native and web
pub struct CameraResources {
    pub camera_buffer: Buffer,
    pub lighting_buffer: Buffer,
    pub bind_group_layout: BindGroupLayout,
    pub camera_bind_group: BindGroup,
}

pub fn create_depth_texture(device: &Device, width: u32, height: u32) -> (Texture, TextureView) {
    let depth_texture = device.create_texture(&TextureDescriptor {
        label: Some("depth_texture"),
        size: Extent3d { width: width.max(1), height: height.max(1), depth_or_array_layers: 1 },
        mip_level_count: 1,
        sample_count: 1,
        dimension: TextureDimension::D2,
        format: DEPTH_FORMAT,
        usage: TextureUsages::RENDER_ATTACHMENT,
        view_formats: &[],
    });
    let depth_view = depth_texture.create_view(&TextureViewDescriptor::default());
    (depth_texture, depth_view)
}

pub fn create_camera_resources(device: &Device) -> CameraResources {
    let camera_buffer = device.create_buffer(&BufferDescriptor {
        label: Some("camera_buffer"),
        size: std::mem::size_of::<CameraUniform>() as BufferAddress,
        usage: BufferUsages::UNIFORM | BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });
    let lighting_buffer = device.create_buffer(&BufferDescriptor {
        label: Some("lighting_buffer"),
        size: std::mem::size_of::<LightingUniform>() as BufferAddress,
        usage: BufferUsages::UNIFORM | BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });

    let uniform_entry = |binding, visibility| BindGroupLayoutEntry {
        binding,
        visibility,
        ty: BindingType::Buffer {
            ty: BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    };
    let bind_group_layout = device.create_bind_group_layout(&BindGroupLayoutDescriptor {
        label: Some("camera_bind_group_layout"),
        entries: &[
            uniform_entry(0, ShaderStages::VERTEX),
            uniform_entry(1, ShaderStages::FRAGMENT),
        ],
    });

    let camera_bind_group = device.create_bind_group(&BindGroupDescriptor {
        label: Some("camera_bind_group"),
        layout: &bind_group_layout,
        entries: &[
            BindGroupEntry { binding: 0, resource: camera_buffer.as_entire_binding() },
            BindGroupEntry { binding: 1, resource: lighting_buffer.as_entire_binding() },
        ],
    });

    CameraResources { camera_buffer, lighting_buffer, bind_group_layout, camera_bind_group }
}

pub fn create_scene_pipeline(device: &Device, format: TextureFormat, bind_group_layout: &BindGroupLayout) -> RenderPipeline {
    let shader = device.create_shader_module(ShaderModuleDescriptor {
        label: Some("scene_shader"),
        source: ShaderSource::Wgsl(include_str!("shaders/scene.wgsl").into()),
    });

    let pipeline_layout = device.create_pipeline_layout(&PipelineLayoutDescriptor {
        label: Some("scene_pipeline_layout"),
        bind_group_layouts: &[bind_group_layout],
        push_constant_ranges: &[],
    });

    device.create_render_pipeline(&RenderPipelineDescriptor {
        label: Some("scene_pipeline"),
        layout: Some(&pipeline_layout),
        vertex: VertexState {
            module: &shader,
            entry_point: Some("vs_main"),
            buffers: &[VertexBufferLayout {
                array_stride: std::mem::size_of::<Vertex>() as BufferAddress,
                step_mode: VertexStepMode::Vertex,
                attributes: &[
                    VertexAttribute { offset: 0, shader_location: 0, format: VertexFormat::Float32x3 },
                    VertexAttribute { offset: 12, shader_location: 1, format: VertexFormat::Float32x3 },
                    VertexAttribute { offset: 24, shader_location: 2, format: VertexFormat::Float32x4 },
                ],
            }],
            compilation_options: Default::default(),
        },
        fragment: Some(FragmentState {
            module: &shader,
            entry_point: Some("fs_main"),
            targets: &[Some(ColorTargetState {
                format,
                blend: Some(BlendState::ALPHA_BLENDING),
                write_mask: ColorWrites::ALL,
            })],
            compilation_options: Default::default(),
        }),
        primitive: PrimitiveState {
            topology: PrimitiveTopology::TriangleList,
            strip_index_format: None,
            front_face: FrontFace::Ccw,
            // procedural meshes do not all share one winding
            cull_mode: None,
            polygon_mode: PolygonMode::Fill,
            unclipped_depth: false,
            conservative: false,
        },
        depth_stencil: Some(DepthStencilState {
            format: DEPTH_FORMAT,
            depth_write_enabled: true,
            depth_compare: CompareFunction::Less,
            stencil: StencilState::default(),
            bias: DepthBiasState::default(),
        }),
        multisample: MultisampleState { count: 1, mask: !0, alpha_to_coverage_enabled: false },
        multiview: None,
        cache: None,
    })
}

/// Flat-shaded scene plus egui overlay on one surface.
pub struct SceneRenderer {
    gpu: GpuContext,
    pixels_per_point: f32,
    depth_view: TextureView,
    camera: CameraResources,
    pipeline: RenderPipeline,
    mesh_buffer: MeshBuffer,
    lighting: LightingUniform,
    egui_ctx: egui::Context,
    egui_renderer: egui_wgpu::Renderer,
    raw_input: egui::RawInput,
    platform_output: Option<egui::PlatformOutput>,
}

impl SceneRenderer {
    pub fn new(gpu: GpuContext, pixels_per_point: f32) -> Self {
        let (_, depth_view) = create_depth_texture(&gpu.device, gpu.config.width, gpu.config.height);
        let camera = create_camera_resources(&gpu.device);
        let pipeline = create_scene_pipeline(&gpu.device, gpu.format, &camera.bind_group_layout);
        let mesh_buffer = MeshBuffer::new(&gpu.device);
        let egui_renderer = egui_wgpu::Renderer::new(gpu.device.as_ref(), gpu.format, egui_wgpu::RendererOptions::default());

        Self {
            gpu,
            pixels_per_point,
            depth_view,
            camera,
            pipeline,
            mesh_buffer,
            lighting: LightingUniform::default(),
            egui_ctx: egui::Context::default(),
            egui_renderer,
            raw_input: egui::RawInput::default(),
            platform_output: None,
        }
    }

    pub fn size(&self) -> (u32, u32) {
        (self.gpu.config.width, self.gpu.config.height)
    }

    pub fn resize(&mut self, width: u32, height: u32, pixels_per_point: f32) {
        if width == 0 || height == 0 {
            return;
        }
        self.pixels_per_point = pixels_per_point;
        if (width, height) == self.size() {
            return;
        }
        self.gpu.config.width = width;
        self.gpu.config.height = height;
        self.gpu.surface.configure(&self.gpu.device, &self.gpu.config);
        self.depth_view = create_depth_texture(&self.gpu.device, width, height).1;
    }

    pub fn egui_ctx(&self) -> &egui::Context {
        &self.egui_ctx
    }

    /// Input for the next overlay pass.
    pub fn set_egui_input(&mut self, raw_input: egui::RawInput) {
        self.raw_input = raw_input;
    }

    /// Platform side effects requested by the last overlay pass.
    pub fn take_platform_output(&mut self) -> Option<egui::PlatformOutput> {
        self.platform_output.take()
    }

    fn acquire(&self) -> Result<SurfaceTexture, SurfaceError> {
        match self.gpu.surface.get_current_texture() {
            Err(SurfaceError::Lost | SurfaceError::Outdated) => {
                self.gpu.surface.configure(&self.gpu.device, &self.gpu.config);
                self.gpu.surface.get_current_texture()
            }
            other => other,
        }
    }

    fn draw(&mut self, scene: &Scene, camera: &Camera, overlay: &mut OverlayState) -> Result<(), SurfaceError> {
        let device = self.gpu.device.clone();
        let queue = self.gpu.queue.clone();
        let (width, height) = self.size();

        let uniform = CameraUniform { view_proj: camera.view_proj().to_cols_array_2d() };
        queue.write_buffer(&self.camera.camera_buffer, 0, bytemuck::bytes_of(&uniform));
        queue.write_buffer(&self.camera.lighting_buffer, 0, bytemuck::bytes_of(&self.lighting));

        let mut mesh = Mesh::empty();
        for (world, instance) in scene.visible_meshes() {
            mesh.push_instance(world, instance);
        }
        self.mesh_buffer.write(&device, &queue, &mesh);

        // overlay
        let mut raw_input = std::mem::take(&mut self.raw_input);
        raw_input
            .viewports
            .entry(raw_input.viewport_id)
            .or_default()
            .native_pixels_per_point
            .get_or_insert(self.pixels_per_point);
        raw_input.screen_rect = Some(egui::Rect::from_min_size(
            egui::Pos2::ZERO,
            egui::vec2(width as f32 / self.pixels_per_point, height as f32 / self.pixels_per_point),
        ));
        let full_output = build_ui(&self.egui_ctx, raw_input, overlay);
        let primitives = self.egui_ctx.tessellate(full_output.shapes, full_output.pixels_per_point);
        self.platform_output = Some(full_output.platform_output);
        let screen_descriptor = egui_wgpu::ScreenDescriptor {
            size_in_pixels: [width, height],
            pixels_per_point: full_output.pixels_per_point,
        };

        let frame = self.acquire()?;
        let view = frame.texture.create_view(&TextureViewDescriptor::default());
        let mut encoder = device.create_command_encoder(&CommandEncoderDescriptor { label: Some("encoder") });

        {
            let mut rp = encoder.begin_render_pass(&RenderPassDescriptor {
                label: Some("scene_pass"),
                color_attachments: &[Some(RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    ops: Operations {
                        load: LoadOp::Clear(Color { r: 0.53, g: 0.81, b: 0.92, a: 1.0 }),
                        store: StoreOp::Store,
                    },
                    depth_slice: None,
                })],
                depth_stencil_attachment: Some(RenderPassDepthStencilAttachment {
                    view: &self.depth_view,
                    depth_ops: Some(Operations { load: LoadOp::Clear(1.0), store: StoreOp::Store }),
                    stencil_ops: None,
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            let buffer = &self.mesh_buffer;
            if !buffer.is_empty() {
                rp.set_pipeline(&self.pipeline);
                rp.set_bind_group(0, &self.camera.camera_bind_group, &[]);
                rp.set_vertex_buffer(0, buffer.vertex_buffer.slice(..));
                rp.set_index_buffer(buffer.index_buffer.slice(..), IndexFormat::Uint32);
                rp.draw_indexed(0..buffer.index_count, 0, 0..1);
            }
        }

        for (id, image_delta) in &full_output.textures_delta.set {
            self.egui_renderer.update_texture(&device, &queue, *id, image_delta);
        }
        self.egui_renderer
            .update_buffers(&device, &queue, &mut encoder, &primitives, &screen_descriptor);

        {
            let egui_pass = encoder.begin_render_pass(&RenderPassDescriptor {
                label: Some("egui_render_pass"),
                color_attachments: &[Some(RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    ops: Operations { load: LoadOp::Load, store: StoreOp::Store },
                    depth_slice: None,
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            self.egui_renderer
                .render(&mut egui_pass.forget_lifetime(), &primitives, &screen_descriptor);
        }

        for id in &full_output.textures_delta.free {
            self.egui_renderer.free_texture(id);
        }

        queue.submit(std::iter::once(encoder.finish()));
        frame.present();
        Ok(())
    }
}

impl FrameRenderer for SceneRenderer {
    fn render(&mut self, scene: &Scene, camera: &Camera, overlay: &mut OverlayState) {
        if let Err(err) = self.draw(scene, camera, overlay) {
            warn!("skipping frame: {err}");
        }
    }

    fn resize(&mut self, width: u32, height: u32, pixel_ratio: f32) {
        SceneRenderer::resize(self, width, height, pixel_ratio);
    }
}
