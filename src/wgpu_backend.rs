//! wgpu implementation of [`GraphicsBackend`].
//!
//! Draws are recorded into a single command encoder per frame. The host
//! calls [`WgpuBackend::begin_frame`] with the swapchain view and
//! [`WgpuBackend::finish_frame`] once everything has been recorded. Scene
//! content goes into the currently bound framebuffer through
//! [`WgpuBackend::begin_render_pass`].

use std::collections::HashMap;
use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use log::{debug, info, warn};
use wgpu::util::DeviceExt;

use crate::backend::{GraphicsBackend, ShaderVariant, TargetTexture, TextureFormat};
use crate::error::{VrError, VrResult};
use crate::mesh::{DistortionMesh, DistortionVertex};
use crate::viewport::Viewport;

/// Depth format of every render target.
pub const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth16Unorm;

// Warp uniforms
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct WarpUniforms {
    texture_coord_scale: f32,
    _padding: [f32; 3],
}

// Clear uniforms
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct ClearUniforms {
    color: [f32; 4],
}

const STANDARD_ATTRIBUTES: [wgpu::VertexAttribute; 3] = [
    wgpu::VertexAttribute {
        format: wgpu::VertexFormat::Float32x2,
        offset: DistortionVertex::POSITION_OFFSET as u64,
        shader_location: 0,
    },
    wgpu::VertexAttribute {
        format: wgpu::VertexFormat::Float32,
        offset: DistortionVertex::VIGNETTE_OFFSET as u64,
        shader_location: 1,
    },
    wgpu::VertexAttribute {
        format: wgpu::VertexFormat::Float32x2,
        offset: DistortionVertex::BLUE_UV_OFFSET as u64,
        shader_location: 2,
    },
];

const ABERRATION_ATTRIBUTES: [wgpu::VertexAttribute; 5] = [
    wgpu::VertexAttribute {
        format: wgpu::VertexFormat::Float32x2,
        offset: DistortionVertex::POSITION_OFFSET as u64,
        shader_location: 0,
    },
    wgpu::VertexAttribute {
        format: wgpu::VertexFormat::Float32,
        offset: DistortionVertex::VIGNETTE_OFFSET as u64,
        shader_location: 1,
    },
    wgpu::VertexAttribute {
        format: wgpu::VertexFormat::Float32x2,
        offset: DistortionVertex::RED_UV_OFFSET as u64,
        shader_location: 2,
    },
    wgpu::VertexAttribute {
        format: wgpu::VertexFormat::Float32x2,
        offset: DistortionVertex::GREEN_UV_OFFSET as u64,
        shader_location: 3,
    },
    wgpu::VertexAttribute {
        format: wgpu::VertexFormat::Float32x2,
        offset: DistortionVertex::BLUE_UV_OFFSET as u64,
        shader_location: 4,
    },
];

impl From<TextureFormat> for wgpu::TextureFormat {
    fn from(format: TextureFormat) -> Self {
        match format {
            TextureFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
            TextureFormat::Rgba8UnormSrgb => wgpu::TextureFormat::Rgba8UnormSrgb,
            TextureFormat::Bgra8Unorm => wgpu::TextureFormat::Bgra8Unorm,
            TextureFormat::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
        }
    }
}

/// A sampleable texture view.
#[derive(Clone)]
pub struct WgpuTexture {
    view: Arc<wgpu::TextureView>,
}

impl WgpuTexture {
    pub fn new(view: wgpu::TextureView) -> Self {
        Self {
            view: Arc::new(view),
        }
    }

    pub fn view(&self) -> &wgpu::TextureView {
        &self.view
    }
}

/// Offscreen color texture plus its depth attachment.
pub struct WgpuRenderTarget {
    color_texture: wgpu::Texture,
    color: WgpuTexture,
    depth_texture: wgpu::Texture,
    depth: Arc<wgpu::TextureView>,
    format: wgpu::TextureFormat,
    width: u32,
    height: u32,
}

impl WgpuRenderTarget {
    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

impl TargetTexture for WgpuRenderTarget {
    type Texture = WgpuTexture;

    fn texture(&self) -> &WgpuTexture {
        &self.color
    }
}

pub struct WgpuMesh {
    vertex_buffer: wgpu::Buffer,
    index_buffer: wgpu::Buffer,
    index_count: u32,
}

pub struct WgpuProgram {
    variant: ShaderVariant,
    pipeline: wgpu::RenderPipeline,
}

/// Color and optional depth attachment that draws are recorded into.
#[derive(Clone)]
pub struct WgpuFramebuffer {
    color: Arc<wgpu::TextureView>,
    depth: Option<Arc<wgpu::TextureView>>,
    format: wgpu::TextureFormat,
    width: u32,
    height: u32,
}

/// Converts a bottom-left origin rectangle to the top-left origin wgpu uses,
/// clamped to a `width` x `height` attachment. `None` if nothing is left.
fn to_target_rect(width: u32, height: u32, rect: Viewport) -> Option<(u32, u32, u32, u32)> {
    let (width, height) = (width as i32, height as i32);
    let left = rect.x.clamp(0, width);
    let right = rect.right().clamp(0, width);
    let top = (height - rect.top()).clamp(0, height);
    let bottom = (height - rect.y).clamp(0, height);
    if right <= left || bottom <= top {
        return None;
    }
    Some((left as u32, top as u32, (right - left) as u32, (bottom - top) as u32))
}

pub struct WgpuSavedState {
    framebuffer: Option<WgpuFramebuffer>,
    viewport: Option<Viewport>,
    scissor: Option<Viewport>,
}

pub struct WgpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    output_format: wgpu::TextureFormat,

    warp_bind_group_layout: wgpu::BindGroupLayout,
    warp_pipeline_layout: wgpu::PipelineLayout,
    sampler: wgpu::Sampler,

    clear_bind_group_layout: wgpu::BindGroupLayout,
    clear_pipeline_layout: wgpu::PipelineLayout,
    clear_shader: wgpu::ShaderModule,
    clear_pipelines: HashMap<(wgpu::TextureFormat, bool), wgpu::RenderPipeline>,

    encoder: Option<wgpu::CommandEncoder>,
    bound: Option<WgpuFramebuffer>,
    viewport: Option<Viewport>,
    scissor: Option<Viewport>,
}

impl WgpuBackend {
    /// Wraps an existing device. Warp programs render to `output_format`,
    /// normally the surface format.
    pub fn new(device: wgpu::Device, queue: wgpu::Queue, output_format: wgpu::TextureFormat) -> Self {
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        let warp_bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Warp Bind Group Layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::VERTEX,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });

        let warp_pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Warp Pipeline Layout"),
            bind_group_layouts: &[&warp_bind_group_layout],
            push_constant_ranges: &[],
        });

        let clear_bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Clear Bind Group Layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
        });

        let clear_pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Clear Pipeline Layout"),
            bind_group_layouts: &[&clear_bind_group_layout],
            push_constant_ranges: &[],
        });

        let clear_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Clear Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shaders/clear.wgsl").into()),
        });

        Self {
            device,
            queue,
            output_format,
            warp_bind_group_layout,
            warp_pipeline_layout,
            sampler,
            clear_bind_group_layout,
            clear_pipeline_layout,
            clear_shader,
            clear_pipelines: HashMap::new(),
            encoder: None,
            bound: None,
            viewport: None,
            scissor: None,
        }
    }

    /// Creates a device without a surface, for offscreen use.
    pub fn headless(output_format: wgpu::TextureFormat) -> VrResult<Self> {
        let instance = wgpu::Instance::default();
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .ok_or(VrError::NoAdapter)?;
        info!("Using adapter {:?}", adapter.get_info().name);

        let (device, queue) =
            pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor::default(), None))
                .map_err(|e| VrError::DeviceRequest(e.to_string()))?;
        Ok(Self::new(device, queue, output_format))
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    pub fn output_format(&self) -> wgpu::TextureFormat {
        self.output_format
    }

    /// Starts recording a frame that ends up in `view`.
    pub fn begin_frame(&mut self, view: wgpu::TextureView, width: u32, height: u32) {
        if self.encoder.is_some() {
            warn!("begin_frame called with an unfinished frame; submitting it first");
            self.finish_frame();
        }
        self.bound = Some(WgpuFramebuffer {
            color: Arc::new(view),
            depth: None,
            format: self.output_format,
            width,
            height,
        });
        self.viewport = None;
        self.scissor = None;
    }

    /// Submits everything recorded since [`begin_frame`](Self::begin_frame).
    pub fn finish_frame(&mut self) {
        if let Some(encoder) = self.encoder.take() {
            self.queue.submit(std::iter::once(encoder.finish()));
        }
        self.bound = None;
    }

    /// Opens a pass on the bound framebuffer with the current viewport and
    /// scissor applied. Scene pipelines must target the bound color format
    /// and, for render targets, [`DEPTH_FORMAT`].
    pub fn begin_render_pass(&mut self, label: &str) -> Option<wgpu::RenderPass<'_>> {
        let framebuffer = self.bound.clone()?;
        let encoder = encoder(&self.device, &mut self.encoder);
        let depth_ops = framebuffer.depth.as_ref().map(|_| wgpu::LoadOp::Load);
        let mut pass = begin_pass(encoder, &framebuffer, label, wgpu::LoadOp::Load, depth_ops);
        if !apply_rects(&mut pass, &framebuffer, self.viewport, self.scissor) {
            return None;
        }
        Some(pass)
    }

    fn ensure_clear_pipeline(&mut self, format: wgpu::TextureFormat, with_depth: bool) {
        let device = &self.device;
        let layout = &self.clear_pipeline_layout;
        let shader = &self.clear_shader;
        self.clear_pipelines
            .entry((format, with_depth))
            .or_insert_with(|| {
                debug!("Creating clear pipeline for {:?} (depth: {})", format, with_depth);
                device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                    label: Some("Clear Pipeline"),
                    layout: Some(layout),
                    vertex: wgpu::VertexState {
                        module: shader,
                        entry_point: Some("vs_main"),
                        buffers: &[],
                        compilation_options: Default::default(),
                    },
                    fragment: Some(wgpu::FragmentState {
                        module: shader,
                        entry_point: Some("fs_main"),
                        targets: &[Some(wgpu::ColorTargetState {
                            format,
                            blend: Some(wgpu::BlendState::REPLACE),
                            write_mask: wgpu::ColorWrites::ALL,
                        })],
                        compilation_options: Default::default(),
                    }),
                    primitive: wgpu::PrimitiveState::default(),
                    depth_stencil: with_depth.then(|| wgpu::DepthStencilState {
                        format: DEPTH_FORMAT,
                        depth_write_enabled: true,
                        depth_compare: wgpu::CompareFunction::Always,
                        stencil: wgpu::StencilState::default(),
                        bias: wgpu::DepthBiasState::default(),
                    }),
                    multisample: wgpu::MultisampleState::default(),
                    multiview: None,
                    cache: None,
                })
            });
    }

    fn covers_framebuffer(&self, framebuffer: &WgpuFramebuffer) -> bool {
        let (width, height) = (framebuffer.width, framebuffer.height);
        match self.scissor {
            None => true,
            Some(rect) => to_target_rect(width, height, rect) == Some((0, 0, width, height)),
        }
    }
}

fn encoder<'a>(
    device: &wgpu::Device,
    slot: &'a mut Option<wgpu::CommandEncoder>,
) -> &'a mut wgpu::CommandEncoder {
    slot.get_or_insert_with(|| {
        device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("VR Frame Encoder"),
        })
    })
}

fn begin_pass<'e>(
    encoder: &'e mut wgpu::CommandEncoder,
    framebuffer: &WgpuFramebuffer,
    label: &str,
    color_load: wgpu::LoadOp<wgpu::Color>,
    depth_load: Option<wgpu::LoadOp<f32>>,
) -> wgpu::RenderPass<'e> {
    let depth_stencil_attachment = match (&framebuffer.depth, depth_load) {
        (Some(view), Some(load)) => Some(wgpu::RenderPassDepthStencilAttachment {
            view,
            depth_ops: Some(wgpu::Operations {
                load,
                store: wgpu::StoreOp::Store,
            }),
            stencil_ops: None,
        }),
        _ => None,
    };
    encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
        label: Some(label),
        color_attachments: &[Some(wgpu::RenderPassColorAttachment {
            view: &framebuffer.color,
            resolve_target: None,
            ops: wgpu::Operations {
                load: color_load,
                store: wgpu::StoreOp::Store,
            },
        })],
        depth_stencil_attachment,
        timestamp_writes: None,
        occlusion_query_set: None,
    })
}

/// Applies viewport and scissor. WebGPU rejects viewports outside the
/// attachment, so both are clipped. Returns false when nothing is visible.
fn apply_rects(
    pass: &mut wgpu::RenderPass<'_>,
    framebuffer: &WgpuFramebuffer,
    viewport: Option<Viewport>,
    scissor: Option<Viewport>,
) -> bool {
    let (width, height) = (framebuffer.width, framebuffer.height);
    let viewport = viewport.unwrap_or(Viewport::full(width as i32, height as i32));
    let Some((x, y, w, h)) = to_target_rect(width, height, viewport) else {
        return false;
    };
    pass.set_viewport(x as f32, y as f32, w as f32, h as f32, 0.0, 1.0);
    if let Some(rect) = scissor {
        match to_target_rect(width, height, rect) {
            Some((x, y, w, h)) => pass.set_scissor_rect(x, y, w, h),
            None => return false,
        }
    }
    true
}

impl GraphicsBackend for WgpuBackend {
    type Texture = WgpuTexture;
    type RenderTarget = WgpuRenderTarget;
    type Mesh = WgpuMesh;
    type Program = WgpuProgram;
    type Framebuffer = Option<WgpuFramebuffer>;
    type SavedState = WgpuSavedState;

    fn max_texture_size(&self) -> u32 {
        self.device.limits().max_texture_dimension_2d
    }

    fn create_render_target(
        &mut self,
        width: u32,
        height: u32,
        format: TextureFormat,
    ) -> VrResult<WgpuRenderTarget> {
        let format: wgpu::TextureFormat = format.into();
        let size = wgpu::Extent3d {
            width: width.max(1),
            height: height.max(1),
            depth_or_array_layers: 1,
        };

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let color_texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Offscreen Texture"),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        });
        let depth_texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Offscreen Depth"),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: DEPTH_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });
        if let Some(error) = pollster::block_on(self.device.pop_error_scope()) {
            color_texture.destroy();
            depth_texture.destroy();
            return Err(VrError::IncompleteFramebuffer(error.to_string()));
        }

        let color = WgpuTexture::new(color_texture.create_view(&wgpu::TextureViewDescriptor::default()));
        let depth = Arc::new(depth_texture.create_view(&wgpu::TextureViewDescriptor::default()));
        debug!("Created {}x{} {:?} render target", size.width, size.height, format);
        Ok(WgpuRenderTarget {
            color_texture,
            color,
            depth_texture,
            depth,
            format,
            width: size.width,
            height: size.height,
        })
    }

    fn destroy_render_target(&mut self, target: WgpuRenderTarget) {
        target.color_texture.destroy();
        target.depth_texture.destroy();
    }

    fn create_mesh(&mut self, mesh: &DistortionMesh) -> VrResult<WgpuMesh> {
        let vertex_buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Distortion Vertex Buffer"),
            contents: mesh.vertex_bytes(),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let index_buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Distortion Index Buffer"),
            contents: mesh.index_bytes(),
            usage: wgpu::BufferUsages::INDEX,
        });
        Ok(WgpuMesh {
            vertex_buffer,
            index_buffer,
            index_count: mesh.indices.len() as u32,
        })
    }

    fn destroy_mesh(&mut self, mesh: WgpuMesh) {
        mesh.vertex_buffer.destroy();
        mesh.index_buffer.destroy();
    }

    fn compile_program(&mut self, variant: ShaderVariant) -> VrResult<WgpuProgram> {
        let (source, attributes): (&str, &[wgpu::VertexAttribute]) = match variant {
            ShaderVariant::Standard => (include_str!("shaders/distortion.wgsl"), &STANDARD_ATTRIBUTES),
            ShaderVariant::AberrationCorrected => (
                include_str!("shaders/distortion_aberration.wgsl"),
                &ABERRATION_ATTRIBUTES,
            ),
        };

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let shader = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Distortion Shader"),
            source: wgpu::ShaderSource::Wgsl(source.into()),
        });
        let pipeline = self.device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Distortion Pipeline"),
            layout: Some(&self.warp_pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_main"),
                buffers: &[wgpu::VertexBufferLayout {
                    array_stride: DistortionVertex::STRIDE as u64,
                    step_mode: wgpu::VertexStepMode::Vertex,
                    attributes,
                }],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: self.output_format,
                    blend: Some(wgpu::BlendState::REPLACE),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleStrip,
                strip_index_format: Some(wgpu::IndexFormat::Uint16),
                ..Default::default()
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });
        if let Some(error) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(VrError::ShaderCompilation {
                variant: variant.label(),
                reason: error.to_string(),
            });
        }
        debug!("Compiled {} warp program", variant.label());
        Ok(WgpuProgram { variant, pipeline })
    }

    fn destroy_program(&mut self, program: WgpuProgram) {
        debug!("Releasing {} warp program", program.variant.label());
    }

    fn current_framebuffer(&self) -> Option<WgpuFramebuffer> {
        self.bound.clone()
    }

    fn bind_render_target(&mut self, target: &WgpuRenderTarget) {
        self.bound = Some(WgpuFramebuffer {
            color: target.color.view.clone(),
            depth: Some(target.depth.clone()),
            format: target.format,
            width: target.width,
            height: target.height,
        });
    }

    fn bind_framebuffer(&mut self, framebuffer: &Option<WgpuFramebuffer>) {
        self.bound = framebuffer.clone();
    }

    fn set_viewport(&mut self, viewport: Viewport) {
        self.viewport = Some(viewport);
    }

    fn set_scissor(&mut self, scissor: Option<Viewport>) {
        self.scissor = scissor;
    }

    fn clear(&mut self, color: [f32; 4]) {
        let Some(framebuffer) = self.bound.clone() else {
            warn!("clear with no framebuffer bound");
            return;
        };

        if self.covers_framebuffer(&framebuffer) {
            let encoder = encoder(&self.device, &mut self.encoder);
            let clear_color = wgpu::Color {
                r: color[0] as f64,
                g: color[1] as f64,
                b: color[2] as f64,
                a: color[3] as f64,
            };
            begin_pass(
                encoder,
                &framebuffer,
                "Clear Pass",
                wgpu::LoadOp::Clear(clear_color),
                Some(wgpu::LoadOp::Clear(1.0)),
            );
            return;
        }

        let with_depth = framebuffer.depth.is_some();
        self.ensure_clear_pipeline(framebuffer.format, with_depth);
        let Some(pipeline) = self.clear_pipelines.get(&(framebuffer.format, with_depth)) else {
            return;
        };
        let uniforms = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Clear Uniforms"),
            contents: bytemuck::bytes_of(&ClearUniforms { color }),
            usage: wgpu::BufferUsages::UNIFORM,
        });
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Clear Bind Group"),
            layout: &self.clear_bind_group_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: uniforms.as_entire_binding(),
            }],
        });

        let encoder = encoder(&self.device, &mut self.encoder);
        let depth_load = with_depth.then_some(wgpu::LoadOp::Load);
        let mut pass = begin_pass(encoder, &framebuffer, "Scissored Clear Pass", wgpu::LoadOp::Load, depth_load);
        // The clear covers the scissor rectangle, not the viewport.
        if !apply_rects(&mut pass, &framebuffer, None, self.scissor) {
            return;
        }
        pass.set_pipeline(pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.draw(0..3, 0..1);
    }

    fn draw_mesh(
        &mut self,
        program: &WgpuProgram,
        mesh: &WgpuMesh,
        texture: &WgpuTexture,
        texture_coord_scale: f32,
    ) {
        let Some(framebuffer) = self.bound.clone() else {
            warn!("draw_mesh with no framebuffer bound");
            return;
        };

        let uniforms = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Warp Uniforms"),
            contents: bytemuck::bytes_of(&WarpUniforms {
                texture_coord_scale,
                _padding: [0.0; 3],
            }),
            usage: wgpu::BufferUsages::UNIFORM,
        });
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Warp Bind Group"),
            layout: &self.warp_bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: wgpu::BindingResource::TextureView(texture.view()) },
                wgpu::BindGroupEntry { binding: 1, resource: wgpu::BindingResource::Sampler(&self.sampler) },
                wgpu::BindGroupEntry { binding: 2, resource: uniforms.as_entire_binding() },
            ],
        });

        let encoder = encoder(&self.device, &mut self.encoder);
        let mut pass = begin_pass(encoder, &framebuffer, "Warp Pass", wgpu::LoadOp::Load, None);
        if !apply_rects(&mut pass, &framebuffer, self.viewport, self.scissor) {
            return;
        }
        pass.set_pipeline(&program.pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.set_vertex_buffer(0, mesh.vertex_buffer.slice(..));
        pass.set_index_buffer(mesh.index_buffer.slice(..), wgpu::IndexFormat::Uint16);
        pass.draw_indexed(0..mesh.index_count, 0, 0..1);
    }

    fn save_state(&mut self) -> WgpuSavedState {
        WgpuSavedState {
            framebuffer: self.bound.clone(),
            viewport: self.viewport,
            scissor: self.scissor,
        }
    }

    fn restore_state(&mut self, state: WgpuSavedState) {
        self.bound = state.framebuffer;
        self.viewport = state.viewport;
        self.scissor = state.scissor;
    }
}
