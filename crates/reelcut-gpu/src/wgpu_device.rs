//! [`GraphicsDevice`] on wgpu.
//!
//! Surfaces are offscreen render targets: the window surface is read back
//! after every draw and handed to the encoder, the pbuffer only exists so a
//! surface is bound while frames are uploaded.

use bytemuck::{Pod, Zeroable};
use glam::Mat4;
use reelcut_core::{FrameBuffer, ReelError, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::device::{
    ConfigHandle, ContextHandle, GraphicsDevice, HandleAllocator, ProgramHandle, SurfaceHandle,
    SurfaceKind, TextureHandle,
};

const SURFACE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;
/// wgpu requires buffer copies to align rows to 256 bytes.
const COPY_ROW_ALIGNMENT: u32 = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct Uniforms {
    tex_matrix: [f32; 16],
}

/// Device and queue for one context.
struct GpuContext {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
}

impl GpuContext {
    async fn request(adapter: &wgpu::Adapter) -> Result<Self> {
        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Reelcut Export Device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::downlevel_defaults()
                        .using_resolution(adapter.limits()),
                    memory_hints: wgpu::MemoryHints::Performance,
                },
                None,
            )
            .await
            .map_err(|e| ReelError::Gpu(format!("Failed to create device: {}", e)))?;
        Ok(Self {
            device: Arc::new(device),
            queue: Arc::new(queue),
        })
    }
}

struct GpuTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    width: u32,
    height: u32,
}

impl GpuTexture {
    fn new(device: &wgpu::Device, width: u32, height: u32, usage: wgpu::TextureUsages, label: &str) -> Self {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: SURFACE_FORMAT,
            usage,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self {
            texture,
            view,
            width,
            height,
        }
    }

    fn render_target(device: &wgpu::Device, width: u32, height: u32) -> Self {
        Self::new(
            device,
            width,
            height,
            wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            "Surface",
        )
    }

    fn for_video_frame(device: &wgpu::Device, width: u32, height: u32) -> Self {
        Self::new(
            device,
            width,
            height,
            wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            "Video Frame Texture",
        )
    }

    fn upload(&self, queue: &wgpu::Queue, frame: &FrameBuffer) {
        queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &self.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &frame.data,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(frame.stride() as u32),
                rows_per_image: Some(self.height),
            },
            wgpu::Extent3d {
                width: self.width,
                height: self.height,
                depth_or_array_layers: 1,
            },
        );
    }
}

struct Program {
    context: ContextHandle,
    pipeline: wgpu::RenderPipeline,
    layout: wgpu::BindGroupLayout,
    uniforms: wgpu::Buffer,
    sampler: wgpu::Sampler,
}

struct Texture {
    context: ContextHandle,
    image: Option<GpuTexture>,
}

struct Surface {
    context: ContextHandle,
    target: GpuTexture,
}

/// Hardware (or wgpu fallback adapter) graphics device.
pub struct WgpuDevice {
    instance: wgpu::Instance,
    ids: HandleAllocator,
    adapters: HashMap<ConfigHandle, wgpu::Adapter>,
    contexts: HashMap<ContextHandle, GpuContext>,
    surfaces: HashMap<SurfaceHandle, Surface>,
    programs: HashMap<ProgramHandle, Program>,
    textures: HashMap<TextureHandle, Texture>,
    /// Context new programs and textures are created in
    active: Option<ContextHandle>,
    current: Option<(ContextHandle, SurfaceHandle)>,
}

impl Default for WgpuDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl WgpuDevice {
    pub fn new() -> Self {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        });
        Self {
            instance,
            ids: HandleAllocator::default(),
            adapters: HashMap::new(),
            contexts: HashMap::new(),
            surfaces: HashMap::new(),
            programs: HashMap::new(),
            textures: HashMap::new(),
            active: None,
            current: None,
        }
    }

    fn context(&self, handle: ContextHandle) -> Result<&GpuContext> {
        self.contexts
            .get(&handle)
            .ok_or_else(|| ReelError::Gpu(format!("unknown context {}", handle.id())))
    }

    fn active_context(&self) -> Result<(ContextHandle, &GpuContext)> {
        let handle = self
            .current
            .map(|(c, _)| c)
            .or(self.active)
            .ok_or_else(|| ReelError::Gpu("no context".into()))?;
        Ok((handle, self.context(handle)?))
    }

    fn read_texture(ctx: &GpuContext, texture: &GpuTexture) -> Result<FrameBuffer> {
        let (width, height) = (texture.width, texture.height);
        let bytes_per_row = 4 * width;
        let padded_bytes_per_row = bytes_per_row.div_ceil(COPY_ROW_ALIGNMENT) * COPY_ROW_ALIGNMENT;
        let buffer = ctx.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Surface Readback"),
            size: (padded_bytes_per_row * height) as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Surface Readback Encoder"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                texture: &texture.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyBuffer {
                buffer: &buffer,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_bytes_per_row),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        ctx.queue.submit(Some(encoder.finish()));

        let slice = buffer.slice(..);
        let (tx, rx) = crossbeam_channel::bounded(1);
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        ctx.device.poll(wgpu::Maintain::Wait);
        rx.recv()
            .map_err(|_| ReelError::Gpu("readback callback dropped".into()))?
            .map_err(|e| ReelError::Gpu(format!("readback map failed: {}", e)))?;

        let mut data = Vec::with_capacity((bytes_per_row * height) as usize);
        {
            let mapped = slice.get_mapped_range();
            for row in 0..height {
                let start = (row * padded_bytes_per_row) as usize;
                data.extend_from_slice(&mapped[start..start + bytes_per_row as usize]);
            }
        }
        buffer.unmap();
        FrameBuffer::from_rgba(width, height, data)
    }
}

impl GraphicsDevice for WgpuDevice {
    fn name(&self) -> &str {
        "wgpu"
    }

    fn choose_config(&mut self) -> Result<ConfigHandle> {
        let adapter = pollster::block_on(self.instance.request_adapter(
            &wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            },
        ))
        .ok_or_else(|| ReelError::Gpu("No suitable GPU adapter found".to_string()))?;

        let supports = adapter.get_texture_format_features(SURFACE_FORMAT);
        if !supports
            .allowed_usages
            .contains(wgpu::TextureUsages::RENDER_ATTACHMENT)
        {
            return Err(ReelError::Gpu("adapter cannot render to RGBA8".into()));
        }
        info!("Using GPU adapter: {:?}", adapter.get_info());
        let handle = ConfigHandle(self.ids.next());
        self.adapters.insert(handle, adapter);
        Ok(handle)
    }

    fn create_context(&mut self, config: ConfigHandle) -> Result<ContextHandle> {
        let adapter = self
            .adapters
            .get(&config)
            .ok_or_else(|| ReelError::Gpu(format!("unknown config {}", config.id())))?;
        let ctx = pollster::block_on(GpuContext::request(adapter))?;
        let handle = ContextHandle(self.ids.next());
        self.contexts.insert(handle, ctx);
        self.active = Some(handle);
        Ok(handle)
    }

    fn create_surface(
        &mut self,
        context: ContextHandle,
        kind: SurfaceKind,
        width: u32,
        height: u32,
    ) -> Result<SurfaceHandle> {
        let ctx = self.context(context)?;
        let limit = ctx.device.limits().max_texture_dimension_2d;
        if width == 0 || height == 0 || width > limit || height > limit {
            return Err(ReelError::Gpu(format!(
                "{:?} surface {}x{} outside 1..={}",
                kind, width, height, limit
            )));
        }
        let target = GpuTexture::render_target(&ctx.device, width, height);
        let handle = SurfaceHandle(self.ids.next());
        self.surfaces.insert(handle, Surface { context, target });
        debug!(surface = handle.id(), ?kind, width, height, "wgpu surface created");
        Ok(handle)
    }

    fn make_current(&mut self, binding: Option<(ContextHandle, SurfaceHandle)>) -> Result<()> {
        if let Some((context, surface)) = binding {
            let owner = self
                .surfaces
                .get(&surface)
                .map(|s| s.context)
                .ok_or_else(|| ReelError::Gpu(format!("unknown surface {}", surface.id())))?;
            if owner != context {
                return Err(ReelError::Gpu(format!(
                    "surface {} belongs to another context",
                    surface.id()
                )));
            }
        }
        self.current = binding;
        Ok(())
    }

    fn create_program(&mut self, source: &str) -> Result<ProgramHandle> {
        let (context, ctx) = self.active_context()?;
        let device = &ctx.device;

        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Passthrough Shader"),
            source: wgpu::ShaderSource::Wgsl(source.into()),
        });
        if let Some(err) = pollster::block_on(device.pop_error_scope()) {
            return Err(ReelError::Shader(err.to_string()));
        }

        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Passthrough Bind Group Layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Passthrough Pipeline Layout"),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });

        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Passthrough Pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_main"),
                buffers: &[],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: SURFACE_FORMAT,
                    blend: Some(wgpu::BlendState::REPLACE),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState::default(),
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });
        if let Some(err) = pollster::block_on(device.pop_error_scope()) {
            return Err(ReelError::Shader(err.to_string()));
        }

        let uniforms = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Passthrough Uniforms"),
            size: std::mem::size_of::<Uniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Video Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        let handle = ProgramHandle(self.ids.next());
        self.programs.insert(
            handle,
            Program {
                context,
                pipeline,
                layout,
                uniforms,
                sampler,
            },
        );
        Ok(handle)
    }

    fn create_texture(&mut self) -> Result<TextureHandle> {
        let (context, _) = self.active_context()?;
        let handle = TextureHandle(self.ids.next());
        self.textures.insert(
            handle,
            Texture {
                context,
                image: None,
            },
        );
        Ok(handle)
    }

    fn upload_texture(&mut self, texture: TextureHandle, frame: &FrameBuffer) -> Result<()> {
        let slot = self
            .textures
            .get_mut(&texture)
            .ok_or_else(|| ReelError::Gpu(format!("unknown texture {}", texture.id())))?;
        let ctx = self
            .contexts
            .get(&slot.context)
            .ok_or_else(|| ReelError::Gpu("texture context destroyed".into()))?;
        let reuse = slot
            .image
            .as_ref()
            .is_some_and(|t| t.width == frame.width && t.height == frame.height);
        if !reuse {
            slot.image = Some(GpuTexture::for_video_frame(
                &ctx.device,
                frame.width,
                frame.height,
            ));
        }
        if let Some(image) = slot.image.as_ref() {
            image.upload(&ctx.queue, frame);
        }
        Ok(())
    }

    fn draw_quad(
        &mut self,
        program: ProgramHandle,
        texture: TextureHandle,
        tex_matrix: &Mat4,
    ) -> Result<()> {
        let (context, surface) = self
            .current
            .ok_or_else(|| ReelError::Gpu("draw with no current surface".into()))?;
        let ctx = self.context(context)?;
        let program = self
            .programs
            .get(&program)
            .filter(|p| p.context == context)
            .ok_or_else(|| ReelError::Gpu(format!("program {} not usable here", program.id())))?;
        let image = self
            .textures
            .get(&texture)
            .and_then(|t| t.image.as_ref())
            .ok_or_else(|| ReelError::Gpu(format!("texture {} has no image", texture.id())))?;
        let target = self
            .surfaces
            .get(&surface)
            .ok_or_else(|| ReelError::Gpu(format!("unknown surface {}", surface.id())))?;

        let uniforms = Uniforms {
            tex_matrix: tex_matrix.to_cols_array(),
        };
        ctx.queue
            .write_buffer(&program.uniforms, 0, bytemuck::bytes_of(&uniforms));
        let bind_group = ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Passthrough Bind Group"),
            layout: &program.layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: program.uniforms.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(&image.view),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::Sampler(&program.sampler),
                },
            ],
        });

        let mut encoder = ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Passthrough Encoder"),
            });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Passthrough Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &target.target.view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_pipeline(&program.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.draw(0..6, 0..1);
        }
        ctx.queue.submit(Some(encoder.finish()));
        Ok(())
    }

    fn read_surface(&mut self, surface: SurfaceHandle) -> Result<FrameBuffer> {
        let s = self
            .surfaces
            .get(&surface)
            .ok_or_else(|| ReelError::Gpu(format!("unknown surface {}", surface.id())))?;
        let ctx = self.context(s.context)?;
        Self::read_texture(ctx, &s.target)
    }

    fn destroy_program(&mut self, program: ProgramHandle) {
        self.programs.remove(&program);
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        if let Some(t) = self.textures.remove(&texture) {
            if let Some(image) = t.image {
                image.texture.destroy();
            }
        }
    }

    fn destroy_surface(&mut self, surface: SurfaceHandle) {
        if let Some(s) = self.surfaces.remove(&surface) {
            s.target.texture.destroy();
        }
        if self.current.map(|(_, s)| s) == Some(surface) {
            self.current = None;
        }
    }

    fn destroy_context(&mut self, context: ContextHandle) {
        self.programs.retain(|_, p| p.context != context);
        self.textures.retain(|_, t| t.context != context);
        self.surfaces.retain(|_, s| s.context != context);
        self.contexts.remove(&context);
        if self.active == Some(context) {
            self.active = None;
        }
    }
}
