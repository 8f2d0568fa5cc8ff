use std::num::NonZeroU32;
use std::sync::{mpsc, Arc};

use anyhow::{anyhow, bail, Context, Result};
use bytemuck::{Pod, Zeroable};
use clap::ValueEnum;
use image::RgbaImage;
use wgpu::util::DeviceExt;

use crate::driver::DepthUniforms;
use crate::materials::{MaterialDescriptor, MaterialRegistry};
use crate::sampler::{self, DepthTextures};
use crate::scene::Scene;

const OFFSCREEN_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum BackendPreference {
    /// GPU when an adapter is available, software otherwise.
    #[default]
    Auto,
    Gpu,
    Software,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable, PartialEq)]
struct Vertex {
    position: [f32; 2],
    uv: [f32; 2],
}

/// Device and queue shared between the renderer and a presentation surface.
pub struct RendererGpuContext {
    pub adapter: wgpu::Adapter,
    pub device: Arc<wgpu::Device>,
    pub queue: Arc<wgpu::Queue>,
}

impl RendererGpuContext {
    pub async fn headless() -> Result<Self> {
        let instance = wgpu::Instance::default();
        Self::request(&instance, None).await
    }

    pub async fn for_surface(
        instance: &wgpu::Instance,
        surface: &wgpu::Surface<'_>,
    ) -> Result<Self> {
        Self::request(instance, Some(surface)).await
    }

    async fn request(
        instance: &wgpu::Instance,
        compatible_surface: Option<&wgpu::Surface<'_>>,
    ) -> Result<Self> {
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                force_fallback_adapter: false,
                compatible_surface,
            })
            .await
            .ok_or_else(|| anyhow!("no suitable GPU adapter found"))?;

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("parallax-device"),
                    required_features: wgpu::Features::empty(),
                    // Lift texture size limits to what the adapter supports so large maps fit.
                    required_limits: wgpu::Limits::default().using_resolution(adapter.limits()),
                },
                None,
            )
            .await
            .context("failed to request wgpu device")?;

        Ok(Self {
            adapter,
            device: Arc::new(device),
            queue: Arc::new(queue),
        })
    }
}

pub struct Renderer {
    width: u32,
    height: u32,
    backend: RendererBackend,
    backend_reason: String,
}

enum RendererBackend {
    Gpu(Box<GpuRenderer>),
    Software(SoftwareRenderer),
}

impl Renderer {
    /// Build a renderer for `scene`'s material, honouring `preference`.
    pub fn new(
        scene: &Scene,
        registry: &MaterialRegistry,
        preference: BackendPreference,
    ) -> Result<Self> {
        let material = registry.resolve(&scene.config.material)?;
        let resolution = scene.config.output.resolution;

        if preference == BackendPreference::Software {
            return Self::software(scene, material, "software backend requested".to_owned());
        }

        let gpu = pollster::block_on(RendererGpuContext::headless()).and_then(|context| {
            let gpu = GpuRenderer::new(
                &context,
                &scene.textures,
                material,
                scene.overscan(),
                OFFSCREEN_FORMAT,
                Some((resolution.width, resolution.height)),
            )?;
            let adapter = context.adapter.get_info();
            Ok((gpu, format!("{} ({:?})", adapter.name, adapter.backend)))
        });

        match gpu {
            Ok((gpu, reason)) => Ok(Self {
                width: resolution.width,
                height: resolution.height,
                backend: RendererBackend::Gpu(Box::new(gpu)),
                backend_reason: reason,
            }),
            Err(error) if preference == BackendPreference::Auto => {
                log::warn!("falling back to software rendering: {error:#}");
                Self::software(scene, material, format!("GPU unavailable: {error:#}"))
            }
            Err(error) => Err(error),
        }
    }

    /// CPU-only renderer; output is bit-for-bit reproducible across machines.
    pub fn new_software(scene: &Scene, registry: &MaterialRegistry) -> Result<Self> {
        let material = registry.resolve(&scene.config.material)?;
        Self::software(scene, material, "software backend requested".to_owned())
    }

    /// GPU renderer on a caller-owned context, drawing in `render_format`.
    pub fn new_with_context(
        scene: &Scene,
        registry: &MaterialRegistry,
        context: &RendererGpuContext,
        render_format: wgpu::TextureFormat,
    ) -> Result<Self> {
        let material = registry.resolve(&scene.config.material)?;
        let resolution = scene.config.output.resolution;
        let offscreen = (render_format == OFFSCREEN_FORMAT)
            .then_some((resolution.width, resolution.height));
        let gpu = GpuRenderer::new(
            context,
            &scene.textures,
            material,
            scene.overscan(),
            render_format,
            offscreen,
        )?;
        Ok(Self {
            width: resolution.width,
            height: resolution.height,
            backend: RendererBackend::Gpu(Box::new(gpu)),
            backend_reason: "shared context".to_owned(),
        })
    }

    fn software(scene: &Scene, material: MaterialDescriptor, reason: String) -> Result<Self> {
        let resolution = scene.config.output.resolution;
        Ok(Self {
            width: resolution.width,
            height: resolution.height,
            backend: RendererBackend::Software(SoftwareRenderer {
                textures: scene.textures.clone(),
                material,
                overscan: scene.overscan(),
            }),
            backend_reason: reason,
        })
    }

    pub fn is_gpu_backend(&self) -> bool {
        matches!(self.backend, RendererBackend::Gpu(_))
    }

    pub fn backend_name(&self) -> &'static str {
        match self.backend {
            RendererBackend::Gpu(_) => "gpu",
            RendererBackend::Software(_) => "software",
        }
    }

    pub fn backend_reason(&self) -> &str {
        &self.backend_reason
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Draw one frame with `uniforms` and return tightly packed RGBA8.
    pub fn render_frame_rgba(&mut self, uniforms: &DepthUniforms) -> Result<Vec<u8>> {
        match &mut self.backend {
            RendererBackend::Gpu(gpu) => gpu.render_rgba(uniforms),
            RendererBackend::Software(software) => {
                software.render_rgba(uniforms, self.width, self.height)
            }
        }
    }

    /// Draw straight into a presentation view (GPU only).
    pub fn render_frame_to_view(
        &mut self,
        uniforms: &DepthUniforms,
        view: &wgpu::TextureView,
    ) -> Result<()> {
        match &mut self.backend {
            RendererBackend::Gpu(gpu) => {
                gpu.render_to_view(uniforms, view);
                Ok(())
            }
            RendererBackend::Software(_) => {
                bail!("software backend cannot render to a GPU surface")
            }
        }
    }
}

struct SoftwareRenderer {
    textures: DepthTextures,
    material: MaterialDescriptor,
    overscan: f32,
}

impl SoftwareRenderer {
    fn render_rgba(&self, uniforms: &DepthUniforms, width: u32, height: u32) -> Result<Vec<u8>> {
        sampler::render_rgba(
            &self.textures,
            uniforms,
            self.material.software_fragment,
            width,
            height,
            self.overscan,
        )
        .with_context(|| format!("software {} pass failed", self.material.name))
    }
}

struct OffscreenTarget {
    width: u32,
    height: u32,
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    readback_buffer: wgpu::Buffer,
    unpadded_bytes_per_row: u32,
    padded_bytes_per_row: u32,
}

struct GpuRenderer {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    pipeline: wgpu::RenderPipeline,
    bind_group: wgpu::BindGroup,
    uniform_buffer: wgpu::Buffer,
    vertex_buffer: wgpu::Buffer,
    last_uniforms: Option<DepthUniforms>,
    offscreen: Option<OffscreenTarget>,
    _color_texture: wgpu::Texture,
    _depth_texture: wgpu::Texture,
}

impl GpuRenderer {
    fn new(
        context: &RendererGpuContext,
        textures: &DepthTextures,
        material: MaterialDescriptor,
        overscan: f32,
        render_format: wgpu::TextureFormat,
        offscreen_size: Option<(u32, u32)>,
    ) -> Result<Self> {
        let device = &context.device;
        let max_side = device.limits().max_texture_dimension_2d;
        for (label, (width, height)) in [
            ("color map", textures.color.dimensions()),
            ("depth map", textures.depth.dimensions()),
        ]
        .into_iter()
        .chain(offscreen_size.map(|size| ("output resolution", size)))
        {
            ensure_fits_texture_limit(label, width, height, max_side)?;
        }

        // wgpu panics on uncaptured validation errors; turn them into an Err instead.
        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let built = Self::build(
            context,
            textures,
            material,
            overscan,
            render_format,
            offscreen_size,
        );
        let validation = pollster::block_on(device.pop_error_scope());
        let renderer = built?;
        if let Some(error) = validation {
            bail!("GPU rejected the {} pipeline: {error}", material.name);
        }
        Ok(renderer)
    }

    fn build(
        context: &RendererGpuContext,
        textures: &DepthTextures,
        material: MaterialDescriptor,
        overscan: f32,
        render_format: wgpu::TextureFormat,
        offscreen_size: Option<(u32, u32)>,
    ) -> Result<Self> {
        let device = &context.device;
        let queue = &context.queue;

        let color_texture = upload_texture(device, queue, &textures.color, "parallax-color-map")?;
        let depth_texture = upload_texture(device, queue, &textures.depth, "parallax-depth-map")?;
        let color_view = color_texture.create_view(&wgpu::TextureViewDescriptor::default());
        let depth_view = depth_texture.create_view(&wgpu::TextureViewDescriptor::default());

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("parallax-map-sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        let uniform_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("parallax-depth-uniforms"),
            contents: bytemuck::bytes_of(&DepthUniforms::default()),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });

        let texture_entry = |binding| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: true },
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            },
            count: None,
        };
        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("parallax-depth-bind-group-layout"),
            entries: &[
                texture_entry(0),
                texture_entry(1),
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 3,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: wgpu::BufferSize::new(
                            std::mem::size_of::<DepthUniforms>() as u64,
                        ),
                    },
                    count: None,
                },
            ],
        });

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("parallax-depth-bind-group"),
            layout: &bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&color_view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(&depth_view),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::Sampler(&sampler),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: uniform_buffer.as_entire_binding(),
                },
            ],
        });

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(material.name),
            source: wgpu::ShaderSource::Wgsl(material.wgsl_source.into()),
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("parallax-depth-pipeline-layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });
        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("parallax-depth-pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: "vs_main",
                buffers: &[wgpu::VertexBufferLayout {
                    array_stride: std::mem::size_of::<Vertex>() as wgpu::BufferAddress,
                    step_mode: wgpu::VertexStepMode::Vertex,
                    attributes: &wgpu::vertex_attr_array![0 => Float32x2, 1 => Float32x2],
                }],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            primitive: wgpu::PrimitiveState::default(),
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: material.fragment_entry_point,
                targets: &[Some(wgpu::ColorTargetState {
                    format: render_format,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            }),
            multiview: None,
        });

        let vertices = plane_quad(overscan);
        let vertex_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("parallax-plane-vertices"),
            contents: bytemuck::cast_slice(&vertices),
            usage: wgpu::BufferUsages::VERTEX,
        });

        let offscreen = match offscreen_size {
            Some((width, height)) => Some(create_offscreen_target(device, width, height)?),
            None => None,
        };

        Ok(Self {
            device: Arc::clone(&context.device),
            queue: Arc::clone(&context.queue),
            pipeline,
            bind_group,
            uniform_buffer,
            vertex_buffer,
            last_uniforms: None,
            offscreen,
            _color_texture: color_texture,
            _depth_texture: depth_texture,
        })
    }

    fn write_uniforms(&mut self, uniforms: &DepthUniforms) {
        if self.last_uniforms.as_ref() != Some(uniforms) {
            self.queue
                .write_buffer(&self.uniform_buffer, 0, bytemuck::bytes_of(uniforms));
            self.last_uniforms = Some(*uniforms);
        }
    }

    fn encode_draw(&self, encoder: &mut wgpu::CommandEncoder, view: &wgpu::TextureView) {
        let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("parallax-depth-pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            occlusion_query_set: None,
            timestamp_writes: None,
        });
        render_pass.set_pipeline(&self.pipeline);
        render_pass.set_bind_group(0, &self.bind_group, &[]);
        render_pass.set_vertex_buffer(0, self.vertex_buffer.slice(..));
        render_pass.draw(0..6, 0..1);
    }

    fn render_to_view(&mut self, uniforms: &DepthUniforms, view: &wgpu::TextureView) {
        self.write_uniforms(uniforms);
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("parallax-present-encoder"),
            });
        self.encode_draw(&mut encoder, view);
        self.queue.submit(Some(encoder.finish()));
    }

    fn render_rgba(&mut self, uniforms: &DepthUniforms) -> Result<Vec<u8>> {
        self.write_uniforms(uniforms);
        let target = self
            .offscreen
            .as_ref()
            .ok_or_else(|| anyhow!("renderer has no offscreen target to read back"))?;

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("parallax-render-encoder"),
            });
        self.encode_draw(&mut encoder, &target.view);

        let padded_bytes_per_row = NonZeroU32::new(target.padded_bytes_per_row)
            .ok_or_else(|| anyhow!("invalid padded row size {}", target.padded_bytes_per_row))?;
        let rows_per_image = NonZeroU32::new(target.height)
            .ok_or_else(|| anyhow!("invalid render height {}", target.height))?;
        encoder.copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                texture: &target.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyBuffer {
                buffer: &target.readback_buffer,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_bytes_per_row.get()),
                    rows_per_image: Some(rows_per_image.get()),
                },
            },
            wgpu::Extent3d {
                width: target.width,
                height: target.height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(Some(encoder.finish()));

        read_back(&self.device, target)
    }
}

fn read_back(device: &wgpu::Device, target: &OffscreenTarget) -> Result<Vec<u8>> {
    let buffer_slice = target.readback_buffer.slice(..);
    let (sender, receiver) = mpsc::channel();
    buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = sender.send(result);
    });
    device.poll(wgpu::Maintain::Wait);

    receiver
        .recv()
        .map_err(|_| anyhow!("failed receiving GPU map callback"))?
        .context("GPU buffer mapping failed")?;

    let row_bytes = target.unpadded_bytes_per_row as usize;
    let mapped = buffer_slice.get_mapped_range();
    let mut frame = Vec::with_capacity(row_bytes * target.height as usize);
    for chunk in mapped
        .chunks(target.padded_bytes_per_row as usize)
        .take(target.height as usize)
    {
        frame.extend_from_slice(&chunk[..row_bytes]);
    }

    drop(mapped);
    target.readback_buffer.unmap();
    Ok(frame)
}

fn create_offscreen_target(
    device: &wgpu::Device,
    width: u32,
    height: u32,
) -> Result<OffscreenTarget> {
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("parallax-render-target"),
        size: wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: OFFSCREEN_FORMAT,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
        view_formats: &[],
    });
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

    let unpadded_bytes_per_row = width
        .checked_mul(4)
        .ok_or_else(|| anyhow!("frame width overflow when computing row bytes"))?;
    let padded_bytes_per_row = align_to(unpadded_bytes_per_row, wgpu::COPY_BYTES_PER_ROW_ALIGNMENT);
    let readback_buffer = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("parallax-readback-buffer"),
        size: u64::from(padded_bytes_per_row) * u64::from(height),
        usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
        mapped_at_creation: false,
    });

    Ok(OffscreenTarget {
        width,
        height,
        texture,
        view,
        readback_buffer,
        unpadded_bytes_per_row,
        padded_bytes_per_row,
    })
}

fn ensure_fits_texture_limit(label: &str, width: u32, height: u32, max_side: u32) -> Result<()> {
    if width > max_side || height > max_side {
        bail!("{label} is {width}x{height} but this GPU allows at most {max_side} px per side");
    }
    Ok(())
}

fn upload_texture(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    image: &RgbaImage,
    label: &str,
) -> Result<wgpu::Texture> {
    let (width, height) = image.dimensions();
    let size = wgpu::Extent3d {
        width,
        height,
        depth_or_array_layers: 1,
    };
    // Raw unorm so the GPU samples the same bytes the software path reads.
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size,
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: wgpu::TextureFormat::Rgba8Unorm,
        usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        view_formats: &[],
    });

    let bytes_per_row = NonZeroU32::new(width.saturating_mul(4))
        .ok_or_else(|| anyhow!("{label} has invalid width {width}"))?;
    let rows_per_image =
        NonZeroU32::new(height).ok_or_else(|| anyhow!("{label} has invalid height {height}"))?;

    queue.write_texture(
        wgpu::ImageCopyTexture {
            texture: &texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        image.as_raw(),
        wgpu::ImageDataLayout {
            offset: 0,
            bytes_per_row: Some(bytes_per_row.get()),
            rows_per_image: Some(rows_per_image.get()),
        },
        size,
    );
    Ok(texture)
}

/// Full-screen quad whose UVs cover only the part of the plane that is on
/// screen. UV origin is bottom-left.
fn plane_quad(overscan: f32) -> [Vertex; 6] {
    let lo = 0.5 - 0.5 / overscan;
    let hi = 0.5 + 0.5 / overscan;
    let bottom_left = Vertex {
        position: [-1.0, -1.0],
        uv: [lo, lo],
    };
    let bottom_right = Vertex {
        position: [1.0, -1.0],
        uv: [hi, lo],
    };
    let top_left = Vertex {
        position: [-1.0, 1.0],
        uv: [lo, hi],
    };
    let top_right = Vertex {
        position: [1.0, 1.0],
        uv: [hi, hi],
    };
    [
        top_left,
        bottom_left,
        top_right,
        top_right,
        bottom_left,
        bottom_right,
    ]
}

fn align_to(value: u32, alignment: u32) -> u32 {
    let mask = alignment - 1;
    (value + mask) & !mask
}
