use std::collections::HashMap;
use std::num::NonZeroU64;

use web_sys::HtmlCanvasElement;
use wgpu::util::DeviceExt;

use terrashear_shared::mesh::{MeshVertex, TileMesh};
use terrashear_shared::mosaic::{CellDraw, CellUniforms, FramePlacement, FrameUniforms, PresentUniforms};
use terrashear_shared::{MosaicBackend, Tile, TileCoord, TileLayer};

const COLOR_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;
const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth24Plus;
/// Framebuffers past this size cost more memory than they buy detail.
const MAX_FRAMEBUFFER_EXTENT: u32 = 4096;
const INITIAL_CELL_CAPACITY: usize = 256;
const BACKGROUND: wgpu::Color = wgpu::Color {
    r: 0.047,
    g: 0.055,
    b: 0.090,
    a: 1.0,
};

struct TileTexture {
    _texture: wgpu::Texture,
    view: wgpu::TextureView,
}

/// Offscreen target the mosaic is drawn into, plus the bind group that presents it.
struct RenderTarget {
    extent: u32,
    color_view: wgpu::TextureView,
    depth_view: wgpu::TextureView,
    present_bind_group: wgpu::BindGroup,
}

struct MeshBuffers {
    vertices: wgpu::Buffer,
    indices: wgpu::Buffer,
    index_count: u32,
}

type PairKey = (TileCoord, Option<TileCoord>);

pub struct GpuMosaic {
    device: wgpu::Device,
    queue: wgpu::Queue,
    surface: wgpu::Surface<'static>,
    surface_config: wgpu::SurfaceConfiguration,
    max_extent: u32,

    frame_buffer: wgpu::Buffer,
    frame_bind_group: wgpu::BindGroup,

    // Per-draw uniforms, one aligned slot per draw, bound with a dynamic offset.
    cell_layout: wgpu::BindGroupLayout,
    cell_buffer: wgpu::Buffer,
    cell_bind_group: wgpu::BindGroup,
    cell_capacity: usize,
    cell_stride: u64,
    cell_staging: Vec<u8>,

    terrain_pipeline: wgpu::RenderPipeline,
    texture_layout: wgpu::BindGroupLayout,
    textures: HashMap<(TileLayer, TileCoord), TileTexture>,
    pair_groups: HashMap<PairKey, wgpu::BindGroup>,
    blank_overlay: TileTexture,

    present_pipeline: wgpu::RenderPipeline,
    present_layout: wgpu::BindGroupLayout,
    present_buffer: wgpu::Buffer,
    present_sampler: wgpu::Sampler,

    target: Option<RenderTarget>,
    mesh: Option<MeshBuffers>,
    pending: Vec<CellDraw>,
}

impl GpuMosaic {
    /// Async initialization with a WebGL2-only path.
    pub async fn init(canvas: HtmlCanvasElement) -> Result<Self, String> {
        Self::init_with_backends(canvas, wgpu::Backends::GL, "webgl").await
    }

    async fn init_with_backends(
        canvas: HtmlCanvasElement,
        backends: wgpu::Backends,
        backend_path: &str,
    ) -> Result<Self, String> {
        let width = canvas.width().max(1);
        let height = canvas.height().max(1);

        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends,
            ..Default::default()
        });

        let surface = instance
            .create_surface(wgpu::SurfaceTarget::Canvas(canvas))
            .map_err(|e| format!("wgpu init ({backend_path}) create_surface: {e}"))?;

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: Some(&surface),
                ..Default::default()
            })
            .await
            .ok_or_else(|| format!("wgpu init ({backend_path}): no suitable GPU adapter found"))?;

        // WebGL2 adapters expose zero compute limits; the plain defaults fail validation.
        let required_limits = if backends == wgpu::Backends::GL {
            wgpu::Limits::downlevel_webgl2_defaults().using_resolution(adapter.limits())
        } else {
            wgpu::Limits::default()
        };

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("terrashear-device"),
                    required_features: wgpu::Features::empty(),
                    required_limits,
                    ..Default::default()
                },
                None,
            )
            .await
            .map_err(|e| format!("wgpu init ({backend_path}) request_device: {e}"))?;

        let mut surface_config = surface
            .get_default_config(&adapter, width, height)
            .ok_or_else(|| format!("wgpu init ({backend_path}): surface unsupported by adapter"))?;
        let caps = surface.get_capabilities(&adapter);

        // The framebuffer is Rgba8Unorm; a non-sRGB surface avoids a second gamma curve.
        if let Some(format) = caps.formats.iter().copied().find(|f| !f.is_srgb()) {
            surface_config.format = format;
        }
        if caps.alpha_modes.contains(&wgpu::CompositeAlphaMode::Opaque) {
            surface_config.alpha_mode = wgpu::CompositeAlphaMode::Opaque;
        }
        tracing::info!(
            path = backend_path,
            backend = ?adapter.get_info().backend,
            format = ?surface_config.format,
            present = ?surface_config.present_mode,
            alpha = ?surface_config.alpha_mode,
            "wgpu initialized"
        );
        surface.configure(&device, &surface_config);

        let limits = device.limits();
        let max_extent = limits.max_texture_dimension_2d.min(MAX_FRAMEBUFFER_EXTENT);
        let alignment = u64::from(limits.min_uniform_buffer_offset_alignment.max(1));
        let cell_size = std::mem::size_of::<CellUniforms>() as u64;
        let cell_stride = cell_size.div_ceil(alignment) * alignment;

        // --- Frame uniforms + overlay sampler (group 0) ---
        let frame_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("frame-bgl"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
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
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let frame_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("frame-ubo"),
            size: std::mem::size_of::<FrameUniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let overlay_sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("overlay-sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        let frame_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("frame-bg"),
            layout: &frame_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: frame_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&overlay_sampler),
                },
            ],
        });

        // --- Cell uniforms (group 1) ---
        let cell_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("cell-bgl"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: true,
                    min_binding_size: NonZeroU64::new(cell_size),
                },
                count: None,
            }],
        });
        let (cell_buffer, cell_bind_group) =
            create_cell_buffer(&device, &cell_layout, INITIAL_CELL_CAPACITY, cell_stride);

        // --- Base + overlay textures (group 2) ---
        let texture_entry = |binding: u32, visibility: wgpu::ShaderStages| wgpu::BindGroupLayoutEntry {
            binding,
            visibility,
            ty: wgpu::BindingType::Texture {
                multisampled: false,
                view_dimension: wgpu::TextureViewDimension::D2,
                sample_type: wgpu::TextureSampleType::Float { filterable: true },
            },
            count: None,
        };
        let texture_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("tile-textures-bgl"),
            entries: &[
                texture_entry(0, wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT),
                texture_entry(1, wgpu::ShaderStages::FRAGMENT),
            ],
        });

        let blank_overlay = upload_rgba(&device, &queue, "blank-overlay", 1, 1, &[0, 0, 0, 0]);

        // --- Terrain pipeline ---
        let mosaic_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("mosaic-shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("mosaic.wgsl").into()),
        });

        let terrain_pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("terrain-pl"),
            bind_group_layouts: &[&frame_layout, &cell_layout, &texture_layout],
            push_constant_ranges: &[],
        });

        let terrain_pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("terrain-pipeline"),
            layout: Some(&terrain_pipeline_layout),
            vertex: wgpu::VertexState {
                module: &mosaic_shader,
                entry_point: Some("vs_main"),
                buffers: &[wgpu::VertexBufferLayout {
                    array_stride: std::mem::size_of::<MeshVertex>() as u64,
                    step_mode: wgpu::VertexStepMode::Vertex,
                    attributes: &[wgpu::VertexAttribute {
                        offset: 0,
                        shader_location: 0,
                        format: wgpu::VertexFormat::Float32x2,
                    }],
                }],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &mosaic_shader,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: COLOR_FORMAT,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                cull_mode: None,
                ..Default::default()
            },
            depth_stencil: Some(wgpu::DepthStencilState {
                format: DEPTH_FORMAT,
                depth_write_enabled: true,
                depth_compare: wgpu::CompareFunction::LessEqual,
                stencil: wgpu::StencilState::default(),
                bias: wgpu::DepthBiasState::default(),
            }),
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        // --- Present pipeline ---
        let present_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("present-shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("present.wgsl").into()),
        });

        let present_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("present-bgl"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                texture_entry(1, wgpu::ShaderStages::FRAGMENT),
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let present_pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("present-pl"),
            bind_group_layouts: &[&present_layout],
            push_constant_ranges: &[],
        });

        let present_pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("present-pipeline"),
            layout: Some(&present_pipeline_layout),
            vertex: wgpu::VertexState {
                module: &present_shader,
                entry_point: Some("vs_main"),
                buffers: &[],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &present_shader,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: surface_config.format,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                cull_mode: None,
                ..Default::default()
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        let present_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("present-ubo"),
            contents: bytemuck::bytes_of(&PresentUniforms {
                center: [0.5, 0.5, width as f32 / 2.0, height as f32 / 2.0],
                axes: [0.0; 4],
            }),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });

        let present_sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("present-sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        Ok(Self {
            device,
            queue,
            surface,
            surface_config,
            max_extent,
            frame_buffer,
            frame_bind_group,
            cell_layout,
            cell_buffer,
            cell_bind_group,
            cell_capacity: INITIAL_CELL_CAPACITY,
            cell_stride,
            cell_staging: Vec::new(),
            terrain_pipeline,
            texture_layout,
            textures: HashMap::new(),
            pair_groups: HashMap::new(),
            blank_overlay,
            present_pipeline,
            present_layout,
            present_buffer,
            present_sampler,
            target: None,
            mesh: None,
            pending: Vec::new(),
        })
    }

    /// Resize the surface when the canvas size changes.
    pub fn resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        if self.surface_config.width == width && self.surface_config.height == height {
            return;
        }
        self.surface_config.width = width;
        self.surface_config.height = height;
        self.surface.configure(&self.device, &self.surface_config);
    }

    fn ensure_target(&mut self, extent: u32) {
        if self.target.as_ref().is_some_and(|t| t.extent == extent) {
            return;
        }
        tracing::debug!(extent, "allocating mosaic framebuffer");
        let size = wgpu::Extent3d {
            width: extent,
            height: extent,
            depth_or_array_layers: 1,
        };
        let color = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("mosaic-color"),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: COLOR_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        });
        let depth = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("mosaic-depth"),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: DEPTH_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });
        let color_view = color.create_view(&wgpu::TextureViewDescriptor::default());
        let depth_view = depth.create_view(&wgpu::TextureViewDescriptor::default());
        let present_bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("present-bg"),
            layout: &self.present_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: self.present_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(&color_view),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::Sampler(&self.present_sampler),
                },
            ],
        });
        self.target = Some(RenderTarget {
            extent,
            color_view,
            depth_view,
            present_bind_group,
        });
    }

    fn ensure_cell_capacity(&mut self, draws: usize) {
        if draws <= self.cell_capacity {
            return;
        }
        let capacity = draws.next_power_of_two();
        let (buffer, bind_group) = create_cell_buffer(&self.device, &self.cell_layout, capacity, self.cell_stride);
        self.cell_buffer = buffer;
        self.cell_bind_group = bind_group;
        self.cell_capacity = capacity;
    }

    fn pair_group(&self, (base, overlay): PairKey) -> Option<wgpu::BindGroup> {
        let base_view = &self.textures.get(&(TileLayer::Terrain, base))?.view;
        let overlay_view = match overlay {
            Some(coord) => &self.textures.get(&(TileLayer::Overlay, coord))?.view,
            None => &self.blank_overlay.view,
        };
        Some(self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("tile-textures-bg"),
            layout: &self.texture_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(base_view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(overlay_view),
                },
            ],
        }))
    }

    fn forget_pairs_with(&mut self, layer: TileLayer, coord: TileCoord) {
        self.pair_groups.retain(|(base, overlay), _| match layer {
            TileLayer::Terrain => *base != coord,
            TileLayer::Overlay => *overlay != Some(coord),
        });
    }
}

impl MosaicBackend for GpuMosaic {
    fn max_framebuffer_extent(&self) -> u32 {
        self.max_extent
    }

    fn is_resident(&self, layer: TileLayer, coord: TileCoord) -> bool {
        self.textures.contains_key(&(layer, coord))
    }

    fn make_resident(&mut self, tile: &Tile) -> bool {
        let Some(image) = tile.image() else {
            return false;
        };
        let texture = upload_rgba(
            &self.device,
            &self.queue,
            "tile-tex",
            image.width(),
            image.height(),
            image.pixels(),
        );
        self.forget_pairs_with(tile.layer(), tile.coord());
        self.textures.insert((tile.layer(), tile.coord()), texture);
        true
    }

    fn evict(&mut self, layer: TileLayer, coord: TileCoord) {
        if self.textures.remove(&(layer, coord)).is_some() {
            self.forget_pairs_with(layer, coord);
        }
    }

    fn begin_pass(&mut self, extent: u32) {
        self.ensure_target(extent.clamp(1, self.max_extent));
        self.pending.clear();
    }

    fn set_frame_uniforms(&mut self, uniforms: &FrameUniforms) {
        self.queue.write_buffer(&self.frame_buffer, 0, bytemuck::bytes_of(uniforms));
    }

    fn upload_mesh(&mut self, mesh: &TileMesh) {
        let vertices = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("tile-mesh-verts"),
            contents: bytemuck::cast_slice(mesh.vertices()),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let indices = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("tile-mesh-indices"),
            contents: bytemuck::cast_slice(mesh.indices()),
            usage: wgpu::BufferUsages::INDEX,
        });
        self.mesh = Some(MeshBuffers {
            vertices,
            indices,
            index_count: mesh.indices().len() as u32,
        });
    }

    fn draw_cell(&mut self, draw: &CellDraw) {
        self.pending.push(*draw);
    }

    fn end_pass(&mut self) {
        let draws = std::mem::take(&mut self.pending);
        self.ensure_cell_capacity(draws.len());

        for draw in &draws {
            let key = (draw.base, draw.overlay);
            if self.pair_groups.contains_key(&key) {
                continue;
            }
            if let Some(group) = self.pair_group(key) {
                self.pair_groups.insert(key, group);
            }
        }

        // All buffer writes happen before the pass; WebGL2 stalls on mid-pass writes.
        let stride = self.cell_stride as usize;
        self.cell_staging.clear();
        self.cell_staging.resize(draws.len() * stride, 0);
        for (i, draw) in draws.iter().enumerate() {
            let bytes = bytemuck::bytes_of(&draw.uniforms);
            self.cell_staging[i * stride..i * stride + bytes.len()].copy_from_slice(bytes);
        }
        if !self.cell_staging.is_empty() {
            self.queue.write_buffer(&self.cell_buffer, 0, &self.cell_staging);
        }

        let Some(target) = self.target.as_ref() else {
            return;
        };
        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("mosaic-encoder"),
        });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("mosaic-pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &target.color_view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(BACKGROUND),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &target.depth_view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                ..Default::default()
            });

            if let Some(mesh) = self.mesh.as_ref() {
                pass.set_pipeline(&self.terrain_pipeline);
                pass.set_bind_group(0, &self.frame_bind_group, &[]);
                pass.set_vertex_buffer(0, mesh.vertices.slice(..));
                pass.set_index_buffer(mesh.indices.slice(..), wgpu::IndexFormat::Uint32);

                for (i, draw) in draws.iter().enumerate() {
                    let Some(textures) = self.pair_groups.get(&(draw.base, draw.overlay)) else {
                        continue;
                    };
                    let offset = (i as u64 * self.cell_stride) as u32;
                    pass.set_bind_group(1, &self.cell_bind_group, &[offset]);
                    pass.set_bind_group(2, textures, &[]);
                    pass.draw_indexed(0..mesh.index_count, 0, 0..1);
                }
            }
        }
        self.queue.submit(std::iter::once(encoder.finish()));
    }

    fn present(&mut self, placement: &FramePlacement) {
        self.queue
            .write_buffer(&self.present_buffer, 0, bytemuck::bytes_of(&placement.uniforms()));

        let output = match self.surface.get_current_texture() {
            Ok(t) => t,
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                self.surface.configure(&self.device, &self.surface_config);
                return;
            }
            Err(_) => return,
        };
        let view = output.texture.create_view(&wgpu::TextureViewDescriptor::default());

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("present-encoder"),
        });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("present-pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(BACKGROUND),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                ..Default::default()
            });
            if let Some(target) = self.target.as_ref() {
                pass.set_pipeline(&self.present_pipeline);
                pass.set_bind_group(0, &target.present_bind_group, &[]);
                pass.draw(0..3, 0..1);
            }
        }
        self.queue.submit(std::iter::once(encoder.finish()));
        output.present();
    }
}

fn create_cell_buffer(
    device: &wgpu::Device,
    layout: &wgpu::BindGroupLayout,
    capacity: usize,
    stride: u64,
) -> (wgpu::Buffer, wgpu::BindGroup) {
    let buffer = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("cell-ubo"),
        size: capacity as u64 * stride,
        usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });
    let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("cell-bg"),
        layout,
        entries: &[wgpu::BindGroupEntry {
            binding: 0,
            resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                buffer: &buffer,
                offset: 0,
                size: NonZeroU64::new(std::mem::size_of::<CellUniforms>() as u64),
            }),
        }],
    });
    (buffer, bind_group)
}

fn upload_rgba(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    label: &str,
    width: u32,
    height: u32,
    pixels: &[u8],
) -> TileTexture {
    let size = wgpu::Extent3d {
        width,
        height,
        depth_or_array_layers: 1,
    };
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
    queue.write_texture(
        wgpu::TexelCopyTextureInfo {
            texture: &texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        pixels,
        wgpu::TexelCopyBufferLayout {
            offset: 0,
            bytes_per_row: Some(4 * width),
            rows_per_image: Some(height),
        },
        size,
    );
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    TileTexture {
        _texture: texture,
        view,
    }
}
