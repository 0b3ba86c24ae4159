use bytemuck::{Pod, Zeroable};
use image::RgbaImage;

use crate::config::KeyConfig;
use crate::error::{KeyerError, Result};

const SHADER: &str = r#"
struct KeyParams {
  key_color: vec4<f32>,
  // x: similarity, y: smoothness, z: spill
  params: vec4<f32>,
};

@group(0) @binding(0) var t_src: texture_2d<f32>;
@group(0) @binding(1) var<uniform> key: KeyParams;

@vertex
fn vs(@builtin(vertex_index) vi: u32) -> @builtin(position) vec4<f32> {
  var p = array<vec2<f32>, 3>(
    vec2<f32>(-1.0, -1.0),
    vec2<f32>( 3.0, -1.0),
    vec2<f32>(-1.0,  3.0),
  );
  return vec4<f32>(p[vi], 0.0, 1.0);
}

fn rgb_to_uv(rgb: vec3<f32>) -> vec2<f32> {
  return vec2<f32>(
    rgb.r * -0.169 + rgb.g * -0.331 + rgb.b *  0.5   + 0.5,
    rgb.r *  0.5   + rgb.g * -0.419 + rgb.b * -0.081 + 0.5,
  );
}

@fragment
fn fs(@builtin(position) pos: vec4<f32>) -> @location(0) vec4<f32> {
  let rgb = textureLoad(t_src, vec2<i32>(pos.xy), 0).rgb;
  let dist = distance(rgb_to_uv(rgb), rgb_to_uv(key.key_color.rgb));
  let base = dist - key.params.x;
  let alpha = pow(clamp(base / key.params.y, 0.0, 1.0), 1.5);
  let spill = pow(clamp(base / key.params.z, 0.0, 1.0), 1.5);
  let gray = clamp(dot(rgb, vec3<f32>(0.2126, 0.7152, 0.0722)), 0.0, 1.0);
  return vec4<f32>(mix(vec3<f32>(gray), rgb, spill), alpha);
}
"#;

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct KeyUniforms {
    key_color: [f32; 4],
    params: [f32; 4],
}

impl KeyUniforms {
    fn new(config: &KeyConfig) -> Self {
        let [r, g, b] = config.key_color().to_array();
        Self {
            key_color: [r, g, b, 1.0],
            params: [config.similarity(), config.smoothness(), config.spill(), 0.0],
        }
    }
}

/// Keyed output living on the GPU, for consumers that sample it directly.
#[derive(Debug, Clone)]
pub struct GpuTexture {
    pub texture: wgpu::Texture,
    pub width: u32,
    pub height: u32,
}

/// Source, target and readback resources sized to the current frame.
struct Targets {
    width: u32,
    height: u32,
    source: wgpu::Texture,
    target: wgpu::Texture,
    target_view: wgpu::TextureView,
    readback: wgpu::Buffer,
    readback_bytes_per_row: u32,
    bind_group: wgpu::BindGroup,
}

struct Resources {
    device: wgpu::Device,
    queue: wgpu::Queue,
    pipeline: wgpu::RenderPipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    uniforms: wgpu::Buffer,
    targets: Option<Targets>,
}

/// Shader keyer. `bind` uploads a frame and the key parameters, `render`
/// runs the fragment program into the target texture.
pub struct GpuKeyer {
    resources: Option<Resources>,
    bound: bool,
}

impl GpuKeyer {
    /// Create the device and program. Any failure here is final for the GPU path.
    pub fn new() -> Result<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .map_err(|e| match e {
            wgpu::RequestAdapterError::NotFound { .. } => {
                KeyerError::resource_init("no gpu adapter available")
            }
            other => KeyerError::resource_init(format!("wgpu request_adapter failed: {other:?}")),
        })?;

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("chroma_key_device"),
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::default(),
            experimental_features: wgpu::ExperimentalFeatures::default(),
            memory_hints: wgpu::MemoryHints::Performance,
            trace: wgpu::Trace::Off,
        }))
        .map_err(|e| KeyerError::resource_init(format!("wgpu request_device failed: {e:?}")))?;

        tracing::info!("GPU keyer using {}", adapter.get_info().name);

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("chroma_key_bgl"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        multisampled: false,
                        view_dimension: wgpu::TextureViewDimension::D2,
                        sample_type: wgpu::TextureSampleType::Float { filterable: false },
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("chroma_key_shader"),
            source: wgpu::ShaderSource::Wgsl(SHADER.into()),
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("chroma_key_pl"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("chroma_key_pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs"),
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                buffers: &[],
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs"),
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                targets: &[Some(wgpu::ColorTargetState {
                    format: wgpu::TextureFormat::Rgba8Unorm,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
            }),
            primitive: wgpu::PrimitiveState::default(),
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        let uniforms = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("chroma_key_uniforms"),
            size: std::mem::size_of::<KeyUniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        Ok(Self {
            resources: Some(Resources {
                device,
                queue,
                pipeline,
                bind_group_layout,
                uniforms,
                targets: None,
            }),
            bound: false,
        })
    }

    fn resources(&mut self) -> Result<&mut Resources> {
        self.resources
            .as_mut()
            .ok_or(KeyerError::ResourceReleased("gpu keyer"))
    }

    /// Upload `source` and the key parameters for the next `render`.
    ///
    /// Returns `Ok(false)` without touching the GPU for a source with no pixels.
    pub fn bind(&mut self, source: &RgbaImage, config: &KeyConfig) -> Result<bool> {
        let res = self.resources()?;
        let (width, height) = source.dimensions();
        if width == 0 || height == 0 {
            return Ok(false);
        }

        res.ensure_targets(width, height)?;
        let targets = res
            .targets
            .as_ref()
            .ok_or_else(|| KeyerError::resource_init("keying targets missing"))?;

        res.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &targets.source,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            source.as_raw(),
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(width * 4),
                rows_per_image: Some(height),
            },
            extent(width, height),
        );
        res.queue.write_buffer(
            &res.uniforms,
            0,
            bytemuck::bytes_of(&KeyUniforms::new(config)),
        );

        self.bound = true;
        Ok(true)
    }

    /// Run the key program over the bound frame.
    pub fn render(&mut self) -> Result<GpuTexture> {
        if !self.bound {
            return Err(KeyerError::invalid_state("render called without a bound frame"));
        }
        self.bound = false;

        let res = self.resources()?;
        let targets = res
            .targets
            .as_ref()
            .ok_or_else(|| KeyerError::resource_init("keying targets missing"))?;

        let mut encoder = res
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("chroma_key_encoder"),
            });
        {
            let mut rp = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("chroma_key_rp"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &targets.target_view,
                    resolve_target: None,
                    depth_slice: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            rp.set_pipeline(&res.pipeline);
            rp.set_bind_group(0, &targets.bind_group, &[]);
            rp.draw(0..3, 0..1);
        }
        res.queue.submit(Some(encoder.finish()));

        Ok(GpuTexture {
            texture: targets.target.clone(),
            width: targets.width,
            height: targets.height,
        })
    }

    /// Copy the last rendered frame back into CPU memory.
    pub fn read_back(&mut self) -> Result<RgbaImage> {
        let res = self.resources()?;
        let targets = res
            .targets
            .as_ref()
            .ok_or_else(|| KeyerError::invalid_state("nothing rendered yet"))?;
        let (width, height) = (targets.width, targets.height);

        let mut encoder = res
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("chroma_key_readback"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &targets.target,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &targets.readback,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(targets.readback_bytes_per_row),
                    rows_per_image: Some(height),
                },
            },
            extent(width, height),
        );
        res.queue.submit(Some(encoder.finish()));

        let slice = targets.readback.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |r| {
            let _ = tx.send(r);
        });
        res.device
            .poll(wgpu::PollType::wait_indefinitely())
            .map_err(|e| KeyerError::output(format!("wgpu poll failed: {e:?}")))?;
        rx.recv()
            .map_err(|_| KeyerError::output("readback channel closed"))?
            .map_err(|e| KeyerError::output(format!("readback map failed: {e:?}")))?;

        let mapped = slice.get_mapped_range();
        let row_bytes = width as usize * 4;
        let padded = targets.readback_bytes_per_row as usize;
        let mut out = Vec::with_capacity(row_bytes * height as usize);
        for row in 0..height as usize {
            let start = row * padded;
            out.extend_from_slice(&mapped[start..start + row_bytes]);
        }
        drop(mapped);
        targets.readback.unmap();

        RgbaImage::from_raw(width, height, out)
            .ok_or_else(|| KeyerError::output("readback size mismatch"))
    }

    /// Destroy textures and buffers. Returns `true` only on the first call.
    pub fn release(&mut self) -> bool {
        let Some(res) = self.resources.take() else {
            return false;
        };
        if let Some(targets) = res.targets {
            targets.source.destroy();
            targets.target.destroy();
            targets.readback.destroy();
        }
        res.uniforms.destroy();
        tracing::debug!("GPU keyer resources released");
        true
    }

    pub fn is_released(&self) -> bool {
        self.resources.is_none()
    }
}

impl Resources {
    fn ensure_targets(&mut self, width: u32, height: u32) -> Result<()> {
        if let Some(t) = &self.targets {
            if t.width == width && t.height == height {
                return Ok(());
            }
        }
        tracing::debug!("Resizing GPU keying targets to {}x{}", width, height);

        if let Some(old) = self.targets.take() {
            old.source.destroy();
            old.target.destroy();
            old.readback.destroy();
        }

        let source = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("chroma_key_source"),
            size: extent(width, height),
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let target = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("chroma_key_target"),
            size: extent(width, height),
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let source_view = source.create_view(&wgpu::TextureViewDescriptor::default());
        let target_view = target.create_view(&wgpu::TextureViewDescriptor::default());

        let readback_bytes_per_row = align_to(
            width
                .checked_mul(4)
                .ok_or_else(|| KeyerError::resource_init("frame width overflow"))?,
            wgpu::COPY_BYTES_PER_ROW_ALIGNMENT,
        );
        let readback = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("chroma_key_readback"),
            size: u64::from(readback_bytes_per_row) * u64::from(height),
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("chroma_key_bg"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&source_view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: self.uniforms.as_entire_binding(),
                },
            ],
        });

        self.targets = Some(Targets {
            width,
            height,
            source,
            target,
            target_view,
            readback,
            readback_bytes_per_row,
            bind_group,
        });
        Ok(())
    }
}

fn extent(width: u32, height: u32) -> wgpu::Extent3d {
    wgpu::Extent3d {
        width,
        height,
        depth_or_array_layers: 1,
    }
}

fn align_to(value: u32, alignment: u32) -> u32 {
    value.div_ceil(alignment) * alignment
}
