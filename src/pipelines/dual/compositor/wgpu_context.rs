// SPDX-License-Identifier: GPL-3.0-only

//! wgpu compositing context
//!
//! Renders into an off-screen RGBA8 target the size of the encoder input,
//! reads it back through a row-padded staging buffer and submits the
//! packed frame to the bound [`InputSurface`].

use crate::backends::camera::CameraFrame;
use crate::constants::pip;
use crate::errors::CompositorError;
use crate::gpu::{self, wgpu};
use crate::media::codec::{InputSurface, RenderedFrame};
use crate::shaders::{COMPOSITOR_SHADER, DrawParams, ProgramId, VERTEX_ENTRY};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use super::context::{CompositingContext, DrawCommand, SinkId};

const TARGET_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

/// Texture backing one frame sink
struct SinkTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    width: u32,
    height: u32,
}

pub struct WgpuCompositingContext {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    width: u32,
    height: u32,
    target: wgpu::Texture,
    target_view: wgpu::TextureView,
    readback: wgpu::Buffer,
    bind_group_layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
    programs: HashMap<ProgramId, wgpu::RenderPipeline>,
    sinks: HashMap<SinkId, SinkTexture>,
    // Bound for programs that sample nothing
    blank: SinkTexture,
    uniforms: Vec<wgpu::Buffer>,
    surface: Option<Arc<dyn InputSurface>>,
    released: bool,
}

impl WgpuCompositingContext {
    /// Create the device and all static GPU objects
    ///
    /// Blocks on device creation, so call it from the render thread.
    pub fn new(width: u32, height: u32) -> Result<Self, CompositorError> {
        let (device, queue, info) =
            pollster::block_on(gpu::create_render_device("dualcam compositor"))
                .map_err(CompositorError::Init)?;

        if width > info.max_texture_dimension || height > info.max_texture_dimension {
            return Err(CompositorError::Init(format!(
                "Output {}x{} exceeds GPU limit {}",
                width, height, info.max_texture_dimension
            )));
        }

        info!(
            adapter_name = %info.adapter_name,
            backend = ?info.backend,
            width,
            height,
            "GPU device created for compositing"
        );

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("pip compositor shader"),
            source: wgpu::ShaderSource::Wgsl(COMPOSITOR_SHADER.into()),
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("pip bind group layout"),
            entries: &[
                // Draw parameters
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                // Source texture
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
                // Sampler
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("pip pipeline layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let programs = ProgramId::ALL
            .into_iter()
            .map(|program| {
                let label = program.key();
                let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                    label: Some(label.as_str()),
                    layout: Some(&pipeline_layout),
                    vertex: wgpu::VertexState {
                        module: &shader,
                        entry_point: Some(VERTEX_ENTRY),
                        buffers: &[],
                        compilation_options: Default::default(),
                    },
                    primitive: wgpu::PrimitiveState {
                        topology: wgpu::PrimitiveTopology::TriangleStrip,
                        ..Default::default()
                    },
                    depth_stencil: None,
                    multisample: wgpu::MultisampleState {
                        count: 1,
                        mask: !0,
                        alpha_to_coverage_enabled: false,
                    },
                    fragment: Some(wgpu::FragmentState {
                        module: &shader,
                        entry_point: Some(program.fragment_entry()),
                        targets: &[Some(wgpu::ColorTargetState {
                            format: TARGET_FORMAT,
                            blend: Some(wgpu::BlendState::ALPHA_BLENDING),
                            write_mask: wgpu::ColorWrites::ALL,
                        })],
                        compilation_options: Default::default(),
                    }),
                    multiview: None,
                    cache: None,
                });
                debug!(program = %label, "Created render program");
                (program, pipeline)
            })
            .collect();

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("pip sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        let target = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("pip render target"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: TARGET_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let target_view = target.create_view(&wgpu::TextureViewDescriptor::default());

        let readback = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("pip readback buffer"),
            size: gpu::padded_bytes_per_row(width) as u64 * height as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let blank = create_sink_texture(&device, &queue, "blank sink", 1, 1);

        Ok(Self {
            device,
            queue,
            width,
            height,
            target,
            target_view,
            readback,
            bind_group_layout,
            sampler,
            programs,
            sinks: HashMap::new(),
            blank,
            uniforms: Vec::new(),
            surface: None,
            released: false,
        })
    }

    fn ensure_uniforms(&mut self, count: usize) {
        while self.uniforms.len() < count {
            self.uniforms.push(self.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("pip draw params"),
                size: std::mem::size_of::<DrawParams>() as u64,
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            }));
        }
    }

    fn check_live(&self) -> Result<(), CompositorError> {
        if self.released {
            Err(CompositorError::Released)
        } else {
            Ok(())
        }
    }
}

/// A sink texture cleared to opaque black
fn create_sink_texture(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    label: &str,
    width: u32,
    height: u32,
) -> SinkTexture {
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
        format: TARGET_FORMAT,
        usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        view_formats: &[],
    });

    let black: Vec<u8> = [0u8, 0, 0, 255].repeat((width * height) as usize);
    write_rgba(queue, &texture, &black, width, height, width * 4);

    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    SinkTexture {
        texture,
        view,
        width,
        height,
    }
}

fn write_rgba(
    queue: &wgpu::Queue,
    texture: &wgpu::Texture,
    data: &[u8],
    width: u32,
    height: u32,
    stride: u32,
) {
    queue.write_texture(
        wgpu::TexelCopyTextureInfo {
            texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        data,
        wgpu::TexelCopyBufferLayout {
            offset: 0,
            bytes_per_row: Some(stride),
            rows_per_image: Some(height),
        },
        wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
    );
}

fn draw_params(command: &DrawCommand) -> DrawParams {
    DrawParams {
        rect: [
            command.quad.left,
            command.quad.bottom,
            command.quad.right,
            command.quad.top,
        ],
        tex_transform: DrawParams::transform_from_slice(&command.tex_transform),
        color: command.color,
        shape: [command.size_px.0, command.size_px.1, command.radius_px, 0.0],
    }
}

impl CompositingContext for WgpuCompositingContext {
    fn bind(&mut self, surface: Arc<dyn InputSurface>) -> Result<(), CompositorError> {
        self.check_live()?;
        let (width, height) = surface.dimensions();
        if (width, height) != (self.width, self.height) {
            return Err(CompositorError::Init(format!(
                "Surface {}x{} doesn't match render target {}x{}",
                width, height, self.width, self.height
            )));
        }
        self.surface = Some(surface);
        Ok(())
    }

    fn create_frame_sink(&mut self, sink: SinkId) -> Result<(), CompositorError> {
        self.check_live()?;
        let texture = create_sink_texture(&self.device, &self.queue, "frame sink", 1, 1);
        self.sinks.insert(sink, texture);
        debug!(?sink, "Created frame sink");
        Ok(())
    }

    fn upload(&mut self, sink: SinkId, frame: &CameraFrame) -> Result<(), CompositorError> {
        self.check_live()?;
        let needed = frame.stride as usize * frame.height as usize;
        if frame.width == 0 || frame.height == 0 || frame.data.len() < needed {
            return Err(CompositorError::Upload(format!(
                "Frame {}x{} stride {} has {} bytes",
                frame.width,
                frame.height,
                frame.stride,
                frame.data.len()
            )));
        }

        let current = self.sinks.get(&sink).ok_or(CompositorError::MissingSink)?;
        if current.width != frame.width || current.height != frame.height {
            debug!(?sink, width = frame.width, height = frame.height, "Resizing frame sink");
            let texture = create_sink_texture(
                &self.device,
                &self.queue,
                "frame sink",
                frame.width,
                frame.height,
            );
            self.sinks.insert(sink, texture);
        }

        let target = self.sinks.get(&sink).ok_or(CompositorError::MissingSink)?;
        write_rgba(
            &self.queue,
            &target.texture,
            &frame.data.as_slice()[..needed],
            frame.width,
            frame.height,
            frame.stride,
        );
        Ok(())
    }

    fn render_pass(&mut self, commands: &[DrawCommand]) -> Result<(), CompositorError> {
        self.check_live()?;
        self.ensure_uniforms(commands.len());

        let mut bind_groups = Vec::with_capacity(commands.len());
        for (command, uniform) in commands.iter().zip(&self.uniforms) {
            self.queue
                .write_buffer(uniform, 0, bytemuck::bytes_of(&draw_params(command)));

            let source = match command.source {
                Some(sink) => self.sinks.get(&sink).ok_or(CompositorError::MissingSink)?,
                None => &self.blank,
            };
            bind_groups.push(self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("pip draw bind group"),
                layout: &self.bind_group_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: uniform.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::TextureView(&source.view),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: wgpu::BindingResource::Sampler(&self.sampler),
                    },
                ],
            }));
        }

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("pip render encoder"),
            });
        {
            let [r, g, b, a] = pip::CLEAR_COLOR;
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("pip composite pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &self.target_view,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color { r, g, b, a }),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            for (command, bind_group) in commands.iter().zip(&bind_groups) {
                let pipeline = self
                    .programs
                    .get(&command.program)
                    .ok_or_else(|| CompositorError::UnknownProgram(command.program.key()))?;
                pass.set_pipeline(pipeline);
                pass.set_bind_group(0, bind_group, &[]);
                pass.draw(0..4, 0..1);
            }
        }
        self.queue.submit(Some(encoder.finish()));
        Ok(())
    }

    fn present(&mut self) -> Result<(), CompositorError> {
        self.check_live()?;
        let surface = self
            .surface
            .clone()
            .ok_or_else(|| CompositorError::Present("No surface bound".into()))?;

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("pip readback encoder"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &self.target,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &self.readback,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(gpu::padded_bytes_per_row(self.width)),
                    rows_per_image: Some(self.height),
                },
            },
            wgpu::Extent3d {
                width: self.width,
                height: self.height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(Some(encoder.finish()));

        let padded = pollster::block_on(gpu::read_buffer_async(&self.device, &self.readback))
            .map_err(CompositorError::Present)?;
        let data = gpu::strip_row_padding(&padded, self.width, self.height);

        surface
            .submit(RenderedFrame {
                width: self.width,
                height: self.height,
                data,
            })
            .map_err(|e| CompositorError::Present(e.to_string()))
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.surface = None;
        self.sinks.clear();
        self.uniforms.clear();
        self.programs.clear();
        self.readback.destroy();
        self.target.destroy();
        debug!("GPU compositing context released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::camera::IDENTITY_TRANSFORM;
    use crate::errors::EncoderError;
    use crate::pipelines::dual::geometry::Quad;
    use parking_lot::Mutex;

    struct CaptureSurface {
        frames: Mutex<Vec<RenderedFrame>>,
    }

    impl InputSurface for CaptureSurface {
        fn dimensions(&self) -> (u32, u32) {
            (64, 36)
        }

        fn submit(&self, frame: RenderedFrame) -> Result<(), EncoderError> {
            self.frames.lock().push(frame);
            Ok(())
        }
    }

    #[test]
    fn test_renders_source_into_surface() {
        // This test requires a GPU, so it may be skipped in CI
        let mut context = match WgpuCompositingContext::new(64, 36) {
            Ok(context) => context,
            Err(e) => {
                println!("Skipping test (no GPU): {}", e);
                return;
            }
        };

        let surface = Arc::new(CaptureSurface {
            frames: Mutex::new(Vec::new()),
        });
        context.bind(surface.clone()).unwrap();
        context.create_frame_sink(SinkId::Primary).unwrap();

        let red = [255u8, 0, 0, 255].repeat(4);
        context
            .upload(SinkId::Primary, &CameraFrame::rgba(2, 2, red))
            .unwrap();
        context
            .render_pass(&[DrawCommand {
                program: ProgramId::Textured,
                quad: Quad::FULL,
                source: Some(SinkId::Primary),
                tex_transform: IDENTITY_TRANSFORM,
                color: [1.0; 4],
                size_px: (64.0, 36.0),
                radius_px: 0.0,
            }])
            .unwrap();
        context.present().unwrap();

        let frames = surface.frames.lock();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data.len(), 64 * 36 * 4);
        let center = ((18 * 64 + 32) * 4) as usize;
        assert_eq!(&frames[0].data[center..center + 4], &[255, 0, 0, 255]);

        drop(frames);
        context.release();
        context.release();
        assert!(matches!(context.present(), Err(CompositorError::Released)));
    }

    #[test]
    fn test_rejects_mismatched_surface() {
        let mut context = match WgpuCompositingContext::new(32, 32) {
            Ok(context) => context,
            Err(e) => {
                println!("Skipping test (no GPU): {}", e);
                return;
            }
        };
        let surface = Arc::new(CaptureSurface {
            frames: Mutex::new(Vec::new()),
        });
        assert!(context.bind(surface).is_err());
    }
}
