//! GPU objects shared by all winit windows, and the per-window render targets.

use image::RgbaImage;

use crate::errors::{PsywinError, Result};

/// Instance, adapter, device and queue. Created once, from the first window's surface.
pub struct GpuState {
    pub instance: wgpu::Instance,
    pub adapter: wgpu::Adapter,
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
}

impl GpuState {
    pub fn new(instance: wgpu::Instance, surface: &wgpu::Surface<'_>) -> Result<Self> {
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            force_fallback_adapter: false,
            compatible_surface: Some(surface),
        }));
        let adapter = match adapter {
            Some(adapter) => adapter,
            None => {
                log::warn!("No hardware adapter found, falling back to a software renderer");
                pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
                    power_preference: wgpu::PowerPreference::HighPerformance,
                    force_fallback_adapter: true,
                    compatible_surface: Some(surface),
                }))
                .ok_or_else(|| PsywinError::backend_init("winit", "no suitable GPU adapter"))?
            }
        };

        let info = adapter.get_info();
        log::info!(
            "Using {} ({:?}, driver {} {})",
            info.name,
            info.backend,
            info.driver,
            info.driver_info
        );

        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("psywin device"),
                // allows sample counts other than 1 and 4
                required_features: adapter.features()
                    & wgpu::Features::TEXTURE_ADAPTER_SPECIFIC_FORMAT_FEATURES,
                required_limits: wgpu::Limits::default().using_resolution(adapter.limits()),
            },
            None,
        ))
        .map_err(|e| PsywinError::backend_init("winit", e))?;

        Ok(Self {
            instance,
            adapter,
            device,
            queue,
        })
    }

    /// Driver description used to pick the gamma ramp type.
    pub fn driver(&self) -> String {
        let info = self.adapter.get_info();
        format!("{} {} {}", info.name, info.driver, info.driver_info)
    }

    /// Largest MSAA sample count `format` can be rendered with.
    pub fn max_samples(&self, format: wgpu::TextureFormat) -> u32 {
        let flags = self.adapter.get_texture_format_features(format).flags;
        let adapter_specific = self
            .device
            .features()
            .contains(wgpu::Features::TEXTURE_ADAPTER_SPECIFIC_FORMAT_FEATURES);
        [16, 8, 4, 2]
            .into_iter()
            .find(|&n| flags.sample_count_supported(n) && (adapter_specific || n == 4))
            .unwrap_or(1)
    }

    pub fn supports_float_targets(&self) -> bool {
        self.adapter
            .get_texture_format_features(wgpu::TextureFormat::Rgba16Float)
            .allowed_usages
            .contains(wgpu::TextureUsages::RENDER_ATTACHMENT)
    }
}

/// Front and back buffers for one window. The back buffer is drawn into (through the
/// MSAA texture when multisampling); the front buffer keeps the last presented frame.
pub struct RenderTargets {
    pub format: wgpu::TextureFormat,
    pub size: (u32, u32),
    pub samples: u32,
    pub front: wgpu::Texture,
    pub back: wgpu::Texture,
    pub msaa: Option<wgpu::Texture>,
}

impl RenderTargets {
    pub fn new(device: &wgpu::Device, format: wgpu::TextureFormat, size: (u32, u32), samples: u32) -> Self {
        let extent = extent(size);
        let texture = |label, sample_count, usage| {
            device.create_texture(&wgpu::TextureDescriptor {
                label: Some(label),
                size: extent,
                mip_level_count: 1,
                sample_count,
                dimension: wgpu::TextureDimension::D2,
                format,
                usage,
                view_formats: &[],
            })
        };
        let usage = wgpu::TextureUsages::RENDER_ATTACHMENT
            | wgpu::TextureUsages::TEXTURE_BINDING
            | wgpu::TextureUsages::COPY_SRC
            | wgpu::TextureUsages::COPY_DST;
        Self {
            format,
            size: (size.0.max(1), size.1.max(1)),
            samples,
            front: texture("front buffer", 1, usage),
            back: texture("back buffer", 1, usage),
            msaa: (samples > 1)
                .then(|| texture("msaa buffer", samples, wgpu::TextureUsages::RENDER_ATTACHMENT)),
        }
    }

    pub fn resized(&self, device: &wgpu::Device, size: (u32, u32)) -> Self {
        Self::new(device, self.format, size, self.samples)
    }

    pub fn extent(&self) -> wgpu::Extent3d {
        extent(self.size)
    }

    pub fn clear(&self, gpu: &GpuState, color: wgpu::Color) {
        let back = self.back.create_view(&wgpu::TextureViewDescriptor::default());
        let msaa = self
            .msaa
            .as_ref()
            .map(|t| t.create_view(&wgpu::TextureViewDescriptor::default()));
        let (view, resolve_target) = match &msaa {
            Some(msaa) => (msaa, Some(&back)),
            None => (&back, None),
        };

        let mut encoder = gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("clear") });
        {
            let _pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("clear"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view,
                    resolve_target,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(color),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
        }
        gpu.queue.submit(Some(encoder.finish()));
    }

    /// Copy a buffer back to the CPU.
    pub fn read(&self, gpu: &GpuState, front: bool) -> Result<RgbaImage> {
        let texture = if front { &self.front } else { &self.back };
        let (width, height) = self.size;
        let bytes_per_pixel = match self.format {
            wgpu::TextureFormat::Rgba16Float => 8,
            _ => 4,
        };
        let unpadded = width * bytes_per_pixel;
        let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let padded = (unpadded + align - 1) / align * align;

        let buffer = gpu.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("read pixels"),
            size: padded as u64 * height as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });
        let mut encoder = gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("read pixels") });
        encoder.copy_texture_to_buffer(
            texture.as_image_copy(),
            wgpu::ImageCopyBuffer {
                buffer: &buffer,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(padded),
                    rows_per_image: Some(height),
                },
            },
            self.extent(),
        );
        gpu.queue.submit(Some(encoder.finish()));

        let slice = buffer.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        gpu.device.poll(wgpu::Maintain::Wait);
        rx.recv()
            .map_err(|e| PsywinError::CustomError(format!("pixel readback was dropped: {e}")))?
            .map_err(|e| PsywinError::CustomError(format!("could not map pixel buffer: {e}")))?;

        let mut pixels = Vec::with_capacity((width * height * 4) as usize);
        {
            let data = slice.get_mapped_range();
            for row in 0..height as usize {
                let start = row * padded as usize;
                let src = &data[start..start + unpadded as usize];
                if bytes_per_pixel == 8 {
                    let values: &[half::f16] = bytemuck::cast_slice(src);
                    pixels.extend(
                        values
                            .iter()
                            .map(|v| (v.to_f32().clamp(0.0, 1.0) * 255.0).round() as u8),
                    );
                } else {
                    pixels.extend_from_slice(src);
                }
            }
        }
        buffer.unmap();

        RgbaImage::from_raw(width, height, pixels)
            .ok_or_else(|| PsywinError::CustomError("pixel buffer has the wrong size".into()))
    }
}

fn extent((width, height): (u32, u32)) -> wgpu::Extent3d {
    wgpu::Extent3d {
        width: width.max(1),
        height: height.max(1),
        depth_or_array_layers: 1,
    }
}

/// Draws a texture onto the swap-chain image with a single full-screen triangle.
pub struct BlitPipeline {
    pipeline: wgpu::RenderPipeline,
    layout: wgpu::BindGroupLayout,
}

impl BlitPipeline {
    pub fn new(device: &wgpu::Device, target_format: wgpu::TextureFormat) -> Self {
        let shader = device.create_shader_module(wgpu::include_wgsl!("blit.wgsl"));
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("blit"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Texture {
                    sample_type: wgpu::TextureSampleType::Float { filterable: false },
                    view_dimension: wgpu::TextureViewDimension::D2,
                    multisampled: false,
                },
                count: None,
            }],
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("blit"),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });
        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("blit"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: "vs_main",
                buffers: &[],
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: "fs_main",
                targets: &[Some(wgpu::ColorTargetState {
                    format: target_format,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
            }),
            primitive: wgpu::PrimitiveState::default(),
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
        });
        Self { pipeline, layout }
    }

    pub fn blit(
        &self,
        device: &wgpu::Device,
        encoder: &mut wgpu::CommandEncoder,
        source: &wgpu::TextureView,
        target: &wgpu::TextureView,
    ) {
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("blit"),
            layout: &self.layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::TextureView(source),
            }],
        });
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("blit"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: target,
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
        pass.set_pipeline(&self.pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.draw(0..3, 0..1);
    }
}
