//! The default backend: winit for windows and events, wgpu for drawing.
//!
//! All windows of a context share one event loop and one GPU device. Each window owns a
//! surface plus an off-screen front/back buffer pair, so frames can be read back after
//! they were presented.

mod gpu;

use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use derive_debug::Dbg;
use image::RgbaImage;
use winit::dpi::{LogicalSize, PhysicalPosition, PhysicalSize, Size};
use winit::event::{ElementState, Event, MouseButton, WindowEvent};
use winit::event_loop::{EventLoop, EventLoopBuilder};
use winit::keyboard::Key;
use winit::monitor::MonitorHandle;
use winit::platform::pump_events::{EventLoopExtPumpEvents, PumpStatus};
use winit::window::{CursorIcon, Fullscreen, WindowBuilder};

use self::gpu::{BlitPipeline, GpuState, RenderTargets};
use super::negotiate::{
    check_matching_sizes, negotiate_multisample, negotiate_video_mode, resolve_position,
    resolve_stencil_bits, select_screen, DisplayInfo, VideoMode,
};
use super::{Backend, BackendEvent, BackendRequest, CursorKind, ReadBuffer, WindowBackendKind};
use crate::context::{RenderingContext, WindowId};
use crate::errors::{PsywinError, Result};
use crate::gamma::hardware::{DisplayGamma, GammaTarget};
use crate::gamma::{GammaRamp, RampType};
use crate::visual::blend::BlendMode;

/// The event loop and GPU shared by all winit windows of a context.
pub(crate) struct WinitPlatform {
    event_loop: EventLoop<()>,
    gpu: Option<Rc<GpuState>>,
    routes: HashMap<winit::window::WindowId, WindowId>,
}

impl WinitPlatform {
    fn new() -> Result<Self> {
        let mut builder = EventLoopBuilder::new();
        // experiments may run their window off the main thread
        #[cfg(all(target_os = "linux", not(target_arch = "wasm32")))]
        {
            use winit::platform::x11::EventLoopBuilderExtX11;
            EventLoopBuilderExtX11::with_any_thread(&mut builder, true);
        }
        #[cfg(target_os = "windows")]
        {
            use winit::platform::windows::EventLoopBuilderExtWindows;
            builder.with_any_thread(true);
        }
        let event_loop = builder
            .build()
            .map_err(|e| PsywinError::backend_init("winit", e))?;
        Ok(Self {
            event_loop,
            gpu: None,
            routes: HashMap::new(),
        })
    }
}

fn display_info(monitor: &MonitorHandle) -> DisplayInfo {
    let size = monitor.size();
    let position = monitor.position();
    let refresh_hz = monitor
        .refresh_rate_millihertz()
        .map_or(60, |mhz| (mhz as f64 / 1000.0).round() as u32);
    let modes: Vec<VideoMode> = monitor
        .video_modes()
        .map(|mode| {
            VideoMode::new(
                (mode.size().width, mode.size().height),
                VideoMode::bpc_from_bit_depth(mode.bit_depth()),
                (mode.refresh_rate_millihertz() as f64 / 1000.0).round() as u32,
            )
        })
        .collect();
    let native_bpc = modes
        .iter()
        .find(|m| m.size == (size.width, size.height) && m.refresh_hz == refresh_hz)
        .map_or((8, 8, 8), |m| m.bpc);
    DisplayInfo {
        name: monitor.name().unwrap_or_default(),
        position: (position.x, position.y),
        native_mode: VideoMode::new((size.width, size.height), native_bpc, refresh_hz),
        modes,
    }
}

fn exclusive_mode(monitor: &MonitorHandle, mode: &VideoMode) -> Option<winit::monitor::VideoMode> {
    monitor.video_modes().find(|m| {
        (m.size().width, m.size().height) == mode.size
            && (m.refresh_rate_millihertz() as f64 / 1000.0).round() as u32 == mode.refresh_hz
    })
}

fn gamma_target(window: &winit::window::Window, monitor: &MonitorHandle) -> GammaTarget {
    #[cfg(target_os = "macos")]
    {
        let _ = window;
        use winit::platform::macos::MonitorHandleExtMacOS;
        GammaTarget::Quartz {
            display_id: monitor.native_id(),
        }
    }
    #[cfg(target_os = "windows")]
    {
        let _ = monitor;
        use raw_window_handle::{HasWindowHandle, RawWindowHandle};
        match window.window_handle().map(|h| h.as_raw()) {
            Ok(RawWindowHandle::Win32(handle)) => GammaTarget::Win32 {
                hwnd: handle.hwnd.get(),
            },
            _ => GammaTarget::Unsupported,
        }
    }
    #[cfg(target_os = "linux")]
    {
        let _ = monitor;
        use raw_window_handle::{HasDisplayHandle, RawDisplayHandle};
        match window.display_handle().map(|h| h.as_raw()) {
            Ok(RawDisplayHandle::Xlib(handle)) => match handle.display {
                Some(display) => GammaTarget::Xlib {
                    display: display.as_ptr(),
                    screen: handle.screen,
                },
                None => GammaTarget::Unsupported,
            },
            // Wayland has no client-side gamma access
            _ => GammaTarget::Unsupported,
        }
    }
    #[cfg(not(any(target_os = "macos", target_os = "windows", target_os = "linux")))]
    {
        let _ = (window, monitor);
        GammaTarget::Unsupported
    }
}

fn cursor_icon(cursor: CursorKind) -> CursorIcon {
    match cursor {
        CursorKind::Arrow => CursorIcon::Default,
        CursorKind::IBeam => CursorIcon::Text,
        CursorKind::Crosshair => CursorIcon::Crosshair,
        CursorKind::Hand => CursorIcon::Pointer,
        CursorKind::HResize => CursorIcon::EwResize,
        CursorKind::VResize => CursorIcon::NsResize,
        CursorKind::Help => CursorIcon::Help,
        CursorKind::No => CursorIcon::NotAllowed,
        CursorKind::Size => CursorIcon::Move,
        CursorKind::DownLeft => CursorIcon::NeswResize,
        CursorKind::DownRight => CursorIcon::NwseResize,
        CursorKind::LResize => CursorIcon::WResize,
        CursorKind::RResize => CursorIcon::EResize,
        CursorKind::UResize => CursorIcon::NResize,
        CursorKind::DResize => CursorIcon::SResize,
        CursorKind::Wait => CursorIcon::Wait,
        CursorKind::WaitArrow => CursorIcon::Progress,
    }
}

fn translate(event: WindowEvent) -> Option<BackendEvent> {
    match event {
        WindowEvent::Resized(size) => Some(BackendEvent::Resized {
            width: size.width,
            height: size.height,
        }),
        WindowEvent::CloseRequested => Some(BackendEvent::CloseRequested),
        WindowEvent::Focused(focused) => Some(BackendEvent::Focused(focused)),
        WindowEvent::CursorMoved { position, .. } => Some(BackendEvent::MouseMoved {
            x: position.x,
            y: position.y,
        }),
        WindowEvent::MouseInput { state, button, .. } => Some(BackendEvent::MouseButton {
            button: match button {
                MouseButton::Left => 0,
                MouseButton::Middle => 1,
                MouseButton::Right => 2,
                MouseButton::Back => 3,
                MouseButton::Forward => 4,
                MouseButton::Other(n) => n.min(u8::MAX as u16) as u8,
            },
            pressed: state == ElementState::Pressed,
        }),
        WindowEvent::KeyboardInput { event, .. } => Some(BackendEvent::Key {
            name: match &event.logical_key {
                Key::Character(c) => c.to_string(),
                Key::Named(named) => format!("{:?}", named).to_lowercase(),
                other => format!("{:?}", other),
            },
            pressed: event.state == ElementState::Pressed,
        }),
        _ => None,
    }
}

/// Pump the shared winit event loop once and queue events for their windows.
pub(crate) fn pump_events(ctx: &RenderingContext) -> Result<()> {
    let mut routed = Vec::new();
    {
        let mut platform = ctx.platform_mut();
        let Some(WinitPlatform {
            event_loop, routes, ..
        }) = platform.winit.as_mut()
        else {
            return Ok(());
        };
        let status = event_loop.pump_events(Some(Duration::ZERO), |event, _| {
            if let Event::WindowEvent { window_id, event } = event {
                if let (Some(id), Some(event)) = (routes.get(&window_id), translate(event)) {
                    routed.push((*id, event));
                }
            }
        });
        if let PumpStatus::Exit(code) = status {
            log::debug!("winit event loop exited with code {}", code);
        }
    }
    for (id, event) in routed {
        ctx.push_event(id, event);
    }
    Ok(())
}

#[derive(Dbg)]
pub struct WinitBackend {
    id: WindowId,
    #[dbg(placeholder = "wgpu::Surface")]
    surface: wgpu::Surface<'static>,
    #[dbg(placeholder = "winit::Window")]
    window: Arc<winit::window::Window>,
    #[dbg(placeholder = "GpuState")]
    gpu: Rc<GpuState>,
    #[dbg(placeholder = "SurfaceConfiguration")]
    config: wgpu::SurfaceConfiguration,
    #[dbg(placeholder = "RenderTargets")]
    targets: RenderTargets,
    #[dbg(placeholder = "BlitPipeline")]
    blit: BlitPipeline,
    gamma: DisplayGamma,
    mouse_visible: bool,
    blend_mode: BlendMode,
}

impl WinitBackend {
    pub fn new(ctx: &RenderingContext, owner: WindowId, request: &mut BackendRequest) -> Result<Self> {
        let mut platform = ctx.platform_mut();
        if platform.winit.is_none() {
            platform.winit = Some(WinitPlatform::new()?);
        }
        let Some(shared) = platform.winit.as_mut() else {
            return Err(PsywinError::backend_init("winit", "event loop unavailable"));
        };

        let monitors: Vec<MonitorHandle> = shared.event_loop.available_monitors().collect();
        let screen = select_screen(request.screen, monitors.len())?;
        request.screen = screen;
        let monitor = monitors[screen].clone();
        let display = display_info(&monitor);
        log::debug!("Opening window on screen {} ({})", screen, display.name);

        resolve_stencil_bits(request);
        if request.stereo {
            log::warn!("Stereo (quad-buffered) windows are not supported by the winit backend. Disabling.");
            request.stereo = false;
        }
        let mode = negotiate_video_mode(&display, request);
        let position = resolve_position(&display, request);

        let fullscreen = request.fullscr.then(|| match exclusive_mode(&monitor, &mode.mode) {
            Some(video_mode) => Fullscreen::Exclusive(video_mode),
            None => Fullscreen::Borderless(Some(monitor.clone())),
        });
        let size: Size = if request.use_retina {
            PhysicalSize::new(request.size.0, request.size.1).into()
        } else {
            LogicalSize::new(request.size.0 as f64, request.size.1 as f64).into()
        };
        let window = WindowBuilder::new()
            .with_title(request.title.clone())
            .with_inner_size(size)
            .with_position(PhysicalPosition::new(position.0, position.1))
            .with_decorations(request.allow_gui)
            .with_fullscreen(fullscreen)
            .build(&shared.event_loop)
            .map_err(|e| PsywinError::backend_init("winit", e))?;
        let window = Arc::new(window);
        if !request.allow_gui {
            window.set_cursor_visible(false);
        }

        let (gpu, surface) = match &shared.gpu {
            Some(gpu) => {
                let surface = gpu
                    .instance
                    .create_surface(window.clone())
                    .map_err(|e| PsywinError::backend_init("winit", e))?;
                (gpu.clone(), surface)
            }
            None => {
                let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
                    backends: wgpu::Backends::all(),
                    ..Default::default()
                });
                let surface = instance
                    .create_surface(window.clone())
                    .map_err(|e| PsywinError::backend_init("winit", e))?;
                let gpu = Rc::new(GpuState::new(instance, &surface)?);
                shared.gpu = Some(gpu.clone());
                (gpu, surface)
            }
        };
        drop(platform);

        let caps = surface.get_capabilities(&gpu.adapter);
        let surface_format = caps
            .formats
            .iter()
            .copied()
            .find(|f| !f.is_srgb())
            .or_else(|| caps.formats.first().copied())
            .ok_or_else(|| PsywinError::backend_init("winit", "surface supports no formats"))?;
        let present_mode = if request.wait_blanking {
            wgpu::PresentMode::Fifo
        } else if caps.present_modes.contains(&wgpu::PresentMode::Immediate) {
            wgpu::PresentMode::Immediate
        } else {
            wgpu::PresentMode::AutoNoVsync
        };
        let inner = window.inner_size();
        if request.fullscr {
            check_matching_sizes(request, (inner.width, inner.height));
        }
        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: inner.width.max(1),
            height: inner.height.max(1),
            present_mode,
            alpha_mode: caps
                .alpha_modes
                .first()
                .copied()
                .unwrap_or(wgpu::CompositeAlphaMode::Auto),
            view_formats: vec![],
            desired_maximum_frame_latency: 1,
        };
        surface.configure(&gpu.device, &config);

        if request.use_fbo && !gpu.supports_float_targets() {
            log::warn!("Float render targets are not supported on this GPU. Disabling `use_fbo`.");
            request.use_fbo = false;
        }
        let format = if request.use_fbo {
            wgpu::TextureFormat::Rgba16Float
        } else {
            wgpu::TextureFormat::Rgba8Unorm
        };
        let samples = negotiate_multisample(request, gpu.max_samples(format)).unwrap_or(1);
        let targets = RenderTargets::new(&gpu.device, format, (config.width, config.height), samples);
        let blit = BlitPipeline::new(&gpu.device, surface_format);

        let ramp_type = request
            .ramp_type
            .unwrap_or_else(|| RampType::for_current_system(Some(&gpu.driver())));
        let gamma = DisplayGamma::open(
            gamma_target(&window, &monitor),
            request.gamma_error_policy,
            ramp_type,
        )?;

        if let Some(shared) = ctx.platform_mut().winit.as_mut() {
            shared.routes.insert(window.id(), owner);
        }
        Ok(Self {
            id: owner,
            surface,
            window,
            gpu,
            config,
            targets,
            blit,
            gamma,
            mouse_visible: request.allow_gui,
            blend_mode: BlendMode::default(),
        })
    }

    pub fn winit_window(&self) -> &winit::window::Window {
        &self.window
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.gpu.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.gpu.queue
    }

    /// The texture stimuli should be drawn into this frame. When multisampling this is
    /// the MSAA texture, resolved into the back buffer by the caller's render pass.
    pub fn draw_target(&self) -> (wgpu::TextureView, Option<wgpu::TextureView>) {
        let back = self
            .targets
            .back
            .create_view(&wgpu::TextureViewDescriptor::default());
        match &self.targets.msaa {
            Some(msaa) => (
                msaa.create_view(&wgpu::TextureViewDescriptor::default()),
                Some(back),
            ),
            None => (back, None),
        }
    }

    pub fn blend_mode(&self) -> BlendMode {
        self.blend_mode
    }

    fn present(&mut self) -> Result<()> {
        let frame = match self.surface.get_current_texture() {
            Ok(frame) => frame,
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                self.surface.configure(&self.gpu.device, &self.config);
                self.surface.get_current_texture()?
            }
            Err(e) => return Err(e.into()),
        };
        let target = frame
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        let back = self
            .targets
            .back
            .create_view(&wgpu::TextureViewDescriptor::default());

        let mut encoder = self
            .gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("swap") });
        self.blit.blit(&self.gpu.device, &mut encoder, &back, &target);
        encoder.copy_texture_to_texture(
            self.targets.back.as_image_copy(),
            self.targets.front.as_image_copy(),
            self.targets.extent(),
        );
        self.gpu.queue.submit(Some(encoder.finish()));
        self.window.pre_present_notify();
        frame.present();
        Ok(())
    }
}

impl Backend for WinitBackend {
    fn kind(&self) -> WindowBackendKind {
        WindowBackendKind::Winit
    }

    fn window_id(&self) -> WindowId {
        self.id
    }

    fn swap_buffers(&mut self, ctx: &RenderingContext, flip_this_frame: bool) -> Result<()> {
        self.set_current(ctx)?;
        if flip_this_frame {
            self.present()?;
        }
        pump_events(ctx)
    }

    fn pre_swap_offset(&self) -> Option<[f32; 3]> {
        Some([0.0, 0.0, -5.0])
    }

    fn finish(&mut self) -> Result<()> {
        self.gpu.device.poll(wgpu::Maintain::Wait);
        Ok(())
    }

    fn clear_buffer(&mut self, _ctx: &RenderingContext, rgba: [f64; 4]) -> Result<()> {
        let [r, g, b, a] = rgba;
        self.targets.clear(&self.gpu, wgpu::Color { r, g, b, a });
        Ok(())
    }

    fn set_gamma(&mut self, _ctx: &RenderingContext, gamma: [f64; 3]) -> Result<()> {
        self.gamma.set_gamma(gamma)
    }

    fn gamma_ramp(&mut self, _ctx: &RenderingContext) -> Result<GammaRamp> {
        self.gamma.ramp()
    }

    fn set_gamma_ramp(&mut self, _ctx: &RenderingContext, ramp: &GammaRamp) -> Result<()> {
        self.gamma.set_ramp(ramp)
    }

    fn gamma_ramp_size(&mut self, _ctx: &RenderingContext) -> Result<usize> {
        self.gamma.size()
    }

    fn shaders_supported(&self) -> bool {
        true
    }

    fn set_mouse_visibility(&mut self, visible: bool) -> Result<()> {
        self.window.set_cursor_visible(visible);
        self.mouse_visible = visible;
        Ok(())
    }

    fn dispatch_events(&mut self, ctx: &RenderingContext) -> Result<Vec<BackendEvent>> {
        pump_events(ctx)?;
        Ok(ctx.take_events(self.id))
    }

    fn on_resize(&mut self, width: u32, height: u32) {
        self.config.width = width.max(1);
        self.config.height = height.max(1);
        self.surface.configure(&self.gpu.device, &self.config);
        self.targets = self
            .targets
            .resized(&self.gpu.device, (self.config.width, self.config.height));
    }

    fn set_current(&mut self, ctx: &RenderingContext) -> Result<bool> {
        // wgpu has no notion of a current context; only the bookkeeping changes
        if ctx.current() == Some(self.id) {
            return Ok(false);
        }
        ctx.set_current(self.id);
        Ok(true)
    }

    fn set_fullscr(&mut self, _ctx: &RenderingContext, fullscr: bool) -> Result<()> {
        let fullscreen = fullscr.then(|| Fullscreen::Borderless(self.window.current_monitor()));
        self.window.set_fullscreen(fullscreen);
        let size = self.window.inner_size();
        self.on_resize(size.width, size.height);
        Ok(())
    }

    fn set_mouse_cursor(&mut self, cursor: CursorKind) -> Result<()> {
        self.window.set_cursor_icon(cursor_icon(cursor));
        Ok(())
    }

    fn set_blend_mode(&mut self, mode: BlendMode) -> Result<()> {
        self.blend_mode = mode;
        Ok(())
    }

    fn read_pixels(&mut self, _ctx: &RenderingContext, buffer: ReadBuffer) -> Result<RgbaImage> {
        self.targets.read(&self.gpu, buffer == ReadBuffer::Front)
    }

    fn frame_buffer_size(&self) -> (u32, u32) {
        (self.config.width, self.config.height)
    }

    fn close(&mut self, ctx: &RenderingContext) -> Result<()> {
        let restored = self.gamma.restore();
        self.window.set_cursor_visible(true);
        self.window.set_visible(false);
        if let Some(shared) = ctx.platform_mut().winit.as_mut() {
            shared.routes.remove(&self.window.id());
        }
        ctx.clear_current_if(self.id);
        restored
    }
}
