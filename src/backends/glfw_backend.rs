//! GLFW windows with an OpenGL context.

use std::collections::HashMap;

use derive_debug::Dbg;
use glfw::Context;
use image::RgbaImage;

use super::gl::{self, GammaState};
use super::negotiate::{
    check_matching_sizes, negotiate_multisample, negotiate_video_mode, resolve_position,
    resolve_stencil_bits, select_screen, validate_sample_count, DisplayInfo, VideoMode,
};
use super::{Backend, BackendEvent, BackendRequest, CursorKind, ReadBuffer, WindowBackendKind};
use crate::context::{RenderingContext, WindowId};
use crate::errors::{PsywinError, Result};
use crate::gamma::hardware::is_virtual_host;
use crate::gamma::{GammaRamp, RampType};
use crate::visual::blend::BlendMode;

type EventReceiver = glfw::GlfwReceiver<(f64, glfw::WindowEvent)>;

/// The GLFW library handle and the event receivers of every open window.
pub(crate) struct GlfwPlatform {
    glfw: glfw::Glfw,
    receivers: HashMap<WindowId, EventReceiver>,
}

fn vid_mode(mode: &glfw::VidMode) -> VideoMode {
    VideoMode::new(
        (mode.width, mode.height),
        (mode.red_bits as u8, mode.green_bits as u8, mode.blue_bits as u8),
        mode.refresh_rate,
    )
}

fn display_info(monitor: &glfw::Monitor) -> Option<DisplayInfo> {
    let native = vid_mode(&monitor.get_video_mode()?);
    Some(DisplayInfo {
        name: monitor.get_name().unwrap_or_default(),
        position: monitor.get_pos(),
        native_mode: native,
        modes: monitor.get_video_modes().iter().map(vid_mode).collect(),
    })
}

fn translate(event: glfw::WindowEvent) -> Option<BackendEvent> {
    match event {
        glfw::WindowEvent::FramebufferSize(w, h) => Some(BackendEvent::Resized {
            width: w.max(0) as u32,
            height: h.max(0) as u32,
        }),
        glfw::WindowEvent::Close => Some(BackendEvent::CloseRequested),
        glfw::WindowEvent::Focus(focused) => Some(BackendEvent::Focused(focused)),
        glfw::WindowEvent::CursorPos(x, y) => Some(BackendEvent::MouseMoved { x, y }),
        glfw::WindowEvent::MouseButton(button, action, _) => Some(BackendEvent::MouseButton {
            button: button as i32 as u8,
            pressed: action != glfw::Action::Release,
        }),
        glfw::WindowEvent::Key(key, _, action, _) => Some(BackendEvent::Key {
            name: format!("{:?}", key).to_lowercase(),
            pressed: action != glfw::Action::Release,
        }),
        _ => None,
    }
}

pub(crate) fn pump_events(ctx: &RenderingContext) -> Result<()> {
    let mut routed = Vec::new();
    {
        let mut platform = ctx.platform_mut();
        let Some(shared) = platform.glfw.as_mut() else {
            return Ok(());
        };
        shared.glfw.poll_events();
        for (id, receiver) in &shared.receivers {
            routed.extend(
                glfw::flush_messages(receiver)
                    .filter_map(|(_, event)| translate(event))
                    .map(|event| (*id, event)),
            );
        }
    }
    for (id, event) in routed {
        ctx.push_event(id, event);
    }
    Ok(())
}

#[derive(Dbg)]
pub struct GlfwBackend {
    id: WindowId,
    #[dbg(placeholder = "...")]
    glfw: glfw::Glfw,
    #[dbg(placeholder = "...")]
    window: glfw::PWindow,
    #[dbg(placeholder = "...")]
    gl: glow::Context,
    screen: usize,
    size: (u32, u32),
    fullscr: bool,
    /// Client size to go back to when leaving fullscreen.
    windowed_size: (u32, u32),
    ramp_type: RampType,
    gamma: GammaState,
    #[dbg(placeholder = "...")]
    cursor: Option<glfw::Cursor>,
    blend_mode: BlendMode,
}

impl GlfwBackend {
    pub fn new(ctx: &RenderingContext, owner: WindowId, request: &mut BackendRequest) -> Result<Self> {
        let mut platform = ctx.platform_mut();
        if platform.glfw.is_none() {
            let glfw = glfw::init_no_callbacks().map_err(|e| PsywinError::backend_init("glfw", e))?;
            platform.glfw = Some(GlfwPlatform {
                glfw,
                receivers: HashMap::new(),
            });
        }
        let Some(shared) = platform.glfw.as_mut() else {
            return Err(PsywinError::backend_init("glfw", "library unavailable"));
        };
        let mut glfw = shared.glfw.clone();

        let displays: Vec<DisplayInfo> =
            glfw.with_connected_monitors(|_, monitors| monitors.iter().filter_map(display_info).collect());
        let screen = select_screen(request.screen, displays.len())?;
        request.screen = screen;
        let display = &displays[screen];

        resolve_stencil_bits(request);
        negotiate_video_mode(display, request);
        let position = resolve_position(display, request);
        validate_sample_count(request);
        let (r, g, b) = request.bpc;

        glfw.default_window_hints();
        glfw.window_hint(glfw::WindowHint::ContextVersion(3, 3));
        glfw.window_hint(glfw::WindowHint::RedBits(Some(r as u32)));
        glfw.window_hint(glfw::WindowHint::GreenBits(Some(g as u32)));
        glfw.window_hint(glfw::WindowHint::BlueBits(Some(b as u32)));
        glfw.window_hint(glfw::WindowHint::DepthBits(Some(request.depth_bits as u32)));
        glfw.window_hint(glfw::WindowHint::StencilBits(Some(request.stencil_bits as u32)));
        glfw.window_hint(glfw::WindowHint::RefreshRate(Some(request.refresh_hz)));
        glfw.window_hint(glfw::WindowHint::Decorated(request.allow_gui));
        glfw.window_hint(glfw::WindowHint::ScaleToMonitor(!request.use_retina));

        let (width, height) = request.size;
        let fullscr = request.fullscr;
        let title = request.title.clone();
        let create = |glfw: &mut glfw::Glfw| {
            glfw.with_connected_monitors(|glfw, monitors| {
                let mode = match monitors.get(screen) {
                    Some(monitor) if fullscr => glfw::WindowMode::FullScreen(monitor),
                    _ => glfw::WindowMode::Windowed,
                };
                glfw.create_window(width, height, &title, mode)
            })
        };
        // stereo and multisampling are hard constraints; drop them one at a time
        let (mut window, receiver) = loop {
            glfw.window_hint(glfw::WindowHint::Stereo(request.stereo));
            glfw.window_hint(glfw::WindowHint::Samples(
                request.multi_sample.then_some(request.num_samples),
            ));
            if let Some(created) = create(&mut glfw) {
                break created;
            }
            if request.multi_sample {
                log::warn!(
                    "A window with {} MSAA samples could not be created. Disabling multisampling.",
                    request.num_samples
                );
                request.multi_sample = false;
            } else if request.stereo {
                log::warn!("A stereo window could not be created. Disabling stereo.");
                request.stereo = false;
            } else {
                return Err(PsywinError::backend_init("glfw", "could not create window"));
            }
        };
        if !request.fullscr {
            window.set_pos(position.0, position.1);
        }
        window.set_all_polling(true);
        window.make_current();
        glfw.set_swap_interval(if request.wait_blanking {
            glfw::SwapInterval::Sync(request.swap_interval)
        } else {
            glfw::SwapInterval::None
        });
        drop(platform);
        ctx.set_current(owner);

        let gl = unsafe { glow::Context::from_loader_function(|s| window.get_proc_address(s) as *const _) };
        negotiate_multisample(request, gl::max_samples(&gl));
        if request.use_fbo {
            log::warn!("Float framebuffers are not available with the glfw backend. Disabling `use_fbo`.");
            request.use_fbo = false;
        }

        let (fw, fh) = window.get_framebuffer_size();
        let size = (fw.max(1) as u32, fh.max(1) as u32);
        if request.fullscr {
            check_matching_sizes(request, size);
        }
        gl::setup(&gl, request.multi_sample, size);
        if !request.allow_gui {
            window.set_cursor_mode(glfw::CursorMode::Hidden);
        }

        let ramp_type = request
            .ramp_type
            .unwrap_or_else(|| RampType::for_current_system(Some(&gl::driver(&gl))));
        let mut backend = Self {
            id: owner,
            glfw,
            window,
            gl,
            screen,
            size,
            fullscr: request.fullscr,
            windowed_size: (width, height),
            ramp_type,
            gamma: GammaState::new(request.gamma_error_policy, true),
            cursor: None,
            blend_mode: BlendMode::default(),
        };
        if backend.fullscr {
            let original = backend.read_ramp();
            backend.gamma.capture(original)?;
        }
        if let Some(shared) = ctx.platform_mut().glfw.as_mut() {
            shared.receivers.insert(owner, receiver);
        }
        Ok(backend)
    }

    pub fn glfw_window(&self) -> &glfw::Window {
        &self.window
    }

    pub fn gl(&self) -> &glow::Context {
        &self.gl
    }

    fn with_monitor<T>(&mut self, f: impl FnOnce(&mut glfw::Monitor) -> T) -> Option<T> {
        let screen = self.screen;
        self.glfw
            .with_connected_monitors_mut(|_, monitors| monitors.get_mut(screen).map(f))
    }

    fn read_ramp(&mut self) -> Result<GammaRamp> {
        let ramp = self
            .with_monitor(|monitor| monitor.get_gamma_ramp())
            .ok_or_else(|| PsywinError::GammaError("monitor disconnected".into()))?;
        GammaRamp::from_u16(&ramp.red, &ramp.green, &ramp.blue)
    }

    fn write_ramp(&mut self, ramp: &GammaRamp) -> Result<()> {
        if is_virtual_host() {
            log::warn!("It looks like we are running in a virtual machine or on CI. Hardware gamma table cannot be set.");
            return Ok(());
        }
        let size = self.gamma_size()?;
        if !self.gamma.check_size(ramp, size)? {
            return Ok(());
        }
        let [red, green, blue] = ramp.to_u16();
        let mut native = glfw::GammaRamp { red, green, blue };
        let written = self
            .with_monitor(|monitor| monitor.set_gamma_ramp(&mut native))
            .ok_or_else(|| "monitor disconnected".to_string());
        self.gamma.check(written)
    }

    fn gamma_size(&mut self) -> Result<usize> {
        Ok(self
            .with_monitor(|monitor| monitor.get_gamma_ramp().red.len())
            .filter(|n| *n > 0)
            .unwrap_or(crate::gamma::DEFAULT_RAMP_SIZE))
    }

    fn windowed_gamma_error() -> PsywinError {
        PsywinError::GammaError("the glfw backend only has gamma tables in fullscreen".into())
    }
}

impl Backend for GlfwBackend {
    fn kind(&self) -> WindowBackendKind {
        WindowBackendKind::Glfw
    }

    fn window_id(&self) -> WindowId {
        self.id
    }

    fn swap_buffers(&mut self, ctx: &RenderingContext, flip_this_frame: bool) -> Result<()> {
        self.set_current(ctx)?;
        if flip_this_frame {
            self.window.swap_buffers();
        }
        pump_events(ctx)
    }

    fn pre_swap_offset(&self) -> Option<[f32; 3]> {
        Some([0.0, 0.0, -5.0])
    }

    fn finish(&mut self) -> Result<()> {
        gl::finish(&self.gl);
        Ok(())
    }

    fn clear_buffer(&mut self, ctx: &RenderingContext, rgba: [f64; 4]) -> Result<()> {
        self.set_current(ctx)?;
        gl::clear(&self.gl, rgba);
        Ok(())
    }

    fn set_gamma(&mut self, _ctx: &RenderingContext, gamma: [f64; 3]) -> Result<()> {
        if !self.gamma.applies(self.fullscr) {
            log::debug!("Not setting gamma on a windowed glfw window");
            return Ok(());
        }
        let ramp = GammaRamp::from_gamma(self.gamma_size()?, self.ramp_type, gamma)?;
        self.write_ramp(&ramp)
    }

    fn gamma_ramp(&mut self, _ctx: &RenderingContext) -> Result<GammaRamp> {
        if !self.gamma.applies(self.fullscr) {
            return Err(Self::windowed_gamma_error());
        }
        self.read_ramp()
    }

    fn set_gamma_ramp(&mut self, _ctx: &RenderingContext, ramp: &GammaRamp) -> Result<()> {
        if !self.gamma.applies(self.fullscr) {
            log::debug!("Not setting a gamma ramp on a windowed glfw window");
            return Ok(());
        }
        self.write_ramp(ramp)
    }

    fn gamma_ramp_size(&mut self, _ctx: &RenderingContext) -> Result<usize> {
        if !self.gamma.applies(self.fullscr) {
            return Err(Self::windowed_gamma_error());
        }
        self.gamma_size()
    }

    fn shaders_supported(&self) -> bool {
        true
    }

    fn set_mouse_visibility(&mut self, visible: bool) -> Result<()> {
        self.window.set_cursor_mode(if visible {
            glfw::CursorMode::Normal
        } else {
            glfw::CursorMode::Hidden
        });
        Ok(())
    }

    fn dispatch_events(&mut self, ctx: &RenderingContext) -> Result<Vec<BackendEvent>> {
        pump_events(ctx)?;
        Ok(ctx.take_events(self.id))
    }

    fn on_resize(&mut self, width: u32, height: u32) {
        self.size = (width.max(1), height.max(1));
        gl::resize(&self.gl, self.size);
    }

    fn set_current(&mut self, ctx: &RenderingContext) -> Result<bool> {
        if ctx.current() == Some(self.id) {
            return Ok(false);
        }
        self.window.make_current();
        ctx.set_current(self.id);
        Ok(true)
    }

    fn set_fullscr(&mut self, _ctx: &RenderingContext, fullscr: bool) -> Result<()> {
        if fullscr == self.fullscr {
            return Ok(());
        }
        // leaving fullscreen hands the monitor back with its own table
        if !fullscr {
            if let Some(original) = self.gamma.original.take() {
                self.write_ramp(&original)?;
            }
        }
        let screen = self.screen;
        let windowed_size = self.windowed_size;
        let window = &mut self.window;
        let switched = self.glfw.with_connected_monitors(|_, monitors| {
            let monitor = monitors.get(screen)?;
            let mode = monitor.get_video_mode()?;
            if fullscr {
                window.set_monitor(
                    glfw::WindowMode::FullScreen(monitor),
                    0,
                    0,
                    mode.width,
                    mode.height,
                    Some(mode.refresh_rate),
                );
            } else {
                let (mx, my) = monitor.get_pos();
                let (w, h) = windowed_size;
                window.set_monitor(
                    glfw::WindowMode::Windowed,
                    mx + (mode.width as i32 - w as i32) / 2,
                    my + (mode.height as i32 - h as i32) / 2,
                    w,
                    h,
                    None,
                );
            }
            Some(())
        });
        if switched.is_none() {
            return Err(PsywinError::CustomError(format!(
                "screen {} is no longer connected",
                screen
            )));
        }
        self.fullscr = fullscr;
        if fullscr {
            let original = self.read_ramp();
            self.gamma.capture(original)?;
        }
        let (fw, fh) = self.window.get_framebuffer_size();
        self.on_resize(fw.max(1) as u32, fh.max(1) as u32);
        Ok(())
    }

    fn set_mouse_cursor(&mut self, cursor: CursorKind) -> Result<()> {
        let standard = match cursor {
            CursorKind::IBeam => glfw::StandardCursor::IBeam,
            CursorKind::Crosshair => glfw::StandardCursor::Crosshair,
            CursorKind::Hand => glfw::StandardCursor::Hand,
            CursorKind::HResize | CursorKind::LResize | CursorKind::RResize => {
                glfw::StandardCursor::HResize
            }
            CursorKind::VResize | CursorKind::UResize | CursorKind::DResize => {
                glfw::StandardCursor::VResize
            }
            _ => glfw::StandardCursor::Arrow,
        };
        self.cursor = self.window.set_cursor(Some(glfw::Cursor::standard(standard)));
        Ok(())
    }

    fn set_blend_mode(&mut self, mode: BlendMode) -> Result<()> {
        gl::set_blend_mode(&self.gl, mode);
        self.blend_mode = mode;
        Ok(())
    }

    fn read_pixels(&mut self, ctx: &RenderingContext, buffer: ReadBuffer) -> Result<RgbaImage> {
        self.set_current(ctx)?;
        gl::read_pixels(&self.gl, self.size, buffer)
    }

    fn frame_buffer_size(&self) -> (u32, u32) {
        self.size
    }

    fn close(&mut self, ctx: &RenderingContext) -> Result<()> {
        let restored = match self.gamma.original.take() {
            Some(original) => self.write_ramp(&original),
            None => Ok(()),
        };
        self.window.set_cursor_mode(glfw::CursorMode::Normal);
        self.window.set_should_close(true);
        self.window.hide();
        if let Some(shared) = ctx.platform_mut().glfw.as_mut() {
            shared.receivers.remove(&self.id);
        }
        ctx.clear_current_if(self.id);
        restored
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn framebuffer_sizes_become_resize_events() {
        assert_eq!(
            translate(glfw::WindowEvent::FramebufferSize(1280, -1)),
            Some(BackendEvent::Resized {
                width: 1280,
                height: 0
            })
        );
        assert_eq!(
            translate(glfw::WindowEvent::Focus(false)),
            Some(BackendEvent::Focused(false))
        );
        assert_eq!(translate(glfw::WindowEvent::Refresh), None);
    }
}
