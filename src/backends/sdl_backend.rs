//! SDL2 windows with an OpenGL context.

use std::collections::HashMap;

use derive_debug::Dbg;
use image::RgbaImage;
use sdl2::event::{Event, WindowEvent};
use sdl2::mouse::{Cursor, MouseButton, SystemCursor};
use sdl2::pixels::PixelFormatEnum;
use sdl2::video::{GLContext, GLProfile, SwapInterval};

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

/// SDL always takes 256 entries per channel.
const SDL_RAMP_SIZE: usize = 256;

/// The window caption. Decorated windows carry a reminder that experiments should run
/// without window chrome.
fn caption(allow_gui: bool) -> &'static str {
    if allow_gui {
        "PsychoPy (NB use with allowGUI=False when running properly)"
    } else {
        "PsychoPy"
    }
}
use crate::visual::blend::BlendMode;

/// SDL's library handle, video subsystem and the single event pump it allows.
pub(crate) struct SdlPlatform {
    sdl: sdl2::Sdl,
    video: sdl2::VideoSubsystem,
    event_pump: sdl2::EventPump,
    routes: HashMap<u32, WindowId>,
}

impl SdlPlatform {
    fn new() -> Result<Self> {
        let init = |e: String| PsywinError::backend_init("sdl", e);
        let sdl = sdl2::init().map_err(init)?;
        let video = sdl.video().map_err(init)?;
        let event_pump = sdl.event_pump().map_err(init)?;
        Ok(Self {
            sdl,
            video,
            event_pump,
            routes: HashMap::new(),
        })
    }
}

fn bpc(format: PixelFormatEnum) -> (u8, u8, u8) {
    match format {
        PixelFormatEnum::ARGB2101010 => (10, 10, 10),
        PixelFormatEnum::RGB565 | PixelFormatEnum::BGR565 => (5, 6, 5),
        _ => (8, 8, 8),
    }
}

fn display_info(video: &sdl2::VideoSubsystem, index: i32) -> std::result::Result<DisplayInfo, String> {
    let bounds = video.display_bounds(index)?;
    let desktop = video.desktop_display_mode(index)?;
    let to_mode = |m: sdl2::video::DisplayMode| {
        VideoMode::new((m.w as u32, m.h as u32), bpc(m.format), m.refresh_rate as u32)
    };
    let modes = (0..video.num_display_modes(index)?)
        .filter_map(|j| video.display_mode(index, j).ok())
        .map(to_mode)
        .collect();
    Ok(DisplayInfo {
        name: video.display_name(index).unwrap_or_default(),
        position: (bounds.x(), bounds.y()),
        native_mode: to_mode(desktop),
        modes,
    })
}

fn translate(event: Event) -> Option<(u32, BackendEvent)> {
    match event {
        Event::Window {
            window_id,
            win_event,
            ..
        } => {
            let event = match win_event {
                WindowEvent::SizeChanged(w, h) => BackendEvent::Resized {
                    width: w.max(0) as u32,
                    height: h.max(0) as u32,
                },
                WindowEvent::Close => BackendEvent::CloseRequested,
                WindowEvent::FocusGained => BackendEvent::Focused(true),
                WindowEvent::FocusLost => BackendEvent::Focused(false),
                _ => return None,
            };
            Some((window_id, event))
        }
        Event::KeyDown {
            window_id,
            keycode: Some(key),
            ..
        } => Some((
            window_id,
            BackendEvent::Key {
                name: key.name().to_lowercase(),
                pressed: true,
            },
        )),
        Event::KeyUp {
            window_id,
            keycode: Some(key),
            ..
        } => Some((
            window_id,
            BackendEvent::Key {
                name: key.name().to_lowercase(),
                pressed: false,
            },
        )),
        Event::MouseMotion { window_id, x, y, .. } => Some((
            window_id,
            BackendEvent::MouseMoved {
                x: x as f64,
                y: y as f64,
            },
        )),
        Event::MouseButtonDown {
            window_id,
            mouse_btn,
            ..
        } => Some((window_id, mouse_button(mouse_btn, true))),
        Event::MouseButtonUp {
            window_id,
            mouse_btn,
            ..
        } => Some((window_id, mouse_button(mouse_btn, false))),
        _ => None,
    }
}

fn mouse_button(button: MouseButton, pressed: bool) -> BackendEvent {
    let button = match button {
        MouseButton::Left => 0,
        MouseButton::Middle => 1,
        MouseButton::Right => 2,
        MouseButton::X1 => 3,
        MouseButton::X2 => 4,
        MouseButton::Unknown => u8::MAX,
    };
    BackendEvent::MouseButton { button, pressed }
}

pub(crate) fn pump_events(ctx: &RenderingContext) -> Result<()> {
    let mut routed = Vec::new();
    {
        let mut platform = ctx.platform_mut();
        let Some(shared) = platform.sdl.as_mut() else {
            return Ok(());
        };
        for event in shared.event_pump.poll_iter().collect::<Vec<_>>() {
            if let Some((sdl_id, event)) = translate(event) {
                if let Some(id) = shared.routes.get(&sdl_id) {
                    routed.push((*id, event));
                }
            }
        }
    }
    for (id, event) in routed {
        ctx.push_event(id, event);
    }
    Ok(())
}

#[derive(Dbg)]
pub struct SdlBackend {
    id: WindowId,
    // the context must go before its window
    #[dbg(placeholder = "...")]
    gl: glow::Context,
    #[dbg(placeholder = "...")]
    gl_context: GLContext,
    #[dbg(placeholder = "...")]
    window: sdl2::video::Window,
    #[dbg(placeholder = "...")]
    sdl: sdl2::Sdl,
    size: (u32, u32),
    ramp_type: RampType,
    gamma: GammaState,
    #[dbg(placeholder = "...")]
    cursor: Option<Cursor>,
    blend_mode: BlendMode,
}

impl SdlBackend {
    pub fn new(ctx: &RenderingContext, owner: WindowId, request: &mut BackendRequest) -> Result<Self> {
        let init = |e: String| PsywinError::backend_init("sdl", e);
        let mut platform = ctx.platform_mut();
        if platform.sdl.is_none() {
            platform.sdl = Some(SdlPlatform::new()?);
        }
        let Some(shared) = platform.sdl.as_mut() else {
            return Err(PsywinError::backend_init("sdl", "library unavailable"));
        };
        let video = shared.video.clone();

        let n_screens = video.num_video_displays().map_err(init)?.max(0) as usize;
        let screen = select_screen(request.screen, n_screens)?;
        request.screen = screen;
        let display = display_info(&video, screen as i32).map_err(init)?;

        resolve_stencil_bits(request);
        negotiate_video_mode(&display, request);
        let position = resolve_position(&display, request);

        validate_sample_count(request);
        request.title = caption(request.allow_gui).to_string();

        let attr = video.gl_attr();
        attr.set_context_profile(GLProfile::Compatibility);
        attr.set_double_buffer(true);
        attr.set_red_size(request.bpc.0);
        attr.set_green_size(request.bpc.1);
        attr.set_blue_size(request.bpc.2);
        attr.set_depth_size(request.depth_bits);
        attr.set_stencil_size(request.stencil_bits);

        let (width, height) = request.size;
        let mut builder = video.window(&request.title, width, height);
        builder.opengl().position(position.0, position.1);
        if request.fullscr {
            builder.fullscreen();
        }
        if !request.allow_gui {
            builder.borderless();
        }
        if request.use_retina {
            builder.allow_highdpi();
        }
        // the pixel format is fixed at creation; drop hard constraints one at a time
        let window = loop {
            attr.set_stereo(request.stereo);
            if request.multi_sample {
                attr.set_multisample_buffers(1);
                attr.set_multisample_samples(request.num_samples.min(u8::MAX as u32) as u8);
            } else {
                attr.set_multisample_buffers(0);
                attr.set_multisample_samples(0);
            }
            match builder.build() {
                Ok(window) => break window,
                Err(e) if request.multi_sample => {
                    log::warn!(
                        "A window with {} MSAA samples could not be created ({}). Disabling multisampling.",
                        request.num_samples,
                        e
                    );
                    request.multi_sample = false;
                }
                Err(e) if request.stereo => {
                    log::warn!("A stereo window could not be created ({}). Disabling stereo.", e);
                    request.stereo = false;
                }
                Err(e) => return Err(PsywinError::backend_init("sdl", e)),
            }
        };
        let gl_context = window.gl_create_context().map_err(init)?;
        window.gl_make_current(&gl_context).map_err(init)?;
        let interval = if request.wait_blanking {
            SwapInterval::VSync
        } else {
            SwapInterval::Immediate
        };
        if let Err(e) = video.gl_set_swap_interval(interval) {
            log::warn!("Could not set the swap interval: {}", e);
        }
        let sdl = shared.sdl.clone();
        drop(platform);
        ctx.set_current(owner);

        let gl = unsafe {
            glow::Context::from_loader_function(|s| video.gl_get_proc_address(s) as *const _)
        };
        negotiate_multisample(request, gl::max_samples(&gl));
        if request.use_fbo {
            log::warn!("Float framebuffers are not available with the sdl backend. Disabling `use_fbo`.");
            request.use_fbo = false;
        }

        let size = window.drawable_size();
        let size = (size.0.max(1), size.1.max(1));
        if request.fullscr {
            check_matching_sizes(request, size);
        }
        gl::setup(&gl, request.multi_sample, size);
        if !request.allow_gui {
            sdl.mouse().show_cursor(false);
        }

        let ramp_type = request
            .ramp_type
            .unwrap_or_else(|| RampType::for_current_system(Some(&gl::driver(&gl))));
        let mut gamma = GammaState::new(request.gamma_error_policy, false);
        gamma.capture(read_ramp(&window))?;

        let backend = Self {
            id: owner,
            gl,
            gl_context,
            window,
            sdl,
            size,
            ramp_type,
            gamma,
            cursor: None,
            blend_mode: BlendMode::default(),
        };
        // start from an uncorrected table
        let identity = GammaRamp::from_gamma(SDL_RAMP_SIZE, backend.ramp_type, [1.0; 3])?;
        backend.write_ramp(&identity)?;
        if let Some(shared) = ctx.platform_mut().sdl.as_mut() {
            shared.routes.insert(backend.window.id(), owner);
        }
        Ok(backend)
    }

    pub fn sdl_window(&self) -> &sdl2::video::Window {
        &self.window
    }

    pub fn gl(&self) -> &glow::Context {
        &self.gl
    }

    fn write_ramp(&self, ramp: &GammaRamp) -> Result<()> {
        if is_virtual_host() {
            log::warn!("It looks like we are running in a virtual machine or on CI. Hardware gamma table cannot be set.");
            return Ok(());
        }
        if !self.gamma.check_size(ramp, SDL_RAMP_SIZE)? {
            return Ok(());
        }
        let [red, green, blue] = ramp.to_u16();
        self.gamma
            .check(self.window.set_gamma_ramp(Some(&red), Some(&green), Some(&blue)))
    }
}

fn read_ramp(window: &sdl2::video::Window) -> Result<GammaRamp> {
    let (red, green, blue) = window.gamma_ramp().map_err(PsywinError::GammaError)?;
    GammaRamp::from_u16(&red, &green, &blue)
}

impl Backend for SdlBackend {
    fn kind(&self) -> WindowBackendKind {
        WindowBackendKind::Sdl
    }

    fn window_id(&self) -> WindowId {
        self.id
    }

    fn swap_buffers(&mut self, ctx: &RenderingContext, flip_this_frame: bool) -> Result<()> {
        self.set_current(ctx)?;
        if flip_this_frame {
            self.window.gl_swap_window();
        }
        pump_events(ctx)
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
        let ramp = GammaRamp::from_gamma(SDL_RAMP_SIZE, self.ramp_type, gamma)?;
        self.write_ramp(&ramp)
    }

    fn gamma_ramp(&mut self, _ctx: &RenderingContext) -> Result<GammaRamp> {
        read_ramp(&self.window)
    }

    fn set_gamma_ramp(&mut self, _ctx: &RenderingContext, ramp: &GammaRamp) -> Result<()> {
        self.write_ramp(ramp)
    }

    fn gamma_ramp_size(&mut self, _ctx: &RenderingContext) -> Result<usize> {
        Ok(SDL_RAMP_SIZE)
    }

    fn shaders_supported(&self) -> bool {
        false
    }

    fn set_mouse_visibility(&mut self, visible: bool) -> Result<()> {
        self.sdl.mouse().show_cursor(visible);
        Ok(())
    }

    fn dispatch_events(&mut self, ctx: &RenderingContext) -> Result<Vec<BackendEvent>> {
        pump_events(ctx)?;
        Ok(ctx.take_events(self.id))
    }

    // the drawable keeps the size it was created with
    fn on_resize(&mut self, _width: u32, _height: u32) {}

    fn set_current(&mut self, ctx: &RenderingContext) -> Result<bool> {
        if ctx.current() == Some(self.id) {
            return Ok(false);
        }
        self.window
            .gl_make_current(&self.gl_context)
            .map_err(PsywinError::CustomError)?;
        ctx.set_current(self.id);
        Ok(true)
    }

    fn set_mouse_cursor(&mut self, cursor: CursorKind) -> Result<()> {
        let system = match cursor {
            CursorKind::Arrow => SystemCursor::Arrow,
            CursorKind::IBeam => SystemCursor::IBeam,
            CursorKind::Crosshair => SystemCursor::Crosshair,
            CursorKind::Hand => SystemCursor::Hand,
            CursorKind::HResize | CursorKind::LResize | CursorKind::RResize => SystemCursor::SizeWE,
            CursorKind::VResize | CursorKind::UResize | CursorKind::DResize => SystemCursor::SizeNS,
            CursorKind::No => SystemCursor::No,
            CursorKind::Size => SystemCursor::SizeAll,
            CursorKind::DownLeft => SystemCursor::SizeNESW,
            CursorKind::DownRight => SystemCursor::SizeNWSE,
            CursorKind::Wait => SystemCursor::Wait,
            CursorKind::WaitArrow => SystemCursor::WaitArrow,
            CursorKind::Help => SystemCursor::Arrow,
        };
        let cursor = Cursor::from_system(system).map_err(PsywinError::CustomError)?;
        cursor.set();
        self.cursor = Some(cursor);
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
        self.sdl.mouse().show_cursor(true);
        self.window.hide();
        if let Some(shared) = ctx.platform_mut().sdl.as_mut() {
            shared.routes.remove(&self.window.id());
        }
        ctx.clear_current_if(self.id);
        restored
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caption_reminds_about_window_chrome() {
        assert_eq!(caption(false), "PsychoPy");
        assert_eq!(
            caption(true),
            "PsychoPy (NB use with allowGUI=False when running properly)"
        );
    }

    #[test]
    fn mouse_buttons_use_left_middle_right_numbering() {
        assert_eq!(
            mouse_button(MouseButton::Right, true),
            BackendEvent::MouseButton {
                button: 2,
                pressed: true
            }
        );
        assert_eq!(
            mouse_button(MouseButton::Left, false),
            BackendEvent::MouseButton {
                button: 0,
                pressed: false
            }
        );
    }

    #[test]
    fn window_events_are_routed_by_sdl_id() {
        let event = Event::Window {
            timestamp: 0,
            window_id: 7,
            win_event: WindowEvent::SizeChanged(640, 480),
        };
        assert_eq!(
            translate(event),
            Some((
                7,
                BackendEvent::Resized {
                    width: 640,
                    height: 480
                }
            ))
        );
        let ignored = Event::Window {
            timestamp: 0,
            window_id: 7,
            win_event: WindowEvent::Exposed,
        };
        assert_eq!(translate(ignored), None);
    }

}
