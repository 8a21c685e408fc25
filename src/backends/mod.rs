//! Windowing backends.
//!
//! A [`Backend`] binds one [`Window`](crate::visual::window::Window) to a native
//! windowing library. Backends are created through [`create_backend`], which maps a
//! [`WindowBackendKind`] to a concrete implementation.

pub mod headless;
pub mod negotiate;
pub mod winit_backend;

#[cfg(any(feature = "glfw", feature = "sdl"))]
mod gl;
#[cfg(feature = "glfw")]
pub mod glfw_backend;
#[cfg(feature = "sdl")]
pub mod sdl_backend;

use image::RgbaImage;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::context::{RenderingContext, WindowId};
use crate::errors::{PsywinError, Result};
use crate::gamma::{GammaErrorPolicy, GammaRamp, RampType};
use crate::visual::blend::BlendMode;

/// The windowing libraries a window can be opened with.
///
/// The legacy names `pyglet` and `pygame` are accepted when parsing and map to the
/// libraries that fill those roles here.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum WindowBackendKind {
    /// winit + wgpu. The default, and what `pyglet` maps to.
    #[strum(to_string = "winit", serialize = "pyglet")]
    #[serde(alias = "pyglet")]
    Winit,
    /// GLFW with an OpenGL context (feature `glfw`).
    #[strum(to_string = "glfw")]
    Glfw,
    /// SDL2 with an OpenGL context (feature `sdl`). What `pygame` maps to.
    #[strum(to_string = "sdl", serialize = "pygame")]
    #[serde(alias = "pygame")]
    Sdl,
    /// Simulated displays owned by the rendering context.
    #[strum(to_string = "headless", serialize = "offscreen")]
    Headless,
}

/// The configuration a backend is asked to realise. Backends downgrade fields in place
/// when the hardware cannot deliver them, and the window adopts the result.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendRequest {
    pub name: String,
    pub title: String,
    pub size: (u32, u32),
    pub pos: Option<(i32, i32)>,
    pub fullscr: bool,
    pub allow_gui: bool,
    pub screen: usize,
    pub stereo: bool,
    pub multi_sample: bool,
    pub num_samples: u32,
    pub allow_stencil: bool,
    pub use_fbo: bool,
    pub use_retina: bool,
    pub bpc: (u8, u8, u8),
    pub depth_bits: u8,
    pub stencil_bits: u8,
    pub refresh_hz: u32,
    pub swap_interval: u32,
    pub wait_blanking: bool,
    pub gamma_error_policy: GammaErrorPolicy,
    pub ramp_type: Option<RampType>,
    pub auto_log: bool,
}

impl Default for BackendRequest {
    fn default() -> Self {
        Self {
            name: "window1".into(),
            title: "PsychoPy".into(),
            size: (800, 600),
            pos: None,
            fullscr: false,
            allow_gui: true,
            screen: 0,
            stereo: false,
            multi_sample: false,
            num_samples: 2,
            allow_stencil: false,
            use_fbo: false,
            use_retina: true,
            bpc: (8, 8, 8),
            depth_bits: 8,
            stencil_bits: 8,
            refresh_hz: 60,
            swap_interval: 1,
            wait_blanking: true,
            gamma_error_policy: GammaErrorPolicy::Raise,
            ramp_type: None,
            auto_log: true,
        }
    }
}

/// Events a backend collects from its native event queue.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendEvent {
    Resized { width: u32, height: u32 },
    CloseRequested,
    Key { name: String, pressed: bool },
    MouseMoved { x: f64, y: f64 },
    MouseButton { button: u8, pressed: bool },
    Focused(bool),
}

/// Which buffer to read pixels from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum ReadBuffer {
    /// The most recently presented frame.
    #[default]
    Front,
    /// The frame currently being drawn.
    Back,
}

/// Standard OS cursors. Not every backend can show every cursor; unsupported ones fall
/// back to the default pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(ascii_case_insensitive)]
pub enum CursorKind {
    #[strum(to_string = "arrow", serialize = "default")]
    Arrow,
    #[strum(to_string = "ibeam", serialize = "text")]
    IBeam,
    #[strum(to_string = "crosshair")]
    Crosshair,
    #[strum(to_string = "hand")]
    Hand,
    #[strum(to_string = "hresize")]
    HResize,
    #[strum(to_string = "vresize")]
    VResize,
    #[strum(to_string = "help")]
    Help,
    #[strum(to_string = "no")]
    No,
    #[strum(to_string = "size")]
    Size,
    #[strum(to_string = "downleft", serialize = "upright")]
    DownLeft,
    #[strum(to_string = "downright", serialize = "upleft")]
    DownRight,
    #[strum(to_string = "lresize")]
    LResize,
    #[strum(to_string = "rresize")]
    RResize,
    #[strum(to_string = "uresize")]
    UResize,
    #[strum(to_string = "dresize")]
    DResize,
    #[strum(to_string = "wait")]
    Wait,
    #[strum(to_string = "waitarrow")]
    WaitArrow,
}

/// The capability set every windowing backend provides.
///
/// Methods without a default body are mandatory. Optional capabilities default to
/// [`PsywinError::NotImplementedError`], except event dispatch and resizing, which only
/// log a warning.
pub trait Backend {
    fn kind(&self) -> WindowBackendKind;

    /// Id of the window that owns this backend.
    fn window_id(&self) -> WindowId;

    fn name(&self, ctx: &RenderingContext) -> String {
        format!(
            "{}_backend",
            ctx.window_name(self.window_id()).unwrap_or_default()
        )
    }

    /// Present the back buffer. Makes this backend's context current first if needed and
    /// pumps the native event queue afterwards.
    fn swap_buffers(&mut self, ctx: &RenderingContext, flip_this_frame: bool) -> Result<()>;

    /// Model-view translation applied immediately before the swap, if any.
    fn pre_swap_offset(&self) -> Option<[f32; 3]> {
        None
    }

    /// Block until the GPU has finished all submitted work.
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }

    /// Clear the back buffer to an RGBA colour with components in `0..=1`.
    fn clear_buffer(&mut self, ctx: &RenderingContext, rgba: [f64; 4]) -> Result<()>;

    /// Load an identity ramp raised to `1/gamma` per channel.
    fn set_gamma(&mut self, ctx: &RenderingContext, gamma: [f64; 3]) -> Result<()>;

    fn gamma_ramp(&mut self, ctx: &RenderingContext) -> Result<GammaRamp>;

    fn set_gamma_ramp(&mut self, ctx: &RenderingContext, ramp: &GammaRamp) -> Result<()>;

    fn gamma_ramp_size(&mut self, ctx: &RenderingContext) -> Result<usize>;

    fn shaders_supported(&self) -> bool;

    fn set_mouse_visibility(&mut self, visible: bool) -> Result<()>;

    /// Collect pending native events for this window.
    fn dispatch_events(&mut self, ctx: &RenderingContext) -> Result<Vec<BackendEvent>> {
        log::warn!(
            "{} does not implement `dispatch_events`",
            self.name(ctx)
        );
        Ok(Vec::new())
    }

    fn on_resize(&mut self, width: u32, height: u32) {
        log::warn!(
            "The {} backend does not handle resizing ({}x{})",
            self.kind(),
            width,
            height
        );
    }

    /// Make this backend's context the current one. Returns `true` if a switch happened.
    fn set_current(&mut self, ctx: &RenderingContext) -> Result<bool>;

    fn set_fullscr(&mut self, _ctx: &RenderingContext, _fullscr: bool) -> Result<()> {
        Err(PsywinError::NotImplementedError("set_fullscr".into()))
    }

    fn set_mouse_cursor(&mut self, _cursor: CursorKind) -> Result<()> {
        Err(PsywinError::NotImplementedError("set_mouse_cursor".into()))
    }

    fn set_blend_mode(&mut self, mode: BlendMode) -> Result<()>;

    fn read_pixels(&mut self, _ctx: &RenderingContext, _buffer: ReadBuffer) -> Result<RgbaImage> {
        Err(PsywinError::NotImplementedError("read_pixels".into()))
    }

    /// Size of the drawable area in physical pixels.
    fn frame_buffer_size(&self) -> (u32, u32);

    /// Restore the display's original gamma table and release native resources.
    fn close(&mut self, ctx: &RenderingContext) -> Result<()>;
}

/// Create the backend for `kind`. `request` is updated with what the backend actually
/// managed to configure.
pub fn create_backend(
    kind: WindowBackendKind,
    ctx: &RenderingContext,
    owner: WindowId,
    request: &mut BackendRequest,
) -> Result<Box<dyn Backend>> {
    log::debug!("Creating {} backend for window {}", kind, owner);
    match kind {
        WindowBackendKind::Winit => Ok(Box::new(winit_backend::WinitBackend::new(
            ctx, owner, request,
        )?)),
        WindowBackendKind::Headless => Ok(Box::new(headless::HeadlessBackend::new(
            ctx, owner, request,
        )?)),
        #[cfg(feature = "glfw")]
        WindowBackendKind::Glfw => Ok(Box::new(glfw_backend::GlfwBackend::new(
            ctx, owner, request,
        )?)),
        #[cfg(not(feature = "glfw"))]
        WindowBackendKind::Glfw => Err(PsywinError::BackendUnavailableError(
            kind.to_string(),
            "glfw",
        )),
        #[cfg(feature = "sdl")]
        WindowBackendKind::Sdl => Ok(Box::new(sdl_backend::SdlBackend::new(
            ctx, owner, request,
        )?)),
        #[cfg(not(feature = "sdl"))]
        WindowBackendKind::Sdl => Err(PsywinError::BackendUnavailableError(
            kind.to_string(),
            "sdl",
        )),
    }
}

/// Pump the native event queue shared by all windows of `kind`, routing events to the
/// per-window queues held by the context.
pub(crate) fn pump_events(kind: WindowBackendKind, ctx: &RenderingContext) -> Result<()> {
    match kind {
        WindowBackendKind::Winit => winit_backend::pump_events(ctx),
        #[cfg(feature = "glfw")]
        WindowBackendKind::Glfw => glfw_backend::pump_events(ctx),
        #[cfg(feature = "sdl")]
        WindowBackendKind::Sdl => sdl_backend::pump_events(ctx),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn legacy_win_type_names_map_to_rust_backends() {
        assert_eq!(
            WindowBackendKind::from_str("pyglet").unwrap(),
            WindowBackendKind::Winit
        );
        assert_eq!(
            WindowBackendKind::from_str("pygame").unwrap(),
            WindowBackendKind::Sdl
        );
        assert_eq!(
            WindowBackendKind::from_str("GLFW").unwrap(),
            WindowBackendKind::Glfw
        );
        assert_eq!(WindowBackendKind::Winit.to_string(), "winit");
        assert!(WindowBackendKind::from_str("oculus").is_err());
    }

    #[test]
    fn win_type_deserializes_from_legacy_names() {
        let kind: WindowBackendKind = serde_json::from_str("\"pyglet\"").unwrap();
        assert_eq!(kind, WindowBackendKind::Winit);
        let kind: WindowBackendKind = serde_json::from_str("\"headless\"").unwrap();
        assert_eq!(kind, WindowBackendKind::Headless);
    }

    #[test]
    fn cursor_aliases() {
        assert_eq!(CursorKind::from_str("default").unwrap(), CursorKind::Arrow);
        assert_eq!(CursorKind::from_str("text").unwrap(), CursorKind::IBeam);
        assert_eq!(CursorKind::from_str("upleft").unwrap(), CursorKind::DownRight);
        assert_eq!(CursorKind::IBeam.to_string(), "ibeam");
    }

    #[cfg(not(feature = "glfw"))]
    #[test]
    fn missing_backend_features_are_reported() {
        let ctx = RenderingContext::new();
        let id = ctx.register_window("window1", WindowBackendKind::Glfw).unwrap();
        let mut request = BackendRequest::default();
        let err = create_backend(WindowBackendKind::Glfw, &ctx, id, &mut request)
            .err()
            .unwrap();
        assert!(matches!(err, PsywinError::BackendUnavailableError(_, "glfw")));
    }
}
