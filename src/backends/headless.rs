//! Simulated displays.
//!
//! The headless backend draws into in-memory buffers and paces swaps against a
//! simulated vertical blank on the context clock. Each simulated display carries its
//! own gamma table, so gamma writes and the restore on close can be observed through
//! [`RenderingContext::headless_display`].

use image::{Rgba, RgbaImage};

use super::negotiate::{self, DisplayInfo, VideoMode};
use super::{Backend, BackendEvent, BackendRequest, CursorKind, ReadBuffer, WindowBackendKind};
use crate::context::{RenderingContext, WindowId};
use crate::errors::{PsywinError, Result};
use crate::gamma::{GammaErrorPolicy, GammaRamp, RampType, DEFAULT_RAMP_SIZE};
use crate::visual::blend::BlendMode;

/// A display that only exists inside a [`RenderingContext`].
#[derive(Debug, Clone, PartialEq)]
pub struct HeadlessDisplay {
    pub name: String,
    pub position: (i32, i32),
    pub native_mode: VideoMode,
    pub modes: Vec<VideoMode>,
    pub max_samples: u32,
    /// Whether float render targets are available (needed for `use_fbo`).
    pub float_targets: bool,
    pub gamma_ramp: GammaRamp,
    /// Simulates a driver that refuses gamma writes.
    pub gamma_read_only: bool,
}

impl Default for HeadlessDisplay {
    fn default() -> Self {
        Self::new(1920, 1080, 60)
    }
}

impl HeadlessDisplay {
    pub fn new(width: u32, height: u32, refresh_hz: u32) -> Self {
        let native = VideoMode::new((width, height), (8, 8, 8), refresh_hz);
        Self {
            name: format!("headless {}x{}@{}Hz", width, height, refresh_hz),
            position: (0, 0),
            native_mode: native,
            modes: vec![native],
            max_samples: 8,
            float_targets: true,
            gamma_ramp: GammaRamp::linear(DEFAULT_RAMP_SIZE, RampType::Plain),
            gamma_read_only: false,
        }
    }

    pub fn with_position(mut self, x: i32, y: i32) -> Self {
        self.position = (x, y);
        self
    }

    pub fn with_mode(mut self, mode: VideoMode) -> Self {
        self.modes.push(mode);
        self
    }

    pub fn with_max_samples(mut self, max_samples: u32) -> Self {
        self.max_samples = max_samples;
        self
    }

    pub fn with_float_targets(mut self, available: bool) -> Self {
        self.float_targets = available;
        self
    }

    pub fn with_gamma_ramp(mut self, ramp: GammaRamp) -> Self {
        self.gamma_ramp = ramp;
        self
    }

    pub fn with_read_only_gamma(mut self) -> Self {
        self.gamma_read_only = true;
        self
    }

    pub fn info(&self) -> DisplayInfo {
        DisplayInfo {
            name: self.name.clone(),
            position: self.position,
            native_mode: self.native_mode,
            modes: self.modes.clone(),
        }
    }
}

pub struct HeadlessBackend {
    id: WindowId,
    screen: usize,
    size: (u32, u32),
    native_size: (u32, u32),
    position: (i32, i32),
    fullscr: bool,
    frame_period: f64,
    last_vblank: u64,
    wait_blanking: bool,
    front: RgbaImage,
    back: RgbaImage,
    gamma_policy: GammaErrorPolicy,
    ramp_type: RampType,
    original_gamma: Option<GammaRamp>,
    mouse_visible: bool,
    cursor: CursorKind,
    blend_mode: BlendMode,
}

impl HeadlessBackend {
    pub fn new(ctx: &RenderingContext, owner: WindowId, request: &mut BackendRequest) -> Result<Self> {
        let display = {
            let platform = ctx.platform_mut();
            let screen = negotiate::select_screen(request.screen, platform.headless.len())?;
            request.screen = screen;
            platform.headless[screen].clone()
        };
        let info = display.info();

        negotiate::resolve_stencil_bits(request);
        if request.stereo {
            log::warn!("A stereo window was requested but headless displays are mono. Disabling.");
            request.stereo = false;
        }
        let choice = negotiate::negotiate_video_mode(&info, request);
        negotiate::negotiate_multisample(request, display.max_samples);
        if request.use_fbo && !display.float_targets {
            log::warn!("Trying to use a framebuffer object but float render targets are not supported. Disabling.");
            request.use_fbo = false;
        }
        if request.fullscr {
            negotiate::check_matching_sizes(request, choice.mode.size);
        }
        let position = negotiate::resolve_position(&info, request);
        // windowed surfaces run at whatever the display is doing
        let refresh_hz = if request.fullscr {
            choice.mode.refresh_hz
        } else {
            display.native_mode.refresh_hz
        };

        let size = request.size;
        log::debug!(
            "Headless window {} on '{}': {}x{} at {:?}, {} Hz",
            owner,
            display.name,
            size.0,
            size.1,
            position,
            refresh_hz
        );

        Ok(Self {
            id: owner,
            screen: request.screen,
            size,
            native_size: display.native_mode.size,
            position,
            fullscr: request.fullscr,
            frame_period: 1.0 / refresh_hz.max(1) as f64,
            last_vblank: 0,
            wait_blanking: request.wait_blanking,
            front: RgbaImage::new(size.0, size.1),
            back: RgbaImage::new(size.0, size.1),
            gamma_policy: request.gamma_error_policy,
            ramp_type: request.ramp_type.unwrap_or(RampType::Plain),
            original_gamma: Some(display.gamma_ramp),
            mouse_visible: request.allow_gui,
            cursor: CursorKind::Arrow,
            blend_mode: BlendMode::Avg,
        })
    }

    pub fn position(&self) -> (i32, i32) {
        self.position
    }

    pub fn mouse_visible(&self) -> bool {
        self.mouse_visible
    }

    pub fn cursor(&self) -> CursorKind {
        self.cursor
    }

    pub fn blend_mode(&self) -> BlendMode {
        self.blend_mode
    }

    fn wait_for_vblank(&mut self, ctx: &RenderingContext) {
        let now = ctx.now();
        // a small epsilon keeps a timestamp sitting exactly on a vblank from rounding down
        let elapsed = ((now / self.frame_period) + 1e-9).floor() as u64;
        let next = (elapsed + 1).max(self.last_vblank + 1);
        self.last_vblank = next;
        ctx.clock().sleep_until(next as f64 * self.frame_period);
    }

    fn write_ramp(&self, ctx: &RenderingContext, ramp: &GammaRamp) -> Result<()> {
        let mut platform = ctx.platform_mut();
        let display = platform
            .headless
            .get_mut(self.screen)
            .ok_or_else(|| PsywinError::GammaError(format!("no display {}", self.screen)))?;
        if display.gamma_read_only {
            drop(platform);
            return self.gamma_policy.handle("set", "the display refused the gamma table");
        }
        if display.gamma_ramp.len() != ramp.len() {
            let detail = format!(
                "ramp has {} entries but the display expects {}",
                ramp.len(),
                display.gamma_ramp.len()
            );
            drop(platform);
            return self.gamma_policy.handle("set", detail);
        }
        display.gamma_ramp = ramp.clone();
        Ok(())
    }
}

impl Backend for HeadlessBackend {
    fn kind(&self) -> WindowBackendKind {
        WindowBackendKind::Headless
    }

    fn window_id(&self) -> WindowId {
        self.id
    }

    fn swap_buffers(&mut self, ctx: &RenderingContext, flip_this_frame: bool) -> Result<()> {
        self.set_current(ctx)?;
        if flip_this_frame {
            self.front.clone_from(&self.back);
            if self.wait_blanking {
                self.wait_for_vblank(ctx);
            }
        }
        Ok(())
    }

    fn clear_buffer(&mut self, _ctx: &RenderingContext, rgba: [f64; 4]) -> Result<()> {
        let px = rgba.map(|v| (v.clamp(0.0, 1.0) * 255.0).round() as u8);
        for pixel in self.back.pixels_mut() {
            *pixel = Rgba(px);
        }
        Ok(())
    }

    fn set_gamma(&mut self, ctx: &RenderingContext, gamma: [f64; 3]) -> Result<()> {
        let size = self.gamma_ramp_size(ctx)?;
        let ramp = GammaRamp::from_gamma(size, self.ramp_type, gamma)?;
        self.write_ramp(ctx, &ramp)
    }

    fn gamma_ramp(&mut self, ctx: &RenderingContext) -> Result<GammaRamp> {
        ctx.headless_display(self.screen)
            .map(|d| d.gamma_ramp)
            .ok_or_else(|| PsywinError::GammaError(format!("no display {}", self.screen)))
    }

    fn set_gamma_ramp(&mut self, ctx: &RenderingContext, ramp: &GammaRamp) -> Result<()> {
        self.write_ramp(ctx, ramp)
    }

    fn gamma_ramp_size(&mut self, ctx: &RenderingContext) -> Result<usize> {
        Ok(self.gamma_ramp(ctx)?.len())
    }

    fn shaders_supported(&self) -> bool {
        true
    }

    fn set_mouse_visibility(&mut self, visible: bool) -> Result<()> {
        self.mouse_visible = visible;
        Ok(())
    }

    fn dispatch_events(&mut self, ctx: &RenderingContext) -> Result<Vec<BackendEvent>> {
        Ok(ctx.take_events(self.id))
    }

    fn on_resize(&mut self, width: u32, height: u32) {
        self.size = (width, height);
        self.front = RgbaImage::new(width, height);
        self.back = RgbaImage::new(width, height);
    }

    fn set_current(&mut self, ctx: &RenderingContext) -> Result<bool> {
        if ctx.current() == Some(self.id) {
            return Ok(false);
        }
        ctx.set_current(self.id);
        Ok(true)
    }

    fn set_fullscr(&mut self, _ctx: &RenderingContext, fullscr: bool) -> Result<()> {
        if fullscr != self.fullscr {
            self.fullscr = fullscr;
            if fullscr {
                let (w, h) = self.native_size;
                self.on_resize(w, h);
            }
        }
        Ok(())
    }

    fn set_mouse_cursor(&mut self, cursor: CursorKind) -> Result<()> {
        self.cursor = cursor;
        Ok(())
    }

    fn set_blend_mode(&mut self, mode: BlendMode) -> Result<()> {
        self.blend_mode = mode;
        Ok(())
    }

    fn read_pixels(&mut self, _ctx: &RenderingContext, buffer: ReadBuffer) -> Result<RgbaImage> {
        Ok(match buffer {
            ReadBuffer::Front => self.front.clone(),
            ReadBuffer::Back => self.back.clone(),
        })
    }

    fn frame_buffer_size(&self) -> (u32, u32) {
        self.size
    }

    fn close(&mut self, ctx: &RenderingContext) -> Result<()> {
        let restored = match self.original_gamma.take() {
            Some(original) => self.write_ramp(ctx, &original),
            None => Ok(()),
        };
        self.mouse_visible = true;
        ctx.clear_current_if(self.id);
        restored
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::rc::Rc;

    fn open(ctx: &RenderingContext, request: &mut BackendRequest) -> HeadlessBackend {
        let id = ctx.register_window(&request.name, WindowBackendKind::Headless).unwrap();
        HeadlessBackend::new(ctx, id, request).unwrap()
    }

    #[test]
    fn swaps_land_on_vblanks() {
        let clock = Rc::new(ManualClock::new());
        let ctx = RenderingContext::builder().clock(clock.clone()).build();
        let mut backend = open(&ctx, &mut BackendRequest::default());

        backend.swap_buffers(&ctx, true).unwrap();
        let first = ctx.now();
        assert!((first - 1.0 / 60.0).abs() < 1e-9);
        backend.swap_buffers(&ctx, true).unwrap();
        assert!((ctx.now() - first - 1.0 / 60.0).abs() < 1e-9);

        // a late swap waits for the next vblank after now
        clock.advance(0.025);
        backend.swap_buffers(&ctx, true).unwrap();
        assert!((ctx.now() - 4.0 / 60.0).abs() < 1e-9);
    }

    #[test]
    fn gamma_is_restored_on_close() {
        let ctx = RenderingContext::builder().build();
        let mut backend = open(&ctx, &mut BackendRequest::default());
        let original = backend.gamma_ramp(&ctx).unwrap();

        backend.set_gamma(&ctx, [2.2, 2.2, 2.2]).unwrap();
        assert!(!backend.gamma_ramp(&ctx).unwrap().approx_eq(&original, 1e-6));
        backend.close(&ctx).unwrap();
        assert_eq!(ctx.headless_display(0).unwrap().gamma_ramp, original);
    }

    #[test]
    fn gamma_failures_follow_the_policy() {
        let ctx = RenderingContext::builder()
            .headless_display(HeadlessDisplay::default().with_read_only_gamma())
            .build();
        let mut backend = open(&ctx, &mut BackendRequest::default());
        assert!(matches!(
            backend.set_gamma(&ctx, [2.0, 2.0, 2.0]),
            Err(PsywinError::GammaError(_))
        ));

        let mut request = BackendRequest {
            name: "window2".into(),
            gamma_error_policy: GammaErrorPolicy::Warn,
            ..Default::default()
        };
        let mut lenient = open(&ctx, &mut request);
        assert!(lenient.set_gamma(&ctx, [2.0, 2.0, 2.0]).is_ok());
        let short = GammaRamp::linear(16, RampType::Plain);
        assert!(lenient.set_gamma_ramp(&ctx, &short).is_ok());
    }

    #[test]
    fn unsupported_settings_are_downgraded() {
        let ctx = RenderingContext::builder()
            .headless_display(HeadlessDisplay::new(1024, 768, 75).with_float_targets(false))
            .build();
        let mut request = BackendRequest {
            stereo: true,
            use_fbo: true,
            multi_sample: true,
            num_samples: 6,
            screen: 4,
            ..Default::default()
        };
        let backend = open(&ctx, &mut request);
        assert!(!request.stereo);
        assert!(!request.use_fbo);
        assert!(!request.multi_sample);
        assert_eq!(request.screen, 0);
        assert_eq!(request.stencil_bits, 0);
        assert_eq!(backend.position(), (112, 84));
    }

    #[test]
    fn buffers_swap_and_clear() {
        let ctx = RenderingContext::builder().build();
        let mut backend = open(
            &ctx,
            &mut BackendRequest {
                size: (4, 4),
                wait_blanking: false,
                ..Default::default()
            },
        );
        backend.clear_buffer(&ctx, [1.0, 0.0, 0.0, 1.0]).unwrap();
        assert_eq!(backend.read_pixels(&ctx, ReadBuffer::Front).unwrap().get_pixel(0, 0), &Rgba([0, 0, 0, 0]));
        backend.swap_buffers(&ctx, true).unwrap();
        assert_eq!(
            backend.read_pixels(&ctx, ReadBuffer::Front).unwrap().get_pixel(0, 0),
            &Rgba([255, 0, 0, 255])
        );
        assert_eq!(ctx.current(), Some(backend.window_id()));
    }
}
