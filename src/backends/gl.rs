//! OpenGL helpers shared by the GLFW and SDL backends.

use glow::HasContext;
use image::RgbaImage;

use super::ReadBuffer;
use crate::errors::{PsywinError, Result};
use crate::gamma::{GammaErrorPolicy, GammaRamp};
use crate::visual::blend::BlendMode;

/// Renderer string plus version, e.g. `"NVIDIA GeForce GTX 1080/PCIe/SSE2 4.6.0 NVIDIA 535.54"`.
pub fn driver(gl: &glow::Context) -> String {
    unsafe {
        format!(
            "{} {}",
            gl.get_parameter_string(glow::RENDERER),
            gl.get_parameter_string(glow::VERSION)
        )
    }
}

pub fn max_samples(gl: &glow::Context) -> u32 {
    unsafe { gl.get_parameter_i32(glow::MAX_SAMPLES).max(1) as u32 }
}

pub fn setup(gl: &glow::Context, multisample: bool, size: (u32, u32)) {
    unsafe {
        if multisample {
            gl.enable(glow::MULTISAMPLE);
        }
        gl.viewport(0, 0, size.0 as i32, size.1 as i32);
        gl.enable(glow::BLEND);
    }
}

pub fn resize(gl: &glow::Context, size: (u32, u32)) {
    unsafe { gl.viewport(0, 0, size.0 as i32, size.1 as i32) }
}

pub fn clear(gl: &glow::Context, rgba: [f64; 4]) {
    let [r, g, b, a] = rgba.map(|c| c as f32);
    unsafe {
        gl.clear_color(r, g, b, a);
        gl.clear(glow::COLOR_BUFFER_BIT | glow::DEPTH_BUFFER_BIT | glow::STENCIL_BUFFER_BIT);
    }
}

pub fn finish(gl: &glow::Context) {
    unsafe { gl.finish() }
}

pub fn set_blend_mode(gl: &glow::Context, mode: BlendMode) {
    unsafe {
        gl.enable(glow::BLEND);
        match mode {
            BlendMode::Avg => gl.blend_func(glow::SRC_ALPHA, glow::ONE_MINUS_SRC_ALPHA),
            BlendMode::Add => gl.blend_func(glow::SRC_ALPHA, glow::ONE),
        }
    }
}

/// Read a colour buffer of the default framebuffer. GL rows run bottom-up, so the
/// result is flipped.
pub fn read_pixels(gl: &glow::Context, size: (u32, u32), buffer: ReadBuffer) -> Result<RgbaImage> {
    let (width, height) = size;
    let mut data = vec![0u8; (width * height * 4) as usize];
    unsafe {
        gl.read_buffer(match buffer {
            ReadBuffer::Front => glow::FRONT,
            ReadBuffer::Back => glow::BACK,
        });
        gl.pixel_store_i32(glow::PACK_ALIGNMENT, 1);
        gl.read_pixels(
            0,
            0,
            width as i32,
            height as i32,
            glow::RGBA,
            glow::UNSIGNED_BYTE,
            glow::PixelPackData::Slice(&mut data),
        );
    }
    let image = RgbaImage::from_raw(width, height, data)
        .ok_or_else(|| PsywinError::CustomError("pixel buffer has the wrong size".into()))?;
    Ok(image::imageops::flip_vertical(&image))
}

/// The original table of a display plus the policy for failed writes. Both GL backends
/// talk to their library's own gamma calls, so only the bookkeeping is shared.
#[derive(Debug)]
pub struct GammaState {
    pub policy: GammaErrorPolicy,
    pub original: Option<GammaRamp>,
    /// GLFW only reaches the monitor table of a full-screen window.
    pub fullscreen_only: bool,
}

impl GammaState {
    pub fn new(policy: GammaErrorPolicy, fullscreen_only: bool) -> Self {
        Self {
            policy,
            original: None,
            fullscreen_only,
        }
    }

    /// Whether the hardware table can be touched in the current window mode.
    pub fn applies(&self, fullscr: bool) -> bool {
        fullscr || !self.fullscreen_only
    }

    /// Keep the table found at open time so `close` can put it back.
    pub fn capture(&mut self, read: Result<GammaRamp>) -> Result<()> {
        match read {
            Ok(ramp) => self.original = Some(ramp),
            Err(e) => self.policy.handle("read", e)?,
        }
        Ok(())
    }

    /// A ramp is only written when its length matches the hardware table. Returns
    /// `Ok(false)` when the policy lets a mismatch pass.
    pub fn check_size(&self, ramp: &GammaRamp, size: usize) -> Result<bool> {
        if ramp.len() == size {
            return Ok(true);
        }
        self.policy.handle(
            "set",
            format!("ramp has {} entries but the display expects {}", ramp.len(), size),
        )?;
        Ok(false)
    }

    pub fn check(&self, written: std::result::Result<(), String>) -> Result<()> {
        match written {
            Ok(()) => Ok(()),
            Err(e) => self.policy.handle("set", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gamma::RampType;

    #[test]
    fn monitor_gamma_needs_fullscreen() {
        let glfw = GammaState::new(GammaErrorPolicy::Raise, true);
        assert!(!glfw.applies(false));
        assert!(glfw.applies(true));
        let sdl = GammaState::new(GammaErrorPolicy::Raise, false);
        assert!(sdl.applies(false));
    }

    #[test]
    fn ramps_of_the_wrong_size_are_not_written() {
        let ramp = GammaRamp::linear(256, RampType::Plain);
        let strict = GammaState::new(GammaErrorPolicy::Raise, true);
        assert!(strict.check_size(&ramp, 256).unwrap());
        assert!(matches!(
            strict.check_size(&ramp, 1024),
            Err(PsywinError::GammaError(_))
        ));
        let lenient = GammaState::new(GammaErrorPolicy::Warn, true);
        assert!(!lenient.check_size(&ramp, 1024).unwrap());
    }

    #[test]
    fn failed_reads_follow_the_policy() {
        let mut state = GammaState::new(GammaErrorPolicy::Ignore, false);
        state
            .capture(Err(PsywinError::GammaError("no table".into())))
            .unwrap();
        assert!(state.original.is_none());

        let mut state = GammaState::new(GammaErrorPolicy::Raise, false);
        assert!(state
            .capture(Err(PsywinError::GammaError("no table".into())))
            .is_err());
        state
            .capture(Ok(GammaRamp::linear(256, RampType::Plain)))
            .unwrap();
        assert_eq!(state.original.as_ref().map(GammaRamp::len), Some(256));
    }
}
