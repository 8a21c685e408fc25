//! Configuration negotiation shared by all backends.
//!
//! Each backend describes its displays with [`DisplayInfo`] and runs the request
//! through these helpers. A configuration the hardware cannot deliver is downgraded
//! with a warning; the only hard failure is having no display at all.

use super::BackendRequest;
use crate::errors::{PsywinError, Result};

/// A display mode, with the refresh rate rounded to whole Hz.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VideoMode {
    pub size: (u32, u32),
    pub bpc: (u8, u8, u8),
    pub refresh_hz: u32,
}

impl VideoMode {
    pub fn new(size: (u32, u32), bpc: (u8, u8, u8), refresh_hz: u32) -> Self {
        Self {
            size,
            bpc,
            refresh_hz,
        }
    }

    /// Split a packed colour depth (24, 30, 32 bits) into bits per channel.
    pub fn bpc_from_bit_depth(bit_depth: u16) -> (u8, u8, u8) {
        match bit_depth {
            30 => (10, 10, 10),
            48 => (16, 16, 16),
            16 => (5, 6, 5),
            _ => (8, 8, 8),
        }
    }
}

/// A connected display as seen by a backend.
#[derive(Debug, Clone, PartialEq)]
pub struct DisplayInfo {
    pub name: String,
    /// Top-left corner on the virtual desktop.
    pub position: (i32, i32),
    /// The mode the display is currently running in.
    pub native_mode: VideoMode,
    pub modes: Vec<VideoMode>,
}

/// Validate `requested` against the number of connected displays.
pub fn select_screen(requested: usize, n_screens: usize) -> Result<usize> {
    if n_screens == 0 {
        return Err(PsywinError::backend_init(
            "display",
            "no displays are connected",
        ));
    }
    if requested >= n_screens {
        log::warn!("Requested an unavailable screen number - using first available.");
        return Ok(0);
    }
    Ok(requested)
}

/// Outcome of [`negotiate_video_mode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoModeChoice {
    pub mode: VideoMode,
    /// True when the native mode was used instead of the requested one.
    pub substituted: bool,
}

/// Find a supported mode for the request. Full-screen windows need an exact size,
/// colour depth and refresh rate; windowed ones only need a matching colour depth.
/// Anything else falls back to the display's native mode.
pub fn negotiate_video_mode(display: &DisplayInfo, request: &mut BackendRequest) -> VideoModeChoice {
    let wanted = VideoMode::new(request.size, request.bpc, request.refresh_hz);
    let supported = display.modes.iter().any(|mode| {
        let bpc_ok = mode.bpc == wanted.bpc;
        if request.fullscr {
            bpc_ok && mode.size == wanted.size && mode.refresh_hz == wanted.refresh_hz
        } else {
            bpc_ok
        }
    });

    if supported {
        return VideoModeChoice {
            mode: wanted,
            substituted: false,
        };
    }

    let native = display.native_mode;
    log::warn!("The specified video mode is not supported by this display, using native mode ...");
    if request.fullscr {
        log::warn!(
            "Overriding user video settings: size {:?} -> {:?}, bpc {:?} -> {:?}, refreshHz {} -> {}",
            request.size,
            native.size,
            request.bpc,
            native.bpc,
            request.refresh_hz,
            native.refresh_hz
        );
        request.size = native.size;
    } else {
        log::warn!(
            "Overriding user video settings: bpc {:?} -> {:?}, refreshHz {} -> {}",
            request.bpc,
            native.bpc,
            request.refresh_hz,
            native.refresh_hz
        );
    }
    request.bpc = native.bpc;
    request.refresh_hz = native.refresh_hz;

    VideoModeChoice {
        mode: VideoMode::new(request.size, native.bpc, native.refresh_hz),
        substituted: true,
    }
}

/// The checks that need no driver: the sample count must be a power of two and at
/// least 2. Backends whose pixel format is fixed at window creation run this before
/// asking for the window.
pub fn validate_sample_count(request: &mut BackendRequest) -> Option<u32> {
    if !request.multi_sample {
        return None;
    }
    let n = request.num_samples;
    if !n.is_power_of_two() {
        log::warn!("Invalid number of MSAA samples provided, must be power of two. Disabling.");
        request.multi_sample = false;
        return None;
    }
    if n < 2 {
        log::warn!("Invalid number of MSAA samples provided, must be at least 2. Disabling.");
        request.multi_sample = false;
        return None;
    }
    Some(n)
}

/// Check the requested sample count against the driver maximum. Returns the sample count
/// to use, or `None` (and clears `multi_sample`) when multisampling is off.
pub fn negotiate_multisample(request: &mut BackendRequest, max_samples: u32) -> Option<u32> {
    let n = validate_sample_count(request)?;
    if n > max_samples {
        log::warn!(
            "Invalid number of MSAA samples provided, outside of valid range (2 - {}). Disabling.",
            max_samples
        );
        request.multi_sample = false;
        return None;
    }
    Some(n)
}

/// In full-screen mode the surface may come out a different size than asked for. The
/// actual size wins.
pub fn check_matching_sizes(request: &mut BackendRequest, actual: (u32, u32)) {
    if request.size != actual {
        log::warn!(
            "User requested fullscreen with size {:?}, but screen is actually {:?}. Using actual size",
            request.size,
            actual
        );
        request.size = actual;
    }
}

/// Top-left position that centres a window of `size` on `display`. Full-screen requests
/// with an explicit position are told the position is ignored.
pub fn resolve_position(display: &DisplayInfo, request: &mut BackendRequest) -> (i32, i32) {
    if request.fullscr {
        if request.pos.is_some() {
            log::warn!("Ignoring window 'pos' in fullscreen mode.");
            request.pos = None;
        }
        return display.position;
    }
    match request.pos {
        Some((x, y)) => (display.position.0 + x, display.position.1 + y),
        None => {
            let (dw, dh) = display.native_mode.size;
            let (w, h) = request.size;
            (
                display.position.0 + (dw as i32 - w as i32) / 2,
                display.position.1 + (dh as i32 - h as i32) / 2,
            )
        }
    }
}

/// Stencil bits are only allocated when the window asked for a stencil buffer.
pub fn resolve_stencil_bits(request: &mut BackendRequest) {
    if !request.allow_stencil {
        request.stencil_bits = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn display() -> DisplayInfo {
        let native = VideoMode::new((1920, 1080), (8, 8, 8), 60);
        DisplayInfo {
            name: "test".into(),
            position: (0, 0),
            native_mode: native,
            modes: vec![
                native,
                VideoMode::new((1280, 720), (8, 8, 8), 60),
                VideoMode::new((1280, 720), (8, 8, 8), 120),
            ],
        }
    }

    #[test]
    fn screen_out_of_range_falls_back_to_first() {
        assert_eq!(select_screen(1, 2).unwrap(), 1);
        assert_eq!(select_screen(3, 2).unwrap(), 0);
        assert!(select_screen(0, 0).is_err());
    }

    #[test]
    fn fullscreen_needs_an_exact_mode() {
        let mut request = BackendRequest {
            fullscr: true,
            size: (1280, 720),
            refresh_hz: 120,
            ..Default::default()
        };
        let choice = negotiate_video_mode(&display(), &mut request);
        assert!(!choice.substituted);
        assert_eq!(request.size, (1280, 720));

        let mut request = BackendRequest {
            fullscr: true,
            size: (1280, 720),
            refresh_hz: 144,
            ..Default::default()
        };
        let choice = negotiate_video_mode(&display(), &mut request);
        assert!(choice.substituted);
        assert_eq!(request.size, (1920, 1080));
        assert_eq!(request.refresh_hz, 60);
    }

    #[test]
    fn windowed_modes_only_check_colour_depth() {
        let mut request = BackendRequest {
            size: (333, 222),
            refresh_hz: 144,
            ..Default::default()
        };
        assert!(!negotiate_video_mode(&display(), &mut request).substituted);
        assert_eq!(request.refresh_hz, 144);

        let mut request = BackendRequest {
            size: (333, 222),
            bpc: (10, 10, 10),
            ..Default::default()
        };
        let choice = negotiate_video_mode(&display(), &mut request);
        assert!(choice.substituted);
        // windowed size is kept
        assert_eq!(request.size, (333, 222));
        assert_eq!(request.bpc, (8, 8, 8));
    }

    #[test]
    fn multisample_downgrades_instead_of_failing() {
        let mut request = BackendRequest {
            multi_sample: true,
            num_samples: 3,
            ..Default::default()
        };
        assert_eq!(negotiate_multisample(&mut request, 8), None);
        assert!(!request.multi_sample);

        let mut request = BackendRequest {
            multi_sample: true,
            num_samples: 16,
            ..Default::default()
        };
        assert_eq!(negotiate_multisample(&mut request, 8), None);
        assert!(!request.multi_sample);

        let mut request = BackendRequest {
            multi_sample: true,
            num_samples: 4,
            ..Default::default()
        };
        assert_eq!(negotiate_multisample(&mut request, 8), Some(4));
        assert!(request.multi_sample);
    }

    #[test]
    fn sample_counts_are_checked_before_the_driver_is_asked() {
        let mut request = BackendRequest {
            multi_sample: true,
            num_samples: 6,
            ..Default::default()
        };
        assert_eq!(validate_sample_count(&mut request), None);
        assert!(!request.multi_sample);

        let mut request = BackendRequest {
            multi_sample: true,
            num_samples: 1,
            ..Default::default()
        };
        assert_eq!(validate_sample_count(&mut request), None);
        assert!(!request.multi_sample);

        // no upper bound until the driver has been asked
        let mut request = BackendRequest {
            multi_sample: true,
            num_samples: 32,
            ..Default::default()
        };
        assert_eq!(validate_sample_count(&mut request), Some(32));
        assert_eq!(negotiate_multisample(&mut request, 8), None);
        assert!(!request.multi_sample);
    }

    #[test]
    fn windows_are_centred_unless_placed() {
        let mut request = BackendRequest {
            size: (800, 600),
            ..Default::default()
        };
        assert_eq!(resolve_position(&display(), &mut request), (560, 240));

        request.pos = Some((10, 20));
        assert_eq!(resolve_position(&display(), &mut request), (10, 20));

        request.fullscr = true;
        assert_eq!(resolve_position(&display(), &mut request), (0, 0));
        assert_eq!(request.pos, None);
    }

    #[test]
    fn fullscreen_size_mismatch_adopts_actual_size() {
        let mut request = BackendRequest {
            size: (800, 600),
            ..Default::default()
        };
        check_matching_sizes(&mut request, (1920, 1080));
        assert_eq!(request.size, (1920, 1080));
    }

    #[test]
    fn bit_depths_split_into_channels() {
        assert_eq!(VideoMode::bpc_from_bit_depth(32), (8, 8, 8));
        assert_eq!(VideoMode::bpc_from_bit_depth(30), (10, 10, 10));
    }
}
