// Copyright (c) 2024 Marc Pabst
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::cell::Cell;
use std::collections::VecDeque;
use std::path::Path;
use std::rc::Rc;

use derive_debug::Dbg;
use image::RgbaImage;
use nalgebra::{Matrix4, Vector3};

use super::blend::BlendMode;
use super::color::{Color, ColorSpace, ColorValue};
use super::frame_stats::{FrameIntervalRecorder, FrameRateProbe, MsPerFrame, FRAME_TIMES_CAPACITY};
use super::movie::{self, MovieOptions};
use super::units::{self, Units};
use crate::backends::{self, Backend, BackendEvent, BackendRequest, CursorKind, ReadBuffer, WindowBackendKind};
use crate::clock::Stopwatch;
use crate::context::{RenderingContext, WindowId};
use crate::errors::{PsywinError, Result};
use crate::gamma::{Gamma, GammaErrorPolicy, GammaRamp, RampType};
use crate::logging::{self, LogLevel};
use crate::monitor::Monitor;

/// File name used by [`Window::save_frame_intervals`] when none is given.
pub const DEFAULT_FRAME_INTERVALS_FILE: &str = "lastFrameIntervals.log";

/// Settings that only some backends look at.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackendConf {
    pub refresh_hz: u32,
    pub swap_interval: u32,
}

impl Default for BackendConf {
    fn default() -> Self {
        Self {
            refresh_hz: 60,
            swap_interval: 1,
        }
    }
}

/// Options for [`Window::new`]. Fields left as `None` are filled in from the context's
/// [`Preferences`](crate::config::Preferences).
#[derive(Debug, Clone, PartialEq)]
pub struct WindowOptions {
    pub size: (u32, u32),
    /// Top-left corner relative to the screen. `None` centres the window.
    pub pos: Option<(i32, i32)>,
    pub color: ColorValue,
    pub color_space: ColorSpace,
    pub fullscr: Option<bool>,
    pub allow_gui: Option<bool>,
    pub monitor: Option<Monitor>,
    pub win_type: Option<WindowBackendKind>,
    pub units: Option<Units>,
    pub gamma: Option<Gamma>,
    /// Overrides ramp-type detection.
    pub gamma_ramp_type: Option<RampType>,
    pub blend_mode: BlendMode,
    pub screen: usize,
    pub view_scale: Option<(f64, f64)>,
    pub view_pos: Option<(f64, f64)>,
    pub view_ori: f64,
    pub wait_blanking: bool,
    pub allow_stencil: bool,
    pub multi_sample: bool,
    pub num_samples: u32,
    pub stereo: bool,
    pub name: String,
    pub title: String,
    pub check_timing: bool,
    pub use_fbo: bool,
    pub use_retina: bool,
    pub auto_log: bool,
    pub gamma_error_policy: Option<GammaErrorPolicy>,
    pub bpc: (u8, u8, u8),
    pub depth_bits: u8,
    pub stencil_bits: u8,
    pub backend_conf: BackendConf,
    /// Logged while the refresh rate is being measured.
    pub info_msg: Option<String>,
}

impl Default for WindowOptions {
    fn default() -> Self {
        Self {
            size: (800, 600),
            pos: None,
            color: ColorValue::default(),
            color_space: ColorSpace::Rgb,
            fullscr: None,
            allow_gui: None,
            monitor: None,
            win_type: None,
            units: None,
            gamma: None,
            gamma_ramp_type: None,
            blend_mode: BlendMode::Avg,
            screen: 0,
            view_scale: None,
            view_pos: None,
            view_ori: 0.0,
            wait_blanking: true,
            allow_stencil: false,
            multi_sample: false,
            num_samples: 2,
            stereo: false,
            name: "window1".into(),
            title: "PsychoPy".into(),
            check_timing: true,
            use_fbo: false,
            use_retina: true,
            auto_log: true,
            gamma_error_policy: None,
            bpc: (8, 8, 8),
            depth_bits: 8,
            stencil_bits: 8,
            backend_conf: BackendConf::default(),
            info_msg: None,
        }
    }
}

impl WindowOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.size = (width, height);
        self
    }

    pub fn with_pos(mut self, x: i32, y: i32) -> Self {
        self.pos = Some((x, y));
        self
    }

    pub fn with_color(mut self, color: impl Into<ColorValue>, space: ColorSpace) -> Self {
        self.color = color.into();
        self.color_space = space;
        self
    }

    pub fn with_fullscr(mut self, fullscr: bool) -> Self {
        self.fullscr = Some(fullscr);
        self
    }

    pub fn with_allow_gui(mut self, allow_gui: bool) -> Self {
        self.allow_gui = Some(allow_gui);
        self
    }

    pub fn with_monitor(mut self, monitor: Monitor) -> Self {
        self.monitor = Some(monitor);
        self
    }

    pub fn with_win_type(mut self, win_type: WindowBackendKind) -> Self {
        self.win_type = Some(win_type);
        self
    }

    pub fn with_units(mut self, units: Units) -> Self {
        self.units = Some(units);
        self
    }

    pub fn with_gamma(mut self, gamma: impl Into<Gamma>) -> Self {
        self.gamma = Some(gamma.into());
        self
    }

    pub fn with_gamma_ramp_type(mut self, ramp_type: RampType) -> Self {
        self.gamma_ramp_type = Some(ramp_type);
        self
    }

    pub fn with_blend_mode(mut self, blend_mode: BlendMode) -> Self {
        self.blend_mode = blend_mode;
        self
    }

    pub fn with_screen(mut self, screen: usize) -> Self {
        self.screen = screen;
        self
    }

    pub fn with_view_scale(mut self, x: f64, y: f64) -> Self {
        self.view_scale = Some((x, y));
        self
    }

    pub fn with_view_pos(mut self, x: f64, y: f64) -> Self {
        self.view_pos = Some((x, y));
        self
    }

    pub fn with_view_ori(mut self, ori: f64) -> Self {
        self.view_ori = ori;
        self
    }

    pub fn with_wait_blanking(mut self, wait_blanking: bool) -> Self {
        self.wait_blanking = wait_blanking;
        self
    }

    pub fn with_allow_stencil(mut self, allow_stencil: bool) -> Self {
        self.allow_stencil = allow_stencil;
        self
    }

    pub fn with_multi_sample(mut self, num_samples: u32) -> Self {
        self.multi_sample = true;
        self.num_samples = num_samples;
        self
    }

    pub fn with_stereo(mut self, stereo: bool) -> Self {
        self.stereo = stereo;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_check_timing(mut self, check_timing: bool) -> Self {
        self.check_timing = check_timing;
        self
    }

    pub fn with_use_fbo(mut self, use_fbo: bool) -> Self {
        self.use_fbo = use_fbo;
        self
    }

    pub fn with_use_retina(mut self, use_retina: bool) -> Self {
        self.use_retina = use_retina;
        self
    }

    pub fn with_auto_log(mut self, auto_log: bool) -> Self {
        self.auto_log = auto_log;
        self
    }

    pub fn with_gamma_error_policy(mut self, policy: GammaErrorPolicy) -> Self {
        self.gamma_error_policy = Some(policy);
        self
    }

    pub fn with_bpc(mut self, bpc: (u8, u8, u8)) -> Self {
        self.bpc = bpc;
        self
    }

    pub fn with_depth_bits(mut self, depth_bits: u8) -> Self {
        self.depth_bits = depth_bits;
        self
    }

    pub fn with_stencil_bits(mut self, stencil_bits: u8) -> Self {
        self.stencil_bits = stencil_bits;
        self
    }

    pub fn with_backend_conf(mut self, backend_conf: BackendConf) -> Self {
        self.backend_conf = backend_conf;
        self
    }

    pub fn with_info_msg(mut self, info_msg: impl Into<String>) -> Self {
        self.info_msg = Some(info_msg.into());
        self
    }
}

/// Passed to `call_on_flip` callbacks.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlipEvent {
    /// Session time of the flip.
    pub time: f64,
    /// Number of flips so far, this one included.
    pub frame: u64,
}

/// Filled in with the time of the next flip. See [`Window::time_on_flip`].
#[derive(Debug, Clone, Default)]
pub struct FlipTime(Rc<Cell<Option<f64>>>);

impl FlipTime {
    pub fn get(&self) -> Option<f64> {
        self.0.get()
    }
}

/// Time base for [`Window::get_future_flip_time`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlipTimeBase {
    /// Session time, as returned by `flip()`.
    #[default]
    Session,
    /// Seconds from now.
    FromNow,
}

type FlipCallback = Box<dyn FnOnce(&FlipEvent)>;

/// An on-screen window. All drawing targets the back buffer; `flip()` presents it.
#[derive(Dbg)]
pub struct Window {
    ctx: RenderingContext,
    id: WindowId,
    kind: WindowBackendKind,
    #[dbg(placeholder = "...")]
    backend: Option<Box<dyn Backend>>,
    /// The configuration the backend ended up with.
    config: BackendRequest,
    monitor: Option<Monitor>,
    color: Color,
    color_space: ColorSpace,
    units: Units,
    view_scale: Option<(f64, f64)>,
    view_pos: Option<(f64, f64)>,
    view_ori: f64,
    view_offset: Option<[f32; 3]>,
    gamma: Option<Gamma>,
    blend_mode: BlendMode,
    mouse_visible: bool,
    frame_clock: Stopwatch,
    recorder: FrameIntervalRecorder,
    frame_times: VecDeque<f64>,
    frame_n: u64,
    refresh_threshold: f64,
    monitor_frame_period: f64,
    monitor_frame_rate: Option<f64>,
    #[dbg(placeholder = "...")]
    to_call: Vec<FlipCallback>,
    to_log: Vec<(String, LogLevel)>,
    #[dbg(placeholder = "...")]
    movie_frames: Vec<RgbaImage>,
    closed: bool,
}

impl Window {
    /// Open a window with the backend named by `options.win_type`.
    pub fn new(ctx: &RenderingContext, options: WindowOptions) -> Result<Self> {
        let kind = options.win_type.unwrap_or(ctx.preferences().win_type);
        Self::with_backend(ctx, options, |ctx, id, request| {
            backends::create_backend(kind, ctx, id, request)
        })
    }

    /// Open a window, creating its backend with `factory`. The factory may downgrade
    /// the request in place; the window adopts whatever it leaves there.
    pub fn with_backend<F>(ctx: &RenderingContext, options: WindowOptions, factory: F) -> Result<Self>
    where
        F: FnOnce(&RenderingContext, WindowId, &mut BackendRequest) -> Result<Box<dyn Backend>>,
    {
        let prefs = ctx.preferences();
        let kind = options.win_type.unwrap_or(prefs.win_type);

        if options.view_pos.is_some() && options.units.is_none() {
            return Err(PsywinError::InvalidOptionError(
                "you must define the window units to use view_pos".into(),
            ));
        }
        if options.view_pos.is_some() && options.view_ori != 0.0 {
            return Err(PsywinError::NotImplementedError(
                "view_ori together with view_pos".into(),
            ));
        }

        let mut request = BackendRequest {
            name: options.name.clone(),
            title: options.title.clone(),
            size: options.size,
            pos: options.pos,
            fullscr: options.fullscr.unwrap_or(prefs.fullscr),
            allow_gui: options.allow_gui.unwrap_or(prefs.allow_gui),
            screen: options.screen,
            stereo: options.stereo,
            multi_sample: options.multi_sample,
            num_samples: options.num_samples,
            allow_stencil: options.allow_stencil,
            use_fbo: options.use_fbo,
            use_retina: options.use_retina,
            bpc: options.bpc,
            depth_bits: options.depth_bits,
            stencil_bits: options.stencil_bits,
            refresh_hz: options.backend_conf.refresh_hz,
            swap_interval: options.backend_conf.swap_interval,
            wait_blanking: options.wait_blanking,
            gamma_error_policy: options.gamma_error_policy.unwrap_or(prefs.gamma_error_policy),
            ramp_type: options.gamma_ramp_type,
            auto_log: options.auto_log,
        };
        let units = options.units.unwrap_or(prefs.units);

        let id = ctx.register_window(&options.name, kind)?;
        let backend = match factory(ctx, id, &mut request) {
            Ok(backend) => backend,
            Err(e) => {
                ctx.unregister_window(id);
                return Err(e);
            }
        };

        let mut window = Window {
            ctx: ctx.clone(),
            id,
            kind,
            backend: Some(backend),
            config: request,
            monitor: options.monitor,
            color: Color::default(),
            color_space: options.color_space,
            units,
            view_scale: options.view_scale,
            view_pos: options.view_pos,
            view_ori: options.view_ori,
            view_offset: None,
            gamma: None,
            blend_mode: BlendMode::Avg,
            mouse_visible: true,
            frame_clock: Stopwatch::new(ctx.clock()),
            recorder: FrameIntervalRecorder::new(),
            frame_times: VecDeque::with_capacity(FRAME_TIMES_CAPACITY),
            frame_n: 0,
            refresh_threshold: 1.0,
            monitor_frame_period: 1.0 / 60.0,
            monitor_frame_rate: None,
            to_call: Vec::new(),
            to_log: Vec::new(),
            movie_frames: Vec::new(),
            closed: false,
        };

        // from here on a failure drops `window`, which closes the backend again
        window.set_current()?;
        window.set_color(options.color, options.color_space)?;
        window.set_blend_mode(options.blend_mode)?;
        if !window.config.allow_gui {
            window.set_mouse_visible(false)?;
        }
        window.setup_gamma(options.gamma)?;

        if window.config.auto_log {
            logging::log_at(
                LogLevel::Exp,
                ctx.now(),
                &format!(
                    "Created {} = Window(size={:?}, fullscr={}, winType={}, screen={})",
                    window.config.name,
                    window.config.size,
                    window.config.fullscr,
                    kind,
                    window.config.screen
                ),
            );
        }

        if options.check_timing {
            if let Some(msg) = &options.info_msg {
                log::info!("{}", msg);
            }
            window.check_timing()?;
        }

        Ok(window)
    }

    fn setup_gamma(&mut self, gamma: Option<Gamma>) -> Result<()> {
        let gamma = gamma.or_else(|| self.monitor.as_ref().and_then(|m| m.gamma));
        match gamma {
            Some(gamma) => {
                if self.config.auto_log {
                    log::info!("Using gamma: {:?}", gamma.per_channel());
                }
                self.set_gamma(gamma)
            }
            None => {
                if self.config.auto_log {
                    log::info!("Using gamma table of operating system");
                }
                Ok(())
            }
        }
    }

    fn check_timing(&mut self) -> Result<()> {
        let rate = self.get_actual_frame_rate(FrameRateProbe::default())?;
        self.monitor_frame_rate = rate;
        self.monitor_frame_period = rate.map_or(1.0 / 60.0, |r| 1.0 / r);
        self.refresh_threshold = self.monitor_frame_period * 1.2;
        Ok(())
    }

    fn backend(&mut self) -> Result<&mut Box<dyn Backend>> {
        self.backend.as_mut().ok_or(PsywinError::WindowClosedError)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(PsywinError::WindowClosedError);
        }
        Ok(())
    }

    pub fn id(&self) -> WindowId {
        self.id
    }

    pub fn context(&self) -> &RenderingContext {
        &self.ctx
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn win_type(&self) -> WindowBackendKind {
        self.kind
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn size(&self) -> (u32, u32) {
        self.config.size
    }

    pub fn pos(&self) -> Option<(i32, i32)> {
        self.config.pos
    }

    pub fn screen(&self) -> usize {
        self.config.screen
    }

    pub fn is_fullscr(&self) -> bool {
        self.config.fullscr
    }

    pub fn multi_sample(&self) -> bool {
        self.config.multi_sample
    }

    pub fn num_samples(&self) -> u32 {
        self.config.num_samples
    }

    pub fn stereo(&self) -> bool {
        self.config.stereo
    }

    pub fn use_fbo(&self) -> bool {
        self.config.use_fbo
    }

    pub fn wait_blanking(&self) -> bool {
        self.config.wait_blanking
    }

    pub fn set_wait_blanking(&mut self, wait_blanking: bool) {
        self.config.wait_blanking = wait_blanking;
    }

    pub fn config(&self) -> &BackendRequest {
        &self.config
    }

    pub fn monitor(&self) -> Option<&Monitor> {
        self.monitor.as_ref()
    }

    pub fn backend_name(&self) -> Option<String> {
        self.backend.as_ref().map(|b| b.name(&self.ctx))
    }

    pub fn shaders_supported(&self) -> bool {
        self.backend.as_ref().map_or(false, |b| b.shaders_supported())
    }

    /// Present the back buffer and return the flip time when `wait_blanking` is on.
    pub fn flip(&mut self, clear_buffer: bool) -> Result<Option<f64>> {
        self.ensure_open()?;
        let ctx = self.ctx.clone();
        if ctx.is_cancelled() {
            return Err(PsywinError::CancelledError);
        }
        let clear_color = self.color.clamped_rgba1();
        let wait_blanking = self.config.wait_blanking;
        let backend = self.backend.as_mut().ok_or(PsywinError::WindowClosedError)?;

        self.view_offset = backend.pre_swap_offset();
        let swapped = backend.swap_buffers(&ctx, true);
        self.view_offset = None;
        swapped?;
        if let Some((width, height)) = ctx.take_resize(self.id) {
            backend.on_resize(width, height);
            self.config.size = (width, height);
        }

        if clear_buffer {
            backend.clear_buffer(&ctx, clear_color)?;
        }
        if wait_blanking {
            backend.finish()?;
        }

        let now = ctx.now();
        if self.frame_times.len() == FRAME_TIMES_CAPACITY {
            self.frame_times.pop_front();
        }
        self.frame_times.push_back(now);
        self.frame_n += 1;

        let event = FlipEvent {
            time: now,
            frame: self.frame_n,
        };
        for callback in std::mem::take(&mut self.to_call) {
            callback(&event);
        }

        self.recorder.on_flip(now, self.refresh_threshold);

        for (msg, level) in self.to_log.drain(..) {
            logging::log_at(level, now, &msg);
        }

        Ok(wait_blanking.then_some(now))
    }

    /// Flip `flips` times, clearing only after the last one.
    pub fn multi_flip(&mut self, flips: i32, clear_buffer: bool) -> Result<()> {
        self.ensure_open()?;
        if flips < 1 {
            log::error!("flips argument for multi_flip should be a positive integer");
            return Ok(());
        }
        if flips > 1 && !self.config.wait_blanking {
            log::warn!(
                "Call to Window::multi_flip() with flips > 1 is unnecessary because wait_blanking is off"
            );
        }
        for _ in 0..flips - 1 {
            self.flip(false)?;
        }
        self.flip(clear_buffer)?;
        Ok(())
    }

    /// Run `f` right after the next flip.
    pub fn call_on_flip(&mut self, f: impl FnOnce(&FlipEvent) + 'static) {
        self.to_call.push(Box::new(f));
    }

    /// Log `msg` with the time of the next flip.
    pub fn log_on_flip(&mut self, msg: impl Into<String>, level: LogLevel) {
        self.to_log.push((msg.into(), level));
    }

    /// A handle that receives the time of the next flip.
    pub fn time_on_flip(&mut self) -> FlipTime {
        let handle = FlipTime::default();
        let cell = handle.0.clone();
        self.call_on_flip(move |event| cell.set(Some(event.time)));
        handle
    }

    /// Time of the first flip at or after `target_time` seconds from now.
    pub fn get_future_flip_time(&self, target_time: f64, base: FlipTimeBase) -> f64 {
        let period = self.monitor_frame_period;
        let now = self.ctx.now();
        let last_flip = self.frame_times.back().copied().unwrap_or(now);
        let next = last_flip + period;
        let t = if now + target_time > next {
            let extra = ((now + target_time - next) / period).ceil();
            next + extra * period
        } else {
            next
        };
        match base {
            FlipTimeBase::Session => t,
            FlipTimeBase::FromNow => t - now,
        }
    }

    /// Flip timestamps, most recent last.
    pub fn frame_times(&self) -> &VecDeque<f64> {
        &self.frame_times
    }

    pub fn last_frame_time(&self) -> Option<f64> {
        self.frame_times.back().copied()
    }

    pub fn refresh_threshold(&self) -> f64 {
        self.refresh_threshold
    }

    pub fn set_refresh_threshold(&mut self, threshold: f64) {
        self.refresh_threshold = threshold;
    }

    pub fn monitor_frame_period(&self) -> f64 {
        self.monitor_frame_period
    }

    /// The refresh rate measured when the window opened, if timing was checked.
    pub fn monitor_frame_rate(&self) -> Option<f64> {
        self.monitor_frame_rate
    }

    pub fn record_frame_intervals(&self) -> bool {
        self.recorder.is_recording()
    }

    /// Switch frame-interval recording. The first interval after switching on is
    /// discarded since it spans the time recording was off.
    pub fn set_record_frame_intervals(&mut self, on: bool) {
        self.recorder.set_recording(on);
        self.frame_clock.reset();
        if self.config.auto_log {
            log::debug!("{}: record_frame_intervals = {}", self.config.name, on);
        }
    }

    pub fn frame_intervals(&self) -> &[f64] {
        self.recorder.intervals()
    }

    pub fn n_dropped_frames(&self) -> usize {
        self.recorder.n_dropped_frames()
    }

    /// Write the recorded intervals as one comma-separated line.
    pub fn save_frame_intervals(&mut self, path: Option<&Path>, clear: bool) -> Result<()> {
        self.ensure_open()?;
        let path = path.unwrap_or(Path::new(DEFAULT_FRAME_INTERVALS_FILE));
        if !self.recorder.intervals().is_empty() {
            let mut writer = csv::WriterBuilder::new()
                .has_headers(false)
                .from_path(path)?;
            writer.write_record(self.recorder.intervals().iter().map(|v| v.to_string()))?;
            writer.flush()?;
        }
        if clear {
            self.recorder.clear_intervals();
        }
        Ok(())
    }

    /// Frames per second since the last call.
    pub fn fps(&mut self) -> f64 {
        let frames = self.recorder.take_frames();
        let elapsed = self.frame_clock.elapsed();
        self.frame_clock.reset();
        if elapsed > 0.0 {
            frames as f64 / elapsed
        } else {
            0.0
        }
    }

    /// Measure the refresh rate by flipping until `probe.n_identical` consecutive
    /// intervals agree. Returns `None` if they never do within `probe.n_max_frames`.
    pub fn get_actual_frame_rate(&mut self, probe: FrameRateProbe) -> Result<Option<f64>> {
        self.ensure_open()?;
        probe.validate()?;
        if self.config.auto_log {
            logging::log_at(
                LogLevel::Exp,
                self.ctx.now(),
                &format!(
                    "{}: Attempting to measure frame rate of screen ({}) ...",
                    self.config.name, self.config.screen
                ),
            );
        }

        let was_recording = self.recorder.is_recording();
        self.set_recording_quietly(false);
        for _ in 0..probe.n_warm_up_frames {
            self.flip(true)?;
        }

        self.set_recording_quietly(true);
        for _ in 0..probe.n_max_frames {
            self.flip(true)?;
            if let Some(rate) = probe.stable_rate(self.recorder.intervals()) {
                if self.config.auto_log {
                    logging::log_at(
                        LogLevel::Exp,
                        self.ctx.now(),
                        &format!(
                            "Screen ({}) actual frame rate measured at {:.2}Hz",
                            self.config.screen, rate
                        ),
                    );
                }
                self.set_recording_quietly(was_recording);
                self.recorder.clear_intervals();
                return Ok(Some(rate));
            }
        }

        self.set_recording_quietly(was_recording);
        self.recorder.clear_intervals();
        log::warn!(
            "Couldn't measure a consistent frame rate!\n  - Is your graphics card set to sync to vertical blank?\n  - Are you running other processes on your computer?"
        );
        Ok(None)
    }

    fn set_recording_quietly(&mut self, on: bool) {
        self.recorder.set_recording(on);
        self.frame_clock.reset();
    }

    /// Refresh timing over at least 60 frames. A `ms_delay` between 0 and 100 ms is
    /// spent before each flip to simulate drawing load.
    pub fn get_ms_per_frame(&mut self, n_frames: usize, ms_delay: f64) -> Result<MsPerFrame> {
        self.ensure_open()?;
        let n_frames = n_frames.max(60);
        let clock = self.ctx.clock();
        for _ in 0..5 {
            self.flip(true)?;
        }
        let mut timestamps = Vec::with_capacity(n_frames);
        for _ in 0..n_frames {
            let t = clock.now();
            timestamps.push(t);
            if ms_delay > 0.0 && ms_delay < 100.0 {
                clock.sleep_until(t + ms_delay / 1000.0);
            }
            self.flip(true)?;
        }
        MsPerFrame::from_timestamps(&timestamps)
            .ok_or_else(|| PsywinError::CustomError("not enough frames to time".into()))
    }

    pub fn color(&self) -> Color {
        self.color
    }

    pub fn color_space(&self) -> ColorSpace {
        self.color_space
    }

    /// Set the colour the back buffer is cleared to. Invalid colours are logged and
    /// replaced by the default grey.
    pub fn set_color(&mut self, color: impl Into<ColorValue>, space: ColorSpace) -> Result<()> {
        self.ensure_open()?;
        let value = color.into();
        let color = Color::parse(&value, space).unwrap_or_else(|e| {
            log::error!("{}; using the default colour instead", e);
            Color::default()
        });
        let ctx = self.ctx.clone();
        self.backend()?.clear_buffer(&ctx, color.clamped_rgba1())?;
        self.color = color;
        self.color_space = space;
        Ok(())
    }

    pub fn gamma(&self) -> Option<Gamma> {
        self.gamma
    }

    pub fn set_gamma(&mut self, gamma: impl Into<Gamma>) -> Result<()> {
        let gamma = gamma.into();
        let ctx = self.ctx.clone();
        self.backend()?.set_gamma(&ctx, gamma.per_channel())?;
        self.gamma = Some(gamma);
        Ok(())
    }

    pub fn gamma_ramp(&mut self) -> Result<GammaRamp> {
        let ctx = self.ctx.clone();
        self.backend()?.gamma_ramp(&ctx)
    }

    pub fn set_gamma_ramp(&mut self, ramp: &GammaRamp) -> Result<()> {
        let ctx = self.ctx.clone();
        self.backend()?.set_gamma_ramp(&ctx, ramp)
    }

    pub fn gamma_ramp_size(&mut self) -> Result<usize> {
        let ctx = self.ctx.clone();
        self.backend()?.gamma_ramp_size(&ctx)
    }

    pub fn blend_mode(&self) -> BlendMode {
        self.blend_mode
    }

    /// `Add` needs a float render target and falls back to `Avg` without one.
    pub fn set_blend_mode(&mut self, mode: BlendMode) -> Result<()> {
        let mode = if mode == BlendMode::Add && !self.config.use_fbo {
            log::warn!("User requested a blendmode of \"add\" but window requires use_fbo=true");
            BlendMode::Avg
        } else {
            mode
        };
        self.backend()?.set_blend_mode(mode)?;
        self.blend_mode = mode;
        Ok(())
    }

    pub fn blend_state(&self) -> wgpu::BlendState {
        self.blend_mode.blend_state()
    }

    pub fn units(&self) -> Units {
        self.units
    }

    pub fn set_units(&mut self, units: Units) {
        self.units = units;
    }

    /// Factors that convert the window's units to normalised device coordinates.
    pub fn units_scale(&self) -> Result<[f64; 2]> {
        self.ensure_open()?;
        units::units_scale(self.units, self.config.size, self.monitor.as_ref())
    }

    pub fn view_pos(&self) -> Option<(f64, f64)> {
        self.view_pos
    }

    pub fn set_view_pos(&mut self, pos: Option<(f64, f64)>) -> Result<()> {
        self.ensure_open()?;
        if pos.is_some() && self.view_ori != 0.0 {
            return Err(PsywinError::NotImplementedError(
                "view_ori together with view_pos".into(),
            ));
        }
        self.view_pos = pos;
        Ok(())
    }

    pub fn set_view_scale(&mut self, scale: Option<(f64, f64)>) {
        self.view_scale = scale;
    }

    pub fn set_view_ori(&mut self, ori: f64) -> Result<()> {
        self.ensure_open()?;
        if ori != 0.0 && self.view_pos.is_some() {
            return Err(PsywinError::NotImplementedError(
                "view_ori together with view_pos".into(),
            ));
        }
        self.view_ori = ori;
        Ok(())
    }

    /// The view transform: scale, position (converted from the window's units) and
    /// orientation. During a swap it also carries the backend's pre-swap offset.
    pub fn view_matrix(&self) -> Result<Matrix4<f32>> {
        self.ensure_open()?;
        let pos_norm = match self.view_pos {
            Some((x, y)) => {
                let [sx, sy] = self.units_scale()?;
                let (ax, ay) = self
                    .view_scale
                    .map_or((1.0, 1.0), |(vx, vy)| (vx.abs(), vy.abs()));
                Some((x * sx / ax, y * sy / ay))
            }
            None => None,
        };
        let ori = match self.view_scale {
            Some((vx, vy)) if vx * vy < 0.0 => -self.view_ori,
            _ => self.view_ori,
        };
        let m = units::view_matrix(self.view_scale, pos_norm, ori);
        Ok(match self.view_offset {
            Some([x, y, z]) => Matrix4::new_translation(&Vector3::new(x, y, z)) * m,
            None => m,
        })
    }

    pub fn mouse_visible(&self) -> bool {
        self.mouse_visible
    }

    pub fn set_mouse_visible(&mut self, visible: bool) -> Result<()> {
        self.backend()?.set_mouse_visibility(visible)?;
        self.mouse_visible = visible;
        Ok(())
    }

    pub fn set_mouse_cursor(&mut self, cursor: CursorKind) -> Result<()> {
        self.backend()?.set_mouse_cursor(cursor)
    }

    pub fn set_fullscr(&mut self, fullscr: bool) -> Result<()> {
        let ctx = self.ctx.clone();
        let backend = self.backend()?;
        backend.set_fullscr(&ctx, fullscr)?;
        let size = backend.frame_buffer_size();
        self.config.fullscr = fullscr;
        self.config.size = size;
        Ok(())
    }

    /// Events collected for this window since the last call. Resize events are
    /// applied before they are returned.
    pub fn dispatch_events(&mut self) -> Result<Vec<BackendEvent>> {
        let ctx = self.ctx.clone();
        let events = self.backend()?.dispatch_events(&ctx)?;
        for event in &events {
            if let BackendEvent::Resized { width, height } = *event {
                self.on_resize(width, height)?;
            }
        }
        Ok(events)
    }

    pub fn on_resize(&mut self, width: u32, height: u32) -> Result<()> {
        self.backend()?.on_resize(width, height);
        self.config.size = (width, height);
        Ok(())
    }

    /// Make this window's context current. Returns `true` if it was not already.
    pub fn set_current(&mut self) -> Result<bool> {
        let ctx = self.ctx.clone();
        self.backend()?.set_current(&ctx)
    }

    /// Store a copy of a buffer for [`save_movie_frames`](Self::save_movie_frames).
    pub fn get_movie_frame(&mut self, buffer: ReadBuffer) -> Result<()> {
        let ctx = self.ctx.clone();
        let frame = self.backend()?.read_pixels(&ctx, buffer)?;
        self.movie_frames.push(frame);
        Ok(())
    }

    /// The most recently presented frame.
    pub fn screenshot(&mut self) -> Result<RgbaImage> {
        let ctx = self.ctx.clone();
        self.backend()?.read_pixels(&ctx, ReadBuffer::Front)
    }

    pub fn movie_frames(&self) -> &[RgbaImage] {
        &self.movie_frames
    }

    /// Write the stored frames to `path`; see [`movie::write_frames`].
    pub fn save_movie_frames(&mut self, path: impl AsRef<Path>, options: MovieOptions) -> Result<()> {
        self.ensure_open()?;
        let path = path.as_ref();
        if self.movie_frames.is_empty() {
            log::error!(
                "no frames to write - did you forget to update your window or call get_movie_frame()?"
            );
            return Ok(());
        }
        log::info!("Writing {} frames to {}", self.movie_frames.len(), path.display());
        movie::write_frames(&self.movie_frames, path, &options)?;
        if options.clear_frames {
            self.movie_frames.clear();
        }
        Ok(())
    }

    /// Restore the display's gamma, release the backend and leave the context's
    /// registry. Closing twice is a no-op.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let result = match self.backend.take() {
            Some(mut backend) => {
                let closed = backend.close(&self.ctx);
                match backend.set_mouse_visibility(true) {
                    Ok(()) => self.mouse_visible = true,
                    Err(e) => log::debug!("Could not show the mouse again: {}", e),
                }
                closed
            }
            None => Ok(()),
        };
        self.ctx.unregister_window(self.id);
        if self.config.auto_log {
            log::info!("Closed {}", self.config.name);
        }
        result
    }
}

impl Drop for Window {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::error!("Failed to close {}: {}", self.config.name, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::headless::HeadlessDisplay;
    use crate::clock::ManualClock;

    fn headless_ctx() -> (Rc<ManualClock>, RenderingContext) {
        let clock = Rc::new(ManualClock::new());
        let ctx = RenderingContext::builder().clock(clock.clone()).build();
        (clock, ctx)
    }

    fn options() -> WindowOptions {
        WindowOptions::new()
            .with_win_type(WindowBackendKind::Headless)
            .with_check_timing(false)
    }

    #[test]
    fn flip_returns_the_vblank_time() {
        let (_clock, ctx) = headless_ctx();
        let mut win = Window::new(&ctx, options()).unwrap();
        let t1 = win.flip(true).unwrap().unwrap();
        let t2 = win.flip(true).unwrap().unwrap();
        assert!((t2 - t1 - 1.0 / 60.0).abs() < 1e-9);

        win.set_wait_blanking(false);
        assert_eq!(win.flip(true).unwrap(), None);
    }

    #[test]
    fn callbacks_run_once_in_order() {
        let (_clock, ctx) = headless_ctx();
        let mut win = Window::new(&ctx, options()).unwrap();
        let seen = Rc::new(std::cell::RefCell::new(Vec::new()));
        for tag in ["a", "b"] {
            let seen = seen.clone();
            win.call_on_flip(move |event| seen.borrow_mut().push((tag, event.frame)));
        }
        let flip_time = win.time_on_flip();
        assert_eq!(flip_time.get(), None);
        let t = win.flip(true).unwrap();
        win.flip(true).unwrap();
        assert_eq!(*seen.borrow(), vec![("a", 1), ("b", 1)]);
        assert_eq!(flip_time.get(), t);
    }

    #[test]
    fn check_timing_measures_the_display() {
        let clock = Rc::new(ManualClock::new());
        let ctx = RenderingContext::builder()
            .clock(clock)
            .headless_display(HeadlessDisplay::new(1280, 720, 100))
            .build();
        let win = Window::new(&ctx, options().with_check_timing(true)).unwrap();
        let rate = win.monitor_frame_rate().unwrap();
        assert!((rate - 100.0).abs() < 1e-6);
        assert!((win.refresh_threshold() - 0.012).abs() < 1e-9);
        assert!(win.frame_intervals().is_empty());
        assert!(!win.record_frame_intervals());
    }

    #[test]
    fn frame_rate_probe_rejects_bad_settings() {
        let (_clock, ctx) = headless_ctx();
        let mut win = Window::new(&ctx, options()).unwrap();
        let probe = FrameRateProbe {
            n_identical: 200,
            ..Default::default()
        };
        assert!(matches!(
            win.get_actual_frame_rate(probe),
            Err(PsywinError::InvalidOptionError(_))
        ));
    }

    #[test]
    fn view_pos_needs_units() {
        let (_clock, ctx) = headless_ctx();
        let err = Window::new(&ctx, options().with_view_pos(0.1, 0.1)).unwrap_err();
        assert!(matches!(err, PsywinError::InvalidOptionError(_)));
        let err = Window::new(
            &ctx,
            options()
                .with_units(Units::Pix)
                .with_view_pos(0.1, 0.1)
                .with_view_ori(10.0),
        )
        .unwrap_err();
        assert!(matches!(err, PsywinError::NotImplementedError(_)));
        assert_eq!(ctx.n_open_windows(), 0);
    }

    #[test]
    fn view_matrix_uses_window_units() {
        let (_clock, ctx) = headless_ctx();
        let win = Window::new(
            &ctx,
            options().with_units(Units::Pix).with_view_pos(400.0, 0.0),
        )
        .unwrap();
        let m = win.view_matrix().unwrap();
        let p = m.transform_point(&nalgebra::Point3::origin());
        assert!((p.x - 1.0).abs() < 1e-6);
    }

    #[test]
    fn add_blending_needs_fbo() {
        let (_clock, ctx) = headless_ctx();
        let mut win = Window::new(&ctx, options().with_blend_mode(BlendMode::Add)).unwrap();
        assert_eq!(win.blend_mode(), BlendMode::Avg);
        drop(win);

        win = Window::new(
            &ctx,
            options().with_use_fbo(true).with_blend_mode(BlendMode::Add),
        )
        .unwrap();
        assert_eq!(win.blend_mode(), BlendMode::Add);
        assert_eq!(win.blend_state().color.dst_factor, wgpu::BlendFactor::One);
    }

    #[test]
    fn invalid_colours_fall_back_to_grey() {
        let (_clock, ctx) = headless_ctx();
        let mut win = Window::new(&ctx, options()).unwrap();
        win.set_color("no such colour", ColorSpace::Named).unwrap();
        assert_eq!(win.color(), Color::default());
        win.set_color([1.0, -1.0, -1.0], ColorSpace::Rgb).unwrap();
        win.flip(true).unwrap();
        win.flip(true).unwrap();
        let shot = win.screenshot().unwrap();
        assert_eq!(shot.get_pixel(0, 0).0, [255, 0, 0, 255]);
    }

    #[test]
    fn closed_windows_refuse_work() {
        let (_clock, ctx) = headless_ctx();
        let mut win = Window::new(&ctx, options().with_units(Units::Pix)).unwrap();
        let color = win.color();
        win.close().unwrap();
        win.close().unwrap();
        assert!(win.is_closed());
        let closed = |r: Result<()>| matches!(r, Err(PsywinError::WindowClosedError));
        assert!(matches!(win.flip(true), Err(PsywinError::WindowClosedError)));
        assert!(matches!(win.gamma_ramp(), Err(PsywinError::WindowClosedError)));
        assert!(closed(win.set_view_pos(Some((0.1, 0.1)))));
        assert!(closed(win.set_view_ori(0.0)));
        assert!(closed(win.multi_flip(0, true)));
        assert!(closed(win.save_frame_intervals(None, true)));
        assert!(closed(win.save_movie_frames("unused.png", MovieOptions::default())));
        assert!(win.units_scale().is_err());
        assert!(win.view_matrix().is_err());
        assert!(win.get_ms_per_frame(60, 0.0).is_err());

        // a refused colour change leaves the old colour in place
        assert!(closed(win.set_color([1.0, 1.0, 1.0], ColorSpace::Rgb)));
        assert_eq!(win.color(), color);
        assert_eq!(win.view_pos(), None);
        assert_eq!(ctx.n_open_windows(), 0);
    }

    mod capture {
        use std::cell::RefCell;

        thread_local! {
            static LINES: RefCell<Vec<String>> = RefCell::new(Vec::new());
        }

        struct CaptureLogger;

        impl log::Log for CaptureLogger {
            fn enabled(&self, _metadata: &log::Metadata) -> bool {
                true
            }

            fn log(&self, record: &log::Record) {
                LINES.with(|lines| lines.borrow_mut().push(record.args().to_string()));
            }

            fn flush(&self) {}
        }

        static LOGGER: CaptureLogger = CaptureLogger;

        /// Route log records of the calling thread into a buffer.
        pub fn install() {
            let _ = log::set_logger(&LOGGER);
            log::set_max_level(log::LevelFilter::Trace);
            LINES.with(|lines| lines.borrow_mut().clear());
        }

        pub fn lines_containing(needle: &str) -> Vec<String> {
            LINES.with(|lines| {
                lines
                    .borrow()
                    .iter()
                    .filter(|line| line.contains(needle))
                    .cloned()
                    .collect()
            })
        }
    }

    #[test]
    fn flip_logs_are_stamped_with_the_flip_time() {
        capture::install();
        let (_clock, ctx) = headless_ctx();
        let mut win = Window::new(&ctx, options()).unwrap();
        win.log_on_flip("trial 1 onset", LogLevel::Exp);
        assert!(capture::lines_containing("trial 1 onset").is_empty());

        let t = win.flip(true).unwrap().unwrap();
        let lines = capture::lines_containing("trial 1 onset");
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with(&format!("{:.4}", t)));
        assert!(lines[0].contains("EXP"));

        // messages are emitted once
        win.flip(true).unwrap();
        assert_eq!(capture::lines_containing("trial 1 onset").len(), 1);
    }

    #[test]
    fn fps_counts_frames_since_the_last_call() {
        let (_clock, ctx) = headless_ctx();
        let mut win = Window::new(&ctx, options()).unwrap();
        win.set_record_frame_intervals(true);
        for _ in 0..60 {
            win.flip(true).unwrap();
        }
        // the first frame may land less than a full period after the reset
        assert!((win.fps() - 60.0).abs() < 1.1);
        // count and clock start over
        assert_eq!(win.fps(), 0.0);
        for _ in 0..30 {
            win.flip(true).unwrap();
        }
        assert!((win.fps() - 60.0).abs() < 1e-6);
    }

    #[test]
    fn ms_per_frame_times_at_least_sixty_frames() {
        let (_clock, ctx) = headless_ctx();
        let mut win = Window::new(&ctx, options()).unwrap();
        let timing = win.get_ms_per_frame(10, 5.0).unwrap();
        assert_eq!(win.frame_times().len(), 5 + 60);
        let period_ms = 1000.0 / 60.0;
        assert!((timing.mean_ms - period_ms).abs() < 1e-6);
        assert!((timing.median_ms - period_ms).abs() < 1e-6);
        assert!(timing.std_ms < 1e-6);
    }

    #[test]
    fn movie_frames_are_saved_and_cleared() {
        let (_clock, ctx) = headless_ctx();
        let mut win = Window::new(&ctx, options().with_size(32, 24)).unwrap();
        let dir = std::env::temp_dir().join(format!("psywin-movie-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("frame.png");

        // nothing captured yet: nothing written, no error
        win.save_movie_frames(&path, MovieOptions::default()).unwrap();
        assert!(!path.exists());

        for _ in 0..2 {
            win.flip(true).unwrap();
            win.get_movie_frame(ReadBuffer::Front).unwrap();
        }
        assert_eq!(win.movie_frames().len(), 2);
        let keep = MovieOptions {
            clear_frames: false,
            ..Default::default()
        };
        win.save_movie_frames(&path, keep).unwrap();
        assert_eq!(win.movie_frames().len(), 2);
        win.save_movie_frames(&path, MovieOptions::default()).unwrap();
        assert!(win.movie_frames().is_empty());

        for written in movie::sequence_paths(&path, 2) {
            let image = image::open(&written).unwrap();
            assert_eq!((image.width(), image.height()), (32, 24));
        }
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn explicit_gamma_wins_over_the_monitor_profile() {
        let (_clock, ctx) = headless_ctx();
        let monitor = Monitor::new("lab").with_gamma(1.5);
        let win = Window::new(
            &ctx,
            options().with_monitor(monitor.clone()).with_gamma(2.2),
        )
        .unwrap();
        assert_eq!(win.gamma().map(|g| g.per_channel()), Some([2.2; 3]));
        let expected = GammaRamp::from_gamma(256, RampType::Plain, [2.2; 3]).unwrap();
        assert!(ctx.headless_display(0).unwrap().gamma_ramp.approx_eq(&expected, 1e-9));
        drop(win);

        let win = Window::new(&ctx, options().with_monitor(monitor)).unwrap();
        assert_eq!(win.gamma().map(|g| g.per_channel()), Some([1.5; 3]));
        drop(win);

        let win = Window::new(&ctx, options()).unwrap();
        assert_eq!(win.gamma(), None);
    }

    #[test]
    fn simulated_windows_go_fullscreen_and_change_cursor() {
        let (_clock, ctx) = headless_ctx();
        let mut win = Window::new(&ctx, options()).unwrap();
        assert!(!win.is_fullscr());
        win.set_fullscr(true).unwrap();
        assert!(win.is_fullscr());
        assert_eq!(win.size(), (1920, 1080));
        win.flip(true).unwrap();
        assert_eq!(win.screenshot().unwrap().dimensions(), (1920, 1080));
        win.set_mouse_cursor(CursorKind::Hand).unwrap();
        win.set_mouse_cursor(CursorKind::Arrow).unwrap();
    }

    #[test]
    fn the_mouse_comes_back_on_close() {
        let (_clock, ctx) = headless_ctx();
        let mut win = Window::new(&ctx, options().with_allow_gui(false)).unwrap();
        assert!(!win.mouse_visible());
        win.close().unwrap();
        assert!(win.mouse_visible());
    }

    #[test]
    fn resizes_are_applied_at_the_next_flip() {
        let (_clock, ctx) = headless_ctx();
        let mut win = Window::new(&ctx, options()).unwrap();
        ctx.push_event(
            win.id(),
            BackendEvent::Resized {
                width: 640,
                height: 480,
            },
        );
        win.flip(true).unwrap();
        assert_eq!(win.size(), (640, 480));
        win.flip(true).unwrap();
        assert_eq!(win.screenshot().unwrap().dimensions(), (640, 480));
        // the event is still delivered
        let events = win.dispatch_events().unwrap();
        assert_eq!(
            events,
            vec![BackendEvent::Resized {
                width: 640,
                height: 480
            }]
        );
    }

    #[test]
    fn future_flip_times_snap_to_frames() {
        let (clock, ctx) = headless_ctx();
        let mut win = Window::new(&ctx, options()).unwrap();
        let last = win.flip(true).unwrap().unwrap();
        let period = win.monitor_frame_period();
        assert!((win.get_future_flip_time(0.0, FlipTimeBase::Session) - (last + period)).abs() < 1e-9);
        let t = win.get_future_flip_time(0.04, FlipTimeBase::Session);
        assert!((t - (last + 3.0 * period)).abs() < 1e-9);
        clock.advance(0.001);
        let from_now = win.get_future_flip_time(0.0, FlipTimeBase::FromNow);
        assert!((from_now - (period - 0.001)).abs() < 1e-9);
    }

    #[test]
    fn multi_flip_counts_frames() {
        let (_clock, ctx) = headless_ctx();
        let mut win = Window::new(&ctx, options()).unwrap();
        win.multi_flip(0, true).unwrap();
        assert!(win.frame_times().is_empty());
        win.multi_flip(3, true).unwrap();
        assert_eq!(win.frame_times().len(), 3);
    }
}
