//! Windows for psychophysics experiments.
//!
//! A [`Window`](visual::Window) owns one native window opened through a windowing
//! backend (winit/wgpu by default, GLFW or SDL behind features, or a simulated
//! headless display). It handles buffer flips with sub-frame timing, dropped-frame
//! detection, hardware gamma tables, colour spaces, units and frame capture.

pub mod backends;
pub mod clock;
pub mod config;
pub mod context;
pub mod errors;
pub mod gamma;
pub mod logging;
pub mod monitor;
pub mod runner;
pub mod visual;

// re-export wgpu
pub use wgpu;

// the prelude
pub mod prelude {
    pub use crate::backends::headless::HeadlessDisplay;
    pub use crate::backends::{CursorKind, ReadBuffer, WindowBackendKind};
    pub use crate::clock::{Clock, ManualClock, MonotonicClock};
    pub use crate::config::Preferences;
    pub use crate::context::{RenderingContext, WindowId};
    pub use crate::errors::{PsywinError, Result};
    pub use crate::gamma::{Gamma, GammaErrorPolicy, GammaRamp, RampType};
    pub use crate::logging::LogLevel;
    pub use crate::monitor::Monitor;
    pub use crate::runner::{CancellationToken, ExperimentProcess, ExperimentThread};
    pub use crate::visual::blend::BlendMode;
    pub use crate::visual::color::{Color, ColorSpace, ColorValue};
    pub use crate::visual::units::Units;
    pub use crate::visual::{FlipTimeBase, Window, WindowOptions};
}
