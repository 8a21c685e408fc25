pub mod blend;
pub mod color;
pub mod frame_stats;
pub mod movie;
pub mod units;
pub mod window;

pub use window::{FlipEvent, FlipTime, FlipTimeBase, Window, WindowOptions};
