#![allow(dead_code)]

use std::rc::Rc;

use psywin::backends::headless::{HeadlessBackend, HeadlessDisplay};
use psywin::backends::{Backend, WindowBackendKind};
use psywin::clock::ManualClock;
use psywin::context::RenderingContext;
use psywin::errors::Result;
use psywin::visual::{Window, WindowOptions};

/// A context with a manual clock and the given simulated displays.
pub fn headless_context(displays: Vec<HeadlessDisplay>) -> (Rc<ManualClock>, RenderingContext) {
    let clock = Rc::new(ManualClock::new());
    let mut builder = RenderingContext::builder().clock(clock.clone());
    for display in displays {
        builder = builder.headless_display(display);
    }
    (clock, builder.build())
}

pub fn headless_options() -> WindowOptions {
    WindowOptions::new()
        .with_win_type(WindowBackendKind::Headless)
        .with_check_timing(false)
        .with_auto_log(false)
}

/// Open a window of any kind, backed by a simulated display.
pub fn open_simulated(ctx: &RenderingContext, options: WindowOptions) -> Result<Window> {
    Window::with_backend(ctx, options, |ctx, id, request| {
        Ok(Box::new(HeadlessBackend::new(ctx, id, request)?) as Box<dyn Backend>)
    })
}
