//! The rendering context: which window is current, which windows are open, and the
//! native library handles they share.
//!
//! A context is cheap to clone (it is a reference-counted handle) and is not `Send`;
//! everything that touches a window lives on the thread that created the context.

use std::cell::{Cell, RefCell, RefMut};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::rc::Rc;

use crate::backends::headless::HeadlessDisplay;
use crate::backends::{self, BackendEvent, WindowBackendKind};
use crate::clock::{Clock, MonotonicClock};
use crate::config::Preferences;
use crate::errors::{PsywinError, Result};
use crate::runner::CancellationToken;

/// Non-owning handle to a window registered with a [`RenderingContext`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WindowId(pub(crate) usize);

impl fmt::Display for WindowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Registry entry for an open window.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowRecord {
    pub id: WindowId,
    pub name: String,
    pub kind: WindowBackendKind,
}

#[derive(Debug, Default)]
struct WindowRegistry {
    next_id: usize,
    windows: Vec<WindowRecord>,
}

/// Events kept per window between two `dispatch_events` calls. When an experiment never
/// dispatches, the oldest events are dropped.
pub const MAX_PENDING_EVENTS: usize = 256;

/// Events routed to one window, plus the latest size it was resized to.
#[derive(Debug, Default)]
pub(crate) struct EventQueue {
    events: VecDeque<BackendEvent>,
    resize: Option<(u32, u32)>,
    overflowed: bool,
}

impl EventQueue {
    fn push(&mut self, event: BackendEvent) {
        if let BackendEvent::Resized { width, height } = event {
            self.resize = Some((width, height));
        }
        // only the latest pointer position is worth keeping
        if matches!(event, BackendEvent::MouseMoved { .. })
            && matches!(self.events.back(), Some(BackendEvent::MouseMoved { .. }))
        {
            self.events.pop_back();
        }
        if self.events.len() == MAX_PENDING_EVENTS {
            self.events.pop_front();
            if !self.overflowed {
                log::warn!("Window events are piling up; call `dispatch_events` to receive them. Dropping the oldest.");
                self.overflowed = true;
            }
        }
        self.events.push_back(event);
    }
}

/// Native library state shared by all windows of a context.
#[derive(Default)]
pub(crate) struct Platform {
    pub(crate) headless: Vec<HeadlessDisplay>,
    pub(crate) winit: Option<backends::winit_backend::WinitPlatform>,
    #[cfg(feature = "glfw")]
    pub(crate) glfw: Option<backends::glfw_backend::GlfwPlatform>,
    #[cfg(feature = "sdl")]
    pub(crate) sdl: Option<backends::sdl_backend::SdlPlatform>,
    /// Events routed to each window by the last pump of the native queue.
    pub(crate) pending_events: HashMap<WindowId, EventQueue>,
}

struct ContextInner {
    clock: Rc<dyn Clock>,
    preferences: Preferences,
    cancellation: Option<CancellationToken>,
    current: Cell<Option<WindowId>>,
    registry: RefCell<WindowRegistry>,
    platform: RefCell<Platform>,
}

/// Session state shared by all windows: the current context, the registry of open
/// windows, the clock and the native library handles.
#[derive(Clone)]
pub struct RenderingContext {
    inner: Rc<ContextInner>,
}

impl fmt::Debug for RenderingContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderingContext")
            .field("current", &self.inner.current.get())
            .field("windows", &self.inner.registry.borrow().windows)
            .field("preferences", &self.inner.preferences)
            .finish()
    }
}

impl Default for RenderingContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for [`RenderingContext`].
pub struct RenderingContextBuilder {
    clock: Rc<dyn Clock>,
    preferences: Preferences,
    cancellation: Option<CancellationToken>,
    headless: Vec<HeadlessDisplay>,
}

impl RenderingContextBuilder {
    pub fn clock<C: Clock + 'static>(mut self, clock: Rc<C>) -> Self {
        self.clock = clock;
        self
    }

    pub fn preferences(mut self, preferences: Preferences) -> Self {
        self.preferences = preferences;
        self
    }

    /// Every `flip()` in this context fails with `CancelledError` once `token` fires.
    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Add a simulated display for the headless backend. Without any, one 1920x1080
    /// display at 60 Hz is provided.
    pub fn headless_display(mut self, display: HeadlessDisplay) -> Self {
        self.headless.push(display);
        self
    }

    pub fn build(self) -> RenderingContext {
        let headless = if self.headless.is_empty() {
            vec![HeadlessDisplay::default()]
        } else {
            self.headless
        };
        RenderingContext {
            inner: Rc::new(ContextInner {
                clock: self.clock,
                preferences: self.preferences,
                cancellation: self.cancellation,
                current: Cell::new(None),
                registry: RefCell::new(WindowRegistry::default()),
                platform: RefCell::new(Platform {
                    headless,
                    ..Default::default()
                }),
            }),
        }
    }
}

impl RenderingContext {
    /// A context with a monotonic clock and preferences from `PSYWIN_PREFS`, if set.
    pub fn new() -> Self {
        let preferences = Preferences::from_env().unwrap_or_else(|e| {
            log::warn!("Could not load preferences, using defaults: {}", e);
            Preferences::default()
        });
        Self::builder().preferences(preferences).build()
    }

    pub fn builder() -> RenderingContextBuilder {
        RenderingContextBuilder {
            clock: Rc::new(MonotonicClock::new()),
            preferences: Preferences::default(),
            cancellation: None,
            headless: Vec::new(),
        }
    }

    pub fn clock(&self) -> Rc<dyn Clock> {
        self.inner.clock.clone()
    }

    /// Session time in seconds.
    pub fn now(&self) -> f64 {
        self.inner.clock.now()
    }

    pub fn preferences(&self) -> &Preferences {
        &self.inner.preferences
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner
            .cancellation
            .as_ref()
            .map_or(false, |token| token.is_cancelled())
    }

    /// The window whose native context is current.
    pub fn current(&self) -> Option<WindowId> {
        self.inner.current.get()
    }

    pub(crate) fn set_current(&self, id: WindowId) {
        self.inner.current.set(Some(id));
    }

    pub(crate) fn clear_current_if(&self, id: WindowId) {
        if self.inner.current.get() == Some(id) {
            self.inner.current.set(None);
        }
    }

    /// The backend kind shared by all open windows, if any are open.
    pub fn session_kind(&self) -> Option<WindowBackendKind> {
        self.inner.registry.borrow().windows.first().map(|w| w.kind)
    }

    /// Add a window to the registry. All open windows must use the same backend kind.
    pub fn register_window(&self, name: &str, kind: WindowBackendKind) -> Result<WindowId> {
        let mut registry = self.inner.registry.borrow_mut();
        if let Some(existing) = registry.windows.first() {
            if existing.kind != kind {
                return Err(PsywinError::InvalidOptionError(
                    "Only one kind of `winType` can be used per session.".into(),
                ));
            }
        }
        let id = WindowId(registry.next_id);
        registry.next_id += 1;
        registry.windows.push(WindowRecord {
            id,
            name: name.to_string(),
            kind,
        });
        Ok(id)
    }

    pub(crate) fn unregister_window(&self, id: WindowId) {
        self.inner.registry.borrow_mut().windows.retain(|w| w.id != id);
        self.clear_current_if(id);
        self.platform_mut().pending_events.remove(&id);
    }

    pub fn open_windows(&self) -> Vec<WindowRecord> {
        self.inner.registry.borrow().windows.clone()
    }

    pub fn n_open_windows(&self) -> usize {
        self.inner.registry.borrow().windows.len()
    }

    pub fn window_name(&self, id: WindowId) -> Option<String> {
        self.inner
            .registry
            .borrow()
            .windows
            .iter()
            .find(|w| w.id == id)
            .map(|w| w.name.clone())
    }

    pub(crate) fn platform_mut(&self) -> RefMut<'_, Platform> {
        self.inner.platform.borrow_mut()
    }

    /// Snapshot of simulated display `index`.
    pub fn headless_display(&self, index: usize) -> Option<HeadlessDisplay> {
        self.inner.platform.borrow().headless.get(index).cloned()
    }

    /// Pump the native event queue once for every open window. Events are queued per
    /// window and handed out by `Window::dispatch_events`.
    pub fn dispatch_all_window_events(&self) -> Result<()> {
        match self.session_kind() {
            Some(kind) => backends::pump_events(kind, self),
            None => Ok(()),
        }
    }

    pub(crate) fn push_event(&self, id: WindowId, event: BackendEvent) {
        self.platform_mut()
            .pending_events
            .entry(id)
            .or_default()
            .push(event);
    }

    pub(crate) fn take_events(&self, id: WindowId) -> Vec<BackendEvent> {
        self.platform_mut()
            .pending_events
            .remove(&id)
            .map(|queue| queue.events.into())
            .unwrap_or_default()
    }

    /// The size from the most recent resize event not yet applied. The event itself
    /// stays queued for `dispatch_events`.
    pub(crate) fn take_resize(&self, id: WindowId) -> Option<(u32, u32)> {
        self.platform_mut()
            .pending_events
            .get_mut(&id)
            .and_then(|queue| queue.resize.take())
    }
}
