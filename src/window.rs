// Window host - the windowing collaborator
//
// winit is driven in "pump" mode so the render loop owns control flow:
// `poll_events` drains pending events without blocking, `wait_events`
// blocks until at least one arrives (used while the window is minimized).
// Resize notifications only raise a `ResizeSignal`; the render loop
// decides when to act on it.

use anyhow::{anyhow, Context, Result};
use ash::vk;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use winit::{
    application::ApplicationHandler,
    dpi::PhysicalSize,
    error::OsError,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    platform::pump_events::{EventLoopExtPumpEvents, PumpStatus},
    window::{Window, WindowAttributes, WindowId},
};

use crate::config::WindowConfig;

/// Single-slot "resize pending" flag.
///
/// Raised by the window's resize callback, consumed by the render loop.
/// Consuming clears the flag before the caller acts on it, so a resize
/// that lands during recreation is seen on the next frame.
#[derive(Debug, Clone, Default)]
pub struct ResizeSignal(Arc<AtomicBool>);

impl ResizeSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Returns whether a resize was pending, clearing it.
    pub fn take(&self) -> bool {
        self.0.swap(false, Ordering::AcqRel)
    }

    #[cfg(test)]
    pub fn is_pending(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// What the render loop needs from the window system
pub trait EventSource {
    /// Current framebuffer size in pixels; 0x0 while minimized
    fn framebuffer_size(&self) -> vk::Extent2D;

    /// Process pending events without blocking
    fn poll_events(&mut self);

    /// Block until at least one event has been processed
    fn wait_events(&mut self);

    fn close_requested(&self) -> bool;
}

/// Blocks until the window reports a non-zero framebuffer size.
///
/// Returns `None` if the window was closed while waiting.
pub fn wait_for_usable_size<W: EventSource + ?Sized>(window: &mut W) -> Option<vk::Extent2D> {
    let mut size = window.framebuffer_size();
    while size.width == 0 || size.height == 0 {
        if window.close_requested() {
            return None;
        }
        log::debug!("Framebuffer is {}x{}, waiting for events", size.width, size.height);
        window.wait_events();
        size = window.framebuffer_size();
    }
    Some(size)
}

struct WindowState {
    attributes: WindowAttributes,
    window: Option<Window>,
    create_error: Option<OsError>,
    close_requested: bool,
    resize: ResizeSignal,
}

impl ApplicationHandler for WindowState {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        match event_loop.create_window(self.attributes.clone()) {
            Ok(window) => self.window = Some(window),
            Err(e) => {
                log::error!("Failed to create window: {:?}", e);
                self.create_error = Some(e);
                self.close_requested = true;
            }
        }
    }

    fn window_event(&mut self, _event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested");
                self.close_requested = true;
            }
            WindowEvent::Resized(size) => {
                log::debug!("Window resized to {}x{}", size.width, size.height);
                self.resize.raise();
            }
            _ => {}
        }
    }
}

pub struct WindowHost {
    event_loop: EventLoop<()>,
    state: WindowState,
}

impl WindowHost {
    /// Opens a resizable window and pumps the event loop until it exists.
    pub fn new(config: &WindowConfig, resize: ResizeSignal) -> Result<Self> {
        let event_loop = EventLoop::new().context("Failed to create event loop")?;

        // Vulkan draws into the window directly, so no GL context is requested.
        let attributes = Window::default_attributes()
            .with_title(config.title.clone())
            .with_inner_size(PhysicalSize::new(config.width, config.height))
            .with_resizable(true);

        let mut host = Self {
            event_loop,
            state: WindowState {
                attributes,
                window: None,
                create_error: None,
                close_requested: false,
                resize,
            },
        };

        while host.state.window.is_none() {
            if let Some(e) = host.state.create_error.take() {
                return Err(e).context("Failed to create window");
            }
            if host.state.close_requested {
                return Err(anyhow!("Event loop exited before the window was created"));
            }
            host.pump(None);
        }

        log::info!("Window: {}x{} \"{}\"", config.width, config.height, config.title);
        Ok(host)
    }

    pub fn window(&self) -> Option<&Window> {
        self.state.window.as_ref()
    }

    fn pump(&mut self, timeout: Option<Duration>) {
        if let PumpStatus::Exit(code) = self.event_loop.pump_app_events(timeout, &mut self.state) {
            log::debug!("Event loop exited with code {}", code);
            self.state.close_requested = true;
        }
    }
}

impl EventSource for WindowHost {
    fn framebuffer_size(&self) -> vk::Extent2D {
        self.state.window.as_ref().map_or(vk::Extent2D::default(), |w| {
            let size = w.inner_size();
            vk::Extent2D {
                width: size.width,
                height: size.height,
            }
        })
    }

    fn poll_events(&mut self) {
        self.pump(Some(Duration::ZERO));
    }

    fn wait_events(&mut self) {
        self.pump(None);
    }

    fn close_requested(&self) -> bool {
        self.state.close_requested
    }
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use std::collections::VecDeque;

    /// Scripted window: reports each queued size once per `wait_events`,
    /// then sticks with the last one.
    pub struct ScriptedWindow {
        pub sizes: VecDeque<vk::Extent2D>,
        pub current: vk::Extent2D,
        pub waits: usize,
        pub polls: usize,
        pub closed: bool,
    }

    impl ScriptedWindow {
        pub fn new(initial: (u32, u32)) -> Self {
            Self {
                sizes: VecDeque::new(),
                current: vk::Extent2D {
                    width: initial.0,
                    height: initial.1,
                },
                waits: 0,
                polls: 0,
                closed: false,
            }
        }

        pub fn then(mut self, size: (u32, u32)) -> Self {
            self.sizes.push_back(vk::Extent2D {
                width: size.0,
                height: size.1,
            });
            self
        }
    }

    impl EventSource for ScriptedWindow {
        fn framebuffer_size(&self) -> vk::Extent2D {
            self.current
        }

        fn poll_events(&mut self) {
            self.polls += 1;
        }

        fn wait_events(&mut self) {
            self.waits += 1;
            if let Some(next) = self.sizes.pop_front() {
                self.current = next;
            }
        }

        fn close_requested(&self) -> bool {
            self.closed
        }
    }

    #[test]
    fn resize_signal_is_consumed_once() {
        let signal = ResizeSignal::new();
        let from_callback = signal.clone();

        assert!(!signal.take());
        from_callback.raise();
        assert!(signal.is_pending());
        assert!(signal.take());
        assert!(!signal.take());
    }

    #[test]
    fn usable_size_returns_immediately_when_visible() {
        let mut window = ScriptedWindow::new((800, 600));
        let size = wait_for_usable_size(&mut window).unwrap();
        assert_eq!((size.width, size.height), (800, 600));
        assert_eq!(window.waits, 0);
    }

    #[test]
    fn minimized_window_blocks_on_events_until_restored() {
        let mut window = ScriptedWindow::new((0, 0)).then((0, 0)).then((640, 0)).then((640, 480));
        let size = wait_for_usable_size(&mut window).unwrap();
        assert_eq!((size.width, size.height), (640, 480));
        assert_eq!(window.waits, 3);
        assert_eq!(window.polls, 0);
    }

    #[test]
    fn closing_while_minimized_stops_waiting() {
        let mut window = ScriptedWindow::new((0, 0));
        window.closed = true;
        assert!(wait_for_usable_size(&mut window).is_none());
    }
}
