// SPDX-License-Identifier: CEPL-1.0
//! A single winit window driven by pumping, so the render loop owns the
//! thread instead of the event loop.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use basalt_render::{RenderSize, Resize, WindowHost};
use raw_window_handle::{
    DisplayHandle, HandleError, HasDisplayHandle, HasWindowHandle, WindowHandle,
};
use tracing::{debug, error, info};
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, EventLoop};
use winit::platform::pump_events::{EventLoopExtPumpEvents, PumpStatus};
use winit::window::{Window, WindowAttributes, WindowId};

pub use winit;

/// Upper bound on the block in [`WindowHost::wait_events`].
const WAIT_TIMEOUT: Duration = Duration::from_millis(16);
const OPEN_ATTEMPTS: u32 = 200;

type ResizeCallback = Box<dyn FnMut(Resize)>;

fn render_size(size: PhysicalSize<u32>) -> RenderSize {
    RenderSize::new(size.width, size.height)
}

struct WindowState {
    attributes: WindowAttributes,
    window: Option<Window>,
    create_error: Option<String>,
    close_requested: bool,
    on_resize: Option<ResizeCallback>,
}

impl WindowState {
    fn notify(&mut self, resize: Resize) {
        if let Some(cb) = self.on_resize.as_mut() {
            cb(resize);
        }
    }
}

impl ApplicationHandler for WindowState {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        match event_loop.create_window(self.attributes.clone()) {
            Ok(window) => {
                info!("window opened at {}", render_size(window.inner_size()));
                self.window = Some(window);
            }
            Err(e) => {
                error!("create_window failed: {e}");
                self.create_error = Some(e.to_string());
            }
        }
    }

    fn window_event(&mut self, _event_loop: &ActiveEventLoop, window_id: WindowId, event: WindowEvent) {
        if let Some(window) = &self.window {
            if window_id != window.id() {
                return;
            }
        }

        match event {
            WindowEvent::CloseRequested | WindowEvent::Destroyed => {
                info!("close requested");
                self.close_requested = true;
            }
            WindowEvent::Resized(size) => {
                debug!("resized to {}", render_size(size));
                self.notify(Resize::To(render_size(size)));
            }
            // The matching Resized may or may not follow.
            WindowEvent::ScaleFactorChanged { scale_factor, .. } => {
                debug!(scale_factor, "scale factor changed");
                self.notify(Resize::Unknown);
            }
            _ => {}
        }
    }
}

pub struct PlatformWindow {
    event_loop: EventLoop<()>,
    state: WindowState,
}

impl PlatformWindow {
    /// Opens a window and pumps until the platform has created it.
    pub fn new(title: &str, size: RenderSize) -> Result<Self> {
        let event_loop = EventLoop::new().context("creating event loop")?;
        let attributes = Window::default_attributes()
            .with_title(title)
            .with_inner_size(PhysicalSize::new(size.width.max(1), size.height.max(1)));

        let mut this = Self {
            event_loop,
            state: WindowState {
                attributes,
                window: None,
                create_error: None,
                close_requested: false,
                on_resize: None,
            },
        };

        for _ in 0..OPEN_ATTEMPTS {
            let status = this
                .event_loop
                .pump_app_events(Some(Duration::from_millis(5)), &mut this.state);
            if let Some(e) = this.state.create_error.take() {
                bail!("create_window: {e}");
            }
            if this.state.window.is_some() {
                return Ok(this);
            }
            if let PumpStatus::Exit(code) = status {
                bail!("event loop exited with code {code} before the window opened");
            }
        }
        bail!("window was not created after {OPEN_ATTEMPTS} event pumps")
    }

    /// Called from inside [`WindowHost::poll_events`] for every resize
    /// event. Replaces any earlier callback.
    pub fn set_resize_callback(&mut self, callback: impl FnMut(Resize) + 'static) {
        self.state.on_resize = Some(Box::new(callback));
    }

    pub fn window(&self) -> Option<&Window> {
        self.state.window.as_ref()
    }

    fn pump(&mut self, timeout: Duration) {
        if let PumpStatus::Exit(code) =
            self.event_loop.pump_app_events(Some(timeout), &mut self.state)
        {
            debug!(code, "event loop exited");
            self.state.close_requested = true;
        }
    }
}

impl WindowHost for PlatformWindow {
    fn framebuffer_size(&self) -> RenderSize {
        self.state
            .window
            .as_ref()
            .map_or(RenderSize::default(), |w| render_size(w.inner_size()))
    }

    fn poll_events(&mut self) {
        self.pump(Duration::ZERO);
    }

    fn wait_events(&mut self) {
        self.pump(WAIT_TIMEOUT);
    }

    fn should_close(&self) -> bool {
        self.state.close_requested
    }
}

impl HasWindowHandle for PlatformWindow {
    fn window_handle(&self) -> Result<WindowHandle<'_>, HandleError> {
        self.state
            .window
            .as_ref()
            .ok_or(HandleError::Unavailable)?
            .window_handle()
    }
}

impl HasDisplayHandle for PlatformWindow {
    fn display_handle(&self) -> Result<DisplayHandle<'_>, HandleError> {
        self.event_loop.display_handle()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn physical_size_maps_to_render_size() {
        assert_eq!(render_size(PhysicalSize::new(800, 600)), RenderSize::new(800, 600));
        assert!(render_size(PhysicalSize::new(0, 600)).is_zero_area());
    }
}
