// SPDX-License-Identifier: CEPL-1.0
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

impl RenderSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn area(self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// A minimized window reports zero area on most platforms.
    pub fn is_zero_area(self) -> bool {
        self.area() == 0
    }
}

impl From<(u32, u32)> for RenderSize {
    fn from((width, height): (u32, u32)) -> Self {
        Self { width, height }
    }
}

impl std::fmt::Display for RenderSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// What a resize notification knows about the new framebuffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Resize {
    To(RenderSize),
    /// The platform changed something (scale factor, monitor) without
    /// reporting a size; the renderer asks the window instead.
    Unknown,
}

/// The window-side collaborator the renderer polls during recreation.
pub trait WindowHost {
    /// Current framebuffer size in physical pixels.
    fn framebuffer_size(&self) -> RenderSize;

    /// Drains pending platform events without blocking.
    fn poll_events(&mut self);

    /// Like [`WindowHost::poll_events`] but allowed to sleep until
    /// something happens. Used while the window is minimized.
    fn wait_events(&mut self) {
        self.poll_events();
    }

    fn should_close(&self) -> bool;
}

/// A window the Vulkan backend can create a surface for.
pub trait PresentTarget: WindowHost + HasWindowHandle + HasDisplayHandle {}

impl<T: WindowHost + HasWindowHandle + HasDisplayHandle> PresentTarget for T {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_area_when_either_side_is_zero() {
        assert!(RenderSize::new(0, 600).is_zero_area());
        assert!(RenderSize::new(800, 0).is_zero_area());
        assert!(!RenderSize::new(1, 1).is_zero_area());
    }

    #[test]
    fn area_does_not_overflow_u32() {
        let big = RenderSize::new(u32::MAX, 2);
        assert_eq!(big.area(), u32::MAX as u64 * 2);
    }

    #[test]
    fn displays_as_width_by_height() {
        assert_eq!(RenderSize::from((1280, 720)).to_string(), "1280x720");
    }
}
