// SPDX-License-Identifier: CEPL-1.0
//! Swapchain recreation after a resize or a stale present.

use basalt_render::{RenderSize, Resize, WindowHost};
use tracing::{debug, info};

use crate::config::UserConfig;
use crate::error::Result;
use crate::swapchain::ExtentBounds;

/// Why the swapchain is being (re)built.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Trigger {
    Initial,
    Resize(Resize),
    Stale,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Recreation {
    Rebuilt {
        extent: RenderSize,
        image_count: usize,
        /// How many times the loop waited on a minimized window.
        minimized_polls: u32,
    },
    /// The window was closed while minimized; nothing was rebuilt.
    WindowClosed,
}

/// The swapchain-dependent half of the renderer.
pub trait SwapchainHost {
    fn wait_idle(&mut self) -> Result<()>;

    fn surface_bounds(&mut self) -> Result<ExtentBounds>;

    /// Drops framebuffers, pipeline and render pass, then the swapchain.
    /// Device-level objects stay.
    fn destroy_swapchain_resources(&mut self);

    fn rebuild_pipeline(&mut self, config: &UserConfig) -> Result<()>;

    /// Returns the number of images the surface granted.
    fn rebuild_swapchain(&mut self, config: &UserConfig) -> Result<usize>;
}

/// A size carried by the trigger is stale once the loop has waited out a
/// minimize, so the window is asked again.
fn wanted_size<W: WindowHost + ?Sized>(
    trigger: Trigger,
    window: &W,
    config: &UserConfig,
    waited: bool,
) -> RenderSize {
    if waited {
        return window.framebuffer_size();
    }
    match trigger {
        Trigger::Initial => config.resolution,
        Trigger::Resize(Resize::To(size)) if !size.is_zero_area() => size,
        Trigger::Resize(_) | Trigger::Stale => window.framebuffer_size(),
    }
}

pub fn recreate<H, W>(
    host: &mut H,
    window: &mut W,
    config: &mut UserConfig,
    trigger: Trigger,
) -> Result<Recreation>
where
    H: SwapchainHost + ?Sized,
    W: WindowHost + ?Sized,
{
    host.wait_idle()?;

    let mut minimized_polls = 0u32;
    while window.framebuffer_size().is_zero_area() {
        if window.should_close() {
            info!(minimized_polls, "window closed while minimized");
            return Ok(Recreation::WindowClosed);
        }
        if minimized_polls == 0 {
            debug!("framebuffer has zero area, waiting");
        }
        window.wait_events();
        minimized_polls += 1;
    }

    let bounds = host.surface_bounds()?;
    let wanted = wanted_size(trigger, window, config, minimized_polls > 0);
    let extent = bounds.resolve(wanted);
    debug!(?trigger, %wanted, %extent, ?bounds, "extent resolved");
    config.resolution = extent;

    host.destroy_swapchain_resources();
    host.rebuild_pipeline(config)?;
    let image_count = host.rebuild_swapchain(config)?;

    info!(%extent, image_count, ?trigger, "swapchain recreated");
    Ok(Recreation::Rebuilt {
        extent,
        image_count,
        minimized_polls,
    })
}
