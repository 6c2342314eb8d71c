// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use basalt_render::RenderSize;

use crate::error::{Error, Result};

/// Startup configuration of the presentation surface.
///
/// The resolution is rewritten by swapchain recreation when the surface
/// forces a different extent; nothing else changes after startup.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UserConfig {
    pub resolution: RenderSize,
    pub backbuffer_format: vk::Format,
    pub sample_count: vk::SampleCountFlags,
    pub backbuffer_count: u32,
}

impl Default for UserConfig {
    fn default() -> Self {
        Self {
            resolution: RenderSize::new(1280, 720),
            backbuffer_format: vk::Format::B8G8R8A8_SRGB,
            sample_count: vk::SampleCountFlags::TYPE_1,
            backbuffer_count: 3,
        }
    }
}

impl UserConfig {
    pub fn validate(&self) -> Result<()> {
        if self.backbuffer_count == 0 {
            return Err(Error::InvalidConfig("backbuffer count must be at least 1".into()));
        }
        if self.resolution.is_zero_area() {
            return Err(Error::InvalidConfig(format!(
                "resolution {} has zero area",
                self.resolution
            )));
        }
        // Swapchain images are single-sampled and there is no resolve target.
        if self.sample_count != vk::SampleCountFlags::TYPE_1 {
            return Err(Error::InvalidConfig(format!(
                "sample count {:?} unsupported, only 1 sample is rendered",
                self.sample_count
            )));
        }
        if self.backbuffer_format == vk::Format::UNDEFINED {
            return Err(Error::InvalidConfig("backbuffer format is UNDEFINED".into()));
        }
        Ok(())
    }

    pub fn extent(&self) -> vk::Extent2D {
        vk::Extent2D {
            width: self.resolution.width,
            height: self.resolution.height,
        }
    }
}
