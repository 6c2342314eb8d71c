// SPDX-License-Identifier: CEPL-1.0
use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::device::Device;
use crate::error::{build_err, BuildError, Result};
use crate::pipeline::Pipeline;
use crate::swapchain::{build_per_image, Swapchain};

/// The render pass attachment must use the swapchain's pixel format.
pub fn check_attachment_format(
    render_pass: vk::Format,
    swapchain: vk::Format,
) -> Result<(), BuildError> {
    if render_pass != swapchain {
        return Err(BuildError::FormatMismatch {
            render_pass,
            swapchain,
        });
    }
    Ok(())
}

/// The render area must fit inside every framebuffer.
pub fn check_render_area(area: vk::Rect2D, extent: vk::Extent2D) -> Result<(), BuildError> {
    let right = area.offset.x.max(0) as u64 + area.extent.width as u64;
    let bottom = area.offset.y.max(0) as u64 + area.extent.height as u64;
    if right > extent.width as u64 || bottom > extent.height as u64 {
        return Err(BuildError::RenderAreaTooLarge {
            area: area.extent,
            extent,
        });
    }
    Ok(())
}

/// One framebuffer per swapchain view, bound to a pipeline's render pass.
pub struct Framebuffers {
    raw: Vec<vk::Framebuffer>,
    extent: vk::Extent2D,
    device: Arc<Device>,
}

impl Framebuffers {
    pub fn new(swapchain: &Swapchain, pipeline: &Pipeline) -> Result<Self> {
        check_attachment_format(pipeline.format(), swapchain.format())?;
        check_render_area(pipeline.render_area(), swapchain.extent())?;

        let device = swapchain.device();
        let d = device.raw();
        let extent = swapchain.extent();
        let views = swapchain.views();

        let raw = build_per_image(
            views,
            |_, view| {
                let info = vk::FramebufferCreateInfo {
                    s_type: vk::StructureType::FRAMEBUFFER_CREATE_INFO,
                    render_pass: pipeline.render_pass(),
                    attachment_count: 1,
                    p_attachments: &view,
                    width: extent.width,
                    height: extent.height,
                    layers: 1,
                    ..Default::default()
                };
                unsafe { d.create_framebuffer(&info, None) }.map_err(build_err("framebuffer"))
            },
            |fb| unsafe { d.destroy_framebuffer(fb, None) },
        )?;

        debug!(count = raw.len(), "framebuffers built");
        Ok(Self {
            raw,
            extent,
            device: Arc::clone(device),
        })
    }

    pub fn get(&self, image_index: u32) -> Option<vk::Framebuffer> {
        self.raw.get(image_index as usize).copied()
    }

    pub fn len(&self) -> usize {
        self.raw.len()
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }
}

impl Drop for Framebuffers {
    fn drop(&mut self) {
        for &fb in &self.raw {
            unsafe { self.device.raw().destroy_framebuffer(fb, None) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rect(w: u32, h: u32) -> vk::Rect2D {
        vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: vk::Extent2D {
                width: w,
                height: h,
            },
        }
    }

    #[test]
    fn matching_formats_pass() {
        check_attachment_format(vk::Format::B8G8R8A8_SRGB, vk::Format::B8G8R8A8_SRGB).unwrap();
    }

    #[test]
    fn mismatched_formats_are_rejected() {
        let err = check_attachment_format(vk::Format::B8G8R8A8_SRGB, vk::Format::B8G8R8A8_UNORM)
            .unwrap_err();
        assert!(matches!(
            err,
            BuildError::FormatMismatch {
                render_pass: vk::Format::B8G8R8A8_SRGB,
                swapchain: vk::Format::B8G8R8A8_UNORM,
            }
        ));
    }

    #[test]
    fn render_area_must_fit_extent() {
        let extent = vk::Extent2D {
            width: 800,
            height: 600,
        };
        check_render_area(rect(800, 600), extent).unwrap();
        check_render_area(rect(640, 480), extent).unwrap();
        assert!(check_render_area(rect(1280, 720), extent).is_err());
    }
}
