// SPDX-License-Identifier: CEPL-1.0
use std::sync::Arc;

use ash::vk;
use basalt_render::RenderSize;
use tracing::{debug, info};

use crate::device::Device;
use crate::error::{build_err, BuildError, Result};
use crate::surface::Surface;

/// Extent limits reported by the surface.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExtentBounds {
    pub min: RenderSize,
    pub max: RenderSize,
    /// Fixed by the window system; `None` when the driver reports 0xFFFFFFFF.
    pub current: Option<RenderSize>,
}

impl ExtentBounds {
    pub fn from_caps(caps: &vk::SurfaceCapabilitiesKHR) -> Self {
        let current = (caps.current_extent.width != u32::MAX).then(|| {
            RenderSize::new(caps.current_extent.width, caps.current_extent.height)
        });
        Self {
            min: RenderSize::new(caps.min_image_extent.width, caps.min_image_extent.height),
            max: RenderSize::new(caps.max_image_extent.width, caps.max_image_extent.height),
            current,
        }
    }

    pub fn clamp(&self, wanted: RenderSize) -> RenderSize {
        RenderSize::new(
            wanted.width.clamp(self.min.width, self.max.width.max(self.min.width)),
            wanted.height.clamp(self.min.height, self.max.height.max(self.min.height)),
        )
    }

    /// The extent a swapchain must use: the surface's own when it has one,
    /// otherwise `wanted` clamped into `[min, max]`.
    pub fn resolve(&self, wanted: RenderSize) -> RenderSize {
        match self.current {
            Some(current) => current,
            None => self.clamp(wanted),
        }
    }
}

/// Clamps the requested backbuffer count to what the surface allows.
/// A `max_image_count` of 0 means no upper bound.
pub fn requested_image_count(caps: &vk::SurfaceCapabilitiesKHR, wanted: u32) -> u32 {
    let count = wanted.max(caps.min_image_count);
    if caps.max_image_count == 0 {
        count
    } else {
        count.min(caps.max_image_count)
    }
}

/// Builds one `T` per granted image (or per object already built per
/// image). On failure the finished items are handed to `undo` before the
/// error is returned.
pub fn build_per_image<I: Copy, T, E>(
    granted: &[I],
    mut make: impl FnMut(usize, I) -> std::result::Result<T, E>,
    mut undo: impl FnMut(T),
) -> std::result::Result<Vec<T>, E> {
    let mut out = Vec::with_capacity(granted.len());
    for (i, &item) in granted.iter().enumerate() {
        match make(i, item) {
            Ok(item) => out.push(item),
            Err(e) => {
                out.into_iter().for_each(&mut undo);
                return Err(e);
            }
        }
    }
    Ok(out)
}

#[derive(Clone, Copy, Debug)]
pub struct SwapchainConfig {
    pub backbuffer_count: u32,
    pub surface_format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    /// Already resolved against the surface bounds.
    pub extent: RenderSize,
}

pub struct Swapchain {
    raw: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    views: Vec<vk::ImageView>,
    format: vk::SurfaceFormatKHR,
    extent: vk::Extent2D,
    present_mode: vk::PresentModeKHR,
    surface: Arc<Surface>,
    device: Arc<Device>,
}

impl Swapchain {
    pub fn new(
        device: &Arc<Device>,
        surface: &Arc<Surface>,
        config: &SwapchainConfig,
    ) -> Result<Self> {
        let caps = surface.capabilities(device.hardware().physical_device)?;
        let min_image_count = requested_image_count(&caps, config.backbuffer_count);
        let extent = vk::Extent2D {
            width: config.extent.width,
            height: config.extent.height,
        };

        let info = vk::SwapchainCreateInfoKHR {
            s_type: vk::StructureType::SWAPCHAIN_CREATE_INFO_KHR,
            surface: surface.raw(),
            min_image_count,
            image_format: config.surface_format.format,
            image_color_space: config.surface_format.color_space,
            image_extent: extent,
            image_array_layers: 1,
            image_usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
            image_sharing_mode: vk::SharingMode::EXCLUSIVE,
            pre_transform: caps.current_transform,
            composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
            present_mode: config.present_mode,
            clipped: vk::TRUE,
            ..Default::default()
        };

        let loader = device.swapchain_loader();
        let raw = unsafe { loader.create_swapchain(&info, None) }.map_err(build_err("swapchain"))?;
        let images = match unsafe { loader.get_swapchain_images(raw) } {
            Ok(images) => images,
            Err(e) => {
                unsafe { loader.destroy_swapchain(raw, None) };
                return Err(BuildError::from_vk("swapchain images", e).into());
            }
        };

        let d = device.raw();
        let views = build_per_image(
            &images,
            |_, image| {
                let view_info = vk::ImageViewCreateInfo {
                    s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
                    image,
                    view_type: vk::ImageViewType::TYPE_2D,
                    format: config.surface_format.format,
                    components: vk::ComponentMapping {
                        r: vk::ComponentSwizzle::IDENTITY,
                        g: vk::ComponentSwizzle::IDENTITY,
                        b: vk::ComponentSwizzle::IDENTITY,
                        a: vk::ComponentSwizzle::IDENTITY,
                    },
                    subresource_range: vk::ImageSubresourceRange {
                        aspect_mask: vk::ImageAspectFlags::COLOR,
                        base_mip_level: 0,
                        level_count: 1,
                        base_array_layer: 0,
                        layer_count: 1,
                    },
                    ..Default::default()
                };
                unsafe { d.create_image_view(&view_info, None) }
                    .map_err(build_err("swapchain image view"))
            },
            |view| unsafe { d.destroy_image_view(view, None) },
        );
        let views = match views {
            Ok(views) => views,
            Err(e) => {
                unsafe { loader.destroy_swapchain(raw, None) };
                return Err(e.into());
            }
        };

        info!(
            "swapchain ready ({}x{}, {:?}, {:?}, {} images for {} requested)",
            extent.width,
            extent.height,
            config.surface_format.format,
            config.present_mode,
            images.len(),
            config.backbuffer_count
        );
        Ok(Self {
            raw,
            images,
            views,
            format: config.surface_format,
            extent,
            present_mode: config.present_mode,
            surface: Arc::clone(surface),
            device: Arc::clone(device),
        })
    }

    pub fn raw(&self) -> vk::SwapchainKHR {
        self.raw
    }

    /// Granted image count. Everything per-image is sized from this.
    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn views(&self) -> &[vk::ImageView] {
        &self.views
    }

    pub fn format(&self) -> vk::Format {
        self.format.format
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }

    pub fn surface(&self) -> &Arc<Surface> {
        &self.surface
    }

    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        unsafe {
            for &view in &self.views {
                self.device.raw().destroy_image_view(view, None);
            }
            self.device
                .swapchain_loader()
                .destroy_swapchain(self.raw, None);
        }
        debug!("swapchain destroyed");
    }
}
