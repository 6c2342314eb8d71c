// SPDX-License-Identifier: CEPL-1.0
use std::sync::Arc;

use ash::khr::surface;
use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use tracing::debug;

use crate::error::{build_err, Error, Result};
use crate::instance::Instance;
use crate::swapchain::ExtentBounds;

/// A presentable surface bound to a native window. Outlives every swapchain
/// created against it.
pub struct Surface {
    loader: surface::Instance,
    raw: vk::SurfaceKHR,
    instance: Arc<Instance>,
}

impl Surface {
    pub fn new<W>(instance: &Arc<Instance>, window: &W) -> Result<Arc<Self>>
    where
        W: HasWindowHandle + HasDisplayHandle + ?Sized,
    {
        let display_raw = window.display_handle()?.as_raw();
        let window_raw = window.window_handle()?.as_raw();

        let raw = unsafe {
            ash_window::create_surface(
                instance.entry(),
                instance.raw(),
                display_raw,
                window_raw,
                None,
            )
        }
        .map_err(build_err("surface"))?;
        let loader = surface::Instance::new(instance.entry(), instance.raw());

        debug!("surface created");
        Ok(Arc::new(Self {
            loader,
            raw,
            instance: Arc::clone(instance),
        }))
    }

    pub fn raw(&self) -> vk::SurfaceKHR {
        self.raw
    }

    pub fn loader(&self) -> &surface::Instance {
        &self.loader
    }

    pub fn instance(&self) -> &Arc<Instance> {
        &self.instance
    }

    pub fn supports_present(&self, phys: vk::PhysicalDevice, family: u32) -> Result<bool> {
        unsafe {
            self.loader
                .get_physical_device_surface_support(phys, family, self.raw)
        }
        .map_err(Error::enumeration("surface present support"))
    }

    pub fn capabilities(&self, phys: vk::PhysicalDevice) -> Result<vk::SurfaceCapabilitiesKHR> {
        unsafe {
            self.loader
                .get_physical_device_surface_capabilities(phys, self.raw)
        }
        .map_err(Error::enumeration("surface capabilities"))
    }

    pub fn formats(&self, phys: vk::PhysicalDevice) -> Result<Vec<vk::SurfaceFormatKHR>> {
        unsafe { self.loader.get_physical_device_surface_formats(phys, self.raw) }
            .map_err(Error::enumeration("surface formats"))
    }

    pub fn present_modes(&self, phys: vk::PhysicalDevice) -> Result<Vec<vk::PresentModeKHR>> {
        unsafe {
            self.loader
                .get_physical_device_surface_present_modes(phys, self.raw)
        }
        .map_err(Error::enumeration("surface present modes"))
    }

    pub fn extent_bounds(&self, phys: vk::PhysicalDevice) -> Result<ExtentBounds> {
        self.capabilities(phys).map(|caps| ExtentBounds::from_caps(&caps))
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        unsafe { self.loader.destroy_surface(self.raw, None) };
        debug!("surface destroyed");
    }
}
