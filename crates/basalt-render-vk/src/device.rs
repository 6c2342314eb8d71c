// SPDX-License-Identifier: CEPL-1.0
use std::ffi::{c_char, CStr};
use std::sync::Arc;

use ash::khr::swapchain;
use ash::vk;
use tracing::{debug, info};

use crate::error::{build_err, Error, Result};
use crate::instance::Instance;
use crate::negotiate::SelectedHardware;

#[derive(Clone, Debug)]
pub struct DeviceConfig {
    pub hardware: SelectedHardware,
    /// `VK_KHR_swapchain` is added when absent.
    pub extensions: Vec<&'static CStr>,
}

impl DeviceConfig {
    pub fn new(hardware: SelectedHardware) -> Self {
        Self {
            hardware,
            extensions: vec![swapchain::NAME],
        }
    }

    pub fn enabled_extensions(&self) -> Vec<&'static CStr> {
        let mut exts = self.extensions.clone();
        if !exts.contains(&swapchain::NAME) {
            exts.insert(0, swapchain::NAME);
        }
        exts
    }
}

/// Logical device plus its single work queue, used for both graphics and
/// presentation.
pub struct Device {
    raw: ash::Device,
    queue: vk::Queue,
    swapchain_loader: swapchain::Device,
    hardware: SelectedHardware,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    instance: Arc<Instance>,
}

impl Device {
    pub fn new(instance: &Arc<Instance>, config: &DeviceConfig) -> Result<Arc<Self>> {
        let hw = &config.hardware;
        let extensions = config.enabled_extensions();
        let ext_ptrs: Vec<*const c_char> = extensions.iter().map(|e| e.as_ptr()).collect();

        let priorities = [1.0_f32];
        let queue_info = vk::DeviceQueueCreateInfo {
            s_type: vk::StructureType::DEVICE_QUEUE_CREATE_INFO,
            queue_family_index: hw.queue_family_index,
            queue_count: 1,
            p_queue_priorities: priorities.as_ptr(),
            ..Default::default()
        };
        let create_info = vk::DeviceCreateInfo {
            s_type: vk::StructureType::DEVICE_CREATE_INFO,
            queue_create_info_count: 1,
            p_queue_create_infos: &queue_info,
            enabled_extension_count: ext_ptrs.len() as u32,
            pp_enabled_extension_names: ext_ptrs.as_ptr(),
            ..Default::default()
        };

        let raw = unsafe {
            instance
                .raw()
                .create_device(hw.physical_device, &create_info, None)
        }
        .map_err(build_err("logical device"))?;
        let queue = unsafe { raw.get_device_queue(hw.queue_family_index, 0) };
        let swapchain_loader = swapchain::Device::new(instance.raw(), &raw);
        let memory_properties = unsafe {
            instance
                .raw()
                .get_physical_device_memory_properties(hw.physical_device)
        };

        info!(
            device = %hw.device_name,
            queue_family = hw.queue_family_index,
            extensions = ?extensions,
            "logical device created"
        );
        Ok(Arc::new(Self {
            raw,
            queue,
            swapchain_loader,
            hardware: hw.clone(),
            memory_properties,
            instance: Arc::clone(instance),
        }))
    }

    pub fn raw(&self) -> &ash::Device {
        &self.raw
    }

    pub fn queue(&self) -> vk::Queue {
        self.queue
    }

    pub fn queue_family_index(&self) -> u32 {
        self.hardware.queue_family_index
    }

    pub fn hardware(&self) -> &SelectedHardware {
        &self.hardware
    }

    pub fn swapchain_loader(&self) -> &swapchain::Device {
        &self.swapchain_loader
    }

    pub fn memory_properties(&self) -> &vk::PhysicalDeviceMemoryProperties {
        &self.memory_properties
    }

    pub fn instance(&self) -> &Arc<Instance> {
        &self.instance
    }

    /// Blocks until every queue on the device is idle.
    pub fn wait_idle(&self) -> Result<()> {
        unsafe { self.raw.device_wait_idle() }.map_err(Error::fatal("device_wait_idle"))
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        unsafe {
            self.raw.device_wait_idle().ok();
            self.raw.destroy_device(None);
        }
        debug!("logical device destroyed");
    }
}
