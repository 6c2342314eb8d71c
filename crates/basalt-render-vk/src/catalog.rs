// SPDX-License-Identifier: CEPL-1.0
//! Read-only snapshot of what the driver offers for one surface.

use std::ffi::{CStr, CString};

use ash::vk;
use bitflags::bitflags;
use tracing::debug;

use crate::error::{Error, Result};
use crate::instance::Instance;
use crate::surface::Surface;

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct QueueCaps: u8 {
        const GRAPHICS = 1 << 0;
        const COMPUTE  = 1 << 1;
        const TRANSFER = 1 << 2;
        /// Can present to the surface the catalog was taken against.
        const PRESENT  = 1 << 3;
    }
}

impl QueueCaps {
    pub fn from_vk(flags: vk::QueueFlags, present: bool) -> Self {
        let mut caps = QueueCaps::empty();
        caps.set(QueueCaps::GRAPHICS, flags.contains(vk::QueueFlags::GRAPHICS));
        caps.set(QueueCaps::COMPUTE, flags.contains(vk::QueueFlags::COMPUTE));
        caps.set(QueueCaps::TRANSFER, flags.contains(vk::QueueFlags::TRANSFER));
        caps.set(QueueCaps::PRESENT, present);
        caps
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueFamilyCandidate {
    pub index: u32,
    pub caps: QueueCaps,
    pub count: u32,
}

impl QueueFamilyCandidate {
    pub fn can_render_and_present(&self) -> bool {
        self.caps.contains(QueueCaps::GRAPHICS | QueueCaps::PRESENT)
    }
}

#[derive(Clone, Debug, Default)]
pub struct SurfaceSupport {
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
    pub capabilities: vk::SurfaceCapabilitiesKHR,
}

#[derive(Clone, Debug)]
pub struct PhysicalDeviceCandidate {
    pub handle: vk::PhysicalDevice,
    pub name: String,
    pub device_type: vk::PhysicalDeviceType,
    pub api_version: u32,
    pub features: vk::PhysicalDeviceFeatures,
    pub queue_families: Vec<QueueFamilyCandidate>,
    pub extensions: Vec<CString>,
    pub surface: SurfaceSupport,
}

impl PhysicalDeviceCandidate {
    pub fn has_extension(&self, name: &CStr) -> bool {
        self.extensions.iter().any(|e| e.as_c_str() == name)
    }

    pub fn render_present_families(&self) -> impl Iterator<Item = &QueueFamilyCandidate> {
        self.queue_families
            .iter()
            .filter(|q| q.can_render_and_present())
    }
}

/// Takes a full snapshot of every physical device against `surface`.
///
/// Safe to call repeatedly; nothing is cached between calls, so a lost and
/// re-enumerated device shows up with its new handle.
pub fn enumerate_capabilities(
    instance: &Instance,
    surface: &Surface,
) -> Result<Vec<PhysicalDeviceCandidate>> {
    let raw = instance.raw();
    let devices = unsafe { raw.enumerate_physical_devices() }
        .map_err(Error::enumeration("physical devices"))?;

    let mut out = Vec::with_capacity(devices.len());
    for phys in devices {
        let props = unsafe { raw.get_physical_device_properties(phys) };
        let features = unsafe { raw.get_physical_device_features(phys) };
        let name = props
            .device_name_as_c_str()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "<unnamed>".to_owned());

        let families = unsafe { raw.get_physical_device_queue_family_properties(phys) };
        let mut queue_families = Vec::with_capacity(families.len());
        for (i, family) in families.iter().enumerate() {
            let index = i as u32;
            let present = surface.supports_present(phys, index)?;
            queue_families.push(QueueFamilyCandidate {
                index,
                caps: QueueCaps::from_vk(family.queue_flags, present),
                count: family.queue_count,
            });
        }

        let extensions = unsafe { raw.enumerate_device_extension_properties(phys) }
            .map_err(Error::enumeration("device extensions"))?
            .iter()
            .filter_map(|e| e.extension_name_as_c_str().ok())
            .map(CStr::to_owned)
            .collect();

        let support = SurfaceSupport {
            formats: surface.formats(phys)?,
            present_modes: surface.present_modes(phys)?,
            capabilities: surface.capabilities(phys)?,
        };

        debug!(
            device = %name,
            kind = ?props.device_type,
            families = queue_families.len(),
            formats = support.formats.len(),
            "enumerated physical device"
        );
        out.push(PhysicalDeviceCandidate {
            handle: phys,
            name,
            device_type: props.device_type,
            api_version: props.api_version,
            features,
            queue_families,
            extensions,
            surface: support,
        });
    }
    Ok(out)
}
