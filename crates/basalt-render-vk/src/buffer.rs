// SPDX-License-Identifier: CEPL-1.0
use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::device::Device;
use crate::error::{build_err, BuildError, Result};

/// First memory type allowed by `type_bits` that has every `required` flag.
pub fn find_memory_type(
    props: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    required: vk::MemoryPropertyFlags,
) -> Option<u32> {
    let count = (props.memory_type_count as usize).min(props.memory_types.len());
    props.memory_types[..count]
        .iter()
        .enumerate()
        .find(|(i, ty)| type_bits & (1u32 << *i) != 0 && ty.property_flags.contains(required))
        .map(|(i, _)| i as u32)
}

/// Host-visible vertex data, written once at creation.
pub struct VertexBuffer {
    raw: vk::Buffer,
    memory: vk::DeviceMemory,
    vertex_count: u32,
    device: Arc<Device>,
}

impl VertexBuffer {
    pub fn from_vertices<T: bytemuck::Pod>(device: &Arc<Device>, vertices: &[T]) -> Result<Self> {
        Self::new(device, bytemuck::cast_slice(vertices), vertices.len() as u32)
    }

    pub fn new(device: &Arc<Device>, bytes: &[u8], vertex_count: u32) -> Result<Self> {
        if bytes.is_empty() {
            return Err(BuildError::NoSuitableResource {
                what: "vertex data (buffer would be empty)",
            }
            .into());
        }
        let d = device.raw();
        let size = bytes.len() as vk::DeviceSize;

        let info = vk::BufferCreateInfo {
            s_type: vk::StructureType::BUFFER_CREATE_INFO,
            size,
            usage: vk::BufferUsageFlags::VERTEX_BUFFER,
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            ..Default::default()
        };
        let raw = unsafe { d.create_buffer(&info, None) }.map_err(build_err("vertex buffer"))?;

        // From here the partially built buffer cleans up after itself.
        let mut this = Self {
            raw,
            memory: vk::DeviceMemory::null(),
            vertex_count,
            device: Arc::clone(device),
        };

        let req = unsafe { d.get_buffer_memory_requirements(raw) };
        let memory_type_index = find_memory_type(
            device.memory_properties(),
            req.memory_type_bits,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )
        .ok_or(BuildError::NoSuitableResource {
            what: "host-visible coherent memory type",
        })?;

        let alloc = vk::MemoryAllocateInfo {
            s_type: vk::StructureType::MEMORY_ALLOCATE_INFO,
            allocation_size: req.size,
            memory_type_index,
            ..Default::default()
        };
        this.memory = unsafe { d.allocate_memory(&alloc, None) }
            .map_err(build_err("vertex buffer memory"))?;

        unsafe {
            d.bind_buffer_memory(raw, this.memory, 0)
                .map_err(build_err("vertex buffer binding"))?;
            let ptr = d
                .map_memory(this.memory, 0, size, vk::MemoryMapFlags::empty())
                .map_err(build_err("vertex buffer mapping"))?;
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr.cast::<u8>(), bytes.len());
            d.unmap_memory(this.memory);
        }

        debug!(bytes = bytes.len(), vertex_count, memory_type_index, "vertex buffer uploaded");
        Ok(this)
    }

    pub fn raw(&self) -> vk::Buffer {
        self.raw
    }

    pub fn vertex_count(&self) -> u32 {
        self.vertex_count
    }
}

impl Drop for VertexBuffer {
    fn drop(&mut self) {
        let d = self.device.raw();
        unsafe {
            d.destroy_buffer(self.raw, None);
            if self.memory != vk::DeviceMemory::null() {
                d.free_memory(self.memory, None);
            }
        }
    }
}
