// SPDX-License-Identifier: CEPL-1.0
use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::buffer::VertexBuffer;
use crate::device::Device;
use crate::error::{build_err, Error, Result};
use crate::pipeline::Pipeline;

/// Command pool on the work queue family. Buffers are reset individually
/// and re-recorded every frame.
pub struct CommandPool {
    raw: vk::CommandPool,
    buffers: Vec<vk::CommandBuffer>,
    device: Arc<Device>,
}

/// What one frame draws.
#[derive(Clone, Copy)]
pub struct DrawPass<'a> {
    pub pipeline: &'a Pipeline,
    pub framebuffer: vk::Framebuffer,
    pub clear: vk::ClearValue,
    pub vertices: Option<&'a VertexBuffer>,
    pub vertex_count: u32,
}

impl CommandPool {
    pub fn new(device: &Arc<Device>) -> Result<Self> {
        let info = vk::CommandPoolCreateInfo {
            s_type: vk::StructureType::COMMAND_POOL_CREATE_INFO,
            flags: vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
            queue_family_index: device.queue_family_index(),
            ..Default::default()
        };
        let raw = unsafe { device.raw().create_command_pool(&info, None) }
            .map_err(build_err("command pool"))?;
        Ok(Self {
            raw,
            buffers: Vec::new(),
            device: Arc::clone(device),
        })
    }

    /// Frees the current buffers and allocates `count` fresh primaries.
    pub fn allocate(&mut self, count: usize) -> Result<()> {
        self.free();
        if count == 0 {
            return Ok(());
        }
        let info = vk::CommandBufferAllocateInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
            command_pool: self.raw,
            level: vk::CommandBufferLevel::PRIMARY,
            command_buffer_count: count as u32,
            ..Default::default()
        };
        self.buffers = unsafe { self.device.raw().allocate_command_buffers(&info) }
            .map_err(build_err("command buffers"))?;
        debug!(count, "command buffers allocated");
        Ok(())
    }

    fn free(&mut self) {
        if !self.buffers.is_empty() {
            unsafe {
                self.device
                    .raw()
                    .free_command_buffers(self.raw, &self.buffers)
            };
            self.buffers.clear();
        }
    }

    pub fn buffer(&self, slot: usize) -> Option<vk::CommandBuffer> {
        self.buffers.get(slot).copied()
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Resets and records the buffer for `slot`. The caller has already
    /// waited on the slot's fence.
    pub fn record_draw(&self, slot: usize, pass: &DrawPass<'_>) -> Result<vk::CommandBuffer> {
        let cmd = self.buffer(slot).ok_or(Error::Fatal {
            context: "record_draw: no command buffer for slot",
            result: vk::Result::ERROR_UNKNOWN,
        })?;
        let d = self.device.raw();
        unsafe {
            d.reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
                .map_err(Error::fatal("reset_command_buffer"))?;

            let begin = vk::CommandBufferBeginInfo {
                s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
                flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
                ..Default::default()
            };
            d.begin_command_buffer(cmd, &begin)
                .map_err(Error::fatal("begin_command_buffer"))?;

            let clears = [pass.clear];
            let rp_begin = vk::RenderPassBeginInfo {
                s_type: vk::StructureType::RENDER_PASS_BEGIN_INFO,
                render_pass: pass.pipeline.render_pass(),
                framebuffer: pass.framebuffer,
                render_area: pass.pipeline.render_area(),
                clear_value_count: clears.len() as u32,
                p_clear_values: clears.as_ptr(),
                ..Default::default()
            };
            d.cmd_begin_render_pass(cmd, &rp_begin, vk::SubpassContents::INLINE);
            d.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, pass.pipeline.raw());
            if let Some(vb) = pass.vertices {
                d.cmd_bind_vertex_buffers(cmd, 0, &[vb.raw()], &[0]);
            }
            d.cmd_draw(cmd, pass.vertex_count, 1, 0, 0);
            d.cmd_end_render_pass(cmd);

            d.end_command_buffer(cmd)
                .map_err(Error::fatal("end_command_buffer"))?;
        }
        Ok(cmd)
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        self.free();
        unsafe { self.device.raw().destroy_command_pool(self.raw, None) };
        debug!("command pool destroyed");
    }
}
