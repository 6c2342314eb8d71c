// SPDX-License-Identifier: CEPL-1.0
use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::device::Device;
use crate::error::{build_err, Error, Result};

/// Sync objects for one frame in flight.
#[derive(Clone, Copy, Debug)]
pub struct FrameSlot {
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    /// Created signaled so the first wait on each slot returns at once.
    pub in_flight: vk::Fence,
}

pub struct FrameSlots {
    slots: Vec<FrameSlot>,
    device: Arc<Device>,
}

fn slot_at(slots: &[FrameSlot], slot: usize) -> Result<&FrameSlot> {
    slots.get(slot).ok_or(Error::SlotOutOfRange {
        slot,
        count: slots.len(),
    })
}

impl FrameSlots {
    pub fn new(device: &Arc<Device>, count: usize) -> Result<Self> {
        let mut this = Self {
            slots: Vec::with_capacity(count),
            device: Arc::clone(device),
        };
        let d = device.raw();
        let sem_info = vk::SemaphoreCreateInfo::default();
        let fence_info = vk::FenceCreateInfo {
            s_type: vk::StructureType::FENCE_CREATE_INFO,
            flags: vk::FenceCreateFlags::SIGNALED,
            ..Default::default()
        };
        for _ in 0..count {
            // Anything created before a failure is released by `this`'s Drop.
            let image_available = unsafe { d.create_semaphore(&sem_info, None) }
                .map_err(build_err("semaphore"))?;
            let render_finished = match unsafe { d.create_semaphore(&sem_info, None) } {
                Ok(s) => s,
                Err(e) => {
                    unsafe { d.destroy_semaphore(image_available, None) };
                    return Err(build_err("semaphore")(e).into());
                }
            };
            let in_flight = match unsafe { d.create_fence(&fence_info, None) } {
                Ok(f) => f,
                Err(e) => {
                    unsafe {
                        d.destroy_semaphore(image_available, None);
                        d.destroy_semaphore(render_finished, None);
                    }
                    return Err(build_err("fence")(e).into());
                }
            };
            this.slots.push(FrameSlot {
                image_available,
                render_finished,
                in_flight,
            });
        }
        debug!(count, "frame slots created");
        Ok(this)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn get(&self, slot: usize) -> Option<&FrameSlot> {
        self.slots.get(slot)
    }

    /// Blocks until the slot's last submission has finished.
    pub fn wait(&self, slot: usize) -> Result<()> {
        let s = slot_at(&self.slots, slot)?;
        unsafe {
            self.device
                .raw()
                .wait_for_fences(&[s.in_flight], true, u64::MAX)
        }
        .map_err(Error::fatal("wait_for_fences"))
    }

    pub fn reset(&self, slot: usize) -> Result<()> {
        let s = slot_at(&self.slots, slot)?;
        unsafe { self.device.raw().reset_fences(&[s.in_flight]) }
            .map_err(Error::fatal("reset_fences"))
    }
}

impl Drop for FrameSlots {
    fn drop(&mut self) {
        // Owners idle the device first; a reset fence may never signal again.
        let d = self.device.raw();
        for s in self.slots.drain(..) {
            unsafe {
                d.destroy_semaphore(s.image_available, None);
                d.destroy_semaphore(s.render_finished, None);
                d.destroy_fence(s.in_flight, None);
            }
        }
    }
}
