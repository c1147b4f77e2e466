// Synchronization primitives
//
// Two semaphores order the acquire -> render -> present stages within a
// single frame. The queue is drained at the end of each frame, so one set
// is enough.
// TODO: frames in flight - per-frame semaphore/fence sets so the CPU can
// record frame N+1 while the GPU works on frame N.

use ash::vk;
use anyhow::Result;
use std::sync::Arc;
use super::VulkanDevice;

/// The per-frame semaphore pair
pub struct FrameSync {
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
}

impl FrameSync {
    pub fn new(device: &Arc<VulkanDevice>) -> Result<Self> {
        let semaphore_info = vk::SemaphoreCreateInfo::builder();

        unsafe {
            Ok(Self {
                image_available: device.device.create_semaphore(&semaphore_info, None)?,
                render_finished: device.device.create_semaphore(&semaphore_info, None)?,
            })
        }
    }

    pub fn destroy(&self, device: &ash::Device) {
        unsafe {
            device.destroy_semaphore(self.image_available, None);
            device.destroy_semaphore(self.render_finished, None);
        }
    }
}
