// Synchronization primitives
//
// Per-frame semaphores for GPU-GPU sync with the presentation engine. CPU-GPU
// sync goes through the queue's fence value instead of a VkFence.

use anyhow::Result;
use ash::vk;

/// Frame synchronization - one per frame in flight
pub struct FrameSync {
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    /// Fence value of the last submission that used this frame's semaphores
    pub fence_value: u64,
}

impl FrameSync {
    pub fn new(device: &ash::Device) -> Result<Self> {
        let semaphore_info = vk::SemaphoreCreateInfo::builder();

        let image_available = unsafe { device.create_semaphore(&semaphore_info, None) }?;
        let render_finished = match unsafe { device.create_semaphore(&semaphore_info, None) } {
            Ok(semaphore) => semaphore,
            Err(e) => {
                unsafe { device.destroy_semaphore(image_available, None) };
                return Err(e.into());
            }
        };

        Ok(Self {
            image_available,
            render_finished,
            // Nothing submitted yet: value 0 is always complete
            fence_value: 0,
        })
    }

    pub fn destroy(&self, device: &ash::Device) {
        unsafe {
            device.destroy_semaphore(self.image_available, None);
            device.destroy_semaphore(self.render_finished, None);
        }
    }
}
