// Command queue
//
// One VkQueue plus the timeline semaphore its submissions signal. The
// semaphore counter is the queue's fence: submission N signals value N.

use anyhow::{Context, Result};
use ash::vk;

use crate::fence::FenceSource;

pub struct CommandQueueVk {
    device: ash::Device,
    queue: vk::Queue,
    family_index: u32,
    timeline: vk::Semaphore,
}

impl CommandQueueVk {
    pub fn new(device: &ash::Device, queue: vk::Queue, family_index: u32) -> Result<Self> {
        let mut type_info = vk::SemaphoreTypeCreateInfo::builder()
            .semaphore_type(vk::SemaphoreType::TIMELINE)
            .initial_value(0);
        let create_info = vk::SemaphoreCreateInfo::builder().push_next(&mut type_info);

        let timeline = unsafe { device.create_semaphore(&create_info, None) }
            .context("Failed to create timeline semaphore")?;

        Ok(Self {
            device: device.clone(),
            queue,
            family_index,
            timeline,
        })
    }

    pub fn vk_queue(&self) -> vk::Queue {
        self.queue
    }

    pub fn family_index(&self) -> u32 {
        self.family_index
    }

    pub fn timeline_semaphore(&self) -> vk::Semaphore {
        self.timeline
    }

    /// Submits `command_buffers` and signals `value` on the timeline when the
    /// GPU finishes them. Extra binary semaphores are waited/signaled as given.
    ///
    /// Callers must hold the queue's submission lock.
    pub fn submit(
        &self,
        value: u64,
        command_buffers: &[vk::CommandBuffer],
        waits: &[(vk::Semaphore, vk::PipelineStageFlags)],
        signals: &[vk::Semaphore],
    ) -> Result<()> {
        let wait_semaphores: Vec<vk::Semaphore> = waits.iter().map(|(s, _)| *s).collect();
        let wait_stages: Vec<vk::PipelineStageFlags> = waits.iter().map(|(_, st)| *st).collect();
        // Binary semaphores ignore their value slot
        let wait_values = vec![0u64; waits.len()];

        let mut signal_semaphores = signals.to_vec();
        signal_semaphores.push(self.timeline);
        let mut signal_values = vec![0u64; signals.len()];
        signal_values.push(value);

        let mut timeline_info = vk::TimelineSemaphoreSubmitInfo::builder()
            .wait_semaphore_values(&wait_values)
            .signal_semaphore_values(&signal_values);

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(command_buffers)
            .signal_semaphores(&signal_semaphores)
            .push_next(&mut timeline_info);

        unsafe {
            self.device
                .queue_submit(self.queue, &[submit_info.build()], vk::Fence::null())
        }
        .context("Failed to submit command buffers")?;

        Ok(())
    }

    /// Blocks until the timeline reaches `value` or `timeout_ns` elapses.
    pub fn wait(&self, value: u64, timeout_ns: u64) -> Result<()> {
        let semaphores = [self.timeline];
        let values = [value];
        let wait_info = vk::SemaphoreWaitInfo::builder()
            .semaphores(&semaphores)
            .values(&values);

        unsafe { self.device.wait_semaphores(&wait_info, timeout_ns) }
            .with_context(|| format!("Failed waiting for fence value {}", value))?;
        Ok(())
    }
}

impl FenceSource for CommandQueueVk {
    fn signaled_value(&self) -> Result<u64> {
        let value = unsafe { self.device.get_semaphore_counter_value(self.timeline) }
            .context("Failed to read timeline semaphore")?;
        Ok(value)
    }
}

impl Drop for CommandQueueVk {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_semaphore(self.timeline, None);
        }
    }
}
