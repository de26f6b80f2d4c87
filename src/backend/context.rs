// Immediate device context
//
// One per queue. Every submission goes through the queue's fence tracker so
// fence values and native submissions stay in the same order.

use anyhow::Result;
use ash::vk;
use std::sync::Arc;

use super::interface::DeviceContextVk;
use super::queue::CommandQueueVk;
use super::render_device::{DeviceShared, RenderDeviceVkImpl};
use crate::fence::FencedQueue;
use crate::interface::DeviceContext;
use crate::object::{Interface, InterfaceId, Object, RefPtr};

const IID_DEVICE_CONTEXT_VK_IMPL: InterfaceId = InterfaceId::from_u128(0x0C6E2A5D_8F4B_4E1A_B7C3_91D24E8F5A60);

pub struct DeviceContextVkImpl {
    // Strong reference: the device outlives every context created from it
    device: RefPtr<RenderDeviceVkImpl>,
    queue_index: usize,
}

impl DeviceContextVkImpl {
    pub(crate) fn create(device: RefPtr<RenderDeviceVkImpl>, queue_index: usize) -> RefPtr<DeviceContextVkImpl> {
        // Fails loudly on a bad index before anything holds on to it
        device.shared().queues().queue(queue_index);

        RefPtr::with_capabilities(
            DeviceContextVkImpl { device, queue_index },
            crate::capabilities!(DeviceContextVkImpl { dyn DeviceContext, dyn DeviceContextVk })
                .with::<DeviceContextVkImpl>(|p| p),
        )
    }

    pub(crate) fn device(&self) -> &RefPtr<RenderDeviceVkImpl> {
        &self.device
    }

    pub(crate) fn shared(&self) -> &Arc<DeviceShared> {
        self.device.shared()
    }

    pub(crate) fn queue(&self) -> &FencedQueue<CommandQueueVk> {
        self.shared().queues().queue(self.queue_index)
    }
}

impl Interface for DeviceContextVkImpl {
    const IID: InterfaceId = IID_DEVICE_CONTEXT_VK_IMPL;
}

impl Object for DeviceContextVkImpl {}

impl DeviceContext for DeviceContextVkImpl {
    fn queue_index(&self) -> usize {
        self.queue_index
    }

    fn flush(&self) -> Option<u64> {
        match self.submit(&[], &[], &[]) {
            Ok(value) => Some(value),
            Err(e) => {
                log::error!("Flush on queue {} failed: {:#}", self.queue_index, e);
                None
            }
        }
    }

    fn finish_frame(&self) {
        self.shared().release_stale();
    }

    fn wait_for_idle(&self) {
        // Read under the submit lock so `last` is never a value still being submitted
        let queue = self.queue();
        let last = queue.with_exclusive(|_| queue.next_fence_value() - 1);
        if let Err(e) = self.wait_for_fence(last) {
            log::error!("Waiting for queue {} to idle failed: {:#}", self.queue_index, e);
        }
    }
}

impl DeviceContextVk for DeviceContextVkImpl {
    fn vk_queue(&self) -> vk::Queue {
        self.queue().source().vk_queue()
    }

    fn queue_family_index(&self) -> u32 {
        self.queue().source().family_index()
    }

    fn submit(
        &self,
        command_buffers: &[vk::CommandBuffer],
        waits: &[(vk::Semaphore, vk::PipelineStageFlags)],
        signals: &[vk::Semaphore],
    ) -> Result<u64> {
        let (value, ()) = self.queue().submit(|queue, value| {
            queue.submit(value, command_buffers, waits, signals)
        })?;
        log::trace!("Queue {} submitted fence value {}", self.queue_index, value);
        Ok(value)
    }

    fn wait_for_fence(&self, value: u64) -> Result<()> {
        let queue = self.queue();
        if queue.is_fence_signaled(value) {
            return Ok(());
        }
        if value >= queue.next_fence_value() {
            anyhow::bail!("Fence value {} has not been submitted yet", value);
        }
        queue.source().wait(value, u64::MAX)?;
        queue.advance_completed(value);
        Ok(())
    }
}
