// Vulkan render device
//
// DeviceShared is the state every device-created object holds on to: the
// native device, its fence-tracked queues and the deferred-release list.
// RenderDeviceVkImpl is the client-visible object on top of it. Contexts keep
// it alive, so it shuts the device down only once they are all gone.

use ash::vk;
use ash::vk::Handle;
use std::sync::Arc;

use super::buffer::BufferVkImpl;
use super::device::VulkanDevice;
use super::interface::RenderDeviceVk;
use super::queue::CommandQueueVk;
use super::texture::TextureVkImpl;
use crate::fence::{DeviceQueues, FenceTracker};
use crate::interface::{Buffer, DeviceCaps, RenderDevice, Texture};
use crate::object::{Interface, InterfaceId, Object, RefPtr};
use crate::resource::{BufferDesc, ResourceState, TextureDesc};

pub(crate) struct DeviceShared {
    // Field order is drop order: queues and parked objects go before the device
    pub(crate) fences: FenceTracker<CommandQueueVk>,
    pub(crate) vk: VulkanDevice,
}

impl DeviceShared {
    pub(crate) fn new(vk: VulkanDevice, queues: Vec<CommandQueueVk>) -> Self {
        Self {
            fences: FenceTracker::new(queues),
            vk,
        }
    }

    pub(crate) fn queues(&self) -> &DeviceQueues<CommandQueueVk> {
        self.fences.queues()
    }

    pub(crate) fn safe_release<T: Send + 'static>(&self, object: T) {
        self.fences.safe_release(object);
    }

    pub(crate) fn release_stale(&self) -> usize {
        self.fences.release_stale()
    }
}

const IID_RENDER_DEVICE_VK_IMPL: InterfaceId = InterfaceId::from_u128(0x7D1B4C4E_2E83_4D8F_9C0B_6A1F2B7E9C31);

pub struct RenderDeviceVkImpl {
    shared: Arc<DeviceShared>,
    caps: DeviceCaps,
}

impl RenderDeviceVkImpl {
    pub(crate) fn create(shared: Arc<DeviceShared>) -> RefPtr<RenderDeviceVkImpl> {
        let vk = &shared.vk;
        let api = vk.properties.api_version;
        let caps = DeviceCaps {
            adapter_name: vk.adapter_name(),
            discrete: vk.properties.device_type == vk::PhysicalDeviceType::DISCRETE_GPU,
            api_version: (
                vk::api_version_major(api),
                vk::api_version_minor(api),
                vk::api_version_patch(api),
            ),
            features: vk.features,
        };

        RefPtr::with_capabilities(
            RenderDeviceVkImpl { shared, caps },
            crate::capabilities!(RenderDeviceVkImpl { dyn RenderDevice, dyn RenderDeviceVk })
                .with::<RenderDeviceVkImpl>(|p| p),
        )
    }

    pub(crate) fn shared(&self) -> &Arc<DeviceShared> {
        &self.shared
    }
}

impl Interface for RenderDeviceVkImpl {
    const IID: InterfaceId = IID_RENDER_DEVICE_VK_IMPL;
}

impl Object for RenderDeviceVkImpl {}

impl RenderDevice for RenderDeviceVkImpl {
    fn caps(&self) -> &DeviceCaps {
        &self.caps
    }

    fn queue_count(&self) -> usize {
        self.shared.queues().len()
    }

    fn create_buffer(&self, desc: &BufferDesc, initial_state: ResourceState) -> Option<RefPtr<dyn Buffer>> {
        match BufferVkImpl::create(&self.shared, desc, initial_state) {
            Ok(buffer) => Some(RefPtr::map(buffer, |b| b as &(dyn Buffer + 'static))),
            Err(e) => {
                log::error!("Failed to create buffer '{}': {:#}", desc.name, e);
                None
            }
        }
    }

    fn release_stale_resources(&self) {
        self.shared.release_stale();
    }
}

impl RenderDeviceVk for RenderDeviceVkImpl {
    fn vk_device(&self) -> vk::Device {
        self.shared.vk.device.handle()
    }

    fn vk_physical_device(&self) -> vk::PhysicalDevice {
        self.shared.vk.physical_device
    }

    fn vk_instance(&self) -> vk::Instance {
        self.shared.vk.instance.handle()
    }

    fn ash_device(&self) -> &ash::Device {
        &self.shared.vk.device
    }

    fn next_fence_value(&self, queue_index: usize) -> u64 {
        self.shared.queues().next_fence_value(queue_index)
    }

    fn completed_fence_value(&self, queue_index: usize) -> u64 {
        self.shared.queues().completed_fence_value(queue_index)
    }

    fn is_fence_signaled(&self, queue_index: usize, value: u64) -> bool {
        self.shared.queues().is_fence_signaled(queue_index, value)
    }

    fn create_texture_from_vk_image(
        &self,
        image: vk::Image,
        desc: &TextureDesc,
        initial_state: ResourceState,
    ) -> Option<RefPtr<dyn Texture>> {
        match TextureVkImpl::import(image, desc, initial_state) {
            Ok(texture) => {
                log::debug!(
                    "Imported VkImage {:#x} as texture '{}'",
                    image.as_raw(),
                    desc.name
                );
                Some(RefPtr::map(texture, |t| t as &(dyn Texture + 'static)))
            }
            Err(e) => {
                log::error!("Failed to import VkImage: {:#}", e);
                None
            }
        }
    }

    fn create_buffer_from_vk_resource(
        &self,
        buffer: vk::Buffer,
        desc: &BufferDesc,
        initial_state: ResourceState,
    ) -> Option<RefPtr<dyn Buffer>> {
        match BufferVkImpl::import(buffer, desc, initial_state) {
            Ok(imported) => {
                log::debug!(
                    "Imported VkBuffer {:#x} as buffer '{}'",
                    buffer.as_raw(),
                    desc.name
                );
                Some(RefPtr::map(imported, |b| b as &(dyn Buffer + 'static)))
            }
            Err(e) => {
                log::error!("Failed to import VkBuffer: {:#}", e);
                None
            }
        }
    }
}

impl Drop for RenderDeviceVkImpl {
    fn drop(&mut self) {
        // Contexts and swap chains hold the device, so no submission can follow
        log::info!("Releasing render device '{}'", self.caps.adapter_name);
        let shared = &self.shared;
        shared.fences.shutdown(|| shared.vk.wait_idle());
    }
}
