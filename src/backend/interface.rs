// Vulkan-specific interfaces
//
// Reached from the generic handles through a capability query. They expose
// native handles and the per-queue fence counters.

use ash::vk;

use crate::config::{EngineVkCreateInfo, SwapChainDesc};
use crate::interface::{
    Buffer, DeviceContext, EngineFactory, NativeWindow, RenderDevice, SwapChain, Texture,
};
use crate::object::{Interface, InterfaceId, RefPtr};
use crate::resource::{BufferDesc, ResourceState, TextureDesc};

pub const IID_RENDER_DEVICE_VK: InterfaceId = InterfaceId::from_u128(0xAB8CF3A6_D959_41C1_AE00_A58AE9820E6A);
pub const IID_DEVICE_CONTEXT_VK: InterfaceId = InterfaceId::from_u128(0x72AEB1BA_C6AD_42EC_8811_7ED9C72176BB);
pub const IID_SWAP_CHAIN_VK: InterfaceId = InterfaceId::from_u128(0x22A39881_5EC5_4A9C_8395_90215F04A5CC);
pub const IID_TEXTURE_VK: InterfaceId = InterfaceId::from_u128(0x3BBE7F23_9BA2_4B3C_9A77_2F0E6F1E3D22);
pub const IID_BUFFER_VK: InterfaceId = InterfaceId::from_u128(0x12D8EC02_96F4_4EBE_A4F0_29E41BF2A9E7);
pub const IID_ENGINE_FACTORY_VK: InterfaceId = InterfaceId::from_u128(0xF554EEE4_57C2_4637_A508_85BE80DC657C);

/// Native side of a Vulkan render device.
pub trait RenderDeviceVk: RenderDevice {
    fn vk_device(&self) -> vk::Device;
    fn vk_physical_device(&self) -> vk::PhysicalDevice;
    fn vk_instance(&self) -> vk::Instance;

    /// Function table for recording work against [`RenderDeviceVk::vk_device`].
    fn ash_device(&self) -> &ash::Device;

    /// Value the next submission to queue `queue_index` will signal.
    ///
    /// Observational only. Panics if `queue_index` is out of range.
    fn next_fence_value(&self, queue_index: usize) -> u64;

    /// Highest value the GPU has completed on queue `queue_index`.
    /// Panics if `queue_index` is out of range.
    fn completed_fence_value(&self, queue_index: usize) -> u64;

    /// Non-blocking. Panics if `queue_index` is out of range.
    fn is_fence_signaled(&self, queue_index: usize, value: u64) -> bool;

    /// Wraps an externally created image. The engine never destroys `image`;
    /// the caller keeps it alive for as long as the returned texture is used.
    fn create_texture_from_vk_image(
        &self,
        image: vk::Image,
        desc: &TextureDesc,
        initial_state: ResourceState,
    ) -> Option<RefPtr<dyn Texture>>;

    /// Wraps an externally created buffer. The engine never destroys `buffer`.
    fn create_buffer_from_vk_resource(
        &self,
        buffer: vk::Buffer,
        desc: &BufferDesc,
        initial_state: ResourceState,
    ) -> Option<RefPtr<dyn Buffer>>;
}

pub trait DeviceContextVk: DeviceContext {
    fn vk_queue(&self) -> vk::Queue;
    fn queue_family_index(&self) -> u32;

    /// Submits recorded command buffers; returns the fence value they signal.
    fn submit(
        &self,
        command_buffers: &[vk::CommandBuffer],
        waits: &[(vk::Semaphore, vk::PipelineStageFlags)],
        signals: &[vk::Semaphore],
    ) -> anyhow::Result<u64>;

    /// Blocks until this context's queue has completed `value`.
    fn wait_for_fence(&self, value: u64) -> anyhow::Result<()>;
}

pub trait TextureVk: Texture {
    fn vk_image(&self) -> vk::Image;
    fn layout(&self) -> vk::ImageLayout;
}

pub trait BufferVk: Buffer {
    fn vk_buffer(&self) -> vk::Buffer;
}

pub trait SwapChainVk: SwapChain {
    fn vk_swapchain(&self) -> vk::SwapchainKHR;
    fn vk_surface(&self) -> vk::SurfaceKHR;
    fn images(&self) -> Vec<vk::Image>;
    fn format(&self) -> vk::Format;
    fn extent(&self) -> vk::Extent2D;
}

pub type DeviceAndContexts = (RefPtr<dyn RenderDevice>, Vec<RefPtr<dyn DeviceContext>>);

/// Entry point of the Vulkan backend. Obtain it with
/// [`get_engine_factory_vk`](super::get_engine_factory_vk).
pub trait EngineFactoryVk: EngineFactory {
    /// Creates a device and one immediate context per requested queue, in
    /// request order. `None` (with the reason logged) if no adapter fits.
    fn create_device_and_contexts_vk(&self, create_info: &EngineVkCreateInfo) -> Option<DeviceAndContexts>;

    /// Creates a swap chain presenting through `context`'s queue.
    /// `None` if the device or context is not Vulkan, or the window cannot be
    /// presented to.
    fn create_swap_chain_vk(
        &self,
        device: &RefPtr<dyn RenderDevice>,
        context: &RefPtr<dyn DeviceContext>,
        desc: &SwapChainDesc,
        window: &NativeWindow,
    ) -> Option<RefPtr<dyn SwapChain>>;
}

impl Interface for dyn RenderDeviceVk {
    const IID: InterfaceId = IID_RENDER_DEVICE_VK;
}

impl Interface for dyn DeviceContextVk {
    const IID: InterfaceId = IID_DEVICE_CONTEXT_VK;
}

impl Interface for dyn TextureVk {
    const IID: InterfaceId = IID_TEXTURE_VK;
}

impl Interface for dyn BufferVk {
    const IID: InterfaceId = IID_BUFFER_VK;
}

impl Interface for dyn SwapChainVk {
    const IID: InterfaceId = IID_SWAP_CHAIN_VK;
}

impl Interface for dyn EngineFactoryVk {
    const IID: InterfaceId = IID_ENGINE_FACTORY_VK;
}
