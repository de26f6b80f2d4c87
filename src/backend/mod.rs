// Backend module - Vulkan implementation of the engine interfaces
//
// Design: thin wrappers around ash. Clients only see the generic interfaces
// and the Vk-specific ones in `interface`, reached by capability query.

mod buffer;
mod context;
mod device;
mod factory;
pub mod interface;
mod queue;
mod render_device;
mod swapchain;
mod sync;
mod texture;

pub use buffer::BufferVkImpl;
pub use context::DeviceContextVkImpl;
pub use device::VulkanDevice;
pub use factory::{get_engine_factory_vk, EngineFactoryVkImpl};
pub use interface::*;
pub use queue::CommandQueueVk;
pub use render_device::RenderDeviceVkImpl;
pub use swapchain::SwapChainVkImpl;
pub use texture::TextureVkImpl;
