// Vulkan engine factory
//
// Process-wide entry point. Loads the Vulkan library once and creates devices,
// contexts and swap chains from it.

use anyhow::{Context, Result};
use ash::Entry;
use std::sync::{Arc, OnceLock};

use super::context::DeviceContextVkImpl;
use super::device::VulkanDevice;
use super::interface::{DeviceAndContexts, EngineFactoryVk};
use super::queue::CommandQueueVk;
use super::render_device::{DeviceShared, RenderDeviceVkImpl};
use super::swapchain::SwapChainVkImpl;
use crate::blob::{DataBlobImpl, MemoryFileStream};
use crate::config::{EngineVkCreateInfo, SwapChainDesc};
use crate::interface::{
    DataBlob, DeviceContext, EngineFactory, FileStream, NativeWindow, RenderDevice, SwapChain,
};
use crate::object::{Object, RefPtr};

pub struct EngineFactoryVkImpl {
    // None when no Vulkan loader is installed
    entry: Option<Entry>,
}

impl EngineFactoryVkImpl {
    fn create() -> RefPtr<EngineFactoryVkImpl> {
        let entry = match unsafe { Entry::load() } {
            Ok(entry) => Some(entry),
            Err(e) => {
                log::error!("Failed to load the Vulkan library: {}", e);
                None
            }
        };

        RefPtr::with_capabilities(
            EngineFactoryVkImpl { entry },
            crate::capabilities!(EngineFactoryVkImpl { dyn EngineFactory, dyn EngineFactoryVk }),
        )
    }

    fn try_create_device(&self, create_info: &EngineVkCreateInfo) -> Result<DeviceAndContexts> {
        let entry = self
            .entry
            .as_ref()
            .context("Vulkan library is not available")?;

        if create_info.queues.is_empty() {
            anyhow::bail!("At least one queue must be requested");
        }

        let vk = VulkanDevice::new(entry, create_info)?;
        let queues = vk
            .queues
            .iter()
            .map(|&(queue, family)| CommandQueueVk::new(&vk.device, queue, family))
            .collect::<Result<Vec<_>>>()?;

        let shared = Arc::new(DeviceShared::new(vk, queues));
        let queue_count = shared.queues().len();
        let device = RenderDeviceVkImpl::create(shared);
        let contexts = (0..queue_count)
            .map(|index| {
                let context = DeviceContextVkImpl::create(device.clone(), index);
                RefPtr::map(context, |c| c as &(dyn DeviceContext + 'static))
            })
            .collect();

        log::info!(
            "Created Vulkan device on '{}' with {} queue(s)",
            device.shared().vk.adapter_name(),
            queue_count
        );

        Ok((
            RefPtr::map(device, |d| d as &(dyn RenderDevice + 'static)),
            contexts,
        ))
    }

    fn try_create_swap_chain(
        &self,
        device: &RefPtr<dyn RenderDevice>,
        context: &RefPtr<dyn DeviceContext>,
        desc: &SwapChainDesc,
        window: &NativeWindow,
    ) -> Result<RefPtr<dyn SwapChain>> {
        let device = device
            .query::<RenderDeviceVkImpl>()
            .context("Device was not created by the Vulkan backend")?;
        let context = context
            .query::<DeviceContextVkImpl>()
            .context("Context was not created by the Vulkan backend")?;
        if !RefPtr::ptr_eq(&device, context.device()) {
            anyhow::bail!("Context belongs to a different device");
        }

        let swap_chain = SwapChainVkImpl::create(context, desc, window)?;
        Ok(RefPtr::map(swap_chain, |s| s as &(dyn SwapChain + 'static)))
    }
}

impl Object for EngineFactoryVkImpl {}

impl EngineFactory for EngineFactoryVkImpl {
    fn create_data_blob(&self, initial_size: usize) -> RefPtr<dyn DataBlob> {
        RefPtr::map(DataBlobImpl::create(initial_size), |b| b as &(dyn DataBlob + 'static))
    }

    fn create_memory_file_stream(&self, blob: RefPtr<dyn DataBlob>) -> RefPtr<dyn FileStream> {
        RefPtr::map(MemoryFileStream::create(blob), |s| s as &(dyn FileStream + 'static))
    }
}

impl EngineFactoryVk for EngineFactoryVkImpl {
    fn create_device_and_contexts_vk(&self, create_info: &EngineVkCreateInfo) -> Option<DeviceAndContexts> {
        match self.try_create_device(create_info) {
            Ok(created) => Some(created),
            Err(e) => {
                log::error!("Failed to create Vulkan device: {:#}", e);
                None
            }
        }
    }

    fn create_swap_chain_vk(
        &self,
        device: &RefPtr<dyn RenderDevice>,
        context: &RefPtr<dyn DeviceContext>,
        desc: &SwapChainDesc,
        window: &NativeWindow,
    ) -> Option<RefPtr<dyn SwapChain>> {
        match self.try_create_swap_chain(device, context, desc, window) {
            Ok(swap_chain) => Some(swap_chain),
            Err(e) => {
                log::error!("Failed to create swap chain: {:#}", e);
                None
            }
        }
    }
}

/// The process-wide Vulkan factory. Every call returns a handle to the same
/// object, which lives until the process exits.
pub fn get_engine_factory_vk() -> RefPtr<dyn EngineFactoryVk> {
    static FACTORY: OnceLock<RefPtr<EngineFactoryVkImpl>> = OnceLock::new();
    let factory = FACTORY.get_or_init(EngineFactoryVkImpl::create);
    RefPtr::map(factory.clone(), |f| f as &(dyn EngineFactoryVk + 'static))
}
