// Buffers: imported VkBuffers and engine-owned ones
//
// Engine-owned buffers get their memory from gpu-allocator. When the last
// reference goes away the native buffer is parked on the device until every
// queue has moved past the work that might still read it.

use anyhow::{anyhow, Context, Result};
use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use std::sync::Arc;

use super::interface::BufferVk;
use super::render_device::DeviceShared;
use crate::interface::{next_unique_id, Buffer, DeviceObject};
use crate::object::{Object, RefPtr};
use crate::resource::{check_contract, BufferDesc, ResourceState, StateTracker};

/// Native buffer plus its memory, destroyed on drop.
pub(crate) struct OwnedBuffer {
    shared: Arc<DeviceShared>,
    buffer: vk::Buffer,
    allocation: Option<Allocation>,
}

impl OwnedBuffer {
    fn new(shared: &Arc<DeviceShared>, desc: &BufferDesc) -> Result<Self> {
        let device = &shared.vk.device;

        // Create buffer
        let buffer_info = vk::BufferCreateInfo::builder()
            .size(desc.size)
            .usage(desc.bind_flags.buffer_usage())
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { device.create_buffer(&buffer_info, None) }
            .context("Failed to create buffer")?;

        // From here on the handle is cleaned up by Drop
        let mut owned = Self {
            shared: shared.clone(),
            buffer,
            allocation: None,
        };

        // Get memory requirements
        let requirements = unsafe { device.get_buffer_memory_requirements(buffer) };

        let allocation = shared
            .vk
            .allocator
            .lock()
            .allocate(&AllocationCreateDesc {
                name: &desc.name,
                requirements,
                location: desc.usage.memory_location(),
                linear: true,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .context("Failed to allocate buffer memory")?;

        // Bind memory to buffer
        let bound = unsafe {
            device.bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
        };
        owned.allocation = Some(allocation);
        bound.context("Failed to bind buffer memory")?;

        Ok(owned)
    }
}

impl Drop for OwnedBuffer {
    fn drop(&mut self) {
        unsafe {
            self.shared.vk.device.destroy_buffer(self.buffer, None);
        }
        if let Some(allocation) = self.allocation.take() {
            if let Err(e) = self.shared.vk.allocator.lock().free(allocation) {
                log::error!("Failed to free buffer memory: {}", e);
            }
        }
    }
}

pub struct BufferVkImpl {
    id: u64,
    desc: BufferDesc,
    buffer: vk::Buffer,
    state: StateTracker,
    // None for imported buffers
    owned: Option<OwnedBuffer>,
}

impl BufferVkImpl {
    /// Wraps `buffer` without taking ownership of it.
    pub fn import(
        buffer: vk::Buffer,
        desc: &BufferDesc,
        initial_state: ResourceState,
    ) -> Result<RefPtr<BufferVkImpl>> {
        check_contract(if buffer == vk::Buffer::null() {
            Err(anyhow!("Cannot import a null VkBuffer as buffer '{}'", desc.name))
        } else {
            Ok(())
        })?;
        check_contract(desc.validate())?;

        Ok(Self::wrap(buffer, desc, initial_state, None))
    }

    pub(crate) fn create(
        shared: &Arc<DeviceShared>,
        desc: &BufferDesc,
        initial_state: ResourceState,
    ) -> Result<RefPtr<BufferVkImpl>> {
        desc.validate()?;
        let owned = OwnedBuffer::new(shared, desc)?;
        log::debug!("Created buffer '{}' ({} bytes)", desc.name, desc.size);
        Ok(Self::wrap(owned.buffer, desc, initial_state, Some(owned)))
    }

    fn wrap(
        buffer: vk::Buffer,
        desc: &BufferDesc,
        initial_state: ResourceState,
        owned: Option<OwnedBuffer>,
    ) -> RefPtr<BufferVkImpl> {
        RefPtr::with_capabilities(
            BufferVkImpl {
                id: next_unique_id(),
                desc: desc.clone(),
                buffer,
                state: StateTracker::new(initial_state),
                owned,
            },
            crate::capabilities!(BufferVkImpl { dyn DeviceObject, dyn Buffer, dyn BufferVk }),
        )
    }
}

impl Object for BufferVkImpl {}

impl DeviceObject for BufferVkImpl {
    fn name(&self) -> &str {
        &self.desc.name
    }

    fn unique_id(&self) -> u64 {
        self.id
    }
}

impl Buffer for BufferVkImpl {
    fn desc(&self) -> &BufferDesc {
        &self.desc
    }

    fn state(&self) -> ResourceState {
        self.state.get()
    }

    fn set_state(&self, state: ResourceState) -> ResourceState {
        self.state.set(state)
    }
}

impl BufferVk for BufferVkImpl {
    fn vk_buffer(&self) -> vk::Buffer {
        self.buffer
    }
}

impl Drop for BufferVkImpl {
    fn drop(&mut self) {
        if let Some(owned) = self.owned.take() {
            let shared = owned.shared.clone();
            shared.safe_release(owned);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::BindFlags;
    use ash::vk::Handle;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn desc() -> BufferDesc {
        BufferDesc {
            name: "vertices".into(),
            size: 1024,
            bind_flags: BindFlags::VERTEX_BUFFER,
            ..Default::default()
        }
    }

    #[test]
    fn test_imported_buffer_is_not_destroyed() {
        let alive = Box::new(AtomicBool::new(true));
        let handle = vk::Buffer::from_raw(&*alive as *const AtomicBool as u64);

        let buffer = BufferVkImpl::import(handle, &desc(), ResourceState::VertexBuffer).unwrap();
        let native = buffer.query::<dyn BufferVk>().unwrap();
        assert_eq!(native.vk_buffer(), handle);
        assert_eq!(native.state(), ResourceState::VertexBuffer);
        assert_eq!(native.name(), "vertices");
        drop(buffer);
        drop(native);

        let flag = unsafe { &*(handle.as_raw() as *const AtomicBool) };
        assert!(flag.load(Ordering::SeqCst));
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "null VkBuffer")]
    fn test_null_buffer_is_a_contract_violation() {
        let _ = BufferVkImpl::import(vk::Buffer::null(), &desc(), ResourceState::Undefined);
    }
}
