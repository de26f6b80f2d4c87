// Textures wrapping native VkImages
//
// Imported images stay owned by whoever created them. The texture object only
// carries the description and the tracked state next to the handle.

use anyhow::{anyhow, Result};
use ash::vk;

use super::interface::TextureVk;
use crate::interface::{next_unique_id, DeviceObject, Texture};
use crate::object::{Object, RefPtr};
use crate::resource::{check_contract, ResourceState, StateTracker, TextureDesc};

pub struct TextureVkImpl {
    id: u64,
    desc: TextureDesc,
    image: vk::Image,
    state: StateTracker,
}

impl TextureVkImpl {
    /// Wraps `image` without taking ownership of it.
    ///
    /// A null handle or an inconsistent description is a caller bug.
    pub fn import(
        image: vk::Image,
        desc: &TextureDesc,
        initial_state: ResourceState,
    ) -> Result<RefPtr<TextureVkImpl>> {
        check_contract(if image == vk::Image::null() {
            Err(anyhow!("Cannot import a null VkImage as texture '{}'", desc.name))
        } else {
            Ok(())
        })?;
        check_contract(desc.validate())?;

        Ok(RefPtr::with_capabilities(
            TextureVkImpl {
                id: next_unique_id(),
                desc: desc.clone(),
                image,
                state: StateTracker::new(initial_state),
            },
            crate::capabilities!(TextureVkImpl { dyn DeviceObject, dyn Texture, dyn TextureVk }),
        ))
    }
}

impl Object for TextureVkImpl {}

impl DeviceObject for TextureVkImpl {
    fn name(&self) -> &str {
        &self.desc.name
    }

    fn unique_id(&self) -> u64 {
        self.id
    }
}

impl Texture for TextureVkImpl {
    fn desc(&self) -> &TextureDesc {
        &self.desc
    }

    fn state(&self) -> ResourceState {
        self.state.get()
    }

    fn set_state(&self, state: ResourceState) -> ResourceState {
        self.state.set(state)
    }
}

impl TextureVk for TextureVkImpl {
    fn vk_image(&self) -> vk::Image {
        self.image
    }

    fn layout(&self) -> vk::ImageLayout {
        self.state.get().image_layout()
    }
}
