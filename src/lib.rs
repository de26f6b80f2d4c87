// vk-rhi: reference-counted GPU objects over Vulkan
//
// LAYERS:
//   object    - intrusive refcount + capability queries, shared by everything
//   fence     - per-queue fence values and deferred release
//   resource  - texture/buffer descriptions and state tracking
//   interface - backend-agnostic traits clients program against
//   backend   - the Vulkan implementation and its factory

pub mod object;

pub mod backend;
pub mod blob;
pub mod config;
pub mod fence;
pub mod interface;
pub mod resource;

pub use backend::get_engine_factory_vk;
pub use object::{Interface, InterfaceId, Object, RefPtr};
