// Wrapping natively created Vulkan handles.
//
// The first tests use stand-in handles and run anywhere. The device tests
// return early when no Vulkan implementation is installed.

use std::sync::atomic::{AtomicBool, Ordering};

use ash::vk::{self, Handle};
use vk_rhi::backend::{BufferVk, BufferVkImpl, RenderDeviceVk, TextureVk, TextureVkImpl};
use vk_rhi::config::EngineVkCreateInfo;
use vk_rhi::interface::{Buffer, DeviceContext, DeviceObject, RenderDevice, Texture};
use vk_rhi::resource::{BufferDesc, ResourceState, TextureDesc, TextureFormat};
use vk_rhi::RefPtr;

fn liveness_flag(handle: u64) -> &'static AtomicBool {
    unsafe { &*(handle as *const AtomicBool) }
}

fn texture_desc(name: &str) -> TextureDesc {
    TextureDesc {
        name: name.into(),
        width: 256,
        height: 256,
        format: TextureFormat::Rgba8Unorm,
        ..Default::default()
    }
}

fn buffer_desc(name: &str) -> BufferDesc {
    BufferDesc {
        name: name.into(),
        size: 1024,
        ..Default::default()
    }
}

#[test]
fn test_dropping_imports_keeps_native_handles_valid() {
    let image_alive: &'static AtomicBool = Box::leak(Box::new(AtomicBool::new(true)));
    let buffer_alive: &'static AtomicBool = Box::leak(Box::new(AtomicBool::new(true)));
    let image = vk::Image::from_raw(image_alive as *const AtomicBool as u64);
    let buffer = vk::Buffer::from_raw(buffer_alive as *const AtomicBool as u64);

    let texture = TextureVkImpl::import(image, &texture_desc("color"), ResourceState::RenderTarget).unwrap();
    let wrapped = BufferVkImpl::import(buffer, &buffer_desc("vertices"), ResourceState::CopyDest).unwrap();

    let generic: RefPtr<dyn Texture> = texture.query().unwrap();
    assert_eq!(generic.desc().width, 256);
    assert_eq!(generic.state(), ResourceState::RenderTarget);
    assert_eq!(wrapped.query::<dyn BufferVk>().unwrap().vk_buffer(), buffer);

    drop(generic);
    drop(texture);
    drop(wrapped);

    // The application still owns both handles and destroys them itself
    for handle in [image.as_raw(), buffer.as_raw()] {
        let flag = liveness_flag(handle);
        assert!(flag.load(Ordering::SeqCst));
        flag.store(false, Ordering::SeqCst);
    }
}

#[test]
fn test_import_through_native_query() {
    let alive = AtomicBool::new(true);
    let image = vk::Image::from_raw(&alive as *const AtomicBool as u64);
    let texture = TextureVkImpl::import(image, &texture_desc("depth"), ResourceState::Undefined).unwrap();

    let as_object: RefPtr<dyn DeviceObject> = texture.query().unwrap();
    let native: RefPtr<dyn TextureVk> = as_object.query().unwrap();
    assert_eq!(native.vk_image(), image);
    assert_eq!(native.layout(), vk::ImageLayout::UNDEFINED);
    assert_eq!(as_object.name(), "depth");
    assert!(as_object.query::<dyn BufferVk>().is_none());
}

#[test]
#[cfg(debug_assertions)]
#[should_panic(expected = "null VkBuffer")]
fn test_null_buffer_import_is_a_contract_violation() {
    let _ = BufferVkImpl::import(vk::Buffer::null(), &buffer_desc("bad"), ResourceState::Undefined);
}

fn headless_device() -> Option<(RefPtr<dyn RenderDevice>, Vec<RefPtr<dyn DeviceContext>>)> {
    let _ = env_logger::builder().is_test(true).try_init();
    let create_info = EngineVkCreateInfo {
        enable_validation: false,
        ..Default::default()
    };
    vk_rhi::get_engine_factory_vk().create_device_and_contexts_vk(&create_info)
}

#[test]
fn test_device_import_round_trip() {
    let Some((device, _contexts)) = headless_device() else {
        eprintln!("no Vulkan device, skipping");
        return;
    };
    let device_vk = device.query::<dyn RenderDeviceVk>().unwrap();
    let ash_device = device_vk.ash_device();

    let image_info = vk::ImageCreateInfo::builder()
        .image_type(vk::ImageType::TYPE_2D)
        .format(vk::Format::R8G8B8A8_UNORM)
        .extent(vk::Extent3D { width: 256, height: 256, depth: 1 })
        .mip_levels(1)
        .array_layers(1)
        .samples(vk::SampleCountFlags::TYPE_1)
        .tiling(vk::ImageTiling::OPTIMAL)
        .usage(vk::ImageUsageFlags::SAMPLED)
        .sharing_mode(vk::SharingMode::EXCLUSIVE)
        .initial_layout(vk::ImageLayout::UNDEFINED);
    let image = unsafe { ash_device.create_image(&image_info, None) }.unwrap();

    let texture = device_vk
        .create_texture_from_vk_image(image, &texture_desc("imported"), ResourceState::Undefined)
        .unwrap();
    assert_eq!(texture.query::<dyn TextureVk>().unwrap().vk_image(), image);
    drop(texture);

    // Querying requirements needs a live image
    let requirements = unsafe { ash_device.get_image_memory_requirements(image) };
    assert!(requirements.size > 0);
    unsafe { ash_device.destroy_image(image, None) };
}

#[test]
fn test_device_fences_advance() {
    let Some((device, contexts)) = headless_device() else {
        eprintln!("no Vulkan device, skipping");
        return;
    };
    let device_vk = device.query::<dyn RenderDeviceVk>().unwrap();
    let context = &contexts[0];
    let queue = context.queue_index();

    let first_next = device_vk.next_fence_value(queue);
    let value = context.flush().unwrap();
    assert_eq!(value, first_next);
    assert_eq!(device_vk.next_fence_value(queue), value + 1);

    context.wait_for_idle();
    assert!(device_vk.is_fence_signaled(queue, value));
    assert!(device_vk.completed_fence_value(queue) >= value);

    let scratch = device.create_buffer(&buffer_desc("scratch"), ResourceState::Undefined).unwrap();
    assert_eq!(scratch.desc().size, 1024);
    drop(scratch);
    context.flush().unwrap();
    context.wait_for_idle();
    context.finish_frame();
}
