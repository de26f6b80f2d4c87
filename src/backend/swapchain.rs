// Swapchain - Window presentation
//
// Manages the chain of images presented to a window. Each image has a
// pre-recorded command buffer that clears it to the configured color, so a
// swap chain can present without any other rendering set up.

use anyhow::{Context, Result};
use ash::extensions::khr;
use ash::vk;
use parking_lot::Mutex;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};

use super::context::DeviceContextVkImpl;
use super::interface::{DeviceContextVk, SwapChainVk};
use super::sync::FrameSync;
use crate::config::SwapChainDesc;
use crate::interface::{DeviceContext, NativeWindow, SwapChain};
use crate::object::{Object, RefPtr};

pub struct SwapChainVkImpl {
    // Keeps the context, and through it the device, alive until teardown
    context: RefPtr<DeviceContextVkImpl>,
    surface_loader: khr::Surface,
    swapchain_loader: khr::Swapchain,
    surface: vk::SurfaceKHR,
    command_pool: vk::CommandPool,
    state: Mutex<SwapChainState>,
}

#[derive(Default)]
struct SwapChainState {
    desc: SwapChainDesc,
    // Null while the window is minimized
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    command_buffers: Vec<vk::CommandBuffer>,
    format: vk::Format,
    extent: vk::Extent2D,
    frames: Vec<FrameSync>,
    current_frame: usize,
    needs_resize: bool,
}

impl SwapChainVkImpl {
    pub(crate) fn create(
        context: RefPtr<DeviceContextVkImpl>,
        desc: &SwapChainDesc,
        window: &NativeWindow,
    ) -> Result<RefPtr<SwapChainVkImpl>> {
        let shared = context.shared().clone();
        let vk = &shared.vk;

        if !vk.swapchain_supported {
            anyhow::bail!("Device does not support VK_KHR_swapchain");
        }

        log::info!("Creating swapchain: {}x{}", desc.width, desc.height);

        let surface_loader = khr::Surface::new(&vk.entry, &vk.instance);
        let surface = create_surface(&vk.entry, &vk.instance, window)?;
        let family = context.queue_family_index();

        let supported = unsafe {
            surface_loader.get_physical_device_surface_support(vk.physical_device, family, surface)
        };
        if !matches!(supported, Ok(true)) {
            unsafe { surface_loader.destroy_surface(surface, None) };
            anyhow::bail!("Queue family {} cannot present to this window", family);
        }

        let pool_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(family)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        let command_pool = match unsafe { vk.device.create_command_pool(&pool_info, None) } {
            Ok(pool) => pool,
            Err(e) => {
                unsafe { surface_loader.destroy_surface(surface, None) };
                return Err(e).context("Failed to create command pool");
            }
        };

        // From here on Drop cleans up whatever was created
        let swap_chain = Self {
            swapchain_loader: khr::Swapchain::new(&vk.instance, &vk.device),
            surface_loader,
            surface,
            command_pool,
            state: Mutex::new(SwapChainState {
                desc: desc.clone(),
                ..Default::default()
            }),
            context,
        };

        {
            let mut state = swap_chain.state.lock();
            for _ in 0..desc.frames_in_flight.max(1) {
                state.frames.push(FrameSync::new(&vk.device)?);
            }
            swap_chain.rebuild(&mut state)?;
        }

        Ok(RefPtr::with_capabilities(
            swap_chain,
            crate::capabilities!(SwapChainVkImpl { dyn SwapChain, dyn SwapChainVk }),
        ))
    }

    fn device(&self) -> &ash::Device {
        &self.context.shared().vk.device
    }

    /// (Re)creates the swapchain for the current window size. Leaves it null
    /// if the window has no area.
    fn rebuild(&self, state: &mut SwapChainState) -> Result<()> {
        // Nothing may still be using the old images or command buffers
        for frame in &state.frames {
            self.context.wait_for_fence(frame.fence_value)?;
        }

        let shared = self.context.shared();
        let physical_device = shared.vk.physical_device;

        // Query surface capabilities
        let surface_caps = unsafe {
            self.surface_loader
                .get_physical_device_surface_capabilities(physical_device, self.surface)
        }?;

        // Choose extent
        let extent = if surface_caps.current_extent.width != u32::MAX {
            surface_caps.current_extent
        } else {
            vk::Extent2D {
                width: state.desc.width.clamp(
                    surface_caps.min_image_extent.width,
                    surface_caps.max_image_extent.width,
                ),
                height: state.desc.height.clamp(
                    surface_caps.min_image_extent.height,
                    surface_caps.max_image_extent.height,
                ),
            }
        };

        if extent.width == 0 || extent.height == 0 {
            log::debug!("Surface has no area, swapchain suspended");
            self.destroy_images(state);
            let old = std::mem::replace(&mut state.swapchain, vk::SwapchainKHR::null());
            unsafe { self.swapchain_loader.destroy_swapchain(old, None) };
            return Ok(());
        }

        // Query supported formats
        let formats = unsafe {
            self.surface_loader
                .get_physical_device_surface_formats(physical_device, self.surface)
        }?;

        // Query supported present modes
        let present_modes = unsafe {
            self.surface_loader
                .get_physical_device_surface_present_modes(physical_device, self.surface)
        }?;

        // Choose surface format
        let wanted_format = if state.desc.srgb {
            vk::Format::B8G8R8A8_SRGB
        } else {
            vk::Format::B8G8R8A8_UNORM
        };
        let surface_format = formats
            .iter()
            .find(|f| {
                f.format == wanted_format && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
            })
            .or_else(|| formats.first())
            .context("No suitable surface format")?;

        // FIFO is always supported
        let requested = state.desc.vk_present_mode();
        let present_mode = if present_modes.contains(&requested) {
            requested
        } else {
            log::warn!("Present mode {:?} not supported, using FIFO", requested);
            vk::PresentModeKHR::FIFO
        };

        log::info!("Present mode: {:?}", present_mode);

        // Choose image count
        let mut image_count = state.desc.buffer_count.max(surface_caps.min_image_count);
        if surface_caps.max_image_count > 0 && image_count > surface_caps.max_image_count {
            image_count = surface_caps.max_image_count;
        }

        let old_swapchain = state.swapchain;
        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(self.surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(surface_caps.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain);

        let swapchain = unsafe { self.swapchain_loader.create_swapchain(&create_info, None) }?;

        // The old chain is retired either way
        self.destroy_images(state);
        unsafe { self.swapchain_loader.destroy_swapchain(old_swapchain, None) };
        state.swapchain = swapchain;

        // Get swapchain images
        state.images = unsafe { self.swapchain_loader.get_swapchain_images(swapchain) }?;
        state.format = surface_format.format;
        state.extent = extent;
        state.desc.width = extent.width;
        state.desc.height = extent.height;

        log::info!("Created swapchain with {} images", state.images.len());

        // Create image views
        for &image in &state.images {
            let create_info = vk::ImageViewCreateInfo::builder()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(surface_format.format)
                .components(vk::ComponentMapping {
                    r: vk::ComponentSwizzle::IDENTITY,
                    g: vk::ComponentSwizzle::IDENTITY,
                    b: vk::ComponentSwizzle::IDENTITY,
                    a: vk::ComponentSwizzle::IDENTITY,
                })
                .subresource_range(color_range());

            let view = unsafe { self.device().create_image_view(&create_info, None) }
                .context("Failed to create image view")?;
            state.image_views.push(view);
        }

        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(self.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(state.images.len() as u32);
        state.command_buffers = unsafe { self.device().allocate_command_buffers(&alloc_info) }
            .context("Failed to allocate command buffers")?;

        let clear_color = vk::ClearColorValue {
            float32: state.desc.clear_color,
        };
        for (&cmd, &image) in state.command_buffers.iter().zip(&state.images) {
            record_clear(self.device(), cmd, image, clear_color)?;
        }

        Ok(())
    }

    fn destroy_images(&self, state: &mut SwapChainState) {
        let device = self.device();
        unsafe {
            for view in state.image_views.drain(..) {
                device.destroy_image_view(view, None);
            }
            if !state.command_buffers.is_empty() {
                device.free_command_buffers(self.command_pool, &state.command_buffers);
            }
        }
        state.command_buffers.clear();
        state.images.clear();
    }

    /// Acquire, clear, present. Returns false when nothing was shown.
    fn present_frame(&self) -> Result<bool> {
        let mut state = self.state.lock();

        // Handle resize if needed
        if state.needs_resize {
            state.needs_resize = false;
            self.rebuild(&mut state)?;
        }

        // Skip rendering if minimized
        if state.swapchain == vk::SwapchainKHR::null() {
            return Ok(false);
        }

        let frame_index = state.current_frame;
        let (image_available, render_finished, last_use) = {
            let frame = &state.frames[frame_index];
            (frame.image_available, frame.render_finished, frame.fence_value)
        };

        // This frame's semaphores are free once its previous submission is done
        self.context.wait_for_fence(last_use)?;

        let acquired = unsafe {
            self.swapchain_loader.acquire_next_image(
                state.swapchain,
                u64::MAX,
                image_available,
                vk::Fence::null(),
            )
        };

        let image_index = match acquired {
            Ok((index, suboptimal)) => {
                state.needs_resize |= suboptimal;
                index
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                state.needs_resize = true;
                return Ok(false);
            }
            Err(e) => return Err(e).context("Failed to acquire swapchain image"),
        };

        let cmd = state.command_buffers[image_index as usize];
        let value = self.context.submit(
            &[cmd],
            &[(image_available, vk::PipelineStageFlags::TRANSFER)],
            &[render_finished],
        )?;
        state.frames[frame_index].fence_value = value;

        // Present rendered image to screen
        let swapchains = [state.swapchain];
        let image_indices = [image_index];
        let wait_semaphores = [render_finished];
        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let presented = self.context.queue().with_exclusive(|queue| unsafe {
            self.swapchain_loader
                .queue_present(queue.vk_queue(), &present_info)
        });

        match presented {
            Ok(suboptimal) => state.needs_resize |= suboptimal,
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => state.needs_resize = true,
            Err(e) => return Err(e).context("Failed to present"),
        }

        state.current_frame = (frame_index + 1) % state.frames.len();
        drop(state);

        self.context.finish_frame();
        Ok(true)
    }
}

impl Object for SwapChainVkImpl {}

impl SwapChain for SwapChainVkImpl {
    fn desc(&self) -> SwapChainDesc {
        self.state.lock().desc.clone()
    }

    fn present(&self) -> bool {
        match self.present_frame() {
            Ok(presented) => presented,
            Err(e) => {
                log::error!("Present failed: {:#}", e);
                false
            }
        }
    }

    fn resize(&self, width: u32, height: u32) -> bool {
        let mut state = self.state.lock();
        if state.desc.width == width && state.desc.height == height && !state.needs_resize {
            return true;
        }
        log::debug!("Swapchain resized to {}x{}", width, height);
        state.desc.width = width;
        state.desc.height = height;
        state.needs_resize = false;
        match self.rebuild(&mut state) {
            Ok(()) => true,
            Err(e) => {
                log::error!("Failed to resize swapchain: {:#}", e);
                false
            }
        }
    }
}

impl SwapChainVk for SwapChainVkImpl {
    fn vk_swapchain(&self) -> vk::SwapchainKHR {
        self.state.lock().swapchain
    }

    fn vk_surface(&self) -> vk::SurfaceKHR {
        self.surface
    }

    fn images(&self) -> Vec<vk::Image> {
        self.state.lock().images.clone()
    }

    fn format(&self) -> vk::Format {
        self.state.lock().format
    }

    fn extent(&self) -> vk::Extent2D {
        self.state.lock().extent
    }
}

impl Drop for SwapChainVkImpl {
    fn drop(&mut self) {
        // Wait for GPU to finish before destroying anything
        self.context.wait_for_idle();

        let mut state = std::mem::take(self.state.get_mut());

        // Destroy in reverse order of creation
        self.destroy_images(&mut state);
        let device = self.device();
        unsafe {
            for frame in &state.frames {
                frame.destroy(device);
            }
            device.destroy_command_pool(self.command_pool, None);
            self.swapchain_loader.destroy_swapchain(state.swapchain, None);
            self.surface_loader.destroy_surface(self.surface, None);
        }
    }
}

fn color_range() -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: 1,
    }
}

/// Records UNDEFINED -> TRANSFER_DST, clear, TRANSFER_DST -> PRESENT_SRC.
fn record_clear(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    clear_color: vk::ClearColorValue,
) -> Result<()> {
    let subresource_range = color_range();

    unsafe {
        // Frames in flight may resubmit the same image's commands
        let begin_info = vk::CommandBufferBeginInfo::builder()
            .flags(vk::CommandBufferUsageFlags::SIMULTANEOUS_USE);
        device.begin_command_buffer(cmd, &begin_info)?;

        let barrier_to_transfer = vk::ImageMemoryBarrier::builder()
            .src_access_mask(vk::AccessFlags::empty())
            .dst_access_mask(vk::AccessFlags::TRANSFER_WRITE)
            .old_layout(vk::ImageLayout::UNDEFINED)
            .new_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(image)
            .subresource_range(subresource_range)
            .build();

        device.cmd_pipeline_barrier(
            cmd,
            vk::PipelineStageFlags::TRANSFER,
            vk::PipelineStageFlags::TRANSFER,
            vk::DependencyFlags::empty(),
            &[],
            &[],
            &[barrier_to_transfer],
        );

        device.cmd_clear_color_image(
            cmd,
            image,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            &clear_color,
            &[subresource_range],
        );

        let barrier_to_present = vk::ImageMemoryBarrier::builder()
            .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
            .dst_access_mask(vk::AccessFlags::empty())
            .old_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
            .new_layout(vk::ImageLayout::PRESENT_SRC_KHR)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(image)
            .subresource_range(subresource_range)
            .build();

        device.cmd_pipeline_barrier(
            cmd,
            vk::PipelineStageFlags::TRANSFER,
            vk::PipelineStageFlags::BOTTOM_OF_PIPE,
            vk::DependencyFlags::empty(),
            &[],
            &[],
            &[barrier_to_present],
        );

        device.end_command_buffer(cmd)?;
    }

    Ok(())
}

/// Creates a presentation surface for a platform window.
fn create_surface(
    entry: &ash::Entry,
    instance: &ash::Instance,
    window: &NativeWindow,
) -> Result<vk::SurfaceKHR> {
    let surface = match (window.display, window.window) {
        #[cfg(target_os = "windows")]
        (RawDisplayHandle::Windows(_), RawWindowHandle::Win32(handle)) => {
            let create_info = vk::Win32SurfaceCreateInfoKHR::builder()
                .hinstance(handle.hinstance.map_or(0, |h| h.get()) as vk::HINSTANCE)
                .hwnd(handle.hwnd.get() as vk::HWND);
            let loader = khr::Win32Surface::new(entry, instance);
            unsafe { loader.create_win32_surface(&create_info, None) }
        }

        #[cfg(all(unix, not(any(target_os = "macos", target_os = "ios", target_os = "android"))))]
        (RawDisplayHandle::Xlib(display), RawWindowHandle::Xlib(handle)) => {
            let dpy = display
                .display
                .map_or(std::ptr::null_mut(), |d| d.as_ptr());
            let create_info = vk::XlibSurfaceCreateInfoKHR::builder()
                .dpy(dpy as *mut _)
                .window(handle.window);
            let loader = khr::XlibSurface::new(entry, instance);
            unsafe { loader.create_xlib_surface(&create_info, None) }
        }

        #[cfg(all(unix, not(any(target_os = "macos", target_os = "ios", target_os = "android"))))]
        (RawDisplayHandle::Xcb(display), RawWindowHandle::Xcb(handle)) => {
            let connection = display
                .connection
                .map_or(std::ptr::null_mut(), |c| c.as_ptr());
            let create_info = vk::XcbSurfaceCreateInfoKHR::builder()
                .connection(connection as *mut _)
                .window(handle.window.get());
            let loader = khr::XcbSurface::new(entry, instance);
            unsafe { loader.create_xcb_surface(&create_info, None) }
        }

        #[cfg(all(unix, not(any(target_os = "macos", target_os = "ios", target_os = "android"))))]
        (RawDisplayHandle::Wayland(display), RawWindowHandle::Wayland(handle)) => {
            let create_info = vk::WaylandSurfaceCreateInfoKHR::builder()
                .display(display.display.as_ptr() as *mut _)
                .surface(handle.surface.as_ptr() as *mut _);
            let loader = khr::WaylandSurface::new(entry, instance);
            unsafe { loader.create_wayland_surface(&create_info, None) }
        }

        (display, window) => {
            let _ = (entry, instance);
            anyhow::bail!("Unsupported window system: {:?} / {:?}", display, window)
        }
    };

    surface.context("Failed to create window surface")
}
