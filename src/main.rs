// =============================================================================
// VK-RHI DEMO - device, contexts, fences and a presenting swap chain
// =============================================================================
//
// ARCHITECTURE OVERVIEW:
//   get_engine_factory_vk()          process-wide factory
//     └── RenderDevice + contexts    one context per configured queue
//           ├── imported VkBuffer    native handle stays ours
//           ├── fence values         flush / poll / wait
//           └── SwapChain            clears and presents every redraw
//
// FRAME FLOW:
// 1. Acquire swap chain image
// 2. Wait for the frame slot's previous fence value
// 3. Submit pre-recorded clear commands
// 4. Present, reclaim finished resources
//
// =============================================================================

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;
use std::time::Instant;
use vk_rhi::backend::{EngineFactoryVk, RenderDeviceVk};
use vk_rhi::config::Config;
use vk_rhi::interface::{Buffer, DeviceContext, DeviceObject, NativeWindow, RenderDevice, SwapChain};
use vk_rhi::resource::{BindFlags, BufferDesc, ResourceState, Usage};
use vk_rhi::RefPtr;
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    window::{Window, WindowAttributes},
};

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() -> Result<()> {
    // Load configuration from config.toml
    let config = Config::load();

    init_logging(&config);
    log::info!("Starting vk-rhi demo");
    log::info!(
        "Window: {}x{}, {} queue(s) requested",
        config.window.width,
        config.window.height,
        config.engine.queues.len()
    );

    let event_loop = EventLoop::new()?;
    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;
    Ok(())
}

fn init_logging(config: &Config) {
    env_logger::Builder::from_default_env()
        .filter_level(config.debug.level_filter())
        .init();
}

// =============================================================================
// APPLICATION STATE
// =============================================================================

/// Field order matters for Drop: the swap chain and contexts release their
/// references before the device, and the window outlives all of them.
struct App {
    config: Config,

    swap_chain: Option<RefPtr<dyn SwapChain>>,
    contexts: Vec<RefPtr<dyn DeviceContext>>,
    device: Option<RefPtr<dyn RenderDevice>>,
    window: Option<Arc<Window>>,

    is_minimized: bool,
    frame_count: u32,
    last_fps_update: Instant,
}

impl App {
    fn new(config: Config) -> Self {
        Self {
            config,
            swap_chain: None,
            contexts: Vec::new(),
            device: None,
            window: None,
            is_minimized: false,
            frame_count: 0,
            last_fps_update: Instant::now(),
        }
    }

    fn init_engine(&mut self, window: &Window) -> Result<()> {
        let factory = vk_rhi::get_engine_factory_vk();

        let (device, contexts) = factory
            .create_device_and_contexts_vk(&self.config.engine)
            .context("No usable Vulkan device")?;

        let caps = device.caps();
        log::info!(
            "Device: {} (Vulkan {}.{}.{}, {})",
            caps.adapter_name,
            caps.api_version.0,
            caps.api_version.1,
            caps.api_version.2,
            if caps.discrete { "discrete" } else { "integrated" }
        );

        let immediate = contexts.first().context("Device has no contexts")?;
        demo_imported_buffer(&device)?;
        demo_fences(&device, immediate)?;

        let size = window.inner_size();
        let mut desc = self.config.swap_chain.clone();
        desc.width = size.width;
        desc.height = size.height;

        let native = NativeWindow::from_window(window)?;
        let swap_chain = factory
            .create_swap_chain_vk(&device, immediate, &desc, &native)
            .context("Failed to create swap chain")?;

        self.swap_chain = Some(swap_chain);
        self.contexts = contexts;
        self.device = Some(device);
        Ok(())
    }

    fn render_frame(&mut self) -> bool {
        if self.is_minimized {
            return false;
        }
        match self.swap_chain {
            Some(ref swap_chain) => swap_chain.present(),
            None => false,
        }
    }

    fn update_fps(&mut self) {
        self.frame_count += 1;
        let elapsed = self.last_fps_update.elapsed().as_secs_f64();
        if elapsed >= 1.0 {
            let fps = self.frame_count as f64 / elapsed;
            if let Some(ref window) = self.window {
                window.set_title(&format!("{} - {:.0} FPS", self.config.window.title, fps));
            }
            self.frame_count = 0;
            self.last_fps_update = Instant::now();
        }
    }

    fn wait_idle(&self) {
        for context in &self.contexts {
            context.wait_for_idle();
        }
    }
}

/// Wraps an app-created VkBuffer, drops the wrapper, and shows the native
/// buffer is still ours to destroy.
fn demo_imported_buffer(device: &RefPtr<dyn RenderDevice>) -> Result<()> {
    let device_vk = device
        .query::<dyn RenderDeviceVk>()
        .context("Device is not a Vulkan device")?;
    let ash_device = device_vk.ash_device();

    let buffer_info = vk::BufferCreateInfo::builder()
        .size(256)
        .usage(vk::BufferUsageFlags::TRANSFER_DST)
        .sharing_mode(vk::SharingMode::EXCLUSIVE);
    let native = unsafe { ash_device.create_buffer(&buffer_info, None) }
        .context("Failed to create native buffer")?;

    let desc = BufferDesc {
        name: "imported staging".into(),
        size: 256,
        bind_flags: BindFlags::NONE,
        usage: Usage::Default,
        element_byte_stride: 0,
    };
    match device_vk.create_buffer_from_vk_resource(native, &desc, ResourceState::CopyDest) {
        Some(buffer) => {
            log::info!(
                "Imported buffer '{}' (id {}) in state {:?}",
                buffer.name(),
                buffer.unique_id(),
                buffer.state()
            );
        }
        None => log::warn!("Buffer import failed"),
    }

    // The wrapper is gone; the handle is still valid and still ours
    unsafe { ash_device.destroy_buffer(native, None) };
    Ok(())
}

/// Submits a few empty batches and watches the queue's fence values move.
fn demo_fences(device: &RefPtr<dyn RenderDevice>, context: &RefPtr<dyn DeviceContext>) -> Result<()> {
    let device_vk = device
        .query::<dyn RenderDeviceVk>()
        .context("Device is not a Vulkan device")?;
    let queue = context.queue_index();

    // Engine-owned buffer, released through the deferred queue
    let desc = BufferDesc {
        name: "scratch".into(),
        size: 64 * 1024,
        bind_flags: BindFlags::UNORDERED_ACCESS,
        ..Default::default()
    };
    if let Some(scratch) = device.create_buffer(&desc, ResourceState::UnorderedAccess) {
        log::info!("Created '{}' ({} bytes)", scratch.name(), scratch.desc().size);
    }

    let mut last = 0;
    for _ in 0..3 {
        last = context.flush().context("Flush failed")?;
    }
    log::info!(
        "Queue {}: submitted up to {}, next {}, completed {}",
        queue,
        last,
        device_vk.next_fence_value(queue),
        device_vk.completed_fence_value(queue)
    );

    context.wait_for_idle();
    log::info!(
        "Queue {}: fence {} signaled = {}",
        queue,
        last,
        device_vk.is_fence_signaled(queue, last)
    );
    context.finish_frame();
    Ok(())
}

// =============================================================================
// EVENT HANDLING
// =============================================================================

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let window_attributes = WindowAttributes::default()
            .with_title(&self.config.window.title)
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ));

        let window = match event_loop.create_window(window_attributes) {
            Ok(w) => Arc::new(w),
            Err(e) => {
                log::error!("Failed to create window: {:?}", e);
                event_loop.exit();
                return;
            }
        };

        if let Err(e) = self.init_engine(&window) {
            log::error!("Failed to initialize engine: {:#}", e);
            event_loop.exit();
            return;
        }

        self.window = Some(window);
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _id: winit::window::WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                self.wait_idle();
                event_loop.exit();
            }

            WindowEvent::Resized(size) => {
                log::debug!("Window resized to {}x{}", size.width, size.height);
                self.is_minimized = size.width == 0 || size.height == 0;
                if !self.is_minimized {
                    if let Some(ref swap_chain) = self.swap_chain {
                        swap_chain.resize(size.width, size.height);
                    }
                }
            }

            WindowEvent::RedrawRequested => {
                if self.render_frame() {
                    self.update_fps();
                }
            }

            WindowEvent::KeyboardInput { event, .. } => {
                use winit::keyboard::{KeyCode, PhysicalKey};

                if event.state.is_pressed() && event.physical_key == PhysicalKey::Code(KeyCode::Escape) {
                    log::info!("ESC pressed, exiting...");
                    event_loop.exit();
                }
            }

            _ => {}
        }
    }

    /// Request continuous redraws.
    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(ref window) = self.window {
            window.request_redraw();
        }
    }
}

impl Drop for App {
    fn drop(&mut self) {
        log::info!("Cleaning up...");
        self.wait_idle();
        // Fields drop in declaration order: swap chain, contexts, device
    }
}
