// Vulkan Device - Core GPU interface
//
// Responsibilities:
// - Instance creation with validation layers and surface extensions
// - Physical device selection (explicit adapter or prefer discrete GPU)
// - Feature resolution (mandatory vs optional)
// - Logical device + one queue per requested queue
// - Memory allocator setup

use anyhow::{Context, Result};
use ash::extensions::{ext, khr};
use ash::{vk, Entry};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::ffi::{c_char, CStr, CString};
use std::mem::ManuallyDrop;

use crate::config::{DeviceFeatures, EngineVkCreateInfo, QueueCreateInfo, QueueKind};

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Timeline semaphores need Vulkan 1.2
const MIN_API_VERSION: u32 = vk::API_VERSION_1_2;

/// Vulkan device wrapper with automatic cleanup
pub struct VulkanDevice {
    // Destroyed by hand before the device (see Drop)
    pub allocator: ManuallyDrop<Mutex<gpu_allocator::vulkan::Allocator>>,
    pub device: ash::Device,
    pub physical_device: vk::PhysicalDevice,
    pub instance: ash::Instance,
    pub entry: Entry,

    /// (queue, family) for every requested queue, in request order
    pub queues: Vec<(vk::Queue, u32)>,

    // Debug utils (if validation enabled)
    debug_utils: Option<(ext::DebugUtils, vk::DebugUtilsMessengerEXT)>,

    // Device properties (cached for performance)
    pub properties: vk::PhysicalDeviceProperties,
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,

    /// Features as resolved against the adapter
    pub features: DeviceFeatures,
    pub swapchain_supported: bool,
}

/// Adapter picked for device creation, with everything needed to build on it.
struct AdapterChoice {
    physical_device: vk::PhysicalDevice,
    features: DeviceFeatures,
    /// (family, index within family) per requested queue
    queue_slots: Vec<(u32, u32)>,
    swapchain_supported: bool,
}

impl VulkanDevice {
    /// Create Vulkan device
    ///
    /// Fails if no adapter supports every mandatory feature and queue request.
    pub fn new(entry: &Entry, create_info: &EngineVkCreateInfo) -> Result<Self> {
        log::info!("Creating Vulkan device: {}", create_info.app_name);

        // Step 1: Create instance
        let enable_validation =
            create_info.enable_validation && Self::validation_layer_available(entry)?;
        let instance = Self::create_instance(entry, &create_info.app_name, enable_validation)?;

        // Step 2: Setup debug messenger if validation enabled
        let debug_utils = if enable_validation {
            match Self::setup_debug_messenger(entry, &instance) {
                Ok(messenger) => Some(messenger),
                Err(e) => {
                    log::warn!("Validation enabled but debug messenger failed: {:#}", e);
                    None
                }
            }
        } else {
            None
        };

        // From here on, failures must tear the instance back down
        let built = Self::build_on_instance(&instance, create_info);
        let (choice, device, queues) = match built {
            Ok(parts) => parts,
            Err(e) => {
                unsafe {
                    if let Some((debug_utils, messenger)) = debug_utils {
                        debug_utils.destroy_debug_utils_messenger(messenger, None);
                    }
                    instance.destroy_instance(None);
                }
                return Err(e);
            }
        };

        // Step 5: Cache device properties
        let properties = unsafe { instance.get_physical_device_properties(choice.physical_device) };
        let memory_properties =
            unsafe { instance.get_physical_device_memory_properties(choice.physical_device) };

        log::info!("Selected GPU: {}", adapter_name(&properties));
        log::info!(
            "API Version: {}.{}.{}",
            vk::api_version_major(properties.api_version),
            vk::api_version_minor(properties.api_version),
            vk::api_version_patch(properties.api_version)
        );
        for (name, state) in choice.features.entries() {
            log::debug!("Feature {}: {:?}", name, state);
        }

        // Step 6: Create memory allocator
        let allocator = match Self::create_allocator(&instance, choice.physical_device, &device) {
            Ok(allocator) => allocator,
            Err(e) => {
                unsafe {
                    device.destroy_device(None);
                    if let Some((debug_utils, messenger)) = debug_utils {
                        debug_utils.destroy_debug_utils_messenger(messenger, None);
                    }
                    instance.destroy_instance(None);
                }
                return Err(e);
            }
        };

        Ok(Self {
            allocator: ManuallyDrop::new(Mutex::new(allocator)),
            device,
            physical_device: choice.physical_device,
            instance,
            entry: entry.clone(),
            queues,
            debug_utils,
            properties,
            memory_properties,
            features: choice.features,
            swapchain_supported: choice.swapchain_supported,
        })
    }

    fn build_on_instance(
        instance: &ash::Instance,
        create_info: &EngineVkCreateInfo,
    ) -> Result<(AdapterChoice, ash::Device, Vec<(vk::Queue, u32)>)> {
        // Step 3: Pick physical device (GPU)
        let choice = Self::pick_physical_device(instance, create_info)?;

        // Step 4: Create logical device
        let (device, queues) =
            Self::create_logical_device(instance, &choice, &create_info.queues)?;

        Ok((choice, device, queues))
    }

    fn validation_layer_available(entry: &Entry) -> Result<bool> {
        let layers = entry.enumerate_instance_layer_properties()?;
        let available = layers
            .iter()
            .any(|layer| unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) } == VALIDATION_LAYER);
        if !available {
            log::warn!("Validation requested but {:?} is not installed", VALIDATION_LAYER);
        }
        Ok(available)
    }

    fn create_instance(
        entry: &Entry,
        app_name: &str,
        enable_validation: bool,
    ) -> Result<ash::Instance> {
        let app_name_cstr = CString::new(app_name)?;
        let engine_name = CString::new("vk-rhi")?;

        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name_cstr)
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(&engine_name)
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(MIN_API_VERSION);

        // Surface extensions are enabled whenever present so that swap chains
        // can be created later for any window
        let available: Vec<CString> = entry
            .enumerate_instance_extension_properties(None)?
            .iter()
            .map(|ext| unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) }.to_owned())
            .collect();

        let mut wanted: Vec<&CStr> = surface_extension_names();
        if enable_validation {
            wanted.push(ext::DebugUtils::name());
        }

        let extensions: Vec<*const c_char> = wanted
            .into_iter()
            .filter(|name| {
                let present = available.iter().any(|a| a.as_c_str() == *name);
                if !present {
                    log::debug!("Instance extension {:?} not available", name);
                }
                present
            })
            .map(CStr::as_ptr)
            .collect();

        // Validation layers
        let layer_names = if enable_validation {
            vec![VALIDATION_LAYER.as_ptr()]
        } else {
            vec![]
        };

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layer_names);

        let instance = unsafe { entry.create_instance(&create_info, None) }
            .context("Failed to create Vulkan instance")?;

        Ok(instance)
    }

    fn setup_debug_messenger(
        entry: &Entry,
        instance: &ash::Instance,
    ) -> Result<(ext::DebugUtils, vk::DebugUtilsMessengerEXT)> {
        let debug_utils = ext::DebugUtils::new(entry, instance);

        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        let messenger = unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) }?;

        Ok((debug_utils, messenger))
    }

    fn pick_physical_device(
        instance: &ash::Instance,
        create_info: &EngineVkCreateInfo,
    ) -> Result<AdapterChoice> {
        let devices = unsafe { instance.enumerate_physical_devices() }?;

        if devices.is_empty() {
            anyhow::bail!("No Vulkan-capable GPU found");
        }

        // Explicit adapter: use it or fail, never fall back silently
        if let Some(id) = create_info.adapter_id {
            let device = *devices.get(id as usize).with_context(|| {
                format!("Adapter {} requested but only {} present", id, devices.len())
            })?;
            return Self::evaluate_adapter(instance, device, create_info)
                .with_context(|| format!("Adapter {} is not suitable", id));
        }

        // Score each device
        let mut best_device = None;
        let mut best_score = 0;

        for device in devices {
            let choice = match Self::evaluate_adapter(instance, device, create_info) {
                Ok(choice) => choice,
                Err(e) => {
                    log::debug!("Skipping adapter: {:#}", e);
                    continue;
                }
            };

            let props = unsafe { instance.get_physical_device_properties(device) };
            // Score device (prefer discrete GPU)
            let score = match props.device_type {
                vk::PhysicalDeviceType::DISCRETE_GPU => 1000,
                vk::PhysicalDeviceType::INTEGRATED_GPU => 100,
                _ => 1,
            };

            if score > best_score {
                best_score = score;
                best_device = Some(choice);
            }
        }

        best_device.ok_or_else(|| anyhow::anyhow!("No suitable GPU found"))
    }

    /// Checks one adapter against API version, mandatory features, timeline
    /// semaphore support and the queue requests.
    fn evaluate_adapter(
        instance: &ash::Instance,
        device: vk::PhysicalDevice,
        create_info: &EngineVkCreateInfo,
    ) -> Result<AdapterChoice> {
        let props = unsafe { instance.get_physical_device_properties(device) };
        let name = adapter_name(&props);
        if props.api_version < MIN_API_VERSION {
            anyhow::bail!("{}: Vulkan 1.2 is required", name);
        }

        let mut vulkan12 = vk::PhysicalDeviceVulkan12Features::default();
        let mut features2 = vk::PhysicalDeviceFeatures2::builder().push_next(&mut vulkan12);
        unsafe { instance.get_physical_device_features2(device, &mut features2) };
        let supported = features2.features;

        if vulkan12.timeline_semaphore != vk::TRUE {
            anyhow::bail!("{}: timeline semaphores are not supported", name);
        }

        let features = create_info
            .features
            .resolve(&supported)
            .map_err(|missing| anyhow::anyhow!("{}: mandatory feature '{}' is missing", name, missing))?;

        let families = unsafe { instance.get_physical_device_queue_family_properties(device) };
        let queue_slots = assign_queue_slots(&families, &create_info.queues)
            .with_context(|| format!("{}: cannot host the requested queues", name))?;

        let swapchain_supported = unsafe { instance.enumerate_device_extension_properties(device) }?
            .iter()
            .any(|ext| unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) } == khr::Swapchain::name());

        Ok(AdapterChoice {
            physical_device: device,
            features,
            queue_slots,
            swapchain_supported,
        })
    }

    fn create_logical_device(
        instance: &ash::Instance,
        choice: &AdapterChoice,
        requests: &[QueueCreateInfo],
    ) -> Result<(ash::Device, Vec<(vk::Queue, u32)>)> {
        // Gather priorities per family, in slot order
        let mut priorities: HashMap<u32, Vec<f32>> = HashMap::new();
        for (&(family, _), request) in choice.queue_slots.iter().zip(requests) {
            priorities
                .entry(family)
                .or_default()
                .push(request.priority.clamp(0.0, 1.0));
        }
        let mut families: Vec<u32> = priorities.keys().copied().collect();
        families.sort_unstable();

        let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = families
            .iter()
            .map(|family| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(*family)
                    .queue_priorities(&priorities[family])
                    .build()
            })
            .collect();

        // Required device extensions
        let mut extensions = Vec::new();
        if choice.swapchain_supported {
            extensions.push(khr::Swapchain::name().as_ptr());
        }

        let enabled_features = choice.features.vk_features();
        let mut vulkan12 = vk::PhysicalDeviceVulkan12Features::builder().timeline_semaphore(true);

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extensions)
            .enabled_features(&enabled_features)
            .push_next(&mut vulkan12);

        let device = unsafe { instance.create_device(choice.physical_device, &create_info, None) }
            .context("Failed to create logical device")?;

        let queues = choice
            .queue_slots
            .iter()
            .map(|&(family, index)| (unsafe { device.get_device_queue(family, index) }, family))
            .collect();

        Ok((device, queues))
    }

    fn create_allocator(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        device: &ash::Device,
    ) -> Result<gpu_allocator::vulkan::Allocator> {
        let allocator =
            gpu_allocator::vulkan::Allocator::new(&gpu_allocator::vulkan::AllocatorCreateDesc {
                instance: instance.clone(),
                device: device.clone(),
                physical_device,
                debug_settings: Default::default(),
                buffer_device_address: false,
                allocation_sizes: Default::default(),
            })
            .context("Failed to create memory allocator")?;

        Ok(allocator)
    }

    /// Wait for device to be idle (e.g., before cleanup)
    pub fn wait_idle(&self) -> Result<()> {
        unsafe { self.device.device_wait_idle() }?;
        Ok(())
    }

    pub fn adapter_name(&self) -> String {
        adapter_name(&self.properties)
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        log::info!("Destroying Vulkan device...");

        // Wait for device to finish
        let _ = self.wait_idle();

        // Cleanup in reverse order
        unsafe {
            // Allocator frees its memory blocks through the device
            ManuallyDrop::drop(&mut self.allocator);

            self.device.destroy_device(None);

            if let Some((debug_utils, messenger)) = self.debug_utils.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }

            self.instance.destroy_instance(None);
        }
    }
}

/// Maps each queue request to a (family, index) slot. Compute and transfer
/// requests prefer dedicated families; every family's queue count is honored.
pub(crate) fn assign_queue_slots(
    families: &[vk::QueueFamilyProperties],
    requests: &[QueueCreateInfo],
) -> Result<Vec<(u32, u32)>> {
    let mut used = vec![0u32; families.len()];
    let mut slots = Vec::with_capacity(requests.len());

    for request in requests {
        let required = request.kind.required_flags();
        let avoid = match request.kind {
            QueueKind::Graphics => vk::QueueFlags::empty(),
            QueueKind::Compute => vk::QueueFlags::GRAPHICS,
            QueueKind::Transfer => vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE,
        };
        let has_room = |i: usize| used[i] < families[i].queue_count;
        let fits = |i: usize| {
            let flags = families[i].queue_flags;
            let usable = flags.contains(required)
                && (request.kind != QueueKind::Transfer
                    || flags.intersects(
                        vk::QueueFlags::TRANSFER | vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE,
                    ));
            usable && has_room(i)
        };

        let dedicated = (0..families.len()).find(|&i| fits(i) && !families[i].queue_flags.intersects(avoid));
        let family = dedicated
            .or_else(|| (0..families.len()).find(|&i| fits(i)))
            .with_context(|| format!("no queue family left for a {:?} queue", request.kind))?;

        slots.push((family as u32, used[family]));
        used[family] += 1;
    }

    Ok(slots)
}

fn adapter_name(properties: &vk::PhysicalDeviceProperties) -> String {
    unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }
        .to_string_lossy()
        .into_owned()
}

/// Platform surface extensions worth enabling on the instance.
fn surface_extension_names() -> Vec<&'static CStr> {
    let mut names = vec![khr::Surface::name()];

    #[cfg(target_os = "windows")]
    {
        names.push(khr::Win32Surface::name());
    }

    #[cfg(all(unix, not(any(target_os = "macos", target_os = "ios", target_os = "android"))))]
    {
        names.push(khr::XlibSurface::name());
        names.push(khr::XcbSurface::name());
        names.push(khr::WaylandSurface::name());
    }

    names
}

// Debug callback for validation layers
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    let message = CStr::from_ptr((*p_callback_data).p_message);

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            log::error!("[Vulkan] {}", message.to_string_lossy());
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            log::warn!("[Vulkan] {}", message.to_string_lossy());
        }
        _ => {
            log::debug!("[Vulkan] {}", message.to_string_lossy());
        }
    }

    vk::FALSE
}
