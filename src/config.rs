// =============================================================================
// CONFIGURATION - Engine creation settings, loadable from config.toml
// =============================================================================
//
// Everything `create_device_and_contexts` and `create_swap_chain` consume.
// Provides sensible defaults if the config file is missing or has errors;
// unknown option values degrade to a default with a warning.

use anyhow::{Context, Result};
use ash::vk;
use serde::Deserialize;
use std::path::Path;

/// Root configuration structure
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub engine: EngineVkCreateInfo,
    pub swap_chain: SwapChainDesc,
    pub debug: DebugConfig,
}

/// Window settings (demo binary)
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "vk-rhi".to_string(),
            width: 1280,
            height: 720,
        }
    }
}

/// Debug settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub log_level: String,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

impl DebugConfig {
    pub fn level_filter(&self) -> log::LevelFilter {
        self.log_level.parse().unwrap_or_else(|_| {
            log::warn!("Unknown log level '{}', defaulting to info", self.log_level);
            log::LevelFilter::Info
        })
    }
}

/// Whether a device feature is required, wanted, or left off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FeatureState {
    /// Never enabled
    #[default]
    Disabled,
    /// Enabled when the adapter supports it, silently skipped otherwise
    Optional,
    /// Mandatory: device creation fails without it
    Enabled,
}

impl FeatureState {
    /// Resolves a requested state against adapter support. `None` means a
    /// mandatory feature is missing.
    pub fn resolve(self, supported: bool) -> Option<FeatureState> {
        match (self, supported) {
            (FeatureState::Disabled, _) => Some(FeatureState::Disabled),
            (_, true) => Some(FeatureState::Enabled),
            (FeatureState::Optional, false) => Some(FeatureState::Disabled),
            (FeatureState::Enabled, false) => None,
        }
    }

    pub fn is_enabled(self) -> bool {
        self == FeatureState::Enabled
    }
}

/// Device feature requests. On a created device, every field is either
/// `Enabled` or `Disabled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DeviceFeatures {
    pub geometry_shaders: FeatureState,
    pub tessellation: FeatureState,
    pub wireframe_fill: FeatureState,
    pub wide_lines: FeatureState,
    pub sampler_anisotropy: FeatureState,
    pub shader_int64: FeatureState,
    pub texture_compression_bc: FeatureState,
    pub multi_draw_indirect: FeatureState,
}

impl Default for DeviceFeatures {
    fn default() -> Self {
        Self {
            geometry_shaders: FeatureState::Optional,
            tessellation: FeatureState::Optional,
            wireframe_fill: FeatureState::Optional,
            wide_lines: FeatureState::Optional,
            sampler_anisotropy: FeatureState::Optional,
            shader_int64: FeatureState::Optional,
            texture_compression_bc: FeatureState::Optional,
            multi_draw_indirect: FeatureState::Optional,
        }
    }
}

impl DeviceFeatures {
    /// Named view over every feature, in declaration order.
    pub fn entries(&self) -> [(&'static str, FeatureState); 8] {
        [
            ("geometry_shaders", self.geometry_shaders),
            ("tessellation", self.tessellation),
            ("wireframe_fill", self.wireframe_fill),
            ("wide_lines", self.wide_lines),
            ("sampler_anisotropy", self.sampler_anisotropy),
            ("shader_int64", self.shader_int64),
            ("texture_compression_bc", self.texture_compression_bc),
            ("multi_draw_indirect", self.multi_draw_indirect),
        ]
    }

    /// Resolves every request against what the adapter supports. Fails with
    /// the name of the first mandatory feature the adapter lacks.
    pub fn resolve(&self, supported: &vk::PhysicalDeviceFeatures) -> Result<DeviceFeatures, &'static str> {
        let has = |flag: vk::Bool32| flag == vk::TRUE;
        let pick = |name: &'static str, state: FeatureState, available: bool| {
            state.resolve(available).ok_or(name)
        };
        Ok(DeviceFeatures {
            geometry_shaders: pick("geometry_shaders", self.geometry_shaders, has(supported.geometry_shader))?,
            tessellation: pick("tessellation", self.tessellation, has(supported.tessellation_shader))?,
            wireframe_fill: pick("wireframe_fill", self.wireframe_fill, has(supported.fill_mode_non_solid))?,
            wide_lines: pick("wide_lines", self.wide_lines, has(supported.wide_lines))?,
            sampler_anisotropy: pick(
                "sampler_anisotropy",
                self.sampler_anisotropy,
                has(supported.sampler_anisotropy),
            )?,
            shader_int64: pick("shader_int64", self.shader_int64, has(supported.shader_int64))?,
            texture_compression_bc: pick(
                "texture_compression_bc",
                self.texture_compression_bc,
                has(supported.texture_compression_bc),
            )?,
            multi_draw_indirect: pick(
                "multi_draw_indirect",
                self.multi_draw_indirect,
                has(supported.multi_draw_indirect),
            )?,
        })
    }

    /// Vulkan feature struct enabling exactly the resolved features.
    pub fn vk_features(&self) -> vk::PhysicalDeviceFeatures {
        let flag = |state: FeatureState| if state.is_enabled() { vk::TRUE } else { vk::FALSE };
        vk::PhysicalDeviceFeatures {
            geometry_shader: flag(self.geometry_shaders),
            tessellation_shader: flag(self.tessellation),
            fill_mode_non_solid: flag(self.wireframe_fill),
            wide_lines: flag(self.wide_lines),
            sampler_anisotropy: flag(self.sampler_anisotropy),
            shader_int64: flag(self.shader_int64),
            texture_compression_bc: flag(self.texture_compression_bc),
            multi_draw_indirect: flag(self.multi_draw_indirect),
            ..Default::default()
        }
    }
}

/// Kind of work a queue must accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueKind {
    Graphics,
    Compute,
    Transfer,
}

impl QueueKind {
    pub fn required_flags(self) -> vk::QueueFlags {
        match self {
            QueueKind::Graphics => vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE,
            QueueKind::Compute => vk::QueueFlags::COMPUTE,
            // Graphics and compute queues implicitly support transfer
            QueueKind::Transfer => vk::QueueFlags::empty(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct QueueCreateInfo {
    pub kind: QueueKind,
    pub priority: f32,
}

impl Default for QueueCreateInfo {
    fn default() -> Self {
        Self {
            kind: QueueKind::Graphics,
            priority: 1.0,
        }
    }
}

/// Creation options for the Vulkan device and its immediate contexts.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineVkCreateInfo {
    pub app_name: String,
    /// Explicit adapter index; `None` picks the best scoring adapter
    pub adapter_id: Option<u32>,
    pub enable_validation: bool,
    /// One immediate context is created per queue, in this order
    pub queues: Vec<QueueCreateInfo>,
    pub features: DeviceFeatures,
}

impl Default for EngineVkCreateInfo {
    fn default() -> Self {
        Self {
            app_name: "vk-rhi".to_string(),
            adapter_id: None,
            enable_validation: cfg!(debug_assertions),
            queues: vec![QueueCreateInfo::default()],
            features: DeviceFeatures::default(),
        }
    }
}

/// Presentation surface settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SwapChainDesc {
    pub width: u32,
    pub height: u32,
    pub present_mode: String,
    pub buffer_count: u32,
    pub frames_in_flight: usize,
    pub clear_color: [f32; 4],
    pub srgb: bool,
}

impl Default for SwapChainDesc {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            present_mode: "fifo".to_string(),
            buffer_count: 3,
            frames_in_flight: 2,
            clear_color: [0.1, 0.2, 0.8, 1.0],
            srgb: true,
        }
    }
}

impl SwapChainDesc {
    /// Get present mode as Vulkan enum
    pub fn vk_present_mode(&self) -> vk::PresentModeKHR {
        match self.present_mode.to_lowercase().as_str() {
            "immediate" => vk::PresentModeKHR::IMMEDIATE,
            "mailbox" => vk::PresentModeKHR::MAILBOX,
            "fifo" => vk::PresentModeKHR::FIFO,
            "fifo_relaxed" => vk::PresentModeKHR::FIFO_RELAXED,
            _ => {
                log::warn!(
                    "Unknown present mode '{}', defaulting to FIFO",
                    self.present_mode
                );
                vk::PresentModeKHR::FIFO
            }
        }
    }
}

impl Config {
    /// Load configuration from file, falling back to defaults if not found
    pub fn load() -> Self {
        Self::load_from_path("config.toml").unwrap_or_else(|e| {
            log::warn!("Failed to load config.toml: {:#}. Using defaults.", e);
            Config::default()
        })
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config = Self::parse(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        log::info!("Loaded configuration from {:?}", path);
        log::debug!("Config: {:?}", config);

        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }
}
