// Resource descriptions and state tracking
//
// Native handles carry no reflection, so every texture and buffer comes with a
// full description. The state tracker remembers the logical state a resource
// is in so transitions recorded later start from the right place.

use anyhow::{bail, Result};
use ash::vk;
use parking_lot::Mutex;
use std::ops::BitOr;

/// Logical usage state of a resource, as seen by the barrier logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceState {
    Undefined,
    VertexBuffer,
    ConstantBuffer,
    IndexBuffer,
    IndirectArgument,
    RenderTarget,
    UnorderedAccess,
    DepthWrite,
    DepthRead,
    ShaderResource,
    CopySource,
    CopyDest,
    Present,
}

impl ResourceState {
    /// Image layout an image must be in while in this state.
    pub fn image_layout(self) -> vk::ImageLayout {
        match self {
            Self::Undefined => vk::ImageLayout::UNDEFINED,
            Self::RenderTarget => vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            Self::UnorderedAccess => vk::ImageLayout::GENERAL,
            Self::DepthWrite => vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            Self::DepthRead => vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL,
            Self::ShaderResource => vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            Self::CopySource => vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            Self::CopyDest => vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            Self::Present => vk::ImageLayout::PRESENT_SRC_KHR,
            // Buffer-only states have no image meaning
            Self::VertexBuffer
            | Self::ConstantBuffer
            | Self::IndexBuffer
            | Self::IndirectArgument => vk::ImageLayout::GENERAL,
        }
    }

    /// Memory accesses that work in this state performs.
    pub fn access_mask(self) -> vk::AccessFlags {
        match self {
            Self::Undefined | Self::Present => vk::AccessFlags::empty(),
            Self::VertexBuffer => vk::AccessFlags::VERTEX_ATTRIBUTE_READ,
            Self::ConstantBuffer => vk::AccessFlags::UNIFORM_READ,
            Self::IndexBuffer => vk::AccessFlags::INDEX_READ,
            Self::IndirectArgument => vk::AccessFlags::INDIRECT_COMMAND_READ,
            Self::RenderTarget => {
                vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE
            }
            Self::UnorderedAccess => vk::AccessFlags::SHADER_READ | vk::AccessFlags::SHADER_WRITE,
            Self::DepthWrite => {
                vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
                    | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE
            }
            Self::DepthRead => vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ,
            Self::ShaderResource => vk::AccessFlags::SHADER_READ,
            Self::CopySource => vk::AccessFlags::TRANSFER_READ,
            Self::CopyDest => vk::AccessFlags::TRANSFER_WRITE,
        }
    }
}

/// Current logical state of one resource. Shared by every thread using it.
#[derive(Debug)]
pub struct StateTracker {
    state: Mutex<ResourceState>,
}

impl StateTracker {
    pub fn new(initial: ResourceState) -> Self {
        Self {
            state: Mutex::new(initial),
        }
    }

    pub fn get(&self) -> ResourceState {
        *self.state.lock()
    }

    /// Sets the new state and returns the one it replaces.
    pub fn set(&self, state: ResourceState) -> ResourceState {
        std::mem::replace(&mut *self.state.lock(), state)
    }
}

/// How a resource may be bound to the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BindFlags(u32);

impl BindFlags {
    pub const NONE: Self = Self(0);
    pub const VERTEX_BUFFER: Self = Self(1 << 0);
    pub const INDEX_BUFFER: Self = Self(1 << 1);
    pub const UNIFORM_BUFFER: Self = Self(1 << 2);
    pub const SHADER_RESOURCE: Self = Self(1 << 3);
    pub const RENDER_TARGET: Self = Self(1 << 4);
    pub const DEPTH_STENCIL: Self = Self(1 << 5);
    pub const UNORDERED_ACCESS: Self = Self(1 << 6);
    pub const INDIRECT_DRAW_ARGS: Self = Self(1 << 7);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn buffer_usage(self) -> vk::BufferUsageFlags {
        let mut usage = vk::BufferUsageFlags::TRANSFER_SRC | vk::BufferUsageFlags::TRANSFER_DST;
        if self.contains(Self::VERTEX_BUFFER) {
            usage |= vk::BufferUsageFlags::VERTEX_BUFFER;
        }
        if self.contains(Self::INDEX_BUFFER) {
            usage |= vk::BufferUsageFlags::INDEX_BUFFER;
        }
        if self.contains(Self::UNIFORM_BUFFER) {
            usage |= vk::BufferUsageFlags::UNIFORM_BUFFER;
        }
        if self.contains(Self::SHADER_RESOURCE) || self.contains(Self::UNORDERED_ACCESS) {
            usage |= vk::BufferUsageFlags::STORAGE_BUFFER;
        }
        if self.contains(Self::INDIRECT_DRAW_ARGS) {
            usage |= vk::BufferUsageFlags::INDIRECT_BUFFER;
        }
        usage
    }
}

impl BitOr for BindFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Expected CPU access pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Usage {
    Immutable,
    #[default]
    Default,
    Dynamic,
    Staging,
}

impl Usage {
    pub fn memory_location(self) -> gpu_allocator::MemoryLocation {
        match self {
            Self::Immutable | Self::Default => gpu_allocator::MemoryLocation::GpuOnly,
            Self::Dynamic => gpu_allocator::MemoryLocation::CpuToGpu,
            Self::Staging => gpu_allocator::MemoryLocation::GpuToCpu,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TextureDimension {
    Tex1D,
    #[default]
    Tex2D,
    Tex2DArray,
    Tex3D,
    TexCube,
}

/// Texel formats the engine knows how to describe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TextureFormat {
    #[default]
    Rgba8Unorm,
    Rgba8UnormSrgb,
    Bgra8Unorm,
    Bgra8UnormSrgb,
    Rgba16Float,
    Rgba32Float,
    R32Float,
    D32Float,
    D24UnormS8Uint,
}

impl TextureFormat {
    pub fn vk_format(self) -> vk::Format {
        match self {
            Self::Rgba8Unorm => vk::Format::R8G8B8A8_UNORM,
            Self::Rgba8UnormSrgb => vk::Format::R8G8B8A8_SRGB,
            Self::Bgra8Unorm => vk::Format::B8G8R8A8_UNORM,
            Self::Bgra8UnormSrgb => vk::Format::B8G8R8A8_SRGB,
            Self::Rgba16Float => vk::Format::R16G16B16A16_SFLOAT,
            Self::Rgba32Float => vk::Format::R32G32B32A32_SFLOAT,
            Self::R32Float => vk::Format::R32_SFLOAT,
            Self::D32Float => vk::Format::D32_SFLOAT,
            Self::D24UnormS8Uint => vk::Format::D24_UNORM_S8_UINT,
        }
    }

    pub fn from_vk_format(format: vk::Format) -> Option<Self> {
        Some(match format {
            vk::Format::R8G8B8A8_UNORM => Self::Rgba8Unorm,
            vk::Format::R8G8B8A8_SRGB => Self::Rgba8UnormSrgb,
            vk::Format::B8G8R8A8_UNORM => Self::Bgra8Unorm,
            vk::Format::B8G8R8A8_SRGB => Self::Bgra8UnormSrgb,
            vk::Format::R16G16B16A16_SFLOAT => Self::Rgba16Float,
            vk::Format::R32G32B32A32_SFLOAT => Self::Rgba32Float,
            vk::Format::R32_SFLOAT => Self::R32Float,
            vk::Format::D32_SFLOAT => Self::D32Float,
            vk::Format::D24_UNORM_S8_UINT => Self::D24UnormS8Uint,
            _ => return None,
        })
    }

    pub fn is_depth(self) -> bool {
        matches!(self, Self::D32Float | Self::D24UnormS8Uint)
    }
}

/// Complete shape of a texture.
#[derive(Debug, Clone, PartialEq)]
pub struct TextureDesc {
    pub name: String,
    pub dimension: TextureDimension,
    pub width: u32,
    pub height: u32,
    /// Depth for 3D textures, layer count for arrays and cubes
    pub depth_or_array_size: u32,
    pub format: TextureFormat,
    pub mip_levels: u32,
    pub sample_count: u32,
    pub bind_flags: BindFlags,
    pub usage: Usage,
}

impl Default for TextureDesc {
    fn default() -> Self {
        Self {
            name: String::new(),
            dimension: TextureDimension::Tex2D,
            width: 0,
            height: 0,
            depth_or_array_size: 1,
            format: TextureFormat::default(),
            mip_levels: 1,
            sample_count: 1,
            bind_flags: BindFlags::SHADER_RESOURCE,
            usage: Usage::Default,
        }
    }
}

impl TextureDesc {
    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            bail!("Texture '{}': zero extent {}x{}", self.name, self.width, self.height);
        }
        if self.dimension == TextureDimension::Tex1D && self.height != 1 {
            bail!("Texture '{}': 1D textures must have height 1", self.name);
        }
        if self.dimension == TextureDimension::TexCube && self.depth_or_array_size % 6 != 0 {
            bail!("Texture '{}': cube textures need a multiple of 6 faces", self.name);
        }
        if self.depth_or_array_size == 0 || self.mip_levels == 0 {
            bail!("Texture '{}': depth, array size and mip count must be non-zero", self.name);
        }
        let max_mips = 32 - self.width.max(self.height).leading_zeros();
        if self.mip_levels > max_mips {
            bail!(
                "Texture '{}': {} mip levels requested, at most {} possible",
                self.name,
                self.mip_levels,
                max_mips
            );
        }
        if !self.sample_count.is_power_of_two() {
            bail!("Texture '{}': sample count {} is not a power of two", self.name, self.sample_count);
        }
        if self.format.is_depth() && self.bind_flags.contains(BindFlags::RENDER_TARGET) {
            bail!("Texture '{}': depth formats cannot be bound as render targets", self.name);
        }
        Ok(())
    }

    pub fn subresource_range(&self) -> vk::ImageSubresourceRange {
        let aspect_mask = match self.format {
            TextureFormat::D32Float => vk::ImageAspectFlags::DEPTH,
            TextureFormat::D24UnormS8Uint => {
                vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
            }
            _ => vk::ImageAspectFlags::COLOR,
        };
        let layer_count = match self.dimension {
            TextureDimension::Tex3D => 1,
            _ => self.depth_or_array_size,
        };
        vk::ImageSubresourceRange {
            aspect_mask,
            base_mip_level: 0,
            level_count: self.mip_levels,
            base_array_layer: 0,
            layer_count,
        }
    }
}

/// Complete shape of a buffer.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BufferDesc {
    pub name: String,
    pub size: u64,
    pub bind_flags: BindFlags,
    pub usage: Usage,
    /// Stride of one element for structured access, 0 for raw buffers
    pub element_byte_stride: u32,
}

impl BufferDesc {
    pub fn validate(&self) -> Result<()> {
        if self.size == 0 {
            bail!("Buffer '{}': size must be non-zero", self.name);
        }
        if self.element_byte_stride != 0 && self.size % u64::from(self.element_byte_stride) != 0 {
            bail!(
                "Buffer '{}': size {} is not a multiple of element stride {}",
                self.name,
                self.size,
                self.element_byte_stride
            );
        }
        if self.usage == Usage::Immutable && self.bind_flags.contains(BindFlags::UNORDERED_ACCESS) {
            bail!("Buffer '{}': immutable buffers cannot be written by shaders", self.name);
        }
        Ok(())
    }
}

/// Checks a caller-side precondition. Violations panic in debug builds and
/// come back as errors in release builds.
pub(crate) fn check_contract(check: Result<()>) -> Result<()> {
    if let Err(e) = &check {
        if cfg!(debug_assertions) {
            panic!("{:#}", e);
        }
    }
    check
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_tracker_returns_previous_state() {
        let tracker = StateTracker::new(ResourceState::CopyDest);
        assert_eq!(tracker.set(ResourceState::ShaderResource), ResourceState::CopyDest);
        assert_eq!(tracker.get(), ResourceState::ShaderResource);
    }

    #[test]
    fn test_texture_desc_validation() {
        let desc = TextureDesc {
            name: "albedo".into(),
            width: 256,
            height: 256,
            mip_levels: 9,
            ..Default::default()
        };
        assert!(desc.validate().is_ok());

        let too_many_mips = TextureDesc { mip_levels: 10, ..desc.clone() };
        assert!(too_many_mips.validate().is_err());

        let empty = TextureDesc { width: 0, ..desc.clone() };
        assert!(empty.validate().is_err());

        let bad_cube = TextureDesc {
            dimension: TextureDimension::TexCube,
            depth_or_array_size: 4,
            ..desc
        };
        assert!(bad_cube.validate().is_err());
    }

    #[test]
    fn test_buffer_desc_validation() {
        let desc = BufferDesc {
            name: "instances".into(),
            size: 64 * 16,
            bind_flags: BindFlags::SHADER_RESOURCE,
            element_byte_stride: 16,
            ..Default::default()
        };
        assert!(desc.validate().is_ok());
        assert!(BufferDesc { size: 100, ..desc.clone() }.validate().is_err());
        assert!(BufferDesc { size: 0, ..desc }.validate().is_err());
    }

    #[test]
    fn test_bind_flags_map_to_buffer_usage() {
        let usage = (BindFlags::VERTEX_BUFFER | BindFlags::UNORDERED_ACCESS).buffer_usage();
        assert!(usage.contains(vk::BufferUsageFlags::VERTEX_BUFFER));
        assert!(usage.contains(vk::BufferUsageFlags::STORAGE_BUFFER));
        assert!(!usage.contains(vk::BufferUsageFlags::INDEX_BUFFER));
    }

    #[test]
    fn test_depth_subresource_aspect() {
        let desc = TextureDesc {
            width: 4,
            height: 4,
            format: TextureFormat::D24UnormS8Uint,
            bind_flags: BindFlags::DEPTH_STENCIL,
            ..Default::default()
        };
        let range = desc.subresource_range();
        assert!(range.aspect_mask.contains(vk::ImageAspectFlags::STENCIL));
        assert_eq!(ResourceState::DepthWrite.image_layout(), vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);
    }
}
