// Backend-agnostic interfaces
//
// What clients program against. Backends implement these on their concrete
// objects and register them in each object's capability list; anything more
// specific is reached through a capability query, never a downcast.

use raw_window_handle::{
    HandleError, HasDisplayHandle, HasWindowHandle, RawDisplayHandle, RawWindowHandle,
};

use crate::config::{DeviceFeatures, SwapChainDesc};
use crate::object::{Interface, InterfaceId, Object, RefPtr};
use crate::resource::{BufferDesc, ResourceState, TextureDesc};

pub const IID_DEVICE_OBJECT: InterfaceId = InterfaceId::from_u128(0x5B4CCA0B_5075_4230_9759_F48769EE5502);
pub const IID_RENDER_DEVICE: InterfaceId = InterfaceId::from_u128(0xF0E9B607_AE33_4B2B_B1AF_A8B2C3104022);
pub const IID_DEVICE_CONTEXT: InterfaceId = InterfaceId::from_u128(0xDC92711B_A1BE_4319_B2BF_2B7FA2E4B1C8);
pub const IID_SWAP_CHAIN: InterfaceId = InterfaceId::from_u128(0x1C703B77_6607_4EEC_B1FE_15C82D3B4130);
pub const IID_TEXTURE: InterfaceId = InterfaceId::from_u128(0xA64B0E60_1B5E_4CFD_B880_663A1ADCBE98);
pub const IID_BUFFER: InterfaceId = InterfaceId::from_u128(0xEC47EAD3_A2C4_44F2_81C5_5248D14F10E4);
pub const IID_ENGINE_FACTORY: InterfaceId = InterfaceId::from_u128(0xD932B052_4ED6_4729_A532_F31DEEC100F3);
pub const IID_DATA_BLOB: InterfaceId = InterfaceId::from_u128(0xF578FF0D_ABD2_4514_9D32_7CB454D4A73B);
pub const IID_FILE_STREAM: InterfaceId = InterfaceId::from_u128(0xE67F386C_6A5A_4A24_A0CE_C66435465D41);

/// Anything created by a render device.
pub trait DeviceObject: Object {
    fn name(&self) -> &str;

    /// Process-unique id, stable for the object's lifetime
    fn unique_id(&self) -> u64;
}

pub trait Texture: DeviceObject {
    fn desc(&self) -> &TextureDesc;
    fn state(&self) -> ResourceState;
    /// Records that the texture is now in `state`; returns the previous one.
    fn set_state(&self, state: ResourceState) -> ResourceState;
}

pub trait Buffer: DeviceObject {
    fn desc(&self) -> &BufferDesc;
    fn state(&self) -> ResourceState;
    fn set_state(&self, state: ResourceState) -> ResourceState;
}

/// Adapter details and which features actually got enabled.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceCaps {
    pub adapter_name: String,
    pub discrete: bool,
    pub api_version: (u32, u32, u32),
    pub features: DeviceFeatures,
}

pub trait RenderDevice: Object {
    fn caps(&self) -> &DeviceCaps;

    fn queue_count(&self) -> usize;

    /// Creates an engine-owned buffer. Its memory is released only after the
    /// GPU is done with it. `None` if allocation fails.
    fn create_buffer(&self, desc: &BufferDesc, initial_state: ResourceState) -> Option<RefPtr<dyn Buffer>>;

    /// Destroys engine-owned objects whose GPU work has completed.
    fn release_stale_resources(&self);
}

pub trait DeviceContext: Object {
    /// Queue this context submits to
    fn queue_index(&self) -> usize;

    /// Submits one unit of work and returns the fence value it will signal.
    fn flush(&self) -> Option<u64>;

    /// End-of-frame housekeeping: reclaims finished resources.
    fn finish_frame(&self);

    /// Blocks until everything submitted through this context's queue is done.
    fn wait_for_idle(&self);
}

pub trait SwapChain: Object {
    fn desc(&self) -> SwapChainDesc;

    /// Clears the next back buffer to the configured color and presents it.
    /// Returns false when nothing was presented (out of date, minimized).
    fn present(&self) -> bool;

    fn resize(&self, width: u32, height: u32) -> bool;
}

/// Platform window a swap chain presents to.
#[derive(Debug, Clone, Copy)]
pub struct NativeWindow {
    pub window: RawWindowHandle,
    pub display: RawDisplayHandle,
}

impl NativeWindow {
    /// Captures the raw handles of a live window. The window must outlive any
    /// swap chain created from them.
    pub fn from_window<W: HasWindowHandle + HasDisplayHandle + ?Sized>(
        window: &W,
    ) -> Result<Self, HandleError> {
        Ok(Self {
            window: window.window_handle()?.as_raw(),
            display: window.display_handle()?.as_raw(),
        })
    }
}

/// In-memory byte buffer object.
pub trait DataBlob: Object {
    fn size(&self) -> usize;
    fn resize(&self, size: usize);
    /// Copies out `len` bytes at `offset`; false if out of range.
    fn read_at(&self, offset: usize, out: &mut [u8]) -> bool;
    /// Writes at `offset`, growing the blob as needed.
    fn write_at(&self, offset: usize, data: &[u8]);
    fn to_vec(&self) -> Vec<u8>;
}

/// Origin for [`FileStream::set_pos`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekOrigin {
    Start,
    Current,
    End,
}

pub trait FileStream: Object {
    /// Reads the remainder of the stream into `blob`, replacing its contents.
    fn read_blob(&self, blob: &dyn DataBlob);
    /// Fills `out` exactly; false (and no movement) if not enough bytes remain.
    fn read(&self, out: &mut [u8]) -> bool;
    fn write(&self, data: &[u8]) -> bool;
    fn size(&self) -> usize;
    fn pos(&self) -> usize;
    fn set_pos(&self, offset: i64, origin: SeekOrigin) -> bool;
    fn is_valid(&self) -> bool;
}

pub trait EngineFactory: Object {
    fn create_data_blob(&self, initial_size: usize) -> RefPtr<dyn DataBlob>;

    fn create_memory_file_stream(&self, blob: RefPtr<dyn DataBlob>) -> RefPtr<dyn FileStream>;
}

impl Interface for dyn DeviceObject {
    const IID: InterfaceId = IID_DEVICE_OBJECT;
}

impl Interface for dyn RenderDevice {
    const IID: InterfaceId = IID_RENDER_DEVICE;
}

impl Interface for dyn DeviceContext {
    const IID: InterfaceId = IID_DEVICE_CONTEXT;
}

impl Interface for dyn SwapChain {
    const IID: InterfaceId = IID_SWAP_CHAIN;
}

impl Interface for dyn Texture {
    const IID: InterfaceId = IID_TEXTURE;
}

impl Interface for dyn Buffer {
    const IID: InterfaceId = IID_BUFFER;
}

impl Interface for dyn EngineFactory {
    const IID: InterfaceId = IID_ENGINE_FACTORY;
}

impl Interface for dyn DataBlob {
    const IID: InterfaceId = IID_DATA_BLOB;
}

impl Interface for dyn FileStream {
    const IID: InterfaceId = IID_FILE_STREAM;
}

/// Source of [`DeviceObject::unique_id`] values.
pub(crate) fn next_unique_id() -> u64 {
    use std::sync::atomic::{AtomicU64, Ordering};
    static NEXT: AtomicU64 = AtomicU64::new(1);
    NEXT.fetch_add(1, Ordering::Relaxed)
}
