// Object model - reference counting and capability queries
//
// Every object handed out by the engine is a `RefPtr` to a heap block with an
// embedded atomic owner count. Any object can be asked at runtime whether it
// also satisfies another interface; that is the only way to go from the
// backend-agnostic surface to backend-specific extensions.

mod id;
mod ref_ptr;
mod registry;

pub use id::InterfaceId;
pub use ref_ptr::RefPtr;
pub use registry::{Capabilities, Interface, InterfacePtr};

/// Identity of the base object contract. Every object answers to it.
pub const IID_OBJECT: InterfaceId = InterfaceId::ZERO;

/// Base contract of every engine object.
pub trait Object: Send + Sync + 'static {}

/// Builds a [`Capabilities`] registry for a concrete type from the interface
/// traits it implements.
///
/// ```ignore
/// let caps = capabilities!(BufferVkImpl { dyn Buffer, dyn BufferVk });
/// ```
#[macro_export]
macro_rules! capabilities {
    ($ty:ty { $(dyn $iface:path),* $(,)? }) => {
        $crate::object::Capabilities::<$ty>::new()
            $(.with::<dyn $iface>(|p| {
                $crate::object::RefPtr::map(p, |v| v as &(dyn $iface + 'static))
            }))*
    };
}
