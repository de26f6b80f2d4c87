// Capability registry
//
// Per-object list of (identity, cast) pairs, filled in when the object is
// constructed. The generic query walks it; nothing else knows which concrete
// type sits behind a handle.

use std::any::Any;
use std::fmt;
use std::mem;

use super::{InterfaceId, Object, RefPtr, IID_OBJECT};

/// A type that can be the target of a capability query.
///
/// Implemented for `dyn Trait` interface types, and for concrete types that a
/// backend needs to recover from its own objects.
pub trait Interface: Send + Sync + 'static {
    const IID: InterfaceId;
}

pub(super) struct Capability<T> {
    iid: InterfaceId,
    // `fn(RefPtr<T>) -> RefPtr<I>` with `I` erased; `call` restores it
    cast: fn(),
    call: unsafe fn(fn(), RefPtr<T>) -> InterfacePtr,
}

impl<T: 'static> Capability<T> {
    fn new<I: Interface + ?Sized>(cast: fn(RefPtr<T>) -> RefPtr<I>) -> Self {
        assert_eq!(mem::size_of::<fn(RefPtr<T>) -> RefPtr<I>>(), mem::size_of::<fn()>());
        Self {
            iid: I::IID,
            // SAFETY: same size, and only ever turned back into its real type
            cast: unsafe { mem::transmute_copy(&cast) },
            call: call_cast::<T, I>,
        }
    }

    pub(super) fn cast(&self, this: RefPtr<T>) -> InterfacePtr {
        // SAFETY: `call` was instantiated for the type `cast` was erased from.
        unsafe { (self.call)(self.cast, this) }
    }
}

unsafe fn call_cast<T: 'static, I: Interface + ?Sized>(cast: fn(), this: RefPtr<T>) -> InterfacePtr {
    let cast: fn(RefPtr<T>) -> RefPtr<I> = mem::transmute_copy(&cast);
    InterfacePtr::new(cast(this))
}

/// The set of interfaces one object satisfies.
pub struct Capabilities<T> {
    entries: Vec<Capability<T>>,
}

impl<T: Object> Capabilities<T> {
    /// A registry answering only for the base object identity, which every
    /// object supports.
    pub fn new() -> Self {
        Self { entries: Vec::new() }
            .with::<dyn Object>(|p| RefPtr::map(p, |v| v as &(dyn Object + 'static)))
    }
}

impl<T: Object> Default for Capabilities<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static> Capabilities<T> {
    /// Declares support for `I`, reached through `cast`.
    pub fn with<I: Interface + ?Sized>(mut self, cast: fn(RefPtr<T>) -> RefPtr<I>) -> Self {
        debug_assert!(
            self.find(&I::IID).is_none(),
            "interface {} registered twice",
            I::IID
        );
        self.entries.push(Capability::new(cast));
        self
    }

    pub fn supports(&self, iid: &InterfaceId) -> bool {
        self.find(iid).is_some()
    }

    pub fn iids(&self) -> impl Iterator<Item = InterfaceId> + '_ {
        self.entries.iter().map(|e| e.iid)
    }

    pub(super) fn find(&self, iid: &InterfaceId) -> Option<&Capability<T>> {
        self.entries.iter().find(|e| e.iid == *iid)
    }
}

/// Result of an untyped capability query. Owns one reference to the object.
pub struct InterfacePtr {
    iid: InterfaceId,
    ptr: Box<dyn Any + Send + Sync>,
}

impl InterfacePtr {
    fn new<I: Interface + ?Sized>(ptr: RefPtr<I>) -> Self {
        Self {
            iid: I::IID,
            ptr: Box::new(ptr),
        }
    }

    pub fn iid(&self) -> InterfaceId {
        self.iid
    }

    /// Recovers the typed handle; hands `self` back if `I` is not what was queried.
    pub fn downcast<I: Interface + ?Sized>(self) -> Result<RefPtr<I>, Self> {
        if self.iid != I::IID {
            return Err(self);
        }
        match self.ptr.downcast::<RefPtr<I>>() {
            Ok(ptr) => Ok(*ptr),
            Err(ptr) => Err(Self { iid: self.iid, ptr }),
        }
    }
}

impl fmt::Debug for InterfacePtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterfacePtr").field("iid", &self.iid).finish()
    }
}

impl Interface for dyn Object {
    const IID: InterfaceId = IID_OBJECT;
}
