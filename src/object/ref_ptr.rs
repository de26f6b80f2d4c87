// Intrusive reference counting
//
// Every engine object lives in a single heap block that starts with a small
// header: the atomic owner count plus two type-erased entry points (destroy,
// query). `RefPtr<T>` is one owner of that block. It may point at the concrete
// object or at any interface view of it, but always releases through the header.

use std::fmt;
use std::marker::PhantomData;
use std::mem::ManuallyDrop;
use std::ops::Deref;
use std::ptr::{self, NonNull};
use std::sync::atomic::{self, AtomicU32, Ordering};

use super::registry::{Capabilities, Interface, InterfacePtr};
use super::{InterfaceId, Object};

/// Hard limit on concurrent owners; exceeding it means a leak loop somewhere.
const MAX_REF_COUNT: u32 = i32::MAX as u32;

#[repr(C)]
struct Header {
    count: AtomicU32,
    destroy: unsafe fn(NonNull<Header>),
    query: unsafe fn(NonNull<Header>, &InterfaceId) -> Option<InterfacePtr>,
}

// `header` must stay the first field: the header pointer is cast back to the box.
#[repr(C)]
struct RcBox<T> {
    header: Header,
    caps: Capabilities<T>,
    value: T,
}

/// Owning handle to a reference-counted engine object.
///
/// Cloning adds an owner, dropping removes one. The owner whose release takes
/// the count to zero destroys the object, synchronously, exactly once.
pub struct RefPtr<T: ?Sized> {
    header: NonNull<Header>,
    ptr: NonNull<T>,
    _marker: PhantomData<T>,
}

// SAFETY: the count is atomic and the pointee is only reachable through `&T`.
unsafe impl<T: ?Sized + Send + Sync> Send for RefPtr<T> {}
unsafe impl<T: ?Sized + Send + Sync> Sync for RefPtr<T> {}

impl<T: Object> RefPtr<T> {
    /// Creates an object that only answers queries for the base object identity.
    pub fn new(value: T) -> Self {
        Self::with_capabilities(value, Capabilities::new())
    }

    /// Creates an object with one owner (the returned handle) and the given
    /// capability registry.
    pub fn with_capabilities(value: T, caps: Capabilities<T>) -> Self {
        let boxed = Box::new(RcBox {
            header: Header {
                count: AtomicU32::new(1),
                destroy: destroy::<T>,
                query: query::<T>,
            },
            caps,
            value,
        });
        let raw = NonNull::from(Box::leak(boxed));
        // SAFETY: `raw` is a live, exclusively owned allocation.
        unsafe { Self::from_box(raw) }
    }

    /// Builds a handle for an allocation whose count was already incremented
    /// on behalf of the caller.
    unsafe fn from_box(raw: NonNull<RcBox<T>>) -> Self {
        let value = ptr::addr_of!((*raw.as_ptr()).value) as *mut T;
        RefPtr {
            header: raw.cast(),
            ptr: NonNull::new_unchecked(value),
            _marker: PhantomData,
        }
    }
}

impl<T: ?Sized> RefPtr<T> {
    fn header(&self) -> &Header {
        // SAFETY: the header lives as long as any owner does, and `self` is one.
        unsafe { self.header.as_ref() }
    }

    /// Adds an owner without creating a new handle and returns the new count.
    ///
    /// The count is informational: other threads may change it at any time.
    /// Every call must eventually be balanced by [`RefPtr::release`].
    pub fn add_ref(this: &Self) -> u32 {
        let old = this.header().count.fetch_add(1, Ordering::Relaxed);
        if old > MAX_REF_COUNT {
            std::process::abort();
        }
        old + 1
    }

    /// Removes an owner previously added with [`RefPtr::add_ref`] and returns the
    /// new count.
    ///
    /// # Safety
    /// Must balance an earlier `add_ref` on the same object. Releasing the
    /// reference held by a live handle destroys the object underneath it.
    pub unsafe fn release(this: &Self) -> u32 {
        release_raw(this.header)
    }

    /// Current number of owners. Racy by nature; use for diagnostics and tests.
    pub fn ref_count(this: &Self) -> u32 {
        this.header().count.load(Ordering::Acquire)
    }

    /// True when both handles own the same object, whatever views they hold.
    pub fn ptr_eq<U: ?Sized>(this: &Self, other: &RefPtr<U>) -> bool {
        this.header == other.header
    }

    /// Re-targets this handle at a view of the same object, keeping its owner slot.
    pub fn map<U: ?Sized>(this: Self, f: impl FnOnce(&T) -> &U) -> RefPtr<U> {
        let this = ManuallyDrop::new(this);
        let ptr = NonNull::from(f(&**this));
        RefPtr {
            header: this.header,
            ptr,
            _marker: PhantomData,
        }
    }

    /// Asks the object whether it satisfies `iid`.
    ///
    /// On success the result owns a new reference. Unsupported identities yield
    /// `None` and leave the count untouched. The caller's own reference keeps
    /// the count above zero for the whole lookup, so the increment can never
    /// revive an object a concurrent release is destroying.
    pub fn query_interface(&self, iid: &InterfaceId) -> Option<InterfacePtr> {
        // SAFETY: `self` keeps the allocation alive.
        unsafe { (self.header().query)(self.header, iid) }
    }

    /// Typed form of [`RefPtr::query_interface`].
    pub fn query<I: Interface + ?Sized>(&self) -> Option<RefPtr<I>> {
        self.query_interface(&I::IID)?.downcast::<I>().ok()
    }
}

impl<T: ?Sized> Clone for RefPtr<T> {
    fn clone(&self) -> Self {
        RefPtr::add_ref(self);
        RefPtr {
            header: self.header,
            ptr: self.ptr,
            _marker: PhantomData,
        }
    }
}

impl<T: ?Sized> Drop for RefPtr<T> {
    fn drop(&mut self) {
        // SAFETY: this handle owns exactly one reference.
        unsafe {
            release_raw(self.header);
        }
    }
}

impl<T: ?Sized> Deref for RefPtr<T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the pointee is kept alive by the reference this handle owns.
        unsafe { self.ptr.as_ref() }
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for RefPtr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}

unsafe fn release_raw(header: NonNull<Header>) -> u32 {
    let h = header.as_ref();
    let old = h.count.fetch_sub(1, Ordering::Release);
    debug_assert!(old > 0, "released an object with no owners");
    if old == 1 {
        // Pairs with the Release decrements of every other owner.
        atomic::fence(Ordering::Acquire);
        (h.destroy)(header);
    }
    old - 1
}

unsafe fn destroy<T: Object>(header: NonNull<Header>) {
    drop(Box::from_raw(header.cast::<RcBox<T>>().as_ptr()));
}

unsafe fn query<T: Object>(header: NonNull<Header>, iid: &InterfaceId) -> Option<InterfacePtr> {
    let raw = header.cast::<RcBox<T>>();
    let caps = &(*raw.as_ptr()).caps;
    let capability = caps.find(iid)?;
    header.as_ref().count.fetch_add(1, Ordering::Relaxed);
    Some(capability.cast(RefPtr::from_box(raw)))
}
