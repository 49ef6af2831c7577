//! Shareability gate.
//!
//! A payload handed to a [`Cleaner`](crate::Cleaner) travels to the cleanup
//! thread, so it must be safe to read from a thread other than the one that
//! created it. `Send` covers the part of that contract the compiler can see;
//! [`Shareable`] covers values that are `Send` by type but confined to their
//! creator by convention, such as [`Confined`].
use std::{
    fmt::{self, Debug, Formatter},
    ops::Deref,
    sync::{Arc, Weak},
    thread::{self, ThreadId},
};

/// Answers whether a value may be handed to another thread.
pub trait Shareable {
    fn is_shareable(&self) -> bool;
}

macro_rules! always_shareable {
    ($($t:ty),* $(,)?) => {
        $(
            impl Shareable for $t {
                #[inline]
                fn is_shareable(&self) -> bool {
                    true
                }
            }
        )*
    };
}

always_shareable!(
    (), bool, char, u8, u16, u32, u64, u128, usize, i8, i16, i32, i64, i128, isize, f32, f64,
    String, &'static str, NativePtr,
);

impl<T: Shareable> Shareable for Option<T> {
    fn is_shareable(&self) -> bool {
        self.as_ref().map_or(true, Shareable::is_shareable)
    }
}

impl<T: Shareable + ?Sized> Shareable for Box<T> {
    fn is_shareable(&self) -> bool {
        (**self).is_shareable()
    }
}

impl<T: Shareable> Shareable for Vec<T> {
    fn is_shareable(&self) -> bool {
        self.iter().all(Shareable::is_shareable)
    }
}

impl<A: Shareable, B: Shareable> Shareable for (A, B) {
    fn is_shareable(&self) -> bool {
        self.0.is_shareable() && self.1.is_shareable()
    }
}

impl<A: Shareable, B: Shareable, C: Shareable> Shareable for (A, B, C) {
    fn is_shareable(&self) -> bool {
        self.0.is_shareable() && self.1.is_shareable() && self.2.is_shareable()
    }
}

/// A function pointer carries no state.
impl<T> Shareable for fn(T) {
    fn is_shareable(&self) -> bool {
        true
    }
}

/// Anything behind an `Arc` that is `Sync` can be read from any thread.
impl<T: Send + Sync + ?Sized> Shareable for Arc<T> {
    fn is_shareable(&self) -> bool {
        true
    }
}

/// A raw native address carried as a plain integer.
///
/// The cleaner never dereferences it; releasing whatever it points to is the
/// job of the cleanup callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct NativePtr(usize);

impl NativePtr {
    pub const NULL: NativePtr = NativePtr(0);

    pub const fn new(address: usize) -> Self {
        Self(address)
    }

    pub fn from_ptr<T>(ptr: *const T) -> Self {
        Self(ptr as usize)
    }

    pub const fn address(self) -> usize {
        self.0
    }

    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    pub const fn offset(self, bytes: usize) -> Self {
        Self(self.0.wrapping_add(bytes))
    }

    pub fn as_ptr<T>(self) -> *const T {
        self.0 as *const T
    }
}

/// An immutable value shared between threads.
///
/// Freezing moves the value behind an `Arc`; there is no way back to a
/// mutable view, so every holder observes the same contents.
pub struct Frozen<T: ?Sized>(Arc<T>);

impl<T> Frozen<T> {
    pub fn new(value: T) -> Self {
        Self(Arc::new(value))
    }
}

impl<T: ?Sized> Frozen<T> {
    /// A weak observer that does not keep the value alive.
    pub fn downgrade(this: &Self) -> Weak<T> {
        Arc::downgrade(&this.0)
    }

    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.0, &b.0)
    }
}

impl<T: ?Sized> Clone for Frozen<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<T: ?Sized> Deref for Frozen<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T: Debug + ?Sized> Debug for Frozen<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Frozen").field(&&*self.0).finish()
    }
}

impl<T: Send + Sync + ?Sized> Shareable for Frozen<T> {
    fn is_shareable(&self) -> bool {
        true
    }
}

/// A value that belongs to the thread that created it.
///
/// The value can only be reached from the owning thread. It may still be
/// moved between threads as an opaque box, but the gate rejects it as a
/// cleaner payload.
pub struct Confined<T> {
    owner: ThreadId,
    value: T,
}

impl<T> Confined<T> {
    pub fn new(value: T) -> Self {
        Self {
            owner: thread::current().id(),
            value,
        }
    }

    pub fn owner(&self) -> ThreadId {
        self.owner
    }

    pub fn get(&self) -> Option<&T> {
        (thread::current().id() == self.owner).then_some(&self.value)
    }

    pub fn get_mut(&mut self) -> Option<&mut T> {
        (thread::current().id() == self.owner).then_some(&mut self.value)
    }
}

impl<T> Debug for Confined<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Confined")
            .field("owner", &self.owner)
            .finish_non_exhaustive()
    }
}

impl<T> Shareable for Confined<T> {
    fn is_shareable(&self) -> bool {
        false
    }
}
