//! Fallible single-object heap allocation.
//!
//! `Box::new` aborts on allocation failure; slots and retire entries instead
//! surface [`Error::OutOfMemory`] to the caller, so they are allocated through
//! these helpers.

use core::ptr::NonNull;
use std::alloc::{alloc, dealloc, Layout};

use crate::error::Error;

/// Allocates `value` on the heap.
///
/// On failure the value is dropped and `Error::OutOfMemory` is returned.
pub(crate) fn try_box<T>(value: T) -> Result<NonNull<T>, Error> {
    let layout = Layout::new::<T>();
    debug_assert_ne!(layout.size(), 0);

    let Some(ptr) = NonNull::new(unsafe { alloc(layout) }.cast::<T>()) else {
        return Err(Error::OutOfMemory);
    };
    unsafe { ptr.as_ptr().write(value) };
    Ok(ptr)
}

/// Moves the value out of a `try_box` allocation and frees its storage.
///
/// # Safety
///
/// `ptr` must come from `try_box::<T>` and must not be used afterwards.
pub(crate) unsafe fn from_box<T>(ptr: NonNull<T>) -> T {
    let value = unsafe { ptr.as_ptr().read() };
    unsafe { dealloc(ptr.as_ptr().cast(), Layout::new::<T>()) };
    value
}

/// Drops the value in a `try_box` allocation and frees its storage.
///
/// # Safety
///
/// Same contract as [`from_box`].
pub(crate) unsafe fn drop_box<T>(ptr: NonNull<T>) {
    drop(unsafe { from_box(ptr) });
}
