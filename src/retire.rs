//! The retire list: a lock-free stack of type-erased retired pointers.

use core::ptr::{self, NonNull};

#[cfg(not(feature = "check-loom"))]
use core::sync::atomic::{fence, AtomicPtr, AtomicUsize, Ordering};
#[cfg(feature = "check-loom")]
use loom::sync::atomic::{fence, AtomicPtr, AtomicUsize, Ordering};

use crossbeam_utils::CachePadded;
use log::trace;

use crate::boxed;
use crate::error::Error;

/// Header of a retire entry.
///
/// The entry is deliberately not generic over the retired type: one domain
/// serves heterogeneous nodes, so the address is kept as a machine word and
/// the typed deleter lives behind `free`, in the same allocation
/// (`Entry<F>`).
pub(crate) struct Retired {
    /// Next entry in the stack. Written before publication and while spliced
    /// during a scan, both times while the entry is unreachable from other
    /// threads.
    next: *mut Retired,
    /// Machine representation of the retired address.
    addr: usize,
    /// Runs the deleter and frees the whole entry.
    free: unsafe fn(NonNull<Retired>),
}

#[repr(C)]
struct Entry<F> {
    retired: Retired,
    deleter: F,
}

/// Runs the deleter carried by `entry` and frees the entry's storage.
///
/// # Safety
///
/// `entry` must head an `Entry<F>` allocated by [`RetiredList::retire`] and
/// must not be referenced again.
unsafe fn free_entry<F: FnOnce()>(entry: NonNull<Retired>) {
    let entry = unsafe { boxed::from_box::<Entry<F>>(entry.cast()) };
    (entry.deleter)();
}

/// Lock-free stack of retire entries with an approximate length.
///
/// The count only drives scan triggering. It is reset at the start of a scan
/// and re-incremented for the entries that survive, so concurrent pushes can
/// make it lag the true length in either direction; it is never used for
/// correctness.
#[derive(Debug)]
pub(crate) struct RetiredList {
    head: CachePadded<AtomicPtr<Retired>>,
    count: CachePadded<AtomicUsize>,
}

impl RetiredList {
    /// Creates an empty retire list.
    pub(crate) fn new() -> Self {
        Self {
            head: CachePadded::new(AtomicPtr::new(ptr::null_mut())),
            count: CachePadded::new(AtomicUsize::new(0)),
        }
    }

    /// Pushes a retired address and its deleter, returning the previous
    /// approximate length.
    ///
    /// On allocation failure nothing is pushed; the deleter is dropped
    /// without running.
    pub(crate) fn retire<F>(&self, addr: usize, deleter: F) -> Result<usize, Error>
    where
        F: FnOnce() + Send,
    {
        let entry = boxed::try_box(Entry {
            retired: Retired {
                next: self.head.load(Ordering::Acquire),
                addr,
                free: free_entry::<F>,
            },
            deleter,
        })?;
        let entry = entry.cast::<Retired>();

        // SAFETY: the entry is ours until the CAS publishes it.
        let mut expected = unsafe { entry.as_ref() }.next;
        while let Err(head) = self.head.compare_exchange_weak(
            expected,
            entry.as_ptr(),
            Ordering::Release,
            Ordering::Relaxed,
        ) {
            // SAFETY: the CAS failed, so the entry is still unpublished.
            unsafe { (*entry.as_ptr()).next = head };
            expected = head;
        }

        Ok(self.count.fetch_add(1, Ordering::Relaxed))
    }

    /// Detaches the whole list, frees every entry whose address the filter
    /// does not report as hazardous, and splices the survivors back.
    ///
    /// Keeping an entry is always allowed, so the filter may err towards
    /// `true`; freeing a protected entry is what it must never do. Concurrent
    /// scans are harmless: each operates on the disjoint sublist its `swap`
    /// detached.
    pub(crate) fn collect(&self, is_hazard: impl Fn(usize) -> bool) {
        self.count.store(0, Ordering::Relaxed);
        let mut cur = self.head.swap(ptr::null_mut(), Ordering::Acquire);

        // Orders the detach above before the slot reads inside `is_hazard`.
        // Pairs with the fence between publication and validation in
        // `Shield::try_protect`: a reader whose publication this scan misses
        // cannot have validated against the structure this scan's caller
        // already unlinked from.
        fence(Ordering::SeqCst);

        let mut kept_head: *mut Retired = ptr::null_mut();
        let mut kept_tail: *mut Retired = ptr::null_mut();
        let mut kept = 0usize;
        let mut freed = 0usize;

        while let Some(entry) = NonNull::new(cur) {
            // SAFETY: the detached sublist is exclusively ours.
            cur = unsafe { entry.as_ref() }.next;
            if is_hazard(unsafe { entry.as_ref() }.addr) {
                // SAFETY: still detached; relink into the kept sublist.
                unsafe { (*entry.as_ptr()).next = kept_head };
                kept_head = entry.as_ptr();
                if kept_tail.is_null() {
                    kept_tail = entry.as_ptr();
                }
                kept += 1;
            } else {
                // SAFETY: the entry is detached and unprotected, so its
                // deleter may run now; `free` consumes the entry.
                unsafe { (entry.as_ref().free)(entry) };
                freed += 1;
            }
        }

        if !kept_head.is_null() {
            let mut expected = self.head.load(Ordering::Relaxed);
            loop {
                // SAFETY: the kept sublist stays ours until the CAS succeeds.
                unsafe { (*kept_tail).next = expected };
                match self.head.compare_exchange_weak(
                    expected,
                    kept_head,
                    Ordering::Release,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => break,
                    Err(head) => expected = head,
                }
            }
            self.count.fetch_add(kept, Ordering::Relaxed);
        }

        trace!("reclamation scan freed {freed} entries, kept {kept}");
    }
}

impl Drop for RetiredList {
    fn drop(&mut self) {
        // Domain teardown: no reader can hold a protection any more, so every
        // remaining deleter runs unconditionally.
        let mut cur = self.head.load(Ordering::Relaxed);
        while let Some(entry) = NonNull::new(cur) {
            cur = unsafe { entry.as_ref() }.next;
            // SAFETY: entries are freed exactly once, here or during a scan.
            unsafe { (entry.as_ref().free)(entry) };
        }
    }
}
