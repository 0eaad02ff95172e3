//! Hazard slots, the grow-only slot pool, and the [`Shield`] lease.

use core::marker::PhantomData;
use core::ptr::{self, NonNull};

#[cfg(not(feature = "check-loom"))]
use core::sync::atomic::{fence, AtomicBool, AtomicPtr, AtomicUsize, Ordering};
#[cfg(feature = "check-loom")]
use loom::sync::atomic::{fence, AtomicBool, AtomicPtr, AtomicUsize, Ordering};

#[cfg(not(feature = "check-loom"))]
use crossbeam_utils::Backoff;
use crossbeam_utils::CachePadded;
use log::trace;

use crate::boxed;
use crate::error::Error;

/// One protection channel: a single-writer slot publishing the address its
/// current owner promises to keep alive.
#[derive(Debug)]
pub(crate) struct HazardSlot {
    /// Machine representation of the protected address; zero when the owner
    /// is not protecting anything. Written only by the owning shield while
    /// `active` is set, read by every scanning thread.
    hazard: AtomicUsize,
    /// Whether a shield currently owns this slot.
    active: AtomicBool,
    /// Forward link in the slot list. Immutable once the slot is published.
    next: *const HazardSlot,
}

// Slots are reached through raw `next` links from any thread.
unsafe impl Send for HazardSlot {}
unsafe impl Sync for HazardSlot {}

impl HazardSlot {
    /// A fresh slot, born owned by the shield that is about to push it.
    fn new(next: *const HazardSlot) -> Self {
        Self {
            hazard: AtomicUsize::new(0),
            active: AtomicBool::new(true),
            next,
        }
    }

    /// Tries to take ownership of this slot.
    fn try_acquire(&self) -> bool {
        self.active
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    /// Returns the slot to the pool. The slot stays linked.
    fn release(&self) {
        self.active.store(false, Ordering::Release);
    }
}

/// Grow-only, lock-free list of hazard slots.
///
/// Slots are allocated on first demand and never unlinked before the bag is
/// dropped; releasing a shield only clears its slot's `active` flag so a later
/// shield can recycle it. Removal would need a reclamation scheme of its own,
/// which is the problem this crate exists to solve, so scanners may traverse
/// the list with nothing more than an acquire head load and per-slot reads.
/// The list length is bounded by the peak number of simultaneously held
/// shields.
#[derive(Debug)]
pub(crate) struct HazardBag {
    head: CachePadded<AtomicPtr<HazardSlot>>,
}

impl HazardBag {
    /// Creates an empty slot pool.
    pub(crate) fn new() -> Self {
        Self {
            head: CachePadded::new(AtomicPtr::new(ptr::null_mut())),
        }
    }

    /// Acquires a slot, either by recycling an inactive one or by pushing a
    /// newly allocated slot onto the list.
    pub(crate) fn acquire_slot(&self) -> Result<&HazardSlot, Error> {
        if let Some(slot) = self.try_acquire_inactive() {
            return Ok(slot);
        }

        let head = self.head.load(Ordering::Acquire);
        let new = boxed::try_box(HazardSlot::new(head))?;
        trace!("no inactive hazard slot, growing the list");

        let mut expected = head;
        loop {
            match self.head.compare_exchange_weak(
                expected,
                new.as_ptr(),
                Ordering::Release,
                Ordering::Relaxed,
            ) {
                // SAFETY: the slot is now linked and lives until `self` drops.
                Ok(_) => return Ok(unsafe { &*new.as_ptr() }),
                Err(head) => {
                    // SAFETY: the CAS failed, so the slot is still unpublished
                    // and ours to rewire.
                    unsafe { (*new.as_ptr()).next = head };
                    expected = head;
                }
            }
        }
    }

    /// Finds an inactive slot and activates it.
    fn try_acquire_inactive(&self) -> Option<&HazardSlot> {
        let mut cur = self.head.load(Ordering::Acquire);
        // SAFETY: every linked slot stays valid for the bag's lifetime, and
        // `next` is immutable after the release-CAS that published the slot.
        while let Some(slot) = unsafe { cur.as_ref() } {
            if slot.try_acquire() {
                return Some(slot);
            }
            cur = slot.next.cast_mut();
        }
        None
    }

    /// Returns whether any slot currently publishes `addr`.
    ///
    /// Re-reads every slot with an acquire load on each call, so a
    /// publication fenced before the caller's scan is always observed.
    pub(crate) fn protects(&self, addr: usize) -> bool {
        let mut cur = self.head.load(Ordering::Acquire);
        // SAFETY: as in `try_acquire_inactive`.
        while let Some(slot) = unsafe { cur.as_ref() } {
            if slot.hazard.load(Ordering::Acquire) == addr {
                return true;
            }
            cur = slot.next.cast_mut();
        }
        false
    }
}

impl Drop for HazardBag {
    fn drop(&mut self) {
        // Shields borrow their domain, so none are alive by now.
        let mut cur = self.head.load(Ordering::Relaxed);
        while let Some(slot) = NonNull::new(cur) {
            // SAFETY: slots are allocated by `acquire_slot` and freed only
            // here, exactly once.
            cur = unsafe { slot.as_ref() }.next.cast_mut();
            unsafe { boxed::drop_box(slot) };
        }
    }
}

/// A scoped lease of one hazard slot.
///
/// While a shield holds a slot, [`protect`](Shield::protect) publishes the
/// address it validated against a source pointer, and every reclamation scan
/// of the owning [`Domain`](crate::Domain) defers freeing that address.
/// Dropping the shield clears the publication and returns the slot to the
/// pool.
///
/// Shields are movable but neither clonable nor shareable across threads: a
/// slot accepts writes from exactly one owner at a time.
#[derive(Debug)]
pub struct Shield<'dom> {
    slot: &'dom HazardSlot,
    _marker: PhantomData<*mut ()>, // !Send + !Sync
}

impl<'dom> Shield<'dom> {
    pub(crate) fn new(slot: &'dom HazardSlot) -> Self {
        Self {
            slot,
            _marker: PhantomData,
        }
    }

    /// Tries to protect `*pointer`.
    ///
    /// Publishes `*pointer` in the slot, then revalidates `src`. On a
    /// mismatch the slot is cleared, `*pointer` is updated to the latest
    /// observed value, and `false` is returned.
    pub fn try_protect<T>(&mut self, pointer: &mut *mut T, src: &AtomicPtr<T>) -> bool {
        self.slot.hazard.store(*pointer as usize, Ordering::Release);

        // Orders the publication above before the validation below. Pairs
        // with the fence between the retire-list detach and the slot reads of
        // a scan: one of the two sides always observes the other.
        fence(Ordering::SeqCst);

        let cur = src.load(Ordering::Acquire);
        if cur == *pointer {
            return true;
        }

        self.slot.hazard.store(0, Ordering::Release);
        *pointer = cur;
        false
    }

    /// Protects the pointer read from `src` and returns it.
    ///
    /// Restarts until a validation succeeds, so a source that does not change
    /// returns on the first iteration. Until the shield is dropped,
    /// [`unprotect`](Shield::unprotect)ed, or re-protected, no scan of the
    /// owning domain frees the returned address, which makes dereferencing it
    /// sound as long as every writer retires through that domain.
    pub fn protect<T>(&mut self, src: &AtomicPtr<T>) -> *mut T {
        #[cfg(not(feature = "check-loom"))]
        let backoff = Backoff::new();

        let mut pointer = src.load(Ordering::Relaxed);
        while !self.try_protect(&mut pointer, src) {
            #[cfg(not(feature = "check-loom"))]
            backoff.snooze();
            #[cfg(feature = "check-loom")]
            loom::thread::yield_now();
        }
        pointer
    }

    /// Stops protecting. Idempotent.
    pub fn unprotect(&mut self) {
        self.slot.hazard.store(0, Ordering::Release);
    }
}

impl Drop for Shield<'_> {
    fn drop(&mut self) {
        // Clear the publication before releasing the slot: the next owner
        // must not inherit a stale protection.
        self.unprotect();
        self.slot.release();
    }
}
