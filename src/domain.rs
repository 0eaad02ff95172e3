//! The domain façade: one slot pool, one retire list, one reclaim threshold.

use crate::error::Error;
use crate::hazard::{HazardBag, Shield};
use crate::retire::RetiredList;

/// An isolated instance of the hazard-pointer scheme.
///
/// A domain owns its own hazard slots and its own retire list: reclamation
/// scans consult only the domain's slots, and retirements never migrate
/// between domains. Embed a domain in a lock-free structure as a plain field
/// and route every protection and retirement of that structure through it.
///
/// Dropping the domain runs every remaining deleter unconditionally — by then
/// no shield can be alive, since shields borrow the domain — and then frees
/// the slot list.
///
/// # Example
///
/// ```
/// use hazptr::Domain;
///
/// let domain = Domain::new(0); // scan on every retire
/// let ptr = Box::into_raw(Box::new("node"));
/// unsafe { domain.retire(ptr) }.unwrap();
/// ```
#[derive(Debug)]
pub struct Domain {
    /// Declared before `hazards`: teardown runs the deleters while the slot
    /// list is still intact.
    retired: RetiredList,
    hazards: HazardBag,
    reclaim_level: u32,
}

impl Default for Domain {
    fn default() -> Self {
        Self::new(Self::DEFAULT_RECLAIM_LEVEL)
    }
}

impl Domain {
    /// The reclaim level of [`Domain::default`].
    pub const DEFAULT_RECLAIM_LEVEL: u32 = 1000;

    /// Creates a domain with an empty slot pool and an empty retire list.
    ///
    /// A retire that finds at least `reclaim_level` entries already queued
    /// runs a reclamation scan before returning. Zero scans on every retire,
    /// which suits tests and near-empty structures; levels in the 64–1024
    /// range amortize scan cost across many retirements.
    pub fn new(reclaim_level: u32) -> Self {
        Self {
            retired: RetiredList::new(),
            hazards: HazardBag::new(),
            reclaim_level,
        }
    }

    /// Leases a hazard slot, growing the slot pool if every slot is taken.
    ///
    /// # Errors
    ///
    /// [`Error::OutOfMemory`] if the pool had to grow and the slot allocation
    /// failed.
    pub fn make_hazard(&self) -> Result<Shield<'_>, Error> {
        Ok(Shield::new(self.hazards.acquire_slot()?))
    }

    /// Retires `ptr`, to be freed with its `Box` destructor once no shield
    /// protects it.
    ///
    /// Equivalent to [`retire_with`](Domain::retire_with) with a deleter that
    /// drops `Box::from_raw(ptr)`. A null `ptr` is accepted; its deleter
    /// frees nothing.
    ///
    /// # Errors
    ///
    /// [`Error::OutOfMemory`] if the entry allocation failed; ownership of
    /// `ptr` then stays with the caller.
    ///
    /// # Safety
    ///
    /// `ptr` must have been allocated by `Box<T>` (or be null), must no
    /// longer be reachable for new readers of this domain, and must not be
    /// retired again.
    pub unsafe fn retire<T: Send>(&self, ptr: *mut T) -> Result<(), Error> {
        let addr = ptr as usize;
        let deleter = move || {
            if addr != 0 {
                // SAFETY: the address came from `Box<T>` and nothing else
                // frees it.
                drop(unsafe { Box::from_raw(addr as *mut T) });
            }
        };
        // SAFETY: contract forwarded from the caller; the deleter runs at
        // most once and does not unwind (`Box` drop of a `Send` pointee).
        unsafe { self.retire_with(ptr, deleter) }
    }

    /// Retires `ptr` with a custom deleter.
    ///
    /// The deleter runs exactly once — during some later scan, once no shield
    /// of this domain protects `ptr`'s address, or at domain drop — on
    /// whichever thread triggered that. If this push found at least
    /// `reclaim_level` entries already queued, one scan runs before the call
    /// returns.
    ///
    /// # Errors
    ///
    /// [`Error::OutOfMemory`] if the entry allocation failed. The deleter is
    /// dropped without running and ownership of `ptr` stays with the caller.
    ///
    /// # Safety
    ///
    /// - `ptr` must no longer be reachable for new readers of this domain and
    ///   must not be retired again.
    /// - `deleter` must fully destroy whatever `ptr` refers to, must not
    ///   unwind, must not touch this domain, and everything it captures must
    ///   stay valid until the domain is dropped.
    pub unsafe fn retire_with<T, F>(&self, ptr: *mut T, deleter: F) -> Result<(), Error>
    where
        F: FnOnce() + Send,
    {
        let prev = self.retired.retire(ptr as usize, deleter)?;
        if prev >= self.reclaim_level as usize {
            self.collect();
        }
        Ok(())
    }

    /// Runs one reclamation scan now.
    ///
    /// Frees every retired pointer whose address no slot currently publishes.
    /// The filter re-reads the slot list for each retiree (a streaming scan),
    /// so a protection published before the scan's fence is never missed; the
    /// cost is `O(retired × slots)`, which the reclaim level keeps amortized.
    pub fn collect(&self) {
        self.retired.collect(|addr| self.hazards.protects(addr));
    }
}

#[cfg(all(test, not(feature = "check-loom")))]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::Domain;

    #[test]
    fn collect_on_empty_domain() {
        let domain = Domain::default();
        domain.collect();
        domain.collect();
    }

    #[test]
    fn retire_below_level_defers() {
        let freed = AtomicUsize::new(0);
        let domain = Domain::new(100);

        let ptr = Box::into_raw(Box::new(1u64));
        let addr = ptr as usize;
        let freed = &freed;
        let deleter = move || {
            drop(unsafe { Box::from_raw(addr as *mut u64) });
            freed.fetch_add(1, Ordering::Relaxed);
        };
        unsafe { domain.retire_with(ptr, deleter) }.unwrap();
        assert_eq!(freed.load(Ordering::Relaxed), 0);

        domain.collect();
        assert_eq!(freed.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn level_zero_scans_every_retire() {
        let freed = AtomicUsize::new(0);
        let domain = Domain::new(0);

        let freed = &freed;
        for i in 0..10 {
            let ptr = Box::into_raw(Box::new(0u8));
            let addr = ptr as usize;
            let deleter = move || {
                drop(unsafe { Box::from_raw(addr as *mut u8) });
                freed.fetch_add(1, Ordering::Relaxed);
            };
            unsafe { domain.retire_with(ptr, deleter) }.unwrap();
            assert_eq!(freed.load(Ordering::Relaxed), i + 1);
        }
    }
}
