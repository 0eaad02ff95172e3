//! Hazard pointers.
//!
//! A [`Domain`] is an isolated instance of the hazard-pointer scheme: it owns a
//! grow-only list of hazard slots and a list of retired pointers, and it frees a
//! retired pointer only once no slot in the same domain protects its address.
//! Readers lease a slot through [`Domain::make_hazard`] and publish the address
//! they are about to dereference; writers unlink a node from their data
//! structure and hand it to [`Domain::retire`] together with a deleter.
//!
//! # Example
//!
//! ```
//! use std::ptr;
//! use std::sync::atomic::{AtomicPtr, Ordering};
//!
//! use hazptr::Domain;
//!
//! let domain = Domain::default();
//! let src = AtomicPtr::new(Box::into_raw(Box::new(1)));
//!
//! let mut shield = domain.make_hazard().unwrap();
//! let ptr = shield.protect(&src);
//! assert_eq!(unsafe { *ptr }, 1);
//!
//! // Unlink the block, then retire it.
//! src.store(ptr::null_mut(), Ordering::Relaxed);
//! unsafe { domain.retire(ptr) }.unwrap();
//!
//! // The block is freed by a later scan, once no shield protects it.
//! drop(shield);
//! domain.collect();
//! ```
//!
//! # Algorithm and synchronization
//!
//! Suppose a data structure holds a block `b`. Thread `R` wants to read `b`
//! while thread `W` wants to unlink `b` and free its memory. The library makes
//! this safe with the following protocol:
//!
//! ```text
//! (R1) publish b's address in a hazard slot   | (W1) unlink b, push it on the retire list
//! (R2) validate that b is still reachable;    | (W2) scan the hazard slots;
//!      if so, dereference b                   |      free b if no slot publishes it
//! (R3) clear the slot                         |
//! ```
//!
//! Under sequential consistency the protocol is safe: if `R3` precedes `W2`,
//! all of `R`'s accesses are over before the free; otherwise either `R1`
//! precedes `W2` (the scan sees the publication and keeps `b`) or `W1` precedes
//! `R2` (validation fails and `R` restarts without dereferencing).
//!
//! Under the actual memory model, release/acquire pairs alone cannot rule out
//! the interleaving where `R2` misses `W1`'s unlink *and* `W2` misses `R1`'s
//! publication at the same time, which is exactly a use-after-free. The
//! implementation therefore places a `SeqCst` fence between publication and
//! validation ([`Shield::try_protect`]) and another between the retire-list
//! detach and the slot reads of a scan. The fences are totally ordered, so one
//! of the two sides always observes the other: either the scan sees the
//! published address, or the validation sees the unlink and restarts.
//!
//! All slot and retire-list links are published with release stores (or
//! release CAS) and traversed with acquire loads; slots themselves are never
//! unlinked until the domain is dropped, which is what makes scan-time
//! traversal safe without a second reclamation scheme underneath.

#![warn(missing_docs, missing_debug_implementations)]
#![deny(unsafe_op_in_unsafe_fn)]

mod boxed;
mod domain;
mod error;
mod hazard;
mod retire;

pub use domain::Domain;
pub use error::Error;
pub use hazard::Shield;
