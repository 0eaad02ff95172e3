//! Loom models of the core races.
//!
//! Run with `cargo test --features check-loom --test loom --release`.

#![cfg(feature = "check-loom")]

use loom::sync::atomic::{AtomicBool, AtomicPtr, AtomicUsize, Ordering};
use loom::sync::Arc;
use loom::thread;

use hazptr::Domain;

// The canonical race: a reader publishing a protection while a writer unlinks
// and retires the same address. Either the reader restarts (and never
// dereferences), or every scan keeps the address until the shield goes away.
#[test]
fn protect_versus_retire() {
    loom::model(|| {
        let freed = Arc::new(AtomicBool::new(false));
        let domain = Arc::new(Domain::new(0));
        let target = Box::into_raw(Box::new(1u32));
        let src = Arc::new(AtomicPtr::new(target));

        let reader = {
            let domain = Arc::clone(&domain);
            let src = Arc::clone(&src);
            let freed = Arc::clone(&freed);
            thread::spawn(move || {
                let mut shield = domain.make_hazard().unwrap();
                let ptr = shield.protect(&src);
                if !ptr.is_null() {
                    // Protected: the deleter cannot have run.
                    assert!(!freed.load(Ordering::SeqCst));
                    assert_eq!(unsafe { *ptr }, 1);
                }
            })
        };

        let writer = {
            let domain = Arc::clone(&domain);
            let src = Arc::clone(&src);
            let freed = Arc::clone(&freed);
            thread::spawn(move || {
                let ptr = src.swap(std::ptr::null_mut(), Ordering::AcqRel);
                let addr = ptr as usize;
                let deleter = move || {
                    drop(unsafe { Box::from_raw(addr as *mut u32) });
                    freed.store(true, Ordering::SeqCst);
                };
                unsafe { domain.retire_with(ptr, deleter) }.unwrap();
            })
        };

        reader.join().unwrap();
        writer.join().unwrap();
    });
}

// Concurrent retires into one domain, then teardown: every deleter runs
// exactly once.
#[test]
fn concurrent_retires_then_teardown() {
    loom::model(|| {
        let freed = Arc::new(AtomicUsize::new(0));
        let domain = Arc::new(Domain::new(u32::MAX)); // never scan

        let handles = (0..2)
            .map(|_| {
                let domain = Arc::clone(&domain);
                let freed = Arc::clone(&freed);
                thread::spawn(move || {
                    let ptr = Box::into_raw(Box::new(0u64));
                    let addr = ptr as usize;
                    let deleter = move || {
                        drop(unsafe { Box::from_raw(addr as *mut u64) });
                        freed.fetch_add(1, Ordering::SeqCst);
                    };
                    unsafe { domain.retire_with(ptr, deleter) }.unwrap();
                })
            })
            .collect::<Vec<_>>();
        for handle in handles {
            handle.join().unwrap();
        }

        drop(domain);
        assert_eq!(freed.load(Ordering::SeqCst), 2);
    });
}

// Two shields acquired concurrently never share a slot: both publications are
// simultaneously visible to a scan.
#[test]
fn concurrent_shields_get_distinct_slots() {
    loom::model(|| {
        let freed = Arc::new(AtomicUsize::new(0));
        let domain = Arc::new(Domain::new(0));

        let handles = (0..2)
            .map(|i| {
                let domain = Arc::clone(&domain);
                let freed = Arc::clone(&freed);
                thread::spawn(move || {
                    let target = Box::into_raw(Box::new(i as u64));
                    let src = AtomicPtr::new(target);
                    let mut shield = domain.make_hazard().unwrap();
                    let ptr = shield.protect(&src);
                    assert_eq!(ptr, target);

                    // Retire while protected by ourselves: any scan, ours or
                    // the peer's, must keep this entry while the shield lives.
                    let my_freed = Arc::new(AtomicBool::new(false));
                    let addr = ptr as usize;
                    let deleter = {
                        let my_freed = Arc::clone(&my_freed);
                        let freed = Arc::clone(&freed);
                        move || {
                            drop(unsafe { Box::from_raw(addr as *mut u64) });
                            my_freed.store(true, Ordering::SeqCst);
                            freed.fetch_add(1, Ordering::SeqCst);
                        }
                    };
                    unsafe { domain.retire_with(ptr, deleter) }.unwrap();
                    assert_eq!(unsafe { *ptr }, i as u64);
                    assert!(!my_freed.load(Ordering::SeqCst));
                })
            })
            .collect::<Vec<_>>();
        for handle in handles {
            handle.join().unwrap();
        }

        drop(domain);
        assert_eq!(freed.load(Ordering::SeqCst), 2);
    });
}
