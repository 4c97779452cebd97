//! Handle allocator (component A).
//!
//! Mints and recycles [`BufferHandle`]s. The slot counter follows the
//! reference kernel's `ProcessId::new` pattern (a monotonic `AtomicU64`
//! wrapped down to the 24-bit slot space here); retired slots are pushed
//! onto a LIFO free list and preferred over minting a fresh slot, mirroring
//! the old kernel's `HandleTable` reuse discipline. Every mint — fresh or
//! recycled — draws a new random `key`, so a stale holder of a retired
//! handle can never collide with whoever gets the slot next.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, Ordering};

use dmabuf_abi::{BufferHandle, VmId};

use crate::error::{Error, Result};

/// Source of cryptographically-random words for handle `key`s. Injected
/// so this crate never depends on a specific RNG/entropy source.
pub trait Rng: Send + Sync {
    fn next_u32(&self) -> u32;
}

impl Rng for Box<dyn Rng> {
    fn next_u32(&self) -> u32 {
        (**self).next_u32()
    }
}

pub struct HandleAllocator<R: Rng> {
    origin: VmId,
    max_slots: u32,
    next_slot: AtomicU32,
    free_list: spinning_top::Spinlock<Vec<u32>>,
    rng: R,
}

impl<R: Rng> HandleAllocator<R> {
    pub fn new(origin: VmId, max_slots: u32, rng: R) -> Self {
        Self {
            origin,
            max_slots,
            next_slot: AtomicU32::new(0),
            free_list: spinning_top::Spinlock::new(Vec::new()),
            rng,
        }
    }

    /// Mint a fresh handle, preferring a recycled slot.
    pub fn mint(&self) -> Result<BufferHandle> {
        let slot = if let Some(slot) = self.free_list.lock().pop() {
            slot
        } else {
            let slot = self.next_slot.fetch_add(1, Ordering::Relaxed);
            if slot >= self.max_slots {
                // Undo: we've permanently burned this counter value, but
                // since max_slots bounds the space anyway this just means
                // the allocator is exhausted from here on.
                return Err(Error::Exhausted);
            }
            slot
        };

        let id = BufferHandle::make_id(self.origin, slot).ok_or(Error::Exhausted)?;
        let key = [self.rng.next_u32(), self.rng.next_u32(), self.rng.next_u32()];
        Ok(BufferHandle { id, key })
    }

    /// Return a slot to the free list. Caller must guarantee the slot is
    /// otherwise unreferenced (no `ExportedBuffer` anywhere still names
    /// it) — the allocator itself does not check liveness; the registry
    /// does, by requiring full-tuple equality on lookup.
    pub fn retire(&self, handle: BufferHandle) {
        if handle.origin_vm() != self.origin {
            return;
        }
        self.free_list.lock().push(handle.slot());
    }
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;
    use core::sync::atomic::AtomicU32 as StdAtomicU32;

    struct CountingRng(StdAtomicU32);
    impl Rng for CountingRng {
        fn next_u32(&self) -> u32 {
            self.0.fetch_add(1, Ordering::Relaxed)
        }
    }

    #[test]
    fn mints_distinct_slots() {
        let alloc = HandleAllocator::new(VmId(1), 4, CountingRng(StdAtomicU32::new(0)));
        let a = alloc.mint().unwrap();
        let b = alloc.mint().unwrap();
        assert_ne!(a.id, b.id);
        assert_eq!(a.origin_vm(), VmId(1));
    }

    #[test]
    fn exhaustion_returns_error() {
        let alloc = HandleAllocator::new(VmId(0), 2, CountingRng(StdAtomicU32::new(0)));
        alloc.mint().unwrap();
        alloc.mint().unwrap();
        assert_eq!(alloc.mint(), Err(Error::Exhausted));
    }

    #[test]
    fn retired_slot_recycled_with_fresh_key() {
        let alloc = HandleAllocator::new(VmId(0), 1, CountingRng(StdAtomicU32::new(0)));
        let first = alloc.mint().unwrap();
        assert_eq!(alloc.mint(), Err(Error::Exhausted));
        alloc.retire(first);
        let second = alloc.mint().unwrap();
        assert_eq!(first.id, second.id);
        assert_ne!(first.key, second.key);
    }
}
