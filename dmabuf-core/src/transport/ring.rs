//! Shared-page producer/consumer ring.
//!
//! One physical ring carries both directions the way Xen's classic
//! block-ring protocol does: a front side publishes a request into a
//! slot and advances `req_prod`; a back side consumes it, processes it,
//! overwrites the *same* slot with the response, and advances
//! `rsp_prod`; the front side then consumes the response and advances
//! `rsp_cons`. A slot cannot be reused for a new request until its prior
//! response has been consumed, so the ring never overwrites data either
//! side hasn't seen — unlike the eviction-based ring buffer elsewhere in
//! this codebase's ancestry, nothing here is ever silently dropped.

use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, Ordering};

use dmabuf_abi::Frame;
use spinning_top::Spinlock;

use crate::error::{Error, Result};

pub struct Ring {
    slots: Vec<Spinlock<Frame>>,
    mask: u32,
    req_prod: AtomicU32,
    req_cons: AtomicU32,
    rsp_prod: AtomicU32,
    rsp_cons: AtomicU32,
}

impl Ring {
    /// `capacity` must be a power of two and greater than zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0 && capacity.is_power_of_two(), "ring capacity must be a power of two");
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || Spinlock::new(Frame::zeroed()));
        Self {
            slots,
            mask: (capacity - 1) as u32,
            req_prod: AtomicU32::new(0),
            req_cons: AtomicU32::new(0),
            rsp_prod: AtomicU32::new(0),
            rsp_cons: AtomicU32::new(0),
        }
    }

    fn slot(&self, index: u32) -> &Spinlock<Frame> {
        &self.slots[(index & self.mask) as usize]
    }

    /// Front side: publish a request frame. Fails with
    /// [`Error::PeerDown`]-shaped backpressure (`Error::Timeout` is for
    /// the synchronous-wait layer above this, not here) if every slot
    /// has an unconsumed response outstanding.
    pub fn publish_request(&self, frame: Frame) -> Result<u32> {
        let prod = self.req_prod.load(Ordering::Relaxed);
        let cons = self.rsp_cons.load(Ordering::Acquire);
        if prod.wrapping_sub(cons) as usize >= self.slots.len() {
            return Err(Error::PeerDown);
        }
        *self.slot(prod).lock() = frame;
        self.req_prod.store(prod.wrapping_add(1), Ordering::Release);
        Ok(prod)
    }

    /// Back side: consume the next unprocessed request, if any.
    pub fn consume_request(&self) -> Option<(u32, Frame)> {
        let cons = self.req_cons.load(Ordering::Relaxed);
        let prod = self.req_prod.load(Ordering::Acquire);
        if cons == prod {
            return None;
        }
        let frame = *self.slot(cons).lock();
        self.req_cons.store(cons.wrapping_add(1), Ordering::Release);
        Some((cons, frame))
    }

    /// Back side: overwrite `slot_index`'s frame with the response and
    /// advance `rsp_prod`. Must be called in the same order requests
    /// were consumed, which the single back-ring-ISR-at-a-time contract
    /// guarantees.
    pub fn publish_response(&self, slot_index: u32, frame: Frame) {
        *self.slot(slot_index).lock() = frame;
        self.rsp_prod.fetch_add(1, Ordering::Release);
        let _ = slot_index;
    }

    /// Front side: consume the next available response, if any.
    pub fn consume_response(&self) -> Option<Frame> {
        let cons = self.rsp_cons.load(Ordering::Relaxed);
        let prod = self.rsp_prod.load(Ordering::Acquire);
        if cons == prod {
            return None;
        }
        let frame = *self.slot(cons).lock();
        self.rsp_cons.store(cons.wrapping_add(1), Ordering::Release);
        Some(frame)
    }
}
