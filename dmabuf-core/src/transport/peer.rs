//! Per-peer link: a tx ring (we're front) and an rx ring (we're back),
//! plus the event-channel notifications that wake each side's ISR.

use alloc::sync::Arc;
use core::sync::atomic::{AtomicU32, Ordering};

use dmabuf_abi::{Frame, VmId};
use spinning_top::Spinlock;

use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::transport::ring::Ring;

/// Hypervisor inter-domain notification primitive, injected. A real
/// implementation binds an event channel / IPI; this crate only calls
/// `notify` after publishing and expects `Transport::pump` to be invoked
/// whenever the host observes an incoming notification.
pub trait EventChannel: Send + Sync {
    fn notify(&self, peer: VmId);
}

/// One peer connection's rings, serialized so only one synchronous
/// request is outstanding per ring at a time.
/// One peer's rings are, in a real deployment, a single shared page the
/// hypervisor maps into both VMs — the exporter's tx ring *is* the
/// importer's rx ring and vice versa. [`Ring`] is therefore held behind
/// an `Arc` here so a test harness (or, eventually, a host's shared-page
/// mapping) can hand the same two rings to both peers' [`PeerLink`]s.
pub struct PeerLink {
    pub remote: VmId,
    pub tx: Arc<Ring>,
    pub rx: Arc<Ring>,
    send_lock: Spinlock<()>,
    next_request_id: AtomicU32,
    pending_response: Spinlock<Option<Frame>>,
}

impl PeerLink {
    pub fn new(remote: VmId, ring_capacity: usize) -> Self {
        Self::linked(remote, Arc::new(Ring::new(ring_capacity)), Arc::new(Ring::new(ring_capacity)))
    }

    /// Build a `PeerLink` over externally-owned rings, e.g. the other
    /// half of a cross-wired loopback pair.
    pub fn linked(remote: VmId, tx: Arc<Ring>, rx: Arc<Ring>) -> Self {
        Self {
            remote,
            tx,
            rx,
            send_lock: Spinlock::new(()),
            next_request_id: AtomicU32::new(1),
            pending_response: Spinlock::new(None),
        }
    }

    /// Publish `frame` on the tx ring. If `wait`, block (via `clock`'s
    /// bounded poll loop) for a matching response and return its status;
    /// otherwise return immediately with `status = NOT_RESPONDED`.
    pub fn send(
        &self,
        events: &dyn EventChannel,
        clock: &dyn Clock,
        mut frame: Frame,
        wait: bool,
        timeout_ms: u32,
        poll_period_us: u32,
    ) -> Result<Frame> {
        let _guard = self.send_lock.lock();

        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        frame.request_id = request_id;
        *self.pending_response.lock() = None;

        self.tx.publish_request(frame)?;
        events.notify(self.remote);

        if !wait {
            return Ok(frame);
        }

        let deadline = clock.now() + timeout_ms;
        loop {
            if let Some(rsp) = self.tx.consume_response() {
                if rsp.request_id == request_id {
                    return Ok(rsp);
                }
                // Not ours (shouldn't happen: single-outstanding-per-ring
                // is enforced by send_lock), stash and keep waiting.
                *self.pending_response.lock() = Some(rsp);
                continue;
            }
            if clock.now() >= deadline {
                return Err(Error::Timeout);
            }
            clock.sleep_us(poll_period_us);
        }
    }
}
