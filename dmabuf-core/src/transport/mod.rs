//! Transport (component D): per-peer rings, event-channel notification,
//! and peer discovery via the [`crate::directory::Directory`].

pub mod peer;
pub mod ring;

use alloc::collections::BTreeMap;
use alloc::sync::Arc;

use dmabuf_abi::{Frame, VmId};
use spinning_top::Spinlock;

use crate::clock::Clock;
use crate::error::{Error, Result};

pub use peer::{EventChannel, PeerLink};
pub use ring::Ring;

/// Owns every established peer link. A `Service` holds one `Transport`.
pub struct Transport {
    peers: Spinlock<BTreeMap<VmId, Arc<PeerLink>>>,
    ring_capacity: usize,
}

impl Transport {
    pub fn new(ring_capacity: usize) -> Self {
        Self {
            peers: Spinlock::new(BTreeMap::new()),
            ring_capacity,
        }
    }

    /// `TxChSetup`/`RxChSetup`: establish (idempotently) the rings for a
    /// peer. Real ring memory/event-channel binding happens via the
    /// `events`/directory plumbing in `Service`; here we just make sure
    /// the in-memory rings exist so `send`/`pump_rx` have somewhere to
    /// work.
    pub fn ensure_peer(&self, remote: VmId) -> Arc<PeerLink> {
        let mut peers = self.peers.lock();
        peers
            .entry(remote)
            .or_insert_with(|| Arc::new(PeerLink::new(remote, self.ring_capacity)))
            .clone()
    }

    /// Like [`Self::ensure_peer`], but over externally-supplied rings —
    /// used when the same two physical ring pages must be shared between
    /// this side and a peer's `Transport`, as a test loopback harness
    /// does and as a real shared-page mapping would.
    pub fn ensure_peer_linked(&self, remote: VmId, tx: Arc<ring::Ring>, rx: Arc<ring::Ring>) -> Arc<PeerLink> {
        let mut peers = self.peers.lock();
        peers
            .entry(remote)
            .or_insert_with(|| Arc::new(PeerLink::linked(remote, tx, rx)))
            .clone()
    }

    pub fn peer(&self, remote: VmId) -> Option<Arc<PeerLink>> {
        self.peers.lock().get(&remote).cloned()
    }

    pub fn remove_peer(&self, remote: VmId) {
        self.peers.lock().remove(&remote);
    }

    /// Publish `frame` to `remote`'s tx ring.
    #[allow(clippy::too_many_arguments)]
    pub fn send(
        &self,
        remote: VmId,
        events: &dyn EventChannel,
        clock: &dyn Clock,
        frame: Frame,
        wait: bool,
        timeout_ms: u32,
        poll_period_us: u32,
    ) -> Result<Frame> {
        let peer = self.peer(remote).ok_or(Error::PeerDown)?;
        peer.send(events, clock, frame, wait, timeout_ms, poll_period_us)
    }

    /// Back-ring ISR: drain every pending request on `remote`'s rx ring,
    /// dispatching each to `handle` and publishing whatever response it
    /// returns. `handle` must be bounded work (no unbounded allocation);
    /// callers route `Command::Export` to a worker queue instead of
    /// calling this inline, per the dispatch rules in component E.
    pub fn pump_rx(&self, remote: VmId, mut handle: impl FnMut(Frame) -> Frame) -> usize {
        let Some(peer) = self.peer(remote) else { return 0 };
        let mut processed = 0;
        while let Some((slot, frame)) = peer.rx.consume_request() {
            let response = handle(frame);
            peer.rx.publish_response(slot, response);
            processed += 1;
        }
        processed
    }

    /// Front-ring ISR for fire-and-forget sends: drain tx responses
    /// nobody is synchronously waiting on. A response to a request a
    /// caller *is* waiting on is instead consumed by that caller's poll
    /// loop in [`PeerLink::send`]; this only exists so non-blocking sends
    /// (`OPS_TO_SOURCE`, `NOTIFY_UNEXPORT`) don't leave the ring full.
    pub fn drain_tx_responses(&self, remote: VmId) -> usize {
        let Some(peer) = self.peer(remote) else { return 0 };
        let mut drained = 0;
        while peer.tx.consume_response().is_some() {
            drained += 1;
        }
        drained
    }
}
