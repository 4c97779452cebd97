//! Control surface (component J): the `Service` value that owns every
//! other component and exposes the ioctl-equivalent verbs from the
//! reference kernel's driver struct — except, per the "no hidden
//! statics" design note, as an explicit value a host integration
//! constructs and holds, rather than a global singleton.

use alloc::boxed::Box;
use alloc::collections::VecDeque;
use alloc::sync::Arc;
use alloc::vec::Vec;

use dmabuf_abi::query::BufferKind;
use dmabuf_abi::{command::Status, BufferHandle, Command, Frame, QueryItem, VmId};

use crate::clock::Clock;
use crate::config::Config;
use crate::directory::{self, Directory, PeerAdvert};
use crate::dispatch::{self, Dispatcher};
use crate::error::{Error, Result};
use crate::exported::{ActivityStacks, ExportedBuffer, ExportedRegistry, SessionId, UnexportState};
use crate::handle_alloc::{HandleAllocator, Rng};
use crate::imported::{ImportedBuffer, ImportedRegistry, LocalReleaseHandler};
use crate::local_buffer::LocalBufferSource;
use crate::page::{self, ImportLayout, PageLayout};
use crate::remote_sync;
use crate::shadow::ShadowBuffer;
use crate::share::{self, ShareEngine};
use crate::transport::{EventChannel, Transport};
use crate::wire;

/// Answer to a [`QueryItem`], tagged by which variant the item expects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryValue {
    Kind(BufferKind),
    Vm(VmId),
    Size(u64),
    Bool(bool),
    Priv(Vec<u8>),
}

/// The cross-VM DMA-buffer sharing engine.
///
/// Generic over the four collaborators a host integration injects:
/// the hypervisor page-grant primitive (`S`), the host DMA-buffer
/// subsystem (`L`), the peer-discovery directory (`D`), and the source
/// of cryptographic randomness for handle keys (`R`). The event channel
/// and clock are type-erased (`Arc<dyn ...>`) since [`crate::shadow::ShadowBuffer`]
/// already carries them that way.
pub struct Service<S, L, D, R>
where
    S: ShareEngine,
    L: LocalBufferSource,
    D: Directory,
    R: Rng,
{
    config: Config,
    handle_alloc: HandleAllocator<R>,
    exported: ExportedRegistry,
    imported: Arc<ImportedRegistry>,
    transport: Arc<Transport>,
    share_engine: Arc<S>,
    local_buffers: L,
    directory: D,
    events: Arc<dyn EventChannel>,
    clock: Arc<dyn Clock>,
    export_queue: spinning_top::Spinlock<VecDeque<(VmId, Frame)>>,
}

impl<S, L, D, R> Service<S, L, D, R>
where
    S: ShareEngine,
    L: LocalBufferSource,
    D: Directory,
    R: Rng,
{
    /// `share_engine` is taken as an `Arc` rather than owned outright:
    /// the hypervisor grant table it wraps is the same one every peer VM
    /// on this host maps into, so a host integration running more than
    /// one `Service` shares a single instance across them.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Config,
        transport: Arc<Transport>,
        share_engine: Arc<S>,
        local_buffers: L,
        directory: D,
        events: Arc<dyn EventChannel>,
        clock: Arc<dyn Clock>,
        rng: R,
    ) -> Self {
        let handle_alloc = HandleAllocator::new(config.local_vm, config.limits.max_slots, rng);
        Self {
            config,
            handle_alloc,
            exported: ExportedRegistry::new(),
            imported: Arc::new(ImportedRegistry::new()),
            transport,
            share_engine,
            local_buffers,
            directory,
            events,
            clock,
            export_queue: spinning_top::Spinlock::new(VecDeque::new()),
        }
    }

    fn sync_send(&self, peer: VmId, frame: Frame) -> Result<Frame> {
        self.transport.send(
            peer,
            &*self.events,
            &*self.clock,
            frame,
            true,
            self.config.limits.sync_timeout_ms,
            dmabuf_abi::limits::DEFAULT_POLL_PERIOD_US,
        )
    }

    fn fire_and_forget(&self, peer: VmId, frame: Frame) {
        let _ = self.transport.send(peer, &*self.events, &*self.clock, frame, false, 0, 0);
    }

    // ---- TxChSetup / RxChSetup (§6) ----

    /// Publish this VM's ring advert for `peer` and watch for theirs.
    /// Idempotent only in the sense that a second call on an
    /// already-established peer is rejected — matching the verb table's
    /// `AlreadyUp` error.
    pub fn tx_ch_setup(&self, peer: VmId, advert: PeerAdvert) -> Result<()> {
        if self.transport.peer(peer).is_some() {
            return Err(Error::AlreadyUp);
        }
        self.transport.ensure_peer(peer);
        directory::announce_and_watch(
            &self.directory,
            self.config.local_vm,
            peer,
            advert,
            Box::new(|_peer_advert| {
                // Real event-channel binding to the peer's published
                // port happens in the host's `EventChannel`/`Directory`
                // implementations; the in-memory ring link is already
                // live via `ensure_peer` above.
            }),
        )
    }

    /// Require the peer's advert to already be visible (it must have run
    /// its own `TxChSetup` first) before accepting local rx traffic from it.
    pub fn rx_ch_setup(&self, peer: VmId) -> Result<()> {
        let path = directory::peer_path(peer, self.config.local_vm);
        if self.directory.read(&path).is_none() {
            return Err(Error::PeerDown);
        }
        self.transport.ensure_peer(peer);
        Ok(())
    }

    // ---- ExportRemote / Unexport / ExportFd / Query (§4.F/J, §6) ----

    /// `ExportRemote(local_fd, peer, priv) -> handle`. Dedupes against a
    /// still-valid export of the same local buffer to the same peer
    /// (P6); cancels a pending delayed unexport on reuse (P7).
    pub fn export_remote(&self, local_fd: i32, peer: VmId, priv_data: &[u8], session: SessionId) -> Result<BufferHandle> {
        if priv_data.len() > dmabuf_abi::limits::MAX_PRIV_BYTES {
            return Err(Error::BadArgument);
        }
        let local_buf = self.local_buffers.open(local_fd)?;

        if let Some(existing) = self.exported.find_live_export(&local_buf, peer) {
            let cancelled = self
                .exported
                .with(existing, |buf| {
                    if buf.valid {
                        buf.unexport.scheduled = false;
                        true
                    } else {
                        false
                    }
                })
                .unwrap_or(false);
            if cancelled {
                return Ok(existing);
            }
        }

        let layout = page::flatten(&local_buf.segments()).ok_or(Error::BadArgument)?;

        let attach = local_buf.attach()?;
        let sgt = match local_buf.map(attach) {
            Ok(sgt) => sgt,
            Err(err) => {
                let _ = local_buf.detach(attach);
                return Err(err);
            }
        };
        let share_handle = match share::share_pages(&*self.share_engine, &layout) {
            Ok(h) => h,
            Err(err) => {
                let _ = local_buf.unmap(sgt);
                let _ = local_buf.detach(attach);
                return Err(err);
            }
        };
        let handle = match self.handle_alloc.mint() {
            Ok(h) => h,
            Err(err) => {
                let _ = share::unshare_pages(&*self.share_engine, share_handle);
                let _ = local_buf.unmap(sgt);
                let _ = local_buf.detach(attach);
                return Err(err);
            }
        };

        let nents = layout.nents();
        let first_offset = layout.first_offset;
        let last_length = layout.last_length;

        self.exported.insert(ExportedBuffer {
            handle,
            peer_vm: peer,
            owner_session: session,
            local_buf,
            page_layout: layout,
            share_handle,
            valid: true,
            importer_exported_count: 0,
            initial_attach: attach,
            initial_map: sgt,
            activity: ActivityStacks::default(),
            unexport: UnexportState { scheduled: false, fire_at: self.clock.now() },
            priv_data: priv_data.to_vec(),
        });

        let frame = wire::encode_export(handle, nents, first_offset, last_length, share_handle, priv_data);
        self.fire_and_forget(peer, frame);

        Ok(handle)
    }

    /// `ExportFd(handle, flags) -> local_fd`. `flags` is accepted for
    /// wire-layout fidelity with the verb table (§6) but this engine
    /// defines no flag values of its own.
    pub fn export_fd(&self, handle: BufferHandle, _flags: u32) -> Result<i32> {
        let valid = self.imported.with(handle, |e| e.valid).ok_or(Error::NotFound)?;
        if !valid {
            return Err(Error::Invalid);
        }

        let peer = handle.origin_vm();
        let response = self.sync_send(peer, wire::encode_handle_only(Command::ExportFd, handle))?;
        if Status::from_u32(response.status) != Some(Status::Processed) {
            return Err(Error::Invalid);
        }

        let needs_shadow = self.imported.with(handle, |e| e.share_ref.is_none()).ok_or(Error::NotFound)?;
        if needs_shadow {
            if let Err(err) = self.build_shadow(handle, peer) {
                self.fire_and_forget(peer, wire::encode_handle_only(Command::ExportFdFailed, handle));
                return Err(err);
            }
        }

        let shadow_buf = self
            .imported
            .with(handle, |e| e.shadow_buf.clone())
            .flatten()
            .ok_or(Error::NotFound)?;

        match self.local_buffers.export_fd(shadow_buf) {
            Ok(fd) => {
                self.imported.with(handle, |e| e.local_importers += 1);
                Ok(fd)
            }
            Err(err) => {
                self.fire_and_forget(peer, wire::encode_handle_only(Command::ExportFdFailed, handle));
                Err(err)
            }
        }
    }

    /// Map the peer's pages and build the shadow buffer on the first
    /// successful `ExportFd` for `handle` (§4.G: "becomes usable after
    /// first `ExportFd` success").
    fn build_shadow(&self, handle: BufferHandle, peer: VmId) -> Result<()> {
        let share_handle = self.imported.with(handle, |e| e.share_handle).ok_or(Error::NotFound)?;
        let layout = self.imported.with(handle, |e| e.layout).ok_or(Error::NotFound)?;

        let share_ref = share::map_pages(&*self.share_engine, share_handle)?;
        let page_layout = PageLayout {
            pages: share_ref.data_maps.iter().map(|m| m.0).collect(),
            first_offset: layout.first_offset,
            last_length: layout.last_length,
        };
        let release_hook = Arc::new(LocalReleaseHandler::new(self.imported.clone(), self.share_engine.clone()));
        let shadow: Arc<ShadowBuffer> = Arc::new(ShadowBuffer::new(
            handle,
            peer,
            page_layout,
            self.transport.clone(),
            self.events.clone(),
            self.clock.clone(),
            release_hook,
        ));

        self.imported
            .with(handle, |e| {
                e.share_ref = Some(share_ref);
                e.shadow_buf = Some(shadow.clone());
            })
            .ok_or(Error::NotFound)
    }

    /// `Unexport(handle, delay_ms)`. Idempotent: a second call while one
    /// is already scheduled keeps the earlier deadline.
    pub fn unexport(&self, handle: BufferHandle, delay_ms: u32) -> Result<()> {
        let fire_at = self.clock.now() + delay_ms;
        self.exported
            .with(handle, |buf| {
                if !buf.unexport.scheduled {
                    buf.unexport.scheduled = true;
                    buf.unexport.fire_at = fire_at;
                }
            })
            .ok_or(Error::NotFound)
    }

    /// Drive due delayed-unexport timers. A host integration calls this
    /// periodically (e.g. off its own timer tick); nothing in this crate
    /// spawns a thread of its own (§5: thread-per-ring is sufficient,
    /// timers are polled).
    pub fn poll_timers(&self) {
        let now = self.clock.now();
        for handle in self.exported.due_for_unexport(now) {
            self.fire_delayed_unexport(handle);
        }
    }

    fn fire_delayed_unexport(&self, handle: BufferHandle) {
        let Some(peer) = self.exported.with(handle, |b| b.peer_vm) else { return };

        // Fire-and-forget: whether the importer is even up yet doesn't
        // gate local teardown eligibility, which only depends on our own
        // `importer_exported_count` bookkeeping below.
        self.fire_and_forget(peer, wire::encode_handle_only(Command::NotifyUnexport, handle));

        let should_teardown = self.exported.with(handle, |buf| {
            buf.valid = false;
            buf.unexport.scheduled = false;
            buf.importer_exported_count == 0 && buf.activity.is_empty()
        });

        if should_teardown == Some(true) {
            if let Err(err) = remote_sync::teardown(&self.exported, &*self.share_engine, &self.handle_alloc, handle) {
                log::warn!("deferred teardown of {handle:?}: {err}");
            }
        }
    }

    /// `Query(handle, item) -> value`. Tries the exported registry
    /// first, then the imported one — a handle only ever lives in one of
    /// the two on a given VM, but where both somehow matched (open
    /// question #1 in the design notes) the exported record wins.
    pub fn query(&self, handle: BufferHandle, item: QueryItem) -> Result<QueryValue> {
        if let Some(result) = self.exported.with(handle, |buf| self.query_exported(buf, item)) {
            return result;
        }
        if let Some(result) = self.imported.with(handle, |buf| self.query_imported(buf, item)) {
            return result;
        }
        Err(Error::NotFound)
    }

    fn query_exported(&self, buf: &ExportedBuffer, item: QueryItem) -> Result<QueryValue> {
        Ok(match item {
            QueryItem::Type => QueryValue::Kind(BufferKind::Exported),
            QueryItem::Exporter => QueryValue::Vm(self.config.local_vm),
            QueryItem::Importer => QueryValue::Vm(buf.peer_vm),
            QueryItem::Size => QueryValue::Size(buf.page_layout.byte_len() as u64),
            QueryItem::Busy => QueryValue::Bool(buf.importer_exported_count > 0),
            QueryItem::Unexported => QueryValue::Bool(!buf.valid),
            QueryItem::DelayedUnexported => QueryValue::Bool(buf.unexport.scheduled),
            QueryItem::PrivSize => QueryValue::Size(buf.priv_data.len() as u64),
            QueryItem::PrivCopy => QueryValue::Priv(buf.priv_data.clone()),
        })
    }

    fn query_imported(&self, buf: &ImportedBuffer, item: QueryItem) -> Result<QueryValue> {
        Ok(match item {
            QueryItem::Type => QueryValue::Kind(BufferKind::Imported),
            QueryItem::Exporter => QueryValue::Vm(buf.handle.origin_vm()),
            QueryItem::Importer => QueryValue::Vm(self.config.local_vm),
            QueryItem::Size => QueryValue::Size(buf.layout.byte_len() as u64),
            QueryItem::Busy => QueryValue::Bool(buf.local_importers > 0),
            QueryItem::Unexported => QueryValue::Bool(!buf.valid),
            // An imported buffer has no delayed-unexport timer of its
            // own; only the exporter schedules one.
            QueryItem::DelayedUnexported => QueryValue::Bool(false),
            QueryItem::PrivSize => QueryValue::Size(buf.priv_data.len() as u64),
            QueryItem::PrivCopy => QueryValue::Priv(buf.priv_data.clone()),
        })
    }

    /// Session-close cleanup hook (§4.J): unexport, with no grace delay,
    /// every buffer this session owns. Snapshots the owned handle set
    /// before acting so it's safe against concurrent inserts.
    pub fn on_session_close(&self, session: SessionId) {
        for handle in self.exported.handles_owned_by(session) {
            let _ = self.unexport(handle, 0);
        }
    }

    // ---- ISR / worker entry points ----

    /// Back-ring ISR equivalent: drain and dispatch every request
    /// currently pending on `peer`'s rx ring.
    pub fn pump_requests(&self, peer: VmId) -> usize {
        self.transport.pump_rx(peer, |frame| dispatch::handle_request(self, peer, frame))
    }

    /// Front-ring ISR equivalent for responses nobody is synchronously
    /// waiting on (e.g. a response to a fire-and-forget send).
    pub fn drain_responses(&self, peer: VmId) -> usize {
        self.transport.drain_tx_responses(peer)
    }

    /// Worker-queue equivalent: process every `EXPORT` frame queued by
    /// [`Dispatcher::on_export`] since the last call.
    pub fn process_pending_exports(&self) -> usize {
        let mut processed = 0;
        loop {
            let Some((_remote, frame)) = self.export_queue.lock().pop_front() else { break };
            let decoded = wire::decode_export(&frame);
            if self.imported.contains(decoded.handle) {
                log::debug!("duplicate EXPORT for {:?} ignored", decoded.handle);
            } else {
                let layout = ImportLayout {
                    nents: decoded.nents,
                    first_offset: decoded.first_offset,
                    last_length: decoded.last_length,
                };
                self.imported.insert(ImportedBuffer::new(decoded.handle, layout, decoded.share_handle, decoded.priv_data));
            }
            processed += 1;
        }
        processed
    }
}

impl<S, L, D, R> Dispatcher for Service<S, L, D, R>
where
    S: ShareEngine,
    L: LocalBufferSource,
    D: Directory,
    R: Rng,
{
    fn on_export(&self, remote: VmId, frame: Frame) {
        self.export_queue.lock().push_back((remote, frame));
    }

    fn on_notify_unexport(&self, _remote: VmId, frame: Frame) -> Status {
        let handle = wire::decode_handle(&frame);
        let remove_now = self.imported.with(handle, |e| {
            if e.local_importers > 0 {
                e.valid = false;
                false
            } else {
                true
            }
        });
        match remove_now {
            Some(true) => {
                self.imported.remove(handle);
                Status::Processed
            }
            Some(false) => Status::Processed,
            None => {
                log::warn!("NOTIFY_UNEXPORT for unknown handle {handle:?}");
                Status::Error
            }
        }
    }

    fn on_export_fd(&self, _remote: VmId, frame: Frame) -> Status {
        let handle = wire::decode_handle(&frame);
        match self.exported.with(handle, |buf| {
            if buf.valid {
                buf.importer_exported_count += 1;
                true
            } else {
                false
            }
        }) {
            Some(true) => Status::Processed,
            Some(false) => Status::Error,
            None => {
                log::warn!("EXPORT_FD for unknown handle {handle:?}");
                Status::Error
            }
        }
    }

    fn on_export_fd_failed(&self, _remote: VmId, frame: Frame) -> Status {
        let handle = wire::decode_handle(&frame);
        let result = self.exported.with(handle, |buf| {
            if buf.importer_exported_count == 0 {
                log::warn!("EXPORT_FD_FAILED for {handle:?} with importer_exported_count already 0");
            } else {
                buf.importer_exported_count -= 1;
            }
            buf.importer_exported_count == 0 && !buf.valid && !buf.unexport.scheduled && buf.activity.is_empty()
        });
        match result {
            Some(true) => {
                if let Err(err) = remote_sync::teardown(&self.exported, &*self.share_engine, &self.handle_alloc, handle) {
                    log::warn!("teardown after EXPORT_FD_FAILED deferred for {handle:?}: {err}");
                }
                Status::Processed
            }
            Some(false) => Status::Processed,
            None => Status::Error,
        }
    }

    fn on_ops_to_source(&self, _remote: VmId, frame: Frame) -> Status {
        let handle = wire::decode_handle(&frame);
        let Some(op) = wire::decode_op_code(&frame) else {
            log::warn!("OPS_TO_SOURCE with unrecognized op code for {handle:?}");
            return Status::Error;
        };
        match remote_sync::apply(&self.exported, &*self.share_engine, &self.handle_alloc, handle, op) {
            Ok(()) => Status::Processed,
            Err(err) => {
                log::warn!("OPS_TO_SOURCE {op:?} on {handle:?} failed: {err}");
                Status::Error
            }
        }
    }
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;

    use std::sync::OnceLock;

    use crate::testing::fake_clock::FakeClock;
    use crate::testing::fake_directory::FakeDirectory;
    use crate::testing::fake_local_buffer::FakeLocalBufferSource;
    use crate::testing::fake_rng::FakeRng;
    use crate::testing::fake_share::FakeShareEngine;
    use crate::transport::Ring;
    use dmabuf_abi::Limits;

    const VM_A: VmId = VmId(1);
    const VM_B: VmId = VmId(2);

    type TestService = Service<FakeShareEngine, FakeLocalBufferSource, FakeDirectory, FakeRng>;

    /// An event channel wired directly to the peer `TestService`'s own
    /// `pump_requests`, so a `send` call's `notify()` synchronously drives
    /// the peer's ISR before returning — no real concurrency needed to
    /// exercise `ExportFd`'s synchronous wait in a single test thread.
    /// Mirrors a real event channel's effect (an immediate interrupt on
    /// the peer) without a second OS thread.
    struct LoopbackEventChannel {
        peer: OnceLock<Arc<TestService>>,
        own_vm: VmId,
    }

    impl LoopbackEventChannel {
        fn new(own_vm: VmId) -> Self {
            Self { peer: OnceLock::new(), own_vm }
        }
    }

    impl EventChannel for LoopbackEventChannel {
        fn notify(&self, _remote: VmId) {
            if let Some(peer) = self.peer.get() {
                peer.pump_requests(self.own_vm);
            }
        }
    }

    fn make_service(
        local_vm: VmId,
        transport: Arc<Transport>,
        share_engine: Arc<FakeShareEngine>,
        events: Arc<dyn EventChannel>,
    ) -> TestService {
        let config = Config::new(local_vm).with_limits(Limits { max_slots: 4, ring_slots: 8, sync_timeout_ms: 50 });
        Service::new(
            config,
            transport,
            share_engine,
            FakeLocalBufferSource::default(),
            FakeDirectory::new(),
            events,
            Arc::new(FakeClock::new()),
            FakeRng::new(),
        )
    }

    /// Cross-wire two `Transport`s over the same two ring pages, the way
    /// a real shared-memory grant would join an exporter and importer,
    /// share one `FakeShareEngine` between them (both VMs' hypervisor
    /// calls land in the same grant table), and wire each side's event
    /// channel to reenter the other's `pump_requests` so every send
    /// delivers synchronously.
    fn wire_loopback(capacity: usize) -> (Arc<TestService>, Arc<TestService>) {
        let a_to_b = Arc::new(Ring::new(capacity));
        let b_to_a = Arc::new(Ring::new(capacity));
        let transport_a = Arc::new(Transport::new(capacity));
        let transport_b = Arc::new(Transport::new(capacity));
        transport_a.ensure_peer_linked(VM_B, a_to_b.clone(), b_to_a.clone());
        transport_b.ensure_peer_linked(VM_A, b_to_a, a_to_b);

        let share_engine = Arc::new(FakeShareEngine::new());
        let events_a = Arc::new(LoopbackEventChannel::new(VM_A));
        let events_b = Arc::new(LoopbackEventChannel::new(VM_B));

        let exporter = Arc::new(make_service(VM_A, transport_a, share_engine.clone(), events_a.clone()));
        let importer = Arc::new(make_service(VM_B, transport_b, share_engine, events_b.clone()));

        events_a.peer.set(importer.clone()).unwrap_or_else(|_| panic!("peer set once"));
        events_b.peer.set(exporter.clone()).unwrap_or_else(|_| panic!("peer set once"));

        (exporter, importer)
    }

    #[test]
    fn round_trip_export_leaves_registries_clean_on_release_and_unexport() {
        let (exporter, importer) = wire_loopback(8);

        let handle = exporter.export_remote(3, VM_B, &[1, 2, 3, 4], SessionId(1)).unwrap();

        // The EXPORT frame was already delivered synchronously via the
        // event-channel hook; it still has to go through the worker
        // queue explicitly (component E never calls `on_export` inline).
        assert_eq!(importer.process_pending_exports(), 1);

        let fd = importer.export_fd(handle, 0).unwrap();
        assert!(fd >= 0);
        assert_eq!(exporter.query(handle, QueryItem::Busy), Ok(QueryValue::Bool(true)));

        // Drive a shadow-buffer op round trip: map then release.
        let shadow = importer.imported.with(handle, |e| e.shadow_buf.clone()).flatten().unwrap();
        let attach = shadow.attach().unwrap();
        let sgt = shadow.map(attach).unwrap();
        shadow.unmap(sgt).unwrap();
        shadow.detach(attach).unwrap();
        shadow.release().unwrap();

        // Release drops importer_exported_count to 0 but the buffer is
        // still `valid` (no Unexport yet), so teardown doesn't fire yet.
        assert_eq!(exporter.query(handle, QueryItem::Type), Ok(QueryValue::Kind(BufferKind::Exported)));

        exporter.unexport(handle, 0).unwrap();
        exporter.poll_timers();

        assert_eq!(exporter.query(handle, QueryItem::Unexported), Err(Error::NotFound));
        assert_eq!(importer.export_fd(handle, 0), Err(Error::NotFound));
    }

    #[test]
    fn dedupe_returns_same_handle_for_same_local_buf_and_peer() {
        let (exporter, _importer) = wire_loopback(8);

        let h1 = exporter.export_remote(5, VM_B, &[], SessionId(1)).unwrap();
        let h2 = exporter.export_remote(5, VM_B, &[], SessionId(1)).unwrap();
        assert_eq!(h1, h2);
    }

    #[test]
    fn unexport_then_reexport_within_delay_cancels_pending_unexport() {
        let (exporter, _importer) = wire_loopback(8);

        let handle = exporter.export_remote(7, VM_B, &[], SessionId(1)).unwrap();
        exporter.unexport(handle, 1000).unwrap();
        assert_eq!(exporter.query(handle, QueryItem::DelayedUnexported), Ok(QueryValue::Bool(true)));

        let reexported = exporter.export_remote(7, VM_B, &[], SessionId(1)).unwrap();
        assert_eq!(reexported, handle);
        assert_eq!(exporter.query(handle, QueryItem::DelayedUnexported), Ok(QueryValue::Bool(false)));

        exporter.poll_timers();
        assert_eq!(exporter.query(handle, QueryItem::Unexported), Ok(QueryValue::Bool(false)));
    }

    #[test]
    fn outstanding_importer_count_blocks_teardown_even_after_unexport_fires() {
        let (exporter, importer) = wire_loopback(8);

        let handle = exporter.export_remote(9, VM_B, &[], SessionId(1)).unwrap();
        importer.process_pending_exports();
        importer.export_fd(handle, 0).unwrap();

        exporter.unexport(handle, 0).unwrap();
        exporter.poll_timers();

        // Still present: importer_exported_count is 1.
        assert_eq!(exporter.query(handle, QueryItem::Unexported), Ok(QueryValue::Bool(true)));
        assert_eq!(exporter.query(handle, QueryItem::Busy), Ok(QueryValue::Bool(true)));

        // A subsequent ExportFd must now fail (P8: invalidation is monotonic).
        assert_eq!(importer.export_fd(handle, 0), Err(Error::Invalid));

        // Releasing the one outstanding fd finally completes teardown.
        let shadow = importer.imported.with(handle, |e| e.shadow_buf.clone()).flatten().unwrap();
        shadow.release().unwrap();
        assert_eq!(exporter.query(handle, QueryItem::Unexported), Err(Error::NotFound));
    }

    #[test]
    fn session_close_unexports_every_owned_buffer() {
        let (exporter, _importer) = wire_loopback(8);

        let session = SessionId(42);
        let h1 = exporter.export_remote(1, VM_B, &[], session).unwrap();
        let h2 = exporter.export_remote(2, VM_B, &[], session).unwrap();

        exporter.on_session_close(session);
        assert_eq!(exporter.query(h1, QueryItem::DelayedUnexported), Ok(QueryValue::Bool(true)));
        assert_eq!(exporter.query(h2, QueryItem::DelayedUnexported), Ok(QueryValue::Bool(true)));

        exporter.poll_timers();
        assert_eq!(exporter.query(h1, QueryItem::Unexported), Err(Error::NotFound));
        assert_eq!(exporter.query(h2, QueryItem::Unexported), Err(Error::NotFound));
    }

    #[test]
    fn handle_exhaustion_returns_exhausted_after_max_slots() {
        let (exporter, _importer) = wire_loopback(8);

        for fd in 0..4 {
            exporter.export_remote(fd, VM_B, &[], SessionId(1)).unwrap();
        }
        assert_eq!(exporter.export_remote(99, VM_B, &[], SessionId(1)), Err(Error::Exhausted));
    }
}
