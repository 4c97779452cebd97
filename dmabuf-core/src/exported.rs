//! Exported registry (component F).
//!
//! Per-handle exporter state: the owning local buffer, the published
//! share handle, and the LIFO activity stacks the remote-sync handler
//! (component I) pushes onto and pops from as the importer's shadow
//! buffer forwards operations. Modeled as a single lock over a
//! `BTreeMap`, the same shape as the reference kernel's scheme registry
//! (`RwSpinlock<BTreeMap<&str, Arc<dyn SchemeHandler>>>`), except keyed
//! by handle id with the full 128-bit handle re-checked on every lookup
//! so a stale id can never address a different buffer that recycled the
//! same slot.

use alloc::sync::Arc;
use alloc::vec::Vec;
use alloc::collections::BTreeMap;

use dmabuf_abi::{BufferHandle, VmId};
use spinning_top::Spinlock;

use crate::clock::Instant;
use crate::error::{Error, Result};
use crate::local_buffer::{AttachRef, LocalBufferRef, SgtRef, VirtAddrRef};
use crate::page::PageLayout;
use crate::share::ShareHandle;

/// Opaque token identifying whoever created an export through the
/// control surface, used only for the session-close cleanup sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SessionId(pub u64);

/// LIFO bookkeeping of resources the remote-sync handler allocated while
/// replaying forwarded shadow-buffer ops (invariant I3: every push has a
/// matching pop in reverse order). The attachment and mapping pinned at
/// export time itself are tracked separately, on
/// [`ExportedBuffer::initial_attach`]/[`ExportedBuffer::initial_map`] —
/// they aren't forwarded-op activity and teardown releases them
/// unconditionally rather than waiting on this to drain.
#[derive(Debug, Default)]
pub struct ActivityStacks {
    pub attachments: Vec<AttachRef>,
    pub mappings: Vec<SgtRef>,
    pub kmaps: Vec<VirtAddrRef>,
    pub vmaps: Vec<VirtAddrRef>,
}

impl ActivityStacks {
    pub fn is_empty(&self) -> bool {
        self.attachments.is_empty() && self.mappings.is_empty() && self.kmaps.is_empty() && self.vmaps.is_empty()
    }

    pub fn push_attach(&mut self, r: AttachRef) {
        self.attachments.push(r);
    }
    pub fn pop_attach(&mut self) -> Result<AttachRef> {
        self.attachments.pop().ok_or(Error::ProtocolViolation)
    }
    pub fn push_map(&mut self, r: SgtRef) {
        self.mappings.push(r);
    }
    pub fn pop_map(&mut self) -> Result<SgtRef> {
        self.mappings.pop().ok_or(Error::ProtocolViolation)
    }
    pub fn push_kmap(&mut self, r: VirtAddrRef) {
        self.kmaps.push(r);
    }
    pub fn pop_kmap(&mut self) -> Result<VirtAddrRef> {
        self.kmaps.pop().ok_or(Error::ProtocolViolation)
    }
    pub fn push_vmap(&mut self, r: VirtAddrRef) {
        self.vmaps.push(r);
    }
    pub fn pop_vmap(&mut self) -> Result<VirtAddrRef> {
        self.vmaps.pop().ok_or(Error::ProtocolViolation)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct UnexportState {
    pub scheduled: bool,
    pub fire_at: Instant,
}

pub struct ExportedBuffer {
    pub handle: BufferHandle,
    pub peer_vm: VmId,
    pub owner_session: SessionId,
    pub local_buf: LocalBufferRef,
    pub page_layout: PageLayout,
    pub share_handle: ShareHandle,
    pub valid: bool,
    pub importer_exported_count: u32,
    /// The attachment and mapping `ExportRemote` pinned up front so it
    /// could flatten the buffer's page layout. Released by teardown,
    /// not by any forwarded op.
    pub initial_attach: AttachRef,
    pub initial_map: SgtRef,
    pub activity: ActivityStacks,
    pub unexport: UnexportState,
    pub priv_data: Vec<u8>,
}

impl ExportedBuffer {
    /// Whether this entry may be fully torn down right now (lifecycle
    /// `INVALID -> GONE`): invalid, no outstanding importer fds, and
    /// every forwarded-op activity stack drained. The initial
    /// attach/map aren't part of this check — they're released
    /// unconditionally as part of teardown itself.
    pub fn is_collectible(&self) -> bool {
        !self.valid && self.importer_exported_count == 0 && self.activity.is_empty()
    }
}

pub struct ExportedRegistry {
    entries: Spinlock<BTreeMap<u32, ExportedBuffer>>,
}

impl ExportedRegistry {
    pub fn new() -> Self {
        Self {
            entries: Spinlock::new(BTreeMap::new()),
        }
    }

    pub fn insert(&self, buf: ExportedBuffer) {
        self.entries.lock().insert(buf.handle.id, buf);
    }

    /// Run `f` against the entry for `handle`, holding the registry lock
    /// for the duration. Returns `None` if no entry matches the *full*
    /// handle (defeats stale-id reuse races).
    pub fn with<R>(&self, handle: BufferHandle, f: impl FnOnce(&mut ExportedBuffer) -> R) -> Option<R> {
        let mut guard = self.entries.lock();
        let entry = guard.get_mut(&handle.id)?;
        if entry.handle != handle {
            return None;
        }
        Some(f(entry))
    }

    /// Find a still-valid export of the same local buffer to the same
    /// peer, used by `ExportRemote` to dedupe re-exports (P6).
    pub fn find_live_export(&self, local_buf: &LocalBufferRef, peer: VmId) -> Option<BufferHandle> {
        let guard = self.entries.lock();
        guard
            .values()
            .find(|e| e.valid && e.peer_vm == peer && Arc::ptr_eq(&e.local_buf, local_buf))
            .map(|e| e.handle)
    }

    pub fn remove(&self, handle: BufferHandle) -> Option<ExportedBuffer> {
        let mut guard = self.entries.lock();
        if guard.get(&handle.id).map(|e| e.handle) != Some(handle) {
            return None;
        }
        guard.remove(&handle.id)
    }

    /// Snapshot the handles owned by `session`, then release the lock
    /// before the caller acts on each — safe against concurrent inserts
    /// racing the sweep, per the session-close design note.
    pub fn handles_owned_by(&self, session: SessionId) -> Vec<BufferHandle> {
        self.entries
            .lock()
            .values()
            .filter(|e| e.owner_session == session)
            .map(|e| e.handle)
            .collect()
    }

    /// Snapshot the handles whose delayed-unexport timer is due at or
    /// before `now`, for a timer-poll loop to fire. Still-valid entries
    /// only: a timer on an already-invalidated entry has nothing left to
    /// fire (the NOTIFY_UNEXPORT was already sent when it went invalid).
    pub fn due_for_unexport(&self, now: Instant) -> Vec<BufferHandle> {
        self.entries
            .lock()
            .values()
            .filter(|e| e.valid && e.unexport.scheduled && e.unexport.fire_at <= now)
            .map(|e| e.handle)
            .collect()
    }
}

impl Default for ExportedRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;
    use crate::page::PageLayout;
    use crate::share::GrantRef;
    use crate::testing::fake_local_buffer::FakeLocalBuffer;

    fn sample(handle: BufferHandle, peer: VmId, local_buf: LocalBufferRef) -> ExportedBuffer {
        ExportedBuffer {
            handle,
            peer_vm: peer,
            owner_session: SessionId(1),
            local_buf,
            page_layout: PageLayout { pages: alloc::vec![0], first_offset: 0, last_length: 4096 },
            share_handle: ShareHandle { top: GrantRef(0) },
            valid: true,
            importer_exported_count: 0,
            initial_attach: AttachRef(0),
            initial_map: SgtRef(0),
            activity: ActivityStacks::default(),
            unexport: UnexportState { scheduled: false, fire_at: Instant(0) },
            priv_data: Vec::new(),
        }
    }

    #[test]
    fn stale_handle_lookup_misses() {
        let reg = ExportedRegistry::new();
        let h = BufferHandle { id: 1, key: [1, 2, 3] };
        let buf = Arc::new(FakeLocalBuffer::new(4096));
        reg.insert(sample(h, VmId(2), buf));

        let stale = BufferHandle { id: 1, key: [9, 9, 9] };
        assert!(reg.with(stale, |_| ()).is_none());
        assert!(reg.with(h, |_| ()).is_some());
    }

    #[test]
    fn dedupe_finds_live_export_of_same_local_buf() {
        let reg = ExportedRegistry::new();
        let buf: LocalBufferRef = Arc::new(FakeLocalBuffer::new(4096));
        let h = BufferHandle { id: 5, key: [0; 3] };
        reg.insert(sample(h, VmId(3), buf.clone()));

        assert_eq!(reg.find_live_export(&buf, VmId(3)), Some(h));
        assert_eq!(reg.find_live_export(&buf, VmId(4)), None);
    }

    #[test]
    fn collectible_requires_invalid_and_drained_activity() {
        let mut buf = sample(
            BufferHandle { id: 1, key: [0; 3] },
            VmId(1),
            Arc::new(FakeLocalBuffer::new(4096)),
        );
        assert!(!buf.is_collectible());
        buf.valid = false;
        assert!(buf.is_collectible());
        buf.importer_exported_count = 1;
        assert!(!buf.is_collectible());
    }
}
