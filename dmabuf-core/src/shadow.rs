//! Shadow buffer (component H): the importer-side object that looks like
//! a native [`crate::local_buffer::LocalBuffer`] to the rest of the
//! importing VM, but forwards every operation to the exporter instead of
//! executing it locally. Forwarding is fire-and-forget (`wait = false`);
//! correctness relies on the ring delivering `OPS_TO_SOURCE` frames in
//! the order the importer issued them (§5 ordering guarantee).

use alloc::sync::Arc;
use core::sync::atomic::{AtomicU64, Ordering};

use dmabuf_abi::{BufferHandle, OpCode, VmId};

use crate::clock::Clock;
use crate::error::Result;
use crate::imported::ImportReleaseHook;
use crate::local_buffer::{AttachRef, LocalBuffer, SgtRef, VirtAddrRef};
use crate::page::{PageLayout, Segment};
use crate::transport::{EventChannel, Transport};

/// Re-exported pages wrapped as a local buffer. Every mutating method
/// forwards an `OPS_TO_SOURCE` frame naming `handle` and an [`OpCode`];
/// `kmap`/`vmap` never produce a real local mapping (§4.H table) — they
/// return a null [`VirtAddrRef`] after forwarding, since a cross-VM
/// shadow has no kernel-virtual address of its own to hand back.
pub struct ShadowBuffer {
    handle: BufferHandle,
    exporter: VmId,
    page_layout: PageLayout,
    transport: Arc<Transport>,
    events: Arc<dyn EventChannel>,
    clock: Arc<dyn Clock>,
    release_hook: Arc<dyn ImportReleaseHook>,
    next_token: AtomicU64,
}

impl ShadowBuffer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        handle: BufferHandle,
        exporter: VmId,
        page_layout: PageLayout,
        transport: Arc<Transport>,
        events: Arc<dyn EventChannel>,
        clock: Arc<dyn Clock>,
        release_hook: Arc<dyn ImportReleaseHook>,
    ) -> Self {
        Self {
            handle,
            exporter,
            page_layout,
            transport,
            events,
            clock,
            release_hook,
            next_token: AtomicU64::new(1),
        }
    }

    fn fresh_token(&self) -> u64 {
        self.next_token.fetch_add(1, Ordering::Relaxed)
    }

    fn forward(&self, op: OpCode) {
        let frame = crate::wire::encode_ops_to_source(self.handle, op);
        // Fire-and-forget: a dropped notification here just delays the
        // exporter's activity-stack bookkeeping, it never corrupts it,
        // since the ring itself never drops an already-published frame.
        let _ = self.transport.send(self.exporter, &*self.events, &*self.clock, frame, false, 0, 0);
    }
}

impl LocalBuffer for ShadowBuffer {
    fn size(&self) -> usize {
        let full_pages = self.page_layout.pages.len().saturating_sub(1);
        full_pages * dmabuf_abi::limits::PAGE_SIZE + self.page_layout.last_length as usize
    }

    fn segments(&self) -> alloc::vec::Vec<Segment> {
        self.page_layout
            .pages
            .iter()
            .enumerate()
            .map(|(i, &page)| {
                let is_last = i + 1 == self.page_layout.pages.len();
                let length = if is_last { self.page_layout.last_length as usize } else { dmabuf_abi::limits::PAGE_SIZE };
                let offset = if i == 0 { self.page_layout.first_offset as usize } else { 0 };
                Segment { page, offset, length }
            })
            .collect()
    }

    fn attach(&self) -> Result<AttachRef> {
        self.forward(OpCode::Attach);
        Ok(AttachRef(self.fresh_token()))
    }

    fn detach(&self, _attach: AttachRef) -> Result<()> {
        self.forward(OpCode::Detach);
        Ok(())
    }

    fn map(&self, _attach: AttachRef) -> Result<SgtRef> {
        self.forward(OpCode::Map);
        Ok(SgtRef(self.fresh_token()))
    }

    fn unmap(&self, _sgt: SgtRef) -> Result<()> {
        self.forward(OpCode::Unmap);
        Ok(())
    }

    fn begin_cpu_access(&self) -> Result<()> {
        self.forward(OpCode::BeginCpuAccess);
        Ok(())
    }

    fn end_cpu_access(&self) -> Result<()> {
        self.forward(OpCode::EndCpuAccess);
        Ok(())
    }

    fn kmap(&self) -> Result<VirtAddrRef> {
        self.forward(OpCode::Kmap);
        Ok(VirtAddrRef(0))
    }

    fn kunmap(&self, _addr: VirtAddrRef) -> Result<()> {
        self.forward(OpCode::Kunmap);
        Ok(())
    }

    fn kmap_atomic(&self) -> Result<VirtAddrRef> {
        self.forward(OpCode::KmapAtomic);
        Ok(VirtAddrRef(0))
    }

    fn kunmap_atomic(&self, _addr: VirtAddrRef) -> Result<()> {
        self.forward(OpCode::KunmapAtomic);
        Ok(())
    }

    fn vmap(&self) -> Result<VirtAddrRef> {
        self.forward(OpCode::Vmap);
        Ok(VirtAddrRef(0))
    }

    fn vunmap(&self, _addr: VirtAddrRef) -> Result<()> {
        self.forward(OpCode::Vunmap);
        Ok(())
    }

    fn release(&self) -> Result<()> {
        self.forward(OpCode::Release);
        self.release_hook.on_local_release(self.handle);
        Ok(())
    }
}
