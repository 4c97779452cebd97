//! Imported registry (component G).
//!
//! Per-handle importer state: the remote handle's page layout, the
//! mapped share ref once `ExportFd` has succeeded at least once, and the
//! shadow buffer wrapping it. Same locked-`BTreeMap`-keyed-by-id shape as
//! [`crate::exported::ExportedRegistry`].

use alloc::collections::BTreeMap;
use alloc::sync::Arc;

use dmabuf_abi::BufferHandle;
use spinning_top::Spinlock;

use crate::local_buffer::LocalBufferRef;
use crate::page::ImportLayout;
use crate::share::{self, ShareEngine, ShareHandle, ShareRef};

pub struct ImportedBuffer {
    pub handle: BufferHandle,
    pub layout: ImportLayout,
    pub share_handle: ShareHandle,
    pub share_ref: Option<ShareRef>,
    pub shadow_buf: Option<LocalBufferRef>,
    pub valid: bool,
    pub local_importers: u32,
    pub priv_data: alloc::vec::Vec<u8>,
}

impl ImportedBuffer {
    pub fn new(
        handle: BufferHandle,
        layout: ImportLayout,
        share_handle: ShareHandle,
        priv_data: alloc::vec::Vec<u8>,
    ) -> Self {
        Self {
            handle,
            layout,
            share_handle,
            share_ref: None,
            shadow_buf: None,
            valid: true,
            local_importers: 0,
            priv_data,
        }
    }

    pub fn is_collectible(&self) -> bool {
        !self.valid && self.local_importers == 0
    }
}

pub struct ImportedRegistry {
    entries: Spinlock<BTreeMap<u32, ImportedBuffer>>,
}

impl ImportedRegistry {
    pub fn new() -> Self {
        Self {
            entries: Spinlock::new(BTreeMap::new()),
        }
    }

    pub fn insert(&self, buf: ImportedBuffer) {
        self.entries.lock().insert(buf.handle.id, buf);
    }

    pub fn with<R>(&self, handle: BufferHandle, f: impl FnOnce(&mut ImportedBuffer) -> R) -> Option<R> {
        let mut guard = self.entries.lock();
        let entry = guard.get_mut(&handle.id)?;
        if entry.handle != handle {
            return None;
        }
        Some(f(entry))
    }

    pub fn remove(&self, handle: BufferHandle) -> Option<ImportedBuffer> {
        let mut guard = self.entries.lock();
        if guard.get(&handle.id).map(|e| e.handle) != Some(handle) {
            return None;
        }
        guard.remove(&handle.id)
    }

    pub fn contains(&self, handle: BufferHandle) -> bool {
        self.entries.lock().get(&handle.id).map(|e| e.handle) == Some(handle)
    }
}

impl Default for ImportedRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Callback the shadow buffer (component H) drives when the host
/// releases its local fd. Kept as a trait object so [`crate::shadow::ShadowBuffer`],
/// which lives behind `Arc<dyn LocalBuffer>` with no type parameters of
/// its own, doesn't need to be generic over the share engine.
pub trait ImportReleaseHook: Send + Sync {
    fn on_local_release(&self, handle: BufferHandle);
}

/// Default [`ImportReleaseHook`]: decrements `local_importers`, and once
/// it reaches zero, unmaps the shared pages and — if the exporter has
/// already invalidated the entry — removes it (§4.G / §4.H "release" row).
pub struct LocalReleaseHandler<S: ShareEngine> {
    imported: Arc<ImportedRegistry>,
    share_engine: Arc<S>,
}

impl<S: ShareEngine> LocalReleaseHandler<S> {
    pub fn new(imported: Arc<ImportedRegistry>, share_engine: Arc<S>) -> Self {
        Self { imported, share_engine }
    }
}

impl<S: ShareEngine> ImportReleaseHook for LocalReleaseHandler<S> {
    fn on_local_release(&self, handle: BufferHandle) {
        let drained = self.imported.with(handle, |e| {
            e.local_importers = e.local_importers.saturating_sub(1);
            if e.local_importers == 0 {
                Some((e.share_ref.take(), !e.valid))
            } else {
                None
            }
        });

        let Some(Some((share_ref, should_remove))) = drained else { return };
        if let Some(share_ref) = share_ref {
            if let Err(err) = share::unmap_pages(&*self.share_engine, share_ref) {
                log::warn!("unmap on local release of {handle:?} failed: {err}");
            }
        }
        if should_remove {
            self.imported.remove(handle);
        }
    }
}
