//! Share engine adapter (component C).
//!
//! The hypervisor's page-grant primitive is injected as [`ShareEngine`],
//! the same way the reference kernel injects its scheme handlers behind
//! a `dyn SchemeHandler` rather than calling hardware directly. This
//! module owns the two-level indirection table that lets one
//! [`dmabuf_abi::BufferHandle`] describe many pages; the actual
//! grant/map/unmap hypercalls belong to the host's implementation of the
//! trait.
//!
//! Layout: a top page holds up to [`REFS_PER_PAGE`] L2 refs; each L2
//! page holds up to [`REFS_PER_PAGE`] data refs. Data pages are granted
//! read-write; L2 and top index pages are granted read-only.

use alloc::vec::Vec;

use dmabuf_abi::limits::PAGE_SIZE;

use crate::error::{Error, Result};
use crate::page::PageLayout;

/// Number of refs that fit in one index page, given a ref is a `u64`.
pub const REFS_PER_PAGE: usize = PAGE_SIZE / core::mem::size_of::<u64>();

/// Opaque grant reference returned by [`ShareEngine`] for one page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GrantRef(pub u64);

/// Opaque token for an in-progress foreign mapping, returned by
/// [`ShareEngine::map_data_page`] / [`ShareEngine::map_index_page`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapHandle(pub u64);

/// Exporter-side handle for a whole published two-level table: the
/// top-level grant ref. Must be released exactly once, and only once no
/// peer is still mapping it (I4) — this module enforces the "exactly
/// once" part; detecting an outstanding peer mapping is the host
/// `ShareEngine`'s job, reported via [`Error::StillReferenced`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShareHandle {
    pub top: GrantRef,
}

/// Importer-side handle produced by mapping a [`ShareHandle`]: the data
/// page map handles that must be unmapped on teardown.
#[derive(Debug, Clone)]
pub struct ShareRef {
    pub data_maps: Vec<MapHandle>,
}

/// Hypervisor memory-grant primitive, injected at [`crate::Service`]
/// construction.
pub trait ShareEngine: Send + Sync {
    /// Grant a local data page for foreign read-write access.
    fn grant_data_page(&self, page: u64) -> Result<GrantRef>;
    /// Allocate a fresh local scratch page, write `refs` into it, and
    /// grant it for foreign read-only access. Used for L2 and top pages.
    fn grant_index_page(&self, refs: &[u64]) -> Result<GrantRef>;
    /// Revoke a previously granted page. Fails with
    /// [`Error::StillReferenced`] if a peer has an outstanding map.
    fn ungrant_page(&self, grant: GrantRef) -> Result<()>;
    /// Map a foreign data page by grant ref into this VM's address space.
    fn map_data_page(&self, grant: GrantRef) -> Result<MapHandle>;
    /// Map a foreign index page and decode its refs.
    fn map_index_page(&self, grant: GrantRef) -> Result<(MapHandle, Vec<u64>)>;
    /// Unmap a previously mapped foreign page.
    fn unmap_page(&self, map: MapHandle) -> Result<()>;
}

/// Publish `layout`'s pages as a two-level grant table and return the
/// top-level [`ShareHandle`].
///
/// Fails if `layout.pages.len()` exceeds `REFS_PER_PAGE^2` — the
/// ~16 MiB bound a single handle can describe.
pub fn share_pages<E: ShareEngine>(engine: &E, layout: &PageLayout) -> Result<ShareHandle> {
    let max_pages = REFS_PER_PAGE * REFS_PER_PAGE;
    if layout.pages.is_empty() || layout.pages.len() > max_pages {
        return Err(Error::BadArgument);
    }

    let mut data_refs = Vec::with_capacity(layout.pages.len());
    for &page in &layout.pages {
        data_refs.push(engine.grant_data_page(page)?.0);
    }

    let mut l2_refs = Vec::new();
    for chunk in data_refs.chunks(REFS_PER_PAGE) {
        l2_refs.push(engine.grant_index_page(chunk)?.0);
    }

    let top = engine.grant_index_page(&l2_refs)?;
    Ok(ShareHandle { top })
}

/// Tear down a two-level table previously published by [`share_pages`].
/// Returns [`Error::StillReferenced`] if a peer has not yet released its
/// mapping; the caller (component F/I) is expected to retry later rather
/// than treat this as fatal.
pub fn unshare_pages<E: ShareEngine>(engine: &E, handle: ShareHandle) -> Result<()> {
    engine.ungrant_page(handle.top)
}

/// Importer side: map a [`ShareHandle`]'s data pages, walking
/// top -> L2 -> data and unmapping the top/L2 index pages once the data
/// refs have been read out of them.
pub fn map_pages<E: ShareEngine>(engine: &E, handle: ShareHandle) -> Result<ShareRef> {
    let (top_map, l2_refs) = engine.map_index_page(handle.top)?;
    engine.unmap_page(top_map)?;

    let mut data_maps = Vec::new();
    for &l2_ref in &l2_refs {
        let (l2_map, data_refs) = engine.map_index_page(GrantRef(l2_ref))?;
        engine.unmap_page(l2_map)?;
        for &data_ref in &data_refs {
            data_maps.push(engine.map_data_page(GrantRef(data_ref))?);
        }
    }

    Ok(ShareRef { data_maps })
}

/// Unmap a previously mapped [`ShareRef`].
pub fn unmap_pages<E: ShareEngine>(engine: &E, share_ref: ShareRef) -> Result<()> {
    for map in share_ref.data_maps {
        engine.unmap_page(map)?;
    }
    Ok(())
}
