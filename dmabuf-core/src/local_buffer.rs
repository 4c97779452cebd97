//! Host DMA-buffer collaborator contract.
//!
//! The host's real DMA-buffer subsystem is out of scope; this trait is
//! the seam the exporter and the shadow buffer both forward onto, in the
//! same spirit as the reference kernel's `Buffer` trait
//! (`size`/`as_slice`/`resize`) abstracting over a concrete allocation.

use alloc::boxed::Box;
use alloc::sync::Arc;

use crate::error::Result;
use crate::page::{PageLayout, Segment};

/// A scatter/gather table attached to a device, as produced by
/// [`LocalBuffer::map`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SgtRef(pub u64);

/// A kernel-virtual mapping, as produced by [`LocalBuffer::kmap`] /
/// [`LocalBuffer::vmap`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VirtAddrRef(pub u64);

/// A reference-counted handle to a host DMA buffer, attached to a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttachRef(pub u64);

/// One real DMA buffer, exactly as the host's own subsystem models it.
/// Both the exporter (component F/I) and the shadow buffer (component H)
/// operate on this trait; the shadow buffer's implementation is what
/// forwards each call across the wire instead of executing it locally.
pub trait LocalBuffer: Send + Sync {
    fn size(&self) -> usize;
    fn segments(&self) -> alloc::vec::Vec<Segment>;

    fn attach(&self) -> Result<AttachRef>;
    fn detach(&self, attach: AttachRef) -> Result<()>;

    fn map(&self, attach: AttachRef) -> Result<SgtRef>;
    fn unmap(&self, sgt: SgtRef) -> Result<()>;

    fn begin_cpu_access(&self) -> Result<()>;
    fn end_cpu_access(&self) -> Result<()>;

    fn kmap(&self) -> Result<VirtAddrRef>;
    fn kunmap(&self, addr: VirtAddrRef) -> Result<()>;
    fn kmap_atomic(&self) -> Result<VirtAddrRef>;
    fn kunmap_atomic(&self, addr: VirtAddrRef) -> Result<()>;

    fn vmap(&self) -> Result<VirtAddrRef>;
    fn vunmap(&self, addr: VirtAddrRef) -> Result<()>;

    fn release(&self) -> Result<()>;
}

pub type LocalBufferRef = Arc<dyn LocalBuffer>;

/// Attach to `fd` and return both the flattened page layout and the
/// owned buffer reference, exactly what `ExportRemote` needs from the
/// host collaborator before the exporter can call [`crate::share::share_pages`].
pub fn attach_and_flatten(buf: LocalBufferRef) -> Result<(PageLayout, LocalBufferRef)> {
    let layout = crate::page::flatten(&buf.segments()).ok_or(crate::error::Error::BadArgument)?;
    Ok((layout, buf))
}

/// A host-subsystem factory for opening a local fd as a [`LocalBuffer`].
/// Injected so this crate never parses a host file-descriptor table.
pub trait LocalBufferSource: Send + Sync {
    fn open(&self, fd: i32) -> Result<LocalBufferRef>;
    /// Create a new local fd backed by `buf`, used by `ExportFd` on the
    /// importer to hand the shadow buffer out as something that looks
    /// native to the rest of the importing VM.
    fn export_fd(&self, buf: LocalBufferRef) -> Result<i32>;
}

pub type BoxedLocalBufferSource = Box<dyn LocalBufferSource>;
