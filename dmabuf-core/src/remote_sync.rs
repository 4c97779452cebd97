//! Remote-sync handler (component I): exporter-side replay of shadow
//! buffer operations forwarded via `OPS_TO_SOURCE`.
//!
//! Each push op (`Attach`/`Map`/`Kmap`/`KmapAtomic`/`Vmap`) allocates a
//! resource from the real [`crate::local_buffer::LocalBuffer`] and pushes
//! it onto the matching activity stack (I3); each pop op pops the top and
//! releases it. A pop against an empty stack is a protocol violation —
//! logged and acknowledged as an error rather than panicking, per the
//! reference kernel's "never crash on peer misbehavior" house rule.

use dmabuf_abi::{BufferHandle, OpCode};

use crate::error::{Error, Result};
use crate::exported::{ActivityStacks, ExportedRegistry};
use crate::handle_alloc::{HandleAllocator, Rng};
use crate::local_buffer::LocalBufferRef;
use crate::share::ShareEngine;

fn apply_activity_op(local_buf: &LocalBufferRef, activity: &mut ActivityStacks, op: OpCode) -> Result<()> {
    match op {
        OpCode::Attach => {
            activity.push_attach(local_buf.attach()?);
            Ok(())
        }
        OpCode::Detach => local_buf.detach(activity.pop_attach()?),
        OpCode::Map => {
            let attach = *activity.attachments.last().ok_or(Error::ProtocolViolation)?;
            activity.push_map(local_buf.map(attach)?);
            Ok(())
        }
        OpCode::Unmap => local_buf.unmap(activity.pop_map()?),
        OpCode::BeginCpuAccess => local_buf.begin_cpu_access(),
        OpCode::EndCpuAccess => local_buf.end_cpu_access(),
        OpCode::Kmap => {
            activity.push_kmap(local_buf.kmap()?);
            Ok(())
        }
        OpCode::Kunmap => local_buf.kunmap(activity.pop_kmap()?),
        OpCode::KmapAtomic => {
            activity.push_kmap(local_buf.kmap_atomic()?);
            Ok(())
        }
        OpCode::KunmapAtomic => local_buf.kunmap_atomic(activity.pop_kmap()?),
        OpCode::Vmap => {
            activity.push_vmap(local_buf.vmap()?);
            Ok(())
        }
        OpCode::Vunmap => local_buf.vunmap(activity.pop_vmap()?),
        OpCode::Mmap => {
            log::warn!("rejecting unsupported mmap forward");
            Err(Error::BadArgument)
        }
        OpCode::Release => unreachable!("release is handled by `apply` before reaching here"),
    }
}

/// Entry point for a decoded `OPS_TO_SOURCE` frame.
pub fn apply<E: ShareEngine, R: Rng>(
    exported: &ExportedRegistry,
    engine: &E,
    handle_alloc: &HandleAllocator<R>,
    handle: BufferHandle,
    op: OpCode,
) -> Result<()> {
    if op == OpCode::Release {
        return release(exported, engine, handle_alloc, handle);
    }

    exported
        .with(handle, |buf| apply_activity_op(&buf.local_buf, &mut buf.activity, op))
        .ok_or(Error::NotFound)?
}

fn release<E: ShareEngine, R: Rng>(
    exported: &ExportedRegistry,
    engine: &E,
    handle_alloc: &HandleAllocator<R>,
    handle: BufferHandle,
) -> Result<()> {
    let should_teardown = exported
        .with(handle, |buf| {
            if buf.importer_exported_count == 0 {
                log::warn!("RELEASE for handle {:?} with importer_exported_count already at 0", handle);
            } else {
                buf.importer_exported_count -= 1;
            }
            buf.importer_exported_count == 0 && !buf.valid && !buf.unexport.scheduled && buf.activity.is_empty()
        })
        .ok_or(Error::NotFound)?;

    if should_teardown {
        teardown(exported, engine, handle_alloc, handle)?;
    }
    Ok(())
}

/// Unwind every activity stack in the order dependent state must come
/// down: vmaps and kmaps first (neither depends on anything else still
/// outstanding), then mappings, then the attachments they were mapped
/// under. A verb failing here is logged and skipped rather than
/// aborting the drain — teardown must still reach `local_buf.release()`.
fn drain_activity(local_buf: &LocalBufferRef, activity: &mut ActivityStacks) {
    while let Ok(addr) = activity.pop_vmap() {
        if let Err(err) = local_buf.vunmap(addr) {
            log::warn!("vunmap during teardown failed: {err}");
        }
    }
    while let Ok(addr) = activity.pop_kmap() {
        if let Err(err) = local_buf.kunmap(addr) {
            log::warn!("kunmap during teardown failed: {err}");
        }
    }
    while let Ok(sgt) = activity.pop_map() {
        if let Err(err) = local_buf.unmap(sgt) {
            log::warn!("unmap during teardown failed: {err}");
        }
    }
    while let Ok(attach) = activity.pop_attach() {
        if let Err(err) = local_buf.detach(attach) {
            log::warn!("detach during teardown failed: {err}");
        }
    }
}

/// Full exporter-side teardown: release the share table, drain the
/// activity stacks, release the local buffer, retire the handle slot.
/// Shared between this module's `RELEASE` path and the delayed-unexport
/// timer (`crate::service`).
///
/// If the share engine reports the grant is still foreign-referenced,
/// the registry entry is left untouched so the caller can retry later —
/// mirrors the "timer/worker failures drop the work with a diagnostic"
/// propagation policy.
pub fn teardown<E: ShareEngine, R: Rng>(
    exported: &ExportedRegistry,
    engine: &E,
    handle_alloc: &HandleAllocator<R>,
    handle: BufferHandle,
) -> Result<()> {
    let Some(share_handle) = exported.with(handle, |buf| buf.share_handle) else {
        return Ok(());
    };

    if let Err(err) = crate::share::unshare_pages(engine, share_handle) {
        log::warn!("teardown of handle {:?} deferred: {}", handle, err);
        return Err(err);
    }

    let Some(mut buf) = exported.remove(handle) else { return Ok(()) };
    drain_activity(&buf.local_buf, &mut buf.activity);
    if let Err(err) = buf.local_buf.unmap(buf.initial_map) {
        log::warn!("unmap of initial mapping during teardown failed: {err}");
    }
    if let Err(err) = buf.local_buf.detach(buf.initial_attach) {
        log::warn!("detach of initial attachment during teardown failed: {err}");
    }
    buf.local_buf.release()?;
    handle_alloc.retire(handle);
    Ok(())
}
