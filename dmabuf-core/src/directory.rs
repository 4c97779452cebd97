//! Peer-discovery directory.
//!
//! Not the reference kernel's VFS-style `Directory` (a listable
//! filesystem node) — this is a watchable key-value store used purely
//! for publishing `{grant_ref, event_port}` so peers can find each
//! other's ring. Modeled the same way the kernel injects a scheme
//! handler: a trait the host implements over whatever actual storage
//! (hypervisor xenstore-equivalent, shared config service, ...) backs it
//! in a real deployment.

use alloc::string::String;

use dmabuf_abi::VmId;

use crate::error::Result;

/// What an exporting side publishes so its peer can map its ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerAdvert {
    pub grant_ref: u32,
    pub event_port: u32,
}

pub(crate) fn peer_path(local: VmId, remote: VmId) -> String {
    alloc::format!("/vm/{}/peer/{}", local.as_u8(), remote.as_u8())
}

/// Key-value directory with watchable nodes, injected at
/// [`crate::Service`] construction.
pub trait Directory: Send + Sync {
    fn publish(&self, path: &str, advert: PeerAdvert) -> Result<()>;
    fn remove(&self, path: &str) -> Result<()>;
    fn read(&self, path: &str) -> Option<PeerAdvert>;
    /// Register a watch; `on_change` fires once when `path` next changes
    /// (appears, updates, or is removed — `None` on removal). A real
    /// backend invokes this from whatever I/O thread observes the
    /// change; this crate never polls.
    fn watch(&self, path: &str, on_change: alloc::boxed::Box<dyn Fn(Option<PeerAdvert>) + Send>);
}

/// Publish this VM's ring advert for `remote` and install a watch on the
/// reciprocal path.
pub fn announce_and_watch(
    dir: &dyn Directory,
    local: VmId,
    remote: VmId,
    advert: PeerAdvert,
    on_peer_ready: alloc::boxed::Box<dyn Fn(Option<PeerAdvert>) + Send>,
) -> Result<()> {
    dir.publish(&peer_path(local, remote), advert)?;
    dir.watch(&peer_path(remote, local), on_peer_ready);
    Ok(())
}

pub fn withdraw(dir: &dyn Directory, local: VmId, remote: VmId) -> Result<()> {
    dir.remove(&peer_path(local, remote))
}
