//! Wire-level ABI shared between the exporter and importer sides of the
//! cross-VM DMA-buffer sharing engine.
//!
//! This crate contains only what both ends of the wire must agree on:
//! the buffer handle encoding, the fixed-width ring frame layout, the
//! command and operation codes carried in a frame, and the handful of
//! size limits that bound the protocol. It has no transport, registry,
//! or locking logic of its own — that lives in `dmabuf-core`.

#![cfg_attr(not(feature = "std"), no_std)]

#[cfg(feature = "std")]
extern crate std;

extern crate alloc;

pub mod command;
pub mod frame;
pub mod handle;
pub mod limits;
pub mod query;

pub use command::{Command, OpCode};
pub use frame::Frame;
pub use handle::BufferHandle;
pub use limits::Limits;
pub use query::QueryItem;

/// Identifier for a virtual machine on the hypervisor's local fabric.
///
/// Origin VM ids are small and dense; they are also embedded in the top
/// byte of every [`handle::BufferHandle::id`], so only values `0..=255`
/// are representable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VmId(pub u8);

impl VmId {
    pub const fn as_u8(self) -> u8 {
        self.0
    }
}
