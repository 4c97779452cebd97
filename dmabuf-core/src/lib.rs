//! Cross-VM DMA-buffer sharing engine.
//!
//! This crate is the hypervisor-agnostic coordination core: handle
//! allocation, the exported/imported buffer registries, the shadow
//! buffer, the request/response transport, and the control surface that
//! ties them together. The hypervisor's actual page-grant primitive, the
//! host's real DMA-buffer subsystem, and peer discovery storage are all
//! injected as traits (see [`share`], [`local_buffer`], [`directory`])
//! so this crate never touches hardware or a specific hypercall ABI
//! directly.

#![cfg_attr(not(feature = "std"), no_std)]

#[cfg(feature = "std")]
extern crate std;

extern crate alloc;

pub mod clock;
pub mod config;
pub mod dispatch;
pub mod directory;
pub mod error;
pub mod exported;
pub mod handle_alloc;
pub mod imported;
pub mod local_buffer;
pub mod page;
pub mod remote_sync;
pub mod service;
pub mod shadow;
pub mod share;
pub mod transport;
pub mod wire;

#[cfg(all(test, feature = "std"))]
pub mod testing;

pub use config::Config;
pub use error::Error;
pub use service::{QueryValue, Service};
