//! Ambient configuration.
//!
//! Tunables the reference kernel would hard-code as bare `const`s are
//! grouped here. [`dmabuf_abi::Limits`] holds the wire-visible subset
//! (shared with the other side of the protocol); [`Config`] wraps it
//! together with the local VM's own identity.

use dmabuf_abi::{Limits, VmId};

#[derive(Debug, Clone, Copy)]
pub struct Config {
    pub local_vm: VmId,
    pub limits: Limits,
}

impl Config {
    pub fn new(local_vm: VmId) -> Self {
        Self {
            local_vm,
            limits: Limits::default(),
        }
    }

    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }
}
