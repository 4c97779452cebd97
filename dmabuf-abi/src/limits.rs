//! Protocol-wide size limits.
//!
//! These are the values the reference kernel would spell as bare
//! `const`s; they're grouped here, and the handful a host integration may
//! legitimately want to override are exposed again as fields of
//! [`Limits`] so a `Service` can be built with non-default values without
//! reaching for a `cfg` flag.

/// Native page size assumed by the sharing protocol.
pub const PAGE_SIZE: usize = 4096;

/// Upper bound on exported-buffer slots per origin VM (also bounds
/// [`crate::handle::SLOT_BITS`], but kept distinct since a host may want
/// to cap it lower).
pub const DEFAULT_MAX_SLOTS: u32 = 1000;

/// Maximum bytes of opaque application metadata carried alongside a
/// handle.
pub const MAX_PRIV_BYTES: usize = 32;

/// Default number of frame slots in a request/response ring. Must be a
/// power of two.
pub const DEFAULT_RING_SLOTS: usize = 256;

/// Default timeout, in milliseconds, for a synchronous `send`.
pub const DEFAULT_SYNC_TIMEOUT_MS: u32 = 100;

/// Polling granularity while waiting on a synchronous `send`, in
/// microseconds. `DEFAULT_SYNC_TIMEOUT_MS * 1000 / DEFAULT_POLL_PERIOD_US`
/// gives the reference kernel's documented "~1000 polls of 100us".
pub const DEFAULT_POLL_PERIOD_US: u32 = 100;

/// Tunables a host integration may override at [`crate`] construction
/// time rather than at compile time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub max_slots: u32,
    pub ring_slots: usize,
    pub sync_timeout_ms: u32,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_slots: DEFAULT_MAX_SLOTS,
            ring_slots: DEFAULT_RING_SLOTS,
            sync_timeout_ms: DEFAULT_SYNC_TIMEOUT_MS,
        }
    }
}
