//! Crate-wide error type.
//!
//! One flat `Copy` enum, no boxed trait objects, no string allocation on
//! the hot path — matching the reference kernel's `BufferError` /
//! `ChannelError` style rather than an allocating error hierarchy.

use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// No buffer, peer, or query item matches the given key.
    NotFound,
    /// The buffer has been marked unexported; no new imports may start.
    Invalid,
    /// No ring/event channel is established with this peer.
    PeerDown,
    /// A synchronous send did not get a response in time.
    Timeout,
    /// The handle allocator has no free slots left.
    Exhausted,
    /// A share/unshare raced with an outstanding foreign mapping.
    StillReferenced,
    /// Caller-supplied argument was malformed (bad fd, oversized `priv`, ...).
    BadArgument,
    /// An `OPS_TO_SOURCE` pop arrived with nothing on the activity stack,
    /// or carried an op code this side doesn't recognize.
    ProtocolViolation,
    /// `TxChSetup` was called for a peer whose rings are already up.
    AlreadyUp,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Error::NotFound => "not found",
            Error::Invalid => "buffer unexported",
            Error::PeerDown => "peer not reachable",
            Error::Timeout => "request timed out",
            Error::Exhausted => "handle space exhausted",
            Error::StillReferenced => "still referenced by a peer",
            Error::BadArgument => "bad argument",
            Error::ProtocolViolation => "protocol violation",
            Error::AlreadyUp => "channel already established",
        };
        f.write_str(msg)
    }
}

impl core::error::Error for Error {}

pub type Result<T> = core::result::Result<T, Error>;
