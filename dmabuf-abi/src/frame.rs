//! Fixed-width ring frame.
//!
//! Every request and response published to a ring is exactly
//! [`FRAME_WORDS`] 32-bit words, laid out so the producer and consumer
//! can interpret a raw shared-memory slot as `Frame` directly via
//! `zerocopy`, the same way the reference kernel's virtio transport
//! interprets device-provided memory as typed structs.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// Number of operand words following `request_id`, `status`, `command`.
/// Sized to the widest command: `EXPORT` needs `op[0..3]` for the
/// handle, `op[4..7]` for layout fields, and `op[8..11]` for the
/// private-data payload.
pub const OPERAND_WORDS: usize = 12;

/// Total words in a frame.
pub const FRAME_WORDS: usize = 3 + OPERAND_WORDS;

/// A single request or response slot on a ring.
///
/// `#[repr(C)]` plus the `zerocopy` traits let a ring implementation cast
/// a raw `&[u8; FRAME_WORDS * 4]` slot straight to `&Frame` and back
/// without a manual field-by-field parse.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct Frame {
    pub request_id: u32,
    pub status: u32,
    pub command: u32,
    pub operands: [u32; OPERAND_WORDS],
}

impl Frame {
    pub const fn zeroed() -> Self {
        Self {
            request_id: 0,
            status: 0,
            command: 0,
            operands: [0; OPERAND_WORDS],
        }
    }
}

impl Default for Frame {
    fn default() -> Self {
        Self::zeroed()
    }
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;
    use zerocopy::IntoBytes;

    #[test]
    fn frame_is_exactly_frame_words_u32s() {
        assert_eq!(core::mem::size_of::<Frame>(), FRAME_WORDS * 4);
    }

    #[test]
    fn frame_roundtrips_through_bytes() {
        let mut f = Frame::zeroed();
        f.request_id = 42;
        f.command = 1;
        f.operands[0] = 0xdead_beef;
        let bytes = f.as_bytes();
        let back = Frame::read_from_bytes(bytes).unwrap();
        assert_eq!(f, back);
    }
}
