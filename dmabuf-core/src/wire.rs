//! Operand encoding for each [`dmabuf_abi::Command`] (component E,
//! codec half — routing lives in [`crate::dispatch`]).
//!
//! Layout exactly as specified: `EXPORT` carries
//! `handle(4) nents first_offset last_length share_handle priv(4)`;
//! `OPS_TO_SOURCE` carries `handle(4) op_code`; the rest carry just
//! `handle(4)`.

use dmabuf_abi::{BufferHandle, Command, Frame, OpCode};

use crate::share::{GrantRef, ShareHandle};

pub fn encode_handle(handle: BufferHandle, frame: &mut Frame) {
    frame.operands[0] = handle.id;
    frame.operands[1] = handle.key[0];
    frame.operands[2] = handle.key[1];
    frame.operands[3] = handle.key[2];
}

pub fn decode_handle(frame: &Frame) -> BufferHandle {
    BufferHandle {
        id: frame.operands[0],
        key: [frame.operands[1], frame.operands[2], frame.operands[3]],
    }
}

/// Bytes of `priv` metadata a frame can carry inline (4 operand words).
pub const PRIV_INLINE_BYTES: usize = 16;

fn encode_priv(priv_data: &[u8], frame: &mut Frame) {
    let mut bytes = [0u8; PRIV_INLINE_BYTES];
    let n = priv_data.len().min(PRIV_INLINE_BYTES);
    bytes[..n].copy_from_slice(&priv_data[..n]);
    for i in 0..4 {
        frame.operands[8 + i] = u32::from_le_bytes(bytes[i * 4..i * 4 + 4].try_into().unwrap());
    }
}

fn decode_priv(frame: &Frame) -> alloc::vec::Vec<u8> {
    let mut out = alloc::vec::Vec::with_capacity(PRIV_INLINE_BYTES);
    for i in 0..4 {
        out.extend_from_slice(&frame.operands[8 + i].to_le_bytes());
    }
    out
}

pub fn encode_export(
    handle: BufferHandle,
    nents: u32,
    first_offset: u16,
    last_length: u16,
    share_handle: ShareHandle,
    priv_data: &[u8],
) -> Frame {
    let mut frame = Frame::zeroed();
    frame.command = Command::Export as u32;
    encode_handle(handle, &mut frame);
    frame.operands[4] = nents;
    frame.operands[5] = first_offset as u32;
    frame.operands[6] = last_length as u32;
    frame.operands[7] = share_handle.top.0 as u32;
    encode_priv(priv_data, &mut frame);
    frame
}

pub struct DecodedExport {
    pub handle: BufferHandle,
    pub nents: u32,
    pub first_offset: u16,
    pub last_length: u16,
    pub share_handle: ShareHandle,
    pub priv_data: alloc::vec::Vec<u8>,
}

pub fn decode_export(frame: &Frame) -> DecodedExport {
    DecodedExport {
        handle: decode_handle(frame),
        nents: frame.operands[4],
        first_offset: frame.operands[5] as u16,
        last_length: frame.operands[6] as u16,
        share_handle: ShareHandle { top: GrantRef(frame.operands[7] as u64) },
        priv_data: decode_priv(frame),
    }
}

pub fn encode_handle_only(command: Command, handle: BufferHandle) -> Frame {
    let mut frame = Frame::zeroed();
    frame.command = command as u32;
    encode_handle(handle, &mut frame);
    frame
}

pub fn encode_ops_to_source(handle: BufferHandle, op: OpCode) -> Frame {
    let mut frame = Frame::zeroed();
    frame.command = Command::OpsToSource as u32;
    encode_handle(handle, &mut frame);
    frame.operands[4] = op as u32;
    frame
}

pub fn decode_op_code(frame: &Frame) -> Option<OpCode> {
    OpCode::from_u32(frame.operands[4])
}
