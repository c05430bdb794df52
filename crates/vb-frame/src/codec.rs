//! Fixed-size SocketCAN wire codec.
//!
//! Layout of the 16-byte `struct can_frame` block:
//!
//! | bytes | content |
//! |-------|---------|
//! | 0–3   | little-endian id word: bit 31 EFF, bit 30 RTR, bit 29 ERR, low bits id or error class |
//! | 4     | data length code |
//! | 5–7   | reserved |
//! | 8–15  | payload, zero padded |
//!
//! Error frames always carry DLC 8; payload byte 1 holds the controller detail.

use crate::error::{FrameError, FrameResult};
use crate::error_frame::{CanErrorFrame, ControllerError, ErrorClass};
use crate::frame::{CAN_MAX_DLEN, CanFrame};

/// Size of one raw frame on the socket.
pub const WIRE_FRAME_LEN: usize = 16;

const CAN_EFF_FLAG: u32 = 0x8000_0000;
const CAN_RTR_FLAG: u32 = 0x4000_0000;
const CAN_ERR_FLAG: u32 = 0x2000_0000;

const CAN_ERR_MASK: u32 = 0x1FFF_FFFF;

const CAN_ERR_DLC: u8 = 8;

const DLC_OFFSET: usize = 4;
const DATA_OFFSET: usize = 8;
const CTRL_OFFSET: usize = DATA_OFFSET + 1;

/// Result of decoding a wire block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    Frame(CanFrame),
    Error(CanErrorFrame),
}

/// Encode a data or remote-request frame.
pub fn encode(frame: &CanFrame) -> [u8; WIRE_FRAME_LEN] {
    let mut id_word = frame.id();
    if frame.is_extended() {
        id_word |= CAN_EFF_FLAG;
    }
    if frame.is_remote() {
        id_word |= CAN_RTR_FLAG;
    }

    let mut block = [0u8; WIRE_FRAME_LEN];
    block[..4].copy_from_slice(&id_word.to_le_bytes());
    block[DLC_OFFSET] = frame.dlc();
    let data = frame.data();
    block[DATA_OFFSET..DATA_OFFSET + data.len()].copy_from_slice(data);
    block
}

/// Encode an error frame.
pub fn encode_error(frame: &CanErrorFrame) -> [u8; WIRE_FRAME_LEN] {
    let id_word = CAN_ERR_FLAG | (frame.class().bits() & CAN_ERR_MASK);

    let mut block = [0u8; WIRE_FRAME_LEN];
    block[..4].copy_from_slice(&id_word.to_le_bytes());
    block[DLC_OFFSET] = CAN_ERR_DLC;
    block[CTRL_OFFSET] = frame.controller().bits();
    block
}

/// Decode a wire block.
///
/// Returns `None` for blocks of the wrong size, with a data length code
/// above 8, or with id bits set beyond the range of the frame's format.
pub fn decode(block: &[u8]) -> Option<Decoded> {
    if block.len() != WIRE_FRAME_LEN {
        return None;
    }
    let id_word = u32::from_le_bytes([block[0], block[1], block[2], block[3]]);

    if id_word & CAN_ERR_FLAG != 0 {
        let class = ErrorClass::from_bits_truncate(id_word & CAN_ERR_MASK);
        let controller = ControllerError::from_bits_truncate(block[CTRL_OFFSET]);
        return Some(Decoded::Error(CanErrorFrame::new(class, controller)));
    }

    let dlc = block[DLC_OFFSET];
    if dlc as usize > CAN_MAX_DLEN {
        return None;
    }

    let extended = id_word & CAN_EFF_FLAG != 0;
    let id = id_word & !(CAN_EFF_FLAG | CAN_RTR_FLAG);

    let frame = if id_word & CAN_RTR_FLAG != 0 {
        CanFrame::new_remote(id, extended, dlc)
    } else {
        CanFrame::new_data(id, extended, &block[DATA_OFFSET..DATA_OFFSET + dlc as usize])
    };
    frame.ok().map(Decoded::Frame)
}

/// Decode a wire block that must hold an error frame.
pub fn decode_error(block: &[u8]) -> FrameResult<CanErrorFrame> {
    if block.len() != WIRE_FRAME_LEN {
        return Err(FrameError::WireLength { len: block.len() });
    }
    match decode(block) {
        Some(Decoded::Error(frame)) => Ok(frame),
        _ => Err(FrameError::NotErrorFrame),
    }
}
