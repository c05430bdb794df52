//! Shared CAN frame types and the raw SocketCAN wire codec.
//!
//! - [`CanFrame`]: validated data / remote-request frame
//! - [`CanErrorFrame`]: error-class + controller-detail flag sets
//! - [`codec`]: fixed 16-byte `struct can_frame` encoding
//! - [`ControllerState`]: bus health reported by the remote device

pub mod codec;
pub mod error;
pub mod error_frame;
pub mod frame;
pub mod state;

pub use codec::{Decoded, WIRE_FRAME_LEN, decode, decode_error, encode, encode_error};
pub use error::{FrameError, FrameResult};
pub use error_frame::{CanErrorFrame, ControllerError, ErrorClass};
pub use frame::{CAN_MAX_DLEN, CanFrame, EXTENDED_ID_MAX, STANDARD_ID_MAX};
pub use state::ControllerState;
