//! Validated CAN 2.0A/2.0B data and remote-request frames.

use serde::{Deserialize, Serialize};

use crate::error::{FrameError, FrameResult};

/// Largest 11-bit (standard) arbitration identifier.
pub const STANDARD_ID_MAX: u32 = 0x7FF;

/// Largest 29-bit (extended) arbitration identifier.
pub const EXTENDED_ID_MAX: u32 = 0x1FFF_FFFF;

/// Maximum payload length of a classic CAN frame.
pub const CAN_MAX_DLEN: usize = 8;

/// A classic CAN data or remote-request frame.
///
/// The identifier is checked against the addressing range selected by the
/// extended flag at construction time, so a `CanFrame` value can always be
/// encoded without masking or truncation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "FrameRepr", into = "FrameRepr")]
pub struct CanFrame {
    id: u32,
    dlc: u8,
    data: [u8; CAN_MAX_DLEN],
    extended: bool,
    remote: bool,
}

impl CanFrame {
    /// Build a data frame carrying `data` (0–8 bytes).
    pub fn new_data(id: u32, extended: bool, data: &[u8]) -> FrameResult<Self> {
        check_id(id, extended)?;
        if data.len() > CAN_MAX_DLEN {
            return Err(FrameError::PayloadTooLong { len: data.len() });
        }
        let mut payload = [0u8; CAN_MAX_DLEN];
        payload[..data.len()].copy_from_slice(data);
        Ok(Self {
            id,
            dlc: data.len() as u8,
            data: payload,
            extended,
            remote: false,
        })
    }

    /// Build a remote-request frame asking for `dlc` bytes.
    pub fn new_remote(id: u32, extended: bool, dlc: u8) -> FrameResult<Self> {
        check_id(id, extended)?;
        if dlc as usize > CAN_MAX_DLEN {
            return Err(FrameError::PayloadTooLong { len: dlc as usize });
        }
        Ok(Self {
            id,
            dlc,
            data: [0u8; CAN_MAX_DLEN],
            extended,
            remote: true,
        })
    }

    /// Arbitration identifier without format flags.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Data length code (0–8).
    pub fn dlc(&self) -> u8 {
        self.dlc
    }

    /// Payload bytes. Empty for remote-request frames.
    pub fn data(&self) -> &[u8] {
        if self.remote {
            &[]
        } else {
            &self.data[..self.dlc as usize]
        }
    }

    pub fn is_extended(&self) -> bool {
        self.extended
    }

    pub fn is_remote(&self) -> bool {
        self.remote
    }
}

impl std::fmt::Display for CanFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.extended {
            write!(f, "extended Frame {:08x}", self.id)?;
        } else {
            write!(f, "standard Frame {:03x}", self.id)?;
        }
        if self.remote {
            write!(f, " RTR")?;
        }
        write!(f, " DLC: {}, Data: ", self.dlc)?;
        for b in self.data() {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

fn check_id(id: u32, extended: bool) -> FrameResult<()> {
    if extended {
        if id > EXTENDED_ID_MAX {
            return Err(FrameError::ExtendedIdOutOfRange { id });
        }
    } else if id > STANDARD_ID_MAX {
        return Err(FrameError::StandardIdOutOfRange { id });
    }
    Ok(())
}

// ── Serde representation ────────────────────────────────────────

/// Serialized form used by the device transport.
#[derive(Serialize, Deserialize)]
struct FrameRepr {
    id: u32,
    #[serde(default)]
    data: Vec<u8>,
    #[serde(default)]
    extended: bool,
    #[serde(default)]
    remote: bool,
    /// Requested length of a remote frame; data frames derive it from `data`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    dlc: Option<u8>,
}

impl TryFrom<FrameRepr> for CanFrame {
    type Error = FrameError;

    fn try_from(repr: FrameRepr) -> FrameResult<Self> {
        if repr.remote {
            CanFrame::new_remote(repr.id, repr.extended, repr.dlc.unwrap_or(0))
        } else {
            CanFrame::new_data(repr.id, repr.extended, &repr.data)
        }
    }
}

impl From<CanFrame> for FrameRepr {
    fn from(frame: CanFrame) -> Self {
        Self {
            id: frame.id,
            data: frame.data().to_vec(),
            extended: frame.extended,
            remote: frame.remote,
            dlc: frame.remote.then_some(frame.dlc),
        }
    }
}
