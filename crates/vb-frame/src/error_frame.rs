//! CAN error frames as synthesized by the gateway.
//!
//! Class and controller detail are independent flag sets mirroring the
//! Linux `can/error.h` layout; several bits may be set at once.

use bitflags::bitflags;

bitflags! {
    /// Error class carried in the identifier field of an error frame.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ErrorClass: u32 {
        /// TX timeout (by netdevice driver).
        const TX_TIMEOUT = 0x0000_0001;
        /// Lost arbitration.
        const LOST_ARBITRATION = 0x0000_0002;
        /// Controller problems, details in [`ControllerError`].
        const CONTROLLER = 0x0000_0004;
        /// Protocol violations.
        const PROTOCOL = 0x0000_0008;
        /// Transceiver status.
        const TRANSCEIVER = 0x0000_0010;
        /// Received no ACK on transmission.
        const NO_ACK = 0x0000_0020;
        /// Bus off.
        const BUS_OFF = 0x0000_0040;
        /// Bus error.
        const BUS_ERROR = 0x0000_0080;
        /// Controller restarted.
        const RESTARTED = 0x0000_0100;
    }
}

bitflags! {
    /// Controller problem details, payload byte 1 of an error frame.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ControllerError: u8 {
        const RX_OVERFLOW = 0x01;
        const TX_OVERFLOW = 0x02;
        const RX_WARNING = 0x04;
        const TX_WARNING = 0x08;
        const RX_PASSIVE = 0x10;
        const TX_PASSIVE = 0x20;
    }
}

/// A CAN error frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CanErrorFrame {
    class: ErrorClass,
    controller: ControllerError,
}

impl CanErrorFrame {
    /// Build an error frame. Controller details are only kept when the
    /// [`ErrorClass::CONTROLLER`] bit is set.
    pub fn new(class: ErrorClass, controller: ControllerError) -> Self {
        let controller = if class.contains(ErrorClass::CONTROLLER) {
            controller
        } else {
            ControllerError::empty()
        };
        Self { class, controller }
    }

    /// Error frame with only class bits set.
    pub fn from_class(class: ErrorClass) -> Self {
        Self::new(class, ControllerError::empty())
    }

    /// The controller went bus-off.
    pub fn bus_off() -> Self {
        Self::from_class(ErrorClass::BUS_OFF)
    }

    /// The controller reached error-passive level in both directions.
    pub fn error_passive() -> Self {
        Self::new(
            ErrorClass::CONTROLLER,
            ControllerError::RX_PASSIVE | ControllerError::TX_PASSIVE,
        )
    }

    pub fn class(&self) -> ErrorClass {
        self.class
    }

    pub fn controller(&self) -> ControllerError {
        self.controller
    }
}

impl std::fmt::Display for CanErrorFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "error Frame class: {:08x}, ctrl: {:02x}",
            self.class.bits(),
            self.controller.bits()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn controller_detail_dropped_without_controller_class() {
        let frame = CanErrorFrame::new(ErrorClass::BUS_OFF, ControllerError::RX_OVERFLOW);
        assert!(frame.controller().is_empty());
    }

    #[test]
    fn classes_combine() {
        let frame = CanErrorFrame::from_class(ErrorClass::TX_TIMEOUT | ErrorClass::NO_ACK);
        assert!(frame.class().contains(ErrorClass::TX_TIMEOUT));
        assert!(frame.class().contains(ErrorClass::NO_ACK));
        assert!(!frame.class().contains(ErrorClass::BUS_OFF));
    }

    #[test]
    fn error_passive_sets_both_directions() {
        let frame = CanErrorFrame::error_passive();
        assert_eq!(frame.class(), ErrorClass::CONTROLLER);
        assert_eq!(
            frame.controller(),
            ControllerError::RX_PASSIVE | ControllerError::TX_PASSIVE
        );
    }
}
