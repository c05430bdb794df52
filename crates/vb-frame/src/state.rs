//! Bus controller state as reported in remote samples.

use serde::{Deserialize, Serialize};

/// Health of the remote CAN controller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControllerState {
    #[default]
    Ok,
    ErrorPassive,
    BusOff,
}

impl std::fmt::Display for ControllerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ControllerState::Ok => "ok",
            ControllerState::ErrorPassive => "error-passive",
            ControllerState::BusOff => "bus-off",
        };
        f.write_str(s)
    }
}
