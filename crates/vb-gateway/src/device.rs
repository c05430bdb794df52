//! Remote CAN device client abstraction.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use vb_frame::{CanFrame, ControllerState};

use crate::error::RemoteResult;

/// Bus error reported by the remote controller alongside a sample.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorEvent {
    #[default]
    None,
    /// A frame could not be transmitted.
    TransmitFailed,
    /// The controller's receive queue overflowed.
    ReceiveQueueFull,
    ArbitrationLost,
    BusError,
}

/// One entry of the remote sample stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sample {
    /// Device timestamp in microseconds.
    #[serde(default)]
    pub timestamp_us: u64,
    /// Whether `frame` holds a received data/remote frame.
    #[serde(default)]
    pub is_data_frame: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame: Option<CanFrame>,
    #[serde(default)]
    pub error: ErrorEvent,
    #[serde(default)]
    pub controller_state: ControllerState,
}

impl Sample {
    /// A sample carrying a received frame on a healthy bus.
    pub fn frame(frame: CanFrame) -> Self {
        Self {
            is_data_frame: true,
            frame: Some(frame),
            ..Default::default()
        }
    }

    /// A sample carrying only controller state / error information.
    pub fn status(controller_state: ControllerState, error: ErrorEvent) -> Self {
        Self {
            error,
            controller_state,
            ..Default::default()
        }
    }

    /// The received frame, if this sample reports one.
    pub fn data_frame(&self) -> Option<&CanFrame> {
        if self.is_data_frame {
            self.frame.as_ref()
        } else {
            None
        }
    }
}

/// Sample stream parameters negotiated with the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Samples per transmitted bucket.
    pub bucket_samples: u32,
    /// Samples the device buffers while the link is slow.
    pub buffered_samples: u32,
    /// Interval after which the device sends a (possibly empty) bucket.
    pub keepalive_interval_ms: u32,
}

/// Trait for remote CAN device clients.
#[async_trait]
pub trait RemoteDevice: Send + Sync {
    /// Set the remote controller's bitrate.
    async fn configure(&self, bitrate: u32) -> RemoteResult<()>;

    /// Queue `frames` for transmission on the remote bus as one request.
    ///
    /// Returns [`RemoteError::TemporarilyUnavailable`](crate::RemoteError)
    /// while the device's transmit queue is full.
    async fn send_frames(&self, frames: &[CanFrame]) -> RemoteResult<()>;

    /// Start the continuous sample stream.
    async fn start_stream(&self, config: &StreamConfig) -> RemoteResult<()>;

    /// Next stream sample, waiting at most `timeout`.
    async fn read_stream(&self, timeout: Duration) -> RemoteResult<Sample>;
}
